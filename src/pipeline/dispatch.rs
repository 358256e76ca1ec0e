//! Format dispatch: classify an upload by extension.
//!
//! Classification is deliberately extension-based, not content-sniffing —
//! the upstream CAD tools that produce these files name them reliably, and
//! a wrong extension fails loudly one stage later anyway.

use crate::error::PlanscanError;

/// The three rasterization paths an upload can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    /// Native PDF — rasterized directly.
    Pdf,
    /// Raster image — copied into the page set as page 1.
    Image,
    /// CAD-exchange file — converted to PDF externally, then rasterized.
    CadExchange,
}

/// Classify a lowercase-insensitive extension into a [`SourceFormat`].
///
/// Unknown extensions return `UnsupportedFormat` and never reach the
/// rasterizer.
pub fn classify(extension: &str) -> Result<SourceFormat, PlanscanError> {
    match extension.to_lowercase().as_str() {
        "pdf" => Ok(SourceFormat::Pdf),
        "jpg" | "jpeg" | "png" => Ok(SourceFormat::Image),
        "dwf" => Ok(SourceFormat::CadExchange),
        other => Err(PlanscanError::UnsupportedFormat {
            extension: other.to_string(),
        }),
    }
}
