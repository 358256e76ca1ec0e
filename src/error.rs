//! Error types for the planscan library.
//!
//! One enum covers the whole pipeline because every failure ultimately
//! surfaces the same way: the HTTP layer converts it into a
//! `{status: "failed", error: <message>}` JSON body (see [`crate::server`]).
//! The variants still matter internally — tests and callers embedding the
//! library can match on the failure class instead of string-scraping.

use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the planscan library.
#[derive(Debug, Error)]
pub enum PlanscanError {
    // ── Upload / dispatch errors ──────────────────────────────────────────
    /// No file has been uploaded yet, so there is nothing to process.
    #[error("No uploaded file found. POST a file to /upload first.")]
    NoUpload,

    /// The uploaded file's extension is not one we can rasterize.
    #[error("Unsupported file format '.{extension}'. Supported: pdf, dwf, jpg, jpeg, png.")]
    UnsupportedFormat { extension: String },

    // ── Rasterization errors ──────────────────────────────────────────────
    /// pdfium could not open the source document at all.
    #[error("Failed to open PDF '{path}': {detail}")]
    PdfOpen { path: PathBuf, detail: String },

    /// pdfium failed while rendering a specific page.
    #[error("Rasterization failed for page {page}: {detail}")]
    Rasterization { page: usize, detail: String },

    /// Could not bind to a pdfium shared library.
    #[error(
        "Failed to bind to the pdfium library: {0}\n\
         Set PDFIUM_DYNAMIC_LIB_PATH to the directory containing libpdfium."
    )]
    PdfiumBinding(String),

    /// The pages directory holds no page images to run detection on.
    #[error("No page images found. Run /preprocess before /inference.")]
    NoPages,

    // ── External conversion errors ────────────────────────────────────────
    /// The DWF-to-PDF cloud conversion failed (network, quota, bad input).
    #[error("DWF to PDF conversion failed: {detail}")]
    Conversion { detail: String },

    /// The ConvertAPI credential is not configured.
    #[error("CONVERT_API_KEY is not set. DWF conversion requires a ConvertAPI secret.")]
    MissingApiKey,

    // ── Detector errors ───────────────────────────────────────────────────
    /// The ONNX weights file is missing or could not be parsed.
    #[error("Failed to load detection model '{path}': {detail}")]
    ModelLoad { path: PathBuf, detail: String },

    /// Inference was requested before /load_model.
    #[error("Model not loaded. Call /load_model first.")]
    ModelNotLoaded,

    /// The model produced an output tensor we cannot decode.
    #[error("Inference failed: {0}")]
    Inference(String),

    // ── I/O and catch-all ─────────────────────────────────────────────────
    /// Disk error during save/read of an artifact.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PlanscanError {
    /// Wrap a `std::io::Error` with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
