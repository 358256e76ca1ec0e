//! Service configuration.
//!
//! Every knob lives in one [`ServiceConfig`] built via its
//! [`ServiceConfigBuilder`]. The original deployments of this pipeline
//! drifted apart precisely because these values were copy-pasted literals —
//! upscale factor here, thresholds there, a class table somewhere else.
//! Centralising them makes one binary serve every variant.
//!
//! # Design choice: builder over constructor
//! Callers set only what they care about and rely on documented defaults
//! for the rest; adding a field never breaks existing call sites.

use crate::error::PlanscanError;
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;

/// The seven fitting classes the bundled model was trained on, in model
/// class-id order. Ids outside this table resolve to `"Unknown"`.
pub const DEFAULT_CLASS_NAMES: [&str; 7] = [
    "Cove Light",
    "Door",
    "Downlight",
    "Emergency Light Fitting",
    "Fluorescent Light",
    "Socket Outlet",
    "Exit Sign",
];

/// Configuration for the detection service.
///
/// Built via [`ServiceConfig::builder()`] or [`ServiceConfig::default()`].
///
/// # Example
/// ```rust
/// use planscan::ServiceConfig;
///
/// let config = ServiceConfig::builder()
///     .data_root("/var/lib/planscan")
///     .confidence(0.10)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct ServiceConfig {
    /// Directory holding the single most recent upload. Default: `./uploads`.
    pub upload_dir: PathBuf,

    /// Directory holding all derived artifacts (rasterized pages, detection
    /// runs). Served statically at `/outputs`. Default: `./outputs`.
    pub output_dir: PathBuf,

    /// Path to the ONNX detection weights. Default: `./model/best.onnx`.
    pub model_path: PathBuf,

    /// Address the HTTP server binds to. Default: `127.0.0.1:8000`.
    pub bind_addr: SocketAddr,

    /// Linear upscale factor applied when rasterizing PDF pages. Default: 2.0.
    ///
    /// Engineering drawings carry symbols a few millimetres across; rendering
    /// at native size loses them below the detector's receptive field. 2×
    /// keeps small fittings detectable without ballooning page images.
    pub upscale: f32,

    /// Detection confidence threshold. Default: 0.10.
    ///
    /// Deliberately low: this service counts fittings, and a missed symbol
    /// costs more than a spurious one the reviewer can discard.
    pub confidence: f32,

    /// IoU threshold for overlap suppression. Default: 0.20.
    ///
    /// Low for the same recall-over-precision reason — drawing symbols
    /// rarely overlap legitimately, so aggressive suppression is safe.
    pub iou: f32,

    /// Square input edge the model expects, in pixels. Default: 640.
    pub input_size: u32,

    /// Class-id → human-readable name table. Default: [`DEFAULT_CLASS_NAMES`].
    pub class_names: Vec<String>,

    /// ConvertAPI secret for DWF→PDF conversion. Sourced from the
    /// `CONVERT_API_KEY` environment variable, never from source text.
    #[serde(skip_serializing)]
    pub convert_api_key: Option<String>,

    /// ConvertAPI endpoint base. Overridable for tests. Default:
    /// `https://v2.convertapi.com`.
    pub convert_api_base: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("uploads"),
            output_dir: PathBuf::from("outputs"),
            model_path: PathBuf::from("model/best.onnx"),
            bind_addr: ([127, 0, 0, 1], 8000).into(),
            upscale: 2.0,
            confidence: 0.10,
            iou: 0.20,
            input_size: 640,
            class_names: DEFAULT_CLASS_NAMES.iter().map(|s| s.to_string()).collect(),
            convert_api_key: std::env::var("CONVERT_API_KEY").ok().filter(|k| !k.is_empty()),
            convert_api_base: "https://v2.convertapi.com".to_string(),
        }
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }

    /// Resolve a model class id to a display name.
    pub fn class_name(&self, class_id: usize) -> &str {
        self.class_names
            .get(class_id)
            .map(String::as_str)
            .unwrap_or("Unknown")
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    /// Place both storage areas under `root` (`root/uploads`, `root/outputs`).
    pub fn data_root(mut self, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        self.config.upload_dir = root.join("uploads");
        self.config.output_dir = root.join("outputs");
        self
    }

    pub fn upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.upload_dir = dir.into();
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn model_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.model_path = path.into();
        self
    }

    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    pub fn upscale(mut self, factor: f32) -> Self {
        self.config.upscale = factor.clamp(1.0, 8.0);
        self
    }

    pub fn confidence(mut self, threshold: f32) -> Self {
        self.config.confidence = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn iou(mut self, threshold: f32) -> Self {
        self.config.iou = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn input_size(mut self, px: u32) -> Self {
        self.config.input_size = px.max(32);
        self
    }

    pub fn class_names(mut self, names: Vec<String>) -> Self {
        self.config.class_names = names;
        self
    }

    pub fn convert_api_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.config.convert_api_key = if key.is_empty() { None } else { Some(key) };
        self
    }

    pub fn convert_api_base(mut self, base: impl Into<String>) -> Self {
        self.config.convert_api_base = base.into();
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, PlanscanError> {
        let c = &self.config;
        if c.class_names.is_empty() {
            return Err(PlanscanError::Internal(
                "class name table must not be empty".into(),
            ));
        }
        if c.upload_dir == c.output_dir {
            return Err(PlanscanError::Internal(
                "upload and output directories must differ".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployment() {
        let c = ServiceConfig::default();
        assert_eq!(c.upscale, 2.0);
        assert_eq!(c.confidence, 0.10);
        assert_eq!(c.iou, 0.20);
        assert_eq!(c.class_names.len(), 7);
    }

    #[test]
    fn builder_clamps_thresholds() {
        let c = ServiceConfig::builder()
            .confidence(4.2)
            .iou(-1.0)
            .upscale(100.0)
            .build()
            .unwrap();
        assert_eq!(c.confidence, 1.0);
        assert_eq!(c.iou, 0.0);
        assert_eq!(c.upscale, 8.0);
    }

    #[test]
    fn class_name_out_of_range_is_unknown() {
        let c = ServiceConfig::default();
        assert_eq!(c.class_name(0), "Cove Light");
        assert_eq!(c.class_name(6), "Exit Sign");
        assert_eq!(c.class_name(7), "Unknown");
        assert_eq!(c.class_name(999), "Unknown");
    }

    #[test]
    fn same_storage_dirs_rejected() {
        let res = ServiceConfig::builder()
            .upload_dir("/tmp/x")
            .output_dir("/tmp/x")
            .build();
        assert!(res.is_err());
    }

    #[test]
    fn data_root_places_both_areas() {
        let c = ServiceConfig::builder().data_root("/srv/scan").build().unwrap();
        assert_eq!(c.upload_dir, PathBuf::from("/srv/scan/uploads"));
        assert_eq!(c.output_dir, PathBuf::from("/srv/scan/outputs"));
    }
}
