//! # planscan
//!
//! Detect electrical fittings on engineering drawings.
//!
//! ## Why this crate?
//!
//! Quantity take-off from construction drawings — counting every downlight,
//! socket outlet, and exit sign across a drawing set — is slow, manual
//! work. planscan turns it into one upload: the drawing is rasterized page
//! by page and a pre-trained YOLO-family detector marks and counts each
//! fitting, with annotated pages served back for review.
//!
//! ## Pipeline Overview
//!
//! ```text
//! drawing (PDF / DWF / image)
//!  │
//!  ├─ 1. Upload    store as uploads/file.<ext>, replacing the previous one
//!  ├─ 2. Dispatch  route by extension (DWF detours through cloud conversion)
//!  ├─ 3. Render    rasterize pages at 2× via pdfium (CPU-bound, spawn_blocking)
//!  ├─ 4. Detect    ONNX inference per page → annotated JPEGs + label files
//!  └─ 5. Results   aggregate the newest run: pages, classes, counts, previews
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use planscan::{AppState, ServiceConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServiceConfig::builder()
//!         .data_root("./data")
//!         .model_path("./model/best.onnx")
//!         .build()?;
//!     planscan::server::serve(AppState::new(config)?).await?;
//!     Ok(())
//! }
//! ```
//!
//! The service exposes `POST /upload`, `GET /preprocess`, `GET /load_model`,
//! `GET /inference`, `GET /process`, `GET /results`, and `GET /reset`, with
//! all derived artifacts browsable under `/outputs`.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod detector;
pub mod error;
pub mod pipeline;
pub mod results;
pub mod server;
pub mod storage;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ServiceConfig, ServiceConfigBuilder, DEFAULT_CLASS_NAMES};
pub use detector::{Detection, Detector};
pub use error::PlanscanError;
pub use results::{aggregate, DetectionRecord, PagePreview, ResultsReport, Summary};
pub use server::{router, AppState};
pub use storage::{Storage, UploadedFile};
