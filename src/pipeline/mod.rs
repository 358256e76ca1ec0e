//! Pipeline stages for drawing processing.
//!
//! Each submodule implements exactly one transformation step. Keeping
//! stages separate makes each independently testable and lets us swap an
//! implementation (e.g. a different conversion provider) without touching
//! the others.
//!
//! ## Data Flow
//!
//! ```text
//! upload ──▶ dispatch ──▶ [convert] ──▶ render ──▶ detect ──▶ aggregate
//! (file.*)  (extension)  (DWF→PDF)    (pdfium)   (ONNX)     (/results)
//! ```
//!
//! 1. [`dispatch`] — classify the stored upload by extension
//! 2. [`convert`]  — DWF only: external cloud conversion to PDF
//! 3. [`render`]   — rasterize to `page_<n>.jpg` at a fixed upscale; runs
//!    in `spawn_blocking` because pdfium is not async-safe
//! 4. detection and aggregation live in [`crate::detector`] and
//!    [`crate::results`] — they operate on runs, not uploads
//!
//! Stages run strictly in sequence within one request; nothing here is
//! concurrent. The service assumes one active caller at a time.

pub mod convert;
pub mod dispatch;
pub mod render;

use crate::config::ServiceConfig;
use crate::detector::Detector;
use crate::error::PlanscanError;
use crate::storage::Storage;
use dispatch::SourceFormat;
use std::path::PathBuf;
use tracing::info;

/// Rasterize the currently tracked upload into the pages directory.
///
/// Dispatches by extension, converting DWF to PDF first. Stale pages from
/// a previous document are cleared before any new page is written, so the
/// page set never mixes two uploads.
///
/// Returns the number of page images produced.
pub async fn preprocess(storage: &Storage, config: &ServiceConfig) -> Result<usize, PlanscanError> {
    let upload = storage
        .latest_upload()
        .await?
        .ok_or(PlanscanError::NoUpload)?;
    let format = dispatch::classify(&upload.extension)?;

    storage.clear_derived().await?;
    let pages_dir = storage.pages_dir();

    let pages = match format {
        SourceFormat::Pdf => {
            render::rasterize_pdf(&upload.stored_path, &pages_dir, config.upscale).await?
        }
        SourceFormat::CadExchange => {
            let pdf_path = convert::dwf_to_pdf(&upload.stored_path, config).await?;
            render::rasterize_pdf(&pdf_path, &pages_dir, config.upscale).await?
        }
        SourceFormat::Image => {
            render::stage_image(&upload.stored_path, &pages_dir).await?;
            1
        }
    };

    info!(pages, format = ?format, "preprocess complete");
    Ok(pages)
}

/// One-shot pipeline: preprocess the tracked upload, then run detection.
///
/// Returns the page count and the detection run folder.
pub async fn process(
    storage: &Storage,
    config: &ServiceConfig,
    detector: &Detector,
) -> Result<(usize, PathBuf), PlanscanError> {
    let pages = preprocess(storage, config).await?;
    let run_dir = detector
        .run(&storage.pages_dir(), &storage.runs_dir())
        .await?;
    Ok((pages, run_dir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn scratch() -> (TempDir, Storage, ServiceConfig) {
        let tmp = TempDir::new().unwrap();
        let storage =
            Storage::open(tmp.path().join("uploads"), tmp.path().join("outputs")).unwrap();
        let config = ServiceConfig::builder()
            .data_root(tmp.path())
            .convert_api_key("")
            .build()
            .unwrap();
        (tmp, storage, config)
    }

    #[tokio::test]
    async fn preprocess_without_upload_fails() {
        let (_tmp, storage, config) = scratch();
        let err = preprocess(&storage, &config).await.unwrap_err();
        assert!(matches!(err, PlanscanError::NoUpload));
    }

    #[tokio::test]
    async fn preprocess_rejects_unsupported_extension() {
        let (_tmp, storage, config) = scratch();
        storage.store_upload("drawing.dxf", b"junk").await.unwrap();
        let err = preprocess(&storage, &config).await.unwrap_err();
        assert!(matches!(err, PlanscanError::UnsupportedFormat { .. }));
    }

    #[tokio::test]
    async fn preprocess_image_yields_single_page() {
        let (_tmp, storage, config) = scratch();
        storage
            .store_upload("plan.JPG", b"jpeg bytes")
            .await
            .unwrap();
        let pages = preprocess(&storage, &config).await.unwrap();
        assert_eq!(pages, 1);
        assert!(storage.pages_dir().join("page_1.jpg").exists());
    }

    #[tokio::test]
    async fn preprocess_clears_stale_pages_first() {
        let (_tmp, storage, config) = scratch();
        let pages_dir = storage.pages_dir();
        std::fs::create_dir_all(&pages_dir).unwrap();
        std::fs::write(pages_dir.join("page_7.jpg"), b"stale").unwrap();

        storage.store_upload("plan.png", b"img").await.unwrap();
        preprocess(&storage, &config).await.unwrap();

        assert!(!pages_dir.join("page_7.jpg").exists());
        assert!(pages_dir.join("page_1.jpg").exists());
    }
}
