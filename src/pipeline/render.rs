//! Rasterization: one JPEG per source page.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which uses thread-local
//! state internally and is not safe to call from async contexts.
//! `tokio::task::spawn_blocking` moves the work onto the blocking thread
//! pool so Tokio workers are not stalled by CPU-heavy rendering.
//!
//! ## Why a fixed 2× upscale?
//!
//! Fittings on an engineering drawing are tiny relative to the sheet. At
//! native page size they fall below what the detector can resolve; a 2×
//! linear upscale recovers them without producing unmanageable images.
//!
//! Pages are written as `page_<n>.jpg` with 1-based contiguous indices —
//! the contract every downstream stage (detector, aggregator) relies on.

use crate::error::PlanscanError;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Rasterize every page of `pdf_path` into `pages_dir` at `scale`×.
///
/// Returns the number of pages written. The pages directory is created if
/// missing; the caller is responsible for clearing stale pages first (see
/// [`crate::storage::Storage::clear_derived`]). A failed run may leave a
/// partial page set behind — there is no all-or-nothing guarantee.
pub async fn rasterize_pdf(
    pdf_path: &Path,
    pages_dir: &Path,
    scale: f32,
) -> Result<usize, PlanscanError> {
    let pdf_path = pdf_path.to_path_buf();
    let pages_dir = pages_dir.to_path_buf();

    tokio::fs::create_dir_all(&pages_dir)
        .await
        .map_err(|e| PlanscanError::io(&pages_dir, e))?;

    tokio::task::spawn_blocking(move || rasterize_blocking(&pdf_path, &pages_dir, scale))
        .await
        .map_err(|e| PlanscanError::Internal(format!("render task panicked: {e}")))?
}

/// Blocking implementation of PDF rasterization.
fn rasterize_blocking(
    pdf_path: &Path,
    pages_dir: &Path,
    scale: f32,
) -> Result<usize, PlanscanError> {
    let pdfium = Pdfium::default();

    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(|e| PlanscanError::PdfOpen {
            path: pdf_path.to_path_buf(),
            detail: format!("{e:?}"),
        })?;

    let render_config = PdfRenderConfig::new().scale_page_by_factor(scale);

    let pages = document.pages();
    let total = pages.len() as usize;
    info!(pages = total, path = %pdf_path.display(), "rasterizing PDF");

    for (idx, page) in pages.iter().enumerate() {
        let page_num = idx + 1;
        let bitmap =
            page.render_with_config(&render_config)
                .map_err(|e| PlanscanError::Rasterization {
                    page: page_num,
                    detail: format!("{e:?}"),
                })?;

        let image = bitmap.as_image();
        let out_path = pages_dir.join(format!("page_{page_num}.jpg"));
        // JPEG has no alpha channel; pdfium hands back RGBA.
        image
            .to_rgb8()
            .save(&out_path)
            .map_err(|e| PlanscanError::Rasterization {
                page: page_num,
                detail: format!("failed to save '{}': {e}", out_path.display()),
            })?;

        debug!(
            page = page_num,
            width = image.width(),
            height = image.height(),
            "rendered page"
        );
    }

    Ok(total)
}

/// The degenerate path for an already-an-image upload: copy it into the
/// page set as page 1. No decoding — downstream sees the same contract as
/// a one-page PDF.
pub async fn stage_image(src: &Path, pages_dir: &Path) -> Result<PathBuf, PlanscanError> {
    tokio::fs::create_dir_all(pages_dir)
        .await
        .map_err(|e| PlanscanError::io(pages_dir, e))?;

    let dest = pages_dir.join("page_1.jpg");
    tokio::fs::copy(src, &dest)
        .await
        .map_err(|e| PlanscanError::io(src, e))?;
    debug!(src = %src.display(), dest = %dest.display(), "staged image as page 1");
    Ok(dest)
}

/// List the page images in `pages_dir`, sorted by 1-based page index.
///
/// Filenames that do not match `page_<n>.jpg` are ignored.
pub fn list_pages(pages_dir: &Path) -> Result<Vec<(usize, PathBuf)>, PlanscanError> {
    let entries = match std::fs::read_dir(pages_dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(PlanscanError::io(pages_dir, e)),
    };

    let mut pages: Vec<(usize, PathBuf)> = entries
        .filter_map(|entry| {
            let path = entry.ok()?.path();
            let num = parse_page_number(&path)?;
            Some((num, path))
        })
        .collect();
    pages.sort_unstable_by_key(|(n, _)| *n);
    Ok(pages)
}

/// Extract `n` from a `page_<n>.jpg` path.
fn parse_page_number(path: &Path) -> Option<usize> {
    let stem = path.file_stem()?.to_str()?;
    let ext = path.extension()?.to_str()?;
    if !ext.eq_ignore_ascii_case("jpg") {
        return None;
    }
    stem.strip_prefix("page_")?.parse().ok()
}
