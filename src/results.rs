//! Results aggregation over the most recent detection run.
//!
//! The summary is computed on demand from the run-folder tree; nothing is
//! persisted. Only the newest `run_*` folder counts — older runs stay on
//! disk but never leak into a later summary, so `total_pages` always
//! reflects the document processed last.
//!
//! Label parsing is forgiving by contract: a page with zero detections has
//! no label file at all, and lines with fewer than five whitespace tokens
//! are skipped silently rather than reported as errors.
//!
//! Page previews are ordered by the page index parsed from the filename,
//! not by file modification time. Pages are written strictly in page order
//! so the two orderings coincide, and the parsed index survives copies and
//! backup restores that rewrite timestamps.

use crate::error::PlanscanError;
use crate::pipeline::render::list_pages;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One page's preview entry: 1-based page number and a fetchable URL.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PagePreview {
    pub page: usize,
    pub url: String,
}

/// One parsed detection, resolved to a display name.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionRecord {
    pub class_id: usize,
    pub class_name: String,
    pub confidence: f32,
}

/// Aggregated counts for the run.
#[derive(Debug, Serialize)]
pub struct Summary {
    pub total_pages: usize,
    /// Number of distinct resolved class names found.
    pub items_found: usize,
    pub total_detections: usize,
    pub pages: Vec<PagePreview>,
}

/// The full `/results` payload.
#[derive(Debug, Serialize)]
pub struct ResultsReport {
    pub summary: Summary,
    pub detections: Vec<DetectionRecord>,
    /// URL of the last page's annotated image, if any pages exist.
    pub preview: Option<String>,
    pub pages: Vec<PagePreview>,
}

/// Aggregate the newest run folder under `output_dir/run`.
///
/// An output tree with no runs yields an all-zero report, not an error —
/// `/results` before any processing is a legitimate call.
pub fn aggregate(output_dir: &Path, class_names: &[String]) -> Result<ResultsReport, PlanscanError> {
    let run_dir = match latest_run(&output_dir.join("run"))? {
        Some(dir) => dir,
        None => return Ok(empty_report()),
    };
    debug!(run = %run_dir.display(), "aggregating results");

    // Page previews: annotated page images in the run folder, page order.
    let pages: Vec<PagePreview> = list_pages(&run_dir)?
        .into_iter()
        .map(|(page, path)| PagePreview {
            page,
            url: preview_url(output_dir, &path),
        })
        .collect();

    // Detections: every parseable line of every label file.
    let mut detections = Vec::new();
    let labels_dir = run_dir.join("labels");
    if let Ok(entries) = std::fs::read_dir(&labels_dir) {
        let mut label_files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|e| e == "txt"))
            .collect();
        label_files.sort();

        for file in label_files {
            let text = std::fs::read_to_string(&file).map_err(|e| PlanscanError::io(&file, e))?;
            for line in text.lines() {
                if let Some((class_id, confidence)) = parse_label_line(line) {
                    detections.push(DetectionRecord {
                        class_id,
                        class_name: resolve_class(class_names, class_id),
                        // Two decimals is plenty for a counting report.
                        confidence: (confidence * 100.0).round() / 100.0,
                    });
                }
            }
        }
    }

    let distinct: BTreeSet<&str> = detections.iter().map(|d| d.class_name.as_str()).collect();

    Ok(ResultsReport {
        summary: Summary {
            total_pages: pages.len(),
            items_found: distinct.len(),
            total_detections: detections.len(),
            pages: pages.clone(),
        },
        preview: pages.last().map(|p| p.url.clone()),
        detections,
        pages,
    })
}

/// Resolve a class id through the name table; out-of-range ids are
/// reported as "Unknown" but still count as detections.
fn resolve_class(class_names: &[String], class_id: usize) -> String {
    class_names
        .get(class_id)
        .cloned()
        .unwrap_or_else(|| "Unknown".to_string())
}

/// Parse one label line: `class x y w h [conf]`.
///
/// The confidence is the LAST token. Lines with fewer than five tokens are
/// malformed and yield `None`; so do unparsable class ids or confidences.
fn parse_label_line(line: &str) -> Option<(usize, f32)> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 5 {
        return None;
    }
    let class_id = tokens[0].parse::<usize>().ok()?;
    let confidence = tokens.last()?.parse::<f32>().ok()?;
    Some((class_id, confidence))
}

/// Find the newest `run_*` folder. Timestamped names sort lexically in
/// chronological order, so max-by-name is max-by-time.
fn latest_run(runs_dir: &Path) -> Result<Option<PathBuf>, PlanscanError> {
    let entries = match std::fs::read_dir(runs_dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(PlanscanError::io(runs_dir, e)),
    };

    Ok(entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_dir()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("run_"))
        })
        .max())
}

/// Build the `/outputs/...` URL for an artifact inside the output tree.
fn preview_url(output_dir: &Path, artifact: &Path) -> String {
    let rel = artifact.strip_prefix(output_dir).unwrap_or(artifact);
    let rel = rel.to_string_lossy().replace('\\', "/");
    format!("/outputs/{rel}")
}

fn empty_report() -> ResultsReport {
    ResultsReport {
        summary: Summary {
            total_pages: 0,
            items_found: 0,
            total_detections: 0,
            pages: Vec::new(),
        },
        detections: Vec::new(),
        preview: None,
        pages: Vec::new(),
    }
}
