//! Aggregation tests over synthetic run trees.
//!
//! These build detection-run folders by hand — no model, no pdfium — and
//! check the `/results` arithmetic: page counts, distinct classes, the
//! Unknown fallback, malformed-line tolerance, and the latest-run-only
//! policy.

use planscan::{aggregate, ServiceConfig, DEFAULT_CLASS_NAMES};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn class_names() -> Vec<String> {
    DEFAULT_CLASS_NAMES.iter().map(|s| s.to_string()).collect()
}

/// Create `output/run/<name>` with `pages` annotated page images and the
/// given `(page, lines)` label files.
fn make_run(output_dir: &Path, name: &str, pages: usize, labels: &[(usize, &str)]) -> PathBuf {
    let run_dir = output_dir.join("run").join(name);
    let labels_dir = run_dir.join("labels");
    std::fs::create_dir_all(&labels_dir).unwrap();

    for n in 1..=pages {
        std::fs::write(run_dir.join(format!("page_{n}.jpg")), b"jpeg").unwrap();
    }
    for (page, lines) in labels {
        std::fs::write(labels_dir.join(format!("page_{page}.txt")), lines).unwrap();
    }
    run_dir
}

#[test]
fn three_page_run_aggregates_counts_and_classes() {
    let tmp = TempDir::new().unwrap();
    make_run(
        tmp.path(),
        "run_20240301_120000",
        3,
        &[
            // Page 1: a Cove Light and a Door.
            (1, "0 0.50 0.50 0.10 0.10 0.91\n1 0.20 0.20 0.05 0.05 0.44\n"),
            // Page 2: two Doors — distinct classes must not double-count.
            (2, "1 0.40 0.40 0.08 0.08 0.30\n1 0.70 0.70 0.08 0.08 0.12\n"),
            // Page 3: zero detections, so no label file at all.
        ],
    );

    let report = aggregate(tmp.path(), &class_names()).unwrap();

    assert_eq!(report.summary.total_pages, 3);
    assert_eq!(report.summary.total_detections, 4);
    assert_eq!(report.summary.items_found, 2); // Cove Light, Door

    // Pages listed in order, each with a fetchable /outputs URL.
    let pages: Vec<usize> = report.pages.iter().map(|p| p.page).collect();
    assert_eq!(pages, vec![1, 2, 3]);
    for p in &report.pages {
        assert!(p.url.starts_with("/outputs/run/run_20240301_120000/"));
    }
    assert_eq!(report.preview.as_deref(), Some(report.pages[2].url.as_str()));
}

#[test]
fn class_id_out_of_table_counts_as_unknown() {
    let tmp = TempDir::new().unwrap();
    make_run(
        tmp.path(),
        "run_20240301_120000",
        1,
        &[(1, "9 0.5 0.5 0.1 0.1 0.77\n2 0.5 0.5 0.1 0.1 0.55\n")],
    );

    let report = aggregate(tmp.path(), &class_names()).unwrap();

    // The out-of-range id still counts toward the total.
    assert_eq!(report.summary.total_detections, 2);
    assert_eq!(report.summary.items_found, 2); // Downlight + Unknown
    assert!(report
        .detections
        .iter()
        .any(|d| d.class_name == "Unknown" && d.class_id == 9));
}

#[test]
fn malformed_label_lines_are_skipped_silently() {
    let tmp = TempDir::new().unwrap();
    make_run(
        tmp.path(),
        "run_20240301_120000",
        1,
        &[(
            1,
            "1 0.5 0.5 0.1\n\
             garbage\n\
             \n\
             3 0.5 0.5 0.1 0.1 0.66\n",
        )],
    );

    let report = aggregate(tmp.path(), &class_names()).unwrap();

    // Only the single well-formed line counts; nothing raises.
    assert_eq!(report.summary.total_detections, 1);
    assert_eq!(report.detections[0].class_name, "Emergency Light Fitting");
    assert!((report.detections[0].confidence - 0.66).abs() < 1e-6);
}

#[test]
fn only_the_latest_run_counts() {
    let tmp = TempDir::new().unwrap();
    make_run(
        tmp.path(),
        "run_20240101_000000",
        5,
        &[(1, "0 0.5 0.5 0.1 0.1 0.9\n")],
    );
    make_run(
        tmp.path(),
        "run_20240601_000000",
        1,
        &[(1, "6 0.5 0.5 0.1 0.1 0.8\n")],
    );

    let report = aggregate(tmp.path(), &class_names()).unwrap();

    assert_eq!(report.summary.total_pages, 1);
    assert_eq!(report.summary.total_detections, 1);
    assert_eq!(report.detections[0].class_name, "Exit Sign");
    assert!(report.pages[0].url.contains("run_20240601_000000"));
}

#[test]
fn pages_are_ordered_by_index_not_write_time() {
    let tmp = TempDir::new().unwrap();
    let run_dir = tmp.path().join("run").join("run_20240301_120000");
    std::fs::create_dir_all(run_dir.join("labels")).unwrap();

    // Written newest-first and past single digits, so both mtime order and
    // lexical filename order disagree with page order.
    for n in [12, 3, 1, 10, 2] {
        std::fs::write(run_dir.join(format!("page_{n}.jpg")), b"jpeg").unwrap();
    }

    let report = aggregate(tmp.path(), &class_names()).unwrap();

    let pages: Vec<usize> = report.pages.iter().map(|p| p.page).collect();
    assert_eq!(pages, vec![1, 2, 3, 10, 12]);
    assert!(report
        .preview
        .as_deref()
        .unwrap()
        .ends_with("page_12.jpg"));
}

#[test]
fn run_with_no_labels_reports_pages_but_zero_detections() {
    let tmp = TempDir::new().unwrap();
    make_run(tmp.path(), "run_20240301_120000", 2, &[]);

    let report = aggregate(tmp.path(), &class_names()).unwrap();

    assert_eq!(report.summary.total_pages, 2);
    assert_eq!(report.summary.total_detections, 0);
    assert_eq!(report.summary.items_found, 0);
    assert!(report.preview.is_some());
}

#[test]
fn items_found_is_bounded_by_table_plus_unknown() {
    let tmp = TempDir::new().unwrap();
    // Every table class plus several out-of-range ids.
    let mut lines = String::new();
    for id in 0..12 {
        lines.push_str(&format!("{id} 0.5 0.5 0.1 0.1 0.9\n"));
    }
    let lines_ref: &str = &lines;
    make_run(tmp.path(), "run_20240301_120000", 1, &[(1, lines_ref)]);

    let report = aggregate(tmp.path(), &class_names()).unwrap();

    assert_eq!(report.summary.total_detections, 12);
    // 7 table names + "Unknown".
    assert_eq!(report.summary.items_found, 8);
}

#[test]
fn empty_output_tree_is_all_zeros() {
    let tmp = TempDir::new().unwrap();
    let report = aggregate(tmp.path(), &class_names()).unwrap();
    assert_eq!(report.summary.total_pages, 0);
    assert_eq!(report.summary.items_found, 0);
    assert_eq!(report.summary.total_detections, 0);
    assert!(report.pages.is_empty());
    assert!(report.preview.is_none());
}

#[test]
fn default_config_table_matches_model_classes() {
    // The aggregator and the config must agree on the 7-entry table.
    let config = ServiceConfig::default();
    assert_eq!(config.class_names.len(), 7);
    assert_eq!(config.class_name(5), "Socket Outlet");
}
