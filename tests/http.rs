//! Router-level tests.
//!
//! Each test builds a fresh `AppState` over temp directories and drives the
//! router directly with `tower::ServiceExt::oneshot` — no socket, no model
//! weights. Routes that would need pdfium or ONNX are exercised only on
//! their error paths here; the happy detection path is covered by the unit
//! tests in `src/detector.rs` and the aggregation tests in `results.rs`.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use planscan::{router, AppState, ServiceConfig};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "planscan-test-boundary";

fn test_state(tmp: &TempDir) -> AppState {
    let config = ServiceConfig::builder()
        .data_root(tmp.path())
        .model_path(tmp.path().join("missing.onnx"))
        .build()
        .unwrap();
    AppState::new(config).unwrap()
}

fn test_app(tmp: &TempDir) -> (Router, AppState) {
    let state = test_state(tmp);
    (router(state.clone()), state)
}

/// Hand-assemble a single-file multipart body for `POST /upload`.
fn upload_request(filename: &str, bytes: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_of(app: Router, req: Request<Body>) -> Value {
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn upload_stores_file_and_reports_complete() {
    let tmp = TempDir::new().unwrap();
    let (app, state) = test_app(&tmp);

    let body = json_of(app, upload_request("Drawing Set.PDF", b"%PDF-1.7")).await;

    assert_eq!(body["status"], "Complete");
    assert_eq!(body["filename"], "file.pdf");

    let upload = state.storage.latest_upload().await.unwrap().unwrap();
    assert_eq!(upload.extension, "pdf");
}

#[tokio::test]
async fn second_upload_replaces_the_first() {
    let tmp = TempDir::new().unwrap();
    let (app, state) = test_app(&tmp);

    json_of(app.clone(), upload_request("a.pdf", b"%PDF-1.7")).await;
    json_of(app, upload_request("b.jpg", b"\xff\xd8\xff")).await;

    let upload = state.storage.latest_upload().await.unwrap().unwrap();
    assert_eq!(upload.extension, "jpg");
    assert!(!state.storage.upload_dir().join("file.pdf").exists());
}

#[tokio::test]
async fn upload_without_file_field_fails() {
    let tmp = TempDir::new().unwrap();
    let (app, _state) = test_app(&tmp);

    // A form value but no file part.
    let body = format!(
        "--{BOUNDARY}\r\n\
         Content-Disposition: form-data; name=\"note\"\r\n\r\n\
         hello\r\n\
         --{BOUNDARY}--\r\n"
    );
    let req = Request::builder()
        .method("POST")
        .uri("/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap();

    let body = json_of(app, req).await;
    assert_eq!(body["status"], "failed");
    assert!(body["error"].as_str().unwrap().contains("no file"));
}

#[tokio::test]
async fn preprocess_without_upload_fails_in_envelope() {
    let tmp = TempDir::new().unwrap();
    let (app, _state) = test_app(&tmp);

    let body = json_of(app, get("/preprocess")).await;

    assert_eq!(body["status"], "failed");
    assert!(body["error"].as_str().unwrap().contains("No uploaded file"));
}

#[tokio::test]
async fn preprocess_rejects_unsupported_extension() {
    let tmp = TempDir::new().unwrap();
    let (app, _state) = test_app(&tmp);

    json_of(app.clone(), upload_request("schedule.docx", b"PK")).await;
    let body = json_of(app, get("/preprocess")).await;

    assert_eq!(body["status"], "failed");
    assert!(body["error"].as_str().unwrap().contains(".docx"));
}

#[tokio::test]
async fn image_upload_preprocesses_to_a_single_page() {
    let tmp = TempDir::new().unwrap();
    let (app, state) = test_app(&tmp);

    json_of(app.clone(), upload_request("floor_plan.jpg", b"\xff\xd8\xff")).await;
    let body = json_of(app, get("/preprocess")).await;

    assert_eq!(body["status"], "ok");
    assert_eq!(body["pages"], 1);
    assert!(state.storage.pages_dir().join("page_1.jpg").exists());
}

#[tokio::test]
async fn inference_before_load_model_fails() {
    let tmp = TempDir::new().unwrap();
    let (app, _state) = test_app(&tmp);

    let body = json_of(app, get("/inference")).await;

    assert_eq!(body["status"], "failed");
    assert!(body["error"].as_str().unwrap().contains("Model not loaded"));
}

#[tokio::test]
async fn load_model_with_missing_weights_fails() {
    let tmp = TempDir::new().unwrap();
    let (app, _state) = test_app(&tmp);

    let body = json_of(app, get("/load_model")).await;

    assert_eq!(body["status"], "failed");
    assert!(body["error"].as_str().unwrap().contains("missing.onnx"));
}

#[tokio::test]
async fn results_before_any_processing_is_all_zeros() {
    let tmp = TempDir::new().unwrap();
    let (app, _state) = test_app(&tmp);

    let body = json_of(app, get("/results")).await;

    assert_eq!(body["summary"]["total_pages"], 0);
    assert_eq!(body["summary"]["items_found"], 0);
    assert_eq!(body["summary"]["total_detections"], 0);
    assert!(body["preview"].is_null());
}

#[tokio::test]
async fn reset_zeroes_the_results() {
    let tmp = TempDir::new().unwrap();
    let (app, state) = test_app(&tmp);

    // Seed a finished run directly on disk.
    let run_dir = state.storage.runs_dir().join("run_20240301_120000");
    let labels = run_dir.join("labels");
    std::fs::create_dir_all(&labels).unwrap();
    std::fs::write(run_dir.join("page_1.jpg"), b"jpeg").unwrap();
    std::fs::write(labels.join("page_1.txt"), "2 0.5 0.5 0.1 0.1 0.9\n").unwrap();

    let before = json_of(app.clone(), get("/results")).await;
    assert_eq!(before["summary"]["total_detections"], 1);
    assert_eq!(before["detections"][0]["class_name"], "Downlight");

    let reset = json_of(app.clone(), get("/reset")).await;
    assert_eq!(reset["status"], "ok");

    let after = json_of(app, get("/results")).await;
    assert_eq!(after["summary"]["total_pages"], 0);
    assert_eq!(after["summary"]["total_detections"], 0);
}
