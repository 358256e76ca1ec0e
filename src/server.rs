//! HTTP surface: the axum router and its handlers.
//!
//! Error policy (uniform across every route): handlers never surface a
//! transport-level failure. Any pipeline error is caught at the handler
//! and answered as HTTP 200 with `{status: "failed", error: <message>}` —
//! the calling frontend branches on the `status` field, not on HTTP codes.
//!
//! The output directory is served statically at `/outputs`, so every
//! preview URL in a `/results` payload is directly fetchable.

use crate::config::ServiceConfig;
use crate::detector::Detector;
use crate::error::PlanscanError;
use crate::{pipeline, results, storage::Storage};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::warn;

/// Shared application state. Cheap to clone per request.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub storage: Storage,
    pub detector: Arc<Detector>,
}

impl AppState {
    /// Build the state from configuration, opening the storage areas.
    pub fn new(config: ServiceConfig) -> Result<Self, PlanscanError> {
        let storage = Storage::open(&config.upload_dir, &config.output_dir)?;
        let detector = Arc::new(Detector::new(&config));
        Ok(Self {
            config: Arc::new(config),
            storage,
            detector,
        })
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let outputs_dir = state.config.output_dir.clone();

    Router::new()
        .route("/upload", post(upload))
        .route("/preprocess", get(preprocess))
        .route("/load_model", get(load_model))
        .route("/inference", get(inference))
        .route("/process", get(process))
        .route("/results", get(results))
        .route("/reset", get(reset))
        .nest_service("/outputs", ServeDir::new(outputs_dir))
        // Drawings run large; the default 2 MB multipart cap is far too low.
        .layer(DefaultBodyLimit::max(256 * 1024 * 1024))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the router on the configured bind address.
pub async fn serve(state: AppState) -> Result<(), PlanscanError> {
    let addr = state.config.bind_addr;
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| PlanscanError::Internal(format!("cannot bind {addr}: {e}")))?;
    tracing::info!(%addr, "planscan listening");
    axum::serve(listener, app)
        .await
        .map_err(|e| PlanscanError::Internal(format!("server error: {e}")))
}

/// The uniform failure envelope.
fn failed(err: &PlanscanError) -> Json<Value> {
    warn!(error = %err, "request failed");
    Json(json!({ "status": "failed", "error": err.to_string() }))
}

// ── Handlers ──────────────────────────────────────────────────────────────

/// `POST /upload` — store the file, replacing any previous upload.
async fn upload(State(state): State<AppState>, mut multipart: Multipart) -> Json<Value> {
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => {
                return Json(json!({
                    "status": "failed",
                    "error": "multipart body contained no file field",
                }))
            }
            Err(e) => {
                return Json(json!({
                    "status": "failed",
                    "error": format!("malformed multipart body: {e}"),
                }))
            }
        };

        let Some(name) = field.file_name().map(str::to_string) else {
            // Not a file part (e.g. a stray form value); keep looking.
            continue;
        };

        let bytes = match field.bytes().await {
            Ok(b) => b,
            Err(e) => {
                return Json(json!({
                    "status": "failed",
                    "error": format!("failed to read upload body: {e}"),
                }))
            }
        };

        return match state.storage.store_upload(&name, &bytes).await {
            Ok(uploaded) => Json(json!({
                "status": "Complete",
                "filename": uploaded.stored_path.file_name().and_then(|n| n.to_str()),
                "path": uploaded.stored_path.to_string_lossy(),
            })),
            Err(e) => failed(&e),
        };
    }
}

/// `GET /preprocess` — dispatch by extension, convert if needed, rasterize.
async fn preprocess(State(state): State<AppState>) -> Json<Value> {
    match pipeline::preprocess(&state.storage, &state.config).await {
        Ok(pages) => Json(json!({
            "status": "ok",
            "pages_dir": state.storage.pages_dir().to_string_lossy(),
            "pages": pages,
        })),
        Err(e) => failed(&e),
    }
}

/// `GET /load_model` — idempotently load the detection model.
async fn load_model(State(state): State<AppState>) -> Json<Value> {
    match state.detector.load().await {
        Ok(_) => Json(json!({ "status": "ok" })),
        Err(e) => failed(&e),
    }
}

/// `GET /inference` — run detection over the current page set.
async fn inference(State(state): State<AppState>) -> Json<Value> {
    match state
        .detector
        .run(&state.storage.pages_dir(), &state.storage.runs_dir())
        .await
    {
        Ok(run_dir) => Json(json!({
            "status": "ok",
            "run_dir": run_dir.to_string_lossy(),
        })),
        Err(e) => failed(&e),
    }
}

/// `GET /process` — the one-shot pipeline: preprocess then inference.
async fn process(State(state): State<AppState>) -> Json<Value> {
    match pipeline::process(&state.storage, &state.config, &state.detector).await {
        Ok((pages, run_dir)) => Json(json!({
            "status": "ok",
            "pages": pages,
            "run_dir": run_dir.to_string_lossy(),
        })),
        Err(e) => failed(&e),
    }
}

/// `GET /results` — aggregate the most recent detection run.
async fn results(State(state): State<AppState>) -> Json<Value> {
    match results::aggregate(state.config.output_dir.as_path(), &state.config.class_names) {
        Ok(report) => match serde_json::to_value(&report) {
            Ok(v) => Json(v),
            Err(e) => failed(&PlanscanError::Internal(e.to_string())),
        },
        Err(e) => failed(&e),
    }
}

/// `GET /reset` — wipe both storage areas.
async fn reset(State(state): State<AppState>) -> Json<Value> {
    match state.storage.clear_all().await {
        Ok(()) => Json(json!({
            "status": "ok",
            "message": "uploads and outputs cleared",
        })),
        Err(e) => failed(&e),
    }
}
