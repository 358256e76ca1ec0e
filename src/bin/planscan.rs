//! Server binary for planscan.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ServiceConfig` and runs the HTTP server.

use anyhow::{Context, Result};
use clap::Parser;
use planscan::{AppState, ServiceConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Serve with defaults (./uploads, ./outputs, ./model/best.onnx)
  planscan

  # Production-ish: explicit data root and model, all interfaces
  planscan --data-root /var/lib/planscan --model /opt/models/fittings.onnx \
           --bind 0.0.0.0:8000

  # Favor precision over recall for a cleaner report
  planscan --confidence 0.4 --iou 0.5

ENVIRONMENT VARIABLES:
  CONVERT_API_KEY          ConvertAPI secret — required only for DWF uploads
  PDFIUM_DYNAMIC_LIB_PATH  Directory containing libpdfium, if not on the
                           default search path
  RUST_LOG                 Tracing filter (overrides -v/-q)

A `.env` file in the working directory is loaded at startup.
"#;

/// Detect electrical fittings on engineering drawings over HTTP.
#[derive(Parser, Debug)]
#[command(
    name = "planscan",
    version,
    about = "Detect electrical fittings on engineering drawings over HTTP",
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Address to bind the HTTP server to.
    #[arg(long, env = "PLANSCAN_BIND", default_value = "127.0.0.1:8000")]
    bind: SocketAddr,

    /// Root directory for storage; uploads/ and outputs/ are created inside.
    #[arg(long, env = "PLANSCAN_DATA_ROOT", default_value = ".")]
    data_root: PathBuf,

    /// Path to the ONNX detection weights.
    #[arg(long, env = "PLANSCAN_MODEL", default_value = "model/best.onnx")]
    model: PathBuf,

    /// Detection confidence threshold (0–1).
    #[arg(long, env = "PLANSCAN_CONFIDENCE", default_value_t = 0.10)]
    confidence: f32,

    /// Overlap-suppression IoU threshold (0–1).
    #[arg(long, env = "PLANSCAN_IOU", default_value_t = 0.20)]
    iou: f32,

    /// Rasterization upscale factor.
    #[arg(long, env = "PLANSCAN_UPSCALE", default_value_t = 2.0)]
    upscale: f32,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load CONVERT_API_KEY and friends before config construction reads env.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let filter = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    let config = ServiceConfig::builder()
        .data_root(&cli.data_root)
        .model_path(&cli.model)
        .bind_addr(cli.bind)
        .confidence(cli.confidence)
        .iou(cli.iou)
        .upscale(cli.upscale)
        .build()
        .context("Invalid configuration")?;

    tracing::info!(
        upload_dir = %config.upload_dir.display(),
        output_dir = %config.output_dir.display(),
        model = %config.model_path.display(),
        "starting planscan"
    );
    if config.convert_api_key.is_none() {
        tracing::warn!("CONVERT_API_KEY not set — DWF uploads will fail at conversion");
    }

    let state = AppState::new(config).context("Failed to open storage areas")?;
    planscan::server::serve(state)
        .await
        .context("Server exited with error")?;
    Ok(())
}
