//! External DWF→PDF conversion via the ConvertAPI cloud service.
//!
//! This stage is a best-effort passthrough to a paid third-party black box:
//! no retry, no timeout tuning, fail loudly. Every failure mode — network,
//! quota exhaustion, malformed input — collapses into a single
//! [`PlanscanError::Conversion`] wrapping the underlying cause, because the
//! caller can do nothing finer-grained with any of them.
//!
//! The API secret comes exclusively from configuration (in practice the
//! `CONVERT_API_KEY` environment variable); it is never compiled in.

use crate::config::ServiceConfig;
use crate::error::PlanscanError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Deserialized subset of a ConvertAPI conversion response.
///
/// With `StoreFile=true` the service stores the result and returns a
/// download URL per file instead of inlining base64 data.
#[derive(Debug, Deserialize)]
struct ConvertResponse {
    #[serde(rename = "Files", default)]
    files: Vec<ConvertedFile>,
}

#[derive(Debug, Deserialize)]
struct ConvertedFile {
    #[serde(rename = "Url")]
    url: String,
}

/// Convert a DWF file to PDF, saving the result alongside the source.
///
/// Returns the path of the produced PDF (`<source stem>.pdf` in the same
/// directory). Synchronous from the pipeline's point of view: the call
/// blocks the request until the remote service answers.
pub async fn dwf_to_pdf(src: &Path, config: &ServiceConfig) -> Result<PathBuf, PlanscanError> {
    let secret = config
        .convert_api_key
        .as_deref()
        .ok_or(PlanscanError::MissingApiKey)?;

    info!(src = %src.display(), "converting DWF via ConvertAPI");

    let bytes = tokio::fs::read(src)
        .await
        .map_err(|e| PlanscanError::io(src, e))?;
    let file_name = src
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file.dwf")
        .to_string();

    let client = reqwest::Client::new();
    let form = reqwest::multipart::Form::new().part(
        "File",
        reqwest::multipart::Part::bytes(bytes).file_name(file_name),
    );

    let url = format!(
        "{}/convert/dwf/to/pdf?Secret={}&StoreFile=true",
        config.convert_api_base, secret
    );

    let response = client
        .post(&url)
        .multipart(form)
        .send()
        .await
        .map_err(|e| PlanscanError::Conversion {
            detail: format!("request failed: {e}"),
        })?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(PlanscanError::Conversion {
            detail: format!("HTTP {status}: {body}"),
        });
    }

    let parsed: ConvertResponse =
        response
            .json()
            .await
            .map_err(|e| PlanscanError::Conversion {
                detail: format!("unreadable response: {e}"),
            })?;

    let file = parsed
        .files
        .first()
        .ok_or_else(|| PlanscanError::Conversion {
            detail: "service returned no files".to_string(),
        })?;

    // Second round-trip: fetch the stored result.
    let pdf_bytes = client
        .get(&file.url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| PlanscanError::Conversion {
            detail: format!("download of converted PDF failed: {e}"),
        })?
        .bytes()
        .await
        .map_err(|e| PlanscanError::Conversion {
            detail: format!("download of converted PDF failed: {e}"),
        })?;

    let pdf_path = src.with_extension("pdf");
    tokio::fs::write(&pdf_path, &pdf_bytes)
        .await
        .map_err(|e| PlanscanError::io(&pdf_path, e))?;

    info!(pdf = %pdf_path.display(), bytes = pdf_bytes.len(), "DWF converted");
    Ok(pdf_path)
}
