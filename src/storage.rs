//! Storage areas: the upload directory and the derived-artifact tree.
//!
//! Exactly one source file is tracked at a time. Rather than a process-wide
//! mutable "last uploaded file" variable, the current upload is whatever
//! `uploads/file.<ext>` exists on disk — each request recovers it through
//! [`Storage::latest_upload`]. A second upload replaces the first by
//! clearing the directory before the write.
//!
//! Layout under the output directory:
//!
//! ```text
//! outputs/
//!  ├─ pdf_pages/          rasterized page_<n>.jpg (cleared per preprocess)
//!  └─ run/
//!      └─ run_<ts>/       one detection run: annotated pages + labels/
//! ```

use crate::error::PlanscanError;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A tracked upload, stored as `uploads/file.<ext>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    /// Filename as supplied by the client, for reporting only.
    pub original_name: String,
    /// Where the bytes landed on disk.
    pub stored_path: PathBuf,
    /// Lowercased extension without the dot.
    pub extension: String,
}

/// Handle to the two storage areas. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Storage {
    upload_dir: PathBuf,
    output_dir: PathBuf,
}

impl Storage {
    /// Open (creating if needed) the storage areas.
    pub fn open(
        upload_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Result<Self, PlanscanError> {
        let upload_dir = upload_dir.into();
        let output_dir = output_dir.into();
        std::fs::create_dir_all(&upload_dir).map_err(|e| PlanscanError::io(&upload_dir, e))?;
        std::fs::create_dir_all(&output_dir).map_err(|e| PlanscanError::io(&output_dir, e))?;
        Ok(Self {
            upload_dir,
            output_dir,
        })
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Directory holding rasterized page images.
    pub fn pages_dir(&self) -> PathBuf {
        self.output_dir.join("pdf_pages")
    }

    /// Directory holding all detection run folders.
    pub fn runs_dir(&self) -> PathBuf {
        self.output_dir.join("run")
    }

    /// Store an upload, replacing any previously tracked file.
    ///
    /// The file is renamed to `file.<ext>` so the rest of the pipeline never
    /// has to sanitise client-supplied names.
    pub async fn store_upload(
        &self,
        original_name: &str,
        bytes: &[u8],
    ) -> Result<UploadedFile, PlanscanError> {
        let extension = Path::new(original_name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        // One tracked file at a time: drop the previous upload first.
        clear_dir_contents(&self.upload_dir).await?;

        let stored_path = self.upload_dir.join(format!("file.{extension}"));
        tokio::fs::write(&stored_path, bytes)
            .await
            .map_err(|e| PlanscanError::io(&stored_path, e))?;

        info!(
            name = original_name,
            bytes = bytes.len(),
            path = %stored_path.display(),
            "stored upload"
        );

        Ok(UploadedFile {
            original_name: original_name.to_string(),
            stored_path,
            extension,
        })
    }

    /// Recover the currently tracked upload from disk, if any.
    pub async fn latest_upload(&self) -> Result<Option<UploadedFile>, PlanscanError> {
        let mut entries = tokio::fs::read_dir(&self.upload_dir)
            .await
            .map_err(|e| PlanscanError::io(&self.upload_dir, e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PlanscanError::io(&self.upload_dir, e))?
        {
            let path = entry.path();
            let is_tracked = path
                .file_stem()
                .and_then(|s| s.to_str())
                .is_some_and(|s| s == "file");
            if path.is_file() && is_tracked {
                let extension = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("")
                    .to_lowercase();
                return Ok(Some(UploadedFile {
                    original_name: format!("file.{extension}"),
                    stored_path: path,
                    extension,
                }));
            }
        }
        Ok(None)
    }

    /// Wipe the rasterized-pages directory only, ready for reprocessing.
    pub async fn clear_derived(&self) -> Result<(), PlanscanError> {
        let pages = self.pages_dir();
        clear_dir_contents(&pages).await?;
        debug!(dir = %pages.display(), "cleared derived pages");
        Ok(())
    }

    /// Wipe both storage areas entirely.
    pub async fn clear_all(&self) -> Result<(), PlanscanError> {
        clear_dir_contents(&self.upload_dir).await?;
        clear_dir_contents(&self.output_dir).await?;
        info!("cleared uploads and outputs");
        Ok(())
    }
}

/// Remove everything inside `dir`, tolerating a missing directory.
async fn clear_dir_contents(dir: &Path) -> Result<(), PlanscanError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(PlanscanError::io(dir, e)),
    };

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| PlanscanError::io(dir, e))?
    {
        let path = entry.path();
        let result = if path.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        result.map_err(|e| PlanscanError::io(&path, e))?;
    }
    Ok(())
}
