//! File-based checkpoint store
//!
//! One JSON document per checkpoint, grouped by thread:
//!
//! ```text
//! <directory>/
//! ├── conversation-42/
//! │   ├── classify-0.json
//! │   └── respond-1.json
//! └── batch-7/
//!     └── ingest-0.json
//! ```
//!
//! Writes go to a hidden temp file in the same directory and are renamed into
//! place, so a crash never leaves a half-written document behind. Listing
//! enumerates the thread directory and parses every document it finds.

use crate::{
    checkpoint::{newest_first, Checkpoint, CheckpointMetadata},
    error::{CheckpointError, Result},
    traits::CheckpointStore,
};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

const EXTENSION: &str = "json";

/// Checkpoint store backed by a directory tree of JSON documents
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    root: PathBuf,
}

impl FileCheckpointStore {
    /// Open a store rooted at `directory`, creating it if needed
    pub async fn new(directory: impl Into<PathBuf>) -> Result<Self> {
        let root = directory.into();
        tokio::fs::create_dir_all(&root).await?;
        tracing::debug!(root = %root.display(), "Opened file checkpoint store");
        Ok(Self { root })
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn thread_dir(&self, thread_id: &str) -> Result<PathBuf> {
        validate_component("thread id", thread_id)?;
        Ok(self.root.join(thread_id))
    }

    fn document_path(&self, thread_id: &str, checkpoint_id: &str) -> Result<PathBuf> {
        validate_component("checkpoint id", checkpoint_id)?;
        Ok(self
            .thread_dir(thread_id)?
            .join(format!("{checkpoint_id}.{EXTENSION}")))
    }
}

/// Identifiers become path components, so they must not escape the root.
fn validate_component(kind: &str, value: &str) -> Result<()> {
    if value.is_empty()
        || value == "."
        || value == ".."
        || value.starts_with('.')
        || value.contains(['/', '\\', '\0'])
    {
        return Err(CheckpointError::Invalid(format!(
            "{kind} '{value}' cannot be used as a file name"
        )));
    }
    Ok(())
}

async fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("checkpoint");
    let temp_path = path.with_file_name(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

    let mut file = tokio::fs::File::create(&temp_path).await?;
    if let Err(err) = async {
        file.write_all(data).await?;
        file.sync_all().await
    }
    .await
    {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(err);
    }
    drop(file);

    tokio::fs::rename(&temp_path, path).await
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let path = self.document_path(&checkpoint.thread_id, &checkpoint.id)?;
        let document = serde_json::to_vec_pretty(checkpoint)?;

        tokio::fs::create_dir_all(self.thread_dir(&checkpoint.thread_id)?).await?;
        atomic_write(&path, &document).await?;

        tracing::debug!(
            thread_id = %checkpoint.thread_id,
            checkpoint_id = %checkpoint.id,
            path = %path.display(),
            "Saved checkpoint document"
        );
        Ok(())
    }

    async fn load(&self, thread_id: &str, checkpoint_id: &str) -> Result<Checkpoint> {
        let path = self.document_path(thread_id, checkpoint_id)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(CheckpointError::not_found(thread_id, checkpoint_id));
            }
            Err(err) => return Err(err.into()),
        };

        tracing::debug!(thread_id, checkpoint_id, "Loaded checkpoint document");
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn list(&self, thread_id: &str) -> Result<Vec<CheckpointMetadata>> {
        let dir = self.thread_dir(thread_id)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut results = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_document = path.extension().and_then(|ext| ext.to_str()) == Some(EXTENSION)
                && !entry.file_name().to_string_lossy().starts_with('.');
            if !is_document {
                continue;
            }

            let bytes = tokio::fs::read(&path).await?;
            let checkpoint: Checkpoint = serde_json::from_slice(&bytes)?;
            results.push(checkpoint.to_metadata());
        }

        results.sort_by(newest_first);
        Ok(results)
    }

    async fn delete(&self, thread_id: &str, checkpoint_id: &str) -> Result<()> {
        let path = self.document_path(thread_id, checkpoint_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(thread_id, checkpoint_id, "Deleted checkpoint document");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(CheckpointError::not_found(thread_id, checkpoint_id))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "file"
    }
}
