// src/sources/mod.rs — Input source collaborator
//
// The engine discovers work through this interface; the shipped
// implementation watches a directory for conversation exports, but the
// scheduler only ever sees opaque input identifiers.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::infra::errors::ArfError;

pub type InputId = String;

#[async_trait]
pub trait InputSource: Send + Sync {
    /// Identifiers of every input currently visible. The scheduler
    /// filters out already-processed ids itself, so returning the same
    /// id on consecutive cycles is fine.
    async fn list_new(&self) -> Result<Vec<InputId>, ArfError>;

    async fn read(&self, id: &str) -> Result<String, ArfError>;
}

/// Directory-watching source: every `*.json` file is one input,
/// identified by its file name.
pub struct FsInputSource {
    dir: PathBuf,
}

impl FsInputSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl InputSource for FsInputSource {
    async fn list_new(&self) -> Result<Vec<InputId>, ArfError> {
        let mut ids = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(e) => e,
            // A missing input directory just means no work yet.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(".json") {
                ids.push(name);
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn read(&self, id: &str) -> Result<String, ArfError> {
        Ok(tokio::fs::read_to_string(self.dir.join(id)).await?)
    }
}
