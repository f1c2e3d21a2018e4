// src/core/checkpoint.rs — Durable checkpoint store
//
// One versioned JSON snapshot per engine instance. Saves go through a
// temp file in the same directory, fsync, then rename, so a crash
// mid-write leaves the previous snapshot intact. Loads never halt
// startup: a missing or corrupt checkpoint degrades to fresh defaults.

use std::io::Write;
use std::path::PathBuf;

use super::state::EngineState;
use crate::infra::errors::ArfError;

pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Load the latest checkpoint, or fresh defaults if none exists or
    /// the file cannot be parsed. Corruption is logged, not fatal.
    pub fn load(&self) -> EngineState {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "No checkpoint found; starting fresh");
                return EngineState::default();
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    "Checkpoint unreadable ({}); starting fresh",
                    e
                );
                return EngineState::default();
            }
        };

        match serde_json::from_str::<EngineState>(&content) {
            Ok(state) => {
                tracing::info!(
                    checkpoint = %state.last_checkpoint,
                    framework_version = state.framework_version,
                    pending = state.pending_validations.len(),
                    "Resuming from checkpoint"
                );
                state
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    "Checkpoint corrupt ({}); starting fresh",
                    e
                );
                EngineState::default()
            }
        }
    }

    /// Atomically persist `state` (temp file + fsync + rename).
    pub fn save(&self, state: &EngineState) -> Result<(), ArfError> {
        let dir = self
            .path
            .parent()
            .ok_or_else(|| ArfError::Checkpoint("checkpoint path has no parent".into()))?;
        std::fs::create_dir_all(dir)?;

        let json = serde_json::to_string_pretty(state)?;
        let file_name = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ArfError::Checkpoint("checkpoint path has no file name".into()))?;
        let tmp = dir.join(format!(".{file_name}.tmp"));

        let mut f = std::fs::File::create(&tmp)?;
        f.write_all(json.as_bytes())?;
        f.flush()?;
        f.sync_all()?;
        std::fs::rename(&tmp, &self.path)?;

        tracing::debug!(path = %self.path.display(), "Checkpoint saved");
        Ok(())
    }
}
