//! Durable progress snapshots for resuming interrupted runs.

use crate::config::BatchConfig;
use crate::errors::{AppError, ResultExt};
use crate::integrity::ChecksumEnvelope;
use crate::progress::BatchProgress;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub progress: BatchProgress,
    /// Tunables the run was started with.
    pub config: BatchConfig,
    pub last_processed_id: Option<String>,
    /// Records already dispatched in this run; never dispatched again on resume.
    pub processed_ids: BTreeSet<String>,
    pub saved_at: DateTime<Utc>,
    /// Set by the final save of a run that went through every record.
    pub completed: bool,
}

impl Checkpoint {
    pub fn new(progress: BatchProgress, config: BatchConfig) -> Self {
        Self {
            progress,
            config,
            last_processed_id: None,
            processed_ids: BTreeSet::new(),
            saved_at: Utc::now(),
            completed: false,
        }
    }
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Latest saved checkpoint, or `None` when there is nothing usable.
    async fn load(&self) -> Result<Option<Checkpoint>, AppError>;

    /// Replaces the stored checkpoint.
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), AppError>;
}

/// JSON file wrapped in a checksum envelope, replaced atomically on save.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "checkpoint".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self) -> Result<Option<Checkpoint>, AppError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                tracing::warn!(
                    "Checkpoint {} unreadable, starting fresh: {}",
                    self.path.display(),
                    e
                );
                return Ok(None);
            }
        };

        match ChecksumEnvelope::open::<Checkpoint>(&raw) {
            Some(checkpoint) => {
                tracing::info!(
                    "Loaded checkpoint from {} ({} processed, saved {})",
                    self.path.display(),
                    checkpoint.progress.processed,
                    checkpoint.saved_at
                );
                Ok(Some(checkpoint))
            }
            None => {
                tracing::warn!(
                    "Checkpoint {} failed integrity check, starting fresh",
                    self.path.display()
                );
                Ok(None)
            }
        }
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), AppError> {
        let json = ChecksumEnvelope::seal(checkpoint)?.to_json()?;
        let temp = self.temp_path();

        tokio::fs::write(&temp, json)
            .await
            .map_err(AppError::from)
            .with_context(|| format!("writing {}", temp.display()))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(AppError::from)
            .with_context(|| format!("replacing {}", self.path.display()))?;

        tracing::debug!(
            "Checkpoint saved to {} ({} processed)",
            self.path.display(),
            checkpoint.progress.processed
        );
        Ok(())
    }
}

/// Keeps the checkpoint in memory. For embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    slot: std::sync::Mutex<Option<Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_checkpoint(checkpoint: Checkpoint) -> Self {
        Self {
            slot: std::sync::Mutex::new(Some(checkpoint)),
        }
    }

    pub fn current(&self) -> Option<Checkpoint> {
        self.slot.lock().ok().and_then(|slot| slot.clone())
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self) -> Result<Option<Checkpoint>, AppError> {
        Ok(self.current())
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), AppError> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| AppError::Checkpoint("checkpoint slot poisoned".to_string()))?;
        *slot = Some(checkpoint.clone());
        Ok(())
    }
}
