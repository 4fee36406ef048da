//! JSON file backends
//!
//! The persona lives in a single JSON document; checkpoints are one file each
//! under a directory, named by write time, feedback count and id so lexical
//! order matches recency and no write replaces an earlier one.

use crate::error::{LearnerError, Result};
use crate::learning::checkpoint::{Checkpoint, CheckpointStore};
use crate::storage::PersonaStore;
use crate::types::PersonaVector;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

const CHECKPOINT_PREFIX: &str = "checkpoint-";
const CHECKPOINT_SUFFIX: &str = ".json";

/// Write through a sibling temp file so readers never see a partial document
async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(|e| {
            LearnerError::Persistence(format!(
                "Failed to create directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, contents).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

/// Persona stored as a JSON object of parameter name to value
#[derive(Debug, Clone)]
pub struct JsonFilePersonaStore {
    path: PathBuf,
}

impl JsonFilePersonaStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PersonaStore for JsonFilePersonaStore {
    async fn get_persona(&self) -> Result<PersonaVector> {
        match fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No persona at {}, starting neutral", self.path.display());
                Ok(PersonaVector::neutral())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update_persona(&self, persona: &PersonaVector) -> Result<()> {
        let json = serde_json::to_vec_pretty(persona)?;
        write_atomic(&self.path, &json).await
    }
}

/// One JSON file per checkpoint in a directory
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_name(checkpoint: &Checkpoint) -> String {
        let id: String = checkpoint.id.chars().take(8).collect();
        format!(
            "{}{}-{:010}-{}{}",
            CHECKPOINT_PREFIX,
            checkpoint.timestamp.format("%Y%m%dT%H%M%S%9fZ"),
            checkpoint.feedback_count,
            id,
            CHECKPOINT_SUFFIX
        )
    }

    fn path_for(&self, checkpoint: &Checkpoint) -> PathBuf {
        self.dir.join(Self::file_name(checkpoint))
    }

    async fn load_all(&self) -> Result<Vec<Checkpoint>> {
        Ok(self
            .load_entries()
            .await?
            .into_iter()
            .map(|(_, checkpoint)| checkpoint)
            .collect())
    }

    /// Load every checkpoint file with its path, oldest first; unreadable
    /// files are skipped with a warning
    async fn load_entries(&self) -> Result<Vec<(PathBuf, Checkpoint)>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut loaded = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with(CHECKPOINT_PREFIX) || !name.ends_with(CHECKPOINT_SUFFIX) {
                continue;
            }

            let bytes = fs::read(entry.path()).await?;
            match serde_json::from_slice::<Checkpoint>(&bytes) {
                Ok(checkpoint) => loaded.push((entry.path(), checkpoint)),
                Err(e) => warn!("Skipping unreadable checkpoint {}: {}", name, e),
            }
        }

        loaded.sort_by(|(_, a), (_, b)| a.recency_cmp(b));
        Ok(loaded)
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn put(&self, checkpoint: &Checkpoint) -> Result<()> {
        let json = serde_json::to_vec_pretty(checkpoint)?;
        let path = self.path_for(checkpoint);
        write_atomic(&path, &json).await?;
        debug!("Wrote checkpoint {}", path.display());
        Ok(())
    }

    async fn latest(&self) -> Result<Option<Checkpoint>> {
        Ok(self.load_all().await?.pop())
    }

    async fn list(&self) -> Result<Vec<Checkpoint>> {
        self.load_all().await
    }

    async fn prune(&self, keep: usize) -> Result<usize> {
        let all = self.load_entries().await?;
        let excess = all.len().saturating_sub(keep);
        for (path, _) in &all[..excess] {
            fs::remove_file(path).await?;
        }
        Ok(excess)
    }
}
