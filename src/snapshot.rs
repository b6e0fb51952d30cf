use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

use crate::model::DiscoveryRecord;

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("unable to serialize snapshot {file}: {source}")]
    Serialize {
        file: String,
        source: serde_json::Error,
    },
    #[error("unable to stage {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Writes per-source snapshots into the staging dir ahead of publication.
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    staging_dir: PathBuf,
}

impl SnapshotWriter {
    pub fn new(staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
        }
    }

    /// Stages `records` as `<staging>/<file>`, replacing any earlier snapshot
    /// of the same name. The content is written under a unique scratch name
    /// first, so writers racing on one name never interleave.
    pub async fn write(&self, file: &str, records: &[DiscoveryRecord]) -> Result<PathBuf, WriteError> {
        static SCRATCH_COUNTER: AtomicU64 = AtomicU64::new(0);

        let body = serde_json::to_vec(records).map_err(|source| WriteError::Serialize {
            file: file.to_owned(),
            source,
        })?;

        let scratch = self.staging_dir.join(format!(
            ".{}.{}.tmp",
            file,
            SCRATCH_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let target = self.staging_dir.join(file);

        if let Err(source) = tokio::fs::write(&scratch, &body).await {
            discard(&scratch).await;
            return Err(WriteError::Io {
                path: scratch,
                source,
            });
        }

        if let Err(source) = tokio::fs::rename(&scratch, &target).await {
            discard(&scratch).await;
            return Err(WriteError::Io {
                path: target,
                source,
            });
        }

        Ok(target)
    }

    /// Drops anything left in the staging dir, e.g. a snapshot that failed to
    /// publish last cycle.
    pub async fn reset(&self) -> Result<usize, WriteError> {
        let io_err = |source| WriteError::Io {
            path: self.staging_dir.clone(),
            source,
        };

        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.staging_dir).await.map_err(io_err)?;
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            if !entry.file_type().await.map_err(io_err)?.is_file() {
                continue;
            }
            let path = entry.path();
            tokio::fs::remove_file(&path)
                .await
                .map_err(|source| WriteError::Io { path, source })?;
            removed += 1;
        }
        Ok(removed)
    }
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("unable to remove scratch file {}: {}", path.display(), e);
        }
    }
}
