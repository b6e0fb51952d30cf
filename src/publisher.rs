use std::collections::HashSet;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("unable to list {path}: {source}")]
    List {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("unable to move {from} to {to}: {source}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
    #[error("unable to remove stale {path}: {source}")]
    Remove {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Default)]
pub struct PublishReport {
    pub published: Vec<String>,
    pub pruned: Vec<String>,
    pub errors: Vec<PublishError>,
}

/// Moves staged snapshots into the output dir and prunes files no configured
/// source owns. A failure on one file never stops the rest of the pass.
#[derive(Debug, Clone)]
pub struct Publisher {
    staging_dir: PathBuf,
    output_dir: PathBuf,
}

impl Publisher {
    pub fn new(staging_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            output_dir: output_dir.into(),
        }
    }

    pub async fn publish(&self, expected: &HashSet<&str>) -> PublishReport {
        let mut report = PublishReport::default();

        match list_files(&self.staging_dir).await {
            Ok(staged) => {
                for (name, from) in staged {
                    let to = self.output_dir.join(&name);
                    // rename swaps the whole file, readers never see a mix
                    match tokio::fs::rename(&from, &to).await {
                        Ok(()) => report.published.push(name),
                        Err(source) => report.errors.push(PublishError::Move { from, to, source }),
                    }
                }
            }
            Err(e) => report.errors.push(e),
        }

        match list_files(&self.output_dir).await {
            Ok(present) => {
                for (name, path) in present {
                    if expected.contains(name.as_str()) {
                        continue;
                    }
                    match tokio::fs::remove_file(&path).await {
                        Ok(()) => report.pruned.push(name),
                        Err(source) => report.errors.push(PublishError::Remove { path, source }),
                    }
                }
            }
            Err(e) => report.errors.push(e),
        }

        report
    }
}

/// Regular files directly under `dir`, as (name, path) pairs.
async fn list_files(dir: &Path) -> Result<Vec<(String, PathBuf)>, PublishError> {
    let list_err = |source| PublishError::List {
        path: dir.to_owned(),
        source,
    };

    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await.map_err(list_err)?;
    while let Some(entry) = entries.next_entry().await.map_err(list_err)? {
        if !entry.file_type().await.map_err(list_err)?.is_file() {
            continue;
        }
        files.push((entry.file_name().to_string_lossy().into_owned(), entry.path()));
    }
    Ok(files)
}
