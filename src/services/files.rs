use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::FileContents;
use crate::error::{Result, SyncError};

/// Files of the served directory, addressed by `/`-separated relative paths.
#[derive(Debug, Clone)]
pub struct LocalFiles {
    root: PathBuf,
}

impl LocalFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, path: &str) -> PathBuf {
        path.split('/')
            .filter(|segment| !segment.is_empty() && *segment != ".")
            .fold(self.root.clone(), |acc, segment| acc.join(segment))
    }
}

#[async_trait]
impl FileContents for LocalFiles {
    async fn get(&self, path: &str) -> Result<Option<String>> {
        match tokio::fs::read_to_string(self.resolve(path)).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SyncError::files(path, e)),
        }
    }

    async fn save(&self, path: &str, content: &str) -> Result<()> {
        let target = self.resolve(path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::files(path, e))?;
        }
        tokio::fs::write(&target, content)
            .await
            .map_err(|e| SyncError::files(path, e))?;
        tracing::debug!("Saved {}", target.display());
        Ok(())
    }
}
