//! Version control backed by the `git` executable.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::VersionControl;
use crate::bus::Signal;
use crate::error::{Result, SyncError};
use crate::models::HeadChange;

pub struct GitCli {
    root: PathBuf,
    /// Folder (relative to `root`) whose repository is tracked.
    tracked: RwLock<String>,
    last_head: RwLock<Option<String>>,
    head_changed: Signal<HeadChange>,
}

impl GitCli {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            tracked: RwLock::new(String::new()),
            last_head: RwLock::new(None),
            head_changed: Signal::new(),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .fold(self.root.clone(), |acc, segment| acc.join(segment))
    }

    async fn git(&self, dir: &Path, args: &[&str]) -> Result<String> {
        tracing::debug!("git -C {} {}", dir.display(), args.join(" "));
        let output = tokio::process::Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(args)
            .output()
            .await
            .map_err(|e| SyncError::VersionControl(format!("failed to execute git: {e}")))?;

        if !output.status.success() {
            return Err(SyncError::VersionControl(format!(
                "git {} failed: {}",
                args.first().copied().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn tracked_dir(&self) -> PathBuf {
        self.resolve(&self.tracked.read())
    }

    /// Check the tracked repository HEAD and emit a change when it moved.
    pub async fn poll_head(&self) -> Result<bool> {
        let dir = self.tracked_dir();
        let head = self.git(&dir, &["rev-parse", "HEAD"]).await.ok();
        let branch = self.current_branch().await.unwrap_or(None);
        let marker = head.map(|h| format!("{}@{}", branch.as_deref().unwrap_or("HEAD"), h));

        let previous = {
            let mut last = self.last_head.write();
            std::mem::replace(&mut *last, marker.clone())
        };

        // The first observation only records the baseline.
        if previous.is_none() || previous == marker || marker.is_none() {
            return Ok(false);
        }

        let repository_path = self.relative_file_path().await?;
        self.head_changed.emit(&HeadChange {
            repository_path,
            branch,
        });
        Ok(true)
    }

    /// Poll HEAD every `period` until the returned handle is aborted.
    pub fn spawn_head_poller(self: Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                if let Err(e) = self.poll_head().await {
                    tracing::debug!("HEAD poll failed: {}", e);
                }
            }
        })
    }
}

#[async_trait]
impl VersionControl for GitCli {
    async fn current_branch(&self) -> Result<Option<String>> {
        let branch = self
            .git(&self.tracked_dir(), &["rev-parse", "--abbrev-ref", "HEAD"])
            .await?;
        Ok((branch != "HEAD").then_some(branch))
    }

    async fn relative_file_path(&self) -> Result<String> {
        let top = self
            .git(&self.tracked_dir(), &["rev-parse", "--show-toplevel"])
            .await?;
        let root = tokio::fs::canonicalize(&self.root)
            .await
            .unwrap_or_else(|_| self.root.clone());
        let top = PathBuf::from(top);
        let relative = top.strip_prefix(&root).unwrap_or(&top);
        Ok(relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/"))
    }

    async fn init(&self, path: &str) -> Result<()> {
        self.git(&self.resolve(path), &["init"]).await?;
        Ok(())
    }

    async fn clone_repository(&self, path: &str, url: &str) -> Result<()> {
        self.git(&self.resolve(path), &["clone", url]).await?;
        Ok(())
    }

    async fn commit_all(&self, path: &str, message: &str) -> Result<()> {
        let dir = self.resolve(path);
        self.git(&dir, &["add", "-A"]).await?;
        self.git(&dir, &["commit", "-q", "-m", message]).await?;
        Ok(())
    }

    fn track(&self, path: &str) {
        *self.tracked.write() = path.to_string();
        *self.last_head.write() = None;
    }

    fn head_changed(&self) -> &Signal<HeadChange> {
        &self.head_changed
    }
}
