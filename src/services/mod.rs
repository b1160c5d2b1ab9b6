//! Capabilities consumed from the host and the outside world.
//!
//! The engine only talks to these traits. Concrete adapters live next to them:
//! - [`HttpProjectService`]: project service over HTTP
//! - [`CondaCli`]: environment manager backed by the `conda` executable
//! - [`GitCli`]: version control backed by the `git` executable
//! - [`LocalFiles`]: file contents rooted at the served directory
//!
//! The state store is implemented by [`crate::db::StateDatabase`].

mod client;
mod conda;
mod files;
mod git;

pub use client::*;
pub use conda::*;
pub use files::*;
pub use git::*;

use async_trait::async_trait;
use serde_json::Value;

use crate::bus::Signal;
use crate::error::Result;
use crate::models::{EnvironmentInfo, HeadChange, PackageChange, ProjectModel};

/// Server side project operations. An empty `path` addresses "no project".
#[async_trait]
pub trait ProjectService: Send + Sync {
    /// Generate a project in `path` from the project template.
    async fn create(&self, path: &str, params: &Value) -> Result<ProjectModel>;

    /// Fetch the project in `path`; `None` when `path` is empty.
    async fn open(&self, path: &str) -> Result<Option<ProjectModel>>;

    async fn delete(&self, path: &str) -> Result<()>;
}

/// Host key-value state.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn fetch(&self, key: &str) -> Result<Option<Value>>;

    async fn save(&self, key: &str, value: &Value) -> Result<()>;
}

/// Manager of isolated, named package environments.
#[async_trait]
pub trait EnvironmentManager: Send + Sync {
    async fn environments(&self) -> Result<Vec<EnvironmentInfo>>;

    /// Create `name` with the given packages.
    async fn create(&self, name: &str, packages: &[String]) -> Result<()>;

    /// Create `name` from a specification text.
    async fn import(&self, name: &str, spec: &str, filename: &str) -> Result<()>;

    /// Bring `name` in line with a specification text.
    async fn update(&self, name: &str, spec: &str, filename: &str) -> Result<()>;

    async fn remove_packages(&self, packages: &[String], environment: &str) -> Result<()>;

    /// Export the specification of `environment`. `full` keeps build strings.
    async fn export(&self, environment: &str, full: bool) -> Result<String>;

    /// Install the folder `path` in editable mode into `environment`.
    async fn develop_install(&self, environment: &str, path: &str) -> Result<()>;

    async fn remove_environment(&self, name: &str) -> Result<()>;

    /// Emitted whenever the packages of an environment change.
    fn package_changed(&self) -> &Signal<PackageChange>;
}

/// Version control of the served directory.
#[async_trait]
pub trait VersionControl: Send + Sync {
    async fn current_branch(&self) -> Result<Option<String>>;

    /// Repository root relative to the served directory.
    async fn relative_file_path(&self) -> Result<String>;

    async fn init(&self, path: &str) -> Result<()>;

    async fn clone_repository(&self, path: &str, url: &str) -> Result<()>;

    /// Stage every untracked and modified file of `path` and commit.
    async fn commit_all(&self, path: &str, message: &str) -> Result<()>;

    /// Follow the repository containing `path`.
    fn track(&self, _path: &str) {}

    fn head_changed(&self) -> &Signal<HeadChange>;
}

/// Text files of the served directory.
#[async_trait]
pub trait FileContents: Send + Sync {
    /// `None` when the file does not exist.
    async fn get(&self, path: &str) -> Result<Option<String>>;

    async fn save(&self, path: &str, content: &str) -> Result<()>;
}

/// Join `/`-separated path segments, skipping empty ones.
pub fn join_path(base: &str, name: &str) -> String {
    let base = base.trim_end_matches('/');
    let name = name.trim_start_matches('/');
    match (base.is_empty(), name.is_empty()) {
        (true, _) => name.to_string(),
        (_, true) => base.to_string(),
        _ => format!("{}/{}", base, name),
    }
}
