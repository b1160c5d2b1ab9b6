//! Environment manager backed by the `conda` executable.
//!
//! The executable is taken from `CONDA_EXE` (set by conda activation scripts) and
//! falls back to `conda` on the `PATH`.

use std::io::Write;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

use super::EnvironmentManager;
use crate::bus::Signal;
use crate::error::{Result, SyncError};
use crate::models::{EnvironmentInfo, PackageChange};

#[derive(Deserialize)]
struct EnvList {
    envs: Vec<String>,
}

pub struct CondaCli {
    executable: String,
    package_changed: Signal<PackageChange>,
}

impl Default for CondaCli {
    fn default() -> Self {
        Self::new()
    }
}

impl CondaCli {
    pub fn new() -> Self {
        let executable = std::env::var("CONDA_EXE").unwrap_or_else(|_| "conda".to_string());
        Self::with_executable(executable)
    }

    pub fn with_executable(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            package_changed: Signal::new(),
        }
    }

    async fn run(&self, environment: &str, args: &[&str]) -> Result<String> {
        tracing::debug!("{} {}", self.executable, args.join(" "));
        let output = tokio::process::Command::new(&self.executable)
            .args(args)
            .output()
            .await
            .map_err(|e| {
                SyncError::environment(environment, format!("failed to execute conda: {e}"))
            })?;

        if !output.status.success() {
            return Err(SyncError::environment(
                environment,
                format!(
                    "conda {} failed: {}",
                    args.first().copied().unwrap_or_default(),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Write `spec` to a temporary file carrying the extension of `filename`.
    fn spec_file(environment: &str, spec: &str, filename: &str) -> Result<tempfile::NamedTempFile> {
        let suffix = Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{ext}"))
            .unwrap_or_else(|| ".yml".to_string());

        let mut file = tempfile::Builder::new()
            .prefix("project-sync-")
            .suffix(&suffix)
            .tempfile()
            .map_err(|e| SyncError::environment(environment, e))?;
        file.write_all(spec.as_bytes())
            .map_err(|e| SyncError::environment(environment, e))?;
        file.flush()
            .map_err(|e| SyncError::environment(environment, e))?;
        Ok(file)
    }

    fn changed(&self, environment: &str) {
        self.package_changed.emit(&PackageChange {
            environment: environment.to_string(),
        });
    }
}

/// Name of an environment from its prefix; the root prefix is `base`.
fn environment_name(prefix: &str) -> String {
    let path = Path::new(prefix);
    let in_envs_dir = path
        .parent()
        .and_then(|parent| parent.file_name())
        .is_some_and(|dir| dir == "envs");
    if !in_envs_dir {
        return "base".to_string();
    }
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| prefix.to_string())
}

#[async_trait]
impl EnvironmentManager for CondaCli {
    async fn environments(&self) -> Result<Vec<EnvironmentInfo>> {
        let stdout = self.run("", &["env", "list", "--json"]).await?;
        let list: EnvList =
            serde_json::from_str(&stdout).map_err(|e| SyncError::environment("", e))?;
        Ok(list
            .envs
            .into_iter()
            .map(|dir| EnvironmentInfo {
                name: environment_name(&dir),
                dir: Some(dir),
            })
            .collect())
    }

    async fn create(&self, name: &str, packages: &[String]) -> Result<()> {
        let mut args = vec!["create", "-y", "-q", "-n", name];
        args.extend(packages.iter().map(String::as_str));
        self.run(name, &args).await?;
        self.changed(name);
        Ok(())
    }

    async fn import(&self, name: &str, spec: &str, filename: &str) -> Result<()> {
        let file = Self::spec_file(name, spec, filename)?;
        let path = file.path().to_string_lossy().into_owned();
        self.run(name, &["env", "create", "-q", "-n", name, "-f", &path])
            .await?;
        self.changed(name);
        Ok(())
    }

    async fn update(&self, name: &str, spec: &str, filename: &str) -> Result<()> {
        let file = Self::spec_file(name, spec, filename)?;
        let path = file.path().to_string_lossy().into_owned();
        self.run(name, &["env", "update", "-q", "-n", name, "-f", &path])
            .await?;
        self.changed(name);
        Ok(())
    }

    async fn remove_packages(&self, packages: &[String], environment: &str) -> Result<()> {
        if packages.is_empty() {
            return Ok(());
        }
        let mut args = vec!["remove", "-y", "-q", "-n", environment];
        args.extend(packages.iter().map(String::as_str));
        self.run(environment, &args).await?;
        self.changed(environment);
        Ok(())
    }

    async fn export(&self, environment: &str, full: bool) -> Result<String> {
        let mut args = vec!["env", "export", "-n", environment];
        if !full {
            args.push("--no-builds");
        }
        self.run(environment, &args).await
    }

    async fn develop_install(&self, environment: &str, path: &str) -> Result<()> {
        self.run(
            environment,
            &[
                "run", "-n", environment, "python", "-m", "pip", "install", "--no-deps", "-e", path,
            ],
        )
        .await?;
        self.changed(environment);
        Ok(())
    }

    async fn remove_environment(&self, name: &str) -> Result<()> {
        self.run(name, &["env", "remove", "-y", "-n", name]).await?;
        Ok(())
    }

    fn package_changed(&self) -> &Signal<PackageChange> {
        &self.package_changed
    }
}
