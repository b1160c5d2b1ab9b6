//! Environment reconciliation.
//!
//! Keeps the live package environment of a project and its declared
//! `environment.yml` in agreement:
//!
//! 1. The environment name is the project's recorded one, or derived from its name.
//! 2. A missing environment is imported from the declared file, or created from the
//!    default packages and exported back as the new declared file.
//! 3. An existing environment that drifted loses the packages the file does not
//!    declare, then gets updated from the file.
//!
//! A reconciliation that found nothing to do performs no environment mutation.
//! Reconciliations of the same project are serialized; different projects are
//! independent. Every mutation runs under an echo guard for the environment so the
//! package-change listener ignores it.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;

use crate::bus::EchoSuppressor;
use crate::differ;
use crate::error::{Result, SyncError};
use crate::models::{PackageDiffResult, ProjectModel, ENVIRONMENT_FILE};
use crate::services::{join_path, EnvironmentManager, FileContents};

/// Characters conda refuses in environment names.
static FORBIDDEN_ENV_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[/\s:#]").expect("valid environment name regex"));

/// Environment name of a project: its recorded environment, else its name with
/// forbidden characters replaced by `_`; always lower-cased.
pub fn derive_environment_name(project: &ProjectModel) -> String {
    match &project.environment {
        Some(environment) => environment.to_lowercase(),
        None => FORBIDDEN_ENV_CHARS
            .replace_all(&project.name, "_")
            .to_lowercase(),
    }
}

/// Mutation performed on an environment or its declared file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentAction {
    Created,
    Imported,
    Removed(BTreeSet<String>),
    Updated,
    DevelopInstalled,
    SpecWritten,
}

/// Outcome of [`Reconciler::reconcile`].
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    /// The project with its resolved environment name.
    pub project: ProjectModel,
    pub previous_environment: Option<String>,
    pub actions: Vec<EnvironmentAction>,
}

impl Reconciliation {
    pub fn environment_changed(&self) -> bool {
        self.project.environment != self.previous_environment
    }
}

#[derive(Debug, Clone)]
pub struct ReconcilerOptions {
    pub default_packages: Vec<String>,
    pub editable_install: bool,
    pub configuration_filename: String,
}

pub struct Reconciler {
    environments: Arc<dyn EnvironmentManager>,
    files: Arc<dyn FileContents>,
    options: ReconcilerOptions,
    echo: EchoSuppressor,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Reconciler {
    pub fn new(
        environments: Arc<dyn EnvironmentManager>,
        files: Arc<dyn FileContents>,
        options: ReconcilerOptions,
        echo: EchoSuppressor,
    ) -> Self {
        Self {
            environments,
            files,
            options,
            echo,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn environments(&self) -> &Arc<dyn EnvironmentManager> {
        &self.environments
    }

    pub fn echo(&self) -> &EchoSuppressor {
        &self.echo
    }

    fn lock_for(&self, path: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(path.to_string())
            .or_default()
            .clone()
    }

    /// Compare the project's declared file with the live `environment`.
    ///
    /// Missing or malformed sides are treated as absent.
    pub async fn compare(&self, project: &ProjectModel, environment: Option<&str>) -> PackageDiffResult {
        let live_text = match environment {
            Some(environment) => match self.environments.export(environment, true).await {
                Ok(text) => Some(text),
                Err(e) => {
                    tracing::debug!("Fail to export environment '{}': {}", environment, e);
                    None
                }
            },
            None => None,
        };

        let spec_path = join_path(&project.path, ENVIRONMENT_FILE);
        let declared_text = match self.files.get(&spec_path).await {
            Ok(text) => text,
            Err(e) => {
                tracing::debug!("No environment file {}: {}", spec_path, e);
                None
            }
        };

        let declared = differ::parse_lenient(declared_text.as_deref(), &spec_path);
        let live = differ::parse_lenient(live_text.as_deref(), environment.unwrap_or_default());
        differ::diff(declared.as_ref(), live.as_ref())
    }

    /// Ensure the project's environment exists and matches its declared file.
    pub async fn reconcile(&self, project: &ProjectModel) -> Result<Reconciliation> {
        let lock = self.lock_for(&project.path);
        let _serialized = lock.lock().await;

        let candidate = derive_environment_name(project);
        let found = self
            .environments
            .environments()
            .await?
            .into_iter()
            .find(|env| env.name.to_lowercase() == candidate);
        let name = found
            .as_ref()
            .map(|env| env.name.clone())
            .unwrap_or(candidate);

        let _echo = self.echo.suppress(&name);
        let diff = self
            .compare(project, found.as_ref().map(|_| name.as_str()))
            .await;

        let mut resolved = project.clone();
        resolved.environment = Some(name.clone());

        let mut actions = Vec::new();
        if found.is_some() {
            match &diff.declared_text {
                Some(declared) if !diff.is_identical => {
                    actions = self
                        .apply_declared_unlocked(&name, declared, &diff.extra_in_live)
                        .await?;
                }
                _ => tracing::debug!("Environment '{}' is up to date", name),
            }
        } else {
            tracing::info!("Creating environment '{}' for project '{}'", name, project.name);
            match &diff.declared_text {
                Some(declared) => {
                    self.environments
                        .import(&name, declared, ENVIRONMENT_FILE)
                        .await?;
                    actions.push(EnvironmentAction::Imported);
                }
                None => {
                    self.environments
                        .create(&name, &self.options.default_packages)
                        .await?;
                    actions.push(EnvironmentAction::Created);
                    if self.write_spec_unlocked(&resolved).await? {
                        actions.push(EnvironmentAction::SpecWritten);
                    }
                }
            }

            if resolved.editable_install(self.options.editable_install) {
                self.environments
                    .develop_install(&name, &resolved.path)
                    .await?;
                actions.push(EnvironmentAction::DevelopInstalled);
            }
        }

        Ok(Reconciliation {
            project: resolved,
            previous_environment: project.environment.clone(),
            actions,
        })
    }

    /// Remove `extra` packages from `environment`, then update it from `declared`.
    pub async fn apply_declared(
        &self,
        environment: &str,
        declared: &str,
        extra: &BTreeSet<String>,
    ) -> Result<Vec<EnvironmentAction>> {
        let _echo = self.echo.suppress(environment);
        self.apply_declared_unlocked(environment, declared, extra)
            .await
    }

    async fn apply_declared_unlocked(
        &self,
        environment: &str,
        declared: &str,
        extra: &BTreeSet<String>,
    ) -> Result<Vec<EnvironmentAction>> {
        tracing::info!("Updating environment '{}'", environment);
        let mut actions = Vec::new();

        if !extra.is_empty() {
            let packages: Vec<String> = extra.iter().cloned().collect();
            self.environments
                .remove_packages(&packages, environment)
                .await?;
            actions.push(EnvironmentAction::Removed(extra.clone()));
        }

        if let Err(e) = self
            .environments
            .update(environment, declared, ENVIRONMENT_FILE)
            .await
        {
            if extra.is_empty() {
                return Err(e);
            }
            return Err(SyncError::PartialUpdate {
                environment: environment.to_string(),
                removed: extra.clone(),
                source: Box::new(e),
            });
        }
        actions.push(EnvironmentAction::Updated);
        Ok(actions)
    }

    /// Re-apply the declared file when it no longer matches the live environment,
    /// e.g. after a branch checkout changed it.
    pub async fn resync(&self, project: &ProjectModel) -> Result<Vec<EnvironmentAction>> {
        let Some(environment) = project.environment.as_deref() else {
            return Ok(Vec::new());
        };
        let lock = self.lock_for(&project.path);
        let _serialized = lock.lock().await;

        let diff = self.compare(project, Some(environment)).await;
        match diff.declared_text {
            Some(declared) if !diff.is_identical => {
                self.apply_declared(environment, &declared, &diff.extra_in_live)
                    .await
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Rewrite the declared file from the live environment when they differ.
    /// Returns whether the file was written.
    pub async fn update_environment_spec(&self, project: &ProjectModel) -> Result<bool> {
        let lock = self.lock_for(&project.path);
        let _serialized = lock.lock().await;
        self.write_spec_unlocked(project).await
    }

    async fn write_spec_unlocked(&self, project: &ProjectModel) -> Result<bool> {
        let Some(environment) = project.environment.as_deref() else {
            return Ok(false);
        };

        let diff = self.compare(project, Some(environment)).await;
        if diff.is_identical {
            return Ok(false);
        }
        let Some(live) = diff.live_text else {
            return Ok(false);
        };

        let _echo = self.echo.suppress(environment);
        let spec_path = join_path(&project.path, ENVIRONMENT_FILE);
        self.files.save(&spec_path, &live).await?;
        tracing::info!("Environment '{}' specifications updated", environment);
        Ok(true)
    }

    /// Write the project configuration file (without `path`).
    pub async fn save_configuration(&self, project: &ProjectModel) -> Result<()> {
        let file_path = join_path(&project.path, &self.options.configuration_filename);
        let content = serde_json::to_string_pretty(&project.to_configuration())
            .map_err(|e| SyncError::files(&file_path, e))?;
        self.files.save(&file_path, &content).await
    }
}
