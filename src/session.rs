//! User-facing project commands.
//!
//! [`ProjectSession`] wires the manager, the reconciler and the trigger listeners
//! together and exposes the commands a host binds to its UI: new, import, open,
//! close and delete. Command failures are returned to the caller and also published
//! as [`Notice`]s; none of them takes the session down.

use std::sync::{Arc, Weak};

use serde_json::Value;

use crate::bus::{Connection, EchoSuppressor, Signal};
use crate::config::Settings;
use crate::error::{Result, SyncError};
use crate::listeners::TriggerListeners;
use crate::manager::ProjectManager;
use crate::models::{ChangeType, Notice, ProjectChangedEvent, ProjectModel};
use crate::reconcile::{derive_environment_name, Reconciler, ReconcilerOptions};
use crate::services::{
    join_path, EnvironmentManager, FileContents, ProjectService, StateStore, VersionControl,
};
use crate::status::ProjectStatus;

/// Services a session is built on.
#[derive(Clone)]
pub struct Collaborators {
    pub projects: Arc<dyn ProjectService>,
    pub state: Arc<dyn StateStore>,
    pub files: Arc<dyn FileContents>,
    /// `None` when no environment manager is installed.
    pub environments: Option<Arc<dyn EnvironmentManager>>,
    /// `None` when no version control is installed.
    pub vcs: Option<Arc<dyn VersionControl>>,
}

pub struct ProjectSession {
    settings: Settings,
    manager: Arc<ProjectManager>,
    files: Arc<dyn FileContents>,
    vcs: Option<Arc<dyn VersionControl>>,
    reconciler: Option<Arc<Reconciler>>,
    listeners: Option<Arc<TriggerListeners>>,
    status: ProjectStatus,
    notices: Signal<Notice>,
    _connections: Vec<Connection>,
}

impl ProjectSession {
    /// Build a session and start restoring the last active project.
    ///
    /// Environment synchronization is enabled only when `settings` carries default
    /// packages and an environment manager is available. Must be called from within
    /// a tokio runtime.
    pub fn start(settings: Settings, services: Collaborators) -> Arc<Self> {
        let manager = ProjectManager::new(
            services.projects.clone(),
            services.state.clone(),
            settings.default_path.clone(),
        );
        let notices = Signal::new();
        let vcs = services.vcs.clone();

        let reconciler = match (&settings.default_packages, &services.environments) {
            (Some(default_packages), Some(environments)) => Some(Arc::new(Reconciler::new(
                environments.clone(),
                services.files.clone(),
                ReconcilerOptions {
                    default_packages: default_packages.clone(),
                    editable_install: settings.editable_install,
                    configuration_filename: settings.configuration_filename.clone(),
                },
                EchoSuppressor::new(),
            ))),
            _ => {
                tracing::info!("Environment synchronization disabled");
                None
            }
        };

        let listeners = reconciler.as_ref().map(|reconciler| {
            TriggerListeners::spawn(
                manager.clone(),
                reconciler.clone(),
                vcs.clone(),
                notices.clone(),
            )
        });

        let mut connections = Vec::new();
        if let Some(listeners) = &listeners {
            connections.push(bind_listeners(&manager, listeners));

            let weak_manager = Arc::downgrade(&manager);
            let weak_listeners = Arc::downgrade(listeners);
            tokio::spawn(async move {
                let Some(manager) = weak_manager.upgrade() else {
                    return;
                };
                manager.restored().await;
                if let Some(listeners) = weak_listeners.upgrade() {
                    connect_if_active(&manager, &listeners);
                }
            });
        }

        let status = ProjectStatus::attach(&manager);

        Arc::new(Self {
            settings,
            manager,
            files: services.files,
            vcs,
            reconciler,
            listeners,
            status,
            notices,
            _connections: connections,
        })
    }

    pub fn manager(&self) -> &Arc<ProjectManager> {
        &self.manager
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// `None` when environment synchronization is disabled.
    pub fn reconciler(&self) -> Option<&Arc<Reconciler>> {
        self.reconciler.as_ref()
    }

    pub fn listeners(&self) -> Option<&Arc<TriggerListeners>> {
        self.listeners.as_ref()
    }

    pub fn status(&self) -> &ProjectStatus {
        &self.status
    }

    /// User-facing outcomes of commands and background synchronization.
    pub fn notices(&self) -> &Signal<Notice> {
        &self.notices
    }

    /// Resolves once the last active project is restored and the listeners follow it.
    pub async fn restored(&self) {
        self.manager.restored().await;
        if let Some(listeners) = &self.listeners {
            connect_if_active(&self.manager, listeners);
        }
    }

    /// Wait for queued background synchronization to finish.
    pub async fn settle(&self) {
        if let Some(listeners) = &self.listeners {
            listeners.flush().await;
        }
    }

    /// Generate a project in `cwd`, then open it.
    ///
    /// On failure the half-created project is closed.
    pub async fn new_project(&self, cwd: &str, params: &Value) -> Result<ProjectModel> {
        let result = async {
            let created = self.manager.create(cwd, params).await?;
            let git = self.vcs.as_ref().filter(|_| self.settings.with_git);
            if let Some(vcs) = git {
                if let Err(e) = vcs.init(&created.path).await {
                    tracing::warn!("Fail to initialize the project as git repository: {}", e);
                }
            }

            let project = self.open_project(&created.path).await?;

            if let Some(vcs) = git {
                let message = format!("Initialize project {}", project.name);
                if let Err(e) = vcs.commit_all(&project.path, &message).await {
                    tracing::warn!("Fail to commit the new project: {}", e);
                }
            }
            Ok::<_, SyncError>(project)
        }
        .await;

        match result {
            Ok(project) => {
                self.notices.emit(&Notice::success(format!(
                    "Project '{}' successfully created.",
                    project.name
                )));
                Ok(project)
            }
            Err(e) => {
                tracing::error!("Fail to create the project: {}", e);
                if let Err(close_error) = self.manager.close().await {
                    tracing::warn!("Fail to close the project: {}", close_error);
                }
                self.notices
                    .emit(&Notice::error(format!("Fail to create the project: {}", e)));
                Err(e)
            }
        }
    }

    /// Clone the repository `url` into `cwd` and open the result as a project.
    pub async fn import_project(&self, cwd: &str, url: &str) -> Result<ProjectModel> {
        let result = async {
            let vcs = self.vcs.as_ref().ok_or(SyncError::VersionControlUnavailable)?;
            vcs.clone_repository(cwd, url).await?;
            let project = self
                .open_project(&join_path(cwd, &repository_folder(url)))
                .await?;
            Ok::<_, SyncError>(project)
        }
        .await;

        match result {
            Ok(project) => {
                self.notices.emit(&Notice::success(format!(
                    "Project '{}' successfully imported.",
                    project.name
                )));
                Ok(project)
            }
            Err(e) => {
                tracing::error!("Fail to import the project {}: {}", url, e);
                if self.manager.project().is_some() {
                    if let Err(close_error) = self.manager.close().await {
                        tracing::warn!("Fail to close the project: {}", close_error);
                    }
                }
                self.notices.emit(&Notice::error(format!(
                    "Fail to import the project {}: {}",
                    url, e
                )));
                Err(e)
            }
        }
    }

    /// Open the folder `path` as the active project and reconcile its environment.
    ///
    /// The folder must contain the configuration file. If reconciliation fails the
    /// project stays open and the error is returned.
    pub async fn open_project(&self, path: &str) -> Result<ProjectModel> {
        let config_path = join_path(path, &self.settings.configuration_filename);
        if self.files.get(&config_path).await?.is_none() {
            return Err(SyncError::ConfigurationNotFound(config_path));
        }

        let project = self
            .manager
            .open(path)
            .await?
            .ok_or(SyncError::NoActiveProject)?;
        if let Some(vcs) = &self.vcs {
            vcs.track(&project.path);
        }

        match &self.reconciler {
            Some(reconciler) => self.sync_environment(reconciler, &project).await,
            None => Ok(project),
        }
    }

    /// Reconcile the active project's environment again.
    pub async fn sync_active(&self) -> Result<ProjectModel> {
        let project = self.manager.project().ok_or(SyncError::NoActiveProject)?;
        match &self.reconciler {
            Some(reconciler) => self.sync_environment(reconciler, &project).await,
            None => Ok(project),
        }
    }

    async fn sync_environment(
        &self,
        reconciler: &Reconciler,
        project: &ProjectModel,
    ) -> Result<ProjectModel> {
        // Nothing we do here should loop back through the listeners.
        let _quiet = reconciler.echo().suppress_all();

        let result = async {
            let reconciliation = reconciler.reconcile(project).await?;
            let synced = reconciliation.project;
            if let Some(environment) = &synced.environment {
                self.manager
                    .assign_environment(&synced.path, environment)
                    .await;
            }
            reconciler.save_configuration(&synced).await?;
            // Pick up the configuration as the service now reads it.
            self.manager.open(&synced.path).await?;
            Ok::<_, SyncError>(self.manager.project().unwrap_or(synced))
        }
        .await;

        result.map_err(|e| {
            let environment = derive_environment_name(project);
            tracing::error!(
                "Fail to synchronize environment '{}' of project '{}': {}",
                environment,
                project.name,
                e
            );
            self.notices.emit(&Notice::error(format!(
                "Fail to update the environment {}: {}",
                environment, e
            )));
            e
        })
    }

    pub async fn close_project(&self) -> Result<()> {
        self.manager.close().await?;
        if let Some(listeners) = &self.listeners {
            listeners.disconnect();
        }
        Ok(())
    }

    /// Delete the active project folder, then its environment.
    ///
    /// Both removals are attempted; the folder removal error wins.
    pub async fn delete_project(&self) -> Result<ProjectModel> {
        let project = self.manager.project().ok_or(SyncError::NoActiveProject)?;

        let deleted = self.manager.delete().await;
        if let Err(e) = &deleted {
            tracing::error!("Fail to remove the project folder '{}': {}", project.path, e);
            self.notices.emit(&Notice::error(format!(
                "Failed to remove the project folder '{}'.",
                project.path
            )));
        }

        if let (Some(environment), Some(reconciler)) = (&project.environment, &self.reconciler) {
            if let Some(listeners) = &self.listeners {
                listeners.disconnect();
            }
            let _echo = reconciler.echo().suppress(environment);
            if let Err(e) = reconciler.environments().remove_environment(environment).await {
                tracing::error!("Fail to remove the environment '{}': {}", environment, e);
                self.notices.emit(&Notice::error(format!(
                    "Failed to remove the project environment '{}'.",
                    environment
                )));
            }
        }

        let project = deleted?;
        self.notices.emit(&Notice::success(format!(
            "Project '{}' removed.",
            project.name
        )));
        Ok(project)
    }
}

/// Keep the trigger listeners connected exactly while a restored project with an
/// environment is active, and refresh the declared file of the project being left.
fn bind_listeners(manager: &Arc<ProjectManager>, listeners: &Arc<TriggerListeners>) -> Connection {
    let weak_manager: Weak<ProjectManager> = Arc::downgrade(manager);
    let weak_listeners: Weak<TriggerListeners> = Arc::downgrade(listeners);

    manager
        .changed()
        .connect(move |event: &ProjectChangedEvent| {
            let (Some(manager), Some(listeners)) = (weak_manager.upgrade(), weak_listeners.upgrade())
            else {
                return;
            };

            if event.change_type != ChangeType::Delete {
                if let Some(old) = event.old_value.as_ref() {
                    let left = event
                        .new_value
                        .as_ref()
                        .map_or(true, |new| new.path != old.path);
                    if left && old.environment.is_some() {
                        listeners.request_spec_update(old.clone());
                    }
                }
            }

            match &event.new_value {
                None => listeners.disconnect(),
                Some(project) if project.environment.is_some() && manager.is_restored() => {
                    listeners.connect()
                }
                Some(_) => {}
            }
        })
}

fn connect_if_active(manager: &ProjectManager, listeners: &TriggerListeners) {
    if manager
        .project()
        .is_some_and(|project| project.environment.is_some())
    {
        listeners.connect();
    }
}

/// Folder a `git clone` of `url` creates.
fn repository_folder(url: &str) -> String {
    let last = url.trim_end_matches('/').rsplit(['/', ':']).next().unwrap_or(url);
    last.strip_suffix(".git").unwrap_or(last).to_string()
}
