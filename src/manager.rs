//! The active project state machine.
//!
//! States are `None` (no project) and `Some(model)` (project active). Every transition
//! goes through [`ProjectManager::set_project`], which persists the new value in the
//! state store and emits a [`ProjectChangedEvent`] only when the value actually
//! changed.
//!
//! Construction spawns the restore task: the last persisted project is re-opened
//! through the project service to validate it. Callers await
//! [`ProjectManager::restored`] before issuing commands.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::{watch, Mutex};

use crate::bus::Signal;
use crate::error::{Result, SyncError};
use crate::models::{ChangeType, ProjectChangedEvent, ProjectModel};
use crate::services::{ProjectService, StateStore};
use crate::template::render_string_template;

/// Key of the active project in the state store.
pub const STATE_KEY: &str = "project-sync:project";

pub struct ProjectManager {
    service: Arc<dyn ProjectService>,
    store: Arc<dyn StateStore>,
    default_path: String,
    project: RwLock<Option<ProjectModel>>,
    changed: Signal<ProjectChangedEvent>,
    /// Serializes transitions; the project value itself is never locked across an await.
    transitions: Mutex<()>,
    restored: watch::Sender<bool>,
}

impl ProjectManager {
    /// Create the manager and start restoring the persisted project.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        service: Arc<dyn ProjectService>,
        store: Arc<dyn StateStore>,
        default_path: impl Into<String>,
    ) -> Arc<Self> {
        let (restored, _) = watch::channel(false);
        let manager = Arc::new(Self {
            service,
            store,
            default_path: default_path.into(),
            project: RwLock::new(None),
            changed: Signal::new(),
            transitions: Mutex::new(()),
            restored,
        });

        let restoring = manager.clone();
        tokio::spawn(async move {
            restoring.restore().await;
        });

        manager
    }

    /// Active project.
    pub fn project(&self) -> Option<ProjectModel> {
        self.project.read().clone()
    }

    /// Signal emitted when the active project changes.
    pub fn changed(&self) -> &Signal<ProjectChangedEvent> {
        &self.changed
    }

    /// Default path to open in the active project.
    pub fn default_path(&self) -> String {
        render_string_template(&self.default_path, self.project().as_ref())
    }

    /// Resolves once the persisted project has been restored (or dropped).
    pub async fn restored(&self) {
        let mut rx = self.restored.subscribe();
        let _ = rx.wait_for(|restored| *restored).await;
    }

    pub fn is_restored(&self) -> bool {
        *self.restored.borrow()
    }

    async fn restore(&self) {
        match self.store.fetch(STATE_KEY).await {
            Ok(saved) => {
                let saved = saved
                    .filter(|value| !value.is_null())
                    .and_then(|value| match serde_json::from_value::<ProjectModel>(value) {
                        Ok(project) => Some(project),
                        Err(e) => {
                            tracing::warn!("Ignoring unreadable saved project: {}", e);
                            None
                        }
                    });

                if let Some(project) = saved {
                    let _guard = self.transitions.lock().await;
                    self.set_project(Some(project.clone()), ChangeType::Open)
                        .await;
                    if let Err(e) = self.open_locked(&project.path, ChangeType::Open).await {
                        tracing::error!("Unable to restore project '{}': {}", project.path, e);
                        self.set_project(None, ChangeType::Open).await;
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Unable to restore saved project: {}", e);
                self.reset().await;
            }
        }

        self.restored.send_replace(true);
        tracing::debug!("Project state restored: {:?}", self.project().map(|p| p.path));
    }

    /// Generate a project in `path` and make it active.
    pub async fn create(&self, path: &str, params: &Value) -> Result<ProjectModel> {
        let _guard = self.transitions.lock().await;
        let project = self.service.create(path, params).await?;
        tracing::info!("Created project '{}' in '{}'", project.name, project.path);
        self.set_project(Some(project.clone()), ChangeType::New)
            .await;
        Ok(project)
    }

    /// Open the folder `path` as the active project; an empty path closes it.
    pub async fn open(&self, path: &str) -> Result<Option<ProjectModel>> {
        let _guard = self.transitions.lock().await;
        self.open_locked(path, ChangeType::Open).await
    }

    /// Close the active project.
    pub async fn close(&self) -> Result<()> {
        let _guard = self.transitions.lock().await;
        self.open_locked("", ChangeType::Open).await?;
        Ok(())
    }

    /// Close the active project, then ask the service to delete its folder.
    pub async fn delete(&self) -> Result<ProjectModel> {
        let _guard = self.transitions.lock().await;
        let project = self.project().ok_or(SyncError::NoActiveProject)?;

        // The service refuses to delete a project that is still open.
        self.open_locked("", ChangeType::Delete).await?;
        self.service.delete(&project.path).await?;
        tracing::info!("Deleted project '{}'", project.path);
        Ok(project)
    }

    /// Drop the active project without contacting the service.
    pub async fn reset(&self) {
        let _guard = self.transitions.lock().await;
        self.set_project(None, ChangeType::Open).await;
    }

    /// Record the environment bound to the project in `path`.
    ///
    /// Emits an `open` change when the active project is `path` and its
    /// environment differs.
    pub async fn assign_environment(&self, path: &str, environment: &str) -> bool {
        let _guard = self.transitions.lock().await;
        let Some(current) = self.project().filter(|p| p.path == path) else {
            return false;
        };
        if current.environment.as_deref() == Some(environment) {
            return false;
        }
        self.set_project(Some(current.with_environment(environment)), ChangeType::Open)
            .await
    }

    async fn open_locked(
        &self,
        path: &str,
        change_type: ChangeType,
    ) -> Result<Option<ProjectModel>> {
        let answer = self.service.open(path).await?;
        let project = if path.is_empty() { None } else { answer };
        self.set_project(project.clone(), change_type).await;
        Ok(project)
    }

    /// Replace the active project; returns whether anything changed.
    async fn set_project(&self, project: Option<ProjectModel>, change_type: ChangeType) -> bool {
        let old_value = {
            let mut current = self.project.write();
            if *current == project {
                return false;
            }
            std::mem::replace(&mut *current, project.clone())
        };

        let value = serde_json::to_value(&project).unwrap_or(Value::Null);
        if let Err(e) = self.store.save(STATE_KEY, &value).await {
            tracing::warn!("Unable to persist the active project: {}", e);
        }

        tracing::debug!(
            "Project changed ({}): {:?} -> {:?}",
            change_type.as_str(),
            old_value.as_ref().map(|p| &p.path),
            project.as_ref().map(|p| &p.path)
        );
        self.changed.emit(&ProjectChangedEvent {
            change_type,
            old_value,
            new_value: project,
        });
        true
    }
}
