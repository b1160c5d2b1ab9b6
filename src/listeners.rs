//! Bindings turning external notifications into reconciliation requests.
//!
//! - HEAD change of the active project's repository: re-apply the declared file if the
//!   checkout changed it.
//! - Package change of the active project's environment: mirror the live environment
//!   into the declared file.
//!
//! Slots only filter and enqueue; a single worker task runs the requests in order.
//! Package notifications raised while the reconciler holds an echo guard on the
//! environment are dropped at the slot.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::bus::{Connection, Signal};
use crate::manager::ProjectManager;
use crate::models::{HeadChange, Notice, PackageChange, ProjectModel};
use crate::reconcile::Reconciler;
use crate::services::VersionControl;

#[derive(Debug)]
enum SyncRequest {
    HeadChanged {
        project: ProjectModel,
        branch: Option<String>,
    },
    PackagesChanged {
        project: ProjectModel,
    },
    Flush(oneshot::Sender<()>),
}

pub struct TriggerListeners {
    manager: Arc<ProjectManager>,
    reconciler: Arc<Reconciler>,
    vcs: Option<Arc<dyn VersionControl>>,
    requests: mpsc::UnboundedSender<SyncRequest>,
    connections: Mutex<Vec<Connection>>,
    worker: JoinHandle<()>,
}

impl TriggerListeners {
    /// Create the listeners (disconnected) and start their worker.
    pub fn spawn(
        manager: Arc<ProjectManager>,
        reconciler: Arc<Reconciler>,
        vcs: Option<Arc<dyn VersionControl>>,
        notices: Signal<Notice>,
    ) -> Arc<Self> {
        let (requests, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(reconciler.clone(), notices, rx));
        Arc::new(Self {
            manager,
            reconciler,
            vcs,
            requests,
            connections: Mutex::new(Vec::new()),
            worker,
        })
    }

    pub fn is_connected(&self) -> bool {
        !self.connections.lock().is_empty()
    }

    /// Connect to the environment manager and version control; no-op when connected.
    pub fn connect(&self) {
        let mut connections = self.connections.lock();
        if !connections.is_empty() {
            return;
        }

        let manager = self.manager.clone();
        let echo = self.reconciler.echo().clone();
        let requests = self.requests.clone();
        connections.push(self.reconciler.environments().package_changed().connect(
            move |change: &PackageChange| {
                if echo.is_suppressed(&change.environment) {
                    tracing::trace!("Ignoring own change of '{}'", change.environment);
                    return;
                }
                let Some(project) = manager.project() else {
                    return;
                };
                if project.environment.as_deref() != Some(change.environment.as_str()) {
                    return;
                }
                let _ = requests.send(SyncRequest::PackagesChanged { project });
            },
        ));

        if let Some(vcs) = &self.vcs {
            let manager = self.manager.clone();
            let requests = self.requests.clone();
            // Resync waits on the project lock held by a running reconciliation.
            connections.push(vcs.head_changed().connect(move |change: &HeadChange| {
                let Some(project) = manager.project() else {
                    return;
                };
                if project.environment.is_none()
                    || !same_path(&change.repository_path, &project.path)
                {
                    return;
                }
                let _ = requests.send(SyncRequest::HeadChanged {
                    project,
                    branch: change.branch.clone(),
                });
            }));
        }

        tracing::debug!("Trigger listeners connected");
    }

    /// Queue a refresh of `project`'s declared file from its live environment.
    pub fn request_spec_update(&self, project: ProjectModel) {
        let _ = self.requests.send(SyncRequest::PackagesChanged { project });
    }

    /// Wait until every request queued so far has been handled.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.requests.send(SyncRequest::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    pub fn disconnect(&self) {
        let mut connections = self.connections.lock();
        if !connections.is_empty() {
            connections.clear();
            tracing::debug!("Trigger listeners disconnected");
        }
    }
}

impl Drop for TriggerListeners {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

/// Compare served-root relative paths, ignoring leading and trailing `/`.
fn same_path(a: &str, b: &str) -> bool {
    a.trim_matches('/') == b.trim_matches('/')
}

async fn run_worker(
    reconciler: Arc<Reconciler>,
    notices: Signal<Notice>,
    mut rx: mpsc::UnboundedReceiver<SyncRequest>,
) {
    while let Some(request) = rx.recv().await {
        match request {
            SyncRequest::HeadChanged { project, branch } => {
                let branch = branch.unwrap_or_else(|| "unknown".to_string());
                let environment = project.environment.clone().unwrap_or_default();
                match reconciler.resync(&project).await {
                    Ok(actions) if actions.is_empty() => {}
                    Ok(_) => notices.emit(&Notice::success(format!(
                        "Environment {} updated for branch {}",
                        environment, branch
                    ))),
                    Err(e) => {
                        let message = format!(
                            "Fail to update environment after git HEAD changed on branch {}",
                            branch
                        );
                        tracing::error!("{}: {}", message, e);
                        notices.emit(&Notice::error(message));
                    }
                }
            }
            SyncRequest::PackagesChanged { project } => {
                let environment = project.environment.clone().unwrap_or_default();
                match reconciler.update_environment_spec(&project).await {
                    Ok(true) => notices.emit(&Notice::info(format!(
                        "Environment '{}' specifications updated.",
                        environment
                    ))),
                    Ok(false) => {}
                    Err(e) => {
                        tracing::error!(
                            "Fail to update environment '{}' specifications: {}",
                            environment,
                            e
                        );
                        notices.emit(&Notice::error(format!(
                            "Fail to update environment '{}' specifications",
                            environment
                        )));
                    }
                }
            }
            SyncRequest::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}
