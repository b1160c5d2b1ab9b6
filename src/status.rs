//! Status bar text for the active project.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::bus::Connection;
use crate::manager::ProjectManager;
use crate::models::ProjectModel;

/// What a status widget shows; `None` hides it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusText {
    pub text: String,
    pub title: String,
}

impl StatusText {
    fn for_project(project: Option<&ProjectModel>) -> Option<Self> {
        project.map(|project| Self {
            text: project.name.clone(),
            title: format!("Active project: {}", project.path),
        })
    }
}

/// Follows the active project and keeps its [`StatusText`] current.
pub struct ProjectStatus {
    current: Arc<RwLock<Option<StatusText>>>,
    _connection: Connection,
}

impl ProjectStatus {
    pub fn attach(manager: &ProjectManager) -> Self {
        let current = Arc::new(RwLock::new(StatusText::for_project(
            manager.project().as_ref(),
        )));

        let slot_state = current.clone();
        let connection = manager.changed().connect(move |event| {
            *slot_state.write() = StatusText::for_project(event.new_value.as_ref());
        });

        Self {
            current,
            _connection: connection,
        }
    }

    pub fn current(&self) -> Option<StatusText> {
        self.current.read().clone()
    }

    pub fn text(&self) -> Option<String> {
        self.current.read().as_ref().map(|status| status.text.clone())
    }
}
