use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The project currently opened in the host.
///
/// Projects are identified by their `path` (relative to the served root). The
/// `environment` field names the isolated package environment bound to the project;
/// it stays `None` until the first successful reconciliation assigns one.
///
/// Any key of the configuration file that is not modelled here lands in `extra` and
/// is written back verbatim, so read-modify-write cycles never lose data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectModel {
    pub name: String,
    /// Folder of the project. Not trusted from the configuration file since it
    /// depends on where the folder lives.
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProjectModel {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            environment: None,
            extra: Map::new(),
        }
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    /// JSON object stored in the project configuration file (everything but `path`).
    pub fn to_configuration(&self) -> Value {
        let mut object = Map::new();
        object.insert("name".to_string(), Value::String(self.name.clone()));
        if let Some(environment) = &self.environment {
            object.insert(
                "environment".to_string(),
                Value::String(environment.clone()),
            );
        }
        for (key, value) in &self.extra {
            if key != "path" {
                object.insert(key.clone(), value.clone());
            }
        }
        Value::Object(object)
    }

    /// Whether the project folder should be installed in editable mode in its
    /// environment. The project's `editable_install` key wins over `default`.
    pub fn editable_install(&self, default: bool) -> bool {
        self.extra
            .get("editable_install")
            .and_then(Value::as_bool)
            .unwrap_or(default)
    }
}

/// Project service payload: `{"project": ...}`; `null` when no project is open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectResponse {
    #[serde(default)]
    pub project: Option<ProjectModel>,
}

/// The kind of transition behind a [`ProjectChangedEvent`].
///
/// - `New`: A project was generated and became active
/// - `Open`: A different project was opened, the active one was closed, or its
///   environment was assigned
/// - `Delete`: The active project was closed before its folder removal
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    New,
    Open,
    Delete,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Open => "open",
            Self::Delete => "delete",
        }
    }
}

/// Emitted by the project manager each time the active project actually changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectChangedEvent {
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    pub old_value: Option<ProjectModel>,
    pub new_value: Option<ProjectModel>,
}
