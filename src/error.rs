//! Error types for project-sync operations.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::services::ClientError;

/// Malformed environment specification text.
#[derive(Debug, Error)]
pub enum SpecError {
    #[error("Invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Specification is not a mapping")]
    NotAMapping,

    #[error("Field '{0}' has an unexpected type")]
    InvalidField(&'static str),
}

/// All errors that can surface from the project and environment engine.
///
/// None of these are fatal to the host: callers report them and keep running.
#[derive(Debug, Error)]
pub enum SyncError {
    // ─────────────────────────────────────────────────────────────────────
    // Project Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Project service error: {0}")]
    Service(#[from] ClientError),

    #[error("No active project")]
    NoActiveProject,

    #[error("Project configuration file not found: {0}")]
    ConfigurationNotFound(String),

    // ─────────────────────────────────────────────────────────────────────
    // Environment Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Environment '{environment}': {message}")]
    Environment {
        environment: String,
        message: String,
    },

    #[error("Environment '{environment}' partially updated (removed {removed:?}): {source}")]
    PartialUpdate {
        environment: String,
        removed: BTreeSet<String>,
        #[source]
        source: Box<SyncError>,
    },

    #[error("Invalid environment specification: {0}")]
    Spec(#[from] SpecError),

    // ─────────────────────────────────────────────────────────────────────
    // Collaborator Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("File error: {path}: {message}")]
    Files { path: String, message: String },

    #[error("State store error: {0}")]
    State(String),

    #[error("Version control error: {0}")]
    VersionControl(String),

    #[error("Version control is not available")]
    VersionControlUnavailable,
}

impl SyncError {
    pub fn environment(environment: impl Into<String>, message: impl ToString) -> Self {
        SyncError::Environment {
            environment: environment.into(),
            message: message.to_string(),
        }
    }

    pub fn files(path: impl Into<String>, message: impl ToString) -> Self {
        SyncError::Files {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

/// Convenience type alias for Results using SyncError.
pub type Result<T> = std::result::Result<T, SyncError>;
