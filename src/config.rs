use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::services::DEFAULT_URL;

const APP_NAME: &str = "project-sync";
const SETTINGS_FILE: &str = "settings.json";

/// Project template and environment settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Name of the file marking a folder as a project
    pub configuration_filename: String,
    /// Packages of a new environment when the project declares none.
    /// Environment synchronization is disabled when unset.
    pub default_packages: Option<Vec<String>>,
    /// Path opened within a project; supports `{{ jproject.<field> }}`
    pub default_path: String,
    /// Install the project folder in editable mode in its environment
    pub editable_install: bool,
    /// Initialize new projects as git repositories
    pub with_git: bool,
    /// Base URL of the project service
    pub server_url: String,
    pub api_token: Option<String>,
    /// Overrides the default state database location
    pub state_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            configuration_filename: "project.json".to_string(),
            default_packages: None,
            default_path: String::new(),
            editable_install: true,
            with_git: false,
            server_url: DEFAULT_URL.to_string(),
            api_token: None,
            state_path: None,
        }
    }
}

impl Settings {
    /// Load settings from the user's config directory, then apply environment
    /// overrides. Returns defaults if the file doesn't exist or fails to parse.
    pub fn load() -> Self {
        let mut settings = match Self::try_load() {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("Failed to load settings, using defaults: {:#}", e);
                Self::default()
            }
        };
        settings.apply_env();
        settings
    }

    fn try_load() -> Result<Self> {
        let path = settings_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::from_file(&path)
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = fs::read_to_string(path).context("Failed to read settings file")?;
        let settings = serde_json::from_str(&content).context("Failed to parse settings file")?;
        Ok(settings)
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("PROJECT_SYNC_URL") {
            self.server_url = url;
        }
        if let Ok(token) = std::env::var("PROJECT_SYNC_TOKEN") {
            self.api_token = Some(token);
        }
    }

    /// Whether environments are reconciled at all.
    pub fn environment_sync(&self) -> bool {
        self.default_packages.is_some()
    }
}

fn settings_path() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", APP_NAME)
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
    Ok(dirs.config_dir().join(SETTINGS_FILE))
}
