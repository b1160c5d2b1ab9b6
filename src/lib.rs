//! Project lifecycle and package environment reconciliation for notebook hosts.
//!
//! A [`ProjectSession`] keeps track of the active project (a folder holding a
//! configuration file), restores it across restarts, and keeps the project's
//! isolated package environment in agreement with its declared `environment.yml`.

pub mod bus;
pub mod config;
pub mod db;
pub mod differ;
pub mod error;
pub mod listeners;
pub mod manager;
pub mod models;
pub mod reconcile;
pub mod services;
pub mod session;
pub mod status;
pub mod template;

pub use config::Settings;
pub use error::{Result, SyncError};
pub use manager::ProjectManager;
pub use reconcile::{derive_environment_name, Reconciler};
pub use session::{Collaborators, ProjectSession};
