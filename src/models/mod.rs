//! Domain models for project-sync.
//!
//! # Core Concepts
//!
//! ## Project State
//!
//! - [`ProjectModel`]: The active project, identified by its `path`. Carries the name of
//!   its isolated package environment once the first sync succeeded, plus any extra keys
//!   found in the configuration file.
//! - [`ProjectChangedEvent`]: Emitted on every actual change of the active project,
//!   tagged with a [`ChangeType`].
//!
//! ## Environment State
//!
//! These describe the package environment bound to a project:
//!
//! - [`EnvironmentSpec`]: A parsed package specification, either declared in the project's
//!   `environment.yml` or exported from the live environment.
//! - [`PackageDiffResult`]: Outcome of comparing the declared and live specifications.
//! - [`PackageChange`] / [`HeadChange`]: Notifications raised by the environment manager and
//!   the version-control service.
//! - [`Notice`]: User-facing outcome of an operation.

mod environment;
mod notice;
mod project;

pub use environment::*;
pub use notice::*;
pub use project::*;
