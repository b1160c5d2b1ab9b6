use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// File name of the declared environment specification inside a project.
pub const ENVIRONMENT_FILE: &str = "environment.yml";

/// A normalized package environment specification.
///
/// `dependencies` only holds package root names: version and build pins are stripped
/// so `numpy==1.2` and `numpy` compare equal. `document` keeps the full parsed
/// specification (minus the instance-only `name` and `prefix` fields) so it can be
/// handed back to the environment manager untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentSpec {
    pub channels: Vec<String>,
    pub dependencies: BTreeSet<String>,
    pub document: serde_yaml::Mapping,
}

/// Declarative part of a specification, used for semantic comparison.
#[derive(Serialize)]
struct CanonicalSpec<'a> {
    channels: &'a [String],
    dependencies: &'a BTreeSet<String>,
}

impl EnvironmentSpec {
    /// Text compared between declared and live specifications: channels in order,
    /// then sorted package names.
    pub fn canonical_text(&self) -> String {
        let canonical = CanonicalSpec {
            channels: &self.channels,
            dependencies: &self.dependencies,
        };
        serde_yaml::to_string(&canonical).unwrap_or_default()
    }

    /// Specification text without the instance-only fields.
    pub fn to_text(&self) -> String {
        serde_yaml::to_string(&self.document).unwrap_or_default()
    }
}

/// Result of comparing the declared specification with the live one.
///
/// `extra_in_live` lists the packages installed in the live environment but absent
/// from the declared file; they are the removal candidates during reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageDiffResult {
    pub is_identical: bool,
    pub declared_text: Option<String>,
    pub live_text: Option<String>,
    pub extra_in_live: BTreeSet<String>,
}

/// An environment known to the environment manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    pub name: String,
    #[serde(default)]
    pub dir: Option<String>,
}

/// The packages of `environment` were modified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageChange {
    pub environment: String,
}

/// The checked-out HEAD of the repository rooted at `repository_path` moved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadChange {
    pub repository_path: String,
    pub branch: Option<String>,
}
