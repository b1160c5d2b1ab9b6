//! Declared vs. live environment specification comparison.
//!
//! Both sides are reduced to package root names before comparing, so pins like
//! `numpy=1.26.4=py311h64a7726_0` and `numpy` are the same package. The comparison never
//! decides what to install: it only reports whether the two sides agree and which
//! live packages the declared file does not mention.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_yaml::{Mapping, Value};

use crate::error::SpecError;
use crate::models::{EnvironmentSpec, PackageDiffResult};

/// Leading identifier of a dependency entry.
static PACKAGE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_-]*").expect("valid package regex"));

/// Fields describing one installed instance rather than the declared content.
const INSTANCE_FIELDS: [&str; 2] = ["name", "prefix"];

/// Extract the package root name of a dependency entry.
pub fn package_name(entry: &str) -> Option<&str> {
    PACKAGE_NAME.find(entry.trim()).map(|m| m.as_str())
}

/// Parse an environment specification.
pub fn parse_spec(text: &str) -> Result<EnvironmentSpec, SpecError> {
    let mut document = match serde_yaml::from_str::<Value>(text)? {
        Value::Mapping(mapping) => mapping,
        _ => return Err(SpecError::NotAMapping),
    };

    for field in INSTANCE_FIELDS {
        document.remove(field);
    }

    let channels = match document.get("channels") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Sequence(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or(SpecError::InvalidField("channels"))
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => return Err(SpecError::InvalidField("channels")),
    };

    let dependencies = dependency_names(&document)?;

    Ok(EnvironmentSpec {
        channels,
        dependencies,
        document,
    })
}

fn dependency_names(document: &Mapping) -> Result<BTreeSet<String>, SpecError> {
    let items = match document.get("dependencies") {
        None | Some(Value::Null) => return Ok(BTreeSet::new()),
        Some(Value::Sequence(items)) => items,
        Some(_) => return Err(SpecError::InvalidField("dependencies")),
    };

    let mut names = BTreeSet::new();
    for item in items {
        match item {
            Value::String(entry) => match package_name(entry) {
                Some(name) => {
                    names.insert(name.to_string());
                }
                None => tracing::warn!("Skipping unparseable dependency entry '{}'", entry),
            },
            // Nested installer sections (e.g. `- pip: [...]`) are owned by that installer.
            Value::Mapping(_) => {}
            _ => return Err(SpecError::InvalidField("dependencies")),
        }
    }
    Ok(names)
}

/// Parse a specification that may be missing; malformed text degrades to absent.
pub fn parse_lenient(text: Option<&str>, origin: &str) -> Option<EnvironmentSpec> {
    let text = text?;
    match parse_spec(text) {
        Ok(spec) => Some(spec),
        Err(e) => {
            tracing::warn!("Ignoring malformed environment specification from {}: {}", origin, e);
            None
        }
    }
}

/// Compare the declared specification with the live one.
pub fn diff(declared: Option<&EnvironmentSpec>, live: Option<&EnvironmentSpec>) -> PackageDiffResult {
    let is_identical = match (declared, live) {
        (Some(declared), Some(live)) => declared.canonical_text() == live.canonical_text(),
        (None, None) => true,
        _ => false,
    };

    let extra_in_live = match (declared, live) {
        (_, None) => BTreeSet::new(),
        (None, Some(live)) => live.dependencies.clone(),
        (Some(declared), Some(live)) => live
            .dependencies
            .difference(&declared.dependencies)
            .cloned()
            .collect(),
    };

    PackageDiffResult {
        is_identical,
        declared_text: declared.map(EnvironmentSpec::to_text),
        live_text: live.map(EnvironmentSpec::to_text),
        extra_in_live,
    }
}
