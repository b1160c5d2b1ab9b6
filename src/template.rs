//! `{{ jproject.<field> }}` substitution in user-provided strings (default paths,
//! file destinations).

use regex::{NoExpand, RegexBuilder};
use serde_json::{Map, Value};

use crate::models::ProjectModel;

/// Template values of a project: its fields plus `dirname`.
pub fn project_info(project: &ProjectModel) -> Map<String, Value> {
    let mut info = match serde_json::to_value(project) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    info.insert("dirname".to_string(), Value::String(dirname(&project.path)));
    info
}

/// Parent folder of a `/`-separated path; empty for a top-level entry.
pub fn dirname(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some(("", _)) => "/".to_string(),
        Some((head, _)) => head.to_string(),
        None => String::new(),
    }
}

/// Render `template` with the project values.
///
/// Field names match case-insensitively and whitespace inside the braces is ignored.
/// Tokens naming unknown fields stay in place; without a project the template is
/// returned unchanged.
pub fn render_string_template(template: &str, project: Option<&ProjectModel>) -> String {
    let Some(project) = project else {
        return template.to_string();
    };

    let mut rendered = template.to_string();
    for (key, value) in project_info(project) {
        let pattern = format!(r"\{{\{{\s*jproject\.{}\s*\}}\}}", regex::escape(&key));
        let Ok(regex) = RegexBuilder::new(&pattern).case_insensitive(true).build() else {
            continue;
        };
        let replacement = match value {
            Value::String(s) => s,
            other => other.to_string(),
        };
        rendered = regex
            .replace_all(&rendered, NoExpand(&replacement))
            .into_owned();
    }
    rendered
}
