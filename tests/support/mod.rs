//! In-memory collaborators shared by the integration specs.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use project_sync::bus::Signal;
use project_sync::differ::package_name;
use project_sync::error::{Result, SyncError};
use project_sync::models::{EnvironmentInfo, HeadChange, PackageChange, ProjectModel};
use project_sync::services::{
    join_path, ClientError, EnvironmentManager, FileContents, ProjectService, StateStore,
    VersionControl,
};

pub const CONFIG_FILE: &str = "project.json";

// ─────────────────────────────────────────────────────────────────────────────
// Files
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryFiles {
    files: Mutex<HashMap<String, String>>,
    saves: AtomicUsize,
}

impl MemoryFiles {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put(&self, path: &str, content: &str) {
        self.files.lock().insert(path.to_string(), content.to_string());
    }

    pub fn read(&self, path: &str) -> Option<String> {
        self.files.lock().get(path).cloned()
    }

    pub fn remove_tree(&self, prefix: &str) {
        let folder = format!("{}/", prefix.trim_end_matches('/'));
        self.files.lock().retain(|path, _| !path.starts_with(&folder));
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FileContents for MemoryFiles {
    async fn get(&self, path: &str) -> Result<Option<String>> {
        Ok(self.read(path))
    }

    async fn save(&self, path: &str, content: &str) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.put(path, content);
        Ok(())
    }
}

/// Write a project folder holding a configuration file.
pub fn seed_project(files: &MemoryFiles, path: &str, configuration: Value) {
    files.put(
        &join_path(path, CONFIG_FILE),
        &serde_json::to_string_pretty(&configuration).unwrap(),
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Project service
// ─────────────────────────────────────────────────────────────────────────────

/// Reads projects from the configuration files of a [`MemoryFiles`], the way the
/// server reads them from disk.
pub struct FakeProjects {
    files: Arc<MemoryFiles>,
    failing: Mutex<HashSet<String>>,
    opens: AtomicUsize,
    deletes: Mutex<Vec<String>>,
}

impl FakeProjects {
    pub fn new(files: Arc<MemoryFiles>) -> Arc<Self> {
        Arc::new(Self {
            files,
            failing: Mutex::new(HashSet::new()),
            opens: AtomicUsize::new(0),
            deletes: Mutex::new(Vec::new()),
        })
    }

    pub fn fail_on(&self, path: &str) {
        self.failing.lock().insert(path.to_string());
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deletes.lock().clone()
    }

    fn check(&self, path: &str) -> Result<()> {
        if self.failing.lock().contains(path) {
            return Err(SyncError::Service(ClientError::Server(format!(
                "cannot access {}",
                path
            ))));
        }
        Ok(())
    }
}

#[async_trait]
impl ProjectService for FakeProjects {
    async fn create(&self, path: &str, params: &Value) -> Result<ProjectModel> {
        self.check(path)?;
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("project")
            .to_string();
        let folder = join_path(path, &name);
        seed_project(&self.files, &folder, serde_json::json!({ "name": name }));
        Ok(ProjectModel::new(name, folder))
    }

    async fn open(&self, path: &str) -> Result<Option<ProjectModel>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if path.is_empty() {
            return Ok(None);
        }
        self.check(path)?;
        let text = self
            .files
            .read(&join_path(path, CONFIG_FILE))
            .ok_or_else(|| SyncError::Service(ClientError::NotFound(path.to_string())))?;
        let mut project: ProjectModel = serde_json::from_str(&text)
            .map_err(|e| SyncError::Service(ClientError::BadRequest(e.to_string())))?;
        project.path = path.to_string();
        Ok(Some(project))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.check(path)?;
        self.deletes.lock().push(path.to_string());
        self.files.remove_tree(path);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// State
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryState {
    values: Mutex<HashMap<String, Value>>,
    fail_fetch: bool,
}

impl MemoryState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with(key: &str, value: Value) -> Arc<Self> {
        let state = Self::default();
        state.values.lock().insert(key.to_string(), value);
        Arc::new(state)
    }

    pub fn broken() -> Arc<Self> {
        Arc::new(Self {
            fail_fetch: true,
            ..Self::default()
        })
    }

    pub fn value(&self, key: &str) -> Option<Value> {
        self.values.lock().get(key).cloned()
    }
}

#[async_trait]
impl StateStore for MemoryState {
    async fn fetch(&self, key: &str) -> Result<Option<Value>> {
        if self.fail_fetch {
            return Err(SyncError::State("unreadable state".to_string()));
        }
        Ok(self.value(key))
    }

    async fn save(&self, key: &str, value: &Value) -> Result<()> {
        self.values.lock().insert(key.to_string(), value.clone());
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Environments
// ─────────────────────────────────────────────────────────────────────────────

/// Environment manager keeping dependency entries per environment name.
///
/// Mutations emit `package_changed` synchronously, like a manager reporting its own
/// operations.
pub struct FakeEnvironments {
    envs: Mutex<BTreeMap<String, Vec<String>>>,
    calls: Mutex<Vec<String>>,
    fail_update: Mutex<bool>,
    fail_remove_environment: Mutex<bool>,
    package_changed: Signal<PackageChange>,
}

impl FakeEnvironments {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            envs: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(Vec::new()),
            fail_update: Mutex::new(false),
            fail_remove_environment: Mutex::new(false),
            package_changed: Signal::new(),
        })
    }

    pub fn install(&self, name: &str, packages: &[&str]) {
        self.envs.lock().insert(
            name.to_string(),
            packages.iter().map(|p| p.to_string()).collect(),
        );
    }

    pub fn packages(&self, name: &str) -> Option<Vec<String>> {
        self.envs.lock().get(name).cloned()
    }

    /// Mutation calls, e.g. `remove banana pandas`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn fail_updates(&self) {
        *self.fail_update.lock() = true;
    }

    pub fn fail_environment_removal(&self) {
        *self.fail_remove_environment.lock() = true;
    }

    /// Change packages from outside, as a user running the manager by hand would.
    pub fn external_install(&self, name: &str, package: &str) {
        if let Some(packages) = self.envs.lock().get_mut(name) {
            packages.push(package.to_string());
        }
        self.package_changed.emit(&PackageChange {
            environment: name.to_string(),
        });
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }

    fn changed(&self, name: &str) {
        self.package_changed.emit(&PackageChange {
            environment: name.to_string(),
        });
    }
}

pub fn export_text(name: &str, packages: &[String]) -> String {
    let mut text = format!("name: {}\nchannels:\n  - defaults\ndependencies:\n", name);
    for package in packages {
        text.push_str(&format!("  - {}\n", package));
    }
    text.push_str(&format!("prefix: /opt/conda/envs/{}\n", name));
    text
}

pub fn spec_text(packages: &[&str]) -> String {
    let mut text = "channels:\n  - defaults\ndependencies:\n".to_string();
    for package in packages {
        text.push_str(&format!("  - {}\n", package));
    }
    text
}

fn spec_entries(spec: &str) -> Vec<String> {
    let document: serde_yaml::Value = serde_yaml::from_str(spec).unwrap_or_default();
    document
        .get("dependencies")
        .and_then(|d| d.as_sequence())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl EnvironmentManager for FakeEnvironments {
    async fn environments(&self) -> Result<Vec<EnvironmentInfo>> {
        Ok(self
            .envs
            .lock()
            .keys()
            .map(|name| EnvironmentInfo {
                name: name.clone(),
                dir: Some(format!("/opt/conda/envs/{}", name)),
            })
            .collect())
    }

    async fn create(&self, name: &str, packages: &[String]) -> Result<()> {
        self.record(format!("create {}", name));
        self.envs.lock().insert(name.to_string(), packages.to_vec());
        self.changed(name);
        Ok(())
    }

    async fn import(&self, name: &str, spec: &str, _filename: &str) -> Result<()> {
        self.record(format!("import {}", name));
        self.envs.lock().insert(name.to_string(), spec_entries(spec));
        self.changed(name);
        Ok(())
    }

    async fn update(&self, name: &str, spec: &str, _filename: &str) -> Result<()> {
        self.record(format!("update {}", name));
        if *self.fail_update.lock() {
            return Err(SyncError::environment(name, "solver failed"));
        }
        {
            let mut envs = self.envs.lock();
            let packages = envs
                .get_mut(name)
                .ok_or_else(|| SyncError::environment(name, "unknown environment"))?;
            for entry in spec_entries(spec) {
                let root = package_name(&entry).map(str::to_string);
                packages.retain(|p| package_name(p).map(str::to_string) != root);
                packages.push(entry);
            }
        }
        self.changed(name);
        Ok(())
    }

    async fn remove_packages(&self, packages: &[String], environment: &str) -> Result<()> {
        self.record(format!("remove {} {}", environment, packages.join(" ")));
        {
            let mut envs = self.envs.lock();
            let installed = envs
                .get_mut(environment)
                .ok_or_else(|| SyncError::environment(environment, "unknown environment"))?;
            installed.retain(|p| {
                package_name(p).is_some_and(|root| !packages.iter().any(|r| r == root))
            });
        }
        self.changed(environment);
        Ok(())
    }

    async fn export(&self, environment: &str, _full: bool) -> Result<String> {
        let envs = self.envs.lock();
        let packages = envs
            .get(environment)
            .ok_or_else(|| SyncError::environment(environment, "unknown environment"))?;
        Ok(export_text(environment, packages))
    }

    async fn develop_install(&self, environment: &str, path: &str) -> Result<()> {
        self.record(format!("develop {} {}", environment, path));
        self.changed(environment);
        Ok(())
    }

    async fn remove_environment(&self, name: &str) -> Result<()> {
        self.record(format!("remove-env {}", name));
        if *self.fail_remove_environment.lock() {
            return Err(SyncError::environment(name, "environment busy"));
        }
        self.envs.lock().remove(name);
        Ok(())
    }

    fn package_changed(&self) -> &Signal<PackageChange> {
        &self.package_changed
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Version control
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeVcs {
    calls: Mutex<Vec<String>>,
    tracked: Mutex<Option<String>>,
    head_changed: Signal<HeadChange>,
}

impl FakeVcs {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn tracked(&self) -> Option<String> {
        self.tracked.lock().clone()
    }

    pub fn checkout(&self, repository_path: &str, branch: &str) {
        self.head_changed.emit(&HeadChange {
            repository_path: repository_path.to_string(),
            branch: Some(branch.to_string()),
        });
    }
}

#[async_trait]
impl VersionControl for FakeVcs {
    async fn current_branch(&self) -> Result<Option<String>> {
        Ok(Some("main".to_string()))
    }

    async fn relative_file_path(&self) -> Result<String> {
        Ok(self.tracked().unwrap_or_default())
    }

    async fn init(&self, path: &str) -> Result<()> {
        self.calls.lock().push(format!("init {}", path));
        Ok(())
    }

    async fn clone_repository(&self, path: &str, url: &str) -> Result<()> {
        self.calls.lock().push(format!("clone {} {}", path, url));
        Ok(())
    }

    async fn commit_all(&self, path: &str, message: &str) -> Result<()> {
        self.calls.lock().push(format!("commit {} {}", path, message));
        Ok(())
    }

    fn track(&self, path: &str) {
        *self.tracked.lock() = Some(path.to_string());
    }

    fn head_changed(&self) -> &Signal<HeadChange> {
        &self.head_changed
    }
}
