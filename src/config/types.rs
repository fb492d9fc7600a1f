use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::docker::engine::{DEFAULT_DOCKER_BINARY, DEFAULT_ENGINE_TIMEOUT};
use crate::gateway::{self, ADMIN_PORT, DEFAULT_IMAGE};
use crate::spec::Customizer;
use crate::wait::{DEFAULT_STARTUP_TIMEOUT, WaitStrategy};

pub const IMAGE_ENV: &str = "KONGTEST_IMAGE";
pub const DOCKER_ENV: &str = "KONGTEST_DOCKER";

/// Harness settings, as read from `.kongtest.yaml`. Every field is optional
/// in the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub image: String,
    pub docker_binary: String,
    /// Bound on a single engine call, image pulls included.
    pub engine_timeout_secs: u64,
    pub startup_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub sync_timeout_secs: u64,
    pub declarative_config: Option<PathBuf>,
    /// Plugin-server name → host binary.
    pub plugins: BTreeMap<String, PathBuf>,
    /// Filter name → host `.wasm` file.
    pub wasm_filters: BTreeMap<String, PathBuf>,
    pub expose_manager: bool,
    /// Applied last, so these win over everything above.
    pub env: BTreeMap<String, String>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            docker_binary: DEFAULT_DOCKER_BINARY.to_string(),
            engine_timeout_secs: DEFAULT_ENGINE_TIMEOUT.as_secs(),
            startup_timeout_secs: DEFAULT_STARTUP_TIMEOUT.as_secs(),
            poll_interval_ms: 100,
            sync_timeout_secs: 10,
            declarative_config: None,
            plugins: BTreeMap::new(),
            wasm_filters: BTreeMap::new(),
            expose_manager: false,
            env: BTreeMap::new(),
        }
    }
}

impl HarnessConfig {
    pub fn engine_timeout(&self) -> Duration {
        Duration::from_secs(self.engine_timeout_secs)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }

    /// Override fields from `KONGTEST_*` variables, read through `lookup`.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(image) = non_empty(IMAGE_ENV) {
            self.image = image;
        }
        if let Some(binary) = non_empty(DOCKER_ENV) {
            self.docker_binary = binary;
        }
    }

    /// Make relative host paths relative to `base` instead of the working
    /// directory.
    pub fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        if let Some(path) = self.declarative_config.as_mut() {
            resolve(path);
        }
        self.plugins.values_mut().for_each(resolve);
        self.wasm_filters.values_mut().for_each(resolve);
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.image.trim().is_empty() {
            return Err("image must not be empty".into());
        }
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be a positive integer".into());
        }
        if self.startup_timeout_secs == 0 {
            return Err("startup_timeout_secs must be a positive integer".into());
        }
        Ok(())
    }

    /// The gateway customizers this config describes, to be applied on top
    /// of [`gateway::base_spec`].
    pub fn customizers(&self) -> Vec<Customizer> {
        let mut out = vec![Customizer::wait_for(
            WaitStrategy::port_open(ADMIN_PORT).with_timeout(self.startup_timeout()),
        )];
        if let Some(path) = &self.declarative_config {
            out.push(gateway::declarative_config(path));
        }
        for (name, binary) in &self.plugins {
            out.push(gateway::plugin_server(name, binary));
        }
        for (name, wasm) in &self.wasm_filters {
            out.push(gateway::wasm_filter(name, wasm));
        }
        if self.expose_manager {
            out.push(gateway::expose_manager());
        }
        if !self.env.is_empty() {
            out.push(Customizer::envs(self.env.clone()));
        }
        out
    }
}
