use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use super::types::{ContainerSpec, FileMount, PortSpec, SpecError};
use crate::wait::WaitStrategy;

type CustomFn = dyn Fn(ContainerSpec) -> Result<ContainerSpec, SpecError> + Send + Sync;

/// One step in building a [`ContainerSpec`].
///
/// A customizer takes a spec snapshot and returns the next one. Lists of
/// customizers are applied left to right, so for any key or path touched
/// twice the later customizer wins.
#[derive(Clone)]
pub enum Customizer {
    /// Replace the image reference.
    Image(String),
    /// Add ports to the exposed set.
    Expose(Vec<PortSpec>),
    /// Merge entries into the environment, overwriting existing keys.
    Env(Vec<(String, String)>),
    /// Add `item` to the comma-separated list held in env var `key`.
    AppendEnvList { key: String, item: String },
    /// Append a file mount.
    File(FileMount),
    /// Append arguments to the command.
    Args(Vec<String>),
    /// Replace the command.
    Command(Vec<String>),
    /// Replace the wait strategy.
    WaitFor(WaitStrategy),
    /// Require `strategy` in addition to the current wait strategy.
    AlsoWaitFor(WaitStrategy),
    /// Several customizers applied in order.
    Many(Vec<Customizer>),
    Custom(Arc<CustomFn>),
}

impl Customizer {
    pub fn image(image: impl Into<String>) -> Self {
        Customizer::Image(image.into())
    }

    pub fn expose(ports: impl IntoIterator<Item = PortSpec>) -> Self {
        Customizer::Expose(ports.into_iter().collect())
    }

    pub fn env(key: impl Into<String>, value: impl Into<String>) -> Self {
        Customizer::Env(vec![(key.into(), value.into())])
    }

    pub fn envs<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Customizer::Env(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn append_env_list(key: impl Into<String>, item: impl Into<String>) -> Self {
        Customizer::AppendEnvList {
            key: key.into(),
            item: item.into(),
        }
    }

    pub fn file(host_path: impl Into<PathBuf>, container_path: impl Into<String>, mode: u32) -> Self {
        Customizer::File(FileMount::new(host_path, container_path, mode))
    }

    pub fn args<S: Into<String>>(args: impl IntoIterator<Item = S>) -> Self {
        Customizer::Args(args.into_iter().map(Into::into).collect())
    }

    pub fn command<S: Into<String>>(command: impl IntoIterator<Item = S>) -> Self {
        Customizer::Command(command.into_iter().map(Into::into).collect())
    }

    pub fn wait_for(strategy: WaitStrategy) -> Self {
        Customizer::WaitFor(strategy)
    }

    pub fn also_wait_for(strategy: WaitStrategy) -> Self {
        Customizer::AlsoWaitFor(strategy)
    }

    pub fn many(customizers: impl IntoIterator<Item = Customizer>) -> Self {
        Customizer::Many(customizers.into_iter().collect())
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(ContainerSpec) -> Result<ContainerSpec, SpecError> + Send + Sync + 'static,
    {
        Customizer::Custom(Arc::new(f))
    }

    /// Produce the next spec snapshot.
    pub fn customize(&self, mut spec: ContainerSpec) -> Result<ContainerSpec, SpecError> {
        match self {
            Customizer::Image(image) => spec.image = image.clone(),
            Customizer::Expose(ports) => {
                for port in ports {
                    port.validate()?;
                    spec.exposed_ports.insert(*port);
                }
            }
            Customizer::Env(entries) => {
                for (key, value) in entries {
                    validate_env_key(key)?;
                    spec.env.insert(key.clone(), value.clone());
                }
            }
            Customizer::AppendEnvList { key, item } => {
                validate_env_key(key)?;
                let merged = append_list_item(spec.env.get(key).map(String::as_str), item);
                spec.env.insert(key.clone(), merged);
            }
            Customizer::File(mount) => {
                mount.validate()?;
                spec.files.push(mount.clone());
            }
            Customizer::Args(args) => spec.command.extend(args.iter().cloned()),
            Customizer::Command(command) => spec.command = command.clone(),
            Customizer::WaitFor(strategy) => spec.wait_strategy = strategy.clone(),
            Customizer::AlsoWaitFor(strategy) => {
                let current = std::mem::take(&mut spec.wait_strategy);
                spec.wait_strategy = current.and(strategy.clone());
            }
            Customizer::Many(customizers) => {
                for customizer in customizers {
                    spec = customizer.customize(spec)?;
                }
            }
            Customizer::Custom(f) => spec = f(spec)?,
        }
        Ok(spec)
    }
}

impl fmt::Debug for Customizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Customizer::Image(image) => f.debug_tuple("Image").field(image).finish(),
            Customizer::Expose(ports) => f.debug_tuple("Expose").field(ports).finish(),
            Customizer::Env(entries) => f.debug_tuple("Env").field(entries).finish(),
            Customizer::AppendEnvList { key, item } => f
                .debug_struct("AppendEnvList")
                .field("key", key)
                .field("item", item)
                .finish(),
            Customizer::File(mount) => f.debug_tuple("File").field(mount).finish(),
            Customizer::Args(args) => f.debug_tuple("Args").field(args).finish(),
            Customizer::Command(command) => f.debug_tuple("Command").field(command).finish(),
            Customizer::WaitFor(strategy) => f.debug_tuple("WaitFor").field(strategy).finish(),
            Customizer::AlsoWaitFor(strategy) => {
                f.debug_tuple("AlsoWaitFor").field(strategy).finish()
            }
            Customizer::Many(customizers) => f.debug_tuple("Many").field(customizers).finish(),
            Customizer::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Apply `customizers` in order to a copy of `base`. `base` is left as is.
pub fn apply_all(base: &ContainerSpec, customizers: &[Customizer]) -> Result<ContainerSpec, SpecError> {
    customizers
        .iter()
        .try_fold(base.clone(), |spec, customizer| customizer.customize(spec))
}

fn validate_env_key(key: &str) -> Result<(), SpecError> {
    if key.is_empty() || key.contains('=') || key.contains('\0') {
        return Err(SpecError::InvalidEnvKey(key.to_string()));
    }
    Ok(())
}

fn append_list_item(current: Option<&str>, item: &str) -> String {
    let mut items: Vec<&str> = current
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    let item = item.trim();
    if !item.is_empty() && !items.contains(&item) {
        items.push(item);
    }
    items.join(",")
}
