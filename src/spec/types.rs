use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

use crate::wait::WaitStrategy;

/// Reasons a spec cannot be built. Raised while customizers are applied,
/// before anything touches the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecError {
    #[error("container path {0:?} must be absolute")]
    InvalidMountPath(String),

    #[error("file mode {mode:#o} for {path:?} is not a permission mask")]
    InvalidFileMode { path: String, mode: u32 },

    #[error("invalid port {0:?}")]
    InvalidPort(String),

    #[error("invalid environment key {0:?}")]
    InvalidEnvKey(String),

    #[error("invalid log pattern {pattern:?}: {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("wait strategy targets port {0}, which is not exposed")]
    UnexposedWaitPort(PortSpec),

    #[error("no image set")]
    MissingImage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

/// A container-side port, e.g. `8001/tcp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortSpec {
    pub number: u16,
    pub protocol: Protocol,
}

impl PortSpec {
    pub const fn tcp(number: u16) -> Self {
        Self {
            number,
            protocol: Protocol::Tcp,
        }
    }

    pub const fn udp(number: u16) -> Self {
        Self {
            number,
            protocol: Protocol::Udp,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), SpecError> {
        if self.number == 0 {
            return Err(SpecError::InvalidPort(self.to_string()));
        }
        Ok(())
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.number, self.protocol.as_str())
    }
}

impl FromStr for PortSpec {
    type Err = SpecError;

    /// Accepts `8001` (tcp implied), `8001/tcp` and `8001/udp`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SpecError::InvalidPort(s.to_string());
        let (number, protocol) = match s.split_once('/') {
            Some((n, p)) => (n, p),
            None => (s, "tcp"),
        };
        let protocol = match protocol.to_ascii_lowercase().as_str() {
            "tcp" => Protocol::Tcp,
            "udp" => Protocol::Udp,
            _ => return Err(invalid()),
        };
        let number: u16 = number.trim().parse().map_err(|_| invalid())?;
        let port = PortSpec { number, protocol };
        port.validate()?;
        Ok(port)
    }
}

/// A host file to place inside the container before it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMount {
    pub host_path: PathBuf,
    /// Always a POSIX path, whatever the host platform.
    pub container_path: String,
    /// Permission bits the file carries inside the container.
    pub mode: u32,
}

impl FileMount {
    pub fn new(host_path: impl Into<PathBuf>, container_path: impl Into<String>, mode: u32) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            mode,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), SpecError> {
        if !self.container_path.starts_with('/') {
            return Err(SpecError::InvalidMountPath(self.container_path.clone()));
        }
        if self.mode > 0o7777 {
            return Err(SpecError::InvalidFileMode {
                path: self.container_path.clone(),
                mode: self.mode,
            });
        }
        Ok(())
    }
}

/// Everything needed to launch one container.
///
/// Fields are only reachable through accessors; a spec changes only by
/// running [`Customizer`](super::Customizer)s over it, each of which yields a
/// new snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerSpec {
    pub(crate) image: String,
    pub(crate) exposed_ports: BTreeSet<PortSpec>,
    pub(crate) env: BTreeMap<String, String>,
    pub(crate) files: Vec<FileMount>,
    pub(crate) command: Vec<String>,
    pub(crate) wait_strategy: WaitStrategy,
}

impl ContainerSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Self::default()
        }
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn exposed_ports(&self) -> &BTreeSet<PortSpec> {
        &self.exposed_ports
    }

    pub fn is_exposed(&self, port: PortSpec) -> bool {
        self.exposed_ports.contains(&port)
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(String::as_str)
    }

    /// Every mount in application order, shadowed ones included.
    pub fn files(&self) -> &[FileMount] {
        &self.files
    }

    /// One mount per container path, the last one applied winning. Paths
    /// keep the order in which they first appeared.
    pub fn effective_files(&self) -> Vec<&FileMount> {
        let mut order: Vec<&str> = Vec::new();
        let mut latest: HashMap<&str, &FileMount> = HashMap::new();
        for mount in &self.files {
            if latest.insert(mount.container_path.as_str(), mount).is_none() {
                order.push(&mount.container_path);
            }
        }
        order
            .into_iter()
            .filter_map(|path| latest.get(path).copied())
            .collect()
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    pub fn wait_strategy(&self) -> &WaitStrategy {
        &self.wait_strategy
    }

    /// Checks that hold across customizers rather than within one.
    pub fn validate(&self) -> Result<(), SpecError> {
        if self.image.trim().is_empty() {
            return Err(SpecError::MissingImage);
        }
        if let Some(port) = self
            .wait_strategy
            .ports()
            .into_iter()
            .find(|p| !self.exposed_ports.contains(p))
        {
            return Err(SpecError::UnexposedWaitPort(port));
        }
        Ok(())
    }
}
