use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tempfile::TempDir;
use tracing::warn;

use crate::docker::ContainerEngine;
use crate::error::{Error, Result};
use crate::logs::LogConsumer;
use crate::spec::PortSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Running,
    Terminated,
}

/// A container the runtime created.
///
/// The port table is filled in once at start and never changes afterwards.
/// Dropping an instance that was not terminated removes the container, so
/// a test that panics halfway still cleans up.
pub struct ContainerInstance {
    id: String,
    host: String,
    pub(crate) port_mappings: BTreeMap<PortSpec, u16>,
    engine: Arc<dyn ContainerEngine>,
    terminated: AtomicBool,
    /// Bind-mount sources; must outlive the container.
    staging: Option<TempDir>,
}

impl ContainerInstance {
    pub(crate) fn new(
        id: String,
        host: String,
        engine: Arc<dyn ContainerEngine>,
        staging: Option<TempDir>,
    ) -> Self {
        Self {
            id,
            host,
            port_mappings: BTreeMap::new(),
            engine,
            terminated: AtomicBool::new(false),
            staging,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port_mappings(&self) -> &BTreeMap<PortSpec, u16> {
        &self.port_mappings
    }

    /// Host port for a port the spec exposed. Never zero.
    pub fn mapped_port(&self, port: PortSpec) -> Result<u16> {
        self.port_mappings
            .get(&port)
            .copied()
            .filter(|&p| p != 0)
            .ok_or(Error::PortNotExposed(port))
    }

    pub fn state(&self) -> ContainerState {
        if self.terminated.load(Ordering::Acquire) {
            ContainerState::Terminated
        } else {
            ContainerState::Running
        }
    }

    /// Remove the container. Only the first call reaches the engine; later
    /// calls return `Ok(())` without side effects.
    pub fn terminate(&self) -> Result<()> {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.engine
            .remove(&self.id)
            .map_err(|source| Error::Termination {
                id: self.id.clone(),
                source,
            })
    }

    pub fn follow_logs(&self) -> Result<LogConsumer> {
        LogConsumer::start(Arc::clone(&self.engine), self.id.clone())
    }

    /// Run a command inside the container.
    pub fn exec<S: AsRef<str>>(&self, command: &[S]) -> Result<()> {
        let command: Vec<String> = command.iter().map(|s| s.as_ref().to_string()).collect();
        Ok(self.engine.exec(&self.id, &command)?)
    }

    /// Give up ownership: the container keeps running after this handle is
    /// gone. Returns its id for manual inspection.
    pub fn keep(mut self) -> String {
        self.terminated.store(true, Ordering::Release);
        if let Some(staging) = self.staging.take() {
            let _ = staging.keep();
        }
        self.id.clone()
    }
}

impl fmt::Debug for ContainerInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerInstance")
            .field("id", &self.id)
            .field("host", &self.host)
            .field("port_mappings", &self.port_mappings)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Drop for ContainerInstance {
    fn drop(&mut self) {
        if let Err(e) = self.terminate() {
            warn!(error = %e, "cleanup of dropped container failed");
        }
    }
}
