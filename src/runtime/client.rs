use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tracing::{info, warn};

use super::instance::ContainerInstance;
use crate::config::HarnessConfig;
use crate::docker::{BindMount, ContainerEngine, DockerCli, EngineError, ensure_available};
use crate::error::{Error, Result};
use crate::logs::{LogConsumer, LogLine};
use crate::spec::{ContainerSpec, PortSpec};
use crate::wait::{Evaluator, WaitTarget};

/// Launches containers from specs and manages their lifecycle.
///
/// Cloning is cheap; clones share the engine.
#[derive(Clone)]
pub struct RuntimeClient {
    engine: Arc<dyn ContainerEngine>,
    evaluator: Evaluator,
}

impl RuntimeClient {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self {
            engine,
            evaluator: Evaluator::default(),
        }
    }

    /// A client over the local `docker` CLI, after checking the daemon answers.
    pub fn docker() -> Result<Self> {
        let cli = DockerCli::default();
        ensure_available(cli.binary())?;
        Ok(Self::new(Arc::new(cli)))
    }

    pub fn from_config(cfg: &HarnessConfig) -> Result<Self> {
        let cli = DockerCli::new(cfg.docker_binary.clone(), cfg.engine_timeout());
        ensure_available(cli.binary())?;
        Ok(Self::new(Arc::new(cli)).with_evaluator(Evaluator::new(cfg.poll_interval())))
    }

    pub fn with_evaluator(mut self, evaluator: Evaluator) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn engine(&self) -> &Arc<dyn ContainerEngine> {
        &self.engine
    }

    /// Create and start a container, then block until its wait strategy is
    /// satisfied.
    ///
    /// A returned instance is ready. If readiness times out the container is
    /// left running and handed back inside [`Error::NotReady`].
    pub fn start(&self, spec: ContainerSpec) -> Result<ContainerInstance> {
        spec.validate()?;
        let (staging, mounts) = stage_files(&spec)?;

        let id = self
            .engine
            .create(&spec, &mounts)
            .map_err(|source| Error::Start {
                stage: "create",
                source,
            })?;
        // From here on dropping `instance` removes the container.
        let mut instance =
            ContainerInstance::new(id, self.engine.host(), Arc::clone(&self.engine), staging);

        self.engine
            .start(instance.id())
            .map_err(|source| Error::Start {
                stage: "start",
                source,
            })?;

        for port in spec.exposed_ports() {
            let mapped = self
                .engine
                .port(instance.id(), *port)
                .map_err(|source| Error::Start {
                    stage: "inspect",
                    source,
                })?;
            instance.port_mappings.insert(*port, mapped);
        }

        let readiness = {
            let logs = if spec.wait_strategy().needs_logs() {
                Some(instance.follow_logs()?)
            } else {
                None
            };
            let target = StartingContainer {
                instance: &instance,
                logs: logs.as_ref(),
            };
            self.evaluator.evaluate(spec.wait_strategy(), &target)
        };

        match readiness {
            Ok(()) => {
                info!(id = instance.id(), image = spec.image(), "container ready");
                Ok(instance)
            }
            Err(timeout) => {
                warn!(id = instance.id(), %timeout, "container not ready; leaving it running");
                Err(Error::NotReady {
                    timeout,
                    instance: Box::new(instance),
                })
            }
        }
    }

    pub fn host<'a>(&self, instance: &'a ContainerInstance) -> &'a str {
        instance.host()
    }

    pub fn mapped_port(&self, instance: &ContainerInstance, port: PortSpec) -> Result<u16> {
        instance.mapped_port(port)
    }

    pub fn terminate(&self, instance: &ContainerInstance) -> Result<()> {
        instance.terminate()
    }

    pub fn follow_logs(&self, instance: &ContainerInstance) -> Result<LogConsumer> {
        instance.follow_logs()
    }

    /// Upper bound on how long `start` spends waiting for readiness.
    pub fn readiness_budget(&self, spec: &ContainerSpec) -> Duration {
        spec.wait_strategy().deadline()
    }
}

/// The view of a starting container handed to the evaluator.
struct StartingContainer<'a> {
    instance: &'a ContainerInstance,
    logs: Option<&'a LogConsumer>,
}

impl WaitTarget for StartingContainer<'_> {
    fn host(&self) -> &str {
        self.instance.host()
    }

    fn mapped_port(&self, port: PortSpec) -> Option<u16> {
        self.instance.mapped_port(port).ok()
    }

    fn subscribe_logs(&self) -> Option<std::sync::mpsc::Receiver<LogLine>> {
        self.logs.map(LogConsumer::subscribe_with_backlog)
    }
}

fn stage_files(spec: &ContainerSpec) -> Result<(Option<TempDir>, Vec<BindMount>)> {
    stage_files_in(spec, &std::env::temp_dir())
}

/// Copy each effective mount into a private directory under `root` with its
/// requested mode, ready to be bound into the container.
fn stage_files_in(spec: &ContainerSpec, root: &Path) -> Result<(Option<TempDir>, Vec<BindMount>)> {
    let files = spec.effective_files();
    if files.is_empty() {
        return Ok((None, Vec::new()));
    }

    let staging_error = |path: &Path, e: std::io::Error| Error::Start {
        stage: "stage files for",
        source: EngineError::new(format!("{}: {e}", path.display())),
    };

    let dir = tempfile::Builder::new()
        .prefix("kongtest-")
        .tempdir_in(root)
        .map_err(|e| staging_error(root, e))?;
    let mut mounts = Vec::with_capacity(files.len());
    for (i, mount) in files.into_iter().enumerate() {
        let name = mount
            .host_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        let staged = dir.path().join(format!("{i}-{name}"));
        std::fs::copy(&mount.host_path, &staged).map_err(|e| staging_error(&mount.host_path, e))?;
        set_mode(&staged, mount.mode).map_err(|e| staging_error(&staged, e))?;
        mounts.push(BindMount {
            source: staged,
            target: mount.container_path.clone(),
        });
    }
    Ok((Some(dir), mounts))
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}
