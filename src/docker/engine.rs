use std::process::{Command, Stdio};
use std::sync::mpsc::Receiver;
use std::time::Duration;

use tracing::info;

use super::run;
use super::types::{BindMount, CancelToken, EngineError, OutputLine};
use crate::spec::{ContainerSpec, PortSpec};

/// Label put on every container the harness creates, valued with the
/// creating process id, so leftovers can be found with `docker ps --filter`.
pub const SESSION_LABEL: &str = "org.kongtest.session";

pub const DEFAULT_DOCKER_BINARY: &str = "docker";
pub const DEFAULT_ENGINE_TIMEOUT: Duration = Duration::from_secs(300);

/// The container operations the runtime needs.
///
/// Implementations must be safe to share between threads: independent
/// instances started from parallel tests all go through one engine.
pub trait ContainerEngine: Send + Sync {
    /// Create (but do not start) a container. Returns its id.
    fn create(&self, spec: &ContainerSpec, mounts: &[BindMount]) -> Result<String, EngineError>;

    fn start(&self, id: &str) -> Result<(), EngineError>;

    /// Host port the engine published `port` on.
    fn port(&self, id: &str, port: PortSpec) -> Result<u16, EngineError>;

    /// Run `command` inside the running container and wait for it.
    fn exec(&self, id: &str, command: &[String]) -> Result<(), EngineError>;

    /// Stop and delete the container. Removing a container that no longer
    /// exists succeeds.
    fn remove(&self, id: &str) -> Result<(), EngineError>;

    /// Stream the container's output from its first line, until it exits or
    /// `cancel` fires.
    fn follow_logs(&self, id: &str, cancel: CancelToken) -> Result<Receiver<OutputLine>, EngineError>;

    /// Host name under which published ports are reachable.
    fn host(&self) -> String;
}

/// Verify that the Docker daemon is reachable.
pub fn ensure_available(binary: &str) -> Result<(), EngineError> {
    let status = Command::new(binary)
        .args(["version", "--format", "{{.Server.Version}}"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|e| EngineError::new(format!("failed to invoke `{binary}`: is it installed and on PATH? ({e})")))?;

    if !status.success() {
        return Err(EngineError::new(format!(
            "docker daemon is not running (exit {status})"
        )));
    }
    Ok(())
}

/// [`ContainerEngine`] backed by the `docker` command line.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
    timeout: Duration,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new(DEFAULT_DOCKER_BINARY, DEFAULT_ENGINE_TIMEOUT)
    }
}

impl DockerCli {
    /// `timeout` bounds every individual engine call, image pulls included.
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    fn docker<I, S>(&self, args: I) -> Result<String, EngineError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        run::output(&self.binary, &args, self.timeout)
    }
}

impl ContainerEngine for DockerCli {
    fn create(&self, spec: &ContainerSpec, mounts: &[BindMount]) -> Result<String, EngineError> {
        let id = self.docker(create_args(spec, mounts))?.trim().to_string();
        if id.is_empty() {
            return Err(EngineError::new("docker create printed no container id"));
        }
        info!(id = %short_id(&id), image = spec.image(), "created container");
        Ok(id)
    }

    fn start(&self, id: &str) -> Result<(), EngineError> {
        self.docker(["start", id])?;
        Ok(())
    }

    fn port(&self, id: &str, port: PortSpec) -> Result<u16, EngineError> {
        let out = self.docker(["port".to_string(), id.to_string(), port.to_string()])?;
        parse_port_output(&out)
            .ok_or_else(|| EngineError::new(format!("no host binding for {port} in {out:?}")))
    }

    fn exec(&self, id: &str, command: &[String]) -> Result<(), EngineError> {
        let mut args = vec!["exec".to_string(), id.to_string()];
        args.extend(command.iter().cloned());
        self.docker(args)?;
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<(), EngineError> {
        match self.docker(["rm", "--force", "--volumes", id]) {
            Ok(_) => {
                info!(id = %short_id(id), "removed container");
                Ok(())
            }
            Err(e) if e.0.contains("No such container") => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn follow_logs(&self, id: &str, cancel: CancelToken) -> Result<Receiver<OutputLine>, EngineError> {
        let args = vec!["logs".to_string(), "--follow".to_string(), id.to_string()];
        run::spawn(&self.binary, &args, cancel)
    }

    fn host(&self) -> String {
        host_from_docker_host(std::env::var("DOCKER_HOST").ok().as_deref())
    }
}

/// Build the argument list for `docker create`.
pub fn create_args(spec: &ContainerSpec, mounts: &[BindMount]) -> Vec<String> {
    let mut args = vec![
        "create".to_string(),
        "--label".to_string(),
        format!("{SESSION_LABEL}={}", std::process::id()),
    ];
    for port in spec.exposed_ports() {
        // No host port: the engine picks a free one.
        args.push("--publish".into());
        args.push(port.to_string());
    }
    for (key, value) in spec.env() {
        args.push("--env".into());
        args.push(format!("{key}={value}"));
    }
    for mount in mounts {
        args.push("--volume".into());
        args.push(format!("{}:{}:ro", mount.source.display(), mount.target));
    }
    args.push(spec.image().to_string());
    args.extend(spec.command().iter().cloned());
    args
}

/// First non-zero port in `docker port` output such as
/// `0.0.0.0:49153\n[::]:49153`.
fn parse_port_output(out: &str) -> Option<u16> {
    out.lines()
        .filter_map(|line| line.trim().rsplit(':').next()?.parse::<u16>().ok())
        .find(|&port| port != 0)
}

/// `tcp://10.0.0.5:2376` → `10.0.0.5`. Local sockets and unset → `localhost`.
fn host_from_docker_host(docker_host: Option<&str>) -> String {
    let Some(rest) = docker_host.and_then(|h| {
        h.strip_prefix("tcp://")
            .or_else(|| h.strip_prefix("http://"))
            .or_else(|| h.strip_prefix("https://"))
    }) else {
        return "localhost".to_string();
    };
    let authority = rest.split('/').next().unwrap_or_default();
    let host = match authority.strip_prefix('[') {
        Some(v6) => v6.split(']').next().unwrap_or_default(),
        None => authority.rsplit_once(':').map_or(authority, |(h, _)| h),
    };
    if host.is_empty() {
        "localhost".to_string()
    } else {
        host.to_string()
    }
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}
