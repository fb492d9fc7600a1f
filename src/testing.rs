// In-memory container engine for unit tests.

use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::docker::{BindMount, CancelToken, ContainerEngine, EngineError, OutputLine, StreamEnd};
use crate::spec::{ContainerSpec, PortSpec};

/// Records every call and plays back scripted output.
///
/// Lines emitted before anyone follows the logs are kept and replayed to
/// each new follower, like `docker logs --follow` does.
#[derive(Default)]
pub(crate) struct FakeEngine {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    next_id: u32,
    ports: BTreeMap<PortSpec, u16>,
    created: Vec<(ContainerSpec, Vec<BindMount>)>,
    started: Vec<String>,
    removed: Vec<String>,
    execs: Vec<Vec<String>>,
    backlog: Vec<OutputLine>,
    followers: Vec<Sender<OutputLine>>,
    on_exec: Vec<OutputLine>,
    exec_delay: Option<Duration>,
    fail_create: Option<String>,
    fail_start: Option<String>,
    fail_exec: Option<String>,
    fail_port: Option<String>,
    fail_remove: Option<String>,
}

impl State {
    fn broadcast(&mut self, line: OutputLine) {
        self.followers.retain(|tx| tx.send(line.clone()).is_ok());
        self.backlog.push(line);
    }
}

impl FakeEngine {
    /// Unlisted ports map to `30000 + port`.
    pub(crate) fn with_ports(ports: impl IntoIterator<Item = (PortSpec, u16)>) -> Self {
        let engine = Self::default();
        engine.lock().ports.extend(ports);
        engine
    }

    pub(crate) fn emit(&self, line: OutputLine) {
        self.lock().broadcast(line);
    }

    /// Lines the next successful exec writes to the container output.
    pub(crate) fn on_exec(&self, lines: impl IntoIterator<Item = OutputLine>) {
        self.lock().on_exec.extend(lines);
    }

    /// Close every log stream, as if the container exited.
    pub(crate) fn finish_logs(&self) {
        let mut state = self.lock();
        let end = OutputLine::Done(StreamEnd {
            exit_code: Some(0),
            cancelled: false,
        });
        for tx in state.followers.drain(..) {
            let _ = tx.send(end.clone());
        }
    }

    pub(crate) fn fail_create(&self, message: &str) {
        self.lock().fail_create = Some(message.to_string());
    }

    pub(crate) fn fail_start(&self, message: &str) {
        self.lock().fail_start = Some(message.to_string());
    }

    pub(crate) fn fail_exec(&self, message: &str) {
        self.lock().fail_exec = Some(message.to_string());
    }

    /// Every exec blocks this long before it takes effect.
    pub(crate) fn delay_exec(&self, delay: Duration) {
        self.lock().exec_delay = Some(delay);
    }

    pub(crate) fn fail_port(&self, message: &str) {
        self.lock().fail_port = Some(message.to_string());
    }

    pub(crate) fn fail_remove(&self, message: &str) {
        self.lock().fail_remove = Some(message.to_string());
    }

    pub(crate) fn created(&self) -> Vec<(ContainerSpec, Vec<BindMount>)> {
        self.lock().created.clone()
    }

    pub(crate) fn started(&self) -> Vec<String> {
        self.lock().started.clone()
    }

    pub(crate) fn removed(&self) -> Vec<String> {
        self.lock().removed.clone()
    }

    pub(crate) fn execs(&self) -> Vec<Vec<String>> {
        self.lock().execs.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ContainerEngine for FakeEngine {
    fn create(&self, spec: &ContainerSpec, mounts: &[BindMount]) -> Result<String, EngineError> {
        let mut state = self.lock();
        if let Some(message) = &state.fail_create {
            return Err(EngineError::new(message.clone()));
        }
        state.next_id += 1;
        state.created.push((spec.clone(), mounts.to_vec()));
        Ok(format!("fake{:08x}", state.next_id))
    }

    fn start(&self, id: &str) -> Result<(), EngineError> {
        let mut state = self.lock();
        if let Some(message) = &state.fail_start {
            return Err(EngineError::new(message.clone()));
        }
        state.started.push(id.to_string());
        Ok(())
    }

    fn port(&self, _id: &str, port: PortSpec) -> Result<u16, EngineError> {
        let state = self.lock();
        if let Some(message) = &state.fail_port {
            return Err(EngineError::new(message.clone()));
        }
        Ok(state
            .ports
            .get(&port)
            .copied()
            .unwrap_or(30000 + port.number % 30000))
    }

    fn exec(&self, _id: &str, command: &[String]) -> Result<(), EngineError> {
        let delay = {
            let mut state = self.lock();
            state.execs.push(command.to_vec());
            state.exec_delay
        };
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        let mut state = self.lock();
        if let Some(message) = &state.fail_exec {
            return Err(EngineError::new(message.clone()));
        }
        let lines: Vec<OutputLine> = state.on_exec.drain(..).collect();
        for line in lines {
            state.broadcast(line);
        }
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<(), EngineError> {
        let mut state = self.lock();
        if let Some(message) = &state.fail_remove {
            return Err(EngineError::new(message.clone()));
        }
        state.removed.push(id.to_string());
        Ok(())
    }

    fn follow_logs(&self, _id: &str, _cancel: CancelToken) -> Result<Receiver<OutputLine>, EngineError> {
        let (tx, rx) = mpsc::channel();
        let mut state = self.lock();
        for line in &state.backlog {
            let _ = tx.send(line.clone());
        }
        state.followers.push(tx);
        Ok(rx)
    }

    fn host(&self) -> String {
        "127.0.0.1".to_string()
    }
}
