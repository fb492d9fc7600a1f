//! Error types for kongtest

use std::time::Duration;

use thiserror::Error;

use crate::docker::EngineError;
use crate::runtime::ContainerInstance;
use crate::spec::{PortSpec, SpecError};
use crate::wait::ReadinessTimeout;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid container spec: {0}")]
    Spec(#[from] SpecError),

    /// The engine could not bring the container up. Whatever was created has
    /// already been removed.
    #[error("failed to {stage} container: {source}")]
    Start {
        stage: &'static str,
        #[source]
        source: EngineError,
    },

    /// The container started but never became ready. It is still running;
    /// dropping `instance` removes it.
    #[error("container {} not ready: {timeout}", .instance.id())]
    NotReady {
        timeout: ReadinessTimeout,
        instance: Box<ContainerInstance>,
    },

    #[error("port {0} is not exposed by the container spec")]
    PortNotExposed(PortSpec),

    #[error("sentinel {token:?} not observed within {timeout:?} ({buffered} lines buffered)")]
    SyncTimeout {
        token: String,
        timeout: Duration,
        buffered: usize,
    },

    #[error("failed to terminate container {id}: {source}")]
    Termination {
        id: String,
        #[source]
        source: EngineError,
    },

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The instance a readiness failure left running, if any.
    pub fn into_unready_instance(self) -> Option<ContainerInstance> {
        match self {
            Error::NotReady { instance, .. } => Some(*instance),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
