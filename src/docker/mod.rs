// Container engine: the `docker` CLI behind a trait, streaming output, cancellation.

pub mod engine;
pub mod run;
pub mod types;

pub use engine::{ContainerEngine, DockerCli, ensure_available};
pub use types::{BindMount, CancelToken, EngineError, OutputLine, StreamEnd};
