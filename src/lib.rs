//! Ephemeral Kong gateway containers for integration tests.
//!
//! A test builds a [`spec::ContainerSpec`] from ordered [`spec::Customizer`]s,
//! hands it to a [`runtime::RuntimeClient`] which starts the container and
//! blocks until its [`wait::WaitStrategy`] is satisfied, then talks to the
//! gateway through the URLs from [`url::resolve`]. A [`logs::LogConsumer`]
//! gives the test an ordered view of container output, and
//! [`logs::LogConsumer::sync_and_wait`] flushes it deterministically before
//! teardown.
//!
//! ```no_run
//! use kongtest::gateway::{self, Gateway};
//! use kongtest::runtime::RuntimeClient;
//! use kongtest::spec::Customizer;
//!
//! # fn main() -> kongtest::Result<()> {
//! let client = RuntimeClient::docker()?;
//! let kong = Gateway::run(
//!     &client,
//!     gateway::DEFAULT_IMAGE,
//!     &[Customizer::env("KONG_LOG_LEVEL", "info")],
//! )?;
//! println!("admin API at {}", kong.admin_url()?);
//! kong.terminate()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod docker;
mod error;
pub mod gateway;
pub mod logs;
pub mod runtime;
pub mod spec;
pub mod telemetry;
pub mod url;
pub mod wait;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
