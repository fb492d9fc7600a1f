// Runtime: turning specs into running, ready containers and tearing them down.

mod client;
mod instance;

pub use client::RuntimeClient;
pub use instance::{ContainerInstance, ContainerState};
