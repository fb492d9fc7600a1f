// Container output: following, buffering, and sentinel-based synchronization.

mod consumer;
mod sentinel;
mod types;

pub use consumer::LogConsumer;
pub use sentinel::Sentinel;
pub use types::{LogLine, Stream};
