// Readiness: wait strategy descriptors and the evaluator that gates on them.

mod evaluator;
mod strategy;

pub use evaluator::{Evaluator, WaitTarget};
pub use strategy::{DEFAULT_STARTUP_TIMEOUT, LogPattern, ReadinessTimeout, WaitStrategy};
