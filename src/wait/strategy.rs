use std::fmt;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;

use crate::spec::{PortSpec, SpecError};

/// Startup budget for strategies that are not given one explicitly.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

/// A compiled log-line pattern. Compares by source text.
#[derive(Clone)]
pub struct LogPattern(Regex);

impl LogPattern {
    pub fn new(pattern: &str) -> Result<Self, SpecError> {
        Regex::new(pattern)
            .map(LogPattern)
            .map_err(|e| SpecError::InvalidPattern {
                pattern: pattern.to_string(),
                message: e.to_string(),
            })
    }

    pub fn is_match(&self, line: &str) -> bool {
        self.0.is_match(line)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl PartialEq for LogPattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl fmt::Debug for LogPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LogPattern").field(&self.as_str()).finish()
    }
}

/// When a freshly started container counts as ready.
///
/// Strategies are plain descriptors; every container start evaluates them
/// from scratch.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum WaitStrategy {
    /// Ready as soon as it is started.
    #[default]
    None,
    /// A TCP connection to the port's host mapping succeeds.
    PortOpen { port: PortSpec, timeout: Duration },
    /// A line matching `pattern` appears on stdout or stderr.
    LogContains {
        pattern: LogPattern,
        timeout: Duration,
    },
    /// Every child is satisfied. Children are evaluated concurrently.
    Composite(Vec<WaitStrategy>),
}

impl WaitStrategy {
    pub fn port_open(port: PortSpec) -> Self {
        WaitStrategy::PortOpen {
            port,
            timeout: DEFAULT_STARTUP_TIMEOUT,
        }
    }

    pub fn log_contains(pattern: &str) -> Result<Self, SpecError> {
        Ok(WaitStrategy::LogContains {
            pattern: LogPattern::new(pattern)?,
            timeout: DEFAULT_STARTUP_TIMEOUT,
        })
    }

    pub fn all(strategies: impl IntoIterator<Item = WaitStrategy>) -> Self {
        strategies
            .into_iter()
            .fold(WaitStrategy::None, |acc, s| acc.and(s))
    }

    /// Set the timeout of a leaf strategy, or of every leaf in a composite.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        match self {
            WaitStrategy::None => WaitStrategy::None,
            WaitStrategy::PortOpen { port, .. } => WaitStrategy::PortOpen { port, timeout },
            WaitStrategy::LogContains { pattern, .. } => {
                WaitStrategy::LogContains { pattern, timeout }
            }
            WaitStrategy::Composite(children) => WaitStrategy::Composite(
                children.into_iter().map(|c| c.with_timeout(timeout)).collect(),
            ),
        }
    }

    /// Require both `self` and `other`. Nested composites are flattened.
    pub fn and(self, other: WaitStrategy) -> Self {
        match (self, other) {
            (WaitStrategy::None, other) => other,
            (this, WaitStrategy::None) => this,
            (WaitStrategy::Composite(mut a), WaitStrategy::Composite(b)) => {
                a.extend(b);
                WaitStrategy::Composite(a)
            }
            (WaitStrategy::Composite(mut a), other) => {
                a.push(other);
                WaitStrategy::Composite(a)
            }
            (this, WaitStrategy::Composite(b)) => {
                let mut children = vec![this];
                children.extend(b);
                WaitStrategy::Composite(children)
            }
            (this, other) => WaitStrategy::Composite(vec![this, other]),
        }
    }

    /// Longest time evaluation may take. Composite children run side by
    /// side, so this is the maximum over children, not the sum.
    pub fn deadline(&self) -> Duration {
        match self {
            WaitStrategy::None => Duration::ZERO,
            WaitStrategy::PortOpen { timeout, .. } | WaitStrategy::LogContains { timeout, .. } => {
                *timeout
            }
            WaitStrategy::Composite(children) => children
                .iter()
                .map(WaitStrategy::deadline)
                .max()
                .unwrap_or(Duration::ZERO),
        }
    }

    /// Ports the strategy dials.
    pub fn ports(&self) -> Vec<PortSpec> {
        match self {
            WaitStrategy::PortOpen { port, .. } => vec![*port],
            WaitStrategy::Composite(children) => {
                children.iter().flat_map(WaitStrategy::ports).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Whether evaluation needs the container's output stream.
    pub fn needs_logs(&self) -> bool {
        match self {
            WaitStrategy::LogContains { .. } => true,
            WaitStrategy::Composite(children) => children.iter().any(WaitStrategy::needs_logs),
            _ => false,
        }
    }
}

impl fmt::Display for WaitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitStrategy::None => f.write_str("no wait"),
            WaitStrategy::PortOpen { port, timeout } => {
                write!(f, "port {port} open within {timeout:?}")
            }
            WaitStrategy::LogContains { pattern, timeout } => {
                write!(f, "log line matching /{}/ within {timeout:?}", pattern.as_str())
            }
            WaitStrategy::Composite(children) => {
                f.write_str("all of [")?;
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{child}")?;
                }
                f.write_str("]")
            }
        }
    }
}

/// A wait strategy that was not satisfied in time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{strategy} not satisfied after {elapsed:?}")]
pub struct ReadinessTimeout {
    pub strategy: String,
    pub elapsed: Duration,
}
