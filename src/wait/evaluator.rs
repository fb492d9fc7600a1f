use std::io::{ErrorKind, Read};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::strategy::{LogPattern, ReadinessTimeout, WaitStrategy};
use crate::logs::LogLine;
use crate::spec::PortSpec;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const MAX_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
/// How long a fresh connection must stay open before the port counts as
/// served. A port forwarder with nothing behind it accepts and then closes
/// immediately.
const PROBE_READ_TIMEOUT: Duration = Duration::from_millis(50);

/// What the evaluator can observe about a started container.
pub trait WaitTarget: Sync {
    fn host(&self) -> &str;

    /// Host port the engine mapped `port` to, if it has one yet.
    fn mapped_port(&self, port: PortSpec) -> Option<u16>;

    /// A receiver of the container's output from its first line onwards.
    fn subscribe_logs(&self) -> Option<Receiver<LogLine>>;
}

/// Blocks until a [`WaitStrategy`] is satisfied or its deadline passes.
#[derive(Debug, Clone, Copy)]
pub struct Evaluator {
    poll_interval: Duration,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl Evaluator {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn evaluate(
        &self,
        strategy: &WaitStrategy,
        target: &dyn WaitTarget,
    ) -> Result<(), ReadinessTimeout> {
        let start = Instant::now();
        let result = match strategy {
            WaitStrategy::None => Ok(()),
            WaitStrategy::PortOpen { port, timeout } => {
                self.wait_port(*port, *timeout, target, start)
            }
            WaitStrategy::LogContains { pattern, timeout } => {
                wait_log(pattern, *timeout, target, start)
            }
            WaitStrategy::Composite(children) => self.wait_all(children, target),
        };
        let outcome = match &result {
            Ok(()) => "satisfied",
            Err(_) => "timed out",
        };
        debug!(strategy = %strategy, elapsed = ?start.elapsed(), "wait strategy {outcome}");
        result.map_err(|err| match strategy {
            // Composite errors already name the failing child.
            WaitStrategy::Composite(_) => err,
            _ => ReadinessTimeout {
                strategy: strategy.to_string(),
                elapsed: err.elapsed,
            },
        })
    }

    fn wait_port(
        &self,
        port: PortSpec,
        timeout: Duration,
        target: &dyn WaitTarget,
        start: Instant,
    ) -> Result<(), ReadinessTimeout> {
        let mut attempts = 0u32;
        loop {
            let remaining = timeout.saturating_sub(start.elapsed());
            if let Some(mapped) = target.mapped_port(port) {
                attempts += 1;
                let attempt_timeout = remaining
                    .min(MAX_CONNECT_TIMEOUT)
                    .max(Duration::from_millis(1));
                if probe(target.host(), mapped, attempt_timeout) {
                    info!(%port, mapped, attempts, "port is accepting connections");
                    return Ok(());
                }
            }

            let remaining = timeout.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                return Err(elapsed_since(start));
            }
            std::thread::sleep(self.poll_interval.min(remaining));
        }
    }

    fn wait_all(
        &self,
        children: &[WaitStrategy],
        target: &dyn WaitTarget,
    ) -> Result<(), ReadinessTimeout> {
        let results: Vec<Result<(), ReadinessTimeout>> = std::thread::scope(|scope| {
            let handles: Vec<_> = children
                .iter()
                .map(|child| scope.spawn(move || self.evaluate(child, target)))
                .collect();
            handles
                .into_iter()
                .map(|h| {
                    h.join().unwrap_or_else(|_| {
                        Err(ReadinessTimeout {
                            strategy: "wait strategy thread panicked".into(),
                            elapsed: Duration::ZERO,
                        })
                    })
                })
                .collect()
        });
        results.into_iter().collect()
    }
}

fn wait_log(
    pattern: &LogPattern,
    timeout: Duration,
    target: &dyn WaitTarget,
    start: Instant,
) -> Result<(), ReadinessTimeout> {
    let Some(lines) = target.subscribe_logs() else {
        return Err(elapsed_since(start));
    };

    loop {
        let remaining = timeout.saturating_sub(start.elapsed());
        match lines.recv_timeout(remaining) {
            Ok(line) if pattern.is_match(&line.text) => {
                info!(pattern = pattern.as_str(), line = %line.text, "log pattern matched");
                return Ok(());
            }
            Ok(_) => {}
            // A closed stream means the container is gone; nothing more can match.
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                return Err(elapsed_since(start));
            }
        }
    }
}

fn elapsed_since(start: Instant) -> ReadinessTimeout {
    ReadinessTimeout {
        strategy: String::new(),
        elapsed: start.elapsed(),
    }
}

/// Connect to `host:port`, then make sure the peer does not hang up right away.
fn probe(host: &str, port: u16, timeout: Duration) -> bool {
    let addrs: Vec<SocketAddr> = match (host, port).to_socket_addrs() {
        Ok(addrs) => addrs.collect(),
        Err(_) => return false,
    };

    addrs.iter().any(|addr| {
        let Ok(mut stream) = TcpStream::connect_timeout(addr, timeout) else {
            return false;
        };
        if stream.set_read_timeout(Some(PROBE_READ_TIMEOUT)).is_err() {
            return true;
        }
        let mut buf = [0u8; 1];
        match stream.read(&mut buf) {
            Ok(0) => false,
            Ok(_) => true,
            Err(e) => matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut),
        }
    })
}
