use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use super::types::Stream;

static NEXT_SENTINEL: AtomicU64 = AtomicU64::new(0);

/// A marker line injected into a container's output.
///
/// Once the token has come back on every stream in `streams`, everything the
/// container wrote to those streams before the sentinel command ran is in
/// the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentinel {
    token: String,
    command: Vec<String>,
    streams: Vec<Stream>,
}

impl Sentinel {
    /// A token no other sentinel in this process (or a concurrent one) uses.
    pub fn unique() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or_default();
        let seq = NEXT_SENTINEL.fetch_add(1, Ordering::Relaxed);
        Self::with_token(format!(
            "kongtest-sync-{}-{seq}-{nanos:08x}",
            std::process::id()
        ))
    }

    /// Echo `token` onto the stdout and stderr of the container's main
    /// process, where the engine's log collector picks it up.
    pub fn with_token(token: impl Into<String>) -> Self {
        let token = token.into();
        let quoted = shell_words::quote(&token).into_owned();
        let script = format!("echo {quoted} > /proc/1/fd/1; echo {quoted} > /proc/1/fd/2");
        Self {
            command: vec!["sh".into(), "-c".into(), script],
            streams: vec![Stream::Stdout, Stream::Stderr],
            token,
        }
    }

    /// A sentinel whose `command` emits `token` on each of `streams`.
    pub fn custom(
        token: impl Into<String>,
        command: impl IntoIterator<Item = String>,
        streams: impl IntoIterator<Item = Stream>,
    ) -> Self {
        let mut streams: Vec<Stream> = streams.into_iter().collect();
        streams.dedup();
        Self {
            token: token.into(),
            command: command.into_iter().collect(),
            streams,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    pub fn streams(&self) -> &[Stream] {
        &self.streams
    }
}
