use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::sentinel::Sentinel;
use super::types::{LogLine, Stream};
use crate::docker::{CancelToken, ContainerEngine, EngineError, OutputLine};
use crate::error::{Error, Result};

/// How often the collector re-checks cancellation while the stream is quiet.
const COLLECT_POLL: Duration = Duration::from_millis(50);

/// Follows a container's output into an ordered, shared buffer.
///
/// A single collector thread owns the write side: it appends each line, fans
/// it out to subscribers and acknowledges pending sentinels. Any number of
/// threads may read snapshots or block in [`sync_and_wait`](Self::sync_and_wait).
pub struct LogConsumer {
    container_id: String,
    engine: Arc<dyn ContainerEngine>,
    buffer: Arc<Mutex<Buffer>>,
    cancel: CancelToken,
    collector: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct Buffer {
    lines: Vec<LogLine>,
    subscribers: Vec<Sender<LogLine>>,
    waiters: Vec<Waiter>,
    ended: bool,
}

/// Outcome of one sync: the token arrived, or the exec that injects it failed.
type Ack = std::result::Result<(), EngineError>;

/// A sync in progress, waiting for its token on each of `pending`.
struct Waiter {
    token: String,
    pending: Vec<Stream>,
    ack: SyncSender<Ack>,
}

impl Buffer {
    fn append(&mut self, line: LogLine) {
        self.subscribers.retain(|tx| tx.send(line.clone()).is_ok());
        self.lines.push(line);

        let Some(line) = self.lines.last() else {
            return;
        };
        self.waiters.retain_mut(|waiter| {
            if line.text == waiter.token {
                waiter.pending.retain(|s| *s != line.stream);
            }
            if waiter.pending.is_empty() {
                // Fired exactly once; the waiter is retired right after.
                let _ = waiter.ack.try_send(Ok(()));
                return false;
            }
            true
        });
    }

    fn finish(&mut self) {
        self.ended = true;
        // Disconnects subscribers and wakes blocked syncs.
        self.subscribers.clear();
        self.waiters.clear();
    }
}

impl LogConsumer {
    /// Begin following `container_id`. The engine replays output from the
    /// container's first line, so nothing written before this call is lost.
    pub fn start(engine: Arc<dyn ContainerEngine>, container_id: impl Into<String>) -> Result<Self> {
        let container_id = container_id.into();
        let cancel = CancelToken::new();
        let rx = engine.follow_logs(&container_id, cancel.clone())?;
        let buffer = Arc::new(Mutex::new(Buffer::default()));

        let collector = {
            let buffer = Arc::clone(&buffer);
            let cancel = cancel.clone();
            std::thread::Builder::new()
                .name("kongtest-logs".into())
                .spawn(move || collect(rx, &buffer, &cancel))?
        };
        debug!(container = %container_id, "following container output");

        Ok(Self {
            container_id,
            engine,
            buffer,
            cancel,
            collector: Some(collector),
        })
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    /// Inject `sentinel` into the container and block until it comes back
    /// through the log stream, or `timeout` passes.
    ///
    /// On success every line the container produced up to and including the
    /// sentinel is in the buffer, in production order per stream. On
    /// [`Error::SyncTimeout`] the buffer is still readable for diagnosis.
    ///
    /// `timeout` bounds the whole call, including an exec that never returns.
    /// Such an exec is left to finish on its own thread.
    pub fn sync_and_wait(&self, sentinel: &Sentinel, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        // One slot for the token, one for the exec outcome.
        let (ack_tx, ack_rx) = mpsc::sync_channel::<Ack>(2);
        let streams = sentinel.streams();
        {
            let mut buffer = self.lock();
            if buffer.ended {
                return Err(self.sync_timeout(sentinel, timeout, buffer.lines.len()));
            }
            // Registered before the command runs so the token cannot slip past.
            if !streams.is_empty() {
                buffer.waiters.push(Waiter {
                    token: sentinel.token().to_string(),
                    pending: streams.to_vec(),
                    ack: ack_tx.clone(),
                });
            }
        }

        let spawned = {
            let engine = Arc::clone(&self.engine);
            let id = self.container_id.clone();
            let command = sentinel.command().to_vec();
            let ack_only_on_failure = !streams.is_empty();
            std::thread::Builder::new()
                .name("kongtest-sync".into())
                .spawn(move || match engine.exec(&id, &command) {
                    Ok(()) if ack_only_on_failure => {}
                    outcome => {
                        let _ = ack_tx.try_send(outcome);
                    }
                })
        };
        if let Err(e) = spawned {
            self.retire(sentinel);
            return Err(e.into());
        }

        let remaining = timeout.saturating_sub(start.elapsed());
        match ack_rx.recv_timeout(remaining) {
            Ok(Ok(())) => {
                debug!(token = sentinel.token(), elapsed = ?start.elapsed(), "log stream synchronized");
                Ok(())
            }
            Ok(Err(e)) => {
                self.retire(sentinel);
                Err(e.into())
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                self.retire(sentinel);
                let buffered = self.len();
                warn!(token = sentinel.token(), buffered, "sentinel not observed");
                Err(self.sync_timeout(sentinel, timeout, buffered))
            }
        }
    }

    /// Lines produced from now on. The receiver disconnects when following stops.
    pub fn subscribe(&self) -> Receiver<LogLine> {
        let (tx, rx) = mpsc::channel();
        let mut buffer = self.lock();
        if !buffer.ended {
            buffer.subscribers.push(tx);
        }
        rx
    }

    /// Every line buffered so far, then every line produced from now on.
    pub fn subscribe_with_backlog(&self) -> Receiver<LogLine> {
        let (tx, rx) = mpsc::channel();
        let mut buffer = self.lock();
        for line in &buffer.lines {
            let _ = tx.send(line.clone());
        }
        if !buffer.ended {
            buffer.subscribers.push(tx);
        }
        rx
    }

    /// Snapshot of the buffer.
    pub fn lines(&self) -> Vec<LogLine> {
        self.lock().lines.clone()
    }

    pub fn stream_lines(&self, stream: Stream) -> Vec<String> {
        self.lock()
            .lines
            .iter()
            .filter(|l| l.stream == stream)
            .map(|l| l.text.clone())
            .collect()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lock().lines.iter().any(|l| l.text.contains(needle))
    }

    pub fn len(&self) -> usize {
        self.lock().lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the stream has closed, because the container exited or
    /// following was stopped.
    pub fn is_ended(&self) -> bool {
        self.lock().ended
    }

    /// Stop following. Lines already buffered stay readable. Safe to call
    /// repeatedly and after the container is gone.
    pub fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.collector.take() {
            let _ = handle.join();
            debug!(container = %self.container_id, "stopped following container output");
        }
    }

    fn retire(&self, sentinel: &Sentinel) {
        self.lock().waiters.retain(|w| w.token != sentinel.token());
    }

    fn sync_timeout(&self, sentinel: &Sentinel, timeout: Duration, buffered: usize) -> Error {
        Error::SyncTimeout {
            token: sentinel.token().to_string(),
            timeout,
            buffered,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Buffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for LogConsumer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn collect(rx: Receiver<OutputLine>, buffer: &Mutex<Buffer>, cancel: &CancelToken) {
    let lock = || buffer.lock().unwrap_or_else(PoisonError::into_inner);
    loop {
        if cancel.is_cancelled() {
            break;
        }
        match rx.recv_timeout(COLLECT_POLL) {
            Ok(OutputLine::Stdout(text)) => lock().append(LogLine::new(Stream::Stdout, text)),
            Ok(OutputLine::Stderr(text)) => lock().append(LogLine::new(Stream::Stderr, text)),
            Ok(OutputLine::Done(end)) => {
                debug!(exit_code = ?end.exit_code, cancelled = end.cancelled, "log stream ended");
                break;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    lock().finish();
}
