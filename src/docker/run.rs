use std::io::{BufRead, Read};
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, Instant};

use tracing::debug;

use super::types::{CancelToken, EngineError, OutputLine, StreamEnd};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Run `program args..` to completion and return its stdout.
///
/// The child is killed once `timeout` elapses. A non-zero exit becomes an
/// [`EngineError`] carrying the trimmed stderr.
pub fn output(program: &str, args: &[String], timeout: Duration) -> Result<String, EngineError> {
    debug!(command = %command_line(program, args), "engine call");

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| EngineError::new(format!("failed to invoke `{program}`: {e}")))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    // Drain both pipes while waiting so a chatty child cannot block on a full pipe.
    let stdout_handle = std::thread::spawn(move || read_all(stdout));
    let stderr_handle = std::thread::spawn(move || read_all(stderr));

    let start = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Ok(status),
            Ok(None) => {}
            Err(e) => break Err(EngineError::new(format!("failed to wait on `{program}`: {e}"))),
        }

        if start.elapsed() > timeout {
            let _ = child.kill();
            let _ = child.wait();
            break Err(EngineError::new(format!(
                "`{program} {}` timed out after {timeout:?}",
                args.first().map(String::as_str).unwrap_or_default()
            )));
        }

        std::thread::sleep(POLL_INTERVAL);
    };

    let stdout = stdout_handle.join().unwrap_or_default();
    let stderr = stderr_handle.join().unwrap_or_default();

    let status = status?;
    if !status.success() {
        return Err(EngineError::new(format!(
            "`{program} {}` failed ({status}): {}",
            args.first().map(String::as_str).unwrap_or_default(),
            stderr.trim()
        )));
    }
    Ok(stdout)
}

fn command_line(program: &str, args: &[String]) -> String {
    shell_words::join(std::iter::once(program).chain(args.iter().map(String::as_str)))
}

fn read_all<R: Read>(pipe: Option<R>) -> String {
    let mut buf = String::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_string(&mut buf);
    }
    buf
}

/// Spawn a long-running process and return a channel that streams its output.
///
/// The caller receives [`OutputLine::Stdout`]/[`Stderr`] as they arrive,
/// followed by exactly one [`OutputLine::Done`] once the process exits or
/// `cancel` fires.
pub fn spawn(
    program: &str,
    args: &[String],
    cancel: CancelToken,
) -> Result<Receiver<OutputLine>, EngineError> {
    debug!(command = %command_line(program, args), "streaming engine call");

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| EngineError::new(format!("failed to invoke `{program}`: {e}")))?;

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        let _ = child.kill();
        let _ = child.wait();
        return Err(EngineError::new("child output was not captured"));
    };

    let (tx, rx) = mpsc::channel();

    std::thread::spawn(move || {
        orchestrate(child, stdout, stderr, tx, cancel);
    });

    Ok(rx)
}

fn orchestrate(
    mut child: Child,
    stdout: ChildStdout,
    stderr: ChildStderr,
    tx: Sender<OutputLine>,
    cancel: CancelToken,
) {
    // --- reader threads ---------------------------------------------------
    let tx_out = tx.clone();
    let stdout_handle = std::thread::spawn(move || {
        forward_lines(stdout, &tx_out, OutputLine::Stdout);
    });

    let tx_err = tx.clone();
    let stderr_handle = std::thread::spawn(move || {
        forward_lines(stderr, &tx_err, OutputLine::Stderr);
    });

    // --- poll loop ---------------------------------------------------------
    let mut cancelled = false;

    let exit_status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Some(status),
            Ok(None) => {}
            Err(_) => break None,
        }

        if cancel.is_cancelled() {
            cancelled = true;
            let _ = child.kill();
            let _ = child.wait();
            break None;
        }

        std::thread::sleep(POLL_INTERVAL);
    };

    // --- finalize ----------------------------------------------------------
    let _ = stdout_handle.join();
    let _ = stderr_handle.join();

    let _ = tx.send(OutputLine::Done(StreamEnd {
        exit_code: exit_status.and_then(|s| s.code()),
        cancelled,
    }));
}

fn forward_lines<R: Read>(pipe: R, tx: &Sender<OutputLine>, wrap: fn(String) -> OutputLine) {
    let reader = std::io::BufReader::new(pipe);
    for line in reader.lines() {
        match line {
            Ok(mut l) => {
                if l.ends_with('\r') {
                    l.pop();
                }
                // Receiver may be dropped; ignore send errors.
                let _ = tx.send(wrap(l));
            }
            Err(_) => break,
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".into(), script.into()]
    }

    #[test]
    fn output_returns_stdout() {
        let out = output("sh", &sh("echo hello"), Duration::from_secs(10)).unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[test]
    fn output_reports_stderr_on_failure() {
        let err = output("sh", &sh("echo boom >&2; exit 3"), Duration::from_secs(10)).unwrap_err();
        assert!(err.0.contains("boom"), "{err}");
    }

    #[test]
    fn output_kills_on_timeout() {
        let start = Instant::now();
        let err = output("sh", &sh("exec sleep 10"), Duration::from_millis(100)).unwrap_err();
        assert!(err.0.contains("timed out"), "{err}");
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn output_missing_program_is_an_error() {
        assert!(output("kongtest-no-such-binary", &[], Duration::from_secs(1)).is_err());
    }

    #[test]
    fn spawn_streams_both_pipes_then_done() {
        let rx = spawn("sh", &sh("echo out; echo err >&2"), CancelToken::new()).unwrap();
        let lines: Vec<OutputLine> = rx.iter().collect();
        assert!(lines.contains(&OutputLine::Stdout("out".into())));
        assert!(lines.contains(&OutputLine::Stderr("err".into())));
        assert_eq!(
            lines.last(),
            Some(&OutputLine::Done(StreamEnd {
                exit_code: Some(0),
                cancelled: false
            }))
        );
    }

    #[test]
    fn spawn_stops_on_cancel() {
        let cancel = CancelToken::new();
        let rx = spawn("sh", &sh("exec sleep 30"), cancel.clone()).unwrap();
        cancel.cancel();
        let last = rx.iter().last();
        assert!(matches!(
            last,
            Some(OutputLine::Done(StreamEnd {
                cancelled: true,
                ..
            }))
        ));
    }
}
