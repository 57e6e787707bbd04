//! One-shot subprocess exchange with an out-of-process detection backend.
//!
//! Each call launches a fresh process, writes one JSON document to its stdin,
//! closes stdin and waits for exit while stdout and stderr are drained on their
//! own threads. One deadline bounds both the exit and the drain, so a backend
//! that leaves a descendant holding its pipes open still times out. The wait
//! can be cut short through a [`CancelToken`]. A child still running at that
//! point is killed.
//!
//! The adapter holds configuration only. It never retries: every failure is
//! reported to the caller as one of the distinct [`GatewayError`] kinds.

use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::detect::backend::{BackendDescriptor, BackendRequest};
use crate::error::{GatewayError, GatewayResult};

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const DRAIN_SLICE: Duration = Duration::from_millis(50);

/// Shared flag that aborts in-flight backend invocations.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug)]
pub struct ProcessAdapter {
    program: String,
    script: PathBuf,
    model_path: String,
    timeout: Duration,
    cancel: CancelToken,
}

#[derive(Clone, Copy, Debug)]
enum Pipe {
    Stdout,
    Stderr,
}

struct CapturedOutput {
    status: ExitStatus,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl ProcessAdapter {
    pub fn new(
        descriptor: &BackendDescriptor,
        model_path: impl Into<String>,
        timeout: Duration,
        cancel: CancelToken,
    ) -> Self {
        Self {
            program: descriptor.program.clone(),
            script: descriptor.script.clone(),
            model_path: model_path.into(),
            timeout,
            cancel,
        }
    }

    pub fn script(&self) -> &Path {
        &self.script
    }

    /// Run one request/response exchange with a fresh backend process.
    pub fn invoke(&self, request: &BackendRequest) -> GatewayResult<Value> {
        let payload = serde_json::to_vec(request)
            .map_err(|e| GatewayError::invalid_input(format!("unencodable request: {}", e)))?;
        let mut cmd = Command::new(&self.program);
        cmd.arg(&self.script)
            .env("YOLO_MODEL_PATH", &self.model_path);

        log::debug!(
            "invoking backend {} {} action={:?}",
            self.program,
            self.script.display(),
            request.action
        );
        let started = Instant::now();
        let output = self.run(cmd, Some(payload), self.timeout)?;
        log::debug!(
            "backend action={:?} exited with {} after {:?}",
            request.action,
            output.status,
            started.elapsed()
        );

        if !output.status.success() {
            return Err(GatewayError::BackendProcessError {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        parse_response(&output.stdout)
    }

    /// Run the interpreter with `args` and require a zero exit status.
    pub fn run_check(&self, args: &[String], timeout: Duration) -> GatewayResult<()> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args);
        let output = self.run(cmd, None, timeout)?;
        if output.status.success() {
            Ok(())
        } else {
            Err(GatewayError::BackendProcessError {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    fn run(
        &self,
        mut cmd: Command,
        input: Option<Vec<u8>>,
        timeout: Duration,
    ) -> GatewayResult<CapturedOutput> {
        cmd.stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group, so a timeout also reaches the backend's children.
            cmd.process_group(0);
        }

        let mut child = cmd.spawn().map_err(|source| GatewayError::SpawnFailure {
            program: self.program.clone(),
            source,
        })?;

        let deadline = Instant::now() + timeout;
        let (tx, rx) = mpsc::channel();
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(Pipe::Stdout, stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(Pipe::Stderr, stderr, tx.clone());
        }
        drop(tx);
        if let (Some(mut stdin), Some(input)) = (child.stdin.take(), input) {
            // Writer thread so a child that never reads stdin cannot block the deadline.
            std::thread::spawn(move || {
                if let Err(err) = stdin.write_all(&input) {
                    if err.kind() != ErrorKind::BrokenPipe {
                        log::debug!("backend stdin write failed: {}", err);
                    }
                }
            });
        }

        let status = match wait_with_deadline(&mut child, deadline, timeout, &self.cancel) {
            Ok(status) => status,
            Err(err) => {
                log::warn!("terminating backend process {}: {}", child.id(), err);
                terminate(&mut child);
                return Err(err);
            }
        };

        let (stdout, stderr) = collect_output(&rx, deadline, timeout, &self.cancel)
            .map_err(|err| {
                log::warn!(
                    "backend process {} exited but its output stayed open: {}",
                    child.id(),
                    err
                );
                terminate(&mut child);
                err
            })?;
        Ok(CapturedOutput {
            status,
            stdout,
            stderr,
        })
    }
}

fn wait_with_deadline(
    child: &mut Child,
    deadline: Instant,
    timeout: Duration,
    cancel: &CancelToken,
) -> GatewayResult<ExitStatus> {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {}
            Err(err) => {
                return Err(GatewayError::BackendProcessError {
                    code: None,
                    stderr: format!("wait failed: {}", err),
                })
            }
        }
        if cancel.is_cancelled() {
            return Err(GatewayError::Cancelled);
        }
        if Instant::now() >= deadline {
            return Err(GatewayError::BackendTimeout(timeout));
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Kill the child and whatever it left running in its process group.
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        // The group id equals the child's pid and stays reserved while any
        // member is alive, even after the leader has been reaped.
        let rc = unsafe { libc::killpg(child.id() as libc::pid_t, libc::SIGKILL) };
        if rc != 0 {
            log::debug!(
                "killpg({}) failed: {}",
                child.id(),
                std::io::Error::last_os_error()
            );
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

fn spawn_reader<R: Read + Send + 'static>(pipe: Pipe, mut reader: R, tx: Sender<(Pipe, Vec<u8>)>) {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Err(err) = reader.read_to_end(&mut buf) {
            log::debug!("backend {:?} read failed: {}", pipe, err);
        }
        // The receiver is gone once the call has timed out.
        let _ = tx.send((pipe, buf));
    });
}

/// Wait for both pipes to reach end of file, bounded by the call deadline.
fn collect_output(
    rx: &Receiver<(Pipe, Vec<u8>)>,
    deadline: Instant,
    timeout: Duration,
    cancel: &CancelToken,
) -> GatewayResult<(Vec<u8>, Vec<u8>)> {
    let mut stdout = None;
    let mut stderr = None;
    while stdout.is_none() || stderr.is_none() {
        if cancel.is_cancelled() {
            return Err(GatewayError::Cancelled);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(GatewayError::BackendTimeout(timeout));
        }
        match rx.recv_timeout(remaining.min(DRAIN_SLICE)) {
            Ok((Pipe::Stdout, buf)) => stdout = Some(buf),
            Ok((Pipe::Stderr, buf)) => stderr = Some(buf),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    Ok((stdout.unwrap_or_default(), stderr.unwrap_or_default()))
}

/// Parse a backend's stdout into a JSON object.
///
/// Backends may print progress lines before their response document, so when
/// the whole stream is not JSON the last non-empty line is tried.
fn parse_response(stdout: &[u8]) -> GatewayResult<Value> {
    let value = match serde_json::from_slice::<Value>(stdout) {
        Ok(value) => value,
        Err(err) => String::from_utf8_lossy(stdout)
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .and_then(|line| serde_json::from_str::<Value>(line).ok())
            .ok_or_else(|| GatewayError::MalformedResponse(err.to_string()))?,
    };
    if !value.is_object() {
        return Err(GatewayError::MalformedResponse(
            "response is not a JSON object".to_string(),
        ));
    }
    Ok(value)
}
