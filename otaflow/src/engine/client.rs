//! Update engine adapter backed by `update_engine_client`.
//!
//! Payload application is started with `--update --follow`; the follower
//! process stays attached and prints one line per callback, which this
//! adapter parses and forwards to the bound [`EngineCallback`]:
//!
//! ```text
//! onStatusUpdate(UPDATE_STATUS_DOWNLOADING (3), 0.42)
//! onPayloadApplicationComplete(ErrorCode::kSuccess (0))
//! ```
//!
//! Suspend, resume and cancel are one-shot client invocations. The client
//! can be reached through a wrapper (for example `adb shell`) by giving
//! leading arguments.
//!
//! The engine has no synchronous accept/reject answer on this interface. A
//! client that exits non-zero within the accept window without printing a
//! completion line is taken as a rejected apply request. Failures after the
//! window surface as an `ERROR (1)` completion.

use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use regex::Regex;
use tracing::{debug, info, warn};

use super::error::{EngineError, EngineResult};
use super::{EngineCallback, UpdateEngine};
use crate::status::ErrorCode;

/// Default location of the client on Android devices.
pub const DEFAULT_CLIENT_PATH: &str = "/system/bin/update_engine_client";

/// How long an apply request may take to be refused outright.
pub const DEFAULT_ACCEPT_WINDOW: Duration = Duration::from_millis(250);

const ACCEPT_POLL: Duration = Duration::from_millis(10);

/// A callback line printed by a following client.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FollowEvent {
    /// `onStatusUpdate(<name> (<code>), <fraction>)`
    Status { code: i32, percent: f32 },
    /// `onPayloadApplicationComplete(<name> (<code>))`
    Complete { code: i32 },
}

fn status_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"onStatusUpdate\([^()]*\((-?\d+)\),\s*([-+0-9.eE]+)\)").unwrap()
    })
}

fn complete_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"onPayloadApplicationComplete\([^()]*\((-?\d+)\)\)").unwrap())
}

/// Parse one line of `update_engine_client --follow` output.
///
/// Lines may carry a log prefix; anything that is not a callback line
/// returns `None`.
pub fn parse_follow_line(line: &str) -> Option<FollowEvent> {
    if let Some(caps) = status_pattern().captures(line) {
        let code = caps[1].parse().ok()?;
        let percent = caps[2].parse().ok()?;
        return Some(FollowEvent::Status { code, percent });
    }
    let caps = complete_pattern().captures(line)?;
    let code = caps[1].parse().ok()?;
    Some(FollowEvent::Complete { code })
}

/// One `--update --follow` client process and the sink it reports to.
struct Follower {
    child: Mutex<Option<Child>>,
    sink: Arc<dyn EngineCallback>,
    detached: AtomicBool,
    completed: AtomicBool,
}

impl Follower {
    fn deliver(&self, event: FollowEvent) {
        if self.detached.load(Ordering::SeqCst) {
            debug!(?event, "Dropping engine report after unbind");
            return;
        }
        match event {
            FollowEvent::Status { code, percent } => self.sink.on_status_update(code, percent),
            FollowEvent::Complete { code } => {
                self.completed.store(true, Ordering::SeqCst);
                self.sink.on_payload_application_complete(code);
            }
        }
    }

    fn pump(&self, reader: impl Read) {
        for line in BufReader::new(reader).lines() {
            let Ok(line) = line else { break };
            match parse_follow_line(&line) {
                Some(event) => self.deliver(event),
                None => debug!(line = %line, "update_engine_client"),
            }
        }
    }

    /// Reap the client once its output is drained.
    fn finish(&self) {
        // Taken by detach(): the process was stopped on purpose.
        let Some(mut child) = self.child.lock().take() else {
            return;
        };
        let exit = child.wait();
        if !self.completed.load(Ordering::SeqCst) && !self.detached.load(Ordering::SeqCst) {
            warn!(?exit, "update_engine_client exited without reporting completion");
            self.deliver(FollowEvent::Complete {
                code: ErrorCode::ERROR.code(),
            });
        }
    }

    fn detach(&self) {
        self.detached.store(true, Ordering::SeqCst);
        if let Some(mut child) = self.child.lock().take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// [`UpdateEngine`] that shells out to `update_engine_client`.
pub struct ClientEngine {
    program: PathBuf,
    leading_args: Vec<String>,
    accept_window: Duration,
    callback: Option<Arc<dyn EngineCallback>>,
    follower: Option<Arc<Follower>>,
}

impl ClientEngine {
    /// Create an adapter for the client at `program`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            accept_window: DEFAULT_ACCEPT_WINDOW,
            callback: None,
            follower: None,
        }
    }

    /// Create an adapter from a whitespace-separated command line, e.g.
    /// `adb shell update_engine_client`.
    pub fn from_command_line(command: &str) -> Self {
        let mut parts = command.split_whitespace();
        let program = parts.next().unwrap_or(DEFAULT_CLIENT_PATH);
        Self::new(program).with_leading_args(parts.map(str::to_string).collect())
    }

    /// Arguments placed before every client flag.
    pub fn with_leading_args(mut self, args: Vec<String>) -> Self {
        self.leading_args = args;
        self
    }

    /// Set how long to watch for an immediate refusal of an apply request.
    pub fn with_accept_window(mut self, window: Duration) -> Self {
        self.accept_window = window;
        self
    }

    /// The program invoked for every request.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Client flags for an apply request.
    pub fn apply_args(url: &str, offset: u64, size: u64, properties: &[String]) -> Vec<String> {
        vec![
            "--update".to_string(),
            format!("--payload={}", url),
            format!("--offset={}", offset),
            format!("--size={}", size),
            format!("--headers={}", properties.join("\n")),
            "--follow".to_string(),
        ]
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.leading_args).stdin(Stdio::null());
        command
    }

    fn launch_error(&self, source: std::io::Error) -> EngineError {
        EngineError::Launch {
            program: self.program.clone(),
            source,
        }
    }

    fn run(&self, operation: &'static str, flag: &str) -> EngineResult<()> {
        debug!(program = %self.program.display(), flag, "Invoking update_engine_client");
        let output = self
            .command()
            .arg(flag)
            .output()
            .map_err(|e| self.launch_error(e))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(EngineError::Rejected {
                operation,
                reason: format!("{}: {}", output.status, stderr.trim()),
            })
        }
    }

    /// Wait out the accept window. Returns the exit status if the client
    /// already failed.
    fn early_failure(&self, child: &mut Child) -> EngineResult<Option<ExitStatus>> {
        let started = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) if !status.success() => return Ok(Some(status)),
                Ok(Some(_)) => return Ok(None),
                Ok(None) if started.elapsed() >= self.accept_window => return Ok(None),
                Ok(None) => thread::sleep(ACCEPT_POLL),
                Err(e) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(self.launch_error(e));
                }
            }
        }
    }

    /// Settle an apply request whose client exited non-zero in the accept
    /// window. If it still reported completion, the reports are delivered
    /// and the request counts as accepted.
    fn settle_early_exit(
        sink: &dyn EngineCallback,
        status: ExitStatus,
        stdout: Option<ChildStdout>,
        stderr: Option<ChildStderr>,
    ) -> EngineResult<()> {
        let events: Vec<FollowEvent> = stdout
            .map(|out| {
                BufReader::new(out)
                    .lines()
                    .map_while(Result::ok)
                    .filter_map(|line| parse_follow_line(&line))
                    .collect()
            })
            .unwrap_or_default();

        if events.iter().any(|e| matches!(e, FollowEvent::Complete { .. })) {
            for event in events {
                match event {
                    FollowEvent::Status { code, percent } => sink.on_status_update(code, percent),
                    FollowEvent::Complete { code } => sink.on_payload_application_complete(code),
                }
            }
            return Ok(());
        }

        let mut message = String::new();
        if let Some(mut err) = stderr {
            let _ = err.read_to_string(&mut message);
        }
        warn!(%status, stderr = %message.trim(), "update_engine_client refused the payload");
        Err(EngineError::Rejected {
            operation: "apply",
            reason: format!("{}: {}", status, message.trim()),
        })
    }

    fn stop_follower(&mut self) {
        if let Some(follower) = self.follower.take() {
            follower.detach();
        }
    }
}

impl UpdateEngine for ClientEngine {
    fn name(&self) -> &'static str {
        "update_engine_client"
    }

    fn bind(&mut self, callback: Arc<dyn EngineCallback>) -> EngineResult<()> {
        self.callback = Some(callback);
        Ok(())
    }

    fn unbind(&mut self) {
        self.callback = None;
        self.stop_follower();
    }

    fn apply_payload(
        &mut self,
        url: &str,
        offset: u64,
        size: u64,
        properties: &[String],
    ) -> EngineResult<()> {
        let sink = self.callback.clone().ok_or(EngineError::NotBound)?;
        self.stop_follower();

        let mut child = self
            .command()
            .args(Self::apply_args(url, offset, size, properties))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.launch_error(e))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        if let Some(status) = self.early_failure(&mut child)? {
            return Self::settle_early_exit(sink.as_ref(), status, stdout, stderr);
        }

        let follower = Arc::new(Follower {
            child: Mutex::new(Some(child)),
            sink,
            detached: AtomicBool::new(false),
            completed: AtomicBool::new(false),
        });

        let stderr_follower = Arc::clone(&follower);
        let stderr_handle = stderr.map(|stderr| thread::spawn(move || stderr_follower.pump(stderr)));

        let stdout_follower = Arc::clone(&follower);
        thread::Builder::new()
            .name("update-engine-follow".to_string())
            .spawn(move || {
                if let Some(stdout) = stdout {
                    stdout_follower.pump(stdout);
                }
                if let Some(handle) = stderr_handle {
                    let _ = handle.join();
                }
                stdout_follower.finish();
            })
            .map_err(|e| {
                follower.detach();
                self.launch_error(e)
            })?;

        info!(url, offset, size, "Payload handed to update_engine_client");
        self.follower = Some(follower);
        Ok(())
    }

    fn suspend(&mut self) -> EngineResult<()> {
        self.run("suspend", "--suspend")
    }

    fn resume(&mut self) -> EngineResult<()> {
        self.run("resume", "--resume")
    }

    fn cancel(&mut self) -> EngineResult<()> {
        self.run("cancel", "--cancel")
    }
}

impl Drop for ClientEngine {
    fn drop(&mut self) {
        self.stop_follower();
    }
}
