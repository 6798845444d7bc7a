//! Process bridge
//!
//! Runs the external encryptor without blocking the main context. Results are
//! never raised as errors: exit status and stderr are surfaced verbatim and the
//! caller decides what a failure means. Completions are posted to a channel
//! that only the session controller drains, so document state is never touched
//! from the task that waited on the child.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// A fully described subprocess launch.
#[derive(Debug, Clone)]
pub struct Invocation {
    program: OsString,
    args: Vec<OsString>,
    cwd: Option<PathBuf>,
    env: Vec<(OsString, OsString)>,
    text: bool,
}

impl Invocation {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            text: true,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Adds an override on top of the inherited environment. Later overrides of
    /// the same name win.
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Text mode normalises `\r\n` line endings in captured output.
    pub fn text(mut self, text: bool) -> Self {
        self.text = text;
        self
    }

    pub fn program(&self) -> &OsStr {
        &self.program
    }

    pub fn arguments(&self) -> &[OsString] {
        &self.args
    }

    pub fn cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    /// The effective override for `key`, if any.
    pub fn env_var(&self, key: &str) -> Option<&OsStr> {
        self.env
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_os_str())
    }

    pub fn is_text(&self) -> bool {
        self.text
    }
}

/// Captured result of one subprocess.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    /// May hold decrypted plaintext, wiped on drop.
    pub stdout: Zeroizing<Vec<u8>>,
    pub stderr: Vec<u8>,
    /// `None` when the process could not be started or was killed by a signal.
    pub exit_code: Option<i32>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn stdout_text(&self) -> Zeroizing<String> {
        Zeroizing::new(String::from_utf8_lossy(&self.stdout).into_owned())
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim_end().to_string()
    }

    /// Output for a process that never ran.
    pub fn not_started(reason: impl Into<String>) -> Self {
        Self {
            stdout: Zeroizing::new(Vec::new()),
            stderr: reason.into().into_bytes(),
            exit_code: None,
        }
    }
}

/// Correlates a completion with the request that started it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(pub u64);

#[derive(Debug)]
pub struct Completion {
    pub ticket: Ticket,
    pub output: ProcessOutput,
}

pub type CompletionSender = mpsc::UnboundedSender<Completion>;
pub type CompletionReceiver = mpsc::UnboundedReceiver<Completion>;

/// Starts subprocesses on behalf of the session controller.
pub trait Runner {
    /// Launches `invocation` without waiting for it. Exactly one completion
    /// carrying `ticket` must eventually be sent on `completions`.
    fn spawn(&self, ticket: Ticket, invocation: Invocation, completions: CompletionSender);
}

/// Runs invocations as real OS processes on the tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessBridge;

impl ProcessBridge {
    pub fn new() -> Self {
        Self
    }

    /// Runs `invocation` to completion, capturing stdout and stderr.
    pub async fn run(invocation: &Invocation) -> ProcessOutput {
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);
        if let Some(cwd) = &invocation.cwd {
            command.current_dir(cwd);
        }

        debug!(program = ?invocation.program, cwd = ?invocation.cwd, "starting subprocess");
        let output = match command.output().await {
            Ok(output) => output,
            Err(e) => {
                warn!(program = ?invocation.program, error = %e, "failed to start subprocess");
                return ProcessOutput::not_started(format!(
                    "failed to run {}: {}",
                    invocation.program.to_string_lossy(),
                    e
                ));
            }
        };

        let exit_code = output.status.code();
        debug!(program = ?invocation.program, exit_code = ?exit_code, "subprocess exited");

        let (stdout, stderr) = if invocation.text {
            (normalise_newlines(output.stdout), normalise_newlines(output.stderr))
        } else {
            (output.stdout, output.stderr)
        };
        ProcessOutput {
            stdout: Zeroizing::new(stdout),
            stderr,
            exit_code,
        }
    }
}

impl Runner for ProcessBridge {
    fn spawn(&self, ticket: Ticket, invocation: Invocation, completions: CompletionSender) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                let output = ProcessOutput::not_started(format!("no async runtime: {}", e));
                if completions.send(Completion { ticket, output }).is_err() {
                    debug!(ticket = ticket.0, "completion dropped, controller is gone");
                }
                return;
            }
        };
        handle.spawn(async move {
            let output = ProcessBridge::run(&invocation).await;
            if completions.send(Completion { ticket, output }).is_err() {
                debug!(ticket = ticket.0, "completion dropped, controller is gone");
            }
        });
    }
}

fn normalise_newlines(mut bytes: Vec<u8>) -> Vec<u8> {
    if !bytes.windows(2).any(|w| w == b"\r\n") {
        return bytes;
    }
    let mut out = Vec::with_capacity(bytes.len());
    let mut iter = bytes.iter().copied().peekable();
    while let Some(b) = iter.next() {
        if b == b'\r' && iter.peek() == Some(&b'\n') {
            continue;
        }
        out.push(b);
    }
    zeroize::Zeroize::zeroize(&mut bytes);
    out
}
