//! Session controller
//!
//! Per document the controller moves through
//!
//! ```text
//! Plain --open--> Decrypting --ok--> PlaintextSession --save--> Encrypting
//!   ^                 |                  ^     |                   |
//!   +-----failure-----+                  |     +--close--> (gone)  |
//!                                        +-------ok / failure------+
//! ```
//!
//! Document state is only ever touched from the controller's own methods.
//! Subprocess completions arrive on a channel and are applied by
//! [`SessionController::complete`], which the host calls from its main
//! context (directly, via [`SessionController::try_drain`] or by awaiting
//! [`SessionController::settle`]).

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::bridge::{
    Completion, CompletionReceiver, CompletionSender, Invocation, ProcessOutput, Runner, Ticket,
};
use crate::config::Config;
use crate::detect;
use crate::document::{DocumentId, split_text};
use crate::error::{ErrorCategory, ErrorKind, Result, SealbufError};
use crate::handshake::PLAINTEXT_SOURCE_VAR;
use crate::host::Host;
use crate::registry::{Session, SessionRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session: never encrypted, or not decrypted yet.
    Plain,
    Decrypting,
    /// Decrypted and write-intercepted.
    PlaintextSession,
    Encrypting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    NotEncrypted,
    Decrypting,
    /// Another operation is in flight for this document.
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// No session; the host performs its default write.
    NotIntercepted,
    /// Nothing changed since the last decrypt or encrypt; no tool run.
    Unchanged,
    Encrypting,
    Busy,
}

/// Notifications from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    Opened(DocumentId),
    SaveRequested(DocumentId),
    Closed(DocumentId),
}

#[derive(Debug)]
enum Pending {
    Decrypt {
        document: DocumentId,
    },
    Encrypt {
        document: DocumentId,
        /// Staged plaintext, removed when the request finishes either way.
        payload: NamedTempFile,
        /// Document revision that was serialized into `payload`.
        revision: u64,
    },
}

pub struct SessionController<H: Host, R: Runner> {
    host: H,
    runner: R,
    config: Config,
    registry: SessionRegistry,
    /// Document -> ticket of its in-flight operation.
    busy: HashMap<DocumentId, Ticket>,
    pending: HashMap<Ticket, Pending>,
    next_ticket: u64,
    sender: CompletionSender,
    receiver: CompletionReceiver,
}

impl<H: Host, R: Runner> SessionController<H, R> {
    pub fn new(host: H, runner: R, config: Config) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            host,
            runner,
            config,
            registry: SessionRegistry::new(),
            busy: HashMap::new(),
            pending: HashMap::new(),
            next_ticket: 0,
            sender,
            receiver,
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn into_host(self) -> H {
        self.host
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Number of subprocesses whose completion has not been applied yet.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    pub fn state(&self, id: DocumentId) -> SessionState {
        if let Some(ticket) = self.busy.get(&id) {
            return match self.pending.get(ticket) {
                Some(Pending::Encrypt { .. }) => SessionState::Encrypting,
                _ => SessionState::Decrypting,
            };
        }
        if self.registry.contains(id) {
            SessionState::PlaintextSession
        } else {
            SessionState::Plain
        }
    }

    pub fn dispatch(&mut self, event: HostEvent) -> Result<()> {
        match event {
            HostEvent::Opened(id) => self.on_open(id).map(|_| ()),
            HostEvent::SaveRequested(id) => self.on_save(id).map(|_| ()),
            HostEvent::Closed(id) => {
                self.on_close(id);
                Ok(())
            }
        }
    }

    /// Document-loaded handler: starts a decrypt when the content is ciphertext.
    pub fn on_open(&mut self, id: DocumentId) -> Result<OpenOutcome> {
        let document = self.host.document(id).ok_or_else(|| missing(id))?;
        if self.busy.contains_key(&id) {
            debug!(document = %id, "open ignored, operation in flight");
            return Ok(OpenOutcome::Busy);
        }
        if !detect::is_encrypted(document) {
            return Ok(OpenOutcome::NotEncrypted);
        }
        let Some(format) = document.format() else {
            return Ok(OpenOutcome::NotEncrypted);
        };

        let token = format.type_token();
        let mut invocation = Invocation::new(self.config.tool.as_os_str())
            .arg("--decrypt")
            .args(["--input-type", token, "--output-type", token])
            .arg(document.path().as_os_str());
        if let Some(dir) = containing_dir(document.path()) {
            invocation = invocation.current_dir(dir);
        }

        info!(document = %id, path = %document.path().display(), format = %format, "decrypting");
        self.launch(id, Pending::Decrypt { document: id }, invocation);
        Ok(OpenOutcome::Decrypting)
    }

    /// Save handler. Only documents with a session are handled; unmodified
    /// plaintext is never re-encrypted since every encrypt yields a fresh
    /// ciphertext.
    pub fn on_save(&mut self, id: DocumentId) -> Result<SaveOutcome> {
        let document = self.host.document(id).ok_or_else(|| missing(id))?;
        if !self.registry.contains(id) {
            return Ok(SaveOutcome::NotIntercepted);
        }
        if self.busy.contains_key(&id) {
            debug!(document = %id, "save ignored, operation in flight");
            return Ok(SaveOutcome::Busy);
        }
        if !document.is_modified() {
            debug!(document = %id, "save skipped, document unmodified");
            return Ok(SaveOutcome::Unchanged);
        }

        let text = Zeroizing::new(document.to_text());
        let payload = self
            .stage_payload(document.path(), text.as_bytes())
            .map_err(|e| e.with_context(format!("failed to save {}", document.path().display())))?;
        let revision = document.revision();

        let mut invocation = Invocation::new(self.config.tool.as_os_str())
            .arg("edit")
            .arg(document.path().as_os_str())
            .env(
                self.config.editor_var.as_str(),
                self.config.editor_substitute_path(),
            )
            .env(PLAINTEXT_SOURCE_VAR, payload.path());
        if let Some(dir) = containing_dir(document.path()) {
            invocation = invocation.current_dir(dir);
        }

        info!(document = %id, path = %document.path().display(), "encrypting");
        self.launch(
            id,
            Pending::Encrypt {
                document: id,
                payload,
                revision,
            },
            invocation,
        );
        Ok(SaveOutcome::Encrypting)
    }

    /// Document-closed handler. Safe to call for documents without a session.
    pub fn on_close(&mut self, id: DocumentId) {
        if self.busy.remove(&id).is_some() {
            debug!(document = %id, "closed with operation in flight, result will be discarded");
        }
        if let Some(session) = self.registry.remove(id) {
            self.host.release_writes(session.hook);
            info!(document = %id, "session ended");
        }
    }

    /// Applies one subprocess completion. Must run on the main context.
    pub fn complete(&mut self, completion: Completion) {
        let Completion { ticket, output } = completion;
        let Some(pending) = self.pending.remove(&ticket) else {
            warn!(ticket = ticket.0, "completion for unknown request");
            return;
        };

        match pending {
            Pending::Decrypt { document } => {
                if self.claim(document, ticket) {
                    self.finish_decrypt(document, &output);
                }
            }
            Pending::Encrypt {
                document,
                payload,
                revision,
            } => {
                let payload_path = payload.path().to_path_buf();
                if let Err(e) = payload.close() {
                    warn!(path = %payload_path.display(), error = %e, "failed to remove plaintext payload");
                }
                if self.claim(document, ticket) {
                    self.finish_encrypt(document, revision, &output);
                }
            }
        }
    }

    /// Applies every completion already queued without waiting.
    pub fn try_drain(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(completion) = self.receiver.try_recv() {
            self.complete(completion);
            applied += 1;
        }
        applied
    }

    /// Waits for the next completion. `None` when nothing is in flight.
    pub async fn next_completion(&mut self) -> Option<Completion> {
        if self.pending.is_empty() {
            return None;
        }
        self.receiver.recv().await
    }

    /// Applies completions until no operation is in flight.
    pub async fn settle(&mut self) {
        while let Some(completion) = self.next_completion().await {
            self.complete(completion);
        }
    }

    fn launch(&mut self, document: DocumentId, pending: Pending, invocation: Invocation) {
        self.next_ticket += 1;
        let ticket = Ticket(self.next_ticket);
        self.pending.insert(ticket, pending);
        self.busy.insert(document, ticket);
        self.runner.spawn(ticket, invocation, self.sender.clone());
    }

    /// Releases the busy slot if `ticket` still owns it. A stale ticket means
    /// the document was closed while the tool ran.
    fn claim(&mut self, document: DocumentId, ticket: Ticket) -> bool {
        if self.busy.get(&document) != Some(&ticket) {
            debug!(document = %document, ticket = ticket.0, "discarding result for closed document");
            return false;
        }
        self.busy.remove(&document);
        true
    }

    fn finish_decrypt(&mut self, id: DocumentId, output: &ProcessOutput) {
        let Some(document) = self.host.document(id) else {
            debug!(document = %id, "document gone before decrypt finished");
            return;
        };
        if !output.success() {
            let message = tool_failure(&self.config, "decrypt", document.path(), output);
            self.abandon_decrypt(id, message);
            return;
        }
        let plaintext = match std::str::from_utf8(&output.stdout) {
            Ok(text) => text,
            Err(e) => {
                let message = SealbufError::with_kind_and_source(
                    ErrorCategory::User,
                    ErrorKind::ToolFailed,
                    format!(
                        "{} produced invalid UTF-8 decrypting {}",
                        self.config.tool.display(),
                        document.path().display()
                    ),
                    e,
                );
                self.abandon_decrypt(id, message);
                return;
            }
        };

        // The hook is acquired before any mutation so the document is never
        // plaintext without its save path being intercepted.
        let existing = self.registry.get(id).map(|s| s.hook);
        let hook = match existing {
            Some(hook) => hook,
            None => match self.host.intercept_writes(id) {
                Ok(hook) => hook,
                Err(e) => {
                    let e = e.with_context("failed to intercept saves, leaving document encrypted");
                    self.host.report_error(id, &e.chain_message());
                    return;
                }
            },
        };

        let Some(document) = self.host.document_mut(id) else {
            return;
        };
        document.replace_lines_unrecorded(split_text(plaintext));
        document.set_write_intercepted(true);
        document.clear_history();
        document.set_modified(false);

        if let Err(e) = self.host.signal_loaded(id) {
            warn!(document = %id, error = %e, "loaded notification failed");
            self.host.report_error(id, &e.chain_message());
        }

        if existing.is_none() {
            if let Err(e) = self.registry.insert(Session { document: id, hook }) {
                self.host.report_error(id, &e.chain_message());
                return;
            }
            info!(document = %id, "session started");
        } else {
            debug!(document = %id, "reloaded into existing session");
        }
    }

    /// Reports a failed decrypt. A document reloaded into a live session now
    /// holds ciphertext, so the session ends and saves go back to the host.
    fn abandon_decrypt(&mut self, id: DocumentId, error: SealbufError) {
        self.host.report_error(id, &error.chain_message());
        let Some(session) = self.registry.remove(id) else {
            return;
        };
        self.host.release_writes(session.hook);
        if let Some(document) = self.host.document_mut(id) {
            document.set_write_intercepted(false);
        }
        info!(document = %id, "session ended, reload could not be decrypted");
    }

    fn finish_encrypt(&mut self, id: DocumentId, revision: u64, output: &ProcessOutput) {
        let Some(document) = self.host.document_mut(id) else {
            debug!(document = %id, "document gone before encrypt finished");
            return;
        };
        if !output.success() {
            let message = tool_failure(&self.config, "encrypt", document.path(), output);
            self.host.report_error(id, &message.chain_message());
            return;
        }
        if document.revision() == revision {
            document.set_modified(false);
            info!(document = %id, "encrypted");
        } else {
            debug!(document = %id, "document edited while encrypting, still modified");
        }
    }

    fn stage_payload(&self, target: &Path, contents: &[u8]) -> Result<NamedTempFile> {
        let suffix = target
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        let mut builder = tempfile::Builder::new();
        builder.prefix("sealbuf-").suffix(&suffix);
        let created = match &self.config.payload_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        };
        let mut payload = created.map_err(|e| {
            SealbufError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::Io,
                "failed to create plaintext payload",
                e,
            )
        })?;
        payload
            .write_all(contents)
            .and_then(|()| payload.flush())
            .map_err(|e| {
                SealbufError::with_kind_and_source(
                    ErrorCategory::Internal,
                    ErrorKind::Io,
                    "failed to write plaintext payload",
                    e,
                )
            })?;
        Ok(payload)
    }
}

fn containing_dir(path: &Path) -> Option<&Path> {
    path.parent().filter(|dir| !dir.as_os_str().is_empty())
}

fn missing(id: DocumentId) -> SealbufError {
    SealbufError::with_kind(
        ErrorCategory::Internal,
        ErrorKind::DocumentMissing,
        format!("document {} is not open", id),
    )
}

fn tool_failure(
    config: &Config,
    action: &str,
    path: &Path,
    output: &ProcessOutput,
) -> SealbufError {
    let tool = config.tool.display();
    let stderr = output.stderr_text();
    match output.exit_code {
        Some(code) => SealbufError::with_kind(
            ErrorCategory::User,
            ErrorKind::ToolFailed,
            format!(
                "{} failed to {} {} (exit status {}): {}",
                tool,
                action,
                path.display(),
                code,
                stderr
            ),
        ),
        None => SealbufError::with_kind(
            ErrorCategory::User,
            ErrorKind::ToolUnavailable,
            format!("could not {} {}: {}", action, path.display(), stderr),
        ),
    }
}
