//! Host environment seam
//!
//! The editing environment owns documents, their save path and the
//! notifications other tooling listens to. `Host` is the narrow surface the
//! session controller needs from it; `MemoryHost` is a complete in-process
//! implementation used by the command-line front end and by tests.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::Config;
use crate::document::{Document, DocumentId};
use crate::error::{ErrorCategory, ErrorKind, Result, SealbufError};

/// Registration of a save intercept. Releasing it restores the host's default write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookHandle(pub u64);

pub trait Host {
    fn document(&self, id: DocumentId) -> Option<&Document>;

    fn document_mut(&mut self, id: DocumentId) -> Option<&mut Document>;

    /// Routes every save of `id` to the session controller instead of the
    /// default file write.
    fn intercept_writes(&mut self, id: DocumentId) -> Result<HookHandle>;

    fn release_writes(&mut self, handle: HookHandle);

    /// Re-announces `id` as freshly loaded so filetype-dependent tooling
    /// re-evaluates its content.
    fn signal_loaded(&mut self, id: DocumentId) -> Result<()>;

    /// Shows `message` to the user.
    fn report_error(&mut self, id: DocumentId, message: &str);
}

/// Result of asking the host to save a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveRoute {
    /// Lines were written straight to the backing file.
    Written,
    /// A session owns the save path; nothing was written.
    Intercepted,
}

/// A direct write the host performed to a backing file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskWrite {
    pub document: DocumentId,
    pub path: PathBuf,
    pub contents: String,
}

#[derive(Debug, Default)]
pub struct MemoryHost {
    documents: BTreeMap<DocumentId, Document>,
    hooks: HashMap<HookHandle, DocumentId>,
    next_document: u64,
    next_hook: u64,
    disk_writes: Vec<DiskWrite>,
    load_signals: Vec<DocumentId>,
    errors: Vec<(DocumentId, String)>,
    fail_next_signal: bool,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads `path` into a new document, assigning the filetype by pattern.
    pub fn open(&mut self, path: &Path, config: &Config) -> Result<DocumentId> {
        let text = fs::read_to_string(path).map_err(|e| read_error(path, e))?;
        let filetype = config
            .format_for_path(path)
            .map(|f| f.filetype().to_string())
            .unwrap_or_default();
        let id = self.allocate_id();
        debug!(document = %id, path = %path.display(), filetype = %filetype, "opened");
        self.documents
            .insert(id, Document::from_text(id, path, filetype, &text));
        Ok(id)
    }

    /// Adds a document built elsewhere. Its id is replaced by a fresh one.
    pub fn insert(
        &mut self,
        path: impl Into<PathBuf>,
        filetype: &str,
        lines: Vec<String>,
    ) -> DocumentId {
        let id = self.allocate_id();
        self.documents
            .insert(id, Document::new(id, path, filetype, lines));
        id
    }

    /// Saves `id`: intercepted documents are left to the session, all others
    /// are written to their path.
    pub fn save(&mut self, id: DocumentId) -> Result<SaveRoute> {
        if self.is_intercepted(id) {
            return Ok(SaveRoute::Intercepted);
        }
        let document = self.documents.get_mut(&id).ok_or_else(|| missing(id))?;
        let contents = document.to_text();
        write_file(document.path(), contents.as_bytes()).map_err(|e| {
            SealbufError::with_kind_and_source(
                ErrorCategory::User,
                ErrorKind::Io,
                format!("failed to write {}", document.path().display()),
                e,
            )
        })?;
        document.set_modified(false);
        self.disk_writes.push(DiskWrite {
            document: id,
            path: document.path().to_path_buf(),
            contents,
        });
        Ok(SaveRoute::Written)
    }

    /// Drops the document. Hooks still registered for it are discarded.
    pub fn close(&mut self, id: DocumentId) -> Option<Document> {
        self.hooks.retain(|_, doc| *doc != id);
        self.documents.remove(&id)
    }

    pub fn is_intercepted(&self, id: DocumentId) -> bool {
        self.hooks.values().any(|doc| *doc == id)
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.len()
    }

    pub fn disk_writes(&self) -> &[DiskWrite] {
        &self.disk_writes
    }

    pub fn load_signals(&self) -> &[DocumentId] {
        &self.load_signals
    }

    pub fn errors(&self) -> &[(DocumentId, String)] {
        &self.errors
    }

    /// Makes the next `signal_loaded` call fail.
    pub fn fail_next_signal(&mut self) {
        self.fail_next_signal = true;
    }

    fn allocate_id(&mut self) -> DocumentId {
        self.next_document += 1;
        DocumentId(self.next_document)
    }
}

impl Host for MemoryHost {
    fn document(&self, id: DocumentId) -> Option<&Document> {
        self.documents.get(&id)
    }

    fn document_mut(&mut self, id: DocumentId) -> Option<&mut Document> {
        self.documents.get_mut(&id)
    }

    fn intercept_writes(&mut self, id: DocumentId) -> Result<HookHandle> {
        if !self.documents.contains_key(&id) {
            return Err(missing(id));
        }
        self.next_hook += 1;
        let handle = HookHandle(self.next_hook);
        self.hooks.insert(handle, id);
        Ok(handle)
    }

    fn release_writes(&mut self, handle: HookHandle) {
        if self.hooks.remove(&handle).is_none() {
            debug!(hook = handle.0, "release of unknown hook ignored");
        }
    }

    fn signal_loaded(&mut self, id: DocumentId) -> Result<()> {
        if std::mem::take(&mut self.fail_next_signal) {
            return Err(SealbufError::with_kind(
                ErrorCategory::Internal,
                ErrorKind::HostSignal,
                format!("loaded notification for {} failed", id),
            ));
        }
        self.load_signals.push(id);
        Ok(())
    }

    fn report_error(&mut self, id: DocumentId, message: &str) {
        debug!(document = %id, "{}", message);
        self.errors.push((id, message.to_string()));
    }
}

fn missing(id: DocumentId) -> SealbufError {
    SealbufError::with_kind(
        ErrorCategory::Internal,
        ErrorKind::DocumentMissing,
        format!("document {} is not open", id),
    )
}

fn read_error(path: &Path, err: io::Error) -> SealbufError {
    let category = if err.kind() == io::ErrorKind::NotFound {
        ErrorCategory::User
    } else {
        ErrorCategory::Internal
    };
    SealbufError::with_kind_and_source(
        category,
        ErrorKind::Io,
        format!("failed to read from {}", path.display()),
        err,
    )
}

fn write_file(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.write_all(contents)
}
