//! Per-document sessions
//!
//! A session exists exactly while its document is decrypted and
//! write-intercepted. It owns the host hook that reroutes saves.

use std::collections::HashMap;

use crate::document::DocumentId;
use crate::error::{ErrorCategory, ErrorKind, Result, SealbufError};
use crate::host::HookHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub document: DocumentId,
    pub hook: HookHandle,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<DocumentId, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `session`. At most one session per document.
    pub fn insert(&mut self, session: Session) -> Result<()> {
        if self.sessions.contains_key(&session.document) {
            return Err(SealbufError::with_kind(
                ErrorCategory::Internal,
                ErrorKind::SessionConflict,
                format!("document {} already has a session", session.document),
            ));
        }
        self.sessions.insert(session.document, session);
        Ok(())
    }

    pub fn remove(&mut self, document: DocumentId) -> Option<Session> {
        self.sessions.remove(&document)
    }

    pub fn get(&self, document: DocumentId) -> Option<&Session> {
        self.sessions.get(&document)
    }

    pub fn contains(&self, document: DocumentId) -> bool {
        self.sessions.contains_key(&document)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
