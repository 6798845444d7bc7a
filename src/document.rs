//! In-memory editable documents
//!
//! A `Document` is owned by the host. The session controller only reads and
//! mutates it through the methods here.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::format::Format;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(pub u64);

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Document {
    id: DocumentId,
    lines: Vec<String>,
    modified: bool,
    path: PathBuf,
    filetype: String,
    write_intercepted: bool,
    /// Previous line sequences, most recent last.
    history: Vec<Vec<String>>,
    /// Bumped on every content change.
    revision: u64,
}

impl Document {
    pub fn new(
        id: DocumentId,
        path: impl Into<PathBuf>,
        filetype: impl Into<String>,
        lines: Vec<String>,
    ) -> Self {
        Self {
            id,
            lines,
            modified: false,
            path: path.into(),
            filetype: filetype.into(),
            write_intercepted: false,
            history: Vec::new(),
            revision: 0,
        }
    }

    /// Builds a document from raw file text.
    pub fn from_text(
        id: DocumentId,
        path: impl Into<PathBuf>,
        filetype: impl Into<String>,
        text: &str,
    ) -> Self {
        Self::new(id, path, filetype, split_text(text))
    }

    pub fn id(&self) -> DocumentId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn filetype(&self) -> &str {
        &self.filetype
    }

    /// The declared format, if the filetype has a descriptor.
    pub fn format(&self) -> Option<Format> {
        Format::from_filetype(&self.filetype)
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Replaces the content as a user edit: recorded in history, marks modified.
    pub fn set_lines(&mut self, lines: Vec<String>) {
        let previous = std::mem::replace(&mut self.lines, lines);
        self.history.push(previous);
        self.revision += 1;
        self.modified = true;
    }

    /// Replaces the content without recording the previous lines anywhere.
    pub fn replace_lines_unrecorded(&mut self, lines: Vec<String>) {
        self.lines = lines;
        self.revision += 1;
    }

    /// Reverts the most recent recorded change. Returns false when there is none.
    pub fn undo(&mut self) -> bool {
        match self.history.pop() {
            Some(previous) => {
                self.lines = previous;
                self.revision += 1;
                self.modified = true;
                true
            }
            None => false,
        }
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn set_modified(&mut self, modified: bool) {
        self.modified = modified;
    }

    pub fn is_write_intercepted(&self) -> bool {
        self.write_intercepted
    }

    pub fn set_write_intercepted(&mut self, intercepted: bool) {
        self.write_intercepted = intercepted;
    }

    /// Serializes the lines the way they are written to disk.
    pub fn to_text(&self) -> String {
        join_lines(&self.lines)
    }
}

/// Splits text on newline boundaries. A trailing newline does not produce an
/// extra empty line and `\r\n` endings are accepted.
pub fn split_text(text: &str) -> Vec<String> {
    text.lines().map(str::to_owned).collect()
}

/// Inverse of [`split_text`]: one `\n` after every line.
pub fn join_lines(lines: &[String]) -> String {
    let mut out = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(lines: &[&str]) -> Document {
        Document::new(
            DocumentId(1),
            "/tmp/secrets.yaml",
            "yaml",
            lines.iter().map(|l| l.to_string()).collect(),
        )
    }

    #[test]
    fn test_split_text() {
        assert_eq!(split_text("a: 1\nb: 2\n"), vec!["a: 1", "b: 2"]);
        assert_eq!(split_text("a: 1\r\nb: 2"), vec!["a: 1", "b: 2"]);
        assert!(split_text("").is_empty());
        assert_eq!(split_text("\n"), vec![""]);
    }

    #[test]
    fn test_join_lines_matches_split() {
        let text = "apikey: supersecret123\nother: value\n";
        assert_eq!(join_lines(&split_text(text)), text);
        assert_eq!(join_lines(&[]), "");
    }

    #[test]
    fn test_set_lines_records_history_and_marks_modified() {
        let mut d = doc(&["a: 1"]);
        d.set_lines(vec!["a: 2".to_string()]);
        assert!(d.is_modified());
        assert_eq!(d.history_len(), 1);
        assert!(d.undo());
        assert_eq!(d.lines(), ["a: 1"]);
        assert!(!d.undo());
    }

    #[test]
    fn test_unrecorded_replace_cannot_be_undone() {
        let mut d = doc(&["ciphertext"]);
        d.replace_lines_unrecorded(vec!["plaintext".to_string()]);
        assert!(!d.is_modified());
        assert!(!d.undo());
        assert_eq!(d.lines(), ["plaintext"]);
    }

    #[test]
    fn test_revision_tracks_changes() {
        let mut d = doc(&[]);
        let start = d.revision();
        d.set_lines(vec!["x".to_string()]);
        d.replace_lines_unrecorded(vec!["y".to_string()]);
        assert_eq!(d.revision(), start + 2);
    }

    #[test]
    fn test_format_from_filetype() {
        assert_eq!(doc(&[]).format(), Some(Format::Yaml));
        let d = Document::new(DocumentId(2), "/tmp/x.txt", "text", Vec::new());
        assert_eq!(d.format(), None);
    }
}
