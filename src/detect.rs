//! Marker detection
//!
//! sops appends its metadata block (including the MAC) to the end of every
//! encrypted document, so only the tail needs to be scanned. Detection never
//! invokes the external tool.

use crate::document::Document;
use crate::format::Format;

/// Number of trailing lines scanned for the marker.
pub const DETECTION_WINDOW: usize = 20;

/// Returns true when the document's declared format is supported and its tail
/// carries that format's ciphertext marker.
pub fn is_encrypted(document: &Document) -> bool {
    match document.format() {
        Some(format) => contains_marker(document.lines(), format),
        None => false,
    }
}

/// Scans the last [`DETECTION_WINDOW`] lines for the format's marker.
pub fn contains_marker<S: AsRef<str>>(lines: &[S], format: Format) -> bool {
    let marker = format.marker();
    let start = lines.len().saturating_sub(DETECTION_WINDOW);
    lines[start..]
        .iter()
        .any(|line| line.as_ref().contains(marker))
}
