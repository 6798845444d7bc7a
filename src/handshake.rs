//! Editor substitute
//!
//! `sops edit` decrypts the file into a temporary location, runs `$EDITOR` on
//! it and re-encrypts whatever the editor left there. The substitute stands in
//! for a human: it overwrites the tool's temporary file with the plaintext the
//! session staged, then exits. The whole contract is one argument (the tool's
//! temporary file) and one environment variable (the staged payload).

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use zeroize::Zeroizing;

use crate::error::{ErrorCategory, ErrorKind, Result, SealbufError};

/// Environment variable naming the staged plaintext payload.
pub const PLAINTEXT_SOURCE_VAR: &str = "PLAINTEXT_SOURCE";

/// Default environment variable through which the tool finds its editor.
pub const EDITOR_OVERRIDE_VAR: &str = "EDITOR_OVERRIDE";

/// Copies the payload at `source` over `target` byte-for-byte.
///
/// `target` is only opened once the payload has been read, so a missing
/// payload leaves the tool's file untouched and the caller exits non-zero.
pub fn substitute(target: &Path, source: Option<&Path>) -> Result<()> {
    let source = source.ok_or_else(|| {
        SealbufError::with_kind(
            ErrorCategory::User,
            ErrorKind::HandshakeSourceMissing,
            format!("{} is not set", PLAINTEXT_SOURCE_VAR),
        )
    })?;

    let payload = Zeroizing::new(fs::read(source).map_err(|e| {
        SealbufError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::HandshakeSourceMissing,
            format!("failed to read plaintext payload {}", source.display()),
            e,
        )
    })?);

    overwrite(target, &payload).map_err(|e| {
        SealbufError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::Io,
            format!("failed to write {}", target.display()),
            e,
        )
    })
}

fn overwrite(target: &Path, contents: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(target)?;
    file.write_all(contents)?;
    file.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_payload_replaces_tool_content() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("tool-tmp.yaml");
        let source = temp_dir.path().join("payload.yaml");
        fs::write(&target, b"apikey: oldvalue\nextra: line that must vanish\n").unwrap();
        fs::write(&source, b"apikey: newvalue\n").unwrap();

        substitute(&target, Some(&source)).unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"apikey: newvalue\n");
        assert_eq!(fs::read(&source).unwrap(), b"apikey: newvalue\n");
    }

    #[test]
    fn test_copy_is_byte_exact() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("tool-tmp");
        let source = temp_dir.path().join("payload");
        let bytes: Vec<u8> = (0..=255).collect();
        fs::write(&source, &bytes).unwrap();

        substitute(&target, Some(&source)).unwrap();

        assert_eq!(fs::read(&target).unwrap(), bytes);
    }

    #[test]
    fn test_missing_variable() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("tool-tmp.yaml");
        fs::write(&target, b"original\n").unwrap();

        let err = substitute(&target, None).expect_err("expected missing source error");
        assert_eq!(err.kind, Some(ErrorKind::HandshakeSourceMissing));
        assert_eq!(fs::read(&target).unwrap(), b"original\n");
    }

    #[test]
    fn test_missing_source_file_leaves_target_untouched() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("tool-tmp.yaml");
        let source = temp_dir.path().join("gone.yaml");
        fs::write(&target, b"original\n").unwrap();

        let err = substitute(&target, Some(&source)).expect_err("expected read failure");
        assert_eq!(err.kind, Some(ErrorKind::HandshakeSourceMissing));
        assert_eq!(fs::read(&target).unwrap(), b"original\n");
    }

    #[test]
    fn test_empty_payload_truncates_target() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("tool-tmp.json");
        let source = temp_dir.path().join("payload.json");
        fs::write(&target, b"{\"a\": 1}\n").unwrap();
        fs::write(&source, b"").unwrap();

        substitute(&target, Some(&source)).unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"");
    }
}
