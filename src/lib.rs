//! sealbuf - transparent editing sessions for sops-encrypted YAML and JSON
//!
//! Opening an encrypted document swaps its ciphertext for plaintext and
//! reroutes every save through `sops edit`, driven non-interactively by the
//! `sealbuf-editor` substitute. Plaintext never reaches the backing file
//! through the host's own write path.

#![forbid(unsafe_code)]

pub mod bridge;
pub mod config;
pub mod detect;
pub mod document;
pub mod error;
pub mod format;
pub mod handshake;
pub mod host;
pub mod logging;
pub mod registry;
pub mod session;

pub use error::{ErrorCategory, ErrorKind, Result, SealbufError};
