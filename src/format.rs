//! Format descriptors for the structured text formats sops can encrypt
//!
//! Each descriptor ties a host filetype to the marker substring that betrays
//! ciphertext and to the `--input-type`/`--output-type` token handed to the
//! external tool. The table is closed: supporting a new format means adding a
//! descriptor here, configuration can only map file patterns onto it.

use std::fmt;
use std::str::FromStr;

use crate::error::{ErrorCategory, ErrorKind, SealbufError};

/// Supported content formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Yaml,
    /// Helm values files: YAML with its own filetype.
    Helm,
    Json,
}

#[derive(Debug)]
pub struct FormatDescriptor {
    pub format: Format,
    /// Host filetype name.
    pub filetype: &'static str,
    /// Substring of the sops MAC entry, present only in encrypted files.
    pub marker: &'static str,
    /// Value passed as `--input-type` and `--output-type`.
    pub type_token: &'static str,
}

static DESCRIPTORS: [FormatDescriptor; 3] = [
    FormatDescriptor {
        format: Format::Yaml,
        filetype: "yaml",
        marker: "mac: ENC[",
        type_token: "yaml",
    },
    FormatDescriptor {
        format: Format::Helm,
        filetype: "helm",
        marker: "mac: ENC[",
        type_token: "yaml",
    },
    FormatDescriptor {
        format: Format::Json,
        filetype: "json",
        marker: "\"mac\": \"ENC[",
        type_token: "json",
    },
];

impl Format {
    pub fn all() -> impl Iterator<Item = Format> {
        DESCRIPTORS.iter().map(|d| d.format)
    }

    /// Looks up the format registered for a host filetype.
    pub fn from_filetype(filetype: &str) -> Option<Format> {
        DESCRIPTORS
            .iter()
            .find(|d| d.filetype == filetype)
            .map(|d| d.format)
    }

    pub fn descriptor(self) -> &'static FormatDescriptor {
        match self {
            Format::Yaml => &DESCRIPTORS[0],
            Format::Helm => &DESCRIPTORS[1],
            Format::Json => &DESCRIPTORS[2],
        }
    }

    pub fn filetype(self) -> &'static str {
        self.descriptor().filetype
    }

    pub fn marker(self) -> &'static str {
        self.descriptor().marker
    }

    pub fn type_token(self) -> &'static str {
        self.descriptor().type_token
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.filetype())
    }
}

impl FromStr for Format {
    type Err = SealbufError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Format::from_filetype(s).ok_or_else(|| {
            SealbufError::with_kind(
                ErrorCategory::User,
                ErrorKind::UnsupportedFormat,
                format!("unknown format '{}' (expected one of: yaml, helm, json)", s),
            )
        })
    }
}
