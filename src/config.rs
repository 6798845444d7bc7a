//! Configuration: which tool to run, where the editor substitute lives, and
//! which file patterns map onto which format.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ErrorCategory, ErrorKind, Result, SealbufError};
use crate::format::Format;
use crate::handshake::EDITOR_OVERRIDE_VAR;

/// File name of the editor substitute binary.
pub const EDITOR_SUBSTITUTE_BIN: &str = "sealbuf-editor";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// External encryptor program.
    pub tool: PathBuf,
    /// Editor substitute executable. Resolved next to the running binary when unset.
    pub editor_substitute: Option<PathBuf>,
    /// Environment variable the tool reads to find its editor.
    pub editor_var: String,
    /// Where plaintext payloads are staged during an encrypt. OS temp dir when unset.
    pub payload_dir: Option<PathBuf>,
    /// File-pattern associations, first match wins.
    pub patterns: Vec<PatternAssociation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternAssociation {
    pub glob: String,
    pub format: String,
}

impl PatternAssociation {
    pub fn new(glob: impl Into<String>, format: Format) -> Self {
        Self {
            glob: glob.into(),
            format: format.filetype().to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tool: PathBuf::from("sops"),
            editor_substitute: None,
            editor_var: EDITOR_OVERRIDE_VAR.to_string(),
            payload_dir: None,
            patterns: vec![
                PatternAssociation::new("*.yaml", Format::Yaml),
                PatternAssociation::new("*.yml", Format::Yaml),
                PatternAssociation::new("*.json", Format::Json),
            ],
        }
    }
}

impl Config {
    /// Reads and validates a TOML configuration file.
    pub fn load(path: &Path) -> Result<Config> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            SealbufError::with_kind_and_source(
                ErrorCategory::User,
                ErrorKind::Config,
                format!("failed to read config {}", path.display()),
                e,
            )
        })?;
        let config = Config::parse(&contents)
            .map_err(|e| e.with_context(format!("invalid config {}", path.display())))?;
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Config> {
        let config: Config = toml::from_str(contents).map_err(|e| {
            SealbufError::with_kind_and_source(
                ErrorCategory::User,
                ErrorKind::Config,
                "failed to parse TOML",
                e,
            )
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads an explicit config path, or the default path when it exists, or
    /// falls back to built-in defaults.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Config> {
        if let Some(path) = explicit {
            return Config::load(path);
        }
        match Config::default_path() {
            Some(path) if path.is_file() => Config::load(&path),
            _ => Ok(Config::default()),
        }
    }

    /// `$XDG_CONFIG_HOME/sealbuf/config.toml`, else `$HOME/.config/sealbuf/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        if let Ok(value) = std::env::var("XDG_CONFIG_HOME") {
            if !value.trim().is_empty() {
                return Some(PathBuf::from(value).join("sealbuf").join("config.toml"));
            }
        }
        let home = std::env::var("HOME").ok()?;
        Some(
            PathBuf::from(home)
                .join(".config")
                .join("sealbuf")
                .join("config.toml"),
        )
    }

    fn validate(&self) -> Result<()> {
        for assoc in &self.patterns {
            if Format::from_filetype(&assoc.format).is_none() {
                return Err(SealbufError::with_kind(
                    ErrorCategory::User,
                    ErrorKind::Config,
                    format!(
                        "pattern '{}' maps to unknown format '{}'",
                        assoc.glob, assoc.format
                    ),
                ));
            }
            if assoc.glob.is_empty() {
                return Err(SealbufError::with_kind(
                    ErrorCategory::User,
                    ErrorKind::Config,
                    "empty file pattern",
                ));
            }
        }
        if self.editor_var.is_empty() {
            return Err(SealbufError::with_kind(
                ErrorCategory::User,
                ErrorKind::Config,
                "editor_var must not be empty",
            ));
        }
        Ok(())
    }

    /// Format of the first pattern matching `path`. Patterns with a `/` see
    /// the absolute path, all others only the file name.
    pub fn format_for_path(&self, path: &Path) -> Option<Format> {
        let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        let full = absolute.to_string_lossy();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_else(|| full.clone());
        self.patterns
            .iter()
            .find(|assoc| {
                let subject = if assoc.glob.contains('/') { &full } else { &name };
                glob_match(&assoc.glob, subject)
            })
            .and_then(|assoc| Format::from_filetype(&assoc.format))
    }

    /// The editor substitute to hand to the tool.
    pub fn editor_substitute_path(&self) -> PathBuf {
        if let Some(path) = &self.editor_substitute {
            return path.clone();
        }
        let sibling = std::env::current_exe().ok().and_then(|exe| {
            let candidate = exe.parent()?.join(EDITOR_SUBSTITUTE_BIN);
            candidate.is_file().then_some(candidate)
        });
        sibling.unwrap_or_else(|| PathBuf::from(EDITOR_SUBSTITUTE_BIN))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GlobToken {
    /// `*` stays within one path component, `**` may cross `/`.
    Star { crosses_separator: bool },
    Any,
    Literal(char),
}

fn tokenize_glob(pattern: &str) -> Vec<GlobToken> {
    let mut tokens = Vec::new();
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        let token = match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                GlobToken::Star {
                    crosses_separator: true,
                }
            }
            '*' => GlobToken::Star {
                crosses_separator: false,
            },
            '?' => GlobToken::Any,
            other => GlobToken::Literal(other),
        };
        tokens.push(token);
    }
    tokens
}

fn glob_match(pattern: &str, subject: &str) -> bool {
    let tokens = tokenize_glob(pattern);
    let chars: Vec<char> = subject.chars().collect();
    match_tokens(&tokens, &chars)
}

fn match_tokens(tokens: &[GlobToken], subject: &[char]) -> bool {
    match tokens.split_first() {
        None => subject.is_empty(),
        Some((GlobToken::Star { crosses_separator }, rest)) => {
            // `**/` may also stand for no directory at all.
            if let [GlobToken::Literal('/'), after @ ..] = rest {
                if *crosses_separator && match_tokens(after, subject) {
                    return true;
                }
            }
            let mut taken = 0;
            loop {
                if match_tokens(rest, &subject[taken..]) {
                    return true;
                }
                if taken == subject.len() || (!crosses_separator && subject[taken] == '/') {
                    return false;
                }
                taken += 1;
            }
        }
        Some((GlobToken::Any, rest)) => match subject.split_first() {
            Some((c, tail)) if *c != '/' => match_tokens(rest, tail),
            _ => false,
        },
        Some((GlobToken::Literal(expected), rest)) => match subject.split_first() {
            Some((c, tail)) if c == expected => match_tokens(rest, tail),
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("*.yaml", "secrets.yaml"));
        assert!(glob_match("*.sops.yaml", "prod.sops.yaml"));
        assert!(!glob_match("*.yaml", "secrets.yaml.bak"));
        assert!(glob_match("values-?.yaml", "values-a.yaml"));
        assert!(!glob_match("values-?.yaml", "values-ab.yaml"));
        assert!(glob_match("**/charts/*.yaml", "/srv/charts/values.yaml"));
        assert!(!glob_match("*/charts/*.yaml", "/srv/charts/values.yaml"));
        assert!(!glob_match("/srv/*.yaml", "/srv/charts/values.yaml"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("**/charts/*.yaml", "charts/values.yaml"));
        assert!(glob_match("deploy/**/*.json", "deploy/creds.json"));
        assert!(!glob_match("*/charts/*.yaml", "charts/values.yaml"));
    }

    #[test]
    fn test_directory_pattern_matches_relative_path() {
        let config = Config::parse(
            r#"
[[patterns]]
glob = "**/charts/*.yaml"
format = "helm"
"#,
        )
        .unwrap();
        assert_eq!(
            config.format_for_path(Path::new("charts/values.yaml")),
            Some(Format::Helm)
        );
        assert_eq!(
            config.format_for_path(Path::new("/srv/charts/values.yaml")),
            Some(Format::Helm)
        );
        assert_eq!(config.format_for_path(Path::new("values.yaml")), None);
    }

    #[test]
    fn test_default_patterns() {
        let config = Config::default();
        assert_eq!(
            config.format_for_path(Path::new("/srv/secrets.yaml")),
            Some(Format::Yaml)
        );
        assert_eq!(
            config.format_for_path(Path::new("app.yml")),
            Some(Format::Yaml)
        );
        assert_eq!(
            config.format_for_path(Path::new("creds.json")),
            Some(Format::Json)
        );
        assert_eq!(config.format_for_path(Path::new("notes.txt")), None);
    }

    #[test]
    fn test_parse_custom_patterns_first_match_wins() {
        let config = Config::parse(
            r#"
tool = "/usr/local/bin/sops"

[[patterns]]
glob = "**/charts/*.yaml"
format = "helm"

[[patterns]]
glob = "*.yaml"
format = "yaml"
"#,
        )
        .unwrap();

        assert_eq!(config.tool, PathBuf::from("/usr/local/bin/sops"));
        assert_eq!(config.editor_var, EDITOR_OVERRIDE_VAR);
        assert_eq!(
            config.format_for_path(Path::new("/srv/charts/values.yaml")),
            Some(Format::Helm)
        );
        assert_eq!(
            config.format_for_path(Path::new("/srv/other.yaml")),
            Some(Format::Yaml)
        );
        assert_eq!(config.format_for_path(Path::new("/srv/other.json")), None);
    }

    #[test]
    fn test_unknown_format_is_rejected() {
        let err = Config::parse(
            r#"
[[patterns]]
glob = "*.ini"
format = "ini"
"#,
        )
        .expect_err("expected unknown format error");
        assert_eq!(err.kind, Some(ErrorKind::Config));
    }

    #[test]
    fn test_malformed_toml() {
        let err = Config::parse("tool = [").expect_err("expected parse error");
        assert_eq!(err.kind, Some(ErrorKind::Config));
    }

    #[test]
    fn test_load_missing_explicit_file() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("nope.toml");
        let err = Config::load_or_default(Some(&missing)).expect_err("expected read error");
        assert_eq!(err.kind, Some(ErrorKind::Config));
        assert_eq!(err.category, ErrorCategory::User);
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "tool = \"fake-sops\"\neditor_var = \"SOPS_EDITOR\"\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.tool, PathBuf::from("fake-sops"));
        assert_eq!(config.editor_var, "SOPS_EDITOR");
        assert_eq!(config.patterns, Config::default().patterns);
    }

    #[test]
    fn test_explicit_editor_substitute() {
        let config = Config {
            editor_substitute: Some(PathBuf::from("/opt/sealbuf-editor")),
            ..Config::default()
        };
        assert_eq!(
            config.editor_substitute_path(),
            PathBuf::from("/opt/sealbuf-editor")
        );
    }
}
