//! sealbuf CLI - decrypt and re-encrypt sops files through an editing session
//!
//! Each command opens the file in an in-memory host and drives the same
//! session controller an editor integration uses.

use clap::{ArgAction, Parser, Subcommand};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;

use sealbuf::bridge::ProcessBridge;
use sealbuf::config::Config;
use sealbuf::detect;
use sealbuf::document::{DocumentId, split_text};
use sealbuf::host::{Host, MemoryHost, SaveRoute};
use sealbuf::logging;
use sealbuf::session::{OpenOutcome, SaveOutcome, SessionController};
use sealbuf::{ErrorCategory, ErrorKind, Result, SealbufError};
use zeroize::Zeroizing;

type Controller = SessionController<MemoryHost, ProcessBridge>;

#[derive(Parser)]
#[command(name = "sealbuf")]
#[command(version)]
#[command(about = "Transparent editing of sops-encrypted YAML and JSON files.", long_about = None)]
struct Cli {
    /// Configuration file (defaults to $XDG_CONFIG_HOME/sealbuf/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Encryption tool to run instead of the configured one
    #[arg(long, global = true, value_name = "PROGRAM")]
    tool: Option<PathBuf>,

    /// Increase log verbosity (repeatable)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report whether a file holds sops ciphertext
    Detect {
        /// Path to the file to inspect
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Decrypt a file and print its plaintext
    #[command(alias = "s")]
    Show {
        /// Path to the file to decrypt
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Replace the content of an encrypted file, re-encrypting it in place
    #[command(alias = "u")]
    Update {
        /// Path to the file holding the new plaintext
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Path to the existing encrypted file to update
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e.chain_message());
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load_or_default(cli.config.as_deref())?;
    if let Some(tool) = cli.tool {
        config.tool = tool;
    }

    match cli.command {
        Commands::Detect { file } => detect_file(&file, &config),
        Commands::Show { file } => runtime()?.block_on(show(&file, config)),
        Commands::Update { input, output } => {
            runtime()?.block_on(update(&input, &output, config))
        }
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            SealbufError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::Io,
                "failed to start async runtime",
                e,
            )
        })
}

fn detect_file(path: &Path, config: &Config) -> Result<()> {
    let mut host = MemoryHost::new();
    let id = host.open(path, config)?;
    let encrypted = host.document(id).is_some_and(detect::is_encrypted);
    println!("{}", if encrypted { "encrypted" } else { "plain" });
    Ok(())
}

async fn show(path: &Path, config: Config) -> Result<()> {
    let (mut controller, id) = open(path, config)?;
    controller.on_open(id)?;
    controller.settle().await;
    check_reported(&controller, id)?;

    let document = controller.host().document(id).ok_or_else(|| gone(id))?;
    let text = Zeroizing::new(document.to_text());
    let mut stdout = io::stdout().lock();
    stdout
        .write_all(text.as_bytes())
        .and_then(|()| stdout.flush())
        .map_err(|e| {
            SealbufError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::Io,
                "failed to write to stdout",
                e,
            )
        })?;

    close(&mut controller, id);
    Ok(())
}

async fn update(plain_path: &Path, crypt_path: &Path, config: Config) -> Result<()> {
    let new_plaintext = Zeroizing::new(std::fs::read_to_string(plain_path).map_err(|e| {
        SealbufError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::Io,
            format!("failed to read from {}", plain_path.display()),
            e,
        )
    })?);

    let (mut controller, id) = open(crypt_path, config)?;
    if controller.on_open(id)? != OpenOutcome::Decrypting {
        return Err(SealbufError::with_kind(
            ErrorCategory::User,
            ErrorKind::UnsupportedFormat,
            format!(
                "{} is not a sops-encrypted file of a supported format",
                crypt_path.display()
            ),
        ));
    }
    controller.settle().await;
    check_reported(&controller, id)?;

    let lines = split_text(&new_plaintext);
    let document = controller
        .host_mut()
        .document_mut(id)
        .ok_or_else(|| gone(id))?;
    if document.lines() == lines.as_slice() {
        tracing::info!(path = %crypt_path.display(), "content unchanged, not re-encrypting");
    } else {
        document.set_lines(lines);
    }

    if controller.host_mut().save(id)? != SaveRoute::Intercepted {
        return Err(SealbufError::with_kind(
            ErrorCategory::Internal,
            ErrorKind::InternalInvariant,
            "decrypted document was saved without interception",
        ));
    }
    if controller.on_save(id)? == SaveOutcome::Encrypting {
        controller.settle().await;
        check_reported(&controller, id)?;
    }

    close(&mut controller, id);
    Ok(())
}

fn open(path: &Path, config: Config) -> Result<(Controller, DocumentId)> {
    let mut host = MemoryHost::new();
    let id = host.open(path, &config)?;
    Ok((SessionController::new(host, ProcessBridge::new(), config), id))
}

fn close(controller: &mut Controller, id: DocumentId) {
    controller.on_close(id);
    controller.host_mut().close(id);
}

/// Turns the last error shown to the "user" of the in-memory host into a failure.
fn check_reported(controller: &Controller, id: DocumentId) -> Result<()> {
    match controller.host().errors().iter().rev().find(|(doc, _)| *doc == id) {
        Some((_, message)) => Err(SealbufError::with_kind(
            ErrorCategory::User,
            ErrorKind::ToolFailed,
            message.clone(),
        )),
        None => Ok(()),
    }
}

fn gone(id: DocumentId) -> SealbufError {
    SealbufError::with_kind(
        ErrorCategory::Internal,
        ErrorKind::DocumentMissing,
        format!("document {} disappeared", id),
    )
}
