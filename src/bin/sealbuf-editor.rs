//! Editor substitute handed to the encryption tool in place of `$EDITOR`.
//!
//! Invoked as `sealbuf-editor <FILE>`; copies the payload named by
//! `PLAINTEXT_SOURCE` over `<FILE>` and exits. Never prompts.

use clap::Parser;
use std::path::PathBuf;
use std::process;

use sealbuf::handshake::{self, PLAINTEXT_SOURCE_VAR};

#[derive(Parser)]
#[command(name = "sealbuf-editor")]
#[command(version)]
#[command(about = "Non-interactive editor stand-in for sops edit.", long_about = None)]
struct Cli {
    /// File the encryption tool expects to be edited
    #[arg(value_name = "FILE")]
    file: PathBuf,
}

fn main() {
    let cli = Cli::parse();
    let source = std::env::var_os(PLAINTEXT_SOURCE_VAR).map(PathBuf::from);

    if let Err(e) = handshake::substitute(&cli.file, source.as_deref()) {
        eprintln!("sealbuf-editor: {}", e.chain_message());
        process::exit(1);
    }
}
