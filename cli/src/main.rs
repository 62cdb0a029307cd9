use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use drawbak_kernel::{ArchiveConfig, BackupStatus, DocumentService, SnapshotArchive};

/// Drawbak scene persistence helper
#[derive(Parser, Debug)]
#[command(name = "drawbak")]
#[command(about = "Load and save scene files with rolling zip backups", long_about = None)]
struct Cli {
    /// Path to archive config JSON
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a document, snapshot it, and print its contents
    Open { document: PathBuf },

    /// Write a document from a file or stdin
    Save {
        document: PathBuf,

        /// Read contents from this file instead of stdin
        #[arg(long)]
        input: Option<PathBuf>,
    },

    /// Snapshot raw bytes from a file or stdin without validation
    Append {
        document: PathBuf,

        /// Read the payload from this file instead of stdin
        #[arg(long)]
        input: Option<PathBuf>,
    },

    /// List snapshot entries for a document, oldest first
    List { document: PathBuf },
}

/// JSON summary written to stderr after `open`
#[derive(Debug, Serialize)]
struct OpenReport<'a> {
    document: &'a Path,
    bytes: usize,
    backup: &'a BackupStatus,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    // ----------------------------
    // Load config
    // ----------------------------
    let config = match &cli.config {
        Some(path) => {
            let data = fs::read_to_string(path)
                .with_context(|| format!("read config {}", path.display()))?;
            ArchiveConfig::from_json(&data)
                .with_context(|| format!("parse config {}", path.display()))?
        }
        None => ArchiveConfig::default(),
    };

    let archive = SnapshotArchive::new(config).context("invalid archive config")?;
    let service = DocumentService::new(archive);

    match cli.command {
        Command::Open { document } => {
            let opened = service.open(&document)?;
            io::stdout().write_all(&opened.contents)?;

            let report = OpenReport {
                document: &opened.path,
                bytes: opened.contents.len(),
                backup: &opened.backup,
            };
            eprintln!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Save { document, input } => {
            let contents = read_input(input.as_deref())?;
            service.save(&document, &contents)?;
            tracing::info!(document = %document.display(), bytes = contents.len(), "saved");
        }
        Command::Append { document, input } => {
            let payload = read_input(input.as_deref())?;
            let outcome = service.archive().append(&document, &payload)?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::List { document } => {
            let entries = service.archive().entries(&document)?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
    }

    Ok(())
}

fn read_input(path: Option<&Path>) -> Result<Vec<u8>> {
    match path {
        Some(path) => fs::read(path).with_context(|| format!("read {}", path.display())),
        None => {
            let mut buf = Vec::new();
            io::stdin()
                .read_to_end(&mut buf)
                .context("read stdin")?;
            Ok(buf)
        }
    }
}
