//! # srwatch CLI
//!
//! The `srwatch` binary runs the ingestion pipeline, the query server, and
//! a few maintenance commands.
//!
//! ## Usage
//!
//! ```bash
//! srwatch --config ./config/srwatch.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `srwatch init` | Create the SQLite database and run schema migrations |
//! | `srwatch watch` | Watch the inbox until Ctrl+C |
//! | `srwatch serve` | Start the query HTTP server |
//! | `srwatch run` | Watch and serve in one process |
//! | `srwatch ingest <FILES>` | Run the pipeline once over the given files |
//! | `srwatch purge` | Run one archive retention sweep |
//! | `srwatch get <ID>` | Print the stored measurements of a document |
//! | `srwatch sample <DIR>` | Write a synthetic echo report |
//!
//! Without `--config`, built-in defaults apply. `SRWATCH_*` environment
//! variables override either. Log verbosity follows `RUST_LOG`
//! (default `srwatch=info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use srwatch::config::DocumentFormat;
use srwatch::{archive, config, get, ingest, migrate, sample, server, watcher};

#[derive(Parser)]
#[command(
    name = "srwatch",
    about = "Structured-report measurement ingestion pipeline and query service",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Watch the inbox and ingest reports as they arrive.
    ///
    /// Files already present are picked up by the first scan. Ctrl+C stops
    /// scanning and waits for in-flight files to finish.
    Watch,

    /// Start the query HTTP server.
    Serve,

    /// Watch the inbox and serve queries from one process.
    Run,

    /// Run the pipeline once over the given files.
    ///
    /// Files are archived or rejected exactly as the watcher would.
    Ingest {
        /// Report files to ingest.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Remove archived files older than the retention window.
    Purge {
        /// List what would be removed without deleting anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the stored measurements of a document.
    Get {
        /// Document identifier (normally the StudyInstanceUID).
        document_id: String,
    },

    /// Write a synthetic echo report into a directory.
    Sample {
        /// Target directory (usually the inbox).
        dir: PathBuf,

        /// StudyInstanceUID to use; generated when omitted.
        #[arg(long)]
        study_uid: Option<String>,

        /// File encoding to write.
        #[arg(long, value_enum, default_value_t = DocumentFormat::Dicom)]
        format: DocumentFormat,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("srwatch=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Needs no configuration.
    if let Commands::Sample {
        dir,
        study_uid,
        format,
    } = &cli.command
    {
        return sample::run_sample(dir, study_uid.as_deref(), *format);
    }

    let cfg = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            watcher::ensure_directories(&cfg)?;
            println!("Database initialized successfully.");
        }
        Commands::Watch => {
            watcher::run_watch(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Run => {
            server::run_with_watcher(&cfg).await?;
        }
        Commands::Ingest { files } => {
            ingest::run_ingest(&cfg, &files).await?;
        }
        Commands::Purge { dry_run } => {
            archive::run_purge(&cfg, dry_run)?;
        }
        Commands::Get { document_id } => {
            get::run_get(&cfg, &document_id).await?;
        }
        Commands::Sample { .. } => unreachable!("handled before config load"),
    }

    Ok(())
}
