//! quill - operator tool for quill partition data
//!
//! Verifies, repairs and dumps journals, and shows Raft metadata and backups.

mod commands;
mod config;

use clap::{Parser, Subcommand};
use colored::Colorize;
use config::Config;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "quill")]
#[command(about = "Inspect and repair quill journals and Raft metadata")]
#[command(version)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true, env = "QUILL_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory (overrides the configuration)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Partition to inspect (overrides the configuration)
    #[arg(short, long, global = true)]
    partition: Option<u32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Journal maintenance
    #[command(subcommand)]
    Journal(JournalCommand),

    /// Raft metadata
    #[command(subcommand)]
    Meta(MetaCommand),

    /// Effective configuration
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Backups in the local backup store
    #[command(subcommand)]
    Backup(BackupCommand),
}

#[derive(Subcommand)]
pub(crate) enum JournalCommand {
    /// Scan the journal and report what opening it would drop
    Verify,

    /// Truncate torn writes and drop segments after a corruption
    Repair,

    /// Print journal records
    Dump {
        /// First index to print
        #[arg(short, long)]
        from: Option<u64>,

        /// Maximum records to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Decode record data as log stream entries
        #[arg(short, long)]
        events: bool,
    },
}

#[derive(Subcommand)]
pub(crate) enum MetaCommand {
    /// Print term, vote and configuration as JSON
    Show,
}

#[derive(Subcommand)]
pub(crate) enum ConfigCommand {
    /// Print the effective configuration as YAML
    Show,
}

#[derive(Subcommand)]
pub(crate) enum BackupCommand {
    /// List backups
    List {
        /// Include every partition, not only the configured one
        #[arg(long)]
        all_partitions: bool,

        /// Only backups taken by this node
        #[arg(long)]
        node: Option<u32>,

        /// Only backups of this checkpoint
        #[arg(long)]
        checkpoint: Option<u64>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    };
    if let Some(dir) = cli.data_dir {
        config.storage.data_dir = dir;
    }
    if let Some(partition) = cli.partition {
        config.node.partition_id = partition;
    }
    tracing::debug!("Data directory: {}", config.storage.data_dir.display());

    match commands::execute(&config, cli.command) {
        Ok(output) => {
            print!("{}", output);
            if !output.ends_with('\n') {
                println!();
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }
}
