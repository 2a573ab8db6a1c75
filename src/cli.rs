use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tankobon")]
#[command(about = "Local manga library store: legacy migration and page image cache", long_about = None)]
#[command(version)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Report whether a legacy database needs migrating.
    Status {
        data_dir: PathBuf,
        #[arg(long)]
        json: bool,
    },

    /// Migrate the legacy database into the current store.
    Migrate {
        data_dir: PathBuf,
        /// Print progress records as JSON lines.
        #[arg(long)]
        json: bool,
    },

    /// Delete the current store so the next migration starts from the legacy data.
    Rollback { data_dir: PathBuf },

    /// List volumes in the current store.
    Volumes {
        data_dir: PathBuf,
        #[arg(long)]
        json: bool,
    },

    /// Show or clear the persisted migration log.
    Log {
        data_dir: PathBuf,
        #[arg(long)]
        clear: bool,
    },

    /// Align the images under a directory to a stored volume's pages.
    Match {
        data_dir: PathBuf,
        #[arg(long)]
        volume: String,
        #[arg(long)]
        dir: PathBuf,
        #[arg(long)]
        json: bool,
    },

    /// Load a stored volume into the image cache around a page.
    Prefetch {
        data_dir: PathBuf,
        #[arg(long)]
        volume: String,
        #[arg(long, default_value_t = 0)]
        page: usize,
    },

    /// Inspect or initialise the library config file.
    Config {
        data_dir: PathBuf,
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand)]
pub(crate) enum ConfigCommand {
    /// Print the effective config as JSON.
    Show,
    /// Write the effective config to disk (defaults for missing fields).
    Init {
        /// Replace an existing config file.
        #[arg(long)]
        force: bool,
    },
}
