//! CLI parse: clap types for canopy. No behavior; definitions only.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Canopy CLI - canonical clustering of persisted trees
#[derive(Parser, Debug)]
#[command(name = "canopy")]
#[command(about = "Build and edit canonically clustered revision trees")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Object store directory (overrides storage.object_store_path)
    #[arg(long)]
    pub store: Option<PathBuf>,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long)]
    pub log_output: Option<String>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Put entries into a tree and persist the result
    Build {
        /// Entry file: one `name` or `name<TAB>content` per line
        #[arg(long)]
        input: PathBuf,
        /// Tree to start from (default: the empty tree)
        #[arg(long)]
        base: Option<String>,
    },
    /// Remove entries by name and persist the result
    Remove {
        /// Tree to start from
        #[arg(long)]
        base: String,
        /// File with one entry name per line
        #[arg(long)]
        input: PathBuf,
    },
    /// List every entry of a tree
    Ls {
        #[arg(long)]
        tree: String,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Show the shape of a tree
    Stats {
        #[arg(long)]
        tree: String,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Build { .. } => "build",
            Commands::Remove { .. } => "remove",
            Commands::Ls { .. } => "ls",
            Commands::Stats { .. } => "stats",
        }
    }
}
