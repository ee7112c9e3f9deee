use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "shopmirror")]
#[command(about = "Mirror a realtime shop database into a local offline cache")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the JSON config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Optional path to the local cache database
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Pull collections from the remote into the local cache
    Sync {
        /// Only sync this collection
        #[arg(short, long)]
        collection: Option<String>,
        /// Ignore sync timestamps and always read the remote
        #[arg(short, long)]
        force: bool,
    },
    /// List cached records of a collection
    List {
        /// Collection name
        collection: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one cached record
    Get {
        /// Collection name
        collection: String,
        /// Record id
        id: String,
    },
    /// Follow a collection in realtime until interrupted
    Watch {
        /// Collection name
        collection: String,
    },
    /// Show when each collection was last synced
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Drop the cached records and sync timestamp of a collection
    Clear {
        /// Collection name
        collection: String,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Inspect CLI configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration (auth token redacted)
    Show,
    /// Print the config file location
    Path,
}
