//! CLI parse: clap types for clusterflow. No behavior; definitions only.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Clusterflow - inspect cluster operations and their progress
#[derive(Parser, Debug)]
#[command(name = "clusterflow")]
#[command(about = "Inspect multi-step cluster operations recorded by the workflow engine")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path (layered over the user configuration)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// State store directory (overrides storage.path)
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, global = true)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Inspect operations
    Operations {
        #[command(subcommand)]
        command: OperationCommands,
    },
    /// Inspect clusters
    Clusters {
        #[command(subcommand)]
        command: ClusterCommands,
    },
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum OperationCommands {
    /// List operations, oldest first
    List {
        /// Only operations of this cluster
        #[arg(long)]
        cluster: Option<String>,
    },
    /// Show one operation with its steps, carry-over data and logs
    Show {
        operation_id: String,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

#[derive(Subcommand, Debug)]
pub enum ClusterCommands {
    /// List clusters with their status and in-flight operations
    List,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the resolved configuration as TOML
    Show,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}
