//! CLI definition and command handling

pub mod commands;
pub mod output;
mod session;

use clap::{Parser, Subcommand};

use commands::{BuildCommand, CleanCommand, DumpCommand, QueryCommand, TestCommand};

/// Trellis - incremental build orchestrator
#[derive(Debug, Parser)]
#[command(name = "trellis")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Working directory
    #[arg(short = 'C', long, global = true)]
    pub directory: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for CLI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    #[default]
    Text,
    /// JSON output
    Json,
}

/// Available commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Build targets
    Build(BuildCommand),

    /// Build and run tests
    Test(TestCommand),

    /// Remove the outputs of targets
    Clean(CleanCommand),

    /// Inspect the target graph
    Query(QueryCommand),

    /// Write the analyzed targets as JSON
    Dump(DumpCommand),
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(&self) -> anyhow::Result<()> {
        // Change to specified directory if provided
        if let Some(dir) = &self.directory {
            std::env::set_current_dir(dir)?;
        }

        match &self.command {
            Commands::Build(cmd) => cmd.execute(self),
            Commands::Test(cmd) => cmd.execute(self),
            Commands::Clean(cmd) => cmd.execute(self),
            Commands::Query(cmd) => cmd.execute(self),
            Commands::Dump(cmd) => cmd.execute(self),
        }
    }

    /// Whether human-readable progress should be printed
    pub fn show_text(&self) -> bool {
        !self.quiet && self.format == OutputFormat::Text
    }
}
