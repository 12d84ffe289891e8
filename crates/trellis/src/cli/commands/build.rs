//! Build command - Generate the build script and run the backend

use clap::Args;
use console::style;
use tracing::info;

use crate::cli::output;
use crate::cli::session::{BuildOptions, Scope, Session};
use crate::cli::{Cli, OutputFormat};
use crate::exit_codes::{CommandFailed, BUILD_FAILED};

/// Build targets
#[derive(Debug, Args)]
pub struct BuildCommand {
    /// Target patterns (`dir:name`, `dir:*`, `dir/...`); defaults to everything
    pub targets: Vec<String>,

    /// Parallel backend jobs (defaults to the configured value)
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Also build test targets
    #[arg(long)]
    pub with_tests: bool,

    /// Also build package targets
    #[arg(long)]
    pub with_packages: bool,
}

impl BuildCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let mut session = Session::open("trellis build", &self.targets, Scope::Related, true)?;
        let jobs = self
            .jobs
            .unwrap_or_else(|| session.loaded.config.build.effective_jobs());
        info!(jobs, "starting build");

        if cli.show_text() {
            println!();
            println!("{}", output::header("Building targets..."));
            println!(
                "{}",
                output::key_value("Workspace", &session.loaded.root.display().to_string())
            );
            println!(
                "{}",
                output::key_value("Targets", &session.targets.command.len().to_string())
            );
            println!();
        }

        let outcome = session.build(BuildOptions {
            jobs,
            with_tests: self.with_tests,
            with_packages: self.with_packages,
            json: cli.format == OutputFormat::Json,
        })?;
        session.finish(outcome.exit_code)?;

        if cli.format == OutputFormat::Json {
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        } else if !cli.quiet && outcome.exit_code == 0 {
            println!();
            output::success(&format!(
                "Build completed ({} fragment(s) regenerated, {} up to date)",
                outcome.regenerated, outcome.fresh
            ));
        }

        if outcome.exit_code != 0 {
            if cli.show_text() {
                println!();
                println!("{} Build failed", style("✗").red().bold());
            }
            return Err(CommandFailed::new(
                BUILD_FAILED,
                format!("Backend exited with code {}", outcome.exit_code),
            )
            .into());
        }

        Ok(())
    }
}
