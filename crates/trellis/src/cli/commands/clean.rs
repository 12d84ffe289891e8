//! Clean command - Remove the declared outputs of targets

use clap::Args;
use serde_json::json;
use tracing::info;

use trellis_tasks::{remove_outputs, Operation};

use crate::cli::session::{Scope, Session};
use crate::cli::{output, Cli, OutputFormat};

/// Remove the outputs of targets
#[derive(Debug, Args)]
pub struct CleanCommand {
    /// Target patterns; defaults to everything
    pub targets: Vec<String>,

    /// Also clean test targets
    #[arg(long)]
    pub with_tests: bool,

    /// Also clean package targets
    #[arg(long)]
    pub with_packages: bool,
}

impl CleanCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let mut session = Session::open("trellis clean", &self.targets, Scope::Related, true)?;
        session.fingerprint()?;

        let cache = session.fragment_cache();
        let assembly = session.assembly(self.with_tests, self.with_packages);
        let mut clean_list = Vec::new();
        for key in session.build_targets(&assembly)? {
            if let Some(target) = session.graph.get(&key) {
                cache.update(
                    target,
                    &session.graph,
                    &session.generator,
                    Operation::Clean,
                    &mut clean_list,
                )?;
            }
        }
        info!(outputs = clean_list.len(), "clean list collected");

        let stats = remove_outputs(&clean_list);
        session.finish(0)?;

        if cli.format == OutputFormat::Json {
            let value = json!({ "removed": stats.removed, "missing": stats.missing });
            println!("{}", serde_json::to_string_pretty(&value)?);
        } else if !cli.quiet {
            output::success(&format!(
                "Removed {} output(s) ({} already absent)",
                stats.removed, stats.missing
            ));
        }
        Ok(())
    }
}
