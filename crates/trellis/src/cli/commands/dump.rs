//! Dump command - Write the analyzed build targets as JSON

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use trellis_core::Target;

use crate::cli::session::{Scope, Session};
use crate::cli::{output, Cli};

/// Write the analyzed targets as JSON
#[derive(Debug, Args)]
pub struct DumpCommand {
    /// Target patterns; defaults to everything
    pub targets: Vec<String>,

    /// Write to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl DumpCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let mut session = Session::open("trellis dump", &self.targets, Scope::Related, false)?;
        session.fingerprint()?;

        let graph = &session.graph;
        let targets: Vec<&Target> = graph
            .sorted()?
            .iter()
            .filter_map(|key| graph.get(key))
            .collect();
        let json = serde_json::to_string_pretty(&targets)?;

        match &self.output {
            Some(path) => {
                std::fs::write(path, format!("{}\n", json))
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                if cli.show_text() {
                    output::success(&format!(
                        "Wrote {} target(s) to {}",
                        targets.len(),
                        output::path_style().apply_to(path.display())
                    ));
                }
            }
            None => println!("{}", json),
        }
        Ok(())
    }
}
