//! Query command - Inspect dependencies of targets

use std::collections::HashSet;

use clap::{ArgGroup, Args};

use trellis_core::{Graph, TargetKey};

use crate::cli::output;
use crate::cli::session::{Scope, Session};
use crate::cli::{Cli, OutputFormat};

/// Inspect the target graph
#[derive(Debug, Args)]
#[command(group(
    ArgGroup::new("mode")
        .required(true)
        .args(["deps", "dependents", "tree", "dot"])
))]
pub struct QueryCommand {
    /// Target patterns; defaults to everything
    pub targets: Vec<String>,

    /// Everything the targets depend on, in build order
    #[arg(long)]
    pub deps: bool,

    /// Everything in the workspace that depends on the targets
    #[arg(long)]
    pub dependents: bool,

    /// Indented dependency tree of each target
    #[arg(long)]
    pub tree: bool,

    /// Graphviz rendering of the build graph
    #[arg(long)]
    pub dot: bool,
}

impl QueryCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let scope = if self.dependents {
            Scope::Workspace
        } else {
            Scope::Related
        };
        let session = Session::open("trellis query", &self.targets, scope, false)?;
        let graph = &session.graph;
        let roots = &session.targets.command;

        if self.dot {
            print!("{}", graph.to_dot());
            return Ok(());
        }

        if self.tree {
            if cli.format == OutputFormat::Json {
                let trees: serde_json::Map<String, serde_json::Value> = roots
                    .iter()
                    .map(|key| (key.to_string(), graph.dependency_tree(key).into()))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&trees)?);
            } else {
                for key in roots {
                    print!("{}", graph.dependency_tree(key));
                }
            }
            return Ok(());
        }

        let keys = if self.deps {
            collect_in_build_order(graph, roots, |k| graph.expanded_deps(k))?
        } else {
            collect_in_build_order(graph, roots, |k| graph.expanded_dependents(k))?
        };

        if cli.format == OutputFormat::Json {
            let list: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
            println!("{}", serde_json::to_string_pretty(&list)?);
        } else {
            if keys.is_empty() && !cli.quiet {
                output::info("No matching targets");
            }
            for key in keys {
                println!("//{}", key);
            }
        }
        Ok(())
    }
}

/// Union of `edges` over `roots`, in build order
fn collect_in_build_order<'g, F>(
    graph: &'g Graph,
    roots: &[TargetKey],
    edges: F,
) -> anyhow::Result<Vec<TargetKey>>
where
    F: Fn(&TargetKey) -> &'g [TargetKey],
{
    let wanted: HashSet<&TargetKey> = roots.iter().flat_map(|k| edges(k).iter()).collect();
    Ok(graph
        .sorted()?
        .iter()
        .filter(|k| wanted.contains(k))
        .cloned()
        .collect())
}
