//! Per-invocation workspace setup shared by the commands
//!
//! Loading runs config -> lock -> target database -> pattern expansion ->
//! related subgraph -> analysis. Building continues with fingerprints,
//! fragments, the aggregate script and the backend.

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::Context;
use tracing::{debug, info, instrument, warn};
use trellis_core::config::load_workspace_config;
use trellis_core::{
    analyze, expand_patterns, BuildStamp, CommandTargets, Graph, LoadedConfig, TargetKey,
    WorkspaceLock,
};
use trellis_tasks::fragment::SCRIPT_NAME;
use trellis_tasks::{
    compute_fingerprints, Assembly, FragmentCache, NinjaRuleGenerator, NinjaRunner, Operation,
    RuleGenerator,
};

/// Pattern used when no targets are given
pub const DEFAULT_PATTERN: &str = "...";

/// Which part of the target database gets analyzed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// The command targets and everything they depend on
    Related,
    /// Every loaded target
    Workspace,
}

/// What to pull into the aggregate script
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    pub jobs: usize,
    pub with_tests: bool,
    pub with_packages: bool,
    /// Keep stdout for machine-readable output
    pub json: bool,
}

/// Result of a build step
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct BuildOutcome {
    pub exit_code: i32,
    pub fresh: usize,
    pub regenerated: usize,
    pub included: usize,
    pub script: PathBuf,
}

/// An opened workspace with its analyzed graph
pub struct Session {
    pub loaded: LoadedConfig,
    pub graph: Graph,
    pub targets: CommandTargets,
    pub generator: NinjaRuleGenerator,
    stamp: BuildStamp,
    built: bool,
    _lock: Option<WorkspaceLock>,
}

impl Session {
    /// Open the workspace containing the working directory
    #[instrument(skip_all, fields(command = command, scope = ?scope))]
    pub fn open(
        command: &str,
        patterns: &[String],
        scope: Scope,
        lock: bool,
    ) -> anyhow::Result<Self> {
        let mut stamp = BuildStamp::begin();
        let cwd = std::env::current_dir()?;
        let loaded = load_workspace_config(&cwd).context("Failed to load configuration")?;
        debug!(root = %loaded.root.display(), config = ?loaded.path, "workspace located");

        let lock = if lock {
            Some(WorkspaceLock::acquire(&loaded.build_dir(), command)?)
        } else {
            None
        };
        match BuildStamp::load(&loaded.build_dir()) {
            Ok(Some(previous)) => debug!(
                started = %previous.start_time,
                exit_code = previous.exit_code,
                targets = previous.build_targets.len(),
                "previous build"
            ),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "ignoring unreadable build stamp"),
        }

        let targets_file = loaded.targets_file();
        let all = Graph::load_json(&targets_file).with_context(|| {
            format!("Failed to load target database {}", targets_file.display())
        })?;

        let patterns: Vec<String> = if patterns.is_empty() {
            vec![DEFAULT_PATTERN.to_string()]
        } else {
            patterns.to_vec()
        };
        let targets = expand_patterns(&all, &patterns)?;

        stamp.loaded_targets = all.keys().to_vec();
        stamp.direct_targets = targets.direct.clone();
        stamp.command_targets = targets.command.clone();

        let mut graph = match scope {
            Scope::Related => all.related(&targets.command)?,
            Scope::Workspace => all,
        };
        analyze(&mut graph)?;
        info!(
            loaded = stamp.loaded_targets.len(),
            analyzed = graph.len(),
            command = targets.command.len(),
            "targets analyzed"
        );

        let generator = NinjaRuleGenerator::from_config(&loaded);
        Ok(Self {
            loaded,
            graph,
            targets,
            generator,
            stamp,
            built: false,
            _lock: lock,
        })
    }

    /// Fill in target fingerprints
    pub fn fingerprint(&mut self) -> anyhow::Result<()> {
        compute_fingerprints(&mut self.graph, &self.generator.config_digest())?;
        Ok(())
    }

    pub fn fragment_cache(&self) -> FragmentCache {
        FragmentCache::in_build_dir(&self.loaded.build_dir())
    }

    pub fn assembly(&self, with_tests: bool, with_packages: bool) -> Assembly {
        let build = &self.loaded.config.build;
        Assembly {
            direct: self.targets.direct.iter().cloned().collect::<HashSet<_>>(),
            include_tests: with_tests || build.generate_tests,
            include_packages: with_packages || build.generate_packages,
        }
    }

    /// Build targets in build order
    pub fn build_targets(&self, assembly: &Assembly) -> anyhow::Result<Vec<TargetKey>> {
        Ok(self
            .graph
            .sorted()?
            .iter()
            .filter(|key| self.graph.get(key).is_some_and(|t| assembly.includes(t)))
            .cloned()
            .collect())
    }

    /// Regenerate stale fragments, assemble the script and run the backend
    #[instrument(skip_all, fields(jobs = options.jobs))]
    pub fn build(&mut self, options: BuildOptions) -> anyhow::Result<BuildOutcome> {
        self.fingerprint()?;

        let build_dir = self.loaded.build_dir();
        let cache = self.fragment_cache();
        let report = cache
            .update_all(&self.graph, &self.generator, Operation::Build)
            .context("Failed to update build fragments")?;

        let assembly = self.assembly(options.with_tests, options.with_packages);
        self.stamp.build_targets = self.build_targets(&assembly)?;

        let script = build_dir.join(SCRIPT_NAME);
        let included = assembly
            .write_script(&self.graph, &cache, &self.generator, &script)
            .context("Failed to write build script")?;

        let runner = NinjaRunner::locate(&self.loaded.config.backend, &self.loaded.root)?
            .with_stdout_to_stderr(options.json);
        let exit_code = runner.run(&script, options.jobs)?;
        self.built = true;

        Ok(BuildOutcome {
            exit_code,
            fresh: report.fresh,
            regenerated: report.regenerated,
            included,
            script,
        })
    }

    /// Write the build stamp (when something was built) and release the lock
    pub fn finish(mut self, exit_code: i32) -> anyhow::Result<()> {
        if self.built {
            self.stamp.finish(exit_code);
            self.stamp
                .save(&self.loaded.build_dir())
                .context("Failed to write build stamp")?;
        }
        Ok(())
    }
}
