//! Test runner: selects candidates, consults history, schedules, records
//!
//! One invocation walks the test targets among the command targets, decides
//! which of them must run from their history, hands those to the
//! [`TestScheduler`], and folds the results back into the history file.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use trellis_core::{
    CommandTargets, Graph, GraphError, LoadedConfig, Target, TargetKey, TargetPattern,
};
use walkdir::WalkDir;

use crate::fingerprint::{digest_bytes, file_digest};
use crate::generator::output_path;
use crate::history::{
    env_fingerprint, Decision, DecisionPolicy, EnvWatch, HistoryError, JobInputs, Outcome,
    TestHistory,
};
use crate::job::{RunReason, ScheduledTest, TestJob};
use crate::reporter::TestReporter;
use crate::scheduler::{SchedulerOptions, TestScheduler};

/// How many of the slowest tests the summary keeps
const SLOWEST_COUNT: usize = 10;

/// Runner errors
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error(transparent)]
    History(#[from] HistoryError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Failed to read test data {}: {source}", .path.display())]
    Testdata {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to prepare runfiles {}: {source}", .path.display())]
    Runfiles {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Per-invocation test options
#[derive(Debug, Clone, Default)]
pub struct TestRunOptions {
    /// Run every candidate regardless of history
    pub full: bool,
    /// Re-run confirmed failures
    pub run_unrepaired: bool,
    /// Patterns removed from the candidates
    pub exclude: Vec<String>,
    /// Extra arguments appended to every test command
    pub args: Vec<String>,
    /// Concurrent tests
    pub jobs: usize,
    pub quiet: bool,
}

/// A test that failed this run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedTest {
    pub key: TargetKey,
    pub exit_code: i32,
}

/// What happened to every candidate
#[derive(Debug, Clone, Default)]
pub struct TestSummary {
    /// Why each scheduled test ran
    pub scheduled: Vec<(TargetKey, RunReason)>,
    pub passed: Vec<TargetKey>,
    pub failed: Vec<FailedTest>,
    /// Passed after failing last time
    pub repaired: Vec<TargetKey>,
    /// Failed after passing, or on first run
    pub new_failed: Vec<TargetKey>,
    /// Confirmed failures that were not run
    pub unrepaired: Vec<TargetKey>,
    /// Passed last time, inputs unchanged, not run
    pub unchanged: Vec<TargetKey>,
    /// Scheduled but never finished because the run was cancelled
    pub cancelled: Vec<TargetKey>,
    /// Excluded on the command line
    pub skipped: Vec<TargetKey>,
    /// Slowest tests this run, in seconds
    pub slowest: Vec<(TargetKey, f64)>,
    pub interrupted: bool,
}

impl TestSummary {
    /// Every scheduled test passed and nothing was cancelled
    pub fn success(&self) -> bool {
        self.failed.is_empty() && !self.interrupted
    }

    pub fn total_candidates(&self) -> usize {
        self.scheduled.len() + self.unrepaired.len() + self.unchanged.len()
    }
}

/// Runs the tests of one command
pub struct TestRunner<'a> {
    loaded: &'a LoadedConfig,
    graph: &'a Graph,
    reporter: Arc<dyn TestReporter>,
    cancel: CancellationToken,
}

impl<'a> TestRunner<'a> {
    pub fn new(loaded: &'a LoadedConfig, graph: &'a Graph, reporter: Arc<dyn TestReporter>) -> Self {
        Self {
            loaded,
            graph,
            reporter,
            cancel: CancellationToken::new(),
        }
    }

    /// Cancel the run through `cancel`
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[instrument(skip_all, fields(candidates = targets.command.len()))]
    pub async fn run(
        &self,
        targets: &CommandTargets,
        options: &TestRunOptions,
    ) -> Result<TestSummary, RunnerError> {
        let test_config = &self.loaded.config.test;
        let build_dir = self.loaded.build_dir();
        let mut summary = TestSummary::default();

        let exclude = options
            .exclude
            .iter()
            .map(|p| TargetPattern::parse(p))
            .collect::<Result<Vec<_>, _>>()?;

        let watch = EnvWatch::new(&test_config.watched_env)?;
        let snapshot = watch.current();
        let env_fp = env_fingerprint(&snapshot);

        let history_path = TestHistory::path(&build_dir);
        let mut history = match TestHistory::load(&history_path) {
            Ok(history) => history,
            Err(e @ HistoryError::Parse { .. }) => {
                warn!("{}; starting with an empty history", e);
                TestHistory::default()
            }
            Err(e) => return Err(e.into()),
        };
        if !history.items.is_empty() {
            for change in history.env_changes(&snapshot) {
                info!("watched environment changed: {}", change);
            }
        }

        let mut policy = DecisionPolicy::new(test_config.freshness_secs);
        policy.full = options.full;
        policy.run_unrepaired = options.run_unrepaired || test_config.run_unrepaired;

        let mut scheduled = Vec::new();
        let mut jobs: HashMap<TargetKey, TestJob> = HashMap::new();

        for key in &targets.command {
            let Some(target) = self.graph.get(key) else {
                continue;
            };
            if !target.kind.is_test() {
                continue;
            }
            if exclude.iter().any(|p| p.matches(key)) {
                debug!(target = %key, "excluded");
                summary.skipped.push(key.clone());
                continue;
            }

            let spec = target.test.clone().unwrap_or_default();
            let binary = output_path(&build_dir, key);
            let args: Vec<String> = spec.args.iter().chain(&options.args).cloned().collect();

            let inputs = JobInputs {
                binary_fingerprint: binary_fingerprint(&binary),
                testdata_fingerprint: testdata_fingerprint(
                    &self.loaded.root,
                    &target.dir,
                    &spec.testdata,
                )?,
                env_fingerprint: env_fp.clone(),
                args: args.join(" "),
                always_run: spec.always_run,
                explicit: targets.is_direct(key),
            };

            match history.decide(key, &inputs, &policy) {
                Decision::Run(reason) => {
                    debug!(target = %key, %reason, "scheduling test");
                    // Zero disables the timeout, as it does for the configured default
                    let timeout = match spec.timeout_secs {
                        Some(0) => None,
                        Some(secs) => Some(Duration::from_secs(secs)),
                        None => test_config.default_timeout(),
                    };
                    let runfiles = prepare_runfiles(&self.loaded.root, &build_dir, target, &binary)?;

                    let mut env: BTreeMap<String, String> = std::env::vars_os()
                        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
                        .collect();
                    let mut library_path = runfiles.to_string_lossy().into_owned();
                    if let Some(existing) = env.get("LD_LIBRARY_PATH").filter(|p| !p.is_empty()) {
                        library_path = format!("{}:{}", library_path, existing);
                    }
                    env.insert("LD_LIBRARY_PATH".to_string(), library_path);
                    env.extend(test_config.env.clone());
                    env.extend(spec.env.clone());

                    scheduled.push(
                        ScheduledTest::new(key.clone(), binary)
                            .with_run_dir(runfiles)
                            .with_args(args)
                            .with_env(env)
                            .with_exclusive(spec.exclusive)
                            .with_timeout(timeout),
                    );
                    jobs.insert(key.clone(), inputs.to_job(reason));
                    summary.scheduled.push((key.clone(), reason));
                }
                Decision::Unchanged => summary.unchanged.push(key.clone()),
                Decision::Unrepaired => summary.unrepaired.push(key.clone()),
            }
        }

        info!(
            scheduled = scheduled.len(),
            unchanged = summary.unchanged.len(),
            unrepaired = summary.unrepaired.len(),
            "tests selected"
        );

        let scheduler = TestScheduler::new(
            SchedulerOptions {
                jobs: options.jobs.max(1),
                poll_interval: Duration::from_millis(test_config.poll_interval_ms),
                quiet: options.quiet,
            },
            Arc::clone(&self.reporter),
        )
        .with_cancellation(self.cancel.clone());

        let results = scheduler.run(scheduled).await;
        summary.interrupted = results.cancelled;

        let mut costs = Vec::new();
        for (key, _) in &summary.scheduled {
            let result = match results.passed.get(key).or_else(|| results.failed.get(key)) {
                Some(result) => result.clone(),
                None => {
                    summary.cancelled.push(key.clone());
                    continue;
                }
            };
            let Some(job) = jobs.remove(key) else {
                continue;
            };
            costs.push((key.clone(), result.cost_time));

            let exit_code = result.exit_code;
            match history.record(key, job, result) {
                Outcome::Passed => summary.passed.push(key.clone()),
                Outcome::Repaired => {
                    summary.passed.push(key.clone());
                    summary.repaired.push(key.clone());
                }
                Outcome::Failed => summary.failed.push(FailedTest {
                    key: key.clone(),
                    exit_code,
                }),
                Outcome::NewFailed => {
                    summary.failed.push(FailedTest {
                        key: key.clone(),
                        exit_code,
                    });
                    summary.new_failed.push(key.clone());
                }
            }
        }

        costs.sort_by(|a, b| b.1.total_cmp(&a.1));
        costs.truncate(SLOWEST_COUNT);
        summary.slowest = costs;

        history.env = snapshot;
        history.save(&history_path)?;

        if !summary.unrepaired.is_empty() {
            warn!(
                "{} test(s) still failing were not run; pass --run-unrepaired to run them",
                summary.unrepaired.len()
            );
        }

        Ok(summary)
    }
}

/// Digest of a test binary; a missing binary gets a fixed marker
fn binary_fingerprint(path: &Path) -> String {
    file_digest(path).unwrap_or_else(|_| digest_bytes(b"missing"))
}

/// Where a test data entry lives: `//path` is workspace-relative, anything
/// else is relative to the target's directory
fn testdata_source(root: &Path, dir: &str, entry: &str) -> PathBuf {
    match entry.strip_prefix("//") {
        Some(rel) => root.join(rel),
        None => root.join(dir).join(entry),
    }
}

/// Digest over every test data file of a target, sorted by path
fn testdata_fingerprint(root: &Path, dir: &str, testdata: &[String]) -> Result<String, RunnerError> {
    let mut files = Vec::new();
    for entry in testdata {
        collect_files(&testdata_source(root, dir, entry), &mut files);
    }
    files.sort();
    files.dedup();

    let mut encoded = String::new();
    for file in &files {
        let digest = file_digest(file).map_err(|source| RunnerError::Testdata {
            path: file.clone(),
            source,
        })?;
        let rel = file.strip_prefix(root).unwrap_or(file);
        encoded.push_str(&rel.to_string_lossy());
        encoded.push(' ');
        encoded.push_str(&digest);
        encoded.push('\n');
    }
    Ok(digest_bytes(encoded.as_bytes()))
}

fn collect_files(path: &Path, files: &mut Vec<PathBuf>) {
    if !path.exists() {
        warn!(path = %path.display(), "test data not found");
        return;
    }
    for entry in WalkDir::new(path).follow_links(true) {
        match entry {
            Ok(entry) if entry.file_type().is_file() => files.push(entry.into_path()),
            Ok(_) => {}
            Err(e) => warn!(path = %path.display(), error = %e, "skipping test data entry"),
        }
    }
}

/// Link names clash when one equals or contains another
fn link_conflict<'a>(name: &Path, taken: &'a [PathBuf]) -> Option<&'a PathBuf> {
    taken
        .iter()
        .find(|other| name.starts_with(other) || other.starts_with(name))
}

/// Build `<binary>.runfiles`: a fresh directory holding a link to the build
/// directory and one link per declared test data entry
fn prepare_runfiles(
    root: &Path,
    build_dir: &Path,
    target: &Target,
    binary: &Path,
) -> Result<PathBuf, RunnerError> {
    let mut runfiles = binary.as_os_str().to_owned();
    runfiles.push(".runfiles");
    let runfiles = PathBuf::from(runfiles);
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: io::Error| RunnerError::Runfiles { path, source }
    };

    match std::fs::remove_dir_all(&runfiles) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(io_err(&runfiles)(e)),
        _ => {}
    }
    std::fs::create_dir_all(&runfiles).map_err(io_err(&runfiles))?;

    if let Some(profile) = build_dir.file_name() {
        let link = runfiles.join(profile);
        symlink(build_dir, &link).map_err(io_err(&link))?;
    }

    let testdata = target
        .test
        .as_ref()
        .map(|spec| spec.testdata.as_slice())
        .unwrap_or_default();
    let mut taken: Vec<PathBuf> = Vec::new();
    for entry in testdata {
        if entry.split('/').any(|part| part == "..") {
            warn!(target = %target.key(), entry = %entry, "test data outside the workspace is not linked");
            continue;
        }
        let name = PathBuf::from(entry.trim_start_matches('/'));
        if let Some(other) = link_conflict(&name, &taken) {
            warn!(
                target = %target.key(),
                entry = %entry,
                conflicts_with = %other.display(),
                "test data link skipped"
            );
            continue;
        }

        let link = runfiles.join(&name);
        if let Some(parent) = link.parent() {
            std::fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        if link.symlink_metadata().is_ok() {
            // Only the build directory link can be there already
            warn!(target = %target.key(), entry = %entry, "test data link already exists");
            taken.push(name);
            continue;
        }
        let source = testdata_source(root, &target.dir, entry);
        symlink(&source, &link).map_err(io_err(&link))?;
        debug!(link = %link.display(), source = %source.display(), "linked test data");
        taken.push(name);
    }
    Ok(runfiles)
}

#[cfg(unix)]
fn symlink(source: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(source, link)
}

#[cfg(windows)]
fn symlink(source: &Path, link: &Path) -> io::Result<()> {
    if source.is_dir() {
        std::os::windows::fs::symlink_dir(source, link)
    } else {
        std::os::windows::fs::symlink_file(source, link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::CollectingReporter;
    use tempfile::TempDir;
    use trellis_core::{expand_patterns, Config, Target, TargetKind, TestSpec};

    #[test]
    fn test_testdata_fingerprint() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("data/nested")).unwrap();
        std::fs::write(temp.path().join("data/a.txt"), "a").unwrap();
        std::fs::write(temp.path().join("data/nested/b.txt"), "b").unwrap();

        let testdata = vec!["data".to_string()];
        let first = testdata_fingerprint(temp.path(), "", &testdata).unwrap();
        assert_eq!(first, testdata_fingerprint(temp.path(), "", &testdata).unwrap());

        std::fs::write(temp.path().join("data/nested/b.txt"), "changed").unwrap();
        assert_ne!(first, testdata_fingerprint(temp.path(), "", &testdata).unwrap());

        // Missing entries are tolerated
        let missing = vec!["absent".to_string()];
        assert!(testdata_fingerprint(temp.path(), "", &missing).is_ok());
    }

    #[test]
    fn test_testdata_source() {
        let root = Path::new("/ws");
        assert_eq!(testdata_source(root, "app", "data/x"), PathBuf::from("/ws/app/data/x"));
        assert_eq!(testdata_source(root, "app", "//shared/x"), PathBuf::from("/ws/shared/x"));
    }

    #[cfg(unix)]
    #[test]
    fn test_testdata_symlink_loop_is_skipped() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("app/data")).unwrap();
        std::fs::write(temp.path().join("app/data/a.txt"), "a").unwrap();
        std::os::unix::fs::symlink("..", temp.path().join("app/data/up")).unwrap();

        let testdata = vec!["data".to_string()];
        let first = testdata_fingerprint(temp.path(), "app", &testdata).unwrap();

        std::fs::write(temp.path().join("app/data/a.txt"), "changed").unwrap();
        assert_ne!(first, testdata_fingerprint(temp.path(), "app", &testdata).unwrap());
    }

    #[test]
    fn test_link_conflict() {
        let taken = vec![PathBuf::from("data/a.txt"), PathBuf::from("conf")];
        assert!(link_conflict(Path::new("data/a.txt"), &taken).is_some());
        assert!(link_conflict(Path::new("conf/x.ini"), &taken).is_some());
        assert!(link_conflict(Path::new("data"), &taken).is_some());
        assert!(link_conflict(Path::new("data/b.txt"), &taken).is_none());
        assert!(link_conflict(Path::new("config"), &taken).is_none());
    }

    #[test]
    fn test_missing_binary_fingerprint() {
        let temp = TempDir::new().unwrap();
        let a = binary_fingerprint(&temp.path().join("a"));
        let b = binary_fingerprint(&temp.path().join("b"));
        assert_eq!(a, b);
    }

    #[cfg(unix)]
    fn write_test_binary(build_dir: &Path, dir: &str, name: &str, body: &str) {
        use std::os::unix::fs::PermissionsExt;

        let path = build_dir.join(dir).join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[cfg(unix)]
    fn workspace() -> (TempDir, LoadedConfig, Graph) {
        let temp = TempDir::new().unwrap();
        let loaded = LoadedConfig {
            config: Config::default(),
            root: temp.path().to_path_buf(),
            path: None,
        };
        let build_dir = loaded.build_dir();
        write_test_binary(&build_dir, "app", "good_test", "exit 0");
        write_test_binary(&build_dir, "app", "bad_test", "exit 1");
        write_test_binary(&build_dir, "lib", "slow_test", "exit 0");

        let graph = Graph::from_targets(vec![
            Target::new("app", "good_test", TargetKind::CcTest),
            Target::new("app", "bad_test", TargetKind::ShTest),
            Target::new("lib", "slow_test", TargetKind::CcTest),
            Target::new("lib", "util", TargetKind::CcLibrary),
        ])
        .unwrap();
        (temp, loaded, graph)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_incremental_runs() {
        let (_temp, loaded, graph) = workspace();
        let targets = expand_patterns(&graph, &["..."]).unwrap();
        let options = TestRunOptions {
            jobs: 2,
            quiet: true,
            ..Default::default()
        };

        let runner = TestRunner::new(&loaded, &graph, Arc::new(CollectingReporter::default()));

        let first = runner.run(&targets, &options).await.unwrap();
        assert_eq!(first.scheduled.len(), 3);
        assert!(first
            .scheduled
            .iter()
            .all(|(_, reason)| *reason == RunReason::NoHistory));
        assert_eq!(first.passed.len(), 2);
        assert_eq!(first.new_failed, vec![TargetKey::new("app", "bad_test")]);
        assert!(!first.success());

        // Passing tests are skipped, the first failure is retried
        let second = runner.run(&targets, &options).await.unwrap();
        assert_eq!(second.unchanged.len(), 2);
        assert_eq!(
            second.scheduled,
            vec![(TargetKey::new("app", "bad_test"), RunReason::Retry)]
        );
        assert!(second.new_failed.is_empty());
        assert_eq!(second.failed[0].exit_code, 1);

        // A confirmed failure is parked
        let third = runner.run(&targets, &options).await.unwrap();
        assert!(third.scheduled.is_empty());
        assert_eq!(third.unrepaired, vec![TargetKey::new("app", "bad_test")]);
        assert!(third.success());

        // Fixing the binary makes it run again and counts as repaired
        write_test_binary(&loaded.build_dir(), "app", "bad_test", "exit 0");
        let fourth = runner.run(&targets, &options).await.unwrap();
        assert_eq!(
            fourth.scheduled,
            vec![(TargetKey::new("app", "bad_test"), RunReason::Binary)]
        );
        assert_eq!(fourth.repaired, vec![TargetKey::new("app", "bad_test")]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exclude_and_explicit() {
        let (_temp, loaded, graph) = workspace();
        let runner = TestRunner::new(&loaded, &graph, Arc::new(CollectingReporter::default()));
        let options = TestRunOptions {
            jobs: 1,
            quiet: true,
            exclude: vec!["app/...".to_string()],
            ..Default::default()
        };

        let targets = expand_patterns(&graph, &["..."]).unwrap();
        let summary = runner.run(&targets, &options).await.unwrap();
        assert_eq!(summary.skipped.len(), 2);
        assert_eq!(summary.passed, vec![TargetKey::new("lib", "slow_test")]);
        assert!(summary.success());

        // Named targets always run
        let targets = expand_patterns(&graph, &["lib:slow_test"]).unwrap();
        let options = TestRunOptions {
            jobs: 1,
            quiet: true,
            ..Default::default()
        };
        let summary = runner.run(&targets, &options).await.unwrap();
        assert_eq!(
            summary.scheduled,
            vec![(TargetKey::new("lib", "slow_test"), RunReason::Explicit)]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spec_timeout_and_env() {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.test.env.insert("TRELLIS_MODE".into(), "ci".into());
        let loaded = LoadedConfig {
            config,
            root: temp.path().to_path_buf(),
            path: None,
        };
        write_test_binary(
            &loaded.build_dir(),
            "app",
            "env_test",
            "test \"$TRELLIS_MODE\" = ci && test \"$EXTRA\" = yes",
        );
        write_test_binary(&loaded.build_dir(), "app", "hang_test", "exec sleep 10");
        write_test_binary(&loaded.build_dir(), "app", "patient_test", "sleep 0.5");

        let mut env_spec = TestSpec::default();
        env_spec.env.insert("EXTRA".into(), "yes".into());
        let hang_spec = TestSpec {
            timeout_secs: Some(1),
            ..Default::default()
        };
        let no_timeout_spec = TestSpec {
            timeout_secs: Some(0),
            ..Default::default()
        };
        let graph = Graph::from_targets(vec![
            Target::new("app", "env_test", TargetKind::ShTest).with_test(env_spec),
            Target::new("app", "hang_test", TargetKind::ShTest).with_test(hang_spec),
            Target::new("app", "patient_test", TargetKind::ShTest).with_test(no_timeout_spec),
        ])
        .unwrap();

        let runner = TestRunner::new(&loaded, &graph, Arc::new(CollectingReporter::default()));
        let targets = expand_patterns(&graph, &["app/..."]).unwrap();
        let options = TestRunOptions {
            jobs: 2,
            quiet: true,
            ..Default::default()
        };
        let summary = runner.run(&targets, &options).await.unwrap();

        let mut passed = summary.passed.clone();
        passed.sort();
        assert_eq!(
            passed,
            vec![
                TargetKey::new("app", "env_test"),
                TargetKey::new("app", "patient_test"),
            ]
        );
        assert_eq!(
            summary.failed,
            vec![FailedTest {
                key: TargetKey::new("app", "hang_test"),
                exit_code: -9,
            }]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_inside_runfiles() {
        let temp = TempDir::new().unwrap();
        let loaded = LoadedConfig {
            config: Config::default(),
            root: temp.path().to_path_buf(),
            path: None,
        };
        std::fs::create_dir_all(temp.path().join("app/data")).unwrap();
        std::fs::write(temp.path().join("app/data/input.txt"), "hello").unwrap();
        std::fs::create_dir_all(temp.path().join("shared")).unwrap();
        std::fs::write(temp.path().join("shared/words"), "world").unwrap();
        write_test_binary(
            &loaded.build_dir(),
            "app",
            "data_test",
            "test \"$(cat data/input.txt)\" = hello && test \"$(cat shared/words)\" = world \
             && case \"$LD_LIBRARY_PATH\" in *data_test.runfiles*) ;; *) exit 3 ;; esac",
        );

        let spec = TestSpec {
            testdata: vec!["data/input.txt".to_string(), "//shared/words".to_string()],
            ..Default::default()
        };
        let graph = Graph::from_targets(vec![
            Target::new("app", "data_test", TargetKind::ShTest).with_test(spec),
        ])
        .unwrap();

        let runner = TestRunner::new(&loaded, &graph, Arc::new(CollectingReporter::default()));
        let targets = expand_patterns(&graph, &["app:data_test"]).unwrap();
        let options = TestRunOptions {
            jobs: 1,
            quiet: true,
            ..Default::default()
        };
        let summary = runner.run(&targets, &options).await.unwrap();

        assert_eq!(summary.passed, vec![TargetKey::new("app", "data_test")], "{:?}", summary.failed);
        let runfiles = loaded.build_dir().join("app/data_test.runfiles");
        assert!(runfiles.join("data/input.txt").exists());
        assert!(runfiles.join("shared/words").exists());
    }
}
