//! Test history: persisted outcomes and the incremental re-run decision
//!
//! The history file is rewritten whole after every test run. It holds the
//! last watched-environment snapshot and one [`TestHistoryItem`] per test.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use trellis_core::TargetKey;

use crate::fingerprint::digest_bytes;
use crate::job::{RunReason, TestJob, TestRunResult};

/// History file name inside the build directory
pub const HISTORY_FILE: &str = ".trellis.test_history.json";

/// History store errors
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("Failed to access test history {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Corrupt test history {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid watched environment pattern: {0}")]
    Pattern(#[from] globset::Error),
}

/// Last known state of one test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestHistoryItem {
    pub job: TestJob,
    /// Start of the current failure streak
    pub first_fail_time: Option<DateTime<Utc>>,
    /// Consecutive failing runs
    pub fail_count: u32,
    pub result: TestRunResult,
}

impl TestHistoryItem {
    pub fn failed(&self) -> bool {
        self.result.exit_code != 0
    }
}

/// Inputs of a test this invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInputs {
    pub binary_fingerprint: String,
    pub testdata_fingerprint: String,
    pub env_fingerprint: String,
    pub args: String,
    pub always_run: bool,
    /// Named exactly on the command line
    pub explicit: bool,
}

impl JobInputs {
    /// The job record for a run with `reason`
    pub fn to_job(&self, reason: RunReason) -> TestJob {
        TestJob {
            reason,
            binary_fingerprint: self.binary_fingerprint.clone(),
            testdata_fingerprint: self.testdata_fingerprint.clone(),
            env_fingerprint: self.env_fingerprint.clone(),
            args: self.args.clone(),
        }
    }
}

/// Invocation-wide switches for the decision
#[derive(Debug, Clone)]
pub struct DecisionPolicy {
    /// Run everything
    pub full: bool,
    /// Re-run confirmed failures
    pub run_unrepaired: bool,
    /// History older than this is stale
    pub freshness: Duration,
    pub now: DateTime<Utc>,
}

impl DecisionPolicy {
    pub fn new(freshness_secs: u64) -> Self {
        Self {
            full: false,
            run_unrepaired: false,
            freshness: Duration::seconds(i64::try_from(freshness_secs).unwrap_or(i64::MAX)),
            now: Utc::now(),
        }
    }
}

/// Whether a test runs this time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Run(RunReason),
    /// Last run passed and nothing changed
    Unchanged,
    /// Confirmed failure, parked until it is forced or its inputs change
    Unrepaired,
}

/// How a recorded result relates to the previous one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    /// Passed after failing
    Repaired,
    /// Failed again
    Failed,
    /// Failed after passing, or on its first run
    NewFailed,
}

/// A watched variable that differs from the stored snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvChange {
    Added(String, String),
    Removed(String, String),
    Changed {
        name: String,
        old: String,
        new: String,
    },
}

impl fmt::Display for EnvChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Added(name, value) => write!(f, "+{}={}", name, value),
            Self::Removed(name, value) => write!(f, "-{}={}", name, value),
            Self::Changed { name, old, new } => write!(f, "{}: {} -> {}", name, old, new),
        }
    }
}

/// Which environment variables can invalidate test history
#[derive(Debug, Clone)]
pub struct EnvWatch {
    set: GlobSet,
}

impl EnvWatch {
    pub fn new(patterns: &[String]) -> Result<Self, HistoryError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            builder.add(Glob::new(pattern)?);
        }
        Ok(Self {
            set: builder.build()?,
        })
    }

    /// Filter `vars` down to the watched ones
    pub fn snapshot<I>(&self, vars: I) -> BTreeMap<String, String>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        vars.into_iter()
            .filter(|(name, _)| self.set.is_match(name))
            .collect()
    }

    /// Snapshot of the current process environment
    pub fn current(&self) -> BTreeMap<String, String> {
        self.snapshot(std::env::vars_os().filter_map(|(k, v)| {
            Some((k.into_string().ok()?, v.into_string().ok()?))
        }))
    }
}

/// Digest of an environment snapshot
pub fn env_fingerprint(snapshot: &BTreeMap<String, String>) -> String {
    let mut encoded = String::new();
    for (name, value) in snapshot {
        encoded.push_str(name);
        encoded.push('=');
        encoded.push_str(value);
        encoded.push('\0');
    }
    digest_bytes(encoded.as_bytes())
}

/// Persisted test history
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestHistory {
    /// Watched environment at the last run
    pub env: BTreeMap<String, String>,
    pub items: BTreeMap<TargetKey, TestHistoryItem>,
}

impl TestHistory {
    pub fn path(build_dir: &Path) -> PathBuf {
        build_dir.join(HISTORY_FILE)
    }

    /// Load the history; a missing file is an empty history
    pub fn load(path: &Path) -> Result<Self, HistoryError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no test history");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(HistoryError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let history: Self = serde_json::from_str(&content).map_err(|source| HistoryError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), items = history.items.len(), "test history loaded");
        Ok(history)
    }

    /// Replace the history file
    pub fn save(&self, path: &Path) -> Result<(), HistoryError> {
        let io_err = |source| HistoryError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|e| io_err(io::Error::other(e)))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, content).map_err(io_err)?;
        std::fs::rename(&tmp, path).map_err(io_err)?;
        info!(path = %path.display(), items = self.items.len(), "test history saved");
        Ok(())
    }

    pub fn get(&self, key: &TargetKey) -> Option<&TestHistoryItem> {
        self.items.get(key)
    }

    /// Decide whether `key` runs; the first matching rule wins
    pub fn decide(&self, key: &TargetKey, inputs: &JobInputs, policy: &DecisionPolicy) -> Decision {
        if policy.full {
            return Decision::Run(RunReason::Full);
        }
        if inputs.always_run {
            return Decision::Run(RunReason::AlwaysRun);
        }
        if inputs.explicit {
            return Decision::Run(RunReason::Explicit);
        }
        let Some(item) = self.items.get(key) else {
            return Decision::Run(RunReason::NoHistory);
        };

        let age = policy.now.signed_duration_since(item.result.start_time);
        if age > policy.freshness || age < Duration::zero() {
            return Decision::Run(RunReason::Stale);
        }
        if item.job.binary_fingerprint != inputs.binary_fingerprint {
            return Decision::Run(RunReason::Binary);
        }
        if item.job.testdata_fingerprint != inputs.testdata_fingerprint {
            return Decision::Run(RunReason::Testdata);
        }
        if item.job.env_fingerprint != inputs.env_fingerprint {
            return Decision::Run(RunReason::Environment);
        }
        if item.job.args != inputs.args {
            return Decision::Run(RunReason::Argument);
        }
        if item.failed() && item.fail_count <= 1 {
            return Decision::Run(RunReason::Retry);
        }

        if !item.failed() {
            Decision::Unchanged
        } else if policy.run_unrepaired {
            Decision::Run(RunReason::Unrepaired)
        } else {
            Decision::Unrepaired
        }
    }

    /// Record a finished run, replacing the item
    #[instrument(skip_all, fields(target = %key, exit_code = result.exit_code))]
    pub fn record(&mut self, key: &TargetKey, job: TestJob, result: TestRunResult) -> Outcome {
        let prior = self.items.get(key);

        let (item, outcome) = if result.exit_code == 0 {
            let outcome = match prior {
                Some(prior) if prior.failed() => Outcome::Repaired,
                _ => Outcome::Passed,
            };
            let item = TestHistoryItem {
                job,
                first_fail_time: None,
                fail_count: 0,
                result,
            };
            (item, outcome)
        } else {
            match prior {
                Some(prior) if prior.failed() => {
                    let item = TestHistoryItem {
                        job,
                        first_fail_time: prior.first_fail_time.or(Some(result.start_time)),
                        fail_count: prior.fail_count.saturating_add(1),
                        result,
                    };
                    (item, Outcome::Failed)
                }
                _ => {
                    let item = TestHistoryItem {
                        job,
                        first_fail_time: Some(result.start_time),
                        fail_count: 1,
                        result,
                    };
                    (item, Outcome::NewFailed)
                }
            }
        };

        debug!(?outcome, fail_count = item.fail_count, "history updated");
        self.items.insert(key.clone(), item);
        outcome
    }

    /// Differences between the stored snapshot and `current`
    pub fn env_changes(&self, current: &BTreeMap<String, String>) -> Vec<EnvChange> {
        let mut changes = Vec::new();
        for (name, old) in &self.env {
            match current.get(name) {
                None => changes.push(EnvChange::Removed(name.clone(), old.clone())),
                Some(new) if new != old => changes.push(EnvChange::Changed {
                    name: name.clone(),
                    old: old.clone(),
                    new: new.clone(),
                }),
                Some(_) => {}
            }
        }
        for (name, value) in current {
            if !self.env.contains_key(name) {
                changes.push(EnvChange::Added(name.clone(), value.clone()));
            }
        }
        changes
    }
}
