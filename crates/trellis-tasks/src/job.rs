//! Test job types

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trellis_core::TargetKey;

/// Why a test was scheduled this invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunReason {
    /// Every test was requested
    #[serde(rename = "FULLTEST")]
    Full,
    #[serde(rename = "ALWAYS_RUN")]
    AlwaysRun,
    /// Named directly on the command line
    #[serde(rename = "EXPLICIT")]
    Explicit,
    #[serde(rename = "NO_HISTORY")]
    NoHistory,
    #[serde(rename = "STALE")]
    Stale,
    #[serde(rename = "BINARY")]
    Binary,
    #[serde(rename = "TESTDATA")]
    Testdata,
    #[serde(rename = "ENVIRONMENT")]
    Environment,
    #[serde(rename = "ARGUMENT")]
    Argument,
    /// First retry after a failure
    #[serde(rename = "RETRY")]
    Retry,
    /// A confirmed failure re-run on request
    #[serde(rename = "UNREPAIRED")]
    Unrepaired,
}

impl RunReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "FULLTEST",
            Self::AlwaysRun => "ALWAYS_RUN",
            Self::Explicit => "EXPLICIT",
            Self::NoHistory => "NO_HISTORY",
            Self::Stale => "STALE",
            Self::Binary => "BINARY",
            Self::Testdata => "TESTDATA",
            Self::Environment => "ENVIRONMENT",
            Self::Argument => "ARGUMENT",
            Self::Retry => "RETRY",
            Self::Unrepaired => "UNREPAIRED",
        }
    }
}

impl fmt::Display for RunReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The inputs that justified running a test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestJob {
    pub reason: RunReason,
    pub binary_fingerprint: String,
    pub testdata_fingerprint: String,
    pub env_fingerprint: String,
    pub args: String,
}

/// Outcome of one test process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRunResult {
    pub exit_code: i32,
    pub start_time: DateTime<Utc>,
    /// Wall-clock seconds
    pub cost_time: f64,
}

impl TestRunResult {
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }
}

/// A process to run: `(target, run_dir, env, cmd)` plus scheduling options
#[derive(Debug, Clone)]
pub struct ScheduledTest {
    pub key: TargetKey,
    pub run_dir: PathBuf,
    /// Complete environment of the child; nothing is inherited
    pub env: BTreeMap<String, String>,
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Must not overlap any other test
    pub exclusive: bool,
    pub timeout: Option<Duration>,
}

impl ScheduledTest {
    pub fn new(key: TargetKey, program: impl Into<PathBuf>) -> Self {
        Self {
            key,
            run_dir: PathBuf::from("."),
            env: BTreeMap::new(),
            program: program.into(),
            args: Vec::new(),
            exclusive: false,
            timeout: None,
        }
    }

    pub fn with_run_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.run_dir = dir.into();
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Command line for display
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}
