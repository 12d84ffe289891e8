//! Configuration types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Main configuration for Trellis
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Build configuration
    pub build: BuildConfig,

    /// Backend executor configuration
    pub backend: BackendConfig,

    /// Test configuration
    pub test: TestConfig,
}

/// Build configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Output directory, relative to the workspace root
    pub build_dir: PathBuf,

    /// Build profile passed to rule generators
    pub profile: String,

    /// Backend parallelism (0 = auto)
    pub jobs: usize,

    /// Target database written by the loading front end
    pub targets_file: PathBuf,

    /// Generate test targets even when not named on the command line
    pub generate_tests: bool,

    /// Generate package targets even when not named on the command line
    pub generate_packages: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            build_dir: PathBuf::from("build"),
            profile: "release".to_string(),
            jobs: 0,
            targets_file: PathBuf::from("targets.json"),
            generate_tests: false,
            generate_packages: false,
        }
    }
}

impl BuildConfig {
    /// Configured job count, or `min(cpu_count, 8)`
    pub fn effective_jobs(&self) -> usize {
        if self.jobs > 0 {
            self.jobs
        } else {
            cpu_count().min(8)
        }
    }
}

/// Backend executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Executable name or path
    pub program: String,

    /// Extra arguments appended to every invocation
    pub args: Vec<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            program: "ninja".to_string(),
            args: Vec::new(),
        }
    }
}

/// Test configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TestConfig {
    /// Concurrent test processes (0 = auto)
    pub jobs: usize,

    /// Default per-test timeout in seconds (0 = none)
    pub timeout_secs: u64,

    /// How often the timeout monitor checks running tests
    pub poll_interval_ms: u64,

    /// History older than this forces a re-run
    pub freshness_secs: u64,

    /// Re-run tests whose failures were already confirmed
    pub run_unrepaired: bool,

    /// Environment variable globs whose changes force a re-run
    pub watched_env: Vec<String>,

    /// Extra variables injected into every test process
    pub env: BTreeMap<String, String>,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jobs: 0,
            timeout_secs: 0,
            poll_interval_ms: 1000,
            freshness_secs: 86400,
            run_unrepaired: false,
            watched_env: ["LD_LIBRARY_PATH", "PATH", "TZ", "LANG", "LC_*"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            env: BTreeMap::new(),
        }
    }
}

impl TestConfig {
    /// Configured job count, or half the build parallelism (at least one)
    pub fn effective_jobs(&self, build_jobs: usize) -> usize {
        if self.jobs > 0 {
            self.jobs
        } else {
            (build_jobs.min(cpu_count()) / 2).max(1)
        }
    }

    /// Default timeout, if any
    pub fn default_timeout(&self) -> Option<std::time::Duration> {
        (self.timeout_secs > 0).then(|| std::time::Duration::from_secs(self.timeout_secs))
    }
}

fn cpu_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.build.build_dir, PathBuf::from("build"));
        assert_eq!(config.backend.program, "ninja");
        assert_eq!(config.test.freshness_secs, 86400);
        assert!(config.test.watched_env.iter().any(|p| p == "LC_*"));
        assert!(config.test.default_timeout().is_none());
    }

    #[test]
    fn test_effective_jobs() {
        let mut build = BuildConfig::default();
        assert!(build.effective_jobs() >= 1);
        assert!(build.effective_jobs() <= 8);
        build.jobs = 12;
        assert_eq!(build.effective_jobs(), 12);

        let mut test = TestConfig::default();
        assert!(test.effective_jobs(1) >= 1);
        test.jobs = 3;
        assert_eq!(test.effective_jobs(8), 3);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str("[test]\njobs = 4\n").unwrap();
        assert_eq!(config.test.jobs, 4);
        assert_eq!(config.test.poll_interval_ms, 1000);
        assert_eq!(config.build.profile, "release");
    }
}
