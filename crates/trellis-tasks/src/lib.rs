//! Trellis Tasks - build and test execution for the Trellis build orchestrator
//!
//! This crate turns an analyzed target graph into backend build rules with a
//! per-target fragment cache, drives the backend, and runs tests
//! incrementally against a persisted test history.

pub mod backend;
pub mod fingerprint;
pub mod fragment;
pub mod generator;
pub mod history;
pub mod job;
pub mod reporter;
pub mod runner;
pub mod scheduler;
pub mod signals;

pub use backend::{remove_outputs, BackendError, CleanStats, NinjaRunner};
pub use fingerprint::compute_fingerprints;
pub use fragment::{Assembly, FragmentCache, FragmentError, FragmentReport, Operation};
pub use generator::{output_path, GeneratedRules, NinjaRuleGenerator, RuleGenerator};
pub use history::{Decision, HistoryError, TestHistory, TestHistoryItem};
pub use job::{RunReason, ScheduledTest, TestJob, TestRunResult};
pub use reporter::{CollectingReporter, TestEvent, TestReporter, TracingReporter};
pub use runner::{FailedTest, RunnerError, TestRunOptions, TestRunner, TestSummary};
pub use scheduler::{SchedulerOptions, SchedulerResults, TestScheduler};
