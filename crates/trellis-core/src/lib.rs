//! Trellis Core - target graph engine for the Trellis build orchestrator
//!
//! This crate provides the target data model, the dependency resolver,
//! command-line target patterns, configuration, and the workspace lock and
//! build stamp shared by every Trellis invocation.

pub mod config;
pub mod error;
pub mod graph;
pub mod pattern;
pub mod target;
pub mod workspace;

pub use config::{Config, LoadedConfig};
pub use error::{ConfigError, GraphError, LockError, Result, TrellisError};
pub use graph::{analyze, Graph, Propagation};
pub use pattern::{expand_patterns, CommandTargets, TargetPattern};
pub use target::{AttrValue, Target, TargetKey, TargetKind, TestSpec, Visibility};
pub use workspace::{BuildStamp, LockMetadata, WorkspaceLock};
