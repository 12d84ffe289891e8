//! Exit codes for the CLI

use trellis_core::{ConfigError, GraphError, LockError, TrellisError};
use trellis_tasks::{FragmentError, RunnerError};

/// Success
pub const SUCCESS: i32 = 0;

/// General error
pub const ERROR: i32 = 1;

/// Configuration error
pub const CONFIG_ERROR: i32 = 2;

/// Target graph error (missing dependency, cycle, visibility, bad pattern)
pub const GRAPH_ERROR: i32 = 3;

/// The backend build failed
pub const BUILD_FAILED: i32 = 4;

/// At least one test failed
pub const TESTS_FAILED: i32 = 5;

/// Another invocation holds the workspace lock
pub const LOCKED: i32 = 6;

/// User cancelled
pub const CANCELLED: i32 = 130;

/// A command that ran to completion but did not succeed
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct CommandFailed {
    pub code: i32,
    pub message: String,
}

impl CommandFailed {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Map an error to the process exit code
pub fn for_error(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(failed) = cause.downcast_ref::<CommandFailed>() {
            return failed.code;
        }
        if cause.is::<ConfigError>() {
            return CONFIG_ERROR;
        }
        if cause.is::<GraphError>() {
            return GRAPH_ERROR;
        }
        if cause.is::<LockError>() {
            return LOCKED;
        }
        match cause.downcast_ref::<TrellisError>() {
            Some(TrellisError::Config(_)) => return CONFIG_ERROR,
            Some(TrellisError::Graph(_)) => return GRAPH_ERROR,
            Some(TrellisError::Lock(_)) => return LOCKED,
            _ => {}
        }
        if let Some(FragmentError::Graph(_)) = cause.downcast_ref::<FragmentError>() {
            return GRAPH_ERROR;
        }
        if let Some(RunnerError::Graph(_)) = cause.downcast_ref::<RunnerError>() {
            return GRAPH_ERROR;
        }
    }
    ERROR
}
