//! Error types for Trellis

use std::path::PathBuf;
use thiserror::Error;

use crate::target::TargetKey;

/// Result type alias using TrellisError
pub type Result<T> = std::result::Result<T, TrellisError>;

/// Main error type for Trellis operations
#[derive(Debug, Error)]
pub enum TrellisError {
    /// Target graph errors (always fatal)
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Configuration-related errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Workspace lock errors
    #[error(transparent)]
    Lock(#[from] LockError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

/// Fatal conditions found while registering or analyzing the target graph
#[derive(Debug, Error)]
pub enum GraphError {
    /// The same key was registered twice
    #[error("Target {0} is declared more than once")]
    DuplicateTarget(TargetKey),

    /// A declared dependency does not exist
    #[error("{}", describe_missing(.target, .dependency, .declared_by))]
    MissingDependency {
        target: TargetKey,
        dependency: TargetKey,
        /// Best-effort guess at who else declares the missing dependency
        declared_by: Option<TargetKey>,
    },

    /// Dependency cycle; the chain starts at the target being expanded
    #[error("Dependency cycle found: {}", format_chain(.0))]
    Cycle(Vec<TargetKey>),

    /// A target depends on something that is not visible to it
    #[error("{dependency} is not visible to {target}")]
    Visibility {
        target: TargetKey,
        dependency: TargetKey,
    },

    /// A command-line target that does not exist
    #[error("{}", describe_unknown(.0, .1))]
    UnknownTarget(TargetKey, Option<TargetKey>),

    /// Malformed target pattern
    #[error("Invalid target pattern '{0}': {1}")]
    BadPattern(String, String),

    /// An operation needs an analyzed graph
    #[error("Target graph has not been analyzed yet")]
    NotAnalyzed,
}

fn format_chain(chain: &[TargetKey]) -> String {
    chain
        .iter()
        .map(|k| format!("//{}", k))
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn describe_missing(
    target: &TargetKey,
    dependency: &TargetKey,
    declared_by: &Option<TargetKey>,
) -> String {
    match declared_by {
        Some(other) if other != target => format!(
            "Target //{} depends on //{}, which does not exist (also required by //{})",
            target, dependency, other
        ),
        _ => format!(
            "Target //{} depends on //{}, which does not exist",
            target, dependency
        ),
    }
}

fn describe_unknown(key: &TargetKey, declared_by: &Option<TargetKey>) -> String {
    match declared_by {
        Some(other) => format!("Target //{} does not exist (required by //{})", key, other),
        None => format!("Target //{} does not exist", key),
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {message}")]
    InvalidValue { field: String, message: String },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// IO error
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
}

/// Workspace lock errors
#[derive(Debug, Error)]
pub enum LockError {
    /// Another invocation holds the lock and left readable metadata
    #[error(
        "There is already an active build in this workspace: {command} (PID {pid}, started {started_at})\n\
         If you're sure no trellis process is running, remove the lock file:\n  {lock_path}"
    )]
    Contention {
        command: String,
        pid: u32,
        started_at: String,
        lock_path: PathBuf,
    },

    /// Another invocation holds the lock
    #[error(
        "There is already an active build in this workspace\n\
         If you're sure no trellis process is running, remove the lock file:\n  {lock_path}"
    )]
    ContentionUnknown { lock_path: PathBuf },

    /// Failed to create the build directory
    #[error("Failed to create build directory: {0}")]
    CreateDir(#[source] std::io::Error),

    /// Failed to open the lock file
    #[error("Failed to open lock file: {0}")]
    OpenFile(#[source] std::io::Error),

    /// Failed to write holder metadata
    #[error("Failed to write lock metadata: {0}")]
    WriteMetadata(#[source] std::io::Error),

    /// Locking itself failed for a reason other than contention
    #[error("Failed to acquire lock: {0}")]
    LockFailed(#[source] std::io::Error),
}

impl TrellisError {
    /// Create a new "other" error with a message
    pub fn other<S: Into<String>>(msg: S) -> Self {
        Self::Other(msg.into())
    }
}
