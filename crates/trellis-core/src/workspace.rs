//! Workspace-wide state: the invocation lock and the build stamp

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{LockError, Result};
use crate::target::TargetKey;

/// Lock file name inside the build directory
pub const LOCK_FILENAME: &str = ".trellis.lock";

/// Build stamp file name inside the build directory
pub const STAMP_FILENAME: &str = ".trellis.stamp.json";

/// Who holds the workspace lock
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockMetadata {
    pub pid: u32,
    pub command: String,
    pub started_at: DateTime<Utc>,
}

/// Exclusive advisory lock held for one whole invocation; released on drop
#[derive(Debug)]
pub struct WorkspaceLock {
    file: File,
    lock_path: PathBuf,
}

impl WorkspaceLock {
    /// Take the lock without blocking.
    ///
    /// A second invocation fails immediately, naming the holder when its
    /// metadata is readable.
    pub fn acquire(build_dir: &Path, command: &str) -> std::result::Result<Self, LockError> {
        let lock_path = build_dir.join(LOCK_FILENAME);

        if !build_dir.exists() {
            std::fs::create_dir_all(build_dir).map_err(LockError::CreateDir)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(LockError::OpenFile)?;

        if let Err(err) = file.try_lock_exclusive() {
            if is_contended(&err) {
                warn!(path = %lock_path.display(), "workspace is locked by another invocation");
                return Err(read_contention_error(&lock_path));
            }
            return Err(LockError::LockFailed(err));
        }

        write_metadata(&file, command)?;
        debug!(path = %lock_path.display(), "workspace lock acquired");

        Ok(Self { file, lock_path })
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            debug!(error = %e, "failed to release workspace lock");
        }
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

fn write_metadata(file: &File, command: &str) -> std::result::Result<(), LockError> {
    let metadata = LockMetadata {
        pid: std::process::id(),
        command: command.to_string(),
        started_at: Utc::now(),
    };

    file.set_len(0).map_err(LockError::WriteMetadata)?;
    let mut writer = io::BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &metadata)
        .map_err(|e| LockError::WriteMetadata(io::Error::other(e)))?;
    writer.flush().map_err(LockError::WriteMetadata)?;
    Ok(())
}

fn read_contention_error(lock_path: &Path) -> LockError {
    let metadata = std::fs::read_to_string(lock_path)
        .ok()
        .and_then(|contents| serde_json::from_str::<LockMetadata>(&contents).ok());

    match metadata {
        Some(metadata) => LockError::Contention {
            command: metadata.command,
            pid: metadata.pid,
            started_at: metadata.started_at.to_rfc3339(),
            lock_path: lock_path.to_path_buf(),
        },
        None => LockError::ContentionUnknown {
            lock_path: lock_path.to_path_buf(),
        },
    }
}

/// Record of the last invocation, rewritten whole at the end of each build
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildStamp {
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub exit_code: i32,
    pub direct_targets: Vec<TargetKey>,
    pub command_targets: Vec<TargetKey>,
    pub build_targets: Vec<TargetKey>,
    pub loaded_targets: Vec<TargetKey>,
}

impl BuildStamp {
    /// Start a stamp now
    pub fn begin() -> Self {
        Self {
            start_time: Utc::now(),
            end_time: None,
            exit_code: 0,
            direct_targets: Vec::new(),
            command_targets: Vec::new(),
            build_targets: Vec::new(),
            loaded_targets: Vec::new(),
        }
    }

    /// Close the stamp with the invocation's exit code
    pub fn finish(&mut self, exit_code: i32) {
        self.end_time = Some(Utc::now());
        self.exit_code = exit_code;
    }

    pub fn path(build_dir: &Path) -> PathBuf {
        build_dir.join(STAMP_FILENAME)
    }

    /// Replace the stamp file
    pub fn save(&self, build_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(build_dir)?;
        let path = Self::path(build_dir);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &path)?;
        info!(path = %path.display(), exit_code = self.exit_code, "build stamp written");
        Ok(())
    }

    /// Read the previous stamp, if any
    pub fn load(build_dir: &Path) -> Result<Option<Self>> {
        let path = Self::path(build_dir);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }
}
