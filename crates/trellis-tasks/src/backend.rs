//! Backend build executor driver

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, info, instrument, warn};
use trellis_core::config::BackendConfig;

/// Backend errors
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Backend program '{program}' not found: {source}")]
    NotFound {
        program: String,
        #[source]
        source: which::Error,
    },

    #[error("Failed to run backend: {0}")]
    Spawn(#[source] io::Error),
}

/// Runs the aggregate script with ninja (or a compatible program)
#[derive(Debug, Clone)]
pub struct NinjaRunner {
    program: PathBuf,
    args: Vec<String>,
    root: PathBuf,
    stdout_to_stderr: bool,
}

impl NinjaRunner {
    /// Locate the configured program on `PATH`
    pub fn locate(config: &BackendConfig, root: &Path) -> Result<Self, BackendError> {
        let program = which::which(&config.program).map_err(|source| BackendError::NotFound {
            program: config.program.clone(),
            source,
        })?;
        debug!(program = %program.display(), "backend located");
        Ok(Self {
            program,
            args: config.args.clone(),
            root: root.to_path_buf(),
            stdout_to_stderr: false,
        })
    }

    /// Send the backend's stdout to stderr, leaving stdout to the caller
    pub fn with_stdout_to_stderr(mut self, enabled: bool) -> Self {
        self.stdout_to_stderr = enabled;
        self
    }

    /// `<program> -f <script> -j <jobs> [args...]`, run in the workspace root
    pub fn command(&self, script: &Path, jobs: usize) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-f")
            .arg(script)
            .arg("-j")
            .arg(jobs.to_string())
            .args(&self.args)
            .current_dir(&self.root);
        if self.stdout_to_stderr {
            cmd.stdout(Stdio::from(io::stderr()));
        }
        cmd
    }

    /// Run the backend with inherited stdio; returns its exit code
    #[instrument(skip_all, fields(script = %script.display(), jobs))]
    pub fn run(&self, script: &Path, jobs: usize) -> Result<i32, BackendError> {
        info!(program = %self.program.display(), "running backend");
        let status = self
            .command(script, jobs)
            .status()
            .map_err(BackendError::Spawn)?;
        let code = crate::signals::exit_code_of(&status);
        if code != 0 {
            warn!(code, "backend build failed");
        }
        Ok(code)
    }
}

/// Result of removing declared outputs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanStats {
    pub removed: usize,
    pub missing: usize,
}

/// Remove the files a clean pass collected
pub fn remove_outputs(paths: &[PathBuf]) -> CleanStats {
    let mut stats = CleanStats::default();
    for path in paths {
        let result = if path.is_dir() {
            std::fs::remove_dir_all(path)
        } else {
            std::fs::remove_file(path)
        };
        match result {
            Ok(()) => stats.removed += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => stats.missing += 1,
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove output"),
        }
    }
    info!(removed = stats.removed, missing = stats.missing, "outputs cleaned");
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_program() {
        let config = BackendConfig {
            program: "trellis-no-such-backend".to_string(),
            args: Vec::new(),
        };
        let err = NinjaRunner::locate(&config, Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("trellis-no-such-backend"));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_line() {
        let config = BackendConfig {
            program: "sh".to_string(),
            args: vec!["-k".to_string(), "0".to_string()],
        };
        let runner = NinjaRunner::locate(&config, Path::new("/ws")).unwrap();
        let cmd = runner.command(Path::new("build/build.ninja"), 4);
        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        assert_eq!(args, vec!["-f", "build/build.ninja", "-j", "4", "-k", "0"]);
        assert_eq!(cmd.get_current_dir(), Some(Path::new("/ws")));
    }

    #[cfg(unix)]
    #[test]
    fn test_run_reports_exit_code() {
        let temp = TempDir::new().unwrap();
        let script = temp.path().join("script.sh");
        std::fs::write(&script, "exit 3\n").unwrap();

        // `sh -f <script>` disables globbing and runs the script
        let config = BackendConfig {
            program: "sh".to_string(),
            args: Vec::new(),
        };
        let runner = NinjaRunner::locate(&config, temp.path()).unwrap();
        assert_eq!(runner.run(&script, 1).unwrap(), 3);
    }

    #[cfg(unix)]
    #[test]
    fn test_run_with_stdout_on_stderr() {
        let temp = TempDir::new().unwrap();
        let script = temp.path().join("script.sh");
        std::fs::write(&script, "echo building; exit 0\n").unwrap();

        let config = BackendConfig {
            program: "sh".to_string(),
            args: Vec::new(),
        };
        let runner = NinjaRunner::locate(&config, temp.path())
            .unwrap()
            .with_stdout_to_stderr(true);
        assert_eq!(runner.run(&script, 1).unwrap(), 0);
    }

    #[test]
    fn test_remove_outputs() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("out.o");
        let dir = temp.path().join("gen");
        std::fs::write(&file, "x").unwrap();
        std::fs::create_dir_all(dir.join("nested")).unwrap();

        let stats = remove_outputs(&[file.clone(), dir.clone(), temp.path().join("absent")]);
        assert_eq!(stats, CleanStats { removed: 2, missing: 1 });
        assert!(!file.exists());
        assert!(!dir.exists());
    }
}
