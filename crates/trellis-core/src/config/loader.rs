//! Configuration loading

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{ConfigError, Result};

use super::defaults::config_file_names;
use super::types::Config;
use super::validation::validate_config;

/// Load configuration from a file
pub fn load_config(path: &Path) -> Result<Config> {
    let format = if path.extension().is_some_and(|e| e == "toml") {
        "TOML"
    } else {
        "YAML"
    };
    info!(path = %path.display(), format, "loading config");

    let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;

    let config: Config = if format == "TOML" {
        toml::from_str(&content).map_err(ConfigError::TomlError)?
    } else {
        serde_yaml::from_str(&content).map_err(ConfigError::YamlError)?
    };

    validate_config(&config)?;
    debug!(path = %path.display(), "config loaded and validated");
    Ok(config)
}

/// Find a configuration file in `start_dir` or its parents; first match wins
pub fn find_config(start_dir: &Path) -> Option<PathBuf> {
    debug!(start_dir = %start_dir.display(), "searching for config file");
    let mut current = start_dir.to_path_buf();

    loop {
        for name in config_file_names() {
            let config_path = current.join(name);
            if config_path.exists() {
                info!(path = %config_path.display(), "found config file");
                return Some(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    debug!("no config file found");
    None
}

/// A loaded configuration together with the workspace root it applies to
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    /// Directory containing the config file, or the start directory
    pub root: PathBuf,
    pub path: Option<PathBuf>,
}

impl LoadedConfig {
    /// Absolute build directory
    pub fn build_dir(&self) -> PathBuf {
        self.root.join(&self.config.build.build_dir)
    }

    /// Absolute path of the target database
    pub fn targets_file(&self) -> PathBuf {
        self.root.join(&self.config.build.targets_file)
    }
}

/// Locate the workspace: load the nearest config, or use defaults rooted at
/// `dir` when there is none. A config that exists but fails to load is an
/// error.
pub fn load_workspace_config(dir: &Path) -> Result<LoadedConfig> {
    match find_config(dir) {
        Some(path) => {
            let config = load_config(&path)?;
            let root = path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| dir.to_path_buf());
            Ok(LoadedConfig {
                config,
                root,
                path: Some(path),
            })
        }
        None => {
            warn!(dir = %dir.display(), "no config found, using defaults");
            Ok(LoadedConfig {
                config: Config::default(),
                root: dir.to_path_buf(),
                path: None,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_find_config_toml() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("trellis.toml");
        std::fs::write(&config_path, "[build]\nprofile = \"debug\"").unwrap();

        let found = find_config(temp.path());
        assert_eq!(found, Some(config_path));
    }

    #[test]
    fn test_find_config_prefers_toml_over_yaml() {
        let temp = TempDir::new().unwrap();
        let toml_path = temp.path().join("trellis.toml");
        let yaml_path = temp.path().join("trellis.yaml");
        std::fs::write(&toml_path, "[build]\nprofile = \"debug\"").unwrap();
        std::fs::write(&yaml_path, "build:\n  profile: debug").unwrap();

        let found = find_config(temp.path()).unwrap();
        assert_eq!(found, toml_path);
    }

    #[test]
    fn test_find_config_in_parent() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("src").join("lib");
        std::fs::create_dir_all(&nested).unwrap();
        let config_path = temp.path().join(".trellis.yaml");
        std::fs::write(&config_path, "backend:\n  program: make").unwrap();

        assert_eq!(find_config(&nested), Some(config_path));
    }

    #[test]
    fn test_load_config_toml() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("trellis.toml");
        std::fs::write(
            &config_path,
            "[build]\nprofile = \"debug\"\n\n[test]\njobs = 2\nwatched_env = [\"PATH\"]\n",
        )
        .unwrap();

        let config = load_config(&config_path).unwrap();
        assert_eq!(config.build.profile, "debug");
        assert_eq!(config.test.jobs, 2);
        assert_eq!(config.test.watched_env, vec!["PATH".to_string()]);
    }

    #[test]
    fn test_load_config_yaml() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("trellis.yaml");
        std::fs::write(
            &config_path,
            "backend:\n  program: samu\n  args: [\"-k\", \"0\"]\n",
        )
        .unwrap();

        let config = load_config(&config_path).unwrap();
        assert_eq!(config.backend.program, "samu");
        assert_eq!(config.backend.args.len(), 2);
    }

    #[test]
    fn test_load_config_rejects_invalid() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("trellis.toml");
        std::fs::write(&config_path, "[test]\npoll_interval_ms = 0\n").unwrap();

        assert!(load_config(&config_path).is_err());
    }

    #[test]
    fn test_workspace_root_is_config_dir() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("app");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(temp.path().join("trellis.toml"), "[build]\nbuild_dir = \"out\"\n").unwrap();

        let loaded = load_workspace_config(&nested).unwrap();
        assert_eq!(loaded.root, temp.path());
        assert_eq!(loaded.build_dir(), temp.path().join("out"));
    }

    #[test]
    fn test_workspace_defaults_without_config() {
        let temp = TempDir::new().unwrap();
        let loaded = load_workspace_config(temp.path()).unwrap();
        assert!(loaded.path.is_none());
        assert_eq!(loaded.targets_file(), temp.path().join("targets.json"));
    }
}
