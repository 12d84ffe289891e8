//! Default configuration values

/// Default configuration file name (TOML)
pub const DEFAULT_CONFIG_TOML: &str = "trellis.toml";

/// Default configuration file name (YAML)
pub const DEFAULT_CONFIG_YAML: &str = "trellis.yaml";

/// Get list of config file names to search for
pub fn config_file_names() -> Vec<&'static str> {
    vec![
        DEFAULT_CONFIG_TOML,
        DEFAULT_CONFIG_YAML,
        ".trellis.toml",
        ".trellis.yaml",
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toml_names_searched_first() {
        let names = config_file_names();
        assert_eq!(names[0], DEFAULT_CONFIG_TOML);
        assert!(names.contains(&".trellis.yaml"));
    }
}
