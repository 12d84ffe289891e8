//! Command-line target patterns
//!
//! | pattern      | matches                                   |
//! |--------------|-------------------------------------------|
//! | `dir:name`   | exactly that target                       |
//! | `dir:*`      | every target declared in `dir`            |
//! | `dir`        | same as `dir:*`                           |
//! | `dir/...`    | every target in `dir` or below            |
//! | `...`        | the whole workspace                       |
//!
//! A leading `//` is accepted and ignored.

use std::collections::HashSet;
use std::fmt;

use tracing::{debug, warn};

use crate::error::GraphError;
use crate::graph::Graph;
use crate::target::TargetKey;

/// A parsed target pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetPattern {
    Exact(TargetKey),
    Directory(String),
    /// Directory prefix; empty means everything
    Recursive(String),
}

impl TargetPattern {
    pub fn parse(input: &str) -> Result<Self, GraphError> {
        let bad = |why: &str| GraphError::BadPattern(input.to_string(), why.to_string());

        let s = input.trim();
        let s = s.strip_prefix("//").unwrap_or(s);
        let s = s.strip_prefix("./").unwrap_or(s);
        if s.is_empty() {
            return Err(bad("empty pattern"));
        }

        if let Some(prefix) = s.strip_suffix("...") {
            if prefix.contains(':') {
                return Err(bad("'...' cannot follow a target name"));
            }
            return Ok(Self::Recursive(normalize_dir(prefix)));
        }

        match s.rsplit_once(':') {
            Some((_, "")) => Err(bad("missing target name after ':'")),
            Some((dir, "*")) => Ok(Self::Directory(normalize_dir(dir))),
            Some((dir, name)) => Ok(Self::Exact(TargetKey::new(normalize_dir(dir), name))),
            None => Ok(Self::Directory(normalize_dir(s))),
        }
    }

    /// Whether `key` is covered by this pattern
    pub fn matches(&self, key: &TargetKey) -> bool {
        match self {
            Self::Exact(exact) => exact == key,
            Self::Directory(dir) => key.dir == *dir,
            Self::Recursive(prefix) if prefix.is_empty() => !key.is_system(),
            Self::Recursive(prefix) => {
                key.dir == *prefix
                    || key
                        .dir
                        .strip_prefix(prefix.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            }
        }
    }
}

impl fmt::Display for TargetPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(key) => write!(f, "{}", key),
            Self::Directory(dir) => write!(f, "{}:*", dir),
            Self::Recursive(dir) if dir.is_empty() => f.write_str("..."),
            Self::Recursive(dir) => write!(f, "{}/...", dir),
        }
    }
}

fn normalize_dir(dir: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir == "." {
        String::new()
    } else {
        dir.to_string()
    }
}

/// Targets selected on the command line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandTargets {
    /// Named exactly
    pub direct: Vec<TargetKey>,
    /// Union of every pattern's matches
    pub command: Vec<TargetKey>,
}

impl CommandTargets {
    pub fn is_direct(&self, key: &TargetKey) -> bool {
        self.direct.contains(key)
    }
}

/// Expand patterns against the loaded graph
pub fn expand_patterns<S: AsRef<str>>(
    graph: &Graph,
    patterns: &[S],
) -> Result<CommandTargets, GraphError> {
    let mut result = CommandTargets::default();
    let mut seen: HashSet<TargetKey> = HashSet::new();

    for raw in patterns {
        let pattern = TargetPattern::parse(raw.as_ref())?;
        match &pattern {
            TargetPattern::Exact(key) => {
                if !graph.contains(key) {
                    return Err(GraphError::UnknownTarget(
                        key.clone(),
                        graph.find_depender(key),
                    ));
                }
                if !result.direct.contains(key) {
                    result.direct.push(key.clone());
                }
                if seen.insert(key.clone()) {
                    result.command.push(key.clone());
                }
            }
            _ => {
                let before = result.command.len();
                let mut matched = 0usize;
                for key in graph.keys() {
                    if pattern.matches(key) {
                        matched += 1;
                        if seen.insert(key.clone()) {
                            result.command.push(key.clone());
                        }
                    }
                }
                if matched == 0 {
                    warn!(pattern = %pattern, "pattern matches no targets");
                }
                debug!(pattern = %pattern, added = result.command.len() - before, "pattern expanded");
            }
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{Target, TargetKind};

    fn key(s: &str) -> TargetKey {
        TargetKey::parse(s).unwrap()
    }

    fn workspace() -> Graph {
        Graph::from_targets(vec![
            Target::new("common", "base", TargetKind::CcLibrary),
            Target::new("common/net", "http", TargetKind::CcLibrary),
            Target::new("common/net", "http_test", TargetKind::CcTest),
            Target::new("commonx", "other", TargetKind::CcLibrary),
            Target::new("app", "server", TargetKind::CcBinary),
        ])
        .unwrap()
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!(
            TargetPattern::parse("//common:base").unwrap(),
            TargetPattern::Exact(key("common:base"))
        );
        assert_eq!(
            TargetPattern::parse("common/net:*").unwrap(),
            TargetPattern::Directory("common/net".into())
        );
        assert_eq!(
            TargetPattern::parse("common/net/").unwrap(),
            TargetPattern::Directory("common/net".into())
        );
        assert_eq!(
            TargetPattern::parse("common/...").unwrap(),
            TargetPattern::Recursive("common".into())
        );
        assert_eq!(
            TargetPattern::parse("...").unwrap(),
            TargetPattern::Recursive(String::new())
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(
            TargetPattern::parse(""),
            Err(GraphError::BadPattern(..))
        ));
        assert!(TargetPattern::parse("common:").is_err());
        assert!(TargetPattern::parse("common:base...").is_err());
    }

    #[test]
    fn test_recursive_respects_path_components() {
        let pattern = TargetPattern::parse("common/...").unwrap();
        assert!(pattern.matches(&key("common:base")));
        assert!(pattern.matches(&key("common/net:http")));
        assert!(!pattern.matches(&key("commonx:other")));
    }

    #[test]
    fn test_expand_direct_and_command() {
        let graph = workspace();
        let targets = expand_patterns(&graph, &["app:server", "common/net"]).unwrap();

        assert_eq!(targets.direct, vec![key("app:server")]);
        assert_eq!(
            targets.command,
            vec![
                key("app:server"),
                key("common/net:http"),
                key("common/net:http_test")
            ]
        );
        assert!(targets.is_direct(&key("app:server")));
        assert!(!targets.is_direct(&key("common/net:http")));
    }

    #[test]
    fn test_expand_whole_workspace_without_duplicates() {
        let graph = workspace();
        let targets = expand_patterns(&graph, &["...", "common:base"]).unwrap();
        assert_eq!(targets.command.len(), 5);
        assert_eq!(targets.direct, vec![key("common:base")]);
    }

    #[test]
    fn test_expand_unknown_exact_target() {
        let graph = workspace();
        let err = expand_patterns(&graph, &["app:client"]).unwrap_err();
        assert!(matches!(err, GraphError::UnknownTarget(k, None) if k == key("app:client")));
    }
}
