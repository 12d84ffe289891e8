//! Target graph: the registry of loaded targets and the queries over it
//!
//! A [`Graph`] is built once from the target database produced by the
//! loading front end, narrowed to the targets reachable from the command
//! line with [`Graph::related`], then analyzed by the [`resolver`] which
//! fills in transitive edges and the global build order.

pub mod resolver;

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;

use tracing::{debug, info, instrument};

use crate::error::{GraphError, Result};
use crate::target::{Target, TargetKey};

pub use resolver::{analyze, Propagation};

/// Target registry, passed by value/reference through load -> analyze ->
/// generate -> test
#[derive(Debug, Clone, Default)]
pub struct Graph {
    /// Targets indexed by key
    targets: HashMap<TargetKey, Target>,
    /// Keys in registration order
    order: Vec<TargetKey>,
    /// Dependency-first build order, set by analysis
    sorted: Option<Vec<TargetKey>>,
}

impl Graph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a target; a duplicate key is fatal
    pub fn register(&mut self, target: Target) -> std::result::Result<(), GraphError> {
        let key = target.key();
        if self.targets.contains_key(&key) {
            return Err(GraphError::DuplicateTarget(key));
        }
        self.order.push(key.clone());
        self.targets.insert(key, target);
        self.sorted = None;
        Ok(())
    }

    /// Build a graph from a list of targets
    pub fn from_targets<I: IntoIterator<Item = Target>>(
        targets: I,
    ) -> std::result::Result<Self, GraphError> {
        let mut graph = Self::new();
        for target in targets {
            graph.register(target)?;
        }
        Ok(graph)
    }

    /// Load the JSON target database written by the loading front end
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn load_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let targets: Vec<Target> = serde_json::from_str(&content)?;
        let graph = Self::from_targets(targets)?;
        info!(targets = graph.len(), "target database loaded");
        Ok(graph)
    }

    /// Get a target
    pub fn get(&self, key: &TargetKey) -> Option<&Target> {
        self.targets.get(key)
    }

    /// Get a target for mutation
    pub fn get_mut(&mut self, key: &TargetKey) -> Option<&mut Target> {
        self.targets.get_mut(key)
    }

    pub fn contains(&self, key: &TargetKey) -> bool {
        self.targets.contains_key(key)
    }

    /// Keys in registration order
    pub fn keys(&self) -> &[TargetKey] {
        &self.order
    }

    /// Targets in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Target> {
        self.order.iter().filter_map(|k| self.targets.get(k))
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Dependency-first order; available after analysis
    pub fn sorted(&self) -> std::result::Result<&[TargetKey], GraphError> {
        self.sorted.as_deref().ok_or(GraphError::NotAnalyzed)
    }

    pub(crate) fn set_sorted(&mut self, sorted: Vec<TargetKey>) {
        self.sorted = Some(sorted);
    }

    /// Best-effort search for a target that declares `dep` as a direct dependency
    pub fn find_depender(&self, dep: &TargetKey) -> Option<TargetKey> {
        self.iter()
            .find(|t| t.deps.contains(dep))
            .map(Target::key)
    }

    /// Collect every target reachable from `roots` into a new graph.
    ///
    /// Unregistered `#:<name>` dependencies become system libraries; any
    /// other unknown key is fatal.
    #[instrument(skip_all, fields(roots = roots.len()))]
    pub fn related(&self, roots: &[TargetKey]) -> std::result::Result<Graph, GraphError> {
        let mut reached: HashSet<TargetKey> = HashSet::new();
        let mut queue: VecDeque<(TargetKey, Option<TargetKey>)> =
            roots.iter().map(|k| (k.clone(), None)).collect();
        let mut synthesized: Vec<Target> = Vec::new();

        while let Some((key, from)) = queue.pop_front() {
            if !reached.insert(key.clone()) {
                continue;
            }

            let target = match self.targets.get(&key) {
                Some(target) => target,
                None if key.is_system() => {
                    debug!(target = %key, "synthesizing system library");
                    synthesized.push(Target::system_library(&key.name));
                    continue;
                }
                None => {
                    return Err(match from {
                        Some(target) => GraphError::MissingDependency {
                            declared_by: self.find_depender(&key),
                            target,
                            dependency: key,
                        },
                        None => GraphError::UnknownTarget(key.clone(), self.find_depender(&key)),
                    });
                }
            };

            for dep in &target.deps {
                if !reached.contains(dep) {
                    queue.push_back((dep.clone(), Some(key.clone())));
                }
            }
        }

        let mut graph = Graph::new();
        for key in &self.order {
            if reached.contains(key) {
                if let Some(target) = self.targets.get(key) {
                    graph.register(target.clone())?;
                }
            }
        }
        for target in synthesized {
            graph.register(target)?;
        }

        debug!(related = graph.len(), "related targets collected");
        Ok(graph)
    }

    /// Transitive dependencies of `key`, in link order
    pub fn expanded_deps(&self, key: &TargetKey) -> &[TargetKey] {
        self.targets
            .get(key)
            .map(|t| t.expanded_deps.as_slice())
            .unwrap_or_default()
    }

    /// Everything that transitively depends on `key`
    pub fn expanded_dependents(&self, key: &TargetKey) -> &[TargetKey] {
        self.targets
            .get(key)
            .map(|t| t.expanded_dependents.as_slice())
            .unwrap_or_default()
    }

    /// Indented dependency tree rooted at `key`, following declared deps
    pub fn dependency_tree(&self, key: &TargetKey) -> String {
        let mut out = String::new();
        let mut path: Vec<TargetKey> = Vec::new();
        self.write_tree(key, 0, &mut path, &mut out);
        out
    }

    fn write_tree(&self, key: &TargetKey, level: usize, path: &mut Vec<TargetKey>, out: &mut String) {
        out.push_str(&"  ".repeat(level));
        out.push_str(&format!("//{}\n", key));

        // Analyzed graphs are acyclic; the guard keeps unanalyzed ones finite
        if path.contains(key) {
            return;
        }
        path.push(key.clone());
        if let Some(target) = self.targets.get(key) {
            for dep in &target.deps {
                self.write_tree(dep, level + 1, path, out);
            }
        }
        path.pop();
    }

    /// Graphviz rendering of the declared edges
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph trellis {\n");
        for target in self.iter() {
            let key = target.key();
            out.push_str(&format!("  \"{}\" [label=\"{}\\n{}\"];\n", key, key, target.kind));
            for dep in &target.deps {
                out.push_str(&format!("  \"{}\" -> \"{}\";\n", key, dep));
            }
        }
        out.push_str("}\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::TargetKind;
    use tempfile::TempDir;

    fn key(s: &str) -> TargetKey {
        TargetKey::parse(s).unwrap()
    }

    fn sample() -> Graph {
        Graph::from_targets(vec![
            Target::new("base", "str", TargetKind::CcLibrary),
            Target::new("base", "log", TargetKind::CcLibrary).with_dep(key("base:str")),
            Target::new("app", "server", TargetKind::CcBinary)
                .with_deps([key("base:log"), key("#:pthread")]),
            Target::new("tools", "unused", TargetKind::CcBinary),
        ])
        .unwrap()
    }

    #[test]
    fn test_register_duplicate() {
        let mut graph = Graph::new();
        graph
            .register(Target::new("a", "b", TargetKind::CcLibrary))
            .unwrap();
        let err = graph
            .register(Target::new("a", "b", TargetKind::CcBinary))
            .unwrap_err();
        assert!(matches!(err, GraphError::DuplicateTarget(k) if k == key("a:b")));
    }

    #[test]
    fn test_related_collects_reachable() {
        let graph = sample();
        let related = graph.related(&[key("app:server")]).unwrap();

        assert_eq!(related.len(), 4);
        assert!(related.contains(&key("base:str")));
        assert!(!related.contains(&key("tools:unused")));
        let sys = related.get(&key("#:pthread")).unwrap();
        assert_eq!(sys.kind, TargetKind::SystemLibrary);
    }

    #[test]
    fn test_related_missing_dependency() {
        let graph = Graph::from_targets(vec![
            Target::new("app", "main", TargetKind::CcBinary).with_dep(key("lib:gone")),
        ])
        .unwrap();

        let err = graph.related(&[key("app:main")]).unwrap_err();
        match err {
            GraphError::MissingDependency {
                target,
                dependency,
                declared_by,
            } => {
                assert_eq!(target, key("app:main"));
                assert_eq!(dependency, key("lib:gone"));
                assert_eq!(declared_by, Some(key("app:main")));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_related_unknown_root() {
        let graph = sample();
        let err = graph.related(&[key("nope:nothing")]).unwrap_err();
        assert!(matches!(err, GraphError::UnknownTarget(..)));
    }

    #[test]
    fn test_sorted_requires_analysis() {
        let graph = sample();
        assert!(matches!(graph.sorted(), Err(GraphError::NotAnalyzed)));
    }

    #[test]
    fn test_load_json() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("targets.json");
        std::fs::write(
            &path,
            r#"[
                {"dir": "base", "name": "str", "type": "cc_library"},
                {"dir": "app", "name": "main", "type": "cc_binary", "deps": ["base:str"]}
            ]"#,
        )
        .unwrap();

        let graph = Graph::load_json(&path).unwrap();
        assert_eq!(graph.keys(), &[key("base:str"), key("app:main")]);
    }

    #[test]
    fn test_load_json_duplicate_is_fatal() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("targets.json");
        std::fs::write(
            &path,
            r#"[
                {"dir": "base", "name": "str", "type": "cc_library"},
                {"dir": "base", "name": "str", "type": "cc_library"}
            ]"#,
        )
        .unwrap();

        let err = Graph::load_json(&path).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_dependency_tree() {
        let graph = sample();
        let tree = graph.dependency_tree(&key("app:server"));
        assert_eq!(
            tree,
            "//app:server\n  //base:log\n    //base:str\n  //#:pthread\n"
        );
    }

    #[test]
    fn test_to_dot() {
        let dot = sample().to_dot();
        assert!(dot.starts_with("digraph trellis {"));
        assert!(dot.contains("\"app:server\" -> \"base:log\";"));
    }
}
