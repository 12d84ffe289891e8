//! Dependency resolution: expansion, cycle and visibility checks, cross-type
//! propagation and build ordering

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::{debug, info, instrument};

use crate::error::GraphError;
use crate::target::{Target, TargetKey, TargetKind};

use super::Graph;

/// Flags set on a target's dependencies because of what the target is
pub const BUILD_DYNAMIC: &str = "build_dynamic";
pub const GENERATE_PHP: &str = "generate_php";
pub const GENERATE_PYTHON: &str = "generate_python";
pub const GENERATE_JAVA: &str = "generate_java";

/// A push-down rule a consumer applies to its expanded dependencies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Propagation {
    /// Flag set on each matching dependency
    pub flag: &'static str,
    /// Restrict to dependencies of this kind
    pub only: Option<TargetKind>,
}

impl Propagation {
    /// The hook installed by `target`, if any.
    ///
    /// A dynamically linked consumer only installs `build_dynamic`; the
    /// per-kind flavor hooks apply otherwise.
    pub fn for_target(target: &Target) -> Option<Propagation> {
        if target.flag("dynamic_link") {
            return Some(Propagation {
                flag: BUILD_DYNAMIC,
                only: None,
            });
        }

        match target.kind {
            TargetKind::SwigLibrary => Some(Propagation {
                flag: GENERATE_PHP,
                only: Some(TargetKind::ProtoLibrary),
            }),
            TargetKind::PyBinary => Some(Propagation {
                flag: GENERATE_PYTHON,
                only: None,
            }),
            TargetKind::JavaJar => Some(Propagation {
                flag: GENERATE_JAVA,
                only: None,
            }),
            _ => None,
        }
    }

    fn applies_to(&self, dep: &Target) -> bool {
        self.only.map_or(true, |kind| dep.kind == kind)
    }
}

/// Analyze the graph in place.
///
/// Fills `expanded_deps`, `dependents` and `expanded_dependents` for every
/// target, runs the propagation pass over the closed graph and stores the
/// dependency-first build order.
#[instrument(skip_all, fields(targets = graph.len()))]
pub fn analyze(graph: &mut Graph) -> Result<(), GraphError> {
    register_system_libraries(graph)?;

    let expanded = expand_all(graph)?;
    for (key, deps) in expanded {
        if let Some(target) = graph.get_mut(&key) {
            target.expanded_deps = deps;
        }
    }

    link_dependents(graph);
    propagate(graph);

    let sorted = topological_sort(graph)?;
    info!(targets = sorted.len(), "dependency graph analyzed");
    graph.set_sorted(sorted);
    Ok(())
}

/// Unregistered `#:<name>` dependencies refer to the build environment
fn register_system_libraries(graph: &mut Graph) -> Result<(), GraphError> {
    let mut missing: Vec<TargetKey> = Vec::new();
    for target in graph.iter() {
        for dep in &target.deps {
            if dep.is_system() && !graph.contains(dep) && !missing.contains(dep) {
                missing.push(dep.clone());
            }
        }
    }
    for key in missing {
        graph.register(Target::system_library(&key.name))?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    /// On the current expansion path
    Expanding,
    /// Expansion memoized
    Done,
}

#[derive(Debug)]
struct Frame {
    key: TargetKey,
    next: usize,
    /// Concatenation of `[dep] ++ expand(dep)` for each dep walked so far
    acc: Vec<TargetKey>,
}

impl Frame {
    fn new(key: TargetKey) -> Self {
        Self {
            key,
            next: 0,
            acc: Vec::new(),
        }
    }
}

fn expand_all(graph: &Graph) -> Result<HashMap<TargetKey, Vec<TargetKey>>, GraphError> {
    let mut marks: HashMap<TargetKey, Mark> = HashMap::new();
    let mut expanded: HashMap<TargetKey, Vec<TargetKey>> = HashMap::new();

    for key in graph.keys() {
        if !marks.contains_key(key) {
            expand_from(graph, key, &mut marks, &mut expanded)?;
        }
    }

    Ok(expanded)
}

/// Depth-first expansion with an explicit stack
fn expand_from(
    graph: &Graph,
    root: &TargetKey,
    marks: &mut HashMap<TargetKey, Mark>,
    expanded: &mut HashMap<TargetKey, Vec<TargetKey>>,
) -> Result<(), GraphError> {
    let mut stack = vec![Frame::new(root.clone())];
    marks.insert(root.clone(), Mark::Expanding);

    loop {
        let Some(frame) = stack.last_mut() else {
            return Ok(());
        };
        let Some(target) = graph.get(&frame.key) else {
            return Err(GraphError::UnknownTarget(frame.key.clone(), None));
        };

        if let Some(dep) = target.deps.get(frame.next) {
            frame.next += 1;
            match marks.get(dep) {
                Some(Mark::Expanding) => {
                    // Report only the loop, starting at the repeated key
                    let start = stack.iter().position(|f| &f.key == dep).unwrap_or(0);
                    let mut chain: Vec<TargetKey> =
                        stack[start..].iter().map(|f| f.key.clone()).collect();
                    chain.push(dep.clone());
                    return Err(GraphError::Cycle(chain));
                }
                Some(Mark::Done) => {
                    frame.acc.push(dep.clone());
                    if let Some(sub) = expanded.get(dep) {
                        frame.acc.extend(sub.iter().cloned());
                    }
                }
                None => {
                    if !graph.contains(dep) {
                        return Err(GraphError::MissingDependency {
                            target: frame.key.clone(),
                            dependency: dep.clone(),
                            declared_by: graph.find_depender(dep),
                        });
                    }
                    frame.acc.push(dep.clone());
                    marks.insert(dep.clone(), Mark::Expanding);
                    stack.push(Frame::new(dep.clone()));
                }
            }
            continue;
        }

        check_visibility(graph, target)?;

        let Some(frame) = stack.pop() else {
            return Ok(());
        };
        let deps = dedup_keep_last(frame.acc);
        debug!(target = %frame.key, expanded = deps.len(), "expanded");
        if let Some(parent) = stack.last_mut() {
            parent.acc.extend(deps.iter().cloned());
        }
        marks.insert(frame.key.clone(), Mark::Done);
        expanded.insert(frame.key, deps);
    }
}

fn check_visibility(graph: &Graph, target: &Target) -> Result<(), GraphError> {
    let key = target.key();
    for dep in &target.deps {
        if let Some(dep_target) = graph.get(dep) {
            if !dep_target.visibility.allows(&key) {
                return Err(GraphError::Visibility {
                    target: key,
                    dependency: dep.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Keep each key at the index of its last occurrence.
///
/// The result is used verbatim as static link order, so a dependency must
/// come after everything that needs it.
fn dedup_keep_last(seq: Vec<TargetKey>) -> Vec<TargetKey> {
    let mut seen: HashSet<TargetKey> = HashSet::new();
    let mut kept: Vec<TargetKey> = seq
        .into_iter()
        .rev()
        .filter(|k| seen.insert(k.clone()))
        .collect();
    kept.reverse();
    kept
}

fn link_dependents(graph: &mut Graph) {
    let edges: Vec<(TargetKey, Vec<TargetKey>, Vec<TargetKey>)> = graph
        .iter()
        .map(|t| (t.key(), t.deps.clone(), t.expanded_deps.clone()))
        .collect();

    for key in graph.keys().to_vec() {
        if let Some(target) = graph.get_mut(&key) {
            target.dependents.clear();
            target.expanded_dependents.clear();
        }
    }

    for (key, deps, expanded) in edges {
        for dep in deps {
            if let Some(target) = graph.get_mut(&dep) {
                if !target.dependents.contains(&key) {
                    target.dependents.push(key.clone());
                }
            }
        }
        for dep in expanded {
            if let Some(target) = graph.get_mut(&dep) {
                target.expanded_dependents.push(key.clone());
            }
        }
    }
}

/// Second pass over the closed graph: apply every consumer's hooks to its
/// expanded dependencies
fn propagate(graph: &mut Graph) {
    let mut updates: Vec<(TargetKey, &'static str)> = Vec::new();

    for target in graph.iter() {
        if let Some(hook) = Propagation::for_target(target) {
            for dep in &target.expanded_deps {
                if let Some(dep_target) = graph.get(dep) {
                    if hook.applies_to(dep_target) {
                        updates.push((dep.clone(), hook.flag));
                    }
                }
            }
        }
    }

    if !updates.is_empty() {
        debug!(updates = updates.len(), "propagating flags");
    }
    for (key, flag) in updates {
        if let Some(target) = graph.get_mut(&key) {
            target.set_flag(flag);
        }
    }
}

/// Kahn's algorithm over the expanded edges: a target is released once every
/// member of its `expanded_deps` has been emitted
fn topological_sort(graph: &Graph) -> Result<Vec<TargetKey>, GraphError> {
    let mut pending: HashMap<TargetKey, usize> = HashMap::new();
    let mut queue: VecDeque<TargetKey> = VecDeque::new();
    let mut sorted: Vec<TargetKey> = Vec::with_capacity(graph.len());

    for target in graph.iter() {
        let count = target.expanded_deps.len();
        pending.insert(target.key(), count);
        if count == 0 {
            queue.push_back(target.key());
        }
    }

    while let Some(key) = queue.pop_front() {
        if let Some(target) = graph.get(&key) {
            for dependent in &target.expanded_dependents {
                if let Some(count) = pending.get_mut(dependent) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        queue.push_back(dependent.clone());
                    }
                }
            }
        }
        sorted.push(key);
    }

    if sorted.len() != graph.len() {
        let emitted: HashSet<&TargetKey> = sorted.iter().collect();
        let stuck: Vec<TargetKey> = graph
            .keys()
            .iter()
            .filter(|k| !emitted.contains(k))
            .cloned()
            .collect();
        return Err(GraphError::Cycle(stuck));
    }

    Ok(sorted)
}
