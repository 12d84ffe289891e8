//! Incremental fragment cache
//!
//! Every target's generated code lives in its own file whose first line is
//! `#Fingerprint=<digest>`. A file whose stored fingerprint matches is left
//! untouched; the aggregate script only `include`s fragments.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};
use trellis_core::{Graph, GraphError, Target, TargetKey};

use crate::generator::{escape_path, RuleGenerator};

/// First-line marker of a fragment file
pub const FINGERPRINT_PREFIX: &str = "#Fingerprint=";

/// Directory under the build directory holding fragment files
pub const FRAGMENT_DIR: &str = ".fragments";

/// File name of the aggregate script
pub const SCRIPT_NAME: &str = "build.ninja";

/// Fragment cache errors
#[derive(Debug, thiserror::Error)]
pub enum FragmentError {
    #[error("Failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Target {0} has no fingerprint")]
    MissingFingerprint(TargetKey),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// What the invocation is doing with the fragments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Build,
    /// Only the declared outputs are needed; nothing is written
    Clean,
}

/// Per-target result of an update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentStatus {
    /// Stored fingerprint matched; file untouched
    Fresh,
    /// Generated and written
    Regenerated,
    /// Generated for its clean list only
    Inspected,
}

/// Counts from a full pass
#[derive(Debug, Clone, Default)]
pub struct FragmentReport {
    pub fresh: usize,
    pub regenerated: usize,
    /// Declared outputs, collected for `clean`
    pub clean_list: Vec<PathBuf>,
}

/// Per-target fragment files under `<build_dir>/.fragments`
#[derive(Debug, Clone)]
pub struct FragmentCache {
    dir: PathBuf,
}

impl FragmentCache {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Cache rooted in a build directory
    pub fn in_build_dir(build_dir: &Path) -> Self {
        Self::new(build_dir.join(FRAGMENT_DIR))
    }

    /// Fragment file of a target
    pub fn fragment_path(&self, key: &TargetKey) -> PathBuf {
        self.dir.join(&key.dir).join(format!("{}.ninja", key.name))
    }

    /// Fingerprint stored in a fragment file, reading only its first line
    pub fn stored_fingerprint(path: &Path) -> Option<String> {
        let file = File::open(path).ok()?;
        let mut first = String::new();
        BufReader::new(file).read_line(&mut first).ok()?;
        first
            .trim_end_matches(['\n', '\r'])
            .strip_prefix(FINGERPRINT_PREFIX)
            .map(str::to_string)
    }

    /// Bring one target's fragment up to date
    pub fn update(
        &self,
        target: &Target,
        graph: &Graph,
        generator: &dyn RuleGenerator,
        operation: Operation,
        clean_list: &mut Vec<PathBuf>,
    ) -> Result<FragmentStatus, FragmentError> {
        let key = target.key();
        let fingerprint = target
            .fingerprint
            .as_deref()
            .ok_or_else(|| FragmentError::MissingFingerprint(key.clone()))?;

        if operation == Operation::Clean {
            clean_list.extend(generator.clean_list(target, graph));
            return Ok(FragmentStatus::Inspected);
        }

        let path = self.fragment_path(&key);
        if Self::stored_fingerprint(&path).as_deref() == Some(fingerprint) {
            debug!(target = %key, "fragment is fresh");
            return Ok(FragmentStatus::Fresh);
        }

        let rules = generator.generate(target, graph);
        let mut content = String::with_capacity(rules.code.len() + 80);
        content.push_str(FINGERPRINT_PREFIX);
        content.push_str(fingerprint);
        content.push('\n');
        content.push_str(&rules.code);

        write_file(&path, &content)?;
        debug!(target = %key, "fragment regenerated");
        Ok(FragmentStatus::Regenerated)
    }

    /// Update every target in build order
    #[instrument(skip_all, fields(targets = graph.len(), ?operation))]
    pub fn update_all(
        &self,
        graph: &Graph,
        generator: &dyn RuleGenerator,
        operation: Operation,
    ) -> Result<FragmentReport, FragmentError> {
        let mut report = FragmentReport::default();

        for key in graph.sorted()? {
            let Some(target) = graph.get(key) else {
                continue;
            };
            match self.update(target, graph, generator, operation, &mut report.clean_list)? {
                FragmentStatus::Fresh => report.fresh += 1,
                FragmentStatus::Regenerated => report.regenerated += 1,
                FragmentStatus::Inspected => {}
            }
        }

        info!(
            fresh = report.fresh,
            regenerated = report.regenerated,
            "fragments updated"
        );
        Ok(report)
    }
}

/// Which targets the aggregate script pulls in
#[derive(Debug, Clone, Default)]
pub struct Assembly {
    /// Targets named exactly on the command line
    pub direct: HashSet<TargetKey>,
    pub include_tests: bool,
    pub include_packages: bool,
}

impl Assembly {
    /// Whether a target's fragment is included
    pub fn includes(&self, target: &Target) -> bool {
        if target.kind.is_system() {
            return false;
        }
        if target.kind.is_test() {
            return self.include_tests || self.direct.contains(&target.key());
        }
        if target.kind.is_package() {
            return self.include_packages || self.direct.contains(&target.key());
        }
        true
    }

    /// Write the aggregate script; returns its path
    #[instrument(skip_all, fields(path = %script.display()))]
    pub fn write_script(
        &self,
        graph: &Graph,
        cache: &FragmentCache,
        generator: &dyn RuleGenerator,
        script: &Path,
    ) -> Result<usize, FragmentError> {
        let mut content = generator.header();
        let mut included = 0usize;

        for key in graph.sorted()? {
            let Some(target) = graph.get(key) else {
                continue;
            };
            if !self.includes(target) {
                continue;
            }
            content.push_str("include ");
            content.push_str(&escape_path(&cache.fragment_path(key)));
            content.push('\n');
            included += 1;
        }

        write_file(script, &content)?;
        info!(included, "build script assembled");
        Ok(included)
    }
}

fn write_file(path: &Path, content: &str) -> Result<(), FragmentError> {
    let wrap = |source| FragmentError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(wrap)?;
    }
    fs::write(path, content).map_err(wrap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::compute_fingerprints;
    use crate::generator::{GeneratedRules, NinjaRuleGenerator};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use trellis_core::{analyze, TargetKind};

    fn key(s: &str) -> TargetKey {
        TargetKey::parse(s).unwrap()
    }

    fn analyzed(src: &str) -> Graph {
        let mut graph = Graph::from_targets(vec![
            Target::new("lib", "str", TargetKind::CcLibrary).with_srcs([src]),
            Target::new("app", "main", TargetKind::CcBinary).with_dep(key("lib:str")),
            Target::new("app", "main_test", TargetKind::CcTest).with_dep(key("app:main")),
            Target::new("pkg", "tarball", TargetKind::Package).with_dep(key("app:main")),
            Target::new("app", "uses_sys", TargetKind::CcBinary).with_dep(key("#:pthread")),
        ])
        .unwrap();
        analyze(&mut graph).unwrap();
        compute_fingerprints(&mut graph, "cfg").unwrap();
        graph
    }

    /// Counts calls to `generate`
    struct CountingGenerator {
        inner: NinjaRuleGenerator,
        calls: AtomicUsize,
    }

    impl CountingGenerator {
        fn new() -> Self {
            Self {
                inner: NinjaRuleGenerator::new("/ws/build", "release"),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl RuleGenerator for CountingGenerator {
        fn header(&self) -> String {
            "# header\n".to_string()
        }

        fn config_digest(&self) -> String {
            self.inner.config_digest()
        }

        fn generate(&self, target: &Target, graph: &Graph) -> GeneratedRules {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.generate(target, graph)
        }
    }

    #[test]
    fn test_first_line_layout() {
        let temp = TempDir::new().unwrap();
        let cache = FragmentCache::new(temp.path().to_path_buf());
        let graph = analyzed("str.cc");
        let generator = CountingGenerator::new();

        cache.update_all(&graph, &generator, Operation::Build).unwrap();

        let target = graph.get(&key("lib:str")).unwrap();
        let path = cache.fragment_path(&key("lib:str"));
        let content = fs::read_to_string(&path).unwrap();
        let expected_first = format!("#Fingerprint={}", target.fingerprint.as_ref().unwrap());
        assert_eq!(content.lines().next().unwrap(), expected_first);
        assert!(content.contains("build /ws/build/lib/str: stamp lib/str.cc"));
    }

    #[test]
    fn test_cache_hit_leaves_bytes_unchanged() {
        let temp = TempDir::new().unwrap();
        let cache = FragmentCache::new(temp.path().to_path_buf());
        let graph = analyzed("str.cc");
        let generator = CountingGenerator::new();

        let first = cache.update_all(&graph, &generator, Operation::Build).unwrap();
        assert_eq!(first.regenerated, graph.len());

        // Append a marker after the fingerprint line; a hit must not rewrite
        let path = cache.fragment_path(&key("app:main"));
        let mut content = fs::read_to_string(&path).unwrap();
        content.push_str("# marker\n");
        fs::write(&path, &content).unwrap();

        let calls_before = generator.calls();
        let second = cache.update_all(&graph, &generator, Operation::Build).unwrap();
        assert_eq!(second.fresh, graph.len());
        assert_eq!(second.regenerated, 0);
        assert_eq!(generator.calls(), calls_before);
        assert_eq!(fs::read_to_string(&path).unwrap(), content);
    }

    #[test]
    fn test_mismatch_regenerates_dependents() {
        let temp = TempDir::new().unwrap();
        let cache = FragmentCache::new(temp.path().to_path_buf());
        let generator = CountingGenerator::new();

        cache
            .update_all(&analyzed("str.cc"), &generator, Operation::Build)
            .unwrap();
        let report = cache
            .update_all(&analyzed("string.cc"), &generator, Operation::Build)
            .unwrap();

        // lib:str and everything above it; the system library stays fresh
        assert_eq!(report.regenerated, 4);
        assert_eq!(report.fresh, 2);
    }

    #[test]
    fn test_clean_invokes_generator_without_writing() {
        let temp = TempDir::new().unwrap();
        let cache = FragmentCache::new(temp.path().to_path_buf());
        let graph = analyzed("str.cc");
        let generator = CountingGenerator::new();

        cache.update_all(&graph, &generator, Operation::Build).unwrap();
        let path = cache.fragment_path(&key("lib:str"));
        let before = fs::read_to_string(&path).unwrap();
        let calls_before = generator.calls();

        let report = cache.update_all(&graph, &generator, Operation::Clean).unwrap();
        assert_eq!(generator.calls(), calls_before + graph.len());
        assert!(report
            .clean_list
            .contains(&PathBuf::from("/ws/build/lib/str")));
        assert_eq!(fs::read_to_string(&path).unwrap(), before);
    }

    #[test]
    fn test_stored_fingerprint() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("x.ninja");
        assert_eq!(FragmentCache::stored_fingerprint(&path), None);

        fs::write(&path, "#Fingerprint=abc\nbuild x: stamp\n").unwrap();
        assert_eq!(FragmentCache::stored_fingerprint(&path), Some("abc".to_string()));

        fs::write(&path, "build x: stamp\n").unwrap();
        assert_eq!(FragmentCache::stored_fingerprint(&path), None);
    }

    #[test]
    fn test_assembly_filters_tests_and_packages() {
        let temp = TempDir::new().unwrap();
        let cache = FragmentCache::new(temp.path().join("fragments"));
        let graph = analyzed("str.cc");
        let generator = CountingGenerator::new();
        let script = temp.path().join("build.ninja");

        let assembly = Assembly::default();
        let included = assembly
            .write_script(&graph, &cache, &generator, &script)
            .unwrap();
        assert_eq!(included, 3);

        let content = fs::read_to_string(&script).unwrap();
        assert!(content.starts_with("# header\n"));
        let lib = content.find("lib/str.ninja").unwrap();
        let app = content.find("app/main.ninja").unwrap();
        assert!(lib < app);
        assert!(!content.contains("main_test"));
        assert!(!content.contains("tarball"));
        assert!(!content.contains("pthread"));

        let assembly = Assembly {
            direct: [key("app:main_test")].into_iter().collect(),
            include_packages: true,
            ..Default::default()
        };
        assert_eq!(
            assembly
                .write_script(&graph, &cache, &generator, &script)
                .unwrap(),
            5
        );
    }
}
