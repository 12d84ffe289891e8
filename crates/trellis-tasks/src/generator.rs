//! Rule generators: turn a target into backend build statements

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use trellis_core::graph::resolver::{BUILD_DYNAMIC, GENERATE_JAVA, GENERATE_PHP, GENERATE_PYTHON};
use trellis_core::{Graph, LoadedConfig, Target, TargetKey, TargetKind};

use crate::fingerprint::digest_bytes;

/// Code emitted for one target
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneratedRules {
    /// Fragment text; empty when the target emits nothing
    pub code: String,
    /// Files the code declares as outputs
    pub outputs: Vec<PathBuf>,
}

/// Per-type code generation hook.
///
/// Implementations must be deterministic: equal fingerprints must yield
/// byte-identical code.
pub trait RuleGenerator: Send + Sync {
    /// Global definitions written once at the top of the aggregate script
    fn header(&self) -> String;

    /// Digest of the configuration that influences generated code
    fn config_digest(&self) -> String;

    /// Generate the fragment for `target`
    fn generate(&self, target: &Target, graph: &Graph) -> GeneratedRules;

    /// Output files removed by `clean`
    fn clean_list(&self, target: &Target, graph: &Graph) -> Vec<PathBuf> {
        self.generate(target, graph).outputs
    }
}

/// Location of a target's primary output, and of test binaries
pub fn output_path(build_dir: &Path, key: &TargetKey) -> PathBuf {
    build_dir.join(&key.dir).join(&key.name)
}

/// Built-in generator emitting ninja statements.
///
/// Targets carrying a `cmd` attribute run it; everything else produces a
/// stamp file named after the target.
#[derive(Debug, Clone)]
pub struct NinjaRuleGenerator {
    build_dir: PathBuf,
    profile: String,
}

impl NinjaRuleGenerator {
    pub fn new(build_dir: impl Into<PathBuf>, profile: impl Into<String>) -> Self {
        Self {
            build_dir: build_dir.into(),
            profile: profile.into(),
        }
    }

    pub fn from_config(loaded: &LoadedConfig) -> Self {
        Self::new(loaded.build_dir(), loaded.config.build.profile.clone())
    }

    /// Declared outputs of a target
    pub fn outputs_of(&self, target: &Target) -> Vec<PathBuf> {
        if target.kind.is_system() {
            return Vec::new();
        }
        let dir = self.build_dir.join(&target.dir);
        match target.attr.get("outs").and_then(|v| v.as_list()) {
            Some(outs) if target.kind == TargetKind::GenRule && !outs.is_empty() => {
                outs.iter().map(|o| dir.join(o)).collect()
            }
            _ => vec![output_path(&self.build_dir, &target.key())],
        }
    }
}

impl RuleGenerator for NinjaRuleGenerator {
    fn header(&self) -> String {
        let mut out = String::new();
        out.push_str("# Generated by trellis, do not edit\n");
        out.push_str("ninja_required_version = 1.5\n");
        let _ = writeln!(out, "builddir = {}", escape_path(&self.build_dir));
        let _ = writeln!(out, "profile = {}", self.profile);
        out.push('\n');
        out.push_str("rule stamp\n  command = touch $out\n  description = $desc\n\n");
        out.push_str("rule custom\n  command = $cmd\n  description = $desc\n\n");
        out
    }

    fn config_digest(&self) -> String {
        digest_bytes(format!("ninja\0{}\0{}", self.build_dir.display(), self.profile).as_bytes())
    }

    fn generate(&self, target: &Target, graph: &Graph) -> GeneratedRules {
        let outputs = self.outputs_of(target);
        if outputs.is_empty() {
            return GeneratedRules::default();
        }

        let cmd = target.attr.get("cmd").and_then(|v| v.as_str());
        let rule = if cmd.is_some() { "custom" } else { "stamp" };

        let inputs: Vec<String> = target
            .srcs
            .iter()
            .map(|src| escape_path(&Path::new(&target.dir).join(src)))
            .collect();
        let implicit: Vec<String> = target
            .deps
            .iter()
            .filter_map(|dep| graph.get(dep))
            .flat_map(|dep| self.outputs_of(dep))
            .map(|p| escape_path(&p))
            .collect();

        let mut code = String::new();
        let outs: Vec<String> = outputs.iter().map(|p| escape_path(p)).collect();
        let _ = write!(code, "build {}: {}", outs.join(" "), rule);
        for input in &inputs {
            let _ = write!(code, " {}", input);
        }
        if !implicit.is_empty() {
            let _ = write!(code, " | {}", implicit.join(" "));
        }
        code.push('\n');
        let _ = writeln!(code, "  desc = {} //{}", target.kind, target.key());
        if let Some(cmd) = cmd {
            let _ = writeln!(code, "  cmd = {}", cmd.replace('\n', " "));
        }

        let flags: Vec<&str> = [BUILD_DYNAMIC, GENERATE_PHP, GENERATE_PYTHON, GENERATE_JAVA]
            .into_iter()
            .filter(|flag| target.flag(flag))
            .collect();
        if !flags.is_empty() {
            let _ = writeln!(code, "  flags = {}", flags.join(" "));
        }

        GeneratedRules { code, outputs }
    }
}

/// Escape a path for use in a ninja build line
pub fn escape_path(path: &Path) -> String {
    let s = path.to_string_lossy();
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '$' => out.push_str("$$"),
            ' ' => out.push_str("$ "),
            ':' => out.push_str("$:"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::{analyze, AttrValue};

    fn key(s: &str) -> TargetKey {
        TargetKey::parse(s).unwrap()
    }

    fn generator() -> NinjaRuleGenerator {
        NinjaRuleGenerator::new("/ws/build", "release")
    }

    #[test]
    fn test_stamp_statement() {
        let mut graph = Graph::from_targets(vec![
            Target::new("lib", "str", TargetKind::CcLibrary).with_srcs(["str.cc"]),
            Target::new("app", "main", TargetKind::CcBinary)
                .with_srcs(["main.cc"])
                .with_dep(key("lib:str"))
                .with_attr("dynamic_link", AttrValue::Bool(true)),
        ])
        .unwrap();
        analyze(&mut graph).unwrap();

        let app = graph.get(&key("app:main")).unwrap();
        let rules = generator().generate(app, &graph);
        assert_eq!(
            rules.code,
            "build /ws/build/app/main: stamp app/main.cc | /ws/build/lib/str\n  desc = cc_binary //app:main\n"
        );
        assert_eq!(rules.outputs, vec![PathBuf::from("/ws/build/app/main")]);

        let lib = graph.get(&key("lib:str")).unwrap();
        let rules = generator().generate(lib, &graph);
        assert!(rules.code.contains("  flags = build_dynamic\n"));
    }

    #[test]
    fn test_gen_rule_outputs() {
        let target = Target::new("proto", "gen", TargetKind::GenRule)
            .with_attr("cmd", AttrValue::Str("protoc $in -o $out".into()))
            .with_attr("outs", AttrValue::List(vec!["a.pb.h".into(), "a.pb.cc".into()]));
        let graph = Graph::from_targets(vec![target.clone()]).unwrap();

        let rules = generator().generate(&target, &graph);
        assert!(rules.code.starts_with("build /ws/build/proto/a.pb.h /ws/build/proto/a.pb.cc: custom"));
        assert!(rules.code.contains("  cmd = protoc $in -o $out\n"));
        assert_eq!(generator().clean_list(&target, &graph).len(), 2);
    }

    #[test]
    fn test_system_library_emits_nothing() {
        let sys = Target::system_library("pthread");
        let graph = Graph::from_targets(vec![sys.clone()]).unwrap();
        assert_eq!(generator().generate(&sys, &graph), GeneratedRules::default());
    }

    #[test]
    fn test_config_digest_tracks_profile() {
        let release = NinjaRuleGenerator::new("/ws/build", "release");
        let debug = NinjaRuleGenerator::new("/ws/build", "debug");
        assert_ne!(release.config_digest(), debug.config_digest());
        assert_eq!(release.config_digest(), generator().config_digest());
    }

    #[test]
    fn test_escape_path() {
        assert_eq!(escape_path(Path::new("a b/c:d$e")), "a$ b/c$:d$$e");
    }

    #[test]
    fn test_output_path() {
        assert_eq!(
            output_path(Path::new("/ws/build"), &key("app/x:t")),
            PathBuf::from("/ws/build/app/x/t")
        );
    }
}
