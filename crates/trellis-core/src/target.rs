//! Target types: the nodes of the build graph

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Directory reserved for environment/system pseudo-targets
pub const SYSTEM_DIR: &str = "#";

/// Unique identifier for a target: the directory it is declared in plus its name
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TargetKey {
    /// Directory relative to the workspace root (`#` for system targets)
    pub dir: String,
    /// Target name
    pub name: String,
}

impl TargetKey {
    /// Create a new target key
    pub fn new(dir: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            name: name.into(),
        }
    }

    /// Parse a key from "dir:name" format, with an optional leading `//`
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.strip_prefix("//").unwrap_or(s);
        let (dir, name) = s.rsplit_once(':')?;
        if name.is_empty() {
            return None;
        }
        Some(Self::new(dir.trim_end_matches('/'), name))
    }

    /// Whether this is an environment/system pseudo-target
    pub fn is_system(&self) -> bool {
        self.dir == SYSTEM_DIR
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dir, self.name)
    }
}

impl FromStr for TargetKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("expected 'dir:name', got '{}'", s))
    }
}

impl TryFrom<String> for TargetKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TargetKey> for String {
    fn from(key: TargetKey) -> Self {
        key.to_string()
    }
}

/// Target type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    CcLibrary,
    CcBinary,
    CcTest,
    ProtoLibrary,
    SwigLibrary,
    PyLibrary,
    PyBinary,
    PyTest,
    JavaLibrary,
    JavaJar,
    JavaTest,
    GenRule,
    ShTest,
    Package,
    SystemLibrary,
}

impl TargetKind {
    /// Tests are only generated and run when requested
    pub fn is_test(&self) -> bool {
        matches!(
            self,
            Self::CcTest | Self::PyTest | Self::JavaTest | Self::ShTest
        )
    }

    /// Packages are only generated when requested
    pub fn is_package(&self) -> bool {
        matches!(self, Self::Package)
    }

    /// System libraries take part in analysis but emit no build code
    pub fn is_system(&self) -> bool {
        matches!(self, Self::SystemLibrary)
    }

    /// Name as written in target descriptions
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CcLibrary => "cc_library",
            Self::CcBinary => "cc_binary",
            Self::CcTest => "cc_test",
            Self::ProtoLibrary => "proto_library",
            Self::SwigLibrary => "swig_library",
            Self::PyLibrary => "py_library",
            Self::PyBinary => "py_binary",
            Self::PyTest => "py_test",
            Self::JavaLibrary => "java_library",
            Self::JavaJar => "java_jar",
            Self::JavaTest => "java_test",
            Self::GenRule => "gen_rule",
            Self::ShTest => "sh_test",
            Self::Package => "package",
            Self::SystemLibrary => "system_library",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who may depend on a target
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Anyone
    #[default]
    Public,
    /// Only the listed targets
    Only(BTreeSet<TargetKey>),
}

impl Visibility {
    /// Whether `key` is allowed to depend on a target with this visibility
    pub fn allows(&self, key: &TargetKey) -> bool {
        match self {
            Self::Public => true,
            Self::Only(allowed) => allowed.contains(key),
        }
    }
}

/// A value in the opaque attribute bag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<String>),
}

impl AttrValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::List(l) => Some(l),
            _ => None,
        }
    }

    /// Stable textual form used when hashing
    pub fn canonical(&self) -> String {
        match self {
            Self::Bool(b) => format!("b:{}", b),
            Self::Int(i) => format!("i:{}", i),
            Self::Str(s) => format!("s:{}", s),
            Self::List(l) => format!("l:{}", l.join("\u{1f}")),
        }
    }
}

/// Test-only options carried by test kinds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestSpec {
    /// Arguments passed to the test binary
    pub args: Vec<String>,
    /// Data files (relative to the target directory) the test reads
    pub testdata: Vec<String>,
    /// Must not run concurrently with any other test
    pub exclusive: bool,
    /// Run on every invocation regardless of history
    pub always_run: bool,
    /// Per-test timeout; falls back to the configured default
    pub timeout_secs: Option<u64>,
    /// Extra environment variables for this test
    pub env: BTreeMap<String, String>,
}

/// A build graph node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    /// Declaring directory
    pub dir: String,
    /// Target name
    pub name: String,
    /// Target type
    #[serde(rename = "type")]
    pub kind: TargetKind,
    /// Source identifiers, in declaration order
    #[serde(default)]
    pub srcs: Vec<String>,
    /// Direct dependencies, as declared (duplicates allowed)
    #[serde(default)]
    pub deps: Vec<TargetKey>,
    /// Transitive closure of `deps`, filled by the resolver
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expanded_deps: Vec<TargetKey>,
    /// Direct reverse edges
    #[serde(skip)]
    pub dependents: Vec<TargetKey>,
    /// Transitive reverse edges
    #[serde(skip)]
    pub expanded_dependents: Vec<TargetKey>,
    #[serde(default)]
    pub visibility: Visibility,
    /// Type-specific attributes plus flags set by the resolver
    #[serde(default)]
    pub attr: BTreeMap<String, AttrValue>,
    /// Present on test kinds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<TestSpec>,
    /// Digest of everything that affects this target's generated code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

impl Target {
    /// Create a target with no sources or dependencies
    pub fn new(dir: impl Into<String>, name: impl Into<String>, kind: TargetKind) -> Self {
        let test = kind.is_test().then(TestSpec::default);
        Self {
            dir: dir.into(),
            name: name.into(),
            kind,
            srcs: Vec::new(),
            deps: Vec::new(),
            expanded_deps: Vec::new(),
            dependents: Vec::new(),
            expanded_dependents: Vec::new(),
            visibility: Visibility::Public,
            attr: BTreeMap::new(),
            test,
            fingerprint: None,
        }
    }

    /// Public system library pseudo-target `#:<name>`
    pub fn system_library(name: impl Into<String>) -> Self {
        Self::new(SYSTEM_DIR, name, TargetKind::SystemLibrary)
    }

    pub fn key(&self) -> TargetKey {
        TargetKey::new(&self.dir, &self.name)
    }

    /// Add a declared dependency
    pub fn with_dep(mut self, dep: TargetKey) -> Self {
        self.deps.push(dep);
        self
    }

    /// Add declared dependencies
    pub fn with_deps<I: IntoIterator<Item = TargetKey>>(mut self, deps: I) -> Self {
        self.deps.extend(deps);
        self
    }

    pub fn with_srcs<I, S>(mut self, srcs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.srcs.extend(srcs.into_iter().map(Into::into));
        self
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: AttrValue) -> Self {
        self.attr.insert(name.into(), value);
        self
    }

    pub fn with_test(mut self, spec: TestSpec) -> Self {
        self.test = Some(spec);
        self
    }

    /// Read a boolean flag from the attribute bag (absent = false)
    pub fn flag(&self, name: &str) -> bool {
        self.attr
            .get(name)
            .and_then(AttrValue::as_bool)
            .unwrap_or(false)
    }

    /// Set a boolean flag in the attribute bag
    pub fn set_flag(&mut self, name: &str) {
        self.attr.insert(name.to_string(), AttrValue::Bool(true));
    }
}
