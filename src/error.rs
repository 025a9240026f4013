//! Error taxonomy for parsing, spec algebra, configuration and solving.

use std::fmt;
use std::path::PathBuf;

/// A version string that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid version `{input}`: {reason}")]
pub struct InvalidVersionFormat {
    pub input: String,
    pub reason: String,
}

impl InvalidVersionFormat {
    pub(crate) fn new(input: &str, reason: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

/// A spec string that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid spec `{input}` at offset {offset}: {message}")]
pub struct SpecSyntaxError {
    pub input: String,
    pub offset: usize,
    pub message: String,
}

/// The attribute of a spec on which two constraints disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstraintKind {
    Name,
    Version,
    Compiler,
    Variant,
    Hash,
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConstraintKind::Name => "name",
            ConstraintKind::Version => "version",
            ConstraintKind::Compiler => "compiler",
            ConstraintKind::Variant => "variant",
            ConstraintKind::Hash => "hash",
        };
        f.write_str(s)
    }
}

/// No assignment exists that satisfies every constraint.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnsatisfiableSpecError {
    /// Intersecting two specs produced an empty attribute.
    #[error("`{spec}` cannot satisfy {kind} constraint `{constraint}`")]
    Constraint {
        spec: String,
        constraint: String,
        kind: ConstraintKind,
    },
    /// A version range matches none of the versions a package declares.
    #[error("no declared version of {package} satisfies @{constraint} (declared: {declared})")]
    NoMatchingVersion {
        package: String,
        constraint: String,
        declared: String,
    },
    /// A concretized node matches a declared conflict.
    #[error("{spec} conflicts with `{pattern}`{}", fmt_message(.message))]
    Conflict {
        spec: String,
        pattern: String,
        message: Option<String>,
    },
    /// A `^dep` constraint on a root names a package its DAG does not contain.
    #[error("{root} does not depend on {dependency}")]
    NotADependency { root: String, dependency: String },
    /// The solver exhausted every alternative.
    #[error("cannot concretize {specs}:\n{explanation}")]
    Unsolvable { specs: String, explanation: String },
}

fn fmt_message(message: &Option<String>) -> String {
    match message {
        Some(m) => format!(": {m}"),
        None => String::new(),
    }
}

/// A mutating operation was invoked on a concrete spec.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot modify concrete spec {spec}")]
pub struct SpecConcretizedError {
    pub spec: String,
}

/// Errors produced by [`Spec`](crate::Spec) mutation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpecError {
    #[error(transparent)]
    Unsatisfiable(#[from] UnsatisfiableSpecError),
    #[error(transparent)]
    Concretized(#[from] SpecConcretizedError),
}

/// The concrete graph contains a cycle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("dependency cycle detected: {}", .cycle.join(" -> "))]
pub struct DependencyCycleError {
    pub cycle: Vec<String>,
}

/// A DAG document that could not be read.
#[derive(Debug, thiserror::Error)]
pub enum DagDocumentError {
    #[error("failed to read `{}`", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed DAG document")]
    Json(#[from] serde_json::Error),
    #[error("unsupported DAG document version {0}")]
    UnsupportedVersion(u32),
    #[error(transparent)]
    InvalidVersion(#[from] InvalidVersionFormat),
    #[error("node {node} refers to missing dependency /{hash}")]
    MissingDependency { node: String, hash: String },
    #[error(transparent)]
    Cycle(#[from] DependencyCycleError),
}

/// Errors raised while loading or validating configuration scopes.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file `{}`", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config scope `{scope}`")]
    Toml {
        scope: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid spec `{value}` in {location}")]
    InvalidSpec {
        location: String,
        value: String,
        #[source]
        source: SpecSyntaxError,
    },
    #[error("invalid compiler `{value}`: a concrete version is required (e.g. gcc@12.2.0)")]
    InvalidCompiler { value: String },
    #[error("requirement on {package} names version @{version}, which {package} does not declare")]
    UndefinedVersion { package: String, version: String },
    #[error("requirement `{requirement}` on {package} constrains dependencies, which is not supported")]
    DependencyInRequirement {
        package: String,
        requirement: String,
    },
    #[error("invalid unify mode `{0}`, expected true, false or \"when_possible\"")]
    InvalidUnify(String),
    #[error("external `{value}` of {package} {reason}")]
    InvalidExternal {
        package: String,
        value: String,
        reason: &'static str,
    },
}

/// Errors raised while loading or validating package recipes.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("failed to read repository `{}`", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse repository")]
    Toml(#[from] toml::de::Error),
    #[error("invalid spec `{value}` in package {package}")]
    InvalidSpec {
        package: String,
        value: String,
        #[source]
        source: SpecSyntaxError,
    },
    #[error("invalid version in package {package}")]
    InvalidVersion {
        package: String,
        #[source]
        source: InvalidVersionFormat,
    },
    #[error("package {0} is defined twice")]
    DuplicatePackage(String),
    #[error("package {0} declares no versions")]
    NoVersions(String),
    #[error("{context} in package {package} refers to unknown variant `{variant}`")]
    UnknownVariant {
        package: String,
        variant: String,
        context: String,
    },
    #[error("variant `{variant}` of {package} has invalid default `{value}`")]
    InvalidDefault {
        package: String,
        variant: String,
        value: String,
    },
    #[error("condition `{when}` in package {package} has more than one dependency term")]
    CompoundCondition { package: String, when: String },
    #[error("unknown build system `{value}` in package {package}")]
    UnknownBuildSystem { package: String, value: String },
    #[error("`{0}` is both a package and a virtual provided by other packages")]
    VirtualShadowsPackage(String),
}

/// Top-level error returned by the solve entry points.
#[derive(Debug, thiserror::Error)]
pub enum ConcretizeError {
    #[error(transparent)]
    InvalidVersion(#[from] InvalidVersionFormat),
    #[error(transparent)]
    Syntax(#[from] SpecSyntaxError),
    #[error(transparent)]
    Unsatisfiable(#[from] UnsatisfiableSpecError),
    #[error(transparent)]
    Concretized(#[from] SpecConcretizedError),
    #[error(transparent)]
    Cycle(#[from] DependencyCycleError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Document(#[from] DagDocumentError),
    #[error("unknown package `{0}`")]
    UnknownPackage(String),
    #[error("package {package} depends on unknown package `{dependency}`")]
    UnknownDependency { package: String, dependency: String },
    #[error("package {package} has no variant `{variant}`")]
    UnknownVariant { package: String, variant: String },
    #[error("invalid value `{value}` for variant `{variant}` of {package}")]
    InvalidVariantValue {
        package: String,
        variant: String,
        value: String,
    },
    #[error("no installed spec matches /{0}")]
    UnknownHash(String),
}

impl From<SpecError> for ConcretizeError {
    fn from(err: SpecError) -> Self {
        match err {
            SpecError::Unsatisfiable(e) => ConcretizeError::Unsatisfiable(e),
            SpecError::Concretized(e) => ConcretizeError::Concretized(e),
        }
    }
}

impl ConcretizeError {
    /// Whether the error means "no solution" rather than bad input.
    pub fn is_unsatisfiable(&self) -> bool {
        matches!(
            self,
            ConcretizeError::Unsatisfiable(_) | ConcretizeError::Cycle(_)
        )
    }
}
