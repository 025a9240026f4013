//! The spec node model: a possibly partial description of one package
//! configuration, plus flat `^dependency` constraints.
//!
//! Abstract specs come from user input and recipe declarations and are
//! narrowed with [`Spec::constrain`]. Concrete specs are produced by the solver
//! and live as nodes of a [`ConcreteDag`](crate::ConcreteDag); their edges are
//! owned by the DAG, not by the node, so a concrete spec's
//! [`dependencies`](Spec::dependencies) list is always empty.

use std::fmt::{self, Write as _};
use std::path::{Path, PathBuf};

use crate::compiler::CompilerSpec;
use crate::error::{ConstraintKind, SpecConcretizedError, SpecError, UnsatisfiableSpecError};
use crate::variant::{VariantMap, VariantValue};
use crate::version::{Version, VersionList};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Spec {
    name: Option<String>,
    versions: VersionList,
    compiler: Option<CompilerSpec>,
    variants: VariantMap,
    dependencies: Vec<Spec>,
    abstract_hash: Option<String>,
    dag_hash: Option<String>,
    /// Prefix of an external node, which is used in place and never built.
    external: Option<PathBuf>,
    concrete: bool,
}

impl Spec {
    /// An unconstrained spec for `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// An unconstrained spec without a name, as used in `when` conditions.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// A concrete node: every attribute holds a single value.
    pub(crate) fn concrete_node(
        name: &str,
        version: Version,
        compiler: Option<CompilerSpec>,
        variants: VariantMap,
    ) -> Self {
        Self {
            name: Some(name.to_string()),
            versions: VersionList::exact(version),
            compiler,
            variants,
            dependencies: Vec::new(),
            abstract_hash: None,
            dag_hash: None,
            external: None,
            concrete: true,
        }
    }

    pub fn with_versions(mut self, versions: VersionList) -> Self {
        self.versions = versions;
        self
    }

    pub fn with_compiler(mut self, compiler: CompilerSpec) -> Self {
        self.compiler = Some(compiler);
        self
    }

    pub fn with_variant(mut self, value: VariantValue) -> Self {
        self.variants.insert(value);
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn versions(&self) -> &VersionList {
        &self.versions
    }

    /// The resolved version of a concrete or exactly-pinned spec.
    pub fn version(&self) -> Option<&Version> {
        self.versions.concrete()
    }

    pub fn compiler(&self) -> Option<&CompilerSpec> {
        self.compiler.as_ref()
    }

    pub fn variants(&self) -> &VariantMap {
        &self.variants
    }

    pub fn variant(&self, name: &str) -> Option<&VariantValue> {
        self.variants.get(name)
    }

    pub fn dependencies(&self) -> &[Spec] {
        &self.dependencies
    }

    pub fn dependency(&self, name: &str) -> Option<&Spec> {
        self.dependencies.iter().find(|d| d.name() == Some(name))
    }

    /// The `/hash` prefix this abstract spec was constrained to.
    pub fn abstract_hash(&self) -> Option<&str> {
        self.abstract_hash.as_deref()
    }

    /// The DAG hash of a concrete spec.
    pub fn dag_hash(&self) -> Option<&str> {
        self.dag_hash.as_deref()
    }

    /// The hash a root request is pinned to: the full hash of a concrete
    /// spec, else its `/hash` prefix.
    pub(crate) fn requested_hash(&self) -> Option<&str> {
        self.dag_hash().or(self.abstract_hash())
    }

    pub fn external_prefix(&self) -> Option<&Path> {
        self.external.as_deref()
    }

    pub fn is_external(&self) -> bool {
        self.external.is_some()
    }

    pub fn is_concrete(&self) -> bool {
        self.concrete
    }

    fn check_mutable(&self) -> Result<(), SpecConcretizedError> {
        if self.concrete {
            return Err(SpecConcretizedError {
                spec: self.to_string(),
            });
        }
        Ok(())
    }

    pub fn set_versions(&mut self, versions: VersionList) -> Result<(), SpecConcretizedError> {
        self.check_mutable()?;
        self.versions = versions;
        Ok(())
    }

    pub fn set_compiler(&mut self, compiler: CompilerSpec) -> Result<(), SpecConcretizedError> {
        self.check_mutable()?;
        self.compiler = Some(compiler);
        Ok(())
    }

    pub fn set_name(&mut self, name: impl Into<String>) -> Result<(), SpecConcretizedError> {
        self.check_mutable()?;
        self.name = Some(name.into());
        Ok(())
    }

    pub fn set_variant(&mut self, value: VariantValue) -> Result<(), SpecConcretizedError> {
        self.check_mutable()?;
        self.variants.insert(value);
        Ok(())
    }

    pub fn set_abstract_hash(&mut self, hash: impl Into<String>) -> Result<(), SpecConcretizedError> {
        self.check_mutable()?;
        self.abstract_hash = Some(hash.into());
        Ok(())
    }

    /// Add a `^dependency` constraint, merging with an existing one of the
    /// same name.
    pub fn add_dependency(&mut self, dep: Spec) -> Result<(), SpecError> {
        self.check_mutable()?;
        let existing = dep
            .name()
            .and_then(|n| self.dependencies.iter().position(|d| d.name() == Some(n)));
        match existing {
            Some(i) => {
                self.dependencies[i].constrain(&dep)?;
            }
            None => self.dependencies.push(dep),
        }
        Ok(())
    }

    pub(crate) fn set_dag_hash(&mut self, hash: String) {
        self.dag_hash = Some(hash);
    }

    pub(crate) fn set_external_prefix(&mut self, prefix: PathBuf) {
        self.external = Some(prefix);
    }

    /// Intersect this spec's constraints with `other`'s.
    ///
    /// Returns whether anything changed. On failure `self` is unchanged.
    pub fn constrain(&mut self, other: &Spec) -> Result<bool, SpecError> {
        self.check_mutable()?;

        let unsatisfiable = |kind: ConstraintKind, constraint: String| {
            SpecError::from(UnsatisfiableSpecError::Constraint {
                spec: self.to_string(),
                constraint,
                kind,
            })
        };

        let mut next = self.clone();

        match (&next.name, &other.name) {
            (Some(a), Some(b)) if a != b => {
                return Err(unsatisfiable(ConstraintKind::Name, b.clone()));
            }
            (None, Some(b)) => next.name = Some(b.clone()),
            _ => {}
        }

        let versions = next.versions.intersect(&other.versions);
        if versions.is_empty() {
            return Err(unsatisfiable(
                ConstraintKind::Version,
                format!("@{}", other.versions),
            ));
        }
        next.versions = versions;

        match (&next.compiler, &other.compiler) {
            (Some(a), Some(b)) => match a.intersect(b) {
                Some(c) => next.compiler = Some(c),
                None => return Err(unsatisfiable(ConstraintKind::Compiler, format!("%{b}"))),
            },
            (None, Some(b)) => next.compiler = Some(b.clone()),
            _ => {}
        }

        next.variants
            .constrain(&other.variants)
            .map_err(|(_, theirs)| unsatisfiable(ConstraintKind::Variant, theirs.to_string()))?;

        match (&next.abstract_hash, &other.abstract_hash) {
            (Some(a), Some(b)) if b.starts_with(a.as_str()) => next.abstract_hash = Some(b.clone()),
            (Some(a), Some(b)) if !a.starts_with(b.as_str()) => {
                return Err(unsatisfiable(ConstraintKind::Hash, format!("/{b}")));
            }
            (None, Some(b)) => next.abstract_hash = Some(b.clone()),
            _ => {}
        }

        for dep in &other.dependencies {
            next.add_dependency(dep.clone())?;
        }

        let changed = next != *self;
        *self = next;
        Ok(changed)
    }

    /// Whether every configuration admitted by `self` is admitted by `other`.
    ///
    /// `^dep` constraints of `other` must be matched by a same-named
    /// dependency constraint of `self`; for concrete nodes use
    /// [`ConcreteDag::satisfies`](crate::ConcreteDag::satisfies), which
    /// searches the node's subgraph instead.
    pub fn satisfies(&self, other: &Spec) -> bool {
        self.satisfies_node(other)
            && other.dependencies.iter().all(|theirs| {
                self.dependencies
                    .iter()
                    .any(|mine| mine.name == theirs.name && mine.satisfies(theirs))
            })
    }

    /// [`satisfies`](Spec::satisfies) ignoring dependency constraints.
    pub fn satisfies_node(&self, other: &Spec) -> bool {
        if let Some(name) = &other.name {
            if self.name.as_ref() != Some(name) {
                return false;
            }
        }
        self.satisfies_attributes(other)
    }

    /// Node attribute containment without the name check; used when `other`
    /// names a virtual that `self` provides.
    pub(crate) fn satisfies_attributes(&self, other: &Spec) -> bool {
        if !self.versions.is_subset_of(&other.versions) {
            return false;
        }
        if let Some(theirs) = &other.compiler {
            if !self.compiler.as_ref().is_some_and(|mine| mine.satisfies(theirs)) {
                return false;
            }
        }
        if !self.variants.satisfies(&other.variants) {
            return false;
        }
        if let Some(prefix) = &other.abstract_hash {
            let mine = self.dag_hash.as_ref().or(self.abstract_hash.as_ref());
            if !mine.is_some_and(|h| h.starts_with(prefix.as_str())) {
                return false;
            }
        }
        if other.dag_hash.is_some() && self.dag_hash != other.dag_hash {
            return false;
        }
        true
    }

    /// Whether some configuration satisfies both specs.
    pub fn intersects(&self, other: &Spec) -> bool {
        if let (Some(a), Some(b)) = (&self.name, &other.name) {
            if a != b {
                return false;
            }
        }
        if !self.versions.intersects(&other.versions) {
            return false;
        }
        if let (Some(a), Some(b)) = (&self.compiler, &other.compiler) {
            if !a.intersects(b) {
                return false;
            }
        }
        if !self.variants.intersects(&other.variants) {
            return false;
        }
        let my_hash = self.dag_hash.as_ref().or(self.abstract_hash.as_ref());
        if let (Some(a), Some(b)) = (my_hash, &other.abstract_hash) {
            if !a.starts_with(b.as_str()) && !b.starts_with(a.as_str()) {
                return false;
            }
        }
        other.dependencies.iter().all(|theirs| {
            self.dependencies
                .iter()
                .filter(|mine| mine.name == theirs.name)
                .all(|mine| mine.intersects(theirs))
        })
    }

    /// Copy the node and its constraint state, without dependency constraints.
    pub fn copy(&self) -> Spec {
        Spec {
            dependencies: Vec::new(),
            ..self.clone()
        }
    }

    /// The node constraints with the name stripped, as matched against
    /// solver candidates.
    pub(crate) fn node_constraint(&self) -> Spec {
        Spec {
            name: None,
            dependencies: Vec::new(),
            ..self.clone()
        }
    }

    /// Render this node without its dependencies.
    pub fn format_node(&self) -> String {
        let mut out = String::new();
        if let Some(name) = &self.name {
            out.push_str(name);
        }
        if !self.versions.is_any() {
            match (self.concrete, self.versions.concrete()) {
                (true, Some(v)) => {
                    let _ = write!(out, "@{v}");
                }
                _ => {
                    let _ = write!(out, "@{}", self.versions);
                }
            }
        }
        if let Some(compiler) = &self.compiler {
            out.push('%');
            if self.concrete {
                out.push_str(&compiler.format_concrete());
            } else {
                let _ = write!(out, "{compiler}");
            }
        }
        let _ = write!(out, "{}", self.variants);
        if let Some(hash) = &self.abstract_hash {
            let _ = write!(out, " /{hash}");
        }
        out.trim_start().to_string()
    }
}

impl fmt::Display for Spec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = self.format_node();
        for dep in &self.dependencies {
            let _ = write!(out, " ^{dep}");
        }
        f.write_str(out.trim_start())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConstraintKind;

    fn spec(s: &str) -> Spec {
        s.parse().unwrap()
    }

    #[test]
    fn constrain_intersects_versions() {
        let mut s = spec("libelf@0.8:");
        assert!(s.constrain(&spec("libelf@:0.8.12")).unwrap());
        assert_eq!(s.to_string(), "libelf@0.8:0.8.12");
        assert!(!s.constrain(&spec("libelf")).unwrap());
    }

    #[test]
    fn constrain_fails_on_disjoint_versions() {
        let mut s = spec("libelf@0.8.12");
        let before = s.clone();
        let err = s.constrain(&spec("libelf@0.9:")).unwrap_err();
        match err {
            SpecError::Unsatisfiable(UnsatisfiableSpecError::Constraint { kind, .. }) => {
                assert_eq!(kind, ConstraintKind::Version)
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(s, before);
    }

    #[test]
    fn constrain_fails_on_exclusive_variant_values() {
        let mut s = spec("y build_type=Release");
        let err = s.constrain(&spec("y build_type=Debug")).unwrap_err();
        assert!(matches!(
            err,
            SpecError::Unsatisfiable(UnsatisfiableSpecError::Constraint {
                kind: ConstraintKind::Variant,
                ..
            })
        ));
        assert!(spec("y+shared").constrain(&spec("y~shared")).is_err());
    }

    #[test]
    fn constrain_fills_missing_attributes() {
        let mut s = spec("mpileaks");
        s.constrain(&spec("@2.3%gcc+debug ^callpath@1.0")).unwrap();
        assert_eq!(s.to_string(), "mpileaks@2.3%gcc+debug ^callpath@1.0");
        s.constrain(&spec("^callpath+shared")).unwrap();
        assert_eq!(s.dependencies().len(), 1);
        assert!(s.dependency("callpath").unwrap().satisfies(&spec("callpath@1.0+shared")));
    }

    #[test]
    fn constrain_rejects_other_names_and_compilers() {
        assert!(spec("x").constrain(&spec("y")).is_err());
        assert!(spec("x%gcc").constrain(&spec("%clang")).is_err());
        assert!(spec("x%gcc@:10").constrain(&spec("%gcc@12:")).is_err());
    }

    #[test]
    fn concrete_specs_are_immutable() {
        let mut node = Spec::concrete_node(
            "x",
            Version::parse("1.0").unwrap(),
            None,
            VariantMap::new(),
        );
        assert!(matches!(
            node.constrain(&spec("@1.0")),
            Err(SpecError::Concretized(_))
        ));
        assert!(node.set_variant(VariantValue::boolean("shared", true)).is_err());
        assert!(node.add_dependency(spec("y")).is_err());
    }

    #[test]
    fn satisfies_is_containment() {
        let node = Spec::concrete_node(
            "x",
            Version::parse("1.2.1").unwrap(),
            Some(CompilerSpec::concrete("gcc", Version::parse("12.2.0").unwrap())),
            {
                let mut v = VariantMap::new();
                v.insert(VariantValue::boolean("shared", true));
                v
            },
        );
        assert!(node.satisfies(&spec("x@1.2")));
        assert!(node.satisfies(&spec("@1:%gcc@12+shared")));
        assert!(!node.satisfies(&spec("x~shared")));
        assert!(!node.satisfies(&spec("x@=1.2")));
        assert!(!node.satisfies(&spec("y")));
        assert!(!node.satisfies(&spec("x+debug")));
        assert!(spec("x@1.2.3").satisfies(&spec("x@1.2")));
        assert!(!spec("x@1.2").satisfies(&spec("x@1.2.3")));
    }

    #[test]
    fn intersects_is_symmetric_compatibility() {
        assert!(spec("x@1.2").intersects(&spec("x@1.2.3")));
        assert!(spec("x+shared").intersects(&spec("x@2")));
        assert!(!spec("x+shared").intersects(&spec("x~shared")));
        assert!(!spec("x ^y@1").intersects(&spec("x ^y@2")));
        assert!(spec("x ^y@1").intersects(&spec("x ^z@2")));
    }

    #[test]
    fn copy_drops_dependency_constraints() {
        let s = spec("mpileaks@2.3+debug ^callpath");
        let c = s.copy();
        assert_eq!(c.to_string(), "mpileaks@2.3+debug");
        assert!(c.dependencies().is_empty());
        assert_eq!(s.dependencies().len(), 1);
    }

    #[test]
    fn abstract_hash_constraints() {
        let mut s = spec("x/abc");
        assert!(s.constrain(&spec("x/abcdef")).unwrap());
        assert_eq!(s.abstract_hash(), Some("abcdef"));
        assert!(s.constrain(&spec("/abd")).is_err());
    }
}
