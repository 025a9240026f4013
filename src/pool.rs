//! Arena-based pool mapping resolvo IDs to concretizer types.
//!
//! [`SpecPool`] provides the storage that backs every resolvo identifier
//! ([`NameId`], [`SolvableId`], [`VersionSetId`], etc.) with a concrete
//! value: package and virtual names, candidate nodes and virtual choices,
//! and the constraints the provider filters candidates with.

use std::collections::BTreeSet;
use std::fmt;

use resolvo::{
    ArenaId, ConditionId, NameId, SolvableId, StringId, VersionSetId, VersionSetUnionId,
};
use rustc_hash::FxHashMap;

use crate::deptypes::DepTypes;
use crate::installed::InstalledPolicy;
use crate::spec::Spec;
use crate::version::VersionList;

/// A name on the resolvo name axis.
///
/// Packages and virtuals live in separate namespaces: a virtual's
/// candidates are [`VirtualChoice`]s, one per provider declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PackageName {
    Package(String),
    Virtual(String),
}

impl PackageName {
    pub fn as_str(&self) -> &str {
        match self {
            PackageName::Package(n) | PackageName::Virtual(n) => n,
        }
    }

    pub fn is_virtual(&self) -> bool {
        matches!(self, PackageName::Virtual(_))
    }
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ranking inputs of one candidate node; lower is better everywhere.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct NodeCosts {
    /// `false` for reused nodes so they sort first.
    pub built: bool,
    pub requirement_weight: usize,
    pub deprecated: bool,
    /// Index of the first configured preference the version matches.
    pub version_weight: usize,
    pub non_default_variants: usize,
    pub compiler_weight: usize,
    /// Position of the version among declared versions, newest first.
    pub version_age: usize,
}

/// A dependency edge a candidate brings along when it is selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedEdge {
    /// Package or virtual name of the child.
    pub target: PackageName,
    pub deptypes: DepTypes,
    /// Virtuals the child provides through this edge.
    pub virtuals: BTreeSet<String>,
    /// The edge only exists when this condition matched a selected
    /// solvable.
    pub condition: Option<VersionSetId>,
}

/// One concrete configuration of a package: a candidate node.
#[derive(Debug, Clone)]
pub struct CandidateNode {
    /// Concrete spec; reused nodes carry their stored DAG hash.
    pub spec: Spec,
    pub installed: Option<InstalledPolicy>,
    pub edges: Vec<PlannedEdge>,
    pub costs: NodeCosts,
}

/// Selecting `provider` (under `constraint`) to stand in for a virtual.
#[derive(Debug, Clone)]
pub struct VirtualChoice {
    pub virtual_name: String,
    pub provider: String,
    /// Virtual versions the provider implements.
    pub provided: VersionList,
    /// Constraint on the provider node: the provides condition plus any
    /// configured requirement alternative.
    pub constraint: Spec,
    pub requirement_weight: usize,
    pub provider_weight: usize,
}

/// Metadata behind one [`SolvableId`].
#[derive(Debug, Clone)]
pub enum SolvableRecord {
    Node(CandidateNode),
    Choice(VirtualChoice),
}

impl SolvableRecord {
    pub fn as_node(&self) -> Option<&CandidateNode> {
        match self {
            SolvableRecord::Node(n) => Some(n),
            SolvableRecord::Choice(_) => None,
        }
    }

    pub fn as_choice(&self) -> Option<&VirtualChoice> {
        match self {
            SolvableRecord::Choice(c) => Some(c),
            SolvableRecord::Node(_) => None,
        }
    }
}

impl fmt::Display for SolvableRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolvableRecord::Node(node) => {
                write!(f, "{}", node.spec.format_node())?;
                if let Some(hash) = node.spec.dag_hash() {
                    write!(f, " /{}", &hash[..hash.len().min(7)])?;
                }
                Ok(())
            }
            SolvableRecord::Choice(choice) => {
                write!(f, "{}@{} from {}", choice.virtual_name, choice.provided, choice.provider)?;
                let constraint = choice.constraint.format_node();
                if !constraint.is_empty() {
                    write!(f, " {constraint}")?;
                }
                Ok(())
            }
        }
    }
}

/// What a version set matches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VersionSetKind {
    /// Nodes satisfying the (nameless) spec.
    Node(Spec),
    /// Choices whose provided range intersects the list.
    Virtual(VersionList),
    /// Choices made by one provider.
    Provider(String),
    /// The node whose DAG hash starts with the prefix.
    Hash(String),
}

/// A constraint on the candidates of one name.
///
/// `inverted` constraints are used in `constrains` lists: the match result is
/// flipped before resolvo's own `inverse` flag is applied, so the net effect
/// is that candidates matching the constraint are forbidden.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpecConstraint {
    pub name: PackageName,
    pub kind: VersionSetKind,
    pub inverted: bool,
}

impl SpecConstraint {
    pub fn new(name: PackageName, kind: VersionSetKind) -> Self {
        Self {
            name,
            kind,
            inverted: false,
        }
    }

    pub fn inverted(mut self) -> Self {
        self.inverted = true;
        self
    }

    /// Whether a candidate matches, ignoring `inverted`.
    pub fn matches(&self, record: &SolvableRecord) -> bool {
        match (&self.kind, record) {
            (VersionSetKind::Node(spec), SolvableRecord::Node(node)) => {
                node.spec.satisfies_attributes(spec)
            }
            (VersionSetKind::Hash(prefix), SolvableRecord::Node(node)) => node
                .spec
                .dag_hash()
                .is_some_and(|h| h.starts_with(prefix.as_str())),
            (VersionSetKind::Virtual(range), SolvableRecord::Choice(choice)) => {
                choice.provided.intersects(range)
            }
            (VersionSetKind::Provider(p), SolvableRecord::Choice(choice)) => choice.provider == *p,
            _ => false,
        }
    }
}

impl fmt::Display for SpecConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.inverted {
            f.write_str("!")?;
        }
        match &self.kind {
            VersionSetKind::Node(spec) => {
                let node = spec.format_node();
                if node.is_empty() {
                    write!(f, "{}", self.name)
                } else if node.starts_with('@') {
                    write!(f, "{}{node}", self.name)
                } else {
                    write!(f, "{} {node}", self.name)
                }
            }
            VersionSetKind::Virtual(range) if range.is_any() => write!(f, "{}", self.name),
            VersionSetKind::Virtual(range) => write!(f, "{}@{range}", self.name),
            VersionSetKind::Provider(p) => write!(f, "{} provided by {p}", self.name),
            VersionSetKind::Hash(h) => write!(f, "{}/{}", self.name, &h[..h.len().min(7)]),
        }
    }
}

/// Arena-based storage for all resolvo-interned objects.
///
/// Every resolvo ID type is backed by a `Vec` here, indexed by the ID's
/// inner `usize`. Reverse-lookup maps prevent duplicate interning.
#[derive(Clone, Default)]
pub struct SpecPool {
    // NameId arena
    pub(crate) names: Vec<PackageName>,
    pub(crate) names_rev: FxHashMap<PackageName, NameId>,

    // SolvableId arena
    pub(crate) solvables: Vec<SolvableRecord>,
    pub(crate) solvable_names: Vec<NameId>,

    // VersionSetId arena
    pub(crate) version_sets: Vec<SpecConstraint>,
    pub(crate) version_set_names: Vec<NameId>,
    pub(crate) version_sets_rev: FxHashMap<SpecConstraint, VersionSetId>,

    // VersionSetUnionId arena
    pub(crate) version_set_unions: Vec<Vec<VersionSetId>>,

    // ConditionId arena
    pub(crate) conditions: Vec<resolvo::Condition>,
    pub(crate) conditions_rev: FxHashMap<VersionSetId, ConditionId>,

    // StringId arena
    pub(crate) strings: Vec<String>,
    pub(crate) strings_rev: FxHashMap<String, StringId>,
}

impl SpecPool {
    pub fn new() -> Self {
        Self::default()
    }

    // --- NameId ---

    /// Intern a name, returning the existing ID if already interned.
    pub fn intern_name(&mut self, name: PackageName) -> NameId {
        if let Some(&id) = self.names_rev.get(&name) {
            return id;
        }
        let id = NameId::from_usize(self.names.len());
        self.names_rev.insert(name.clone(), id);
        self.names.push(name);
        id
    }

    pub fn lookup_name(&self, name: &PackageName) -> Option<NameId> {
        self.names_rev.get(name).copied()
    }

    pub fn resolve_name(&self, id: NameId) -> &PackageName {
        &self.names[id.to_usize()]
    }

    pub fn name_count(&self) -> usize {
        self.names.len()
    }

    // --- SolvableId ---

    pub fn intern_solvable(&mut self, name_id: NameId, record: SolvableRecord) -> SolvableId {
        let id = SolvableId::from_usize(self.solvables.len());
        self.solvables.push(record);
        self.solvable_names.push(name_id);
        id
    }

    pub fn resolve_solvable(&self, id: SolvableId) -> &SolvableRecord {
        &self.solvables[id.to_usize()]
    }

    pub(crate) fn resolve_solvable_mut(&mut self, id: SolvableId) -> &mut SolvableRecord {
        &mut self.solvables[id.to_usize()]
    }

    pub fn solvable_name(&self, id: SolvableId) -> NameId {
        self.solvable_names[id.to_usize()]
    }

    pub fn solvable_count(&self) -> usize {
        self.solvables.len()
    }

    // --- VersionSetId ---

    /// Intern a constraint, deduplicating by value.
    pub fn intern_version_set(&mut self, constraint: SpecConstraint) -> VersionSetId {
        if let Some(&id) = self.version_sets_rev.get(&constraint) {
            return id;
        }
        let name_id = self.intern_name(constraint.name.clone());
        let id = VersionSetId::from_usize(self.version_sets.len());
        self.version_sets_rev.insert(constraint.clone(), id);
        self.version_sets.push(constraint);
        self.version_set_names.push(name_id);
        id
    }

    pub fn resolve_version_set(&self, id: VersionSetId) -> &SpecConstraint {
        &self.version_sets[id.to_usize()]
    }

    pub fn version_set_name(&self, id: VersionSetId) -> NameId {
        self.version_set_names[id.to_usize()]
    }

    pub fn version_set_count(&self) -> usize {
        self.version_sets.len()
    }

    // --- VersionSetUnionId ---

    pub fn intern_version_set_union(&mut self, sets: Vec<VersionSetId>) -> VersionSetUnionId {
        let id = VersionSetUnionId::from_usize(self.version_set_unions.len());
        self.version_set_unions.push(sets);
        id
    }

    pub fn resolve_version_set_union(&self, id: VersionSetUnionId) -> &[VersionSetId] {
        &self.version_set_unions[id.to_usize()]
    }

    // --- ConditionId ---

    /// Intern "some solvable matching `version_set` is selected".
    pub fn intern_condition(&mut self, version_set: VersionSetId) -> ConditionId {
        if let Some(&id) = self.conditions_rev.get(&version_set) {
            return id;
        }
        let id = ConditionId::from_usize(self.conditions.len());
        self.conditions
            .push(resolvo::Condition::Requirement(version_set));
        self.conditions_rev.insert(version_set, id);
        id
    }

    pub fn resolve_condition(&self, id: ConditionId) -> &resolvo::Condition {
        &self.conditions[id.to_usize()]
    }

    // --- StringId ---

    /// Intern a string (used for exclusion reasons).
    pub fn intern_string(&mut self, s: String) -> StringId {
        if let Some(&id) = self.strings_rev.get(&s) {
            return id;
        }
        let id = StringId::from_usize(self.strings.len());
        self.strings_rev.insert(s.clone(), id);
        self.strings.push(s);
        id
    }

    pub fn resolve_string(&self, id: StringId) -> &str {
        &self.strings[id.to_usize()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variant::VariantMap;
    use crate::version::Version;

    fn node(name: &str, version: &str) -> SolvableRecord {
        SolvableRecord::Node(CandidateNode {
            spec: Spec::concrete_node(name, Version::parse(version).unwrap(), None, VariantMap::new()),
            installed: None,
            edges: Vec::new(),
            costs: NodeCosts::default(),
        })
    }

    fn choice(provider: &str, provided: &str) -> SolvableRecord {
        SolvableRecord::Choice(VirtualChoice {
            virtual_name: "mpi".into(),
            provider: provider.into(),
            provided: VersionList::parse(provided).unwrap(),
            constraint: Spec::anonymous(),
            requirement_weight: 0,
            provider_weight: 0,
        })
    }

    #[test]
    fn intern_name_dedup() {
        let mut pool = SpecPool::new();
        let a = pool.intern_name(PackageName::Package("zlib".into()));
        let b = pool.intern_name(PackageName::Package("zlib".into()));
        let c = pool.intern_name(PackageName::Virtual("zlib".into()));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(pool.resolve_name(a).as_str(), "zlib");
    }

    #[test]
    fn intern_solvable_roundtrip() {
        let mut pool = SpecPool::new();
        let name = pool.intern_name(PackageName::Package("zlib".into()));
        let sid = pool.intern_solvable(name, node("zlib", "1.3"));
        assert_eq!(pool.solvable_name(sid), name);
        assert_eq!(pool.resolve_solvable(sid).to_string(), "zlib@1.3");
    }

    #[test]
    fn intern_version_set_dedup_and_names() {
        let mut pool = SpecPool::new();
        let c = SpecConstraint::new(
            PackageName::Package("zlib".into()),
            VersionSetKind::Node("@1.2:".parse().unwrap()),
        );
        let a = pool.intern_version_set(c.clone());
        let b = pool.intern_version_set(c.clone());
        let inv = pool.intern_version_set(c.inverted());
        assert_eq!(a, b);
        assert_ne!(a, inv);
        assert_eq!(pool.resolve_name(pool.version_set_name(a)).as_str(), "zlib");
        assert_eq!(pool.resolve_version_set(inv).to_string(), "!zlib@1.2:");
    }

    #[test]
    fn constraints_match_by_kind() {
        let zlib = node("zlib", "1.3");
        let node_set = |s: &str| {
            SpecConstraint::new(PackageName::Package("zlib".into()), VersionSetKind::Node(s.parse().unwrap()))
        };
        assert!(node_set("@1.2:").matches(&zlib));
        assert!(!node_set("@:1.2").matches(&zlib));

        let mpi = PackageName::Virtual("mpi".into());
        let mpich = choice("mpich", ":3");
        let range = SpecConstraint::new(mpi.clone(), VersionSetKind::Virtual("2:".parse().unwrap()));
        assert!(range.matches(&mpich));
        let provider = SpecConstraint::new(mpi, VersionSetKind::Provider("openmpi".into()));
        assert!(!provider.matches(&mpich));
        assert!(!range.matches(&zlib));
    }

    #[test]
    fn conditions_and_strings_are_deduplicated() {
        let mut pool = SpecPool::new();
        let vs = pool.intern_version_set(SpecConstraint::new(
            PackageName::Package("mpich".into()),
            VersionSetKind::Node(Spec::anonymous()),
        ));
        assert_eq!(pool.intern_condition(vs), pool.intern_condition(vs));
        let s = pool.intern_string("deprecated".into());
        assert_eq!(pool.intern_string("deprecated".into()), s);
        assert_eq!(pool.resolve_string(s), "deprecated");
    }
}
