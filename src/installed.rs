//! Previously concretized nodes the solver may reuse.

use std::collections::BTreeMap;
use std::path::Path;

use crate::dag::ConcreteDag;
use crate::error::DagDocumentError;

/// How the solver treats an installed node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstalledPolicy {
    /// Preferred over building, but may be replaced.
    Favored,
    /// If the package appears at all, it must be this exact build.
    Locked,
}

/// Concrete nodes already installed, each with a policy.
///
/// Nodes keep their stored DAG hashes. Installed nodes whose package has no
/// recipe anymore are still offered to the solver.
///
/// ```ignore
/// let mut installed = InstalledSet::new();
/// installed.add_favored(&previous.dag);
/// let solver = Solver::new(&repo, &config).with_installed(installed);
/// ```
#[derive(Debug, Clone, Default)]
pub struct InstalledSet {
    dag: ConcreteDag,
    policies: BTreeMap<String, InstalledPolicy>,
}

impl InstalledSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add every node of `dag`. A node already present keeps the stricter
    /// policy.
    pub fn add(&mut self, dag: &ConcreteDag, policy: InstalledPolicy) {
        self.dag.merge(dag);
        for node in dag.nodes() {
            let entry = self
                .policies
                .entry(dag.hash(node).to_string())
                .or_insert(policy);
            if policy == InstalledPolicy::Locked {
                *entry = InstalledPolicy::Locked;
            }
        }
        self.dag.mark_all_reused();
    }

    pub fn add_favored(&mut self, dag: &ConcreteDag) {
        self.add(dag, InstalledPolicy::Favored);
    }

    pub fn add_locked(&mut self, dag: &ConcreteDag) {
        self.add(dag, InstalledPolicy::Locked);
    }

    /// Read a JSON DAG document; every node is [`InstalledPolicy::Favored`].
    pub fn from_json(text: &str) -> Result<Self, DagDocumentError> {
        let mut set = Self::new();
        set.add_favored(&ConcreteDag::from_json(text)?);
        Ok(set)
    }

    pub fn load(path: &Path) -> Result<Self, DagDocumentError> {
        let mut set = Self::new();
        set.add_favored(&ConcreteDag::load(path)?);
        Ok(set)
    }

    pub fn dag(&self) -> &ConcreteDag {
        &self.dag
    }

    pub fn policy(&self, hash: &str) -> Option<InstalledPolicy> {
        self.policies.get(hash).copied()
    }

    /// Keep only locked nodes and the subgraphs of `keep`.
    pub(crate) fn retain_locked_and(&self, keep: &[String]) -> InstalledSet {
        let mut out = InstalledSet::new();
        for node in self.dag.nodes() {
            let hash = self.dag.hash(node);
            let policy = self.policies.get(hash).copied();
            if policy == Some(InstalledPolicy::Locked) || keep.iter().any(|k| k == hash) {
                out.add(&self.dag.subdag(node), policy.unwrap_or(InstalledPolicy::Favored));
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.dag.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dag.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::DependencyEdge;
    use crate::deptypes::DepTypes;
    use crate::spec::Spec;
    use crate::variant::VariantMap;
    use crate::version::Version;

    fn chain() -> ConcreteDag {
        let node = |n: &str| {
            Spec::concrete_node(n, Version::parse("1.0").unwrap(), None, VariantMap::new())
        };
        ConcreteDag::from_parts(
            vec![node("app"), node("zlib")],
            vec![(0, 1, DependencyEdge::new(DepTypes::DEFAULT))],
            vec![0],
        )
        .unwrap()
    }

    #[test]
    fn policies_and_reuse_flags() {
        let dag = chain();
        let mut set = InstalledSet::new();
        set.add_favored(&dag);
        assert_eq!(set.len(), 2);
        let zlib = dag.find("zlib")[0];
        assert_eq!(set.policy(dag.hash(zlib)), Some(InstalledPolicy::Favored));
        assert!(set.dag().nodes().iter().all(|&n| set.dag().is_reused(n)));

        set.add_locked(&dag.subdag(zlib));
        assert_eq!(set.policy(dag.hash(zlib)), Some(InstalledPolicy::Locked));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn loads_json_documents() {
        let dag = chain();
        let set = InstalledSet::from_json(&dag.to_json_string().unwrap()).unwrap();
        assert_eq!(set.len(), 2);
        let app = dag.roots()[0];
        assert_eq!(set.policy(dag.hash(app)), Some(InstalledPolicy::Favored));
    }

    #[test]
    fn retain_keeps_locked_nodes_and_requested_subgraphs() {
        let dag = chain();
        let zlib = dag.find("zlib")[0];
        let mut set = InstalledSet::new();
        set.add_favored(&dag);
        assert!(set.retain_locked_and(&[]).is_empty());
        let kept = set.retain_locked_and(&[dag.hash(zlib).to_string()]);
        assert_eq!(kept.len(), 1);
    }
}
