//! The concrete dependency DAG produced by a solve.
//!
//! Nodes are concrete [`Spec`]s stored in a `petgraph` arena; edges point
//! from dependent to dependency and carry the edge's [`DepTypes`] and the
//! virtuals the child provides to the parent. Structurally identical nodes
//! are shared: every node is identified by its DAG hash, and merging two
//! DAGs reuses nodes whose hashes agree.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, EdgeRef};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::compiler::CompilerSpec;
use crate::deptypes::DepTypes;
use crate::error::{DagDocumentError, DependencyCycleError};
use crate::package::BuildSystem;
use crate::spec::Spec;
use crate::variant::{VariantMap, VariantValue};
use crate::version::Version;

/// Hex digits kept from the SHA-256 digest.
const HASH_LENGTH: usize = 32;

const DOCUMENT_VERSION: u32 = 1;

/// Label of a dependency edge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DependencyEdge {
    pub deptypes: DepTypes,
    /// Virtuals the child provides to the parent through this edge.
    pub virtuals: BTreeSet<String>,
}

impl DependencyEdge {
    pub fn new(deptypes: DepTypes) -> Self {
        Self {
            deptypes,
            virtuals: BTreeSet::new(),
        }
    }

    fn union(&mut self, other: &DependencyEdge) {
        self.deptypes |= other.deptypes;
        self.virtuals.extend(other.virtuals.iter().cloned());
    }
}

/// Rendering switches for [`ConcreteDag::tree`].
#[derive(Debug, Clone, Copy)]
pub struct TreeOptions {
    /// Prefix each line with the node's hash.
    pub hashes: bool,
    /// Prefix each line with `[+]` for reused nodes, `[e]` for externals and
    /// ` - ` otherwise.
    pub install_status: bool,
    /// Prefix each line with the deptype column of the edge leading to it.
    pub deptypes: bool,
    pub hash_length: usize,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            hashes: false,
            install_status: false,
            deptypes: false,
            hash_length: 7,
        }
    }
}

/// A concretized dependency graph.
#[derive(Debug, Clone, Default)]
pub struct ConcreteDag {
    graph: DiGraph<Spec, DependencyEdge>,
    roots: Vec<NodeIndex>,
    by_hash: FxHashMap<String, NodeIndex>,
    /// Hashes of nodes taken from an installed or fixed set.
    reused: BTreeSet<String>,
}

impl ConcreteDag {
    /// Assemble a DAG from solved nodes.
    ///
    /// Nodes arriving with a DAG hash (reused ones) keep it; all others are
    /// hashed children-first. Duplicate edges between the same pair of nodes
    /// are merged.
    pub(crate) fn from_parts(
        nodes: Vec<Spec>,
        edges: Vec<(usize, usize, DependencyEdge)>,
        roots: Vec<usize>,
    ) -> Result<Self, DependencyCycleError> {
        let mut graph = DiGraph::with_capacity(nodes.len(), edges.len());
        let mut reused = BTreeSet::new();
        let indices: Vec<NodeIndex> = nodes
            .into_iter()
            .map(|node| {
                if let Some(hash) = node.dag_hash() {
                    reused.insert(hash.to_string());
                }
                graph.add_node(node)
            })
            .collect();
        let mut dag = Self {
            graph,
            roots: Vec::new(),
            by_hash: FxHashMap::default(),
            reused,
        };
        for (from, to, edge) in edges {
            dag.add_edge(indices[from], indices[to], edge);
        }
        for root in roots {
            dag.add_root(indices[root]);
        }
        dag.assign_hashes()?;
        Ok(dag)
    }

    fn add_edge(&mut self, from: NodeIndex, to: NodeIndex, edge: DependencyEdge) {
        match self.graph.find_edge(from, to) {
            Some(existing) => self.graph[existing].union(&edge),
            None => {
                self.graph.add_edge(from, to, edge);
            }
        }
    }

    pub(crate) fn add_root(&mut self, node: NodeIndex) {
        if !self.roots.contains(&node) {
            self.roots.push(node);
        }
    }

    fn assign_hashes(&mut self) -> Result<(), DependencyCycleError> {
        let order = petgraph::algo::toposort(&self.graph, None).map_err(|_| self.cycle_error())?;
        for &node in order.iter().rev() {
            if self.graph[node].dag_hash().is_none() {
                let hash = self.compute_hash(node);
                self.graph[node].set_dag_hash(hash);
            }
            if let Some(hash) = self.graph[node].dag_hash() {
                self.by_hash.insert(hash.to_string(), node);
            }
        }
        Ok(())
    }

    fn compute_hash(&self, node: NodeIndex) -> String {
        let mut children: Vec<(&str, &DependencyEdge)> = self
            .graph
            .edges(node)
            .filter_map(|e| Some((self.graph[e.target()].dag_hash()?, e.weight())))
            .collect();
        children.sort();

        let mut hasher = Sha256::new();
        hasher.update(self.graph[node].format_node().as_bytes());
        if let Some(prefix) = self.graph[node].external_prefix() {
            hasher.update(b" external=");
            hasher.update(prefix.to_string_lossy().as_bytes());
        }
        for (hash, edge) in children {
            hasher.update(b"\n^");
            hasher.update(hash.as_bytes());
            hasher.update(b" ");
            hasher.update(edge.deptypes.to_string().as_bytes());
            for v in &edge.virtuals {
                hasher.update(b" ");
                hasher.update(v.as_bytes());
            }
        }
        let mut hash = hex::encode(hasher.finalize());
        hash.truncate(HASH_LENGTH);
        hash
    }

    fn cycle_error(&self) -> DependencyCycleError {
        let components = petgraph::algo::kosaraju_scc(&self.graph);
        let cyclic = components.into_iter().find(|c| {
            c.len() > 1 || c.iter().any(|&n| self.graph.find_edge(n, n).is_some())
        });
        let mut cycle: Vec<String> = cyclic
            .unwrap_or_default()
            .into_iter()
            .map(|n| self.name(n).to_string())
            .collect();
        cycle.sort();
        if let Some(first) = cycle.first().cloned() {
            cycle.push(first);
        }
        DependencyCycleError { cycle }
    }

    fn name(&self, node: NodeIndex) -> &str {
        self.graph[node].name().unwrap_or_default()
    }

    fn sort_key(&self, node: NodeIndex) -> (&str, &str) {
        (self.name(node), self.hash(node))
    }

    pub fn roots(&self) -> &[NodeIndex] {
        &self.roots
    }

    pub fn root_specs(&self) -> impl Iterator<Item = &Spec> {
        self.roots.iter().map(|&r| &self.graph[r])
    }

    pub fn node(&self, node: NodeIndex) -> &Spec {
        &self.graph[node]
    }

    pub fn hash(&self, node: NodeIndex) -> &str {
        self.graph[node].dag_hash().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// All nodes, sorted by name then hash.
    pub fn nodes(&self) -> Vec<NodeIndex> {
        let mut nodes: Vec<_> = self.graph.node_indices().collect();
        nodes.sort_by(|a, b| self.sort_key(*a).cmp(&self.sort_key(*b)));
        nodes
    }

    /// Whether the node came from an installed or previously fixed set.
    pub fn is_reused(&self, node: NodeIndex) -> bool {
        self.reused.contains(self.hash(node))
    }

    pub(crate) fn mark_all_reused(&mut self) {
        self.reused = self.by_hash.keys().cloned().collect();
    }

    /// Nodes named `name`, sorted by hash.
    pub fn find(&self, name: &str) -> Vec<NodeIndex> {
        let mut found: Vec<_> = self
            .graph
            .node_indices()
            .filter(|&n| self.name(n) == name)
            .collect();
        found.sort_by(|a, b| self.hash(*a).cmp(self.hash(*b)));
        found
    }

    /// The node whose hash starts with `prefix`, if exactly one does.
    pub fn find_hash(&self, prefix: &str) -> Option<NodeIndex> {
        if let Some(&node) = self.by_hash.get(prefix) {
            return Some(node);
        }
        let mut matches = self
            .by_hash
            .iter()
            .filter(|(hash, _)| hash.starts_with(prefix))
            .map(|(_, &node)| node);
        match (matches.next(), matches.next()) {
            (Some(node), None) => Some(node),
            _ => None,
        }
    }

    /// Direct dependencies with their edge labels, sorted by name.
    pub fn dependencies(&self, node: NodeIndex) -> Vec<(NodeIndex, &DependencyEdge)> {
        let mut deps: Vec<_> = self
            .graph
            .edges(node)
            .map(|e| (e.target(), e.weight()))
            .collect();
        deps.sort_by(|a, b| self.sort_key(a.0).cmp(&self.sort_key(b.0)));
        deps
    }

    /// Direct dependents with their edge labels, sorted by name.
    pub fn dependents(&self, node: NodeIndex) -> Vec<(NodeIndex, &DependencyEdge)> {
        let mut parents: Vec<_> = self
            .graph
            .edges_directed(node, Direction::Incoming)
            .map(|e| (e.source(), e.weight()))
            .collect();
        parents.sort_by(|a, b| self.sort_key(a.0).cmp(&self.sort_key(b.0)));
        parents
    }

    /// Every node before its dependencies.
    ///
    /// This is the reverse post-order of a depth-first walk from the roots
    /// that visits children by name, so a chain of dependencies stays
    /// together and the deepest leaves come last.
    pub fn topological_order(&self) -> Vec<NodeIndex> {
        let mut visited = FxHashSet::default();
        let mut post = Vec::with_capacity(self.len());
        let mut starts: Vec<NodeIndex> = self.roots.iter().rev().copied().collect();
        // Nodes no root reaches still get an order.
        let mut rest = self.nodes();
        rest.reverse();
        starts.extend(rest);

        for start in starts {
            if !visited.insert(start) {
                continue;
            }
            let mut stack = vec![(start, self.children(start), 0usize)];
            while let Some((node, children, next)) = stack.last_mut() {
                if let Some(&child) = children.get(*next) {
                    *next += 1;
                    if visited.insert(child) {
                        let grandchildren = self.children(child);
                        stack.push((child, grandchildren, 0));
                    }
                } else {
                    post.push(*node);
                    stack.pop();
                }
            }
        }
        post.reverse();
        post
    }

    fn children(&self, node: NodeIndex) -> Vec<NodeIndex> {
        self.dependencies(node).into_iter().map(|(n, _)| n).collect()
    }

    /// Dependencies before dependents.
    pub fn install_order(&self) -> Vec<NodeIndex> {
        let mut order = self.topological_order();
        order.reverse();
        order
    }

    /// Whether `node` was concretized with the given build system.
    pub fn build_system(&self, node: NodeIndex) -> Option<BuildSystem> {
        BuildSystem::of(&self.graph[node])
    }

    pub fn phases(&self, node: NodeIndex) -> &'static [&'static str] {
        self.build_system(node).map_or(&[], |b| b.phases())
    }

    fn provides(&self, node: NodeIndex, virtual_name: &str) -> bool {
        self.graph
            .edges_directed(node, Direction::Incoming)
            .any(|e| e.weight().virtuals.contains(virtual_name))
    }

    fn node_matches(&self, node: NodeIndex, spec: &Spec) -> bool {
        let name_ok = match spec.name() {
            None => true,
            Some(name) => name == self.name(node) || self.provides(node, name),
        };
        name_ok && self.graph[node].satisfies_attributes(spec)
    }

    /// Whether `node` satisfies `spec`, searching the node's dependencies
    /// for `^dep` constraints.
    pub fn satisfies(&self, node: NodeIndex, spec: &Spec) -> bool {
        if !self.node_matches(node, spec) {
            return false;
        }
        if spec.dependencies().is_empty() {
            return true;
        }
        let below = self.reachable(node);
        spec.dependencies()
            .iter()
            .all(|dep| below.iter().any(|&n| n != node && self.node_matches(n, dep)))
    }

    fn reachable(&self, node: NodeIndex) -> Vec<NodeIndex> {
        let mut dfs = Dfs::new(&self.graph, node);
        let mut out = Vec::new();
        while let Some(n) = dfs.next(&self.graph) {
            out.push(n);
        }
        out
    }

    /// The DAG rooted at `root`.
    pub fn subdag(&self, root: NodeIndex) -> ConcreteDag {
        let mut sub = ConcreteDag::default();
        let mut map = FxHashMap::default();
        for n in self.reachable(root) {
            let idx = sub.graph.add_node(self.graph[n].clone());
            sub.by_hash.insert(self.hash(n).to_string(), idx);
            if self.is_reused(n) {
                sub.reused.insert(self.hash(n).to_string());
            }
            map.insert(n, idx);
        }
        for (&n, &idx) in &map {
            for e in self.graph.edges(n) {
                if let Some(&child) = map.get(&e.target()) {
                    sub.graph.add_edge(idx, child, e.weight().clone());
                }
            }
        }
        if let Some(&r) = map.get(&root) {
            sub.roots.push(r);
        }
        sub
    }

    /// Merge `other` into `self`, sharing nodes with equal hashes.
    ///
    /// Returns the indices in `self` of `other`'s roots, in order.
    pub fn merge(&mut self, other: &ConcreteDag) -> Vec<NodeIndex> {
        let mut map = FxHashMap::default();
        for n in other.graph.node_indices() {
            let hash = other.hash(n);
            let idx = match self.by_hash.get(hash) {
                Some(&idx) => idx,
                None => {
                    let idx = self.graph.add_node(other.graph[n].clone());
                    self.by_hash.insert(hash.to_string(), idx);
                    idx
                }
            };
            if other.is_reused(n) {
                self.reused.insert(hash.to_string());
            }
            map.insert(n, idx);
        }
        for e in other.graph.edge_references() {
            self.add_edge(map[&e.source()], map[&e.target()], e.weight().clone());
        }
        other
            .roots
            .iter()
            .map(|r| {
                let idx = map[r];
                self.add_root(idx);
                idx
            })
            .collect()
    }

    /// Render the roots as an indented `^` tree. Shared nodes are printed
    /// once, at their first occurrence.
    pub fn tree(&self, options: &TreeOptions) -> String {
        let mut out = String::new();
        let mut seen = FxHashSet::default();
        for &root in &self.roots {
            self.write_tree(root, None, 0, options, &mut seen, &mut out);
        }
        out
    }

    fn write_tree(
        &self,
        node: NodeIndex,
        edge: Option<&DependencyEdge>,
        depth: usize,
        options: &TreeOptions,
        seen: &mut FxHashSet<NodeIndex>,
        out: &mut String,
    ) {
        if !seen.insert(node) {
            return;
        }
        if options.install_status {
            out.push_str(if self.graph[node].is_external() {
                "[e]  "
            } else if self.is_reused(node) {
                "[+]  "
            } else {
                " -   "
            });
        }
        if options.hashes {
            let hash = self.hash(node);
            out.push_str(&hash[..options.hash_length.min(hash.len())]);
            out.push_str("  ");
        }
        if options.deptypes {
            let column = edge.map_or_else(|| DepTypes::empty().column(), |e| e.deptypes.column());
            out.push_str(&column);
            out.push_str("  ");
        }
        out.push_str(&"    ".repeat(depth));
        if depth > 0 {
            out.push('^');
        }
        out.push_str(&self.graph[node].format_node());
        out.push('\n');
        for (child, edge) in self.dependencies(node) {
            self.write_tree(child, Some(edge), depth + 1, options, seen, out);
        }
    }

    /// Serialize to the JSON document form.
    pub fn to_json(&self) -> Result<serde_json::Value, DagDocumentError> {
        let nodes = self
            .topological_order()
            .into_iter()
            .map(|n| self.node_record(n))
            .collect();
        let document = Document {
            spec: DocumentBody {
                meta: Meta {
                    version: DOCUMENT_VERSION,
                },
                roots: self.roots.iter().map(|&r| self.hash(r).to_string()).collect(),
                nodes,
            },
        };
        Ok(serde_json::to_value(document)?)
    }

    pub fn to_json_string(&self) -> Result<String, DagDocumentError> {
        Ok(serde_json::to_string_pretty(&self.to_json()?)?)
    }

    fn node_record(&self, node: NodeIndex) -> NodeRecord {
        let spec = &self.graph[node];
        let parameters = spec
            .variants()
            .iter()
            .map(|v| {
                let value = match (v.as_bool(), v.is_multi(), v.single_value()) {
                    (Some(b), _, _) => ParameterValue::Bool(b),
                    (None, false, Some(s)) => ParameterValue::One(s.to_string()),
                    _ => ParameterValue::Many(v.values().iter().cloned().collect()),
                };
                (v.name().to_string(), value)
            })
            .collect();
        NodeRecord {
            name: spec.name().unwrap_or_default().to_string(),
            version: spec.version().map(|v| v.to_string()).unwrap_or_default(),
            compiler: spec.compiler().map(|c| CompilerRecord {
                name: c.name.clone(),
                version: c.version().map(|v| v.to_string()).unwrap_or_default(),
            }),
            parameters,
            dependencies: self
                .dependencies(node)
                .into_iter()
                .map(|(child, edge)| DependencyRecord {
                    name: self.name(child).to_string(),
                    hash: self.hash(child).to_string(),
                    parameters: EdgeParameters {
                        deptypes: edge.deptypes.names().into_iter().map(String::from).collect(),
                        virtuals: edge.virtuals.iter().cloned().collect(),
                    },
                })
                .collect(),
            external: spec.external_prefix().map(|path| ExternalRecord {
                path: path.to_path_buf(),
            }),
            hash: self.hash(node).to_string(),
        }
    }

    /// Read a DAG from its JSON document form. Stored hashes are kept.
    pub fn from_json(text: &str) -> Result<Self, DagDocumentError> {
        let document: Document = serde_json::from_str(text)?;
        if document.spec.meta.version != DOCUMENT_VERSION {
            return Err(DagDocumentError::UnsupportedVersion(document.spec.meta.version));
        }
        let body = document.spec;

        let mut positions = BTreeMap::new();
        let mut nodes = Vec::with_capacity(body.nodes.len());
        for (i, record) in body.nodes.iter().enumerate() {
            positions.insert(record.hash.as_str(), i);
            nodes.push(record.to_spec()?);
        }
        let mut edges = Vec::new();
        for (i, record) in body.nodes.iter().enumerate() {
            for dep in &record.dependencies {
                let Some(&j) = positions.get(dep.hash.as_str()) else {
                    return Err(DagDocumentError::MissingDependency {
                        node: record.name.clone(),
                        hash: dep.hash.clone(),
                    });
                };
                let deptypes = DepTypes::from_names(&dep.parameters.deptypes)
                    .unwrap_or(DepTypes::DEFAULT);
                let edge = DependencyEdge {
                    deptypes,
                    virtuals: dep.parameters.virtuals.iter().cloned().collect(),
                };
                edges.push((i, j, edge));
            }
        }
        let mut roots = Vec::new();
        for hash in &body.roots {
            match positions.get(hash.as_str()) {
                Some(&i) => roots.push(i),
                None => {
                    return Err(DagDocumentError::MissingDependency {
                        node: "<root>".into(),
                        hash: hash.clone(),
                    });
                }
            }
        }
        let mut dag = Self::from_parts(nodes, edges, roots)?;
        dag.reused.clear();
        Ok(dag)
    }

    pub fn load(path: &Path) -> Result<Self, DagDocumentError> {
        let text = std::fs::read_to_string(path).map_err(|source| DagDocumentError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }
}

// --- JSON document ---

#[derive(Debug, Serialize, Deserialize)]
struct Document {
    spec: DocumentBody,
}

#[derive(Debug, Serialize, Deserialize)]
struct DocumentBody {
    #[serde(rename = "_meta")]
    meta: Meta,
    #[serde(default)]
    roots: Vec<String>,
    nodes: Vec<NodeRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Meta {
    version: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct NodeRecord {
    name: String,
    version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    compiler: Option<CompilerRecord>,
    #[serde(default)]
    parameters: BTreeMap<String, ParameterValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    dependencies: Vec<DependencyRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    external: Option<ExternalRecord>,
    hash: String,
}

impl NodeRecord {
    fn to_spec(&self) -> Result<Spec, DagDocumentError> {
        let compiler = match &self.compiler {
            Some(c) => Some(CompilerSpec::concrete(&c.name, Version::parse(&c.version)?)),
            None => None,
        };
        let mut variants = VariantMap::new();
        for (name, value) in &self.parameters {
            variants.insert(match value {
                ParameterValue::Bool(b) => VariantValue::boolean(name, *b),
                ParameterValue::One(s) => VariantValue::single(name, s),
                ParameterValue::Many(v) => VariantValue::multi(name, v.iter().cloned()),
            });
        }
        let mut spec =
            Spec::concrete_node(&self.name, Version::parse(&self.version)?, compiler, variants);
        if let Some(external) = &self.external {
            spec.set_external_prefix(external.path.clone());
        }
        spec.set_dag_hash(self.hash.clone());
        Ok(spec)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ExternalRecord {
    path: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct CompilerRecord {
    name: String,
    version: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum ParameterValue {
    Bool(bool),
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Serialize, Deserialize)]
struct DependencyRecord {
    name: String,
    hash: String,
    parameters: EdgeParameters,
}

#[derive(Debug, Serialize, Deserialize)]
struct EdgeParameters {
    deptypes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    virtuals: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, version: &str) -> Spec {
        let mut variants = VariantMap::new();
        variants.insert(VariantValue::single("build_system", "generic"));
        Spec::concrete_node(name, Version::parse(version).unwrap(), None, variants)
    }

    /// a -> b -> d, a -> c -> d
    fn diamond() -> ConcreteDag {
        let nodes = vec![node("a", "1.0"), node("b", "1.0"), node("c", "2.0"), node("d", "3.1")];
        let link = || DependencyEdge::new(DepTypes::DEFAULT);
        let edges = vec![(0, 1, link()), (0, 2, link()), (1, 3, link()), (2, 3, link())];
        ConcreteDag::from_parts(nodes, edges, vec![0]).unwrap()
    }

    fn names(dag: &ConcreteDag, order: &[NodeIndex]) -> Vec<String> {
        order
            .iter()
            .map(|&n| dag.node(n).name().unwrap().to_string())
            .collect()
    }

    #[test]
    fn topological_order_is_dependents_first() {
        let dag = diamond();
        assert_eq!(names(&dag, &dag.topological_order()), ["a", "c", "b", "d"]);
        assert_eq!(names(&dag, &dag.install_order()), ["d", "b", "c", "a"]);
    }

    #[test]
    fn hashes_are_content_addressed() {
        let a = diamond();
        let b = diamond();
        let ha: Vec<_> = a.nodes().iter().map(|&n| a.hash(n).to_string()).collect();
        let hb: Vec<_> = b.nodes().iter().map(|&n| b.hash(n).to_string()).collect();
        assert_eq!(ha, hb);
        assert!(ha.iter().all(|h| h.len() == HASH_LENGTH));

        // A different leaf changes every ancestor's hash.
        let nodes = vec![node("a", "1.0"), node("b", "1.0"), node("c", "2.0"), node("d", "3.2")];
        let link = || DependencyEdge::new(DepTypes::DEFAULT);
        let edges = vec![(0, 1, link()), (0, 2, link()), (1, 3, link()), (2, 3, link())];
        let c = ConcreteDag::from_parts(nodes, edges, vec![0]).unwrap();
        assert_ne!(a.hash(a.roots()[0]), c.hash(c.roots()[0]));
    }

    #[test]
    fn duplicate_edges_are_unioned() {
        let nodes = vec![node("a", "1.0"), node("cmake", "3.27")];
        let edges = vec![
            (0, 1, DependencyEdge::new(DepTypes::BUILD)),
            (0, 1, DependencyEdge::new(DepTypes::LINK)),
        ];
        let dag = ConcreteDag::from_parts(nodes, edges, vec![0]).unwrap();
        let deps = dag.dependencies(dag.roots()[0]);
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].1.deptypes, DepTypes::BUILD | DepTypes::LINK);
    }

    #[test]
    fn cycles_are_rejected() {
        let nodes = vec![node("a", "1.0"), node("b", "1.0")];
        let link = || DependencyEdge::new(DepTypes::DEFAULT);
        let err = ConcreteDag::from_parts(nodes, vec![(0, 1, link()), (1, 0, link())], vec![0])
            .unwrap_err();
        assert_eq!(err.cycle, ["a", "b", "a"]);
    }

    #[test]
    fn satisfies_searches_subtree() {
        let dag = diamond();
        let root = dag.roots()[0];
        assert!(dag.satisfies(root, &"a@1 ^d@3".parse().unwrap()));
        assert!(dag.satisfies(root, &"a ^b ^c@2".parse().unwrap()));
        assert!(!dag.satisfies(root, &"a ^d@4".parse().unwrap()));
        assert!(!dag.satisfies(root, &"a ^e".parse().unwrap()));
        let b = dag.find("b")[0];
        assert!(!dag.satisfies(b, &"b ^c".parse().unwrap()));
    }

    #[test]
    fn json_round_trip_keeps_hashes() {
        let dag = diamond();
        let value = dag.to_json().unwrap();
        assert_eq!(value["spec"]["_meta"]["version"], DOCUMENT_VERSION);
        assert_eq!(value["spec"]["nodes"].as_array().map(Vec::len), Some(4));
        let text = dag.to_json_string().unwrap();
        let back = ConcreteDag::from_json(&text).unwrap();
        assert_eq!(back.len(), 4);
        for n in dag.nodes() {
            let other = back.find_hash(dag.hash(n)).unwrap();
            assert_eq!(back.node(other), dag.node(n));
        }
        assert_eq!(back.hash(back.roots()[0]), dag.hash(dag.roots()[0]));
    }

    #[test]
    fn external_prefixes_are_hashed_and_stored() {
        let mut cmake = node("cmake", "3.27");
        cmake.set_external_prefix(PathBuf::from("/usr"));
        let external = ConcreteDag::from_parts(vec![cmake], Vec::new(), vec![0]).unwrap();
        let built = ConcreteDag::from_parts(vec![node("cmake", "3.27")], Vec::new(), vec![0]).unwrap();
        let root = external.roots()[0];
        assert_ne!(external.hash(root), built.hash(built.roots()[0]));

        let options = TreeOptions {
            install_status: true,
            ..TreeOptions::default()
        };
        assert!(external.tree(&options).starts_with("[e]  cmake@3.27"));

        let back = ConcreteDag::from_json(&external.to_json_string().unwrap()).unwrap();
        let cmake = back.node(back.roots()[0]);
        assert_eq!(cmake.external_prefix(), Some(Path::new("/usr")));
        assert_eq!(back.hash(back.roots()[0]), external.hash(root));
    }

    #[test]
    fn merge_shares_equal_nodes() {
        let mut dag = diamond();
        let sub = dag.subdag(dag.find("b")[0]);
        assert_eq!(sub.len(), 2);
        let roots = dag.merge(&sub);
        assert_eq!(dag.len(), 4);
        assert_eq!(roots, dag.find("b"));
        assert_eq!(dag.roots().len(), 2);
    }

    #[test]
    fn tree_prints_shared_nodes_once() {
        let dag = diamond();
        let tree = dag.tree(&TreeOptions {
            deptypes: true,
            ..TreeOptions::default()
        });
        insta::assert_snapshot!(tree, @r"
        [    ]  a@1.0 build_system=generic
        [bl  ]      ^b@1.0 build_system=generic
        [bl  ]          ^d@3.1 build_system=generic
        [bl  ]      ^c@2.0 build_system=generic
        ");
    }
}
