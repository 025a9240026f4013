//! Bridge between the spec model and resolvo's [`DependencyProvider`] trait.
//!
//! [`SpecDependencyProvider`] eagerly enumerates the candidate nodes of every
//! package reachable from the requested roots, interns them into a
//! [`SpecPool`] and implements both [`Interner`] and [`DependencyProvider`]
//! so that [`resolvo::Solver`] can pick one node per package.
//!
//! [`DependencyProvider`]: resolvo::DependencyProvider
//! [`Interner`]: resolvo::Interner

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use itertools::Itertools;
use petgraph::graph::NodeIndex;
use resolvo::{
    ArenaId, Candidates, Condition, ConditionId, ConditionalRequirement, Dependencies,
    HintDependenciesAvailable, KnownDependencies, NameId, Requirement, SolvableId, SolverCache,
    StringId, VersionSetId, VersionSetUnionId,
};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace, warn};

use crate::compiler::CompilerSpec;
use crate::config::Config;
use crate::criteria::{CriteriaBuilder, CriteriaReport};
use crate::dag::{ConcreteDag, DependencyEdge};
use crate::error::{ConcretizeError, UnsatisfiableSpecError};
use crate::installed::{InstalledPolicy, InstalledSet};
use crate::package::{DeclaredVersion, PackageRecipe};
use crate::pool::{
    CandidateNode, NodeCosts, PackageName, PlannedEdge, SolvableRecord, SpecConstraint, SpecPool,
    VersionSetKind, VirtualChoice,
};
use crate::repository::PackageRepository;
use crate::requirements::{RequirementGroup, evaluate_all};
use crate::spec::Spec;
use crate::variant::{AllowedValues, VariantDefinition, VariantMap, VariantValue};
use crate::version::{Version, VersionList};

/// Above this many variant assignments per (version, compiler), domains
/// shrink to defaults plus explicitly mentioned values.
const MAX_ASSIGNMENTS: usize = 4096;

/// Cap on the value sets tried for one multi-valued variant.
const MAX_MULTI_VALUES: usize = 8;

/// A root the caller asked for, and the version sets that express it.
#[derive(Debug, Clone)]
pub struct RootRequest {
    pub spec: Spec,
    /// The package (or virtual) whose selected node is the root.
    pub target: PackageName,
    pub(crate) requirements: Vec<VersionSetId>,
}

/// Size of the encoded problem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProviderStats {
    pub packages: usize,
    pub virtuals: usize,
    pub solvables: usize,
    pub version_sets: usize,
    pub excluded: usize,
}

/// A solved selection turned into a concrete graph.
#[derive(Debug, Clone)]
pub(crate) struct SolvedGraph {
    pub(crate) dag: ConcreteDag,
    /// Node of each [`RootRequest`], in request order.
    pub(crate) roots: Vec<NodeIndex>,
    pub(crate) criteria: CriteriaReport,
    /// `(virtual, provider)` pairs used by edges of the graph.
    pub(crate) providers: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NameKind {
    Package,
    Virtual,
}

/// Mutable state threaded through candidate and dependency construction.
struct BuildContext<'a> {
    repo: &'a dyn PackageRepository,
    config: &'a Config,
    installed: &'a InstalledSet,
    pool: SpecPool,
    candidates: FxHashMap<NameId, Vec<SolvableId>>,
    dependencies: FxHashMap<SolvableId, KnownDependencies>,
    excluded: FxHashMap<NameId, Vec<(SolvableId, StringId)>>,
    favored: FxHashMap<NameId, SolvableId>,
    locked: FxHashMap<NameId, SolvableId>,
    provider_sets: BTreeMap<(String, String), VersionSetId>,
    /// Reachable package names, including installed-only ones.
    packages: BTreeSet<String>,
    virtuals: BTreeSet<String>,
    /// Variant values mentioned anywhere, per package.
    mentions: BTreeMap<String, Vec<VariantValue>>,
}

/// Dependency provider bridging recipes and configuration to the resolvo
/// solver.
///
/// Construction walks every package reachable from the roots, enumerates
/// one solvable per (version, compiler, variant assignment), adds one
/// solvable per installed node, and pre-computes [`KnownDependencies`] for
/// each of them. Virtual packages get one choice solvable per provider
/// declaration. The resulting provider is read-only; the solver clones it
/// to evaluate alternatives.
#[derive(Clone)]
pub struct SpecDependencyProvider {
    pub(crate) pool: SpecPool,
    /// Pre-computed candidates per name.
    candidates: FxHashMap<NameId, Vec<SolvableId>>,
    /// Pre-computed dependencies per solvable.
    dependencies: FxHashMap<SolvableId, KnownDependencies>,
    /// Candidates removed from the solve, with the reason shown in
    /// unsolvable explanations.
    excluded: FxHashMap<NameId, Vec<(SolvableId, StringId)>>,
    /// SolvableId to favor per NameId (installed, soft preference).
    favored: FxHashMap<NameId, SolvableId>,
    /// SolvableId to lock per NameId (installed, hard constraint).
    locked: FxHashMap<NameId, SolvableId>,
    /// `virtual provided by provider` version sets, used to force
    /// alternatives.
    provider_sets: BTreeMap<(String, String), VersionSetId>,
    roots: Vec<RootRequest>,
    stats: ProviderStats,
}

impl SpecDependencyProvider {
    /// Build a provider for `roots`.
    ///
    /// Input errors (unknown packages, variants or hashes, and root versions
    /// no declared version satisfies) are reported here, before any solving.
    pub fn build(
        repo: &dyn PackageRepository,
        config: &Config,
        installed: &InstalledSet,
        roots: &[Spec],
    ) -> Result<Self, ConcretizeError> {
        let mut ctx = BuildContext {
            repo,
            config,
            installed,
            pool: SpecPool::new(),
            candidates: FxHashMap::default(),
            dependencies: FxHashMap::default(),
            excluded: FxHashMap::default(),
            favored: FxHashMap::default(),
            locked: FxHashMap::default(),
            provider_sets: BTreeMap::new(),
            packages: BTreeSet::new(),
            virtuals: BTreeSet::new(),
            mentions: BTreeMap::new(),
        };

        // Phase 1: validate roots and collect every reachable name.
        for root in roots {
            ctx.check_root(root)?;
        }
        ctx.collect_reachable(roots)?;
        for name in &ctx.packages {
            ctx.check_externals(name)?;
        }
        ctx.collect_mentions(roots);

        // Phase 2: intern candidate nodes, then virtual choices.
        let packages: Vec<String> = ctx.packages.iter().cloned().collect();
        for name in &packages {
            ctx.add_package_candidates(name);
        }
        let virtuals: Vec<String> = ctx.virtuals.iter().cloned().collect();
        for name in &virtuals {
            ctx.add_virtual_choices(name);
        }

        // Phase 3: convert recipe declarations into requirements.
        for index in 0..ctx.pool.solvable_count() {
            let sid = SolvableId::from_usize(index);
            if ctx.pool.resolve_solvable(sid).as_node().is_some() {
                ctx.add_node_dependencies(sid);
            }
        }

        // Phase 4: root requirements.
        let roots = roots
            .iter()
            .map(|root| ctx.root_request(root))
            .collect::<Result<Vec<_>, _>>()?;

        let stats = ProviderStats {
            packages: ctx.packages.len(),
            virtuals: ctx.virtuals.len(),
            solvables: ctx.pool.solvable_count(),
            version_sets: ctx.pool.version_set_count(),
            excluded: ctx.excluded.values().map(Vec::len).sum(),
        };
        debug!(
            packages = stats.packages,
            virtuals = stats.virtuals,
            solvables = stats.solvables,
            version_sets = stats.version_sets,
            excluded = stats.excluded,
            "built dependency provider"
        );

        Ok(Self {
            pool: ctx.pool,
            candidates: ctx.candidates,
            dependencies: ctx.dependencies,
            excluded: ctx.excluded,
            favored: ctx.favored,
            locked: ctx.locked,
            provider_sets: ctx.provider_sets,
            roots,
            stats,
        })
    }

    /// Access the underlying pool (for inspecting solution results).
    pub fn pool(&self) -> &SpecPool {
        &self.pool
    }

    pub fn roots(&self) -> &[RootRequest] {
        &self.roots
    }

    pub fn stats(&self) -> ProviderStats {
        self.stats
    }

    /// Requirements for [`resolvo::Problem::requirements`], covering every
    /// root.
    pub fn root_requirements(&self) -> Vec<ConditionalRequirement> {
        self.roots
            .iter()
            .flat_map(|root| root.requirements.iter().map(|&vs| requirement(None, vs)))
            .collect()
    }

    /// The version set forcing `provider` for `virtual_name`.
    pub fn provider_constraint(&self, virtual_name: &str, provider: &str) -> Option<VersionSetId> {
        self.provider_sets
            .get(&(virtual_name.to_string(), provider.to_string()))
            .copied()
    }

    /// A constraint forbidding every node of `package` at exactly `version`.
    pub(crate) fn version_exclusion(&mut self, package: &str, version: &Version) -> Option<VersionSetId> {
        let name = PackageName::Package(package.to_string());
        self.pool.lookup_name(&name)?;
        let pinned = Spec::anonymous().with_versions(VersionList::exact(version.clone()));
        Some(
            self.pool
                .intern_version_set(SpecConstraint::new(name, VersionSetKind::Node(pinned)).inverted()),
        )
    }

    /// Providers with at least one choice for `virtual_name`, in preference
    /// order.
    pub fn providers_of(&self, virtual_name: &str) -> Vec<&str> {
        let Some(name_id) = self
            .pool
            .lookup_name(&PackageName::Virtual(virtual_name.to_string()))
        else {
            return Vec::new();
        };
        let mut choices: Vec<&VirtualChoice> = self
            .candidates
            .get(&name_id)
            .into_iter()
            .flatten()
            .filter_map(|&sid| self.pool.resolve_solvable(sid).as_choice())
            .collect();
        choices.sort_by_key(|c| c.provider_weight);
        choices.into_iter().map(|c| c.provider.as_str()).dedup().collect()
    }

    /// Assemble the concrete graph of a solution.
    ///
    /// Edge conditions are evaluated against the selection, virtual edges
    /// are redirected to the chosen provider, and nodes no root reaches are
    /// dropped.
    pub(crate) fn build_dag(&self, solution: &[SolvableId]) -> Result<SolvedGraph, ConcretizeError> {
        let by_name: FxHashMap<NameId, SolvableId> = solution
            .iter()
            .map(|&sid| (self.pool.solvable_name(sid), sid))
            .collect();

        let mut index: FxHashMap<SolvableId, usize> = FxHashMap::default();
        let mut selected: Vec<SolvableId> = Vec::new();
        let mut edges: Vec<(usize, usize, DependencyEdge)> = Vec::new();
        let mut providers: BTreeMap<String, (String, usize)> = BTreeMap::new();
        let mut queue: VecDeque<SolvableId> = VecDeque::new();

        let mut visit = |sid: SolvableId, selected: &mut Vec<SolvableId>, queue: &mut VecDeque<SolvableId>| {
            *index.entry(sid).or_insert_with(|| {
                selected.push(sid);
                queue.push_back(sid);
                selected.len() - 1
            })
        };

        let mut root_indices = Vec::with_capacity(self.roots.len());
        for root in &self.roots {
            let Some(sid) = self.resolve_target(&by_name, &root.target) else {
                return Err(UnsatisfiableSpecError::Unsolvable {
                    specs: root.spec.to_string(),
                    explanation: format!("the solution selected no {}", root.target),
                }
                .into());
            };
            root_indices.push(visit(sid, &mut selected, &mut queue));
        }

        while let Some(sid) = queue.pop_front() {
            let Some(node) = self.pool.resolve_solvable(sid).as_node() else {
                continue;
            };
            let from = visit(sid, &mut selected, &mut queue);
            for edge in &node.edges {
                if let Some(condition) = edge.condition {
                    if !self.holds(&by_name, condition) {
                        continue;
                    }
                }
                let Some(child) = self.resolve_target(&by_name, &edge.target) else {
                    warn!(node = %node.spec, target = %edge.target, "dependency missing from solution");
                    continue;
                };
                if let PackageName::Virtual(v) = &edge.target {
                    if let Some(choice) = self.chosen(&by_name, &edge.target) {
                        providers
                            .entry(v.clone())
                            .or_insert_with(|| (choice.provider.clone(), choice.provider_weight));
                    }
                }
                let to = visit(child, &mut selected, &mut queue);
                edges.push((
                    from,
                    to,
                    DependencyEdge {
                        deptypes: edge.deptypes,
                        virtuals: edge.virtuals.clone(),
                    },
                ));
            }
        }

        let criteria = self.score(&selected, &providers);
        let nodes = selected
            .iter()
            .filter_map(|&sid| self.pool.resolve_solvable(sid).as_node())
            .map(|node| node.spec.clone())
            .collect();
        let dag = ConcreteDag::from_parts(nodes, edges, root_indices.clone())?;
        trace!(nodes = dag.len(), "assembled solution graph");

        Ok(SolvedGraph {
            dag,
            roots: root_indices.into_iter().map(NodeIndex::new).collect(),
            criteria,
            providers: providers
                .into_iter()
                .map(|(v, (provider, _))| (v, provider))
                .collect(),
        })
    }

    fn chosen<'s>(
        &'s self,
        by_name: &FxHashMap<NameId, SolvableId>,
        target: &PackageName,
    ) -> Option<&'s VirtualChoice> {
        let sid = by_name.get(&self.pool.lookup_name(target)?)?;
        self.pool.resolve_solvable(*sid).as_choice()
    }

    /// The selected node standing for `target`, following virtual choices
    /// to their provider.
    fn resolve_target(
        &self,
        by_name: &FxHashMap<NameId, SolvableId>,
        target: &PackageName,
    ) -> Option<SolvableId> {
        let sid = *by_name.get(&self.pool.lookup_name(target)?)?;
        match self.pool.resolve_solvable(sid) {
            SolvableRecord::Node(_) => Some(sid),
            SolvableRecord::Choice(choice) => {
                let provider = PackageName::Package(choice.provider.clone());
                by_name.get(&self.pool.lookup_name(&provider)?).copied()
            }
        }
    }

    fn holds(&self, by_name: &FxHashMap<NameId, SolvableId>, version_set: VersionSetId) -> bool {
        let name = self.pool.version_set_name(version_set);
        by_name.get(&name).is_some_and(|&sid| {
            self.pool
                .resolve_version_set(version_set)
                .matches(self.pool.resolve_solvable(sid))
        })
    }

    fn score(
        &self,
        selected: &[SolvableId],
        providers: &BTreeMap<String, (String, usize)>,
    ) -> CriteriaReport {
        let mut builder = CriteriaBuilder::new();
        let mut reused_names = FxHashSet::default();
        let mut any_compiler = false;
        for node in selected
            .iter()
            .filter_map(|&sid| self.pool.resolve_solvable(sid).as_node())
        {
            let reused = node.installed.is_some() || node.spec.is_external();
            let costs = node.costs;
            if reused {
                if let Some(name) = node.spec.name() {
                    reused_names.insert(name.to_string());
                }
            }
            any_compiler |= node.spec.compiler().is_some();
            builder.add(0, reused, usize::from(costs.built));
            builder.add(1, reused, costs.requirement_weight);
            builder.add(2, reused, usize::from(costs.deprecated));
            builder.add(3, reused, costs.version_weight);
            builder.add(4, reused, costs.non_default_variants);
            builder.add(5, reused, costs.compiler_weight);
            builder.add(7, reused, 1);
            builder.add(8, reused, costs.version_age);
        }
        for (provider, weight) in providers.values() {
            builder.add(6, reused_names.contains(provider), *weight);
        }
        if providers.is_empty() {
            builder.not_applicable(6);
        }
        if !any_compiler {
            builder.not_applicable(5);
        }
        builder.finish()
    }
}

impl BuildContext<'_> {
    fn classify(&self, name: &str) -> Option<NameKind> {
        if self.repo.recipe(name).is_some() || !self.installed.dag().find(name).is_empty() {
            Some(NameKind::Package)
        } else if self.repo.is_virtual(name) {
            Some(NameKind::Virtual)
        } else {
            None
        }
    }

    fn check_root(&self, root: &Spec) -> Result<(), ConcretizeError> {
        if let Some(prefix) = root.requested_hash() {
            let dag = self.installed.dag();
            let node = dag
                .find_hash(prefix)
                .ok_or_else(|| ConcretizeError::UnknownHash(prefix.to_string()))?;
            if !dag.satisfies(node, &root.copy()) {
                return Err(ConcretizeError::UnknownHash(prefix.to_string()));
            }
            return Ok(());
        }
        let name = root
            .name()
            .ok_or_else(|| ConcretizeError::UnknownPackage(root.to_string()))?;
        self.check_term(name, root)?;
        for dep in root.dependencies() {
            let dep_name = dep
                .name()
                .ok_or_else(|| ConcretizeError::UnknownPackage(dep.to_string()))?;
            self.check_term(dep_name, dep)?;
        }
        Ok(())
    }

    /// Externals must name variants the recipe declares, with valid values.
    fn check_externals(&self, name: &str) -> Result<(), ConcretizeError> {
        let externals = self.config.externals_for(name);
        if externals.is_empty() {
            return Ok(());
        }
        let recipe = self
            .repo
            .recipe(name)
            .ok_or_else(|| ConcretizeError::UnknownPackage(name.to_string()))?;
        for value in externals.iter().flat_map(|e| e.spec.variants().iter()) {
            let def = recipe
                .variant(value.name())
                .ok_or_else(|| ConcretizeError::UnknownVariant {
                    package: name.to_string(),
                    variant: value.name().to_string(),
                })?;
            if let Some(bad) = def.invalid_value(value) {
                return Err(ConcretizeError::InvalidVariantValue {
                    package: name.to_string(),
                    variant: value.name().to_string(),
                    value: bad.to_string(),
                });
            }
        }
        Ok(())
    }

    fn check_term(&self, name: &str, spec: &Spec) -> Result<(), ConcretizeError> {
        let installed = self.installed.dag().find(name);
        let Some(recipe) = self.repo.recipe(name) else {
            if self.classify(name).is_some() {
                return Ok(());
            }
            return Err(ConcretizeError::UnknownPackage(name.to_string()));
        };
        for value in spec.variants().iter() {
            let def = recipe
                .variant(value.name())
                .ok_or_else(|| ConcretizeError::UnknownVariant {
                    package: name.to_string(),
                    variant: value.name().to_string(),
                })?;
            if let Some(bad) = def.invalid_value(value) {
                return Err(ConcretizeError::InvalidVariantValue {
                    package: name.to_string(),
                    variant: value.name().to_string(),
                    value: bad.to_string(),
                });
            }
        }
        let versions = spec.versions();
        if !versions.is_any() {
            let declared = recipe.versions().iter().any(|d| versions.contains(&d.version));
            let reusable = installed.iter().any(|&node| {
                self.installed
                    .dag()
                    .node(node)
                    .version()
                    .is_some_and(|v| versions.contains(v))
            });
            if !declared && !reusable {
                return Err(UnsatisfiableSpecError::NoMatchingVersion {
                    package: name.to_string(),
                    constraint: versions.to_string(),
                    declared: recipe.versions().iter().map(|d| &d.version).join(", "),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Breadth-first walk over every name a solve may touch.
    fn collect_reachable(&mut self, roots: &[Spec]) -> Result<(), ConcretizeError> {
        // (name, referring package, whether a missing name is tolerated)
        let mut queue: VecDeque<(String, Option<String>, bool)> = VecDeque::new();
        for root in roots {
            match root.requested_hash() {
                Some(prefix) => {
                    let dag = self.installed.dag();
                    if let Some(node) = dag.find_hash(prefix) {
                        if let Some(name) = dag.node(node).name() {
                            queue.push_back((name.to_string(), None, false));
                        }
                    }
                }
                None => {
                    if let Some(name) = root.name() {
                        queue.push_back((name.to_string(), None, false));
                    }
                }
            }
            for dep in root.dependencies() {
                if let Some(name) = dep.name() {
                    queue.push_back((name.to_string(), None, false));
                }
            }
        }

        let (repo, installed) = (self.repo, self.installed);
        while let Some((name, from, optional)) = queue.pop_front() {
            if self.packages.contains(&name) || self.virtuals.contains(&name) {
                continue;
            }
            match self.classify(&name) {
                None if optional => {}
                None => {
                    return Err(match from {
                        Some(package) => ConcretizeError::UnknownDependency {
                            package,
                            dependency: name,
                        },
                        None => ConcretizeError::UnknownPackage(name),
                    });
                }
                Some(NameKind::Virtual) => {
                    for provider in repo.providers_of(&name) {
                        queue.push_back((provider.name().to_string(), Some(name.clone()), false));
                    }
                    self.virtuals.insert(name);
                }
                Some(NameKind::Package) => {
                    if let Some(recipe) = repo.recipe(&name) {
                        let mut push = |spec: &Spec, optional: bool| {
                            if let Some(target) = spec.name() {
                                queue.push_back((target.to_string(), Some(name.clone()), optional));
                            }
                        };
                        for decl in recipe.dependencies() {
                            push(&decl.spec, false);
                            decl.spec.dependencies().iter().for_each(|d| push(d, false));
                            if let Some(when) = &decl.when {
                                when.dependencies().iter().for_each(|d| push(d, true));
                            }
                        }
                        for conflict in recipe.conflicts() {
                            let (_, terms) = split_conflict(recipe.name(), &conflict.pattern, conflict.when.as_ref());
                            terms.iter().for_each(|t| push(t, true));
                        }
                    }
                    let dag = installed.dag();
                    for node in dag.find(&name) {
                        for (child, _) in dag.dependencies(node) {
                            if let Some(child) = dag.node(child).name() {
                                queue.push_back((child.to_string(), Some(name.clone()), false));
                            }
                        }
                    }
                    self.packages.insert(name);
                }
            }
        }
        trace!(packages = ?self.packages, virtuals = ?self.virtuals, "reachable names");
        Ok(())
    }

    fn mention(&mut self, owner: &str, spec: &Spec) {
        let owner = spec.name().unwrap_or(owner);
        if spec.variants().is_empty() {
            return;
        }
        self.mentions
            .entry(owner.to_string())
            .or_default()
            .extend(spec.variants().iter().cloned());
    }

    fn mention_condition(&mut self, owner: &str, spec: &Spec) {
        self.mention(owner, spec);
        for dep in spec.dependencies() {
            self.mention(owner, dep);
        }
    }

    /// Record every variant value named by roots, recipes and configuration,
    /// so candidate enumeration can offer them.
    fn collect_mentions(&mut self, roots: &[Spec]) {
        for root in roots {
            if let Some(name) = root.name() {
                self.mention_condition(name, root);
            }
        }
        let repo = self.repo;
        let config = self.config;
        let packages: Vec<String> = self.packages.iter().cloned().collect();
        for name in &packages {
            if let Some(preferred) = config.variant_preferences(name) {
                let preferred = preferred.clone();
                self.mention(name, &preferred);
            }
            for group in config.requirements_for(name) {
                for alternative in &group.alternatives {
                    self.mention_condition(name, alternative);
                }
            }
            let Some(recipe) = repo.recipe(name) else {
                continue;
            };
            for decl in recipe.dependencies() {
                self.mention_condition(decl.name(), &decl.spec);
                if let Some(when) = &decl.when {
                    self.mention_condition(name, when);
                }
            }
            for conflict in recipe.conflicts() {
                self.mention_condition(name, &conflict.pattern);
                if let Some(when) = &conflict.when {
                    self.mention_condition(name, when);
                }
            }
            for provides in recipe.provides() {
                if let Some(when) = &provides.when {
                    self.mention_condition(name, when);
                }
            }
        }
        let virtuals: Vec<String> = self.virtuals.iter().cloned().collect();
        for name in &virtuals {
            let groups = virtual_requirements(config, name);
            for alternative in groups.iter().flat_map(|g| &g.alternatives) {
                if alternative.name().is_some() {
                    self.mention(name, alternative);
                }
            }
        }
    }

    /// The value a variant ranks as "default": the configured preference if
    /// any, else the recipe default.
    fn preferred_default(&self, package: &str, def: &VariantDefinition) -> VariantValue {
        self.config
            .variant_preferences(package)
            .and_then(|preferred| preferred.variant(&def.name))
            .filter(|value| def.invalid_value(value).is_none())
            .map(|value| def.value_of(value.values().clone()))
            .unwrap_or_else(|| def.default_value())
    }

    fn variant_domains(&self, recipe: &PackageRecipe) -> Vec<Vec<VariantValue>> {
        let wide = self.domains(recipe, false);
        let size = wide
            .iter()
            .fold(1usize, |acc, domain| acc.saturating_mul(domain.len().max(1)));
        if size > MAX_ASSIGNMENTS {
            debug!(package = recipe.name(), size, "narrowing variant domains");
            return self.domains(recipe, true);
        }
        wide
    }

    /// Values offered for each variant of `recipe`, default first.
    ///
    /// Narrow domains (and sticky or free-form variants) only hold the
    /// default and the values mentioned somewhere.
    fn domains(&self, recipe: &PackageRecipe, narrow: bool) -> Vec<Vec<VariantValue>> {
        let mentioned = self.mentions.get(recipe.name());
        recipe
            .variants()
            .iter()
            .map(|def| {
                let default = self.preferred_default(recipe.name(), def);
                let mentioned: Vec<&VariantValue> = mentioned
                    .into_iter()
                    .flatten()
                    .filter(|v| v.name() == def.name && def.invalid_value(v).is_none())
                    .collect();
                let mut domain = vec![default.clone()];
                let mut push = |value: VariantValue| {
                    if !domain.contains(&value) {
                        domain.push(value);
                    }
                };
                if def.multi {
                    let mut union = default.values().clone();
                    for value in &mentioned {
                        push(def.value_of(value.values().clone()));
                        push(def.value_of(default.values().union(value.values()).cloned().collect()));
                        union.extend(value.values().iter().cloned());
                    }
                    push(def.value_of(union));
                    domain.truncate(MAX_MULTI_VALUES);
                    return domain;
                }
                for value in &mentioned {
                    push(def.value_of(value.values().clone()));
                }
                if !narrow && !def.sticky {
                    match &def.allowed {
                        AllowedValues::Bool => {
                            push(VariantValue::boolean(&def.name, true));
                            push(VariantValue::boolean(&def.name, false));
                        }
                        AllowedValues::Values(allowed) => {
                            for value in allowed {
                                push(def.value_of(BTreeSet::from([value.clone()])));
                            }
                        }
                        AllowedValues::Any => {}
                    }
                }
                domain
            })
            .collect()
    }

    /// Zero unless a configured or recipe preference applies to `package`
    /// and `version` misses it.
    fn version_weight(&self, recipe: Option<&PackageRecipe>, package: &str, version: &Version) -> usize {
        let preferences = self.config.version_preferences(package);
        if let Some(index) = preferences.iter().position(|p| p.contains(version)) {
            return index;
        }
        let versions = recipe.map(PackageRecipe::versions).unwrap_or_default();
        if preferences.is_empty() && !versions.iter().any(|d| d.preferred) {
            return 0;
        }
        let preferred = versions.iter().any(|d| d.preferred && d.version == *version);
        preferences.len() + usize::from(!preferred)
    }

    fn compiler_weight(&self, package: &str, compiler: Option<&CompilerSpec>) -> usize {
        let Some(compiler) = compiler else {
            return 0;
        };
        let preferences = self.config.compiler_preferences(package);
        preferences
            .iter()
            .position(|p| compiler.satisfies(p))
            .unwrap_or_else(|| {
                let available = &self.config.compilers;
                preferences.len()
                    + available
                        .iter()
                        .position(|c| c == compiler)
                        .unwrap_or(available.len())
            })
    }

    fn non_default_variants(&self, recipe: &PackageRecipe, spec: &Spec) -> usize {
        recipe
            .variants()
            .iter()
            .filter(|def| {
                spec.variant(&def.name).is_some_and(|value| {
                    value.values() != self.preferred_default(recipe.name(), def).values()
                })
            })
            .count()
    }

    fn push_candidate(&mut self, name_id: NameId, record: SolvableRecord, reason: Option<String>) -> SolvableId {
        let sid = self.pool.intern_solvable(name_id, record);
        self.candidates.entry(name_id).or_default().push(sid);
        if let Some(reason) = reason {
            trace!(candidate = %self.pool.resolve_solvable(sid), %reason, "excluded");
            let reason = self.pool.intern_string(reason);
            self.excluded.entry(name_id).or_default().push((sid, reason));
        }
        sid
    }

    fn add_package_candidates(&mut self, name: &str) {
        let (repo, installed) = (self.repo, self.installed);
        let name_id = self.pool.intern_name(PackageName::Package(name.to_string()));
        self.candidates.entry(name_id).or_default();
        let recipe = repo.recipe(name);
        let mut versions: Vec<&DeclaredVersion> =
            recipe.map(|r| r.versions().iter().collect()).unwrap_or_default();
        versions.sort_by(|a, b| b.version.cmp(&a.version));

        // Installed nodes first.
        let dag = installed.dag();
        let mut favored: Option<(NodeCosts, SolvableId)> = None;
        for node in dag.find(name) {
            let spec = dag.node(node).clone();
            let policy = installed
                .policy(dag.hash(node))
                .unwrap_or(InstalledPolicy::Favored);
            let version = spec.version().cloned();
            let declared = recipe.zip(version.as_ref()).and_then(|(r, v)| r.declared_version(v));
            let (requirement_weight, reason) = self.requirement_weight(name, &spec);
            let costs = NodeCosts {
                built: false,
                requirement_weight,
                deprecated: declared.is_some_and(|d| d.deprecated),
                version_weight: version
                    .as_ref()
                    .map(|v| self.version_weight(recipe, name, v))
                    .unwrap_or(0),
                non_default_variants: recipe
                    .map(|r| self.non_default_variants(r, &spec))
                    .unwrap_or(0),
                compiler_weight: self.compiler_weight(name, spec.compiler()),
                version_age: version
                    .as_ref()
                    .and_then(|v| versions.iter().position(|d| d.version == *v))
                    .unwrap_or(versions.len()),
            };
            let excluded = reason.is_some();
            let sid = self.push_candidate(
                name_id,
                SolvableRecord::Node(CandidateNode {
                    spec,
                    installed: Some(policy),
                    edges: Vec::new(),
                    costs,
                }),
                reason,
            );
            match policy {
                InstalledPolicy::Locked => {
                    self.locked.insert(name_id, sid);
                }
                InstalledPolicy::Favored if !excluded => {
                    if favored.is_none_or(|(best, _)| costs < best) {
                        favored = Some((costs, sid));
                    }
                }
                InstalledPolicy::Favored => {}
            }
        }
        if let Some((_, sid)) = favored {
            self.favored.insert(name_id, sid);
        }

        let Some(recipe) = recipe else {
            return;
        };
        self.add_external_candidates(name_id, recipe, &versions);

        let compilers: Vec<Option<CompilerSpec>> = if self.config.compilers.is_empty() {
            vec![None]
        } else {
            self.config.compilers.iter().cloned().map(Some).collect()
        };
        let domains = self.variant_domains(recipe);
        let buildable = self.config.is_buildable(name);
        let mut count = 0usize;
        for (age, declared) in versions.iter().enumerate() {
            for compiler in &compilers {
                for variants in variant_assignments(recipe, &domains, &declared.version, compiler.as_ref()) {
                    let spec = Spec::concrete_node(name, declared.version.clone(), compiler.clone(), variants);
                    let (requirement_weight, mut reason) = self.requirement_weight(name, &spec);
                    if reason.is_none() && declared.deprecated && !self.config.allow_deprecated {
                        reason = Some(format!("{name}@{} is deprecated", declared.version));
                    }
                    if reason.is_none() && !buildable {
                        reason = Some(format!("{name} is not buildable; only installed specs may be used"));
                    }
                    if reason.is_none() {
                        reason = local_conflict(recipe, &spec);
                    }
                    let costs = NodeCosts {
                        built: true,
                        requirement_weight,
                        deprecated: declared.deprecated,
                        version_weight: self.version_weight(Some(recipe), name, &declared.version),
                        non_default_variants: self.non_default_variants(recipe, &spec),
                        compiler_weight: self.compiler_weight(name, compiler.as_ref()),
                        version_age: age,
                    };
                    self.push_candidate(
                        name_id,
                        SolvableRecord::Node(CandidateNode {
                            spec,
                            installed: None,
                            edges: Vec::new(),
                            costs,
                        }),
                        reason,
                    );
                    count += 1;
                }
            }
        }
        trace!(package = name, candidates = count, "enumerated candidates");
    }

    /// One candidate per configured external; unset variants take their
    /// defaults. Externals ignore `buildable` and deprecation.
    fn add_external_candidates(&mut self, name_id: NameId, recipe: &PackageRecipe, versions: &[&DeclaredVersion]) {
        let (config, name) = (self.config, recipe.name());
        for external in config.externals_for(name) {
            let Some(version) = external.spec.version() else {
                continue;
            };
            let domains: Vec<Vec<VariantValue>> = recipe
                .variants()
                .iter()
                .map(|def| {
                    vec![external
                        .spec
                        .variant(&def.name)
                        .cloned()
                        .unwrap_or_else(|| def.default_value())]
                })
                .collect();
            let compiler = external.spec.compiler().cloned();
            let Some(variants) = variant_assignments(recipe, &domains, version, compiler.as_ref())
                .into_iter()
                .next()
            else {
                continue;
            };
            let mut spec = Spec::concrete_node(name, version.clone(), compiler, variants);
            spec.set_external_prefix(external.prefix.clone());
            let (requirement_weight, mut reason) = self.requirement_weight(name, &spec);
            if reason.is_none() {
                reason = local_conflict(recipe, &spec);
            }
            let costs = NodeCosts {
                built: false,
                requirement_weight,
                deprecated: recipe.declared_version(version).is_some_and(|d| d.deprecated),
                version_weight: self.version_weight(Some(recipe), name, version),
                non_default_variants: self.non_default_variants(recipe, &spec),
                compiler_weight: self.compiler_weight(name, spec.compiler()),
                version_age: versions
                    .iter()
                    .position(|d| d.version == *version)
                    .unwrap_or(versions.len()),
            };
            debug!(package = name, prefix = %external.prefix.display(), "external candidate");
            self.push_candidate(
                name_id,
                SolvableRecord::Node(CandidateNode {
                    spec,
                    installed: None,
                    edges: Vec::new(),
                    costs,
                }),
                reason,
            );
        }
    }

    fn requirement_weight(&self, package: &str, spec: &Spec) -> (usize, Option<String>) {
        match evaluate_all(self.config.requirements_for(package), package, spec) {
            Ok(weight) => (weight, None),
            Err(group) => (0, Some(group.describe())),
        }
    }

    fn add_virtual_choices(&mut self, virtual_name: &str) {
        let repo = self.repo;
        let config = self.config;
        let name = PackageName::Virtual(virtual_name.to_string());
        let name_id = self.pool.intern_name(name.clone());
        self.candidates.entry(name_id).or_default();
        let preferences = config.providers_for(virtual_name);
        let groups = virtual_requirements(config, virtual_name);

        for (alphabetical, recipe) in repo.providers_of(virtual_name).into_iter().enumerate() {
            let provider = recipe.name();
            let provider_weight = preferences
                .iter()
                .position(|p| p == provider)
                .unwrap_or(preferences.len() + alphabetical);
            let forced = self.pool.intern_version_set(SpecConstraint::new(
                name.clone(),
                VersionSetKind::Provider(provider.to_string()),
            ));
            self.provider_sets
                .insert((virtual_name.to_string(), provider.to_string()), forced);
            let options = requirement_options(groups, provider);
            let provider_name = PackageName::Package(provider.to_string());

            for decl in recipe.provides().iter().filter(|d| d.virtual_name() == virtual_name) {
                let (when_self, _) = decl
                    .when
                    .as_ref()
                    .map(|w| split_condition(provider, w))
                    .unwrap_or_default();
                let make = |constraint: Spec, requirement_weight: usize| VirtualChoice {
                    virtual_name: virtual_name.to_string(),
                    provider: provider.to_string(),
                    provided: decl.virtual_spec.versions().clone(),
                    constraint,
                    requirement_weight,
                    provider_weight,
                };
                let choices: Vec<(VirtualChoice, Option<String>)> = match &options {
                    Err(group) => vec![(make(when_self.clone(), 0), Some(group.describe()))],
                    Ok(options) => options
                        .iter()
                        .filter_map(|(weight, alternative)| {
                            let mut constraint = when_self.clone();
                            constraint.constrain(alternative).ok()?;
                            Some((make(constraint, *weight), None))
                        })
                        .collect(),
                };
                for (choice, reason) in choices {
                    let target = self.pool.intern_version_set(SpecConstraint::new(
                        provider_name.clone(),
                        VersionSetKind::Node(choice.constraint.clone()),
                    ));
                    let sid = self.push_candidate(name_id, SolvableRecord::Choice(choice), reason);
                    self.dependencies.insert(
                        sid,
                        KnownDependencies {
                            requirements: vec![requirement(None, target)],
                            constrains: Vec::new(),
                        },
                    );
                }
            }
        }
    }

    /// Version set for a `^dep` term, or `None` when the name is unknown.
    fn term_version_set(&mut self, term: &Spec) -> Option<VersionSetId> {
        let name = term.name()?;
        let constraint = if self.virtuals.contains(name) {
            SpecConstraint::new(
                PackageName::Virtual(name.to_string()),
                VersionSetKind::Virtual(term.versions().clone()),
            )
        } else if self.packages.contains(name) {
            SpecConstraint::new(
                PackageName::Package(name.to_string()),
                VersionSetKind::Node(term.node_constraint()),
            )
        } else {
            return None;
        };
        Some(self.pool.intern_version_set(constraint))
    }

    fn add_node_dependencies(&mut self, sid: SolvableId) {
        let Some(node) = self.pool.resolve_solvable(sid).as_node() else {
            return;
        };
        let spec = node.spec.clone();
        let reused = node.installed.is_some();
        let Some(name) = spec.name().map(str::to_string) else {
            return;
        };
        let (repo, installed) = (self.repo, self.installed);
        let recipe = repo.recipe(&name);
        let mut requirements = Vec::new();
        let mut constrains = Vec::new();
        let mut edges = Vec::new();

        if reused {
            // Reused nodes bring their stored children along, hash for hash.
            let dag = installed.dag();
            if let Some(node) = spec.dag_hash().and_then(|h| dag.find_hash(h)) {
                for (child, edge) in dag.dependencies(node) {
                    let child_name = dag.node(child).name().unwrap_or_default().to_string();
                    let target = PackageName::Package(child_name);
                    let vs = self.pool.intern_version_set(SpecConstraint::new(
                        target.clone(),
                        VersionSetKind::Hash(dag.hash(child).to_string()),
                    ));
                    requirements.push(requirement(None, vs));
                    edges.push(PlannedEdge {
                        target,
                        deptypes: edge.deptypes,
                        virtuals: edge.virtuals.clone(),
                        condition: None,
                    });
                }
            }
        } else if let Some(recipe) = recipe.filter(|_| !spec.is_external()) {
            for decl in recipe.dependencies() {
                let (when_self, when_terms) = decl
                    .when
                    .as_ref()
                    .map(|w| split_condition(&name, w))
                    .unwrap_or_default();
                if !spec.satisfies_attributes(&when_self) {
                    continue;
                }
                let condition = match when_terms.first() {
                    None => None,
                    Some(term) => match self.term_version_set(term) {
                        Some(vs) => Some(vs),
                        // The condition names nothing that can be selected.
                        None => continue,
                    },
                };
                let condition_id = condition.map(|vs| self.pool.intern_condition(vs));
                let target_name = decl.name();
                let (target, kind, virtuals) = if self.virtuals.contains(target_name) {
                    (
                        PackageName::Virtual(target_name.to_string()),
                        VersionSetKind::Virtual(decl.spec.versions().clone()),
                        BTreeSet::from([target_name.to_string()]),
                    )
                } else {
                    (
                        PackageName::Package(target_name.to_string()),
                        VersionSetKind::Node(decl.spec.node_constraint()),
                        BTreeSet::new(),
                    )
                };
                let vs = self.pool.intern_version_set(SpecConstraint::new(target.clone(), kind));
                requirements.push(requirement(condition_id, vs));
                for nested in decl.spec.dependencies() {
                    if let Some(vs) = self.term_version_set(nested) {
                        requirements.push(requirement(condition_id, vs));
                    }
                }
                edges.push(PlannedEdge {
                    target,
                    deptypes: decl.deptypes,
                    virtuals,
                    condition,
                });
            }
        }

        if let Some(recipe) = recipe {
            // A selected provider pins every virtual it provides to itself.
            for provides in recipe.provides() {
                let virtual_name = provides.virtual_name();
                let (when_self, _) = provides
                    .when
                    .as_ref()
                    .map(|w| split_condition(&name, w))
                    .unwrap_or_default();
                if !self.virtuals.contains(virtual_name) || !spec.satisfies_attributes(&when_self) {
                    continue;
                }
                let vs = self.pool.intern_version_set(SpecConstraint::new(
                    PackageName::Virtual(virtual_name.to_string()),
                    VersionSetKind::Provider(name.clone()),
                ));
                if !constrains.contains(&vs) {
                    constrains.push(vs);
                }
            }
            // Conflicts with a single dependency term forbid matching nodes.
            for conflict in recipe.conflicts() {
                let (self_part, terms) = split_conflict(&name, &conflict.pattern, conflict.when.as_ref());
                let [term] = terms.as_slice() else {
                    continue;
                };
                let Some(term_name) = term.name() else {
                    continue;
                };
                if !self.packages.contains(term_name) || !self_part.iter().all(|s| spec.satisfies_attributes(s)) {
                    continue;
                }
                let vs = self.pool.intern_version_set(
                    SpecConstraint::new(
                        PackageName::Package(term_name.to_string()),
                        VersionSetKind::Node(term.node_constraint()),
                    )
                    .inverted(),
                );
                constrains.push(vs);
            }
        }

        if let SolvableRecord::Node(node) = self.pool.resolve_solvable_mut(sid) {
            node.edges = edges;
        }
        self.dependencies.insert(
            sid,
            KnownDependencies {
                requirements,
                constrains,
            },
        );
    }

    fn root_request(&mut self, root: &Spec) -> Result<RootRequest, ConcretizeError> {
        let installed = self.installed;
        let mut requirements = Vec::new();
        let target = match root.requested_hash() {
            Some(prefix) => {
                let dag = installed.dag();
                let node = dag
                    .find_hash(prefix)
                    .ok_or_else(|| ConcretizeError::UnknownHash(prefix.to_string()))?;
                let target = PackageName::Package(dag.node(node).name().unwrap_or_default().to_string());
                let hash = dag.hash(node).to_string();
                requirements.push(
                    self.pool
                        .intern_version_set(SpecConstraint::new(target.clone(), VersionSetKind::Hash(hash))),
                );
                target
            }
            None => {
                let name = root
                    .name()
                    .ok_or_else(|| ConcretizeError::UnknownPackage(root.to_string()))?;
                let vs = self
                    .term_version_set(&root.copy())
                    .ok_or_else(|| ConcretizeError::UnknownPackage(name.to_string()))?;
                requirements.push(vs);
                if self.virtuals.contains(name) {
                    PackageName::Virtual(name.to_string())
                } else {
                    PackageName::Package(name.to_string())
                }
            }
        };
        for dep in root.dependencies() {
            let vs = self
                .term_version_set(&dep.copy())
                .ok_or_else(|| ConcretizeError::UnknownPackage(dep.to_string()))?;
            requirements.push(vs);
        }
        Ok(RootRequest {
            spec: root.clone(),
            target,
            requirements,
        })
    }
}

// --- Display wrappers ---

struct DisplaySolvable<'a>(&'a SpecPool, SolvableId);

impl fmt::Display for DisplaySolvable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.resolve_solvable(self.1))
    }
}

struct DisplayName<'a>(&'a SpecDependencyProvider, NameId);

impl fmt::Display for DisplayName<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.0.pool.resolve_name(self.1);
        write!(f, "{name}")?;

        // Point at the packages that can stand in for a virtual.
        if name.is_virtual() {
            let providers = self.0.providers_of(name.as_str());
            if providers.is_empty() {
                write!(f, " (virtual, no providers)")?;
            } else {
                write!(f, " (virtual, provided by {})", providers.join(", "))?;
            }
        }
        Ok(())
    }
}

struct DisplayVersionSet<'a>(&'a SpecPool, VersionSetId);

impl fmt::Display for DisplayVersionSet<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.resolve_version_set(self.1))
    }
}

struct DisplayString<'a>(&'a SpecPool, StringId);

impl fmt::Display for DisplayString<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.resolve_string(self.1))
    }
}

// --- Interner ---

impl resolvo::Interner for SpecDependencyProvider {
    fn display_solvable(&self, solvable: SolvableId) -> impl fmt::Display + '_ {
        DisplaySolvable(&self.pool, solvable)
    }

    fn display_name(&self, name: NameId) -> impl fmt::Display + '_ {
        DisplayName(self, name)
    }

    fn display_version_set(&self, version_set: VersionSetId) -> impl fmt::Display + '_ {
        DisplayVersionSet(&self.pool, version_set)
    }

    fn display_string(&self, string_id: StringId) -> impl fmt::Display + '_ {
        DisplayString(&self.pool, string_id)
    }

    fn version_set_name(&self, version_set: VersionSetId) -> NameId {
        self.pool.version_set_name(version_set)
    }

    fn solvable_name(&self, solvable: SolvableId) -> NameId {
        self.pool.solvable_name(solvable)
    }

    fn version_sets_in_union(
        &self,
        version_set_union: VersionSetUnionId,
    ) -> impl Iterator<Item = VersionSetId> {
        self.pool
            .resolve_version_set_union(version_set_union)
            .iter()
            .copied()
    }

    fn resolve_condition(&self, condition: ConditionId) -> Condition {
        self.pool.resolve_condition(condition).clone()
    }
}

// --- DependencyProvider ---

impl resolvo::DependencyProvider for SpecDependencyProvider {
    async fn get_candidates(&self, name: NameId) -> Option<Candidates> {
        let solvables = self.candidates.get(&name)?;
        Some(Candidates {
            candidates: solvables.clone(),
            favored: self.favored.get(&name).copied(),
            locked: self.locked.get(&name).copied(),
            hint_dependencies_available: HintDependenciesAvailable::All,
            excluded: self.excluded.get(&name).cloned().unwrap_or_default(),
        })
    }

    async fn sort_candidates(&self, _solver: &SolverCache<Self>, solvables: &mut [SolvableId]) {
        // Best first: the solver tries candidates in this order.
        solvables.sort_by(|&a, &b| {
            let order = match (self.pool.resolve_solvable(a), self.pool.resolve_solvable(b)) {
                (SolvableRecord::Node(x), SolvableRecord::Node(y)) => x.costs.cmp(&y.costs),
                (SolvableRecord::Choice(x), SolvableRecord::Choice(y)) => (x.requirement_weight, x.provider_weight)
                    .cmp(&(y.requirement_weight, y.provider_weight)),
                (SolvableRecord::Node(_), SolvableRecord::Choice(_)) => std::cmp::Ordering::Less,
                (SolvableRecord::Choice(_), SolvableRecord::Node(_)) => std::cmp::Ordering::Greater,
            };
            order.then(a.to_usize().cmp(&b.to_usize()))
        });
    }

    async fn filter_candidates(
        &self,
        candidates: &[SolvableId],
        version_set: VersionSetId,
        inverse: bool,
    ) -> Vec<SolvableId> {
        let constraint = self.pool.resolve_version_set(version_set);

        candidates
            .iter()
            .copied()
            .filter(|&sid| {
                let mut matches = constraint.matches(self.pool.resolve_solvable(sid));

                // Conflict constrains store the *forbidden* pattern with
                // `inverted = true`. Flipping here means resolvo's own
                // `inverse` flag (used for constrains) ends up forbidding
                // candidates that match the pattern.
                if constraint.inverted {
                    matches = !matches;
                }

                if inverse { !matches } else { matches }
            })
            .collect()
    }

    async fn get_dependencies(&self, solvable: SolvableId) -> Dependencies {
        match self.dependencies.get(&solvable) {
            Some(deps) => Dependencies::Known(deps.clone()),
            None => Dependencies::Known(KnownDependencies {
                requirements: Vec::new(),
                constrains: Vec::new(),
            }),
        }
    }
}

// --- helpers ---

fn requirement(condition: Option<ConditionId>, version_set: VersionSetId) -> ConditionalRequirement {
    ConditionalRequirement {
        condition,
        requirement: Requirement::Single(version_set),
    }
}

/// Split a condition on `owner` into its node part (nameless) and its
/// `^dep` terms. A condition naming another package is a term itself.
fn split_condition(owner: &str, spec: &Spec) -> (Spec, Vec<Spec>) {
    match spec.name() {
        Some(name) if name != owner => {
            let mut terms = vec![spec.copy()];
            terms.extend(spec.dependencies().iter().cloned());
            (Spec::anonymous(), terms)
        }
        _ => (spec.node_constraint(), spec.dependencies().to_vec()),
    }
}

/// The node parts and dependency terms of a conflict's pattern and `when`.
fn split_conflict(owner: &str, pattern: &Spec, when: Option<&Spec>) -> (Vec<Spec>, Vec<Spec>) {
    let (pattern_self, mut terms) = split_condition(owner, pattern);
    let mut self_part = vec![pattern_self];
    if let Some(when) = when {
        let (when_self, when_terms) = split_condition(owner, when);
        self_part.push(when_self);
        terms.extend(when_terms);
    }
    (self_part, terms)
}

/// The reason a node-local conflict rules out `spec`, if one does.
fn local_conflict(recipe: &PackageRecipe, spec: &Spec) -> Option<String> {
    recipe.conflicts().iter().find_map(|conflict| {
        let (self_part, terms) = split_conflict(recipe.name(), &conflict.pattern, conflict.when.as_ref());
        if !terms.is_empty() || !self_part.iter().all(|s| spec.satisfies_attributes(s)) {
            return None;
        }
        let mut reason = format!("conflicts with `{}`", conflict.pattern);
        if let Some(when) = &conflict.when {
            reason.push_str(&format!(" when `{when}`"));
        }
        if let Some(message) = &conflict.message {
            reason.push_str(&format!(": {message}"));
        }
        Some(reason)
    })
}

/// Requirement groups configured directly on a virtual name.
fn virtual_requirements<'c>(config: &'c Config, virtual_name: &str) -> &'c [RequirementGroup] {
    config
        .packages
        .get(virtual_name)
        .map(|p| p.require.as_slice())
        .unwrap_or_default()
}

/// Every combination of one usable alternative per group for `provider`,
/// as (summed weight, constraint on the provider node). Fails with the
/// first group that has no alternative for this provider.
fn requirement_options<'g>(
    groups: &'g [RequirementGroup],
    provider: &str,
) -> Result<Vec<(usize, Spec)>, &'g RequirementGroup> {
    let mut options = vec![(0, Spec::anonymous())];
    for group in groups {
        let alternatives: Vec<(usize, &Spec)> = group.provider_alternatives(provider).collect();
        if alternatives.is_empty() {
            return Err(group);
        }
        options = options
            .iter()
            .flat_map(|(weight, spec)| {
                alternatives.iter().filter_map(move |(index, alternative)| {
                    let mut spec = spec.clone();
                    spec.constrain(&alternative.node_constraint()).ok()?;
                    Some((weight + index, spec))
                })
            })
            .collect();
    }
    Ok(options)
}

/// Every variant assignment of `recipe` at one version and compiler.
///
/// Conditional variants are evaluated in declaration order against the
/// partial assignment built so far.
fn variant_assignments(
    recipe: &PackageRecipe,
    domains: &[Vec<VariantValue>],
    version: &Version,
    compiler: Option<&CompilerSpec>,
) -> Vec<VariantMap> {
    let mut states = vec![VariantMap::new()];
    for (def, domain) in recipe.variants().iter().zip(domains) {
        let mut next = Vec::with_capacity(states.len() * domain.len().max(1));
        for state in states {
            let active = def.when.as_ref().is_none_or(|when| {
                let partial =
                    Spec::concrete_node(recipe.name(), version.clone(), compiler.cloned(), state.clone());
                partial.satisfies_attributes(&when.node_constraint())
            });
            if !active {
                next.push(state);
                continue;
            }
            for value in domain {
                let mut assigned = state.clone();
                assigned.insert(value.clone());
                next.push(assigned);
            }
        }
        states = next;
    }
    states
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryRepository;
    use resolvo::{Problem, Solver};

    fn repo(text: &str) -> InMemoryRepository {
        InMemoryRepository::from_toml_str(text).unwrap()
    }

    fn solve_names(repo: &InMemoryRepository, config: &Config, root: &str) -> Vec<String> {
        let roots = vec![root.parse::<Spec>().unwrap()];
        let provider =
            SpecDependencyProvider::build(repo, config, &InstalledSet::new(), &roots).unwrap();
        let problem = Problem::new().requirements(provider.root_requirements());
        let mut solver = Solver::new(provider);
        let solution = solver.solve(problem).unwrap();
        let graph = solver.provider().build_dag(&solution).unwrap();
        let mut names: Vec<String> = graph
            .dag
            .nodes()
            .into_iter()
            .map(|n| graph.dag.node(n).format_node())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn enumerates_versions_and_bool_variants() {
        let repo = repo(
            r#"
            [[package]]
            name = "zlib"
            versions = ["1.3", "1.2.13"]
            [[package.variant]]
            name = "shared"
            default = true
            "#,
        );
        let roots = vec!["zlib".parse::<Spec>().unwrap()];
        let provider =
            SpecDependencyProvider::build(&repo, &Config::default(), &InstalledSet::new(), &roots)
                .unwrap();
        // 2 versions x (+shared, ~shared)
        assert_eq!(provider.stats().solvables, 4);
        assert_eq!(provider.stats().packages, 1);
        assert_eq!(provider.stats().excluded, 0);
    }

    #[test]
    fn conditional_variants_follow_declaration_order() {
        let repo = repo(
            r#"
            [[package]]
            name = "hdf5"
            versions = ["1.14.3", "1.10.9"]
            [[package.variant]]
            name = "mpi"
            default = false
            [[package.variant]]
            name = "parallel_io"
            default = false
            when = "+mpi"
            "#,
        );
        let hdf5 = repo.recipe("hdf5").unwrap();
        let ctx_domains = vec![
            vec![VariantValue::single("build_system", "generic")],
            vec![VariantValue::boolean("mpi", false), VariantValue::boolean("mpi", true)],
            vec![
                VariantValue::boolean("parallel_io", false),
                VariantValue::boolean("parallel_io", true),
            ],
        ];
        let version = Version::parse("1.14.3").unwrap();
        let assignments = variant_assignments(hdf5, &ctx_domains, &version, None);
        // ~mpi (no parallel_io) + two +mpi assignments
        assert_eq!(assignments.len(), 3);
        assert!(assignments
            .iter()
            .filter(|a| a.get("mpi").and_then(VariantValue::as_bool) == Some(false))
            .all(|a| !a.contains("parallel_io")));
    }

    #[test]
    fn virtual_edges_resolve_to_the_provider() {
        let repo = repo(
            r#"
            [[package]]
            name = "app"
            versions = ["1.0"]
            depends_on = ["mpi"]

            [[package]]
            name = "mpich"
            versions = ["4.1"]
            provides = ["mpi@:3"]

            [[package]]
            name = "openmpi"
            versions = ["5.0"]
            provides = ["mpi@:3"]
            "#,
        );
        let names = solve_names(&repo, &Config::default(), "app");
        assert_eq!(names, ["app@1.0 build_system=generic", "mpich@4.1 build_system=generic"]);

        let config = Config::from_toml_str(
            r#"
            [packages.all.providers]
            mpi = ["openmpi"]
            "#,
        )
        .unwrap();
        let names = solve_names(&repo, &config, "app");
        assert!(names.iter().any(|n| n.starts_with("openmpi@5.0")));
    }

    #[test]
    fn conflicts_with_a_dependency_term_are_enforced() {
        let repo = repo(
            r#"
            [[package]]
            name = "app"
            versions = ["1.0"]
            depends_on = ["zlib"]
            conflicts = [{ spec = "^zlib@1.3" }]

            [[package]]
            name = "zlib"
            versions = ["1.3", "1.2"]
            "#,
        );
        let names = solve_names(&repo, &Config::default(), "app");
        assert!(names.contains(&"zlib@1.2 build_system=generic".to_string()));
    }

    #[test]
    fn conditional_dependencies_follow_the_node() {
        let repo = repo(
            r#"
            [[package]]
            name = "app"
            versions = ["2.0", "1.0"]
            depends_on = [{ spec = "zlib", when = "@:1" }]

            [[package]]
            name = "zlib"
            versions = ["1.3"]
            "#,
        );
        assert_eq!(solve_names(&repo, &Config::default(), "app"), ["app@2.0 build_system=generic"]);
        assert_eq!(
            solve_names(&repo, &Config::default(), "app@1.0"),
            ["app@1.0 build_system=generic", "zlib@1.3 build_system=generic"]
        );
    }

    #[test]
    fn input_errors_are_reported_before_solving() {
        let repo = repo(
            r#"
            [[package]]
            name = "libelf"
            versions = ["0.8.13", "0.8.12"]
            depends_on = ["libiberty"]
            "#,
        );
        let build = |root: &str| {
            SpecDependencyProvider::build(
                &repo,
                &Config::default(),
                &InstalledSet::new(),
                &[root.parse().unwrap()],
            )
        };
        assert!(matches!(build("nope"), Err(ConcretizeError::UnknownPackage(n)) if n == "nope"));
        assert!(matches!(
            build("libelf@9.9.9"),
            Err(ConcretizeError::Unsatisfiable(UnsatisfiableSpecError::NoMatchingVersion { .. }))
        ));
        assert!(matches!(build("libelf+debug"), Err(ConcretizeError::UnknownVariant { .. })));
        assert!(matches!(
            build("libelf@0.8.13"),
            Err(ConcretizeError::UnknownDependency { dependency, .. }) if dependency == "libiberty"
        ));
        assert!(matches!(build("/abcdef"), Err(ConcretizeError::UnknownHash(h)) if h == "abcdef"));
    }

    #[test]
    fn requirement_violations_become_exclusions() {
        let repo = repo(
            r#"
            [[package]]
            name = "zlib"
            versions = ["1.3", "1.2"]
            "#,
        );
        let config = Config::from_toml_str("[packages.zlib]\nrequire = \"@1.2\"").unwrap();
        let roots = vec!["zlib".parse::<Spec>().unwrap()];
        let provider =
            SpecDependencyProvider::build(&repo, &config, &InstalledSet::new(), &roots).unwrap();
        assert_eq!(provider.stats().excluded, 1);
        assert_eq!(solve_names(&repo, &config, "zlib"), ["zlib@1.2 build_system=generic"]);
    }
}
