//! The solve driver: unified, separate and round-based concretization.

use std::slice;
use std::time::{Duration, Instant};

use itertools::Itertools;
use petgraph::graph::NodeIndex;
use rayon::prelude::*;
use resolvo::{ConditionalRequirement, Problem, UnsolvableOrCancelled, VersionSetId};
use tracing::{debug, debug_span, instrument};

use crate::config::{Config, UnifyMode};
use crate::criteria::CriteriaReport;
use crate::dag::ConcreteDag;
use crate::error::{ConcretizeError, UnsatisfiableSpecError};
use crate::installed::InstalledSet;
use crate::package::ConflictDecl;
use crate::provider::{SolvedGraph, SpecDependencyProvider};
use crate::repository::PackageRepository;
use crate::requirements::validate_requirements;
use crate::spec::Spec;
use crate::version::Version;

/// A requested spec and the DAG node it concretized to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolvedRoot {
    pub spec: Spec,
    pub node: NodeIndex,
}

/// A requested spec that could not be concretized.
#[derive(Debug)]
pub struct UnsolvedSpec {
    pub spec: Spec,
    pub reason: ConcretizeError,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SolveStats {
    pub packages: usize,
    pub solvables: usize,
    pub version_sets: usize,
    /// Candidates excluded by requirements, conflicts or policy.
    pub excluded: usize,
    /// Alternative solutions evaluated after the first one.
    pub alternatives: usize,
    pub elapsed: Duration,
}

impl SolveStats {
    fn merge(&mut self, other: &SolveStats) {
        self.packages += other.packages;
        self.solvables += other.solvables;
        self.version_sets += other.version_sets;
        self.excluded += other.excluded;
        self.alternatives += other.alternatives;
        self.elapsed += other.elapsed;
    }
}

/// The outcome of a solve (or of one round).
#[derive(Debug, Default)]
pub struct SolveResult {
    pub roots: Vec<SolvedRoot>,
    pub dag: ConcreteDag,
    pub unsolved: Vec<UnsolvedSpec>,
    pub criteria: CriteriaReport,
    pub stats: SolveStats,
}

impl SolveResult {
    /// Whether every requested spec was concretized.
    pub fn is_complete(&self) -> bool {
        self.unsolved.is_empty()
    }

    /// The concrete node of a requested spec.
    pub fn node_for(&self, spec: &Spec) -> Option<&Spec> {
        self.roots
            .iter()
            .find(|r| r.spec == *spec)
            .map(|r| self.dag.node(r.node))
    }

    /// Fold `other` into `self`, sharing nodes with equal hashes.
    pub fn merge(&mut self, other: SolveResult) {
        self.dag.merge(&other.dag);
        for root in other.roots {
            let hash = other.dag.hash(root.node);
            if let Some(node) = self.dag.find_hash(hash) {
                self.roots.push(SolvedRoot {
                    spec: root.spec,
                    node,
                });
            }
        }
        self.unsolved.extend(other.unsolved);
        self.criteria.merge(&other.criteria);
        self.stats.merge(&other.stats);
        debug!(nodes = self.dag.len(), roots = self.roots.len(), "merged solve results");
    }
}

/// Concretizes abstract specs against a repository and configuration.
///
/// ```ignore
/// let solver = Solver::new(&repo, &config).with_installed(installed);
/// let result = solver.concretize(&specs)?;
/// println!("{}", result.dag.tree(&TreeOptions::default()));
/// ```
pub struct Solver<'a> {
    repo: &'a dyn PackageRepository,
    config: &'a Config,
    installed: InstalledSet,
}

impl<'a> Solver<'a> {
    pub fn new(repo: &'a dyn PackageRepository, config: &'a Config) -> Self {
        Self {
            repo,
            config,
            installed: InstalledSet::new(),
        }
    }

    /// Offer previously concretized nodes for reuse.
    pub fn with_installed(mut self, installed: InstalledSet) -> Self {
        self.installed = installed;
        self
    }

    pub fn config(&self) -> &Config {
        self.config
    }

    /// Solve according to the configured unify mode and return one merged
    /// result.
    pub fn concretize(&self, roots: &[Spec]) -> Result<SolveResult, ConcretizeError> {
        match self.config.unify {
            UnifyMode::Unified => self.solve(roots),
            UnifyMode::Separate => self.solve_separately(roots),
            UnifyMode::WhenPossible => {
                let mut merged = SolveResult::default();
                for round in self.solve_in_rounds(roots) {
                    merged.merge(round?);
                }
                Ok(merged)
            }
        }
    }

    /// One strictly unified solve: a single node per package across all
    /// roots.
    #[instrument(skip_all, fields(roots = %roots.iter().join(" ")))]
    pub fn solve(&self, roots: &[Spec]) -> Result<SolveResult, ConcretizeError> {
        validate_requirements(self.config, self.repo)?;
        let installed = self.reusable(roots);
        self.solve_with(roots, &installed)
    }

    /// One independent solve per root, run in parallel, merged afterwards.
    /// Roots that cannot be solved are reported in
    /// [`SolveResult::unsolved`].
    #[instrument(skip_all, fields(roots = roots.len()))]
    pub fn solve_separately(&self, roots: &[Spec]) -> Result<SolveResult, ConcretizeError> {
        let start = Instant::now();
        validate_requirements(self.config, self.repo)?;
        let installed = self.reusable(roots);
        let results: Vec<(Spec, Result<SolveResult, ConcretizeError>)> = roots
            .par_iter()
            .map(|root| (root.clone(), self.solve_with(slice::from_ref(root), &installed)))
            .collect();

        let mut merged = SolveResult::default();
        for (spec, result) in results {
            match result {
                Ok(result) => merged.merge(result),
                Err(reason) if reason.is_unsatisfiable() => {
                    debug!(%spec, %reason, "root is unsolvable");
                    merged.unsolved.push(UnsolvedSpec { spec, reason });
                }
                Err(err) => return Err(err),
            }
        }
        merged.stats.elapsed = start.elapsed();
        Ok(merged)
    }

    /// Concretize as many roots together as possible, round after round.
    ///
    /// Each round first tries every remaining root together, then greedily
    /// accepts roots (in request order) that co-solve with those already
    /// accepted. Accepted nodes are reused by later rounds. A round that
    /// makes no progress is the last one and reports the remaining roots
    /// as unsolved.
    pub fn solve_in_rounds(&self, roots: &[Spec]) -> SolveRounds<'_, 'a> {
        SolveRounds {
            solver: self,
            remaining: roots.to_vec(),
            fixed: self.reusable(roots),
            round: 0,
            validated: false,
            done: false,
        }
    }

    /// The installed nodes a solve may reuse: everything when reuse is on,
    /// otherwise only locked nodes and nodes requested by hash or as
    /// concrete specs.
    fn reusable(&self, roots: &[Spec]) -> InstalledSet {
        if self.config.reuse {
            return self.installed.clone();
        }
        let dag = self.installed.dag();
        let keep: Vec<String> = roots
            .iter()
            .filter_map(|root| dag.find_hash(root.requested_hash()?))
            .map(|node| dag.hash(node).to_string())
            .collect();
        self.installed.retain_locked_and(&keep)
    }

    fn solve_with(&self, roots: &[Spec], installed: &InstalledSet) -> Result<SolveResult, ConcretizeError> {
        let start = Instant::now();
        let specs = roots.iter().join(" ");
        let provider = SpecDependencyProvider::build(self.repo, self.config, installed, roots)?;
        let stats = provider.stats();
        let requirements = provider.root_requirements();
        let base = provider.clone();

        debug!(%specs, "running resolvo");
        let mut solver = resolvo::Solver::new(provider);
        let problem = Problem::new().requirements(requirements.clone());
        let solution = match solver.solve(problem) {
            Ok(solution) => solution,
            Err(UnsolvableOrCancelled::Unsolvable(conflict)) => {
                return Err(UnsatisfiableSpecError::Unsolvable {
                    explanation: conflict.display_user_friendly(&solver).to_string(),
                    specs,
                }
                .into());
            }
            Err(UnsolvableOrCancelled::Cancelled(_)) => {
                return Err(UnsatisfiableSpecError::Unsolvable {
                    specs,
                    explanation: "the solve was cancelled".into(),
                }
                .into());
            }
        };
        let first = solver.provider().build_dag(&solution)?;
        debug!(key = ?first.criteria.key(), "first solution");
        let used_providers = first.providers.clone();
        let descents = self.version_descents(&first.dag);
        let mut best: Option<SolvedGraph> = None;
        let mut rejection: Option<ConcretizeError> = None;
        let mut consider = |candidate: SolvedGraph| match self.verify(roots, &candidate) {
            Ok(()) => {
                if best
                    .as_ref()
                    .is_none_or(|b| candidate.criteria.key() < b.criteria.key())
                {
                    best = Some(candidate);
                }
            }
            Err(err) => {
                debug!(%err, "solution fails verification");
                rejection.get_or_insert(err);
            }
        };
        consider(first);

        // Force every other provider of each virtual in the solution.
        let mut alternatives = 0;
        'virtuals: for (virtual_name, chosen) in used_providers {
            for provider in base.providers_of(&virtual_name) {
                if provider == chosen {
                    continue;
                }
                if alternatives >= self.config.max_alternatives {
                    break 'virtuals;
                }
                let Some(forced) = base.provider_constraint(&virtual_name, provider) else {
                    continue;
                };
                alternatives += 1;
                match self.solve_constrained(base.clone(), &requirements, vec![forced]) {
                    Some(candidate) => {
                        debug!(virtual_name, provider, key = ?candidate.criteria.key(), "evaluated alternative");
                        consider(candidate);
                    }
                    None => debug!(virtual_name, provider, "alternative is unsolvable"),
                }
            }
        }

        // Walk packages that pulled in dependencies down their older
        // versions: a smaller graph outranks a newer one.
        'descents: for (package, newest) in descents {
            let mut provider = base.clone();
            let mut excluded = Vec::new();
            let mut current = newest;
            loop {
                if alternatives >= self.config.max_alternatives {
                    break 'descents;
                }
                let Some(exclusion) = provider.version_exclusion(&package, &current) else {
                    break;
                };
                excluded.push(exclusion);
                alternatives += 1;
                let Some(candidate) = self.solve_constrained(provider.clone(), &requirements, excluded.clone())
                else {
                    debug!(package, excluded = excluded.len(), "no older version solves");
                    break;
                };
                let next = candidate
                    .dag
                    .find(&package)
                    .first()
                    .and_then(|&node| candidate.dag.node(node).version().cloned());
                debug!(package, version = ?next.as_ref().map(Version::to_string), key = ?candidate.criteria.key(), "evaluated older version");
                consider(candidate);
                match next {
                    Some(next) => current = next,
                    None => break,
                }
            }
        }

        let Some(best) = best else {
            return Err(rejection.unwrap_or_else(|| {
                UnsatisfiableSpecError::Unsolvable {
                    specs,
                    explanation: "no solution passed verification".into(),
                }
                .into()
            }));
        };
        let SolvedGraph {
            dag,
            roots: nodes,
            criteria,
            ..
        } = best;
        Ok(SolveResult {
            roots: roots
                .iter()
                .cloned()
                .zip(nodes)
                .map(|(spec, node)| SolvedRoot { spec, node })
                .collect(),
            dag,
            unsolved: Vec::new(),
            criteria,
            stats: SolveStats {
                packages: stats.packages,
                solvables: stats.solvables,
                version_sets: stats.version_sets,
                excluded: stats.excluded,
                alternatives,
                elapsed: start.elapsed(),
            },
        })
    }

    /// Solve again with extra problem-level constraints. Unsolvable and
    /// unbuildable outcomes are `None`.
    fn solve_constrained(
        &self,
        provider: SpecDependencyProvider,
        requirements: &[ConditionalRequirement],
        constraints: Vec<VersionSetId>,
    ) -> Option<SolvedGraph> {
        let mut solver = resolvo::Solver::new(provider);
        let problem = Problem::new()
            .requirements(requirements.to_vec())
            .constraints(constraints);
        let solution = solver.solve(problem).ok()?;
        solver
            .provider()
            .build_dag(&solution)
            .inspect_err(|err| debug!(%err, "alternative rejected"))
            .ok()
    }

    /// Built nodes of `dag` that have dependencies and whose package
    /// declares more than one version, in topological order.
    fn version_descents(&self, dag: &ConcreteDag) -> Vec<(String, Version)> {
        dag.topological_order()
            .into_iter()
            .filter(|&node| !dag.is_reused(node) && !dag.dependencies(node).is_empty())
            .filter_map(|node| {
                let spec = dag.node(node);
                let name = spec.name()?;
                if self.repo.recipe(name)?.versions().len() < 2 {
                    return None;
                }
                Some((name.to_string(), spec.version()?.clone()))
            })
            .collect()
    }

    /// Checks resolvo cannot express: root `^dep` constraints must be met
    /// inside the root's own subgraph, and no conflict may hold anywhere.
    fn verify(&self, roots: &[Spec], graph: &SolvedGraph) -> Result<(), ConcretizeError> {
        let dag = &graph.dag;
        for (root, &node) in roots.iter().zip(&graph.roots) {
            for dep in root.dependencies() {
                let mut reaches = Spec::anonymous();
                reaches.add_dependency(dep.clone())?;
                if !dag.satisfies(node, &reaches) {
                    return Err(UnsatisfiableSpecError::NotADependency {
                        root: root.copy().to_string(),
                        dependency: dep.to_string(),
                    }
                    .into());
                }
            }
        }
        for node in dag.nodes() {
            let spec = dag.node(node);
            let Some(recipe) = spec.name().and_then(|n| self.repo.recipe(n)) else {
                continue;
            };
            for conflict in recipe.conflicts() {
                if conflict_holds(dag, node, recipe.name(), conflict)? {
                    return Err(UnsatisfiableSpecError::Conflict {
                        spec: spec.format_node(),
                        pattern: conflict.pattern.to_string(),
                        message: conflict.message.clone(),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }
}

/// A condition on `owner` as a pattern for [`ConcreteDag::satisfies`]: a
/// condition naming another package is searched among the dependencies.
fn subtree_pattern(owner: &str, condition: &Spec) -> Result<Spec, ConcretizeError> {
    match condition.name() {
        Some(name) if name != owner => {
            let mut pattern = Spec::anonymous();
            pattern.add_dependency(condition.clone())?;
            Ok(pattern)
        }
        _ => Ok(condition.clone()),
    }
}

fn conflict_holds(
    dag: &ConcreteDag,
    node: NodeIndex,
    owner: &str,
    conflict: &ConflictDecl,
) -> Result<bool, ConcretizeError> {
    if let Some(when) = &conflict.when {
        if !dag.satisfies(node, &subtree_pattern(owner, when)?) {
            return Ok(false);
        }
    }
    Ok(dag.satisfies(node, &subtree_pattern(owner, &conflict.pattern)?))
}

/// Lazy iterator over the rounds of [`Solver::solve_in_rounds`].
pub struct SolveRounds<'s, 'a> {
    solver: &'s Solver<'a>,
    remaining: Vec<Spec>,
    /// Installed nodes plus everything accepted by earlier rounds.
    fixed: InstalledSet,
    round: usize,
    validated: bool,
    done: bool,
}

impl SolveRounds<'_, '_> {
    /// Roots not yet concretized.
    pub fn remaining(&self) -> &[Spec] {
        &self.remaining
    }

    fn accept(&mut self, result: &SolveResult) {
        self.fixed.add_favored(&result.dag);
    }
}

impl Iterator for SolveRounds<'_, '_> {
    type Item = Result<SolveResult, ConcretizeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.remaining.is_empty() {
            return None;
        }
        if !self.validated {
            self.validated = true;
            if let Err(err) = validate_requirements(self.solver.config, self.solver.repo) {
                self.done = true;
                return Some(Err(err.into()));
            }
        }
        self.round += 1;
        let _span = debug_span!("round", round = self.round, remaining = self.remaining.len()).entered();
        let start = Instant::now();

        match self.solver.solve_with(&self.remaining, &self.fixed) {
            Ok(result) => {
                debug!("every remaining root solved together");
                self.accept(&result);
                self.remaining.clear();
                return Some(Ok(result));
            }
            Err(err) if !err.is_unsatisfiable() => {
                self.done = true;
                return Some(Err(err));
            }
            Err(_) => {}
        }

        let mut accepted: Vec<Spec> = Vec::new();
        let mut best: Option<SolveResult> = None;
        let mut rejected: Vec<UnsolvedSpec> = Vec::new();
        for spec in &self.remaining {
            let mut attempt = accepted.clone();
            attempt.push(spec.clone());
            match self.solver.solve_with(&attempt, &self.fixed) {
                Ok(result) => {
                    accepted = attempt;
                    best = Some(result);
                }
                Err(reason) if reason.is_unsatisfiable() => rejected.push(UnsolvedSpec {
                    spec: spec.clone(),
                    reason,
                }),
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }

        match best {
            Some(mut result) => {
                debug!(accepted = accepted.len(), deferred = rejected.len(), "round made progress");
                self.accept(&result);
                self.remaining = rejected.into_iter().map(|u| u.spec).collect();
                result.stats.elapsed = start.elapsed();
                Some(Ok(result))
            }
            None => {
                // Nothing solved, not even alone: every failure above was a
                // solo attempt, so its reason is final.
                debug!(unsolved = rejected.len(), "round made no progress");
                self.done = true;
                self.remaining.clear();
                Some(Ok(SolveResult {
                    unsolved: rejected,
                    stats: SolveStats {
                        elapsed: start.elapsed(),
                        ..SolveStats::default()
                    },
                    ..SolveResult::default()
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::criteria::CriterionStatus;
    use crate::dag::TreeOptions;
    use crate::deptypes::DepTypes;
    use crate::parser::parse_specs;
    use crate::repository::InMemoryRepository;

    fn repo(text: &str) -> InMemoryRepository {
        InMemoryRepository::from_toml_str(text).unwrap()
    }

    fn specs(input: &str) -> Vec<Spec> {
        parse_specs(input).unwrap()
    }

    fn spec(input: &str) -> Spec {
        input.parse().unwrap()
    }

    fn names(result: &SolveResult) -> Vec<String> {
        let dag = &result.dag;
        dag.nodes().into_iter().map(|n| dag.node(n).format_node()).collect()
    }

    /// The newest `app` drags in two more packages.
    const GROWING: &str = r#"
        [[package]]
        name = "app"
        versions = ["2.0", "1.0"]
        depends_on = [{ spec = "big", when = "@2.0" }]

        [[package]]
        name = "big"
        versions = ["1.0"]
        depends_on = ["bigger"]

        [[package]]
        name = "bigger"
        versions = ["1.0"]
    "#;

    #[test]
    fn fewer_nodes_outrank_newer_versions() {
        let repo = repo(GROWING);
        let config = Config::default();
        let result = Solver::new(&repo, &config).solve(&specs("app")).unwrap();
        assert_eq!(names(&result), ["app@1.0 build_system=generic"]);
        assert!(result.stats.alternatives >= 1);
        let criteria = &result.criteria;
        assert_eq!(criteria.get("number of nodes").unwrap().total(), 1);
        assert_eq!(criteria.get("version age").unwrap().total(), 1);

        let config = Config::from_toml_str("[concretizer]\nmax_alternatives = 0").unwrap();
        let result = Solver::new(&repo, &config).solve(&specs("app")).unwrap();
        assert_eq!(result.dag.len(), 3);
    }

    #[test]
    fn explicit_versions_still_win_over_size() {
        let repo = repo(GROWING);
        let config = Config::default();
        let result = Solver::new(&repo, &config).solve(&specs("app@2.0")).unwrap();
        assert_eq!(result.dag.len(), 3);
        assert!(result.node_for(&spec("app@2.0")).unwrap().satisfies(&spec("app@=2.0")));
    }

    #[test]
    fn version_badness_is_satisfied_without_preferences() {
        let repo = repo(GROWING);
        let config = Config::default();
        let result = Solver::new(&repo, &config).solve(&specs("app@2.0")).unwrap();
        let badness = result.criteria.get("version badness").unwrap();
        assert_eq!(badness.total(), 0);
        assert_eq!(badness.status, CriterionStatus::Satisfied);

        let config = Config::from_toml_str("[packages.bigger]\nversion = [\"2:\"]").unwrap();
        let result = Solver::new(&repo, &config).solve(&specs("app@2.0")).unwrap();
        let badness = result.criteria.get("version badness").unwrap();
        assert_eq!(badness.status, CriterionStatus::Partial(1));
    }

    const ZLIB_APP: &str = r#"
        [[package]]
        name = "app"
        versions = ["2.0", "1.0"]
        depends_on = ["zlib"]

        [[package]]
        name = "zlib"
        versions = ["1.3", "1.2"]
    "#;

    #[test]
    fn concrete_specs_resolve_to_themselves() {
        let repo = repo(ZLIB_APP);
        let config = Config::default();
        let first = Solver::new(&repo, &config).solve(&specs("app ^zlib@1.2")).unwrap();
        let concrete = first.dag.node(first.roots[0].node).clone();
        assert!(concrete.is_concrete());

        let mut installed = InstalledSet::new();
        installed.add_favored(&first.dag);
        for config in [
            Config::default(),
            Config::from_toml_str("[concretizer]\nreuse = false").unwrap(),
        ] {
            let again = Solver::new(&repo, &config)
                .with_installed(installed.clone())
                .solve(slice::from_ref(&concrete))
                .unwrap();
            assert_eq!(again.node_for(&concrete), Some(&concrete));
            assert_eq!(again.dag.hash(again.roots[0].node), first.dag.hash(first.roots[0].node));
            let mut hashes: Vec<_> = again.dag.nodes().into_iter().map(|n| again.dag.hash(n)).collect();
            let mut expected: Vec<_> = first.dag.nodes().into_iter().map(|n| first.dag.hash(n)).collect();
            hashes.sort();
            expected.sort();
            assert_eq!(hashes, expected);
        }

        let err = Solver::new(&repo, &config)
            .solve(slice::from_ref(&concrete))
            .unwrap_err();
        assert!(matches!(err, ConcretizeError::UnknownHash(_)), "{err}");
    }

    #[test]
    fn multi_valued_variants_merge_across_constraints() {
        let repo = repo(
            r#"
            [[package]]
            name = "app"
            versions = ["1.0"]
            depends_on = ["boost libs=chrono"]

            [[package]]
            name = "boost"
            versions = ["1.84"]
            [[package.variant]]
            name = "libs"
            multi = true
            values = ["atomic", "chrono", "regex"]
            default = ["atomic"]
            "#,
        );
        let config = Config::default();
        let result = Solver::new(&repo, &config)
            .solve(&specs("app ^boost libs=regex"))
            .unwrap();
        let boost = result.dag.node(result.dag.find("boost")[0]);
        assert!(boost.satisfies(&spec("boost libs=atomic,chrono,regex")), "got {boost}");
        assert_eq!(boost.variant("libs").unwrap().values().len(), 3);
    }

    #[test]
    fn repeated_dependencies_share_one_edge() {
        let repo = repo(
            r#"
            [[package]]
            name = "app"
            versions = ["1.0"]
            depends_on = [
                { spec = "cmake", type = ["build"] },
                { spec = "cmake@3:", type = ["link"] },
            ]

            [[package]]
            name = "cmake"
            versions = ["3.27", "2.8"]
            "#,
        );
        let config = Config::default();
        let result = Solver::new(&repo, &config).solve(&specs("app")).unwrap();
        let dag = &result.dag;
        let edges = dag.dependencies(result.roots[0].node);
        assert_eq!(edges.len(), 1);
        let (cmake, edge) = edges[0];
        assert_eq!(edge.deptypes, DepTypes::BUILD | DepTypes::LINK);
        assert!(dag.node(cmake).satisfies(&spec("cmake@=3.27")));
    }

    const CMAKE_APP: &str = r#"
        [[package]]
        name = "app"
        versions = ["1.0"]
        depends_on = [{ spec = "cmake", type = ["build"] }]

        [[package]]
        name = "cmake"
        versions = ["3.28", "3.27"]
        depends_on = ["openssl"]
        [[package.variant]]
        name = "ownlibs"
        default = true

        [[package]]
        name = "openssl"
        versions = ["3.1"]
    "#;

    const CMAKE_EXTERNAL: &str = r#"
        [packages.cmake]
        externals = [{ spec = "cmake@3.27 ~ownlibs", prefix = "/usr" }]
    "#;

    #[test]
    fn externals_are_used_in_place_of_builds() {
        let repo = repo(CMAKE_APP);
        let config = Config::from_toml_str(CMAKE_EXTERNAL).unwrap();
        let result = Solver::new(&repo, &config).solve(&specs("app")).unwrap();
        let dag = &result.dag;
        let cmake = dag.node(dag.find("cmake")[0]);
        assert!(cmake.is_external());
        assert_eq!(cmake.external_prefix(), Some(std::path::Path::new("/usr")));
        assert!(cmake.satisfies(&spec("cmake@=3.27 ~ownlibs")));
        assert!(dag.find("openssl").is_empty());
        assert_eq!(result.criteria.get("number of packages to build (vs. reuse)").unwrap().total(), 1);

        let tree = dag.tree(&TreeOptions {
            install_status: true,
            ..TreeOptions::default()
        });
        assert!(tree.lines().any(|l| l.starts_with("[e]") && l.contains("cmake@3.27")), "{tree}");

        let result = Solver::new(&repo, &Config::default()).solve(&specs("app")).unwrap();
        assert!(!result.dag.node(result.dag.find("cmake")[0]).is_external());
        assert_eq!(result.dag.len(), 3);
    }

    #[test]
    fn unbuildable_packages_need_an_external() {
        let repo = repo(CMAKE_APP);
        let config = Config::from_toml_str("[packages.cmake]\nbuildable = false").unwrap();
        let err = Solver::new(&repo, &config).solve(&specs("app")).unwrap_err();
        assert!(err.is_unsatisfiable(), "{err}");

        let config = Config::from_toml_str(&format!("{CMAKE_EXTERNAL}buildable = false\n")).unwrap();
        let result = Solver::new(&repo, &config).solve(&specs("app ^cmake@3.27")).unwrap();
        assert!(result.dag.node(result.dag.find("cmake")[0]).is_external());

        let err = Solver::new(&repo, &config).solve(&specs("app ^cmake@3.28")).unwrap_err();
        assert!(err.is_unsatisfiable(), "{err}");
    }

    #[test]
    fn external_variants_are_checked_against_the_recipe() {
        let repo = repo(CMAKE_APP);
        let config = Config::from_toml_str(
            "[packages.cmake]\nexternals = [{ spec = \"cmake@3.27 +qt\", prefix = \"/usr\" }]",
        )
        .unwrap();
        let err = Solver::new(&repo, &config).solve(&specs("app")).unwrap_err();
        assert!(matches!(err, ConcretizeError::UnknownVariant { .. }), "{err}");
    }
}
