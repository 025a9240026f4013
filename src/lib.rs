//! Concretizer for package specs, built on the [`resolvo`] dependency solver.
//!
//! This crate turns abstract specs such as `mpileaks@2: ^mpich` into a
//! concrete dependency DAG. Every node in that DAG has an exact version,
//! compiler and variant assignment, plus a content hash. Package recipes come
//! from a [`PackageRepository`], site policy from a layered [`Config`], and
//! previous builds from an [`InstalledSet`].

mod compiler;
mod config;
mod criteria;
mod dag;
mod deptypes;
mod error;
mod installed;
mod package;
mod parser;
mod pool;
mod provider;
mod repository;
mod requirements;
mod solver;
mod spec;
mod variant;
mod version;

pub use compiler::CompilerSpec;
pub use config::{ALL_PACKAGES, Config, ConfigScope, ExternalSpec, PackagePreferences, UnifyMode};
pub use criteria::{CriteriaReport, Criterion, CriterionStatus};
pub use dag::{ConcreteDag, DependencyEdge, TreeOptions};
pub use deptypes::DepTypes;
pub use error::{
    ConcretizeError, ConfigError, ConstraintKind, DagDocumentError, DependencyCycleError,
    InvalidVersionFormat, RepositoryError, SpecConcretizedError, SpecError, SpecSyntaxError,
    UnsatisfiableSpecError,
};
pub use installed::{InstalledPolicy, InstalledSet};
pub use package::{
    BUILD_SYSTEM_VARIANT, BuildSystem, ConflictDecl, DeclaredVersion, DependencyDecl,
    PackageRecipe, ProvidesDecl,
};
pub use parser::parse_specs;
pub use pool::{
    CandidateNode, NodeCosts, PackageName, PlannedEdge, SolvableRecord, SpecConstraint, SpecPool,
    VersionSetKind, VirtualChoice,
};
pub use provider::{ProviderStats, RootRequest, SpecDependencyProvider};
pub use repository::{InMemoryRepository, PackageRepository};
pub use requirements::{
    RequirementGroup, RequirementOutcome, RequirementPolicy, evaluate_all, validate_requirements,
};
pub use solver::{SolveResult, SolveRounds, SolveStats, SolvedRoot, Solver, UnsolvedSpec};
pub use spec::Spec;
pub use variant::{AllowedValues, VariantDefinition, VariantMap, VariantValue};
pub use version::{Segment, Version, VersionList, VersionRange};

#[cfg(test)]
mod tests {
    use crate::{
        ConcretizeError, Config, CriterionStatus, InMemoryRepository, InstalledSet, Solver, Spec,
        TreeOptions, UnifyMode, UnsatisfiableSpecError, parse_specs,
    };

    const MPILEAKS: &str = r#"
        [[package]]
        name = "mpileaks"
        versions = ["2.3", "2.2"]
        depends_on = ["mpi", "callpath"]

        [[package]]
        name = "callpath"
        versions = ["1.0"]
        depends_on = ["dyninst", "mpi"]

        [[package]]
        name = "dyninst"
        versions = ["8.2"]
        depends_on = ["libdwarf"]

        [[package]]
        name = "libdwarf"
        versions = ["20130729"]
        depends_on = ["libelf"]

        [[package]]
        name = "libelf"
        versions = ["0.8.13", "0.8.12"]

        [[package]]
        name = "mpich"
        versions = ["4.1", "3.4"]
        provides = ["mpi@:3"]

        [[package]]
        name = "openmpi"
        versions = ["5.0"]
        provides = ["mpi@:3"]
    "#;

    /// Two roots that each pin a different zlib.
    const SPLIT: &str = r#"
        [[package]]
        name = "a"
        versions = ["1.0"]
        depends_on = ["zlib@1.2"]

        [[package]]
        name = "b"
        versions = ["1.0"]
        depends_on = ["zlib@1.3"]

        [[package]]
        name = "zlib"
        versions = ["1.3", "1.2"]
    "#;

    fn repo(text: &str) -> InMemoryRepository {
        InMemoryRepository::from_toml_str(text).unwrap()
    }

    fn config(text: &str) -> Config {
        Config::from_toml_str(text).unwrap()
    }

    fn specs(input: &str) -> Vec<Spec> {
        parse_specs(input).unwrap()
    }

    fn spec(input: &str) -> Spec {
        input.parse().unwrap()
    }

    fn names(result: &crate::SolveResult) -> Vec<String> {
        let dag = &result.dag;
        dag.nodes().into_iter().map(|n| dag.node(n).format_node()).collect()
    }

    // --- Scenario 1: shared virtual provider and topological order ---

    #[test]
    fn mpileaks_shares_one_mpi_provider() {
        let repo = repo(MPILEAKS);
        let config = Config::default();
        let result = Solver::new(&repo, &config).solve(&specs("mpileaks")).unwrap();
        let dag = &result.dag;

        assert_eq!(dag.find("mpileaks").len(), 1);
        let mpich = dag.find("mpich");
        assert_eq!(mpich.len(), 1);
        assert!(dag.find("openmpi").is_empty());
        let dependents: Vec<_> = dag
            .dependents(mpich[0])
            .into_iter()
            .map(|(n, edge)| (dag.node(n).name().unwrap().to_string(), edge.virtuals.clone()))
            .collect();
        assert_eq!(dependents.len(), 2);
        assert!(dependents.iter().all(|(_, virtuals)| virtuals.contains("mpi")));

        let order: Vec<_> = dag
            .topological_order()
            .into_iter()
            .map(|n| dag.node(n).name().unwrap())
            .collect();
        assert_eq!(order, ["mpileaks", "callpath", "mpich", "dyninst", "libdwarf", "libelf"]);
    }

    #[test]
    fn mpileaks_tree() {
        let repo = repo(MPILEAKS);
        let config = Config::default();
        let result = Solver::new(&repo, &config).solve(&specs("mpileaks")).unwrap();
        insta::assert_snapshot!(result.dag.tree(&TreeOptions::default()), @r"
        mpileaks@2.3 build_system=generic
            ^callpath@1.0 build_system=generic
                ^dyninst@8.2 build_system=generic
                    ^libdwarf@20130729 build_system=generic
                        ^libelf@0.8.13 build_system=generic
                ^mpich@4.1 build_system=generic
        ");
    }

    // --- Scenario 2: a single requirement overrides the newest version ---

    #[test]
    fn requirement_pins_an_older_version() {
        let repo = repo(
            r#"
            [[package]]
            name = "x"
            versions = ["1.1", "1.0", "0.9"]
            "#,
        );
        let config = config("[packages.x]\nrequire = \"@1.0\"");
        let result = Solver::new(&repo, &config).solve(&specs("x")).unwrap();
        let x = result.node_for(&spec("x")).unwrap();
        assert_eq!(x.version().map(|v| v.to_string()).as_deref(), Some("1.0"));
    }

    // --- Scenario 3: one_of prefers its first alternative ---

    const Y: &str = r#"
        [[package]]
        name = "y"
        versions = ["2.5", "2.4"]
        [[package.variant]]
        name = "shared"
        default = true
    "#;

    #[test]
    fn one_of_takes_the_first_satisfiable_alternative() {
        let repo = repo(Y);
        let config = config(
            r#"
            [packages.y]
            require = [{ one_of = ["@2.4", "~shared"] }]
            "#,
        );
        let result = Solver::new(&repo, &config).solve(&specs("y")).unwrap();
        let y = result.node_for(&spec("y")).unwrap();
        assert!(y.satisfies(&spec("y@=2.4+shared")), "got {y}");
    }

    // --- Scenario 4: two one_of groups interact with compilers ---

    #[test]
    fn requirement_groups_combine() {
        let repo = repo(Y);
        let config = config(
            r#"
            [[compilers]]
            spec = "gcc@12.2.0"

            [[compilers]]
            spec = "clang@16.0.0"

            [packages.y]
            require = [
                { one_of = ["@2.4%gcc", "@2.5%clang"] },
                { one_of = ["@2.5~shared", "@2.4+shared"] },
            ]
            "#,
        );
        let solver = Solver::new(&repo, &config);

        let result = solver.solve(&specs("y@2.5")).unwrap();
        let y = result.node_for(&spec("y@2.5")).unwrap();
        assert!(y.satisfies(&spec("y@=2.5%clang~shared")), "got {y}");

        let result = solver.solve(&specs("y@2.4")).unwrap();
        let y = result.node_for(&spec("y@2.4")).unwrap();
        assert!(y.satisfies(&spec("y@=2.4%gcc+shared")), "got {y}");
    }

    // --- Scenario 5: no substitute for a missing version ---

    #[test]
    fn missing_version_is_unsatisfiable() {
        let repo = repo(MPILEAKS);
        let config = Config::default();
        let err = Solver::new(&repo, &config).solve(&specs("libelf@9.9.9")).unwrap_err();
        assert!(err.is_unsatisfiable());
        assert!(matches!(
            err,
            ConcretizeError::Unsatisfiable(UnsatisfiableSpecError::NoMatchingVersion { .. })
        ));
    }

    // --- solve properties ---

    #[test]
    fn solves_are_deterministic() {
        let repo = repo(MPILEAKS);
        let config = Config::default();
        let solver = Solver::new(&repo, &config);
        let first = solver.solve(&specs("mpileaks")).unwrap();
        let second = solver.solve(&specs("mpileaks")).unwrap();
        let hash = |r: &crate::SolveResult| r.dag.hash(r.roots[0].node).to_string();
        assert_eq!(hash(&first), hash(&second));
        assert_eq!(names(&first), names(&second));
    }

    #[test]
    fn installed_nodes_are_reused() {
        let repo = repo(MPILEAKS);
        let config = Config::default();
        let first = Solver::new(&repo, &config).solve(&specs("mpileaks")).unwrap();

        let mut installed = InstalledSet::new();
        installed.add_favored(&first.dag);
        let second = Solver::new(&repo, &config)
            .with_installed(installed)
            .solve(&specs("mpileaks"))
            .unwrap();
        let dag = &second.dag;
        assert!(dag.nodes().iter().all(|&n| dag.is_reused(n)));
        assert_eq!(dag.hash(second.roots[0].node), first.dag.hash(first.roots[0].node));
        let built = second.criteria.get("number of packages to build (vs. reuse)").unwrap();
        assert_eq!(built.build_cost, 0);
    }

    #[test]
    fn reuse_off_only_keeps_hash_requests() {
        let repo = repo(MPILEAKS);
        let first = Solver::new(&repo, &Config::default())
            .solve(&specs("libelf@0.8.12"))
            .unwrap();
        let mut installed = InstalledSet::new();
        installed.add_favored(&first.dag);
        let hash = first.dag.hash(first.roots[0].node).to_string();

        let config = config("[concretizer]\nreuse = false");
        let solver = Solver::new(&repo, &config).with_installed(installed);
        let fresh = solver.solve(&specs("libelf")).unwrap();
        let libelf = fresh.roots[0].node;
        assert!(!fresh.dag.is_reused(libelf));
        assert_eq!(fresh.dag.node(libelf).version().map(|v| v.to_string()).as_deref(), Some("0.8.13"));

        let by_hash = solver.solve(&specs(&format!("/{}", &hash[..7]))).unwrap();
        assert_eq!(by_hash.dag.hash(by_hash.roots[0].node), hash);
        assert!(by_hash.dag.is_reused(by_hash.roots[0].node));
    }

    #[test]
    fn unified_roots_share_nodes() {
        let repo = repo(MPILEAKS);
        let config = Config::default();
        let result = Solver::new(&repo, &config).solve(&specs("mpileaks callpath")).unwrap();
        assert_eq!(result.roots.len(), 2);
        assert_eq!(result.dag.find("callpath").len(), 1);
        assert_eq!(result.dag.find("libelf").len(), 1);
        assert_eq!(result.roots[1].node, result.dag.find("callpath")[0]);
    }

    #[test]
    fn root_dependency_constraints_are_honored() {
        let repo = repo(MPILEAKS);
        let config = Config::default();
        let solver = Solver::new(&repo, &config);
        let result = solver.solve(&specs("mpileaks ^openmpi ^libelf@0.8.12")).unwrap();
        assert!(names(&result).contains(&"openmpi@5.0 build_system=generic".to_string()));
        assert!(names(&result).contains(&"libelf@0.8.12 build_system=generic".to_string()));
        assert!(result.dag.find("mpich").is_empty());

        let err = solver.solve(&specs("libelf ^mpich")).unwrap_err();
        assert!(err.is_unsatisfiable(), "{err}");
    }

    #[test]
    fn provider_alternatives_are_ranked() {
        let repo = repo(MPILEAKS);
        let config = Config::default();
        let result = Solver::new(&repo, &config).solve(&specs("mpileaks")).unwrap();
        // openmpi for mpi, then mpileaks without 2.3, then without 2.2 too.
        assert_eq!(result.stats.alternatives, 3);
        assert_eq!(result.dag.find("mpich").len(), 1);
        let version_badness = result.criteria.get("version badness").unwrap();
        assert_eq!(version_badness.status, CriterionStatus::Satisfied);

        let config = self::config("[concretizer]\nmax_alternatives = 0");
        let result = Solver::new(&repo, &config).solve(&specs("mpileaks")).unwrap();
        assert_eq!(result.stats.alternatives, 0);
        assert_eq!(result.dag.find("mpich").len(), 1);
    }

    #[test]
    fn recipe_conflicts_remove_candidates() {
        let repo = repo(
            r#"
            [[package]]
            name = "hdf5"
            versions = ["1.14", "1.12"]
            conflicts = [{ spec = "+mpi", when = "@1.14", msg = "no parallel 1.14" }]
            [[package.variant]]
            name = "mpi"
            default = true
            "#,
        );
        let config = Config::default();
        let solver = Solver::new(&repo, &config);
        let result = solver.solve(&specs("hdf5")).unwrap();
        let hdf5 = result.node_for(&spec("hdf5")).unwrap();
        assert!(!hdf5.satisfies(&spec("hdf5@=1.14+mpi")), "got {hdf5}");

        let err = solver.solve(&specs("hdf5@1.14+mpi")).unwrap_err();
        assert!(err.is_unsatisfiable(), "{err}");
    }

    #[test]
    fn deprecated_versions_need_opt_in() {
        let repo = repo(
            r#"
            [[package]]
            name = "zlib"
            versions = [{ version = "1.3", deprecated = true }, "1.2"]
            "#,
        );
        let config = Config::default();
        let solver = Solver::new(&repo, &config);
        let result = solver.solve(&specs("zlib")).unwrap();
        assert_eq!(names(&result), ["zlib@1.2 build_system=generic"]);
        assert!(solver.solve(&specs("zlib@1.3")).unwrap_err().is_unsatisfiable());

        let config = self::config("[config]\ndeprecated = true");
        let result = Solver::new(&repo, &config).solve(&specs("zlib@1.3")).unwrap();
        let deprecated = result.criteria.get("deprecated versions used").unwrap();
        assert_eq!(deprecated.build_cost, 1);
    }

    #[test]
    fn dependency_cycles_are_errors() {
        let repo = repo(
            r#"
            [[package]]
            name = "a"
            versions = ["1.0"]
            depends_on = ["b"]

            [[package]]
            name = "b"
            versions = ["1.0"]
            depends_on = ["a"]
            "#,
        );
        let config = Config::default();
        let err = Solver::new(&repo, &config).solve(&specs("a")).unwrap_err();
        assert!(matches!(err, ConcretizeError::Cycle(_)), "{err}");
    }

    #[test]
    fn invalid_requirements_fail_before_solving() {
        let repo = repo(SPLIT);
        let config = config("[packages.zlib]\nrequire = \"@9\"");
        let err = Solver::new(&repo, &config).solve(&specs("a")).unwrap_err();
        assert!(matches!(err, ConcretizeError::Config(_)), "{err}");
    }

    // --- unify modes ---

    #[test]
    fn unified_solve_of_incompatible_roots_fails() {
        let repo = repo(SPLIT);
        let config = Config::default();
        let err = Solver::new(&repo, &config).solve(&specs("a b")).unwrap_err();
        assert!(matches!(
            err,
            ConcretizeError::Unsatisfiable(UnsatisfiableSpecError::Unsolvable { .. })
        ));
    }

    #[test]
    fn separate_solves_report_unsolved_roots() {
        let repo = repo(SPLIT);
        let config = Config::default().with_unify(UnifyMode::Separate);
        let result = Solver::new(&repo, &config)
            .concretize(&specs("a b a ^zlib@1.3"))
            .unwrap();
        assert_eq!(result.roots.len(), 2);
        assert_eq!(result.dag.find("zlib").len(), 2);
        assert_eq!(result.unsolved.len(), 1);
        assert_eq!(result.unsolved[0].spec, spec("a ^zlib@1.3"));
        assert!(!result.is_complete());
    }

    #[test]
    fn rounds_unify_what_they_can() {
        let repo = repo(SPLIT);
        let config = Config::default();
        let solver = Solver::new(&repo, &config);
        let rounds: Vec<_> = solver
            .solve_in_rounds(&specs("a b"))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(rounds.len(), 2);
        assert_eq!(rounds[0].roots[0].spec, spec("a"));
        assert_eq!(rounds[1].roots[0].spec, spec("b"));
        assert!(rounds.iter().all(|r| r.is_complete()));

        let config = Config::default().with_unify(UnifyMode::WhenPossible);
        let merged = Solver::new(&repo, &config).concretize(&specs("a b")).unwrap();
        assert_eq!(merged.roots.len(), 2);
        assert_eq!(merged.dag.find("zlib").len(), 2);
    }

    #[test]
    fn rounds_reuse_earlier_results() {
        let repo = repo(SPLIT);
        let config = Config::default();
        let solver = Solver::new(&repo, &config);
        let rounds: Vec<_> = solver
            .solve_in_rounds(&specs("a b zlib@1.2"))
            .collect::<Result<_, _>>()
            .unwrap();
        // a and zlib@1.2 unify in the first round; b needs its own.
        assert_eq!(rounds.len(), 2);
        assert_eq!(rounds[0].roots.len(), 2);
        assert_eq!(rounds[0].dag.find("zlib").len(), 1);
    }

    #[test]
    fn rounds_end_when_nothing_progresses() {
        let repo = repo(SPLIT);
        let config = Config::default();
        let solver = Solver::new(&repo, &config);
        let rounds: Vec<_> = solver
            .solve_in_rounds(&specs("a a ^zlib@1.3"))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(rounds.len(), 2);
        assert!(rounds[0].is_complete());
        assert_eq!(rounds[1].unsolved.len(), 1);
        assert!(rounds[1].unsolved[0].reason.is_unsatisfiable());
    }
}
