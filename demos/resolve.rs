//! Example: concretize a small HPC software stack.
//!
//! The repository models `mpileaks` and friends, including an `mpi` virtual
//! with two providers, a variant-conditional dependency and a compiler
//! choice. The same request is solved under three configurations to show how
//! requirements and preferences change the resulting DAG.

use spec_concretizer::{Config, InMemoryRepository, Solver, TreeOptions, parse_specs};

const REPO: &str = r#"
[[package]]
name = "mpileaks"
versions = ["2.3", "2.2", "1.0"]
depends_on = ["mpi", "callpath", { spec = "adept-utils", when = "+adept" }]
[[package.variant]]
name = "adept"
default = false

[[package]]
name = "callpath"
versions = ["1.0.4", "1.0.2"]
depends_on = ["dyninst", "mpi"]
build_systems = ["cmake"]

[[package]]
name = "adept-utils"
versions = ["1.0.1"]
depends_on = ["mpi"]
build_systems = ["cmake"]

[[package]]
name = "dyninst"
versions = ["12.3.0", { version = "8.2.1", deprecated = true }]
depends_on = ["libdwarf", "libelf"]
build_systems = ["cmake"]
[[package.variant]]
name = "openmp"
default = true

[[package]]
name = "libdwarf"
versions = ["20180129", "20130729"]
depends_on = ["libelf"]

[[package]]
name = "libelf"
versions = ["0.8.13", "0.8.12"]
build_systems = ["autotools"]
[[package.variant]]
name = "shared"
default = true

[[package]]
name = "mpich"
versions = ["4.1.2", "3.4.3"]
provides = ["mpi@:3", { spec = "mpi@:4", when = "@4:" }]
build_systems = ["autotools"]
[[package.variant]]
name = "device"
values = ["ch3", "ch4"]
default = "ch4"

[[package]]
name = "openmpi"
versions = ["5.0.3", "4.1.6"]
provides = ["mpi@:4"]
build_systems = ["autotools"]
conflicts = [{ spec = "%clang", when = "@5:", msg = "openmpi 5 needs gcc in this site" }]
"#;

const COMPILERS: &str = r#"
[[compilers]]
spec = "gcc@13.2.0"

[[compilers]]
spec = "clang@17.0.6"
"#;

fn solve(label: &str, repo: &InMemoryRepository, config: &Config, request: &str) {
    println!("\n{}\n{label}\n{}", "=".repeat(60), "=".repeat(60));
    println!("request: {request}\n");
    let specs = parse_specs(request).unwrap();
    let solver = Solver::new(repo, config);
    match solver.solve(&specs) {
        Ok(result) => {
            let options = TreeOptions {
                hashes: true,
                deptypes: true,
                ..TreeOptions::default()
            };
            print!("{}", result.dag.tree(&options));
            println!();
            print!("{}", result.criteria);
            println!("\nInstall order:");
            for node in result.dag.install_order() {
                let spec = result.dag.node(node);
                let phases = result.dag.phases(node).join(", ");
                println!("  {:<40} [{phases}]", spec.format_node());
            }
            println!(
                "\n{} packages, {} candidates, {} alternatives, {:?}",
                result.stats.packages,
                result.stats.solvables,
                result.stats.alternatives,
                result.stats.elapsed
            );
        }
        Err(err) => println!("error: {err}"),
    }
}

fn main() {
    let repo = InMemoryRepository::from_toml_str(REPO).unwrap();

    let defaults = Config::from_toml_str(COMPILERS).unwrap();
    solve("Defaults", &repo, &defaults, "mpileaks");

    let openmpi = Config::from_toml_str(&format!(
        "{COMPILERS}\n[packages.all]\nproviders = {{ mpi = [\"openmpi\"] }}\ncompiler = [\"clang\"]"
    ))
    .unwrap();
    solve("Prefer openmpi and clang", &repo, &openmpi, "mpileaks+adept");

    let pinned = Config::from_toml_str(&format!(
        "{COMPILERS}\n[packages.libelf]\nrequire = [{{ one_of = [\"@0.8.12\", \"~shared\"] }}]"
    ))
    .unwrap();
    solve("Require libelf@0.8.12 or ~shared", &repo, &pinned, "mpileaks ^mpich@3");

    solve("A version nobody declares", &repo, &defaults, "libelf@9.9.9");
}
