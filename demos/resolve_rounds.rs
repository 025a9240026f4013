//! Example: unify several roots as far as possible.
//!
//! `legacy` needs an old zlib, `modern` a new one. A unified solve fails; a
//! round-based solve concretizes them in two rounds and reuses the first
//! round's nodes in the second.

use spec_concretizer::{Config, InMemoryRepository, Solver, TreeOptions, UnifyMode, parse_specs};

const REPO: &str = r#"
[[package]]
name = "legacy"
versions = ["1.0"]
depends_on = ["zlib@:1.2", "libpng"]

[[package]]
name = "modern"
versions = ["3.1"]
depends_on = ["zlib@1.3:", "libpng"]

[[package]]
name = "libpng"
versions = ["1.6.43"]
depends_on = ["zlib"]

[[package]]
name = "zlib"
versions = ["1.3.1", "1.2.13"]
[[package.variant]]
name = "shared"
default = true
"#;

fn main() {
    let repo = InMemoryRepository::from_toml_str(REPO).unwrap();
    let specs = parse_specs("legacy modern zlib+shared").unwrap();
    let options = TreeOptions {
        install_status: true,
        ..TreeOptions::default()
    };

    let config = Config::default();
    match Solver::new(&repo, &config).solve(&specs) {
        Ok(_) => println!("unified solve succeeded"),
        Err(err) => println!("unified solve failed:\n{err}\n"),
    }

    let solver = Solver::new(&repo, &config);
    for (i, round) in solver.solve_in_rounds(&specs).enumerate() {
        let round = round.unwrap();
        println!("round {}:", i + 1);
        print!("{}", round.dag.tree(&options));
        for unsolved in &round.unsolved {
            println!("  unsolved {}: {}", unsolved.spec, unsolved.reason);
        }
    }

    let config = Config::default().with_unify(UnifyMode::Separate);
    let result = Solver::new(&repo, &config).concretize(&specs).unwrap();
    println!("\nseparate: {} nodes for {} roots", result.dag.len(), result.roots.len());
}
