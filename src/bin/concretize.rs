//! Concretize abstract specs against a TOML repository and print the DAG.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use spec_concretizer::{
    Config, ConfigScope, InMemoryRepository, InstalledSet, Solver, TreeOptions, UnifyMode,
    parse_specs,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Tree,
    Json,
}

#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Repository of package recipes (TOML).
    #[arg(long, short)]
    repo: PathBuf,

    /// Configuration scopes, lowest precedence first.
    #[arg(long, short)]
    config: Vec<PathBuf>,

    /// JSON DAG document of installed specs to reuse.
    #[arg(long)]
    installed: Option<PathBuf>,

    /// Override `concretizer.unify`: true, false or when_possible.
    #[arg(long)]
    unify: Option<UnifyMode>,

    #[arg(long, value_enum, default_value = "tree")]
    format: Format,

    /// Print the optimization criteria of the solution.
    #[arg(long)]
    criteria: bool,

    /// Prefix tree lines with DAG hashes.
    #[arg(long, short = 'l')]
    hashes: bool,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(long, short, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Specs to concretize, e.g. `mpileaks ^mpich@3`.
    #[arg(required = true)]
    specs: Vec<String>,
}

fn setup_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<bool> {
    let repo = InMemoryRepository::load(&cli.repo)
        .with_context(|| format!("loading repository {}", cli.repo.display()))?;
    let scopes = cli
        .config
        .iter()
        .map(|path| ConfigScope::load(path))
        .collect::<Result<Vec<_>, _>>()?;
    let mut config = Config::from_scopes(&scopes).context("merging configuration")?;
    if let Some(unify) = cli.unify {
        config = config.with_unify(unify);
    }
    let installed = match &cli.installed {
        Some(path) => InstalledSet::load(path)
            .with_context(|| format!("loading installed specs {}", path.display()))?,
        None => InstalledSet::new(),
    };
    let specs = parse_specs(&cli.specs.join(" ")).context("parsing specs")?;

    let reusing = !installed.is_empty();
    let solver = Solver::new(&repo, &config).with_installed(installed);
    let rounds = match config.unify {
        UnifyMode::WhenPossible => solver
            .solve_in_rounds(&specs)
            .collect::<Result<Vec<_>, _>>()?,
        _ => vec![solver.concretize(&specs)?],
    };

    let options = TreeOptions {
        hashes: cli.hashes,
        install_status: reusing,
        ..TreeOptions::default()
    };
    let mut complete = true;
    for (i, result) in rounds.iter().enumerate() {
        tracing::debug!(
            round = i + 1,
            nodes = result.dag.len(),
            alternatives = result.stats.alternatives,
            elapsed = ?result.stats.elapsed,
            "concretized"
        );
        if rounds.len() > 1 && !result.dag.is_empty() {
            println!("==> round {}", i + 1);
        }
        match cli.format {
            Format::Tree => print!("{}", result.dag.tree(&options)),
            Format::Json => println!("{}", result.dag.to_json_string().context("serializing DAG")?),
        }
        if cli.criteria && !result.criteria.criteria.is_empty() {
            println!();
            print!("{}", result.criteria);
        }
        for unsolved in &result.unsolved {
            eprintln!("error: cannot concretize {}: {}", unsolved.spec, unsolved.reason);
        }
        complete &= result.is_complete();
    }
    Ok(complete)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose);
    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(2)
        }
    }
}
