use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use source_rebuilder::config::DEFAULT_CONFIG_PATH;
use source_rebuilder::orchestrator::RebuildSummary;
use source_rebuilder::repo::default_comparator;
use source_rebuilder::{
    preflight, BuildLedger, Buildah, Config, Dnf, Orchestrator, RpmBuildBackend, Tools,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "source-rebuilder", version, about = "Rebuild installed packages from source")]
struct Cli {
    /// INI override file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild every installed package
    Rebuild {
        /// Full rebuild (accepted for compatibility; currently the only mode)
        #[arg(long)]
        full: bool,
    },
    /// Build the named packages and their build dependencies
    Build {
        #[arg(required = true)]
        packages: Vec<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    match run(cli) {
        Ok(summary) => report(&summary),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<RebuildSummary> {
    preflight::require_root()?;
    preflight::check_host_tools()?;

    let config = Config::load(&cli.config)
        .with_context(|| format!("loading configuration from '{}'", cli.config.display()))?;
    let ledger = BuildLedger::load(&config.system.state_file)?;
    let vercmp = default_comparator();
    let tools = Tools {
        pkgmgr: &Dnf,
        vercmp: &*vercmp,
        containers: &Buildah,
        backend: &RpmBuildBackend,
    };
    let mut orchestrator = Orchestrator::new(&config, tools, &ledger);

    match cli.command {
        Commands::Rebuild { full } => {
            tracing::debug!(full, "rebuild requested");
            orchestrator.rebuild_all()
        }
        Commands::Build { packages } => {
            let mut summary = RebuildSummary::default();
            for name in &packages {
                let result = orchestrator.build_pkg(name);
                summary.record(name, result);
            }
            Ok(summary)
        }
    }
}

fn report(summary: &RebuildSummary) -> ExitCode {
    println!(
        "[rebuild] built {}, already built {}, skipped {}, failed {}",
        summary.built.len(),
        summary.already_built.len(),
        summary.skipped.len(),
        summary.failed.len()
    );
    for name in &summary.skipped {
        println!("[rebuild] skipped {name}: no buildable candidate");
    }
    for (name, err) in &summary.failed {
        eprintln!("[rebuild] failed {name}: {err}");
    }
    if summary.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
