//! Model-checking harness CLI.
//!
//! The model has no production I/O; this binary is its interface. `check` and
//! `check-sym` run the stateright checker (the latter with socket-symmetry
//! reduction), `explore` serves the interactive state-space browser, `verify`
//! runs the built-in BFS and prints a full per-step counterexample on
//! failure, and `sim` drives a seeded random walk with artifact capture.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use clap::Subcommand;
use stateright::Checker;
use stateright::Model;
use tracing::error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use c3d::config::ModelConfig;
use c3d::explore::explore;
use c3d::explore::ExploreOptions;
use c3d::model::CoherenceModel;
use c3d::sim::random_walk;
use c3d::trace::RunArtifact;

#[derive(Parser)]
#[command(name = "c3d", version, about = "C3D cache-coherence model checker")]
struct Cli {
    /// Socket count (default 3, or C3D_SOCKETS).
    #[arg(long, global = true)]
    sockets: Option<u8>,

    /// Value-domain cardinality (default 2, or C3D_VALUES).
    #[arg(long, global = true)]
    values: Option<u8>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Exhaustively check every interleaving with the stateright checker.
    Check,
    /// Exhaustively check with socket-symmetry reduction.
    CheckSym,
    /// Serve the interactive state-space explorer.
    Explore {
        /// Address to serve the explorer UI on.
        #[arg(long, default_value = "localhost:3000")]
        address: String,
    },
    /// Run the built-in BFS verifier; prints a full counterexample trace on
    /// failure.
    Verify {
        /// Stop expanding beyond this depth.
        #[arg(long)]
        max_depth: Option<usize>,
        /// Stop after this many distinct states.
        #[arg(long)]
        max_states: Option<usize>,
    },
    /// Drive one seeded random walk.
    Sim {
        /// Scheduler seed; a failing seed replays the same schedule.
        #[arg(long)]
        seed: Option<u64>,
        /// Number of rules to apply.
        #[arg(long, default_value_t = 10_000)]
        steps: usize,
        /// Persist a JSON run artifact into this directory.
        #[arg(long)]
        artifact_dir: Option<PathBuf>,
    },
}

fn main() -> Result<ExitCode> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    let mut config = ModelConfig::from_env()?;
    if let Some(sockets) = cli.sockets {
        config.sockets = sockets;
    }
    if let Some(values) = cli.values {
        config.values = values;
    }
    config.validate()?;

    match cli.command {
        Command::Check => {
            info!(
                sockets = config.sockets,
                values = config.values,
                "checking every interleaving"
            );
            CoherenceModel { config }
                .checker()
                .threads(num_cpus::get())
                .spawn_dfs()
                .report(&mut std::io::stdout());
        }
        Command::CheckSym => {
            info!(
                sockets = config.sockets,
                values = config.values,
                "checking with symmetry reduction"
            );
            CoherenceModel { config }
                .checker()
                .threads(num_cpus::get())
                .spawn_sym()
                .report(&mut std::io::stdout());
        }
        Command::Explore { address } => {
            info!(%address, "serving the state-space explorer");
            CoherenceModel { config }
                .checker()
                .threads(num_cpus::get())
                .serve(address);
        }
        Command::Verify {
            max_depth,
            max_states,
        } => {
            let options = ExploreOptions {
                max_depth,
                max_states,
            };
            match explore(config, options) {
                Ok(stats) => info!(%stats, "verification passed"),
                Err(counterexample) => {
                    error!(fault = %counterexample.fault, "verification failed");
                    println!("{counterexample}");
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
        Command::Sim {
            seed,
            steps,
            artifact_dir,
        } => {
            let seed = seed.unwrap_or_else(c3d::sim::random_seed);
            info!(seed, steps, "running random walk");
            match random_walk(config, seed, steps) {
                Ok(report) => {
                    info!(seed, steps = report.steps, "walk passed");
                    if let Some(dir) = artifact_dir {
                        let path =
                            RunArtifact::new(config, seed, report.events).persist(&dir)?;
                        info!(path = %path.display(), "artifact written");
                    }
                }
                Err(failure) => {
                    error!(seed, step = failure.step, fault = %failure.fault, "walk failed");
                    println!("{}", failure.state);
                    println!("replay with: c3d sim --seed {seed} --steps {steps}");
                    if let Some(dir) = artifact_dir {
                        let path = RunArtifact::new(config, seed, failure.events.clone())
                            .with_failure(failure.fault.to_string())
                            .persist(&dir)?;
                        info!(path = %path.display(), "artifact written");
                    }
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
