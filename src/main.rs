use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use outbreak::manager::{Manager, RunOptions};
use outbreak::strategy::StrategyKind;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(version, about)]
struct CLI {
    #[arg(long)]
    sim_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Run {
        #[arg(long)]
        seed: u64,

        #[arg(long, value_enum, default_value_t = StrategyKind::Idle)]
        strategy: StrategyKind,

        #[arg(long)]
        steps: Option<usize>,
    },

    Batch {
        #[arg(long)]
        runs: usize,

        #[arg(long, default_value_t = 0)]
        first_seed: u64,

        #[arg(long, value_enum, default_value_t = StrategyKind::Idle)]
        strategy: StrategyKind,

        #[arg(long)]
        steps: Option<usize>,
    },

    Analyze,

    Clean,
}

fn main() {
    env_logger::Builder::new()
        .format_timestamp_millis()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    if let Err(error) = run_cli() {
        log::error!("{error:#?}");
        std::process::exit(1);
    }
}

fn run_cli() -> Result<()> {
    let args = CLI::parse();
    log::info!("{args:#?}");

    let mgr = Manager::new(args.sim_dir).context("failed to construct mgr")?;

    match args.command {
        Command::Run {
            seed,
            strategy,
            steps,
        } => {
            mgr.run_simulation(seed, RunOptions { strategy, steps })?;
        }
        Command::Batch {
            runs,
            first_seed,
            strategy,
            steps,
        } => {
            mgr.run_batch(runs, first_seed, RunOptions { strategy, steps })?;
        }
        Command::Analyze => mgr.run_analysis()?,
        Command::Clean => mgr.clean_sim()?,
    }

    Ok(())
}
