//! pool-sim: drive lending rounds of a staking pool against a scripted elector
//!
//! usage:
//!   pool-sim scenario > scenario.json
//!   pool-sim run --scenario scenario.json --rounds 5

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

mod scenario;

use scenario::Scenario;

#[derive(Parser, Debug)]
#[command(name = "pool-sim")]
#[command(about = "simulate lending rounds of a validator staking pool")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// run a scenario and print one report per round as JSON
    Run {
        /// scenario file (JSON); the built-in scenario when omitted
        #[arg(short, long)]
        scenario: Option<PathBuf>,

        /// override the number of rounds
        #[arg(short, long)]
        rounds: Option<u32>,
    },
    /// print the built-in scenario
    Scenario,
}

fn load(path: Option<PathBuf>) -> Result<Scenario> {
    let Some(path) = path else {
        return Ok(Scenario::default());
    };
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pool_sim=info,staking_pool=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Command::Scenario => {
            println!("{}", serde_json::to_string_pretty(&Scenario::default())?);
        }
        Command::Run { scenario, rounds } => {
            let mut scenario = load(scenario)?;
            if let Some(rounds) = rounds {
                scenario.rounds = rounds;
            }
            info!(rounds = scenario.rounds, validators = scenario.validators.len(), "starting simulation");

            let reports = scenario::run(&scenario)?;
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
    }

    Ok(())
}
