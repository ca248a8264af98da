//! `rla`: runs simulated risk-limiting audits from an election file.

mod cli;
mod commands;

use clap::Parser;
use miette::IntoDiagnostic;
use rla_core::AuditConfig;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use commands::estimate::{run_estimate, EstimateArgs};
use commands::simulate::{run_simulate, SimulateArgs};

fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Simulate {
            file,
            seed,
            mvr_fuzz_pct,
            format,
            out,
        } => {
            run_simulate(SimulateArgs {
                file,
                seed,
                mvr_fuzz_pct,
                format,
                verbose: cli.verbose,
                out,
            })?;
        }
        Commands::Estimate {
            file,
            quantile,
            trials,
            format,
        } => {
            run_estimate(EstimateArgs {
                file,
                quantile,
                trials,
                format,
                verbose: cli.verbose,
            })?;
        }
        Commands::Config => {
            let json = serde_json::to_string_pretty(&AuditConfig::default()).into_diagnostic()?;
            println!("{json}");
        }
    }
    Ok(())
}
