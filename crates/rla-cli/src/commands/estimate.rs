use std::path::PathBuf;

use miette::IntoDiagnostic;
use rla_core::{Audit, AuditRound};

use super::{build_election, load_election};
use crate::cli::OutputFormat;

pub(crate) struct EstimateArgs {
    pub(crate) file: PathBuf,
    pub(crate) quantile: Option<f64>,
    pub(crate) trials: Option<usize>,
    pub(crate) format: OutputFormat,
    pub(crate) verbose: bool,
}

pub(crate) fn run_estimate(args: EstimateArgs) -> miette::Result<AuditRound> {
    let mut input = load_election(&args.file)?;
    if let Some(q) = args.quantile {
        input.audit.quantile = q;
    }
    if let Some(n) = args.trials {
        input.audit.n_trials = n;
    }
    let election = build_election(input)?;
    let mut audit = Audit::new(election.contests, election.cvrs, &[], election.config)
        .into_diagnostic()?
        .verbose(args.verbose);
    let planned = audit.estimate_round().into_diagnostic()?;

    match args.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&planned).into_diagnostic()?);
        }
        OutputFormat::Text => {
            for contest in &planned.contests {
                if contest.done {
                    println!("contest {}: {}", contest.contest_id, contest.status);
                } else {
                    println!(
                        "contest {}: {} samples ({} cards in the selection carry it)",
                        contest.contest_id, contest.estimated_total, contest.actual_total
                    );
                }
            }
            println!(
                "{} cards to audit in round {}",
                planned.sampled_prns.len(),
                planned.round
            );
        }
    }
    Ok(planned)
}
