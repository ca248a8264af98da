use std::collections::BTreeMap;
use std::path::PathBuf;

use miette::IntoDiagnostic;
use rla_core::{Audit, AuditRecord, Card};
use tracing::info;

use super::{build_election, load_election, write_json_artifact};
use crate::cli::OutputFormat;

pub(crate) struct SimulateArgs {
    pub(crate) file: PathBuf,
    pub(crate) seed: Option<u64>,
    pub(crate) mvr_fuzz_pct: Option<f64>,
    pub(crate) format: OutputFormat,
    pub(crate) verbose: bool,
    pub(crate) out: Option<PathBuf>,
}

pub(crate) fn run_simulate(args: SimulateArgs) -> miette::Result<AuditRecord> {
    let mut input = load_election(&args.file)?;
    if let Some(seed) = args.seed {
        input.audit.seed = seed;
    }
    if let Some(pct) = args.mvr_fuzz_pct {
        input.mvr_fuzz_pct = pct;
    }
    let election = build_election(input)?;
    let mvrs: BTreeMap<usize, Card> = election
        .mvrs()?
        .into_iter()
        .map(|card| (card.index, card))
        .collect();
    info!(
        contests = election.contests.len(),
        cards = election.cvrs.len(),
        fuzz = election.mvr_fuzz_pct,
        "starting audit"
    );

    let mut audit = Audit::new(election.contests, election.cvrs, &[], election.config)
        .into_diagnostic()?
        .verbose(args.verbose);
    let record = audit.run_to_completion(&mvrs).into_diagnostic()?.clone();

    if let Some(path) = &args.out {
        write_json_artifact(path, &record)?;
        info!(path = %path.display(), "audit record written");
    }
    match args.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&record).into_diagnostic()?);
        }
        OutputFormat::Text => print!("{}", render_record(&record)),
    }
    Ok(record)
}

pub(crate) fn render_record(record: &AuditRecord) -> String {
    let mut out = String::new();
    for round in &record.rounds {
        out.push_str(&format!(
            "round {}: {} cards selected ({} new)\n",
            round.round,
            round.sampled_prns.len(),
            round.n_new
        ));
        for contest in &round.contests {
            out.push_str(&format!(
                "  contest {} ({}): estimated {} total, sampled {}, {}{}\n",
                contest.contest_id,
                contest.name,
                contest.estimated_total,
                contest.actual_total,
                contest.status,
                if contest.done { " [done]" } else { "" }
            ));
        }
        for assertion in &round.assertions {
            out.push_str(&format!(
                "    {}: n={} p={:.4} {}\n",
                assertion.assertion, assertion.sample_count, assertion.pvalue, assertion.status
            ));
        }
        for failed in &round.failed_tasks {
            out.push_str(&format!("    task {} failed: {}\n", failed.task, failed.reason));
        }
    }
    out
}
