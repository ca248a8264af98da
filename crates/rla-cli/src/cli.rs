//! CLI argument definitions: top-level `Cli` struct and `Commands` enum.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

pub(crate) const CLI_LONG_ABOUT: &str =
    "Simulates risk-limiting audits of synthetic elections.\n\n\
    An election file lists the contests (vote counts, cards, phantoms), the\n\
    number of cards, and optionally an `audit` configuration and the share of\n\
    hand-audited records to corrupt (`mvr_fuzz_pct`).\n\n\
    Typical use:\n  \
    1. rla config > audit.json\n  \
    2. rla estimate election.json\n  \
    3. rla simulate election.json --format json --out record.json";

#[derive(Parser)]
#[command(name = "rla")]
#[command(about = "Risk-limiting audit simulator")]
#[command(long_about = CLI_LONG_ABOUT)]
#[command(version)]
pub(crate) struct Cli {
    /// Log every estimation trial at debug level
    #[arg(long, global = true)]
    pub(crate) verbose: bool,

    #[command(subcommand)]
    pub(crate) command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run a multi-round audit to completion
    Simulate {
        /// Election description (JSON)
        file: PathBuf,

        /// Override the audit seed
        #[arg(long)]
        seed: Option<u64>,

        /// Override the share of hand-audited records that disagree with their CVRs
        #[arg(long)]
        mvr_fuzz_pct: Option<f64>,

        /// Output format: text | json
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,

        /// Write the audit record to this file
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Estimate the first round's sample sizes without auditing
    Estimate {
        /// Election description (JSON)
        file: PathBuf,

        /// Override the estimation quantile
        #[arg(long)]
        quantile: Option<f64>,

        /// Override the number of trials per assertion
        #[arg(long)]
        trials: Option<usize>,

        /// Output format: text | json
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Print the default audit configuration as JSON
    Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}
