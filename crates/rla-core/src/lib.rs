//! Risk-limiting audit engine.
//!
//! Contests are reduced to assertions ([`assorter`]); comparison audits wrap
//! each one in a [`clca::ClcaAssorter`]. [`sampler`], [`simulate`] and
//! [`fuzz`] produce the value streams that the sequential tests of
//! [`rla_stats`] consume. [`estimate`] runs those tests repeatedly to size a
//! round, [`runner`] spreads that work over threads, and [`consistent`]
//! turns per-contest sample sizes into one card selection. [`audit`] drives
//! the rounds.

pub mod assorter;
pub mod audit;
pub mod card;
pub mod clca;
pub mod config;
pub mod consistent;
pub mod contest;
pub mod context;
pub mod error;
pub mod estimate;
pub mod fuzz;
pub mod runner;
pub mod sampler;
pub mod simulate;
pub mod strategy;
pub mod test_data;

pub use assorter::{
    assorters_for, Assorter, AssorterKind, NebAssorter, PluralityAssorter, SuperMajorityAssorter,
};
pub use audit::{
    Assertion, AssertionKind, AssertionRound, Audit, AuditRecord, AuditRound, ContestRound,
    FailedTask,
};
pub use card::{card_prn, sort_by_prn, Card, CardPool, PoolId, PoolTally};
pub use clca::ClcaAssorter;
pub use config::{AuditConfig, AuditType, BettingChoice, ErrorStrategy};
pub use consistent::{consistent_sampling, sample_with_budget, SampleSelection, SampleTarget};
pub use contest::{CandidateId, ChoiceFunction, Contest, ContestId, ContestSpec, ContestUnderAudit};
pub use context::RunContext;
pub use error::RlaError;
pub use estimate::{run_repeated, EstimationResult, EstimationTask, RunRepeatedResult};
pub use fuzz::{make_fuzzed_cards, FuzzSampler};
pub use runner::{run_tasks, TaskOutcome};
pub use sampler::{draw_fn, ClcaWithoutReplacement, PollWithoutReplacement, Sampler};
pub use simulate::ClcaSimulatedErrorRates;
