use rla_stats::StatsError;
use thiserror::Error;

use crate::card::PoolId;
use crate::contest::ContestId;

/// Errors raised while setting up or running an audit.
///
/// Statistical inconclusiveness is never an error: it is reported as
/// [`rla_stats::TestH0Status::LimitReached`] on the assertion.
#[derive(Debug, Error)]
pub enum RlaError {
    #[error("Invalid configuration: {field} {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    #[error("Invalid contest {contest}: {reason}")]
    InvalidContest { contest: ContestId, reason: String },

    #[error("Assertion '{assertion}' cannot be audited: reported mean {mean} (noerror {noerror}) must exceed 1/2")]
    InvalidMargin {
        assertion: String,
        mean: f64,
        noerror: f64,
    },

    #[error("CVR '{card}' does not contain contest {contest} but the audit uses card styles")]
    CvrMissingContest { contest: ContestId, card: String },

    #[error("Card pool {pool} is not known to assertion '{assertion}'")]
    UnknownPool { pool: PoolId, assertion: String },

    #[error("Assertion '{assertion}' cannot compute a mean from pooled tallies")]
    PoolUnsupported { assertion: String },

    #[error("Sampler for contest {contest} exhausted after {drawn} samples")]
    SamplerExhausted { contest: ContestId, drawn: usize },

    #[error("No MVR recorded for sampled card index {index}")]
    MissingMvr { index: usize },

    #[error("Task '{task}' failed: {reason}")]
    TaskFailed { task: String, reason: String },

    #[error(transparent)]
    Stats(#[from] StatsError),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl RlaError {
    pub(crate) fn config(field: &'static str, reason: impl Into<String>) -> Self {
        RlaError::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn contest(contest: ContestId, reason: impl Into<String>) -> Self {
        RlaError::InvalidContest {
            contest,
            reason: reason.into(),
        }
    }
}
