use thiserror::Error;

/// Errors raised by the sequential tests and their strategies.
///
/// All of these are configuration errors: a parameter is outside the domain
/// where the test stays a valid (super)martingale, or the sample stream
/// produced something the test cannot accept.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StatsError {
    #[error("Invalid risk limit {0}: must lie in (0, 1)")]
    InvalidRiskLimit(f64),

    #[error("Invalid upper bound {upper}: must exceed the null mean {t}")]
    InvalidUpperBound { upper: f64, t: f64 },

    #[error("Invalid population size N={n} for max_samples={max_samples}")]
    InvalidPopulation { n: usize, max_samples: usize },

    #[error("Invalid parameter {name}={value}: {reason}")]
    InvalidParameter {
        name: &'static str,
        value: f64,
        reason: &'static str,
    },

    #[error("Invalid error rate {name}={value}: must lie in [0, 1]")]
    InvalidRate { name: &'static str, value: f64 },

    #[error("Bet strategy returned an undefined wager {lambda} at sample {sample}")]
    InvalidBet { lambda: f64, sample: usize },

    #[error("Estimator returned an undefined alternative mean {eta} at sample {sample}")]
    InvalidEstimate { eta: f64, sample: usize },

    #[error("Sample value {value} at draw {sample} is outside [0, {upper}]")]
    SampleOutOfRange {
        value: f64,
        upper: f64,
        sample: usize,
    },

    #[error("Sample source failed at draw {sample}: {reason}")]
    Draw { sample: usize, reason: String },
}

/// Checks that `value` is a finite number inside the open interval
/// `(low, high)`.
pub(crate) fn require_open(
    name: &'static str,
    value: f64,
    low: f64,
    high: f64,
    reason: &'static str,
) -> Result<(), StatsError> {
    if value.is_finite() && value > low && value < high {
        Ok(())
    } else {
        Err(StatsError::InvalidParameter {
            name,
            value,
            reason,
        })
    }
}

/// Checks that `value` is a finite number inside `(low, high]`.
pub(crate) fn require_half_open(
    name: &'static str,
    value: f64,
    low: f64,
    high: f64,
    reason: &'static str,
) -> Result<(), StatsError> {
    if value.is_finite() && value > low && value <= high {
        Ok(())
    } else {
        Err(StatsError::InvalidParameter {
            name,
            value,
            reason,
        })
    }
}
