//! Sequential tests of the hypothesis that a bounded population mean is at
//! most 1/2.
//!
//! The two test families share one stopping rule and one p-value definition:
//!
//! * [`nonneg_mean::AlphaMart`]: ALPHA, driven by an alternative-mean
//!   estimator ([`estim::EstimFn`]).
//! * [`nonneg_mean::BettingMart`]: the betting martingale, driven by a
//!   wager strategy ([`betting::BettingFn`]).
//!
//! Running statistics and the comparison-audit discrepancy taxonomy live in
//! [`tracker`]; [`quantile`] summarizes repeated trials.

pub mod betting;
pub mod error;
pub mod estim;
pub mod nonneg_mean;
pub mod optimize;
pub mod quantile;
pub mod tracker;

pub use betting::{
    eta_to_lam, lam_to_eta, AdaptiveBetting, Agrapa, BettingFn, EstimAdapter, FixedBet,
    OptimalComparisonNoP1, OracleBet,
};
pub use error::StatsError;
pub use estim::{EstimFn, FixedAlternativeMean, FixedEstim, TruncShrinkage};
pub use nonneg_mean::{AlphaMart, BettingMart, SequentialTest, TestH0Result, TestH0Status};
pub use quantile::{find_quantile, Deciles};
pub use tracker::{
    ClcaClassifier, ErrorClass, ErrorCounts, PluralityErrorRates, SampleTracker, Taus, Welford,
};

/// Population mean under the null hypothesis.
pub const T_NULL: f64 = 0.5;

/// Machine epsilon for `f64`.
pub const EPS: f64 = f64::EPSILON;

const RTOL: f64 = 1.0e-5;
const ATOL: f64 = 1.0e-8;

/// `|a - b| <= atol + rtol * |b|`, the same closeness test numpy uses.
pub fn double_is_close(a: f64, b: f64) -> bool {
    if a == b {
        return true;
    }
    (a - b).abs() <= ATOL + RTOL * b.abs()
}

/// Converts a diluted margin to the corresponding assorter mean.
pub fn margin2mean(margin: f64) -> f64 {
    (margin + 1.0) / 2.0
}

/// Converts an assorter mean to the corresponding diluted margin.
pub fn mean2margin(mean: f64) -> f64 {
    2.0 * mean - 1.0
}
