//! Builds the sequential test an assertion is audited with.

use rla_stats::{
    eta_to_lam, AdaptiveBetting, Agrapa, AlphaMart, BettingMart, EstimAdapter, FixedBet,
    OptimalComparisonNoP1, PluralityErrorRates, SequentialTest, TruncShrinkage, T_NULL,
};

use crate::assorter::{Assorter, AssorterKind};
use crate::clca::ClcaAssorter;
use crate::config::{AuditConfig, BettingChoice};
use crate::error::RlaError;

const AGRAPA_C0: f64 = 0.5;
const AGRAPA_C_MAX: f64 = 0.99;
const AGRAPA_C_GROW: f64 = 2.0;

/// Test for a polling assertion over a population of `n` cards.
pub fn polling_test(
    assorter: &AssorterKind,
    n: usize,
    config: &AuditConfig,
) -> Result<Box<dyn SequentialTest>, RlaError> {
    let upper = assorter.upper_bound();
    let eta0 = assorter.reported_mean();
    if eta0 <= T_NULL {
        return Err(RlaError::InvalidMargin {
            assertion: assorter.desc(),
            mean: eta0,
            noerror: eta0,
        });
    }
    let risk = config.risk_limit;
    let test: Box<dyn SequentialTest> = match config.betting {
        BettingChoice::Adaptive { d } | BettingChoice::ShrinkTrunc { d } => {
            let estim = TruncShrinkage::with_defaults(n, false, upper, eta0, d)?;
            Box::new(AlphaMart::new(Box::new(estim), n, false, risk, upper)?)
        }
        BettingChoice::Fixed { lambda } => {
            Box::new(BettingMart::new(Box::new(FixedBet::new(lambda)?), n, false, risk, upper)?)
        }
        BettingChoice::Agrapa => {
            let lam0 = eta_to_lam(eta0, T_NULL, upper);
            let bet = Agrapa::new(n, false, lam0, AGRAPA_C0, AGRAPA_C_MAX, AGRAPA_C_GROW)?;
            Box::new(BettingMart::new(Box::new(bet), n, false, risk, upper)?)
        }
        BettingChoice::OptimalComparison => {
            return Err(RlaError::config(
                "betting",
                "optimal_comparison needs a comparison audit",
            ))
        }
    };
    Ok(test)
}

/// Test for a comparison assertion over a population of `n` cards.
///
/// `rates` are the discrepancy rates the strategy starts from.
pub fn clca_test(
    clca: &ClcaAssorter,
    n: usize,
    config: &AuditConfig,
    rates: &PluralityErrorRates,
) -> Result<Box<dyn SequentialTest>, RlaError> {
    let upper = clca.upper_bound();
    let noerror = clca.noerror();
    let risk = config.risk_limit;
    let bet: Box<dyn rla_stats::BettingFn> = match config.betting {
        BettingChoice::Adaptive { d } => {
            Box::new(AdaptiveBetting::new(n, false, noerror, *rates, d)?)
        }
        BettingChoice::Fixed { lambda } => Box::new(FixedBet::new(lambda)?),
        BettingChoice::Agrapa => {
            let lam0 = eta_to_lam(noerror, T_NULL, upper);
            Box::new(Agrapa::new(
                n,
                false,
                lam0,
                AGRAPA_C0,
                AGRAPA_C_MAX,
                AGRAPA_C_GROW,
            )?)
        }
        BettingChoice::OptimalComparison => {
            Box::new(OptimalComparisonNoP1::new(n, false, upper, rates.p2o)?)
        }
        BettingChoice::ShrinkTrunc { d } => {
            let estim = TruncShrinkage::with_defaults(n, false, upper, noerror, d)?;
            Box::new(EstimAdapter::new(n, false, upper, Box::new(estim))?)
        }
    };
    let test = BettingMart::new(bet, n, false, risk, upper)?.with_tracker(clca.tracker());
    Ok(Box::new(test))
}
