//! Wager strategies for the betting martingale.
//!
//! A bet `lam_j` is a predictable function of the draws before `j`. Choosing
//! `lam_j` is equivalent to choosing an ALPHA alternative mean:
//! `lam = (eta / mu - 1) / (u - mu)` and `eta = mu (1 + lam (u - mu))`.
//! As `eta` ranges over `[mu, u]`, `lam` ranges over `[0, 1 / mu]`.

use crate::error::{require_half_open, require_open, StatsError};
use crate::estim::EstimFn;
use crate::optimize::golden_section_max;
use crate::tracker::{ErrorClass, PluralityErrorRates, SampleTracker};
use crate::T_NULL;

/// Largest wager the Kelly searches consider.
pub const MAX_KELLY_BET: f64 = 2.0;

/// Rate floor for shrinkage estimates of the discrepancy rates.
pub const RATE_FLOOR: f64 = 1.0e-5;

/// Chooses the fraction of the current fortune to wager on the next draw.
pub trait BettingFn: Send + Sync + std::fmt::Debug {
    fn bet(&self, prev: &SampleTracker) -> f64;
}

/// Alternative mean implied by the wager `lam`.
///
/// # Parameters
/// - `lam`: Fraction of the fortune wagered.
/// - `mu`: Population mean under the null.
/// - `upper`: Upper bound of the assorter.
///
/// # Returns
/// `mu (1 + lam (upper - mu))`.
pub fn lam_to_eta(lam: f64, mu: f64, upper: f64) -> f64 {
    mu * (1.0 + lam * (upper - mu))
}

/// Wager implied by the alternative mean `eta`; inverse of [`lam_to_eta`].
///
/// # Parameters
/// - `eta`: Alternative mean, in `[mu, upper]` for a non-negative bet.
/// - `mu`: Population mean under the null.
/// - `upper`: Upper bound of the assorter.
///
/// # Returns
/// `(eta / mu - 1) / (upper - mu)`. Negative when `eta < mu`.
pub fn eta_to_lam(eta: f64, mu: f64, upper: f64) -> f64 {
    (eta / mu - 1.0) / (upper - mu)
}

// ---------------------------------------------------------------------------
// Simple strategies
// ---------------------------------------------------------------------------

/// Wagers the same fraction on every draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedBet {
    pub lambda: f64,
}

impl FixedBet {
    /// Construct a fixed bet.
    ///
    /// # Returns
    /// [`StatsError::InvalidParameter`] unless `lambda` is finite and
    /// non-negative.
    pub fn new(lambda: f64) -> Result<Self, StatsError> {
        if !(lambda.is_finite() && lambda >= 0.0) {
            return Err(StatsError::InvalidParameter {
                name: "lambda",
                value: lambda,
                reason: "must be finite and non-negative",
            });
        }
        Ok(Self { lambda })
    }
}

impl BettingFn for FixedBet {
    fn bet(&self, _prev: &SampleTracker) -> f64 {
        self.lambda
    }
}

/// Approximate growth rate adaptive to the particular alternative.
///
/// The cap `c_j` grows from `c0` toward `c_max` with the number of draws.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Agrapa {
    pub n: usize,
    pub with_replacement: bool,
    pub lam0: f64,
    pub c0: f64,
    pub c_max: f64,
    pub c_grow: f64,
}

impl Agrapa {
    /// Construct a validated AGRAPA bet.
    ///
    /// # Parameters
    /// - `n`: Population size.
    /// - `with_replacement`: Whether draws are made with replacement.
    /// - `lam0`: Bet placed before any draw.
    /// - `c0`: Initial cap on `lam mu`, in `(0, 1)`.
    /// - `c_max`: Limit of the cap, in `[c0, 1]`.
    /// - `c_grow`: How fast the cap approaches `c_max`.
    pub fn new(
        n: usize,
        with_replacement: bool,
        lam0: f64,
        c0: f64,
        c_max: f64,
        c_grow: f64,
    ) -> Result<Self, StatsError> {
        require_open("c0", c0, 0.0, 1.0, "must lie in (0, 1)")?;
        require_open("c_max", c_max, c0 - f64::EPSILON, 1.0 + f64::EPSILON, "must lie in [c0, 1]")?;
        if !(lam0.is_finite() && lam0 >= 0.0) {
            return Err(StatsError::InvalidParameter {
                name: "lam0",
                value: lam0,
                reason: "must be finite and non-negative",
            });
        }
        if !(c_grow.is_finite() && c_grow >= 0.0) {
            return Err(StatsError::InvalidParameter {
                name: "c_grow",
                value: c_grow,
                reason: "must be finite and non-negative",
            });
        }
        Ok(Self {
            n,
            with_replacement,
            lam0,
            c0,
            c_max,
            c_grow,
        })
    }
}

impl BettingFn for Agrapa {
    fn bet(&self, prev: &SampleTracker) -> f64 {
        let seen = prev.num_samples();
        if seen == 0 {
            return self.lam0;
        }
        let t_adj = prev.null_mean(self.n, self.with_replacement);
        let mean_diff = prev.mean() - t_adj;
        let denom = prev.variance() + mean_diff * mean_diff;
        if denom <= 0.0 || t_adj <= 0.0 {
            return 0.0;
        }
        let lamj = mean_diff / denom;
        let c = self.c0
            + (self.c_max - self.c0) * (1.0 - 1.0 / (1.0 + self.c_grow * (seen as f64).sqrt()));
        lamj.min(c / t_adj).max(0.0)
    }
}

/// Closed-form bet for comparison audits that assumes a two-vote
/// overstatement rate `p2` and ignores one-vote overstatements.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimalComparisonNoP1 {
    pub n: usize,
    pub with_replacement: bool,
    pub upper: f64,
    pub p2: f64,
}

impl OptimalComparisonNoP1 {
    /// `upper` must exceed 1 and `p2` lie in `[0, 1)`.
    pub fn new(n: usize, with_replacement: bool, upper: f64, p2: f64) -> Result<Self, StatsError> {
        if !(upper.is_finite() && upper > 1.0) {
            return Err(StatsError::InvalidUpperBound { upper, t: 1.0 });
        }
        if !(0.0..1.0).contains(&p2) {
            return Err(StatsError::InvalidRate {
                name: "p2",
                value: p2,
            });
        }
        Ok(Self {
            n,
            with_replacement,
            upper,
            p2,
        })
    }

    /// The implied alternative mean, independent of the history.
    pub fn eta(&self) -> f64 {
        let u = self.upper;
        (1.0 - u * (1.0 - self.p2)) / (2.0 - 2.0 * u) + u * (1.0 - self.p2) - 0.5
    }
}

impl BettingFn for OptimalComparisonNoP1 {
    fn bet(&self, prev: &SampleTracker) -> f64 {
        let mu = prev.null_mean(self.n, self.with_replacement);
        eta_to_lam(self.eta(), mu, self.upper)
    }
}

/// Turns an [`EstimFn`] into a [`BettingFn`].
#[derive(Debug)]
pub struct EstimAdapter {
    pub n: usize,
    pub with_replacement: bool,
    pub upper: f64,
    pub estim: Box<dyn EstimFn>,
}

impl EstimAdapter {
    /// Wraps `estim`; `upper` must exceed 1/2.
    pub fn new(
        n: usize,
        with_replacement: bool,
        upper: f64,
        estim: Box<dyn EstimFn>,
    ) -> Result<Self, StatsError> {
        if !(upper.is_finite() && upper > T_NULL) {
            return Err(StatsError::InvalidUpperBound { upper, t: T_NULL });
        }
        Ok(Self {
            n,
            with_replacement,
            upper,
            estim,
        })
    }
}

impl BettingFn for EstimAdapter {
    fn bet(&self, prev: &SampleTracker) -> f64 {
        let mu = prev.null_mean(self.n, self.with_replacement);
        let eta = self.estim.eta(prev).min(self.upper);
        eta_to_lam(eta, mu, self.upper)
    }
}

// ---------------------------------------------------------------------------
// Kelly bets on the comparison taxonomy
// ---------------------------------------------------------------------------

/// `E ln(1 + lam (x - mu))` where `x` takes the five canonical comparison
/// values with the given rates.
pub fn expected_log_growth(lam: f64, mu: f64, noerror: f64, rates: &PluralityErrorRates) -> f64 {
    let classes = [
        (ErrorClass::Noerror, noerror),
        (ErrorClass::P2o, 0.0),
        (ErrorClass::P1o, 0.5 * noerror),
        (ErrorClass::P1u, 1.5 * noerror),
        (ErrorClass::P2u, 2.0 * noerror),
    ];
    let mut total = 0.0;
    for (class, x) in classes {
        let p = rates.rate(class).max(0.0);
        if p == 0.0 {
            continue;
        }
        let growth = 1.0 + lam * (x - mu);
        if growth <= 0.0 {
            return f64::NEG_INFINITY;
        }
        total += p * growth.ln();
    }
    total
}

/// The wager maximizing [`expected_log_growth`] over `[0, min(2, 1 / mu))`.
pub fn kelly_bet(mu: f64, noerror: f64, rates: &PluralityErrorRates) -> f64 {
    if mu <= 0.0 {
        return 0.0;
    }
    let hi = MAX_KELLY_BET.min(1.0 / mu) * (1.0 - 1.0e-9);
    golden_section_max(
        |lam| expected_log_growth(lam, mu, noerror, rates),
        0.0,
        hi,
        1.0e-9,
        1000,
    )
    .point
}

/// Adaptive Kelly bet for comparison audits.
///
/// Discrepancy rates are shrinkage estimates blending the a priori rates
/// (weight `d`) with the counts measured so far, each clamped to
/// `[RATE_FLOOR, 1]`. The wager maximizes the expected log growth of the
/// martingale under those rates.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveBetting {
    pub n: usize,
    pub with_replacement: bool,
    pub noerror: f64,
    pub apriori: PluralityErrorRates,
    pub d: usize,
}

impl AdaptiveBetting {
    /// Construct an adaptive bet.
    ///
    /// # Parameters
    /// - `n`: Population size.
    /// - `with_replacement`: Whether draws are made with replacement.
    /// - `noerror`: Comparison value of a record without discrepancy, in `(1/2, 1]`.
    /// - `apriori`: Rates assumed before any draw.
    /// - `d`: Weight of `apriori` in the shrinkage estimate.
    ///
    /// # Returns
    /// The bet, or an error when `noerror` or `apriori` is out of range.
    pub fn new(
        n: usize,
        with_replacement: bool,
        noerror: f64,
        apriori: PluralityErrorRates,
        d: usize,
    ) -> Result<Self, StatsError> {
        require_half_open("noerror", noerror, T_NULL, 1.0, "must lie in (1/2, 1]")?;
        apriori.validate()?;
        Ok(Self {
            n,
            with_replacement,
            noerror,
            apriori,
            d,
        })
    }

    /// Rates blended from the prior and the tracker's measured counts.
    pub fn estimated_rates(&self, prev: &SampleTracker) -> PluralityErrorRates {
        let seen = prev.num_samples();
        let counts = match prev.error_counts() {
            Some(counts) if seen > 0 => *counts,
            _ => return self.apriori,
        };
        let denom = (self.d + seen).saturating_sub(1).max(1) as f64;
        let blend = |prior: f64, count: usize| {
            ((self.d as f64 * prior + count as f64) / denom).clamp(RATE_FLOOR, 1.0)
        };
        PluralityErrorRates {
            p2o: blend(self.apriori.p2o, counts.p2o),
            p1o: blend(self.apriori.p1o, counts.p1o),
            p1u: blend(self.apriori.p1u, counts.p1u),
            p2u: blend(self.apriori.p2u, counts.p2u),
        }
    }
}

impl BettingFn for AdaptiveBetting {
    fn bet(&self, prev: &SampleTracker) -> f64 {
        let mu = prev.null_mean(self.n, self.with_replacement);
        let rates = self.estimated_rates(prev);
        kelly_bet(mu, self.noerror, &rates)
    }
}

/// Kelly bet computed once from known discrepancy rates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OracleBet {
    pub lambda: f64,
}

impl OracleBet {
    /// Solves the Kelly problem at the null mean once, for `noerror` in `(1/2, 1]`.
    pub fn new(noerror: f64, rates: &PluralityErrorRates) -> Result<Self, StatsError> {
        require_half_open("noerror", noerror, T_NULL, 1.0, "must lie in (1/2, 1]")?;
        rates.validate()?;
        Ok(Self {
            lambda: kelly_bet(T_NULL, noerror, rates),
        })
    }
}

impl BettingFn for OracleBet {
    fn bet(&self, _prev: &SampleTracker) -> f64 {
        self.lambda
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker_with(xs: &[f64]) -> SampleTracker {
        let mut t = SampleTracker::new();
        xs.iter().for_each(|x| t.add_sample(*x));
        t
    }

    #[test]
    fn lam_eta_conversions_invert() {
        let (mu, u) = (0.5, 1.2);
        let lam = eta_to_lam(0.7, mu, u);
        assert!((lam_to_eta(lam, mu, u) - 0.7).abs() < 1e-12);
        assert_eq!(eta_to_lam(mu, mu, u), 0.0);
    }

    #[test]
    fn agrapa_first_bet_is_lam0() {
        let bet = Agrapa::new(100, false, 0.7, 0.5, 0.9, 1.0).unwrap();
        assert_eq!(bet.bet(&SampleTracker::new()), 0.7);
    }

    #[test]
    fn agrapa_bet_is_capped() {
        let bet = Agrapa::new(1000, false, 0.7, 0.5, 0.9, 1.0).unwrap();
        let prev = tracker_with(&[1.0, 1.0, 0.9, 1.0]);
        let lam = bet.bet(&prev);
        let t_adj = prev.null_mean(1000, false);
        let c = 0.5 + 0.4 * (1.0 - 1.0 / 3.0);
        assert!(lam > 0.0);
        assert!(lam <= c / t_adj + 1e-12);
    }

    #[test]
    fn agrapa_never_bets_against() {
        let bet = Agrapa::new(1000, false, 0.7, 0.5, 0.9, 1.0).unwrap();
        assert_eq!(bet.bet(&tracker_with(&[0.0, 0.1, 0.0])), 0.0);
    }

    #[test]
    fn optimal_comparison_requires_upper_above_one() {
        assert!(OptimalComparisonNoP1::new(100, false, 1.0, 1e-4).is_err());
        let bet = OptimalComparisonNoP1::new(100, false, 1.1, 1e-4).unwrap();
        let lam = bet.bet(&SampleTracker::new());
        assert!(lam > 0.0 && lam < 2.0, "lam={lam}");
    }

    #[test]
    fn kelly_bet_grows_with_margin() {
        let rates = PluralityErrorRates::ZERO;
        // with no errors every draw is noerror > mu, so the bet is the maximum
        let lam = kelly_bet(0.5, 0.55, &rates);
        assert!((lam - 2.0).abs() < 1e-6, "lam={lam}");
        let noisy = PluralityErrorRates::new(0.01, 0.01, 0.0, 0.0).unwrap();
        let cautious = kelly_bet(0.5, 0.55, &noisy);
        assert!(cautious < lam);
        assert!(cautious > 0.0);
    }

    #[test]
    fn adaptive_rates_blend_prior_and_counts() {
        let bet = AdaptiveBetting::new(100, false, 0.6, PluralityErrorRates::ZERO, 10).unwrap();
        let mut prev = SampleTracker::for_clca(0.6, 1.0);
        assert_eq!(bet.estimated_rates(&prev), PluralityErrorRates::ZERO);
        prev.add_sample(0.0);
        for _ in 0..9 {
            prev.add_sample(0.6);
        }
        let rates = bet.estimated_rates(&prev);
        assert!((rates.p2o - 1.0 / 19.0).abs() < 1e-12);
        assert_eq!(rates.p1o, RATE_FLOOR);
    }

    #[test]
    fn unanimous_noerror_is_a_valid_bet_input() {
        // margin 1 gives noerror = 1/(2 - 1) = 1
        let bet = AdaptiveBetting::new(100, false, 1.0, PluralityErrorRates::ZERO, 10).unwrap();
        let lam = bet.bet(&SampleTracker::for_clca(1.0, 1.0));
        assert!((lam - 2.0).abs() < 1e-6, "lam={lam}");
        let oracle = OracleBet::new(1.0, &PluralityErrorRates::STANDARD).unwrap();
        assert!(oracle.lambda > 0.0 && oracle.lambda <= 2.0);

        assert!(AdaptiveBetting::new(100, false, 1.0 + 1e-9, PluralityErrorRates::ZERO, 10).is_err());
        assert!(OracleBet::new(0.5, &PluralityErrorRates::ZERO).is_err());
    }

    #[test]
    fn oracle_bet_is_constant() {
        let rates = PluralityErrorRates::STANDARD;
        let bet = OracleBet::new(0.55, &rates).unwrap();
        assert_eq!(bet.bet(&SampleTracker::new()), bet.bet(&tracker_with(&[0.0])));
        assert!(bet.lambda > 0.0 && bet.lambda < 2.0);
    }
}
