//! Alternative-mean estimators for ALPHA.
//!
//! An estimator only sees the samples drawn *before* the current one, which
//! keeps the resulting test a nonnegative supermartingale under the null.

use crate::error::{require_open, StatsError};
use crate::tracker::SampleTracker;
use crate::{EPS, T_NULL};

/// Chooses the alternative mean `eta_j` for the next draw.
pub trait EstimFn: Send + Sync + std::fmt::Debug {
    fn eta(&self, prev: &SampleTracker) -> f64;
}

/// Always returns the same `eta0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedEstim {
    pub eta0: f64,
}

impl FixedEstim {
    pub fn new(eta0: f64) -> Self {
        Self { eta0 }
    }
}

impl EstimFn for FixedEstim {
    fn eta(&self, _prev: &SampleTracker) -> f64 {
        self.eta0
    }
}

/// Keeps the alternative population mean fixed at `eta0` and returns the
/// implied mean of the cards not yet drawn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedAlternativeMean {
    pub n: usize,
    pub eta0: f64,
}

impl EstimFn for FixedAlternativeMean {
    fn eta(&self, prev: &SampleTracker) -> f64 {
        let seen = prev.num_samples() as f64;
        (self.n as f64 * self.eta0 - prev.sum()) / (self.n as f64 - seen)
    }
}

/// Shrink-and-truncate estimator.
///
/// The estimate is a weighted average of the prior `eta0` (weight `d`) and
/// the samples seen so far, optionally pulled toward `upper` by `f / sd`.
/// It is then truncated to `[max(t, m_j + c / sqrt(d + j - 1)), upper (1 - eps)]`.
#[derive(Debug, Clone, PartialEq)]
pub struct TruncShrinkage {
    n: usize,
    with_replacement: bool,
    upper: f64,
    minsd: f64,
    eta0: f64,
    c: f64,
    d: usize,
    f: f64,
}

impl TruncShrinkage {
    /// # Parameters
    /// - `n`: population size the samples are drawn from
    /// - `upper`: upper bound on the sample values
    /// - `minsd`: lower bound on the standard deviation used by the `f` term
    /// - `eta0`: prior alternative mean
    /// - `c`: scale of the shrinking lower truncation
    /// - `d`: weight given to `eta0`
    /// - `f`: weight of the variance term (0 disables it)
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        n: usize,
        with_replacement: bool,
        upper: f64,
        minsd: f64,
        eta0: f64,
        c: f64,
        d: usize,
        f: f64,
    ) -> Result<Self, StatsError> {
        require_open("upper", upper, 0.0, f64::INFINITY, "must be positive")?;
        require_open("eta0", eta0, 0.0, upper + EPS, "must lie in (0, upper]")?;
        require_open("c", c, 0.0, f64::INFINITY, "must be positive")?;
        if d == 0 {
            return Err(StatsError::InvalidParameter {
                name: "d",
                value: 0.0,
                reason: "must be at least 1",
            });
        }
        if !(f.is_finite() && f >= 0.0) {
            return Err(StatsError::InvalidParameter {
                name: "f",
                value: f,
                reason: "must be non-negative",
            });
        }
        Ok(Self {
            n,
            with_replacement,
            upper,
            minsd,
            eta0,
            c,
            d,
            f,
        })
    }

    /// The usual defaults: `c = (eta0 - t) / 2`, no variance term.
    pub fn with_defaults(
        n: usize,
        with_replacement: bool,
        upper: f64,
        eta0: f64,
        d: usize,
    ) -> Result<Self, StatsError> {
        let c = ((eta0 - T_NULL) / 2.0).max(EPS.sqrt());
        Self::new(n, with_replacement, upper, 1.0e-6, eta0, c, d, 0.0)
    }

    /// Initial alternative mean, used before any draw.
    pub fn eta0(&self) -> f64 {
        self.eta0
    }

    pub fn upper(&self) -> f64 {
        self.upper
    }
}

impl EstimFn for TruncShrinkage {
    fn eta(&self, prev: &SampleTracker) -> f64 {
        let lastj = prev.num_samples();
        let dj1 = (self.d + lastj) as f64;
        let weighted = (self.d as f64 * self.eta0 + prev.sum()) / dj1;

        let est = if self.f == 0.0 {
            weighted
        } else {
            let sd = if lastj < 2 {
                1.0
            } else {
                prev.welford().std_dev().max(self.minsd)
            };
            (weighted + self.upper * self.f / sd) / (1.0 + self.f / sd)
        };

        let mean = prev.null_mean(self.n, self.with_replacement);
        let cap_below = (mean + self.c / dj1.sqrt()).max(T_NULL);
        let cap_above = self.upper * (1.0 - EPS);
        est.max(cap_below).min(cap_above)
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
    fn first_estimate_is_prior() {
        let est = TruncShrinkage::with_defaults(100, false, 1.0, 0.6, 10).unwrap();
        let eta = est.eta(&SampleTracker::new());
        assert!((eta - 0.6).abs() < 1e-12);
    }

    #[test]
    fn shrinks_toward_sample_mean() {
        let est = TruncShrinkage::with_defaults(10_000, false, 1.0, 0.6, 10).unwrap();
        let high = tracker_with(&[1.0; 20]);
        let low = tracker_with(&[0.55; 20]);
        let eta_high = est.eta(&high);
        let eta_low = est.eta(&low);
        assert!(eta_high > 0.6, "eta_high={eta_high}");
        assert!(eta_low < eta_high);
        assert!(eta_high < 1.0);
    }

    #[test]
    fn truncated_below_by_null_mean_plus_margin() {
        let est = TruncShrinkage::new(20, false, 1.0, 1e-6, 0.51, 0.1, 1, 0.0).unwrap();
        // five zeros push the null mean of the remaining cards well above 1/2
        let prev = tracker_with(&[0.0; 5]);
        let mean = prev.null_mean(20, false);
        let eta = est.eta(&prev);
        assert!(eta >= mean + 0.1 / 6.0_f64.sqrt() - 1e-12);
    }

    #[test]
    fn truncated_above_below_upper() {
        let est = TruncShrinkage::new(1000, true, 1.0, 1e-6, 1.0, 0.1, 1, 5.0).unwrap();
        let eta = est.eta(&tracker_with(&[1.0; 10]));
        assert!(eta < 1.0);
    }

    #[test]
    fn rejects_zero_weight() {
        assert!(matches!(
            TruncShrinkage::new(10, false, 1.0, 1e-6, 0.6, 0.05, 0, 0.0),
            Err(StatsError::InvalidParameter { name: "d", .. })
        ));
    }

    #[test]
    fn fixed_alternative_mean_tracks_remaining_cards() {
        let est = FixedAlternativeMean { n: 10, eta0: 0.6 };
        let eta = est.eta(&tracker_with(&[1.0, 1.0]));
        assert!((eta - (6.0 - 2.0) / 8.0).abs() < 1e-12);
    }
}
