//! The sequential test engine.
//!
//! Both families test `H0: mean <= 1/2` for values in `[0, u]` drawn from a
//! population of `N` (with or without replacement). After `j` draws the
//! population mean of the undrawn values under the null is
//! `m_j = (N t - S_{j-1}) / (N - j + 1)`, and the test statistic is a
//! product of per-draw terms:
//!
//! ```text
//! ALPHA:   T_j = T_{j-1} (x eta / m + (u - x)(u - eta) / (u - m)) / u
//! betting: T_j = T_{j-1} (1 + lam (x - m))
//! ```
//!
//! The anytime p-value is `min(1, 1 / max_{k<=j} T_k)`.
//!
//! Degenerate null means short-circuit the run before the next draw:
//! `m_j > u` means the null is certainly true (`AcceptNull`), `m_j < 0`
//! means it is certainly false (`SampleSumRejectNull`).

use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::betting::BettingFn;
use crate::double_is_close;
use crate::error::StatsError;
use crate::estim::EstimFn;
use crate::tracker::{SampleTracker, TrackerSummary};
use crate::T_NULL;

/// How a sequential test concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestH0Status {
    InProgress,
    /// The p-value fell to the risk limit.
    StatRejectNull,
    /// The sample sum alone shows the population mean exceeds 1/2.
    SampleSumRejectNull,
    /// The sample sum alone shows the population mean is at most 1/2.
    AcceptNull,
    /// Ran out of allowed samples without a decision.
    LimitReached,
    /// Abandoned because the estimated sample size exceeded the budget.
    FailMaxSamplesAllowed,
    /// Stopped by configuration with the p-value above the risk limit.
    FailPValue,
    ContestMisformed,
    /// Every candidate is a reported winner, so there is nothing to test.
    NoLosers,
}

impl TestH0Status {
    /// The assertion was proved.
    pub fn is_success(self) -> bool {
        matches!(
            self,
            TestH0Status::StatRejectNull | TestH0Status::SampleSumRejectNull
        )
    }

    /// No further sampling can change the outcome.
    pub fn complete(self) -> bool {
        !matches!(self, TestH0Status::InProgress | TestH0Status::LimitReached)
    }

    /// Complete without rejecting the null. [`TestH0Status::NoLosers`] is
    /// neither a success nor a failure.
    pub fn is_failure(self) -> bool {
        self.complete() && !self.is_success() && self != TestH0Status::NoLosers
    }
}

impl std::fmt::Display for TestH0Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TestH0Status::InProgress => "in_progress",
            TestH0Status::StatRejectNull => "stat_reject_null",
            TestH0Status::SampleSumRejectNull => "sample_sum_reject_null",
            TestH0Status::AcceptNull => "accept_null",
            TestH0Status::LimitReached => "limit_reached",
            TestH0Status::FailMaxSamplesAllowed => "fail_max_samples_allowed",
            TestH0Status::FailPValue => "fail_pvalue",
            TestH0Status::ContestMisformed => "contest_misformed",
            TestH0Status::NoLosers => "no_losers",
        };
        f.write_str(s)
    }
}

/// Outcome of one run of [`SequentialTest::test_h0`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestH0Result {
    pub status: TestH0Status,
    /// Number of values drawn.
    pub sample_count: usize,
    pub sample_mean: f64,
    /// Anytime p-value at the end of the run.
    pub pvalue_min: f64,
    /// `min(1, 1 / T_j)` for the last statistic; its reciprocal seeds the
    /// next round.
    pub pvalue_last: f64,
    /// Anytime p-value after each draw.
    pub pvalues: Vec<f64>,
    /// `eta_j` for ALPHA, `lam_j` for the betting martingale.
    pub estimates: Vec<f64>,
    pub tracker: TrackerSummary,
}

/// A test of `H0: mean <= 1/2` over a stream of bounded values.
pub trait SequentialTest: Send + Sync + std::fmt::Debug {
    /// Draws values until the test stops.
    ///
    /// # Parameters
    /// - `max_samples`: most values to draw in this run
    /// - `terminate_on_reject`: stop as soon as the p-value reaches the risk limit
    /// - `starting_statistic`: `T_0`, usually 1 or `1 / pvalue_last` of a previous round
    /// - `draw`: produces the next value; an `Err` aborts the run
    fn test_h0(
        &self,
        max_samples: usize,
        terminate_on_reject: bool,
        starting_statistic: f64,
        draw: &mut dyn FnMut() -> Result<f64, String>,
    ) -> Result<TestH0Result, StatsError>;

    fn upper_bound(&self) -> f64;

    fn risk_limit(&self) -> f64;
}

// ---------------------------------------------------------------------------
// Shared loop
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Population {
    n: usize,
    with_replacement: bool,
    upper: f64,
    risk_limit: f64,
    tracker: SampleTracker,
}

impl Population {
    fn new(
        n: usize,
        with_replacement: bool,
        upper: f64,
        risk_limit: f64,
        tracker: SampleTracker,
    ) -> Result<Self, StatsError> {
        if !(risk_limit > 0.0 && risk_limit < 1.0) {
            return Err(StatsError::InvalidRiskLimit(risk_limit));
        }
        if !(upper.is_finite() && upper > T_NULL) {
            return Err(StatsError::InvalidUpperBound { upper, t: T_NULL });
        }
        if n == 0 {
            return Err(StatsError::InvalidPopulation { n, max_samples: 0 });
        }
        Ok(Self {
            n,
            with_replacement,
            upper,
            risk_limit,
            tracker,
        })
    }

    /// Runs the loop. `choose` picks the per-draw parameter from the history
    /// and the null mean; `term` turns `(param, x, m)` into the factor.
    fn run(
        &self,
        max_samples: usize,
        terminate_on_reject: bool,
        starting_statistic: f64,
        draw: &mut dyn FnMut() -> Result<f64, String>,
        choose: &dyn Fn(&SampleTracker, f64, usize) -> Result<f64, StatsError>,
        term: &dyn Fn(f64, f64, f64) -> f64,
    ) -> Result<TestH0Result, StatsError> {
        if !(starting_statistic.is_finite() && starting_statistic > 0.0) {
            return Err(StatsError::InvalidParameter {
                name: "starting_statistic",
                value: starting_statistic,
                reason: "must be finite and positive",
            });
        }
        let max_samples = if self.with_replacement {
            max_samples
        } else {
            max_samples.min(self.n)
        };

        let mut tracker = self.tracker.clone();
        tracker.reset();

        let mut statistic = starting_statistic;
        let mut max_statistic = starting_statistic;
        let mut pvalue_min = (1.0 / max_statistic).min(1.0);
        let mut pvalues = Vec::new();
        let mut estimates = Vec::new();
        let mut degenerate: Option<TestH0Status> = None;

        while tracker.num_samples() < max_samples {
            let m = tracker.null_mean(self.n, self.with_replacement);
            if m > self.upper {
                degenerate = Some(TestH0Status::AcceptNull);
                statistic = 0.0;
                break;
            }
            if m < 0.0 {
                degenerate = Some(TestH0Status::SampleSumRejectNull);
                statistic = f64::INFINITY;
                pvalue_min = 0.0;
                break;
            }
            let sample = tracker.num_samples() + 1;
            let flat = double_is_close(0.0, m) || double_is_close(self.upper, m);
            let param = if flat { 0.0 } else { choose(&tracker, m, sample)? };

            let x = draw().map_err(|reason| StatsError::Draw { sample, reason })?;
            if !(x >= 0.0 && x <= self.upper * (1.0 + 1.0e-12)) {
                return Err(StatsError::SampleOutOfRange {
                    value: x,
                    upper: self.upper,
                    sample,
                });
            }

            let mut tj = if flat { 1.0 } else { term(param, x, m) };
            if !self.with_replacement
                && sample == self.n
                && tracker.sum() + x > self.n as f64 * T_NULL
            {
                tj = f64::INFINITY;
            }

            statistic *= tj;
            max_statistic = max_statistic.max(statistic);
            pvalue_min = (1.0 / max_statistic).min(1.0);
            tracker.add_sample(x);
            pvalues.push(pvalue_min);
            estimates.push(param);
            trace!(sample, x, m, param, tj, statistic, "test_h0 step");

            if terminate_on_reject && pvalue_min <= self.risk_limit {
                break;
            }
        }

        let sample_count = tracker.num_samples();
        let status = match degenerate {
            Some(status) => status,
            None if pvalue_min <= self.risk_limit => TestH0Status::StatRejectNull,
            None if !self.with_replacement && sample_count == self.n => {
                if tracker.mean() > T_NULL {
                    TestH0Status::SampleSumRejectNull
                } else {
                    TestH0Status::AcceptNull
                }
            }
            None => TestH0Status::LimitReached,
        };

        Ok(TestH0Result {
            status,
            sample_count,
            sample_mean: tracker.mean(),
            pvalue_min,
            pvalue_last: (1.0 / statistic).min(1.0),
            pvalues,
            estimates,
            tracker: tracker.summary(),
        })
    }
}

// ---------------------------------------------------------------------------
// ALPHA
// ---------------------------------------------------------------------------

/// ALPHA martingale driven by an alternative-mean estimator.
#[derive(Debug)]
pub struct AlphaMart {
    estim: Box<dyn EstimFn>,
    population: Population,
}

impl AlphaMart {
    /// # Parameters
    /// - `estim`: chooses `eta_j` from the history
    /// - `n`: population size
    /// - `upper`: upper bound `u` of the values
    pub fn new(
        estim: Box<dyn EstimFn>,
        n: usize,
        with_replacement: bool,
        risk_limit: f64,
        upper: f64,
    ) -> Result<Self, StatsError> {
        let population =
            Population::new(n, with_replacement, upper, risk_limit, SampleTracker::new())?;
        Ok(Self { estim, population })
    }

    /// Classify comparison values while testing.
    pub fn with_tracker(mut self, tracker: SampleTracker) -> Self {
        self.population.tracker = tracker;
        self
    }
}

impl SequentialTest for AlphaMart {
    fn test_h0(
        &self,
        max_samples: usize,
        terminate_on_reject: bool,
        starting_statistic: f64,
        draw: &mut dyn FnMut() -> Result<f64, String>,
    ) -> Result<TestH0Result, StatsError> {
        let u = self.population.upper;
        let choose = |prev: &SampleTracker, _m: f64, sample: usize| {
            let eta = self.estim.eta(prev);
            if eta.is_finite() {
                Ok(eta)
            } else {
                Err(StatsError::InvalidEstimate { eta, sample })
            }
        };
        let term = |eta: f64, x: f64, m: f64| {
            let t = (x * eta / m + (u - x) * (u - eta) / (u - m)) / u;
            if double_is_close(t, 0.0) {
                1.0
            } else {
                t
            }
        };
        self.population.run(
            max_samples,
            terminate_on_reject,
            starting_statistic,
            draw,
            &choose,
            &term,
        )
    }

    fn upper_bound(&self) -> f64 {
        self.population.upper
    }

    fn risk_limit(&self) -> f64 {
        self.population.risk_limit
    }
}

// ---------------------------------------------------------------------------
// Betting martingale
// ---------------------------------------------------------------------------

/// Betting martingale driven by a wager strategy.
#[derive(Debug)]
pub struct BettingMart {
    betting: Box<dyn BettingFn>,
    population: Population,
}

impl BettingMart {
    /// Construct a betting martingale.
    ///
    /// # Parameters
    /// - `betting`: Wager strategy.
    /// - `n`: Population size.
    /// - `with_replacement`: Whether draws are made with replacement.
    /// - `risk_limit`: Rejects the null once the p-value falls to this level.
    /// - `upper`: Upper bound of the drawn values.
    ///
    /// # Returns
    /// The test, or an error when the population parameters are invalid.
    pub fn new(
        betting: Box<dyn BettingFn>,
        n: usize,
        with_replacement: bool,
        risk_limit: f64,
        upper: f64,
    ) -> Result<Self, StatsError> {
        let population =
            Population::new(n, with_replacement, upper, risk_limit, SampleTracker::new())?;
        Ok(Self {
            betting,
            population,
        })
    }

    /// Replaces the tracker, e.g. with one from [`SampleTracker::for_clca`].
    pub fn with_tracker(mut self, tracker: SampleTracker) -> Self {
        self.population.tracker = tracker;
        self
    }
}

impl SequentialTest for BettingMart {
    fn test_h0(
        &self,
        max_samples: usize,
        terminate_on_reject: bool,
        starting_statistic: f64,
        draw: &mut dyn FnMut() -> Result<f64, String>,
    ) -> Result<TestH0Result, StatsError> {
        let choose = |prev: &SampleTracker, m: f64, sample: usize| {
            let lambda = self.betting.bet(prev);
            if !lambda.is_finite() {
                return Err(StatsError::InvalidBet { lambda, sample });
            }
            // keeps 1 + lam (x - m) >= 0 for every x >= 0
            Ok(lambda.clamp(0.0, 1.0 / m))
        };
        let term = |lambda: f64, x: f64, m: f64| {
            let t = 1.0 + lambda * (x - m);
            if double_is_close(t, 0.0) {
                warn!(x, lambda, m, "stalled audit: betting term is zero");
            }
            t.max(0.0)
        };
        self.population.run(
            max_samples,
            terminate_on_reject,
            starting_statistic,
            draw,
            &choose,
            &term,
        )
    }

    fn upper_bound(&self) -> f64 {
        self.population.upper
    }

    fn risk_limit(&self) -> f64 {
        self.population.risk_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::betting::{FixedBet, OptimalComparisonNoP1};
    use crate::estim::{FixedEstim, TruncShrinkage};
    use proptest::prelude::*;
    use proptest::test_runner::{Config as ProptestConfig, FileFailurePersistence, RngAlgorithm};

    fn stream(xs: Vec<f64>) -> impl FnMut() -> Result<f64, String> {
        let mut it = xs.into_iter();
        move || it.next().ok_or_else(|| "stream exhausted".to_string())
    }

    fn alpha(n: usize, with_replacement: bool) -> AlphaMart {
        let estim = TruncShrinkage::with_defaults(n, with_replacement, 1.0, 0.6, 10).unwrap();
        AlphaMart::new(Box::new(estim), n, with_replacement, 0.05, 1.0).unwrap()
    }

    // -----------------------------------------------------------------------
    // ALPHA
    // -----------------------------------------------------------------------

    #[test]
    fn alpha_half_values_carry_no_evidence() {
        let test = alpha(1_000_000, true);
        let mut draw = stream(vec![0.5; 500]);
        let result = test.test_h0(500, true, 1.0, &mut draw).unwrap();
        assert_eq!(result.status, TestH0Status::LimitReached);
        assert_eq!(result.sample_count, 500);
        for p in &result.pvalues {
            assert!((p - 1.0).abs() < 1e-9, "p={p}");
        }
    }

    #[test]
    fn alpha_rejects_on_strong_evidence() {
        let test = alpha(10_000, false);
        let mut draw = stream(vec![1.0; 200]);
        let result = test.test_h0(200, true, 1.0, &mut draw).unwrap();
        assert_eq!(result.status, TestH0Status::StatRejectNull);
        assert!(result.pvalue_min <= 0.05);
        assert!(result.sample_count < 200);
        assert_eq!(result.pvalues.len(), result.sample_count);
    }

    #[test]
    fn alpha_pvalues_are_nonincreasing() {
        let test = alpha(1000, false);
        let xs: Vec<f64> = (0..100).map(|i| if i % 3 == 0 { 0.0 } else { 1.0 }).collect();
        let mut draw = stream(xs);
        let result = test.test_h0(100, false, 1.0, &mut draw).unwrap();
        for w in result.pvalues.windows(2) {
            assert!(w[1] <= w[0]);
        }
    }

    #[test]
    fn alpha_null_mean_above_upper_accepts_null() {
        // N = 4: after three zeros the last card would need a value of 2
        let estim = FixedEstim::new(0.6);
        let test = AlphaMart::new(Box::new(estim), 4, false, 0.05, 1.0).unwrap();
        let mut draw = stream(vec![0.0, 0.0, 0.0, 0.0]);
        let result = test.test_h0(4, true, 1.0, &mut draw).unwrap();
        assert_eq!(result.status, TestH0Status::AcceptNull);
        assert_eq!(result.sample_count, 3);
    }

    #[test]
    fn alpha_null_mean_below_zero_rejects_null() {
        // N = 5, null total 2.5; three ones exceed it
        let estim = FixedEstim::new(0.6);
        let test = AlphaMart::new(Box::new(estim), 5, false, 0.001, 1.0).unwrap();
        let mut draw = stream(vec![1.0; 5]);
        let result = test.test_h0(5, true, 1.0, &mut draw).unwrap();
        assert!(result.status.is_success(), "status={}", result.status);
        assert!(result.sample_count <= 3);
    }

    #[test]
    fn final_draw_exceeding_null_total_rejects() {
        let estim = FixedEstim::new(0.55);
        let test = AlphaMart::new(Box::new(estim), 4, false, 0.001, 1.0).unwrap();
        let mut draw = stream(vec![0.5, 0.5, 0.5, 0.6]);
        let result = test.test_h0(4, true, 1.0, &mut draw).unwrap();
        assert_eq!(result.sample_count, 4);
        assert_eq!(result.pvalue_min, 0.0);
        assert!(result.status.is_success());
    }

    #[test]
    fn starting_statistic_carries_evidence() {
        let test = alpha(10_000, false);
        let mut fresh = stream(vec![1.0; 200]);
        let mut seeded = stream(vec![1.0; 200]);
        let fresh = test.test_h0(200, true, 1.0, &mut fresh).unwrap();
        let seeded = test.test_h0(200, true, 10.0, &mut seeded).unwrap();
        assert!(seeded.sample_count < fresh.sample_count);
    }

    #[test]
    fn draw_failure_is_reported() {
        let test = alpha(100, false);
        let mut draw = stream(vec![1.0; 3]);
        let err = test.test_h0(10, false, 1.0, &mut draw).unwrap_err();
        assert!(matches!(err, StatsError::Draw { sample: 4, .. }));
    }

    #[test]
    fn out_of_range_sample_is_rejected() {
        let test = alpha(100, false);
        let mut draw = stream(vec![1.5]);
        let err = test.test_h0(10, false, 1.0, &mut draw).unwrap_err();
        assert!(matches!(err, StatsError::SampleOutOfRange { .. }));
    }

    #[test]
    fn invalid_configuration_is_fatal() {
        let estim = || Box::new(FixedEstim::new(0.6));
        assert!(matches!(
            AlphaMart::new(estim(), 10, false, 0.0, 1.0),
            Err(StatsError::InvalidRiskLimit(_))
        ));
        assert!(matches!(
            AlphaMart::new(estim(), 10, false, 0.05, 0.5),
            Err(StatsError::InvalidUpperBound { .. })
        ));
    }

    // -----------------------------------------------------------------------
    // Betting
    // -----------------------------------------------------------------------

    #[test]
    fn betting_fixed_bet_matches_closed_form() {
        let test = BettingMart::new(Box::new(FixedBet::new(1.0).unwrap()), 100, true, 0.05, 1.0)
            .unwrap();
        let mut draw = stream(vec![1.0, 1.0, 0.0]);
        let result = test.test_h0(3, false, 1.0, &mut draw).unwrap();
        // 1.5 * 1.5 * 0.5
        assert!((result.pvalue_last - 1.0 / 1.125).abs() < 1e-12);
        assert!((result.pvalue_min - 1.0 / 2.25).abs() < 1e-12);
    }

    #[test]
    fn betting_clips_oversized_bets() {
        let test = BettingMart::new(Box::new(FixedBet::new(10.0).unwrap()), 100, true, 0.05, 1.0)
            .unwrap();
        let mut draw = stream(vec![0.0, 1.0]);
        let result = test.test_h0(2, false, 1.0, &mut draw).unwrap();
        assert_eq!(result.estimates, vec![2.0, 2.0]);
        assert_eq!(result.pvalue_last, 1.0);
    }

    #[test]
    fn betting_comparison_no_errors_rejects_quickly() {
        let noerror = 1.0 / (2.0 - 0.1);
        let upper = 2.0 * noerror;
        let bet = OptimalComparisonNoP1::new(1000, false, upper, 1e-4).unwrap();
        let test = BettingMart::new(Box::new(bet), 1000, false, 0.05, upper)
            .unwrap()
            .with_tracker(SampleTracker::for_clca(noerror, 1.0));
        let mut draw = stream(vec![noerror; 1000]);
        let result = test.test_h0(1000, true, 1.0, &mut draw).unwrap();
        assert_eq!(result.status, TestH0Status::StatRejectNull);
        assert!(result.sample_count < 100, "n={}", result.sample_count);
        let counts = result.tracker.error_counts.unwrap_or_default();
        assert_eq!(counts.noerror, result.sample_count);
    }

    #[test]
    fn betting_exhausting_population_decides_by_sample_sum() {
        let test = BettingMart::new(Box::new(FixedBet::new(0.0).unwrap()), 4, false, 0.05, 1.0)
            .unwrap();
        let mut draw = stream(vec![0.5, 0.5, 0.5, 0.0]);
        let result = test.test_h0(10, true, 1.0, &mut draw).unwrap();
        assert_eq!(result.sample_count, 4);
        assert_eq!(result.status, TestH0Status::AcceptNull);
    }

    #[derive(Debug)]
    struct NanBet;

    impl BettingFn for NanBet {
        fn bet(&self, _prev: &SampleTracker) -> f64 {
            f64::NAN
        }
    }

    #[test]
    fn undefined_bet_is_fatal() {
        let test = BettingMart::new(Box::new(NanBet), 100, false, 0.05, 1.0).unwrap();
        let mut draw = stream(vec![1.0]);
        assert!(matches!(
            test.test_h0(1, true, 1.0, &mut draw),
            Err(StatsError::InvalidBet { sample: 1, .. })
        ));
    }

    #[test]
    fn status_predicates() {
        assert!(TestH0Status::StatRejectNull.is_success());
        assert!(TestH0Status::SampleSumRejectNull.complete());
        assert!(!TestH0Status::LimitReached.complete());
        assert!(TestH0Status::FailMaxSamplesAllowed.is_failure());
        assert!(TestH0Status::NoLosers.complete());
        assert!(!TestH0Status::NoLosers.is_failure());
        assert!(!TestH0Status::NoLosers.is_success());
        assert_eq!(
            serde_json::to_string(&TestH0Status::StatRejectNull).unwrap(),
            "\"stat_reject_null\""
        );
    }

    // -----------------------------------------------------------------------
    // Property tests
    // -----------------------------------------------------------------------

    fn mart_proptest_config() -> ProptestConfig {
        ProptestConfig {
            cases: 64,
            source_file: Some(file!()),
            failure_persistence: Some(Box::new(FileFailurePersistence::WithSource(
                "proptest-regressions",
            ))),
            rng_algorithm: RngAlgorithm::ChaCha,
            ..ProptestConfig::default()
        }
    }

    proptest! {
        #![proptest_config(mart_proptest_config())]

        #[test]
        fn null_mean_matches_definition(
            xs in proptest::collection::vec(0.0f64..=1.0, 1..40),
            extra in 40usize..400,
        ) {
            let n = xs.len() + extra;
            let mut tracker = SampleTracker::new();
            for (j, x) in xs.iter().enumerate() {
                let expected = (n as f64 * 0.5 - xs[..j].iter().sum::<f64>()) / (n - j) as f64;
                let got = tracker.null_mean(n, false);
                prop_assert!((got - expected).abs() < 1e-9, "j={j} got={got} expected={expected}");
                tracker.add_sample(*x);
            }
        }

        #[test]
        fn pvalues_stay_in_unit_interval(
            xs in proptest::collection::vec(0.0f64..=1.0, 1..60),
            lam in 0.0f64..2.0,
        ) {
            let n = xs.len() + 10;
            let test = BettingMart::new(Box::new(FixedBet::new(lam).unwrap()), n, false, 0.05, 1.0).unwrap();
            let len = xs.len();
            let mut draw = stream(xs);
            let result = test.test_h0(len, false, 1.0, &mut draw).unwrap();
            for p in &result.pvalues {
                prop_assert!((0.0..=1.0).contains(p), "p={p}");
            }
            prop_assert!(result.pvalue_min <= result.pvalue_last + 1e-15);
        }
    }
}
