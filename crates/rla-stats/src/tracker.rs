//! Running sufficient statistics for one sequential test.
//!
//! A [`SampleTracker`] is the append-only history a test engine, its
//! estimator and its bet strategy all read from. Comparison audits attach a
//! [`ClcaClassifier`] that buckets every drawn value into the discrepancy
//! taxonomy used by the adaptive bets and by the next round's estimate.

use serde::{Deserialize, Serialize};

use crate::error::StatsError;
use crate::{double_is_close, T_NULL};

// ---------------------------------------------------------------------------
// Welford
// ---------------------------------------------------------------------------

/// Welford's online mean and variance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Welford {
    count: usize,
    mean: f64,
    m2: f64,
}

impl Welford {
    /// An empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds `x` into the running mean and sum of squares.
    pub fn update(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = x - self.mean;
        self.m2 += delta * delta2;
    }

    /// Number of values seen.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Running mean; `0` before the first value.
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Population variance (divides by n).
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / self.count as f64
        }
    }

    /// Sample variance (divides by n - 1).
    pub fn sample_variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    /// Square root of [`Welford::variance`].
    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }
}

// ---------------------------------------------------------------------------
// Discrepancy taxonomy
// ---------------------------------------------------------------------------

/// The five canonical comparison outcomes, plus anything in between
/// (pooled records produce non-canonical values).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Two-vote overstatement.
    P2o,
    /// One-vote overstatement.
    P1o,
    Noerror,
    /// One-vote understatement.
    P1u,
    /// Two-vote understatement.
    P2u,
    Other,
}

/// One canonical ratio `bassort / noerror` with a short label of the form
/// `cvr-mvr` (e.g. `win-los`: the CVR showed the winner, the MVR the loser).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Tau {
    pub value: f64,
    pub label: &'static str,
}

/// The canonical ratios for a primitive assorter with upper bound `u`.
///
/// For `u = 1` the seven ratios collapse to the five classic values
/// `0, 1/2, 1, 3/2, 2`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Taus {
    upper: f64,
    taus: Vec<Tau>,
}

impl Taus {
    /// The seven canonical ratios for upper bound `upper`.
    pub fn new(upper: f64) -> Self {
        let u12 = 1.0 / (2.0 * upper);
        let taus = vec![
            Tau { value: 0.0, label: "win-los" },
            Tau { value: u12, label: "win-oth" },
            Tau { value: 1.0 - u12, label: "oth-los" },
            Tau { value: 1.0, label: "noerror" },
            Tau { value: 1.0 + u12, label: "oth-win" },
            Tau { value: 2.0 - u12, label: "los-oth" },
            Tau { value: 2.0, label: "los-win" },
        ];
        Self { upper, taus }
    }

    /// Upper bound the ratios were built for.
    pub fn upper(&self) -> f64 {
        self.upper
    }

    pub fn values(&self) -> impl Iterator<Item = &Tau> {
        self.taus.iter()
    }

    /// Index of the canonical ratio matching `tau`, if any.
    pub fn index_of(&self, tau: f64) -> Option<usize> {
        self.taus
            .iter()
            .position(|t| double_is_close(t.value, tau))
    }

    /// Label of the canonical ratio matching `tau`, if any.
    pub fn label(&self, tau: f64) -> Option<&'static str> {
        self.index_of(tau).map(|i| self.taus[i].label)
    }

    /// Buckets a ratio into the five-way taxonomy.
    pub fn class_of(&self, tau: f64) -> ErrorClass {
        if self.index_of(tau).is_none() {
            return ErrorClass::Other;
        }
        if double_is_close(tau, 0.0) {
            ErrorClass::P2o
        } else if double_is_close(tau, 1.0) {
            ErrorClass::Noerror
        } else if double_is_close(tau, 2.0) {
            ErrorClass::P2u
        } else if tau < 1.0 {
            ErrorClass::P1o
        } else {
            ErrorClass::P1u
        }
    }
}

/// Counts per discrepancy class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCounts {
    pub p2o: usize,
    pub p1o: usize,
    pub noerror: usize,
    pub p1u: usize,
    pub p2u: usize,
    pub other: usize,
    pub total: usize,
}

impl ErrorCounts {
    /// Counts one value of class `class`.
    pub fn add(&mut self, class: ErrorClass) {
        match class {
            ErrorClass::P2o => self.p2o += 1,
            ErrorClass::P1o => self.p1o += 1,
            ErrorClass::Noerror => self.noerror += 1,
            ErrorClass::P1u => self.p1u += 1,
            ErrorClass::P2u => self.p2u += 1,
            ErrorClass::Other => self.other += 1,
        }
        self.total += 1;
    }

    /// Number of values counted as `class`.
    pub fn count(&self, class: ErrorClass) -> usize {
        match class {
            ErrorClass::P2o => self.p2o,
            ErrorClass::P1o => self.p1o,
            ErrorClass::Noerror => self.noerror,
            ErrorClass::P1u => self.p1u,
            ErrorClass::P2u => self.p2u,
            ErrorClass::Other => self.other,
        }
    }

    /// Number of samples that were not canonical no-error values.
    pub fn discrepancies(&self) -> usize {
        self.total - self.noerror
    }

    /// Empirical rates. All zero when nothing has been counted.
    pub fn rates(&self) -> PluralityErrorRates {
        if self.total == 0 {
            return PluralityErrorRates::ZERO;
        }
        let n = self.total as f64;
        PluralityErrorRates {
            p2o: self.p2o as f64 / n,
            p1o: self.p1o as f64 / n,
            p1u: self.p1u as f64 / n,
            p2u: self.p2u as f64 / n,
        }
    }
}

/// Rates of the four discrepancy classes, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PluralityErrorRates {
    pub p2o: f64,
    pub p1o: f64,
    pub p1u: f64,
    pub p2u: f64,
}

impl Default for PluralityErrorRates {
    fn default() -> Self {
        Self::STANDARD
    }
}

impl PluralityErrorRates {
    /// No discrepancies at all.
    pub const ZERO: Self = Self {
        p2o: 0.0,
        p1o: 0.0,
        p1u: 0.0,
        p2u: 0.0,
    };

    /// A priori rates used when nothing has been measured yet.
    pub const STANDARD: Self = Self {
        p2o: 1.0e-2,
        p1o: 1.0e-4,
        p1u: 1.0e-2,
        p2u: 1.0e-4,
    };

    /// Construct validated rates.
    ///
    /// # Parameters
    /// - `p2o`: Two-vote overstatement rate.
    /// - `p1o`: One-vote overstatement rate.
    /// - `p1u`: One-vote understatement rate.
    /// - `p2u`: Two-vote understatement rate.
    ///
    /// # Returns
    /// The rates, or [`StatsError::InvalidRate`] when a rate leaves `[0, 1]`
    /// or the rates sum past 1.
    pub fn new(p2o: f64, p1o: f64, p1u: f64, p2u: f64) -> Result<Self, StatsError> {
        let rates = Self { p2o, p1o, p1u, p2u };
        rates.validate()?;
        Ok(rates)
    }

    /// Checks every rate and their sum lie in `[0, 1]`.
    pub fn validate(&self) -> Result<(), StatsError> {
        for (name, value) in [
            ("p2o", self.p2o),
            ("p1o", self.p1o),
            ("p1u", self.p1u),
            ("p2u", self.p2u),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(StatsError::InvalidRate { name, value });
            }
        }
        if self.total() > 1.0 {
            return Err(StatsError::InvalidRate {
                name: "total",
                value: self.total(),
            });
        }
        Ok(())
    }

    /// Sum of the four discrepancy rates.
    pub fn total(&self) -> f64 {
        self.p2o + self.p1o + self.p1u + self.p2u
    }

    /// Rate of records without any discrepancy.
    pub fn p0(&self) -> f64 {
        1.0 - self.total()
    }

    /// Rate of `class`; [`ErrorClass::Other`] has rate 0.
    pub fn rate(&self, class: ErrorClass) -> f64 {
        match class {
            ErrorClass::P2o => self.p2o,
            ErrorClass::P1o => self.p1o,
            ErrorClass::Noerror => self.p0(),
            ErrorClass::P1u => self.p1u,
            ErrorClass::P2u => self.p2u,
            ErrorClass::Other => 0.0,
        }
    }

    /// Rates with `p1o` raised to at least the phantom rate. A phantom CVR
    /// (assort 1/2) audited as a phantom MVR (assort 0) is a one-vote
    /// overstatement of a plurality assertion.
    pub fn with_phantom_floor(self, phantom_rate: f64) -> Self {
        Self {
            p1o: self.p1o.max(phantom_rate),
            ..self
        }
    }

    /// Rates with the phantom share taken out of `p1o`.
    ///
    /// Simulations over a card list that already holds the phantom cards
    /// get those discrepancies from the cards themselves; flipping real
    /// records at the full rate would count them twice.
    pub fn without_phantoms(self, phantom_rate: f64) -> Self {
        Self {
            p1o: (self.p1o - phantom_rate).max(0.0),
            ..self
        }
    }
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

/// Buckets comparison values `bassort` into [`ErrorClass`]es.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClcaClassifier {
    noerror: f64,
    taus: Taus,
    counts: ErrorCounts,
    tau_counts: Vec<usize>,
}

impl ClcaClassifier {
    /// `noerror` is the comparison value when MVR and CVR agree;
    /// `upper_raw` is the primitive assorter's upper bound.
    pub fn new(noerror: f64, upper_raw: f64) -> Self {
        let taus = Taus::new(upper_raw);
        let n = taus.taus.len();
        Self {
            noerror,
            taus,
            counts: ErrorCounts::default(),
            tau_counts: vec![0; n],
        }
    }

    pub fn noerror(&self) -> f64 {
        self.noerror
    }

    /// Canonical ratios used for bucketing.
    pub fn taus(&self) -> &Taus {
        &self.taus
    }

    /// Class of the comparison value `value`, without counting it.
    pub fn classify(&self, value: f64) -> ErrorClass {
        self.taus.class_of(value / self.noerror)
    }

    /// Classifies and counts `value`.
    pub fn add(&mut self, value: f64) {
        let tau = value / self.noerror;
        if let Some(idx) = self.taus.index_of(tau) {
            self.tau_counts[idx] += 1;
        }
        self.counts.add(self.taus.class_of(tau));
    }

    /// Counts per class so far.
    pub fn counts(&self) -> &ErrorCounts {
        &self.counts
    }

    /// Counts per labelled canonical ratio, skipping empty buckets.
    pub fn labelled_counts(&self) -> Vec<(&'static str, usize)> {
        self.taus
            .taus
            .iter()
            .zip(&self.tau_counts)
            .filter(|(_, c)| **c > 0)
            .map(|(t, c)| (t.label, *c))
            .collect()
    }

    fn reset(&mut self) {
        self.counts = ErrorCounts::default();
        self.tau_counts.iter_mut().for_each(|c| *c = 0);
    }
}

// ---------------------------------------------------------------------------
// SampleTracker
// ---------------------------------------------------------------------------

/// Append-only history of the values drawn in one test run.
#[derive(Debug, Clone, Default)]
pub struct SampleTracker {
    last: Option<f64>,
    sum: f64,
    welford: Welford,
    clca: Option<ClcaClassifier>,
}

impl SampleTracker {
    /// A tracker without a classifier, for polling audits.
    pub fn new() -> Self {
        Self::default()
    }

    /// A tracker that also classifies comparison values.
    pub fn for_clca(noerror: f64, upper_raw: f64) -> Self {
        Self {
            clca: Some(ClcaClassifier::new(noerror, upper_raw)),
            ..Self::default()
        }
    }

    /// Records the next drawn value.
    pub fn add_sample(&mut self, x: f64) {
        self.last = Some(x);
        self.sum += x;
        self.welford.update(x);
        if let Some(clca) = self.clca.as_mut() {
            clca.add(x);
        }
    }

    /// Number of values drawn so far.
    pub fn num_samples(&self) -> usize {
        self.welford.count()
    }

    /// Sum of the values drawn so far.
    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// Mean of the values drawn so far; `0` before the first draw.
    pub fn mean(&self) -> f64 {
        self.welford.mean()
    }

    /// Population variance of the values drawn so far.
    pub fn variance(&self) -> f64 {
        self.welford.variance()
    }

    pub fn welford(&self) -> &Welford {
        &self.welford
    }

    /// The most recent value, if any.
    pub fn last(&self) -> Option<f64> {
        self.last
    }

    pub fn classifier(&self) -> Option<&ClcaClassifier> {
        self.clca.as_ref()
    }

    /// Discrepancy counts; `None` unless built with [`SampleTracker::for_clca`].
    pub fn error_counts(&self) -> Option<&ErrorCounts> {
        self.clca.as_ref().map(ClcaClassifier::counts)
    }

    /// Forgets every drawn value, keeping the classifier configuration.
    pub fn reset(&mut self) {
        self.last = None;
        self.sum = 0.0;
        self.welford = Welford::new();
        if let Some(clca) = self.clca.as_mut() {
            clca.reset();
        }
    }

    /// Population mean under the null after the samples seen so far,
    /// `(N t - S) / (N - j)`; the constant `t` with replacement or before the
    /// first draw.
    pub fn null_mean(&self, n: usize, with_replacement: bool) -> f64 {
        let seen = self.num_samples();
        if with_replacement || seen == 0 {
            return T_NULL;
        }
        (n as f64 * T_NULL - self.sum) / (n as f64 - seen as f64)
    }

    /// Snapshot of the running statistics.
    pub fn summary(&self) -> TrackerSummary {
        TrackerSummary {
            count: self.num_samples(),
            sum: self.sum,
            mean: self.mean(),
            variance: self.variance(),
            error_counts: self.error_counts().copied(),
        }
    }
}

/// Serializable snapshot of a [`SampleTracker`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerSummary {
    pub count: usize,
    pub sum: f64,
    pub mean: f64,
    pub variance: f64,
    pub error_counts: Option<ErrorCounts>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn welford_matches_two_pass() {
        let xs = [0.2, 0.9, 0.4, 0.4, 1.0, 0.0];
        let mut w = Welford::new();
        xs.iter().for_each(|x| w.update(*x));
        let mean = xs.iter().sum::<f64>() / xs.len() as f64;
        let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / xs.len() as f64;
        assert!((w.mean() - mean).abs() < 1e-12);
        assert!((w.variance() - var).abs() < 1e-12);
        assert!(
            (w.sample_variance() - var * xs.len() as f64 / (xs.len() - 1) as f64).abs() < 1e-12
        );
    }

    #[test]
    fn welford_single_sample_has_zero_variance() {
        let mut w = Welford::new();
        w.update(3.0);
        assert_eq!(w.variance(), 0.0);
        assert_eq!(w.mean(), 3.0);
    }

    #[test]
    fn phantom_share_lives_in_p1o() {
        let rates = PluralityErrorRates::new(0.001, 0.001, 0.0, 0.0).unwrap();
        let floored = rates.with_phantom_floor(0.02);
        assert_eq!(floored.p1o, 0.02);
        assert_eq!(floored.p2o, 0.001);
        assert_eq!(rates.with_phantom_floor(0.0), rates);

        assert_eq!(floored.without_phantoms(0.02).p1o, 0.0);
        assert_eq!(rates.without_phantoms(0.02).p1o, 0.0);
        assert_eq!(floored.without_phantoms(0.005).p2o, 0.001);
        assert!((floored.without_phantoms(0.005).p1o - 0.015).abs() < 1e-15);
    }

    #[test]
    fn taus_collapse_for_unit_upper() {
        let taus = Taus::new(1.0);
        assert_eq!(taus.class_of(0.0), ErrorClass::P2o);
        assert_eq!(taus.class_of(0.5), ErrorClass::P1o);
        assert_eq!(taus.class_of(1.0), ErrorClass::Noerror);
        assert_eq!(taus.class_of(1.5), ErrorClass::P1u);
        assert_eq!(taus.class_of(2.0), ErrorClass::P2u);
        assert_eq!(taus.class_of(0.73), ErrorClass::Other);
        assert_eq!(taus.label(0.5), Some("win-oth"));
    }

    #[test]
    fn taus_general_upper_has_seven_buckets() {
        let taus = Taus::new(1.25);
        let u12 = 1.0 / 2.5;
        assert_eq!(taus.label(u12), Some("win-oth"));
        assert_eq!(taus.label(1.0 - u12), Some("oth-los"));
        assert_eq!(taus.label(2.0 - u12), Some("los-oth"));
        assert_eq!(taus.class_of(1.0 - u12), ErrorClass::P1o);
        assert_eq!(taus.class_of(1.0 + u12), ErrorClass::P1u);
    }

    #[test]
    fn classifier_counts_canonical_values() {
        let noerror = 0.52;
        let mut tracker = SampleTracker::for_clca(noerror, 1.0);
        for x in [0.0, noerror / 2.0, noerror, noerror, 1.5 * noerror, 2.0 * noerror] {
            tracker.add_sample(x);
        }
        let counts = tracker.error_counts().copied().unwrap_or_default();
        assert_eq!(counts.p2o, 1);
        assert_eq!(counts.p1o, 1);
        assert_eq!(counts.noerror, 2);
        assert_eq!(counts.p1u, 1);
        assert_eq!(counts.p2u, 1);
        assert_eq!(counts.total, 6);
        assert_eq!(counts.discrepancies(), 4);
        let rates = counts.rates();
        assert!((rates.p2o - 1.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn null_mean_is_exact_without_replacement() {
        let mut tracker = SampleTracker::new();
        assert_eq!(tracker.null_mean(10, false), 0.5);
        tracker.add_sample(1.0);
        tracker.add_sample(0.0);
        tracker.add_sample(1.0);
        assert!((tracker.null_mean(10, false) - (5.0 - 2.0) / 7.0).abs() < 1e-12);
        assert_eq!(tracker.null_mean(10, true), 0.5);
    }

    #[test]
    fn reset_clears_history() {
        let mut tracker = SampleTracker::for_clca(0.6, 1.0);
        tracker.add_sample(0.6);
        tracker.reset();
        assert_eq!(tracker.num_samples(), 0);
        assert_eq!(tracker.sum(), 0.0);
        assert_eq!(tracker.last(), None);
        assert_eq!(tracker.error_counts().map(|c| c.total), Some(0));
    }

    #[test]
    fn rates_reject_out_of_range() {
        assert!(PluralityErrorRates::new(0.1, 0.1, 0.1, 0.1).is_ok());
        assert!(matches!(
            PluralityErrorRates::new(-0.1, 0.0, 0.0, 0.0),
            Err(StatsError::InvalidRate { name: "p2o", .. })
        ));
        assert!(PluralityErrorRates::new(0.6, 0.6, 0.0, 0.0).is_err());
    }
}
