//! Card-level comparison: the comparison assorter over (MVR, CVR) pairs.

use std::collections::BTreeMap;

use rla_stats::{mean2margin, ErrorClass, SampleTracker, Taus, T_NULL};
use serde::Serialize;

use crate::assorter::{Assorter, AssorterKind};
use crate::card::{Card, CardPool, PoolId};
use crate::error::RlaError;

/// Comparison assorter `B(mvr, cvr) = (1 - (A(cvr) - A(mvr)) / u) * noerror`,
/// with `noerror = 1 / (2 - v / u)` and `v` the reported diluted margin.
///
/// Values land on `0, noerror/2, noerror, 3 noerror/2, 2 noerror` for the
/// two-vote overstatement through two-vote understatement cases.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClcaAssorter {
    assorter: AssorterKind,
    has_style: bool,
    noerror: f64,
    pool_means: BTreeMap<PoolId, f64>,
}

impl ClcaAssorter {
    /// Wraps a primitive assorter for comparison audits.
    ///
    /// # Parameters
    /// - `assorter`: Primitive assorter with a reported mean above 1/2.
    /// - `has_style`: Whether the CVRs say which contests each card holds.
    ///
    /// # Returns
    /// The comparison assorter, or an error when the reported mean does not
    /// favor the winner.
    pub fn new(assorter: AssorterKind, has_style: bool) -> Result<Self, RlaError> {
        let mean = assorter.reported_mean();
        let u = assorter.upper_bound();
        let noerror = 1.0 / (2.0 - mean2margin(mean) / u);
        if !(mean > T_NULL && noerror > T_NULL && noerror.is_finite()) {
            return Err(RlaError::InvalidMargin {
                assertion: assorter.desc(),
                mean,
                noerror,
            });
        }
        Ok(Self {
            assorter,
            has_style,
            noerror,
            pool_means: BTreeMap::new(),
        })
    }

    /// Registers the pooled mean of this assertion for every pool carrying
    /// its contest.
    pub fn with_pools(mut self, pools: &[CardPool]) -> Result<Self, RlaError> {
        let contest = self.assorter.contest_id();
        for pool in pools {
            let Some(tally) = pool.tally(contest) else {
                continue;
            };
            let mean = self
                .assorter
                .mean_of_tally(tally)
                .ok_or_else(|| RlaError::PoolUnsupported {
                    assertion: self.assorter.desc(),
                })?;
            self.pool_means.insert(pool.id, mean);
        }
        Ok(self)
    }

    pub fn assorter(&self) -> &AssorterKind {
        &self.assorter
    }

    pub fn has_style(&self) -> bool {
        self.has_style
    }

    pub fn noerror(&self) -> f64 {
        self.noerror
    }

    pub fn upper_bound(&self) -> f64 {
        2.0 * self.noerror
    }

    /// Mean of the primitive assorter over pool `pool`, if registered.
    pub fn pool_mean(&self, pool: PoolId) -> Option<f64> {
        self.pool_means.get(&pool).copied()
    }

    /// Comparison value of one audited card.
    ///
    /// A phantom MVR assorts to 0 and a phantom CVR to 1/2. A pooled CVR
    /// uses its pool's mean. With card styles, an MVR missing the contest
    /// assorts to 0 and a CVR missing it is an error.
    pub fn bassort(&self, mvr: &Card, cvr: &Card) -> Result<f64, RlaError> {
        let contest = self.assorter.contest_id();
        if self.has_style && !cvr.phantom && !cvr.has_contest(contest) {
            return Err(RlaError::CvrMissingContest {
                contest,
                card: cvr.location.clone(),
            });
        }

        let mvr_assort = if mvr.phantom || (self.has_style && !mvr.has_contest(contest)) {
            0.0
        } else {
            self.assorter.assort(mvr, false)
        };

        let cvr_assort = if cvr.phantom {
            0.5
        } else if let Some(pool) = cvr.pool_id {
            self.pool_mean(pool).ok_or_else(|| RlaError::UnknownPool {
                pool,
                assertion: self.assorter.desc(),
            })?
        } else {
            self.assorter.assort(cvr, false)
        };

        let overstatement = cvr_assort - mvr_assort;
        Ok((1.0 - overstatement / self.assorter.upper_bound()) * self.noerror)
    }

    /// The five exact comparison values, two-vote overstatement first.
    pub fn canonical_values(&self) -> [f64; 5] {
        let n = self.noerror;
        [0.0, 0.5 * n, n, 1.5 * n, 2.0 * n]
    }

    pub fn classify(&self, value: f64) -> ErrorClass {
        Taus::new(self.assorter.upper_bound()).class_of(value / self.noerror)
    }

    /// Empty tracker that classifies this assertion's comparison values.
    pub fn tracker(&self) -> SampleTracker {
        SampleTracker::for_clca(self.noerror, self.assorter.upper_bound())
    }
}
