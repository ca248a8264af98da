//! Comparison sampler with an exact, fixed number of discrepancies.

use std::sync::Arc;

use rla_stats::{ErrorClass, PluralityErrorRates};
use serde::Serialize;
use tracing::warn;

use crate::assorter::Assorter;
use crate::card::Card;
use crate::clca::ClcaAssorter;
use crate::context::RunContext;
use crate::error::RlaError;
use crate::sampler::{ClcaWithoutReplacement, Sampler};

/// Number of records flipped into each discrepancy class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlipCounts {
    pub p2o: usize,
    pub p1o: usize,
    pub p1u: usize,
    pub p2u: usize,
}

/// Simulates MVRs from CVRs by flipping `floor(max_samples * rate)` records
/// per class. Every record is altered at most once, so the realized counts
/// are exact; [`Sampler::reset`] only permutes the visiting order.
///
/// * `p2o`: CVR shows the winner, MVR made to show the loser.
/// * `p2u`: CVR shows the loser, MVR made to show the winner.
/// * `p1o`: CVR shows the winner, MVR made an undervote.
/// * `p1u`: CVR made an undervote, MVR shows the winner.
#[derive(Debug, Clone)]
pub struct ClcaSimulatedErrorRates {
    inner: ClcaWithoutReplacement,
    wanted: FlipCounts,
    flipped: FlipCounts,
}

impl ClcaSimulatedErrorRates {
    /// Builds MVRs from `cvrs` with votes flipped to match `rates`.
    ///
    /// # Returns
    /// The sampler, or an error when `rates` are invalid.
    pub fn new(
        cvrs: &[Card],
        clca: ClcaAssorter,
        rates: &PluralityErrorRates,
    ) -> Result<Self, RlaError> {
        rates.validate()?;
        let assorter = clca.assorter().clone();
        let contest = assorter.contest_id();
        let upper = assorter.upper_bound();

        let mut mvrs: Vec<Card> = cvrs.to_vec();
        let mut cvrs: Vec<Card> = cvrs.to_vec();
        let max_samples = cvrs.iter().filter(|c| c.has_contest(contest)).count();
        let target = |rate: f64| (max_samples as f64 * rate).floor() as usize;
        let wanted = FlipCounts {
            p2o: target(rates.p2o),
            p1o: target(rates.p1o),
            p1u: target(rates.p1u),
            p2u: target(rates.p2u),
        };

        let mut altered = vec![false; cvrs.len()];
        let candidates_with = |value: f64, altered: &mut Vec<bool>, want: usize| {
            let picked: Vec<usize> = cvrs
                .iter()
                .enumerate()
                .filter(|(i, c)| {
                    !altered[*i]
                        && !c.phantom
                        && c.has_contest(contest)
                        && (assorter.assort(c, false) - value).abs() < 1e-12
                })
                .map(|(i, _)| i)
                .take(want)
                .collect();
            for &i in &picked {
                altered[i] = true;
            }
            picked
        };

        let losing = assorter.losing_vote();
        let p2o = match losing {
            Some(_) => candidates_with(upper, &mut altered, wanted.p2o),
            None => Vec::new(),
        };
        let p2u = candidates_with(0.0, &mut altered, wanted.p2u);
        let p1o = candidates_with(upper, &mut altered, wanted.p1o);
        let p1u = candidates_with(upper, &mut altered, wanted.p1u);

        if let Some(losing) = losing {
            for &i in &p2o {
                mvrs[i] = mvrs[i].with_votes(contest, losing.clone());
            }
        }
        for &i in &p2u {
            mvrs[i] = mvrs[i].with_votes(contest, assorter.winning_vote());
        }
        for &i in &p1o {
            mvrs[i] = mvrs[i].with_votes(contest, Vec::new());
        }
        for &i in &p1u {
            cvrs[i] = cvrs[i].with_votes(contest, Vec::new());
        }

        let flipped = FlipCounts {
            p2o: p2o.len(),
            p1o: p1o.len(),
            p1u: p1u.len(),
            p2u: p2u.len(),
        };
        if flipped != wanted {
            warn!(
                assertion = %assorter.desc(),
                ?wanted,
                ?flipped,
                "not enough eligible records to realize the requested error rates"
            );
        }

        let inner = ClcaWithoutReplacement::new(Arc::new(mvrs), Arc::new(cvrs), clca)?;
        Ok(Self {
            inner,
            wanted,
            flipped,
        })
    }

    pub fn wanted(&self) -> FlipCounts {
        self.wanted
    }

    pub fn flipped(&self) -> FlipCounts {
        self.flipped
    }

    /// Count of every comparison value's class over all records.
    pub fn class_count(&self, class: ErrorClass) -> Result<usize, RlaError> {
        let clca = self.inner.clca();
        let contest = clca.assorter().contest_id();
        let mut n = 0;
        for (mvr, cvr) in self.inner.mvrs().iter().zip(self.inner.cvrs()) {
            if cvr.has_contest(contest) && clca.classify(clca.bassort(mvr, cvr)?) == class {
                n += 1;
            }
        }
        Ok(n)
    }
}

impl Sampler for ClcaSimulatedErrorRates {
    fn sample(&mut self) -> Result<f64, RlaError> {
        self.inner.sample()
    }

    fn reset(&mut self, ctx: &mut RunContext) {
        self.inner.reset(ctx);
    }

    fn max_samples(&self) -> usize {
        self.inner.max_samples()
    }

    fn max_sample_index(&self) -> usize {
        self.inner.max_sample_index()
    }

    fn has_next(&self) -> bool {
        self.inner.has_next()
    }

    fn n_cards(&self) -> usize {
        self.inner.n_cards()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assorter::{AssorterKind, PluralityAssorter};
    use rla_stats::SampleTracker;

    fn setup(n: usize) -> (Vec<Card>, ClcaAssorter) {
        let cvrs: Vec<Card> = (0..n)
            .map(|i| Card::new(format!("c{i}"), i, i as u64).with_votes(1, vec![(i % 5 == 4) as u32]))
            .collect();
        let assorter = AssorterKind::Plurality(PluralityAssorter {
            contest_id: 1,
            winner: 0,
            loser: 1,
            max_votes: 1,
            reported_mean: 0.8,
        });
        (cvrs, ClcaAssorter::new(assorter, false).unwrap())
    }

    #[test]
    fn realizes_exact_counts() {
        let (cvrs, clca) = setup(1000);
        let rates = PluralityErrorRates::new(0.01, 0.02, 0.005, 0.003).unwrap();
        let sim = ClcaSimulatedErrorRates::new(&cvrs, clca, &rates).unwrap();
        assert_eq!(sim.flipped(), FlipCounts { p2o: 10, p1o: 20, p1u: 5, p2u: 3 });
        assert_eq!(sim.class_count(ErrorClass::P2o).unwrap(), 10);
        assert_eq!(sim.class_count(ErrorClass::P1o).unwrap(), 20);
        assert_eq!(sim.class_count(ErrorClass::P1u).unwrap(), 5);
        assert_eq!(sim.class_count(ErrorClass::P2u).unwrap(), 3);
    }

    #[test]
    fn reset_only_reorders() {
        let (cvrs, clca) = setup(500);
        let rates = PluralityErrorRates::new(0.02, 0.01, 0.01, 0.01).unwrap();
        let mut sim = ClcaSimulatedErrorRates::new(&cvrs, clca.clone(), &rates).unwrap();
        let mut ctx = RunContext::new(11);
        let mut first: Option<rla_stats::ErrorCounts> = None;
        for _ in 0..4 {
            sim.reset(&mut ctx);
            let mut tracker: SampleTracker = clca.tracker();
            while sim.has_next() {
                tracker.add_sample(sim.sample().unwrap());
            }
            let counts = *tracker.error_counts().unwrap();
            match &first {
                None => first = Some(counts),
                Some(f) => assert_eq!(*f, counts),
            }
        }
    }

    #[test]
    fn shortage_is_partial_not_fatal() {
        let (cvrs, clca) = setup(10);
        // only two loser CVRs exist
        let rates = PluralityErrorRates::new(0.0, 0.0, 0.0, 0.5).unwrap();
        let sim = ClcaSimulatedErrorRates::new(&cvrs, clca, &rates).unwrap();
        assert_eq!(sim.wanted().p2u, 5);
        assert_eq!(sim.flipped().p2u, 2);
    }
}
