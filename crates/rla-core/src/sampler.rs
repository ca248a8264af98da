//! Samplers feed bounded values to a sequential test, one card at a time.

use std::sync::Arc;

use rand::seq::SliceRandom;

use crate::assorter::{Assorter, AssorterKind};
use crate::card::Card;
use crate::clca::ClcaAssorter;
use crate::context::RunContext;
use crate::contest::ContestId;
use crate::error::RlaError;

/// A stream of assorter values over a fixed set of cards.
///
/// Cards are visited in their stored order until [`Sampler::reset`] draws a
/// fresh permutation. Cards that do not carry the contest are skipped.
pub trait Sampler: Send + std::fmt::Debug {
    fn sample(&mut self) -> Result<f64, RlaError>;

    /// Rewinds and permutes the visiting order.
    fn reset(&mut self, ctx: &mut RunContext);

    /// Number of cards carrying the contest; the most a test can draw.
    fn max_samples(&self) -> usize;

    /// Number of cards scanned so far, skipped ones included.
    fn max_sample_index(&self) -> usize;

    fn has_next(&self) -> bool;

    fn n_cards(&self) -> usize;
}

/// Adapts a sampler to the draw callback of
/// [`rla_stats::SequentialTest::test_h0`].
pub fn draw_fn(sampler: &mut dyn Sampler) -> impl FnMut() -> Result<f64, String> + '_ {
    move || sampler.sample().map_err(|e| e.to_string())
}

/// Visiting order shared by both samplers.
#[derive(Debug, Clone)]
struct Walk {
    contest_id: ContestId,
    order: Vec<usize>,
    next: usize,
    drawn: usize,
    eligible: usize,
}

impl Walk {
    fn new(contest_id: ContestId, cards: &[Card]) -> Self {
        Self {
            contest_id,
            order: (0..cards.len()).collect(),
            next: 0,
            drawn: 0,
            eligible: cards.iter().filter(|c| c.has_contest(contest_id)).count(),
        }
    }

    /// Index of the next card carrying the contest.
    fn advance(&mut self, cards: &[Card]) -> Result<usize, RlaError> {
        while self.next < self.order.len() {
            let idx = self.order[self.next];
            self.next += 1;
            if cards[idx].has_contest(self.contest_id) {
                self.drawn += 1;
                return Ok(idx);
            }
        }
        Err(RlaError::SamplerExhausted {
            contest: self.contest_id,
            drawn: self.drawn,
        })
    }

    fn reset(&mut self, ctx: &mut RunContext) {
        self.order.shuffle(ctx.rng());
        self.next = 0;
        self.drawn = 0;
    }

    fn has_next(&self) -> bool {
        self.drawn < self.eligible
    }
}

// ---------------------------------------------------------------------------
// Polling
// ---------------------------------------------------------------------------

/// Draws assorter values of audited cards, without replacement.
///
/// Eligibility follows `eligible_by`: the cards themselves in simulations,
/// the CVRs of the selected cards in a real round.
#[derive(Debug, Clone)]
pub struct PollWithoutReplacement {
    cards: Arc<Vec<Card>>,
    eligible_by: Arc<Vec<Card>>,
    assorter: AssorterKind,
    use_phantoms: bool,
    walk: Walk,
}

impl PollWithoutReplacement {
    /// Polls `cards` directly, as in simulations where the CVRs stand in
    /// for the MVRs.
    pub fn new(cards: Arc<Vec<Card>>, assorter: AssorterKind, use_phantoms: bool) -> Self {
        let walk = Walk::new(assorter.contest_id(), &cards);
        Self {
            eligible_by: cards.clone(),
            cards,
            assorter,
            use_phantoms,
            walk,
        }
    }

    /// Polls `mvrs[i]` wherever `cvrs[i]` carries the contest. An MVR that
    /// lost the contest stays in the sample and assorts as a card without it.
    pub fn audited(
        mvrs: Arc<Vec<Card>>,
        cvrs: Arc<Vec<Card>>,
        assorter: AssorterKind,
        use_phantoms: bool,
    ) -> Result<Self, RlaError> {
        if mvrs.len() != cvrs.len() {
            return Err(RlaError::config(
                "mvrs",
                format!("{} MVRs for {} CVRs", mvrs.len(), cvrs.len()),
            ));
        }
        let walk = Walk::new(assorter.contest_id(), &cvrs);
        Ok(Self {
            cards: mvrs,
            eligible_by: cvrs,
            assorter,
            use_phantoms,
            walk,
        })
    }
}

impl Sampler for PollWithoutReplacement {
    fn sample(&mut self) -> Result<f64, RlaError> {
        let idx = self.walk.advance(&self.eligible_by)?;
        Ok(self.assorter.assort(&self.cards[idx], self.use_phantoms))
    }

    fn reset(&mut self, ctx: &mut RunContext) {
        self.walk.reset(ctx);
    }

    fn max_samples(&self) -> usize {
        self.walk.eligible
    }

    fn max_sample_index(&self) -> usize {
        self.walk.next
    }

    fn has_next(&self) -> bool {
        self.walk.has_next()
    }

    fn n_cards(&self) -> usize {
        self.cards.len()
    }
}

// ---------------------------------------------------------------------------
// Comparison
// ---------------------------------------------------------------------------

/// Draws comparison values of (MVR, CVR) pairs, without replacement.
///
/// `mvrs[i]` is the hand interpretation of `cvrs[i]`. Eligibility follows
/// the CVR.
#[derive(Debug, Clone)]
pub struct ClcaWithoutReplacement {
    mvrs: Arc<Vec<Card>>,
    cvrs: Arc<Vec<Card>>,
    clca: ClcaAssorter,
    walk: Walk,
}

impl ClcaWithoutReplacement {
    /// Pairs `mvrs[i]` with `cvrs[i]`; the lists must have the same length.
    pub fn new(
        mvrs: Arc<Vec<Card>>,
        cvrs: Arc<Vec<Card>>,
        clca: ClcaAssorter,
    ) -> Result<Self, RlaError> {
        if mvrs.len() != cvrs.len() {
            return Err(RlaError::config(
                "mvrs",
                format!("{} MVRs for {} CVRs", mvrs.len(), cvrs.len()),
            ));
        }
        let walk = Walk::new(clca.assorter().contest_id(), &cvrs);
        Ok(Self {
            mvrs,
            cvrs,
            clca,
            walk,
        })
    }

    pub fn clca(&self) -> &ClcaAssorter {
        &self.clca
    }

    pub fn mvrs(&self) -> &[Card] {
        &self.mvrs
    }

    pub fn cvrs(&self) -> &[Card] {
        &self.cvrs
    }
}

impl Sampler for ClcaWithoutReplacement {
    fn sample(&mut self) -> Result<f64, RlaError> {
        let idx = self.walk.advance(&self.cvrs)?;
        self.clca.bassort(&self.mvrs[idx], &self.cvrs[idx])
    }

    fn reset(&mut self, ctx: &mut RunContext) {
        self.walk.reset(ctx);
    }

    fn max_samples(&self) -> usize {
        self.walk.eligible
    }

    fn max_sample_index(&self) -> usize {
        self.walk.next
    }

    fn has_next(&self) -> bool {
        self.walk.has_next()
    }

    fn n_cards(&self) -> usize {
        self.cvrs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assorter::PluralityAssorter;

    fn assorter() -> AssorterKind {
        AssorterKind::Plurality(PluralityAssorter {
            contest_id: 1,
            winner: 0,
            loser: 1,
            max_votes: 1,
            reported_mean: 0.75,
        })
    }

    fn cards() -> Arc<Vec<Card>> {
        Arc::new(vec![
            Card::new("a", 0, 0).with_votes(1, vec![0]),
            Card::new("b", 1, 0),
            Card::new("c", 2, 0).with_votes(1, vec![1]),
            Card::new("d", 3, 0).with_votes(1, vec![0]),
        ])
    }

    #[test]
    fn polls_in_order_and_skips_other_cards() {
        let mut s = PollWithoutReplacement::new(cards(), assorter(), false);
        assert_eq!(s.max_samples(), 3);
        assert_eq!(s.n_cards(), 4);
        let xs: Vec<f64> = (0..3).map(|_| s.sample().unwrap()).collect();
        assert_eq!(xs, vec![1.0, 0.0, 1.0]);
        assert_eq!(s.max_sample_index(), 4);
        assert!(!s.has_next());
        assert!(matches!(
            s.sample(),
            Err(RlaError::SamplerExhausted { contest: 1, drawn: 3 })
        ));
    }

    #[test]
    fn audited_polling_follows_the_cvrs() {
        // the MVR of card "a" lost the contest; it is still drawn, at 1/2
        let mut mvrs = cards().as_ref().clone();
        mvrs[0] = Card::new("a", 0, 0);
        let mut s =
            PollWithoutReplacement::audited(Arc::new(mvrs), cards(), assorter(), false).unwrap();
        assert_eq!(s.max_samples(), 3);
        let xs: Vec<f64> = (0..3).map(|_| s.sample().unwrap()).collect();
        assert_eq!(xs, vec![0.5, 0.0, 1.0]);

        let short = Arc::new(cards()[..2].to_vec());
        assert!(PollWithoutReplacement::audited(short, cards(), assorter(), false).is_err());
    }

    #[test]
    fn reset_permutes_same_multiset() {
        let mut s = PollWithoutReplacement::new(cards(), assorter(), false);
        let mut ctx = RunContext::new(3);
        for _ in 0..5 {
            s.reset(&mut ctx);
            let mut xs: Vec<f64> = (0..3).map(|_| s.sample().unwrap()).collect();
            xs.sort_by(f64::total_cmp);
            assert_eq!(xs, vec![0.0, 1.0, 1.0]);
        }
    }

    #[test]
    fn comparison_requires_paired_records() {
        let cvrs = cards();
        let mvrs = Arc::new(cvrs[..2].to_vec());
        let clca = ClcaAssorter::new(assorter(), false).unwrap();
        assert!(ClcaWithoutReplacement::new(mvrs, cvrs, clca).is_err());
    }

    #[test]
    fn comparison_without_errors_yields_noerror() {
        let cvrs = cards();
        let clca = ClcaAssorter::new(assorter(), false).unwrap();
        let noerror = clca.noerror();
        let mut s = ClcaWithoutReplacement::new(cvrs.clone(), cvrs, clca).unwrap();
        while s.has_next() {
            assert!((s.sample().unwrap() - noerror).abs() < 1e-12);
        }
    }
}
