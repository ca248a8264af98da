//! Synthetic MVRs made by perturbing CVRs.

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::seq::index;
use rand::Rng;

use crate::assorter::AssorterKind;
use crate::card::Card;
use crate::clca::ClcaAssorter;
use crate::context::RunContext;
use crate::contest::{CandidateId, Contest, ContestId};
use crate::error::RlaError;
use crate::sampler::{ClcaWithoutReplacement, PollWithoutReplacement, Sampler};

/// Returns a copy of `cards` in which exactly `round(M * fuzz_pct)` of the
/// `M` eligible cards have their votes changed. Eligible cards are
/// non-phantom and carry at least one of `contests`.
///
/// Single-choice contests get a new candidate (or an undervote); ranked
/// contests get two rankings swapped.
pub fn make_fuzzed_cards(
    cards: &[Card],
    contests: &[Contest],
    fuzz_pct: f64,
    ctx: &mut RunContext,
) -> Result<Vec<Card>, RlaError> {
    if !(0.0..=1.0).contains(&fuzz_pct) {
        return Err(RlaError::config("fuzz_pct", format!("{fuzz_pct} outside [0, 1]")));
    }
    let by_id: BTreeMap<ContestId, &Contest> = contests.iter().map(|c| (c.id, c)).collect();
    let eligible: Vec<usize> = cards
        .iter()
        .enumerate()
        .filter(|(_, c)| !c.phantom && c.contests().any(|id| by_id.contains_key(&id)))
        .map(|(i, _)| i)
        .collect();
    let n_fuzz = (eligible.len() as f64 * fuzz_pct).round() as usize;

    let mut out = cards.to_vec();
    if n_fuzz == 0 {
        return Ok(out);
    }
    let mut chosen: Vec<usize> = index::sample(ctx.rng(), eligible.len(), n_fuzz)
        .into_iter()
        .map(|k| eligible[k])
        .collect();
    chosen.sort_unstable();

    for i in chosen {
        let card = &mut out[i];
        let ids: Vec<ContestId> = card.contests().filter(|id| by_id.contains_key(id)).collect();
        for id in ids {
            let contest = by_id[&id];
            let Some(votes) = card.votes.get_mut(&id) else {
                continue;
            };
            if contest.is_ranked() && votes.len() >= 2 {
                switch_rankings(votes, ctx.rng());
            } else {
                let current = votes.first().copied();
                *votes = choose_new_candidate(current, &contest.candidates, ctx.rng())
                    .into_iter()
                    .collect();
            }
        }
    }
    Ok(out)
}

/// Uniform choice over `candidates` plus "no vote", excluding `current`.
pub fn choose_new_candidate<R: Rng + ?Sized>(
    current: Option<CandidateId>,
    candidates: &[CandidateId],
    rng: &mut R,
) -> Option<CandidateId> {
    let options: Vec<Option<CandidateId>> = candidates
        .iter()
        .copied()
        .map(Some)
        .chain(std::iter::once(None))
        .filter(|c| *c != current)
        .collect();
    if options.is_empty() {
        return current;
    }
    options[rng.gen_range(0..options.len())]
}

/// Swaps two distinct positions of a ranking.
pub fn switch_rankings<R: Rng + ?Sized>(ranks: &mut [CandidateId], rng: &mut R) {
    if ranks.len() < 2 {
        return;
    }
    let a = rng.gen_range(0..ranks.len());
    let mut b = rng.gen_range(0..ranks.len() - 1);
    if b >= a {
        b += 1;
    }
    ranks.swap(a, b);
}

/// Number of positions where the two card lists disagree on any vote.
pub fn count_altered(original: &[Card], fuzzed: &[Card]) -> usize {
    original
        .iter()
        .zip(fuzzed)
        .filter(|(a, b)| a.votes != b.votes)
        .count()
}

/// Comparison sampler over CVRs paired with fuzzed MVRs.
///
/// Fuzzing happens once at construction; [`Sampler::reset`] only permutes.
#[derive(Debug, Clone)]
pub struct FuzzSampler {
    inner: ClcaWithoutReplacement,
    n_altered: usize,
}

impl FuzzSampler {
    /// Construct a sampler over fuzzed MVRs.
    ///
    /// # Parameters
    /// - `cvrs`: Reported records; the MVRs are copies with votes changed.
    /// - `contests`: Contests whose votes may be changed.
    /// - `clca`: Comparison assorter under test.
    /// - `fuzz_pct`: Fraction of eligible cards whose votes are changed.
    /// - `ctx`: Source of randomness.
    pub fn new(
        cvrs: Arc<Vec<Card>>,
        contests: &[Contest],
        clca: ClcaAssorter,
        fuzz_pct: f64,
        ctx: &mut RunContext,
    ) -> Result<Self, RlaError> {
        let mvrs = make_fuzzed_cards(&cvrs, contests, fuzz_pct, ctx)?;
        let n_altered = count_altered(&cvrs, &mvrs);
        let inner = ClcaWithoutReplacement::new(Arc::new(mvrs), cvrs, clca)?;
        Ok(Self { inner, n_altered })
    }

    pub fn n_altered(&self) -> usize {
        self.n_altered
    }
}

impl Sampler for FuzzSampler {
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

/// Polling sampler over fuzzed copies of `cards`.
pub fn fuzzed_polling(
    cards: &[Card],
    contests: &[Contest],
    assorter: AssorterKind,
    use_phantoms: bool,
    fuzz_pct: f64,
    ctx: &mut RunContext,
) -> Result<PollWithoutReplacement, RlaError> {
    let mvrs = make_fuzzed_cards(cards, contests, fuzz_pct, ctx)?;
    Ok(PollWithoutReplacement::new(
        Arc::new(mvrs),
        assorter,
        use_phantoms,
    ))
}
