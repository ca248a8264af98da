//! Synthetic elections: contests with known tallies and matching cards.
//!
//! Used by simulations and tests. Cards are dealt in index order, so the PRN
//! sort is what mixes them.

use serde::{Deserialize, Serialize};

use crate::card::{card_prn, Card};
use crate::contest::{CandidateId, ChoiceFunction, Contest, ContestId, ContestSpec};
use crate::error::RlaError;

/// Recipe for one synthetic contest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestContest {
    pub id: ContestId,
    pub choice: ChoiceFunction,
    /// Votes per candidate; candidate ids are positions.
    pub votes: Vec<u64>,
    pub nc: usize,
    #[serde(default)]
    pub n_phantoms: usize,
}

impl TestContest {
    /// Two-candidate plurality contest over `nc` cards where candidate 0 leads
    /// by `margin` of `nc`, `undervote_pct` of the cards are blank and
    /// `phantom_pct` are phantoms.
    pub fn two_candidate(
        id: ContestId,
        nc: usize,
        margin: f64,
        undervote_pct: f64,
        phantom_pct: f64,
    ) -> Self {
        let n_phantoms = (nc as f64 * phantom_pct).round() as usize;
        let undervotes = (nc as f64 * undervote_pct).round() as usize;
        let cast = nc.saturating_sub(n_phantoms + undervotes) as f64;
        let lead = (nc as f64 * margin).round().min(cast);
        let loser = ((cast - lead) / 2.0).floor();
        let winner = cast - loser;
        Self {
            id,
            choice: ChoiceFunction::Plurality,
            votes: vec![winner as u64, loser as u64],
            nc,
            n_phantoms,
        }
    }

    pub fn with_phantoms(mut self, n_phantoms: usize) -> Self {
        self.n_phantoms = n_phantoms;
        self
    }

    /// Cards carrying the contest that are not phantoms.
    fn n_real(&self) -> usize {
        self.nc.saturating_sub(self.n_phantoms)
    }

    pub fn contest(&self) -> Result<Contest, RlaError> {
        Contest::new(ContestSpec {
            id: self.id,
            name: format!("contest{}", self.id),
            choice: self.choice,
            candidates: (0..self.votes.len() as CandidateId).collect(),
            votes: self
                .votes
                .iter()
                .enumerate()
                .map(|(c, v)| (c as CandidateId, *v))
                .collect(),
            nc: self.nc,
            n_phantoms: self.n_phantoms,
            n_winners: 1,
            winners: None,
        })
    }

    /// Marks for the `pos`-th real card of the contest.
    fn marks(&self, pos: usize) -> Vec<CandidateId> {
        let mut seen = 0usize;
        for (cand, &n) in self.votes.iter().enumerate() {
            seen += n as usize;
            if pos < seen {
                let cand = cand as CandidateId;
                return match self.choice {
                    ChoiceFunction::RankedChoice => std::iter::once(cand)
                        .chain((0..self.votes.len() as CandidateId).filter(|c| *c != cand))
                        .collect(),
                    _ => vec![cand],
                };
            }
        }
        Vec::new()
    }
}

impl From<&Contest> for TestContest {
    fn from(contest: &Contest) -> Self {
        let n_cands = contest.candidates.iter().copied().max().map_or(0, |m| m + 1);
        Self {
            id: contest.id,
            choice: contest.choice,
            votes: (0..n_cands).map(|c| contest.votes_for(c)).collect(),
            nc: contest.nc,
            n_phantoms: contest.n_phantoms,
        }
    }
}

/// `ncards` real cards plus the phantoms the contests call for.
///
/// Real card `i` carries every contest with `i < nc - n_phantoms`; the first
/// cards of a contest hold candidate 0's votes, then candidate 1's, and so
/// on, with undervotes last. PRNs come from [`card_prn`] under `seed`.
pub fn make_cards(contests: &[TestContest], ncards: usize, seed: u64) -> Vec<Card> {
    let mut cards: Vec<Card> = (0..ncards)
        .map(|i| {
            let mut card = Card::new(format!("card{i}"), i, card_prn(seed, i));
            for tc in contests.iter().filter(|tc| i < tc.n_real()) {
                card.votes.insert(tc.id, tc.marks(i));
            }
            card
        })
        .collect();

    let max_phantoms = contests.iter().map(|tc| tc.n_phantoms).max().unwrap_or(0);
    cards.extend((0..max_phantoms).map(|j| {
        let index = ncards + j;
        Card::phantom(
            format!("phantom{j}"),
            index,
            card_prn(seed, index),
            contests
                .iter()
                .filter(|tc| j < tc.n_phantoms)
                .map(|tc| tc.id),
        )
    }));
    cards
}

/// Contests and cards for a whole synthetic election.
pub fn make_election(
    contests: &[TestContest],
    ncards: usize,
    seed: u64,
) -> Result<(Vec<Contest>, Vec<Card>), RlaError> {
    if let Some(tc) = contests.iter().find(|tc| tc.n_real() > ncards) {
        return Err(RlaError::contest(
            tc.id,
            format!("needs {} cards but only {ncards} exist", tc.n_real()),
        ));
    }
    let built = contests
        .iter()
        .map(TestContest::contest)
        .collect::<Result<Vec<_>, _>>()?;
    Ok((built, make_cards(contests, ncards, seed)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cards_reproduce_the_tally() {
        let tc = TestContest::two_candidate(1, 1000, 0.1, 0.05, 0.01);
        let (contests, cards) = make_election(std::slice::from_ref(&tc), 1000, 9).unwrap();
        let contest = &contests[0];
        assert_eq!(contest.n_phantoms, 10);
        assert_eq!(contest.undervotes, 50);
        let for_winner = cards
            .iter()
            .filter(|c| c.votes_for(1) == Some(&[0][..]))
            .count() as u64;
        assert_eq!(for_winner, contest.votes_for(0));
        assert_eq!(cards.iter().filter(|c| c.phantom).count(), 10);
        assert_eq!(cards.iter().filter(|c| c.has_contest(1)).count(), 1000);
    }

    #[test]
    fn margin_is_respected() {
        let tc = TestContest::two_candidate(1, 1000, 0.1, 0.0, 0.0);
        assert_eq!(tc.votes, vec![550, 450]);
    }

    #[test]
    fn round_trips_a_contest() {
        let tc = TestContest::two_candidate(4, 200, 0.2, 0.1, 0.0);
        let contest = tc.contest().unwrap();
        assert_eq!(TestContest::from(&contest), tc);
    }

    #[test]
    fn ranked_cards_list_every_candidate() {
        let tc = TestContest {
            id: 2,
            choice: ChoiceFunction::RankedChoice,
            votes: vec![3, 2, 1],
            nc: 6,
            n_phantoms: 0,
        };
        let cards = make_cards(&[tc], 6, 1);
        let card = cards.iter().find(|c| c.index == 3).unwrap();
        assert_eq!(card.votes_for(2), Some(&[1, 0, 2][..]));
    }

    #[test]
    fn too_few_cards_is_an_error() {
        let tc = TestContest::two_candidate(1, 100, 0.1, 0.0, 0.0);
        assert!(make_election(&[tc], 50, 1).is_err());
    }
}
