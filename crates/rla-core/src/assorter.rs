//! Assorters: functions from a card to a bounded value whose population mean
//! exceeds 1/2 exactly when an assertion about the reported outcome holds.

use rla_stats::{margin2mean, mean2margin};
use serde::{Deserialize, Serialize};

use crate::card::{Card, PoolTally};
use crate::contest::{CandidateId, ChoiceFunction, Contest, ContestId};
use crate::error::RlaError;

/// The assorter contract shared by every social choice function.
pub trait Assorter {
    fn contest_id(&self) -> ContestId;

    /// Value of `card` in `[0, upper_bound()]`. A card without the contest
    /// assorts to 1/2; a phantom assorts to 0 when `use_phantoms` is set.
    fn assort(&self, card: &Card, use_phantoms: bool) -> f64;

    fn upper_bound(&self) -> f64;

    /// Assorter mean over the reported results.
    fn reported_mean(&self) -> f64;

    fn winner(&self) -> CandidateId;

    fn loser(&self) -> Option<CandidateId>;

    fn desc(&self) -> String;

    fn reported_margin(&self) -> f64 {
        mean2margin(self.reported_mean())
    }

    /// Assorter mean implied by a pool's tally, if the assorter supports it.
    fn mean_of_tally(&self, tally: &PoolTally) -> Option<f64>;

    /// Votes for this contest that assort to the upper bound.
    fn winning_vote(&self) -> Vec<CandidateId>;

    /// Votes for this contest that assort to 0, if any exist.
    fn losing_vote(&self) -> Option<Vec<CandidateId>>;
}

fn counts_in(tally: &PoolTally, candidate: CandidateId) -> f64 {
    tally.votes.get(&candidate).copied().unwrap_or(0) as f64
}

// ---------------------------------------------------------------------------
// Plurality
// ---------------------------------------------------------------------------

/// Winner `w` beats loser `l`: `(w - l + 1) / 2` on each card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluralityAssorter {
    pub contest_id: ContestId,
    pub winner: CandidateId,
    pub loser: CandidateId,
    /// Marks allowed per card; more is an overvote.
    pub max_votes: usize,
    pub reported_mean: f64,
}

impl PluralityAssorter {
    /// Assorter for `winner` beating `loser`, with the margin taken from the
    /// reported tallies over `contest.nc`.
    pub fn new(contest: &Contest, winner: CandidateId, loser: CandidateId) -> Self {
        let margin = if contest.nc == 0 {
            0.0
        } else {
            (contest.votes_for(winner) as f64 - contest.votes_for(loser) as f64) / contest.nc as f64
        };
        Self {
            contest_id: contest.id,
            winner,
            loser,
            max_votes: contest.winners.len().max(1),
            reported_mean: margin2mean(margin),
        }
    }
}

impl Assorter for PluralityAssorter {
    fn contest_id(&self) -> ContestId {
        self.contest_id
    }

    fn assort(&self, card: &Card, use_phantoms: bool) -> f64 {
        if card.phantom && use_phantoms {
            return 0.0;
        }
        let Some(votes) = card.votes_for(self.contest_id) else {
            return 0.5;
        };
        if votes.len() > self.max_votes {
            return 0.5;
        }
        let w = votes.contains(&self.winner) as u8 as f64;
        let l = votes.contains(&self.loser) as u8 as f64;
        (w - l + 1.0) / 2.0
    }

    fn upper_bound(&self) -> f64 {
        1.0
    }

    fn reported_mean(&self) -> f64 {
        self.reported_mean
    }

    fn winner(&self) -> CandidateId {
        self.winner
    }

    fn loser(&self) -> Option<CandidateId> {
        Some(self.loser)
    }

    fn desc(&self) -> String {
        format!("contest {} winner {} loser {}", self.contest_id, self.winner, self.loser)
    }

    fn mean_of_tally(&self, tally: &PoolTally) -> Option<f64> {
        if tally.ncards == 0 {
            return None;
        }
        let margin =
            (counts_in(tally, self.winner) - counts_in(tally, self.loser)) / tally.ncards as f64;
        Some(margin2mean(margin))
    }

    fn winning_vote(&self) -> Vec<CandidateId> {
        vec![self.winner]
    }

    fn losing_vote(&self) -> Option<Vec<CandidateId>> {
        Some(vec![self.loser])
    }
}

// ---------------------------------------------------------------------------
// Super majority
// ---------------------------------------------------------------------------

/// Winner must take more than `min_fraction` of the valid votes.
///
/// A vote for the winner assorts to `1/(2f)`, a single vote for anyone else
/// to 0, everything else to 1/2.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuperMajorityAssorter {
    pub contest_id: ContestId,
    pub winner: CandidateId,
    pub min_fraction: f64,
    /// Some non-winning candidate, used to build losing votes.
    pub other: Option<CandidateId>,
    pub reported_mean: f64,
}

impl SuperMajorityAssorter {
    /// Construct a supermajority assorter.
    ///
    /// # Parameters
    /// - `contest`: Contest whose reported tallies give the mean.
    /// - `winner`: Candidate that must reach the threshold.
    /// - `min_fraction`: Share of valid votes the winner needs.
    pub fn new(contest: &Contest, winner: CandidateId, min_fraction: f64) -> Self {
        let upper = 0.5 / min_fraction;
        let reported_mean = if contest.nc == 0 {
            0.5
        } else {
            let w = contest.votes_for(winner) as f64;
            let blank = (contest.undervotes + contest.n_phantoms) as f64;
            (w * upper + 0.5 * blank) / contest.nc as f64
        };
        Self {
            contest_id: contest.id,
            winner,
            min_fraction,
            other: contest.candidates.iter().copied().find(|c| *c != winner),
            reported_mean,
        }
    }
}

impl Assorter for SuperMajorityAssorter {
    fn contest_id(&self) -> ContestId {
        self.contest_id
    }

    fn assort(&self, card: &Card, use_phantoms: bool) -> f64 {
        if card.phantom && use_phantoms {
            return 0.0;
        }
        match card.votes_for(self.contest_id) {
            Some([only]) if *only == self.winner => self.upper_bound(),
            Some([_]) => 0.0,
            _ => 0.5,
        }
    }

    fn upper_bound(&self) -> f64 {
        0.5 / self.min_fraction
    }

    fn reported_mean(&self) -> f64 {
        self.reported_mean
    }

    fn winner(&self) -> CandidateId {
        self.winner
    }

    fn loser(&self) -> Option<CandidateId> {
        None
    }

    fn desc(&self) -> String {
        format!(
            "contest {} winner {} super majority {}",
            self.contest_id, self.winner, self.min_fraction
        )
    }

    fn mean_of_tally(&self, tally: &PoolTally) -> Option<f64> {
        if tally.ncards == 0 {
            return None;
        }
        let valid: u64 = tally.votes.values().sum();
        let blank = tally.ncards.saturating_sub(valid) as f64;
        let w = counts_in(tally, self.winner);
        Some((w * self.upper_bound() + 0.5 * blank) / tally.ncards as f64)
    }

    fn winning_vote(&self) -> Vec<CandidateId> {
        vec![self.winner]
    }

    fn losing_vote(&self) -> Option<Vec<CandidateId>> {
        self.other.map(|c| vec![c])
    }
}

// ---------------------------------------------------------------------------
// Ranked choice: winner not eliminated before loser
// ---------------------------------------------------------------------------

/// "Winner never eliminated before loser" for ranked ballots.
///
/// 1 when the winner is the first preference, 0 when the loser is ranked
/// above the winner (or ranked while the winner is not), otherwise 1/2.
/// The assertion set and its reported mean come from the caller; no IRV
/// elimination is done here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NebAssorter {
    pub contest_id: ContestId,
    pub winner: CandidateId,
    pub loser: CandidateId,
    pub reported_mean: f64,
}

impl NebAssorter {
    /// # Returns
    /// The assorter, or an error when `reported_mean` leaves `[0, 1]`.
    pub fn new(
        contest_id: ContestId,
        winner: CandidateId,
        loser: CandidateId,
        reported_mean: f64,
    ) -> Result<Self, RlaError> {
        if !(0.0..=1.0).contains(&reported_mean) {
            return Err(RlaError::contest(
                contest_id,
                format!("ranked assorter mean {reported_mean} outside [0, 1]"),
            ));
        }
        Ok(Self {
            contest_id,
            winner,
            loser,
            reported_mean,
        })
    }

    /// Reported mean measured over the CVRs, with cards up to `nc` that are
    /// missing counting 1/2.
    pub fn from_cvrs(
        contest: &Contest,
        winner: CandidateId,
        loser: CandidateId,
        cvrs: &[Card],
    ) -> Result<Self, RlaError> {
        let mut assorter = Self::new(contest.id, winner, loser, 0.5)?;
        let mut sum = 0.0;
        let mut seen = 0usize;
        for card in cvrs.iter().filter(|c| c.has_contest(contest.id)) {
            sum += assorter.assort(card, false);
            seen += 1;
        }
        let nc = contest.nc.max(seen);
        if nc > 0 {
            assorter.reported_mean = (sum + 0.5 * (nc - seen) as f64) / nc as f64;
        }
        Ok(assorter)
    }
}

impl Assorter for NebAssorter {
    fn contest_id(&self) -> ContestId {
        self.contest_id
    }

    fn assort(&self, card: &Card, use_phantoms: bool) -> f64 {
        if card.phantom && use_phantoms {
            return 0.0;
        }
        let Some(ranks) = card.votes_for(self.contest_id) else {
            return 0.5;
        };
        if ranks.first() == Some(&self.winner) {
            return 1.0;
        }
        let w = ranks.iter().position(|c| *c == self.winner);
        let l = ranks.iter().position(|c| *c == self.loser);
        match (w, l) {
            (None, Some(_)) => 0.0,
            (Some(w), Some(l)) if l < w => 0.0,
            _ => 0.5,
        }
    }

    fn upper_bound(&self) -> f64 {
        1.0
    }

    fn reported_mean(&self) -> f64 {
        self.reported_mean
    }

    fn winner(&self) -> CandidateId {
        self.winner
    }

    fn loser(&self) -> Option<CandidateId> {
        Some(self.loser)
    }

    fn desc(&self) -> String {
        format!(
            "contest {} winner {} not eliminated before {}",
            self.contest_id, self.winner, self.loser
        )
    }

    fn mean_of_tally(&self, _tally: &PoolTally) -> Option<f64> {
        None
    }

    fn winning_vote(&self) -> Vec<CandidateId> {
        vec![self.winner, self.loser]
    }

    fn losing_vote(&self) -> Option<Vec<CandidateId>> {
        Some(vec![self.loser, self.winner])
    }
}

// ---------------------------------------------------------------------------
// Closed set of assorters
// ---------------------------------------------------------------------------

/// The primitive assorters, tagged by `kind` when serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssorterKind {
    Plurality(PluralityAssorter),
    SuperMajority(SuperMajorityAssorter),
    Neb(NebAssorter),
}

macro_rules! dispatch {
    ($self:expr, $a:ident => $body:expr) => {
        match $self {
            AssorterKind::Plurality($a) => $body,
            AssorterKind::SuperMajority($a) => $body,
            AssorterKind::Neb($a) => $body,
        }
    };
}

impl Assorter for AssorterKind {
    fn contest_id(&self) -> ContestId {
        dispatch!(self, a => a.contest_id())
    }

    fn assort(&self, card: &Card, use_phantoms: bool) -> f64 {
        dispatch!(self, a => a.assort(card, use_phantoms))
    }

    fn upper_bound(&self) -> f64 {
        dispatch!(self, a => a.upper_bound())
    }

    fn reported_mean(&self) -> f64 {
        dispatch!(self, a => a.reported_mean())
    }

    fn winner(&self) -> CandidateId {
        dispatch!(self, a => a.winner())
    }

    fn loser(&self) -> Option<CandidateId> {
        dispatch!(self, a => a.loser())
    }

    fn desc(&self) -> String {
        dispatch!(self, a => a.desc())
    }

    fn mean_of_tally(&self, tally: &PoolTally) -> Option<f64> {
        dispatch!(self, a => a.mean_of_tally(tally))
    }

    fn winning_vote(&self) -> Vec<CandidateId> {
        dispatch!(self, a => a.winning_vote())
    }

    fn losing_vote(&self) -> Option<Vec<CandidateId>> {
        dispatch!(self, a => a.losing_vote())
    }
}

/// The assertions needed to confirm a contest's reported winners.
///
/// Ranked contests measure each winner/loser mean from `cvrs`.
pub fn assorters_for(contest: &Contest, cvrs: &[Card]) -> Result<Vec<AssorterKind>, RlaError> {
    let mut out = Vec::new();
    match contest.choice {
        ChoiceFunction::Plurality => {
            for &w in &contest.winners {
                for &l in &contest.losers {
                    out.push(AssorterKind::Plurality(PluralityAssorter::new(contest, w, l)));
                }
            }
        }
        ChoiceFunction::SuperMajority { min_fraction } => {
            for &w in &contest.winners {
                out.push(AssorterKind::SuperMajority(SuperMajorityAssorter::new(
                    contest,
                    w,
                    min_fraction,
                )));
            }
        }
        ChoiceFunction::RankedChoice => {
            for &w in &contest.winners {
                for &l in &contest.losers {
                    out.push(AssorterKind::Neb(NebAssorter::from_cvrs(contest, w, l, cvrs)?));
                }
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contest::ContestSpec;

    fn contest(choice: ChoiceFunction, votes: &[(CandidateId, u64)], nc: usize) -> Contest {
        Contest::new(ContestSpec {
            id: 1,
            name: "c".into(),
            choice,
            candidates: votes.iter().map(|(c, _)| *c).collect(),
            votes: votes.iter().copied().collect(),
            nc,
            n_phantoms: 0,
            n_winners: 1,
            winners: None,
        })
        .unwrap()
    }

    fn card(votes: &[CandidateId]) -> Card {
        Card::new("x", 0, 0).with_votes(1, votes.to_vec())
    }

    #[test]
    fn plurality_values_and_mean() {
        let c = contest(ChoiceFunction::Plurality, &[(0, 60), (1, 40)], 100);
        let a = PluralityAssorter::new(&c, 0, 1);
        assert_eq!(a.assort(&card(&[0]), false), 1.0);
        assert_eq!(a.assort(&card(&[1]), false), 0.0);
        assert_eq!(a.assort(&card(&[]), false), 0.5);
        assert_eq!(a.assort(&card(&[0, 1]), false), 0.5);
        assert_eq!(a.assort(&Card::new("y", 1, 0), false), 0.5);
        assert!((a.reported_mean() - 0.6).abs() < 1e-12);
    }

    #[test]
    fn phantoms_assort_to_zero_only_when_used() {
        let c = contest(ChoiceFunction::Plurality, &[(0, 60), (1, 40)], 100);
        let a = AssorterKind::Plurality(PluralityAssorter::new(&c, 0, 1));
        let p = Card::phantom("p", 9, 0, [1]);
        assert_eq!(a.assort(&p, true), 0.0);
        assert_eq!(a.assort(&p, false), 0.5);
    }

    #[test]
    fn supermajority_bounds() {
        let c = contest(ChoiceFunction::SuperMajority { min_fraction: 0.6 }, &[(0, 70), (1, 30)], 100);
        let a = SuperMajorityAssorter::new(&c, 0, 0.6);
        let u = 0.5 / 0.6;
        assert!((a.upper_bound() - u).abs() < 1e-12);
        assert!((a.assort(&card(&[0]), false) - u).abs() < 1e-12);
        assert_eq!(a.assort(&card(&[1]), false), 0.0);
        assert_eq!(a.assort(&card(&[]), false), 0.5);
        assert!((a.reported_mean() - 0.7 * u).abs() < 1e-12);
        assert!(a.reported_mean() > 0.5);
    }

    #[test]
    fn neb_ranks() {
        let a = NebAssorter::new(1, 0, 1, 0.6).unwrap();
        assert_eq!(a.assort(&card(&[0, 1]), false), 1.0);
        assert_eq!(a.assort(&card(&[1, 0]), false), 0.0);
        assert_eq!(a.assort(&card(&[2, 1]), false), 0.0);
        assert_eq!(a.assort(&card(&[2, 0, 1]), false), 0.5);
        assert_eq!(a.assort(&card(&[2]), false), 0.5);
    }

    #[test]
    fn neb_mean_from_cvrs_counts_missing_as_half() {
        let c = contest(ChoiceFunction::RankedChoice, &[(0, 3), (1, 1)], 5);
        let cvrs = vec![card(&[0]), card(&[0]), card(&[0, 1]), card(&[1, 0])];
        let a = NebAssorter::from_cvrs(&c, 0, 1, &cvrs).unwrap();
        assert!((a.reported_mean - 3.5 / 5.0).abs() < 1e-12);
    }

    #[test]
    fn pool_means() {
        let c = contest(ChoiceFunction::Plurality, &[(0, 60), (1, 40)], 100);
        let a = PluralityAssorter::new(&c, 0, 1);
        let tally = PoolTally {
            votes: [(0, 30), (1, 10)].into_iter().collect(),
            ncards: 50,
        };
        assert!((a.mean_of_tally(&tally).unwrap() - 0.7).abs() < 1e-12);
        assert_eq!(a.mean_of_tally(&PoolTally::default()), None);
    }

    #[test]
    fn one_assertion_per_winner_loser_pair() {
        let c = contest(ChoiceFunction::Plurality, &[(0, 50), (1, 30), (2, 20)], 100);
        let all = assorters_for(&c, &[]).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|a| a.winner() == 0));
    }
}
