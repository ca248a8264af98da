//! Contests and their reported results.

use std::collections::BTreeMap;

use rla_stats::TestH0Status;
use serde::{Deserialize, Serialize};

use crate::error::RlaError;

pub type ContestId = u32;
pub type CandidateId = u32;

/// Social choice function of a contest.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChoiceFunction {
    Plurality,
    /// The winner needs more than `min_fraction` of the valid votes.
    SuperMajority { min_fraction: f64 },
    /// Ranked choice; reported votes are first preferences and the winner is
    /// given, since the elimination logic lives outside this crate.
    RankedChoice,
}

/// Input description of a contest, as read from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContestSpec {
    pub id: ContestId,
    pub name: String,
    pub choice: ChoiceFunction,
    pub candidates: Vec<CandidateId>,
    pub votes: BTreeMap<CandidateId, u64>,
    /// Upper bound on the number of cards containing the contest.
    pub nc: usize,
    #[serde(default)]
    pub n_phantoms: usize,
    #[serde(default = "one")]
    pub n_winners: usize,
    /// Reported winners; derived from `votes` when absent.
    #[serde(default)]
    pub winners: Option<Vec<CandidateId>>,
}

fn one() -> usize {
    1
}

/// A validated contest. `votes + undervotes + phantoms = nc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contest {
    pub id: ContestId,
    pub name: String,
    pub choice: ChoiceFunction,
    pub candidates: Vec<CandidateId>,
    pub votes: BTreeMap<CandidateId, u64>,
    pub nc: usize,
    pub n_phantoms: usize,
    pub undervotes: usize,
    pub winners: Vec<CandidateId>,
    pub losers: Vec<CandidateId>,
}

impl Contest {
    /// Validates `spec`. Winners not given are derived from the tallies.
    pub fn new(spec: ContestSpec) -> Result<Self, RlaError> {
        let ContestSpec {
            id,
            name,
            choice,
            candidates,
            votes,
            nc,
            n_phantoms,
            n_winners,
            winners,
        } = spec;

        if candidates.is_empty() {
            return Err(RlaError::contest(id, "no candidates"));
        }
        if let Some(c) = votes.keys().find(|c| !candidates.contains(c)) {
            return Err(RlaError::contest(id, format!("votes for unknown candidate {c}")));
        }
        if let ChoiceFunction::SuperMajority { min_fraction } = choice {
            if !(min_fraction > 0.0 && min_fraction < 1.0) {
                return Err(RlaError::contest(
                    id,
                    format!("min_fraction {min_fraction} must lie in (0, 1)"),
                ));
            }
        }
        let total_votes: u64 = votes.values().sum();
        let cast = total_votes as usize + n_phantoms;
        if cast > nc {
            return Err(RlaError::contest(
                id,
                format!("votes {total_votes} + phantoms {n_phantoms} exceed nc {nc}"),
            ));
        }
        let undervotes = nc - cast;

        let winners = match winners {
            Some(w) => {
                if let Some(c) = w.iter().find(|c| !candidates.contains(c)) {
                    return Err(RlaError::contest(id, format!("unknown winner {c}")));
                }
                w
            }
            None => reported_winners(&choice, &candidates, &votes, n_winners),
        };
        if winners.is_empty() {
            return Err(RlaError::contest(id, "no reported winner"));
        }
        let losers = candidates
            .iter()
            .copied()
            .filter(|c| !winners.contains(c))
            .collect();

        Ok(Self {
            id,
            name,
            choice,
            candidates,
            votes,
            nc,
            n_phantoms,
            undervotes,
            winners,
            losers,
        })
    }

    pub fn votes_for(&self, candidate: CandidateId) -> u64 {
        self.votes.get(&candidate).copied().unwrap_or(0)
    }

    pub fn total_votes(&self) -> u64 {
        self.votes.values().sum()
    }

    /// Share of the `nc` cards that are phantoms; 0 when `nc` is 0.
    pub fn phantom_rate(&self) -> f64 {
        if self.nc == 0 {
            0.0
        } else {
            self.n_phantoms as f64 / self.nc as f64
        }
    }

    pub fn is_ranked(&self) -> bool {
        matches!(self.choice, ChoiceFunction::RankedChoice)
    }
}

/// A contest together with its audit progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContestUnderAudit {
    pub contest: Contest,
    pub done: bool,
    pub status: TestH0Status,
}

impl ContestUnderAudit {
    pub fn new(contest: Contest) -> Self {
        Self {
            contest,
            done: false,
            status: TestH0Status::InProgress,
        }
    }

    pub fn id(&self) -> ContestId {
        self.contest.id
    }

    /// Marks the contest done with its final status.
    pub fn finish(&mut self, status: TestH0Status) {
        self.done = true;
        self.status = status;
    }
}

fn reported_winners(
    choice: &ChoiceFunction,
    candidates: &[CandidateId],
    votes: &BTreeMap<CandidateId, u64>,
    n_winners: usize,
) -> Vec<CandidateId> {
    let count = |c: &CandidateId| votes.get(c).copied().unwrap_or(0);
    match choice {
        ChoiceFunction::SuperMajority { min_fraction } => {
            let valid: u64 = votes.values().sum();
            candidates
                .iter()
                .copied()
                .filter(|c| valid > 0 && count(c) as f64 / valid as f64 > *min_fraction)
                .collect()
        }
        ChoiceFunction::Plurality | ChoiceFunction::RankedChoice => {
            let mut ranked: Vec<CandidateId> = candidates.to_vec();
            ranked.sort_by(|a, b| count(b).cmp(&count(a)).then(a.cmp(b)));
            ranked.truncate(n_winners.max(1));
            ranked
        }
    }
}
