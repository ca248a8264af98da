//! Consistent sampling: one PRN-ordered prefix of cards serves every contest.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::card::Card;
use crate::contest::ContestId;

/// How many samples a contest wants in total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleTarget {
    pub contest_id: ContestId,
    pub want: usize,
    /// Finished or abandoned contests take no part in the scan.
    pub done: bool,
}

impl SampleTarget {
    /// An active target.
    ///
    /// # Parameters
    /// - `contest_id`: Contest the samples are for.
    /// - `want`: Total samples wanted, counting earlier rounds.
    pub fn new(contest_id: ContestId, want: usize) -> Self {
        Self {
            contest_id,
            want,
            done: false,
        }
    }
}

/// Outcome of the scan for one contest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContestAllocation {
    pub want: usize,
    /// Usable samples in the contiguous prefix.
    pub have: usize,
    /// Of `have`, cards not sampled in an earlier round.
    pub have_new: usize,
    /// A card with the contest was passed over, so later cards do not count.
    pub skipped: bool,
}

impl ContestAllocation {
    fn needs_more(&self) -> bool {
        !self.skipped && self.have < self.want
    }
}

/// Cards chosen for a round, in PRN order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SampleSelection {
    /// Positions of the selected cards in the sorted input.
    pub indices: Vec<usize>,
    pub prns: Vec<u64>,
    /// Selected cards that were not sampled before.
    pub n_new: usize,
    pub per_contest: BTreeMap<ContestId, ContestAllocation>,
}

impl SampleSelection {
    /// Number of selected cards.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Targets that the whole card list could not satisfy.
    pub fn shortfalls(&self) -> impl Iterator<Item = (ContestId, &ContestAllocation)> {
        self.per_contest
            .iter()
            .filter(|(_, a)| a.have < a.want)
            .map(|(id, a)| (*id, a))
    }
}

/// Scans `cards` (sorted by PRN) and selects a card iff one of its contests
/// still needs samples. Every contest on a selected card counts it, unless
/// that contest was skipped earlier. Stops once every target is met.
///
/// `previous` holds the PRNs sampled in earlier rounds; they are selected
/// again like any other card but do not count as new.
pub fn consistent_sampling(
    targets: &[SampleTarget],
    cards: &[Card],
    previous: &BTreeSet<u64>,
) -> SampleSelection {
    let mut per_contest: BTreeMap<ContestId, ContestAllocation> = targets
        .iter()
        .filter(|t| !t.done)
        .map(|t| {
            (
                t.contest_id,
                ContestAllocation {
                    want: t.want,
                    ..ContestAllocation::default()
                },
            )
        })
        .collect();

    let mut selection = SampleSelection::default();
    for (pos, card) in cards.iter().enumerate() {
        if !per_contest.values().any(ContestAllocation::needs_more) {
            break;
        }
        let selected = card
            .contests()
            .any(|id| per_contest.get(&id).is_some_and(ContestAllocation::needs_more));
        let is_new = !previous.contains(&card.prn);
        for id in card.contests() {
            let Some(alloc) = per_contest.get_mut(&id) else {
                continue;
            };
            if !selected {
                alloc.skipped = true;
            } else if !alloc.skipped {
                alloc.have += 1;
                if is_new {
                    alloc.have_new += 1;
                }
            }
        }
        if selected {
            selection.indices.push(pos);
            selection.prns.push(card.prn);
            if is_new {
                selection.n_new += 1;
            }
        }
    }

    for (id, alloc) in per_contest.iter().filter(|(_, a)| a.have < a.want) {
        warn!(
            contest = id,
            have = alloc.have,
            want = alloc.want,
            "not enough cards to reach the sample target"
        );
    }
    selection.per_contest = per_contest;
    selection
}

/// A selection that fits the budget, and the contests dropped to get there.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BudgetedSelection {
    pub selection: SampleSelection,
    pub abandoned: Vec<ContestId>,
}

/// Runs [`consistent_sampling`], and while the selection is larger than
/// `cutoff` marks the contest with the largest target done and runs again.
pub fn sample_with_budget(
    targets: &mut [SampleTarget],
    cards: &[Card],
    previous: &BTreeSet<u64>,
    cutoff: Option<usize>,
) -> BudgetedSelection {
    let mut abandoned = Vec::new();
    loop {
        let selection = consistent_sampling(targets, cards, previous);
        let over = cutoff.is_some_and(|c| selection.len() > c);
        if !over {
            return BudgetedSelection {
                selection,
                abandoned,
            };
        }
        let largest = targets
            .iter_mut()
            .filter(|t| !t.done)
            .max_by(|a, b| a.want.cmp(&b.want).then(b.contest_id.cmp(&a.contest_id)));
        let Some(target) = largest else {
            return BudgetedSelection {
                selection,
                abandoned,
            };
        };
        info!(
            contest = target.contest_id,
            want = target.want,
            selected = selection.len(),
            cutoff = ?cutoff,
            "sample budget exceeded; removing contest"
        );
        target.done = true;
        abandoned.push(target.contest_id);
    }
}

/// The first `n` cards carrying `contest_id` in PRN order that were not
/// sampled before. Estimation simulates over these.
pub fn estimation_subset(
    cards: &[Card],
    contest_id: ContestId,
    previous: &BTreeSet<u64>,
    n: usize,
) -> Vec<Card> {
    cards
        .iter()
        .filter(|c| c.has_contest(contest_id) && !previous.contains(&c.prn))
        .take(n)
        .cloned()
        .collect()
}
