//! Ballot cards, their sample numbers, and card pools.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::contest::{CandidateId, ContestId};

pub type PoolId = u32;

/// One physical ballot card, or the record made of it.
///
/// The same type carries a CVR (the machine interpretation) and an MVR (the
/// hand interpretation). `votes` maps each contest on the card to the
/// candidates marked, in rank order for ranked contests. A contest present
/// with an empty list is an undervote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub location: String,
    pub index: usize,
    pub prn: u64,
    #[serde(default)]
    pub phantom: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_id: Option<PoolId>,
    pub votes: BTreeMap<ContestId, Vec<CandidateId>>,
}

impl Card {
    /// A non-phantom card with no contests and no pool.
    pub fn new(location: impl Into<String>, index: usize, prn: u64) -> Self {
        Self {
            location: location.into(),
            index,
            prn,
            phantom: false,
            pool_id: None,
            votes: BTreeMap::new(),
        }
    }

    /// A phantom card standing in for a card that should exist but was not
    /// found. It carries the listed contests with no votes.
    pub fn phantom(
        location: impl Into<String>,
        index: usize,
        prn: u64,
        contests: impl IntoIterator<Item = ContestId>,
    ) -> Self {
        Self {
            location: location.into(),
            index,
            prn,
            phantom: true,
            pool_id: None,
            votes: contests.into_iter().map(|c| (c, Vec::new())).collect(),
        }
    }

    pub fn has_contest(&self, contest: ContestId) -> bool {
        self.votes.contains_key(&contest)
    }

    pub fn votes_for(&self, contest: ContestId) -> Option<&[CandidateId]> {
        self.votes.get(&contest).map(Vec::as_slice)
    }

    pub fn contests(&self) -> impl Iterator<Item = ContestId> + '_ {
        self.votes.keys().copied()
    }

    /// A copy of this card with the votes for `contest` replaced.
    pub fn with_votes(&self, contest: ContestId, votes: Vec<CandidateId>) -> Card {
        let mut card = self.clone();
        card.votes.insert(contest, votes);
        card
    }

    pub fn in_pool(mut self, pool: PoolId) -> Card {
        self.pool_id = Some(pool);
        self
    }
}

/// Deterministic sample number of card `index` under `seed`: the first eight
/// bytes of `SHA-256(seed || index)`, big-endian.
pub fn card_prn(seed: u64, index: usize) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(seed.to_be_bytes());
    hasher.update((index as u64).to_be_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Sorts cards into sampling order. Ties on PRN fall back to card index so
/// the order is total.
pub fn sort_by_prn(cards: &mut [Card]) {
    cards.sort_by(|a, b| a.prn.cmp(&b.prn).then(a.index.cmp(&b.index)));
}

/// Reported totals for one contest within a card pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolTally {
    pub votes: BTreeMap<CandidateId, u64>,
    pub ncards: u64,
}

/// A group of cards whose individual CVRs are unavailable; only the pooled
/// totals per contest are known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardPool {
    pub id: PoolId,
    pub name: String,
    pub tallies: BTreeMap<ContestId, PoolTally>,
}

impl CardPool {
    pub fn new(id: PoolId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            tallies: BTreeMap::new(),
        }
    }

    pub fn with_tally(mut self, contest: ContestId, tally: PoolTally) -> Self {
        self.tallies.insert(contest, tally);
        self
    }

    pub fn tally(&self, contest: ContestId) -> Option<&PoolTally> {
        self.tallies.get(&contest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prn_is_deterministic_and_seed_dependent() {
        assert_eq!(card_prn(1, 10), card_prn(1, 10));
        assert_ne!(card_prn(1, 10), card_prn(2, 10));
        assert_ne!(card_prn(1, 10), card_prn(1, 11));
    }

    #[test]
    fn sort_orders_by_prn_then_index() {
        let mut cards = vec![Card::new("a", 0, 5), Card::new("b", 1, 3), Card::new("c", 2, 3)];
        sort_by_prn(&mut cards);
        let order: Vec<usize> = cards.iter().map(|c| c.index).collect();
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[test]
    fn with_votes_leaves_original_untouched() {
        let card = Card::new("a", 0, 1).with_votes(7, vec![1]);
        let changed = card.with_votes(7, vec![2]);
        assert_eq!(card.votes_for(7), Some(&[1][..]));
        assert_eq!(changed.votes_for(7), Some(&[2][..]));
    }

    #[test]
    fn phantom_carries_contests_without_votes() {
        let card = Card::phantom("p", 3, 9, [1, 2]);
        assert!(card.phantom);
        assert!(card.has_contest(2));
        assert_eq!(card.votes_for(1), Some(&[][..]));
    }
}
