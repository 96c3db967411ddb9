/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The prevote and precommit sets of every round of one height.

use std::collections::{BTreeMap, HashMap};

use crate::types::{
    block::BlockID,
    data_types::{ChainID, Height, PeerID, Round},
    validator_set::ValidatorSet,
    vote::{Vote, VoteType},
};

use super::vote_set::{VoteSet, VoteSetError};

/// How many rounds above the node's current round each peer may make it allocate vote sets for.
const MAX_CATCHUP_ROUNDS_PER_PEER: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddVoteError {
    /// The vote is for a height other than the one the node is deciding on.
    HeightMismatch { vote: Height, current: Height },
    /// The peer already made the node track the maximum number of future rounds.
    UnwantedRound { peer: Option<PeerID>, round: Round },
    VoteSet(VoteSetError),
}

impl From<VoteSetError> for AddVoteError {
    fn from(value: VoteSetError) -> Self {
        AddVoteError::VoteSet(value)
    }
}

struct RoundVoteSet {
    prevotes: VoteSet,
    precommits: VoteSet,
}

/// Keeps track of all [`VoteSet`]s from round 0 to the node's current round, plus a few rounds above
/// it that peers have sent votes for.
///
/// Rounds are created lazily. [`set_round`](HeightVoteSet::set_round) creates the sets for the round the
/// node is moving to, and [`add_vote`](HeightVoteSet::add_vote) creates sets for higher rounds on behalf
/// of peers, at most [`MAX_CATCHUP_ROUNDS_PER_PEER`] per peer.
pub struct HeightVoteSet {
    chain_id: ChainID,
    height: Height,
    validators: ValidatorSet,
    round: Round,
    round_vote_sets: BTreeMap<Round, RoundVoteSet>,
    peer_catchup_rounds: HashMap<Option<PeerID>, Vec<Round>>,
}

impl HeightVoteSet {
    pub fn new(chain_id: ChainID, height: Height, validators: ValidatorSet) -> HeightVoteSet {
        let mut height_vote_set = HeightVoteSet {
            chain_id,
            height,
            validators,
            round: Round::zero(),
            round_vote_sets: BTreeMap::new(),
            peer_catchup_rounds: HashMap::new(),
        };
        height_vote_set.add_round(Round::zero());
        height_vote_set.add_round(Round::new(1));
        height_vote_set
    }

    pub fn height(&self) -> Height {
        self.height
    }

    pub fn round(&self) -> Round {
        self.round
    }

    /// Move to `round`, making sure vote sets exist for it and for the round just below the previous one.
    pub fn set_round(&mut self, round: Round) {
        let from = Round::new(self.round.int().saturating_sub(1));
        if self.round != Round::zero() && round < from {
            log::warn!("HeightVoteSet::set_round: must increment round (from {} to {})", self.round, round);
            return;
        }
        for r in from.int()..=round.int() {
            let r = Round::new(r);
            if !self.round_vote_sets.contains_key(&r) {
                self.add_round(r);
            }
        }
        self.round = round;
    }

    fn add_round(&mut self, round: Round) {
        let new_set = |vote_type| {
            VoteSet::new(
                self.chain_id,
                self.height,
                round,
                vote_type,
                self.validators.clone(),
            )
        };
        let round_vote_set = RoundVoteSet {
            prevotes: new_set(VoteType::Prevote),
            precommits: new_set(VoteType::Precommit),
        };
        self.round_vote_sets.insert(round, round_vote_set);
    }

    /// Add `vote`, received from `peer` (`None` for the node's own votes).
    pub fn add_vote(&mut self, vote: Vote, peer: Option<PeerID>) -> Result<bool, AddVoteError> {
        if vote.height != self.height {
            return Err(AddVoteError::HeightMismatch {
                vote: vote.height,
                current: self.height,
            });
        }

        if !self.round_vote_sets.contains_key(&vote.round) {
            let catchup_rounds = self.peer_catchup_rounds.entry(peer).or_default();
            if catchup_rounds.len() >= MAX_CATCHUP_ROUNDS_PER_PEER {
                return Err(AddVoteError::UnwantedRound {
                    peer,
                    round: vote.round,
                });
            }
            catchup_rounds.push(vote.round);
            self.add_round(vote.round);
        }

        let vote_set = self.vote_set_mut(vote.round, vote.vote_type);
        match vote_set {
            Some(vote_set) => Ok(vote_set.add_vote(vote)?),
            None => Ok(false),
        }
    }

    pub fn prevotes(&self, round: Round) -> Option<&VoteSet> {
        self.round_vote_sets.get(&round).map(|r| &r.prevotes)
    }

    pub fn precommits(&self, round: Round) -> Option<&VoteSet> {
        self.round_vote_sets.get(&round).map(|r| &r.precommits)
    }

    fn vote_set_mut(&mut self, round: Round, vote_type: VoteType) -> Option<&mut VoteSet> {
        self.round_vote_sets.get_mut(&round).map(|r| match vote_type {
            VoteType::Prevote => &mut r.prevotes,
            VoteType::Precommit => &mut r.precommits,
        })
    }

    /// The highest round at or below the current round with a prevote majority, and what it is for.
    pub fn pol_info(&self) -> Option<(Round, Option<BlockID>)> {
        self.round_vote_sets
            .range(..=self.round)
            .rev()
            .find_map(|(round, r)| r.prevotes.two_thirds_majority().map(|block_id| (*round, block_id)))
    }

    /// Record a peer's claim of a majority in an existing round. Claims about rounds the node does not
    /// track are ignored.
    pub fn set_peer_maj23(
        &mut self,
        round: Round,
        vote_type: VoteType,
        peer: PeerID,
        block_id: Option<BlockID>,
    ) -> Result<(), VoteSetError> {
        match self.vote_set_mut(round, vote_type) {
            Some(vote_set) => vote_set.set_peer_maj23(peer, block_id),
            None => Ok(()),
        }
    }
}
