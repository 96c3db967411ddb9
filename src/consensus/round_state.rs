/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The consensus core's view of the height it is currently deciding on.

use std::fmt::{self, Display, Formatter};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    block::Block,
    data_types::{ChainID, CryptoHash, Height, Round, Timestamp, VerifyingKeyBytes},
    part_set::PartSet,
    proposal::Proposal,
    validator_set::ValidatorSet,
};

use super::{height_vote_set::HeightVoteSet, vote_set::VoteSet};

/// Steps of a round, in the order they are entered.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize,
)]
pub enum RoundStep {
    NewHeight,
    NewRound,
    Propose,
    Prevote,
    PrevoteWait,
    Precommit,
    PrecommitWait,
    Commit,
}

/// The position of the node in the protocol. Written to the write-ahead log on every step change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct RoundStateEvent {
    pub height: Height,
    pub round: Round,
    pub step: RoundStep,
}

impl Display for RoundStateEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{:?}", self.height, self.round, self.step)
    }
}

/// Everything the node knows about the height it is deciding on.
///
/// Only the receive loop mutates a `RoundState`. Other threads see it through
/// [`RoundStateSnapshot`]s.
pub struct RoundState {
    pub height: Height,
    pub round: Round,
    pub step: RoundStep,
    /// When round 0 of this height should start.
    pub start_time: Timestamp,
    /// When the previous height's commit was reached.
    pub commit_time: Timestamp,
    pub validators: ValidatorSet,

    pub proposal: Option<Proposal>,
    pub proposal_block: Option<Block>,
    pub proposal_block_parts: Option<PartSet>,

    pub locked_round: Option<Round>,
    pub locked_block: Option<Block>,
    pub locked_block_parts: Option<PartSet>,

    /// The last round in which some block (not nil) got a prevote majority, and that block.
    pub valid_round: Option<Round>,
    pub valid_block: Option<Block>,
    pub valid_block_parts: Option<PartSet>,

    pub votes: HeightVoteSet,
    pub commit_round: Option<Round>,
    /// Precommits that committed the previous block.
    pub last_commit: Option<VoteSet>,
    pub last_validators: ValidatorSet,
    pub triggered_timeout_precommit: bool,
}

impl RoundState {
    pub fn new(chain_id: ChainID) -> RoundState {
        RoundState {
            height: Height::new(0),
            round: Round::zero(),
            step: RoundStep::NewHeight,
            start_time: Timestamp::default(),
            commit_time: Timestamp::default(),
            validators: ValidatorSet::default(),
            proposal: None,
            proposal_block: None,
            proposal_block_parts: None,
            locked_round: None,
            locked_block: None,
            locked_block_parts: None,
            valid_round: None,
            valid_block: None,
            valid_block_parts: None,
            votes: HeightVoteSet::new(chain_id, Height::new(0), ValidatorSet::default()),
            commit_round: None,
            last_commit: None,
            last_validators: ValidatorSet::default(),
            triggered_timeout_precommit: false,
        }
    }

    pub fn event(&self) -> RoundStateEvent {
        RoundStateEvent {
            height: self.height,
            round: self.round,
            step: self.step,
        }
    }

    pub fn snapshot(&self) -> RoundStateSnapshot {
        let proposer = if self.validators.is_empty() {
            None
        } else {
            Some(self.validators.proposer().address)
        };
        RoundStateSnapshot {
            height: self.height,
            round: self.round,
            step: self.step,
            start_time: self.start_time,
            proposer,
            proposal_block_hash: self.proposal_block.as_ref().map(|block| block.hash()),
            locked_round: self.locked_round,
            locked_block_hash: self.locked_block.as_ref().map(|block| block.hash()),
            valid_round: self.valid_round,
            valid_block_hash: self.valid_block.as_ref().map(|block| block.hash()),
            commit_round: self.commit_round,
        }
    }
}

/// A read-only summary of a [`RoundState`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoundStateSnapshot {
    pub height: Height,
    pub round: Round,
    pub step: RoundStep,
    pub start_time: Timestamp,
    pub proposer: Option<VerifyingKeyBytes>,
    pub proposal_block_hash: Option<CryptoHash>,
    pub locked_round: Option<Round>,
    pub locked_block_hash: Option<CryptoHash>,
    pub valid_round: Option<Round>,
    pub valid_block_hash: Option<CryptoHash>,
    pub commit_round: Option<Round>,
}
