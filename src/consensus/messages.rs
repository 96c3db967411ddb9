/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Messages that drive the consensus core, and the records that the write-ahead log stores them in.

use std::time::Duration;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    block::BlockID,
    data_types::{Height, PeerID, Round, Timestamp, VerifyingKeyBytes},
    part_set::Part,
    proposal::Proposal,
    vote::{Vote, VoteType},
};

use super::round_state::{RoundStateEvent, RoundStep};

/// Every message the consensus core exchanges with its peers.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum ConsensusMessage {
    Proposal(Proposal),
    BlockPart {
        height: Height,
        round: Round,
        part: Part,
    },
    Vote(Vote),
    /// A peer's claim that `block_id` (or nil) has more than two thirds of the votes of `vote_type`
    /// in `height`/`round`.
    VoteSetMaj23 {
        height: Height,
        round: Round,
        vote_type: VoteType,
        block_id: Option<BlockID>,
    },
    /// Experimental: asks validators to start round 0 of `height` with `new_proposer` as proposer.
    ViewChange {
        height: Height,
        new_proposer: VerifyingKeyBytes,
    },
}

impl ConsensusMessage {
    pub fn height(&self) -> Height {
        match self {
            ConsensusMessage::Proposal(proposal) => proposal.height,
            ConsensusMessage::BlockPart { height, .. } => *height,
            ConsensusMessage::Vote(vote) => vote.height,
            ConsensusMessage::VoteSetMaj23 { height, .. } => *height,
            ConsensusMessage::ViewChange { height, .. } => *height,
        }
    }
}

/// A message together with the peer it came from. `peer_id` is `None` for messages generated by the
/// node itself.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct MsgInfo {
    pub msg: ConsensusMessage,
    pub peer_id: Option<PeerID>,
}

impl MsgInfo {
    pub fn internal(msg: ConsensusMessage) -> MsgInfo {
        MsgInfo { msg, peer_id: None }
    }

    pub fn from_peer(msg: ConsensusMessage, peer_id: PeerID) -> MsgInfo {
        MsgInfo {
            msg,
            peer_id: Some(peer_id),
        }
    }
}

/// A timeout scheduled for, or fired at, `(height, round, step)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TimeoutInfo {
    pub duration_millis: u64,
    pub height: Height,
    pub round: Round,
    pub step: RoundStep,
}

impl TimeoutInfo {
    pub fn new(duration: Duration, height: Height, round: Round, step: RoundStep) -> TimeoutInfo {
        TimeoutInfo {
            duration_millis: duration.as_millis() as u64,
            height,
            round,
            step,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_millis)
    }

    pub(crate) fn hrs(&self) -> (Height, Round, RoundStep) {
        (self.height, self.round, self.step)
    }
}

/// The kinds of records in the write-ahead log.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum WalMessage {
    /// The node moved to a new step.
    RoundState(RoundStateEvent),
    MsgInfo(MsgInfo),
    TimeoutInfo(TimeoutInfo),
    /// Every message for this height has been processed and its block committed.
    EndHeight(Height),
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TimedWalMessage {
    pub time: Timestamp,
    pub msg: WalMessage,
}

impl TimedWalMessage {
    pub fn now(msg: WalMessage) -> TimedWalMessage {
        TimedWalMessage {
            time: Timestamp::now(),
            msg,
        }
    }
}

impl From<Proposal> for ConsensusMessage {
    fn from(value: Proposal) -> Self {
        ConsensusMessage::Proposal(value)
    }
}

impl From<Vote> for ConsensusMessage {
    fn from(value: Vote) -> Self {
        ConsensusMessage::Vote(value)
    }
}
