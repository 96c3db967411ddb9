/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Notifications about what the consensus core is doing.
//!
//! An event for an action is emitted after the action has completed. Library users can register
//! handlers for each kind of event when building a [replica](crate::replica::ReplicaSpec). If
//! [`log_events`](crate::replica::Configuration::log_events) is enabled, every event is also printed by
//! the default handlers in [`crate::logging`].

use std::{sync::mpsc::Sender, time::SystemTime};

use crate::{
    consensus::round_state::RoundStep,
    types::{
        block::BlockID,
        data_types::{CryptoHash, Height, PeerID, Round},
        evidence::DuplicateVoteEvidence,
        proposal::Proposal,
        vote::Vote,
    },
};

pub enum Event {
    // Progress through the steps of a round.
    NewRoundStep(NewRoundStepEvent),
    TimeoutPropose(TimeoutProposeEvent),
    TimeoutWait(TimeoutWaitEvent),
    // Sending and receiving messages.
    Propose(ProposeEvent),
    ReceiveProposal(ReceiveProposalEvent),
    CompleteProposal(CompleteProposalEvent),
    Vote(VoteEvent),
    ReceiveVote(ReceiveVoteEvent),
    // Changes to the lock and the valid block.
    Lock(LockEvent),
    Unlock(UnlockEvent),
    ValidBlock(ValidBlockEvent),
    // Changes to persistent state.
    CommitBlock(CommitBlockEvent),
    PruneBlocks(PruneBlocksEvent),
    Evidence(EvidenceEvent),
}

impl Event {
    pub(crate) fn publish(event_publisher: &Option<Sender<Event>>, event: Event) {
        if let Some(event_publisher) = event_publisher {
            // The event bus only goes away during shutdown.
            let _ = event_publisher.send(event);
        }
    }
}

/// The node entered `step` of `round` at `height`.
pub struct NewRoundStepEvent {
    pub timestamp: SystemTime,
    pub height: Height,
    pub round: Round,
    pub step: RoundStep,
}

pub struct TimeoutProposeEvent {
    pub timestamp: SystemTime,
    pub height: Height,
    pub round: Round,
}

/// The node waited for more prevotes or precommits and timed out.
pub struct TimeoutWaitEvent {
    pub timestamp: SystemTime,
    pub height: Height,
    pub round: Round,
    pub step: RoundStep,
}

pub struct ProposeEvent {
    pub timestamp: SystemTime,
    pub proposal: Proposal,
}

pub struct ReceiveProposalEvent {
    pub timestamp: SystemTime,
    pub origin: Option<PeerID>,
    pub proposal: Proposal,
}

/// All parts of the proposed block of a round have been received.
pub struct CompleteProposalEvent {
    pub timestamp: SystemTime,
    pub height: Height,
    pub round: Round,
    pub block_id: BlockID,
}

pub struct VoteEvent {
    pub timestamp: SystemTime,
    pub vote: Vote,
}

pub struct ReceiveVoteEvent {
    pub timestamp: SystemTime,
    pub origin: Option<PeerID>,
    pub vote: Vote,
}

pub struct LockEvent {
    pub timestamp: SystemTime,
    pub height: Height,
    pub round: Round,
    pub block: CryptoHash,
}

pub struct UnlockEvent {
    pub timestamp: SystemTime,
    pub height: Height,
    pub round: Round,
}

pub struct ValidBlockEvent {
    pub timestamp: SystemTime,
    pub height: Height,
    pub round: Round,
    pub block: CryptoHash,
}

pub struct CommitBlockEvent {
    pub timestamp: SystemTime,
    pub height: Height,
    pub block: CryptoHash,
    pub num_txs: usize,
}

pub struct PruneBlocksEvent {
    pub timestamp: SystemTime,
    pub retain_height: Height,
    pub pruned: u64,
}

/// The node saw a validator sign two conflicting votes.
pub struct EvidenceEvent {
    pub timestamp: SystemTime,
    pub evidence: DuplicateVoteEvidence,
}
