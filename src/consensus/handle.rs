/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Thread-safe access to a running consensus core.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, PoisonError, RwLock,
};

use crate::types::{
    block::BlockID,
    chain_state::ChainState,
    data_types::{Height, PeerID, Round},
    part_set::{Part, PartSet},
    proposal::Proposal,
    vote::{Vote, VoteType},
};

use super::{
    mailbox::Mailbox,
    messages::{ConsensusMessage, MsgInfo},
    round_state::RoundStateSnapshot,
};

/// What the consensus thread publishes about itself for other threads to read.
pub(crate) struct SharedStatus {
    round_state: RwLock<RoundStateSnapshot>,
    chain_state: RwLock<ChainState>,
    halted: AtomicBool,
}

impl SharedStatus {
    pub(crate) fn new(round_state: RoundStateSnapshot, chain_state: ChainState) -> SharedStatus {
        SharedStatus {
            round_state: RwLock::new(round_state),
            chain_state: RwLock::new(chain_state),
            halted: AtomicBool::new(false),
        }
    }

    pub(crate) fn set_round_state(&self, snapshot: RoundStateSnapshot) {
        *self.round_state.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
    }

    pub(crate) fn set_chain_state(&self, chain_state: ChainState) {
        *self.chain_state.write().unwrap_or_else(PoisonError::into_inner) = chain_state;
    }

    pub(crate) fn set_halted(&self) {
        self.halted.store(true, Ordering::SeqCst)
    }

    fn round_state(&self) -> RoundStateSnapshot {
        self.round_state.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn chain_state(&self) -> ChainState {
        self.chain_state.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }
}

/// A clonable handle for feeding messages into a running consensus core and observing its progress.
///
/// Every method that takes a message only queues it: the message is handled later by the consensus
/// thread, and any problem with it is reported in the logs.
#[derive(Clone)]
pub struct ConsensusHandle {
    mailbox: Arc<Mailbox>,
    status: Arc<SharedStatus>,
}

impl ConsensusHandle {
    pub(crate) fn new(mailbox: Arc<Mailbox>, status: Arc<SharedStatus>) -> ConsensusHandle {
        ConsensusHandle { mailbox, status }
    }

    /// Queue `proposal`. A `peer` of `None` marks the proposal as the node's own.
    pub fn set_proposal(&self, proposal: Proposal, peer: Option<PeerID>) {
        self.send(ConsensusMessage::Proposal(proposal), peer)
    }

    pub fn add_proposal_block_part(&self, height: Height, round: Round, part: Part, peer: Option<PeerID>) {
        self.send(ConsensusMessage::BlockPart { height, round, part }, peer)
    }

    /// Queue `proposal` followed by every part in `parts`.
    pub fn set_proposal_and_block(&self, proposal: Proposal, parts: &PartSet, peer: Option<PeerID>) {
        let (height, round) = (proposal.height, proposal.round);
        self.set_proposal(proposal, peer);
        for index in 0..parts.total() {
            if let Some(part) = parts.get_part(index) {
                self.add_proposal_block_part(height, round, part.clone(), peer);
            }
        }
    }

    pub fn add_vote(&self, vote: Vote, peer: Option<PeerID>) {
        self.send(ConsensusMessage::Vote(vote), peer)
    }

    /// Pass on `peer`'s claim that `block_id` (or nil) has more than two thirds of the votes of
    /// `vote_type` in `height`/`round`. Votes for a claimed block are tallied even if they conflict
    /// with an earlier vote of the same validator.
    pub fn set_peer_maj23(
        &self,
        height: Height,
        round: Round,
        vote_type: VoteType,
        block_id: Option<BlockID>,
        peer: PeerID,
    ) {
        let msg = ConsensusMessage::VoteSetMaj23 {
            height,
            round,
            vote_type,
            block_id,
        };
        self.send(msg, Some(peer))
    }

    /// The height, round and step the node is at, and what it knows about the current height.
    pub fn round_state(&self) -> RoundStateSnapshot {
        self.status.round_state()
    }

    /// Height of the latest block the node committed.
    pub fn last_height(&self) -> Height {
        self.status.chain_state().last_block_height
    }

    pub fn chain_state(&self) -> ChainState {
        self.status.chain_state()
    }

    /// Whether the consensus thread stopped because of a fatal error.
    pub fn is_halted(&self) -> bool {
        self.status.is_halted()
    }

    /// Tell the consensus thread to stop once it is done with the input at hand.
    pub(crate) fn quit(&self) {
        self.mailbox.quit()
    }

    fn send(&self, msg: ConsensusMessage, peer: Option<PeerID>) {
        match peer {
            Some(peer) => self.mailbox.push_peer(MsgInfo::from_peer(msg, peer)),
            None => self.mailbox.push_internal(MsgInfo::internal(msg)),
        }
    }
}
