/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Starting rounds, proposing, and receiving proposals and their blocks.

use std::time::SystemTime;

use crate::{
    events::{CompleteProposalEvent, Event, ProposeEvent, ReceiveProposalEvent, ValidBlockEvent},
    networking::network::Network,
    pluggables::{BlockExecutor, BlockStore, EvidencePool},
    types::{
        block::{Block, BlockID},
        data_types::{Height, PeerID, Round, Timestamp},
        part_set::{Part, PartSet, PartSetError},
        proposal::Proposal,
        signed_messages::SignedMessage,
    },
};

use super::{
    messages::ConsensusMessage,
    round_state::RoundStep,
    state::{ConsensusError, ConsensusState},
};

#[derive(Debug)]
pub enum ProposalError {
    /// The proof-of-lock round must come before the proposal's round.
    InvalidPolRound { pol_round: Round, round: Round },
    InvalidSignature,
    /// The proposal announces a part set no block could have.
    InvalidPartSetHeader(PartSetError),
    InvalidPart(PartSetError),
    /// All parts arrived but they do not decode into a block.
    UndecodableBlock(String),
}

impl<E: BlockExecutor, B: BlockStore, P: EvidencePool, N: Network> ConsensusState<E, B, P, N> {
    /// Enter NewRound for `round`, then propose right away unless round 0 waits for transactions.
    pub(super) fn enter_new_round(&mut self, height: Height, round: Round) -> Result<(), ConsensusError> {
        if !self.advance_to_new_round(height, round) {
            return Ok(());
        }

        let wait_for_txs = self.config.wait_for_txs() && round == Round::zero() && !self.need_proof_block(height)?;
        if wait_for_txs {
            if self.config.create_empty_blocks_interval > std::time::Duration::ZERO {
                self.schedule_timeout(self.config.create_empty_blocks_interval, height, round, RoundStep::NewRound);
            }
            Ok(())
        } else {
            self.enter_propose(height, round)
        }
    }

    /// Set up NewRound of `round`. Returns false if the node is already past it.
    pub(super) fn advance_to_new_round(&mut self, height: Height, round: Round) -> bool {
        if self.rs.height != height
            || round < self.rs.round
            || (self.rs.round == round && self.rs.step != RoundStep::NewHeight)
        {
            log::debug!("enter_new_round({}/{}): invalid args, at {}", height, round, self.rs.event());
            return false;
        }
        if Timestamp::now() < self.rs.start_time {
            log::debug!("enter_new_round({}/{}): started before the commit timeout ended", height, round);
        }
        log::info!("enter_new_round({}/{}), at {}", height, round, self.rs.event());

        let mut validators = self.rs.validators.clone();
        if self.rs.round < round {
            validators.increment_proposer_priority(round - self.rs.round);
        }
        if round == Round::zero() {
            if let Some((vc_height, proposer)) = self.view_change {
                if vc_height == height && !validators.set_proposer(&proposer) {
                    log::warn!("View change names a proposer outside the validator set");
                }
            }
        }

        self.rs.round = round;
        self.rs.step = RoundStep::NewRound;
        self.rs.validators = validators;
        if round != Round::zero() {
            // A proposal for round 0 may have arrived while the node was at NewHeight.
            self.rs.proposal = None;
            self.rs.proposal_block = None;
            self.rs.proposal_block_parts = None;
        }
        // Also track the next round, so that the node can skip ahead.
        self.rs.votes.set_round(round.next());
        self.rs.triggered_timeout_precommit = false;
        self.new_step();
        true
    }

    /// Enter Propose, and propose if it is the node's turn. Moves on to Prevote if the proposal is
    /// already complete.
    pub(super) fn enter_propose(&mut self, height: Height, round: Round) -> Result<(), ConsensusError> {
        if self.rs.height != height
            || round < self.rs.round
            || (self.rs.round == round && RoundStep::Propose <= self.rs.step)
        {
            log::debug!("enter_propose({}/{}): invalid args, at {}", height, round, self.rs.event());
            return Ok(());
        }
        log::info!("enter_propose({}/{}), at {}", height, round, self.rs.event());

        self.rs.round = round;
        self.rs.step = RoundStep::Propose;
        // Whether or not the proposal arrives, move on eventually.
        self.schedule_timeout(self.config.propose(round), height, round, RoundStep::Propose);

        if self.is_our_turn_to_propose() {
            log::info!("enter_propose({}/{}): our turn to propose", height, round);
            self.decide_proposal(height, round)?;
        } else {
            log::debug!("enter_propose({}/{}): not our turn to propose", height, round);
        }

        self.new_step();
        if self.is_proposal_complete() {
            self.enter_prevote(height, self.rs.round)?;
        }
        Ok(())
    }

    fn is_our_turn_to_propose(&self) -> bool {
        match (&self.priv_validator, &self.priv_validator_pub_key) {
            (Some(_), Some(pub_key)) => self.rs.validators.is_proposer(&pub_key.to_bytes()),
            _ => false,
        }
    }

    fn decide_proposal(&mut self, height: Height, round: Round) -> Result<(), ConsensusError> {
        let (block, parts) = match (&self.rs.valid_block, &self.rs.valid_block_parts) {
            (Some(block), Some(parts)) => (block.clone(), parts.clone()),
            _ => {
                let prebuilt = self.prebuilder.as_mut().and_then(|prebuilder| prebuilder.take(height));
                match prebuilt {
                    Some(block_and_parts) => block_and_parts,
                    None => match self.create_proposal_block(height)? {
                        Some(block_and_parts) => block_and_parts,
                        None => return Ok(()),
                    },
                }
            }
        };

        // The proposal must not reach the WAL before the records that led to it.
        if let Err(e) = self.wal.flush_and_sync() {
            log::error!("Error flushing to disk: {}", e);
        }

        let block_id = BlockID {
            hash: block.hash(),
            parts_header: parts.header(),
        };
        let mut proposal = Proposal::new(height, round, self.rs.valid_round, block_id);
        let chain_id = self.chain_state.chain_id;
        let Some(priv_validator) = self.priv_validator.as_mut() else {
            return Ok(());
        };
        match priv_validator.sign_proposal(chain_id, &mut proposal) {
            Ok(()) => {
                self.send_internal_message(ConsensusMessage::Proposal(proposal.clone()));
                self.sender.broadcast(proposal.clone());
                for index in 0..parts.total() {
                    if let Some(part) = parts.get_part(index) {
                        let msg = ConsensusMessage::BlockPart {
                            height,
                            round,
                            part: part.clone(),
                        };
                        self.send_internal_message(msg.clone());
                        self.sender.broadcast(msg);
                    }
                }
                log::info!("Signed proposal {}", proposal);
                self.publish(Event::Propose(ProposeEvent {
                    timestamp: SystemTime::now(),
                    proposal,
                }));
            }
            Err(e) => {
                if !self.replay_mode {
                    log::error!("enter_propose: error signing proposal {}/{}: {:?}", height, round, e);
                }
            }
        }
        Ok(())
    }

    /// Ask the executor for a new block. `None` if the node cannot propose at this point.
    fn create_proposal_block(&self, height: Height) -> Result<Option<(Block, PartSet)>, ConsensusError> {
        let Some(last_commit) = self.last_commit_for_proposal(height) else {
            return Ok(None);
        };
        let Some(pub_key) = self.priv_validator_pub_key else {
            log::error!("enter_propose: private validator public key is not set");
            return Ok(None);
        };
        let created = self
            .executor()?
            .create_proposal_block(height, &self.chain_state, last_commit, pub_key.to_bytes());
        match created {
            Ok(block_and_parts) => Ok(Some(block_and_parts)),
            Err(e) => {
                log::error!("Failed to create proposal block for height {}: {:?}", height, e);
                Ok(None)
            }
        }
    }

    /// Accept `proposal` if it is the first valid proposal for the current round. Returns whether it
    /// was accepted.
    pub(super) fn set_proposal(&mut self, proposal: Proposal, peer_id: Option<PeerID>) -> Result<bool, ProposalError> {
        if self.rs.proposal.is_some() || proposal.height != self.rs.height || proposal.round != self.rs.round {
            return Ok(false);
        }
        if let Some(pol_round) = proposal.pol_round {
            if pol_round >= proposal.round {
                return Err(ProposalError::InvalidPolRound {
                    pol_round,
                    round: proposal.round,
                });
            }
        }
        proposal
            .block_id
            .parts_header
            .validate_basic()
            .map_err(ProposalError::InvalidPartSetHeader)?;
        if self.rs.validators.is_empty()
            || !proposal.is_correct(self.chain_state.chain_id, &self.rs.validators.proposer().address)
        {
            return Err(ProposalError::InvalidSignature);
        }

        // The parts may already be expected, if a prevote majority named the block first.
        if self.rs.proposal_block_parts.is_none() {
            let parts =
                PartSet::new_from_header(proposal.block_id.parts_header).map_err(ProposalError::InvalidPartSetHeader)?;
            self.rs.proposal_block_parts = Some(parts);
        }
        log::info!("Received proposal {}", proposal);
        self.block_transport.on_proposal(proposal.height);
        self.publish(Event::ReceiveProposal(ReceiveProposalEvent {
            timestamp: SystemTime::now(),
            origin: peer_id,
            proposal: proposal.clone(),
        }));
        self.rs.proposal = Some(proposal);
        Ok(true)
    }

    /// Add `part` to the block being assembled. Returns whether the part was new. Assembles the block
    /// once the last part arrives.
    pub(super) fn add_proposal_block_part(
        &mut self,
        height: Height,
        round: Round,
        part: Part,
        peer_id: Option<PeerID>,
    ) -> Result<bool, ProposalError> {
        if self.rs.height != height {
            self.block_transport.dropped_wrong_height += 1;
            log::debug!("Received block part from wrong height {} (round {}), peer {:?}", height, round, peer_id);
            return Ok(false);
        }
        self.block_transport.on_part_received();

        // Parts are only expected once a proposal or a prevote majority named the block.
        let Some(parts) = self.rs.proposal_block_parts.as_mut() else {
            self.block_transport.dropped_not_expected += 1;
            log::info!("Received a block part when we're not expecting any, height {} round {}", height, round);
            return Ok(false);
        };

        let added = match parts.add_part(part) {
            Ok(added) => added,
            Err(e) => {
                self.block_transport.dropped_error += 1;
                return Err(ProposalError::InvalidPart(e));
            }
        };
        if !added {
            self.block_transport.dropped_not_added += 1;
            return Ok(false);
        }
        if parts.count() == 1 {
            self.block_transport.on_first_part(height);
        }

        if parts.is_complete() {
            let block = Block::from_part_set(parts).map_err(|e| ProposalError::UndecodableBlock(e.to_string()))?;
            let block_id = BlockID {
                hash: block.hash(),
                parts_header: parts.header(),
            };
            log::info!("Received complete proposal block at height {}, hash {}", block.height(), block_id.hash);
            self.rs.proposal_block = Some(block);
            self.publish(Event::CompleteProposal(CompleteProposalEvent {
                timestamp: SystemTime::now(),
                height,
                round: self.rs.round,
                block_id,
            }));
        }
        Ok(true)
    }

    /// React to the proposal block of the current round having been assembled.
    pub(super) fn handle_complete_proposal(&mut self, height: Height) -> Result<(), ConsensusError> {
        let round = self.rs.round;
        let prevote_majority = self.rs.votes.prevotes(round).and_then(|prevotes| prevotes.two_thirds_majority());

        if let Some(Some(block_id)) = prevote_majority {
            let hashes_to = self
                .rs
                .proposal_block
                .as_ref()
                .is_some_and(|block| block.hashes_to(&block_id.hash));
            if self.rs.valid_round < Some(round) && hashes_to {
                log::info!("Updating valid block to new proposal block at {}/{}", height, round);
                self.rs.valid_round = Some(round);
                self.rs.valid_block = self.rs.proposal_block.clone();
                self.rs.valid_block_parts = self.rs.proposal_block_parts.clone();
                self.publish(Event::ValidBlock(ValidBlockEvent {
                    timestamp: SystemTime::now(),
                    height,
                    round,
                    block: block_id.hash,
                }));
            }
        }

        if self.rs.step <= RoundStep::Propose && self.is_proposal_complete() {
            self.enter_prevote(height, self.rs.round)?;
            if prevote_majority.is_some() {
                self.enter_precommit(height, self.rs.round)?;
            }
        } else if self.rs.step == RoundStep::Commit {
            // The block the node committed to just arrived.
            self.try_finalize_commit(height)?;
        }
        Ok(())
    }

    /// Whether the node has the proposal, its block, and the proof of lock it claims (if any).
    pub(super) fn is_proposal_complete(&self) -> bool {
        let (Some(proposal), Some(_)) = (&self.rs.proposal, &self.rs.proposal_block) else {
            return false;
        };
        match proposal.pol_round {
            None => true,
            Some(pol_round) => self
                .rs
                .votes
                .prevotes(pol_round)
                .is_some_and(|prevotes| prevotes.has_two_thirds_majority()),
        }
    }
}
