/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Prevoting, precommitting, and counting the votes of the other validators.

use std::time::{Duration, SystemTime};

use crate::{
    events::{Event, EvidenceEvent, LockEvent, ReceiveVoteEvent, UnlockEvent, ValidBlockEvent, VoteEvent},
    networking::network::Network,
    pluggables::{BlockExecutor, BlockStore, EvidencePool},
    types::{
        block::BlockID,
        data_types::{Height, PeerID, Round, SignatureBytes, Timestamp},
        evidence::DuplicateVoteEvidence,
        part_set::PartSet,
        vote::{Vote, VoteType},
    },
};

use super::{
    height_vote_set::AddVoteError,
    messages::ConsensusMessage,
    round_state::RoundStep,
    state::{fatal, ConsensusError, ConsensusState},
    vote_set::VoteSetError,
};

impl<E: BlockExecutor, B: BlockStore, P: EvidencePool, N: Network> ConsensusState<E, B, P, N> {
    /// Add `vote`, logging why if it cannot be added. Returns whether it was added.
    pub(super) fn try_add_vote(&mut self, vote: Vote, peer_id: Option<PeerID>) -> Result<bool, ConsensusError> {
        match self.add_vote(vote, peer_id) {
            Ok(added) => Ok(added),
            Err(ConsensusError::AddVote(AddVoteError::HeightMismatch { vote, current })) => {
                // Votes for other heights are expected around height changes.
                log::debug!("Vote ignored: height {} is not current height {}", vote, current);
                Ok(false)
            }
            Err(ConsensusError::AddVote(AddVoteError::VoteSet(VoteSetError::ConflictingVotes { .. }))) => Ok(false),
            Err(ConsensusError::AddVote(AddVoteError::VoteSet(VoteSetError::NonDeterministicSignature { index }))) => {
                log::debug!("Vote has non-deterministic signature, validator index {}", index);
                Ok(false)
            }
            Err(ConsensusError::AddVote(e)) => {
                log::info!("Failed attempting to add vote from {:?}: {:?}", peer_id, e);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    pub(super) fn add_vote(&mut self, vote: Vote, peer_id: Option<PeerID>) -> Result<bool, ConsensusError> {
        log::debug!("Adding vote {} from {:?}", vote, peer_id);

        // A precommit for the previous height can still make it into LastCommit while the node waits
        // out the commit timeout.
        if vote.height + 1 == self.rs.height {
            return self.add_last_commit_vote(vote, peer_id);
        }
        if vote.height != self.rs.height {
            return Err(AddVoteError::HeightMismatch {
                vote: vote.height,
                current: self.rs.height,
            }
            .into());
        }

        let height = self.rs.height;
        let added = match self.rs.votes.add_vote(vote.clone(), peer_id) {
            Ok(added) => added,
            Err(AddVoteError::VoteSet(VoteSetError::ConflictingVotes {
                existing,
                conflicting,
                added,
            })) => {
                self.report_conflicting_votes(*existing.clone(), *conflicting.clone());
                if !added {
                    return Err(AddVoteError::VoteSet(VoteSetError::ConflictingVotes {
                        existing,
                        conflicting,
                        added,
                    })
                    .into());
                }
                true
            }
            Err(e) => return Err(e.into()),
        };
        if !added {
            return Ok(false);
        }
        self.publish_vote_received(peer_id, &vote);

        match vote.vote_type {
            VoteType::Prevote => self.on_prevote_added(height, vote.round)?,
            VoteType::Precommit => self.on_precommit_added(height, vote.round)?,
        }
        Ok(true)
    }

    fn add_last_commit_vote(&mut self, vote: Vote, peer_id: Option<PeerID>) -> Result<bool, ConsensusError> {
        let mismatch = AddVoteError::HeightMismatch {
            vote: vote.height,
            current: self.rs.height,
        };
        if self.rs.step != RoundStep::NewHeight || vote.vote_type != VoteType::Precommit {
            return Err(mismatch.into());
        }
        let Some(last_commit) = self.rs.last_commit.as_mut() else {
            return Err(mismatch.into());
        };
        let added = last_commit
            .add_vote(vote.clone())
            .map_err(|e| ConsensusError::AddVote(e.into()))?;
        if !added {
            return Ok(false);
        }
        log::info!("Added to last precommits: {}", last_commit);
        let has_all = last_commit.has_all();
        self.publish_vote_received(peer_id, &vote);

        if self.config.skip_timeout_commit && has_all {
            // Every precommit is in, no need to wait out the commit timeout.
            self.enter_new_round(self.rs.height, Round::zero())?;
        }
        Ok(true)
    }

    fn report_conflicting_votes(&mut self, existing: Vote, conflicting: Vote) {
        let ours = self
            .priv_validator_pub_key
            .is_some_and(|pub_key| pub_key.to_bytes() == conflicting.validator_address);
        if ours {
            log::error!(
                "Found conflicting vote from ourselves. Did you unsafe_reset a validator? height {} round {} type {:?}",
                conflicting.height,
                conflicting.round,
                conflicting.vote_type
            );
            return;
        }
        let evidence = DuplicateVoteEvidence::new(existing, conflicting);
        match self.evidence_pool.add_evidence(evidence.clone()) {
            Ok(()) => self.publish(Event::Evidence(EvidenceEvent {
                timestamp: SystemTime::now(),
                evidence,
            })),
            Err(e) => log::error!("Failed to add duplicate vote evidence: {:?}", e),
        }
    }

    fn publish_vote_received(&self, peer_id: Option<PeerID>, vote: &Vote) {
        self.publish(Event::ReceiveVote(ReceiveVoteEvent {
            timestamp: SystemTime::now(),
            origin: peer_id,
            vote: vote.clone(),
        }))
    }

    fn on_prevote_added(&mut self, height: Height, vote_round: Round) -> Result<(), ConsensusError> {
        let Some(prevotes) = self.rs.votes.prevotes(vote_round) else {
            return Ok(());
        };
        log::info!("Added to prevotes: {}", prevotes);
        let majority = prevotes.two_thirds_majority();
        let has_two_thirds_any = prevotes.has_two_thirds_any();

        if let Some(block_id) = majority {
            // A majority for something else in a later round than the lock releases the lock.
            let locked_on_other = self
                .rs
                .locked_block
                .as_ref()
                .is_some_and(|locked| !block_id.is_some_and(|id| locked.hashes_to(&id.hash)));
            if locked_on_other && self.rs.locked_round < Some(vote_round) && vote_round <= self.rs.round {
                log::info!("Unlocking because of POL at {}/{}, locked round {:?}", height, vote_round, self.rs.locked_round);
                self.unlock(height);
            }

            if let Some(block_id) = block_id {
                if self.rs.valid_round < Some(vote_round) && vote_round == self.rs.round {
                    self.update_valid_block(height, vote_round, block_id);
                }
            }
        }

        if self.rs.round < vote_round && has_two_thirds_any {
            // Round skip: others have moved on.
            self.enter_new_round(height, vote_round)?;
        } else if self.rs.round == vote_round && RoundStep::Prevote <= self.rs.step {
            match majority {
                Some(block_id) if self.is_proposal_complete() || block_id.is_none() => {
                    self.enter_precommit(height, vote_round)?;
                }
                _ if has_two_thirds_any => self.enter_prevote_wait(height, vote_round)?,
                _ => (),
            }
        } else if self.rs.proposal.as_ref().is_some_and(|proposal| proposal.pol_round == Some(vote_round))
            && self.is_proposal_complete()
        {
            // The proof of lock the proposal claims is now complete.
            self.enter_prevote(height, self.rs.round)?;
        }
        Ok(())
    }

    // A prevote majority for `block_id` in the current round makes it the valid block, if the node has
    // it. Otherwise the node starts collecting its parts.
    fn update_valid_block(&mut self, height: Height, round: Round, block_id: BlockID) {
        let have_block = self
            .rs
            .proposal_block
            .as_ref()
            .is_some_and(|block| block.hashes_to(&block_id.hash));
        if have_block {
            log::info!("Updating valid block because of POL at {}/{}", height, round);
            self.rs.valid_round = Some(round);
            self.rs.valid_block = self.rs.proposal_block.clone();
            self.rs.valid_block_parts = self.rs.proposal_block_parts.clone();
        } else {
            log::info!("Valid block we don't know about, dropping the proposal block at {}/{}", height, round);
            self.rs.proposal_block = None;
        }
        let expecting = self
            .rs
            .proposal_block_parts
            .as_ref()
            .is_some_and(|parts| parts.has_header(&block_id.parts_header));
        if !expecting {
            self.rs.proposal_block_parts = PartSet::new_from_header(block_id.parts_header).ok();
        }
        self.publish(Event::ValidBlock(ValidBlockEvent {
            timestamp: SystemTime::now(),
            height,
            round,
            block: block_id.hash,
        }));
    }

    fn on_precommit_added(&mut self, height: Height, vote_round: Round) -> Result<(), ConsensusError> {
        let Some(precommits) = self.rs.votes.precommits(vote_round) else {
            return Ok(());
        };
        log::info!("Added to precommits: {}", precommits);
        let majority = precommits.two_thirds_majority();
        let has_two_thirds_any = precommits.has_two_thirds_any();
        let has_all = precommits.has_all();

        match majority {
            Some(block_id) => {
                // Catch up to the round of the majority, if needed.
                self.enter_new_round(height, vote_round)?;
                self.enter_precommit(height, vote_round)?;
                if block_id.is_some() {
                    self.enter_commit(height, vote_round)?;
                    if self.config.skip_timeout_commit && has_all {
                        self.enter_new_round(self.rs.height, Round::zero())?;
                    }
                } else {
                    self.enter_precommit_wait(height, vote_round)?;
                }
            }
            None if self.rs.round <= vote_round && has_two_thirds_any => {
                self.enter_new_round(height, vote_round)?;
                self.enter_precommit_wait(height, vote_round)?;
            }
            None => (),
        }
        Ok(())
    }

    /// Enter Prevote, voting for the locked block, else the proposal block if it is valid, else nil.
    pub(super) fn enter_prevote(&mut self, height: Height, round: Round) -> Result<(), ConsensusError> {
        if self.rs.height != height
            || round < self.rs.round
            || (self.rs.round == round && RoundStep::Prevote <= self.rs.step)
        {
            log::debug!("enter_prevote({}/{}): invalid args, at {}", height, round, self.rs.event());
            return Ok(());
        }
        log::info!("enter_prevote({}/{}), at {}", height, round, self.rs.event());

        self.do_prevote(height, round)?;

        self.rs.round = round;
        self.rs.step = RoundStep::Prevote;
        self.new_step();
        Ok(())
    }

    fn do_prevote(&mut self, height: Height, round: Round) -> Result<(), ConsensusError> {
        if let (Some(block), Some(parts)) = (&self.rs.locked_block, &self.rs.locked_block_parts) {
            log::info!("enter_prevote({}/{}): block was locked", height, round);
            let block_id = BlockID {
                hash: block.hash(),
                parts_header: parts.header(),
            };
            self.sign_add_vote(VoteType::Prevote, Some(block_id));
            return Ok(());
        }

        let (Some(block), Some(parts)) = (&self.rs.proposal_block, &self.rs.proposal_block_parts) else {
            log::info!("enter_prevote({}/{}): proposal block is nil", height, round);
            self.sign_add_vote(VoteType::Prevote, None);
            return Ok(());
        };
        let block_id = BlockID {
            hash: block.hash(),
            parts_header: parts.header(),
        };
        let validation = self.executor()?.validate_block(&self.chain_state, block);
        match validation {
            Ok(()) => self.sign_add_vote(VoteType::Prevote, Some(block_id)),
            Err(e) => {
                log::error!("enter_prevote({}/{}): proposal block is invalid: {:?}", height, round, e);
                self.sign_add_vote(VoteType::Prevote, None);
            }
        }
        Ok(())
    }

    /// Enter PrevoteWait, after seeing +2/3 prevotes that do not agree.
    pub(super) fn enter_prevote_wait(&mut self, height: Height, round: Round) -> Result<(), ConsensusError> {
        if self.rs.height != height
            || round < self.rs.round
            || (self.rs.round == round && RoundStep::PrevoteWait <= self.rs.step)
        {
            log::debug!("enter_prevote_wait({}/{}): invalid args, at {}", height, round, self.rs.event());
            return Ok(());
        }
        if !self.rs.votes.prevotes(round).is_some_and(|prevotes| prevotes.has_two_thirds_any()) {
            return Err(fatal(format!(
                "enter_prevote_wait({}/{}) called without +2/3 prevotes",
                height, round
            )));
        }
        log::info!("enter_prevote_wait({}/{}), at {}", height, round, self.rs.event());

        self.schedule_timeout(self.config.prevote(round), height, round, RoundStep::PrevoteWait);
        self.rs.round = round;
        self.rs.step = RoundStep::PrevoteWait;
        self.new_step();
        Ok(())
    }

    /// Enter Precommit. Locks on (and precommits) a block that has +2/3 prevotes in this round, or
    /// precommits nil.
    pub(super) fn enter_precommit(&mut self, height: Height, round: Round) -> Result<(), ConsensusError> {
        if self.rs.height != height
            || round < self.rs.round
            || (self.rs.round == round && RoundStep::Precommit <= self.rs.step)
        {
            log::debug!("enter_precommit({}/{}): invalid args, at {}", height, round, self.rs.event());
            return Ok(());
        }
        log::info!("enter_precommit({}/{}), at {}", height, round, self.rs.event());

        self.do_precommit(height, round)?;

        self.rs.round = round;
        self.rs.step = RoundStep::Precommit;
        self.new_step();
        Ok(())
    }

    fn do_precommit(&mut self, height: Height, round: Round) -> Result<(), ConsensusError> {
        let majority = self.rs.votes.prevotes(round).and_then(|prevotes| prevotes.two_thirds_majority());
        let Some(block_id) = majority else {
            if self.rs.locked_block.is_some() {
                log::info!("enter_precommit({}/{}): no +2/3 prevotes while we're locked, precommitting nil", height, round);
            } else {
                log::info!("enter_precommit({}/{}): no +2/3 prevotes, precommitting nil", height, round);
            }
            self.sign_add_vote(VoteType::Precommit, None);
            return Ok(());
        };

        let pol_round = self.rs.votes.pol_info().map(|(pol_round, _)| pol_round);
        if pol_round < Some(round) {
            return Err(fatal(format!(
                "enter_precommit({}/{}): the POL round should be {} but got {:?}",
                height, round, round, pol_round
            )));
        }

        let Some(block_id) = block_id else {
            // +2/3 prevoted nil.
            if self.rs.locked_block.is_some() {
                log::info!("enter_precommit({}/{}): +2/3 prevoted nil, unlocking", height, round);
                self.unlock(height);
            } else {
                log::info!("enter_precommit({}/{}): +2/3 prevoted nil", height, round);
            }
            self.sign_add_vote(VoteType::Precommit, None);
            return Ok(());
        };

        if self
            .rs
            .locked_block
            .as_ref()
            .is_some_and(|locked| locked.hashes_to(&block_id.hash))
        {
            log::info!("enter_precommit({}/{}): +2/3 prevoted locked block, relocking", height, round);
            self.rs.locked_round = Some(round);
            self.publish_lock(height, round, block_id);
            self.sign_add_vote(VoteType::Precommit, Some(block_id));
            return Ok(());
        }

        if let Some(block) = self
            .rs
            .proposal_block
            .as_ref()
            .filter(|block| block.hashes_to(&block_id.hash))
        {
            let validation = self.executor()?.validate_block(&self.chain_state, block);
            if let Err(e) = validation {
                return Err(fatal(format!(
                    "enter_precommit({}/{}): +2/3 prevoted for an invalid block: {:?}",
                    height, round, e
                )));
            }
            log::info!("enter_precommit({}/{}): +2/3 prevoted proposal block, locking", height, round);
            self.rs.locked_round = Some(round);
            self.rs.locked_block = self.rs.proposal_block.clone();
            self.rs.locked_block_parts = self.rs.proposal_block_parts.clone();
            self.publish_lock(height, round, block_id);
            self.sign_add_vote(VoteType::Precommit, Some(block_id));
            return Ok(());
        }

        // There was a polka for a block the node does not have. Fetch it, unlock, and precommit nil.
        log::info!("enter_precommit({}/{}): +2/3 prevotes for a block we don't have, voting nil", height, round);
        self.rs.locked_round = None;
        self.rs.locked_block = None;
        self.rs.locked_block_parts = None;
        let expecting = self
            .rs
            .proposal_block_parts
            .as_ref()
            .is_some_and(|parts| parts.has_header(&block_id.parts_header));
        if !expecting {
            self.rs.proposal_block = None;
            self.rs.proposal_block_parts = PartSet::new_from_header(block_id.parts_header).ok();
        }
        self.publish(Event::Unlock(UnlockEvent {
            timestamp: SystemTime::now(),
            height,
            round,
        }));
        self.sign_add_vote(VoteType::Precommit, None);
        Ok(())
    }

    fn unlock(&mut self, height: Height) {
        self.rs.locked_round = None;
        self.rs.locked_block = None;
        self.rs.locked_block_parts = None;
        self.publish(Event::Unlock(UnlockEvent {
            timestamp: SystemTime::now(),
            height,
            round: self.rs.round,
        }));
    }

    fn publish_lock(&self, height: Height, round: Round, block_id: BlockID) {
        self.publish(Event::Lock(LockEvent {
            timestamp: SystemTime::now(),
            height,
            round,
            block: block_id.hash,
        }))
    }

    /// Wait a while for more precommits, after seeing +2/3 precommits that do not agree.
    pub(super) fn enter_precommit_wait(&mut self, height: Height, round: Round) -> Result<(), ConsensusError> {
        if self.rs.height != height
            || round < self.rs.round
            || (self.rs.round == round && self.rs.triggered_timeout_precommit)
        {
            log::debug!("enter_precommit_wait({}/{}): invalid args, at {}", height, round, self.rs.event());
            return Ok(());
        }
        if !self.rs.votes.precommits(round).is_some_and(|precommits| precommits.has_two_thirds_any()) {
            return Err(fatal(format!(
                "enter_precommit_wait({}/{}) called without +2/3 precommits",
                height, round
            )));
        }
        log::info!("enter_precommit_wait({}/{}), at {}", height, round, self.rs.event());

        self.schedule_timeout(self.config.precommit(round), height, round, RoundStep::PrecommitWait);
        self.rs.triggered_timeout_precommit = true;
        self.new_step();
        Ok(())
    }

    /// Sign a vote for the current height and round and queue it for the node itself. Does nothing if
    /// the node is not a validator of this height.
    pub(super) fn sign_add_vote(&mut self, vote_type: VoteType, block_id: Option<BlockID>) {
        let Some(pub_key) = self.priv_validator_pub_key else {
            return;
        };
        let address = pub_key.to_bytes();
        let Some((validator_index, _)) = self.rs.validators.get_by_address(&address) else {
            return;
        };

        // The vote must not reach the WAL before the records that led to it.
        if let Err(e) = self.wal.flush_and_sync() {
            log::error!("Error flushing to disk: {}", e);
        }

        let mut vote = Vote {
            vote_type,
            height: self.rs.height,
            round: self.rs.round,
            block_id,
            timestamp: self.vote_time(),
            validator_address: address,
            validator_index,
            signature: SignatureBytes::empty(),
        };
        let chain_id = self.chain_state.chain_id;
        let Some(priv_validator) = self.priv_validator.as_mut() else {
            return;
        };
        match priv_validator.sign_vote(chain_id, &mut vote) {
            Ok(()) => {
                self.send_internal_message(ConsensusMessage::Vote(vote.clone()));
                self.sender.broadcast(vote.clone());
                log::info!("Signed and pushed vote {}", vote);
                self.publish(Event::Vote(VoteEvent {
                    timestamp: SystemTime::now(),
                    vote,
                }));
            }
            Err(e) => {
                if !self.replay_mode {
                    log::error!("Error signing vote {}/{} {:?}: {:?}", vote.height, vote.round, vote_type, e);
                }
            }
        }
    }

    // Votes are timestamped after the time of the block they build on, so that block times increase.
    fn vote_time(&self) -> Timestamp {
        let now = Timestamp::now();
        let min_vote_time = self
            .rs
            .locked_block
            .as_ref()
            .or(self.rs.proposal_block.as_ref())
            .map(|block| block.header.time.plus(Duration::from_millis(1)));
        match min_vote_time {
            Some(min_vote_time) if min_vote_time > now => min_vote_time,
            _ => now,
        }
    }
}
