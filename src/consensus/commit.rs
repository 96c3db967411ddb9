/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Committing a block that +2/3 of the validators precommitted, and moving on to the next height.

use std::time::SystemTime;

use crate::{
    events::{CommitBlockEvent, Event, PruneBlocksEvent, ValidBlockEvent},
    networking::network::Network,
    pluggables::{BlockExecutor, BlockStore, EvidencePool},
    types::{
        block::BlockID,
        data_types::{Height, Round, Timestamp},
        part_set::PartSet,
    },
};

use super::{
    messages::WalMessage,
    round_state::RoundStep,
    state::{fatal, ConsensusError, ConsensusState},
};

impl<E: BlockExecutor, B: BlockStore, P: EvidencePool, N: Network> ConsensusState<E, B, P, N> {
    /// Enter Commit for the block that +2/3 precommitted in `commit_round`, and finalize it if the
    /// node already has it.
    pub(super) fn enter_commit(&mut self, height: Height, commit_round: Round) -> Result<(), ConsensusError> {
        if self.rs.height != height || RoundStep::Commit <= self.rs.step {
            log::debug!("enter_commit({}/{}): invalid args, at {}", height, commit_round, self.rs.event());
            return Ok(());
        }
        log::info!("enter_commit({}/{}), at {}", height, commit_round, self.rs.event());

        let block_id = self
            .committed_block_id(commit_round)
            .ok_or_else(|| fatal(format!("enter_commit({}/{}) expects +2/3 precommits for a block", height, commit_round)))?;

        // The locked block is the one being committed: no need to wait for the proposal.
        if self
            .rs
            .locked_block
            .as_ref()
            .is_some_and(|locked| locked.hashes_to(&block_id.hash))
        {
            log::info!("enter_commit({}/{}): commit is for the locked block", height, commit_round);
            self.rs.proposal_block = self.rs.locked_block.clone();
            self.rs.proposal_block_parts = self.rs.locked_block_parts.clone();
        }

        let have_block = self
            .rs
            .proposal_block
            .as_ref()
            .is_some_and(|block| block.hashes_to(&block_id.hash));
        if !have_block {
            let expecting = self
                .rs
                .proposal_block_parts
                .as_ref()
                .is_some_and(|parts| parts.has_header(&block_id.parts_header));
            if !expecting {
                log::info!("enter_commit({}/{}): commit is for a block we don't know about, fetching it", height, commit_round);
                self.rs.proposal_block = None;
                self.rs.proposal_block_parts = PartSet::new_from_header(block_id.parts_header).ok();
                self.publish(Event::ValidBlock(ValidBlockEvent {
                    timestamp: SystemTime::now(),
                    height,
                    round: commit_round,
                    block: block_id.hash,
                }));
            }
        }

        self.rs.step = RoundStep::Commit;
        self.rs.commit_round = Some(commit_round);
        self.rs.commit_time = Timestamp::now();
        self.new_step();

        self.try_finalize_commit(height)
    }

    fn committed_block_id(&self, commit_round: Round) -> Option<BlockID> {
        self.rs
            .votes
            .precommits(commit_round)
            .and_then(|precommits| precommits.two_thirds_majority())
            .flatten()
    }

    /// Finalize the commit if the node has the committed block.
    pub(super) fn try_finalize_commit(&mut self, height: Height) -> Result<(), ConsensusError> {
        if self.rs.height != height {
            return Err(fatal(format!(
                "try_finalize_commit(): height mismatch, current {} got {}",
                self.rs.height, height
            )));
        }

        let Some(block_id) = self.rs.commit_round.and_then(|round| self.committed_block_id(round)) else {
            log::error!("Failed attempt to finalize commit; there was no +2/3 majority or +2/3 was for nil");
            return Ok(());
        };
        if !self
            .rs
            .proposal_block
            .as_ref()
            .is_some_and(|block| block.hashes_to(&block_id.hash))
        {
            // The block is still being fetched.
            log::info!("Failed attempt to finalize commit; we don't have the commit block {}", block_id.hash);
            return Ok(());
        }

        self.finalize_commit(height)
    }

    /// Save, execute, and move past the committed block. Every failure here is fatal: the node cannot
    /// go on deciding heights unless the block it committed to is durably applied.
    fn finalize_commit(&mut self, height: Height) -> Result<(), ConsensusError> {
        if self.rs.height != height || self.rs.step != RoundStep::Commit {
            log::debug!("finalize_commit({}): invalid args, at {}", height, self.rs.event());
            return Ok(());
        }

        let commit_round = self
            .rs
            .commit_round
            .ok_or_else(|| fatal("finalize_commit(): no commit round"))?;
        let block_id = self
            .committed_block_id(commit_round)
            .ok_or_else(|| fatal("cannot finalize commit; commit does not have +2/3 majority"))?;
        let (Some(block), Some(parts)) = (self.rs.proposal_block.clone(), self.rs.proposal_block_parts.clone()) else {
            return Err(fatal("cannot finalize commit; the proposal block is missing"));
        };
        if !parts.has_header(&block_id.parts_header) {
            return Err(fatal("expected proposal block parts header to be commit header"));
        }
        if !block.hashes_to(&block_id.hash) {
            return Err(fatal("cannot finalize commit; proposal block does not hash to commit hash"));
        }
        let validation = self.executor()?.validate_block(&self.chain_state, &block);
        validation.map_err(|e| fatal(format!("+2/3 committed an invalid block: {:?}", e)))?;

        log::info!(
            "Finalizing commit of block with {} txs, height {} hash {}",
            block.txs.len(),
            block.height(),
            block_id.hash
        );

        // The block may already be in the store if the node crashed after saving it.
        if self.block_store.height() < block.height() {
            let seen_commit = self
                .rs
                .votes
                .precommits(commit_round)
                .and_then(|precommits| precommits.make_commit())
                .ok_or_else(|| fatal("cannot finalize commit; failed to make the seen commit"))?;
            self.block_store
                .save_block(&block, &parts, &seen_commit)
                .map_err(|e| fatal(format!("failed to save block {}: {:?}", height, e)))?;
        } else {
            log::debug!("Block {} is already in the block store", block.height());
        }

        // From here on, a restart must not replay this height. Messages of the next height follow this
        // record in the WAL.
        self.wal
            .write_sync(WalMessage::EndHeight(height))
            .map_err(|e| fatal(format!("failed to write #ENDHEIGHT {} to the consensus WAL: {}", height, e)))?;

        let applied = self.executor()?.apply_block(&self.chain_state, block_id, &block);
        let (new_state, retain_height) =
            applied.map_err(|e| fatal(format!("failed to apply block {}: {:?}", height, e)))?;

        if retain_height > self.block_store.base() {
            self.prune_blocks(retain_height);
        }

        self.publish(Event::CommitBlock(CommitBlockEvent {
            timestamp: SystemTime::now(),
            height,
            block: block_id.hash,
            num_txs: block.txs.len(),
        }));

        let validators_changed = !new_state.validators.same_members(&self.chain_state.validators);
        let new_validators = new_state.validators.clone();

        self.update_to_state(new_state)?;

        if validators_changed {
            self.validator_set_update_handle.update_validator_set(new_validators);
        }

        self.schedule_round0();
        self.release_future_messages();
        Ok(())
    }

    fn prune_blocks(&mut self, retain_height: Height) {
        match self.block_store.prune_blocks(retain_height) {
            Ok(pruned) => {
                log::info!("Pruned {} blocks, retaining height {}", pruned, retain_height);
                self.publish(Event::PruneBlocks(PruneBlocksEvent {
                    timestamp: SystemTime::now(),
                    retain_height,
                    pruned,
                }));
            }
            Err(e) => log::error!("Failed to prune blocks below height {}: {:?}", retain_height, e),
        }
    }
}
