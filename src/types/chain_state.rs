/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The committed state of the chain that the consensus core builds on top of.
//!
//! [`ChainState`] is produced by the block executor after applying a block and is read by the
//! consensus core to learn the validator set, the last committed block, and the current app hash of
//! the next height.

use std::time::Duration;

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    block::{Block, BlockID, BlockValidationError},
    commit::{Commit, CommitError},
    data_types::{ChainID, CryptoHash, Height, Timestamp, VerifyingKeyBytes},
    evidence::{DuplicateVoteEvidence, EvidenceError},
    part_set::PartSet,
    validator_set::ValidatorSet,
};

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ChainState {
    pub chain_id: ChainID,
    pub initial_height: Height,
    /// `initial_height - 1` before the first block is committed.
    pub last_block_height: Height,
    pub last_block_id: Option<BlockID>,
    pub last_block_time: Timestamp,
    /// Validators of height `last_block_height + 1`, with proposer priorities for its round 0.
    pub validators: ValidatorSet,
    /// Validators that signed the commit of `last_block_height`.
    pub last_validators: ValidatorSet,
    pub app_hash: CryptoHash,
    /// Whether the app hash changed in the last committed block.
    pub app_hash_changed: bool,
}

#[derive(Debug)]
pub enum InvalidBlockError {
    Malformed(BlockValidationError),
    WrongChainID,
    WrongHeight { expected: Height, got: Height },
    WrongLastBlockID,
    WrongAppHash,
    UnknownProposer(VerifyingKeyBytes),
    TimeNotIncreasing,
    MissingLastCommit,
    UnexpectedLastCommit,
    InvalidLastCommit(CommitError),
    InvalidEvidence(EvidenceError),
}

impl From<BlockValidationError> for InvalidBlockError {
    fn from(value: BlockValidationError) -> Self {
        InvalidBlockError::Malformed(value)
    }
}

impl From<CommitError> for InvalidBlockError {
    fn from(value: CommitError) -> Self {
        InvalidBlockError::InvalidLastCommit(value)
    }
}

impl From<EvidenceError> for InvalidBlockError {
    fn from(value: EvidenceError) -> Self {
        InvalidBlockError::InvalidEvidence(value)
    }
}

impl ChainState {
    /// The state of a chain before its first block at `initial_height`.
    pub fn genesis(
        chain_id: ChainID,
        initial_height: Height,
        validators: ValidatorSet,
        app_hash: CryptoHash,
    ) -> ChainState {
        ChainState {
            chain_id,
            initial_height,
            last_block_height: initial_height.prev(),
            last_block_id: None,
            last_block_time: Timestamp::default(),
            validators,
            last_validators: ValidatorSet::default(),
            app_hash,
            app_hash_changed: false,
        }
    }

    /// Whether this state has no validators and so cannot drive consensus.
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// The height of the next block to be committed on top of this state.
    pub fn next_height(&self) -> Height {
        if self.last_block_height < self.initial_height {
            self.initial_height
        } else {
            self.last_block_height + 1
        }
    }

    /// Assemble the next block proposed by `proposer_address`, together with its parts.
    pub fn make_block(
        &self,
        height: Height,
        txs: Vec<Vec<u8>>,
        last_commit: Option<Commit>,
        evidence: Vec<DuplicateVoteEvidence>,
        proposer_address: VerifyingKeyBytes,
        part_size: usize,
    ) -> (Block, PartSet) {
        let now = Timestamp::now();
        let earliest = self.last_block_time.plus(Duration::from_millis(1));
        let block = Block::new(
            self.chain_id,
            height,
            now.max(earliest),
            self.last_block_id,
            proposer_address,
            self.app_hash,
            txs,
            last_commit,
            evidence,
        );
        let parts = block.make_part_set(part_size);
        (block, parts)
    }

    /// Check that `block` can be committed on top of this state.
    pub fn validate_block(&self, block: &Block) -> Result<(), InvalidBlockError> {
        block.validate_basic()?;

        let header = &block.header;
        if header.chain_id != self.chain_id {
            return Err(InvalidBlockError::WrongChainID);
        }
        let expected = self.next_height();
        if header.height != expected {
            return Err(InvalidBlockError::WrongHeight {
                expected,
                got: header.height,
            });
        }
        if header.last_block_id != self.last_block_id {
            return Err(InvalidBlockError::WrongLastBlockID);
        }
        if header.app_hash != self.app_hash {
            return Err(InvalidBlockError::WrongAppHash);
        }
        if !self.validators.has_address(&header.proposer_address) {
            return Err(InvalidBlockError::UnknownProposer(header.proposer_address));
        }

        if header.height == self.initial_height {
            if block.last_commit.is_some() {
                return Err(InvalidBlockError::UnexpectedLastCommit);
            }
        } else {
            if header.time <= self.last_block_time {
                return Err(InvalidBlockError::TimeNotIncreasing);
            }
            let (Some(last_commit), Some(last_block_id)) = (&block.last_commit, &self.last_block_id) else {
                return Err(InvalidBlockError::MissingLastCommit);
            };
            last_commit.verify(
                self.chain_id,
                &self.last_validators,
                last_block_id,
                self.last_block_height,
            )?;
        }

        for evidence in &block.evidence {
            evidence.verify(self.chain_id)?;
        }
        Ok(())
    }

    /// The state that results from committing `block` (identified by `block_id`) and obtaining
    /// `app_hash` from executing it.
    pub fn next_state(&self, block_id: BlockID, block: &Block, app_hash: CryptoHash) -> ChainState {
        ChainState {
            chain_id: self.chain_id,
            initial_height: self.initial_height,
            last_block_height: block.height(),
            last_block_id: Some(block_id),
            last_block_time: block.header.time,
            validators: self.validators.copy_increment_proposer_priority(1),
            last_validators: self.validators.clone(),
            app_hash,
            app_hash_changed: app_hash != self.app_hash,
        }
    }
}
