/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Traits for the components that the consensus core relies on but does not implement.
//!
//! The consensus core calls these synchronously from its receive loop. Implementations should
//! therefore return promptly: a slow [`BlockExecutor`] delays every step of the protocol.

use crate::types::{
    block::{Block, BlockID, BlockMeta},
    chain_state::{ChainState, InvalidBlockError},
    commit::Commit,
    data_types::{Height, VerifyingKeyBytes},
    evidence::{DuplicateVoteEvidence, EvidenceError},
    part_set::PartSet,
};

#[derive(Debug)]
pub enum BlockExecutionError {
    InvalidBlock(InvalidBlockError),
    /// The application failed to build or execute a block.
    Application(String),
}

impl From<InvalidBlockError> for BlockExecutionError {
    fn from(value: InvalidBlockError) -> Self {
        BlockExecutionError::InvalidBlock(value)
    }
}

/// Validates, builds, and executes blocks on behalf of the application.
pub trait BlockExecutor: Send + 'static {
    /// Check that `block` may be committed on top of `state`.
    fn validate_block(&mut self, state: &ChainState, block: &Block) -> Result<(), BlockExecutionError> {
        Ok(state.validate_block(block)?)
    }

    /// Build the block that `proposer_address` proposes at `height` on top of `state`.
    fn create_proposal_block(
        &mut self,
        height: Height,
        state: &ChainState,
        last_commit: Option<Commit>,
        proposer_address: VerifyingKeyBytes,
    ) -> Result<(Block, PartSet), BlockExecutionError>;

    /// Execute a committed block. Returns the resulting state, and the height below which the block
    /// store may drop blocks (or the store's base if nothing should be pruned).
    ///
    /// An error is treated as fatal by the consensus core.
    fn apply_block(
        &mut self,
        state: &ChainState,
        block_id: BlockID,
        block: &Block,
    ) -> Result<(ChainState, Height), BlockExecutionError>;
}

#[derive(Debug)]
pub enum BlockStoreError {
    /// The block does not directly extend the stored chain.
    NonContiguousHeight { expected: Height, got: Height },
    InvalidRetainHeight { retain_height: Height, height: Height },
    Storage(String),
}

/// Persistent storage for committed blocks and the commits that finalized them.
pub trait BlockStore: Send + 'static {
    /// Height of the latest stored block, or zero if there is none.
    fn height(&self) -> Height;

    /// Height of the oldest stored block, or zero if there is none.
    fn base(&self) -> Height;

    /// Store `block`, its parts, and the commit the node saw for it.
    fn save_block(&mut self, block: &Block, parts: &PartSet, seen_commit: &Commit) -> Result<(), BlockStoreError>;

    fn load_block_meta(&self, height: Height) -> Option<BlockMeta>;

    /// The commit for the block at `height` that this node saw when it finalized the block.
    fn load_seen_commit(&self, height: Height) -> Option<Commit>;

    /// The canonical commit for the block at `height`, carried by the block at `height + 1`.
    fn load_block_commit(&self, height: Height) -> Option<Commit>;

    /// Remove all blocks below `retain_height`. Returns how many blocks were removed.
    fn prune_blocks(&mut self, retain_height: Height) -> Result<u64, BlockStoreError>;
}

#[derive(Debug)]
pub enum EvidencePoolError {
    Invalid(EvidenceError),
    AlreadyCommitted,
}

impl From<EvidenceError> for EvidencePoolError {
    fn from(value: EvidenceError) -> Self {
        EvidencePoolError::Invalid(value)
    }
}

/// Collects evidence of misbehaviour for inclusion in future blocks.
pub trait EvidencePool: Send + 'static {
    fn add_evidence(&mut self, evidence: DuplicateVoteEvidence) -> Result<(), EvidencePoolError>;
}
