/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the [`Block`] type and the identifiers through which votes and proposals refer to
//! blocks.

use std::io;

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    commit::Commit,
    crypto_primitives::hash,
    data_types::{ChainID, CryptoHash, Height, Timestamp, VerifyingKeyBytes},
    evidence::DuplicateVoteEvidence,
    merkle::root_from_byte_slices,
    part_set::{PartSet, PartSetHeader},
};

/// Identifies a block by the hash of its header and the header of its part set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct BlockID {
    pub hash: CryptoHash,
    pub parts_header: PartSetHeader,
}

/// Fields of a block that its hash commits to.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Header {
    pub chain_id: ChainID,
    pub height: Height,
    pub time: Timestamp,
    pub last_block_id: Option<BlockID>,
    pub proposer_address: VerifyingKeyBytes,
    /// App hash after executing the previous block.
    pub app_hash: CryptoHash,
    pub data_hash: CryptoHash,
    pub last_commit_hash: CryptoHash,
    pub evidence_hash: CryptoHash,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Block {
    pub header: Header,
    pub txs: Vec<Vec<u8>>,
    /// Precommits that committed the previous block. `None` for the first block of a chain.
    pub last_commit: Option<Commit>,
    pub evidence: Vec<DuplicateVoteEvidence>,
}

#[derive(Debug)]
pub enum BlockValidationError {
    DataHashMismatch,
    LastCommitHashMismatch,
    EvidenceHashMismatch,
}

impl Block {
    /// Assemble a block, filling in the hashes that its header commits to.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain_id: ChainID,
        height: Height,
        time: Timestamp,
        last_block_id: Option<BlockID>,
        proposer_address: VerifyingKeyBytes,
        app_hash: CryptoHash,
        txs: Vec<Vec<u8>>,
        last_commit: Option<Commit>,
        evidence: Vec<DuplicateVoteEvidence>,
    ) -> Block {
        let header = Header {
            chain_id,
            height,
            time,
            last_block_id,
            proposer_address,
            app_hash,
            data_hash: Self::compute_data_hash(&txs),
            last_commit_hash: Self::compute_last_commit_hash(&last_commit),
            evidence_hash: Self::compute_evidence_hash(&evidence),
        };
        Block {
            header,
            txs,
            last_commit,
            evidence,
        }
    }

    pub fn height(&self) -> Height {
        self.header.height
    }

    /// SHA256 hash of the Borsh encoding of the block's header.
    pub fn hash(&self) -> CryptoHash {
        hash(&self.header.try_to_vec().unwrap_or_default())
    }

    pub fn hashes_to(&self, block_hash: &CryptoHash) -> bool {
        &self.hash() == block_hash
    }

    /// Serialize the block and split it into parts of `part_size` bytes.
    pub fn make_part_set(&self, part_size: usize) -> PartSet {
        let bytes = self.try_to_vec().unwrap_or_default();
        PartSet::from_data(&bytes, part_size)
    }

    /// Deserialize a block from a complete part set.
    pub fn from_part_set(parts: &PartSet) -> io::Result<Block> {
        let bytes = parts
            .assemble()
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "part set is not complete"))?;
        Block::try_from_slice(&bytes)
    }

    /// Check that the header's hashes match the block's body.
    pub fn validate_basic(&self) -> Result<(), BlockValidationError> {
        if self.header.data_hash != Self::compute_data_hash(&self.txs) {
            return Err(BlockValidationError::DataHashMismatch);
        }
        if self.header.last_commit_hash != Self::compute_last_commit_hash(&self.last_commit) {
            return Err(BlockValidationError::LastCommitHashMismatch);
        }
        if self.header.evidence_hash != Self::compute_evidence_hash(&self.evidence) {
            return Err(BlockValidationError::EvidenceHashMismatch);
        }
        Ok(())
    }

    fn compute_data_hash(txs: &[Vec<u8>]) -> CryptoHash {
        let slices: Vec<&[u8]> = txs.iter().map(|tx| tx.as_slice()).collect();
        root_from_byte_slices(&slices)
    }

    fn compute_last_commit_hash(last_commit: &Option<Commit>) -> CryptoHash {
        hash(&last_commit.try_to_vec().unwrap_or_default())
    }

    fn compute_evidence_hash(evidence: &[DuplicateVoteEvidence]) -> CryptoHash {
        hash(&evidence.try_to_vec().unwrap_or_default())
    }
}

/// Summary of a stored block, kept by block stores next to the block itself.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BlockMeta {
    pub block_id: BlockID,
    pub header: Header,
    pub num_txs: u32,
}

impl BlockMeta {
    pub fn new(block: &Block, parts: &PartSet) -> BlockMeta {
        BlockMeta {
            block_id: BlockID {
                hash: block.hash(),
                parts_header: parts.header(),
            },
            header: block.header.clone(),
            num_txs: block.txs.len() as u32,
        }
    }
}
