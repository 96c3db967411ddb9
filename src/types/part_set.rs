/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Blocks are gossiped in fixed-size parts. A [`PartSet`] collects the parts of one block and checks
//! each against the Merkle root carried in the [`PartSetHeader`].

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    data_types::CryptoHash,
    merkle::{proofs_from_byte_slices, MerkleProof},
};

/// Size of every part except possibly the last one.
pub const BLOCK_PART_SIZE_BYTES: usize = 65536;

/// Largest serialized block the node will assemble.
pub const MAX_BLOCK_SIZE_BYTES: usize = 104857600;

/// Largest part count a header may announce. Parts are allocated up front when a header arrives, so
/// anything above this is refused.
pub const MAX_BLOCK_PARTS_COUNT: u32 = (MAX_BLOCK_SIZE_BYTES / BLOCK_PART_SIZE_BYTES) as u32 + 1;

/// Number of parts and Merkle root of the parts of a block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct PartSetHeader {
    pub total: u32,
    pub hash: CryptoHash,
}

impl PartSetHeader {
    /// Check that a part set with this header can exist: at least one part, and no more than
    /// [`MAX_BLOCK_PARTS_COUNT`].
    pub fn validate_basic(&self) -> Result<(), PartSetError> {
        if self.total == 0 || self.total > MAX_BLOCK_PARTS_COUNT {
            return Err(PartSetError::InvalidTotal { total: self.total });
        }
        Ok(())
    }
}

/// One part of a serialized block, with a proof that it belongs under the part set's root.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Part {
    pub index: u32,
    pub bytes: Vec<u8>,
    pub proof: MerkleProof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartSetError {
    InvalidTotal { total: u32 },
    UnexpectedIndex { index: u32, total: u32 },
    InvalidProof { index: u32 },
}

/// The parts of a block received so far.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartSet {
    header: PartSetHeader,
    parts: Vec<Option<Part>>,
    count: u32,
    byte_size: usize,
}

impl PartSet {
    /// Split `data` into parts of `part_size` bytes. The resulting part set is complete.
    pub fn from_data(data: &[u8], part_size: usize) -> PartSet {
        let chunks: Vec<&[u8]> = if data.is_empty() {
            vec![data]
        } else {
            data.chunks(part_size).collect()
        };
        let (root, proofs) = proofs_from_byte_slices(&chunks);
        let parts: Vec<Option<Part>> = chunks
            .iter()
            .zip(proofs)
            .enumerate()
            .map(|(index, (bytes, proof))| {
                Some(Part {
                    index: index as u32,
                    bytes: bytes.to_vec(),
                    proof,
                })
            })
            .collect();
        let total = parts.len() as u32;
        PartSet {
            header: PartSetHeader { total, hash: root },
            parts,
            count: total,
            byte_size: data.len(),
        }
    }

    /// Create an empty part set that accepts the parts committed to by `header`.
    pub fn new_from_header(header: PartSetHeader) -> Result<PartSet, PartSetError> {
        header.validate_basic()?;
        Ok(PartSet {
            header,
            parts: vec![None; header.total as usize],
            count: 0,
            byte_size: 0,
        })
    }

    pub fn header(&self) -> PartSetHeader {
        self.header
    }

    pub fn has_header(&self, header: &PartSetHeader) -> bool {
        &self.header == header
    }

    pub fn total(&self) -> u32 {
        self.header.total
    }

    /// Number of parts received so far.
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    pub fn is_complete(&self) -> bool {
        self.count == self.header.total
    }

    pub fn get_part(&self, index: u32) -> Option<&Part> {
        self.parts.get(index as usize).and_then(|part| part.as_ref())
    }

    /// Add `part` to the set. Returns `Ok(false)` if the part was already present.
    pub fn add_part(&mut self, part: Part) -> Result<bool, PartSetError> {
        let total = self.header.total;
        let index = part.index;
        if index >= total {
            return Err(PartSetError::UnexpectedIndex { index, total });
        }
        if self.parts[index as usize].is_some() {
            return Ok(false);
        }
        if part.proof.index != index
            || part.proof.total != total
            || !part.proof.verify(&self.header.hash, &part.bytes)
        {
            return Err(PartSetError::InvalidProof { index });
        }

        self.byte_size += part.bytes.len();
        self.count += 1;
        self.parts[index as usize] = Some(part);
        Ok(true)
    }

    /// Concatenate the bytes of all parts, or `None` if some part is still missing.
    pub fn assemble(&self) -> Option<Vec<u8>> {
        if !self.is_complete() {
            return None;
        }
        let mut bytes = Vec::with_capacity(self.byte_size);
        for part in self.parts.iter().flatten() {
            bytes.extend_from_slice(&part.bytes);
        }
        Some(bytes)
    }
}
