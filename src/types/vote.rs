/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A single validator's signed prevote or precommit.

use std::fmt::{self, Display, Formatter};

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    block::BlockID,
    data_types::{ChainID, Height, Round, SignatureBytes, Timestamp, VerifyingKeyBytes},
    signed_messages::SignedMessage,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize)]
pub enum VoteType {
    Prevote,
    Precommit,
}

/// One validator's assertion for `(height, round, vote_type, block_id)`. A `block_id` of `None` is a
/// vote for nil.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Vote {
    pub vote_type: VoteType,
    pub height: Height,
    pub round: Round,
    pub block_id: Option<BlockID>,
    pub timestamp: Timestamp,
    pub validator_address: VerifyingKeyBytes,
    pub validator_index: u32,
    pub signature: SignatureBytes,
}

// The part of a vote that is signed. Excludes the validator's identity, which is implied by the
// signing key.
#[derive(BorshSerialize)]
struct CanonicalVote {
    chain_id: ChainID,
    vote_type: VoteType,
    height: Height,
    round: Round,
    block_id: Option<BlockID>,
    timestamp: Timestamp,
}

impl Vote {
    pub fn is_nil(&self) -> bool {
        self.block_id.is_none()
    }
}

impl SignedMessage for Vote {
    fn message_bytes(&self, chain_id: ChainID) -> Vec<u8> {
        CanonicalVote {
            chain_id,
            vote_type: self.vote_type,
            height: self.height,
            round: self.round,
            block_id: self.block_id,
            timestamp: self.timestamp,
        }
        .try_to_vec()
        .unwrap_or_default()
    }

    fn signature_bytes(&self) -> SignatureBytes {
        self.signature
    }
}

impl Display for Vote {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let target = match &self.block_id {
            Some(block_id) => block_id.hash.to_string(),
            None => String::from("nil"),
        };
        write!(
            f,
            "Vote{{{}:{}/{}/{:?} {}}}",
            self.validator_index, self.height, self.round, self.vote_type, target
        )
    }
}
