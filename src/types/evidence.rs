/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Proof that a validator signed two conflicting votes.

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    data_types::{ChainID, Height, VerifyingKeyBytes},
    signed_messages::SignedMessage,
    vote::Vote,
};

/// Two votes by the same validator for the same height, round, and vote type, but for different
/// blocks.
///
/// The two votes are stored in a canonical order (by the Borsh encoding of their block ids) so that
/// the same pair of votes always produces the same evidence, whichever was received first.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct DuplicateVoteEvidence {
    pub vote_a: Vote,
    pub vote_b: Vote,
}

#[derive(Debug, PartialEq, Eq)]
pub enum EvidenceError {
    HeightRoundTypeMismatch,
    ValidatorMismatch,
    SameBlockID,
    InvalidSignature,
}

impl DuplicateVoteEvidence {
    pub fn new(vote_1: Vote, vote_2: Vote) -> DuplicateVoteEvidence {
        let key_1 = vote_1.block_id.try_to_vec().unwrap_or_default();
        let key_2 = vote_2.block_id.try_to_vec().unwrap_or_default();
        if key_1 <= key_2 {
            DuplicateVoteEvidence {
                vote_a: vote_1,
                vote_b: vote_2,
            }
        } else {
            DuplicateVoteEvidence {
                vote_a: vote_2,
                vote_b: vote_1,
            }
        }
    }

    pub fn height(&self) -> Height {
        self.vote_a.height
    }

    pub fn address(&self) -> VerifyingKeyBytes {
        self.vote_a.validator_address
    }

    /// Check that the two votes really do conflict and that both were signed by the validator.
    pub fn verify(&self, chain_id: ChainID) -> Result<(), EvidenceError> {
        let (a, b) = (&self.vote_a, &self.vote_b);
        if a.height != b.height || a.round != b.round || a.vote_type != b.vote_type {
            return Err(EvidenceError::HeightRoundTypeMismatch);
        }
        if a.validator_address != b.validator_address || a.validator_index != b.validator_index {
            return Err(EvidenceError::ValidatorMismatch);
        }
        if a.block_id == b.block_id {
            return Err(EvidenceError::SameBlockID);
        }
        if !a.is_correct(chain_id, &a.validator_address) || !b.is_correct(chain_id, &b.validator_address) {
            return Err(EvidenceError::InvalidSignature);
        }
        Ok(())
    }
}
