/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The precommits that committed a block, in the compact form that is stored with the next block.

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    block::BlockID,
    data_types::{ChainID, Height, Round, SignatureBytes, Timestamp, TotalPower, VerifyingKeyBytes},
    signed_messages::SignedMessage,
    validator_set::ValidatorSet,
    vote::{Vote, VoteType},
};

/// What the validator at some index of the validator set contributed to a [`Commit`].
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum CommitSig {
    /// No precommit was received, or the precommit was for a block other than the committed one.
    Absent,
    ForBlock {
        validator_address: VerifyingKeyBytes,
        timestamp: Timestamp,
        signature: SignatureBytes,
    },
    Nil {
        validator_address: VerifyingKeyBytes,
        timestamp: Timestamp,
        signature: SignatureBytes,
    },
}

impl CommitSig {
    pub fn is_for_block(&self) -> bool {
        matches!(self, CommitSig::ForBlock { .. })
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, CommitSig::Absent)
    }
}

/// Precommits for `block_id` at `(height, round)`, one slot per validator in validator-set order.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Commit {
    pub height: Height,
    pub round: Round,
    pub block_id: BlockID,
    pub signatures: Vec<CommitSig>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum CommitError {
    WrongSetSize { expected: usize, got: usize },
    WrongHeight { expected: Height, got: Height },
    WrongBlockID,
    ValidatorMismatch { index: u32 },
    InvalidSignature { index: u32 },
    InsufficientPower { got: TotalPower, needed: TotalPower },
}

impl Commit {
    pub fn size(&self) -> usize {
        self.signatures.len()
    }

    /// Reconstruct the precommit of the validator at `validator_index`, or `None` if it is absent.
    pub fn get_vote(&self, validator_index: u32) -> Option<Vote> {
        let (block_id, validator_address, timestamp, signature) =
            match self.signatures.get(validator_index as usize)? {
                CommitSig::Absent => return None,
                CommitSig::ForBlock {
                    validator_address,
                    timestamp,
                    signature,
                } => (Some(self.block_id), validator_address, timestamp, signature),
                CommitSig::Nil {
                    validator_address,
                    timestamp,
                    signature,
                } => (None, validator_address, timestamp, signature),
            };
        Some(Vote {
            vote_type: VoteType::Precommit,
            height: self.height,
            round: self.round,
            block_id,
            timestamp: *timestamp,
            validator_address: *validator_address,
            validator_index,
            signature: *signature,
        })
    }

    /// Check that this commit carries correctly signed precommits for `block_id` at `height` from
    /// more than two thirds of the power of `validators`.
    pub fn verify(
        &self,
        chain_id: ChainID,
        validators: &ValidatorSet,
        block_id: &BlockID,
        height: Height,
    ) -> Result<(), CommitError> {
        if validators.len() != self.size() {
            return Err(CommitError::WrongSetSize {
                expected: validators.len(),
                got: self.size(),
            });
        }
        if self.height != height {
            return Err(CommitError::WrongHeight {
                expected: height,
                got: self.height,
            });
        }
        if &self.block_id != block_id {
            return Err(CommitError::WrongBlockID);
        }

        let mut tallied = TotalPower::new(0);
        for (index, validator) in validators.validators().enumerate() {
            let index = index as u32;
            let Some(vote) = self.get_vote(index) else {
                continue;
            };
            if vote.validator_address != validator.address {
                return Err(CommitError::ValidatorMismatch { index });
            }
            if !vote.is_correct(chain_id, &validator.address) {
                return Err(CommitError::InvalidSignature { index });
            }
            if vote.block_id.is_some() {
                tallied += validator.power;
            }
        }

        let needed = validators.quorum();
        if tallied < needed {
            return Err(CommitError::InsufficientPower {
                got: tallied,
                needed,
            });
        }
        Ok(())
    }
}
