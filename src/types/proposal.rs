/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use std::fmt::{self, Display, Formatter};

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    block::BlockID,
    data_types::{ChainID, Height, Round, SignatureBytes, Timestamp},
    signed_messages::SignedMessage,
};

/// The proposer's signed choice of block for a round.
///
/// `pol_round` is the round in which the proposed block received more than two thirds of prevotes,
/// if the proposer is re-proposing a block it saw such a "proof of lock" for. It must be earlier than
/// `round`.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Proposal {
    pub height: Height,
    pub round: Round,
    pub pol_round: Option<Round>,
    pub block_id: BlockID,
    pub timestamp: Timestamp,
    pub signature: SignatureBytes,
}

#[derive(BorshSerialize)]
struct CanonicalProposal {
    chain_id: ChainID,
    height: Height,
    round: Round,
    pol_round: Option<Round>,
    block_id: BlockID,
    timestamp: Timestamp,
}

impl Proposal {
    /// Create an unsigned proposal stamped with the current time.
    pub fn new(height: Height, round: Round, pol_round: Option<Round>, block_id: BlockID) -> Proposal {
        Proposal {
            height,
            round,
            pol_round,
            block_id,
            timestamp: Timestamp::now(),
            signature: SignatureBytes::empty(),
        }
    }
}

impl SignedMessage for Proposal {
    fn message_bytes(&self, chain_id: ChainID) -> Vec<u8> {
        CanonicalProposal {
            chain_id,
            height: self.height,
            round: self.round,
            pol_round: self.pol_round,
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

impl Display for Proposal {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let pol_round = match self.pol_round {
            Some(round) => round.to_string(),
            None => String::from("-"),
        };
        write!(
            f,
            "Proposal{{{}/{} ({}, pol {})}}",
            self.height, self.round, self.block_id.hash, pol_round
        )
    }
}
