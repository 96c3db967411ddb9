/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the replica's
//! [config](crate::replica::Configuration).
//!
//! This crate logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [ReceiveVote](crate::events::ReceiveVoteEvent) is printed:
//!
//! ```text
//! ReceiveVote, 1701329264, Id5u7f6, 12, 0, Prevote, fNGCJyk
//! ```
//!
//! In the snippet:
//! - The third value is the first seven characters of the Base64 encoding of the peer the vote came
//!   from (or `self`).
//! - The fourth and fifth values are the height and round of the vote.
//! - The sixth value is the type of the vote.
//! - The seventh value is the first seven characters of the Base64 encoding of the hash of the voted
//!   block, or `nil`.

use std::time::SystemTime;

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};

use crate::{
    events::*,
    types::{block::BlockID, data_types::PeerID},
};

// Names of each event in PascalCase for printing:
pub const NEW_ROUND_STEP: &str = "NewRoundStep";
pub const TIMEOUT_PROPOSE: &str = "TimeoutPropose";
pub const TIMEOUT_WAIT: &str = "TimeoutWait";

pub const PROPOSE: &str = "Propose";
pub const RECEIVE_PROPOSAL: &str = "ReceiveProposal";
pub const COMPLETE_PROPOSAL: &str = "CompleteProposal";
pub const VOTE: &str = "Vote";
pub const RECEIVE_VOTE: &str = "ReceiveVote";

pub const LOCK: &str = "Lock";
pub const UNLOCK: &str = "Unlock";
pub const VALID_BLOCK: &str = "ValidBlock";

pub const COMMIT_BLOCK: &str = "CommitBlock";
pub const PRUNE_BLOCKS: &str = "PruneBlocks";
pub const EVIDENCE: &str = "Evidence";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for NewRoundStepEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |new_round_step_event: &NewRoundStepEvent| {
            log::info!(
                "{}, {}, {}, {}, {:?}",
                NEW_ROUND_STEP,
                secs_since_unix_epoch(new_round_step_event.timestamp),
                new_round_step_event.height,
                new_round_step_event.round,
                new_round_step_event.step
            )
        };
        Box::new(logger)
    }
}

impl Logger for TimeoutProposeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |timeout_propose_event: &TimeoutProposeEvent| {
            log::info!(
                "{}, {}, {}, {}",
                TIMEOUT_PROPOSE,
                secs_since_unix_epoch(timeout_propose_event.timestamp),
                timeout_propose_event.height,
                timeout_propose_event.round
            )
        };
        Box::new(logger)
    }
}

impl Logger for TimeoutWaitEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |timeout_wait_event: &TimeoutWaitEvent| {
            log::info!(
                "{}, {}, {}, {}, {:?}",
                TIMEOUT_WAIT,
                secs_since_unix_epoch(timeout_wait_event.timestamp),
                timeout_wait_event.height,
                timeout_wait_event.round,
                timeout_wait_event.step
            )
        };
        Box::new(logger)
    }
}

impl Logger for ProposeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |propose_event: &ProposeEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                PROPOSE,
                secs_since_unix_epoch(propose_event.timestamp),
                propose_event.proposal.height,
                propose_event.proposal.round,
                first_seven_base64_chars(&propose_event.proposal.block_id.hash.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveProposalEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_proposal_event: &ReceiveProposalEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                RECEIVE_PROPOSAL,
                secs_since_unix_epoch(receive_proposal_event.timestamp),
                origin(&receive_proposal_event.origin),
                receive_proposal_event.proposal.height,
                receive_proposal_event.proposal.round,
                first_seven_base64_chars(&receive_proposal_event.proposal.block_id.hash.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for CompleteProposalEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |complete_proposal_event: &CompleteProposalEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                COMPLETE_PROPOSAL,
                secs_since_unix_epoch(complete_proposal_event.timestamp),
                complete_proposal_event.height,
                complete_proposal_event.round,
                first_seven_base64_chars(&complete_proposal_event.block_id.hash.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for VoteEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |vote_event: &VoteEvent| {
            log::info!(
                "{}, {}, {}, {}, {:?}, {}",
                VOTE,
                secs_since_unix_epoch(vote_event.timestamp),
                vote_event.vote.height,
                vote_event.vote.round,
                vote_event.vote.vote_type,
                block_or_nil(&vote_event.vote.block_id)
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveVoteEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_vote_event: &ReceiveVoteEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {:?}, {}",
                RECEIVE_VOTE,
                secs_since_unix_epoch(receive_vote_event.timestamp),
                origin(&receive_vote_event.origin),
                receive_vote_event.vote.height,
                receive_vote_event.vote.round,
                receive_vote_event.vote.vote_type,
                block_or_nil(&receive_vote_event.vote.block_id)
            )
        };
        Box::new(logger)
    }
}

impl Logger for LockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |lock_event: &LockEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                LOCK,
                secs_since_unix_epoch(lock_event.timestamp),
                lock_event.height,
                lock_event.round,
                first_seven_base64_chars(&lock_event.block.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for UnlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |unlock_event: &UnlockEvent| {
            log::info!(
                "{}, {}, {}, {}",
                UNLOCK,
                secs_since_unix_epoch(unlock_event.timestamp),
                unlock_event.height,
                unlock_event.round
            )
        };
        Box::new(logger)
    }
}

impl Logger for ValidBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |valid_block_event: &ValidBlockEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                VALID_BLOCK,
                secs_since_unix_epoch(valid_block_event.timestamp),
                valid_block_event.height,
                valid_block_event.round,
                first_seven_base64_chars(&valid_block_event.block.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for CommitBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |commit_block_event: &CommitBlockEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                COMMIT_BLOCK,
                secs_since_unix_epoch(commit_block_event.timestamp),
                commit_block_event.height,
                first_seven_base64_chars(&commit_block_event.block.bytes()),
                commit_block_event.num_txs
            )
        };
        Box::new(logger)
    }
}

impl Logger for PruneBlocksEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |prune_blocks_event: &PruneBlocksEvent| {
            log::info!(
                "{}, {}, {}, {}",
                PRUNE_BLOCKS,
                secs_since_unix_epoch(prune_blocks_event.timestamp),
                prune_blocks_event.retain_height,
                prune_blocks_event.pruned
            )
        };
        Box::new(logger)
    }
}

impl Logger for EvidenceEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |evidence_event: &EvidenceEvent| {
            log::warn!(
                "{}, {}, {}, {}, {}, {}",
                EVIDENCE,
                secs_since_unix_epoch(evidence_event.timestamp),
                first_seven_base64_chars(&evidence_event.evidence.address()),
                evidence_event.evidence.height(),
                block_or_nil(&evidence_event.evidence.vote_a.block_id),
                block_or_nil(&evidence_event.evidence.vote_b.block_id)
            )
        };
        Box::new(logger)
    }
}

// Get a more readable representation of a bytesequence by base64-encoding it and taking the first 7 characters.
fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

fn origin(peer: &Option<PeerID>) -> String {
    match peer {
        Some(peer) => first_seven_base64_chars(&peer.bytes()),
        None => String::from("self"),
    }
}

fn block_or_nil(block_id: &Option<BlockID>) -> String {
    match block_id {
        Some(block_id) => first_seven_base64_chars(&block_id.hash.bytes()),
        None => String::from("nil"),
    }
}
