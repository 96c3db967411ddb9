/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The round-based consensus core.
//!
//! One thread owns a [`state::ConsensusState`] and runs its receive loop. Proposals, block parts and
//! votes from peers, the node's own proposals and votes, and fired timeouts all reach the loop through
//! a [`mailbox`](mailbox::Mailbox), and are handled one at a time. Handling an input may move the node
//! through one or more steps of the protocol:
//!
//! ```text
//! NewHeight -> NewRound -> Propose -> Prevote -> [PrevoteWait] -> Precommit -> [PrecommitWait] -> NewRound (next round)
//!                                                                           \-> Commit -> NewHeight (next height)
//! ```
//!
//! The functions that enter each step live in [`propose`], [`vote`] and [`commit`]. Every one of them
//! is guarded by a comparison against the node's current height, round and step, so calling it again
//! for a position the node has already passed does nothing.

pub mod handle;

pub mod height_vote_set;

pub(crate) mod mailbox;

pub mod messages;

pub(crate) mod prebuild;

mod propose;

pub mod round_state;

pub mod state;

pub(crate) mod telemetry;

mod commit;

mod replay;

mod vote;

pub mod vote_set;

#[cfg(test)]
mod tests;
