/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that are used across multiple components of the consensus core.
//!
//! Types specific to a single component, e.g., the messages stored in the write-ahead log, can be found
//! in that component's module, e.g., [`crate::consensus::messages`].

pub mod data_types;

pub mod crypto_primitives;

pub mod signed_messages;

pub mod validator_set;

pub mod merkle;

pub mod part_set;

pub mod block;

pub mod vote;

pub mod proposal;

pub mod evidence;

pub mod commit;

pub mod chain_state;
