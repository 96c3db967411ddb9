/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A round-based Byzantine fault tolerant consensus core in the Tendermint family, with a
//! crash-recovery write-ahead log.
//!
//! Validators agree on one block per height. Each height runs one or more rounds of propose,
//! prevote and precommit, and commits once +2/3 of the voting power precommits the same block. The
//! library user supplies how blocks are built and executed ([`pluggables`]), how messages travel
//! between replicas ([`networking`]), and how the validator's key signs ([`priv_validator`]); this
//! crate drives the protocol. Start with [`replica`].

pub mod consensus;

pub(crate) mod event_bus;

pub mod events;

pub mod logging;

pub mod networking;

pub mod pluggables;

pub mod priv_validator;

pub mod replica;

pub(crate) mod timeout_ticker;

pub mod types;

pub mod wal;
