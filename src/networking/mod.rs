/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pluggable peer-to-peer (P2P) networking.
//!
//! The consensus core does not gossip by itself. It hands the messages it produces to a
//! [`Network`](network::Network) implementation provided by the library user, and a poller thread
//! feeds the messages that the network receives into the core's mailbox.

pub mod network;

pub(crate) mod receiving;

pub(crate) mod sending;
