/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions for receiving messages from the P2P network.

use std::{
    sync::{
        mpsc::{Receiver, TryRecvError},
        Arc,
    },
    thread::{self, JoinHandle},
};

use crate::{
    consensus::{mailbox::Mailbox, messages::MsgInfo},
    types::data_types::PeerID,
};

use super::network::Network;

/// Spawn the poller thread, which polls the [`Network`] for messages and puts them into the consensus
/// core's peer queue.
///
/// If `txs_available` is given, the poller also forwards the mempool's "transactions available"
/// signals to the core.
pub(crate) fn start_polling<N: Network + 'static>(
    mut network: N,
    mailbox: Arc<Mailbox>,
    txs_available: Option<Receiver<()>>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut txs_available = txs_available;
        loop {
            match shutdown_signal.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => return,
                Err(TryRecvError::Empty) => (),
            }

            let mut idle = true;

            if let Some(signals) = &txs_available {
                match signals.try_recv() {
                    Ok(()) => {
                        mailbox.notify_txs_available();
                        idle = false;
                    }
                    Err(TryRecvError::Empty) => (),
                    Err(TryRecvError::Disconnected) => {
                        log::debug!("Transaction notifier disconnected");
                        txs_available = None;
                    }
                }
            }

            if let Some((origin, msg)) = network.recv() {
                mailbox.push_peer(MsgInfo::from_peer(msg, PeerID::from(&origin)));
                idle = false;
            }

            if idle {
                thread::yield_now()
            }
        }
    })
}
