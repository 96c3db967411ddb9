/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The inputs of the consensus core's receive loop.
//!
//! Peer messages, internal messages (the node's own proposals, block parts, and votes) and fired
//! timeouts are kept in three bounded queues. Producers never block: when a queue is full its oldest
//! entry is dropped to make room. The receive loop takes from the queues in round-robin order, so no
//! source can starve the others.

use std::{
    collections::VecDeque,
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
};

use super::messages::{MsgInfo, TimeoutInfo};

/// Something for the receive loop to handle.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Input {
    Peer(MsgInfo),
    Internal(MsgInfo),
    Timeout(TimeoutInfo),
    TxsAvailable,
    Quit,
}

#[derive(Clone, Copy)]
enum Source {
    Internal,
    Peer,
    Timeout,
    Txs,
}

const SOURCES: [Source; 4] = [Source::Internal, Source::Peer, Source::Timeout, Source::Txs];

#[derive(Default)]
struct Queues {
    peer: VecDeque<MsgInfo>,
    internal: VecDeque<MsgInfo>,
    timeout: VecDeque<TimeoutInfo>,
    txs_available: bool,
    quit: bool,
    // Index into SOURCES of the source to try first on the next receive.
    next_source: usize,
}

impl Queues {
    fn take(&mut self, source: Source) -> Option<Input> {
        match source {
            Source::Internal => self.internal.pop_front().map(Input::Internal),
            Source::Peer => self.peer.pop_front().map(Input::Peer),
            Source::Timeout => self.timeout.pop_front().map(Input::Timeout),
            Source::Txs => {
                if self.txs_available {
                    self.txs_available = false;
                    Some(Input::TxsAvailable)
                } else {
                    None
                }
            }
        }
    }

    fn take_next(&mut self) -> Option<Input> {
        if self.quit {
            // The node's own pending messages still go through, so that they reach the WAL before
            // it stops. Everything else is left behind.
            return Some(self.internal.pop_front().map_or(Input::Quit, Input::Internal));
        }
        for offset in 0..SOURCES.len() {
            let index = (self.next_source + offset) % SOURCES.len();
            if let Some(input) = self.take(SOURCES[index]) {
                self.next_source = (index + 1) % SOURCES.len();
                return Some(input);
            }
        }
        None
    }
}

pub(crate) struct Mailbox {
    queues: Mutex<Queues>,
    available: Condvar,
    peer_capacity: usize,
    internal_capacity: usize,
}

impl Mailbox {
    pub(crate) fn new(peer_capacity: usize, internal_capacity: usize) -> Mailbox {
        Mailbox {
            queues: Mutex::new(Queues::default()),
            available: Condvar::new(),
            peer_capacity: peer_capacity.max(1),
            internal_capacity: internal_capacity.max(1),
        }
    }

    // The queues hold plain data, so a panic elsewhere cannot leave them inconsistent.
    fn lock(&self) -> MutexGuard<'_, Queues> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn push_peer(&self, msg_info: MsgInfo) {
        let mut queues = self.lock();
        if queues.peer.len() >= self.peer_capacity {
            if let Some(dropped) = queues.peer.pop_front() {
                log::debug!("Peer message queue is full, dropping {:?}", dropped.msg);
            }
        }
        queues.peer.push_back(msg_info);
        self.available.notify_one();
    }

    pub(crate) fn push_internal(&self, msg_info: MsgInfo) {
        let mut queues = self.lock();
        if queues.internal.len() >= self.internal_capacity {
            if let Some(dropped) = queues.internal.pop_front() {
                log::error!("Internal message queue is full, dropping {:?}", dropped.msg);
            }
        }
        queues.internal.push_back(msg_info);
        self.available.notify_one();
    }

    pub(crate) fn push_timeout(&self, timeout_info: TimeoutInfo) {
        let mut queues = self.lock();
        queues.timeout.push_back(timeout_info);
        self.available.notify_one();
    }

    pub(crate) fn notify_txs_available(&self) {
        let mut queues = self.lock();
        queues.txs_available = true;
        self.available.notify_one();
    }

    /// Make every subsequent receive return [`Input::Quit`], once the internal queue is empty.
    pub(crate) fn quit(&self) {
        let mut queues = self.lock();
        queues.quit = true;
        self.available.notify_all();
    }

    /// Block until there is an input.
    pub(crate) fn recv(&self) -> Input {
        let mut queues = self.lock();
        loop {
            if let Some(input) = queues.take_next() {
                return input;
            }
            queues = self
                .available
                .wait(queues)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Take an input if there is one.
    pub(crate) fn try_recv(&self) -> Option<Input> {
        self.lock().take_next()
    }

    #[cfg(test)]
    pub(crate) fn internal_len(&self) -> usize {
        self.lock().internal.len()
    }
}
