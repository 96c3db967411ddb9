/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Counters that describe how the proposal block of a height reached this node.

use std::time::{Duration, Instant};

use crate::types::data_types::Height;

/// Block-part propagation statistics for the height the node is deciding on.
///
/// Reset at every new height, at which point a summary of the previous height is logged.
#[derive(Debug, Default)]
pub(crate) struct BlockTransport {
    pub(crate) height: Height,
    pub(crate) dropped_wrong_height: u64,
    pub(crate) dropped_not_expected: u64,
    pub(crate) dropped_error: u64,
    pub(crate) dropped_not_added: u64,
    /// Parts that the node received for this height, whatever became of them.
    pub(crate) total_parts: u64,
    started: Option<Instant>,
    first_part_latency: Option<Duration>,
    proposal_latency: Option<Duration>,
}

impl BlockTransport {
    /// Start collecting for `height`, returning the statistics of the previous height.
    pub(crate) fn reset(&mut self, height: Height) -> BlockTransport {
        let previous = std::mem::take(self);
        self.height = height;
        self.started = Some(Instant::now());
        if previous.started.is_some() {
            log::info!("{}", previous.summary());
        }
        previous
    }

    pub(crate) fn on_part_received(&mut self) {
        self.total_parts += 1;
    }

    pub(crate) fn on_proposal(&mut self, height: Height) {
        if height == self.height && self.proposal_latency.is_none() {
            self.proposal_latency = self.started.map(|started| started.elapsed());
        }
    }

    pub(crate) fn on_first_part(&mut self, height: Height) {
        if height == self.height && self.first_part_latency.is_none() {
            self.first_part_latency = self.started.map(|started| started.elapsed());
        }
    }

    pub(crate) fn first_part_latency(&self) -> Option<Duration> {
        self.first_part_latency
    }

    pub(crate) fn proposal_latency(&self) -> Option<Duration> {
        self.proposal_latency
    }

    fn summary(&self) -> String {
        format!(
            "BlockTransport, {}, {}|{}|{}|{}/{}, {}, {}",
            self.height,
            self.dropped_wrong_height,
            self.dropped_not_expected,
            self.dropped_error,
            self.dropped_not_added,
            self.total_parts,
            millis_or_dash(self.proposal_latency),
            millis_or_dash(self.first_part_latency),
        )
    }
}

fn millis_or_dash(latency: Option<Duration>) -> String {
    match latency {
        Some(latency) => latency.as_millis().to_string(),
        None => String::from("-"),
    }
}
