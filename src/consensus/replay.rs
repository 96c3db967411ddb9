/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Recovering the progress made on the current height from the WAL after a restart.

use crate::{
    networking::network::Network,
    pluggables::{BlockExecutor, BlockStore, EvidencePool},
    types::data_types::Height,
    wal::WalSearchOptions,
};

use super::{
    messages::WalMessage,
    state::{ConsensusError, ConsensusState},
};

impl<E: BlockExecutor, B: BlockStore, P: EvidencePool, N: Network> ConsensusState<E, B, P, N> {
    /// Re-handle every message and timeout the WAL recorded for `height`, bringing the round state back
    /// to where it was before the node stopped.
    ///
    /// Fails with [`ConsensusError::WalAlreadyCommitted`] if the WAL says `height` was already
    /// committed, since the node's chain state would then be behind what it signed.
    pub(crate) fn catchup_replay(&mut self, height: Height) -> Result<(), ConsensusError> {
        self.replay_mode = true;
        let replayed = self.replay_height(height);
        self.replay_mode = false;
        replayed
    }

    fn replay_height(&mut self, height: Height) -> Result<(), ConsensusError> {
        let ignore_corruption = WalSearchOptions {
            ignore_data_corruption_errors: true,
        };
        if self.wal.search_for_end_height(height, ignore_corruption)?.is_some() {
            return Err(ConsensusError::WalAlreadyCommitted(height));
        }

        let Some(mut reader) = self
            .wal
            .search_for_end_height(height.prev(), WalSearchOptions::default())?
        else {
            return Err(ConsensusError::WalReplay(format!(
                "WAL does not contain #ENDHEIGHT for {}",
                height.prev()
            )));
        };

        log::info!("Catchup by replaying consensus messages, height {}", height);
        let mut replayed = 0;
        while let Some(record) = reader.decode()? {
            match record.msg {
                WalMessage::MsgInfo(msg_info) => self.handle_msg(msg_info)?,
                WalMessage::TimeoutInfo(timeout_info) => self.handle_timeout(timeout_info)?,
                WalMessage::RoundState(event) => log::debug!("Replay: {}", event),
                WalMessage::EndHeight(_) => (),
            }
            replayed += 1;
        }
        log::info!("Replay: done, {} records, at {}", replayed, self.rs.event());
        Ok(())
    }
}
