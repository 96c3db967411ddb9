/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The write-ahead log (WAL) of the consensus core.
//!
//! Every message that could change the consensus state is written to the WAL before (for messages the
//! node generates itself) or as (for messages from peers) it takes effect. After a crash, the node
//! finds the end of the last committed height with [`Wal::search_for_end_height`] and replays the
//! records after it to return to where it was.
//!
//! ## Durability
//!
//! [`Wal::write`] hands the record to the operating system. [`Wal::write_sync`] additionally waits
//! until the record is on disk, and is used for records whose loss could make the node sign
//! conflicting messages after a restart.
//!
//! ## Layout
//!
//! The WAL is a [`Group`] of segment files named after the configured path, see [`group`]. Records are
//! framed as described in [`codec`].

pub mod codec;

pub mod group;

use std::{
    fmt::{self, Display, Formatter},
    fs::{self, OpenOptions},
    io,
    path::Path,
};

use crate::{
    consensus::messages::{TimedWalMessage, WalMessage},
    types::data_types::Height,
};

use self::{
    codec::{WalDecoder, WalEncoder},
    group::{Group, GroupReader},
};

/// Head size at which the WAL rotates to a new segment, unless configured otherwise.
pub const DEFAULT_HEAD_SIZE_LIMIT: u64 = 10 * 1024 * 1024;

#[derive(Debug)]
pub enum WalError {
    Io(io::Error),
    MsgTooBig { size: usize, max: usize },
    /// A record could not be read back as it was written.
    DataCorruption(String),
    Stopped,
}

impl Display for WalError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            WalError::Io(err) => write!(f, "WAL I/O error: {}", err),
            WalError::MsgTooBig { size, max } => {
                write!(f, "msg is too big: {} bytes, max: {} bytes", size, max)
            }
            WalError::DataCorruption(reason) => write!(f, "WAL data corruption: {}", reason),
            WalError::Stopped => write!(f, "WAL is stopped"),
        }
    }
}

impl From<io::Error> for WalError {
    fn from(value: io::Error) -> Self {
        WalError::Io(value)
    }
}

impl WalError {
    pub fn is_data_corruption(&self) -> bool {
        matches!(self, WalError::DataCorruption(_))
    }
}

/// A decoder positioned right after an `EndHeight` record.
pub type WalReader = WalDecoder<GroupReader>;

/// Options for [`Wal::search_for_end_height`].
#[derive(Clone, Copy, Debug, Default)]
pub struct WalSearchOptions {
    /// Skip over corrupted records instead of failing the search.
    pub ignore_data_corruption_errors: bool,
}

/// The operations the consensus core needs from a write-ahead log.
pub trait Wal: Send {
    /// Append `msg`. The record may not yet be on disk when this returns.
    fn write(&mut self, msg: WalMessage) -> Result<(), WalError>;

    /// Append `msg` and wait until it is on disk.
    fn write_sync(&mut self, msg: WalMessage) -> Result<(), WalError>;

    fn flush_and_sync(&mut self) -> Result<(), WalError>;

    /// Find the `EndHeight(height)` record, searching the newest segments first. Returns a reader
    /// positioned at the record right after it, or `None` if there is no such record.
    fn search_for_end_height(
        &self,
        height: Height,
        options: WalSearchOptions,
    ) -> Result<Option<WalReader>, WalError>;

    fn stop(&mut self) -> Result<(), WalError>;
}

/// A [`Wal`] stored in a [`Group`] of files.
pub struct BaseWal {
    group: Group,
    stopped: bool,
}

impl BaseWal {
    /// Open the WAL at `path`, creating it if needed. A new WAL starts with an `EndHeight(0)` record
    /// so that the first height can be replayed like any other.
    pub fn open(path: impl AsRef<Path>, head_size_limit: u64) -> Result<BaseWal, WalError> {
        Self::open_with_total_limit(path, head_size_limit, 0)
    }

    pub fn open_with_total_limit(
        path: impl AsRef<Path>,
        head_size_limit: u64,
        total_size_limit: u64,
    ) -> Result<BaseWal, WalError> {
        let group = Group::open(path, head_size_limit, total_size_limit)?;
        let mut wal = BaseWal {
            group,
            stopped: false,
        };
        if wal.group.is_empty() {
            wal.write_sync(WalMessage::EndHeight(Height::new(0)))?;
        }
        Ok(wal)
    }

    pub fn group(&self) -> &Group {
        &self.group
    }
}

impl Wal for BaseWal {
    fn write(&mut self, msg: WalMessage) -> Result<(), WalError> {
        if self.stopped {
            return Err(WalError::Stopped);
        }
        WalEncoder::new(&mut self.group).encode(&TimedWalMessage::now(msg))?;
        self.group.maybe_rotate()?;
        Ok(())
    }

    fn write_sync(&mut self, msg: WalMessage) -> Result<(), WalError> {
        self.write(msg)?;
        self.flush_and_sync()
    }

    fn flush_and_sync(&mut self) -> Result<(), WalError> {
        Ok(self.group.sync()?)
    }

    fn search_for_end_height(
        &self,
        height: Height,
        options: WalSearchOptions,
    ) -> Result<Option<WalReader>, WalError> {
        // Newer segments are more likely to hold recent heights.
        for index in (self.group.min_index()..=self.group.max_index()).rev() {
            log::debug!("Searching for height {} in WAL segment {}", height, index);
            let mut decoder = WalDecoder::new(self.group.new_reader(index));
            let mut last_height_found = None;
            loop {
                let msg = match decoder.decode() {
                    Ok(Some(msg)) => msg,
                    Ok(None) => break,
                    Err(err) if err.is_data_corruption() && options.ignore_data_corruption_errors => {
                        log::error!("Corrupted entry while searching the WAL, skipping: {}", err);
                        continue;
                    }
                    Err(err) => return Err(err),
                };
                if let WalMessage::EndHeight(found) = msg.msg {
                    if found == height {
                        log::debug!("Found EndHeight({}) in WAL segment {}", height, index);
                        return Ok(Some(decoder));
                    }
                    last_height_found = Some(found);
                }
            }
            // Segments only get older from here.
            if matches!(last_height_found, Some(found) if found > Height::new(0) && found < height) {
                return Ok(None);
            }
        }
        Ok(None)
    }

    fn stop(&mut self) -> Result<(), WalError> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        self.flush_and_sync()
    }
}

/// Copy the records of the WAL at `corrupted` that come before its first corrupted record into a new
/// single-segment WAL at `repaired`, which must not exist yet. Returns the number of records kept.
pub fn repair(corrupted: impl AsRef<Path>, repaired: impl AsRef<Path>) -> Result<usize, WalError> {
    let group = Group::open(corrupted, DEFAULT_HEAD_SIZE_LIMIT, 0)?;
    let mut decoder = WalDecoder::new(group.new_reader(group.min_index()));

    let repaired = repaired.as_ref();
    if let Some(dir) = repaired.parent() {
        fs::create_dir_all(dir)?;
    }
    let file = OpenOptions::new().write(true).create_new(true).open(repaired)?;
    let mut encoder = WalEncoder::new(file);

    let mut kept = 0;
    loop {
        match decoder.decode() {
            Ok(Some(msg)) => {
                encoder.encode(&msg)?;
                kept += 1;
            }
            Ok(None) => break,
            Err(err) if err.is_data_corruption() => {
                log::warn!("Dropping the WAL from record {} on: {}", kept, err);
                break;
            }
            Err(err) => return Err(err),
        }
    }
    encoder.into_inner().sync_all()?;
    Ok(kept)
}

/// A [`Wal`] that stores nothing, for nodes that do not need crash recovery.
#[derive(Default)]
pub struct NilWal;

impl Wal for NilWal {
    fn write(&mut self, _: WalMessage) -> Result<(), WalError> {
        Ok(())
    }

    fn write_sync(&mut self, _: WalMessage) -> Result<(), WalError> {
        Ok(())
    }

    fn flush_and_sync(&mut self) -> Result<(), WalError> {
        Ok(())
    }

    fn search_for_end_height(&self, _: Height, _: WalSearchOptions) -> Result<Option<WalReader>, WalError> {
        Ok(None)
    }

    fn stop(&mut self) -> Result<(), WalError> {
        Ok(())
    }
}
