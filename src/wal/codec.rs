/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Framing of write-ahead log records.
//!
//! Every record is laid out as:
//!
//! ```text
//! | checksum (4 bytes) | length (4 bytes, big endian) | data (length bytes) |
//! ```
//!
//! where `data` is the Borsh encoding of a [`TimedWalMessage`] and `checksum` is the first four bytes
//! of the SHA256 hash of `data`.

use std::io::{self, Read, Write};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{consensus::messages::TimedWalMessage, types::crypto_primitives::hash};

use super::WalError;

/// Records whose data is larger than this are refused by the encoder and treated as corrupt by the
/// decoder.
pub const MAX_MSG_SIZE_BYTES: usize = 1024 * 1024;

fn checksum(data: &[u8]) -> [u8; 4] {
    let digest = hash(data).bytes();
    [digest[0], digest[1], digest[2], digest[3]]
}

/// Writes framed records to an underlying writer.
pub struct WalEncoder<W: Write> {
    writer: W,
}

impl<W: Write> WalEncoder<W> {
    pub fn new(writer: W) -> WalEncoder<W> {
        WalEncoder { writer }
    }

    /// Encode `msg` and write it out as a single record. Returns the number of bytes written.
    pub fn encode(&mut self, msg: &TimedWalMessage) -> Result<usize, WalError> {
        let data = msg.try_to_vec().map_err(WalError::Io)?;
        if data.len() > MAX_MSG_SIZE_BYTES {
            return Err(WalError::MsgTooBig {
                size: data.len(),
                max: MAX_MSG_SIZE_BYTES,
            });
        }

        let mut record = Vec::with_capacity(8 + data.len());
        record.extend_from_slice(&checksum(&data));
        record.extend_from_slice(&(data.len() as u32).to_be_bytes());
        record.extend_from_slice(&data);
        self.writer.write_all(&record)?;
        Ok(record.len())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Reads framed records from an underlying reader.
///
/// A reader that ends exactly on a record boundary yields `Ok(None)`. Anything else that prevents a
/// record from being read back as written is reported as [`WalError::DataCorruption`].
pub struct WalDecoder<R: Read> {
    reader: R,
}

impl<R: Read> WalDecoder<R> {
    pub fn new(reader: R) -> WalDecoder<R> {
        WalDecoder { reader }
    }

    pub fn decode(&mut self) -> Result<Option<TimedWalMessage>, WalError> {
        let mut checksum_bytes = [0u8; 4];
        match read_full(&mut self.reader, &mut checksum_bytes)? {
            0 => return Ok(None),
            4 => (),
            n => {
                return Err(WalError::DataCorruption(format!(
                    "failed to read checksum: got {} of 4 bytes",
                    n
                )))
            }
        }

        let mut length_bytes = [0u8; 4];
        let n = read_full(&mut self.reader, &mut length_bytes)?;
        if n != 4 {
            return Err(WalError::DataCorruption(format!(
                "failed to read length: got {} of 4 bytes",
                n
            )));
        }
        let length = u32::from_be_bytes(length_bytes) as usize;
        if length > MAX_MSG_SIZE_BYTES {
            return Err(WalError::DataCorruption(format!(
                "length {} exceeded maximum possible value of {} bytes",
                length, MAX_MSG_SIZE_BYTES
            )));
        }

        let mut data = vec![0u8; length];
        let n = read_full(&mut self.reader, &mut data)?;
        if n != length {
            return Err(WalError::DataCorruption(format!(
                "failed to read data: got {} of {} bytes",
                n, length
            )));
        }

        if checksum(&data) != checksum_bytes {
            return Err(WalError::DataCorruption(String::from("checksums do not match")));
        }

        TimedWalMessage::try_from_slice(&data)
            .map(Some)
            .map_err(|err| WalError::DataCorruption(format!("failed to decode data: {}", err)))
    }
}

// Fill as much of `buf` as possible, stopping early only at end of input.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        consensus::{
            messages::{TimeoutInfo, WalMessage},
            round_state::RoundStep,
        },
        types::data_types::{Height, Round, Timestamp},
    };

    #[test]
    fn records_decode_as_written() {
        let msgs = vec![
            TimedWalMessage {
                time: Timestamp::from_millis(1_700_000_000_000),
                msg: WalMessage::EndHeight(Height::new(0)),
            },
            TimedWalMessage {
                time: Timestamp::from_millis(1_700_000_000_001),
                msg: WalMessage::TimeoutInfo(TimeoutInfo::new(
                    Duration::from_secs(1),
                    Height::new(1),
                    Round::new(1),
                    RoundStep::Propose,
                )),
            },
        ];

        let mut encoder = WalEncoder::new(Vec::new());
        for msg in &msgs {
            encoder.encode(msg).unwrap();
        }
        let bytes = encoder.into_inner();

        let mut decoder = WalDecoder::new(bytes.as_slice());
        for msg in &msgs {
            assert_eq!(decoder.decode().unwrap().as_ref(), Some(msg));
        }
        assert!(decoder.decode().unwrap().is_none());
    }

    #[test]
    fn corrupted_records_are_detected() {
        let msg = TimedWalMessage::now(WalMessage::EndHeight(Height::new(3)));
        let mut encoder = WalEncoder::new(Vec::new());
        encoder.encode(&msg).unwrap();
        let bytes = encoder.into_inner();

        let mut flipped = bytes.clone();
        let last = flipped.len() - 1;
        flipped[last] ^= 0xFF;
        assert!(matches!(
            WalDecoder::new(flipped.as_slice()).decode(),
            Err(WalError::DataCorruption(_))
        ));

        let truncated = &bytes[..bytes.len() - 2];
        assert!(matches!(
            WalDecoder::new(truncated).decode(),
            Err(WalError::DataCorruption(_))
        ));

        let mut huge_length = bytes;
        huge_length[4..8].copy_from_slice(&u32::MAX.to_be_bytes());
        assert!(matches!(
            WalDecoder::new(huge_length.as_slice()).decode(),
            Err(WalError::DataCorruption(_))
        ));
    }
}
