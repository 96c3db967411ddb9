/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that exist only to store bytes or numbers, and do not have any major "active" behavior.

use std::{
    fmt::{self, Debug, Display, Formatter},
    hash::Hash,
    ops::{Add, AddAssign, Sub},
    time::{Duration, SystemTime},
};

use borsh::{BorshDeserialize, BorshSerialize};
use ed25519_dalek::VerifyingKey;

/// Number that uniquely identifies a blockchain.
///
/// The `ChainID` is included in the sign bytes of every vote and proposal so that signatures made for
/// one chain can never be replayed on another chain that uses the same validator keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct ChainID(u64);

impl ChainID {
    /// Create a new `ChainID` with an `int` value.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the `u64` value of this `ChainID`.
    pub const fn int(&self) -> u64 {
        self.0
    }
}

/// Height of a block in the chain. The first block of a chain has the chain's initial height,
/// usually 1.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct Height(u64);

impl Height {
    /// Create a new `Height` with an `int` inner value.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the inner `u64` value of this `Height`.
    pub const fn int(&self) -> u64 {
        self.0
    }

    /// Get the height directly below this one, saturating at 0.
    pub fn prev(&self) -> Height {
        Height(self.0.saturating_sub(1))
    }
}

impl Display for Height {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u64> for Height {
    type Output = Height;
    fn add(self, rhs: u64) -> Self::Output {
        Height(self.0 + rhs)
    }
}

impl AddAssign<u64> for Height {
    fn add_assign(&mut self, rhs: u64) {
        self.0.add_assign(rhs)
    }
}

impl Sub<Height> for Height {
    type Output = u64;
    fn sub(self, rhs: Height) -> Self::Output {
        self.0 - rhs.0
    }
}

/// Round number within a height. Starts at 0 at every new height and increases by 1 every time the
/// validators fail to decide within a round.
///
/// "No round" (for example, a proposal without a proof-of-lock round, or a replica that is not locked)
/// is represented as `Option<Round>::None`, which orders before every `Some(round)`.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct Round(u32);

impl Round {
    /// Create a new `Round` wrapping `int`.
    pub const fn new(int: u32) -> Self {
        Self(int)
    }

    /// Get the first round of a height, which is 0.
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Get the inner `u32` of this `Round`.
    pub const fn int(&self) -> u32 {
        self.0
    }

    /// Get the round that directly follows this one.
    pub const fn next(&self) -> Round {
        Round(self.0 + 1)
    }
}

impl Display for Round {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u32> for Round {
    type Output = Round;
    fn add(self, rhs: u32) -> Self::Output {
        Round(self.0 + rhs)
    }
}

impl Sub<Round> for Round {
    type Output = u32;
    fn sub(self, rhs: Round) -> Self::Output {
        self.0 - rhs.0
    }
}

/// 32-byte cryptographic hash. Always produced by SHA256 inside this crate.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct CryptoHash([u8; 32]);

impl CryptoHash {
    /// Create a new `CryptoHash` wrapping `bytes`.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 32]` value of this `CryptoHash`.
    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl Display for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..6] {
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

impl Debug for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

/// Ed25519 digital signature.
#[derive(Clone, Copy, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct SignatureBytes([u8; 64]);

impl SignatureBytes {
    /// Create a new `SignatureBytes` wrapping `bytes`.
    pub const fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Signature placeholder carried by messages that have not been signed yet.
    pub const fn empty() -> Self {
        Self([0u8; 64])
    }

    /// Get the inner `[u8; 64]` value of this `SignatureBytes`.
    pub const fn bytes(&self) -> [u8; 64] {
        self.0
    }
}

impl Debug for SignatureBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..6] {
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

/// Bytes of an Ed25519 verifying key. Validators are identified by these bytes.
pub type VerifyingKeyBytes = [u8; 32];

/// Identity of the peer that delivered a message to the consensus core.
#[derive(Clone, Copy, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct PeerID([u8; 32]);

impl PeerID {
    /// Create a new `PeerID` wrapping `bytes`.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the inner bytes of this `PeerID`.
    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl From<&VerifyingKey> for PeerID {
    fn from(verifying_key: &VerifyingKey) -> Self {
        PeerID(verifying_key.to_bytes())
    }
}

impl Debug for PeerID {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..4] {
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

/// Weight of a specific validator's votes in consensus decisions.
///
/// The higher the power, the more weight the validator's votes have.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct Power(u64);

impl Power {
    /// Create a new `Power` wrapping `int`.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the inner `u64` value of this `Power`.
    pub const fn int(&self) -> u64 {
        self.0
    }
}

/// Sum of the [`Power`]s of a group of validators.
///
/// The inner type that this newtype wraps around is `u128`, which is bigger than inner `u64` that
/// `Power` wraps around. This is so that summing up large `Power`s do not cause `TotalPower`'s inner
/// value to overflow.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, BorshDeserialize, BorshSerialize)]
pub struct TotalPower(u128);

impl TotalPower {
    /// Create a new `TotalPower` wrapping `int`.
    pub const fn new(int: u128) -> Self {
        Self(int)
    }

    /// Get the inner `u128` value of this `TotalPower`.
    pub const fn int(&self) -> u128 {
        self.0
    }
}

impl AddAssign<Power> for TotalPower {
    fn add_assign(&mut self, rhs: Power) {
        self.0.add_assign(rhs.0 as u128)
    }
}

/// Wall-clock time in milliseconds since the Unix Epoch.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Create a new `Timestamp` from a number of milliseconds since the Unix Epoch.
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// The current time according to the system clock.
    pub fn now() -> Self {
        Self::from(SystemTime::now())
    }

    /// Get the number of milliseconds since the Unix Epoch.
    pub const fn millis(&self) -> u64 {
        self.0
    }

    /// Get this timestamp advanced by `duration`.
    pub fn plus(&self, duration: Duration) -> Timestamp {
        Timestamp(self.0.saturating_add(duration.as_millis() as u64))
    }

    /// Get the duration from `earlier` to this timestamp, or zero if `earlier` is later.
    pub fn saturating_duration_since(&self, earlier: Timestamp) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

impl From<SystemTime> for Timestamp {
    fn from(time: SystemTime) -> Self {
        let millis = time
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Timestamp(millis as u64)
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}
