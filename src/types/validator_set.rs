/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that store information about validator sets and select the proposer of each round.

use borsh::{BorshDeserialize, BorshSerialize};

use super::data_types::{Power, TotalPower, VerifyingKeyBytes};

pub use ed25519_dalek::{SigningKey, VerifyingKey};

/// The spread between the highest and lowest proposer priority is kept below this factor times the
/// total power.
const PRIORITY_WINDOW_SIZE_FACTOR: i64 = 2;

/// A single member of a [`ValidatorSet`].
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Validator {
    pub address: VerifyingKeyBytes,
    pub power: Power,
    pub proposer_priority: i64,
}

impl Validator {
    pub fn new(verifying_key: &VerifyingKey, power: Power) -> Validator {
        Validator {
            address: verifying_key.to_bytes(),
            power,
            proposer_priority: 0,
        }
    }

    // Higher priority wins. Ties are broken in favour of the lower address.
    fn outranks(&self, other: &Validator) -> bool {
        match self.proposer_priority.cmp(&other.proposer_priority) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => self.address < other.address,
        }
    }
}

/// Stores the identities of validators, their voting powers, and their proposer priorities.
///
/// ## Ordering of validators
///
/// `ValidatorSet` internally maintains the list of validators in ascending order of their verifying
/// key bytes. The position of a validator in this order is its "validator index", which is carried
/// in every vote it signs.
///
/// ## Proposer selection
///
/// The proposer of each round is chosen by weighted round-robin: every time the set is advanced by
/// one round, every validator's priority grows by its power, the validator with the highest priority
/// becomes the proposer, and its priority is reduced by the total power. Over many rounds each
/// validator proposes in proportion to its power.
///
/// ## Limits to total power
///
/// Users must make sure that the total power of the validator set does not exceed `i64::MAX / 8`.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ValidatorSet {
    validators: Vec<Validator>,
    proposer: Option<u32>,
}

impl ValidatorSet {
    /// Create a validator set from `validators_and_powers` and select its first proposer.
    pub fn new(validators_and_powers: impl IntoIterator<Item = (VerifyingKey, Power)>) -> ValidatorSet {
        let mut validators: Vec<Validator> = validators_and_powers
            .into_iter()
            .map(|(verifying_key, power)| Validator::new(&verifying_key, power))
            .collect();
        validators.sort_by(|a, b| a.address.cmp(&b.address));
        validators.dedup_by(|a, b| a.address == b.address);

        let mut validator_set = ValidatorSet {
            validators,
            proposer: None,
        };
        if !validator_set.is_empty() {
            validator_set.increment_proposer_priority(1);
        }
        validator_set
    }

    /// Get the number of validators in the validator set.
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// Check whether the validator set is empty (i.e., `self.len() == 0`).
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Get an iterator through the validators in ascending order of their addresses.
    pub fn validators(&self) -> std::slice::Iter<'_, Validator> {
        self.validators.iter()
    }

    /// Get the validator at `index`.
    pub fn get_by_index(&self, index: u32) -> Option<&Validator> {
        self.validators.get(index as usize)
    }

    /// Get the index and the validator that has `address`.
    pub fn get_by_address(&self, address: &VerifyingKeyBytes) -> Option<(u32, &Validator)> {
        self.validators
            .binary_search_by(|v| v.address.cmp(address))
            .ok()
            .map(|pos| (pos as u32, &self.validators[pos]))
    }

    /// Check whether the validator set contains `address`.
    pub fn has_address(&self, address: &VerifyingKeyBytes) -> bool {
        self.get_by_address(address).is_some()
    }

    /// Get the sum of the powers of all of the validators inside the validator set.
    pub fn total_power(&self) -> TotalPower {
        let mut total_power = TotalPower::new(0);
        for validator in &self.validators {
            total_power += validator.power
        }
        total_power
    }

    /// Compute the total power that a set of votes must match or exceed (`>=`) in order to count as
    /// more than two thirds of the validator set.
    pub fn quorum(&self) -> TotalPower {
        TotalPower::new(self.total_power().int() * 2 / 3 + 1)
    }

    /// Get the proposer of the current round.
    ///
    /// # Panics
    ///
    /// Panics if the validator set is empty.
    pub fn proposer(&self) -> &Validator {
        match self.proposer {
            Some(index) => &self.validators[index as usize],
            None => &self.validators[self.find_proposer() as usize],
        }
    }

    /// Check whether `address` belongs to the proposer of the current round.
    pub fn is_proposer(&self, address: &VerifyingKeyBytes) -> bool {
        !self.is_empty() && &self.proposer().address == address
    }

    /// Advance proposer selection by `times` rounds.
    pub fn increment_proposer_priority(&mut self, times: u32) {
        if self.is_empty() || times == 0 {
            return;
        }

        let diff_max = PRIORITY_WINDOW_SIZE_FACTOR * self.total_power_i64();
        self.rescale_priorities(diff_max);
        self.shift_by_avg_proposer_priority();

        let mut proposer = 0;
        for _ in 0..times {
            proposer = self.increment_proposer_priority_once();
        }
        self.proposer = Some(proposer);
    }

    /// Get a copy of this validator set with proposer selection advanced by `times` rounds.
    pub fn copy_increment_proposer_priority(&self, times: u32) -> ValidatorSet {
        let mut copy = self.clone();
        copy.increment_proposer_priority(times);
        copy
    }

    /// Make the validator with `address` the proposer of the current round, without touching
    /// priorities. Returns false if there is no such validator.
    pub fn set_proposer(&mut self, address: &VerifyingKeyBytes) -> bool {
        match self.get_by_address(address) {
            Some((index, _)) => {
                self.proposer = Some(index);
                true
            }
            None => false,
        }
    }

    /// Whether `other` has the same validators with the same powers, ignoring proposer priorities.
    pub fn same_members(&self, other: &ValidatorSet) -> bool {
        self.validators.len() == other.validators.len()
            && self
                .validators
                .iter()
                .zip(other.validators.iter())
                .all(|(a, b)| a.address == b.address && a.power == b.power)
    }

    fn increment_proposer_priority_once(&mut self) -> u32 {
        for validator in self.validators.iter_mut() {
            validator.proposer_priority = validator
                .proposer_priority
                .saturating_add(validator.power.int() as i64);
        }
        let proposer = self.find_proposer();
        let total = self.total_power_i64();
        let validator = &mut self.validators[proposer as usize];
        validator.proposer_priority = validator.proposer_priority.saturating_sub(total);
        proposer
    }

    fn find_proposer(&self) -> u32 {
        let mut most = 0;
        for (i, validator) in self.validators.iter().enumerate().skip(1) {
            if validator.outranks(&self.validators[most]) {
                most = i;
            }
        }
        most as u32
    }

    fn rescale_priorities(&mut self, diff_max: i64) {
        if diff_max <= 0 {
            return;
        }
        let max = self.validators.iter().map(|v| v.proposer_priority).max().unwrap_or(0);
        let min = self.validators.iter().map(|v| v.proposer_priority).min().unwrap_or(0);
        let diff = max.saturating_sub(min);
        if diff > diff_max {
            let ratio = (diff + diff_max - 1) / diff_max;
            for validator in self.validators.iter_mut() {
                validator.proposer_priority /= ratio;
            }
        }
    }

    fn shift_by_avg_proposer_priority(&mut self) {
        let n = self.validators.len() as i128;
        let sum: i128 = self.validators.iter().map(|v| v.proposer_priority as i128).sum();
        let avg = (sum / n) as i64;
        for validator in self.validators.iter_mut() {
            validator.proposer_priority = validator.proposer_priority.saturating_sub(avg);
        }
    }

    fn total_power_i64(&self) -> i64 {
        self.total_power().int() as i64
    }
}
