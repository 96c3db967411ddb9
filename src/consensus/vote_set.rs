/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Tallies of the prevotes or precommits of a single height and round.
//!
//! A [`VoteSet`] keeps at most one vote per validator in its main tally. If a validator signs two
//! different votes, the second vote is reported as a [`VoteSetError::ConflictingVotes`] so that the
//! caller can turn the pair into evidence. Conflicting votes are still tallied under their block if a
//! peer has claimed that the block has more than two thirds of the votes (see
//! [`set_peer_maj23`](VoteSet::set_peer_maj23)), which lets the node catch up to a majority that
//! formed among votes it first saw from the "wrong side" of an equivocation.

use std::{
    collections::HashMap,
    fmt::{self, Display, Formatter},
};

use crate::types::{
    block::BlockID,
    commit::{Commit, CommitSig},
    data_types::{ChainID, Height, PeerID, Round, TotalPower},
    part_set::PartSetError,
    signed_messages::SignedMessage,
    validator_set::{Validator, ValidatorSet},
    vote::{Vote, VoteType},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteSetError {
    WrongHeightRoundType {
        height: Height,
        round: Round,
        vote_type: VoteType,
    },
    InvalidValidatorIndex(u32),
    InvalidValidatorAddress { index: u32 },
    InvalidSignature { index: u32 },
    /// The validator signed two different votes for the same value.
    NonDeterministicSignature { index: u32 },
    /// The validator already has a different vote in this set. `added` tells whether `conflicting`
    /// was nevertheless tallied because a peer claimed a majority for its block.
    ConflictingVotes {
        existing: Box<Vote>,
        conflicting: Box<Vote>,
        added: bool,
    },
    ConflictingPeerMaj23 { peer: PeerID },
    /// The vote names a block whose part set header no block could have.
    InvalidBlockID(PartSetError),
}

// Votes for one particular block (or for nil).
#[derive(Clone)]
struct BlockVotes {
    peer_maj23: bool,
    votes: Vec<Option<Vote>>,
    sum: TotalPower,
}

impl BlockVotes {
    fn new(peer_maj23: bool, num_validators: usize) -> BlockVotes {
        BlockVotes {
            peer_maj23,
            votes: vec![None; num_validators],
            sum: TotalPower::new(0),
        }
    }

    fn add_verified_vote(&mut self, vote: Vote, validator: &Validator) {
        let index = vote.validator_index as usize;
        if self.votes[index].is_none() {
            self.sum += validator.power;
            self.votes[index] = Some(vote);
        }
    }
}

/// The votes of one type for one `(height, round)`.
#[derive(Clone)]
pub struct VoteSet {
    chain_id: ChainID,
    height: Height,
    round: Round,
    vote_type: VoteType,
    validators: ValidatorSet,
    votes: Vec<Option<Vote>>,
    sum: TotalPower,
    maj23: Option<Option<BlockID>>,
    votes_by_block: HashMap<Option<BlockID>, BlockVotes>,
    peer_maj23s: HashMap<PeerID, Option<BlockID>>,
}

impl VoteSet {
    pub fn new(
        chain_id: ChainID,
        height: Height,
        round: Round,
        vote_type: VoteType,
        validators: ValidatorSet,
    ) -> VoteSet {
        let num_validators = validators.len();
        VoteSet {
            chain_id,
            height,
            round,
            vote_type,
            validators,
            votes: vec![None; num_validators],
            sum: TotalPower::new(0),
            maj23: None,
            votes_by_block: HashMap::new(),
            peer_maj23s: HashMap::new(),
        }
    }

    pub fn height(&self) -> Height {
        self.height
    }

    pub fn round(&self) -> Round {
        self.round
    }

    pub fn vote_type(&self) -> VoteType {
        self.vote_type
    }

    pub fn size(&self) -> usize {
        self.validators.len()
    }

    /// Total power of the validators whose votes are in the main tally.
    pub fn sum(&self) -> TotalPower {
        self.sum
    }

    /// Add a signed vote.
    ///
    /// Returns `Ok(true)` if the vote was added, `Ok(false)` if the exact same vote was already present.
    pub fn add_vote(&mut self, vote: Vote) -> Result<bool, VoteSetError> {
        if vote.height != self.height || vote.round != self.round || vote.vote_type != self.vote_type {
            return Err(VoteSetError::WrongHeightRoundType {
                height: vote.height,
                round: vote.round,
                vote_type: vote.vote_type,
            });
        }

        if let Some(block_id) = &vote.block_id {
            block_id.parts_header.validate_basic().map_err(VoteSetError::InvalidBlockID)?;
        }

        let index = vote.validator_index;
        let Some(validator) = self.validators.get_by_index(index).cloned() else {
            return Err(VoteSetError::InvalidValidatorIndex(index));
        };
        if validator.address != vote.validator_address {
            return Err(VoteSetError::InvalidValidatorAddress { index });
        }

        if let Some(existing) = self.get_vote(index, &vote.block_id) {
            if existing.signature == vote.signature {
                return Ok(false);
            }
            return Err(VoteSetError::NonDeterministicSignature { index });
        }

        if !vote.is_correct(self.chain_id, &validator.address) {
            return Err(VoteSetError::InvalidSignature { index });
        }

        let (added, conflicting) = self.add_verified_vote(vote.clone(), &validator);
        match conflicting {
            Some(existing) => Err(VoteSetError::ConflictingVotes {
                existing: Box::new(existing),
                conflicting: Box::new(vote),
                added,
            }),
            None => Ok(added),
        }
    }

    fn get_vote(&self, index: u32, block_id: &Option<BlockID>) -> Option<&Vote> {
        if let Some(Some(vote)) = self.votes.get(index as usize) {
            if &vote.block_id == block_id {
                return Some(vote);
            }
        }
        self.votes_by_block
            .get(block_id)
            .and_then(|block_votes| block_votes.votes[index as usize].as_ref())
    }

    fn add_verified_vote(
        &mut self,
        vote: Vote,
        validator: &Validator,
    ) -> (bool, Option<Vote>) {
        let index = vote.validator_index as usize;
        let block_key = vote.block_id;

        let conflicting = self.votes[index].clone();
        match &conflicting {
            // Only a vote for the majority block may replace the validator's entry.
            Some(_) if self.maj23 == Some(block_key) => self.votes[index] = Some(vote.clone()),
            Some(_) => (),
            None => {
                self.votes[index] = Some(vote.clone());
                self.sum += validator.power;
            }
        }

        // Conflicting votes are only tallied under blocks that a peer claims have a majority.
        let peer_maj23 = self.votes_by_block.get(&block_key).map(|block_votes| block_votes.peer_maj23);
        if conflicting.is_some() && peer_maj23 != Some(true) {
            return (false, conflicting);
        }

        let num_validators = self.validators.len();
        let quorum = self.validators.quorum();
        let block_votes = self
            .votes_by_block
            .entry(block_key)
            .or_insert_with(|| BlockVotes::new(false, num_validators));
        let original_sum = block_votes.sum;
        block_votes.add_verified_vote(vote, validator);

        if original_sum < quorum && quorum <= block_votes.sum && self.maj23.is_none() {
            self.maj23 = Some(block_key);
            // The majority's votes take precedence over any conflicting votes in the main tally.
            for (i, block_vote) in block_votes.votes.iter().enumerate() {
                if let Some(block_vote) = block_vote {
                    self.votes[i] = Some(block_vote.clone());
                }
            }
        }

        (true, conflicting)
    }

    /// Record a peer's claim that `block_id` has more than two thirds of the votes in this set, so
    /// that conflicting votes for it are tallied.
    pub fn set_peer_maj23(&mut self, peer: PeerID, block_id: Option<BlockID>) -> Result<(), VoteSetError> {
        if let Some(existing) = self.peer_maj23s.get(&peer) {
            if existing == &block_id {
                return Ok(());
            }
            return Err(VoteSetError::ConflictingPeerMaj23 { peer });
        }
        self.peer_maj23s.insert(peer, block_id);

        let num_validators = self.validators.len();
        let block_votes = self
            .votes_by_block
            .entry(block_id)
            .or_insert_with(|| BlockVotes::new(true, num_validators));
        block_votes.peer_maj23 = true;
        Ok(())
    }

    /// The vote of the validator at `index` in the main tally.
    pub fn get_by_index(&self, index: u32) -> Option<&Vote> {
        self.votes.get(index as usize).and_then(|vote| vote.as_ref())
    }

    /// If some value (a block, or nil) received more than two thirds of the voting power, that value.
    pub fn two_thirds_majority(&self) -> Option<Option<BlockID>> {
        self.maj23
    }

    pub fn has_two_thirds_majority(&self) -> bool {
        self.maj23.is_some()
    }

    /// Whether more than two thirds of the voting power voted, for any mix of values.
    pub fn has_two_thirds_any(&self) -> bool {
        self.sum >= self.validators.quorum()
    }

    pub fn has_all(&self) -> bool {
        self.sum == self.validators.total_power()
    }

    /// Build the [`Commit`] for the block that more than two thirds of the precommits in this set are
    /// for. Returns `None` if this is not a precommit set or there is no such block.
    pub fn make_commit(&self) -> Option<Commit> {
        if self.vote_type != VoteType::Precommit {
            return None;
        }
        let block_id = self.maj23??;

        let signatures = self
            .votes
            .iter()
            .map(|vote| match vote {
                None => CommitSig::Absent,
                Some(vote) => match vote.block_id {
                    Some(voted) if voted == block_id => CommitSig::ForBlock {
                        validator_address: vote.validator_address,
                        timestamp: vote.timestamp,
                        signature: vote.signature,
                    },
                    Some(_) => CommitSig::Absent,
                    None => CommitSig::Nil {
                        validator_address: vote.validator_address,
                        timestamp: vote.timestamp,
                        signature: vote.signature,
                    },
                },
            })
            .collect();

        Some(Commit {
            height: self.height,
            round: self.round,
            block_id,
            signatures,
        })
    }
}

impl Display for VoteSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let voted = self.votes.iter().filter(|vote| vote.is_some()).count();
        let maj23 = match &self.maj23 {
            Some(Some(block_id)) => block_id.hash.to_string(),
            Some(None) => String::from("nil"),
            None => String::from("-"),
        };
        write!(
            f,
            "VoteSet{{{}/{}/{:?} {}/{} voted, maj23 {}}}",
            self.height,
            self.round,
            self.vote_type,
            voted,
            self.votes.len(),
            maj23
        )
    }
}

/// Rebuild the precommit set that produced `commit`, checking every signature against `validators`.
pub fn commit_to_vote_set(
    chain_id: ChainID,
    commit: &Commit,
    validators: &ValidatorSet,
) -> Result<VoteSet, VoteSetError> {
    let mut vote_set = VoteSet::new(
        chain_id,
        commit.height,
        commit.round,
        VoteType::Precommit,
        validators.clone(),
    );
    for index in 0..commit.size() as u32 {
        if let Some(vote) = commit.get_vote(index) {
            vote_set.add_vote(vote)?;
        }
    }
    Ok(vote_set)
}

#[cfg(test)]
pub(crate) mod tests {
    use ed25519_dalek::SigningKey;
    use rand_core::{OsRng, RngCore};

    use super::*;
    use crate::types::{
        crypto_primitives::{hash, Keypair},
        data_types::{CryptoHash, Power, Timestamp},
        part_set::PartSetHeader,
    };

    pub(crate) const CHAIN_ID: ChainID = ChainID::new(7);

    pub(crate) fn keypairs_and_validators(n: usize) -> (Vec<Keypair>, ValidatorSet) {
        let mut csprg = OsRng {};
        let keypairs: Vec<Keypair> = (0..n)
            .map(|_| Keypair::new(SigningKey::generate(&mut csprg)))
            .collect();
        let validators = ValidatorSet::new(keypairs.iter().map(|kp| (kp.public(), Power::new(1))));
        // Order keypairs by validator index.
        let mut ordered = Vec::with_capacity(n);
        for validator in validators.validators() {
            let keypair = keypairs
                .iter()
                .find(|kp| kp.public().to_bytes() == validator.address)
                .unwrap();
            ordered.push(keypair.clone());
        }
        (ordered, validators)
    }

    pub(crate) fn block_id(seed: u8) -> BlockID {
        BlockID {
            hash: hash(&[seed]),
            parts_header: PartSetHeader {
                total: 1,
                hash: CryptoHash::new([seed; 32]),
            },
        }
    }

    pub(crate) fn signed_vote(
        keypair: &Keypair,
        index: u32,
        vote_type: VoteType,
        height: u64,
        round: u32,
        block_id: Option<BlockID>,
    ) -> Vote {
        let mut vote = Vote {
            vote_type,
            height: Height::new(height),
            round: Round::new(round),
            block_id,
            timestamp: Timestamp::now(),
            validator_address: keypair.public().to_bytes(),
            validator_index: index,
            signature: crate::types::data_types::SignatureBytes::empty(),
        };
        vote.signature = keypair.sign(&vote.message_bytes(CHAIN_ID));
        vote
    }

    fn prevote_set(validators: &ValidatorSet) -> VoteSet {
        VoteSet::new(
            CHAIN_ID,
            Height::new(10),
            Round::zero(),
            VoteType::Prevote,
            validators.clone(),
        )
    }

    #[test]
    fn three_of_four_matching_prevotes_form_a_majority() {
        let (keypairs, validators) = keypairs_and_validators(4);
        let mut vote_set = prevote_set(&validators);
        let x = block_id(1);

        for (i, keypair) in keypairs.iter().enumerate().take(2) {
            let vote = signed_vote(keypair, i as u32, VoteType::Prevote, 10, 0, Some(x));
            assert_eq!(vote_set.add_vote(vote), Ok(true));
        }
        assert_eq!(vote_set.two_thirds_majority(), None);
        assert!(!vote_set.has_two_thirds_any());

        let vote = signed_vote(&keypairs[2], 2, VoteType::Prevote, 10, 0, Some(x));
        assert_eq!(vote_set.add_vote(vote.clone()), Ok(true));
        assert_eq!(vote_set.two_thirds_majority(), Some(Some(x)));
        assert!(vote_set.has_two_thirds_any());
        assert!(!vote_set.has_all());

        // Re-adding the same vote is a no-op.
        assert_eq!(vote_set.add_vote(vote), Ok(false));
    }

    #[test]
    fn even_split_has_no_majority() {
        let (keypairs, validators) = keypairs_and_validators(4);
        let mut vote_set = prevote_set(&validators);
        let x = block_id(1);

        for (i, keypair) in keypairs.iter().enumerate() {
            let target = if i < 2 { Some(x) } else { None };
            let vote = signed_vote(keypair, i as u32, VoteType::Prevote, 10, 0, target);
            vote_set.add_vote(vote).unwrap();
        }
        assert_eq!(vote_set.two_thirds_majority(), None);
        assert!(!vote_set.has_two_thirds_majority());
        // Votes for any value count toward two thirds, nil included. PrevoteWait is entered on this tally.
        assert!(vote_set.has_two_thirds_any());
        assert!(vote_set.has_all());
    }

    #[test]
    fn conflicting_precommit_is_reported() {
        let (keypairs, validators) = keypairs_and_validators(4);
        let mut vote_set = VoteSet::new(
            CHAIN_ID,
            Height::new(10),
            Round::zero(),
            VoteType::Precommit,
            validators,
        );

        let first = signed_vote(&keypairs[0], 0, VoteType::Precommit, 10, 0, Some(block_id(1)));
        let second = signed_vote(&keypairs[0], 0, VoteType::Precommit, 10, 0, Some(block_id(2)));
        assert_eq!(vote_set.add_vote(first.clone()), Ok(true));
        match vote_set.add_vote(second.clone()) {
            Err(VoteSetError::ConflictingVotes {
                existing,
                conflicting,
                added,
            }) => {
                assert_eq!(*existing, first);
                assert_eq!(*conflicting, second);
                assert!(!added);
            }
            other => panic!("expected conflicting votes, got {:?}", other),
        }
        assert_eq!(vote_set.get_by_index(0), Some(&first));
    }

    #[test]
    fn peer_majority_admits_conflicting_votes() {
        let (keypairs, validators) = keypairs_and_validators(4);
        let mut vote_set = prevote_set(&validators);
        let (x, y) = (block_id(1), block_id(2));

        let vote = signed_vote(&keypairs[0], 0, VoteType::Prevote, 10, 0, Some(x));
        vote_set.add_vote(vote).unwrap();

        let peer = PeerID::new([9; 32]);
        vote_set.set_peer_maj23(peer, Some(y)).unwrap();
        assert_eq!(
            vote_set.set_peer_maj23(peer, Some(x)),
            Err(VoteSetError::ConflictingPeerMaj23 { peer })
        );

        let conflicting = signed_vote(&keypairs[0], 0, VoteType::Prevote, 10, 0, Some(y));
        assert!(matches!(
            vote_set.add_vote(conflicting),
            Err(VoteSetError::ConflictingVotes { added: true, .. })
        ));
        for (i, keypair) in keypairs.iter().enumerate().skip(1).take(2) {
            let vote = signed_vote(keypair, i as u32, VoteType::Prevote, 10, 0, Some(y));
            vote_set.add_vote(vote).unwrap();
        }
        assert_eq!(vote_set.two_thirds_majority(), Some(Some(y)));
        assert_eq!(vote_set.get_by_index(0).unwrap().block_id, Some(y));
    }

    #[test]
    fn invalid_votes_are_rejected() {
        let (keypairs, validators) = keypairs_and_validators(4);
        let mut vote_set = prevote_set(&validators);

        let wrong_round = signed_vote(&keypairs[0], 0, VoteType::Prevote, 10, 1, None);
        assert!(matches!(
            vote_set.add_vote(wrong_round),
            Err(VoteSetError::WrongHeightRoundType { .. })
        ));

        let wrong_index = signed_vote(&keypairs[0], 1, VoteType::Prevote, 10, 0, None);
        assert_eq!(
            vote_set.add_vote(wrong_index),
            Err(VoteSetError::InvalidValidatorAddress { index: 1 })
        );

        let mut forged = signed_vote(&keypairs[0], 0, VoteType::Prevote, 10, 0, None);
        forged.block_id = Some(block_id(3));
        assert_eq!(
            vote_set.add_vote(forged),
            Err(VoteSetError::InvalidSignature { index: 0 })
        );
        assert_eq!(vote_set.sum(), TotalPower::new(0));
    }

    #[test]
    fn commit_rebuilds_into_the_same_vote_set() {
        let (keypairs, validators) = keypairs_and_validators(4);
        let mut vote_set = VoteSet::new(
            CHAIN_ID,
            Height::new(3),
            Round::new(1),
            VoteType::Precommit,
            validators.clone(),
        );
        let x = block_id(5);
        for (i, keypair) in keypairs.iter().enumerate() {
            let target = if i == 3 { None } else { Some(x) };
            let vote = signed_vote(keypair, i as u32, VoteType::Precommit, 3, 1, target);
            vote_set.add_vote(vote).unwrap();
        }

        let commit = vote_set.make_commit().unwrap();
        assert_eq!(commit.block_id, x);
        assert!(matches!(commit.signatures[3], CommitSig::Nil { .. }));
        commit
            .verify(CHAIN_ID, &validators, &x, Height::new(3))
            .unwrap();

        let rebuilt = commit_to_vote_set(CHAIN_ID, &commit, &validators).unwrap();
        assert_eq!(rebuilt.two_thirds_majority(), Some(Some(x)));
        assert!(rebuilt.has_all());
    }

    #[test]
    fn majority_follows_power_for_random_validator_sets() {
        let mut csprg = OsRng {};
        for _ in 0..20 {
            let n = 1 + (csprg.next_u32() % 7) as usize;
            let keypairs: Vec<Keypair> = (0..n)
                .map(|_| Keypair::new(SigningKey::generate(&mut csprg)))
                .collect();
            let powers: Vec<u64> = (0..n).map(|_| 1 + (csprg.next_u32() % 100) as u64).collect();
            let validators =
                ValidatorSet::new(keypairs.iter().zip(&powers).map(|(kp, power)| (kp.public(), Power::new(*power))));
            let total: u128 = powers.iter().map(|power| *power as u128).sum();

            let choices = [Some(block_id(1)), Some(block_id(2)), None];
            let mut vote_set = prevote_set(&validators);
            let mut tallies = [0u128; 3];
            for (keypair, power) in keypairs.iter().zip(&powers) {
                // Some validators abstain.
                let choice = (csprg.next_u32() % 4) as usize;
                if choice == 3 {
                    continue;
                }
                let (index, _) = validators.get_by_address(&keypair.public().to_bytes()).unwrap();
                let vote = signed_vote(keypair, index, VoteType::Prevote, 10, 0, choices[choice]);
                assert!(vote_set.add_vote(vote).unwrap());
                tallies[choice] += *power as u128;
            }

            let expected = tallies
                .iter()
                .position(|tally| tally * 3 > total * 2)
                .map(|choice| choices[choice]);
            assert_eq!(vote_set.two_thirds_majority(), expected);
            assert_eq!(vote_set.has_two_thirds_any(), tallies.iter().sum::<u128>() * 3 > total * 2);
        }
    }
}
