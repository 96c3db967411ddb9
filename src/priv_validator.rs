/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Signing of votes and proposals on behalf of a validator.

use std::sync::{Arc, Mutex};

use rand_core::OsRng;

use crate::{
    consensus::round_state::RoundStep,
    types::{
        crypto_primitives::{Keypair, SigningKey, VerifyingKey},
        data_types::{ChainID, Height, Round, SignatureBytes},
        proposal::Proposal,
        signed_messages::SignedMessage,
        vote::{Vote, VoteType},
    },
};

#[derive(Debug, PartialEq, Eq)]
pub enum SignerError {
    /// Signing would produce a second, different signature for a height, round, and step the
    /// validator already signed for.
    ConflictingData { height: Height, round: Round, step: RoundStep },
    /// The validator already signed for a later height, round, or step.
    HeightRoundStepRegression { height: Height, round: Round, step: RoundStep },
    Unavailable(String),
}

/// Something that holds a validator's private key and signs with it. May be backed by a remote
/// signer, so every method can fail.
pub trait PrivValidator: Send {
    fn get_pub_key(&self) -> Result<VerifyingKey, SignerError>;

    /// Fill in the signature of `vote`.
    fn sign_vote(&mut self, chain_id: ChainID, vote: &mut Vote) -> Result<(), SignerError>;

    /// Fill in the signature of `proposal`.
    fn sign_proposal(&mut self, chain_id: ChainID, proposal: &mut Proposal) -> Result<(), SignerError>;
}

// The step that signing a message of each kind occupies.
fn vote_step(vote_type: VoteType) -> RoundStep {
    match vote_type {
        VoteType::Prevote => RoundStep::Prevote,
        VoteType::Precommit => RoundStep::Precommit,
    }
}

#[derive(Default)]
struct LastSignState {
    hrs: Option<(Height, Round, RoundStep)>,
    sign_bytes: Vec<u8>,
    signature: Option<SignatureBytes>,
}

impl LastSignState {
    /// Returns the previous signature if `sign_bytes` is exactly what was signed last at `hrs`.
    fn check(&self, hrs: (Height, Round, RoundStep), sign_bytes: &[u8]) -> Result<Option<SignatureBytes>, SignerError> {
        let Some(last) = self.hrs else {
            return Ok(None);
        };
        let (height, round, step) = hrs;
        if hrs < last {
            return Err(SignerError::HeightRoundStepRegression { height, round, step });
        }
        if hrs == last {
            if self.sign_bytes == sign_bytes {
                return Ok(self.signature);
            }
            return Err(SignerError::ConflictingData { height, round, step });
        }
        Ok(None)
    }

    fn save(&mut self, hrs: (Height, Round, RoundStep), sign_bytes: Vec<u8>, signature: SignatureBytes) {
        self.hrs = Some(hrs);
        self.sign_bytes = sign_bytes;
        self.signature = Some(signature);
    }
}

/// A [`PrivValidator`] that keeps an Ed25519 key in memory.
///
/// It remembers the last `(height, round, step)` it signed for and refuses to sign anything for an
/// earlier one, or anything different for the same one. Clones share this record.
#[derive(Clone)]
pub struct LocalPrivValidator {
    keypair: Keypair,
    last_signed: Arc<Mutex<LastSignState>>,
}

impl LocalPrivValidator {
    pub fn new(signing_key: SigningKey) -> LocalPrivValidator {
        LocalPrivValidator {
            keypair: Keypair::new(signing_key),
            last_signed: Arc::new(Mutex::new(LastSignState::default())),
        }
    }

    /// Create a validator with a fresh random key.
    pub fn generate() -> LocalPrivValidator {
        let mut csprg = OsRng {};
        Self::new(SigningKey::generate(&mut csprg))
    }

    fn sign(&self, hrs: (Height, Round, RoundStep), sign_bytes: Vec<u8>) -> Result<SignatureBytes, SignerError> {
        let mut last_signed = self
            .last_signed
            .lock()
            .map_err(|_| SignerError::Unavailable(String::from("sign state lock poisoned")))?;
        if let Some(signature) = last_signed.check(hrs, &sign_bytes)? {
            return Ok(signature);
        }
        let signature = self.keypair.sign(&sign_bytes);
        last_signed.save(hrs, sign_bytes, signature);
        Ok(signature)
    }
}

impl PrivValidator for LocalPrivValidator {
    fn get_pub_key(&self) -> Result<VerifyingKey, SignerError> {
        Ok(self.keypair.public())
    }

    fn sign_vote(&mut self, chain_id: ChainID, vote: &mut Vote) -> Result<(), SignerError> {
        let hrs = (vote.height, vote.round, vote_step(vote.vote_type));
        vote.signature = self.sign(hrs, vote.message_bytes(chain_id))?;
        Ok(())
    }

    fn sign_proposal(&mut self, chain_id: ChainID, proposal: &mut Proposal) -> Result<(), SignerError> {
        let hrs = (proposal.height, proposal.round, RoundStep::Propose);
        proposal.signature = self.sign(hrs, proposal.message_bytes(chain_id))?;
        Ok(())
    }
}
