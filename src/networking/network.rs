/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use crate::{
    consensus::messages::ConsensusMessage,
    types::{crypto_primitives::VerifyingKey, validator_set::ValidatorSet},
};

pub trait Network: Clone + Send {
    /// Inform the network provider of the validator set on wake-up.
    fn init_validator_set(&mut self, validator_set: ValidatorSet);

    /// Inform the network provider of the validator set of a new height, if it changed.
    fn update_validator_set(&mut self, validator_set: ValidatorSet);

    /// Send a message to all peers without blocking.
    fn broadcast(&mut self, message: ConsensusMessage);

    /// Send a message to the specified peer without blocking.
    fn send(&mut self, peer: VerifyingKey, message: ConsensusMessage);

    /// Receive a message from any peer. Returns immediately with a None if no message is available now.
    fn recv(&mut self) -> Option<(VerifyingKey, ConsensusMessage)>;
}

/// Handle for informing the Network Provider about validator set updates.
///
/// The network provider may want to connect to validators that join the set, or drop connections
/// to ones that leave it.
#[derive(Clone)]
pub(crate) struct ValidatorSetUpdateHandle<N: Network> {
    network: N,
}

impl<N: Network> ValidatorSetUpdateHandle<N> {
    pub(crate) fn new(network: N) -> Self {
        Self { network }
    }

    pub(crate) fn update_validator_set(&mut self, validator_set: ValidatorSet) {
        self.network.update_validator_set(validator_set)
    }
}
