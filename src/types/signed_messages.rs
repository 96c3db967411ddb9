/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The trait shared by every message that carries a validator's signature.

use super::{
    crypto_primitives::verify_signature,
    data_types::{ChainID, SignatureBytes, VerifyingKeyBytes},
};

/// Data types that contain: 1. A message, and 2. A digital signature over said message whose
/// correctness can be verified against a verifying key.
pub trait SignedMessage: Clone {
    /// Get the bytes that are passed as input into the signing function to form the signature
    /// of the `SignedMessage` on the chain identified by `chain_id`.
    fn message_bytes(&self, chain_id: ChainID) -> Vec<u8>;

    /// Get the signature of the `SignedMessage`.
    fn signature_bytes(&self) -> SignatureBytes;

    /// Verify that `signature_bytes` is a signature created by `verifying_key` over `message_bytes`.
    fn is_correct(&self, chain_id: ChainID, verifying_key: &VerifyingKeyBytes) -> bool {
        verify_signature(
            verifying_key,
            &self.message_bytes(chain_id),
            &self.signature_bytes(),
        )
    }
}
