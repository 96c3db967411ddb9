use std::sync::{Arc, Mutex};

use tm_consensus::{
    pluggables::{BlockExecutionError, BlockExecutor},
    types::{
        block::{Block, BlockID},
        chain_state::ChainState,
        commit::Commit,
        crypto_primitives::hash,
        data_types::{CryptoHash, Height, VerifyingKeyBytes},
        part_set::PartSet,
    },
};

pub(crate) const PART_SIZE: usize = 256;

/// Transactions waiting to be included in a block. Shared by every replica in a test, and drained
/// only when a block that includes them is applied.
#[derive(Clone, Default)]
pub(crate) struct Mempool(Arc<Mutex<Vec<Vec<u8>>>>);

impl Mempool {
    pub(crate) fn submit(&self, tx: Vec<u8>) {
        self.0.lock().unwrap().push(tx)
    }

    fn pending(&self) -> Vec<Vec<u8>> {
        self.0.lock().unwrap().clone()
    }

    fn remove_committed(&self, txs: &[Vec<u8>]) {
        self.0.lock().unwrap().retain(|tx| !txs.contains(tx))
    }
}

/// An executor whose application state is the number of transactions committed so far.
pub(crate) struct CounterExecutor {
    mempool: Mempool,
    count: Arc<Mutex<u64>>,
}

impl CounterExecutor {
    pub(crate) fn new(mempool: Mempool, count: Arc<Mutex<u64>>) -> CounterExecutor {
        CounterExecutor { mempool, count }
    }
}

pub(crate) fn app_hash(count: u64) -> CryptoHash {
    hash(&count.to_le_bytes())
}

impl BlockExecutor for CounterExecutor {
    fn create_proposal_block(
        &mut self,
        height: Height,
        state: &ChainState,
        last_commit: Option<Commit>,
        proposer_address: VerifyingKeyBytes,
    ) -> Result<(Block, PartSet), BlockExecutionError> {
        let txs = self.mempool.pending();
        Ok(state.make_block(height, txs, last_commit, Vec::new(), proposer_address, PART_SIZE))
    }

    fn apply_block(
        &mut self,
        state: &ChainState,
        block_id: BlockID,
        block: &Block,
    ) -> Result<(ChainState, Height), BlockExecutionError> {
        self.mempool.remove_committed(&block.txs);
        let mut count = self.count.lock().unwrap();
        *count += block.txs.len() as u64;
        Ok((state.next_state(block_id, block, app_hash(*count)), Height::new(0)))
    }
}
