use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use tm_consensus::{
    pluggables::{BlockStore, BlockStoreError, EvidencePool, EvidencePoolError},
    types::{
        block::{Block, BlockMeta},
        commit::Commit,
        data_types::{ChainID, CryptoHash, Height},
        evidence::DuplicateVoteEvidence,
        part_set::PartSet,
    },
};

struct StoredBlock {
    block: Block,
    parts: PartSet,
    seen_commit: Commit,
}

/// An in-memory block store. Clones share the same blocks, so a restarted replica finds what the
/// replica before it saved.
#[derive(Clone, Default)]
pub(crate) struct MemBlockStore(Arc<Mutex<BTreeMap<Height, StoredBlock>>>);

impl MemBlockStore {
    pub(crate) fn new() -> MemBlockStore {
        MemBlockStore::default()
    }

    pub(crate) fn block_hash(&self, height: Height) -> Option<CryptoHash> {
        self.0.lock().unwrap().get(&height).map(|stored| stored.block.hash())
    }

    pub(crate) fn block_parts(&self, height: Height) -> Option<PartSet> {
        self.0.lock().unwrap().get(&height).map(|stored| stored.parts.clone())
    }
}

impl BlockStore for MemBlockStore {
    fn height(&self) -> Height {
        self.0.lock().unwrap().keys().next_back().copied().unwrap_or_default()
    }

    fn base(&self) -> Height {
        self.0.lock().unwrap().keys().next().copied().unwrap_or_default()
    }

    fn save_block(&mut self, block: &Block, parts: &PartSet, seen_commit: &Commit) -> Result<(), BlockStoreError> {
        let mut blocks = self.0.lock().unwrap();
        if let Some(height) = blocks.keys().next_back() {
            if block.height() != *height + 1 {
                return Err(BlockStoreError::NonContiguousHeight {
                    expected: *height + 1,
                    got: block.height(),
                });
            }
        }
        blocks.insert(
            block.height(),
            StoredBlock {
                block: block.clone(),
                parts: parts.clone(),
                seen_commit: seen_commit.clone(),
            },
        );
        Ok(())
    }

    fn load_block_meta(&self, height: Height) -> Option<BlockMeta> {
        let blocks = self.0.lock().unwrap();
        blocks.get(&height).map(|stored| BlockMeta::new(&stored.block, &stored.parts))
    }

    fn load_seen_commit(&self, height: Height) -> Option<Commit> {
        self.0.lock().unwrap().get(&height).map(|stored| stored.seen_commit.clone())
    }

    fn load_block_commit(&self, height: Height) -> Option<Commit> {
        let blocks = self.0.lock().unwrap();
        blocks.get(&(height + 1)).and_then(|stored| stored.block.last_commit.clone())
    }

    fn prune_blocks(&mut self, retain_height: Height) -> Result<u64, BlockStoreError> {
        let mut blocks = self.0.lock().unwrap();
        let retained = blocks.split_off(&retain_height);
        let pruned = blocks.len() as u64;
        *blocks = retained;
        Ok(pruned)
    }
}

/// Keeps every piece of evidence it is given, after checking it.
#[derive(Clone)]
pub(crate) struct MemEvidencePool {
    chain_id: ChainID,
    evidence: Arc<Mutex<Vec<DuplicateVoteEvidence>>>,
}

impl MemEvidencePool {
    pub(crate) fn new(chain_id: ChainID) -> MemEvidencePool {
        MemEvidencePool {
            chain_id,
            evidence: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.evidence.lock().unwrap().len()
    }
}

impl EvidencePool for MemEvidencePool {
    fn add_evidence(&mut self, evidence: DuplicateVoteEvidence) -> Result<(), EvidencePoolError> {
        evidence.verify(self.chain_id)?;
        let mut pool = self.evidence.lock().unwrap();
        if pool.contains(&evidence) {
            return Err(EvidencePoolError::AlreadyCommitted);
        }
        pool.push(evidence);
        Ok(())
    }
}
