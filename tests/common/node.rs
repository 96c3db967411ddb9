use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use tm_consensus::{
    consensus::handle::ConsensusHandle,
    events::{CommitBlockEvent, EvidenceEvent, LockEvent, ProposeEvent},
    pluggables::BlockStore,
    priv_validator::LocalPrivValidator,
    replica::{Configuration, Replica, ReplicaSpec},
    types::{
        chain_state::ChainState,
        data_types::{CryptoHash, Height, PeerID, VerifyingKeyBytes},
    },
};

use ed25519_dalek::SigningKey;

use super::{
    counter_executor::{CounterExecutor, Mempool},
    logging::{first_seven_base64_chars, log_with_context},
    mem_store::{MemBlockStore, MemEvidencePool},
    network::NetworkStub,
};

/// Things the Nodes will have in common:
/// - Genesis chain state.
/// - Configuration.
/// - Mempool.
///
/// Things that they will differ in:
/// - Executor instance and its counter.
/// - Network instance.
/// - Block store and evidence pool.
/// - Signing key, and WAL directory.
pub(crate) struct Node {
    verifying_key: VerifyingKeyBytes,
    priv_validator: LocalPrivValidator,
    network: NetworkStub,
    mempool: Mempool,
    block_store: MemBlockStore,
    evidence_pool: MemEvidencePool,
    count: Arc<Mutex<u64>>,
    wal_path: Option<PathBuf>,
    handle: ConsensusHandle,
    replica: Option<Replica>,
}

impl Node {
    pub(crate) fn new(
        keypair: SigningKey,
        network: NetworkStub,
        genesis: ChainState,
        mempool: Mempool,
        wal_path: Option<PathBuf>,
    ) -> Node {
        let verifying_key = keypair.verifying_key().to_bytes();
        let priv_validator = LocalPrivValidator::new(keypair);
        let block_store = MemBlockStore::new();
        let evidence_pool = MemEvidencePool::new(genesis.chain_id);
        let count = Arc::new(Mutex::new(0));

        let replica = start_replica(
            verifying_key,
            &priv_validator,
            &network,
            &mempool,
            &block_store,
            &evidence_pool,
            &count,
            wal_path.clone(),
            genesis,
        );

        Node {
            verifying_key,
            priv_validator,
            network,
            mempool,
            block_store,
            evidence_pool,
            count,
            wal_path,
            handle: replica.handle(),
            replica: Some(replica),
        }
    }

    /// Stop the replica, and start a new one from the chain state, block store and WAL it left behind.
    pub(crate) fn restart(&mut self) {
        // Waits for the consensus thread to finish the input at hand.
        drop(self.replica.take());
        let chain_state = self.handle.chain_state();
        log_with_context(
            self.verifying_key,
            &format!("Restarting at height {}", chain_state.last_block_height),
        );

        let replica = start_replica(
            self.verifying_key,
            &self.priv_validator,
            &self.network,
            &self.mempool,
            &self.block_store,
            &self.evidence_pool,
            &self.count,
            self.wal_path.clone(),
            chain_state,
        );
        self.handle = replica.handle();
        self.replica = Some(replica);
    }

    pub(crate) fn last_height(&self) -> Height {
        self.handle.last_height()
    }

    pub(crate) fn count(&self) -> u64 {
        *self.count.lock().unwrap()
    }

    pub(crate) fn block_hash(&self, height: Height) -> Option<CryptoHash> {
        self.block_store.block_hash(height)
    }

    pub(crate) fn evidence_count(&self) -> usize {
        self.evidence_pool.len()
    }

    pub(crate) fn is_halted(&self) -> bool {
        self.handle.is_halted()
    }

    /// If this node already committed the height `behind` is deciding on, send `behind` the
    /// precommits that committed it, followed by the block's parts.
    fn serve_catchup(&self, behind: &Node) {
        let height = behind.handle.round_state().height;
        if height > self.last_height() {
            return;
        }
        let (Some(commit), Some(parts)) = (self.block_store.load_seen_commit(height), self.block_store.block_parts(height))
        else {
            return;
        };
        let peer = PeerID::new(self.verifying_key);
        for index in 0..commit.size() as u32 {
            if let Some(vote) = commit.get_vote(index) {
                behind.handle.add_vote(vote, Some(peer));
            }
        }
        for index in 0..parts.total() {
            if let Some(part) = parts.get_part(index) {
                behind.handle.add_proposal_block_part(height, commit.round, part.clone(), Some(peer));
            }
        }
    }
}

/// Stand in for the catch-up gossip of a real network: every node that is deciding on a height some
/// other node already committed gets that height's commit and block from it.
pub(crate) fn serve_catchup(nodes: &[Node]) {
    for behind in nodes {
        let height = behind.handle.round_state().height;
        if let Some(ahead) = nodes.iter().find(|node| node.last_height() >= height) {
            ahead.serve_catchup(behind);
        }
    }
}

pub(crate) fn test_configuration(wal_path: Option<PathBuf>) -> Configuration {
    let configuration = Configuration::builder()
        .timeout_propose(Duration::from_millis(1000))
        .timeout_propose_delta(Duration::from_millis(200))
        .timeout_prevote(Duration::from_millis(300))
        .timeout_prevote_delta(Duration::from_millis(100))
        .timeout_precommit(Duration::from_millis(300))
        .timeout_precommit_delta(Duration::from_millis(100))
        .timeout_commit(Duration::from_millis(100))
        .log_events(false);
    match wal_path {
        Some(wal_path) => configuration.wal_path(wal_path).build(),
        None => configuration.build(),
    }
}

#[allow(clippy::too_many_arguments)]
fn start_replica(
    verifying_key: VerifyingKeyBytes,
    priv_validator: &LocalPrivValidator,
    network: &NetworkStub,
    mempool: &Mempool,
    block_store: &MemBlockStore,
    evidence_pool: &MemEvidencePool,
    count: &Arc<Mutex<u64>>,
    wal_path: Option<PathBuf>,
    chain_state: ChainState,
) -> Replica {
    ReplicaSpec::builder()
        .executor(CounterExecutor::new(mempool.clone(), count.clone()))
        .block_store(block_store.clone())
        .evidence_pool(evidence_pool.clone())
        .network(network.clone())
        .chain_state(chain_state)
        .configuration(test_configuration(wal_path))
        .priv_validator(Box::new(priv_validator.clone()))
        .on_propose(propose_handler(verifying_key))
        .on_lock(lock_handler(verifying_key))
        .on_commit_block(commit_block_handler(verifying_key))
        .on_evidence(evidence_handler(verifying_key))
        .build()
        .start()
        .expect("Failed to start the replica")
}

fn propose_handler(verifying_key: VerifyingKeyBytes) -> impl Fn(&ProposeEvent) + Send + 'static {
    move |propose_event| {
        log_with_context(
            verifying_key,
            &format!(
                "Proposed, height: {}, round: {}, block hash: {}",
                propose_event.proposal.height,
                propose_event.proposal.round,
                first_seven_base64_chars(&propose_event.proposal.block_id.hash.bytes())
            ),
        );
    }
}

fn lock_handler(verifying_key: VerifyingKeyBytes) -> impl Fn(&LockEvent) + Send + 'static {
    move |lock_event| {
        log_with_context(
            verifying_key,
            &format!(
                "Locked, height: {}, round: {}, block hash: {}",
                lock_event.height,
                lock_event.round,
                first_seven_base64_chars(&lock_event.block.bytes())
            ),
        );
    }
}

fn commit_block_handler(verifying_key: VerifyingKeyBytes) -> impl Fn(&CommitBlockEvent) + Send + 'static {
    move |commit_block_event| {
        log_with_context(
            verifying_key,
            &format!(
                "Committed Block, height: {}, block hash: {}, txs: {}",
                commit_block_event.height,
                first_seven_base64_chars(&commit_block_event.block.bytes()),
                commit_block_event.num_txs
            ),
        );
    }
}

fn evidence_handler(verifying_key: VerifyingKeyBytes) -> impl Fn(&EvidenceEvent) + Send + 'static {
    move |evidence_event| {
        log_with_context(
            verifying_key,
            &format!(
                "Reported double signing by {}",
                first_seven_base64_chars(&evidence_event.evidence.address())
            ),
        );
    }
}

/// Poll `condition` every 100 milliseconds, panicking with `what` if it does not hold within `limit`.
pub(crate) fn wait_until(limit: Duration, what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + limit;
    while !condition() {
        if Instant::now() > deadline {
            panic!("Timed out waiting until {}", what);
        }
        thread::sleep(Duration::from_millis(100));
    }
}
