/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Scenario tests of the consensus state machine, driven one input at a time.
//!
//! Each test builds a [`ConsensusState`] for one validator out of four, and plays the part of the
//! other three by feeding it their signed votes and proposals as peer messages. Timeouts are
//! delivered by hand, and the node's own proposals and votes are handled by draining its internal
//! queue after every input.

use std::{
    collections::BTreeMap,
    path::Path,
    sync::{
        mpsc::{self, Receiver},
        Arc, Mutex,
    },
    time::Duration,
};

use crate::{
    events::Event,
    networking::network::Network,
    pluggables::{
        BlockExecutionError, BlockExecutor, BlockStore, BlockStoreError, EvidencePool, EvidencePoolError,
    },
    priv_validator::LocalPrivValidator,
    types::{
        block::{Block, BlockID, BlockMeta},
        chain_state::ChainState,
        commit::Commit,
        crypto_primitives::{Keypair, VerifyingKey},
        data_types::{CryptoHash, Height, PeerID, Round, TotalPower, VerifyingKeyBytes},
        evidence::DuplicateVoteEvidence,
        part_set::{PartSet, PartSetHeader},
        proposal::Proposal,
        signed_messages::SignedMessage,
        validator_set::ValidatorSet,
        vote::{Vote, VoteType},
    },
    wal::{BaseWal, NilWal, Wal, DEFAULT_HEAD_SIZE_LIMIT},
};

use super::{
    handle::ConsensusHandle,
    mailbox::{Input, Mailbox},
    messages::{ConsensusMessage, MsgInfo, TimeoutInfo},
    round_state::RoundStep,
    state::{ConsensusConfiguration, ConsensusState},
    vote_set::tests::{block_id, keypairs_and_validators, signed_vote, CHAIN_ID},
};

const PART_SIZE: usize = 64;

#[derive(Default)]
struct ExecutorLog {
    applied: Vec<Height>,
    fail_apply: bool,
}

struct TestExecutor {
    log: Arc<Mutex<ExecutorLog>>,
}

impl BlockExecutor for TestExecutor {
    fn create_proposal_block(
        &mut self,
        height: Height,
        state: &ChainState,
        last_commit: Option<Commit>,
        proposer_address: VerifyingKeyBytes,
    ) -> Result<(Block, PartSet), BlockExecutionError> {
        let txs = vec![format!("tx at height {}", height).into_bytes()];
        Ok(state.make_block(height, txs, last_commit, Vec::new(), proposer_address, PART_SIZE))
    }

    fn apply_block(
        &mut self,
        state: &ChainState,
        block_id: BlockID,
        block: &Block,
    ) -> Result<(ChainState, Height), BlockExecutionError> {
        let mut log = self.log.lock().unwrap();
        if log.fail_apply {
            return Err(BlockExecutionError::Application("state database is gone".to_string()));
        }
        log.applied.push(block.height());
        Ok((state.next_state(block_id, block, state.app_hash), Height::new(0)))
    }
}

struct StoredBlock {
    block: Block,
    parts: PartSet,
    seen_commit: Option<Commit>,
}

#[derive(Default)]
struct StoreInner {
    blocks: BTreeMap<Height, StoredBlock>,
    saves: usize,
}

#[derive(Clone, Default)]
struct MemBlockStore(Arc<Mutex<StoreInner>>);

impl MemBlockStore {
    // Put a block in the store the way a node that crashed right after saving it would have.
    fn preload(&self, block: Block, parts: PartSet) {
        let stored = StoredBlock {
            block,
            parts,
            seen_commit: None,
        };
        self.0.lock().unwrap().blocks.insert(stored.block.height(), stored);
    }

    fn saves(&self) -> usize {
        self.0.lock().unwrap().saves
    }
}

impl BlockStore for MemBlockStore {
    fn height(&self) -> Height {
        self.0.lock().unwrap().blocks.keys().next_back().copied().unwrap_or_default()
    }

    fn base(&self) -> Height {
        self.0.lock().unwrap().blocks.keys().next().copied().unwrap_or_default()
    }

    fn save_block(&mut self, block: &Block, parts: &PartSet, seen_commit: &Commit) -> Result<(), BlockStoreError> {
        let mut inner = self.0.lock().unwrap();
        inner.blocks.insert(
            block.height(),
            StoredBlock {
                block: block.clone(),
                parts: parts.clone(),
                seen_commit: Some(seen_commit.clone()),
            },
        );
        inner.saves += 1;
        Ok(())
    }

    fn load_block_meta(&self, height: Height) -> Option<BlockMeta> {
        let inner = self.0.lock().unwrap();
        inner.blocks.get(&height).map(|stored| BlockMeta::new(&stored.block, &stored.parts))
    }

    fn load_seen_commit(&self, height: Height) -> Option<Commit> {
        let inner = self.0.lock().unwrap();
        inner.blocks.get(&height).and_then(|stored| stored.seen_commit.clone())
    }

    fn load_block_commit(&self, height: Height) -> Option<Commit> {
        let inner = self.0.lock().unwrap();
        inner.blocks.get(&(height + 1)).and_then(|stored| stored.block.last_commit.clone())
    }

    fn prune_blocks(&mut self, retain_height: Height) -> Result<u64, BlockStoreError> {
        let mut inner = self.0.lock().unwrap();
        let retained = inner.blocks.split_off(&retain_height);
        let pruned = inner.blocks.len() as u64;
        inner.blocks = retained;
        Ok(pruned)
    }
}

#[derive(Clone, Default)]
struct TestEvidencePool(Arc<Mutex<Vec<DuplicateVoteEvidence>>>);

impl EvidencePool for TestEvidencePool {
    fn add_evidence(&mut self, evidence: DuplicateVoteEvidence) -> Result<(), EvidencePoolError> {
        evidence.verify(CHAIN_ID)?;
        self.0.lock().unwrap().push(evidence);
        Ok(())
    }
}

// Records what the node broadcasts. Nothing is ever received: tests deliver peer messages directly.
#[derive(Clone, Default)]
struct RecordingNetwork(Arc<Mutex<Vec<ConsensusMessage>>>);

impl RecordingNetwork {
    fn votes(&self, vote_type: VoteType, round: u32) -> Vec<Vote> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter_map(|msg| match msg {
                ConsensusMessage::Vote(vote) if vote.vote_type == vote_type && vote.round == Round::new(round) => {
                    Some(vote.clone())
                }
                _ => None,
            })
            .collect()
    }
}

impl Network for RecordingNetwork {
    fn init_validator_set(&mut self, _: ValidatorSet) {}

    fn update_validator_set(&mut self, _: ValidatorSet) {}

    fn broadcast(&mut self, message: ConsensusMessage) {
        self.0.lock().unwrap().push(message)
    }

    fn send(&mut self, _: VerifyingKey, _: ConsensusMessage) {}

    fn recv(&mut self) -> Option<(VerifyingKey, ConsensusMessage)> {
        None
    }
}

type TestState = ConsensusState<TestExecutor, MemBlockStore, TestEvidencePool, RecordingNetwork>;

#[derive(Clone, Copy)]
enum Role {
    /// The proposer of round 0 of the first height.
    Proposer,
    /// A validator that does not propose in round 0 of the first height.
    Validator,
}

/// Four validators with equal power, one of which is the node under test.
struct Setup {
    keypairs: Vec<Keypair>,
    genesis: ChainState,
    me: usize,
    priv_validator: LocalPrivValidator,
}

impl Setup {
    fn new(role: Role) -> Setup {
        let (keypairs, validators) = keypairs_and_validators(4);
        let genesis = ChainState::genesis(CHAIN_ID, Height::new(1), validators, CryptoHash::new([0; 32]));
        let proposer = index_of(&genesis.validators, &genesis.validators.proposer().address);
        let me = match role {
            Role::Proposer => proposer,
            Role::Validator => (proposer + 1) % keypairs.len(),
        };
        let priv_validator = LocalPrivValidator::new(keypairs[me].0.clone());
        Setup {
            keypairs,
            genesis,
            me,
            priv_validator,
        }
    }

    fn start(&self, wal: Box<dyn Wal>) -> Harness {
        self.start_with(test_config(), wal)
    }

    fn start_with(&self, config: ConsensusConfiguration, wal: Box<dyn Wal>) -> Harness {
        let mailbox = Arc::new(Mailbox::new(1000, 1000));
        let store = MemBlockStore::default();
        let executor_log = Arc::new(Mutex::new(ExecutorLog::default()));
        let evidence = TestEvidencePool::default();
        let network = RecordingNetwork::default();
        let (event_publisher, events) = mpsc::channel();

        let cs = ConsensusState::new(
            config,
            self.genesis.clone(),
            Arc::new(Mutex::new(TestExecutor {
                log: executor_log.clone(),
            })),
            store.clone(),
            evidence.clone(),
            Some(Box::new(self.priv_validator.clone())),
            wal,
            network.clone(),
            mailbox,
            Some(event_publisher),
        )
        .unwrap();

        Harness {
            cs,
            keypairs: self.keypairs.clone(),
            me: self.me,
            store,
            executor_log,
            evidence,
            network,
            events,
        }
    }
}

// Timeouts long enough that the ticker never fires during a test.
fn test_config() -> ConsensusConfiguration {
    ConsensusConfiguration {
        timeout_propose: Duration::from_secs(60),
        timeout_propose_delta: Duration::from_secs(1),
        timeout_prevote: Duration::from_secs(60),
        timeout_prevote_delta: Duration::from_secs(1),
        timeout_precommit: Duration::from_secs(60),
        timeout_precommit_delta: Duration::from_secs(1),
        timeout_commit: Duration::ZERO,
        skip_timeout_commit: false,
        create_empty_blocks: true,
        create_empty_blocks_interval: Duration::ZERO,
        active_view_change: false,
    }
}

fn index_of(validators: &ValidatorSet, address: &VerifyingKeyBytes) -> usize {
    validators.get_by_address(address).unwrap().0 as usize
}

fn peer_id(keypair: &Keypair) -> PeerID {
    PeerID::from(&keypair.public())
}

fn wal_at(path: &Path) -> Box<dyn Wal> {
    Box::new(BaseWal::open(path, DEFAULT_HEAD_SIZE_LIMIT).unwrap())
}

struct Harness {
    cs: TestState,
    keypairs: Vec<Keypair>,
    me: usize,
    store: MemBlockStore,
    executor_log: Arc<Mutex<ExecutorLog>>,
    evidence: TestEvidencePool,
    network: RecordingNetwork,
    events: Receiver<Event>,
}

impl Harness {
    fn others(&self) -> Vec<usize> {
        (0..self.keypairs.len()).filter(|i| *i != self.me).collect()
    }

    fn height(&self) -> u64 {
        self.cs.rs.height.int()
    }

    fn input(&mut self, input: Input) {
        assert!(self.cs.handle_input(input).unwrap());
        self.drain();
    }

    // Handle the node's own messages, and peer messages it released, until there are none left.
    // Timeouts fired by the ticker are left alone: tests deliver timeouts explicitly.
    fn drain(&mut self) {
        while let Some(input) = self.cs.mailbox.try_recv() {
            match input {
                Input::Internal(_) | Input::Peer(_) => {
                    assert!(self.cs.handle_input(input).unwrap());
                }
                Input::Timeout(_) | Input::TxsAvailable | Input::Quit => (),
            }
        }
    }

    fn timeout(&mut self, round: u32, step: RoundStep) {
        let timeout = TimeoutInfo::new(Duration::ZERO, self.cs.rs.height, Round::new(round), step);
        self.input(Input::Timeout(timeout));
    }

    fn peer_vote(&mut self, index: usize, vote_type: VoteType, round: u32, block_id: Option<BlockID>) -> Vote {
        self.peer_vote_at(self.height(), index, vote_type, round, block_id)
    }

    fn peer_vote_at(
        &mut self,
        height: u64,
        index: usize,
        vote_type: VoteType,
        round: u32,
        block_id: Option<BlockID>,
    ) -> Vote {
        let vote = signed_vote(&self.keypairs[index], index as u32, vote_type, height, round, block_id);
        let peer = peer_id(&self.keypairs[index]);
        self.input(Input::Peer(MsgInfo::from_peer(ConsensusMessage::Vote(vote.clone()), peer)));
        vote
    }

    /// Sign and deliver a proposal for a new block from the proposer of the current round.
    fn peer_proposal(&mut self, round: u32) -> BlockID {
        let proposer_address = self.cs.rs.validators.proposer().address;
        let proposer = index_of(&self.cs.rs.validators, &proposer_address);
        let (block, parts) = self.cs.chain_state.make_block(
            self.cs.rs.height,
            vec![b"peer tx".to_vec()],
            None,
            Vec::new(),
            proposer_address,
            PART_SIZE,
        );
        let block_id = BlockID {
            hash: block.hash(),
            parts_header: parts.header(),
        };
        let mut proposal = Proposal::new(self.cs.rs.height, Round::new(round), None, block_id);
        proposal.signature = self.keypairs[proposer].sign(&proposal.message_bytes(CHAIN_ID));

        let peer = peer_id(&self.keypairs[proposer]);
        self.input(Input::Peer(MsgInfo::from_peer(ConsensusMessage::Proposal(proposal), peer)));
        for index in 0..parts.total() {
            let part = parts.get_part(index).cloned().unwrap();
            let msg = ConsensusMessage::BlockPart {
                height: self.cs.rs.height,
                round: Round::new(round),
                part,
            };
            self.input(Input::Peer(MsgInfo::from_peer(msg, peer)));
        }
        block_id
    }

    fn proposal_block_id(&self) -> BlockID {
        let block = self.cs.rs.proposal_block.as_ref().expect("no proposal block");
        let parts = self.cs.rs.proposal_block_parts.as_ref().expect("no proposal block parts");
        BlockID {
            hash: block.hash(),
            parts_header: parts.header(),
        }
    }

    fn my_address(&self) -> VerifyingKeyBytes {
        self.keypairs[self.me].public().to_bytes()
    }

    fn my_votes(&self, vote_type: VoteType, round: u32) -> Vec<Vote> {
        let me = self.my_address();
        self.network
            .votes(vote_type, round)
            .into_iter()
            .filter(|vote| vote.validator_address == me)
            .collect()
    }

    fn events(&self) -> Vec<Event> {
        self.events.try_iter().collect()
    }

    /// As the proposer of round 0: propose, then lock on the proposal with the prevotes of two peers.
    fn propose_and_lock(&mut self) -> BlockID {
        self.timeout(0, RoundStep::NewHeight);
        assert_eq!(self.cs.rs.step, RoundStep::Prevote, "the node should prevote its own complete proposal");
        let block_id = self.proposal_block_id();
        assert_eq!(self.my_votes(VoteType::Prevote, 0)[0].block_id, Some(block_id));

        let others = self.others();
        for index in &others[..2] {
            self.peer_vote(*index, VoteType::Prevote, 0, Some(block_id));
        }
        assert_eq!(self.cs.rs.step, RoundStep::Precommit);
        assert_eq!(self.cs.rs.locked_round, Some(Round::zero()));
        block_id
    }
}

#[test]
fn precommits_nil_when_no_proposal_arrives() {
    let setup = Setup::new(Role::Validator);
    let mut h = setup.start(Box::new(NilWal));

    h.timeout(0, RoundStep::NewHeight);
    assert_eq!(h.cs.rs.step, RoundStep::Propose);

    h.timeout(0, RoundStep::Propose);
    assert_eq!(h.cs.rs.step, RoundStep::Prevote);
    assert_eq!(h.my_votes(VoteType::Prevote, 0).len(), 1);
    assert_eq!(h.my_votes(VoteType::Prevote, 0)[0].block_id, None);

    let others = h.others();
    for index in &others[..2] {
        h.peer_vote(*index, VoteType::Prevote, 0, None);
    }

    assert_eq!(h.cs.rs.step, RoundStep::Precommit);
    assert_eq!(h.cs.rs.locked_round, None);
    let precommits = h.my_votes(VoteType::Precommit, 0);
    assert_eq!(precommits.len(), 1);
    assert_eq!(precommits[0].block_id, None);
}

#[test]
fn skips_to_a_later_round_with_two_thirds_of_its_prevotes() {
    let setup = Setup::new(Role::Validator);
    let mut h = setup.start(Box::new(NilWal));
    h.timeout(0, RoundStep::NewHeight);
    assert_eq!(h.cs.rs.round, Round::zero());

    for index in h.others() {
        h.peer_vote(index, VoteType::Prevote, 2, None);
    }

    assert_eq!(h.cs.rs.round, Round::new(2));
    assert!(h.cs.rs.step >= RoundStep::Propose);
    // Proposer selection advanced by two rounds.
    let expected = setup.genesis.validators.copy_increment_proposer_priority(2);
    assert_eq!(h.cs.rs.validators.proposer().address, expected.proposer().address);
}

#[test]
fn keeps_its_lock_across_rounds_until_a_later_polka() {
    let setup = Setup::new(Role::Proposer);
    let mut h = setup.start(Box::new(NilWal));
    let block_id = h.propose_and_lock();
    assert_eq!(h.my_votes(VoteType::Precommit, 0)[0].block_id, Some(block_id));

    // The other validators precommit nil, so round 0 ends without a decision.
    let others = h.others();
    for index in &others[..2] {
        h.peer_vote(*index, VoteType::Precommit, 0, None);
    }
    assert!(h.cs.rs.triggered_timeout_precommit);
    h.timeout(0, RoundStep::PrecommitWait);
    assert_eq!(h.cs.rs.round, Round::new(1));
    if h.cs.rs.step == RoundStep::Propose {
        h.timeout(1, RoundStep::Propose);
    }

    // Still locked, so the node prevotes the locked block in round 1.
    assert_eq!(h.cs.rs.locked_round, Some(Round::zero()));
    let prevotes = h.my_votes(VoteType::Prevote, 1);
    assert_eq!(prevotes.len(), 1);
    assert_eq!(prevotes[0].block_id, Some(block_id));

    // A polka for another block in a later round releases the lock.
    let other_block = block_id_for_unknown_block();
    for index in h.others() {
        h.peer_vote(index, VoteType::Prevote, 1, Some(other_block));
    }
    assert_eq!(h.cs.rs.locked_round, None);
    assert!(h.cs.rs.locked_block.is_none());
    assert!(h.events().iter().any(|event| matches!(event, Event::Unlock(_))));
}

fn block_id_for_unknown_block() -> BlockID {
    block_id(42)
}

#[test]
fn commits_once_with_two_thirds_precommits() {
    let setup = Setup::new(Role::Proposer);
    let mut h = setup.start(Box::new(NilWal));
    let block_id = h.propose_and_lock();

    let others = h.others();
    for index in &others[..2] {
        h.peer_vote(*index, VoteType::Precommit, 0, Some(block_id));
    }

    assert_eq!(h.height(), 2);
    assert_eq!(h.cs.rs.step, RoundStep::NewHeight);
    assert_eq!(h.store.saves(), 1);
    assert_eq!(h.executor_log.lock().unwrap().applied, vec![Height::new(1)]);
    assert_eq!(h.cs.chain_state.last_block_id, Some(block_id));
    let commit = h.store.load_seen_commit(Height::new(1)).unwrap();
    assert_eq!(commit.block_id, block_id);
    let commits = h
        .events()
        .into_iter()
        .filter(|event| matches!(event, Event::CommitBlock(_)))
        .count();
    assert_eq!(commits, 1);

    // A late precommit for the committed height goes into the last commit, and commits nothing again.
    h.peer_vote_at(1, others[2], VoteType::Precommit, 0, Some(block_id));
    let last_commit = h.cs.rs.last_commit.as_ref().unwrap();
    assert!(last_commit.has_all());
    assert_eq!(h.executor_log.lock().unwrap().applied.len(), 1);
    assert_eq!(h.store.saves(), 1);
}

#[test]
fn does_not_save_a_block_twice() {
    let setup = Setup::new(Role::Proposer);
    let mut h = setup.start(Box::new(NilWal));
    let block_id = h.propose_and_lock();

    let block = h.cs.rs.proposal_block.clone().unwrap();
    let parts = h.cs.rs.proposal_block_parts.clone().unwrap();
    h.store.preload(block, parts);

    let others = h.others();
    for index in &others[..2] {
        h.peer_vote(*index, VoteType::Precommit, 0, Some(block_id));
    }

    assert_eq!(h.height(), 2);
    assert_eq!(h.store.saves(), 0);
    assert_eq!(h.executor_log.lock().unwrap().applied, vec![Height::new(1)]);
}

#[test]
fn reports_conflicting_votes_as_evidence() {
    let setup = Setup::new(Role::Validator);
    let mut h = setup.start(Box::new(NilWal));
    h.timeout(0, RoundStep::NewHeight);

    let culprit = h.others()[0];
    let first = h.peer_vote(culprit, VoteType::Prevote, 0, Some(block_id(1)));
    let second = h.peer_vote(culprit, VoteType::Prevote, 0, Some(block_id(2)));

    let evidence = h.evidence.0.lock().unwrap().clone();
    assert_eq!(evidence.len(), 1);
    assert_eq!(evidence[0].address(), first.validator_address);
    let votes = [&evidence[0].vote_a, &evidence[0].vote_b];
    assert!(votes.contains(&&first) && votes.contains(&&second));
    assert!(h.events().iter().any(|event| matches!(event, Event::Evidence(_))));

    // Only the first vote counts.
    let prevotes = h.cs.rs.votes.prevotes(Round::zero()).unwrap();
    assert_eq!(prevotes.get_by_index(culprit as u32), Some(&first));
}

#[test]
fn replaying_the_wal_restores_the_round() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cs.wal").join("wal");
    let setup = Setup::new(Role::Validator);

    let mut h = setup.start(wal_at(&path));
    h.timeout(0, RoundStep::NewHeight);
    let block_id = h.peer_proposal(0);
    assert_eq!(h.cs.rs.step, RoundStep::Prevote);
    let others = h.others();
    for index in &others[..2] {
        h.peer_vote(*index, VoteType::Prevote, 0, Some(block_id));
    }
    assert_eq!(h.cs.rs.step, RoundStep::Precommit);
    assert_eq!(h.cs.rs.locked_round, Some(Round::zero()));
    h.cs.on_exit();
    drop(h);

    // Same key, and the same record of what it signed.
    let mut restarted = setup.start(wal_at(&path));
    assert_eq!(restarted.cs.rs.step, RoundStep::NewHeight);
    restarted.cs.catchup_replay(Height::new(1)).unwrap();

    let rs = &restarted.cs.rs;
    assert_eq!((rs.height, rs.round, rs.step), (Height::new(1), Round::zero(), RoundStep::Precommit));
    assert_eq!(rs.locked_round, Some(Round::zero()));
    assert!(rs.locked_block.as_ref().unwrap().hashes_to(&block_id.hash));
    assert!(rs.proposal.is_some());
    assert!(rs
        .votes
        .prevotes(Round::zero())
        .is_some_and(|prevotes| prevotes.two_thirds_majority() == Some(Some(block_id))));
    assert!(!restarted.cs.replay_mode);
}

#[test]
fn replay_refuses_a_height_the_wal_already_ended() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cs.wal").join("wal");
    let setup = Setup::new(Role::Validator);
    {
        let mut wal = BaseWal::open(&path, DEFAULT_HEAD_SIZE_LIMIT).unwrap();
        wal.write_sync(super::messages::WalMessage::EndHeight(Height::new(1))).unwrap();
    }

    let mut h = setup.start(wal_at(&path));
    let err = h.cs.catchup_replay(Height::new(1)).unwrap_err();
    assert!(matches!(err, super::state::ConsensusError::WalAlreadyCommitted(height) if height == Height::new(1)));
}

#[test]
fn refuses_part_set_headers_no_block_could_have() {
    let setup = Setup::new(Role::Validator);
    let mut h = setup.start(Box::new(NilWal));
    h.timeout(0, RoundStep::NewHeight);

    let huge = BlockID {
        hash: CryptoHash::new([3; 32]),
        parts_header: PartSetHeader {
            total: 4_000_000,
            hash: CryptoHash::new([4; 32]),
        },
    };
    let proposer_address = h.cs.rs.validators.proposer().address;
    let proposer = index_of(&h.cs.rs.validators, &proposer_address);
    let mut proposal = Proposal::new(Height::new(1), Round::zero(), None, huge);
    proposal.signature = h.keypairs[proposer].sign(&proposal.message_bytes(CHAIN_ID));
    let peer = peer_id(&h.keypairs[proposer]);
    h.input(Input::Peer(MsgInfo::from_peer(ConsensusMessage::Proposal(proposal), peer)));

    assert!(h.cs.rs.proposal.is_none());
    assert!(h.cs.rs.proposal_block_parts.is_none());

    // Votes for such a block are not counted either.
    let others = h.others();
    for index in &others {
        h.peer_vote(*index, VoteType::Prevote, 0, Some(huge));
    }
    let prevotes = h.cs.rs.votes.prevotes(Round::zero()).unwrap();
    assert_eq!(prevotes.sum(), TotalPower::new(0));
    assert!(h.cs.rs.proposal_block_parts.is_none());
}

#[test]
fn claimed_majority_admits_a_conflicting_vote() {
    let setup = Setup::new(Role::Validator);
    let mut h = setup.start(Box::new(NilWal));
    h.timeout(0, RoundStep::NewHeight);

    let others = h.others();
    let (culprit, claimant) = (others[0], others[1]);
    h.peer_vote(culprit, VoteType::Prevote, 0, Some(block_id(1)));

    let claim = ConsensusMessage::VoteSetMaj23 {
        height: Height::new(1),
        round: Round::zero(),
        vote_type: VoteType::Prevote,
        block_id: Some(block_id(2)),
    };
    h.input(Input::Peer(MsgInfo::from_peer(claim, peer_id(&h.keypairs[claimant]))));

    h.peer_vote(culprit, VoteType::Prevote, 0, Some(block_id(2)));
    assert_eq!(h.evidence.0.lock().unwrap().len(), 1);
    for index in &others[1..] {
        h.peer_vote(*index, VoteType::Prevote, 0, Some(block_id(2)));
    }

    // The culprit's second vote counts toward the claimed block.
    let prevotes = h.cs.rs.votes.prevotes(Round::zero()).unwrap();
    assert_eq!(prevotes.two_thirds_majority(), Some(Some(block_id(2))));
}

#[test]
fn conflicting_vote_of_its_own_is_not_evidence() {
    let setup = Setup::new(Role::Validator);
    let mut h = setup.start(Box::new(NilWal));
    h.timeout(0, RoundStep::NewHeight);
    h.timeout(0, RoundStep::Propose);
    assert_eq!(h.my_votes(VoteType::Prevote, 0)[0].block_id, None);

    // A vote under the node's key that it never cast, relayed by a peer.
    let me = h.me;
    h.peer_vote(me, VoteType::Prevote, 0, Some(block_id(1)));

    assert!(h.evidence.0.lock().unwrap().is_empty());
    assert!(!h.events().iter().any(|event| matches!(event, Event::Evidence(_))));
    let prevotes = h.cs.rs.votes.prevotes(Round::zero()).unwrap();
    assert_eq!(prevotes.get_by_index(me as u32).unwrap().block_id, None);
}

#[test]
fn next_height_messages_are_handled_after_the_commit() {
    let setup = Setup::new(Role::Proposer);
    let mut h = setup.start(Box::new(NilWal));
    let block_id = h.propose_and_lock();

    let others = h.others();
    let early = h.peer_vote_at(2, others[2], VoteType::Prevote, 0, None);
    assert_eq!(h.cs.future_messages.len(), 1);

    for index in &others[..2] {
        h.peer_vote(*index, VoteType::Precommit, 0, Some(block_id));
    }

    assert_eq!(h.height(), 2);
    assert!(h.cs.future_messages.is_empty());
    let prevotes = h.cs.rs.votes.prevotes(Round::zero()).unwrap();
    assert_eq!(prevotes.get_by_index(others[2] as u32), Some(&early));
}

#[test]
fn all_precommits_skip_the_commit_timeout() {
    let setup = Setup::new(Role::Proposer);
    let config = ConsensusConfiguration {
        skip_timeout_commit: true,
        ..test_config()
    };
    let mut h = setup.start_with(config, Box::new(NilWal));
    let block_id = h.propose_and_lock();

    let others = h.others();
    for index in &others[..2] {
        h.peer_vote(*index, VoteType::Precommit, 0, Some(block_id));
    }
    assert_eq!((h.height(), h.cs.rs.step), (2, RoundStep::NewHeight));

    // The last precommit completes the last commit, so round 0 starts without waiting.
    h.peer_vote_at(1, others[2], VoteType::Precommit, 0, Some(block_id));
    assert!(h.cs.rs.last_commit.as_ref().unwrap().has_all());
    assert_eq!((h.height(), h.cs.rs.round), (2, Round::zero()));
    assert!(h.cs.rs.step >= RoundStep::Propose);
}

#[test]
fn halts_when_the_block_cannot_be_applied() {
    let setup = Setup::new(Role::Proposer);
    let mut h = setup.start(Box::new(NilWal));
    let block_id = h.propose_and_lock();
    h.executor_log.lock().unwrap().fail_apply = true;

    let others = h.others();
    let precommits: Vec<Vote> = others
        .iter()
        .map(|index| signed_vote(&h.keypairs[*index], *index as u32, VoteType::Precommit, 1, 0, Some(block_id)))
        .collect();
    let mailbox = h.cs.mailbox.clone();
    let handle = ConsensusHandle::new(mailbox.clone(), h.cs.status());
    for (index, vote) in others.iter().zip(precommits) {
        mailbox.push_peer(MsgInfo::from_peer(ConsensusMessage::Vote(vote), peer_id(&h.keypairs[*index])));
    }

    // Returns without a quit: the failure stops the loop.
    h.cs.run();

    assert!(handle.is_halted());
    assert_eq!(handle.last_height(), Height::new(0));
    assert!(h.executor_log.lock().unwrap().applied.is_empty());
    // The third precommit was never taken.
    assert!(matches!(mailbox.try_recv(), Some(Input::Peer(_))));
}
