/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build and run a replica.
//!
//! A replica is one process taking part in (or following) consensus on a chain. Each replica that
//! votes is a 'validator' and is identified by the Ed25519 public key its
//! [`PrivValidator`](crate::priv_validator::PrivValidator) signs with. A replica without a
//! `PrivValidator` still follows consensus and commits blocks, but never proposes or votes.
//!
//! The key components of this module are:
//! - The builder-pattern interface to construct a [specification of the replica](ReplicaSpec) with:
//!   1. `ReplicaSpec::builder` to construct a `ReplicaSpecBuilder`,
//!   2. The setters of the `ReplicaSpecBuilder`, and
//!   3. The `ReplicaSpecBuilder::build` method to construct a [ReplicaSpec],
//! - The function to [start](ReplicaSpec::start) a [Replica] given its specification,
//! - [The type](Replica) which keeps the replica alive.
//!
//! ## Starting a replica
//!
//! ```ignore
//! let replica =
//!     ReplicaSpec::builder()
//!     .executor(executor)
//!     .block_store(block_store)
//!     .evidence_pool(evidence_pool)
//!     .network(network)
//!     .priv_validator(Box::new(LocalPrivValidator::new(signing_key)))
//!     .chain_state(chain_state)
//!     .configuration(configuration)
//!     .on_commit_block(commit_handler)
//!     .build()
//!     .start()?;
//! ```
//!
//! ### Required setters
//!
//! - `.executor(...)`
//! - `.block_store(...)`
//! - `.evidence_pool(...)`
//! - `.network(...)`
//! - `.chain_state(...)`
//! - `.configuration(...)`
//!
//! ### Optional setters
//!
//! - `.priv_validator(...)`
//! - `.txs_available(...)`
//! - one `.on_*(...)` setter for each kind of event in [crate::events].
//!
//! ## Restarting
//!
//! If [`Configuration::wal_path`] is set, everything the replica receives and does is written to a
//! WAL there. On start, the WAL is replayed from the end of the last committed height, so that the
//! replica resumes the current height exactly where it left off and never signs anything that
//! conflicts with what it signed before stopping.

use std::{
    path::PathBuf,
    sync::{
        mpsc::{self, Receiver, Sender},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use typed_builder::TypedBuilder;

use crate::{
    consensus::{
        handle::ConsensusHandle,
        mailbox::Mailbox,
        state::{ConsensusConfiguration, ConsensusError, ConsensusState},
    },
    event_bus::*,
    events::*,
    networking::{network::Network, receiving::start_polling},
    pluggables::{BlockExecutor, BlockStore, EvidencePool},
    priv_validator::PrivValidator,
    types::chain_state::ChainState,
    wal::{BaseWal, NilWal, Wal, DEFAULT_HEAD_SIZE_LIMIT},
};

/// Stores the user-defined parameters of the consensus protocol.
///
/// ## Timeouts
///
/// The propose, prevote and precommit timeouts grow by their `_delta` with every round, so that a
/// height that fails to decide in round 0 eventually gives slow validators enough time.
///
/// `timeout_commit` is how long the replica waits after committing a block before starting the next
/// height, to collect precommits of slower validators for the commit it will carry. If
/// `skip_timeout_commit` is set, the replica moves on as soon as it has every precommit.
///
/// ## Empty blocks
///
/// If `create_empty_blocks` is false, round 0 of each height waits until the mempool signals through
/// [`ReplicaSpec`]'s `txs_available` channel. If it is true and `create_empty_blocks_interval` is
/// non-zero, round 0 waits for transactions for at most that long.
///
/// ## Log Events
///
/// This crate logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
/// printed onto a terminal or to a file, set up a [logging
/// implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
#[derive(Clone, Debug, TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. Every setter is optional and has a default
    suited to a local test network.
"))]
pub struct Configuration {
    #[builder(default, setter(strip_option, doc = "Set the path of the write-ahead log. Without one, the replica cannot recover the current height after a restart."))]
    pub wal_path: Option<PathBuf>,
    #[builder(default = DEFAULT_HEAD_SIZE_LIMIT, setter(doc = "Set the size in bytes at which the head file of the WAL is rotated."))]
    pub wal_head_size_limit: u64,
    #[builder(default = Duration::from_millis(3000), setter(doc = "Set how long to wait for a proposal in round 0."))]
    pub timeout_propose: Duration,
    #[builder(default = Duration::from_millis(500), setter(doc = "Set how much longer to wait for a proposal with each round."))]
    pub timeout_propose_delta: Duration,
    #[builder(default = Duration::from_millis(1000), setter(doc = "Set how long to wait for more prevotes after seeing +2/3 of any in round 0."))]
    pub timeout_prevote: Duration,
    #[builder(default = Duration::from_millis(500), setter(doc = "Set how much longer to wait for prevotes with each round."))]
    pub timeout_prevote_delta: Duration,
    #[builder(default = Duration::from_millis(1000), setter(doc = "Set how long to wait for more precommits after seeing +2/3 of any in round 0."))]
    pub timeout_precommit: Duration,
    #[builder(default = Duration::from_millis(500), setter(doc = "Set how much longer to wait for precommits with each round."))]
    pub timeout_precommit_delta: Duration,
    #[builder(default = Duration::from_millis(1000), setter(doc = "Set how long to wait after committing a block before starting the next height."))]
    pub timeout_commit: Duration,
    #[builder(default = false, setter(doc = "Start the next height as soon as every precommit is in, instead of waiting out the commit timeout."))]
    pub skip_timeout_commit: bool,
    #[builder(default = true, setter(doc = "Propose blocks even when there are no transactions."))]
    pub create_empty_blocks: bool,
    #[builder(default = Duration::ZERO, setter(doc = "Set how long round 0 waits for transactions before proposing an empty block. Zero means it does not wait."))]
    pub create_empty_blocks_interval: Duration,
    #[builder(default = false, setter(doc = "Accept view change messages that name the proposer of round 0, and pre-build proposals in the background. Experimental."))]
    pub active_view_change: bool,
    #[builder(default = 1000, setter(doc = "Set how many messages from peers may wait to be handled. The oldest are dropped beyond this."))]
    pub peer_msg_queue_capacity: usize,
    #[builder(default = 1000, setter(doc = "Set how many of the replica's own messages may wait to be handled."))]
    pub internal_msg_queue_capacity: usize,
    #[builder(default = false, setter(doc = "Log every event with the default handlers in [crate::logging]."))]
    pub log_events: bool,
}

impl From<&Configuration> for ConsensusConfiguration {
    fn from(config: &Configuration) -> Self {
        ConsensusConfiguration {
            timeout_propose: config.timeout_propose,
            timeout_propose_delta: config.timeout_propose_delta,
            timeout_prevote: config.timeout_prevote,
            timeout_prevote_delta: config.timeout_prevote_delta,
            timeout_precommit: config.timeout_precommit,
            timeout_precommit_delta: config.timeout_precommit_delta,
            timeout_commit: config.timeout_commit,
            skip_timeout_commit: config.skip_timeout_commit,
            create_empty_blocks: config.create_empty_blocks,
            create_empty_blocks_interval: config.create_empty_blocks_interval,
            active_view_change: config.active_view_change,
        }
    }
}

/// Stores all necessary parameters and trait implementations required to run the [Replica].
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [ReplicaSpec]. On the builder call the following methods to construct a valid [ReplicaSpec].

    Required:
    - `.executor(...)`
    - `.block_store(...)`
    - `.evidence_pool(...)`
    - `.network(...)`
    - `.chain_state(...)`
    - `.configuration(...)`

    Optional:
    - `.priv_validator(...)`
    - `.txs_available(...)`
    - `.on_new_round_step(...)`
    - `.on_timeout_propose(...)`
    - `.on_timeout_wait(...)`
    - `.on_propose(...)`
    - `.on_receive_proposal(...)`
    - `.on_complete_proposal(...)`
    - `.on_vote(...)`
    - `.on_receive_vote(...)`
    - `.on_lock(...)`
    - `.on_unlock(...)`
    - `.on_valid_block(...)`
    - `.on_commit_block(...)`
    - `.on_prune_blocks(...)`
    - `.on_evidence(...)`
"))]
pub struct ReplicaSpec<E: BlockExecutor, B: BlockStore, P: EvidencePool, N: Network + 'static> {
    // Required parameters
    #[builder(setter(doc = "Set the block executor, which validates, builds and applies blocks. Required."))]
    executor: E,
    #[builder(setter(doc = "Set the store for committed blocks and their commits. Required."))]
    block_store: B,
    #[builder(setter(doc = "Set the pool that collects evidence of double signing. Required."))]
    evidence_pool: P,
    #[builder(setter(doc = "Set the implementation of peer-to-peer networking. Required."))]
    network: N,
    #[builder(setter(doc = "Set the state of the chain after the latest committed block. Required."))]
    chain_state: ChainState,
    #[builder(setter(doc = "Set the [configuration](Configuration) of the consensus protocol. Required."))]
    configuration: Configuration,
    // Optional parameters
    #[builder(default, setter(strip_option, doc = "Set the signer of the replica's proposals and votes. Without one the replica only follows consensus. Optional."))]
    priv_validator: Option<Box<dyn PrivValidator>>,
    #[builder(default, setter(strip_option, doc = "Set a channel on which the mempool signals that transactions are available. Optional."))]
    txs_available: Option<Receiver<()>>,
    #[builder(default, setter(transform = |handler: impl Fn(&NewRoundStepEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<NewRoundStepEvent>),
    doc = "Register a handler closure to be invoked after the replica moves to a new step. Optional."))]
    on_new_round_step: Option<HandlerPtr<NewRoundStepEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&TimeoutProposeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<TimeoutProposeEvent>),
    doc = "Register a handler closure to be invoked after the replica gives up waiting for a proposal. Optional."))]
    on_timeout_propose: Option<HandlerPtr<TimeoutProposeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&TimeoutWaitEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<TimeoutWaitEvent>),
    doc = "Register a handler closure to be invoked after the replica gives up waiting for more votes. Optional."))]
    on_timeout_wait: Option<HandlerPtr<TimeoutWaitEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ProposeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ProposeEvent>),
    doc = "Register a handler closure to be invoked after the replica broadcasts a proposal. Optional."))]
    on_propose: Option<HandlerPtr<ProposeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveProposalEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveProposalEvent>),
    doc = "Register a handler closure to be invoked after the replica accepts a proposal. Optional."))]
    on_receive_proposal: Option<HandlerPtr<ReceiveProposalEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CompleteProposalEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CompleteProposalEvent>),
    doc = "Register a handler closure to be invoked after the replica receives every part of a proposed block. Optional."))]
    on_complete_proposal: Option<HandlerPtr<CompleteProposalEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&VoteEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<VoteEvent>),
    doc = "Register a handler closure to be invoked after the replica signs and broadcasts a vote. Optional."))]
    on_vote: Option<HandlerPtr<VoteEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveVoteEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveVoteEvent>),
    doc = "Register a handler closure to be invoked after the replica counts a vote. Optional."))]
    on_receive_vote: Option<HandlerPtr<ReceiveVoteEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&LockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<LockEvent>),
    doc = "Register a handler closure to be invoked after the replica locks on a block. Optional."))]
    on_lock: Option<HandlerPtr<LockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&UnlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<UnlockEvent>),
    doc = "Register a handler closure to be invoked after the replica releases its lock. Optional."))]
    on_unlock: Option<HandlerPtr<UnlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ValidBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ValidBlockEvent>),
    doc = "Register a handler closure to be invoked after the replica learns of a block with +2/3 prevotes. Optional."))]
    on_valid_block: Option<HandlerPtr<ValidBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CommitBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CommitBlockEvent>),
    doc = "Register a handler closure to be invoked after a block is committed and applied. Optional."))]
    on_commit_block: Option<HandlerPtr<CommitBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&PruneBlocksEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<PruneBlocksEvent>),
    doc = "Register a handler closure to be invoked after old blocks are pruned from the block store. Optional."))]
    on_prune_blocks: Option<HandlerPtr<PruneBlocksEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&EvidenceEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<EvidenceEvent>),
    doc = "Register a handler closure to be invoked after the replica reports a validator for double signing. Optional."))]
    on_evidence: Option<HandlerPtr<EvidenceEvent>>,
}

impl<E: BlockExecutor, B: BlockStore, P: EvidencePool, N: Network + 'static> ReplicaSpec<E, B, P, N> {
    /// Starts all threads and channels associated with running a replica, and returns the handles to
    /// them in a [Replica] struct.
    ///
    /// Fails if the WAL cannot be opened, if replaying it finds corrupted data, or if it shows the
    /// replica's state is behind what it already committed.
    pub fn start(self) -> Result<Replica, ConsensusError> {
        let configuration = self.configuration;
        let mailbox = Arc::new(Mailbox::new(
            configuration.peer_msg_queue_capacity,
            configuration.internal_msg_queue_capacity,
        ));

        let event_handlers = EventHandlers::new(
            configuration.log_events,
            self.on_new_round_step,
            self.on_timeout_propose,
            self.on_timeout_wait,
            self.on_propose,
            self.on_receive_proposal,
            self.on_complete_proposal,
            self.on_vote,
            self.on_receive_vote,
            self.on_lock,
            self.on_unlock,
            self.on_valid_block,
            self.on_commit_block,
            self.on_prune_blocks,
            self.on_evidence,
        );
        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };

        let wal: Box<dyn Wal> = match &configuration.wal_path {
            Some(path) => Box::new(BaseWal::open(path, configuration.wal_head_size_limit)?),
            None => Box::new(NilWal),
        };

        let mut consensus = ConsensusState::new(
            ConsensusConfiguration::from(&configuration),
            self.chain_state,
            Arc::new(Mutex::new(self.executor)),
            self.block_store,
            self.evidence_pool,
            self.priv_validator,
            wal,
            self.network.clone(),
            mailbox.clone(),
            event_publisher,
        )?;

        if let Some(wal_path) = &configuration.wal_path {
            let height = consensus.height();
            match consensus.catchup_replay(height) {
                Ok(()) => (),
                Err(e @ ConsensusError::WalAlreadyCommitted(_)) => return Err(e),
                Err(ConsensusError::Wal(e)) if e.is_data_corruption() => {
                    log::error!("Encountered corrupt WAL file {}: {}", wal_path.display(), e);
                    log::error!(
                        "Please repair the WAL file before restarting: back up {path} and its numbered segments, \
                         rebuild it with tm_consensus::wal::repair(\"{path}\", <new path>), which keeps the records \
                         before the corruption, then move the rebuilt file to {path}",
                        path = wal_path.display()
                    );
                    return Err(ConsensusError::Wal(e));
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => log::error!("Error on catchup replay, proceeding to start anyway: {}", e),
            }
        }

        consensus.start();
        let handle = ConsensusHandle::new(mailbox.clone(), consensus.status());
        let consensus = thread::spawn(move || consensus.run());

        let (poller_shutdown, poller_shutdown_receiver) = mpsc::channel();
        let poller = start_polling(self.network, mailbox, self.txs_available, poller_shutdown_receiver);

        let (event_bus_shutdown, event_bus) = match event_subscriber {
            Some(event_subscriber) => {
                let (shutdown, shutdown_receiver) = mpsc::channel();
                (
                    Some(shutdown),
                    Some(start_event_bus(event_handlers, event_subscriber, shutdown_receiver)),
                )
            }
            None => (None, None),
        };

        Ok(Replica {
            handle,
            consensus: Some(consensus),
            poller: Some(poller),
            poller_shutdown,
            event_bus,
            event_bus_shutdown,
        })
    }
}

/// A handle to the background threads of a replica. When this value is dropped, all background
/// threads are gracefully shut down.
pub struct Replica {
    handle: ConsensusHandle,
    consensus: Option<JoinHandle<()>>,
    poller: Option<JoinHandle<()>>,
    poller_shutdown: Sender<()>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl Replica {
    /// Returns a [ConsensusHandle] for feeding messages to the replica and observing its progress.
    pub fn handle(&self) -> ConsensusHandle {
        self.handle.clone()
    }
}

impl Drop for Replica {
    fn drop(&mut self) {
        // The consensus thread stops first, so that it flushes and closes its WAL while the poller
        // can still feed it.
        self.handle.quit();
        if let Some(consensus) = self.consensus.take() {
            if consensus.join().is_err() {
                log::error!("Consensus thread panicked");
            }
        }

        let _ = self.poller_shutdown.send(());
        if let Some(poller) = self.poller.take() {
            if poller.join().is_err() {
                log::error!("Poller thread panicked");
            }
        }

        if let Some(shutdown) = &self.event_bus_shutdown {
            let _ = shutdown.send(());
        }
        if let Some(event_bus) = self.event_bus.take() {
            if event_bus.join().is_err() {
                log::error!("Event bus thread panicked");
            }
        }
    }
}
