/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The consensus state machine and its receive loop.
//!
//! [`ConsensusState`] owns the [`RoundState`] and everything the protocol needs to advance it: the
//! WAL, the timeout ticker, the signer, and the pluggable block executor, block store and evidence
//! pool. Only the thread that runs [`ConsensusState::run`] ever touches it. Other threads talk to it
//! through the [`Mailbox`] and read its progress from a [`SharedStatus`].

use std::{
    collections::VecDeque,
    fmt::{self, Display, Formatter},
    panic::{self, AssertUnwindSafe},
    sync::{mpsc::Sender, Arc, Mutex, MutexGuard},
    time::{Duration, SystemTime},
};

use crate::{
    events::{Event, NewRoundStepEvent, TimeoutProposeEvent, TimeoutWaitEvent},
    networking::{
        network::{Network, ValidatorSetUpdateHandle},
        sending::SenderHandle,
    },
    pluggables::{BlockExecutor, BlockStore, EvidencePool},
    priv_validator::PrivValidator,
    timeout_ticker::TimeoutTicker,
    types::{
        block::BlockID,
        chain_state::ChainState,
        commit::Commit,
        crypto_primitives::VerifyingKey,
        data_types::{Height, PeerID, Round, Timestamp, VerifyingKeyBytes},
        validator_set::ValidatorSet,
        vote::VoteType,
    },
    wal::{Wal, WalError},
};

use super::{
    handle::SharedStatus,
    height_vote_set::{AddVoteError, HeightVoteSet},
    mailbox::{Input, Mailbox},
    messages::{ConsensusMessage, MsgInfo, TimeoutInfo, WalMessage},
    prebuild::{PrebuildTask, ProposalPrebuilder},
    round_state::{RoundState, RoundStep},
    telemetry::BlockTransport,
    vote_set::commit_to_vote_set,
};

/// How many messages for the next height the node keeps until it gets there.
const MAX_FUTURE_MESSAGES: usize = 1000;

/// Timing and behaviour parameters of the consensus core.
#[derive(Clone, Debug)]
pub(crate) struct ConsensusConfiguration {
    pub(crate) timeout_propose: Duration,
    pub(crate) timeout_propose_delta: Duration,
    pub(crate) timeout_prevote: Duration,
    pub(crate) timeout_prevote_delta: Duration,
    pub(crate) timeout_precommit: Duration,
    pub(crate) timeout_precommit_delta: Duration,
    pub(crate) timeout_commit: Duration,
    pub(crate) skip_timeout_commit: bool,
    pub(crate) create_empty_blocks: bool,
    pub(crate) create_empty_blocks_interval: Duration,
    pub(crate) active_view_change: bool,
}

impl ConsensusConfiguration {
    pub(crate) fn propose(&self, round: Round) -> Duration {
        self.timeout_propose + self.timeout_propose_delta * round.int()
    }

    pub(crate) fn prevote(&self, round: Round) -> Duration {
        self.timeout_prevote + self.timeout_prevote_delta * round.int()
    }

    pub(crate) fn precommit(&self, round: Round) -> Duration {
        self.timeout_precommit + self.timeout_precommit_delta * round.int()
    }

    /// When round 0 of the next height starts, given the time the last height was committed.
    pub(crate) fn commit(&self, t: Timestamp) -> Timestamp {
        t.plus(self.timeout_commit)
    }

    /// Whether round 0 waits for transactions (or the empty block interval) before proposing.
    pub(crate) fn wait_for_txs(&self) -> bool {
        !self.create_empty_blocks || self.create_empty_blocks_interval > Duration::ZERO
    }
}

#[derive(Debug)]
pub enum ConsensusError {
    /// An invariant of the commit path does not hold. The node cannot safely continue.
    Fatal(String),
    Wal(WalError),
    /// The WAL already ends the height the node is about to decide on, so the node's state is behind
    /// its WAL and must be recovered before it can start.
    WalAlreadyCommitted(Height),
    /// The WAL holds nothing to replay for the current height.
    WalReplay(String),
    AddVote(AddVoteError),
}

impl ConsensusError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ConsensusError::Fatal(_))
    }
}

impl Display for ConsensusError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConsensusError::Fatal(reason) => write!(f, "{}", reason),
            ConsensusError::Wal(err) => write!(f, "{}", err),
            ConsensusError::WalAlreadyCommitted(height) => write!(
                f,
                "WAL should not contain #ENDHEIGHT {}, the block was committed but the state was not updated",
                height
            ),
            ConsensusError::WalReplay(reason) => write!(f, "cannot replay WAL: {}", reason),
            ConsensusError::AddVote(err) => write!(f, "{:?}", err),
        }
    }
}

impl From<WalError> for ConsensusError {
    fn from(value: WalError) -> Self {
        ConsensusError::Wal(value)
    }
}

impl From<AddVoteError> for ConsensusError {
    fn from(value: AddVoteError) -> Self {
        ConsensusError::AddVote(value)
    }
}

pub(crate) fn fatal(reason: impl Into<String>) -> ConsensusError {
    ConsensusError::Fatal(reason.into())
}

pub(crate) struct ConsensusState<E: BlockExecutor, B: BlockStore, P: EvidencePool, N: Network> {
    pub(super) config: ConsensusConfiguration,
    /// State of the chain after the last committed block.
    pub(super) chain_state: ChainState,
    pub(super) rs: RoundState,

    pub(super) executor: Arc<Mutex<E>>,
    pub(super) block_store: B,
    pub(super) evidence_pool: P,
    pub(super) priv_validator: Option<Box<dyn PrivValidator>>,
    pub(super) priv_validator_pub_key: Option<VerifyingKey>,

    pub(super) wal: Box<dyn Wal>,
    pub(super) ticker: TimeoutTicker,
    pub(super) mailbox: Arc<Mailbox>,
    pub(super) sender: SenderHandle<N>,
    pub(super) validator_set_update_handle: ValidatorSetUpdateHandle<N>,
    pub(super) event_publisher: Option<Sender<Event>>,
    pub(super) status: Arc<SharedStatus>,

    pub(super) block_transport: BlockTransport,
    pub(super) prebuilder: Option<ProposalPrebuilder>,
    /// Proposer named by an accepted view change, for round 0 of the given height.
    pub(super) view_change: Option<(Height, VerifyingKeyBytes)>,
    /// Peer messages for the next height, handled once the node gets there.
    pub(super) future_messages: VecDeque<MsgInfo>,
    /// Set while replaying the WAL.
    pub(super) replay_mode: bool,
}

impl<E: BlockExecutor, B: BlockStore, P: EvidencePool, N: Network> ConsensusState<E, B, P, N> {
    /// Set up the core for the height after `chain_state`. Timeouts fire into `mailbox`.
    ///
    /// If `chain_state` has committed blocks, the precommits for the last one are rebuilt from the
    /// commit that `block_store` saved for it.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: ConsensusConfiguration,
        chain_state: ChainState,
        executor: Arc<Mutex<E>>,
        block_store: B,
        evidence_pool: P,
        priv_validator: Option<Box<dyn PrivValidator>>,
        wal: Box<dyn Wal>,
        mut network: N,
        mailbox: Arc<Mailbox>,
        event_publisher: Option<Sender<Event>>,
    ) -> Result<Self, ConsensusError> {
        let ticker = {
            let mailbox = mailbox.clone();
            TimeoutTicker::start(move |timeout_info| mailbox.push_timeout(timeout_info))
        };

        let priv_validator_pub_key = match priv_validator.as_ref().map(|pv| pv.get_pub_key()) {
            Some(Ok(pub_key)) => Some(pub_key),
            Some(Err(e)) => {
                log::error!("Failed to get private validator pubkey: {:?}", e);
                None
            }
            None => None,
        };

        let prebuilder = if config.active_view_change {
            Some(ProposalPrebuilder::start(executor.clone()))
        } else {
            None
        };

        network.init_validator_set(chain_state.validators.clone());

        let rs = RoundState::new(chain_state.chain_id);
        let status = Arc::new(SharedStatus::new(rs.snapshot(), chain_state.clone()));
        // Placeholder without validators, so that update_to_state below takes `chain_state`.
        let empty_state = ChainState::genesis(
            chain_state.chain_id,
            chain_state.initial_height,
            ValidatorSet::default(),
            chain_state.app_hash,
        );

        let mut cs = ConsensusState {
            config,
            chain_state: empty_state,
            rs,
            executor,
            block_store,
            evidence_pool,
            priv_validator,
            priv_validator_pub_key,
            wal,
            ticker,
            mailbox,
            sender: SenderHandle::new(network.clone()),
            validator_set_update_handle: ValidatorSetUpdateHandle::new(network),
            event_publisher,
            status,
            block_transport: BlockTransport::default(),
            prebuilder,
            view_change: None,
            future_messages: VecDeque::new(),
            replay_mode: false,
        };

        if chain_state.last_block_height >= chain_state.initial_height {
            cs.reconstruct_last_commit(&chain_state)?;
        }
        cs.update_to_state(chain_state)?;
        Ok(cs)
    }

    pub(crate) fn status(&self) -> Arc<SharedStatus> {
        self.status.clone()
    }

    /// The height the node is deciding on.
    pub(crate) fn height(&self) -> Height {
        self.rs.height
    }

    /// Schedule the start of the current height. Called once the node is ready to take inputs.
    pub(crate) fn start(&mut self) {
        self.schedule_round0();
    }

    /// Run the receive loop until the mailbox says quit or something fatal happens. The node never
    /// resumes after a fatal error: doing so could make it sign conflicting votes.
    pub(crate) fn run(mut self) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.receive_routine()));
        match outcome {
            Ok(Ok(())) => log::info!("Consensus receive loop stopped"),
            Ok(Err(e)) => {
                log::error!("CONSENSUS FAILURE!!! {}", e);
                self.status.set_halted();
            }
            Err(panic) => {
                log::error!("CONSENSUS FAILURE!!! {}", panic_message(panic.as_ref()));
                self.status.set_halted();
            }
        }
        self.on_exit();
    }

    pub(super) fn on_exit(&mut self) {
        if let Err(e) = self.wal.stop() {
            log::error!("Failed to stop the WAL: {}", e);
        }
        self.ticker.stop();
    }

    fn receive_routine(&mut self) -> Result<(), ConsensusError> {
        loop {
            let input = self.mailbox.recv();
            if !self.handle_input(input)? {
                return Ok(());
            }
        }
    }

    /// Log `input` to the WAL and handle it. Returns false if the input says to stop.
    pub(super) fn handle_input(&mut self, input: Input) -> Result<bool, ConsensusError> {
        match input {
            Input::TxsAvailable => self.handle_txs_available()?,
            Input::Peer(msg_info) => {
                if let Err(e) = self.wal.write(WalMessage::MsgInfo(msg_info.clone())) {
                    log::error!("Failed to write peer message to the WAL: {}", e);
                }
                self.handle_msg(msg_info)?;
            }
            Input::Internal(msg_info) => {
                // The node's own messages must be on disk before they take effect, or a restart
                // could make it sign something different for the same step.
                self.wal
                    .write_sync(WalMessage::MsgInfo(msg_info.clone()))
                    .map_err(|e| fatal(format!("failed to write {:?} to the consensus WAL: {}", msg_info.msg, e)))?;
                self.handle_msg(msg_info)?;
            }
            Input::Timeout(timeout_info) => {
                if let Err(e) = self.wal.write(WalMessage::TimeoutInfo(timeout_info)) {
                    log::error!("Failed to write timeout to the WAL: {}", e);
                }
                self.handle_timeout(timeout_info)?;
            }
            Input::Quit => return Ok(false),
        }
        Ok(true)
    }

    /// Handle a proposal, block part, vote, or view change. Problems with the message itself are
    /// logged; only fatal errors are returned.
    pub(super) fn handle_msg(&mut self, msg_info: MsgInfo) -> Result<(), ConsensusError> {
        let MsgInfo { msg, peer_id } = msg_info;

        if peer_id.is_some()
            && msg.height() == self.rs.height + 1
            && !matches!(msg, ConsensusMessage::ViewChange { .. })
        {
            self.buffer_future_message(MsgInfo { msg, peer_id });
            return Ok(());
        }

        match msg {
            ConsensusMessage::Proposal(proposal) => {
                if let Err(e) = self.set_proposal(proposal, peer_id) {
                    log::info!("Rejected proposal from {:?}: {:?}", peer_id, e);
                }
            }
            ConsensusMessage::BlockPart { height, round, part } => {
                match self.add_proposal_block_part(height, round, part, peer_id) {
                    Ok(true) => {
                        if self.rs.proposal_block.is_some()
                            && self.rs.proposal_block_parts.as_ref().is_some_and(|parts| parts.is_complete())
                        {
                            self.handle_complete_proposal(height)?;
                        }
                    }
                    Ok(false) => (),
                    Err(e) => log::info!("Rejected block part from {:?}: {:?}", peer_id, e),
                }
            }
            ConsensusMessage::Vote(vote) => {
                self.try_add_vote(vote, peer_id)?;
            }
            ConsensusMessage::VoteSetMaj23 {
                height,
                round,
                vote_type,
                block_id,
            } => self.set_peer_maj23(height, round, vote_type, block_id, peer_id),
            ConsensusMessage::ViewChange { height, new_proposer } => {
                self.handle_view_change(height, new_proposer)?;
            }
        }
        Ok(())
    }

    // Only peers make majority claims, and only claims about the current height are kept.
    fn set_peer_maj23(
        &mut self,
        height: Height,
        round: Round,
        vote_type: VoteType,
        block_id: Option<BlockID>,
        peer_id: Option<PeerID>,
    ) {
        let Some(peer) = peer_id else {
            return;
        };
        if height != self.rs.height {
            log::debug!("Ignoring +2/3 claim by {:?} for height {}, at {}", peer, height, self.rs.height);
            return;
        }
        if let Err(e) = self.rs.votes.set_peer_maj23(round, vote_type, peer, block_id) {
            log::info!("Rejected +2/3 claim by {:?} for {}/{}: {:?}", peer, height, round, e);
        }
    }

    pub(super) fn handle_timeout(&mut self, timeout_info: TimeoutInfo) -> Result<(), ConsensusError> {
        let TimeoutInfo { height, round, step, .. } = timeout_info;
        if height != self.rs.height || round < self.rs.round || (round == self.rs.round && step < self.rs.step) {
            log::debug!("Ignoring tock because we're ahead: {:?}, at {}", timeout_info, self.rs.event());
            return Ok(());
        }

        match step {
            RoundStep::NewHeight => self.enter_new_round(height, Round::zero()),
            RoundStep::NewRound => {
                if self.rs.step == RoundStep::NewHeight {
                    // Transactions became available before round 0 started.
                    self.advance_to_new_round(height, Round::zero());
                }
                self.enter_propose(height, Round::zero())
            }
            RoundStep::Propose => {
                self.publish(Event::TimeoutPropose(TimeoutProposeEvent {
                    timestamp: SystemTime::now(),
                    height,
                    round,
                }));
                self.enter_prevote(height, round)
            }
            RoundStep::PrevoteWait => {
                self.publish_timeout_wait(height, round, step);
                self.enter_precommit(height, round)
            }
            RoundStep::PrecommitWait => {
                self.publish_timeout_wait(height, round, step);
                self.enter_precommit(height, round)?;
                self.enter_new_round(height, round.next())
            }
            other => Err(fatal(format!("invalid timeout step: {:?}", other))),
        }
    }

    fn publish_timeout_wait(&self, height: Height, round: Round, step: RoundStep) {
        self.publish(Event::TimeoutWait(TimeoutWaitEvent {
            timestamp: SystemTime::now(),
            height,
            round,
            step,
        }))
    }

    pub(super) fn handle_txs_available(&mut self) -> Result<(), ConsensusError> {
        // Only round 0 waits for transactions.
        if self.rs.round != Round::zero() {
            return Ok(());
        }
        let height = self.rs.height;
        match self.rs.step {
            RoundStep::NewHeight => {
                if self.need_proof_block(height)? {
                    // Round 0 proposes as soon as the commit timeout is over anyway.
                    return Ok(());
                }
                // +1ms so that the NewRound timeout comes after the NewHeight one.
                let timeout_commit =
                    self.rs.start_time.saturating_duration_since(Timestamp::now()) + Duration::from_millis(1);
                self.schedule_timeout(timeout_commit, height, Round::zero(), RoundStep::NewRound);
                Ok(())
            }
            RoundStep::NewRound => self.enter_propose(height, Round::zero()),
            _ => Ok(()),
        }
    }

    /// Start round 0 of the current height once the commit timeout has passed.
    pub(super) fn schedule_round0(&mut self) {
        let sleep = self.rs.start_time.saturating_duration_since(Timestamp::now());
        self.schedule_timeout(sleep, self.rs.height, Round::zero(), RoundStep::NewHeight);
        if self.config.active_view_change {
            self.request_prebuild();
        }
    }

    fn request_prebuild(&mut self) {
        let Some(pub_key) = self.priv_validator_pub_key else {
            return;
        };
        let height = self.rs.height;
        let Some(last_commit) = self.last_commit_for_proposal(height) else {
            return;
        };
        let task = PrebuildTask {
            height,
            chain_state: self.chain_state.clone(),
            last_commit,
            proposer: pub_key.to_bytes(),
        };
        if let Some(prebuilder) = self.prebuilder.as_mut() {
            prebuilder.request(task);
        }
    }

    pub(super) fn schedule_timeout(&self, duration: Duration, height: Height, round: Round, step: RoundStep) {
        self.ticker
            .schedule_timeout(TimeoutInfo::new(duration, height, round, step))
    }

    /// Record a change of step: in the WAL, for observers of the shared status, and as an event.
    pub(super) fn new_step(&mut self) {
        let event = self.rs.event();
        if let Err(e) = self.wal.write(WalMessage::RoundState(event)) {
            log::error!("Failed to write round state to the WAL: {}", e);
        }
        self.status.set_round_state(self.rs.snapshot());
        self.publish(Event::NewRoundStep(NewRoundStepEvent {
            timestamp: SystemTime::now(),
            height: event.height,
            round: event.round,
            step: event.step,
        }));
    }

    /// Move to the height after `state`. A state that is not newer than the current one is ignored.
    pub(super) fn update_to_state(&mut self, state: ChainState) -> Result<(), ConsensusError> {
        if !self.chain_state.is_empty() && state.last_block_height <= self.chain_state.last_block_height {
            log::info!(
                "Ignoring update_to_state(): new height {} is not above current height {}",
                state.last_block_height,
                self.chain_state.last_block_height
            );
            self.new_step();
            return Ok(());
        }

        if state.last_block_height < state.initial_height {
            self.rs.last_commit = None;
        } else if let Some(commit_round) = self.rs.commit_round {
            let precommits = self
                .rs
                .votes
                .precommits(commit_round)
                .filter(|precommits| precommits.has_two_thirds_majority())
                .ok_or_else(|| fatal(format!("update_to_state(): no +2/3 precommits in commit round {}", commit_round)))?;
            self.rs.last_commit = Some(precommits.clone());
        } else if self.rs.last_commit.is_none() {
            return Err(fatal(format!(
                "last commit cannot be empty after initial block (height {})",
                state.last_block_height
            )));
        }

        let height = state.next_height();
        if matches!(self.view_change, Some((vc_height, _)) if vc_height < height) {
            self.view_change = None;
        }

        self.rs.height = height;
        self.rs.round = Round::zero();
        self.rs.step = RoundStep::NewHeight;
        self.rs.start_time = if self.rs.commit_time == Timestamp::default() {
            self.config.commit(Timestamp::now())
        } else {
            self.config.commit(self.rs.commit_time)
        };
        self.rs.validators = state.validators.clone();
        self.rs.proposal = None;
        self.rs.proposal_block = None;
        self.rs.proposal_block_parts = None;
        self.rs.locked_round = None;
        self.rs.locked_block = None;
        self.rs.locked_block_parts = None;
        self.rs.valid_round = None;
        self.rs.valid_block = None;
        self.rs.valid_block_parts = None;
        self.rs.votes = HeightVoteSet::new(state.chain_id, height, state.validators.clone());
        self.rs.commit_round = None;
        self.rs.last_validators = state.last_validators.clone();
        self.rs.triggered_timeout_precommit = false;
        self.block_transport.reset(height);

        self.status.set_chain_state(state.clone());
        self.chain_state = state;
        self.new_step();
        Ok(())
    }

    fn reconstruct_last_commit(&mut self, state: &ChainState) -> Result<(), ConsensusError> {
        let seen_commit = self.block_store.load_seen_commit(state.last_block_height).ok_or_else(|| {
            fatal(format!(
                "failed to reconstruct last commit; seen commit for height {} not found",
                state.last_block_height
            ))
        })?;
        let last_precommits = commit_to_vote_set(state.chain_id, &seen_commit, &state.last_validators)
            .map_err(|e| fatal(format!("failed to reconstruct last commit: {:?}", e)))?;
        if !last_precommits.has_two_thirds_majority() {
            return Err(fatal("failed to reconstruct last commit; does not have +2/3 maj"));
        }
        self.rs.last_commit = Some(last_precommits);
        Ok(())
    }

    /// Whether the block at `height` must be made even without transactions: the first block, or
    /// one that records a changed app hash.
    pub(super) fn need_proof_block(&self, height: Height) -> Result<bool, ConsensusError> {
        if height == self.chain_state.initial_height {
            return Ok(true);
        }
        let last_block_meta = self.block_store.load_block_meta(height.prev()).ok_or_else(|| {
            fatal(format!("need_proof_block(): last block meta for height {} not found", height.prev()))
        })?;
        Ok(last_block_meta.header.app_hash != self.chain_state.app_hash)
    }

    /// The commit of the previous block that a proposal at `height` carries. `Some(None)` at the
    /// first height, `None` if the node has not seen a commit for the previous block.
    pub(super) fn last_commit_for_proposal(&self, height: Height) -> Option<Option<Commit>> {
        if height == self.chain_state.initial_height {
            return Some(None);
        }
        match &self.rs.last_commit {
            Some(last_commit) if last_commit.has_two_thirds_majority() => last_commit.make_commit().map(Some),
            _ => {
                log::error!("Cannot propose anything: no commit for the previous block");
                None
            }
        }
    }

    fn handle_view_change(&mut self, height: Height, new_proposer: VerifyingKeyBytes) -> Result<(), ConsensusError> {
        if !self.config.active_view_change {
            log::debug!("Ignoring view change for height {}: active view change is disabled", height);
            return Ok(());
        }
        if height < self.rs.height || height > self.rs.height + 1 {
            return Ok(());
        }
        if matches!(self.view_change, Some((vc_height, _)) if vc_height >= height) {
            return Ok(());
        }
        self.view_change = Some((height, new_proposer));

        // Before anyone voted in round 0, the round can still start over with the new proposer.
        if height == self.rs.height
            && self.rs.round == Round::zero()
            && self.rs.step > RoundStep::NewHeight
            && self.rs.step < RoundStep::Prevote
        {
            if !self.rs.validators.set_proposer(&new_proposer) {
                log::warn!("View change names a proposer outside the validator set");
                return Ok(());
            }
            log::info!("View change: restarting round 0 of height {} with a new proposer", height);
            self.rs.proposal = None;
            self.rs.proposal_block = None;
            self.rs.proposal_block_parts = None;
            self.rs.step = RoundStep::NewRound;
            self.new_step();
            self.enter_propose(height, Round::zero())?;
        }
        Ok(())
    }

    fn buffer_future_message(&mut self, msg_info: MsgInfo) {
        if self.future_messages.len() >= MAX_FUTURE_MESSAGES {
            self.future_messages.pop_front();
        }
        self.future_messages.push_back(msg_info);
    }

    /// Queue the buffered messages for the height the node just moved to.
    pub(super) fn release_future_messages(&mut self) {
        for msg_info in self.future_messages.drain(..) {
            if msg_info.msg.height() == self.rs.height {
                self.mailbox.push_peer(msg_info);
            }
        }
    }

    pub(super) fn executor(&self) -> Result<MutexGuard<'_, E>, ConsensusError> {
        self.executor
            .lock()
            .map_err(|_| fatal("block executor lock poisoned"))
    }

    pub(super) fn send_internal_message(&self, msg: ConsensusMessage) {
        self.mailbox.push_internal(MsgInfo::internal(msg))
    }

    pub(super) fn publish(&self, event: Event) {
        Event::publish(&self.event_publisher, event)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        String::from(*message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("unknown panic")
    }
}
