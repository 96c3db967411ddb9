/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The event bus thread, which receives [events](crate::events) from the consensus thread and runs
//! the registered handlers for each of them.

use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::events::*;
use crate::logging::Logger;

/// Pointer to a handler closure, parametrised by the argument (for our use case, the event type).
pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

// How long the event bus blocks waiting for an event before checking for shutdown.
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Stores the handlers registered for each event type.
pub(crate) struct EventHandlers {
    pub(crate) new_round_step_handlers: Vec<HandlerPtr<NewRoundStepEvent>>,
    pub(crate) timeout_propose_handlers: Vec<HandlerPtr<TimeoutProposeEvent>>,
    pub(crate) timeout_wait_handlers: Vec<HandlerPtr<TimeoutWaitEvent>>,
    pub(crate) propose_handlers: Vec<HandlerPtr<ProposeEvent>>,
    pub(crate) receive_proposal_handlers: Vec<HandlerPtr<ReceiveProposalEvent>>,
    pub(crate) complete_proposal_handlers: Vec<HandlerPtr<CompleteProposalEvent>>,
    pub(crate) vote_handlers: Vec<HandlerPtr<VoteEvent>>,
    pub(crate) receive_vote_handlers: Vec<HandlerPtr<ReceiveVoteEvent>>,
    pub(crate) lock_handlers: Vec<HandlerPtr<LockEvent>>,
    pub(crate) unlock_handlers: Vec<HandlerPtr<UnlockEvent>>,
    pub(crate) valid_block_handlers: Vec<HandlerPtr<ValidBlockEvent>>,
    pub(crate) commit_block_handlers: Vec<HandlerPtr<CommitBlockEvent>>,
    pub(crate) prune_blocks_handlers: Vec<HandlerPtr<PruneBlocksEvent>>,
    pub(crate) evidence_handlers: Vec<HandlerPtr<EvidenceEvent>>,
}

// Collect the user handler and, if logging is enabled, the default logger for one event type.
fn handlers_for<T: Logger>(log_events: bool, user_handler: Option<HandlerPtr<T>>) -> Vec<HandlerPtr<T>> {
    let mut handlers = Vec::new();
    if log_events {
        handlers.push(T::get_logger());
    }
    if let Some(handler) = user_handler {
        handlers.push(handler);
    }
    handlers
}

impl EventHandlers {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        log_events: bool,
        new_round_step_handler: Option<HandlerPtr<NewRoundStepEvent>>,
        timeout_propose_handler: Option<HandlerPtr<TimeoutProposeEvent>>,
        timeout_wait_handler: Option<HandlerPtr<TimeoutWaitEvent>>,
        propose_handler: Option<HandlerPtr<ProposeEvent>>,
        receive_proposal_handler: Option<HandlerPtr<ReceiveProposalEvent>>,
        complete_proposal_handler: Option<HandlerPtr<CompleteProposalEvent>>,
        vote_handler: Option<HandlerPtr<VoteEvent>>,
        receive_vote_handler: Option<HandlerPtr<ReceiveVoteEvent>>,
        lock_handler: Option<HandlerPtr<LockEvent>>,
        unlock_handler: Option<HandlerPtr<UnlockEvent>>,
        valid_block_handler: Option<HandlerPtr<ValidBlockEvent>>,
        commit_block_handler: Option<HandlerPtr<CommitBlockEvent>>,
        prune_blocks_handler: Option<HandlerPtr<PruneBlocksEvent>>,
        evidence_handler: Option<HandlerPtr<EvidenceEvent>>,
    ) -> EventHandlers {
        EventHandlers {
            new_round_step_handlers: handlers_for(log_events, new_round_step_handler),
            timeout_propose_handlers: handlers_for(log_events, timeout_propose_handler),
            timeout_wait_handlers: handlers_for(log_events, timeout_wait_handler),
            propose_handlers: handlers_for(log_events, propose_handler),
            receive_proposal_handlers: handlers_for(log_events, receive_proposal_handler),
            complete_proposal_handlers: handlers_for(log_events, complete_proposal_handler),
            vote_handlers: handlers_for(log_events, vote_handler),
            receive_vote_handlers: handlers_for(log_events, receive_vote_handler),
            lock_handlers: handlers_for(log_events, lock_handler),
            unlock_handlers: handlers_for(log_events, unlock_handler),
            valid_block_handlers: handlers_for(log_events, valid_block_handler),
            commit_block_handlers: handlers_for(log_events, commit_block_handler),
            prune_blocks_handlers: handlers_for(log_events, prune_blocks_handler),
            evidence_handlers: handlers_for(log_events, evidence_handler),
        }
    }

    /// Returns whether no handler at all is registered, in which case there is no need to run the
    /// event bus.
    pub(crate) fn is_empty(&self) -> bool {
        self.new_round_step_handlers.is_empty()
            && self.timeout_propose_handlers.is_empty()
            && self.timeout_wait_handlers.is_empty()
            && self.propose_handlers.is_empty()
            && self.receive_proposal_handlers.is_empty()
            && self.complete_proposal_handlers.is_empty()
            && self.vote_handlers.is_empty()
            && self.receive_vote_handlers.is_empty()
            && self.lock_handlers.is_empty()
            && self.unlock_handlers.is_empty()
            && self.valid_block_handlers.is_empty()
            && self.commit_block_handlers.is_empty()
            && self.prune_blocks_handlers.is_empty()
            && self.evidence_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::NewRoundStep(new_round_step_event) =>
                self.new_round_step_handlers.iter().for_each(|handler| handler(&new_round_step_event)),

            Event::TimeoutPropose(timeout_propose_event) =>
                self.timeout_propose_handlers.iter().for_each(|handler| handler(&timeout_propose_event)),

            Event::TimeoutWait(timeout_wait_event) =>
                self.timeout_wait_handlers.iter().for_each(|handler| handler(&timeout_wait_event)),

            Event::Propose(propose_event) =>
                self.propose_handlers.iter().for_each(|handler| handler(&propose_event)),

            Event::ReceiveProposal(receive_proposal_event) =>
                self.receive_proposal_handlers.iter().for_each(|handler| handler(&receive_proposal_event)),

            Event::CompleteProposal(complete_proposal_event) =>
                self.complete_proposal_handlers.iter().for_each(|handler| handler(&complete_proposal_event)),

            Event::Vote(vote_event) =>
                self.vote_handlers.iter().for_each(|handler| handler(&vote_event)),

            Event::ReceiveVote(receive_vote_event) =>
                self.receive_vote_handlers.iter().for_each(|handler| handler(&receive_vote_event)),

            Event::Lock(lock_event) =>
                self.lock_handlers.iter().for_each(|handler| handler(&lock_event)),

            Event::Unlock(unlock_event) =>
                self.unlock_handlers.iter().for_each(|handler| handler(&unlock_event)),

            Event::ValidBlock(valid_block_event) =>
                self.valid_block_handlers.iter().for_each(|handler| handler(&valid_block_event)),

            Event::CommitBlock(commit_block_event) =>
                self.commit_block_handlers.iter().for_each(|handler| handler(&commit_block_event)),

            Event::PruneBlocks(prune_blocks_event) =>
                self.prune_blocks_handlers.iter().for_each(|handler| handler(&prune_blocks_event)),

            Event::Evidence(evidence_event) =>
                self.evidence_handlers.iter().for_each(|handler| handler(&evidence_event)),
        }
    }
}

/// Start the event bus thread, which fires the handlers for each event it receives until it is told
/// to shut down or the consensus thread goes away.
pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => return,
            Err(TryRecvError::Empty) => (),
        }

        match event_subscriber.recv_timeout(EVENT_POLL_INTERVAL) {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => {
                log::debug!("Event publisher disconnected, stopping the event bus");
                return;
            }
        }
    })
}
