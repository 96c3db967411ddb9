/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A worker thread that builds the next height's proposal block while the node waits out the commit
//! timeout. Only runs when active view change is enabled.

use std::{
    sync::{
        mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{
    pluggables::BlockExecutor,
    types::{
        block::Block,
        chain_state::ChainState,
        commit::Commit,
        data_types::{Height, VerifyingKeyBytes},
        part_set::PartSet,
    },
};

/// How long the proposer waits for a block it asked the worker for before building one itself.
const PREBUILT_BLOCK_WAIT: Duration = Duration::from_secs(1);

pub(crate) struct PrebuildTask {
    pub(crate) height: Height,
    pub(crate) chain_state: ChainState,
    pub(crate) last_commit: Option<Commit>,
    pub(crate) proposer: VerifyingKeyBytes,
}

struct PrebuiltBlock {
    height: Height,
    block: Block,
    parts: PartSet,
}

pub(crate) struct ProposalPrebuilder {
    tasks: Option<SyncSender<PrebuildTask>>,
    results: Receiver<PrebuiltBlock>,
    pending: Option<Height>,
    worker: Option<JoinHandle<()>>,
}

impl ProposalPrebuilder {
    pub(crate) fn start<E: BlockExecutor>(executor: Arc<Mutex<E>>) -> ProposalPrebuilder {
        let (tasks, task_receiver) = mpsc::sync_channel::<PrebuildTask>(1);
        let (result_sender, results) = mpsc::sync_channel(1);
        let worker = thread::spawn(move || {
            for task in task_receiver {
                let Ok(mut executor) = executor.lock() else {
                    log::error!("Block executor lock poisoned, stopping the pre-build worker");
                    return;
                };
                let built = executor.create_proposal_block(
                    task.height,
                    &task.chain_state,
                    task.last_commit,
                    task.proposer,
                );
                drop(executor);
                match built {
                    Ok((block, parts)) => {
                        let prebuilt = PrebuiltBlock {
                            height: task.height,
                            block,
                            parts,
                        };
                        if let Err(TrySendError::Full(stale)) = result_sender.try_send(prebuilt) {
                            log::debug!("Dropping pre-built block for height {}", stale.height);
                        }
                    }
                    Err(e) => log::error!("Failed to pre-build block for height {}: {:?}", task.height, e),
                }
            }
        });

        ProposalPrebuilder {
            tasks: Some(tasks),
            results,
            pending: None,
            worker: Some(worker),
        }
    }

    /// Ask the worker to build the block for `task.height`. Results of earlier requests that were
    /// never taken are discarded.
    pub(crate) fn request(&mut self, task: PrebuildTask) {
        while self.results.try_recv().is_ok() {}
        let height = task.height;
        let Some(tasks) = &self.tasks else { return };
        match tasks.try_send(task) {
            Ok(()) => self.pending = Some(height),
            Err(TrySendError::Full(_)) => log::debug!("Pre-build worker busy, not pre-building height {}", height),
            Err(TrySendError::Disconnected(_)) => log::warn!("Pre-build worker has stopped"),
        }
    }

    /// Take the pre-built block for `height`, waiting a short while if the worker is still on it.
    pub(crate) fn take(&mut self, height: Height) -> Option<(Block, PartSet)> {
        if self.pending != Some(height) {
            return None;
        }
        self.pending = None;
        loop {
            match self.results.recv_timeout(PREBUILT_BLOCK_WAIT) {
                Ok(prebuilt) if prebuilt.height == height => return Some((prebuilt.block, prebuilt.parts)),
                Ok(_) => continue,
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    log::info!("No pre-built block for height {}", height);
                    return None;
                }
            }
        }
    }
}

impl Drop for ProposalPrebuilder {
    fn drop(&mut self) {
        // Closing the task channel ends the worker's loop.
        self.tasks = None;
        while self.results.try_recv().is_ok() {}
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
