/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A single timer that fires once for the most recently scheduled `(height, round, step)`.
//!
//! The ticker runs on its own thread, which owns the pending timeout. Scheduling a timeout replaces
//! the pending one, so an earlier timeout never fires after a later one was scheduled. Schedules for
//! a `(height, round, step)` that is not newer than the last one scheduled are ignored.

use std::{
    sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError},
    thread::{self, JoinHandle},
    time::Instant,
};

use crate::consensus::messages::TimeoutInfo;

enum TickerCommand {
    Schedule(TimeoutInfo),
    Stop,
}

pub(crate) struct TimeoutTicker {
    commands: Sender<TickerCommand>,
    thread: Option<JoinHandle<()>>,
}

impl TimeoutTicker {
    /// Start the ticker thread. Every timeout that fires is passed to `on_timeout`.
    pub(crate) fn start(on_timeout: impl FnMut(TimeoutInfo) + Send + 'static) -> TimeoutTicker {
        let (commands, command_receiver) = mpsc::channel();
        let thread = thread::spawn(move || run_ticker(command_receiver, on_timeout));
        TimeoutTicker {
            commands,
            thread: Some(thread),
        }
    }

    pub(crate) fn schedule_timeout(&self, timeout_info: TimeoutInfo) {
        if self.commands.send(TickerCommand::Schedule(timeout_info)).is_err() {
            log::warn!("Timeout ticker is stopped, dropping {:?}", timeout_info);
        }
    }

    pub(crate) fn stop(&mut self) {
        let _ = self.commands.send(TickerCommand::Stop);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for TimeoutTicker {
    fn drop(&mut self) {
        self.stop()
    }
}

struct TickerState {
    last_scheduled: Option<TimeoutInfo>,
    deadline: Option<Instant>,
}

impl TickerState {
    fn schedule(&mut self, timeout_info: TimeoutInfo) {
        if let Some(last) = &self.last_scheduled {
            if timeout_info.hrs() <= last.hrs() {
                log::debug!("Ignoring timeout for old height/round/step: {:?}", timeout_info);
                return;
            }
        }
        self.deadline = Some(Instant::now() + timeout_info.duration());
        self.last_scheduled = Some(timeout_info);
    }
}

fn run_ticker(commands: Receiver<TickerCommand>, mut on_timeout: impl FnMut(TimeoutInfo)) {
    let mut state = TickerState {
        last_scheduled: None,
        deadline: None,
    };

    loop {
        let command = match state.deadline {
            Some(deadline) => {
                commands.recv_timeout(deadline.saturating_duration_since(Instant::now()))
            }
            None => commands.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match command {
            Ok(TickerCommand::Schedule(timeout_info)) => state.schedule(timeout_info),
            Ok(TickerCommand::Stop) | Err(RecvTimeoutError::Disconnected) => return,
            Err(RecvTimeoutError::Timeout) => {
                // A schedule that arrived while the timer was expiring still cancels it.
                loop {
                    match commands.try_recv() {
                        Ok(TickerCommand::Schedule(timeout_info)) => state.schedule(timeout_info),
                        Ok(TickerCommand::Stop) | Err(TryRecvError::Disconnected) => return,
                        Err(TryRecvError::Empty) => break,
                    }
                }
                if matches!(state.deadline, Some(deadline) if deadline <= Instant::now()) {
                    state.deadline = None;
                    if let Some(timeout_info) = state.last_scheduled {
                        log::debug!("Timed out: {:?}", timeout_info);
                        on_timeout(timeout_info);
                    }
                }
            }
        }
    }
}
