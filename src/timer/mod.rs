// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! Retriggerable idle timer
//!
//! The countdown is owned by a single task. `touch` only replaces the deadline
//! held in a watch channel, so it never waits on that task and at most one
//! countdown is ever armed.

use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, trace};

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerState {
    Armed(Instant),
    /// Fired; waits for the next touch
    Idle,
}

/// Fires once after `timeout` passes with no [`touch`](IdleTimer::touch).
///
/// After firing the timer stays idle until touched again, so each firing
/// corresponds to exactly one period of inactivity.
pub struct IdleTimer {
    timeout: Duration,
    deadline: watch::Sender<Instant>,
    fired: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

impl IdleTimer {
    /// Start a timer armed from now. Must be called within a Tokio runtime.
    pub fn new(timeout: Duration) -> Self {
        let (deadline, deadline_rx) = watch::channel(Instant::now() + timeout);
        let (fired, _) = broadcast::channel(4);

        let handle = tokio::spawn(run(deadline_rx, fired.clone()));

        Self {
            timeout,
            deadline,
            fired,
            handle,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Restart the countdown from now
    pub fn touch(&self) {
        self.deadline.send_replace(Instant::now() + self.timeout);
    }

    /// Receiver that yields once per firing
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.fired.subscribe()
    }

    /// Stop the countdown for good
    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for IdleTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn run(mut deadline: watch::Receiver<Instant>, fired: broadcast::Sender<()>) {
    let mut state = TimerState::Armed(*deadline.borrow_and_update());

    loop {
        state = match state {
            TimerState::Armed(at) => {
                tokio::select! {
                    biased;

                    changed = deadline.changed() => match changed {
                        Ok(()) => TimerState::Armed(*deadline.borrow_and_update()),
                        Err(_) => break,
                    },
                    _ = sleep_until(at) => {
                        debug!("Idle timer fired");
                        let _ = fired.send(());
                        TimerState::Idle
                    }
                }
            }
            TimerState::Idle => match deadline.changed().await {
                Ok(()) => TimerState::Armed(*deadline.borrow_and_update()),
                Err(_) => break,
            },
        };
        trace!("Idle timer state {:?}", state);
    }
}
