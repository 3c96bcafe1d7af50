// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared runtime state
//!
//! The run state and the latest parsed reading are the only values written
//! by the bus handlers and read by the acquisition loop. Both live here and
//! are only reachable through the accessors below, each of which is atomic.

use crate::command::{AppCommand, RunState};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;

/// A processed state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: RunState,
    pub to: RunState,
}

/// Run state plus latest reading, shared between handlers and the loop.
#[derive(Debug)]
pub struct SharedState {
    run_state: watch::Sender<RunState>,
    latest: Mutex<Option<Vec<u32>>>,
}

impl SharedState {
    /// Create state in `Active` with no reading yet.
    pub fn new() -> Self {
        let (run_state, _) = watch::channel(RunState::Active);
        Self {
            run_state,
            latest: Mutex::new(None),
        }
    }

    /// Current run state. Always read fresh, never cache it across ticks.
    pub fn run_state(&self) -> RunState {
        *self.run_state.borrow()
    }

    /// Watch run state changes.
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.run_state.subscribe()
    }

    /// Apply a command to the run state.
    ///
    /// Returns `None` if the state was already terminal, in which case the
    /// command is ignored.
    pub fn apply_command(&self, command: AppCommand) -> Option<Transition> {
        let mut transition = None;
        self.run_state.send_if_modified(|state| match state.next(command) {
            Some(next) => {
                transition = Some(Transition {
                    from: *state,
                    to: next,
                });
                let changed = *state != next;
                *state = next;
                changed
            }
            None => false,
        });
        transition
    }

    pub fn is_terminating(&self) -> bool {
        self.run_state().is_terminal()
    }

    /// Replace the latest reading (`None` marks it corrupt or missing).
    pub fn set_latest(&self, values: Option<Vec<u32>>) {
        *self.lock_latest() = values;
    }

    /// Copy of the latest reading.
    pub fn latest(&self) -> Option<Vec<u32>> {
        self.lock_latest().clone()
    }

    /// Drop the latest reading.
    pub fn discard_latest(&self) {
        *self.lock_latest() = None;
    }

    /// Drop the latest reading only if it still matches `stale`.
    ///
    /// A handler may have stored a newer reading since the caller looked.
    pub fn discard_latest_if(&self, stale: &Option<Vec<u32>>) -> bool {
        let mut latest = self.lock_latest();
        if *latest == *stale {
            *latest = None;
            true
        } else {
            false
        }
    }

    /// Resolve once the state becomes `Terminating`.
    pub async fn wait_terminating(&self) {
        let mut rx = self.run_state.subscribe();
        // sender lives in self, so the channel cannot close while we wait
        let _ = rx.wait_for(|state| state.is_terminal()).await;
    }

    /// Sleep for `duration`, returning early once termination starts.
    pub async fn pause(&self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.wait_terminating() => {}
        }
    }

    fn lock_latest(&self) -> std::sync::MutexGuard<'_, Option<Vec<u32>>> {
        match self.latest.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn test_initial_state() {
        let state = SharedState::new();
        assert_eq!(state.run_state(), RunState::Active);
        assert!(state.latest().is_none());
    }

    #[test]
    fn test_apply_command_reports_transition() {
        let state = SharedState::new();

        let t = state.apply_command(AppCommand::Stop).unwrap();
        assert_eq!(t.from, RunState::Active);
        assert_eq!(t.to, RunState::Standby);

        let t = state.apply_command(AppCommand::Exit).unwrap();
        assert_eq!(t.to, RunState::Terminating);

        assert!(state.apply_command(AppCommand::Start).is_none());
        assert_eq!(state.run_state(), RunState::Terminating);
    }

    #[test]
    fn test_latest_wins() {
        let state = SharedState::new();
        state.set_latest(Some(vec![1, 2]));
        state.set_latest(Some(vec![3, 4]));
        assert_eq!(state.latest(), Some(vec![3, 4]));

        state.discard_latest();
        assert!(state.latest().is_none());
    }

    #[test]
    fn test_conditional_discard_keeps_newer_reading() {
        let state = SharedState::new();
        state.set_latest(Some(vec![1]));
        let seen = state.latest();

        state.set_latest(Some(vec![1, 2]));
        assert!(!state.discard_latest_if(&seen));
        assert_eq!(state.latest(), Some(vec![1, 2]));

        let seen = state.latest();
        assert!(state.discard_latest_if(&seen));
        assert!(state.latest().is_none());
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let state = SharedState::new();
        let mut rx = state.subscribe();

        state.apply_command(AppCommand::Stop);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), RunState::Standby);
    }

    #[tokio::test]
    async fn test_pause_interrupted_by_termination() {
        let state = Arc::new(SharedState::new());
        let waker = Arc::clone(&state);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            waker.apply_command(AppCommand::Exit);
        });

        let started = Instant::now();
        state.pause(Duration::from_secs(30)).await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(state.is_terminating());
    }
}
