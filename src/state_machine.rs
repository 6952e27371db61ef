//! Lifecycle state machine for the trading engine
//!
//! The engine moves through `Initializing -> Running` and leaves through
//! either `ShutdownRequested -> Shutdown` or the terminal `Error` state.
//! `Error` is reachable from every state and there is no way back out of it;
//! an external supervisor has to restart the process.

use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::errors::{BotError, BotResult};

/// Lifecycle states of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BotState {
    /// Connecting, validating and syncing the orderbook
    Initializing,
    /// Normal trading operation
    Running,
    /// Shutdown was requested, run loop will wind down
    ShutdownRequested,
    /// Fully stopped
    Shutdown,
    /// Terminal failure state, no automatic recovery
    Error,
}

impl BotState {
    /// Check whether the engine has reached a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, BotState::Shutdown | BotState::Error)
    }

    fn can_transition_to(&self, next: BotState) -> bool {
        if *self == next {
            // Re-entering the current state is always allowed (no-op).
            return true;
        }
        match (*self, next) {
            // The error state is reachable from everywhere but cannot be left.
            (BotState::Error, _) => false,
            (_, BotState::Error) => true,
            (BotState::Initializing, BotState::Running) => true,
            (BotState::Initializing, BotState::ShutdownRequested) => true,
            (BotState::Running, BotState::ShutdownRequested) => true,
            (BotState::ShutdownRequested, BotState::Shutdown) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for BotState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BotState::Initializing => "INITIALIZING",
            BotState::Running => "RUNNING",
            BotState::ShutdownRequested => "SHUTDOWN_REQUESTED",
            BotState::Shutdown => "SHUTDOWN",
            BotState::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Holds the single lifecycle state and enforces legal transitions.
///
/// `transition_to` is the only mutator. Every transition is published on a
/// watch channel so that the run loop and tests can observe state changes.
/// Clones share the same state.
#[derive(Clone)]
pub struct StateMachine {
    tx: Arc<watch::Sender<BotState>>,
}

impl StateMachine {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(BotState::Initializing);
        Self { tx: Arc::new(tx) }
    }

    /// Current state
    pub fn state(&self) -> BotState {
        *self.tx.borrow()
    }

    /// Subscribe to state changes
    pub fn subscribe(&self) -> watch::Receiver<BotState> {
        self.tx.subscribe()
    }

    /// Transition to `next`, rejecting illegal transitions.
    ///
    /// Transitioning into the current state is a no-op and always succeeds.
    pub fn transition_to(&self, next: BotState) -> BotResult<()> {
        let current = self.state();
        if current == next {
            return Ok(());
        }
        if !current.can_transition_to(next) {
            warn!("Rejecting illegal state transition: {current} -> {next}");
            return Err(BotError::IllegalTransition {
                from: current.to_string(),
                to: next.to_string(),
            });
        }

        info!("State transition: {current} -> {next}");
        self.tx.send_replace(next);
        Ok(())
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
