//! Deployment state machine.
//!
//! Two states fence the mutating phases of a run: `Closed` means no
//! batch is in flight, `Running` means a stop/drain/swap batch is. The
//! only transitions are `Closed --start--> Running` and
//! `Running --finish--> Closed`; anything else is rejected, which keeps a
//! second batch from starting while one is in flight.

use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployState {
    #[default]
    Closed,
    Running,
}

impl fmt::Display for DeployState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Running => "running",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployEvent {
    Start,
    Finish,
}

impl fmt::Display for DeployEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Start => "start",
            Self::Finish => "finish",
        })
    }
}

/// An event fired from a state that does not accept it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("event {event} is not valid in state {state}")]
pub struct InvalidTransition {
    pub state: DeployState,
    pub event: DeployEvent,
}

/// The transition table.
pub fn transition(state: DeployState, event: DeployEvent) -> Result<DeployState, InvalidTransition> {
    match (state, event) {
        (DeployState::Closed, DeployEvent::Start) => Ok(DeployState::Running),
        (DeployState::Running, DeployEvent::Finish) => Ok(DeployState::Closed),
        (state, event) => Err(InvalidTransition { state, event }),
    }
}

/// Called with `(from, to, event)` after every accepted transition.
pub type TransitionObserver = Box<dyn Fn(DeployState, DeployState, DeployEvent) + Send + Sync>;

/// State machine instance owned by one orchestrator.
pub struct Deployment {
    state: DeployState,
    observer: TransitionObserver,
}

impl Deployment {
    /// A closed deployment that logs every transition.
    pub fn new() -> Self {
        Self::with_observer(Box::new(|from, to, event| {
            info!(%from, %to, %event, "deployment state changed");
        }))
    }

    pub fn with_observer(observer: TransitionObserver) -> Self {
        Self {
            state: DeployState::Closed,
            observer,
        }
    }

    pub fn current(&self) -> DeployState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == DeployState::Closed
    }

    /// Apply `event`; on rejection the state is left untouched.
    pub fn fire(&mut self, event: DeployEvent) -> Result<DeployState, InvalidTransition> {
        let from = self.state;
        let to = transition(from, event)?;
        self.state = to;
        (self.observer)(from, to, event);
        Ok(to)
    }

    pub fn start(&mut self) -> Result<DeployState, InvalidTransition> {
        self.fire(DeployEvent::Start)
    }

    pub fn finish(&mut self) -> Result<DeployState, InvalidTransition> {
        self.fire(DeployEvent::Finish)
    }
}

impl Default for Deployment {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Deployment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deployment")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
