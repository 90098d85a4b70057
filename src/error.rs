//! Custom error types for the controller.
//!
//! This module defines the primary error type, `MarlinError`, for the whole
//! crate. Using the `thiserror` crate, it provides a single place that names
//! every way a run can fail, from port discovery to an unverified state
//! transition halfway through a hybridization cycle.
//!
//! ## Error Hierarchy
//!
//! - **Discovery**: `NoDeviceFound`, `AmbiguousDevice`, `HandshakeTimeout`.
//!   Raised while locating and opening the device.
//! - **Protocol**: `HandshakeFailed` when the device keeps reporting a state
//!   other than the one commanded, `Transport` when the serial link itself
//!   fails, `NotConnected` when no connection is open.
//! - **Routing**: `UnknownReagent`, `UnknownRouting`, `DuplicateRouting`,
//!   `SelectorOutOfRange`.
//! - **Configuration**: `Config` wraps figment load errors, `Configuration`
//!   reports semantic validation failures.
//! - **Recipe**: `Imaging` wraps collaborator failures, `Cancelled` is returned
//!   when an operator stops a cancellable run between steps.
//!
//! None of these are recovered from inside the crate. A run that hits one
//! aborts, and the error carries what an operator needs to bring the
//! instrument back by hand: the last state attempted, how many attempts were
//! made and how long the exchange took.

use crate::routing::RoutingVector;
use crate::state::DeviceState;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, MarlinError>;

/// Where a transition stood when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionContext {
    /// State that was being commanded.
    pub target: DeviceState,
    /// Write/verify rounds performed, including the failing one.
    pub attempts: u32,
    /// Time since the transition began.
    pub elapsed: Duration,
}

impl fmt::Display for TransitionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "target {} after {} attempt(s) in {:?}",
            self.target, self.attempts, self.elapsed
        )
    }
}

#[derive(Error, Debug)]
pub enum MarlinError {
    #[error(
        "No MARLIN detected on {} candidate port(s) [{}] after {elapsed:?}",
        .candidates.len(),
        .candidates.join(", ")
    )]
    NoDeviceFound {
        candidates: Vec<String>,
        elapsed: Duration,
    },

    #[error(
        "More than one MARLIN detected: {} (of {} candidate port(s), after {elapsed:?})",
        .ports.join(", "),
        .candidates.len()
    )]
    AmbiguousDevice {
        ports: Vec<String>,
        candidates: Vec<String>,
        elapsed: Duration,
    },

    #[error("MARLIN connection timeout on {port} after {elapsed:?} (last reply {last_reply:?})")]
    HandshakeTimeout {
        port: String,
        elapsed: Duration,
        last_reply: String,
    },

    #[error("Handshake failed: {context}, last reply {last_reply:?}")]
    HandshakeFailed {
        context: TransitionContext,
        last_reply: String,
    },

    #[error("Unknown reagent '{0}'")]
    UnknownReagent(String),

    #[error("No reagent is routed by {0}")]
    UnknownRouting(RoutingVector),

    #[error("Routing {vector} is claimed by both '{first}' and '{second}'")]
    DuplicateRouting {
        vector: RoutingVector,
        first: String,
        second: String,
    },

    #[error("Routing {vector} for '{name}' has a selector above 99")]
    SelectorOutOfRange { name: String, vector: RoutingVector },

    #[error("Serial transport error during {operation}{}: {source}", describe_context(.context))]
    Transport {
        operation: String,
        context: Option<TransitionContext>,
        #[source]
        source: std::io::Error,
    },

    #[error("Serial port not connected")]
    NotConnected,

    #[error("Pump speed {0} outside 0..=4095")]
    InvalidPumpSpeed(u32),

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Imaging error: {0:#}")]
    Imaging(anyhow::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Run cancelled before {0}")]
    Cancelled(String),
}

impl MarlinError {
    /// Wrap a serial I/O failure that happened outside a transition.
    pub fn transport(operation: impl Into<String>, source: std::io::Error) -> Self {
        MarlinError::Transport {
            operation: operation.into(),
            context: None,
            source,
        }
    }

    /// Transition bookkeeping attached to this error, if any.
    pub fn transition_context(&self) -> Option<&TransitionContext> {
        match self {
            MarlinError::HandshakeFailed { context, .. } => Some(context),
            MarlinError::Transport {
                context: Some(context),
                ..
            } => Some(context),
            _ => None,
        }
    }
}

fn describe_context(context: &Option<TransitionContext>) -> String {
    context.map(|c| format!(" ({})", c)).unwrap_or_default()
}

impl From<figment::Error> for MarlinError {
    fn from(err: figment::Error) -> Self {
        MarlinError::Config(Box::new(err))
    }
}
