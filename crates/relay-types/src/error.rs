//! Error taxonomy shared by the store, broker, control plane and API layers.

use std::time::Duration;

/// Persistence failure. Never silently swallowed by a store implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("duplicate record id: {0}")]
    Duplicate(String),
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("corrupt stored value: {0}")]
    Corrupt(String),
}

/// Broker delivery failure. Only ever visible through record state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("broker transport is disabled")]
    Disabled,
    #[error("broker connection failed: {0}")]
    Connection(String),
    #[error("broker rejected record ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("payload serialization failed: {0}")]
    Serialization(String),
    #[error("broker call exceeded its {0:?} budget")]
    Timeout(Duration),
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

impl TransportError {
    /// Whether another attempt may succeed (connection trouble, throttling, broker 5xx).
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Connection(_) => true,
            TransportError::Rejected { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Error kinds surfaced by the core. Only the admin boundary turns these into wire responses.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Permission(String),
    #[error("{0}")]
    Conflict(String),
    #[error("persistence failed: {0}")]
    Persist(#[from] StoreError),
    #[error("transport failed: {0}")]
    Transport(#[from] TransportError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    pub fn validation(msg: impl Into<String>) -> Self {
        RelayError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        RelayError::NotFound(msg.into())
    }

    /// HTTP-style status code for this error kind.
    pub fn code(&self) -> u16 {
        match self {
            RelayError::Validation(_) => 400,
            RelayError::Permission(_) => 403,
            RelayError::NotFound(_) => 404,
            RelayError::Conflict(_) => 409,
            RelayError::Persist(_) | RelayError::Transport(_) | RelayError::Internal(_) => 500,
        }
    }
}
