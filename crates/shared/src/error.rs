use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::CounterCommand;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The counter account does not exist yet. Not a failure.
    Absent,
    Transient,
    Rejected,
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CounterError {
    #[error("wallet is not connected")]
    NotConnected,
    #[error("account {0} does not exist")]
    AccountNotFound(String),
    #[error("address derivation failed: {0}")]
    Derivation(String),
    #[error("invalid address '{input}': {reason}")]
    InvalidAddress { input: String, reason: String },
    #[error("submission rejected: {reason}")]
    SubmissionRejected { reason: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("failed to decode counter account: {0}")]
    Decode(String),
    #[error("{command} is not allowed while the counter is {state}")]
    CommandNotAllowed {
        command: CounterCommand,
        state: String,
    },
}

impl CounterError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::SubmissionRejected {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AccountNotFound(_) => ErrorKind::Absent,
            Self::Network(_) | Self::Rpc { .. } => ErrorKind::Transient,
            Self::SubmissionRejected { .. } => ErrorKind::Rejected,
            Self::NotConnected
            | Self::Derivation(_)
            | Self::InvalidAddress { .. }
            | Self::Decode(_)
            | Self::CommandNotAllowed { .. } => ErrorKind::Invalid,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::Absent
    }
}
