//! Error types for the admin and topology interfaces
//!
//! Run-level errors live with the executor; these are the errors a single
//! client call can produce.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Authentication against the admin database failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Authentication rejected for user '{user}': {message}")]
    Rejected { user: String, message: String },

    #[error("Credential secret unavailable: {0}")]
    SecretUnavailable(String),

    #[error("Cannot reach cluster for authentication: {0}")]
    Connection(String),
}

/// Negative or missing acknowledgement from an admin command
///
/// `code` is the server's symbolic code name (e.g. `ChunkTooBig`) and is kept
/// verbatim so operators can act on it.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct AdminError {
    pub code: String,
    pub message: String,
}

impl AdminError {
    /// Code used when the command produced no acknowledgement at all
    pub const NO_ACKNOWLEDGEMENT: &'static str = "NoAcknowledgement";

    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Connection loss, timeout or an unparseable reply
    pub fn no_acknowledgement(message: impl Into<String>) -> Self {
        Self::new(Self::NO_ACKNOWLEDGEMENT, message)
    }

    pub fn is_no_acknowledgement(&self) -> bool {
        self.code == Self::NO_ACKNOWLEDGEMENT
    }
}

/// Reading the partition metadata failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    #[error("Database not found in cluster metadata: {0}")]
    DatabaseNotFound(String),

    #[error("Invalid namespace: {0}")]
    InvalidNamespace(String),

    #[error("Malformed metadata document: {0}")]
    Malformed(String),

    #[error("Metadata store error: {0}")]
    Store(String),

    #[error("Not authenticated")]
    NotAuthenticated,
}
