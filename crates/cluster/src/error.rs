//! Cluster client errors

use rr_core::PartitionError;
use resp::{CommandError, RespError};

use crate::config::ConfigError;

/// Cluster client errors
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// No candidate endpoint returned a usable topology view
    #[error("Cannot retrieve cluster partitions from {seeds}")]
    NoViewAvailable { seeds: String },
    /// Opening a connection to a node failed
    #[error("Failed to connect to {endpoint}: {reason}")]
    Connection { endpoint: String, reason: String },
    /// The node rejected the credential handshake
    #[error("Authentication failed for {endpoint}: {reason}")]
    Auth { endpoint: String, reason: String },
    #[error("Unknown node: {0}")]
    UnknownNode(String),
    /// Keyless command handed to the key router
    #[error("Command {0} has no key and cannot be routed to a node")]
    NoKey(String),
    /// Node answered with an error reply
    #[error("Command failed: {0}")]
    Command(String),
    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),
    #[error("Invalid command: {0}")]
    InvalidCommand(#[from] CommandError),
    #[error("Partition error: {0}")]
    Partition(#[from] PartitionError),
    #[error("Protocol error: {0}")]
    Resp(#[from] RespError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Operation timed out")]
    Timeout,
    #[error("Client is shut down")]
    Shutdown,
}

impl ClusterError {
    pub(crate) fn connection(endpoint: impl ToString, reason: impl ToString) -> Self {
        ClusterError::Connection {
            endpoint: endpoint.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type ClusterResult<T> = Result<T, ClusterError>;
