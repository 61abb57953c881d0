//! Error types for the keyspace monitor

use std::io;
use thiserror::Error;

/// Top-level monitor error
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Topology error: {0}")]
    Topology(#[from] TopologyError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl MonitorError {
    /// Transport-level failures are retried on the next cycle
    pub fn is_transport(&self) -> bool {
        matches!(self, MonitorError::Connection(_) | MonitorError::Io(_))
    }

    /// Errors no amount of retrying fixes: bad config or nothing to discover
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MonitorError::Config(_) | MonitorError::Topology(TopologyError::NoHosts(_))
        )
    }
}

/// Connection-related errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Failed to connect to {address}: {source}")]
    ConnectFailed { address: String, source: io::Error },

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("TLS handshake failed: {0}")]
    TlsFailed(String),

    #[error("Connection closed")]
    Closed,

    #[error("Connection timeout after {0}ms")]
    Timeout(u64),
}

/// Reply shape errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Unexpected response to {command}: {actual}")]
    UnexpectedResponse { command: String, actual: String },

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Topology discovery errors
#[derive(Error, Debug)]
pub enum TopologyError {
    #[error("No hosts configured for {0} discovery")]
    NoHosts(&'static str),

    #[error("No master nodes found")]
    NoMasters,

    #[error("Sentinel could not resolve master {0:?}")]
    MasterUnresolved(String),

    #[error("No reachable sentinel among {0:?}")]
    NoSentinel(Vec<String>),
}

pub type Result<T> = std::result::Result<T, MonitorError>;
