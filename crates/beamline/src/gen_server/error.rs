//! GenServer error types.

use std::fmt;

/// Error returned when a GenServer call fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// No local process answers to the destination.
    NoProcess(String),
    /// No reply arrived before the deadline.
    Timeout,
    /// The request could not be encoded.
    Encode(String),
    /// The reply did not decode into the expected type.
    Decode(String),
    /// The calling process exited while waiting.
    CallerExited,
    /// The node has stopped.
    NodeStopped,
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::NoProcess(dest) => write!(f, "no process: {}", dest),
            CallError::Timeout => write!(f, "call timed out"),
            CallError::Encode(msg) => write!(f, "failed to encode request: {}", msg),
            CallError::Decode(msg) => write!(f, "failed to decode reply: {}", msg),
            CallError::CallerExited => write!(f, "caller exited during call"),
            CallError::NodeStopped => write!(f, "node is not running"),
        }
    }
}

impl std::error::Error for CallError {}

/// Error returned when stopping a GenServer fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopError {
    /// No local process answers to the destination.
    NoProcess(String),
    /// The server did not exit in time.
    Timeout,
}

impl fmt::Display for StopError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopError::NoProcess(dest) => write!(f, "no process: {}", dest),
            StopError::Timeout => write!(f, "stop timed out"),
        }
    }
}

impl std::error::Error for StopError {}
