//! Supervisor error types.

use crate::gen_server::CallError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a supervisor refused or failed a runtime request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChildError {
    /// No child matches the given id or pid.
    NotFound(String),
    /// The child must be terminated first.
    Running(String),
    /// The child is already running.
    AlreadyRunning(String),
    /// The child's start function failed.
    StartFailed(String),
    /// The request does not apply to this supervisor's strategy.
    Unsupported(String),
}

impl fmt::Display for ChildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChildError::NotFound(id) => write!(f, "child '{}' not found", id),
            ChildError::Running(id) => write!(f, "child '{}' is still running", id),
            ChildError::AlreadyRunning(id) => write!(f, "child '{}' is already running", id),
            ChildError::StartFailed(msg) => write!(f, "child failed to start: {}", msg),
            ChildError::Unsupported(msg) => write!(f, "unsupported: {}", msg),
        }
    }
}

impl std::error::Error for ChildError {}

/// Error returned by the supervisor runtime API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    /// The supervisor answered with an error.
    Child(ChildError),
    /// The supervisor could not be reached.
    Call(CallError),
}

impl fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorError::Child(err) => write!(f, "{}", err),
            SupervisorError::Call(err) => write!(f, "supervisor call failed: {}", err),
        }
    }
}

impl std::error::Error for SupervisorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SupervisorError::Child(err) => Some(err),
            SupervisorError::Call(err) => Some(err),
        }
    }
}

impl From<ChildError> for SupervisorError {
    fn from(err: ChildError) -> Self {
        SupervisorError::Child(err)
    }
}

impl From<CallError> for SupervisorError {
    fn from(err: CallError) -> Self {
        SupervisorError::Call(err)
    }
}
