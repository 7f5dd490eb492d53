//! Error types for process and node operations.

use crate::core::{ExitReason, Pid, TermError};
use crate::gen_server::CallError;
use thiserror::Error;

/// Errors reported by the registrar.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrarError {
    /// The name is already registered to another process.
    #[error("name already registered: {0}")]
    NameTaken(String),

    /// The pid is not in the process table.
    #[error("no such process: {0}")]
    NoProcess(Pid),

    /// The name is not in the name table.
    #[error("no process registered as {0}")]
    NoName(String),

    /// The registrar control loop has exited because the node stopped.
    #[error("node is not running")]
    Stopped,
}

/// Errors that can occur when sending messages.
///
/// Delivery itself is best-effort: an unknown destination is dropped
/// silently, never reported here.
#[derive(Debug, Error)]
pub enum SendError {
    /// The message could not be encoded.
    #[error("failed to encode message: {0}")]
    Encode(#[from] TermError),

    /// The node has stopped and no longer routes messages.
    #[error("node is not running")]
    NodeStopped,
}

/// Errors that can occur when spawning processes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpawnError {
    /// Registration in the process table failed.
    #[error("registration failed: {0}")]
    Registration(#[from] RegistrarError),

    /// The behavior's init callback failed.
    #[error("process initialization failed: {0}")]
    InitFailed(ExitReason),

    /// The behavior's init callback asked to be ignored.
    #[error("process initialization ignored")]
    Ignored,
}

/// Errors from remote procedure calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// Nothing is provided under this module and function.
    #[error("undefined function {module}:{function}")]
    Undefined {
        /// Module part of the name.
        module: String,
        /// Function part of the name.
        function: String,
    },

    /// The arguments did not decode into the function's argument type.
    #[error("bad argument: {0}")]
    BadArgument(String),

    /// The function panicked or its result could not be encoded.
    #[error("rpc failed: {0}")]
    Failed(String),

    /// The local `rex` server could not be started.
    #[error("rpc server unavailable: {0}")]
    Unavailable(#[from] SpawnError),

    /// The call to `rex` on the target node failed.
    #[error(transparent)]
    Call(#[from] CallError),
}

/// Errors returned by node-level waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NodeError {
    /// The wait deadline elapsed.
    #[error("timed out")]
    Timeout,
}
