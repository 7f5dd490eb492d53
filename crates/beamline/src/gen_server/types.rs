//! GenServer types and result enums.
//!
//! Callbacks mutate state through `&mut`, so results only say what happens
//! next: reply or not, keep running or stop.

use crate::atom::Atom;
use crate::core::{Destination, ExitReason, Pid, RawTerm, Ref};
use serde::{Deserialize, Serialize};

/// A handle identifying a pending call that needs a reply.
///
/// This is passed to `handle_call` and can be kept to reply later with
/// [`reply`](super::reply) after returning [`CallResult::NoReply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct From {
    /// The pid of the calling process.
    pub caller: Pid,
    /// The unique reference for this call.
    pub reference: Ref,
}

impl From {
    /// Creates a new From handle.
    pub fn new(caller: Pid, reference: Ref) -> Self {
        Self { caller, reference }
    }
}

/// Where a server lives: a pid, a local name, or a name on another node.
pub type ServerRef = Destination;

/// Result of the `init` callback.
#[derive(Debug)]
pub enum InitResult<S> {
    /// Initialization succeeded with the given state.
    Ok(S),
    /// Initialization ignored; the process exits normally and the starter
    /// gets [`SpawnError::Ignored`](crate::error::SpawnError::Ignored).
    Ignore,
    /// Initialization failed with the given reason.
    Stop(ExitReason),
}

impl<S> InitResult<S> {
    /// Creates a successful init result.
    pub fn ok(state: S) -> Self {
        InitResult::Ok(state)
    }

    /// Creates an init result that stops the server.
    pub fn stop(reason: impl Into<ExitReason>) -> Self {
        InitResult::Stop(reason.into())
    }

    /// Creates an ignored init result.
    pub fn ignore() -> Self {
        InitResult::Ignore
    }
}

/// Result of the `handle_call` callback.
#[derive(Debug)]
pub enum CallResult<R> {
    /// Reply to the caller and continue.
    Reply(R),
    /// Don't reply yet; the caller keeps waiting.
    NoReply,
    /// Reply and stop the server.
    Stop(ExitReason, R),
    /// Stop the server without replying.
    StopNoReply(ExitReason),
}

impl<R> CallResult<R> {
    /// Creates a reply result.
    pub fn reply(reply: R) -> Self {
        CallResult::Reply(reply)
    }

    /// Creates a no-reply result.
    pub fn noreply() -> Self {
        CallResult::NoReply
    }

    /// Creates a stop result with a reply.
    pub fn stop(reason: impl Into<ExitReason>, reply: R) -> Self {
        CallResult::Stop(reason.into(), reply)
    }

    /// Creates a stop result without a reply.
    pub fn stop_noreply(reason: impl Into<ExitReason>) -> Self {
        CallResult::StopNoReply(reason.into())
    }
}

/// Result of the `handle_cast` callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CastResult {
    /// Keep running.
    NoReply,
    /// Stop the server.
    Stop(ExitReason),
}

impl CastResult {
    /// Creates a no-reply result.
    pub fn noreply() -> Self {
        CastResult::NoReply
    }

    /// Creates a stop result.
    pub fn stop(reason: impl Into<ExitReason>) -> Self {
        CastResult::Stop(reason.into())
    }
}

/// Result of the `handle_info` callback.
pub type InfoResult = CastResult;

/// Anything that reaches `handle_info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Info {
    /// A plain message.
    Message(RawTerm),
    /// A reply to a call this server abandoned, or that was answered after
    /// its caller stopped waiting.
    Reply {
        /// The reference of the call.
        reference: Ref,
        /// The encoded reply.
        reply: RawTerm,
    },
    /// A linked process exited; only delivered while trapping exits.
    Exit {
        /// The exited process.
        from: Pid,
        /// Why it exited.
        reason: ExitReason,
    },
    /// A monitored process exited.
    Down {
        /// The monitor reference.
        reference: Ref,
        /// The exited process.
        pid: Pid,
        /// Why it exited.
        reason: ExitReason,
    },
    /// A node this server monitors with `monitor_node` went down.
    NodeDown {
        /// The lost node.
        node: Atom,
    },
}
