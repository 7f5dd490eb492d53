//! The boundary between the runtime and whatever carries bytes between
//! nodes.
//!
//! The runtime needs very little from a transport: a way to open a
//! [`Link`] to a named node, a way to accept links from other nodes, and
//! ordered delivery of [`DistMessage`] frames within one link. Handshakes,
//! framing and encoding belong to the transport implementation.
//!
//! Two implementations ship with the crate: [`NullTransport`] for nodes that
//! never talk to anyone and [`MemoryNetwork`] for clusters inside a single
//! OS process.

mod memory;

pub use memory::{MemoryNetwork, MemoryTransport};

use crate::atom::Atom;
use crate::core::{ExitReason, Pid, Ref};
use crate::process::Envelope;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A frame exchanged between two connected nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistMessage {
    /// Deliver to a pid on the receiving node.
    Send {
        /// Target process.
        to: Pid,
        /// The message.
        envelope: Envelope,
    },
    /// Deliver to a name registered on the receiving node.
    RegSend {
        /// Target name.
        to: String,
        /// The message.
        envelope: Envelope,
    },
    /// `from` (remote) linked itself to `to` (local to the receiver).
    Link {
        /// Sender-side process.
        from: Pid,
        /// Receiver-side process.
        to: Pid,
    },
    /// `from` removed its link to `to`.
    Unlink {
        /// Sender-side process.
        from: Pid,
        /// Receiver-side process.
        to: Pid,
    },
    /// `from` terminated and was linked to `to`.
    Exit {
        /// The terminated process.
        from: Pid,
        /// The linked process on the receiving node.
        to: Pid,
        /// Why `from` terminated.
        reason: ExitReason,
    },
    /// `watcher` started monitoring `watched`.
    Monitor {
        /// Sender-side process.
        watcher: Pid,
        /// Receiver-side process.
        watched: Pid,
        /// The monitor reference.
        reference: Ref,
    },
    /// The monitor `reference` was cancelled.
    Demonitor {
        /// Sender-side process.
        watcher: Pid,
        /// Receiver-side process.
        watched: Pid,
        /// The monitor reference.
        reference: Ref,
    },
    /// `watched` terminated; notify `watcher`.
    MonitorExit {
        /// The terminated process.
        watched: Pid,
        /// The watcher on the receiving node.
        watcher: Pid,
        /// The monitor reference.
        reference: Ref,
        /// Why `watched` terminated.
        reason: ExitReason,
    },
}

/// Transport failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// No route to the named node.
    #[error("node {0} is unreachable")]
    Unreachable(Atom),

    /// The link was closed by either side.
    #[error("link closed")]
    Closed,

    /// The transport will not accept any more links.
    #[error("transport shut down")]
    Shutdown,

    /// A frame could not be encoded or decoded.
    #[error("bad frame: {0}")]
    Frame(String),
}

/// Sending half of a link.
#[async_trait]
pub trait LinkWriter: Send {
    /// Sends one frame; frames arrive in the order they were sent.
    async fn send(&mut self, message: DistMessage) -> Result<(), TransportError>;
}

/// Receiving half of a link.
#[async_trait]
pub trait LinkReader: Send {
    /// Receives the next frame, or an error once the link is gone.
    async fn recv(&mut self) -> Result<DistMessage, TransportError>;
}

/// An established, authenticated channel to one remote node.
pub struct Link {
    /// The node on the other end.
    pub remote: Atom,
    /// Outbound half.
    pub writer: Box<dyn LinkWriter>,
    /// Inbound half.
    pub reader: Box<dyn LinkReader>,
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

/// Opens and accepts links.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Opens a link to `remote`.
    async fn connect(&self, remote: Atom) -> Result<Link, TransportError>;

    /// Waits for the next inbound link.
    async fn accept(&self) -> Result<Link, TransportError>;
}

/// A transport with no peers: every connect fails and nothing is accepted.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTransport;

#[async_trait]
impl Transport for NullTransport {
    async fn connect(&self, remote: Atom) -> Result<Link, TransportError> {
        Err(TransportError::Unreachable(remote))
    }

    async fn accept(&self) -> Result<Link, TransportError> {
        futures::future::pending::<()>().await;
        Err(TransportError::Shutdown)
    }
}
