//! Process mailbox for message delivery.
//!
//! Each process owns one bounded FIFO mailbox. Every item is an
//! [`Envelope`]: the sender's pid (if any) plus a [`Message`] whose kind was
//! decided once, at the sending edge. Envelopes serialize, so the same value
//! crosses a peer link unchanged.

use crate::atom::Atom;
use crate::core::{ExitReason, Pid, RawTerm, Ref};
use crate::gen_server::From;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// The kinds of message a process can receive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// A plain message from `send`.
    Info(RawTerm),
    /// A synchronous request expecting a [`Message::Reply`] tagged with
    /// `from.reference`.
    Call {
        /// Who to reply to.
        from: From,
        /// The encoded request.
        request: RawTerm,
    },
    /// A fire-and-forget request.
    Cast(RawTerm),
    /// The answer to a call this process issued.
    Reply {
        /// The reference of the originating call.
        reference: Ref,
        /// The encoded reply.
        reply: RawTerm,
    },
    /// A linked process terminated (delivered only to processes trapping
    /// exits).
    Exit {
        /// The terminated process.
        from: Pid,
        /// Why it terminated.
        reason: ExitReason,
    },
    /// A monitored process terminated.
    Down {
        /// The monitor reference.
        reference: Ref,
        /// The monitored process.
        pid: Pid,
        /// Why it terminated.
        reason: ExitReason,
    },    /// A node monitored with `monitor_node` went down or could not be
    /// reached.
    NodeDown {
        /// The lost node.
        node: Atom,
    },
}

/// A message plus its sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// The sending process, if the message came from one.
    pub from: Option<Pid>,
    /// The message.
    pub message: Message,
}

impl Envelope {
    /// Creates an envelope.
    pub fn new(from: Option<Pid>, message: Message) -> Self {
        Self { from, message }
    }
}

/// Why a mailbox refused an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The mailbox is at capacity.
    #[error("mailbox full")]
    Full,
    /// The owning process has exited.
    #[error("mailbox closed")]
    Closed,
}

/// The receiving end of a process mailbox.
#[derive(Debug)]
pub struct Mailbox {
    rx: mpsc::Receiver<Envelope>,
}

impl Mailbox {
    /// Creates a mailbox holding at most `capacity` envelopes.
    pub fn new(capacity: usize) -> (Self, MailboxSender) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { rx }, MailboxSender { tx })
    }

    /// Receives the next envelope.
    ///
    /// Returns `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    /// Receives the next envelope, giving up after `duration`.
    ///
    /// The outer `None` means the timeout elapsed.
    pub async fn recv_timeout(&mut self, duration: Duration) -> Option<Option<Envelope>> {
        timeout(duration, self.rx.recv()).await.ok()
    }

    /// Receives without waiting.
    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.rx.try_recv().ok()
    }

    /// Number of envelopes waiting.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Returns `true` if nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Closes the mailbox; queued envelopes can still be drained.
    pub fn close(&mut self) {
        self.rx.close()
    }
}

/// The sending end of a process mailbox.
#[derive(Debug, Clone)]
pub struct MailboxSender {
    tx: mpsc::Sender<Envelope>,
}

impl MailboxSender {
    /// Enqueues without waiting.
    pub fn try_send(&self, envelope: Envelope) -> Result<(), DeliveryError> {
        self.tx.try_send(envelope).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Returns `true` once the receiver is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Number of envelopes waiting.
    pub fn queued(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}
