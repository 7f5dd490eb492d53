//! Process execution context.
//!
//! The [`Context`] is handed to every process body and to every behavior
//! callback. It owns the process mailbox and gives access to the node's
//! services: sending, calling, linking and monitoring.

use super::handle::Process;
use super::mailbox::{Envelope, Mailbox};
use crate::atom::Atom;
use crate::config::EnvValue;
use crate::core::{Destination, Pid, RawTerm, Ref, Term};
use crate::error::SendError;
use crate::gen_server::CallError;
use crate::node::Node;
use std::time::Duration;

/// The execution context for a process.
///
/// # Examples
///
/// ```ignore
/// node.spawn_fn(Some("echo"), ProcessOptions::new(), |mut ctx| async move {
///     while let Some(envelope) = ctx.recv().await {
///         if let (Some(from), Message::Info(raw)) = (envelope.from, envelope.message) {
///             let _ = ctx.send_raw(from, raw);
///         }
///     }
/// })
/// .await?;
/// ```
pub struct Context {
    node: Node,
    process: Process,
    mailbox: Mailbox,
}

impl Context {
    pub(crate) fn new(node: Node, process: Process, mailbox: Mailbox) -> Self {
        Self {
            node,
            process,
            mailbox,
        }
    }

    /// Returns this process's pid.
    pub fn pid(&self) -> Pid {
        self.process.pid()
    }

    /// Returns the node this process runs on.
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Returns this process's handle.
    pub fn process(&self) -> &Process {
        &self.process
    }

    /// Receives the next envelope.
    ///
    /// Returns `None` once the process has been asked to stop.
    pub async fn recv(&mut self) -> Option<Envelope> {
        tokio::select! {
            biased;
            _ = self.process.token().cancelled() => None,
            envelope = self.mailbox.recv() => envelope,
        }
    }

    /// Receives the next envelope, waiting at most `timeout`.
    ///
    /// Returns `None` if the timeout elapsed or the process is stopping.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<Envelope> {
        tokio::time::timeout(timeout, self.recv())
            .await
            .ok()
            .flatten()
    }

    /// Receives without waiting.
    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.mailbox.try_recv()
    }

    /// Resolves once this process has been asked to stop.
    pub async fn stopped(&self) {
        self.process.token().cancelled().await
    }

    /// Returns `true` once this process has been asked to stop.
    pub fn is_stopping(&self) -> bool {
        self.process.token().is_cancelled()
    }

    /// Sends `msg` to `to` as this process.
    pub fn send<M: Term>(&self, to: impl Into<Destination>, msg: &M) -> Result<(), SendError> {
        self.node.send_as(Some(self.pid()), to, msg)
    }

    /// Sends an already encoded term to `to` as this process.
    pub fn send_raw(&self, to: impl Into<Destination>, msg: RawTerm) -> Result<(), SendError> {
        self.node.send_raw_as(Some(self.pid()), to.into(), msg)
    }

    /// Calls a server and waits for its reply.
    ///
    /// A zero `timeout` means the node's default call timeout.
    pub async fn call<Req: Term, Rep: Term>(
        &self,
        to: impl Into<Destination>,
        request: &Req,
        timeout: Duration,
    ) -> Result<Rep, CallError> {
        let request = RawTerm::from_term(request).map_err(|e| CallError::Encode(e.to_string()))?;
        let reply = crate::gen_server::call_raw(
            &self.node,
            &self.process,
            to.into(),
            request,
            timeout,
        )
        .await?;
        reply
            .try_decode()
            .map_err(|e| CallError::Decode(e.to_string()))
    }

    /// Casts `msg` to a server as this process.
    pub fn cast<M: Term>(&self, to: impl Into<Destination>, msg: &M) -> Result<(), SendError> {
        self.node.cast_as(Some(self.pid()), to, msg)
    }

    /// Links this process with `other`.
    pub fn link(&self, other: Pid) {
        self.node.link(self.pid(), other);
    }

    /// Removes the link with `other`.
    pub fn unlink(&self, other: Pid) {
        self.node.unlink(self.pid(), other);
    }

    /// Monitors `other`; a [`Message::Down`](super::Message::Down) tagged
    /// with the returned reference arrives when it exits.
    pub fn monitor(&self, other: Pid) -> Ref {
        self.node.monitor(self.pid(), other)
    }

    /// Cancels a monitor set up by [`Context::monitor`].
    pub fn demonitor(&self, reference: Ref) {
        self.node.demonitor(reference);
    }

    /// Watches `node`; a [`Message::NodeDown`](super::Message::NodeDown)
    /// arrives when it goes down. See [`Node::monitor_node`].
    pub async fn monitor_node(&self, node: impl Into<Atom>, enable: bool) {
        self.node.monitor_node(self.pid(), node, enable).await;
    }

    /// Sets the trap-exit flag, returning the previous value.
    pub fn set_trap_exit(&self, trap: bool) -> bool {
        self.process.set_trap_exit(trap)
    }

    /// Returns whether exit signals arrive as messages.
    pub fn is_trapping_exits(&self) -> bool {
        self.process.is_trapping_exits()
    }

    /// Reads a variable from this process's environment.
    pub fn get_env(&self, key: &str) -> Option<EnvValue> {
        self.process.get_env(key)
    }

    /// Sets a variable in this process's environment.
    pub fn set_env(&self, key: impl Into<String>, value: impl Into<EnvValue>) {
        self.process.set_env(key, value);
    }

    /// Receives straight from the mailbox, ignoring stop requests.
    pub(crate) async fn next_envelope(&mut self) -> Option<Envelope> {
        self.mailbox.recv().await
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("pid", &self.pid())
            .field("node", &self.node.name())
            .finish()
    }
}
