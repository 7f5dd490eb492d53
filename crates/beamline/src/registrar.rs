//! The registrar: sole owner of the process, name and peer tables.
//!
//! Every mutation and every routing decision is a [`Command`] sent to one
//! control loop, so the tables need no locking and every observer sees the
//! same order of events. Queries answer through a oneshot channel.
//!
//! Routing follows the destination shape:
//!
//! - a local pid is looked up and the envelope pushed onto its mailbox
//! - a remote pid or `{name, node}` goes to the peer for that node
//! - a local name is resolved through the name table
//!
//! Unknown local destinations are dropped. A remote destination without a
//! peer asks the node to connect and schedules a delayed retry on a separate
//! timer, so retries never sit in front of fresh traffic; after the
//! configured number of attempts the frame is dropped.

use crate::atom::Atom;
use crate::config::{NodeConfig, ProcessOptions};
use crate::core::{Destination, ExitReason, Pid};
use crate::error::RegistrarError;
use crate::process::{Envelope, Mailbox, Message, Process};
use crate::transport::DistMessage;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// First id handed out by a fresh registrar.
const FIRST_PID_ID: u64 = 1000;

/// Requests the registrar makes of the node's connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NetEvent {
    /// Try to open a link to this node.
    Connect(Atom),
    /// A frame for this node was dropped after exhausting its retries.
    Unreachable(Atom),
}

/// A connected node.
#[derive(Debug, Clone)]
pub(crate) struct Peer {
    pub node: Atom,
    /// Distinguishes successive links to the same node.
    pub id: u64,
    /// Whether this link was opened by the node with the lower name. When
    /// both nodes connect at once, that link wins on both sides.
    pub preferred: bool,
    pub tx: mpsc::Sender<DistMessage>,
}

enum Command {
    RegisterProcess {
        name: Option<String>,
        options: ProcessOptions,
        reply: oneshot::Sender<Result<(Process, Mailbox), RegistrarError>>,
    },
    UnregisterProcess {
        pid: Pid,
        done: oneshot::Sender<()>,
    },
    RegisterName {
        name: String,
        pid: Pid,
        reply: oneshot::Sender<Result<(), RegistrarError>>,
    },
    UnregisterName {
        name: String,
    },
    RegisterPeer {
        peer: Peer,
        reply: oneshot::Sender<bool>,
    },
    UnregisterPeer {
        node: Atom,
        id: u64,
        reply: oneshot::Sender<bool>,
    },
    Route {
        from: Option<Pid>,
        to: Destination,
        message: Message,
    },
    Forward {
        node: Atom,
        frame: DistMessage,
        attempt: u32,
    },
    WhereIs {
        name: String,
        reply: oneshot::Sender<Option<Pid>>,
    },
    GetProcess {
        pid: Pid,
        reply: oneshot::Sender<Option<Process>>,
    },
    GetProcessByName {
        name: String,
        reply: oneshot::Sender<Option<Process>>,
    },
    ListProcesses {
        reply: oneshot::Sender<Vec<Process>>,
    },
    NamesOf {
        pid: Pid,
        reply: oneshot::Sender<Vec<String>>,
    },
    ListPeers {
        reply: oneshot::Sender<Vec<Atom>>,
    },
    #[cfg(test)]
    Snapshot {
        reply: oneshot::Sender<(Vec<Pid>, Vec<(String, Pid)>)>,
    },
}

/// Handle to a node's registrar loop.
#[derive(Clone)]
pub(crate) struct Registrar {
    node: Atom,
    tx: mpsc::UnboundedSender<Command>,
}

impl Registrar {
    /// Spawns the control loop. It runs until `root` is cancelled.
    pub(crate) fn start(
        node: Atom,
        config: &NodeConfig,
        root: CancellationToken,
        net: mpsc::UnboundedSender<NetEvent>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = RegistrarState {
            node,
            creation: config.creation,
            next_id: FIRST_PID_ID,
            serial: 1,
            mailbox_size: config.mailbox_size,
            route_retries: config.route_retries,
            retry_delay: config.retry_delay,
            root: root.clone(),
            retry_tx: tx.clone(),
            net,
            processes: HashMap::new(),
            names: HashMap::new(),
            peers: HashMap::new(),
        };
        tokio::spawn(state.run(rx));
        Self { node, tx }
    }

    /// The node this registrar serves.
    pub(crate) fn node(&self) -> Atom {
        self.node
    }

    fn send(&self, command: Command) -> Result<(), RegistrarError> {
        self.tx.send(command).map_err(|_| RegistrarError::Stopped)
    }

    async fn ask<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, RegistrarError> {
        let (reply, rx) = oneshot::channel();
        self.send(make(reply))?;
        rx.await.map_err(|_| RegistrarError::Stopped)
    }

    /// Allocates a pid and mailbox and enters the process in the tables.
    pub(crate) async fn register_process(
        &self,
        name: Option<&str>,
        options: ProcessOptions,
    ) -> Result<(Process, Mailbox), RegistrarError> {
        let name = name.filter(|n| !n.is_empty()).map(str::to_string);
        self.ask(|reply| Command::RegisterProcess {
            name,
            options,
            reply,
        })
        .await?
    }

    /// Removes `pid` and its names; resolves once the tables are updated.
    pub(crate) async fn unregister_process(&self, pid: Pid) {
        let _ = self.ask(|done| Command::UnregisterProcess { pid, done }).await;
    }

    /// Binds `name` to `pid`. The first writer wins: a name bound to another
    /// pid keeps its existing binding and the call returns `NameTaken`.
    /// Rebinding a name to its current owner succeeds.
    pub(crate) async fn register_name(&self, name: &str, pid: Pid) -> Result<(), RegistrarError> {
        let name = name.to_string();
        self.ask(|reply| Command::RegisterName { name, pid, reply })
            .await?
    }

    pub(crate) fn unregister_name(&self, name: &str) {
        let _ = self.send(Command::UnregisterName {
            name: name.to_string(),
        });
    }

    /// Returns `true` if the link is now the one traffic for its node uses.
    ///
    /// A link replaces an existing peer only when it is preferred and the
    /// existing one is not; otherwise the existing peer is kept.
    pub(crate) async fn register_peer(&self, peer: Peer) -> bool {
        self.ask(|reply| Command::RegisterPeer { peer, reply })
            .await
            .unwrap_or(false)
    }

    /// Removes the peer for `node` if it is still the link `id`. Returns
    /// whether an entry was removed.
    pub(crate) async fn unregister_peer(&self, node: Atom, id: u64) -> bool {
        self.ask(|reply| Command::UnregisterPeer { node, id, reply })
            .await
            .unwrap_or(false)
    }

    /// Routes a message. Delivery is best-effort; only a stopped node is an
    /// error.
    pub(crate) fn route(
        &self,
        from: Option<Pid>,
        to: Destination,
        message: Message,
    ) -> Result<(), RegistrarError> {
        self.send(Command::Route { from, to, message })
    }

    /// Sends a control frame to `node`, with the same retry policy as routes.
    pub(crate) fn forward(&self, node: Atom, frame: DistMessage) {
        let _ = self.send(Command::Forward {
            node,
            frame,
            attempt: 0,
        });
    }

    pub(crate) async fn whereis(&self, name: &str) -> Option<Pid> {
        let name = name.to_string();
        self.ask(|reply| Command::WhereIs { name, reply })
            .await
            .ok()
            .flatten()
    }

    pub(crate) async fn process(&self, pid: Pid) -> Option<Process> {
        self.ask(|reply| Command::GetProcess { pid, reply })
            .await
            .ok()
            .flatten()
    }

    pub(crate) async fn process_by_name(&self, name: &str) -> Option<Process> {
        let name = name.to_string();
        self.ask(|reply| Command::GetProcessByName { name, reply })
            .await
            .ok()
            .flatten()
    }

    pub(crate) async fn processes(&self) -> Vec<Process> {
        self.ask(|reply| Command::ListProcesses { reply })
            .await
            .unwrap_or_default()
    }

    pub(crate) async fn names_of(&self, pid: Pid) -> Vec<String> {
        self.ask(|reply| Command::NamesOf { pid, reply })
            .await
            .unwrap_or_default()
    }

    pub(crate) async fn peers(&self) -> Vec<Atom> {
        self.ask(|reply| Command::ListPeers { reply })
            .await
            .unwrap_or_default()
    }

    #[cfg(test)]
    async fn snapshot(&self) -> (Vec<Pid>, Vec<(String, Pid)>) {
        self.ask(|reply| Command::Snapshot { reply })
            .await
            .unwrap_or_default()
    }
}

struct RegistrarState {
    node: Atom,
    creation: u32,
    next_id: u64,
    serial: u32,
    mailbox_size: usize,
    route_retries: u32,
    retry_delay: Duration,
    root: CancellationToken,
    retry_tx: mpsc::UnboundedSender<Command>,
    net: mpsc::UnboundedSender<NetEvent>,
    processes: HashMap<Pid, Process>,
    names: HashMap<String, Pid>,
    peers: HashMap<Atom, Peer>,
}

impl RegistrarState {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        debug!(node = %self.node, "registrar started");
        loop {
            tokio::select! {
                biased;
                _ = self.root.cancelled() => {
                    self.shutdown();
                    break;
                }
                command = rx.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
            }
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::RegisterProcess {
                name,
                options,
                reply,
            } => {
                let result = self.register_process(name, options);
                if let Err(Ok((process, _))) = reply.send(result) {
                    // Nobody is waiting to run it.
                    self.remove_process(process.pid());
                }
            }
            Command::UnregisterProcess { pid, done } => {
                self.remove_process(pid);
                let _ = done.send(());
            }
            Command::RegisterName { name, pid, reply } => {
                let _ = reply.send(self.register_name(name, pid));
            }
            Command::UnregisterName { name } => {
                self.names.remove(&name);
            }
            Command::RegisterPeer { peer, reply } => {
                let active = match self.peers.get(&peer.node) {
                    None => {
                        info!(node = %self.node, peer = %peer.node, "peer connected");
                        true
                    }
                    Some(current) if peer.preferred && !current.preferred => {
                        debug!(node = %self.node, peer = %peer.node, "peer link replaced");
                        true
                    }
                    Some(_) => false,
                };
                if active {
                    self.peers.insert(peer.node, peer);
                }
                let _ = reply.send(active);
            }
            Command::UnregisterPeer { node, id, reply } => {
                let removed = self.peers.get(&node).is_some_and(|p| p.id == id);
                if removed {
                    info!(node = %self.node, peer = %node, "peer disconnected");
                    self.peers.remove(&node);
                }
                let _ = reply.send(removed);
            }
            Command::Route { from, to, message } => self.route(from, to, message),
            Command::Forward {
                node,
                frame,
                attempt,
            } => self.forward(node, frame, attempt),
            Command::WhereIs { name, reply } => {
                let _ = reply.send(self.names.get(&name).copied());
            }
            Command::GetProcess { pid, reply } => {
                let _ = reply.send(self.processes.get(&pid).cloned());
            }
            Command::GetProcessByName { name, reply } => {
                let process = self
                    .names
                    .get(&name)
                    .and_then(|pid| self.processes.get(pid))
                    .cloned();
                let _ = reply.send(process);
            }
            Command::ListProcesses { reply } => {
                let mut list: Vec<Process> = self.processes.values().cloned().collect();
                list.sort_by_key(|p| p.pid());
                let _ = reply.send(list);
            }
            Command::NamesOf { pid, reply } => {
                let mut names: Vec<String> = self
                    .names
                    .iter()
                    .filter(|(_, p)| **p == pid)
                    .map(|(n, _)| n.clone())
                    .collect();
                names.sort();
                let _ = reply.send(names);
            }
            Command::ListPeers { reply } => {
                let _ = reply.send(self.peers.keys().copied().collect());
            }
            #[cfg(test)]
            Command::Snapshot { reply } => {
                let pids = self.processes.keys().copied().collect();
                let names = self.names.iter().map(|(n, p)| (n.clone(), *p)).collect();
                let _ = reply.send((pids, names));
            }
        }
    }

    fn next_pid(&mut self) -> Pid {
        let id = self.next_id;
        self.next_id = match self.next_id.checked_add(1) {
            Some(next) => next,
            None => {
                self.serial += 1;
                FIRST_PID_ID
            }
        };
        Pid::new(self.node, id, self.serial, self.creation)
    }

    fn register_process(
        &mut self,
        name: Option<String>,
        options: ProcessOptions,
    ) -> Result<(Process, Mailbox), RegistrarError> {
        if let Some(name) = &name {
            if self.names.contains_key(name) {
                return Err(RegistrarError::NameTaken(name.clone()));
            }
        }

        let pid = self.next_pid();
        let (mailbox, sender) = Mailbox::new(options.mailbox_size.unwrap_or(self.mailbox_size));
        let process = Process::new(
            pid,
            name.clone(),
            sender,
            self.root.child_token(),
            options.env,
            options.trap_exit,
        );

        self.processes.insert(pid, process.clone());
        if let Some(name) = name {
            self.names.insert(name, pid);
        }
        trace!(%pid, name = ?process.name(), "process registered");
        Ok((process, mailbox))
    }

    fn remove_process(&mut self, pid: Pid) {
        if self.processes.remove(&pid).is_some() {
            self.names.retain(|_, p| *p != pid);
            trace!(%pid, "process unregistered");
        }
    }

    fn register_name(&mut self, name: String, pid: Pid) -> Result<(), RegistrarError> {
        if !self.processes.contains_key(&pid) {
            return Err(RegistrarError::NoProcess(pid));
        }
        match self.names.get(&name) {
            Some(owner) if *owner == pid => Ok(()),
            Some(_) => Err(RegistrarError::NameTaken(name)),
            None => {
                self.names.insert(name, pid);
                Ok(())
            }
        }
    }

    fn route(&mut self, from: Option<Pid>, to: Destination, message: Message) {
        let envelope = Envelope::new(from, message);
        match to {
            Destination::Pid(pid) if pid.is_on(self.node) => self.deliver(pid, envelope),
            Destination::Pid(pid) => {
                self.forward(pid.node(), DistMessage::Send { to: pid, envelope }, 0)
            }
            Destination::Name(name) => self.deliver_by_name(&name, envelope),
            Destination::Remote { name, node } if node == self.node => {
                self.deliver_by_name(&name, envelope)
            }
            Destination::Remote { name, node } => self.forward(
                node,
                DistMessage::RegSend {
                    to: name,
                    envelope,
                },
                0,
            ),
        }
    }

    fn deliver_by_name(&mut self, name: &str, envelope: Envelope) {
        match self.names.get(name) {
            Some(pid) => self.deliver(*pid, envelope),
            None => trace!(name, "dropping message for unregistered name"),
        }
    }

    fn deliver(&mut self, pid: Pid, envelope: Envelope) {
        match self.processes.get(&pid) {
            Some(process) => {
                if let Err(error) = process.deliver(envelope) {
                    warn!(%pid, %error, "dropping message");
                }
            }
            None => trace!(%pid, "dropping message for unknown process"),
        }
    }

    fn forward(&mut self, node: Atom, frame: DistMessage, attempt: u32) {
        let frame = match self.peers.get(&node) {
            Some(peer) => match peer.tx.try_send(frame) {
                Ok(()) => return,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(peer = %node, "peer send queue full, dropping frame");
                    return;
                }
                // The link's reader pump removes the peer and reports the
                // node down; until then, retry like an unknown node.
                Err(mpsc::error::TrySendError::Closed(frame)) => frame,
            },
            None => frame,
        };

        if attempt >= self.route_retries {
            debug!(peer = %node, attempt, "dropping frame for unreachable node");
            let _ = self.net.send(NetEvent::Unreachable(node));
            return;
        }

        trace!(peer = %node, attempt, "no link to node, scheduling retry");
        let _ = self.net.send(NetEvent::Connect(node));
        let retry_tx = self.retry_tx.clone();
        let delay = self.retry_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = retry_tx.send(Command::Forward {
                node,
                frame,
                attempt: attempt + 1,
            });
        });
    }

    fn shutdown(&mut self) {
        info!(
            node = %self.node,
            processes = self.processes.len(),
            "registrar shutting down"
        );
        for process in self.processes.values() {
            process.stop(ExitReason::Normal);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom;
    use crate::core::{RawTerm, Term};
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn start(config: NodeConfig) -> (Registrar, mpsc::UnboundedReceiver<NetEvent>, CancellationToken) {
        let root = CancellationToken::new();
        let (net_tx, net_rx) = mpsc::unbounded_channel();
        let registrar = Registrar::start(atom!("reg@test"), &config, root.clone(), net_tx);
        (registrar, net_rx, root)
    }

    fn info(n: u32) -> Message {
        Message::Info(RawTerm::new(n.encode().unwrap()))
    }

    #[tokio::test]
    async fn test_register_allocates_sequential_pids() {
        let (registrar, _net, _root) = start(NodeConfig::default());
        let (a, _ma) = registrar.register_process(None, ProcessOptions::new()).await.unwrap();
        let (b, _mb) = registrar.register_process(None, ProcessOptions::new()).await.unwrap();

        assert_eq!(a.pid().id(), FIRST_PID_ID);
        assert_eq!(b.pid().id(), FIRST_PID_ID + 1);
        assert_eq!(a.pid().node(), atom!("reg@test"));
        assert_eq!(registrar.processes().await.len(), 2);
    }

    #[tokio::test]
    async fn test_register_name_conflicts() {
        let (registrar, _net, _root) = start(NodeConfig::default());
        let (a, _ma) = registrar
            .register_process(Some("svc"), ProcessOptions::new())
            .await
            .unwrap();

        let err = registrar
            .register_process(Some("svc"), ProcessOptions::new())
            .await
            .unwrap_err();
        assert_eq!(err, RegistrarError::NameTaken("svc".into()));

        let (b, _mb) = registrar.register_process(None, ProcessOptions::new()).await.unwrap();
        assert_eq!(
            registrar.register_name("svc", b.pid()).await,
            Err(RegistrarError::NameTaken("svc".into()))
        );
        // First writer keeps the name.
        assert_eq!(registrar.whereis("svc").await, Some(a.pid()));

        // Re-registering one's own name is fine.
        assert!(registrar.register_name("svc", a.pid()).await.is_ok());
    }

    #[tokio::test]
    async fn test_register_name_requires_live_process() {
        let (registrar, _net, _root) = start(NodeConfig::default());
        let ghost = Pid::new("reg@test", 5, 1, 1);
        assert_eq!(
            registrar.register_name("ghost", ghost).await,
            Err(RegistrarError::NoProcess(ghost))
        );
    }

    #[tokio::test]
    async fn test_unregister_drops_names_and_is_idempotent() {
        let (registrar, _net, _root) = start(NodeConfig::default());
        let (a, _ma) = registrar
            .register_process(Some("first"), ProcessOptions::new())
            .await
            .unwrap();
        registrar.register_name("second", a.pid()).await.unwrap();
        assert_eq!(registrar.names_of(a.pid()).await, vec!["first", "second"]);

        registrar.unregister_process(a.pid()).await;
        registrar.unregister_process(a.pid()).await;

        assert_eq!(registrar.whereis("first").await, None);
        assert_eq!(registrar.whereis("second").await, None);
        assert!(registrar.process(a.pid()).await.is_none());
    }

    #[tokio::test]
    async fn test_route_local_by_pid_and_name() {
        let (registrar, _net, _root) = start(NodeConfig::default());
        let (a, mut mailbox) = registrar
            .register_process(Some("inbox"), ProcessOptions::new())
            .await
            .unwrap();
        let sender = Pid::new("reg@test", 1, 1, 1);

        registrar.route(Some(sender), a.pid().into(), info(1)).unwrap();
        registrar.route(None, "inbox".into(), info(2)).unwrap();
        registrar
            .route(None, Destination::remote("inbox", "reg@test"), info(3))
            .unwrap();
        registrar.route(None, "nobody".into(), info(4)).unwrap();

        let first = mailbox.recv().await.unwrap();
        assert_eq!(first.from, Some(sender));
        assert_eq!(first.message, info(1));
        assert_eq!(mailbox.recv().await.unwrap().message, info(2));
        assert_eq!(mailbox.recv().await.unwrap().message, info(3));
        assert!(mailbox.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_remote_route_retries_then_drops() {
        let config = NodeConfig::new()
            .route_retries(3)
            .retry_delay(Duration::from_millis(5));
        let (registrar, mut net, _root) = start(config);

        let remote = Pid::new("far@away", 1000, 1, 1);
        registrar.route(None, remote.into(), info(1)).unwrap();

        let far = atom!("far@away");
        for _ in 0..3 {
            assert_eq!(net.recv().await, Some(NetEvent::Connect(far)));
        }
        assert_eq!(net.recv().await, Some(NetEvent::Unreachable(far)));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(net.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_remote_route_uses_peer() {
        let (registrar, _net, _root) = start(NodeConfig::default());
        let (tx, mut rx) = mpsc::channel(4);
        let far = atom!("peer@away");
        let peer = |id, preferred, tx| Peer {
            node: far,
            id,
            preferred,
            tx,
        };
        assert!(registrar.register_peer(peer(1, true, tx.clone())).await);
        assert!(!registrar.register_peer(peer(2, false, tx.clone())).await);
        assert!(!registrar.register_peer(peer(3, true, tx)).await);
        assert_eq!(registrar.peers().await, vec![far]);

        registrar
            .route(None, Destination::remote("svc", far), info(9))
            .unwrap();
        match rx.recv().await.unwrap() {
            DistMessage::RegSend { to, envelope } => {
                assert_eq!(to, "svc");
                assert_eq!(envelope.message, info(9));
            }
            other => panic!("unexpected frame {:?}", other),
        }

        // A stale link id does not remove the live peer.
        assert!(!registrar.unregister_peer(far, 2).await);
        assert_eq!(registrar.peers().await, vec![far]);
        assert!(registrar.unregister_peer(far, 1).await);
        assert!(registrar.peers().await.is_empty());
    }

    #[tokio::test]
    async fn test_preferred_link_replaces_peer() {
        let (registrar, _net, _root) = start(NodeConfig::default());
        let (old_tx, mut old_rx) = mpsc::channel(4);
        let (new_tx, mut new_rx) = mpsc::channel(4);
        let far = atom!("racer@away");

        assert!(
            registrar
                .register_peer(Peer { node: far, id: 1, preferred: false, tx: old_tx })
                .await
        );
        assert!(
            registrar
                .register_peer(Peer { node: far, id: 2, preferred: true, tx: new_tx })
                .await
        );

        // The replaced link's queue is closed and traffic takes the new one.
        assert_eq!(old_rx.recv().await, None);
        registrar
            .route(None, Destination::remote("svc", far), info(3))
            .unwrap();
        assert!(matches!(
            new_rx.recv().await,
            Some(DistMessage::RegSend { .. })
        ));

        // Losing the replaced link leaves the peer in place.
        assert!(!registrar.unregister_peer(far, 1).await);
        assert_eq!(registrar.peers().await, vec![far]);
    }

    #[tokio::test]
    async fn test_shutdown_stops_every_process() {
        let (registrar, _net, root) = start(NodeConfig::default());
        let (a, _ma) = registrar.register_process(None, ProcessOptions::new()).await.unwrap();
        let (b, _mb) = registrar.register_process(None, ProcessOptions::new()).await.unwrap();

        root.cancel();
        a.token().cancelled().await;
        b.token().cancelled().await;
        assert_eq!(a.requested_stop_reason(), ExitReason::Normal);
        assert_eq!(registrar.whereis("x").await, None);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Spawn(Option<u8>),
        Unregister(usize),
        Name(u8, usize),
        Unname(u8),
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            proptest::option::of(0u8..4).prop_map(Op::Spawn),
            (0usize..16).prop_map(Op::Unregister),
            (0u8..4, 0usize..16).prop_map(|(n, i)| Op::Name(n, i)),
            (0u8..4).prop_map(Op::Unname),
        ]
    }

    proptest! {
        #[test]
        fn prop_name_table_only_references_live_pids(ops in proptest::collection::vec(arb_op(), 1..40)) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let (registrar, _net, _root) = start(NodeConfig::default());
                let mut spawned: Vec<(Pid, Mailbox)> = Vec::new();

                for op in ops {
                    match op {
                        Op::Spawn(name) => {
                            let name = name.map(|n| format!("n{}", n));
                            if let Ok((p, m)) = registrar
                                .register_process(name.as_deref(), ProcessOptions::new())
                                .await
                            {
                                spawned.push((p.pid(), m));
                            }
                        }
                        Op::Unregister(i) if !spawned.is_empty() => {
                            let (pid, _) = spawned.remove(i % spawned.len());
                            registrar.unregister_process(pid).await;
                        }
                        Op::Name(n, i) if !spawned.is_empty() => {
                            let pid = spawned[i % spawned.len()].0;
                            let _ = registrar.register_name(&format!("n{}", n), pid).await;
                        }
                        Op::Unname(n) => registrar.unregister_name(&format!("n{}", n)),
                        _ => {}
                    }

                    let (pids, names) = registrar.snapshot().await;
                    let live: HashSet<Pid> = spawned.iter().map(|(p, _)| *p).collect();
                    let table: HashSet<Pid> = pids.into_iter().collect();
                    assert_eq!(&table, &live);
                    for (_, pid) in names {
                        assert!(table.contains(&pid));
                    }
                }
            });
        }
    }
}
