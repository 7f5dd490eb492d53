//! Links and monitors.
//!
//! A **link** is a symmetric pair: when either side terminates the other
//! receives an exit signal. A process trapping exits gets the signal as a
//! [`Message::Exit`]; otherwise an abnormal reason terminates it with the
//! same reason and a normal one is ignored.
//!
//! A **monitor** is directed and named by a [`Ref`]: when the watched
//! process terminates the watcher receives exactly one [`Message::Down`] for
//! that reference. Cancelling with `demonitor` guarantees no notification.
//!
//! Relations are kept by one control loop. Terminations are reported through
//! [`Monitor::process_terminated`], after the registrar has already dropped
//! the pid; that ordering is what lets a new relation against a dying
//! process resolve to `noproc` instead of being lost.
//!
//! When one side of a relation lives on another node the loop forwards the
//! matching control frame through the registrar, and it applies the frames
//! that arrive from peers. Losing a peer fires `noconnection` for every
//! relation keyed on that node.
//!
//! A process may also watch a whole node with `monitor_node`. Each call adds
//! one instance; when the node goes down every instance delivers one
//! [`Message::NodeDown`] and is dropped.

use crate::atom::Atom;
use crate::core::{ExitReason, Pid, Ref};
use crate::process::Message;
use crate::registrar::Registrar;
use crate::transport::DistMessage;
use std::collections::{HashMap, HashSet};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

enum Command {
    Link { a: Pid, b: Pid },
    Unlink { a: Pid, b: Pid },
    Monitor {
        watcher: Pid,
        watched: Pid,
        reference: Ref,
    },
    Demonitor { reference: Ref },
    ProcessTerminated { pid: Pid, reason: ExitReason },
    NodeDown { node: Atom },
    MonitorNode {
        watcher: Pid,
        node: Atom,
        enable: bool,
    },
    Remote(DistMessage),
    Relations {
        pid: Pid,
        reply: oneshot::Sender<Relations>,
    },
}

/// The relations one process takes part in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Relations {
    pub links: Vec<Pid>,
    pub monitors: Vec<Pid>,
    pub monitored_by: Vec<Pid>,
}

/// Handle to a node's monitor loop.
#[derive(Clone)]
pub(crate) struct Monitor {
    tx: mpsc::UnboundedSender<Command>,
}

impl Monitor {
    pub(crate) fn start(registrar: Registrar, root: CancellationToken) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = MonitorState {
            node: registrar.node(),
            registrar,
            links: HashMap::new(),
            monitors: HashMap::new(),
            by_watched: HashMap::new(),
            by_watcher: HashMap::new(),
            node_watchers: HashMap::new(),
        };
        tokio::spawn(state.run(rx, root));
        Self { tx }
    }

    fn send(&self, command: Command) {
        let _ = self.tx.send(command);
    }

    /// Links local process `a` with `b`.
    pub(crate) fn link(&self, a: Pid, b: Pid) {
        self.send(Command::Link { a, b });
    }

    pub(crate) fn unlink(&self, a: Pid, b: Pid) {
        self.send(Command::Unlink { a, b });
    }

    /// Makes local `watcher` monitor `watched` under `reference`.
    pub(crate) fn monitor(&self, watcher: Pid, watched: Pid, reference: Ref) {
        self.send(Command::Monitor {
            watcher,
            watched,
            reference,
        });
    }

    pub(crate) fn demonitor(&self, reference: Ref) {
        self.send(Command::Demonitor { reference });
    }

    /// Fans a local termination out to every relation of `pid`, then
    /// forgets them.
    pub(crate) fn process_terminated(&self, pid: Pid, reason: ExitReason) {
        self.send(Command::ProcessTerminated { pid, reason });
    }

    pub(crate) fn node_down(&self, node: Atom) {
        self.send(Command::NodeDown { node });
    }

    /// Adds one node monitor for `watcher`, or with `enable` false removes
    /// all of its monitors on `node`.
    pub(crate) fn monitor_node(&self, watcher: Pid, node: Atom, enable: bool) {
        self.send(Command::MonitorNode {
            watcher,
            node,
            enable,
        });
    }

    /// Applies a relation frame received from a peer.
    pub(crate) fn remote(&self, frame: DistMessage) {
        self.send(Command::Remote(frame));
    }

    pub(crate) async fn relations(&self, pid: Pid) -> Relations {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Relations { pid, reply });
        rx.await.unwrap_or_default()
    }
}

struct MonitorState {
    node: Atom,
    registrar: Registrar,
    links: HashMap<Pid, HashSet<Pid>>,
    monitors: HashMap<Ref, (Pid, Pid)>,
    by_watched: HashMap<Pid, HashSet<Ref>>,
    by_watcher: HashMap<Pid, HashSet<Ref>>,
    /// Node monitors: watched node to watcher and instance count.
    node_watchers: HashMap<Atom, HashMap<Pid, usize>>,
}

impl MonitorState {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>, root: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = root.cancelled() => break,
                command = rx.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
            }
        }
        debug!(node = %self.node, "monitor stopped");
    }

    fn is_local(&self, pid: Pid) -> bool {
        pid.is_on(self.node)
    }

    async fn is_alive(&self, pid: Pid) -> bool {
        self.registrar.process(pid).await.is_some()
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Link { a, b } => self.link(a, b).await,
            Command::Unlink { a, b } => {
                self.remove_link(a, b);
                if !self.is_local(b) {
                    self.registrar
                        .forward(b.node(), DistMessage::Unlink { from: a, to: b });
                }
            }
            Command::Monitor {
                watcher,
                watched,
                reference,
            } => self.monitor(watcher, watched, reference).await,
            Command::Demonitor { reference } => {
                if let Some((watcher, watched)) = self.remove_monitor(&reference) {
                    if !self.is_local(watched) {
                        self.registrar.forward(
                            watched.node(),
                            DistMessage::Demonitor {
                                watcher,
                                watched,
                                reference,
                            },
                        );
                    }
                }
            }
            Command::ProcessTerminated { pid, reason } => self.terminated(pid, reason).await,
            Command::NodeDown { node } => self.node_down(node).await,
            Command::MonitorNode {
                watcher,
                node,
                enable,
            } => self.monitor_node(watcher, node, enable),
            Command::Remote(frame) => self.remote(frame).await,
            Command::Relations { pid, reply } => {
                let _ = reply.send(self.relations_of(pid));
            }
        }
    }

    async fn link(&mut self, a: Pid, b: Pid) {
        if a == b || !self.is_alive(a).await {
            return;
        }
        if self.is_local(b) {
            if !self.is_alive(b).await {
                self.signal_exit(a, b, ExitReason::NoProc).await;
                return;
            }
        } else {
            self.registrar
                .forward(b.node(), DistMessage::Link { from: a, to: b });
        }
        self.add_link(a, b);
    }

    async fn monitor(&mut self, watcher: Pid, watched: Pid, reference: Ref) {
        if self.is_local(watched) {
            if !self.is_alive(watched).await {
                self.notify_down(watcher, reference, watched, ExitReason::NoProc);
                return;
            }
        } else {
            self.registrar.forward(
                watched.node(),
                DistMessage::Monitor {
                    watcher,
                    watched,
                    reference,
                },
            );
        }
        self.add_monitor(watcher, watched, reference);
    }

    fn monitor_node(&mut self, watcher: Pid, node: Atom, enable: bool) {
        if enable {
            *self
                .node_watchers
                .entry(node)
                .or_default()
                .entry(watcher)
                .or_default() += 1;
        } else if let Some(watchers) = self.node_watchers.get_mut(&node) {
            watchers.remove(&watcher);
            if watchers.is_empty() {
                self.node_watchers.remove(&node);
            }
        }
    }

    async fn terminated(&mut self, pid: Pid, reason: ExitReason) {
        trace!(%pid, %reason, "fanning out termination");

        self.node_watchers.retain(|_, watchers| {
            watchers.remove(&pid);
            !watchers.is_empty()
        });

        for other in self.links.remove(&pid).unwrap_or_default() {
            self.detach(other, pid);
            if self.is_local(other) {
                self.signal_exit(other, pid, reason.clone()).await;
            } else {
                self.registrar.forward(
                    other.node(),
                    DistMessage::Exit {
                        from: pid,
                        to: other,
                        reason: reason.clone(),
                    },
                );
            }
        }

        for reference in self.by_watched.remove(&pid).unwrap_or_default() {
            let Some((watcher, _)) = self.monitors.remove(&reference) else {
                continue;
            };
            unindex(&mut self.by_watcher, watcher, &reference);
            if self.is_local(watcher) {
                self.notify_down(watcher, reference, pid, reason.clone());
            } else {
                self.registrar.forward(
                    watcher.node(),
                    DistMessage::MonitorExit {
                        watched: pid,
                        watcher,
                        reference,
                        reason: reason.clone(),
                    },
                );
            }
        }

        for reference in self.by_watcher.remove(&pid).unwrap_or_default() {
            let Some((_, watched)) = self.monitors.remove(&reference) else {
                continue;
            };
            unindex(&mut self.by_watched, watched, &reference);
            if !self.is_local(watched) {
                self.registrar.forward(
                    watched.node(),
                    DistMessage::Demonitor {
                        watcher: pid,
                        watched,
                        reference,
                    },
                );
            }
        }
    }

    async fn node_down(&mut self, node: Atom) {
        let severed: Vec<(Pid, Pid)> = self
            .links
            .iter()
            .filter(|(local, _)| !local.is_on(node))
            .flat_map(|(local, others)| {
                others
                    .iter()
                    .filter(|o| o.is_on(node))
                    .map(move |o| (*local, *o))
            })
            .collect();
        if !severed.is_empty() || self.monitors.values().any(|(w, d)| w.is_on(node) || d.is_on(node)) {
            debug!(%node, links = severed.len(), "node down, firing noconnection");
        }

        for (local, remote) in severed {
            self.remove_link(local, remote);
            self.signal_exit(local, remote, ExitReason::NoConnection).await;
        }
        // Relations held on behalf of processes on the lost node.
        self.links.retain(|pid, _| !pid.is_on(node));

        let lost: Vec<(Ref, Pid, Pid)> = self
            .monitors
            .iter()
            .filter(|(_, (w, d))| w.is_on(node) || d.is_on(node))
            .map(|(r, (w, d))| (*r, *w, *d))
            .collect();
        for (reference, watcher, watched) in lost {
            self.remove_monitor(&reference);
            if watched.is_on(node) && self.is_local(watcher) {
                self.notify_down(watcher, reference, watched, ExitReason::NoConnection);
            }
        }

        for (watcher, count) in self.node_watchers.remove(&node).unwrap_or_default() {
            for _ in 0..count {
                let _ = self
                    .registrar
                    .route(None, watcher.into(), Message::NodeDown { node });
            }
        }
    }

    async fn remote(&mut self, frame: DistMessage) {
        match frame {
            DistMessage::Link { from, to } => {
                if self.is_alive(to).await {
                    self.add_link(to, from);
                } else {
                    self.registrar.forward(
                        from.node(),
                        DistMessage::Exit {
                            from: to,
                            to: from,
                            reason: ExitReason::NoProc,
                        },
                    );
                }
            }
            DistMessage::Unlink { from, to } => self.remove_link(to, from),
            DistMessage::Exit { from, to, reason } => {
                self.remove_link(to, from);
                self.signal_exit(to, from, reason).await;
            }
            DistMessage::Monitor {
                watcher,
                watched,
                reference,
            } => {
                if self.is_alive(watched).await {
                    self.add_monitor(watcher, watched, reference);
                } else {
                    self.registrar.forward(
                        watcher.node(),
                        DistMessage::MonitorExit {
                            watched,
                            watcher,
                            reference,
                            reason: ExitReason::NoProc,
                        },
                    );
                }
            }
            DistMessage::Demonitor { reference, .. } => {
                self.remove_monitor(&reference);
            }
            DistMessage::MonitorExit {
                watched,
                watcher,
                reference,
                reason,
            } => {
                if self.remove_monitor(&reference).is_some() {
                    self.notify_down(watcher, reference, watched, reason);
                }
            }
            DistMessage::Send { .. } | DistMessage::RegSend { .. } => {}
        }
    }

    /// Delivers an exit signal from `from` to local process `target`.
    async fn signal_exit(&self, target: Pid, from: Pid, reason: ExitReason) {
        let Some(process) = self.registrar.process(target).await else {
            return;
        };
        if process.is_trapping_exits() {
            let _ = self.registrar.route(
                Some(from),
                target.into(),
                Message::Exit { from, reason },
            );
        } else if reason.is_abnormal() {
            debug!(pid = %target, %from, %reason, "exit signal terminates linked process");
            process.stop(reason);
        }
    }

    fn notify_down(&self, watcher: Pid, reference: Ref, pid: Pid, reason: ExitReason) {
        let _ = self.registrar.route(
            Some(pid),
            watcher.into(),
            Message::Down {
                reference,
                pid,
                reason,
            },
        );
    }

    fn add_link(&mut self, a: Pid, b: Pid) {
        self.links.entry(a).or_default().insert(b);
        self.links.entry(b).or_default().insert(a);
    }

    fn remove_link(&mut self, a: Pid, b: Pid) {
        self.detach(a, b);
        self.detach(b, a);
    }

    fn detach(&mut self, owner: Pid, other: Pid) {
        if let Some(set) = self.links.get_mut(&owner) {
            set.remove(&other);
            if set.is_empty() {
                self.links.remove(&owner);
            }
        }
    }

    fn add_monitor(&mut self, watcher: Pid, watched: Pid, reference: Ref) {
        self.monitors.insert(reference, (watcher, watched));
        self.by_watched.entry(watched).or_default().insert(reference);
        self.by_watcher.entry(watcher).or_default().insert(reference);
    }

    fn remove_monitor(&mut self, reference: &Ref) -> Option<(Pid, Pid)> {
        let (watcher, watched) = self.monitors.remove(reference)?;
        unindex(&mut self.by_watched, watched, reference);
        unindex(&mut self.by_watcher, watcher, reference);
        Some((watcher, watched))
    }

    fn relations_of(&self, pid: Pid) -> Relations {
        let mut links: Vec<Pid> = self
            .links
            .get(&pid)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        let mut monitors: Vec<Pid> = self
            .by_watcher
            .get(&pid)
            .map(|refs| refs.iter().filter_map(|r| self.monitors.get(r)).map(|(_, d)| *d).collect())
            .unwrap_or_default();
        let mut monitored_by: Vec<Pid> = self
            .by_watched
            .get(&pid)
            .map(|refs| refs.iter().filter_map(|r| self.monitors.get(r)).map(|(w, _)| *w).collect())
            .unwrap_or_default();
        links.sort();
        monitors.sort();
        monitored_by.sort();
        Relations {
            links,
            monitors,
            monitored_by,
        }
    }
}

fn unindex(index: &mut HashMap<Pid, HashSet<Ref>>, pid: Pid, reference: &Ref) {
    if let Some(set) = index.get_mut(&pid) {
        set.remove(reference);
        if set.is_empty() {
            index.remove(&pid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom;
    use crate::config::{NodeConfig, ProcessOptions};
    use crate::process::Mailbox;
    use crate::registrar::NetEvent;
    use std::time::Duration;

    struct Fixture {
        registrar: Registrar,
        monitor: Monitor,
        net: mpsc::UnboundedReceiver<NetEvent>,
        _root: CancellationToken,
    }

    fn fixture() -> Fixture {
        let root = CancellationToken::new();
        let (net_tx, net) = mpsc::unbounded_channel();
        let registrar = Registrar::start(atom!("mon@test"), &NodeConfig::default(), root.clone(), net_tx);
        let monitor = Monitor::start(registrar.clone(), root.clone());
        Fixture {
            registrar,
            monitor,
            net,
            _root: root,
        }
    }

    async fn spawn(f: &Fixture, trap_exit: bool) -> (crate::process::Process, Mailbox) {
        f.registrar
            .register_process(None, ProcessOptions::new().trap_exit(trap_exit))
            .await
            .unwrap()
    }

    async fn terminate(f: &Fixture, pid: Pid, reason: ExitReason) {
        f.registrar.unregister_process(pid).await;
        f.monitor.process_terminated(pid, reason);
    }

    async fn next(mailbox: &mut Mailbox) -> Message {
        tokio::time::timeout(Duration::from_secs(1), mailbox.recv())
            .await
            .unwrap()
            .unwrap()
            .message
    }

    #[tokio::test]
    async fn test_monitor_delivers_one_down() {
        let f = fixture();
        let (watcher, mut inbox) = spawn(&f, false).await;
        let (watched, _m) = spawn(&f, false).await;
        let reference = Ref::new("mon@test", [1, 0, 1]);

        f.monitor.monitor(watcher.pid(), watched.pid(), reference);
        assert_eq!(f.monitor.relations(watched.pid()).await.monitored_by, vec![watcher.pid()]);

        terminate(&f, watched.pid(), ExitReason::error("crash")).await;
        assert_eq!(
            next(&mut inbox).await,
            Message::Down {
                reference,
                pid: watched.pid(),
                reason: ExitReason::error("crash"),
            }
        );
        assert_eq!(f.monitor.relations(watcher.pid()).await, Relations::default());
        assert!(inbox.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_demonitor_suppresses_down() {
        let f = fixture();
        let (watcher, mut inbox) = spawn(&f, false).await;
        let (watched, _m) = spawn(&f, false).await;
        let reference = Ref::new("mon@test", [2, 0, 1]);

        f.monitor.monitor(watcher.pid(), watched.pid(), reference);
        f.monitor.demonitor(reference);
        terminate(&f, watched.pid(), ExitReason::Normal).await;

        let _ = f.monitor.relations(watched.pid()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(inbox.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_monitor_dead_process_is_noproc() {
        let f = fixture();
        let (watcher, mut inbox) = spawn(&f, false).await;
        let ghost = Pid::new("mon@test", 9, 1, 1);
        let reference = Ref::new("mon@test", [3, 0, 1]);

        f.monitor.monitor(watcher.pid(), ghost, reference);
        assert_eq!(
            next(&mut inbox).await,
            Message::Down {
                reference,
                pid: ghost,
                reason: ExitReason::NoProc,
            }
        );
    }

    #[tokio::test]
    async fn test_abnormal_exit_propagates_over_link() {
        let f = fixture();
        let (a, _ma) = spawn(&f, false).await;
        let (b, _mb) = spawn(&f, false).await;

        f.monitor.link(a.pid(), b.pid());
        assert_eq!(f.monitor.relations(a.pid()).await.links, vec![b.pid()]);

        terminate(&f, b.pid(), ExitReason::error("boom")).await;
        a.token().cancelled().await;
        assert_eq!(a.requested_stop_reason(), ExitReason::error("boom"));
    }

    #[tokio::test]
    async fn test_normal_exit_does_not_propagate() {
        let f = fixture();
        let (a, _ma) = spawn(&f, false).await;
        let (b, _mb) = spawn(&f, false).await;

        f.monitor.link(a.pid(), b.pid());
        terminate(&f, b.pid(), ExitReason::Normal).await;
        assert!(f.monitor.relations(a.pid()).await.links.is_empty());
        assert!(!a.token().is_cancelled());
    }

    #[tokio::test]
    async fn test_trapping_process_receives_exit_message() {
        let f = fixture();
        let (a, mut inbox) = spawn(&f, true).await;
        let (b, _mb) = spawn(&f, false).await;

        f.monitor.link(a.pid(), b.pid());
        terminate(&f, b.pid(), ExitReason::Killed).await;

        assert_eq!(
            next(&mut inbox).await,
            Message::Exit {
                from: b.pid(),
                reason: ExitReason::Killed,
            }
        );
        assert!(!a.token().is_cancelled());
    }

    #[tokio::test]
    async fn test_unlink_removes_relation() {
        let f = fixture();
        let (a, _ma) = spawn(&f, false).await;
        let (b, _mb) = spawn(&f, false).await;

        f.monitor.link(a.pid(), b.pid());
        f.monitor.unlink(b.pid(), a.pid());
        terminate(&f, b.pid(), ExitReason::error("boom")).await;
        let _ = f.monitor.relations(a.pid()).await;
        assert!(!a.token().is_cancelled());
    }

    #[tokio::test]
    async fn test_remote_monitor_forwards_and_fires_on_node_down() {
        let mut f = fixture();
        let (watcher, mut inbox) = spawn(&f, false).await;
        let remote = Pid::new("far@test", 1000, 1, 1);
        let reference = Ref::new("mon@test", [4, 0, 1]);

        f.monitor.monitor(watcher.pid(), remote, reference);
        // No peer: the registrar asks for a connection.
        assert_eq!(f.net.recv().await, Some(NetEvent::Connect(atom!("far@test"))));

        f.monitor.node_down(atom!("far@test"));
        assert_eq!(
            next(&mut inbox).await,
            Message::Down {
                reference,
                pid: remote,
                reason: ExitReason::NoConnection,
            }
        );
    }

    #[tokio::test]
    async fn test_inbound_monitor_exit_notifies_watcher() {
        let f = fixture();
        let (watcher, mut inbox) = spawn(&f, false).await;
        let remote = Pid::new("far@test", 1000, 1, 1);
        let reference = Ref::new("mon@test", [5, 0, 1]);

        f.monitor.monitor(watcher.pid(), remote, reference);
        f.monitor.remote(DistMessage::MonitorExit {
            watched: remote,
            watcher: watcher.pid(),
            reference,
            reason: ExitReason::Shutdown,
        });
        assert_eq!(
            next(&mut inbox).await,
            Message::Down {
                reference,
                pid: remote,
                reason: ExitReason::Shutdown,
            }
        );
    }

    #[tokio::test]
    async fn test_node_monitor_delivers_each_instance() {
        let f = fixture();
        let (watcher, mut inbox) = spawn(&f, false).await;
        let far = atom!("watched@test");

        f.monitor.monitor_node(watcher.pid(), far, true);
        f.monitor.monitor_node(watcher.pid(), far, true);
        f.monitor.node_down(far);

        for _ in 0..2 {
            assert_eq!(next(&mut inbox).await, Message::NodeDown { node: far });
        }
        // Instances are one-shot.
        f.monitor.node_down(far);
        let _ = f.monitor.relations(watcher.pid()).await;
        assert!(inbox.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_node_monitor_can_be_turned_off() {
        let f = fixture();
        let (watcher, mut inbox) = spawn(&f, false).await;
        let (gone, _m) = spawn(&f, false).await;
        let far = atom!("quiet@test");

        f.monitor.monitor_node(watcher.pid(), far, true);
        f.monitor.monitor_node(watcher.pid(), far, false);
        f.monitor.monitor_node(gone.pid(), far, true);
        terminate(&f, gone.pid(), ExitReason::Normal).await;
        f.monitor.node_down(far);

        let _ = f.monitor.relations(watcher.pid()).await;
        assert!(inbox.try_recv().is_none());
    }
}
