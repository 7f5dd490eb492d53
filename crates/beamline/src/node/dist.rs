//! The connection manager.
//!
//! One task per node turns registrar requests into links: it connects on
//! demand, accepts inbound links and, for every link, runs a writer pump
//! draining the peer's bounded send queue and a reader dispatching inbound
//! frames. Message frames are routed locally; relation frames go to the
//! monitor. When the active link drops, the peer is removed and every
//! relation keyed on that node fires `noconnection`.
//!
//! Two nodes may connect to each other at the same moment. Both sides then
//! settle on the link opened by the node with the lower name. The other link
//! is never closed by either side: it stays open without a send queue until
//! the session for that node ends, because closing it could tear down the
//! far side before it has seen the preferred link.

use crate::atom::Atom;
use crate::core::Destination;
use crate::monitor::Monitor;
use crate::registrar::{NetEvent, Peer, Registrar};
use crate::transport::{DistMessage, Link, Transport, TransportError};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

pub(crate) struct NetKernel {
    local: Atom,
    registrar: Registrar,
    monitor: Monitor,
    transport: Arc<dyn Transport>,
    root: CancellationToken,
    send_queue_length: usize,
    connecting: Mutex<HashSet<Atom>>,
    /// Parent token of every link to a node; cancelled when the active link
    /// for that node is lost.
    sessions: Mutex<HashMap<Atom, CancellationToken>>,
    next_link_id: AtomicU64,
}

impl NetKernel {
    pub(crate) fn new(
        local: Atom,
        registrar: Registrar,
        monitor: Monitor,
        transport: Arc<dyn Transport>,
        root: CancellationToken,
        send_queue_length: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            local,
            registrar,
            monitor,
            transport,
            root,
            send_queue_length,
            connecting: Mutex::new(HashSet::new()),
            sessions: Mutex::new(HashMap::new()),
            next_link_id: AtomicU64::new(1),
        })
    }

    /// Runs until the node stops.
    pub(crate) async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<NetEvent>) {
        let mut accepting = true;
        loop {
            tokio::select! {
                biased;
                _ = self.root.cancelled() => break,
                event = events.recv() => match event {
                    Some(NetEvent::Connect(node)) => {
                        let kernel = self.clone();
                        tokio::spawn(async move {
                            if let Err(error) = kernel.connect(node).await {
                                debug!(local = %kernel.local, peer = %node, %error, "connect failed");
                            }
                        });
                    }
                    Some(NetEvent::Unreachable(node)) => self.monitor.node_down(node),
                    None => break,
                },
                link = self.transport.accept(), if accepting => match link {
                    Ok(link) => {
                        let kernel = self.clone();
                        tokio::spawn(async move { kernel.attach(link, false).await });
                    }
                    Err(TransportError::Shutdown) => {
                        debug!(local = %self.local, "transport stopped accepting");
                        accepting = false;
                    }
                    Err(error) => warn!(local = %self.local, %error, "accept failed"),
                },
            }
        }
        debug!(local = %self.local, "connection manager stopped");
    }

    /// Opens a link to `node` unless one exists or is being opened.
    ///
    /// Returns once the peer is registered, so traffic routed afterwards
    /// uses the new link.
    pub(crate) async fn connect(self: &Arc<Self>, node: Atom) -> Result<(), TransportError> {
        if node == self.local || self.registrar.peers().await.contains(&node) {
            return Ok(());
        }
        if !self.connecting.lock().insert(node) {
            return Ok(());
        }
        let result = match self.transport.connect(node).await {
            Ok(link) => {
                self.attach(link, true).await;
                Ok(())
            }
            Err(error) => Err(error),
        };
        self.connecting.lock().remove(&node);
        result
    }

    /// Offers the link to the registrar as the peer for its node and starts
    /// its pumps. `outbound` is true for links this node opened.
    async fn attach(self: &Arc<Self>, link: Link, outbound: bool) {
        let Link {
            remote,
            mut writer,
            mut reader,
        } = link;
        let id = self.next_link_id.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = mpsc::channel::<DistMessage>(self.send_queue_length.max(1));
        let preferred = opened_by_lower(self.local, remote, outbound);

        let token = self
            .sessions
            .lock()
            .entry(remote)
            .or_insert_with(|| self.root.child_token())
            .child_token();

        let peer = Peer {
            node: remote,
            id,
            preferred,
            tx,
        };
        if !self.registrar.register_peer(peer).await {
            debug!(local = %self.local, peer = %remote, id, "already linked, parking new link");
        }

        let writer_token = token.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = writer_token.cancelled() => break,
                    frame = rx.recv() => match frame {
                        Some(frame) => {
                            if let Err(error) = writer.send(frame).await {
                                debug!(peer = %remote, %error, "link write failed");
                                break;
                            }
                        }
                        None => {
                            // Another link carries the traffic; keep this
                            // one open until the session ends.
                            writer_token.cancelled().await;
                            break;
                        }
                    },
                }
            }
            writer_token.cancel();
        });

        let kernel = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    frame = reader.recv() => match frame {
                        Ok(frame) => kernel.dispatch(frame),
                        Err(error) => {
                            debug!(peer = %remote, %error, "link read failed");
                            break;
                        }
                    },
                }
            }
            token.cancel();
            if kernel.root.is_cancelled() {
                return;
            }
            if kernel.registrar.unregister_peer(remote, id).await {
                info!(local = %kernel.local, peer = %remote, "link lost");
                kernel.end_session(remote);
                kernel.monitor.node_down(remote);
            } else {
                trace!(local = %kernel.local, peer = %remote, id, "inactive link closed");
            }
        });
    }

    /// Closes every remaining link to `node`.
    fn end_session(&self, node: Atom) {
        if let Some(session) = self.sessions.lock().remove(&node) {
            session.cancel();
        }
    }

    fn dispatch(&self, frame: DistMessage) {
        trace!(local = %self.local, ?frame, "inbound frame");
        match frame {
            DistMessage::Send { to, envelope } => {
                let _ = self
                    .registrar
                    .route(envelope.from, Destination::Pid(to), envelope.message);
            }
            DistMessage::RegSend { to, envelope } => {
                let _ = self
                    .registrar
                    .route(envelope.from, Destination::Name(to), envelope.message);
            }
            other => self.monitor.remote(other),
        }
    }
}

/// Whether a link between `local` and `remote` was opened by the node whose
/// name sorts first. Both ends of one link agree on the answer.
fn opened_by_lower(local: Atom, remote: Atom, outbound: bool) -> bool {
    let opener = if outbound { local } else { remote };
    let other = if outbound { remote } else { local };
    opener.as_str() <= other.as_str()
}
