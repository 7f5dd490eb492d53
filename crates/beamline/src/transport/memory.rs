//! An in-process transport.
//!
//! A [`MemoryNetwork`] is a switchboard shared by several nodes living in the
//! same OS process. Each node binds a [`MemoryTransport`] under its name;
//! connecting to a bound name hands the other side a fresh link. Frames are
//! postcard-encoded on the way in and decoded on the way out, so anything
//! that crosses a memory link would also survive a real wire.

use super::{DistMessage, Link, LinkReader, LinkWriter, Transport, TransportError};
use crate::atom::Atom;
use crate::core::Term;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A switchboard connecting [`MemoryTransport`]s by node name.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<NetworkInner>,
}

#[derive(Default)]
struct NetworkInner {
    listeners: DashMap<Atom, mpsc::UnboundedSender<Link>>,
    connections: Mutex<HashMap<(Atom, Atom), Vec<CancellationToken>>>,
}

impl MemoryNetwork {
    /// Creates an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `name` on the network, replacing any previous binding.
    pub fn bind(&self, name: impl Into<Atom>) -> MemoryTransport {
        let local = name.into();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.listeners.insert(local, tx);
        MemoryTransport {
            network: self.clone(),
            local,
            incoming: tokio::sync::Mutex::new(rx),
        }
    }

    /// Removes `name` so that new connections to it fail.
    pub fn unbind(&self, name: impl Into<Atom>) {
        self.inner.listeners.remove(&name.into());
    }

    /// Closes every link between `a` and `b`.
    ///
    /// Both sides observe [`TransportError::Closed`] on their next receive.
    pub fn sever(&self, a: impl Into<Atom>, b: impl Into<Atom>) {
        let key = ordered(a.into(), b.into());
        let tokens = self.inner.connections.lock().remove(&key).unwrap_or_default();
        for token in tokens {
            token.cancel();
        }
    }

    fn open(&self, from: Atom, to: Atom) -> Result<Link, TransportError> {
        let listener = self
            .inner
            .listeners
            .get(&to)
            .map(|l| l.value().clone())
            .ok_or(TransportError::Unreachable(to))?;

        let token = CancellationToken::new();
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();

        let accepted = Link {
            remote: from,
            writer: Box::new(MemoryWriter {
                tx: b_tx,
                token: token.clone(),
            }),
            reader: Box::new(MemoryReader {
                rx: a_rx,
                token: token.clone(),
            }),
        };
        listener
            .send(accepted)
            .map_err(|_| TransportError::Unreachable(to))?;

        self.inner
            .connections
            .lock()
            .entry(ordered(from, to))
            .or_default()
            .push(token.clone());

        Ok(Link {
            remote: to,
            writer: Box::new(MemoryWriter {
                tx: a_tx,
                token: token.clone(),
            }),
            reader: Box::new(MemoryReader { rx: b_rx, token }),
        })
    }
}

fn ordered(a: Atom, b: Atom) -> (Atom, Atom) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// One node's endpoint on a [`MemoryNetwork`].
pub struct MemoryTransport {
    network: MemoryNetwork,
    local: Atom,
    incoming: tokio::sync::Mutex<mpsc::UnboundedReceiver<Link>>,
}

impl MemoryTransport {
    /// The name this endpoint is bound under.
    pub fn local(&self) -> Atom {
        self.local
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, remote: Atom) -> Result<Link, TransportError> {
        self.network.open(self.local, remote)
    }

    async fn accept(&self) -> Result<Link, TransportError> {
        self.incoming
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::Shutdown)
    }
}

struct MemoryWriter {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    token: CancellationToken,
}

#[async_trait]
impl LinkWriter for MemoryWriter {
    async fn send(&mut self, message: DistMessage) -> Result<(), TransportError> {
        if self.token.is_cancelled() {
            return Err(TransportError::Closed);
        }
        let frame = message
            .encode()
            .map_err(|e| TransportError::Frame(e.to_string()))?;
        self.tx.send(frame).map_err(|_| TransportError::Closed)
    }
}

struct MemoryReader {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    token: CancellationToken,
}

#[async_trait]
impl LinkReader for MemoryReader {
    async fn recv(&mut self) -> Result<DistMessage, TransportError> {
        let frame = tokio::select! {
            _ = self.token.cancelled() => return Err(TransportError::Closed),
            frame = self.rx.recv() => frame.ok_or(TransportError::Closed)?,
        };
        DistMessage::decode(&frame).map_err(|e| TransportError::Frame(e.to_string()))
    }
}
