//! The shared process handle.
//!
//! A [`Process`] is what the registrar stores in its table and what callers
//! get back from `spawn`. It carries the process identity, the sending side
//! of its mailbox, its cancellation token and lifecycle state. Behavior state
//! is never reachable through it.

use super::mailbox::{DeliveryError, Envelope, MailboxSender, Message};
use crate::config::EnvValue;
use crate::core::{ExitReason, Pid, RawTerm, Ref};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

/// A handle to a running (or finished) process.
///
/// Cloning is cheap; all clones observe the same process.
#[derive(Clone)]
pub struct Process {
    inner: Arc<ProcessInner>,
}

struct ProcessInner {
    pid: Pid,
    name: Option<String>,
    mailbox: MailboxSender,
    token: CancellationToken,
    alive: AtomicBool,
    trap_exit: AtomicBool,
    stop_reason: Mutex<Option<ExitReason>>,
    exited: watch::Sender<Option<ExitReason>>,
    pending_calls: Mutex<HashMap<Ref, oneshot::Sender<RawTerm>>>,
    env: RwLock<HashMap<String, EnvValue>>,
    abort: Mutex<Option<AbortHandle>>,
}

impl Process {
    pub(crate) fn new(
        pid: Pid,
        name: Option<String>,
        mailbox: MailboxSender,
        token: CancellationToken,
        env: HashMap<String, EnvValue>,
        trap_exit: bool,
    ) -> Self {
        let (exited, _) = watch::channel(None);
        Self {
            inner: Arc::new(ProcessInner {
                pid,
                name,
                mailbox,
                token,
                alive: AtomicBool::new(true),
                trap_exit: AtomicBool::new(trap_exit),
                stop_reason: Mutex::new(None),
                exited,
                pending_calls: Mutex::new(HashMap::new()),
                env: RwLock::new(env),
                abort: Mutex::new(None),
            }),
        }
    }

    /// Returns the process identifier.
    pub fn pid(&self) -> Pid {
        self.inner.pid
    }

    /// Returns the name the process was spawned with.
    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// Returns `true` until the process has left the process table.
    pub fn is_alive(&self) -> bool {
        self.inner.alive.load(Ordering::Acquire)
    }

    /// Requests termination with `reason`.
    ///
    /// The first reason wins; later requests only re-cancel. The behavior
    /// observes the cancellation at its next suspension point and runs its
    /// terminate callback.
    pub fn stop(&self, reason: ExitReason) {
        {
            let mut slot = self.inner.stop_reason.lock();
            if slot.is_none() {
                *slot = Some(reason);
            }
        }
        self.inner.token.cancel();
    }

    /// Terminates the process immediately.
    ///
    /// The worker task is aborted, so no terminate callback runs and the exit
    /// reason is [`ExitReason::Killed`].
    pub fn kill(&self) {
        {
            let mut slot = self.inner.stop_reason.lock();
            *slot = Some(ExitReason::Killed);
        }
        if let Some(abort) = self.inner.abort.lock().as_ref() {
            abort.abort();
        }
        self.inner.token.cancel();
    }

    /// Waits until the process has exited and returns its exit reason.
    pub async fn wait(&self) -> ExitReason {
        let mut rx = self.inner.exited.subscribe();
        loop {
            if let Some(reason) = rx.borrow_and_update().clone() {
                return reason;
            }
            if rx.changed().await.is_err() {
                return ExitReason::Killed;
            }
        }
    }

    /// Like [`Process::wait`], giving up after `duration`.
    pub async fn wait_timeout(&self, duration: Duration) -> Option<ExitReason> {
        tokio::time::timeout(duration, self.wait()).await.ok()
    }

    /// Returns whether exit signals are delivered as messages.
    pub fn is_trapping_exits(&self) -> bool {
        self.inner.trap_exit.load(Ordering::Acquire)
    }

    /// Sets the trap-exit flag, returning the previous value.
    pub fn set_trap_exit(&self, trap: bool) -> bool {
        self.inner.trap_exit.swap(trap, Ordering::AcqRel)
    }

    /// Sets an environment variable.
    pub fn set_env(&self, key: impl Into<String>, value: impl Into<EnvValue>) {
        self.inner.env.write().insert(key.into(), value.into());
    }

    /// Reads an environment variable.
    pub fn get_env(&self, key: &str) -> Option<EnvValue> {
        self.inner.env.read().get(key).cloned()
    }

    /// Returns a copy of the whole environment.
    pub fn list_env(&self) -> HashMap<String, EnvValue> {
        self.inner.env.read().clone()
    }

    /// Number of envelopes waiting in the mailbox.
    pub fn mailbox_len(&self) -> usize {
        self.inner.mailbox.queued()
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    pub(crate) fn requested_stop_reason(&self) -> ExitReason {
        self.inner
            .stop_reason
            .lock()
            .clone()
            .unwrap_or(ExitReason::Normal)
    }

    pub(crate) fn set_abort_handle(&self, handle: AbortHandle) {
        *self.inner.abort.lock() = Some(handle);
    }

    /// Records the exit, releasing every waiter and every pending call.
    pub(crate) fn mark_exited(&self, reason: ExitReason) {
        self.inner.alive.store(false, Ordering::Release);
        self.inner.pending_calls.lock().clear();
        self.inner.token.cancel();
        self.inner.exited.send_replace(Some(reason));
    }

    /// Registers interest in the reply to call `reference`.
    pub(crate) fn expect_reply(&self, reference: Ref) -> oneshot::Receiver<RawTerm> {
        let (tx, rx) = oneshot::channel();
        self.inner.pending_calls.lock().insert(reference, tx);
        rx
    }

    /// Abandons a pending call; a late reply becomes an ordinary message.
    pub(crate) fn forget_reply(&self, reference: &Ref) {
        self.inner.pending_calls.lock().remove(reference);
    }

    /// Hands an envelope to this process.
    ///
    /// A reply to a call this process is waiting on bypasses the mailbox;
    /// everything else, including late replies, is queued in order.
    pub(crate) fn deliver(&self, envelope: Envelope) -> Result<(), DeliveryError> {
        let envelope = match envelope.message {
            Message::Reply { reference, reply } => {
                let waiter = self.inner.pending_calls.lock().remove(&reference);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(reply);
                        return Ok(());
                    }
                    None => Envelope::new(envelope.from, Message::Reply { reference, reply }),
                }
            }
            _ => envelope,
        };
        self.inner.mailbox.try_send(envelope)
    }
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.inner.pid)
            .field("name", &self.inner.name)
            .field("alive", &self.is_alive())
            .finish_non_exhaustive()
    }
}

/// A snapshot of a process, as returned by `process_info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    /// The process identifier.
    pub pid: Pid,
    /// Every name currently registered to the process.
    pub registered_names: Vec<String>,
    /// Envelopes waiting in the mailbox.
    pub mailbox_len: usize,
    /// Processes linked to this one.
    pub links: Vec<Pid>,
    /// Processes this one monitors.
    pub monitors: Vec<Pid>,
    /// Processes monitoring this one.
    pub monitored_by: Vec<Pid>,
    /// Whether exit signals arrive as messages.
    pub trap_exit: bool,
    /// The process environment.
    pub env: HashMap<String, EnvValue>,
}
