//! The node: composition root and public API.
//!
//! A [`Node`] owns the root cancellation token, the registrar, the monitor,
//! the connection manager and the application controller. Everything a
//! caller can do goes through it or through a process [`Context`].
//!
//! ```ignore
//! let node = Node::start("demo@localhost", NodeConfig::default(), NullTransport);
//! let echo = node.spawn::<Echo>(Some("echo"), ProcessOptions::new(), ()).await?;
//! let reply: String = node.call(echo.pid(), &"ping".to_string(), Duration::from_secs(1)).await?;
//! node.stop();
//! ```

mod dist;
mod rpc;

use crate::application::{AppController, Application, ApplicationError, ApplicationInfo, StartType};
use crate::atom::Atom;
use crate::config::{NodeConfig, ProcessOptions};
use crate::core::{Destination, ExitReason, Pid, RawTerm, Ref, RefGenerator, Term};
use crate::error::{NodeError, RegistrarError, RpcError, SendError, SpawnError};
use crate::gen_server::{self, CallError, GenServer};
use crate::monitor::Monitor;
use crate::process::{panic_message, Context, Message, Process, ProcessInfo};
use crate::registrar::Registrar;
use crate::transport::{Transport, TransportError};
use dist::NetKernel;
use rpc::{Rex, RexCall, RexReply, RpcFunction, RpcTable, REX};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// A running node.
///
/// Cloning is cheap; all clones refer to the same node.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

struct NodeInner {
    name: Atom,
    config: NodeConfig,
    root: CancellationToken,
    refs: RefGenerator,
    registrar: Registrar,
    monitor: Monitor,
    kernel: Arc<NetKernel>,
    apps: AppController,
    rpc: Arc<RpcTable>,
    rex: tokio::sync::Mutex<Option<Process>>,
}

impl Drop for NodeInner {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

impl Node {
    /// Starts a node named `name`.
    ///
    /// Must be called from within a tokio runtime; the node's control loops
    /// run as tasks on it.
    pub fn start(name: impl Into<Atom>, config: NodeConfig, transport: impl Transport) -> Self {
        let name = name.into();
        let root = CancellationToken::new();
        let (net_tx, net_rx) = mpsc::unbounded_channel();

        let registrar = Registrar::start(name, &config, root.clone(), net_tx);
        let monitor = Monitor::start(registrar.clone(), root.clone());
        let kernel = NetKernel::new(
            name,
            registrar.clone(),
            monitor.clone(),
            Arc::new(transport),
            root.clone(),
            config.send_queue_length,
        );
        tokio::spawn(kernel.clone().run(net_rx));

        info!(node = %name, creation = config.creation, "node started");
        Self {
            inner: Arc::new(NodeInner {
                name,
                refs: RefGenerator::new(name, config.creation),
                config,
                root,
                registrar,
                monitor,
                kernel,
                apps: AppController::new(),
                rpc: Arc::new(RpcTable::default()),
                rex: tokio::sync::Mutex::new(None),
            }),
        }
    }

    /// Returns the node name.
    pub fn name(&self) -> Atom {
        self.inner.name
    }

    /// Returns the node configuration.
    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    /// Creates a reference unique to this node incarnation.
    pub fn make_ref(&self) -> Ref {
        self.inner.refs.make_ref()
    }

    // Processes

    /// Starts a [`GenServer`] and waits for its `init` to complete.
    pub async fn spawn<G: GenServer>(
        &self,
        name: Option<&str>,
        options: ProcessOptions,
        arg: G::InitArg,
    ) -> Result<Process, SpawnError> {
        gen_server::start::<G>(self, name, options, arg).await
    }

    /// Starts a plain process running `body`.
    ///
    /// The body is dropped at its next suspension point once the process is
    /// asked to stop. Its output becomes the exit reason; `()` means normal.
    pub async fn spawn_fn<F, Fut, R>(
        &self,
        name: Option<&str>,
        options: ProcessOptions,
        body: F,
    ) -> Result<Process, SpawnError>
    where
        F: FnOnce(Context) -> Fut + Send + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: Into<ExitReason>,
    {
        self.spawn_process(name, options, None, move |ctx| async move {
            let process = ctx.process().clone();
            tokio::select! {
                biased;
                _ = process.token().cancelled() => process.requested_stop_reason(),
                reason = body(ctx) => reason.into(),
            }
        })
        .await
    }

    /// Registers a process and runs `body` as its task.
    ///
    /// When the task ends, however it ends, the process leaves the tables
    /// before its relations are notified and before waiters are released.
    pub(crate) async fn spawn_process<F, Fut>(
        &self,
        name: Option<&str>,
        options: ProcessOptions,
        link: Option<Pid>,
        body: F,
    ) -> Result<Process, SpawnError>
    where
        F: FnOnce(Context) -> Fut + Send + 'static,
        Fut: Future<Output = ExitReason> + Send + 'static,
    {
        let (process, mailbox) = self.inner.registrar.register_process(name, options).await?;
        let pid = process.pid();
        if let Some(parent) = link {
            self.inner.monitor.link(parent, pid);
        }
        debug!(%pid, name = ?process.name(), "process spawned");

        let ctx = Context::new(self.clone(), process.clone(), mailbox);
        let task = tokio::spawn(body(ctx));
        process.set_abort_handle(task.abort_handle());

        let registrar = self.inner.registrar.clone();
        let monitor = self.inner.monitor.clone();
        let handle = process.clone();
        tokio::spawn(async move {
            let reason = match task.await {
                Ok(reason) => reason,
                Err(e) if e.is_panic() => {
                    let msg = panic_message(&*e.into_panic());
                    error!(%pid, panic = %msg, "process panicked");
                    ExitReason::panic(msg)
                }
                Err(_) => ExitReason::Killed,
            };
            registrar.unregister_process(pid).await;
            monitor.process_terminated(pid, reason.clone());
            debug!(%pid, %reason, "process exited");
            handle.mark_exited(reason);
        });

        Ok(process)
    }

    /// Registers `name` for `pid`. The first registration of a name wins:
    /// if it is bound to another process that binding is kept and
    /// [`RegistrarError::NameTaken`] is returned.
    pub async fn register(&self, name: &str, pid: Pid) -> Result<(), RegistrarError> {
        self.inner.registrar.register_name(name, pid).await
    }

    /// Removes a name registration.
    pub fn unregister(&self, name: &str) {
        self.inner.registrar.unregister_name(name);
    }

    /// Resolves a registered name.
    pub async fn whereis(&self, name: &str) -> Option<Pid> {
        self.inner.registrar.whereis(name).await
    }

    /// Returns the handle of a live local process.
    pub async fn process(&self, pid: Pid) -> Option<Process> {
        self.inner.registrar.process(pid).await
    }

    /// Returns the handle of the process registered as `name`.
    pub async fn process_by_name(&self, name: &str) -> Option<Process> {
        self.inner.registrar.process_by_name(name).await
    }

    /// Lists every live local process, ordered by pid.
    pub async fn processes(&self) -> Vec<Process> {
        self.inner.registrar.processes().await
    }

    /// Returns `true` while `pid` is in the process table.
    pub async fn is_process_alive(&self, pid: Pid) -> bool {
        self.process(pid).await.is_some()
    }

    /// Describes a live local process.
    pub async fn process_info(&self, pid: Pid) -> Result<ProcessInfo, RegistrarError> {
        let process = self
            .process(pid)
            .await
            .ok_or(RegistrarError::NoProcess(pid))?;
        let registered_names = self.inner.registrar.names_of(pid).await;
        let relations = self.inner.monitor.relations(pid).await;
        Ok(ProcessInfo {
            pid,
            registered_names,
            mailbox_len: process.mailbox_len(),
            links: relations.links,
            monitors: relations.monitors,
            monitored_by: relations.monitored_by,
            trap_exit: process.is_trapping_exits(),
            env: process.list_env(),
        })
    }

    /// Terminates a local process immediately; no terminate callback runs.
    pub async fn kill(&self, pid: Pid) -> Result<(), RegistrarError> {
        let process = self
            .process(pid)
            .await
            .ok_or(RegistrarError::NoProcess(pid))?;
        process.kill();
        Ok(())
    }

    /// Asks a local process to terminate with `reason`.
    pub async fn exit(&self, pid: Pid, reason: ExitReason) -> Result<(), RegistrarError> {
        let process = self
            .process(pid)
            .await
            .ok_or(RegistrarError::NoProcess(pid))?;
        if reason.is_killed() {
            process.kill();
        } else {
            process.stop(reason);
        }
        Ok(())
    }

    // Messaging

    /// Sends `msg` to `to` with no sender.
    pub fn send<M: Term>(&self, to: impl Into<Destination>, msg: &M) -> Result<(), SendError> {
        self.send_as(None, to, msg)
    }

    /// Sends `msg` to `to` on behalf of `from`.
    pub fn send_as<M: Term>(
        &self,
        from: Option<Pid>,
        to: impl Into<Destination>,
        msg: &M,
    ) -> Result<(), SendError> {
        self.send_raw_as(from, to.into(), RawTerm::from_term(msg)?)
    }

    pub(crate) fn send_raw_as(
        &self,
        from: Option<Pid>,
        to: Destination,
        msg: RawTerm,
    ) -> Result<(), SendError> {
        self.route(from, to, Message::Info(msg))
    }

    /// Casts `msg` to the server at `to`.
    pub fn cast<M: Term>(&self, to: impl Into<Destination>, msg: &M) -> Result<(), SendError> {
        self.cast_as(None, to, msg)
    }

    pub(crate) fn cast_as<M: Term>(
        &self,
        from: Option<Pid>,
        to: impl Into<Destination>,
        msg: &M,
    ) -> Result<(), SendError> {
        self.route(from, to.into(), Message::Cast(RawTerm::from_term(msg)?))
    }

    /// Calls the server at `to` from outside any process.
    ///
    /// A temporary caller process is registered for the duration of the call.
    pub async fn call<Req: Term, Rep: Term>(
        &self,
        to: impl Into<Destination>,
        request: &Req,
        timeout: Duration,
    ) -> Result<Rep, CallError> {
        let request = RawTerm::from_term(request).map_err(|e| CallError::Encode(e.to_string()))?;
        let (caller, _mailbox) = self
            .inner
            .registrar
            .register_process(None, ProcessOptions::new().mailbox_size(1))
            .await
            .map_err(|_| CallError::NodeStopped)?;

        let result = gen_server::call_raw(self, &caller, to.into(), request, timeout).await;

        self.inner.registrar.unregister_process(caller.pid()).await;
        caller.mark_exited(ExitReason::Normal);
        result?
            .try_decode()
            .map_err(|e| CallError::Decode(e.to_string()))
    }

    pub(crate) fn route(
        &self,
        from: Option<Pid>,
        to: Destination,
        message: Message,
    ) -> Result<(), SendError> {
        self.inner
            .registrar
            .route(from, to, message)
            .map_err(|_| SendError::NodeStopped)
    }

    /// Returns `true` if `dest` is resolved by this node's tables.
    pub(crate) fn is_local(&self, dest: &Destination) -> bool {
        match dest {
            Destination::Pid(pid) => pid.is_on(self.name()),
            Destination::Name(_) => true,
            Destination::Remote { node, .. } => *node == self.name(),
        }
    }

    /// Resolves a local destination to its process.
    pub(crate) async fn lookup(&self, dest: &Destination) -> Option<Process> {
        if !self.is_local(dest) {
            return None;
        }
        match dest {
            Destination::Pid(pid) => self.process(*pid).await,
            Destination::Name(name) | Destination::Remote { name, .. } => {
                self.process_by_name(name).await
            }
        }
    }

    // Relations

    /// Links local process `a` with `b`.
    pub fn link(&self, a: Pid, b: Pid) {
        self.inner.monitor.link(a, b);
    }

    /// Removes the link between `a` and `b`.
    pub fn unlink(&self, a: Pid, b: Pid) {
        self.inner.monitor.unlink(a, b);
    }

    /// Makes local process `watcher` monitor `watched`.
    ///
    /// If `watched` is already gone the `noproc` notification is delivered
    /// right away.
    pub fn monitor(&self, watcher: Pid, watched: Pid) -> Ref {
        let reference = self.make_ref();
        self.inner.monitor.monitor(watcher, watched, reference);
        reference
    }

    /// Cancels a monitor; no notification for it is delivered afterwards.
    pub fn demonitor(&self, reference: Ref) {
        self.inner.monitor.demonitor(reference);
    }

    /// Makes local process `watcher` receive a [`Message::NodeDown`] when
    /// `node` goes down.
    ///
    /// Every call with `enable` adds one instance, each delivering one
    /// notification; `enable` false removes all of the watcher's instances
    /// for `node`. If `node` cannot be reached the notification arrives
    /// right away. Monitoring this node itself does nothing.
    pub async fn monitor_node(&self, watcher: Pid, node: impl Into<Atom>, enable: bool) {
        let node = node.into();
        if node == self.name() {
            return;
        }
        self.inner.monitor.monitor_node(watcher, node, enable);
        if enable {
            if let Err(error) = self.inner.kernel.connect(node).await {
                debug!(%watcher, peer = %node, %error, "monitored node is unreachable");
                self.inner.monitor.node_down(node);
            }
        }
    }

    // Distribution

    /// Opens a link to `node` and registers it as a peer.
    pub async fn connect(&self, node: impl Into<Atom>) -> Result<(), TransportError> {
        self.inner.kernel.connect(node.into()).await
    }

    /// Lists connected nodes.
    pub async fn peers(&self) -> Vec<Atom> {
        let mut peers = self.inner.registrar.peers().await;
        peers.sort();
        peers
    }

    // Remote procedure calls

    /// Serves `fun` to other nodes as `module:function`, replacing any
    /// earlier function under that name.
    ///
    /// The first call starts this node's `rex` server.
    pub async fn provide_rpc<A, R, F>(
        &self,
        module: &str,
        function: &str,
        fun: F,
    ) -> Result<(), RpcError>
    where
        A: Term,
        R: Term,
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        self.ensure_rex().await?;
        let fun: RpcFunction = Arc::new(move |args: RawTerm| -> Result<RawTerm, RpcError> {
            let args = args
                .try_decode::<A>()
                .map_err(|e| RpcError::BadArgument(e.to_string()))?;
            RawTerm::from_term(&fun(args)).map_err(|e| RpcError::Failed(e.to_string()))
        });
        if self.inner.rpc.provide(module, function, fun) {
            debug!(node = %self.name(), module, function, "rpc function replaced");
        } else {
            debug!(node = %self.name(), module, function, "rpc function provided");
        }
        Ok(())
    }

    /// Stops serving `module:function`.
    pub fn revoke_rpc(&self, module: &str, function: &str) -> Result<(), RpcError> {
        if self.inner.rpc.revoke(module, function) {
            debug!(node = %self.name(), module, function, "rpc function revoked");
            Ok(())
        } else {
            Err(RpcError::Undefined {
                module: module.to_string(),
                function: function.to_string(),
            })
        }
    }

    /// Applies `module:function` to `args` on `node` and returns its result.
    ///
    /// `node` may be this node. A node without a `rex` server never answers,
    /// so the call ends in a timeout.
    pub async fn rpc_call<A: Term, R: Term>(
        &self,
        node: impl Into<Atom>,
        module: &str,
        function: &str,
        args: &A,
        timeout: Duration,
    ) -> Result<R, RpcError> {
        let args = RawTerm::from_term(args).map_err(|e| CallError::Encode(e.to_string()))?;
        let request = RexCall::Apply {
            module: module.to_string(),
            function: function.to_string(),
            args,
        };
        let reply: RexReply = self
            .call(Destination::remote(REX, node), &request, timeout)
            .await?;
        reply
            .into_value(module, function)?
            .try_decode()
            .map_err(|e| RpcError::Call(CallError::Decode(e.to_string())))
    }

    /// Lists the functions `node` serves, sorted by module then function.
    pub async fn rpc_functions(
        &self,
        node: impl Into<Atom>,
        timeout: Duration,
    ) -> Result<Vec<(String, String)>, RpcError> {
        let reply: RexReply = self
            .call(Destination::remote(REX, node), &RexCall::Functions, timeout)
            .await?;
        match reply {
            RexReply::Functions(names) => Ok(names),
            _ => Err(RpcError::Failed("unexpected reply".to_string())),
        }
    }

    async fn ensure_rex(&self) -> Result<(), RpcError> {
        let mut rex = self.inner.rex.lock().await;
        if rex.as_ref().is_some_and(|p| p.is_alive()) {
            return Ok(());
        }
        let process = self
            .spawn::<Rex>(Some(REX), ProcessOptions::new(), self.inner.rpc.clone())
            .await?;
        *rex = Some(process);
        Ok(())
    }

    // Applications

    /// Loads an application and, first, everything it includes.
    pub fn application_load(&self, app: impl Application) -> Result<(), ApplicationError> {
        self.inner.apps.load(Arc::new(app)).map(|_| ())
    }

    /// Unloads a stopped application.
    pub async fn application_unload(&self, name: &str) -> Result<(), ApplicationError> {
        self.inner.apps.unload(name).await
    }

    /// Starts a loaded application as temporary.
    pub async fn application_start(&self, name: &str) -> Result<Process, ApplicationError> {
        self.inner.apps.start(self, name, StartType::Temporary).await
    }

    /// Starts a loaded application as permanent: its exit stops the node.
    pub async fn application_start_permanent(
        &self,
        name: &str,
    ) -> Result<Process, ApplicationError> {
        self.inner.apps.start(self, name, StartType::Permanent).await
    }

    /// Starts a loaded application as transient: an abnormal exit stops the
    /// node.
    pub async fn application_start_transient(
        &self,
        name: &str,
    ) -> Result<Process, ApplicationError> {
        self.inner.apps.start(self, name, StartType::Transient).await
    }

    /// Stops a running application and waits for its root to exit.
    pub async fn application_stop(&self, name: &str) -> Result<(), ApplicationError> {
        self.inner.apps.stop(name).await
    }

    /// Lists loaded applications.
    pub fn loaded_applications(&self) -> Vec<ApplicationInfo> {
        self.inner.apps.loaded()
    }

    /// Lists running applications.
    pub fn which_applications(&self) -> Vec<ApplicationInfo> {
        self.inner.apps.running()
    }

    /// Describes a loaded application.
    pub fn application_info(&self, name: &str) -> Result<ApplicationInfo, ApplicationError> {
        self.inner.apps.info(name)
    }

    pub(crate) fn apps(&self) -> &AppController {
        &self.inner.apps
    }

    // Lifecycle

    /// Returns `true` until the node is stopped.
    pub fn is_alive(&self) -> bool {
        !self.inner.root.is_cancelled()
    }

    /// Stops the node. Every process is asked to exit normally.
    pub fn stop(&self) {
        if !self.inner.root.is_cancelled() {
            info!(node = %self.name(), "node stopping");
            self.inner.root.cancel();
        }
    }

    /// Waits until the node is stopped.
    pub async fn wait(&self) {
        self.inner.root.cancelled().await
    }

    /// Waits until the node is stopped, giving up after `timeout`.
    pub async fn wait_timeout(&self, timeout: Duration) -> Result<(), NodeError> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| NodeError::Timeout)
    }

    pub(crate) fn root_token(&self) -> &CancellationToken {
        &self.inner.root
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.inner.name)
            .field("alive", &self.is_alive())
            .finish()
    }
}
