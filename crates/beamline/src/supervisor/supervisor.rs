//! Supervisor implementation.
//!
//! A supervisor is a GenServer that traps exits. Its children are started in
//! list order during `init`; every child exit arrives as an exit message and
//! is handled according to the strategy, the child's restart type and the
//! restart intensity. Runtime requests are plain calls.

use super::error::{ChildError, SupervisorError};
use super::types::{
    ChildCounts, ChildId, ChildInfo, ChildSpec, ChildType, RestartType, ShutdownType,
    StartChildError, StartContext, Strategy, SupervisorFlags,
};
use crate::config::ProcessOptions;
use crate::core::{ExitReason, Pid, RawTerm, Term};
use crate::error::SpawnError;
use crate::gen_server::{self, CallError, CallResult, CastResult, From, GenServer, Info, InfoResult, InitResult, ServerRef};
use crate::node::Node;
use crate::process::{Context, Process};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::marker::PhantomData;
use std::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// The Supervisor trait for implementing supervision trees.
///
/// # Example
///
/// ```ignore
/// struct Tree;
///
/// impl Supervisor for Tree {
///     type InitArg = ();
///
///     fn init(_arg: ()) -> SupervisorInit {
///         SupervisorInit::new(
///             SupervisorFlags::new(Strategy::RestForOne),
///             vec![
///                 ChildSpec::named::<Store>("store", "store", ()),
///                 ChildSpec::named::<Api>("api", "api", ()),
///             ],
///         )
///     }
/// }
/// ```
pub trait Supervisor: Sized + Send + Sync + 'static {
    /// The type of argument passed to init.
    type InitArg: Send + 'static;

    /// Returns the flags and the ordered child specifications.
    fn init(arg: Self::InitArg) -> SupervisorInit;
}

/// Result of supervisor initialization.
#[derive(Debug, Clone)]
pub struct SupervisorInit {
    /// Supervisor configuration flags.
    pub flags: SupervisorFlags,
    /// Child specifications, in start order. A simple-one-for-one supervisor
    /// takes exactly one: the template.
    pub children: Vec<ChildSpec>,
}

impl SupervisorInit {
    /// Creates a new supervisor init result.
    pub fn new(flags: SupervisorFlags, children: Vec<ChildSpec>) -> Self {
        Self { flags, children }
    }
}

/// A supervisor whose init argument already is its [`SupervisorInit`].
pub(crate) struct SpecSupervisor;

impl Supervisor for SpecSupervisor {
    type InitArg = SupervisorInit;

    fn init(arg: SupervisorInit) -> SupervisorInit {
        arg
    }
}

/// Starts a supervisor without linking it to anyone.
///
/// Returns once every child has been started. If a child fails to start the
/// children already running are shut down and the error is returned.
pub async fn start<S: Supervisor>(
    node: &Node,
    name: Option<&str>,
    arg: S::InitArg,
) -> Result<Process, SpawnError> {
    start_supervisor::<S>(node, name, ProcessOptions::new(), arg, None).await
}

/// Starts a supervisor linked to the calling process.
///
/// An exit signal from the caller shuts the supervisor down.
pub async fn start_link<S: Supervisor>(
    ctx: &Context,
    name: Option<&str>,
    arg: S::InitArg,
) -> Result<Process, SpawnError> {
    let options = ProcessOptions::new().with_env(ctx.process().list_env());
    start_supervisor::<S>(ctx.node(), name, options, arg, Some(ctx.pid())).await
}

pub(crate) async fn start_supervisor<S: Supervisor>(
    node: &Node,
    name: Option<&str>,
    options: ProcessOptions,
    arg: S::InitArg,
    parent: Option<Pid>,
) -> Result<Process, SpawnError> {
    let args = SupervisorArgs::<S> { arg, parent };
    gen_server::start_with::<SupervisorServer<S>>(node, name, options.trap_exit(true), args, parent)
        .await
}

/// Lists the supervisor's children in start order.
pub async fn which_children(
    node: &Node,
    sup: impl Into<ServerRef>,
) -> Result<Vec<ChildInfo>, SupervisorError> {
    match request(node, sup, SupervisorCall::WhichChildren).await? {
        SupervisorReply::Children(children) => Ok(children),
        other => Err(unexpected(other)),
    }
}

/// Counts the supervisor's children.
pub async fn count_children(
    node: &Node,
    sup: impl Into<ServerRef>,
) -> Result<ChildCounts, SupervisorError> {
    match request(node, sup, SupervisorCall::CountChildren).await? {
        SupervisorReply::Counts(counts) => Ok(counts),
        other => Err(unexpected(other)),
    }
}

/// Starts a new instance of a simple-one-for-one supervisor's template.
///
/// `args` is handed to the template's start function. Returns `None` if the
/// child's init ignored the start.
pub async fn start_child<A: Term>(
    node: &Node,
    sup: impl Into<ServerRef>,
    args: &A,
) -> Result<Option<Pid>, SupervisorError> {
    let args = RawTerm::from_term(args).map_err(|e| CallError::Encode(e.to_string()))?;
    match request(node, sup, SupervisorCall::StartChild(args)).await? {
        SupervisorReply::Started(result) => Ok(result?),
        other => Err(unexpected(other)),
    }
}

/// Terminates a child, keeping its spec unless it is temporary or dynamic.
pub async fn terminate_child(
    node: &Node,
    sup: impl Into<ServerRef>,
    child: impl Into<ChildId>,
) -> Result<(), SupervisorError> {
    match request(node, sup, SupervisorCall::TerminateChild(child.into())).await? {
        SupervisorReply::Done(result) => Ok(result?),
        other => Err(unexpected(other)),
    }
}

/// Starts a terminated child again from its spec.
pub async fn restart_child(
    node: &Node,
    sup: impl Into<ServerRef>,
    id: &str,
) -> Result<Option<Pid>, SupervisorError> {
    match request(node, sup, SupervisorCall::RestartChild(id.to_string())).await? {
        SupervisorReply::Started(result) => Ok(result?),
        other => Err(unexpected(other)),
    }
}

/// Removes the spec of a terminated child.
pub async fn delete_child(
    node: &Node,
    sup: impl Into<ServerRef>,
    id: &str,
) -> Result<(), SupervisorError> {
    match request(node, sup, SupervisorCall::DeleteChild(id.to_string())).await? {
        SupervisorReply::Done(result) => Ok(result?),
        other => Err(unexpected(other)),
    }
}

async fn request(
    node: &Node,
    sup: impl Into<ServerRef>,
    call: SupervisorCall,
) -> Result<SupervisorReply, SupervisorError> {
    // Terminating a child can take up to its shutdown timeout.
    let timeout = node.config().call_timeout + node.config().shutdown_timeout;
    Ok(node.call(sup, &call, timeout).await?)
}

fn unexpected(reply: SupervisorReply) -> SupervisorError {
    SupervisorError::Call(CallError::Decode(format!("unexpected reply: {:?}", reply)))
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) enum SupervisorCall {
    WhichChildren,
    CountChildren,
    StartChild(RawTerm),
    TerminateChild(ChildId),
    RestartChild(String),
    DeleteChild(String),
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) enum SupervisorReply {
    Children(Vec<ChildInfo>),
    Counts(ChildCounts),
    Started(Result<Option<Pid>, ChildError>),
    Done(Result<(), ChildError>),
}

pub(crate) struct SupervisorArgs<S: Supervisor> {
    arg: S::InitArg,
    parent: Option<Pid>,
}

pub(crate) struct SupervisorServer<S>(PhantomData<fn() -> S>);

struct Child {
    spec: ChildSpec,
    process: Option<Process>,
    args: Option<RawTerm>,
}

impl Child {
    fn new(spec: ChildSpec, args: Option<RawTerm>) -> Self {
        Self {
            spec,
            process: None,
            args,
        }
    }

    fn pid(&self) -> Option<Pid> {
        self.process.as_ref().map(Process::pid)
    }

    fn info(&self) -> ChildInfo {
        ChildInfo {
            id: self.spec.id.clone(),
            pid: self.pid(),
            child_type: self.spec.child_type,
            restart: self.spec.restart,
        }
    }
}

pub(crate) struct SupervisorState {
    flags: SupervisorFlags,
    parent: Option<Pid>,
    children: Vec<Child>,
    template: Option<ChildSpec>,
    restarts: VecDeque<Instant>,
}

#[async_trait]
impl<S: Supervisor> GenServer for SupervisorServer<S> {
    type State = SupervisorState;
    type InitArg = SupervisorArgs<S>;
    type Call = SupervisorCall;
    type Cast = ();
    type Reply = SupervisorReply;

    async fn init(ctx: &mut Context, args: SupervisorArgs<S>) -> InitResult<SupervisorState> {
        ctx.set_trap_exit(true);
        let SupervisorInit { flags, children } = S::init(args.arg);
        let mut state = SupervisorState {
            flags,
            parent: args.parent,
            children: Vec::new(),
            template: None,
            restarts: VecDeque::new(),
        };

        if flags.strategy == Strategy::SimpleOneForOne {
            let mut children = children.into_iter();
            return match (children.next(), children.next()) {
                (Some(template), None) => {
                    debug!(pid = %ctx.pid(), template = %template.id, "supervisor started");
                    state.template = Some(template);
                    InitResult::ok(state)
                }
                _ => InitResult::stop(ExitReason::error(
                    "simple_one_for_one needs exactly one child spec",
                )),
            };
        }

        let mut ids = HashSet::new();
        if let Some(dup) = children.iter().find(|spec| !ids.insert(spec.id.as_str())) {
            return InitResult::stop(ExitReason::error(format!("duplicate child id '{}'", dup.id)));
        }

        for spec in children {
            let mut child = Child::new(spec, None);
            if let Err(e) = launch_child(ctx, &mut child).await {
                error!(pid = %ctx.pid(), child = %child.spec.id, error = %e, "child failed to start");
                state.shutdown_all(ctx).await;
                return InitResult::stop(ExitReason::error(format!(
                    "child '{}' failed to start: {}",
                    child.spec.id, e
                )));
            }
            state.children.push(child);
        }

        info!(pid = %ctx.pid(), strategy = ?flags.strategy, children = state.children.len(), "supervisor started");
        InitResult::ok(state)
    }

    async fn handle_call(
        ctx: &mut Context,
        request: SupervisorCall,
        _from: From,
        state: &mut SupervisorState,
    ) -> CallResult<SupervisorReply> {
        let reply = match request {
            SupervisorCall::WhichChildren => {
                SupervisorReply::Children(state.children.iter().map(Child::info).collect())
            }
            SupervisorCall::CountChildren => SupervisorReply::Counts(state.counts()),
            SupervisorCall::StartChild(args) => {
                SupervisorReply::Started(state.start_dynamic(ctx, args).await)
            }
            SupervisorCall::TerminateChild(id) => {
                SupervisorReply::Done(state.terminate_child(ctx, id).await)
            }
            SupervisorCall::RestartChild(id) => {
                SupervisorReply::Started(state.restart_child(ctx, &id).await)
            }
            SupervisorCall::DeleteChild(id) => SupervisorReply::Done(state.delete_child(&id)),
        };
        CallResult::reply(reply)
    }

    async fn handle_cast(_ctx: &mut Context, _msg: (), _state: &mut SupervisorState) -> CastResult {
        CastResult::NoReply
    }

    async fn handle_info(ctx: &mut Context, info: Info, state: &mut SupervisorState) -> InfoResult {
        match info {
            Info::Exit { from, reason } if state.parent == Some(from) => {
                debug!(pid = %ctx.pid(), %reason, "parent exited, shutting down");
                InfoResult::stop(reason)
            }
            Info::Exit { from, reason } => match state.child_exited(ctx, from, reason).await {
                Ok(()) => InfoResult::NoReply,
                Err(reason) => InfoResult::stop(reason),
            },
            other => {
                trace!(pid = %ctx.pid(), ?other, "supervisor ignoring message");
                InfoResult::NoReply
            }
        }
    }

    async fn terminate(ctx: &mut Context, reason: &ExitReason, state: &mut SupervisorState) {
        debug!(pid = %ctx.pid(), %reason, "supervisor terminating");
        state.shutdown_all(ctx).await;
    }
}

impl SupervisorState {
    fn position(&self, id: &ChildId) -> Option<usize> {
        match id {
            ChildId::Id(id) => self.children.iter().position(|c| &c.spec.id == id),
            ChildId::Pid(pid) => self.children.iter().position(|c| c.pid() == Some(*pid)),
        }
    }

    fn counts(&self) -> ChildCounts {
        let mut counts = ChildCounts {
            specs: self.children.len(),
            ..Default::default()
        };
        for child in &self.children {
            if child.process.is_some() {
                counts.active += 1;
            }
            match child.spec.child_type {
                ChildType::Supervisor => counts.supervisors += 1,
                ChildType::Worker => counts.workers += 1,
            }
        }
        counts
    }

    /// Records a restart; returns `true` once the intensity is exceeded.
    fn restart_limit_reached(&mut self) -> bool {
        let now = Instant::now();
        self.restarts.push_back(now);
        while let Some(first) = self.restarts.front() {
            if now.duration_since(*first) > self.flags.period {
                self.restarts.pop_front();
            } else {
                break;
            }
        }
        self.restarts.len() > self.flags.max_restarts as usize
    }

    async fn child_exited(
        &mut self,
        ctx: &Context,
        pid: Pid,
        reason: ExitReason,
    ) -> Result<(), ExitReason> {
        let Some(idx) = self.position(&ChildId::Pid(pid)) else {
            trace!(pid = %ctx.pid(), from = %pid, "exit from unknown process");
            return Ok(());
        };
        let child = &mut self.children[idx];
        child.process = None;
        let id = child.spec.id.clone();

        if !child.spec.restart.should_restart(&reason) {
            debug!(pid = %ctx.pid(), child = %id, child_pid = %pid, %reason, "child exited");
            if self.template.is_some() || child.spec.restart == RestartType::Temporary {
                self.children.remove(idx);
            }
            return Ok(());
        }

        warn!(pid = %ctx.pid(), child = %id, child_pid = %pid, %reason, "child terminated, restarting");
        if self.restart_limit_reached() {
            error!(
                pid = %ctx.pid(),
                max_restarts = self.flags.max_restarts,
                period = ?self.flags.period,
                "restart intensity reached, shutting down"
            );
            return Err(ExitReason::error("reached max restart intensity"));
        }

        let range = match self.flags.strategy {
            Strategy::OneForOne | Strategy::SimpleOneForOne => idx..idx + 1,
            Strategy::OneForAll => 0..self.children.len(),
            Strategy::RestForOne => idx..self.children.len(),
        };

        for i in range.clone().rev() {
            shutdown_child(ctx, &mut self.children[i]).await;
        }

        let mut dropped = Vec::new();
        for i in range {
            let child = &mut self.children[i];
            if i != idx && child.spec.restart == RestartType::Temporary {
                dropped.push(i);
                continue;
            }
            if let Err(e) = launch_child(ctx, child).await {
                error!(pid = %ctx.pid(), child = %child.spec.id, error = %e, "child failed to restart");
                return Err(ExitReason::error(format!(
                    "child '{}' failed to restart: {}",
                    child.spec.id, e
                )));
            }
        }
        for i in dropped.into_iter().rev() {
            self.children.remove(i);
        }
        Ok(())
    }

    async fn start_dynamic(
        &mut self,
        ctx: &Context,
        args: RawTerm,
    ) -> Result<Option<Pid>, ChildError> {
        let Some(template) = &self.template else {
            return Err(ChildError::Unsupported(
                "start_child needs a simple_one_for_one supervisor".into(),
            ));
        };
        let mut child = Child::new(template.clone(), Some(args));
        match launch_child(ctx, &mut child).await {
            Ok(Some(pid)) => {
                self.children.push(child);
                Ok(Some(pid))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(ChildError::StartFailed(e.to_string())),
        }
    }

    async fn terminate_child(&mut self, ctx: &Context, id: ChildId) -> Result<(), ChildError> {
        if self.template.is_some() && matches!(id, ChildId::Id(_)) {
            return Err(ChildError::Unsupported(
                "simple_one_for_one children are terminated by pid".into(),
            ));
        }
        let idx = self
            .position(&id)
            .ok_or_else(|| ChildError::NotFound(id.to_string()))?;
        shutdown_child(ctx, &mut self.children[idx]).await;
        if self.template.is_some() || self.children[idx].spec.restart == RestartType::Temporary {
            self.children.remove(idx);
        }
        Ok(())
    }

    async fn restart_child(&mut self, ctx: &Context, id: &str) -> Result<Option<Pid>, ChildError> {
        self.static_only("restart_child")?;
        let idx = self
            .position(&ChildId::Id(id.to_string()))
            .ok_or_else(|| ChildError::NotFound(id.to_string()))?;
        let child = &mut self.children[idx];
        if child.process.is_some() {
            return Err(ChildError::AlreadyRunning(id.to_string()));
        }
        launch_child(ctx, child)
            .await
            .map_err(|e| ChildError::StartFailed(e.to_string()))
    }

    fn delete_child(&mut self, id: &str) -> Result<(), ChildError> {
        self.static_only("delete_child")?;
        let idx = self
            .position(&ChildId::Id(id.to_string()))
            .ok_or_else(|| ChildError::NotFound(id.to_string()))?;
        if self.children[idx].process.is_some() {
            return Err(ChildError::Running(id.to_string()));
        }
        self.children.remove(idx);
        Ok(())
    }

    fn static_only(&self, op: &str) -> Result<(), ChildError> {
        match self.template {
            Some(_) => Err(ChildError::Unsupported(format!(
                "{} is not available on simple_one_for_one supervisors",
                op
            ))),
            None => Ok(()),
        }
    }

    /// Shuts every child down, last started first.
    async fn shutdown_all(&mut self, ctx: &Context) {
        for child in self.children.iter_mut().rev() {
            shutdown_child(ctx, child).await;
        }
    }
}

/// Starts `child` and links it to the supervisor.
///
/// An ignored start leaves the child registered but not running.
async fn launch_child(ctx: &Context, child: &mut Child) -> Result<Option<Pid>, StartChildError> {
    let start = StartContext::new(
        ctx.node().clone(),
        ctx.pid(),
        ctx.process().list_env(),
        child.args.clone(),
    );
    match (child.spec.start)(start).await {
        Ok(process) => {
            let pid = process.pid();
            ctx.link(pid);
            debug!(pid = %ctx.pid(), child = %child.spec.id, child_pid = %pid, "child started");
            child.process = Some(process);
            Ok(Some(pid))
        }
        Err(StartChildError::Ignore) => {
            debug!(pid = %ctx.pid(), child = %child.spec.id, "child start ignored");
            child.process = None;
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Stops a running child according to its shutdown type and waits for it.
async fn shutdown_child(ctx: &Context, child: &mut Child) {
    let Some(process) = child.process.take() else {
        return;
    };
    let pid = process.pid();
    ctx.unlink(pid);
    match child.spec.shutdown {
        ShutdownType::BrutalKill => process.kill(),
        ShutdownType::Timeout(timeout) => {
            process.stop(ExitReason::Shutdown);
            if process.wait_timeout(timeout).await.is_none() {
                warn!(child = %child.spec.id, child_pid = %pid, ?timeout, "child did not stop in time, killing");
                process.kill();
            }
        }
        ShutdownType::Infinity => process.stop(ExitReason::Shutdown),
    }
    let reason = process.wait().await;
    debug!(pid = %ctx.pid(), child = %child.spec.id, child_pid = %pid, %reason, "child shut down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::transport::NullTransport;
    use std::time::Duration;

    struct Worker;

    #[async_trait]
    impl GenServer for Worker {
        type State = ();
        type InitArg = ();
        type Call = ();
        type Cast = ();
        type Reply = ();

        async fn init(_ctx: &mut Context, _arg: ()) -> InitResult<()> {
            InitResult::ok(())
        }

        async fn handle_call(_ctx: &mut Context, _req: (), _from: From, _state: &mut ()) -> CallResult<()> {
            CallResult::reply(())
        }

        async fn handle_cast(_ctx: &mut Context, _msg: (), _state: &mut ()) -> CastResult {
            CastResult::NoReply
        }
    }

    struct Broken;

    #[async_trait]
    impl GenServer for Broken {
        type State = ();
        type InitArg = ();
        type Call = ();
        type Cast = ();
        type Reply = ();

        async fn init(_ctx: &mut Context, _arg: ()) -> InitResult<()> {
            InitResult::stop(ExitReason::error("broken"))
        }

        async fn handle_call(_ctx: &mut Context, _req: (), _from: From, _state: &mut ()) -> CallResult<()> {
            CallResult::reply(())
        }

        async fn handle_cast(_ctx: &mut Context, _msg: (), _state: &mut ()) -> CastResult {
            CastResult::NoReply
        }
    }

    fn node(name: &str) -> Node {
        Node::start(name, NodeConfig::default(), NullTransport)
    }

    fn workers(ids: &[&str]) -> Vec<ChildSpec> {
        ids.iter()
            .map(|id| ChildSpec::named::<Worker>(*id, *id, ()))
            .collect()
    }

    async fn pids(node: &Node, sup: Pid) -> Vec<Option<Pid>> {
        which_children(node, sup)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.pid)
            .collect()
    }

    /// Polls until the child at `idx` runs with a pid other than `old`.
    async fn wait_for_restart(node: &Node, sup: Pid, idx: usize, old: Option<Pid>) -> Vec<Option<Pid>> {
        for _ in 0..200 {
            let current = pids(node, sup).await;
            if current[idx].is_some() && current[idx] != old {
                return current;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("child {} was not restarted", idx);
    }

    async fn start_sup(node: &Node, strategy: Strategy, children: Vec<ChildSpec>) -> Process {
        let init = SupervisorInit::new(SupervisorFlags::new(strategy), children);
        start::<SpecSupervisor>(node, None, init).await.unwrap()
    }

    #[tokio::test]
    async fn test_one_for_one_restarts_only_failed_child() {
        let node = node("ofo@test");
        let sup = start_sup(&node, Strategy::OneForOne, workers(&["a", "b", "c"])).await;
        let before = pids(&node, sup.pid()).await;

        node.kill(before[1].unwrap()).await.unwrap();
        let after = wait_for_restart(&node, sup.pid(), 1, before[1]).await;

        assert_eq!(after[0], before[0]);
        assert_eq!(after[2], before[2]);
        assert_eq!(node.whereis("b").await, after[1]);
    }

    #[tokio::test]
    async fn test_rest_for_one_restarts_later_children() {
        let node = node("rfo@test");
        let sup = start_sup(&node, Strategy::RestForOne, workers(&["a", "b", "c"])).await;
        let before = pids(&node, sup.pid()).await;

        node.kill(before[1].unwrap()).await.unwrap();
        let after = wait_for_restart(&node, sup.pid(), 1, before[1]).await;

        assert_eq!(after[0], before[0]);
        assert_ne!(after[2], before[2]);
        assert!(after[2].is_some());
    }

    #[tokio::test]
    async fn test_one_for_all_restarts_everyone() {
        let node = node("ofa@test");
        let sup = start_sup(&node, Strategy::OneForAll, workers(&["a", "b", "c"])).await;
        let before = pids(&node, sup.pid()).await;

        node.kill(before[1].unwrap()).await.unwrap();
        let after = wait_for_restart(&node, sup.pid(), 1, before[1]).await;

        for (old, new) in before.iter().zip(&after) {
            assert!(new.is_some());
            assert_ne!(old, new);
        }
    }

    #[tokio::test]
    async fn test_temporary_and_transient_children() {
        let node = node("restart@test");
        let children = vec![
            ChildSpec::named::<Worker>("temp", "temp", ()).restart(RestartType::Temporary),
            ChildSpec::named::<Worker>("trans", "trans", ()).restart(RestartType::Transient),
        ];
        let sup = start_sup(&node, Strategy::OneForOne, children).await;

        let temp = node.process_by_name("temp").await.unwrap();
        node.kill(temp.pid()).await.unwrap();
        temp.wait().await;

        let trans = node.process_by_name("trans").await.unwrap();
        trans.stop(ExitReason::Normal);
        trans.wait().await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        let children = which_children(&node, sup.pid()).await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, "trans");
        assert_eq!(children[0].pid, None);
    }

    #[tokio::test]
    async fn test_restart_intensity_stops_supervisor() {
        let node = node("intensity@test");
        let init = SupervisorInit::new(
            SupervisorFlags::new(Strategy::OneForOne).max_restarts(1),
            workers(&["a"]),
        );
        let sup = start::<SpecSupervisor>(&node, None, init).await.unwrap();

        let first = pids(&node, sup.pid()).await[0];
        node.kill(first.unwrap()).await.unwrap();
        let second = wait_for_restart(&node, sup.pid(), 0, first).await[0];
        node.kill(second.unwrap()).await.unwrap();

        assert_eq!(
            sup.wait().await,
            ExitReason::error("reached max restart intensity")
        );
        assert_eq!(node.whereis("a").await, None);
    }

    #[tokio::test]
    async fn test_failed_start_cleans_up() {
        let node = node("failed@test");
        let mut children = workers(&["a"]);
        children.push(ChildSpec::gen_server::<Broken>("broken", ()));
        let init = SupervisorInit::new(SupervisorFlags::default(), children);

        let err = start::<SpecSupervisor>(&node, Some("sup"), init).await.unwrap_err();
        assert!(matches!(err, SpawnError::InitFailed(ExitReason::Error(ref msg)) if msg.contains("broken")));
        assert_eq!(node.whereis("a").await, None);
        assert_eq!(node.whereis("sup").await, None);
    }

    #[tokio::test]
    async fn test_duplicate_ids_rejected() {
        let node = node("dupid@test");
        let children = vec![
            ChildSpec::gen_server::<Worker>("same", ()),
            ChildSpec::gen_server::<Worker>("same", ()),
        ];
        let init = SupervisorInit::new(SupervisorFlags::default(), children);
        let err = start::<SpecSupervisor>(&node, None, init).await.unwrap_err();
        assert_eq!(
            err,
            SpawnError::InitFailed(ExitReason::error("duplicate child id 'same'"))
        );
    }

    #[tokio::test]
    async fn test_terminate_restart_delete() {
        let node = node("manage@test");
        let sup = start_sup(&node, Strategy::OneForOne, workers(&["a", "b"])).await;

        assert_eq!(
            delete_child(&node, sup.pid(), "a").await,
            Err(SupervisorError::Child(ChildError::Running("a".into())))
        );
        terminate_child(&node, sup.pid(), "a").await.unwrap();
        assert_eq!(node.whereis("a").await, None);
        assert_eq!(pids(&node, sup.pid()).await[0], None);

        let restarted = restart_child(&node, sup.pid(), "a").await.unwrap();
        assert_eq!(node.whereis("a").await, restarted);
        assert_eq!(
            restart_child(&node, sup.pid(), "a").await,
            Err(SupervisorError::Child(ChildError::AlreadyRunning("a".into())))
        );

        terminate_child(&node, sup.pid(), "b").await.unwrap();
        delete_child(&node, sup.pid(), "b").await.unwrap();
        let counts = count_children(&node, sup.pid()).await.unwrap();
        assert_eq!(
            counts,
            ChildCounts {
                specs: 1,
                active: 1,
                supervisors: 0,
                workers: 1,
            }
        );
        assert_eq!(
            terminate_child(&node, sup.pid(), "zzz").await,
            Err(SupervisorError::Child(ChildError::NotFound("zzz".into())))
        );
    }

    #[tokio::test]
    async fn test_simple_one_for_one() {
        let node = node("simple@test");
        let template = ChildSpec::template::<Worker>("worker").restart(RestartType::Transient);
        let sup = start_sup(&node, Strategy::SimpleOneForOne, vec![template]).await;

        let first = start_child(&node, sup.pid(), &()).await.unwrap().unwrap();
        let second = start_child(&node, sup.pid(), &()).await.unwrap().unwrap();
        assert_eq!(count_children(&node, sup.pid()).await.unwrap().active, 2);

        // A crashed instance is restarted in place.
        node.kill(first).await.unwrap();
        let after = wait_for_restart(&node, sup.pid(), 0, Some(first)).await;
        assert_eq!(after.len(), 2);
        assert_eq!(after[1], Some(second));

        terminate_child(&node, sup.pid(), second).await.unwrap();
        assert!(!node.is_process_alive(second).await);
        assert_eq!(count_children(&node, sup.pid()).await.unwrap().specs, 1);

        assert!(matches!(
            terminate_child(&node, sup.pid(), "worker").await,
            Err(SupervisorError::Child(ChildError::Unsupported(_)))
        ));
    }

    #[tokio::test]
    async fn test_start_child_on_static_supervisor() {
        let node = node("static@test");
        let sup = start_sup(&node, Strategy::OneForOne, workers(&["a"])).await;
        assert!(matches!(
            start_child(&node, sup.pid(), &()).await,
            Err(SupervisorError::Child(ChildError::Unsupported(_)))
        ));
    }

    #[tokio::test]
    async fn test_parent_exit_shuts_down_tree() {
        let node = node("parent@test");
        let (tx, rx) = tokio::sync::oneshot::channel();
        let parent = node
            .spawn_fn(None, ProcessOptions::new(), move |ctx| async move {
                let init = SupervisorInit::new(SupervisorFlags::default(), workers(&["a"]));
                let sup = start_link::<SpecSupervisor>(&ctx, None, init).await;
                let _ = tx.send(sup);
                ctx.stopped().await;
            })
            .await
            .unwrap();

        let sup = rx.await.unwrap().unwrap();
        assert!(node.whereis("a").await.is_some());

        parent.stop(ExitReason::error("parent failed"));
        assert_eq!(sup.wait().await, ExitReason::error("parent failed"));
        assert_eq!(node.whereis("a").await, None);
    }

    #[tokio::test]
    async fn test_shutdown_stops_children() {
        let node = node("order@test");
        let sup = start_sup(&node, Strategy::OneForOne, workers(&["a", "b"])).await;
        let a = node.process_by_name("a").await.unwrap();
        let b = node.process_by_name("b").await.unwrap();

        sup.stop(ExitReason::Shutdown);
        assert_eq!(sup.wait().await, ExitReason::Shutdown);
        assert_eq!(a.wait().await, ExitReason::Shutdown);
        assert_eq!(b.wait().await, ExitReason::Shutdown);
    }
}
