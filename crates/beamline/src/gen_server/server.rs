//! GenServer trait and process loop implementation.

use super::error::{CallError, StopError};
use super::types::{CallResult, CastResult, From, Info, InfoResult, InitResult, ServerRef};
use crate::config::ProcessOptions;
use crate::core::{Destination, ExitReason, Pid, RawTerm, Term};
use crate::error::{SendError, SpawnError};
use crate::node::Node;
use crate::process::{panic_message, Context, Envelope, Message, Process};
use async_trait::async_trait;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, trace, warn};

/// The GenServer trait for implementing request/response servers.
///
/// Callbacks are associated functions: the server value is never
/// instantiated, all data lives in `State`, which the process loop owns and
/// lends to one callback at a time. Messages are handled strictly in mailbox
/// order.
///
/// # Example
///
/// ```
/// use async_trait::async_trait;
/// use beamline::gen_server::{CallResult, CastResult, From, GenServer, InitResult};
/// use beamline::process::Context;
/// use serde::{Deserialize, Serialize};
///
/// struct Counter;
///
/// #[derive(Serialize, Deserialize)]
/// enum CounterCall { Get, Increment }
///
/// #[async_trait]
/// impl GenServer for Counter {
///     type State = i64;
///     type InitArg = i64;
///     type Call = CounterCall;
///     type Cast = ();
///     type Reply = i64;
///
///     async fn init(_ctx: &mut Context, arg: i64) -> InitResult<i64> {
///         InitResult::ok(arg)
///     }
///
///     async fn handle_call(
///         _ctx: &mut Context,
///         request: CounterCall,
///         _from: From,
///         state: &mut i64,
///     ) -> CallResult<i64> {
///         if let CounterCall::Increment = request {
///             *state += 1;
///         }
///         CallResult::reply(*state)
///     }
///
///     async fn handle_cast(_ctx: &mut Context, _msg: (), _state: &mut i64) -> CastResult {
///         CastResult::noreply()
///     }
/// }
/// ```
#[async_trait]
pub trait GenServer: Sized + Send + Sync + 'static {
    /// The server's state type.
    type State: Send + 'static;
    /// Argument passed to the `init` callback.
    type InitArg: Send + 'static;
    /// Request type for synchronous calls.
    type Call: Term;
    /// Message type for asynchronous casts.
    type Cast: Term;
    /// Reply type for calls.
    type Reply: Term;

    /// Initializes the server state.
    ///
    /// The starter is blocked until this returns. A panic here is treated
    /// like [`InitResult::Stop`] and the process exits with `init failure`.
    async fn init(ctx: &mut Context, arg: Self::InitArg) -> InitResult<Self::State>;

    /// Handles a synchronous call.
    ///
    /// The `from` parameter can be kept for deferred replies.
    async fn handle_call(
        ctx: &mut Context,
        request: Self::Call,
        from: From,
        state: &mut Self::State,
    ) -> CallResult<Self::Reply>;

    /// Handles an asynchronous cast.
    async fn handle_cast(
        ctx: &mut Context,
        msg: Self::Cast,
        state: &mut Self::State,
    ) -> CastResult;

    /// Handles everything that is not a call or a cast.
    ///
    /// The default implementation drops the message.
    async fn handle_info(
        ctx: &mut Context,
        info: Info,
        _state: &mut Self::State,
    ) -> InfoResult {
        trace!(pid = %ctx.pid(), ?info, "unhandled info");
        InfoResult::NoReply
    }

    /// Called exactly once when the server is about to terminate, unless it
    /// was killed.
    ///
    /// The default implementation does nothing.
    async fn terminate(_ctx: &mut Context, _reason: &ExitReason, _state: &mut Self::State) {}
}

/// Starts a GenServer without linking it to anyone.
///
/// Returns once `init` has completed.
pub async fn start<G: GenServer>(
    node: &Node,
    name: Option<&str>,
    options: ProcessOptions,
    arg: G::InitArg,
) -> Result<Process, SpawnError> {
    start_with::<G>(node, name, options, arg, None).await
}

/// Starts a GenServer linked to the calling process.
pub async fn start_link<G: GenServer>(
    ctx: &Context,
    name: Option<&str>,
    options: ProcessOptions,
    arg: G::InitArg,
) -> Result<Process, SpawnError> {
    start_with::<G>(ctx.node(), name, options, arg, Some(ctx.pid())).await
}

pub(crate) async fn start_with<G: GenServer>(
    node: &Node,
    name: Option<&str>,
    options: ProcessOptions,
    arg: G::InitArg,
    parent: Option<Pid>,
) -> Result<Process, SpawnError> {
    let (init_tx, init_rx) = oneshot::channel();
    let process = node
        .spawn_process(name, options, parent, move |ctx| {
            gen_server_loop::<G>(ctx, arg, init_tx, parent)
        })
        .await?;

    match init_rx.await {
        Ok(Ok(())) => Ok(process),
        Ok(Err(e)) => {
            // Hold the starter until the pid and name are released.
            process.wait().await;
            Err(e)
        }
        Err(_) => Err(SpawnError::InitFailed(process.wait().await)),
    }
}

/// The main GenServer process loop.
async fn gen_server_loop<G: GenServer>(
    mut ctx: Context,
    arg: G::InitArg,
    init_tx: oneshot::Sender<Result<(), SpawnError>>,
    parent: Option<Pid>,
) -> ExitReason {
    let pid = ctx.pid();
    let init = AssertUnwindSafe(G::init(&mut ctx, arg)).catch_unwind().await;
    let failure = match init {
        Ok(InitResult::Ok(state)) => {
            let _ = init_tx.send(Ok(()));
            return run_loop::<G>(ctx, state).await;
        }
        Ok(InitResult::Ignore) => {
            debug!(%pid, "init ignored");
            (SpawnError::Ignored, ExitReason::Normal)
        }
        Ok(InitResult::Stop(reason)) => {
            warn!(%pid, %reason, "init failed");
            (SpawnError::InitFailed(reason), ExitReason::init_failure())
        }
        Err(panic) => {
            let msg = panic_message(&*panic);
            error!(%pid, panic = %msg, "init panicked");
            (
                SpawnError::InitFailed(ExitReason::panic(msg)),
                ExitReason::init_failure(),
            )
        }
    };

    // The starter learns about the failure from the handshake, not from an
    // exit signal.
    if let Some(parent) = parent {
        ctx.unlink(parent);
    }
    let (err, reason) = failure;
    let _ = init_tx.send(Err(err));
    reason
}

/// Actions the loop can take after handling a message.
enum LoopAction {
    Continue,
    Stop(ExitReason),
}

async fn run_loop<G: GenServer>(mut ctx: Context, mut state: G::State) -> ExitReason {
    let pid = ctx.pid();
    let token = ctx.process().token().clone();
    trace!(%pid, "server running");

    let reason = loop {
        let envelope = tokio::select! {
            biased;
            _ = token.cancelled() => break ctx.process().requested_stop_reason(),
            envelope = ctx.next_envelope() => match envelope {
                Some(envelope) => envelope,
                None => break ExitReason::Normal,
            },
        };

        match dispatch::<G>(&mut ctx, envelope, &mut state).await {
            LoopAction::Continue => {}
            LoopAction::Stop(reason) => break reason,
        }
    };

    debug!(%pid, %reason, "server terminating");
    let terminate = AssertUnwindSafe(G::terminate(&mut ctx, &reason, &mut state))
        .catch_unwind()
        .await;
    if let Err(panic) = terminate {
        error!(%pid, panic = %panic_message(&*panic), "terminate panicked");
    }
    reason
}

async fn dispatch<G: GenServer>(
    ctx: &mut Context,
    envelope: Envelope,
    state: &mut G::State,
) -> LoopAction {
    let pid = ctx.pid();
    match envelope.message {
        Message::Call { from, request } => {
            let request = match request.try_decode::<G::Call>() {
                Ok(request) => request,
                Err(error) => {
                    warn!(%pid, caller = %from.caller, %error, "dropping undecodable call");
                    return LoopAction::Continue;
                }
            };
            match guarded(pid, "handle_call", G::handle_call(ctx, request, from, state)).await {
                Ok(CallResult::Reply(reply)) => {
                    send_reply(ctx, from, &reply);
                    LoopAction::Continue
                }
                Ok(CallResult::NoReply) => LoopAction::Continue,
                Ok(CallResult::Stop(reason, reply)) => {
                    send_reply(ctx, from, &reply);
                    LoopAction::Stop(reason)
                }
                Ok(CallResult::StopNoReply(reason)) | Err(reason) => LoopAction::Stop(reason),
            }
        }
        Message::Cast(raw) => match raw.try_decode::<G::Cast>() {
            Ok(msg) => cast_action(guarded(pid, "handle_cast", G::handle_cast(ctx, msg, state)).await),
            Err(error) => {
                warn!(%pid, %error, "dropping undecodable cast");
                LoopAction::Continue
            }
        },
        Message::Info(raw) => info::<G>(ctx, Info::Message(raw), state).await,
        Message::Reply { reference, reply } => {
            info::<G>(ctx, Info::Reply { reference, reply }, state).await
        }
        Message::Exit { from, reason } => info::<G>(ctx, Info::Exit { from, reason }, state).await,
        Message::Down {
            reference,
            pid: down,
            reason,
        } => {
            let msg = Info::Down {
                reference,
                pid: down,
                reason,
            };
            info::<G>(ctx, msg, state).await
        }
        Message::NodeDown { node } => info::<G>(ctx, Info::NodeDown { node }, state).await,
    }
}

async fn info<G: GenServer>(ctx: &mut Context, msg: Info, state: &mut G::State) -> LoopAction {
    let pid = ctx.pid();
    cast_action(guarded(pid, "handle_info", G::handle_info(ctx, msg, state)).await)
}

fn cast_action(result: Result<CastResult, ExitReason>) -> LoopAction {
    match result {
        Ok(CastResult::NoReply) => LoopAction::Continue,
        Ok(CastResult::Stop(reason)) | Err(reason) => LoopAction::Stop(reason),
    }
}

/// Runs a callback, turning a panic into a termination reason.
async fn guarded<F: Future>(pid: Pid, callback: &'static str, fut: F) -> Result<F::Output, ExitReason> {
    AssertUnwindSafe(fut).catch_unwind().await.map_err(|panic| {
        let msg = panic_message(&*panic);
        error!(%pid, callback, panic = %msg, "callback panicked");
        ExitReason::panic(msg)
    })
}

fn send_reply<R: Term>(ctx: &Context, from: From, reply: &R) {
    if let Err(error) = reply_from(ctx.node(), Some(ctx.pid()), from, reply) {
        warn!(pid = %ctx.pid(), caller = %from.caller, %error, "failed to send reply");
    }
}

fn reply_from<R: Term>(
    node: &Node,
    sender: Option<Pid>,
    from: From,
    reply: &R,
) -> Result<(), SendError> {
    let reply = RawTerm::from_term(reply)?;
    node.route(
        sender,
        from.caller.into(),
        Message::Reply {
            reference: from.reference,
            reply,
        },
    )
}

/// Makes a synchronous call to a GenServer.
///
/// Waits at most `timeout` for the reply; zero means the node's default.
pub async fn call<G: GenServer>(
    ctx: &Context,
    server: impl Into<ServerRef>,
    request: G::Call,
    timeout: Duration,
) -> Result<G::Reply, CallError> {
    ctx.call(server, &request, timeout).await
}

/// Sends an asynchronous cast to a GenServer.
pub fn cast<G: GenServer>(
    ctx: &Context,
    server: impl Into<ServerRef>,
    msg: G::Cast,
) -> Result<(), SendError> {
    ctx.cast(server, &msg)
}

/// Sends a reply to a pending call.
///
/// This is used for deferred replies when `handle_call` returns
/// [`CallResult::NoReply`].
pub fn reply<R: Term>(ctx: &Context, from: From, reply: &R) -> Result<(), SendError> {
    reply_from(ctx.node(), Some(ctx.pid()), from, reply)
}

/// Stops a local GenServer with `reason` and waits for it to exit.
///
/// The server's `terminate` callback runs before this returns.
pub async fn stop(
    node: &Node,
    server: impl Into<ServerRef>,
    reason: ExitReason,
    timeout: Duration,
) -> Result<(), StopError> {
    let server = server.into();
    let process = node
        .lookup(&server)
        .await
        .ok_or_else(|| StopError::NoProcess(server.to_string()))?;
    process.stop(reason);
    match process.wait_timeout(timeout).await {
        Some(_) => Ok(()),
        None => Err(StopError::Timeout),
    }
}

/// Sends an encoded call from `caller` and waits for the matching reply.
///
/// The reply is matched by reference before it reaches the caller's mailbox,
/// so no other message is consumed while waiting. On timeout the reference
/// is abandoned and a late reply is queued like any other message.
pub(crate) async fn call_raw(
    node: &Node,
    caller: &Process,
    server: Destination,
    request: RawTerm,
    timeout: Duration,
) -> Result<RawTerm, CallError> {
    let timeout = node.config().effective_call_timeout(timeout);
    if node.is_local(&server) && node.lookup(&server).await.is_none() {
        return Err(CallError::NoProcess(server.to_string()));
    }

    let reference = node.make_ref();
    let from = From::new(caller.pid(), reference);
    let rx = caller.expect_reply(reference);
    if node
        .route(Some(caller.pid()), server.clone(), Message::Call { from, request })
        .is_err()
    {
        caller.forget_reply(&reference);
        return Err(CallError::NodeStopped);
    }

    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(reply)) => Ok(reply),
        Ok(Err(_)) => Err(CallError::CallerExited),
        Err(_) => {
            caller.forget_reply(&reference);
            debug!(caller = %caller.pid(), %server, ?timeout, "call timed out");
            Err(CallError::Timeout)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::transport::NullTransport;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn node(name: &str) -> Node {
        Node::start(name, NodeConfig::default(), NullTransport)
    }

    struct Counter;

    #[derive(Debug, Serialize, Deserialize)]
    enum CounterCall {
        Get,
        Hold,
        Release(i64),
        Crash,
        Stop,
    }

    #[derive(Debug, Serialize, Deserialize)]
    enum CounterCast {
        Add(i64),
    }

    struct CounterState {
        value: i64,
        held: Option<From>,
        terminated: Arc<AtomicBool>,
    }

    #[async_trait]
    impl GenServer for Counter {
        type State = CounterState;
        type InitArg = (i64, Arc<AtomicBool>);
        type Call = CounterCall;
        type Cast = CounterCast;
        type Reply = i64;

        async fn init(_ctx: &mut Context, (value, terminated): Self::InitArg) -> InitResult<CounterState> {
            match value {
                -1 => InitResult::stop(ExitReason::error("bad start")),
                -2 => InitResult::ignore(),
                -3 => panic!("init exploded"),
                _ => InitResult::ok(CounterState {
                    value,
                    held: None,
                    terminated,
                }),
            }
        }

        async fn handle_call(
            ctx: &mut Context,
            request: CounterCall,
            from: From,
            state: &mut CounterState,
        ) -> CallResult<i64> {
            match request {
                CounterCall::Get => CallResult::reply(state.value),
                CounterCall::Hold => {
                    state.held = Some(from);
                    CallResult::noreply()
                }
                CounterCall::Release(value) => {
                    if let Some(held) = state.held.take() {
                        reply(ctx, held, &value).unwrap();
                    }
                    CallResult::reply(0)
                }
                CounterCall::Crash => panic!("handle_call exploded"),
                CounterCall::Stop => CallResult::Stop(ExitReason::Normal, state.value),
            }
        }

        async fn handle_cast(_ctx: &mut Context, msg: CounterCast, state: &mut CounterState) -> CastResult {
            let CounterCast::Add(n) = msg;
            state.value += n;
            CastResult::noreply()
        }

        async fn terminate(_ctx: &mut Context, _reason: &ExitReason, state: &mut CounterState) {
            state.terminated.store(true, Ordering::SeqCst);
        }
    }

    async fn start_counter(node: &Node, name: Option<&str>, value: i64) -> (Result<Process, SpawnError>, Arc<AtomicBool>) {
        let flag = Arc::new(AtomicBool::new(false));
        let result = start::<Counter>(node, name, ProcessOptions::new(), (value, flag.clone())).await;
        (result, flag)
    }

    #[tokio::test]
    async fn test_call_and_cast_in_order() {
        let node = node("counter@test");
        let (server, _) = start_counter(&node, Some("counter"), 10).await;
        let server = server.unwrap();

        for _ in 0..5 {
            node.cast("counter", &CounterCast::Add(2)).unwrap();
        }
        let value: i64 = node.call(server.pid(), &CounterCall::Get, TIMEOUT).await.unwrap();
        assert_eq!(value, 20);
    }

    #[tokio::test]
    async fn test_init_stop_returns_reason_and_frees_name() {
        let node = node("initstop@test");
        let (result, _) = start_counter(&node, Some("counter"), -1).await;
        assert_eq!(
            result.unwrap_err(),
            SpawnError::InitFailed(ExitReason::error("bad start"))
        );
        assert_eq!(node.whereis("counter").await, None);

        let (result, _) = start_counter(&node, Some("counter"), 0).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_init_ignore_and_panic() {
        let node = node("initother@test");
        let (ignored, _) = start_counter(&node, None, -2).await;
        assert_eq!(ignored.unwrap_err(), SpawnError::Ignored);

        let (panicked, _) = start_counter(&node, None, -3).await;
        assert_eq!(
            panicked.unwrap_err(),
            SpawnError::InitFailed(ExitReason::panic("init exploded"))
        );
        assert!(node.processes().await.is_empty());
    }

    #[tokio::test]
    async fn test_deferred_reply() {
        let node = node("deferred@test");
        let (server, _) = start_counter(&node, None, 0).await;
        let pid = server.unwrap().pid();

        let waiter = {
            let node = node.clone();
            tokio::spawn(async move { node.call::<_, i64>(pid, &CounterCall::Hold, TIMEOUT).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let released: i64 = node.call(pid, &CounterCall::Release(42), TIMEOUT).await.unwrap();

        assert_eq!(released, 0);
        assert_eq!(waiter.await.unwrap(), Ok(42));
    }

    #[tokio::test]
    async fn test_panic_in_callback_terminates_server() {
        let node = node("crash@test");
        let (server, terminated) = start_counter(&node, None, 0).await;
        let server = server.unwrap();

        let result = node
            .call::<_, i64>(server.pid(), &CounterCall::Crash, Duration::from_millis(100))
            .await;
        assert_eq!(result, Err(CallError::Timeout));
        assert_eq!(server.wait().await, ExitReason::panic("handle_call exploded"));
        assert!(terminated.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_stop_runs_terminate() {
        let node = node("stop@test");
        let (server, terminated) = start_counter(&node, Some("counter"), 3).await;
        let server = server.unwrap();

        stop(&node, "counter", ExitReason::Shutdown, TIMEOUT).await.unwrap();
        assert!(terminated.load(Ordering::SeqCst));
        assert_eq!(server.wait().await, ExitReason::Shutdown);

        assert_eq!(
            stop(&node, "counter", ExitReason::Shutdown, TIMEOUT).await,
            Err(StopError::NoProcess("counter".into()))
        );
    }

    #[tokio::test]
    async fn test_stop_from_call_replies_first() {
        let node = node("callstop@test");
        let (server, _) = start_counter(&node, None, 7).await;
        let server = server.unwrap();

        let value: i64 = node.call(server.pid(), &CounterCall::Stop, TIMEOUT).await.unwrap();
        assert_eq!(value, 7);
        assert_eq!(server.wait().await, ExitReason::Normal);
    }

    #[tokio::test]
    async fn test_call_unknown_name() {
        let node = node("unknown@test");
        let result = node.call::<_, i64>("nobody", &CounterCall::Get, TIMEOUT).await;
        assert_eq!(result, Err(CallError::NoProcess("nobody".into())));
    }

    #[tokio::test]
    async fn test_kill_skips_terminate() {
        let node = node("kill@test");
        let (server, terminated) = start_counter(&node, None, 0).await;
        let server = server.unwrap();

        server.kill();
        assert_eq!(server.wait().await, ExitReason::Killed);
        assert!(!terminated.load(Ordering::SeqCst));
    }
}
