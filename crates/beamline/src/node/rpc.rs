//! Remote procedure calls.
//!
//! Functions are provided under a `module:function` pair and served by a
//! GenServer registered as `rex`. The first `provide_rpc` on a node starts
//! it; a node that never provides anything has no `rex`, and calls to it
//! time out like calls to any other missing name.
//!
//! A function runs inside the `rex` loop, so calls to one node are applied
//! one at a time. A panicking function fails only its own call.

use crate::core::RawTerm;
use crate::error::RpcError;
use crate::gen_server::{CallResult, CastResult, From, GenServer, InitResult};
use crate::process::{panic_message, Context};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

/// Name the RPC server registers under on every node that serves calls.
pub(crate) const REX: &str = "rex";

pub(crate) type RpcFunction = Arc<dyn Fn(RawTerm) -> Result<RawTerm, RpcError> + Send + Sync>;

/// Functions provided on this node.
#[derive(Default)]
pub(crate) struct RpcTable {
    functions: DashMap<(String, String), RpcFunction>,
}

impl RpcTable {
    /// Returns `true` if an earlier function under the same name was
    /// replaced.
    pub(crate) fn provide(&self, module: &str, function: &str, fun: RpcFunction) -> bool {
        self.functions
            .insert((module.to_string(), function.to_string()), fun)
            .is_some()
    }

    pub(crate) fn revoke(&self, module: &str, function: &str) -> bool {
        self.functions
            .remove(&(module.to_string(), function.to_string()))
            .is_some()
    }

    fn list(&self) -> Vec<(String, String)> {
        let mut names: Vec<(String, String)> =
            self.functions.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    fn apply(&self, module: &str, function: &str, args: RawTerm) -> RexReply {
        // Clone out of the map so the function may provide or revoke.
        let Some(fun) = self
            .functions
            .get(&(module.to_string(), function.to_string()))
            .map(|e| e.value().clone())
        else {
            return RexReply::Undefined;
        };

        match std::panic::catch_unwind(AssertUnwindSafe(|| fun(args))) {
            Ok(Ok(value)) => RexReply::Value(value),
            Ok(Err(RpcError::BadArgument(reason))) => RexReply::BadArgument(reason),
            Ok(Err(error)) => RexReply::Failed(error.to_string()),
            Err(panic) => {
                let reason = panic_message(&*panic);
                warn!(module, function, panic = %reason, "rpc function panicked");
                RexReply::Failed(reason)
            }
        }
    }
}

/// Requests understood by `rex`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum RexCall {
    Apply {
        module: String,
        function: String,
        args: RawTerm,
    },
    Functions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum RexReply {
    Value(RawTerm),
    Undefined,
    BadArgument(String),
    Failed(String),
    Functions(Vec<(String, String)>),
}

impl RexReply {
    /// Turns an `Apply` answer into the caller's result.
    pub(crate) fn into_value(self, module: &str, function: &str) -> Result<RawTerm, RpcError> {
        match self {
            RexReply::Value(raw) => Ok(raw),
            RexReply::Undefined => Err(RpcError::Undefined {
                module: module.to_string(),
                function: function.to_string(),
            }),
            RexReply::BadArgument(reason) => Err(RpcError::BadArgument(reason)),
            RexReply::Failed(reason) => Err(RpcError::Failed(reason)),
            RexReply::Functions(_) => Err(RpcError::Failed("unexpected reply".to_string())),
        }
    }
}

/// The RPC server.
pub(crate) struct Rex;

#[async_trait]
impl GenServer for Rex {
    type State = Arc<RpcTable>;
    type InitArg = Arc<RpcTable>;
    type Call = RexCall;
    type Cast = ();
    type Reply = RexReply;

    async fn init(ctx: &mut Context, table: Arc<RpcTable>) -> InitResult<Arc<RpcTable>> {
        debug!(pid = %ctx.pid(), "rpc server started");
        InitResult::ok(table)
    }

    async fn handle_call(
        _ctx: &mut Context,
        request: RexCall,
        _from: From,
        table: &mut Arc<RpcTable>,
    ) -> CallResult<RexReply> {
        let reply = match request {
            RexCall::Apply {
                module,
                function,
                args,
            } => table.apply(&module, &function, args),
            RexCall::Functions => RexReply::Functions(table.list()),
        };
        CallResult::reply(reply)
    }

    async fn handle_cast(_ctx: &mut Context, _msg: (), _table: &mut Arc<RpcTable>) -> CastResult {
        CastResult::noreply()
    }
}
