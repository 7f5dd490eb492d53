//! Shared helpers for the integration tests.

#![allow(dead_code)]

use beamline::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const TIMEOUT: Duration = Duration::from_secs(2);

/// Installs a fmt subscriber honouring `RUST_LOG`, once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn node(name: &str) -> Node {
    init_tracing();
    Node::start(name, NodeConfig::default(), NullTransport)
}

/// Answers `"ping"` with `"pong"` and echoes anything else.
pub struct Echo;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EchoCall {
    Say(String),
    WhoAmI,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EchoReply {
    Said(String),
    Pid(Pid),
}

#[async_trait]
impl GenServer for Echo {
    type State = ();
    type InitArg = ();
    type Call = EchoCall;
    type Cast = ();
    type Reply = EchoReply;

    async fn init(_ctx: &mut Context, _arg: ()) -> InitResult<()> {
        InitResult::ok(())
    }

    async fn handle_call(
        ctx: &mut Context,
        request: EchoCall,
        _from: From,
        _state: &mut (),
    ) -> CallResult<EchoReply> {
        match request {
            EchoCall::Say(text) if text == "ping" => CallResult::reply(EchoReply::Said("pong".into())),
            EchoCall::Say(text) => CallResult::reply(EchoReply::Said(text)),
            EchoCall::WhoAmI => CallResult::reply(EchoReply::Pid(ctx.pid())),
        }
    }

    async fn handle_cast(_ctx: &mut Context, _msg: (), _state: &mut ()) -> CastResult {
        CastResult::noreply()
    }
}

pub async fn say(node: &Node, to: impl Into<Destination>, text: &str) -> Result<EchoReply, CallError> {
    node.call(to, &EchoCall::Say(text.to_string()), TIMEOUT).await
}
