//! # Beamline
//!
//! An OTP-style actor runtime on tokio: processes with mailboxes, links and
//! monitors, generic servers, supervision trees and applications, on one node
//! or across several.
//!
//! # Overview
//!
//! - **Processes**: isolated tokio tasks, each with a bounded FIFO mailbox
//! - **Links**: bidirectional failure propagation between processes
//! - **Monitors**: one-shot notification of another process's exit
//! - **GenServer**: callback-driven server processes with call and cast
//! - **Supervisor**: automatic restarts under a strategy and an intensity
//! - **Application**: supervision trees with dependencies and start types
//!
//! Every node owns one registrar loop holding the process, name and peer
//! tables; everything else reaches those tables by message.
//!
//! # Quick Start
//!
//! ```ignore
//! use beamline::prelude::*;
//!
//! #[tokio::main]
//! async fn main() {
//!     let node = Node::start("demo@localhost", NodeConfig::default(), NullTransport);
//!     let echo = node
//!         .spawn_fn(Some("echo"), ProcessOptions::new(), |mut ctx| async move {
//!             while let Some(envelope) = ctx.recv().await {
//!                 if let (Some(from), Message::Info(raw)) = (envelope.from, envelope.message) {
//!                     let _ = ctx.send_raw(from, raw);
//!                 }
//!             }
//!         })
//!         .await
//!         .unwrap();
//!     node.send(echo.pid(), &"hello".to_string()).unwrap();
//!     node.stop();
//! }
//! ```
//!
//! # Supervisor Example
//!
//! ```ignore
//! use beamline::prelude::*;
//!
//! struct Tree;
//!
//! impl Supervisor for Tree {
//!     type InitArg = ();
//!
//!     fn init(_arg: ()) -> SupervisorInit {
//!         SupervisorInit::new(
//!             SupervisorFlags::new(Strategy::OneForOne).max_restarts(3),
//!             vec![ChildSpec::named::<Counter>("counter", "counter", 0)],
//!         )
//!     }
//! }
//!
//! let sup = beamline::supervisor::start::<Tree>(&node, Some("tree"), ()).await?;
//! ```

#![warn(missing_docs)]

pub mod application;
pub mod atom;
pub mod config;
pub mod core;
pub mod error;
pub mod gen_server;
pub mod node;
pub mod process;
pub mod supervisor;
pub mod transport;

mod monitor;
mod registrar;

pub use crate::core::{Destination, ExitReason, Pid, RawTerm, Ref, Term};
pub use atom::Atom;
pub use config::{EnvValue, NodeConfig, ProcessOptions};
pub use node::Node;
pub use process::{Context, Process};

/// Commonly used types.
pub mod prelude {
    // Core types
    pub use crate::atom::Atom;
    pub use crate::core::{Destination, ExitReason, Pid, RawTerm, Ref, Term};

    // Node and processes
    pub use crate::config::{EnvValue, NodeConfig, ProcessOptions};
    pub use crate::error::{NodeError, RegistrarError, RpcError, SendError, SpawnError};
    pub use crate::node::Node;
    pub use crate::process::{Context, Envelope, Message, Process, ProcessInfo};

    // GenServer essentials
    pub use crate::gen_server::{
        CallError, CallResult, CastResult, From, GenServer, Info, InfoResult, InitResult,
        ServerRef,
    };
    pub use async_trait::async_trait;

    // Supervisor essentials
    pub use crate::supervisor::{
        ChildSpec, ChildType, RestartType, ShutdownType, Strategy, Supervisor, SupervisorFlags,
        SupervisorInit,
    };

    // Application essentials
    pub use crate::application::{
        Application, ApplicationError, ApplicationInfo, ApplicationSpec, StartType,
    };

    // Transports
    pub use crate::transport::{MemoryNetwork, NullTransport, Transport};
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_prelude_imports() {
        let _pid: Option<Pid> = None;
        let _ref: Option<Ref> = None;
        let _reason = ExitReason::Normal;
        let _config = NodeConfig::default();
    }

    #[tokio::test]
    async fn test_basic_spawn() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let node = Node::start("basic@test", NodeConfig::default(), NullTransport);
        let executed = Arc::new(AtomicBool::new(false));
        let executed_clone = executed.clone();

        let process = node
            .spawn_fn(None, ProcessOptions::new(), move |_ctx| async move {
                executed_clone.store(true, Ordering::SeqCst);
            })
            .await
            .unwrap();

        assert_eq!(process.wait().await, ExitReason::Normal);
        assert!(executed.load(Ordering::SeqCst));
    }
}
