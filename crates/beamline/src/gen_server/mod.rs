//! Generic servers.
//!
//! A [`GenServer`] is a process whose behavior is split into callbacks:
//! `init` builds the state, `handle_call` answers requests, `handle_cast`
//! takes fire-and-forget messages and `handle_info` sees everything else,
//! including exit and monitor notifications. One loop per process pulls
//! envelopes from the mailbox and runs exactly one callback at a time, in
//! arrival order.
//!
//! A panic in any callback is caught at the loop boundary and turned into a
//! termination; `terminate` still runs once with a `panic: ...` reason.

mod error;
mod server;
mod types;

pub use error::{CallError, StopError};
pub use server::{call, cast, reply, start, start_link, stop, GenServer};
pub use types::{CallResult, CastResult, From, Info, InfoResult, InitResult, ServerRef};

pub(crate) use server::{call_raw, start_with};
