//! Processes: handles, mailboxes and the execution context.
//!
//! A process is one tokio task with a private bounded [`Mailbox`]. Other
//! components only ever hold its [`Process`] handle, which can deliver
//! envelopes and request termination but never reaches behavior state.
//! The task itself receives through its [`Context`].

mod context;
mod handle;
mod mailbox;

pub use context::Context;
pub use handle::{Process, ProcessInfo};
pub use mailbox::{DeliveryError, Envelope, Mailbox, MailboxSender, Message};

use std::any::Any;

/// Extracts the message of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
