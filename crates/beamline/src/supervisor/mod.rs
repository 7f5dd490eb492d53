//! Supervisors.
//!
//! A supervisor starts its children in order, watches them through links and
//! restarts them when they terminate:
//!
//! - [`Strategy::OneForOne`] restarts only the failed child.
//! - [`Strategy::OneForAll`] restarts every child.
//! - [`Strategy::RestForOne`] restarts the failed child and those started
//!   after it.
//! - [`Strategy::SimpleOneForOne`] manages dynamically started instances of
//!   one template.
//!
//! Too many restarts within [`SupervisorFlags::period`] make the supervisor
//! give up and exit abnormally, which its own supervisor then handles.

mod error;
mod supervisor;
mod types;

pub use error::{ChildError, SupervisorError};
pub use supervisor::{
    count_children, delete_child, restart_child, start, start_child, start_link, terminate_child,
    which_children, Supervisor, SupervisorInit,
};
pub use types::{
    ChildCounts, ChildId, ChildInfo, ChildSpec, ChildType, RestartType, ShutdownType,
    StartChildError, StartContext, StartFn, Strategy, SupervisorFlags,
};

pub(crate) use supervisor::{start_supervisor, SpecSupervisor};
