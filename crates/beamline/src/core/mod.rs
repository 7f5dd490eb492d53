//! Identity and value types shared by every subsystem.

mod dest;
mod exit_reason;
mod pid;
mod reference;
mod term;

pub use dest::Destination;
pub use exit_reason::ExitReason;
pub use pid::Pid;
pub use reference::{Ref, RefGenerator};
pub use term::{RawTerm, Term, TermError};
