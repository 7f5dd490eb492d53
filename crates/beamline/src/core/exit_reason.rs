//! Process exit reasons.
//!
//! An [`ExitReason`] describes why a process terminated. It travels in exit
//! signals and monitor notifications and drives supervisor restart decisions
//! and application start-type policy.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The reason a process exited.
///
/// # Normal vs Abnormal Exits
///
/// - **Normal exits** ([`ExitReason::Normal`], [`ExitReason::Shutdown`],
///   [`ExitReason::ShutdownReason`]) do not restart `Transient` children and
///   do not take linked processes down.
///
/// - **Abnormal exits** (everything else) restart `Transient` children and
///   propagate through links to processes that do not trap exits.
///
/// ```
/// use beamline::core::ExitReason;
///
/// assert!(ExitReason::Normal.is_normal());
/// assert!(ExitReason::error("connection lost").is_abnormal());
/// assert_eq!(ExitReason::init_failure().to_string(), "init failure");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ExitReason {
    /// Process completed its work.
    #[default]
    Normal,

    /// Process was asked to shut down by its supervisor or node.
    Shutdown,

    /// Process was asked to shut down, with context.
    ShutdownReason(String),

    /// Process was forcefully terminated; its terminate callback did not run.
    Killed,

    /// The process a relation was requested for did not exist.
    NoProc,

    /// The node hosting the process became unreachable.
    NoConnection,

    /// Process terminated due to a fault.
    Error(String),
}

impl ExitReason {
    /// Returns `true` for `Normal`, `Shutdown` and `ShutdownReason`.
    pub fn is_normal(&self) -> bool {
        matches!(
            self,
            ExitReason::Normal | ExitReason::Shutdown | ExitReason::ShutdownReason(_)
        )
    }

    /// Returns `true` for anything that is not a normal exit.
    #[inline]
    pub fn is_abnormal(&self) -> bool {
        !self.is_normal()
    }

    /// Returns `true` if this is the `Killed` variant.
    #[inline]
    pub fn is_killed(&self) -> bool {
        matches!(self, ExitReason::Killed)
    }

    /// Creates an error exit reason from any displayable type.
    pub fn error(msg: impl fmt::Display) -> Self {
        ExitReason::Error(msg.to_string())
    }

    /// Creates a shutdown exit reason with a message.
    pub fn shutdown(msg: impl fmt::Display) -> Self {
        ExitReason::ShutdownReason(msg.to_string())
    }

    /// The reason used when a behavior's `init` faults.
    pub fn init_failure() -> Self {
        ExitReason::Error("init failure".to_string())
    }

    /// The reason used when a behavior callback panics.
    pub fn panic(msg: impl fmt::Display) -> Self {
        ExitReason::Error(format!("panic: {}", msg))
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Normal => write!(f, "normal"),
            ExitReason::Shutdown => write!(f, "shutdown"),
            ExitReason::ShutdownReason(reason) => write!(f, "shutdown: {}", reason),
            ExitReason::Killed => write!(f, "killed"),
            ExitReason::NoProc => write!(f, "noproc"),
            ExitReason::NoConnection => write!(f, "noconnection"),
            ExitReason::Error(msg) => write!(f, "{}", msg),
        }
    }
}

impl From<&str> for ExitReason {
    fn from(s: &str) -> Self {
        match s {
            "normal" => ExitReason::Normal,
            "shutdown" => ExitReason::Shutdown,
            "killed" | "kill" => ExitReason::Killed,
            "noproc" => ExitReason::NoProc,
            "noconnection" => ExitReason::NoConnection,
            other => ExitReason::Error(other.to_string()),
        }
    }
}

impl From<String> for ExitReason {
    fn from(s: String) -> Self {
        ExitReason::from(s.as_str())
    }
}

/// A process body that returns nothing exited normally.
impl From<()> for ExitReason {
    fn from(_: ()) -> Self {
        ExitReason::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_family() {
        assert!(ExitReason::Normal.is_normal());
        assert!(ExitReason::Shutdown.is_normal());
        assert!(ExitReason::shutdown("maintenance").is_normal());
        assert!(ExitReason::Killed.is_abnormal());
        assert!(ExitReason::NoProc.is_abnormal());
        assert!(ExitReason::NoConnection.is_abnormal());
        assert!(ExitReason::error("boom").is_abnormal());
    }

    #[test]
    fn test_display() {
        assert_eq!(ExitReason::Normal.to_string(), "normal");
        assert_eq!(ExitReason::Shutdown.to_string(), "shutdown");
        assert_eq!(
            ExitReason::shutdown("timeout").to_string(),
            "shutdown: timeout"
        );
        assert_eq!(ExitReason::Killed.to_string(), "killed");
        assert_eq!(ExitReason::init_failure().to_string(), "init failure");
        assert_eq!(ExitReason::panic("oops").to_string(), "panic: oops");
    }

    #[test]
    fn test_from_str_recognizes_reserved_words() {
        assert_eq!(ExitReason::from("normal"), ExitReason::Normal);
        assert_eq!(ExitReason::from("kill"), ExitReason::Killed);
        assert_eq!(ExitReason::from("noproc"), ExitReason::NoProc);
        assert_eq!(
            ExitReason::from("bad input".to_string()),
            ExitReason::Error("bad input".to_string())
        );
    }

    #[test]
    fn test_killed_is_distinct() {
        assert!(ExitReason::Killed.is_killed());
        assert!(!ExitReason::Shutdown.is_killed());
    }
}
