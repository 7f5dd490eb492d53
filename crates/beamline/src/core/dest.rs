//! Message destinations.
//!
//! Routing accepts three shapes of address: a pid, a locally registered
//! name, or a `{name, node}` pair naming a registered process on some node.

use crate::atom::Atom;
use crate::core::Pid;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a message should go.
///
/// ```
/// use beamline::core::Destination;
///
/// let by_name: Destination = "logger".into();
/// let remote: Destination = ("logger", "other@host").into();
/// assert!(matches!(by_name, Destination::Name(_)));
/// assert!(matches!(remote, Destination::Remote { .. }));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Destination {
    /// A process identifier, local or remote.
    Pid(Pid),
    /// A name registered on the local node.
    Name(String),
    /// A name registered on `node`.
    Remote {
        /// Registered name on the target node.
        name: String,
        /// Target node.
        node: Atom,
    },
}

impl Destination {
    /// Builds a `{name, node}` destination.
    pub fn remote(name: impl Into<String>, node: impl Into<Atom>) -> Self {
        Destination::Remote {
            name: name.into(),
            node: node.into(),
        }
    }
}

impl From<Pid> for Destination {
    fn from(pid: Pid) -> Self {
        Destination::Pid(pid)
    }
}

impl From<&Pid> for Destination {
    fn from(pid: &Pid) -> Self {
        Destination::Pid(*pid)
    }
}

impl From<&str> for Destination {
    fn from(name: &str) -> Self {
        Destination::Name(name.to_string())
    }
}

impl From<String> for Destination {
    fn from(name: String) -> Self {
        Destination::Name(name)
    }
}

impl From<(&str, &str)> for Destination {
    fn from((name, node): (&str, &str)) -> Self {
        Destination::remote(name, node)
    }
}

impl From<(&str, Atom)> for Destination {
    fn from((name, node): (&str, Atom)) -> Self {
        Destination::remote(name, node)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Pid(pid) => write!(f, "{}", pid),
            Destination::Name(name) => write!(f, "{}", name),
            Destination::Remote { name, node } => write!(f, "{{{}, {}}}", name, node),
        }
    }
}
