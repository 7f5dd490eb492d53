//! Process identifier type.
//!
//! A [`Pid`] addresses one process on one node incarnation. It carries four
//! components:
//!
//! - **node**: the name of the node that issued it
//! - **id**: a counter local to that node's registrar
//! - **serial**: bumped if `id` ever wraps
//! - **creation**: distinguishes incarnations of a node with the same name
//!
//! Pids are only minted by a node's registrar; [`Pid::new`] exists so that
//! remote pids can be reconstructed and tests can build fixtures.

use crate::atom::Atom;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A process identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pid {
    node: Atom,
    id: u64,
    serial: u32,
    creation: u32,
}

impl Pid {
    /// Builds a pid from its parts.
    ///
    /// ```
    /// use beamline::core::Pid;
    ///
    /// let pid = Pid::new("beta@host", 1001, 1, 1);
    /// assert_eq!(pid.node_name(), "beta@host");
    /// assert_eq!(pid.to_string(), "<beta@host.1001.1>");
    /// ```
    pub fn new(node: impl Into<Atom>, id: u64, serial: u32, creation: u32) -> Self {
        Self {
            node: node.into(),
            id,
            serial,
            creation,
        }
    }

    /// Returns the node atom.
    #[inline]
    pub fn node(&self) -> Atom {
        self.node
    }

    /// Returns the node name as a string.
    pub fn node_name(&self) -> String {
        self.node.as_str()
    }

    /// Returns the per-node process counter value.
    #[inline]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Returns the serial number.
    #[inline]
    pub const fn serial(&self) -> u32 {
        self.serial
    }

    /// Returns the creation number of the issuing node.
    #[inline]
    pub const fn creation(&self) -> u32 {
        self.creation
    }

    /// Returns `true` if this pid was issued by `node`.
    #[inline]
    pub fn is_on(&self, node: Atom) -> bool {
        self.node == node
    }
}

impl fmt::Debug for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pid{}", self)
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}.{}.{}>", self.node, self.id, self.serial)
    }
}
