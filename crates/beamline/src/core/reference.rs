//! Unique reference type.
//!
//! A [`Ref`] correlates a call with its reply and names a monitor so it can
//! be cancelled. References are minted by a node's [`RefGenerator`] from one
//! atomic counter, so they are unique per node incarnation and their id
//! triplet increases monotonically.

use crate::atom::Atom;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// A unique reference.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Ref {
    node: Atom,
    ids: [u32; 3],
}

impl Ref {
    /// Builds a reference from its parts.
    pub fn new(node: impl Into<Atom>, ids: [u32; 3]) -> Self {
        Self {
            node: node.into(),
            ids,
        }
    }

    /// Returns the node that issued this reference.
    #[inline]
    pub fn node(&self) -> Atom {
        self.node
    }

    /// Returns the id triplet.
    #[inline]
    pub const fn ids(&self) -> [u32; 3] {
        self.ids
    }
}

impl fmt::Debug for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#Ref<{}.{}.{}.{}>",
            self.node, self.ids[2], self.ids[1], self.ids[0]
        )
    }
}

/// Mints references for one node.
#[derive(Debug)]
pub struct RefGenerator {
    node: Atom,
    creation: u32,
    counter: AtomicU64,
}

impl RefGenerator {
    /// Creates a generator for `node` incarnation `creation`.
    pub fn new(node: Atom, creation: u32) -> Self {
        Self {
            node,
            creation,
            counter: AtomicU64::new(0),
        }
    }

    /// Returns a fresh reference.
    ///
    /// The low and high halves of the counter fill the first two ids; the
    /// third is the node creation.
    pub fn make_ref(&self) -> Ref {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        Ref {
            node: self.node,
            ids: [n as u32, (n >> 32) as u32, self.creation],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_refs_are_unique_and_increasing() {
        let generator = RefGenerator::new(atom!("refs@host"), 1);
        let a = generator.make_ref();
        let b = generator.make_ref();
        assert_ne!(a, b);
        assert!(b.ids()[0] > a.ids()[0]);
        assert_eq!(a.ids()[2], 1);
        assert_eq!(a.node(), atom!("refs@host"));
    }

    #[test]
    fn test_refs_unique_across_threads() {
        let generator = Arc::new(RefGenerator::new(atom!("refs@host"), 1));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let g = generator.clone();
                std::thread::spawn(move || (0..250).map(|_| g.make_ref()).collect::<Vec<_>>())
            })
            .collect();

        let all: HashSet<Ref> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(all.len(), 1000);
    }

    #[test]
    fn test_ref_display() {
        let r = Ref::new("refs@host", [7, 0, 1]);
        assert_eq!(r.to_string(), "#Ref<refs@host.1.0.7>");
    }
}
