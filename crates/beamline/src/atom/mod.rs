//! Interned node names.
//!
//! Every [`Pid`](crate::core::Pid) and [`Ref`](crate::core::Ref) carries the
//! name of the node that issued it. Node names are compared on every routing
//! decision, so they are interned once into a process-wide table and carried
//! around as a `Copy` index.
//!
//! ```
//! use beamline::atom;
//!
//! let a = atom!("alpha@localhost");
//! let b = atom!("alpha@{}", "localhost");
//! assert_eq!(a, b);
//! assert_eq!(a.as_str(), "alpha@localhost");
//! ```

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::OnceLock;

/// An interned string.
///
/// Equality and hashing compare the table index only.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Atom(u32);

static ATOM_TABLE: OnceLock<AtomTable> = OnceLock::new();

struct AtomTable {
    by_name: DashMap<String, u32>,
    names: RwLock<Vec<String>>,
}

impl AtomTable {
    fn new() -> Self {
        Self {
            by_name: DashMap::new(),
            names: RwLock::new(Vec::new()),
        }
    }

    fn intern(&self, s: &str) -> Atom {
        if let Some(index) = self.by_name.get(s) {
            return Atom(*index);
        }

        let mut names = self.names.write();
        // Another writer may have won the race while we waited for the lock.
        if let Some(index) = self.by_name.get(s) {
            return Atom(*index);
        }

        let index = names.len() as u32;
        names.push(s.to_string());
        self.by_name.insert(s.to_string(), index);
        Atom(index)
    }

    fn resolve(&self, atom: Atom) -> Option<String> {
        self.names.read().get(atom.0 as usize).cloned()
    }
}

fn table() -> &'static AtomTable {
    ATOM_TABLE.get_or_init(AtomTable::new)
}

impl Atom {
    /// Interns `s`, returning the existing atom if it was seen before.
    pub fn new(s: &str) -> Self {
        table().intern(s)
    }

    /// Returns the interned string.
    ///
    /// Atoms can only be built through the table, so the lookup always
    /// succeeds; an empty string is returned for a forged index.
    pub fn as_str(&self) -> String {
        table().resolve(*self).unwrap_or_default()
    }

    /// Returns the table index backing this atom.
    pub fn index(&self) -> u32 {
        self.0
    }
}

impl From<&str> for Atom {
    fn from(s: &str) -> Self {
        Atom::new(s)
    }
}

impl From<String> for Atom {
    fn from(s: String) -> Self {
        Atom::new(&s)
    }
}

impl From<&String> for Atom {
    fn from(s: &String) -> Self {
        Atom::new(s)
    }
}

impl fmt::Debug for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Atom({:?})", self.as_str())
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

// Indices are only meaningful inside one OS process, so atoms travel as text.
impl Serialize for Atom {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.as_str().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Atom {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Atom::new(&s))
    }
}

/// Interns a string built with `format!` syntax.
#[macro_export]
macro_rules! atom {
    ($($arg:tt)*) => {
        $crate::atom::Atom::new(&format!($($arg)*))
    };
}
