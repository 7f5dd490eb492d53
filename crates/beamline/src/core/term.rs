//! Term serialization.
//!
//! Any `Serialize + DeserializeOwned + Send + 'static` type is a [`Term`] and
//! can be sent between processes, used as a call request or reply, or carried
//! across a peer link. Terms are encoded once with `postcard` at the sending
//! edge and decoded by the receiving behavior.

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Errors produced while encoding or decoding a term.
#[derive(Debug, Error)]
pub enum TermError {
    /// The value could not be serialized.
    #[error("failed to encode term: {0}")]
    Encode(#[source] postcard::Error),

    /// The bytes do not decode into the requested type.
    #[error("failed to decode term: {0}")]
    Decode(#[source] postcard::Error),
}

/// A value that can travel in a message.
///
/// ```
/// use beamline::core::Term;
///
/// let t = ("room".to_string(), 42u32);
/// let bytes = t.encode().unwrap();
/// let back: (String, u32) = Term::decode(&bytes).unwrap();
/// assert_eq!(back, t);
/// ```
pub trait Term: Sized + Send + 'static {
    /// Encodes this term into bytes.
    fn encode(&self) -> Result<Vec<u8>, TermError>;

    /// Decodes a term from bytes.
    fn decode(bytes: &[u8]) -> Result<Self, TermError>;
}

impl<T> Term for T
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    fn encode(&self) -> Result<Vec<u8>, TermError> {
        postcard::to_allocvec(self).map_err(TermError::Encode)
    }

    fn decode(bytes: &[u8]) -> Result<Self, TermError> {
        postcard::from_bytes(bytes).map_err(TermError::Decode)
    }
}

/// A term whose type is not known until a handler inspects it.
///
/// `handle_info` receives plain messages this way and tries the types it
/// understands:
///
/// ```
/// use beamline::core::{RawTerm, Term};
///
/// let raw = RawTerm::new(7u64.encode().unwrap());
/// assert_eq!(raw.decode::<u64>(), Some(7));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct RawTerm {
    bytes: Vec<u8>,
}

impl RawTerm {
    /// Wraps encoded bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Encodes `value` into a raw term.
    pub fn from_term<T: Term>(value: &T) -> Result<Self, TermError> {
        Ok(Self::new(value.encode()?))
    }

    /// Attempts to decode into `T`, returning `None` on mismatch.
    pub fn decode<T: Term>(&self) -> Option<T> {
        T::decode(&self.bytes).ok()
    }

    /// Decodes into `T`, returning the error on mismatch.
    pub fn try_decode<T: Term>(&self) -> Result<T, TermError> {
        T::decode(&self.bytes)
    }

    /// Returns the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes the term and returns the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Returns the encoded length.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` if no bytes are held.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    enum Command {
        Ping(u32),
        Quit,
    }

    #[test]
    fn test_raw_term_dispatch() {
        let raw = RawTerm::from_term(&Command::Ping(3)).unwrap();
        assert_eq!(raw.decode::<Command>(), Some(Command::Ping(3)));
        assert!(!raw.is_empty());
    }

    #[test]
    fn test_decode_error_is_reported() {
        let raw = RawTerm::new(vec![0xff, 0xff, 0xff]);
        assert!(matches!(
            raw.try_decode::<Command>(),
            Err(TermError::Decode(_))
        ));
        assert_eq!(raw.decode::<Command>(), None);
    }
}
