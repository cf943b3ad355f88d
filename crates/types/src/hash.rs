//! Term hashing.
//!
//! Range index keys are the first 16 bytes of SHA-256 over a term's codec
//! body. The length prefix is excluded so a key depends only on the term.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::{
    codec::{self, CodecError},
    term::Term,
};

/// Length of a term hash in bytes.
pub const TERM_HASH_LEN: usize = 16;

/// Truncated SHA-256 digest of an encoded term.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TermHash([u8; TERM_HASH_LEN]);

impl TermHash {
    /// Wraps raw hash bytes.
    pub const fn from_bytes(bytes: [u8; TERM_HASH_LEN]) -> Self {
        Self(bytes)
    }

    /// Returns the raw hash bytes.
    pub const fn as_bytes(&self) -> &[u8; TERM_HASH_LEN] {
        &self.0
    }

    /// Hashes an already-encoded term (length prefix included).
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] if `encoded` does not start with a
    /// complete frame.
    pub fn from_encoded(encoded: &[u8]) -> Result<Self, CodecError> {
        Ok(Self::from_body(codec::body_of(encoded)?))
    }

    fn from_body(body: &[u8]) -> Self {
        let digest: [u8; 32] = Sha256::digest(body).into();
        let mut out = [0u8; TERM_HASH_LEN];
        out.copy_from_slice(&digest[..TERM_HASH_LEN]);
        Self(out)
    }
}

impl fmt::Debug for TermHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TermHash(")?;
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        write!(f, ")")
    }
}

/// Computes the range index key for `term`.
///
/// # Errors
///
/// Returns [`CodecError::Unrepresentable`] if the term has no encoding.
pub fn term_hash(term: &Term) -> Result<TermHash, CodecError> {
    Ok(TermHash::from_body(codec::encode_body(term)?.as_bytes()))
}
