//! Digests of image identifiers, used wherever a key becomes a file name.

use std::fmt;

/// XXH3-128 digest of an image identifier.
///
/// Displays as 32 lowercase hex digits, so it is always a valid single path
/// component regardless of what the identifier contains.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyDigest(u128);

impl KeyDigest {
    /// Digests an identifier's UTF-8 bytes.
    pub fn of(identifier: &str) -> Self {
        Self(xxhash_rust::xxh3::xxh3_128(identifier.as_bytes()))
    }

    /// The raw 128-bit value.
    pub fn value(self) -> u128 {
        self.0
    }
}

impl fmt::Display for KeyDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl fmt::Debug for KeyDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyDigest({:08x}..)", self.0 >> 96)
    }
}
