//! The capability application keys implement to be stored in the cache.

use std::hash::Hash;

use crate::hash::KeyDigest;

/// An application-supplied key identifying one source image.
///
/// Implementors only provide [`identifier`](Self::identifier); the hashed form
/// used for artifact filenames is derived from it. Two keys with the same
/// identifier are treated as the same image everywhere in the cache.
pub trait ImageKey: Clone + Eq + Hash + Send + Sync + 'static {
    /// A stable string identifying the image.
    fn identifier(&self) -> String;

    /// A stable, filesystem-safe digest of [`identifier`](Self::identifier).
    fn hashed_identifier(&self) -> String {
        KeyDigest::of(&self.identifier()).to_string()
    }
}

impl ImageKey for String {
    fn identifier(&self) -> String {
        self.clone()
    }
}

impl ImageKey for &'static str {
    fn identifier(&self) -> String {
        (*self).to_string()
    }
}

impl ImageKey for u64 {
    fn identifier(&self) -> String {
        self.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, PartialEq, Eq, Hash)]
    struct PhotoId {
        album: u32,
        index: u32,
    }

    impl ImageKey for PhotoId {
        fn identifier(&self) -> String {
            format!("album{}-photo{}", self.album, self.index)
        }
    }

    #[test]
    fn hashed_identifier_is_stable() {
        let key = PhotoId { album: 3, index: 9 };
        assert_eq!(key.hashed_identifier(), key.clone().hashed_identifier());
    }

    #[test]
    fn hashed_identifier_is_filename_safe() {
        let key = "https://example.com/a/b.png?size=large".to_string();
        let hashed = key.hashed_identifier();
        assert_eq!(hashed.len(), 32);
        assert!(hashed.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn equal_identifiers_hash_equal() {
        let a: String = "42".to_string();
        let b: u64 = 42;
        assert_eq!(a.hashed_identifier(), b.hashed_identifier());
    }

    #[test]
    fn distinct_identifiers_hash_differently() {
        let a = PhotoId { album: 1, index: 2 };
        let b = PhotoId { album: 2, index: 1 };
        assert_ne!(a.hashed_identifier(), b.hashed_identifier());
    }
}
