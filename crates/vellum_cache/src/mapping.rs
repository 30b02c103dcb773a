//! Read-only mappings of artifact files and the per-store cache holding them.

use std::fmt;
use std::fs::File;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lru::LruCache;
use memmap2::{Mmap, MmapOptions};
use parking_lot::Mutex;

use crate::coordination::FileCoordinator;
use crate::error::CacheError;
use crate::header::{HeaderError, RenderHeader, HEADER_LEN};

/// An artifact file mapped read-only, validated against the header it was
/// requested with.
///
/// The mapping and the file handle are released together when the last
/// `Arc` to this value drops.
pub struct MappedArtifact {
    header: RenderHeader,
    map: Mmap,
    _file: File,
    path: PathBuf,
}

impl MappedArtifact {
    /// Maps `path` and checks that it holds exactly the artifact `expected`
    /// describes.
    pub fn open(path: &Path, expected: &RenderHeader) -> Result<Self, CacheError> {
        let file = File::open(path).map_err(|e| CacheError::io(path, e))?;
        Self::from_file(file, path, expected)
    }

    fn from_file(file: File, path: &Path, expected: &RenderHeader) -> Result<Self, CacheError> {
        let actual = file.metadata().map_err(|e| CacheError::io(path, e))?.len();
        if actual != expected.total_len() {
            return Err(CacheError::LengthMismatch {
                path: path.to_path_buf(),
                expected: expected.total_len(),
                actual,
            });
        }
        let len = usize::try_from(actual).map_err(|_| CacheError::LengthMismatch {
            path: path.to_path_buf(),
            expected: expected.total_len(),
            actual,
        })?;

        // SAFETY: artifact files are never modified in place. Writers stage
        // new content in a sibling file and rename it over the path, so the
        // inode behind this mapping keeps its bytes for the mapping's lifetime.
        let map = unsafe { MmapOptions::new().len(len).map(&file) }.map_err(|e| {
            CacheError::Map {
                path: path.to_path_buf(),
                source: e,
            }
        })?;

        let header = RenderHeader::decode(&map).map_err(|source| CacheError::InvalidHeader {
            path: path.to_path_buf(),
            source,
        })?;
        if header != *expected {
            return Err(CacheError::InvalidHeader {
                path: path.to_path_buf(),
                source: HeaderError::Mismatch,
            });
        }

        Ok(Self {
            header,
            map,
            _file: file,
            path: path.to_path_buf(),
        })
    }

    /// The validated header.
    pub fn header(&self) -> &RenderHeader {
        &self.header
    }

    /// The whole file, header included.
    pub fn bytes(&self) -> &[u8] {
        &self.map
    }

    /// The pixel region following the header.
    pub fn pixels(&self) -> &[u8] {
        &self.map[HEADER_LEN..]
    }

    /// The mapped file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Debug for MappedArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedArtifact")
            .field("path", &self.path)
            .field("header", &self.header)
            .finish()
    }
}

/// Memoized mappings keyed by artifact path.
///
/// Unbounded unless built with a capacity, in which case the least recently
/// used mapping is dropped first. Dropping an entry only releases the cache's
/// reference; callers holding the `Arc` keep a valid mapping.
pub struct MappingCache {
    entries: Mutex<LruCache<PathBuf, Arc<MappedArtifact>>>,
}

impl MappingCache {
    /// Creates a cache holding at most `capacity` mappings, or any number.
    pub fn new(capacity: Option<NonZeroUsize>) -> Self {
        let entries = match capacity {
            Some(cap) => LruCache::new(cap),
            None => LruCache::unbounded(),
        };
        Self {
            entries: Mutex::new(entries),
        }
    }

    /// Returns the cached mapping for `path`, marking it recently used.
    pub fn lookup(&self, path: &Path) -> Option<Arc<MappedArtifact>> {
        self.entries.lock().get(path).cloned()
    }

    /// Maps `path` under a shared lock and caches it, or returns the cached
    /// mapping if it was made for `expected`.
    ///
    /// A file written by a store with other options can carry a different
    /// header; a cached mapping with another header is replaced.
    pub fn load(
        &self,
        path: &Path,
        expected: &RenderHeader,
        coordinator: &FileCoordinator,
    ) -> Result<Arc<MappedArtifact>, CacheError> {
        if let Some(hit) = self.lookup(path).filter(|hit| hit.header() == expected) {
            return Ok(hit);
        }
        let artifact = {
            let _shared = coordinator.shared(path)?;
            MappedArtifact::open(path, expected)?
        };
        Ok(self.insert(Arc::new(artifact)))
    }

    /// Like [`load`](Self::load), treating every failure as a miss.
    pub fn mapping_for(
        &self,
        path: &Path,
        expected: &RenderHeader,
        coordinator: &FileCoordinator,
    ) -> Option<Arc<MappedArtifact>> {
        match self.load(path, expected, coordinator) {
            Ok(artifact) => Some(artifact),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "artifact not mappable");
                None
            }
        }
    }

    /// Caches `artifact` unless an equivalent mapping of its path is already
    /// present, returning whichever entry ends up cached.
    fn insert(&self, artifact: Arc<MappedArtifact>) -> Arc<MappedArtifact> {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(artifact.path()) {
            if existing.header() == artifact.header() {
                return Arc::clone(existing);
            }
        }
        entries.put(artifact.path().to_path_buf(), Arc::clone(&artifact));
        artifact
    }

    /// Drops the cached mapping for `path`.
    pub fn invalidate(&self, path: &Path) -> bool {
        self.entries.lock().pop(path).is_some()
    }

    /// Drops every cached mapping.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of cached mappings.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
