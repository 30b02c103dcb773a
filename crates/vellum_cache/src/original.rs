//! Persistent store of source images.
//!
//! Originals are immutable files under `<root>/originals/<name>/`, one per
//! key. Writing the same key again replaces the file (last write wins); every
//! write is staged in a sibling file and renamed, so readers never observe a
//! torn image.

use std::fs::{self, File};
use std::io::{Cursor, ErrorKind, Read};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{DynamicImage, ImageFormat};
use vellum_common::ImageKey;

use crate::coordination::{partial_path, remove_best_effort, sweep_partials};
use crate::dispatch::Executors;
use crate::error::CacheError;

/// A decoded image shared between every waiter that asked for it.
pub type SharedImage = Arc<DynamicImage>;

/// Bytes read to identify an image format.
const SNIFF_LEN: u64 = 64;

/// Longest identifier used verbatim as a file name.
const MAX_VERBATIM_NAME: usize = 200;

/// Why [`OriginalStore::put_file`] skipped a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The path is missing or not a regular file.
    NotAFile,
    /// The content is not a recognized image format.
    NotAnImage,
}

/// Result of [`OriginalStore::put_file`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The file was copied into the store.
    Stored,
    /// The file was skipped without error.
    Ignored(IgnoreReason),
    /// Copying failed; the store is unchanged.
    Failed,
}

/// File name for an original: the identifier itself when it is a plain
/// path component, otherwise its hash.
pub fn original_file_name<K: ImageKey>(key: &K) -> String {
    let id = key.identifier();
    let plain = !id.is_empty()
        && id.len() <= MAX_VERBATIM_NAME
        && id != "."
        && id != ".."
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'));
    if plain {
        id
    } else {
        key.hashed_identifier()
    }
}

/// Store of source images keyed by `K`.
pub struct OriginalStore<K> {
    name: String,
    dir: PathBuf,
    executors: Executors,
    _key: PhantomData<fn(&K)>,
}

impl<K: ImageKey> OriginalStore<K> {
    /// Opens the store at `dir`, creating the directory if needed.
    pub fn open(
        name: impl Into<String>,
        dir: impl Into<PathBuf>,
        executors: Executors,
    ) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;
        Ok(Self {
            name: name.into(),
            dir,
            executors,
            _key: PhantomData,
        })
    }

    /// The store name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The directory holding originals.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where the original for `key` lives.
    pub fn path_for(&self, key: &K) -> PathBuf {
        self.dir.join(original_file_name(key))
    }

    /// Returns `true` if an original for `key` is on disk.
    pub fn contains(&self, key: &K) -> bool {
        self.path_for(key).is_file()
    }

    /// Copies the image at `source` into the store under `key`.
    ///
    /// The format is identified from the file's leading bytes, never its
    /// extension. Missing files, directories and non-images are skipped.
    pub fn put_file(&self, source: &Path, key: &K) -> PutOutcome {
        match fs::metadata(source) {
            Ok(meta) if meta.is_file() => {}
            _ => {
                tracing::debug!(path = %source.display(), "not a regular file; ignoring");
                return PutOutcome::Ignored(IgnoreReason::NotAFile);
            }
        }

        match sniff_format(source) {
            Ok(Some(format)) => {
                tracing::debug!(path = %source.display(), ?format, "importing original");
            }
            Ok(None) => {
                tracing::debug!(path = %source.display(), "not an image; ignoring");
                return PutOutcome::Ignored(IgnoreReason::NotAnImage);
            }
            Err(e) => {
                tracing::warn!(path = %source.display(), error = %e, "failed to read original");
                return PutOutcome::Failed;
            }
        }

        let dest = self.path_for(key);
        let staged = partial_path(&dest);
        let copied = fs::copy(source, &staged)
            .map_err(|e| CacheError::io(&staged, e))
            .and_then(|_| fs::rename(&staged, &dest).map_err(|e| CacheError::io(&dest, e)));
        match copied {
            Ok(()) => PutOutcome::Stored,
            Err(e) => {
                remove_best_effort(&staged);
                tracing::warn!(error = %e, "failed to store original");
                PutOutcome::Failed
            }
        }
    }

    /// Encodes `image` as PNG and stores it under `key`, blocking the caller.
    pub fn store_image(&self, image: &DynamicImage, key: &K) -> Result<(), CacheError> {
        let mut encoded = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut encoded), ImageFormat::Png)
            .map_err(|e| CacheError::Encode {
                reason: e.to_string(),
            })?;

        let dest = self.path_for(key);
        let staged = partial_path(&dest);
        let written = fs::write(&staged, &encoded)
            .map_err(|e| CacheError::io(&staged, e))
            .and_then(|()| fs::rename(&staged, &dest).map_err(|e| CacheError::io(&dest, e)));
        if written.is_err() {
            remove_best_effort(&staged);
        }
        written
    }

    /// Decodes the original for `key`, guessing the format from content.
    pub fn get(&self, key: &K) -> Option<SharedImage> {
        let path = self.path_for(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "failed to read original");
                return None;
            }
        };
        match image::load_from_memory(&bytes) {
            Ok(image) => Some(Arc::new(image)),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "failed to decode original");
                None
            }
        }
    }

    /// Deletes the original for `key`. Returns `true` if one was removed.
    pub fn remove(&self, key: &K) -> bool {
        remove_best_effort(&self.path_for(key))
    }

    /// Deletes every original. Returns how many files were removed.
    pub fn purge(&self) -> Result<usize, CacheError> {
        sweep_partials(&self.dir);
        let entries = fs::read_dir(&self.dir).map_err(|e| CacheError::io(&self.dir, e))?;
        let removed = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
            .filter(|entry| remove_best_effort(&entry.path()))
            .count();
        tracing::info!(store = %self.name, removed, "purged originals");
        Ok(removed)
    }

    /// Stores `image` under `key` on the worker pool, then reports success
    /// to `completion` on the completion context.
    pub fn put_image(
        self: &Arc<Self>,
        image: SharedImage,
        key: K,
        completion: impl FnOnce(bool) + Send + 'static,
    ) {
        let store = Arc::clone(self);
        self.executors.pool.spawn(move || {
            let stored = match store.store_image(&image, &key) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(key = %key.identifier(), error = %e, "failed to store original");
                    false
                }
            };
            store.executors.complete(move || completion(stored));
        });
    }
}

fn sniff_format(path: &Path) -> std::io::Result<Option<ImageFormat>> {
    let mut head = Vec::with_capacity(SNIFF_LEN as usize);
    File::open(path)?.take(SNIFF_LEN).read_to_end(&mut head)?;
    Ok(image::guess_format(&head).ok())
}
