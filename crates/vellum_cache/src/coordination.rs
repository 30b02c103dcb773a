//! Cross-process coordination for artifact files.
//!
//! Each artifact path has a lock file under the store's `.locks/` directory.
//! Construction holds it exclusively; read-mapping holds it shared, so a
//! reader in another process never maps a file mid-replacement. New content
//! is always written to a sibling `.partial` file and renamed into place.
//!
//! Lock files are removed together with their artifact, while held
//! exclusively. A waiter that wakes up holding an unlinked lock file retries
//! on the current one.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use fs4::FileExt;

use crate::error::CacheError;

/// Name of the lock directory inside a store directory.
pub const LOCKS_DIR: &str = ".locks";

static PARTIAL_SEQ: AtomicU64 = AtomicU64::new(0);

/// Hands out advisory locks keyed by artifact file name.
#[derive(Debug, Clone)]
pub struct FileCoordinator {
    locks_dir: PathBuf,
}

/// An advisory lock held until drop.
#[derive(Debug)]
pub struct CoordinationGuard {
    file: File,
    path: PathBuf,
}

impl FileCoordinator {
    /// Creates the lock directory if needed.
    pub fn new(locks_dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let locks_dir = locks_dir.into();
        fs::create_dir_all(&locks_dir).map_err(|e| CacheError::io(&locks_dir, e))?;
        Ok(Self { locks_dir })
    }

    /// The directory holding lock files.
    pub fn locks_dir(&self) -> &Path {
        &self.locks_dir
    }

    /// Blocks until `target` can be written exclusively.
    pub fn exclusive(&self, target: &Path) -> Result<CoordinationGuard, CacheError> {
        self.acquire(target, |file| file.lock_exclusive())
    }

    /// Blocks until `target` can be read without a writer replacing it.
    pub fn shared(&self, target: &Path) -> Result<CoordinationGuard, CacheError> {
        self.acquire(target, |file| FileExt::lock_shared(file))
    }

    /// Removes every lock file in the lock directory, each under its own
    /// exclusive lock. Returns how many were removed.
    pub fn prune(&self) -> Result<usize, CacheError> {
        let entries =
            fs::read_dir(&self.locks_dir).map_err(|e| CacheError::io(&self.locks_dir, e))?;
        let mut removed = 0;
        for entry in entries.filter_map(Result::ok) {
            let name = entry.file_name();
            let Some(target) = name.to_str().and_then(|n| n.strip_suffix(".lock")) else {
                continue;
            };
            if self.exclusive(Path::new(target))?.remove() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn acquire(
        &self,
        target: &Path,
        lock: impl Fn(&File) -> std::io::Result<()>,
    ) -> Result<CoordinationGuard, CacheError> {
        loop {
            let guard = self.open(target)?;
            lock(&guard.file).map_err(|e| CacheError::io(&guard.path, e))?;
            if guard.is_current() {
                return Ok(guard);
            }
        }
    }

    fn lock_path(&self, target: &Path) -> PathBuf {
        let mut name = target
            .file_name()
            .map(OsString::from)
            .unwrap_or_else(|| OsString::from("artifact"));
        name.push(".lock");
        self.locks_dir.join(name)
    }

    fn open(&self, target: &Path) -> Result<CoordinationGuard, CacheError> {
        let path = self.lock_path(target);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| CacheError::io(&path, e))?;
        Ok(CoordinationGuard { file, path })
    }
}

impl CoordinationGuard {
    /// The lock file backing this guard.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Deletes the lock file, then releases the lock. Returns `true` if the
    /// file was removed.
    pub fn remove(self) -> bool {
        remove_best_effort(&self.path)
    }

    /// Returns `true` while the held file is still the one at `path`.
    #[cfg(unix)]
    fn is_current(&self) -> bool {
        use std::os::unix::fs::MetadataExt;
        match (self.file.metadata(), fs::metadata(&self.path)) {
            (Ok(held), Ok(linked)) => held.dev() == linked.dev() && held.ino() == linked.ino(),
            _ => false,
        }
    }

    /// Open files cannot be deleted here, so the held file is always current.
    #[cfg(not(unix))]
    fn is_current(&self) -> bool {
        true
    }
}

impl Drop for CoordinationGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::debug!(path = %self.path.display(), error = %e, "failed to release lock");
        }
    }
}

/// Removes `path`, logging anything other than "already gone".
///
/// Returns `true` if a file was removed.
pub fn remove_best_effort(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "best-effort removal failed");
            false
        }
    }
}

/// A unique hidden sibling of `target` to stage new content in.
pub fn partial_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let seq = PARTIAL_SEQ.fetch_add(1, Ordering::Relaxed);
    target.with_file_name(format!(".{name}.{}.{seq}.partial", std::process::id()))
}

/// Returns `true` for staging files left behind by an interrupted write.
pub fn is_partial(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.') && n.ends_with(".partial"))
}

/// Deletes staging files left in `dir` by interrupted writes. Returns how
/// many were removed.
pub fn sweep_partials(dir: &Path) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| is_partial(path))
        .filter(|path| remove_best_effort(path))
        .count()
}
