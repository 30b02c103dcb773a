//! The render cache: size- and scale-specific artifacts, memory-mapped.
//!
//! A [`RenderStore`] maps `(key, size, scale)` to a file in its directory.
//! Requests that hit the mapping cache are answered synchronously. Misses are
//! queued on the key's serial lane, where the job first looks for an artifact
//! that is already mapped or on disk and only then fetches the original and
//! renders it:
//!
//! 1. invalidate the cached mapping and take the exclusive file lock;
//! 2. remove the old file and create a staging file of `total_len` bytes;
//! 3. map it read-write, write the header, prepare the background and draw;
//! 4. flush, unmap and rename the staging file onto the artifact path;
//! 5. release the lock and map the result read-only.
//!
//! Every failure along the way ends the request with "no image".

use std::any::Any;
use std::fs::{self, OpenOptions};
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use image::DynamicImage;
use memmap2::MmapOptions;
use tokio::sync::oneshot;
use vellum_common::{ArtifactKey, ImageKey, LogicalSize, PixelSize, Scale};

use crate::coordination::{
    is_partial, partial_path, remove_best_effort, sweep_partials, FileCoordinator, LOCKS_DIR,
};
use crate::error::CacheError;
use crate::header::{RenderHeader, HEADER_LEN};
use crate::lanes::{LaneGuard, SerialLanes};
use crate::mapping::{MappedArtifact, MappingCache};
use crate::original::SharedImage;
use crate::source::DataSource;
use crate::surface::{Geometry, Renderer, Surface};

/// Behavior switches for a [`RenderStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    /// Render opaque artifacts (alpha ignored, black background).
    pub opaque: bool,
    /// Bound on cached mappings; `None` keeps every mapping.
    pub max_mapped_entries: Option<NonZeroUsize>,
    /// Delete existing artifacts when the store is created.
    pub purge_existing: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            opaque: true,
            max_mapped_entries: None,
            purge_existing: false,
        }
    }
}

/// A rendered artifact ready for display.
///
/// Cheap to clone; the mapping stays valid while any clone is alive, even
/// after the store drops or replaces it.
#[derive(Debug, Clone)]
pub struct MappedImage {
    artifact: Arc<MappedArtifact>,
}

impl MappedImage {
    fn new(artifact: Arc<MappedArtifact>) -> Self {
        Self { artifact }
    }

    /// The artifact header.
    pub fn header(&self) -> &RenderHeader {
        self.artifact.header()
    }

    /// Bitmap dimensions.
    pub fn pixel_size(&self) -> PixelSize {
        self.header().pixel_size()
    }

    /// Logical size the bitmap was rendered for.
    pub fn size(&self) -> LogicalSize {
        self.header().size()
    }

    /// Scale the bitmap was rendered at.
    pub fn scale(&self) -> Scale {
        self.header().scale()
    }

    /// The pixel region, row padding included.
    pub fn pixels(&self) -> &[u8] {
        self.artifact.pixels()
    }

    /// Pixel bytes of row `y`, without padding.
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        let size = self.pixel_size();
        if y >= size.height {
            return None;
        }
        let start = y as usize * self.header().bytes_per_row() as usize;
        self.pixels().get(start..start + size.width as usize * 4)
    }

    /// The alpha-first pixel word at `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.pixel_size().width {
            return None;
        }
        let at = x as usize * 4;
        let bytes: [u8; 4] = self.row(y)?.get(at..at + 4)?.try_into().ok()?;
        Some(u32::from_ne_bytes(bytes))
    }

    /// The artifact file.
    pub fn path(&self) -> &Path {
        self.artifact.path()
    }

    /// Returns `true` if both handles share one mapping.
    pub fn same_mapping(&self, other: &MappedImage) -> bool {
        Arc::ptr_eq(&self.artifact, &other.artifact)
    }
}

type Completion<K> = Box<dyn FnOnce(K, Option<MappedImage>) + Send + 'static>;

/// Render cache over a [`DataSource`] of originals.
pub struct RenderStore<K: ImageKey> {
    inner: Arc<RenderInner<K>>,
}

impl<K: ImageKey> Clone for RenderStore<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct RenderInner<K: ImageKey> {
    name: String,
    dir: PathBuf,
    source: DataSource<K>,
    renderer: Arc<dyn Renderer>,
    options: RenderOptions,
    mappings: MappingCache,
    coordinator: FileCoordinator,
    lanes: SerialLanes<K>,
    renders_completed: AtomicU64,
}

impl<K: ImageKey> RenderStore<K> {
    /// Opens the render store at `dir`, creating it if needed.
    pub fn new(
        name: impl Into<String>,
        dir: impl Into<PathBuf>,
        source: DataSource<K>,
        renderer: Arc<dyn Renderer>,
        options: RenderOptions,
    ) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;
        let coordinator = FileCoordinator::new(dir.join(LOCKS_DIR))?;
        let lanes = SerialLanes::new(source.executors().pool.clone());
        let store = Self {
            inner: Arc::new(RenderInner {
                name: name.into(),
                dir,
                source,
                renderer,
                options,
                mappings: MappingCache::new(options.max_mapped_entries),
                coordinator,
                lanes,
                renders_completed: AtomicU64::new(0),
            }),
        };
        if options.purge_existing {
            // Staging files may belong to another process's in-flight writes.
            store.purge_artifacts(false)?;
        }
        Ok(store)
    }

    /// Returns the artifact if it is already mapped. Otherwise returns `None`
    /// and later passes the result to `completion` on the completion context.
    ///
    /// Invalid sizes or scales complete with `None`, in order with the key's
    /// other queued requests.
    pub fn get(
        &self,
        key: K,
        size: LogicalSize,
        scale: Scale,
        completion: impl FnOnce(K, Option<MappedImage>) + Send + 'static,
    ) -> Option<MappedImage> {
        let header = match RenderHeader::new(size, scale, self.inner.options.opaque) {
            Ok(header) => header,
            Err(e) => {
                tracing::debug!(key = %key.identifier(), error = %e, "invalid render request");
                let inner = Arc::clone(&self.inner);
                let completion: Completion<K> = Box::new(completion);
                self.inner.lanes.submit(key.clone(), move |guard| {
                    inner.deliver(guard, key, None, completion)
                });
                return None;
            }
        };
        let path = self.artifact_path(&ArtifactKey::new(key.clone(), size, scale));
        if let Some(hit) = self.inner.mappings.lookup(&path) {
            if *hit.header() == header {
                return Some(MappedImage::new(hit));
            }
        }

        let inner = Arc::clone(&self.inner);
        let completion: Completion<K> = Box::new(completion);
        self.inner.lanes.submit(key.clone(), move |guard| {
            RenderInner::produce(inner, guard, key, path, header, completion)
        });
        None
    }

    /// Async form of [`get`](Self::get).
    pub async fn get_async(&self, key: K, size: LogicalSize, scale: Scale) -> Option<MappedImage> {
        let (tx, rx) = oneshot::channel();
        if let Some(hit) = self.get(key, size, scale, move |_, image| {
            let _ = tx.send(image);
        }) {
            return Some(hit);
        }
        rx.await.unwrap_or(None)
    }

    /// Where the artifact for `artifact` lives.
    pub fn artifact_path(&self, artifact: &ArtifactKey<K>) -> PathBuf {
        self.inner.dir.join(artifact.file_name())
    }

    /// Drops the mapping for one artifact and deletes its file.
    pub fn invalidate(&self, key: K, size: LogicalSize, scale: Scale) -> Result<bool, CacheError> {
        let path = self.artifact_path(&ArtifactKey::new(key, size, scale));
        self.inner.mappings.invalidate(&path);
        let lock = self.inner.coordinator.exclusive(&path)?;
        let removed = remove_best_effort(&path);
        lock.remove();
        Ok(removed)
    }

    /// Drops every cached mapping. Files stay on disk.
    pub fn invalidate_all(&self) {
        self.inner.mappings.clear();
    }

    /// Drops every mapping and deletes every artifact, its lock file and any
    /// staging files. Returns how many artifacts were removed.
    pub fn purge(&self) -> Result<usize, CacheError> {
        self.purge_artifacts(true)
    }

    fn purge_artifacts(&self, sweep: bool) -> Result<usize, CacheError> {
        self.inner.mappings.clear();
        let dir = &self.inner.dir;
        if sweep {
            sweep_partials(dir);
        }
        let entries = fs::read_dir(dir).map_err(|e| CacheError::io(dir, e))?;
        let mut removed = 0;
        for entry in entries.filter_map(Result::ok) {
            let path = entry.path();
            if !entry.file_type().is_ok_and(|t| t.is_file()) || is_partial(&path) {
                continue;
            }
            let lock = self.inner.coordinator.exclusive(&path)?;
            if remove_best_effort(&path) {
                removed += 1;
            }
            lock.remove();
        }
        let locks = self.inner.coordinator.prune()?;
        tracing::info!(store = %self.inner.name, removed, locks, "purged render cache");
        Ok(removed)
    }

    /// Number of cached mappings.
    pub fn mapped_count(&self) -> usize {
        self.inner.mappings.len()
    }

    /// Number of artifacts this store has rendered.
    pub fn renders_completed(&self) -> u64 {
        self.inner.renders_completed.load(Ordering::Relaxed)
    }

    /// Number of keys with queued or running work.
    pub fn active_lanes(&self) -> usize {
        self.inner.lanes.active_lanes()
    }

    /// The store name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The artifact directory.
    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// Options the store was built with.
    pub fn options(&self) -> &RenderOptions {
        &self.inner.options
    }

    /// The data source originals come from.
    pub fn source(&self) -> &DataSource<K> {
        &self.inner.source
    }
}

impl<K: ImageKey> RenderInner<K> {
    /// Runs on the key's lane. `guard` is released once the completion has
    /// been dispatched, so queued requests observe this job's artifact.
    fn produce(
        this: Arc<Self>,
        guard: LaneGuard<K>,
        key: K,
        path: PathBuf,
        header: RenderHeader,
        completion: Completion<K>,
    ) {
        if let Some(existing) = this.mappings.mapping_for(&path, &header, &this.coordinator) {
            this.deliver(guard, key, Some(MappedImage::new(existing)), completion);
            return;
        }

        let inner = Arc::clone(&this);
        let fetch_key = key.clone();
        this.source.fetch(
            fetch_key,
            Box::new(move |original: Option<SharedImage>| {
                let pool = inner.source.executors().pool.clone();
                pool.spawn(move || {
                    let image = original.and_then(|source| {
                        match inner.construct(&path, &header, &source) {
                            Ok(artifact) => Some(MappedImage::new(artifact)),
                            Err(e) => {
                                tracing::warn!(
                                    key = %key.identifier(),
                                    path = %path.display(),
                                    error = %e,
                                    "render failed"
                                );
                                None
                            }
                        }
                    });
                    inner.deliver(guard, key, image, completion);
                });
            }),
        );
    }

    fn deliver(
        &self,
        guard: LaneGuard<K>,
        key: K,
        image: Option<MappedImage>,
        completion: Completion<K>,
    ) {
        self.source
            .executors()
            .complete(move || completion(key, image));
        drop(guard);
    }

    fn construct(
        &self,
        path: &Path,
        header: &RenderHeader,
        source: &DynamicImage,
    ) -> Result<Arc<MappedArtifact>, CacheError> {
        self.mappings.invalidate(path);
        {
            // Held through the rename; the shared lock taken by `load` below
            // would block on it.
            let _lock = self.coordinator.exclusive(path)?;
            remove_best_effort(path);
            let staged = partial_path(path);
            let written = self
                .write_artifact(&staged, header, source)
                .and_then(|()| fs::rename(&staged, path).map_err(|e| CacheError::io(path, e)));
            if written.is_err() {
                remove_best_effort(&staged);
            }
            written?;
        }
        let artifact = self.mappings.load(path, header, &self.coordinator)?;
        self.renders_completed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(path = %path.display(), "rendered artifact");
        Ok(artifact)
    }

    fn write_artifact(
        &self,
        staged: &Path,
        header: &RenderHeader,
        source: &DynamicImage,
    ) -> Result<(), CacheError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(staged)
            .map_err(|e| CacheError::io(staged, e))?;
        file.set_len(header.total_len())
            .map_err(|e| CacheError::io(staged, e))?;

        // RenderHeader::new guarantees the length fits in usize.
        let len = header.total_len() as usize;
        // SAFETY: the staging file was just created with `create_new` and its
        // name is unique to this call; nothing else maps or writes it.
        let mut map = unsafe { MmapOptions::new().len(len).map_mut(&file) }.map_err(|e| {
            CacheError::Map {
                path: staged.to_path_buf(),
                source: e,
            }
        })?;

        header
            .encode_into(&mut map)
            .map_err(|source| CacheError::InvalidHeader {
                path: staged.to_path_buf(),
                source,
            })?;

        let mut surface = Surface::new(Geometry::from_header(header), &mut map[HEADER_LEN..])
            .ok_or_else(|| CacheError::Render {
                reason: "pixel region smaller than its geometry".to_string(),
            })?;
        surface.prepare_background();
        panic::catch_unwind(AssertUnwindSafe(|| {
            self.renderer.draw(source, &mut surface)
        }))
        .map_err(|payload| CacheError::Render {
            reason: panic_message(payload.as_ref()),
        })?;
        surface.seal_opaque();

        map.flush().map_err(|e| CacheError::io(staged, e))?;
        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("renderer panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("renderer panicked: {msg}")
    } else {
        "renderer panicked".to_string()
    }
}
