//! High-level cache orchestrator.
//!
//! The `ImageCache` type wires the original store, the data source and the
//! render store to the directories and options described by a
//! [`CacheConfig`], sharing one worker pool and one completion context.

use std::num::NonZeroUsize;
use std::sync::Arc;

use vellum_common::ImageKey;
use vellum_config::{resolve_paths, CacheConfig, ResolvedPaths};

use crate::dispatch::{CompletionContext, Executors, WorkerPool};
use crate::error::CacheError;
use crate::original::OriginalStore;
use crate::render::{RenderOptions, RenderStore};
use crate::source::{DataSource, OriginalProvider};
use crate::surface::Renderer;

/// An original store and a render cache sharing one set of executors.
pub struct ImageCache<K: ImageKey> {
    /// Resolved persistence directories.
    paths: ResolvedPaths,

    /// Source images.
    originals: Arc<OriginalStore<K>>,

    /// Coalescing access to originals.
    source: DataSource<K>,

    /// Rendered, memory-mapped artifacts.
    renders: RenderStore<K>,

    /// Worker pool and completion context.
    executors: Executors,
}

impl<K: ImageKey> ImageCache<K> {
    /// Opens the cache at the directories `config` resolves to.
    pub fn open(
        config: &CacheConfig,
        provider: Arc<dyn OriginalProvider<K>>,
        renderer: Arc<dyn Renderer>,
        context: Arc<dyn CompletionContext>,
    ) -> Result<Self, CacheError> {
        let paths = resolve_paths(config)?;
        Self::open_at(config, paths, provider, renderer, context)
    }

    /// Opens the cache at explicit directories.
    ///
    /// Fails if a directory cannot be created or the worker pool cannot
    /// start; a cache is never returned half-configured.
    pub fn open_at(
        config: &CacheConfig,
        paths: ResolvedPaths,
        provider: Arc<dyn OriginalProvider<K>>,
        renderer: Arc<dyn Renderer>,
        context: Arc<dyn CompletionContext>,
    ) -> Result<Self, CacheError> {
        let pool = WorkerPool::new(config.workers.threads)?;
        let executors = Executors::new(pool, context);

        let originals = Arc::new(OriginalStore::open(
            config.storage.originals.clone(),
            paths.originals_dir.clone(),
            executors.clone(),
        )?);
        let source = DataSource::new(Arc::clone(&originals), provider, executors.clone());
        let renders = RenderStore::new(
            config.storage.renders.clone(),
            paths.renders_dir.clone(),
            source.clone(),
            renderer,
            render_options(config),
        )?;

        tracing::debug!(
            originals = %paths.originals_dir.display(),
            renders = %paths.renders_dir.display(),
            threads = executors.pool.threads(),
            "opened image cache"
        );

        Ok(Self {
            paths,
            originals,
            source,
            renders,
            executors,
        })
    }

    /// The resolved directories.
    pub fn paths(&self) -> &ResolvedPaths {
        &self.paths
    }

    /// The original store.
    pub fn originals(&self) -> &Arc<OriginalStore<K>> {
        &self.originals
    }

    /// The data source.
    pub fn source(&self) -> &DataSource<K> {
        &self.source
    }

    /// The render store.
    pub fn renders(&self) -> &RenderStore<K> {
        &self.renders
    }

    /// The shared executors.
    pub fn executors(&self) -> &Executors {
        &self.executors
    }
}

/// Render options described by `config`.
pub fn render_options(config: &CacheConfig) -> RenderOptions {
    RenderOptions {
        opaque: config.render.opaque,
        max_mapped_entries: config.render.max_mapped_entries.and_then(NonZeroUsize::new),
        purge_existing: config.storage.purge_renders_on_start,
    }
}
