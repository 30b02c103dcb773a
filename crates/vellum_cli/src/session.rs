//! Shared helpers: configuration discovery and opening the cache.

use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use vellum_cache::{ImageCache, ManualContext, NoProvider, ResampleRenderer};
use vellum_config::{CacheConfig, CONFIG_FILE};

use crate::GlobalArgs;

/// An open cache whose completions are pumped by the command itself.
pub struct Session {
    /// The cache.
    pub cache: ImageCache<String>,
    /// Completion context drained by the command.
    pub context: Arc<ManualContext>,
}

/// Loads the configuration named by `--config`, else `./vellum.toml` when
/// present, else the defaults.
pub fn load_config(global: &GlobalArgs) -> Result<CacheConfig, Box<dyn std::error::Error>> {
    load_config_from(global, Path::new("."))
}

fn load_config_from(
    global: &GlobalArgs,
    cwd: &Path,
) -> Result<CacheConfig, Box<dyn std::error::Error>> {
    if let Some(path) = &global.config {
        return Ok(vellum_config::load_config_file(path)?);
    }
    if cwd.join(CONFIG_FILE).is_file() {
        return Ok(vellum_config::load_config(cwd)?);
    }
    Ok(CacheConfig::default())
}

/// Opens the cache described by the configuration. Originals come only from
/// the original store; nothing is fetched from elsewhere.
pub fn open(global: &GlobalArgs) -> Result<Session, Box<dyn std::error::Error>> {
    let config = load_config(global)?;
    let context = ManualContext::new();
    let cache = ImageCache::open(
        &config,
        Arc::new(NoProvider),
        Arc::new(ResampleRenderer::default()),
        context.clone(),
    )?;
    if global.verbose {
        eprintln!(
            "   Using originals at {} and renders at {}",
            cache.paths().originals_dir.display(),
            cache.paths().renders_dir.display()
        );
    }
    Ok(Session { cache, context })
}

impl Session {
    /// Drains the completion context until `start`'s callback delivers a value.
    ///
    /// `start` receives the sender to hand to the completion. Returns `None`
    /// if the callback is dropped without sending.
    pub fn wait_for<T: Send + 'static>(&self, start: impl FnOnce(mpsc::Sender<T>)) -> Option<T> {
        let (tx, rx) = mpsc::channel();
        start(tx);
        loop {
            self.context.run_pending();
            match rx.recv_timeout(Duration::from_millis(5)) {
                Ok(value) => return Some(value),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }
}
