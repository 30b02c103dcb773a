//! Shared fixtures for the render cache integration suites.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use image::{DynamicImage, Rgba, RgbaImage};
use parking_lot::Mutex;
use tempfile::TempDir;
use vellum_cache::{
    ImageCache, MainContext, MappedImage, OriginalProvider, ProviderReply, Renderer, Surface,
};
use vellum_common::{LogicalSize, Scale};
use vellum_config::{load_config_from_str, resolve_paths_with, CacheConfig};

pub const TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Provider: parks replies until the test releases them
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct GatedProvider {
    replies: Mutex<Vec<(String, ProviderReply)>>,
    calls: AtomicUsize,
}

impl OriginalProvider<String> for GatedProvider {
    fn produce(&self, key: &String, reply: ProviderReply) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.replies.lock().push((key.clone(), reply));
    }
}

impl GatedProvider {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn parked(&self) -> usize {
        self.replies.lock().len()
    }

    /// Resolves every parked reply with `image`.
    pub fn release_all(&self, image: &DynamicImage) {
        let replies = std::mem::take(&mut *self.replies.lock());
        for (_, reply) in replies {
            reply.succeed(image.clone());
        }
    }

    /// Drops every parked reply unresolved.
    pub fn drop_all(&self) {
        self.replies.lock().clear();
    }
}

// ---------------------------------------------------------------------------
// Renderer: counts draws and copies a solid source color
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct CountingRenderer {
    draws: AtomicUsize,
    panics_left: AtomicUsize,
    /// Overrides the drawn word when set.
    word: Mutex<Option<u32>>,
    /// Writes this byte straight into every row when set.
    raw_byte: Mutex<Option<u8>>,
}

impl CountingRenderer {
    pub fn draws(&self) -> usize {
        self.draws.load(Ordering::SeqCst)
    }

    pub fn panic_next(&self, times: usize) {
        self.panics_left.store(times, Ordering::SeqCst);
    }

    pub fn draw_word(&self, word: u32) {
        *self.word.lock() = Some(word);
    }

    pub fn draw_raw_rows(&self, byte: u8) {
        *self.raw_byte.lock() = Some(byte);
    }
}

impl Renderer for CountingRenderer {
    fn draw(&self, source: &DynamicImage, surface: &mut Surface<'_>) {
        self.draws.fetch_add(1, Ordering::SeqCst);
        let should_panic = self
            .panics_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_panic {
            panic!("renderer exploded");
        }
        // Widen the window in which concurrent requests can pile up.
        std::thread::sleep(Duration::from_millis(20));
        if let Some(byte) = *self.raw_byte.lock() {
            for y in 0..surface.height() {
                if let Some(row) = surface.row_mut(y) {
                    row.fill(byte);
                }
            }
            return;
        }
        match *self.word.lock() {
            Some(word) => surface.fill(word),
            None => {
                let px = source.to_rgba8().get_pixel(0, 0).0;
                for y in 0..surface.height() {
                    for x in 0..surface.width() {
                        surface.blend_pixel(x, y, px);
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub dir: TempDir,
    pub context: Arc<MainContext>,
    pub provider: Arc<GatedProvider>,
    pub renderer: Arc<CountingRenderer>,
    pub cache: ImageCache<String>,
}

pub type Delivery = (String, Option<MappedImage>, bool);

impl Harness {
    pub fn new(toml: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        Self::in_dir(dir, toml)
    }

    pub fn in_dir(dir: TempDir, toml: &str) -> Self {
        let config = load_config_from_str(toml).unwrap();
        let context = MainContext::spawn("vellum-test-main").unwrap();
        let provider = Arc::new(GatedProvider::default());
        let renderer = Arc::new(CountingRenderer::default());
        let cache = open(&config, dir.path(), &context, &provider, &renderer);
        Self {
            dir,
            context,
            provider,
            renderer,
            cache,
        }
    }

    /// Reopens the cache over the same directory with fresh in-memory state.
    pub fn reopen(self, toml: &str) -> Self {
        let Harness { dir, .. } = self;
        Self::in_dir(dir, toml)
    }

    /// Issues a request. A synchronous hit is returned directly; otherwise the
    /// delivery arrives on the returned channel.
    pub fn request(
        &self,
        key: &str,
        size: LogicalSize,
        scale: Scale,
    ) -> Result<MappedImage, mpsc::Receiver<Delivery>> {
        let (tx, rx) = mpsc::channel();
        let context = Arc::clone(&self.context);
        let hit = self
            .cache
            .renders()
            .get(key.to_string(), size, scale, move |key, image| {
                let _ = tx.send((key, image, context.is_current()));
            });
        hit.ok_or(rx)
    }

    /// Requests and waits for the result either way.
    pub fn fetch(&self, key: &str, size: LogicalSize, scale: Scale) -> Option<MappedImage> {
        match self.request(key, size, scale) {
            Ok(hit) => Some(hit),
            Err(rx) => rx.recv_timeout(TIMEOUT).unwrap().1,
        }
    }

    pub fn store_original(&self, key: &str, image: &DynamicImage) {
        self.cache
            .originals()
            .store_image(image, &key.to_string())
            .unwrap();
    }
}

fn open(
    config: &CacheConfig,
    root: &Path,
    context: &Arc<MainContext>,
    provider: &Arc<GatedProvider>,
    renderer: &Arc<CountingRenderer>,
) -> ImageCache<String> {
    let paths = resolve_paths_with(config, Some(root.to_path_buf())).unwrap();
    ImageCache::open_at(
        config,
        paths,
        provider.clone(),
        renderer.clone(),
        context.clone(),
    )
    .unwrap()
}

pub fn solid(r: u8, g: u8, b: u8, a: u8) -> DynamicImage {
    DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([r, g, b, a])))
}

pub fn size(w: f64, h: f64) -> LogicalSize {
    LogicalSize::new(w, h)
}

pub fn scale(s: f64) -> Scale {
    Scale::new(s).unwrap()
}

pub fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(2));
    }
}
