//! The drawing surface handed to a [`Renderer`] and the default renderer.
//!
//! A surface borrows the pixel region of an artifact that is being
//! constructed. Pixels are 32-bit alpha-first words (`0xAARRGGBB`) stored in
//! host byte order, one row every `bytes_per_row` bytes. Writes outside the
//! bitmap are ignored, so a renderer can never touch memory past the buffer.

use image::imageops::{self, FilterType};
use image::DynamicImage;
use vellum_common::{LogicalSize, PixelSize, Scale};

use crate::header::{PixelLayout, RenderHeader, BITS_PER_COMPONENT, COMPONENTS};

const BYTES_PER_PIXEL: usize = 4;

/// Opaque black.
pub const OPAQUE_BLACK: u32 = 0xFF00_0000;

/// Packs components into an alpha-first pixel word.
pub fn pack_argb(a: u8, r: u8, g: u8, b: u8) -> u32 {
    u32::from_be_bytes([a, r, g, b])
}

/// Splits a pixel word into `[a, r, g, b]`.
pub fn unpack_argb(word: u32) -> [u8; 4] {
    word.to_be_bytes()
}

/// An axis-aligned logical-to-pixel transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    /// Horizontal scale.
    pub a: f64,
    /// Vertical scale; negative for bottom-up coordinates.
    pub d: f64,
    /// Horizontal offset in pixels.
    pub tx: f64,
    /// Vertical offset in pixels.
    pub ty: f64,
}

impl Transform {
    /// Logical origin at the top-left, y growing downwards.
    pub fn top_down(scale: Scale) -> Self {
        Self {
            a: scale.get(),
            d: scale.get(),
            tx: 0.0,
            ty: 0.0,
        }
    }

    /// Logical origin at the bottom-left, y growing upwards.
    pub fn bottom_up(scale: Scale, pixel_height: u32) -> Self {
        Self {
            a: scale.get(),
            d: -scale.get(),
            tx: 0.0,
            ty: f64::from(pixel_height),
        }
    }

    /// Maps a logical point to pixel coordinates.
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (self.a * x + self.tx, self.d * y + self.ty)
    }
}

/// A rectangle in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// Everything a renderer needs to know about the target bitmap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    /// Logical size being rendered.
    pub logical: LogicalSize,
    /// Device scale.
    pub scale: Scale,
    /// Bitmap dimensions.
    pub pixels: PixelSize,
    /// Row stride in bytes.
    pub bytes_per_row: usize,
    /// Components per pixel.
    pub components: u32,
    /// Bits per component.
    pub bits_per_component: u32,
    /// Pixel interpretation.
    pub layout: PixelLayout,
}

impl Geometry {
    /// Geometry described by an artifact header.
    pub fn from_header(header: &RenderHeader) -> Self {
        Self {
            logical: header.size(),
            scale: header.scale(),
            pixels: header.pixel_size(),
            // RenderHeader::new guarantees lengths fit in usize.
            bytes_per_row: header.bytes_per_row() as usize,
            components: COMPONENTS,
            bits_per_component: BITS_PER_COMPONENT,
            layout: header.layout(),
        }
    }

    /// Top-down logical-to-pixel transform.
    pub fn transform(&self) -> Transform {
        Transform::top_down(self.scale)
    }

    /// Bottom-up logical-to-pixel transform.
    pub fn bottom_up_transform(&self) -> Transform {
        Transform::bottom_up(self.scale, self.pixels.height)
    }

    /// The drawable area.
    pub fn clip_rect(&self) -> PixelRect {
        PixelRect {
            x: 0,
            y: 0,
            width: self.pixels.width,
            height: self.pixels.height,
        }
    }
}

/// A mutable view of an artifact's pixel region.
pub struct Surface<'a> {
    geometry: Geometry,
    pixels: &'a mut [u8],
}

impl<'a> Surface<'a> {
    /// Wraps `pixels`, which must hold at least `bytes_per_row × height` bytes.
    pub fn new(geometry: Geometry, pixels: &'a mut [u8]) -> Option<Self> {
        let needed = geometry
            .bytes_per_row
            .checked_mul(geometry.pixels.height as usize)?;
        let row_bytes = (geometry.pixels.width as usize).checked_mul(BYTES_PER_PIXEL)?;
        if pixels.len() < needed || geometry.bytes_per_row < row_bytes {
            return None;
        }
        Some(Self { geometry, pixels })
    }

    /// Bitmap geometry.
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.geometry.pixels.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.geometry.pixels.height
    }

    /// Raw access to the whole pixel region, row padding included.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        self.pixels
    }

    /// The pixel bytes of row `y`, without padding.
    pub fn row_mut(&mut self, y: u32) -> Option<&mut [u8]> {
        if y >= self.height() {
            return None;
        }
        let start = y as usize * self.geometry.bytes_per_row;
        let len = self.width() as usize * BYTES_PER_PIXEL;
        self.pixels.get_mut(start..start + len)
    }

    fn offset(&self, x: u32, y: u32) -> Option<usize> {
        if x >= self.width() || y >= self.height() {
            return None;
        }
        Some(y as usize * self.geometry.bytes_per_row + x as usize * BYTES_PER_PIXEL)
    }

    /// Reads the pixel word at `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> Option<u32> {
        let at = self.offset(x, y)?;
        let bytes: [u8; 4] = self.pixels[at..at + BYTES_PER_PIXEL].try_into().ok()?;
        Some(u32::from_ne_bytes(bytes))
    }

    /// Writes the pixel word at `(x, y)`. Opaque surfaces force full alpha.
    pub fn set_pixel(&mut self, x: u32, y: u32, argb: u32) {
        let Some(at) = self.offset(x, y) else {
            return;
        };
        let word = match self.geometry.layout {
            PixelLayout::OpaqueSkipAlpha => argb | OPAQUE_BLACK,
            PixelLayout::PremultipliedAlpha => argb,
        };
        self.pixels[at..at + BYTES_PER_PIXEL].copy_from_slice(&word.to_ne_bytes());
    }

    /// Sets every pixel to `argb`.
    pub fn fill(&mut self, argb: u32) {
        for y in 0..self.height() {
            for x in 0..self.width() {
                self.set_pixel(x, y, argb);
            }
        }
    }

    /// Zeroes the pixel region.
    pub fn clear(&mut self) {
        self.pixels.fill(0);
    }

    /// Composites a straight-alpha RGBA color over the pixel at `(x, y)`.
    pub fn blend_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        let Some(dst) = self.pixel(x, y) else {
            return;
        };
        let [r, g, b, a] = rgba;
        let [da, dr, dg, db] = unpack_argb(dst);
        let inv = 255 - u32::from(a);
        let over = |src: u8, dst: u8| -> u8 {
            let premul = u32::from(src) * u32::from(a) / 255;
            (premul + u32::from(dst) * inv / 255) as u8
        };
        let out_a = (u32::from(a) + u32::from(da) * inv / 255) as u8;
        self.set_pixel(
            x,
            y,
            pack_argb(out_a, over(r, dr), over(g, dg), over(b, db)),
        );
    }

    /// Opaque surfaces start black, others fully transparent.
    pub(crate) fn prepare_background(&mut self) {
        match self.geometry.layout {
            PixelLayout::OpaqueSkipAlpha => self.fill(OPAQUE_BLACK),
            PixelLayout::PremultipliedAlpha => self.clear(),
        }
    }

    /// Restores full alpha on an opaque surface after the renderer is done,
    /// covering raw writes through [`row_mut`](Self::row_mut) and
    /// [`bytes_mut`](Self::bytes_mut).
    pub(crate) fn seal_opaque(&mut self) {
        if self.geometry.layout != PixelLayout::OpaqueSkipAlpha {
            return;
        }
        for y in 0..self.height() {
            let Some(row) = self.row_mut(y) else {
                continue;
            };
            for px in row.chunks_exact_mut(BYTES_PER_PIXEL) {
                let word = u32::from_ne_bytes([px[0], px[1], px[2], px[3]]) | OPAQUE_BLACK;
                px.copy_from_slice(&word.to_ne_bytes());
            }
        }
    }
}

/// Draws a source image into an artifact being constructed.
///
/// Called on a worker thread with a background already prepared (opaque
/// black or transparent). Implementations must be synchronous.
pub trait Renderer: Send + Sync + 'static {
    /// Draws `source` into `surface`.
    fn draw(&self, source: &DynamicImage, surface: &mut Surface<'_>);
}

impl<F> Renderer for F
where
    F: Fn(&DynamicImage, &mut Surface<'_>) + Send + Sync + 'static,
{
    fn draw(&self, source: &DynamicImage, surface: &mut Surface<'_>) {
        self(source, surface)
    }
}

/// Scales the source to fill the bitmap and composites it source-over.
#[derive(Debug, Clone, Copy)]
pub struct ResampleRenderer {
    filter: FilterType,
}

impl ResampleRenderer {
    /// A renderer resampling with `filter`.
    pub fn new(filter: FilterType) -> Self {
        Self { filter }
    }
}

impl Default for ResampleRenderer {
    fn default() -> Self {
        Self::new(FilterType::Triangle)
    }
}

impl Renderer for ResampleRenderer {
    fn draw(&self, source: &DynamicImage, surface: &mut Surface<'_>) {
        let (width, height) = (surface.width(), surface.height());
        let rgba = source.to_rgba8();
        let scaled = if rgba.dimensions() == (width, height) {
            rgba
        } else {
            imageops::resize(&rgba, width, height, self.filter)
        };
        for (x, y, px) in scaled.enumerate_pixels() {
            surface.blend_pixel(x, y, px.0);
        }
    }
}
