//! Fixed-layout header prefixed to every rendered artifact file.
//!
//! An artifact file is `[header: HEADER_LEN bytes][pixel rows]`. The header
//! records the logical size, scale and the byte layout of the pixel region so
//! that a reader can validate a file before trusting its contents. Fields are
//! encoded with `bincode` using fixed-width integers in host byte order and
//! zero-padded to [`HEADER_LEN`], which keeps the pixel region 64-byte aligned.

use serde::{Deserialize, Serialize};
use vellum_common::{GeometryError, LogicalSize, PixelSize, Scale};

/// Size of the encoded header region in bytes.
pub const HEADER_LEN: usize = 128;

/// Alignment applied to row strides and to the total pixel region length.
pub const ROW_ALIGNMENT: u64 = 64;

/// Components per pixel.
pub const COMPONENTS: u32 = 4;

/// Bits per component.
pub const BITS_PER_COMPONENT: u32 = 8;

/// Magic bytes identifying a Vellum render artifact.
const HEADER_MAGIC: [u8; 4] = *b"VLMR";

/// Current header format version. Increment on breaking layout changes.
const HEADER_FORMAT_VERSION: u32 = 1;

/// Rounds `len` up to a multiple of `alignment`, or `None` on overflow or a
/// zero alignment.
pub fn byte_align(len: u64, alignment: u64) -> Option<u64> {
    let slack = alignment.checked_sub(1)?;
    len.checked_add(slack)
        .map(|padded| padded / alignment * alignment)
}

/// How the 32-bit alpha-first pixel words are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelLayout {
    /// Opaque: the alpha byte is always `0xFF` and carries no information.
    OpaqueSkipAlpha,
    /// Premultiplied color with a meaningful alpha channel.
    PremultipliedAlpha,
}

impl PixelLayout {
    /// The layout used for an artifact with the given opacity.
    pub fn for_opacity(opaque: bool) -> Self {
        if opaque {
            PixelLayout::OpaqueSkipAlpha
        } else {
            PixelLayout::PremultipliedAlpha
        }
    }
}

/// Problems found while encoding or decoding a header.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HeaderError {
    /// Fewer than [`HEADER_LEN`] bytes were available.
    #[error("header truncated: {len} of {HEADER_LEN} bytes")]
    Truncated {
        /// Bytes available.
        len: usize,
    },

    /// The magic bytes did not match.
    #[error("missing magic bytes")]
    BadMagic,

    /// The header was written by an incompatible format version.
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u32),

    /// The bytes could not be decoded or encoded.
    #[error("malformed header: {0}")]
    Malformed(String),

    /// The stored fields disagree with the geometry they claim to describe.
    #[error("inconsistent header: {0}")]
    Inconsistent(String),

    /// A structurally valid header describes a different artifact.
    #[error("header does not match the requested artifact")]
    Mismatch,
}

/// Pixel geometry and byte layout of one rendered artifact.
///
/// Built from the request parameters with [`RenderHeader::new`]; every
/// derived length is computed here and nowhere else.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderHeader {
    size: LogicalSize,
    scale: Scale,
    pixel_size: PixelSize,
    bytes_per_row: u64,
    image_len: u64,
    total_len: u64,
    layout: PixelLayout,
}

/// On-disk form of [`RenderHeader`].
#[derive(Serialize, Deserialize)]
struct DiskHeader {
    magic: [u8; 4],
    format_version: u32,
    width: f64,
    height: f64,
    scale: f64,
    pixel_width: u32,
    pixel_height: u32,
    bytes_per_row: u64,
    image_len: u64,
    total_len: u64,
    layout: PixelLayout,
}

#[cfg(target_endian = "little")]
fn wire_config() -> impl bincode::config::Config {
    bincode::config::standard()
        .with_fixed_int_encoding()
        .with_little_endian()
}

#[cfg(target_endian = "big")]
fn wire_config() -> impl bincode::config::Config {
    bincode::config::standard()
        .with_fixed_int_encoding()
        .with_big_endian()
}

impl RenderHeader {
    /// Computes the header for a logical size rendered at `scale`.
    pub fn new(size: LogicalSize, scale: Scale, opaque: bool) -> Result<Self, GeometryError> {
        let pixel_size = size.to_pixels(scale)?;
        let too_large = || GeometryError::TooLarge(format!("{size:?} at {scale}x"));

        let bytes_per_row = u64::from(pixel_size.width)
            .checked_mul(u64::from(COMPONENTS))
            .and_then(|row| byte_align(row, ROW_ALIGNMENT))
            .ok_or_else(too_large)?;
        let image_len = bytes_per_row
            .checked_mul(u64::from(pixel_size.height))
            .and_then(|len| byte_align(len, ROW_ALIGNMENT))
            .ok_or_else(too_large)?;
        let total_len = image_len
            .checked_add(HEADER_LEN as u64)
            .ok_or_else(too_large)?;
        if usize::try_from(total_len).is_err() {
            return Err(too_large());
        }

        Ok(Self {
            size,
            scale,
            pixel_size,
            bytes_per_row,
            image_len,
            total_len,
            layout: PixelLayout::for_opacity(opaque),
        })
    }

    /// Logical size the artifact was rendered for.
    pub fn size(&self) -> LogicalSize {
        self.size
    }

    /// Device scale factor.
    pub fn scale(&self) -> Scale {
        self.scale
    }

    /// Pixel dimensions (`round(size × scale)`).
    pub fn pixel_size(&self) -> PixelSize {
        self.pixel_size
    }

    /// Row stride in bytes, 64-byte aligned.
    pub fn bytes_per_row(&self) -> u64 {
        self.bytes_per_row
    }

    /// Length of the pixel region in bytes, 64-byte aligned.
    pub fn image_len(&self) -> u64 {
        self.image_len
    }

    /// Exact length of the artifact file.
    pub fn total_len(&self) -> u64 {
        self.total_len
    }

    /// Pixel interpretation.
    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    /// Returns `true` for opaque artifacts.
    pub fn is_opaque(&self) -> bool {
        self.layout == PixelLayout::OpaqueSkipAlpha
    }

    /// Writes the header into the first [`HEADER_LEN`] bytes of `dst`.
    pub fn encode_into(&self, dst: &mut [u8]) -> Result<(), HeaderError> {
        if dst.len() < HEADER_LEN {
            return Err(HeaderError::Truncated { len: dst.len() });
        }
        let region = &mut dst[..HEADER_LEN];
        region.fill(0);

        let disk = DiskHeader {
            magic: HEADER_MAGIC,
            format_version: HEADER_FORMAT_VERSION,
            width: self.size.width,
            height: self.size.height,
            scale: self.scale.get(),
            pixel_width: self.pixel_size.width,
            pixel_height: self.pixel_size.height,
            bytes_per_row: self.bytes_per_row,
            image_len: self.image_len,
            total_len: self.total_len,
            layout: self.layout,
        };
        bincode::serde::encode_into_slice(&disk, region, wire_config())
            .map_err(|e| HeaderError::Malformed(e.to_string()))?;
        Ok(())
    }

    /// Returns the encoded header as a standalone buffer.
    pub fn to_bytes(&self) -> Result<[u8; HEADER_LEN], HeaderError> {
        let mut buf = [0u8; HEADER_LEN];
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// Decodes and validates a header from the start of `src`.
    ///
    /// Derived fields are recomputed from the stored size and scale and must
    /// match exactly, so a decoded header can be trusted to describe `src`'s
    /// layout.
    pub fn decode(src: &[u8]) -> Result<Self, HeaderError> {
        if src.len() < HEADER_LEN {
            return Err(HeaderError::Truncated { len: src.len() });
        }

        let (disk, _): (DiskHeader, usize) =
            bincode::serde::decode_from_slice(&src[..HEADER_LEN], wire_config())
                .map_err(|e| HeaderError::Malformed(e.to_string()))?;

        if disk.magic != HEADER_MAGIC {
            return Err(HeaderError::BadMagic);
        }
        if disk.format_version != HEADER_FORMAT_VERSION {
            return Err(HeaderError::UnsupportedVersion(disk.format_version));
        }

        let scale =
            Scale::new(disk.scale).map_err(|e| HeaderError::Inconsistent(e.to_string()))?;
        let expected = Self::new(
            LogicalSize::new(disk.width, disk.height),
            scale,
            disk.layout == PixelLayout::OpaqueSkipAlpha,
        )
        .map_err(|e| HeaderError::Inconsistent(e.to_string()))?;

        let stored = PixelSize {
            width: disk.pixel_width,
            height: disk.pixel_height,
        };
        if stored != expected.pixel_size
            || disk.bytes_per_row != expected.bytes_per_row
            || disk.image_len != expected.image_len
            || disk.total_len != expected.total_len
        {
            return Err(HeaderError::Inconsistent(format!(
                "stored layout {}x{} stride {} len {} does not match computed {}x{} stride {} len {}",
                disk.pixel_width,
                disk.pixel_height,
                disk.bytes_per_row,
                disk.total_len,
                expected.pixel_size.width,
                expected.pixel_size.height,
                expected.bytes_per_row,
                expected.total_len,
            )));
        }

        Ok(expected)
    }
}
