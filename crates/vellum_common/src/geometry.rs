//! Logical sizes, device scale factors and the artifact identity built from them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::key::ImageKey;

/// Errors produced when a requested size or scale cannot describe a bitmap.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeometryError {
    /// A logical dimension is NaN, infinite, zero or negative.
    #[error("invalid logical size {width}x{height}")]
    InvalidSize {
        /// The requested logical width.
        width: f64,
        /// The requested logical height.
        height: f64,
    },

    /// The scale factor is NaN, infinite, zero or negative.
    #[error("invalid scale factor {0}")]
    InvalidScale(f64),

    /// The size rounds to a bitmap with no pixels.
    #[error("size {width}x{height} at scale {scale} has no pixels")]
    EmptyPixels {
        /// The requested logical width.
        width: f64,
        /// The requested logical height.
        height: f64,
        /// The requested scale.
        scale: f64,
    },

    /// The pixel dimensions or byte lengths do not fit the target integer types.
    #[error("bitmap geometry too large: {0}")]
    TooLarge(String),
}

/// A size in logical (point) units, before the device scale is applied.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LogicalSize {
    /// Logical width.
    pub width: f64,
    /// Logical height.
    pub height: f64,
}

impl LogicalSize {
    /// Creates a logical size. Validation happens when pixels are derived.
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Returns an error unless both dimensions are finite and positive.
    pub fn validate(&self) -> Result<(), GeometryError> {
        let ok = |v: f64| v.is_finite() && v > 0.0;
        if ok(self.width) && ok(self.height) {
            Ok(())
        } else {
            Err(GeometryError::InvalidSize {
                width: self.width,
                height: self.height,
            })
        }
    }

    /// Computes the pixel size at `scale`, rounding each dimension.
    pub fn to_pixels(&self, scale: Scale) -> Result<PixelSize, GeometryError> {
        self.validate()?;
        let w = (self.width * scale.get()).round();
        let h = (self.height * scale.get()).round();
        if w < 1.0 || h < 1.0 {
            return Err(GeometryError::EmptyPixels {
                width: self.width,
                height: self.height,
                scale: scale.get(),
            });
        }
        if w > u32::MAX as f64 || h > u32::MAX as f64 {
            return Err(GeometryError::TooLarge(format!("{w}x{h} pixels")));
        }
        Ok(PixelSize {
            width: w as u32,
            height: h as u32,
        })
    }
}

/// A device scale factor (pixels per logical unit). Always finite and positive.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Scale(f64);

impl Scale {
    /// The 1:1 scale.
    pub const ONE: Scale = Scale(1.0);

    /// Creates a scale factor, rejecting NaN, infinities and non-positive values.
    pub fn new(value: f64) -> Result<Self, GeometryError> {
        if value.is_finite() && value > 0.0 {
            Ok(Self(value))
        } else {
            Err(GeometryError::InvalidScale(value))
        }
    }

    /// Returns the raw factor.
    pub fn get(self) -> f64 {
        self.0
    }
}

impl fmt::Display for Scale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Integer bitmap dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelSize {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// The identity of one rendered artifact: an image at a logical size and scale.
///
/// Equal artifact keys always resolve to the same file name; different sizes
/// or scales of the same image never share a file.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactKey<K> {
    /// The source image key.
    pub key: K,
    /// The requested logical size.
    pub size: LogicalSize,
    /// The requested device scale.
    pub scale: Scale,
}

impl<K: ImageKey> ArtifactKey<K> {
    /// Creates an artifact key.
    pub fn new(key: K, size: LogicalSize, scale: Scale) -> Self {
        Self { key, size, scale }
    }

    /// The artifact's file name: `<hashed>_@<scale>x_<width>_<height>`.
    ///
    /// Every number uses the shortest `f64` display, so whole sizes read
    /// `_100_50` and fractional ones keep their digits (`_10.2_4`).
    pub fn file_name(&self) -> String {
        format!(
            "{}_@{}x_{}_{}",
            self.key.hashed_identifier(),
            self.scale,
            self.size.width,
            self.size.height
        )
    }
}
