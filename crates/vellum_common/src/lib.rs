//! Shared foundational types used across the Vellum image cache.
//!
//! This crate provides identifier digests, the [`ImageKey`] capability that
//! application keys implement, and the geometry value types (logical sizes,
//! device scale factors and pixel sizes) that identify a rendered artifact.

#![warn(missing_docs)]

pub mod geometry;
pub mod hash;
pub mod key;

pub use geometry::{ArtifactKey, GeometryError, LogicalSize, PixelSize, Scale};
pub use hash::KeyDigest;
pub use key::ImageKey;
