//! Two-tier, disk-backed image cache.
//!
//! Source images live in an [`OriginalStore`]; size- and scale-specific
//! renderings live in a [`RenderStore`] as header-tagged bitmap files that
//! are memory-mapped for repeated reads. Misses are served asynchronously:
//! a [`DataSource`] coalesces concurrent fetches of the same original, and
//! per-key lanes ensure each artifact is rendered once no matter how many
//! callers ask for it at the same time.

#![warn(missing_docs)]

pub mod cache;
pub mod coordination;
pub mod dispatch;
pub mod error;
pub mod header;
pub mod lanes;
pub mod mapping;
pub mod original;
pub mod render;
pub mod source;
pub mod surface;

pub use cache::{render_options, ImageCache};
pub use dispatch::{CompletionContext, Executors, MainContext, ManualContext, Task, WorkerPool};
pub use error::{CacheError, ProviderError};
pub use header::{PixelLayout, RenderHeader, HEADER_LEN};
pub use mapping::{MappedArtifact, MappingCache};
pub use original::{IgnoreReason, OriginalStore, PutOutcome, SharedImage};
pub use render::{MappedImage, RenderOptions, RenderStore};
pub use source::{DataSource, NoProvider, OriginalProvider, ProviderReply};
pub use surface::{Geometry, Renderer, ResampleRenderer, Surface};
