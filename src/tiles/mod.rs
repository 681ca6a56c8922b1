//! Tile scheduling: cache, request queue, loader, pipeline and tile sources.

pub mod cache;
pub mod cancel;
pub mod loader;
pub mod pack;
pub mod pipeline;
pub mod pool;
pub mod queue;
pub mod source;

// Re-exports for convenience
pub use cache::{TileCache, TileRecord, TileStatus};
pub use loader::TileLoader;
pub use pipeline::TilePipeline;
pub use source::{PackHandle, TileSource, UrlTemplate};
