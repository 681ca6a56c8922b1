//! # tilescope
//!
//! A tile-pyramid scheduling engine for very large raster images.
//!
//! The crate decides which tiles of an image pyramid to fetch, in what order,
//! how to cache and evict their GPU textures, and how to blend several pyramid
//! levels into a single gap-free draw plan at an arbitrary fractional zoom.
//! Drawing itself is left to the host: each frame produces an immutable
//! [`DrawPlan`] describing which texture goes where, at what opacity.

pub mod core;
pub mod engine;
pub mod prelude;
pub mod rendering;
pub mod runtime;
pub mod tiles;
pub mod traits;

pub use crate::core::constants;

// Re-export public API
pub use crate::core::{
    config::{SchedulerConfig, SchedulerProfile},
    geo::{Point, PyramidGrid, TileKey},
    view::ViewState,
};

pub use engine::{EngineStats, FrameOutput, TileEngine, TileEngineBuilder};

pub use rendering::{
    compositor::{CoverageReport, LevelCompositor},
    plan::{DeviceRect, DrawCommand, DrawPlan, FilterMode},
    texture::{MemoryTextureSurface, TextureId},
};

pub use tiles::{
    cache::{TileCache, TileRecord, TileStatus},
    loader::TileLoader,
    pack::{TilePack, TilePackBuilder},
    pipeline::TilePipeline,
    queue::{RequestQueue, RequestTask},
    source::{PackHandle, TileSource, UrlTemplate},
};

pub use traits::{CacheBackend, ClockSource, ImageDecoder, LoaderBackend, TextureSurface, TileFetcher};

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Texture error: {0}")]
    Texture(String),

    #[error("Invalid tile pack: {0}")]
    InvalidPack(String),

    #[error("Tile not found: {0}")]
    NotFound(String),

    #[error("Tile source is not available yet")]
    SourceUnavailable,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Async runtime error: {0}")]
    Runtime(String),
}

/// Error type alias for call sites that deal with tiles specifically
pub type TileError = Error;

/// Initialise `env_logger` once. Safe to call repeatedly.
pub fn init_logging() {
    #[cfg(feature = "debug")]
    {
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .try_init();
    }
}
