//! Prelude module for common tilescope types and traits
//!
//! This module re-exports the most commonly used types, traits, and functions
//! for easy importing with `use tilescope::prelude::*;`

pub use crate::core::{
    animation::{EasingType, ViewAnimation},
    config::{SchedulerConfig, SchedulerProfile},
    geo::{Point, PyramidGrid, TileKey, TileRange},
    view::{MotionState, ViewState},
};

pub use crate::engine::{EngineStats, FrameOutput, TileEngine, TileEngineBuilder};

pub use crate::rendering::{
    compositor::{CoverageReport, FramePlan, LevelCompositor, TileRequest},
    decode::Bitmap,
    plan::{DeviceRect, DrawCommand, DrawPlan, FilterMode},
    texture::{MemoryTextureSurface, TextureId},
};

pub use crate::runtime::{AsyncHandle, AsyncSpawner, ManualSpawner};

pub use crate::tiles::{
    cache::{TileCache, TileRecord, TileStatus},
    loader::TileLoader,
    pack::{TilePack, TilePackBuilder},
    pipeline::TilePipeline,
    queue::{RequestQueue, RequestTask},
    source::{PackHandle, TileSource, UrlTemplate},
};

pub use crate::traits::{
    CacheBackend, ClockSource, ImageDecoder, LoaderBackend, ManualClock, SystemClock,
    TextureSurface, TileFetcher,
};

pub use crate::{Error as TileError, Result};

pub use std::{
    sync::Arc,
    time::{Duration, Instant},
};

pub use fxhash::{FxHashMap as HashMap, FxHashSet as HashSet, FxHasher};

pub use futures::Future;
pub use std::pin::Pin;
