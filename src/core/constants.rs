//! Core constants shared across the engine.
//! Values that encode UX tuning live in [`SchedulerConfig`](crate::core::config::SchedulerConfig)
//! instead; these are structural.

/// Default square tile size in pixels.
pub const TILE_SIZE: u32 = 256;

/// GTPK magic, the ASCII bytes "GTPK" read as a little-endian u32.
pub const PACK_MAGIC: u32 = u32::from_le_bytes(*b"GTPK");

/// The only GTPK version this crate reads and writes.
pub const PACK_VERSION: u32 = 1;

/// Size of the fixed GTPK header in bytes.
pub const PACK_HEADER_LEN: usize = 16;

/// Size of one GTPK index entry in bytes: z(1) x(2) y(2) offset(4) length(4).
pub const PACK_INDEX_ENTRY_LEN: usize = 13;

/// Levels deeper than this are rejected outright; 2^31 columns already
/// exceeds any image we could address with f64 world pixels at full precision.
pub const MAX_LEVEL: u8 = 30;

/// Request priorities; lower values are served first.
pub const PRIORITY_BASE_LEVEL: u32 = 0;
pub const PRIORITY_BACKFILL: u32 = 1;
pub const PRIORITY_NEXT_LEVEL: u32 = 2;
pub const PRIORITY_PREFETCH: u32 = 3;
