//! File cache
//!
//! On-demand download-and-cache of whole source files with soft-budget
//! LRU eviction. All cross-worker coordination goes through the shared
//! filesystem (see `lock`); there is no authoritative in-memory index.

pub mod eviction;
pub mod file_cache;
pub mod lock;
pub mod stats;

pub use eviction::SweepOutcome;
pub use file_cache::{FileCache, FileStream, LocalFile};
pub use stats::{CacheStats, StatsTracker};
