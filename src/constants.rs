// Constants module - centralized default values for configuration
//
// These are the fallbacks used by the configuration `Default` impls.
// Applications override them through the config structs, not here.

/// Edge length of a single tile in pixels
pub const DEFAULT_TILE_SIZE: u32 = 256;

/// Images whose longest edge exceeds this value (in pixels) are tiled
/// instead of served whole
pub const DEFAULT_TILING_THRESHOLD: u32 = 10_000;

/// Soft maximum size of the file cache in bytes (1 GB)
pub const DEFAULT_FILE_CACHE_MAX_SIZE: u64 = 1_000_000_000;

/// Soft maximum size of the tile cache in bytes (1 GB)
pub const DEFAULT_TILE_CACHE_MAX_SIZE: u64 = 1_000_000_000;

/// Timeout for a single remote fetch in seconds
pub const DEFAULT_FETCH_TIMEOUT_SECONDS: u64 = 30;

/// JPEG quality used when encoding tiles
pub const TILE_JPEG_QUALITY: u8 = 85;

/// Name of the descriptor file packed into every tile archive
pub const TILE_PROPERTIES_FILE: &str = "ImageProperties.xml";
