//! Tile pyramids
//!
//! `generate` turns a large source image into a zip-packed deep-zoom tile
//! pyramid; `cache` extracts those archives on demand for static serving.

pub mod cache;
pub mod generate;

pub use cache::TileCache;
pub use generate::{generate_archive, PyramidInfo};
