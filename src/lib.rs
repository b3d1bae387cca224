// Reeftile image cache core library

pub mod cache;
pub mod config;
pub mod constants;
pub mod entity;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod storage;
pub mod tile;

pub use error::Error;
