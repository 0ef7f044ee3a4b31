//! Tiled attribute storage for the Geoclip terrain streamer.
//!
//! Each attribute (height, diffuse, normal) is backed by a full-resolution
//! image that is cut into fixed-size tiles on demand. Tiles are kept in a
//! fixed-capacity LRU cache keyed by a packed 64-bit [`TileKey`].

pub mod cache;
pub mod error;
pub mod image;
pub mod key;
pub mod source;

pub use cache::{CacheStats, ResidentTile, TileCache};
pub use error::{CacheError, Result, TileError};
pub use image::AttributeImage;
pub use key::{PackedTileKey, TileKey};
pub use source::AttributeSource;
