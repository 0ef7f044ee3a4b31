//! Tile cache and attribute source errors.

use geoclip_core::Attribute;
use thiserror::Error;

use crate::key::TileKey;

/// Tile cache allocation failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Cache is full and has no eviction candidate.
    #[error("{attribute} tile cache has no free slot (capacity {capacity})")]
    OutOfSlots { attribute: Attribute, capacity: usize },

    /// Key index points at an empty slot.
    #[error("tile cache slot {slot} for {key:?} is empty")]
    SlotMismatch { key: TileKey, slot: usize },
}

/// Errors building an attribute source.
#[derive(Error, Debug)]
pub enum TileError {
    /// Pixel buffer does not match the configured image size.
    #[error("{attribute} image expects {expected} texels, got {actual}")]
    ImageSize {
        attribute: Attribute,
        expected: usize,
        actual: usize,
    },

    /// Attribute configuration rejected.
    #[error(transparent)]
    Config(#[from] geoclip_core::Error),

    /// Cache failure.
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Result type alias for attribute source operations.
pub type Result<T> = std::result::Result<T, TileError>;
