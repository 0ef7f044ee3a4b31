//! Core types, math, and configuration for the Geoclip terrain streamer.
//!
//! This crate provides the foundational types shared by every other crate:
//! - Terrain attributes and their texel formats
//! - Sample-space coordinates and texel rectangles
//! - Wrap/floor arithmetic used by toroidal addressing
//! - The clipmap configuration and its validation

pub mod config;
pub mod coords;
pub mod error;
pub mod math;
pub mod types;

pub use config::{AttributeConfig, ClipmapConfig};
pub use coords::{SampleCoord, TexelRect};
pub use error::{Error, Result};
pub use types::Attribute;

/// Engine-wide constants
pub mod constants {
    /// Default number of clipmap levels.
    pub const DEFAULT_LEVEL_COUNT: usize = 9;
    /// Upper bound on clipmap levels (level index must fit the tile key).
    pub const MAX_LEVEL_COUNT: usize = 16;
    /// Default grid size in cells per level (texture size is one more).
    pub const DEFAULT_GRID_SIZE: u32 = 255;
    /// Default tile edge length in texels.
    pub const DEFAULT_TILE_SIZE: u32 = 64;
    /// Number of streamed attributes (height, diffuse, normal).
    pub const ATTRIBUTE_COUNT: usize = 3;
    /// Compute workgroup edge used by the region upload dispatch.
    pub const DISPATCH_GROUP_SIZE: u32 = 8;
    /// Bits per tile coordinate in a packed tile key.
    pub const TILE_COORD_BITS: u32 = 24;
}
