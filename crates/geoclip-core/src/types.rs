//! Terrain attribute types.

use serde::{Deserialize, Serialize};

use crate::constants::ATTRIBUTE_COUNT;

/// A streamed terrain attribute.
///
/// Each attribute has its own backing image, tile cache and per-level
/// clipmap texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Attribute {
    /// Height field, one `f32` per texel.
    Height = 0,
    /// Albedo color, RGBA8.
    Diffuse = 1,
    /// Encoded surface normal, RGBA8.
    Normal = 2,
}

impl Attribute {
    /// All attributes in index order.
    pub const ALL: [Self; ATTRIBUTE_COUNT] = [Self::Height, Self::Diffuse, Self::Normal];

    /// Index into per-attribute arrays.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Attribute from its packed index.
    pub const fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Self::Height),
            1 => Some(Self::Diffuse),
            2 => Some(Self::Normal),
            _ => None,
        }
    }

    /// Bytes per texel of this attribute's images and textures.
    #[inline]
    pub const fn bytes_per_texel(self) -> usize {
        match self {
            Self::Height => std::mem::size_of::<f32>(),
            Self::Diffuse | Self::Normal => 4,
        }
    }

    /// Lowercase name used in logs and resource labels.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Height => "height",
            Self::Diffuse => "diffuse",
            Self::Normal => "normal",
        }
    }
}

impl std::fmt::Display for Attribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
