//! Tile identifiers and their packed 64-bit form.

use geoclip_core::constants::TILE_COORD_BITS;
use geoclip_core::Attribute;

const COORD_MASK: u64 = (1 << TILE_COORD_BITS) - 1;
const TILE_X_SHIFT: u32 = TILE_COORD_BITS;
const LEVEL_SHIFT: u32 = TILE_COORD_BITS * 2;
const ATTRIBUTE_SHIFT: u32 = LEVEL_SHIFT + 8;

/// Identifies one tile of one attribute at one mip level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    pub attribute: Attribute,
    pub level: u8,
    pub tile_x: u32,
    pub tile_y: u32,
}

impl TileKey {
    #[inline]
    pub const fn new(attribute: Attribute, level: u8, tile_x: u32, tile_y: u32) -> Self {
        Self {
            attribute,
            level,
            tile_x,
            tile_y,
        }
    }

    /// Pack into the cache map key.
    ///
    /// Layout: attribute in bits 56..64, level in 48..56, tile X in 24..48,
    /// tile Y in 0..24. Coordinates must be below `2^24`.
    #[inline]
    pub const fn pack(self) -> PackedTileKey {
        debug_assert!((self.tile_x as u64) <= COORD_MASK);
        debug_assert!((self.tile_y as u64) <= COORD_MASK);
        PackedTileKey(
            (self.attribute as u64) << ATTRIBUTE_SHIFT
                | (self.level as u64) << LEVEL_SHIFT
                | (self.tile_x as u64 & COORD_MASK) << TILE_X_SHIFT
                | (self.tile_y as u64 & COORD_MASK),
        )
    }
}

impl From<TileKey> for PackedTileKey {
    fn from(key: TileKey) -> Self {
        key.pack()
    }
}

/// A [`TileKey`] packed into a single `u64`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct PackedTileKey(pub u64);

impl PackedTileKey {
    /// Recover the tile key. Returns `None` for an unknown attribute tag.
    pub const fn unpack(self) -> Option<TileKey> {
        let Some(attribute) = Attribute::from_index((self.0 >> ATTRIBUTE_SHIFT) as u8) else {
            return None;
        };
        Some(TileKey {
            attribute,
            level: (self.0 >> LEVEL_SHIFT) as u8,
            tile_x: ((self.0 >> TILE_X_SHIFT) & COORD_MASK) as u32,
            tile_y: (self.0 & COORD_MASK) as u32,
        })
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}
