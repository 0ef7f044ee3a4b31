//! Clipmap and attribute configuration.

use serde::{Deserialize, Serialize};

use crate::constants::{
    ATTRIBUTE_COUNT, DEFAULT_GRID_SIZE, DEFAULT_LEVEL_COUNT, DEFAULT_TILE_SIZE, MAX_LEVEL_COUNT,
    TILE_COORD_BITS,
};
use crate::error::{Error, Result};
use crate::types::Attribute;

/// Backing image and cache settings for one attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeConfig {
    /// Backing image width in texels (power of two).
    pub image_width: u32,
    /// Backing image height in texels (power of two).
    pub image_height: u32,
    /// Tile edge length in texels (power of two).
    pub tile_size: u32,
    /// Image texels per level-0 sample along each axis (power of two).
    pub texels_per_sample: u32,
    /// Cache capacity in resident tiles.
    pub max_resident_tiles: usize,
}

impl AttributeConfig {
    pub const fn new(image_width: u32, image_height: u32) -> Self {
        Self {
            image_width,
            image_height,
            tile_size: DEFAULT_TILE_SIZE,
            texels_per_sample: 1,
            max_resident_tiles: 192,
        }
    }

    #[must_use]
    pub const fn with_tile_size(mut self, tile_size: u32) -> Self {
        self.tile_size = tile_size;
        self
    }

    #[must_use]
    pub const fn with_texels_per_sample(mut self, texels_per_sample: u32) -> Self {
        self.texels_per_sample = texels_per_sample;
        self
    }

    #[must_use]
    pub const fn with_max_resident_tiles(mut self, max_resident_tiles: usize) -> Self {
        self.max_resident_tiles = max_resident_tiles;
        self
    }

    /// Tiles along X and Y at a mip level.
    ///
    /// A tile at `level` covers `tile_size << level` image texels, so the
    /// tile grid halves per level until it bottoms out at one tile.
    pub const fn tile_count(&self, level: u32) -> (u32, u32) {
        let span = (self.tile_size as u64) << level;
        let x = (self.image_width as u64 / span) as u32;
        let y = (self.image_height as u64 / span) as u32;
        (if x == 0 { 1 } else { x }, if y == 0 { 1 } else { y })
    }

    /// Number of texels in the backing image.
    pub const fn texel_count(&self) -> usize {
        self.image_width as usize * self.image_height as usize
    }

    /// Bytes in one resident tile of this attribute.
    pub const fn tile_bytes(&self, attribute: Attribute) -> usize {
        self.tile_size as usize * self.tile_size as usize * attribute.bytes_per_texel()
    }

    fn validate(&self, attribute: Attribute) -> Result<()> {
        let check_pow2 = |name: &str, value: u32| {
            if value == 0 || !value.is_power_of_two() {
                Err(Error::InvalidConfig(format!(
                    "{attribute} {name} must be a non-zero power of two, got {value}"
                )))
            } else {
                Ok(())
            }
        };
        check_pow2("image_width", self.image_width)?;
        check_pow2("image_height", self.image_height)?;
        check_pow2("tile_size", self.tile_size)?;
        check_pow2("texels_per_sample", self.texels_per_sample)?;

        if self.tile_size > self.image_width || self.tile_size > self.image_height {
            return Err(Error::InvalidConfig(format!(
                "{attribute} tile_size {} exceeds image {}x{}",
                self.tile_size, self.image_width, self.image_height
            )));
        }
        if self.texels_per_sample > self.tile_size {
            return Err(Error::InvalidConfig(format!(
                "{attribute} texels_per_sample {} exceeds tile_size {}",
                self.texels_per_sample, self.tile_size
            )));
        }
        let (tiles_x, tiles_y) = self.tile_count(0);
        if tiles_x >= 1 << TILE_COORD_BITS || tiles_y >= 1 << TILE_COORD_BITS {
            return Err(Error::InvalidConfig(format!(
                "{attribute} tile grid {tiles_x}x{tiles_y} does not fit a packed tile key"
            )));
        }
        Ok(())
    }
}

/// Clipmap layout shared by every level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipmapConfig {
    /// Number of LOD levels; level `l` has sample spacing `1 << l`.
    pub level_count: usize,
    /// Grid size in cells per level. The level texture holds one texel per
    /// grid point, so its edge is `grid_size + 1`.
    pub grid_size: u32,
    /// World-space size of one level-0 sample.
    pub sample_world_size: f32,
    /// Per-attribute image and cache settings, indexed by [`Attribute::index`].
    pub attributes: [AttributeConfig; ATTRIBUTE_COUNT],
}

impl Default for ClipmapConfig {
    fn default() -> Self {
        Self {
            level_count: DEFAULT_LEVEL_COUNT,
            grid_size: DEFAULT_GRID_SIZE,
            sample_world_size: 1.0,
            attributes: [
                AttributeConfig::new(1024, 1024),
                AttributeConfig::new(2048, 2048)
                    .with_texels_per_sample(2)
                    .with_max_resident_tiles(256),
                AttributeConfig::new(1024, 1024),
            ],
        }
    }
}

impl ClipmapConfig {
    /// Default layout with a different level count and grid size.
    pub fn new(level_count: usize, grid_size: u32) -> Self {
        Self {
            level_count,
            grid_size,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_sample_world_size(mut self, sample_world_size: f32) -> Self {
        self.sample_world_size = sample_world_size;
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, attribute: Attribute, config: AttributeConfig) -> Self {
        self.attributes[attribute.index()] = config;
        self
    }

    /// Apply the same cache capacity to every attribute.
    #[must_use]
    pub fn with_max_resident_tiles(mut self, max_resident_tiles: usize) -> Self {
        for attribute in &mut self.attributes {
            attribute.max_resident_tiles = max_resident_tiles;
        }
        self
    }

    /// Edge length in texels of every level texture.
    #[inline]
    pub const fn texture_size(&self) -> u32 {
        self.grid_size + 1
    }

    /// Sample spacing of a level.
    #[inline]
    pub const fn spacing(&self, level: usize) -> i64 {
        1 << level
    }

    /// World-space extent covered by a level.
    pub fn level_world_extent(&self, level: usize) -> f32 {
        self.grid_size as f32 * self.spacing(level) as f32 * self.sample_world_size
    }

    #[inline]
    pub const fn attribute(&self, attribute: Attribute) -> &AttributeConfig {
        &self.attributes[attribute.index()]
    }

    /// Check every invariant the streaming engine relies on.
    pub fn validate(&self) -> Result<()> {
        if self.level_count == 0 || self.level_count > MAX_LEVEL_COUNT {
            return Err(Error::InvalidConfig(format!(
                "level_count must be in 1..={MAX_LEVEL_COUNT}, got {}",
                self.level_count
            )));
        }
        if self.grid_size < 3 || !self.texture_size().is_power_of_two() {
            return Err(Error::InvalidConfig(format!(
                "grid_size + 1 must be a power of two of at least 4, got grid_size {}",
                self.grid_size
            )));
        }
        if !(self.sample_world_size.is_finite() && self.sample_world_size > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "sample_world_size must be positive, got {}",
                self.sample_world_size
            )));
        }
        for attribute in Attribute::ALL {
            self.attribute(attribute).validate(attribute)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ClipmapConfig::default();
        config.validate().unwrap();
        assert_eq!(config.texture_size(), 256);
        assert_eq!(config.spacing(0), 1);
        assert_eq!(config.spacing(8), 256);
    }

    #[test]
    fn tile_count_halves_per_level() {
        let config = AttributeConfig::new(1024, 512).with_tile_size(64);
        assert_eq!(config.tile_count(0), (16, 8));
        assert_eq!(config.tile_count(1), (8, 4));
        assert_eq!(config.tile_count(4), (1, 1));
        assert_eq!(config.tile_count(9), (1, 1));
    }

    #[test]
    fn rejects_bad_layouts() {
        assert!(ClipmapConfig::new(0, 255).validate().is_err());
        assert!(ClipmapConfig::new(17, 255).validate().is_err());
        assert!(ClipmapConfig::new(9, 254).validate().is_err());

        let odd_tiles = ClipmapConfig::default()
            .with_attribute(Attribute::Height, AttributeConfig::new(1024, 1024).with_tile_size(48));
        assert!(matches!(odd_tiles.validate(), Err(Error::InvalidConfig(_))));

        let oversized_tile = ClipmapConfig::default()
            .with_attribute(Attribute::Normal, AttributeConfig::new(32, 32).with_tile_size(64));
        assert!(oversized_tile.validate().is_err());
    }

    #[test]
    fn capacity_override_applies_to_all_attributes() {
        let config = ClipmapConfig::default().with_max_resident_tiles(4);
        assert!(config.attributes.iter().all(|a| a.max_resident_tiles == 4));
    }
}
