//! Per-attribute backing image plus its tile cache.

use geoclip_core::math::{div_floor, mod_floor, wrap_coord_for_tile};
use geoclip_core::{Attribute, AttributeConfig};
use hashbrown::HashSet;
use tracing::{debug, warn};

use crate::cache::{CacheStats, ResidentTile, TileCache};
use crate::error::{CacheError, Result, TileError};
use crate::image::AttributeImage;
use crate::key::{PackedTileKey, TileKey};

/// Owns one attribute's image and tile cache.
///
/// Cache allocation failures are logged once per source and degrade the
/// affected tiles to zero-filled texels.
pub struct AttributeSource {
    config: AttributeConfig,
    image: AttributeImage,
    cache: TileCache,
    out_of_slots_logged: bool,
}

impl AttributeSource {
    /// Wrap an image whose size matches `config`.
    pub fn new(config: AttributeConfig, image: AttributeImage) -> Result<Self> {
        let attribute = image.attribute();
        if image.width() != config.image_width || image.height() != config.image_height {
            return Err(TileError::Config(geoclip_core::Error::InvalidData(format!(
                "{attribute} image is {}x{}, configured {}x{}",
                image.width(),
                image.height(),
                config.image_width,
                config.image_height
            ))));
        }
        debug!(
            %attribute,
            width = config.image_width,
            height = config.image_height,
            tile_size = config.tile_size,
            capacity = config.max_resident_tiles,
            "Created attribute source"
        );
        Ok(Self {
            cache: TileCache::new(attribute, config.tile_bytes(attribute), config.max_resident_tiles),
            config,
            image,
            out_of_slots_logged: false,
        })
    }

    #[inline]
    pub const fn attribute(&self) -> Attribute {
        self.image.attribute()
    }

    #[inline]
    pub const fn config(&self) -> &AttributeConfig {
        &self.config
    }

    #[inline]
    pub const fn image(&self) -> &AttributeImage {
        &self.image
    }

    #[inline]
    pub const fn cache(&self) -> &TileCache {
        &self.cache
    }

    #[inline]
    pub const fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn set_frame(&mut self, frame: u64) {
        self.cache.set_frame(frame);
    }

    /// Key of the tile holding mip texel `(x, y)` of `level`.
    pub fn key_for_texel(&self, level: u8, x: i64, y: i64) -> TileKey {
        let tile_size = i64::from(self.config.tile_size);
        let (tiles_x, tiles_y) = self.config.tile_count(u32::from(level));
        TileKey::new(
            self.attribute(),
            level,
            wrap_coord_for_tile(div_floor(x, tile_size), tiles_x),
            wrap_coord_for_tile(div_floor(y, tile_size), tiles_y),
        )
    }

    /// Resident tile for `key`, synthesized on a miss.
    ///
    /// Returns `None` when the cache cannot allocate a slot.
    pub fn ensure_resident(&mut self, key: TileKey) -> Option<&ResidentTile> {
        let Self {
            config,
            image,
            cache,
            out_of_slots_logged,
        } = self;
        let tile_size = config.tile_size;
        match cache.ensure_resident(key, |key, out| {
            image.synthesize_tile(key.level, key.tile_x, key.tile_y, tile_size, out);
        }) {
            Ok(tile) => Some(tile),
            Err(err) => {
                Self::log_cache_failure(out_of_slots_logged, &err);
                None
            }
        }
    }

    /// Make a batch of tiles resident. Returns the number synthesized.
    pub fn ensure_set_resident(&mut self, keys: &[TileKey]) -> usize {
        let tile_size = self.config.tile_size;
        let image = &self.image;
        match self.cache.ensure_set_resident(keys, |key, out| {
            image.synthesize_tile(key.level, key.tile_x, key.tile_y, tile_size, out);
        }) {
            Ok(synthesized) => synthesized,
            Err(err) => {
                Self::log_cache_failure(&mut self.out_of_slots_logged, &err);
                0
            }
        }
    }

    /// Trim the cache back to its budget, keeping `required` tiles.
    pub fn enforce_budget(&mut self, required: &HashSet<PackedTileKey>) -> usize {
        self.cache.enforce_budget(required)
    }

    /// Copy the texel at mip coordinates `(x, y)` of `level` into `out`.
    ///
    /// Reads only resident tiles and does not change recency; texels of
    /// tiles that are not resident come back zero-filled.
    pub fn read_texel(&self, level: u8, x: i64, y: i64, out: &mut [u8]) {
        let key = self.key_for_texel(level, x, y);
        let stride = self.attribute().bytes_per_texel();
        match self.cache.get(key) {
            Some(tile) => {
                let tile_size = i64::from(self.config.tile_size);
                let lx = mod_floor(x, tile_size) as usize;
                let ly = mod_floor(y, tile_size) as usize;
                let offset = (ly * self.config.tile_size as usize + lx) * stride;
                out.copy_from_slice(&tile.data()[offset..offset + stride]);
            }
            None => out.fill(0),
        }
    }

    /// Copy the value at level-0 world sample `(sample_x, sample_y)` as seen
    /// by `level` into `out`.
    ///
    /// The sample must lie on the level's spacing grid.
    pub fn read_sample(&self, level: u8, sample_x: i64, sample_y: i64, out: &mut [u8]) {
        let tps = i64::from(self.config.texels_per_sample);
        self.read_texel(level, (sample_x >> level) * tps, (sample_y >> level) * tps, out);
    }

    /// Drop every resident tile.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    fn log_cache_failure(logged: &mut bool, err: &CacheError) {
        if !*logged {
            *logged = true;
            warn!(error = %err, "Tile cache allocation failed, degrading to zero-filled tiles");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_source(capacity: usize) -> AttributeSource {
        let config = AttributeConfig::new(64, 64)
            .with_tile_size(16)
            .with_max_resident_tiles(capacity);
        let heights: Vec<f32> = (0..64 * 64).map(|i| i as f32).collect();
        let image = AttributeImage::from_heights(64, 64, &heights).unwrap();
        AttributeSource::new(config, image).unwrap()
    }

    fn sample(source: &AttributeSource, level: u8, x: i64, y: i64) -> f32 {
        let mut out = [0u8; 4];
        source.read_sample(level, x, y, &mut out);
        f32::from_ne_bytes(out)
    }

    #[test]
    fn key_for_texel_wraps_negative_coordinates() {
        let source = ramp_source(8);
        let key = source.key_for_texel(0, -1, 70);
        assert_eq!((key.tile_x, key.tile_y), (3, 0));
        // Level 2 has a single tile per axis.
        let key = source.key_for_texel(2, -100, 5);
        assert_eq!((key.tile_x, key.tile_y), (0, 0));
    }

    #[test]
    fn resident_samples_match_wrapped_image() {
        let mut source = ramp_source(16);
        for level in 0..3u8 {
            let spacing = 1i64 << level;
            let samples: Vec<(i64, i64)> = (-3..3)
                .flat_map(|i| (-3..3).map(move |j| (i * spacing * 7, j * spacing * 5)))
                .collect();
            let keys: Vec<TileKey> = samples
                .iter()
                .map(|&(x, y)| source.key_for_texel(level, x >> level, y >> level))
                .collect();
            source.ensure_set_resident(&keys);
            for &(x, y) in &samples {
                assert_eq!(sample(&source, level, x, y), source.image().height_at(x, y));
            }
        }
    }

    #[test]
    fn missing_tiles_read_as_zero() {
        let source = ramp_source(4);
        assert_eq!(sample(&source, 0, 5, 5), 0.0);
    }

    #[test]
    fn zero_capacity_degrades_without_error() {
        let mut source = ramp_source(0);
        let key = source.key_for_texel(0, 1, 1);
        assert!(source.ensure_resident(key).is_none());
        assert_eq!(source.ensure_set_resident(&[key]), 0);
        assert!(source.out_of_slots_logged);
        assert!(source.cache().is_empty());
    }

    #[test]
    fn rejects_mismatched_image() {
        let config = AttributeConfig::new(128, 128);
        let image = AttributeImage::zeroed(Attribute::Height, 64, 64);
        assert!(AttributeSource::new(config, image).is_err());
    }
}
