//! Enumerates the backing tiles a level window reads.

use geoclip_core::math::{div_floor, wrap_coord_for_tile};
use geoclip_core::{Attribute, ClipmapConfig, SampleCoord};
use geoclip_tile::{PackedTileKey, TileKey};
use hashbrown::HashSet;

/// Tile keys per attribute, row-major in window order, without duplicates.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VisibleTiles {
    per_attribute: [Vec<TileKey>; 3],
}

impl VisibleTiles {
    pub fn get(&self, attribute: Attribute) -> &[TileKey] {
        &self.per_attribute[attribute.index()]
    }

    /// Packed keys of one attribute, for budget enforcement.
    pub fn required_set(&self, attribute: Attribute) -> HashSet<PackedTileKey> {
        self.get(attribute).iter().map(|key| key.pack()).collect()
    }

    /// Total number of keys over all attributes.
    pub fn len(&self) -> usize {
        self.per_attribute.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.per_attribute.iter().all(Vec::is_empty)
    }
}

/// Tiles every attribute needs to populate `level` at `origin`.
///
/// The window holds `texture_size` samples per axis starting at `origin`
/// with the level's spacing. Sample `s` reads mip texel
/// `(s >> level) * texels_per_sample`, and the touched tile range is wrapped
/// into the attribute's tile grid.
pub fn collect_visible_tiles(config: &ClipmapConfig, level: usize, origin: SampleCoord) -> VisibleTiles {
    let spacing = config.spacing(level);
    let samples = i64::from(config.texture_size());
    let first_x = div_floor(origin.x, spacing);
    let first_y = div_floor(origin.y, spacing);

    let mut visible = VisibleTiles::default();
    for attribute in Attribute::ALL {
        let attribute_config = config.attribute(attribute);
        let tps = i64::from(attribute_config.texels_per_sample);
        let tile_size = i64::from(attribute_config.tile_size);
        let (tiles_x, tiles_y) = attribute_config.tile_count(level as u32);

        let tile_range = |first: i64| {
            let start = div_floor(first * tps, tile_size);
            let end = div_floor((first + samples - 1) * tps, tile_size);
            start..=end
        };

        let mut seen = HashSet::new();
        let keys = &mut visible.per_attribute[attribute.index()];
        for ty in tile_range(first_y) {
            for tx in tile_range(first_x) {
                let key = TileKey::new(
                    attribute,
                    level as u8,
                    wrap_coord_for_tile(tx, tiles_x),
                    wrap_coord_for_tile(ty, tiles_y),
                );
                if seen.insert(key.pack()) {
                    keys.push(key);
                }
            }
        }
    }
    visible
}

#[cfg(test)]
mod tests {
    use super::*;
    use geoclip_core::AttributeConfig;

    fn small_config() -> ClipmapConfig {
        ClipmapConfig::new(4, 63)
            .with_attribute(Attribute::Height, AttributeConfig::new(256, 256).with_tile_size(16))
            .with_attribute(
                Attribute::Diffuse,
                AttributeConfig::new(512, 512)
                    .with_tile_size(16)
                    .with_texels_per_sample(2),
            )
            .with_attribute(Attribute::Normal, AttributeConfig::new(64, 64).with_tile_size(16))
    }

    #[test]
    fn deterministic_for_same_inputs() {
        let config = small_config();
        let origin = SampleCoord::new(-40, 72);
        let a = collect_visible_tiles(&config, 1, origin);
        // Unrelated work in between must not matter.
        let _ = collect_visible_tiles(&config, 0, SampleCoord::new(1000, -1000));
        let b = collect_visible_tiles(&config, 1, origin);
        assert_eq!(a, b);
    }

    #[test]
    fn aligned_window_covers_tile_grid_span() {
        let config = small_config();
        // 64 samples starting on a tile boundary span exactly 4 height tiles.
        let visible = collect_visible_tiles(&config, 0, SampleCoord::new(32, 0));
        let height = visible.get(Attribute::Height);
        assert_eq!(height.len(), 16);
        assert_eq!(height[0], TileKey::new(Attribute::Height, 0, 2, 0));
        assert_eq!(height[1], TileKey::new(Attribute::Height, 0, 3, 0));
        assert_eq!(height[4], TileKey::new(Attribute::Height, 0, 2, 1));

        // Two texels per sample doubles the span.
        assert_eq!(visible.get(Attribute::Diffuse).len(), 64);
    }

    #[test]
    fn unaligned_window_touches_extra_tile() {
        let config = small_config();
        let visible = collect_visible_tiles(&config, 0, SampleCoord::new(8, 8));
        assert_eq!(visible.get(Attribute::Height).len(), 25);
    }

    #[test]
    fn wraps_and_deduplicates() {
        let config = small_config();
        // The normal image is only 4 tiles wide; a 5-tile span wraps onto itself.
        let visible = collect_visible_tiles(&config, 0, SampleCoord::new(-8, -8));
        let normal = visible.get(Attribute::Normal);
        assert_eq!(normal.len(), 16);
        let unique: HashSet<_> = normal.iter().copied().collect();
        assert_eq!(unique.len(), normal.len());
        assert!(normal.iter().all(|key| key.tile_x < 4 && key.tile_y < 4));
        assert_eq!(normal[0], TileKey::new(Attribute::Normal, 0, 3, 3));
    }

    #[test]
    fn coarse_levels_use_level_tile_grid() {
        let config = small_config();
        // Level 3: the height tile grid is 256 / (16 << 3) = 2 tiles wide.
        let visible = collect_visible_tiles(&config, 3, SampleCoord::new(-256, -256));
        let height = visible.get(Attribute::Height);
        assert_eq!(height.len(), 4);
        assert!(height.iter().all(|key| key.level == 3));
        assert_eq!(visible.required_set(Attribute::Height).len(), 4);
    }
}
