//! CPU mirror of the level textures and region population.

use std::ops::Deref;

use geoclip_core::{Attribute, TexelRect};
use geoclip_tile::AttributeSource;
use rayon::prelude::*;

use crate::tracker::{window_of_texel, LevelUpdatePlan};

/// CPU copy of one attribute's level texture.
#[derive(Clone)]
pub struct LevelTexture {
    attribute: Attribute,
    size: u32,
    bytes: Vec<u8>,
}

impl std::fmt::Debug for LevelTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LevelTexture")
            .field("attribute", &self.attribute)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl LevelTexture {
    /// Zero-filled `size x size` texture.
    pub fn new(attribute: Attribute, size: u32) -> Self {
        Self {
            attribute,
            size,
            bytes: vec![0; size as usize * size as usize * attribute.bytes_per_texel()],
        }
    }

    #[inline]
    pub const fn attribute(&self) -> Attribute {
        self.attribute
    }

    #[inline]
    pub const fn size(&self) -> u32 {
        self.size
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn texel(&self, x: u32, y: u32) -> &[u8] {
        let stride = self.attribute.bytes_per_texel();
        let offset = (y as usize * self.size as usize + x as usize) * stride;
        &self.bytes[offset..offset + stride]
    }

    /// Height at a texel. Zero for color textures.
    pub fn height(&self, x: u32, y: u32) -> f32 {
        match self.attribute {
            Attribute::Height => bytemuck::pod_read_unaligned(self.texel(x, y)),
            Attribute::Diffuse | Attribute::Normal => 0.0,
        }
    }

    /// Texels of `rect`, packed row-major.
    pub fn region_bytes(&self, rect: &TexelRect) -> Vec<u8> {
        let stride = self.attribute.bytes_per_texel();
        let row_len = rect.width as usize * stride;
        let mut out = Vec::with_capacity(row_len * rect.height as usize);
        for y in rect.y..rect.bottom() {
            let start = (y as usize * self.size as usize + rect.x as usize) * stride;
            out.extend_from_slice(&self.bytes[start..start + row_len]);
        }
        out
    }

    /// Overwrite `rect` with texels packed row-major.
    pub fn write_region(&mut self, rect: &TexelRect, data: &[u8]) {
        let stride = self.attribute.bytes_per_texel();
        let row_len = rect.width as usize * stride;
        debug_assert_eq!(data.len(), row_len * rect.height as usize);
        for (row, src) in data.chunks_exact(row_len).enumerate() {
            let y = rect.y as usize + row;
            let start = (y * self.size as usize + rect.x as usize) * stride;
            self.bytes[start..start + row_len].copy_from_slice(src);
        }
    }

    /// Zero every texel.
    pub fn clear(&mut self) {
        self.bytes.fill(0);
    }
}

/// One CPU texture per attribute for a level.
#[derive(Clone, Debug)]
pub struct LevelTextures {
    textures: [LevelTexture; 3],
}

impl LevelTextures {
    pub fn new(size: u32) -> Self {
        Self {
            textures: Attribute::ALL.map(|attribute| LevelTexture::new(attribute, size)),
        }
    }

    #[inline]
    pub fn get(&self, attribute: Attribute) -> &LevelTexture {
        &self.textures[attribute.index()]
    }

    #[inline]
    pub fn get_mut(&mut self, attribute: Attribute) -> &mut LevelTexture {
        &mut self.textures[attribute.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &LevelTexture> {
        self.textures.iter()
    }
}

/// Write the dirty regions of `plan` into `texture` from `source`.
///
/// Texel `(tx, ty)` receives the sample at window position
/// `(tx, ty) - plan.offset` (wrapped). Tiles must already be resident;
/// missing ones read as zeros. Returns the number of texels written.
#[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
pub fn populate_attribute(plan: &LevelUpdatePlan, source: &AttributeSource, texture: &mut LevelTexture) -> u64 {
    let size = texture.size;
    let stride = texture.attribute.bytes_per_texel();
    let row_bytes = size as usize * stride;
    let level = plan.level as u8;
    let spacing = 1i64 << plan.level;
    let origin = plan.origin;
    let offset = plan.offset;

    for rect in &plan.regions {
        let rows = &mut texture.bytes[rect.y as usize * row_bytes..rect.bottom() as usize * row_bytes];
        rows.par_chunks_mut(row_bytes).enumerate().for_each(|(row, texels)| {
            let ty = rect.y + row as u32;
            for tx in rect.x..rect.right() {
                let (wx, wy) = window_of_texel(tx, ty, offset, size);
                let start = tx as usize * stride;
                source.read_sample(
                    level,
                    origin.x + i64::from(wx) * spacing,
                    origin.y + i64::from(wy) * spacing,
                    &mut texels[start..start + stride],
                );
            }
        });
    }
    plan.dirty_texels()
}

/// Populate every attribute of a level.
///
/// `source` is called once per attribute, so callers holding each source
/// behind its own lock only hold one lock at a time.
pub fn populate_level<S, F>(plan: &LevelUpdatePlan, mut source: F, textures: &mut LevelTextures) -> u64
where
    S: Deref<Target = AttributeSource>,
    F: FnMut(Attribute) -> S,
{
    let mut written = 0;
    for attribute in Attribute::ALL {
        let guard = source(attribute);
        written += populate_attribute(plan, &guard, textures.get_mut(attribute));
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::LevelOriginTracker;
    use geoclip_core::{AttributeConfig, SampleCoord};
    use geoclip_tile::AttributeImage;

    fn ramp_source() -> AttributeSource {
        let config = AttributeConfig::new(64, 64)
            .with_tile_size(16)
            .with_max_resident_tiles(64);
        let heights: Vec<f32> = (0..64 * 64).map(|i| i as f32).collect();
        AttributeSource::new(config, AttributeImage::from_heights(64, 64, &heights).unwrap()).unwrap()
    }

    fn warm(source: &mut AttributeSource, level: u8) {
        let (tx, ty) = source.config().tile_count(u32::from(level));
        let keys: Vec<_> = (0..ty)
            .flat_map(|y| (0..tx).map(move |x| (x, y)))
            .map(|(x, y)| geoclip_tile::TileKey::new(Attribute::Height, level, x, y))
            .collect();
        source.ensure_set_resident(&keys);
    }

    #[test]
    fn full_refresh_writes_window() {
        let mut source = ramp_source();
        warm(&mut source, 0);
        let tracker = LevelOriginTracker::new(0, 16);
        let plan = tracker.plan(SampleCoord::new(4, 2));
        let mut texture = LevelTexture::new(Attribute::Height, 16);
        assert_eq!(populate_attribute(&plan, &source, &mut texture), 256);
        assert_eq!(texture.height(0, 0), source.image().height_at(4, 2));
        assert_eq!(texture.height(15, 3), source.image().height_at(19, 5));
    }

    #[test]
    fn incremental_writes_only_exposed_columns() {
        let mut source = ramp_source();
        warm(&mut source, 1);
        let mut tracker = LevelOriginTracker::new(1, 16);
        let mut texture = LevelTexture::new(Attribute::Height, 16);

        let first = tracker.plan(SampleCoord::ZERO);
        populate_attribute(&first, &source, &mut texture);
        tracker.commit(&first);
        let before = texture.clone();

        let plan = tracker.plan(SampleCoord::new(4, 0));
        assert_eq!(populate_attribute(&plan, &source, &mut texture), 32);
        tracker.commit(&plan);

        // Columns 0 and 1 now hold window columns 14 and 15.
        for ty in 0..16 {
            assert_eq!(texture.height(0, ty), source.image().height_at(4 + 28, 2 * i64::from(ty)));
            assert_eq!(texture.height(1, ty), source.image().height_at(4 + 30, 2 * i64::from(ty)));
            for tx in 2..16 {
                assert_eq!(texture.texel(tx, ty), before.texel(tx, ty));
            }
        }
    }

    #[test]
    fn region_bytes_are_packed() {
        let mut source = ramp_source();
        warm(&mut source, 0);
        let plan = LevelOriginTracker::new(0, 8).plan(SampleCoord::ZERO);
        let mut texture = LevelTexture::new(Attribute::Height, 8);
        populate_attribute(&plan, &source, &mut texture);
        let bytes = texture.region_bytes(&TexelRect::new(2, 1, 3, 2));
        let values: Vec<f32> = bytes
            .chunks_exact(4)
            .map(bytemuck::pod_read_unaligned)
            .collect();
        assert_eq!(values, vec![66.0, 67.0, 68.0, 130.0, 131.0, 132.0]);
    }

    #[test]
    fn missing_tiles_populate_zeros() {
        let source = ramp_source();
        let plan = LevelOriginTracker::new(0, 8).plan(SampleCoord::new(1, 1));
        let mut texture = LevelTexture::new(Attribute::Height, 8);
        populate_attribute(&plan, &source, &mut texture);
        assert!(texture.bytes().iter().all(|&b| b == 0));
    }
}
