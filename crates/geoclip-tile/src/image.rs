//! Full-resolution attribute images and tile synthesis.

use geoclip_core::math::wrap_coord_for_tile;
use geoclip_core::Attribute;

use crate::error::{Result, TileError};

/// Full-resolution backing image for one attribute.
///
/// Texels are stored row-major as raw bytes: one native-endian `f32` per
/// texel for height, RGBA8 for diffuse and normal.
#[derive(Clone)]
pub struct AttributeImage {
    attribute: Attribute,
    width: u32,
    height: u32,
    bytes: Vec<u8>,
}

impl std::fmt::Debug for AttributeImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributeImage")
            .field("attribute", &self.attribute)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

impl AttributeImage {
    /// Height image from one `f32` per texel.
    pub fn from_heights(width: u32, height: u32, heights: &[f32]) -> Result<Self> {
        Self::from_bytes(
            Attribute::Height,
            width,
            height,
            bytemuck::cast_slice(heights).to_vec(),
        )
    }

    /// Color image (diffuse or normal) from RGBA8 texels.
    pub fn from_rgba(attribute: Attribute, width: u32, height: u32, texels: &[[u8; 4]]) -> Result<Self> {
        Self::from_bytes(attribute, width, height, bytemuck::cast_slice(texels).to_vec())
    }

    /// Image from raw texel bytes.
    pub fn from_bytes(attribute: Attribute, width: u32, height: u32, bytes: Vec<u8>) -> Result<Self> {
        let texels = width as usize * height as usize;
        let stride = attribute.bytes_per_texel();
        if bytes.len() != texels * stride {
            return Err(TileError::ImageSize {
                attribute,
                expected: texels,
                actual: bytes.len() / stride,
            });
        }
        Ok(Self {
            attribute,
            width,
            height,
            bytes,
        })
    }

    /// Zero-filled image.
    pub fn zeroed(attribute: Attribute, width: u32, height: u32) -> Self {
        let len = width as usize * height as usize * attribute.bytes_per_texel();
        Self {
            attribute,
            width,
            height,
            bytes: vec![0; len],
        }
    }

    #[inline]
    pub const fn attribute(&self) -> Attribute {
        self.attribute
    }

    #[inline]
    pub const fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub const fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Texel bytes at an in-range position.
    #[inline]
    pub fn texel(&self, x: u32, y: u32) -> &[u8] {
        let stride = self.attribute.bytes_per_texel();
        let offset = (y as usize * self.width as usize + x as usize) * stride;
        &self.bytes[offset..offset + stride]
    }

    /// Texel bytes with wrap-around addressing.
    #[inline]
    pub fn texel_wrapped(&self, x: i64, y: i64) -> &[u8] {
        self.texel(
            wrap_coord_for_tile(x, self.width),
            wrap_coord_for_tile(y, self.height),
        )
    }

    /// Height value with wrap-around addressing. Zero for color images.
    pub fn height_at(&self, x: i64, y: i64) -> f32 {
        match self.attribute {
            Attribute::Height => bytemuck::pod_read_unaligned(self.texel_wrapped(x, y)),
            Attribute::Diffuse | Attribute::Normal => 0.0,
        }
    }

    /// Fill `out` with tile `(tile_x, tile_y)` of mip `level`.
    ///
    /// Local texel `(lx, ly)` reads image texel
    /// `((tile_x * tile_size + lx) << level) mod width` (same for Y), so at
    /// level 0 a tile is a plain wrapped sub-block of the image and coarser
    /// levels point-sample every `2^level`-th texel.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn synthesize_tile(&self, level: u8, tile_x: u32, tile_y: u32, tile_size: u32, out: &mut [u8]) {
        let stride = self.attribute.bytes_per_texel();
        debug_assert_eq!(out.len(), (tile_size * tile_size) as usize * stride);

        let column = |local: u32, base: u32, size: u32| -> u32 {
            let texel = i64::from(base) * i64::from(tile_size) + i64::from(local);
            // Reduce before shifting so large tile coordinates cannot overflow.
            let reduced = i64::from(wrap_coord_for_tile(texel, size));
            wrap_coord_for_tile(reduced << level, size)
        };

        let columns: Vec<u32> = (0..tile_size)
            .map(|lx| column(lx, tile_x, self.width))
            .collect();

        for (ly, row) in out.chunks_exact_mut(tile_size as usize * stride).enumerate() {
            let sy = column(ly as u32, tile_y, self.height);
            for (texel, &sx) in row.chunks_exact_mut(stride).zip(&columns) {
                texel.copy_from_slice(self.texel(sx, sy));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(width: u32, height: u32) -> AttributeImage {
        let heights: Vec<f32> = (0..width * height).map(|i| i as f32).collect();
        AttributeImage::from_heights(width, height, &heights).unwrap()
    }

    fn read(bytes: &[u8], index: usize) -> f32 {
        bytemuck::pod_read_unaligned(&bytes[index * 4..index * 4 + 4])
    }

    #[test]
    fn rejects_wrong_size() {
        let err = AttributeImage::from_heights(4, 4, &[0.0; 15]).unwrap_err();
        assert!(matches!(err, TileError::ImageSize { expected: 16, actual: 15, .. }));
    }

    #[test]
    fn level_zero_tile_is_wrapped_sub_block() {
        let image = ramp(8, 8);
        let mut out = vec![0u8; 4 * 4 * 4];
        // Tile (2, 0) at size 4 starts at x = 8, which wraps to 0.
        image.synthesize_tile(0, 2, 0, 4, &mut out);
        assert_eq!(read(&out, 0), 0.0);
        assert_eq!(read(&out, 3), 3.0);
        assert_eq!(read(&out, 4), 8.0);

        image.synthesize_tile(0, 1, 1, 4, &mut out);
        assert_eq!(read(&out, 0), image.height_at(4, 4));
        assert_eq!(read(&out, 15), image.height_at(7, 7));
    }

    #[test]
    fn coarser_levels_point_sample() {
        let image = ramp(16, 16);
        let mut out = vec![0u8; 4 * 4 * 4];
        image.synthesize_tile(1, 1, 0, 4, &mut out);
        // Local x 0..4 of tile 1 reads x = (4..8) << 1 = 8, 10, 12, 14.
        let row: Vec<f32> = (0..4).map(|i| read(&out, i)).collect();
        assert_eq!(row, vec![8.0, 10.0, 12.0, 14.0]);
        // Second row reads y = 2.
        assert_eq!(read(&out, 4), image.height_at(8, 2));
    }

    #[test]
    fn wrapped_reads() {
        let image = ramp(4, 4);
        assert_eq!(image.height_at(-1, 0), 3.0);
        assert_eq!(image.height_at(0, -1), 12.0);
        assert_eq!(image.height_at(-1_000_000_000, 5), image.height_at(0, 1));
    }
}
