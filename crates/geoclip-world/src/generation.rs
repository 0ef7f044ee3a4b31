//! Procedural attribute images.
//!
//! Heights come from fractal noise sampled on a 4D torus, so every image
//! tiles seamlessly and can be addressed with wrap-around sampling. Diffuse
//! and normal images are derived from a height field evaluated at their own
//! resolution.

use std::f64::consts::TAU;

use geoclip_core::{Attribute, ClipmapConfig};
use geoclip_tile::{AttributeImage, Result as TileResult};
use glam::Vec3;
use noise::{Fbm, MultiFractal, NoiseFn, Perlin};
use rayon::prelude::*;
use tracing::info;

use crate::WorldSeed;

const WATER: [u8; 3] = [58, 103, 178];
const SAND: [u8; 3] = [215, 199, 133];
const GRASS: [u8; 3] = [86, 125, 70];
const DIRT: [u8; 3] = [139, 90, 43];
const STONE: [u8; 3] = [128, 128, 128];
const SNOW: [u8; 3] = [236, 238, 245];

/// Terrain generator configuration.
#[derive(Debug, Clone)]
pub struct TerrainConfig {
    /// Seed for noise generation.
    pub seed: WorldSeed,
    /// Height of the lowest terrain point in world units.
    pub base_height: f32,
    /// Maximum terrain height variation in world units.
    pub terrain_height: f32,
    /// Noise periods across one image repeat.
    pub feature_scale: f64,
    /// Number of noise octaves for detail.
    pub octaves: usize,
    /// Frequency multiplier between octaves.
    pub lacunarity: f64,
    /// Amplitude multiplier between octaves.
    pub persistence: f64,
    /// Normalized height below which terrain is colored as water.
    pub water_level: f32,
    /// Normalized height above which terrain is colored as snow.
    pub snow_level: f32,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            base_height: 0.0,
            terrain_height: 96.0,
            feature_scale: 6.0,
            octaves: 5,
            lacunarity: 2.0,
            persistence: 0.5,
            water_level: 0.3,
            snow_level: 0.82,
        }
    }
}

/// The three generated attribute images.
#[derive(Debug, Clone)]
pub struct AttributeImages {
    pub height: AttributeImage,
    pub diffuse: AttributeImage,
    pub normal: AttributeImage,
}

impl AttributeImages {
    /// Images in [`Attribute::index`] order.
    pub fn into_array(self) -> [AttributeImage; 3] {
        [self.height, self.diffuse, self.normal]
    }

    pub const fn get(&self, attribute: Attribute) -> &AttributeImage {
        match attribute {
            Attribute::Height => &self.height,
            Attribute::Diffuse => &self.diffuse,
            Attribute::Normal => &self.normal,
        }
    }
}

/// Procedural terrain generator using fractal noise.
#[derive(Clone)]
pub struct TerrainGenerator {
    config: TerrainConfig,
    height_noise: Fbm<Perlin>,
}

impl TerrainGenerator {
    /// Create a new terrain generator with the given configuration.
    pub fn new(config: TerrainConfig) -> Self {
        let height_noise = Fbm::<Perlin>::new(config.seed as u32)
            .set_octaves(config.octaves)
            .set_lacunarity(config.lacunarity)
            .set_persistence(config.persistence);

        Self {
            config,
            height_noise,
        }
    }

    /// Create a terrain generator with default configuration.
    pub fn with_seed(seed: WorldSeed) -> Self {
        Self::new(TerrainConfig {
            seed,
            ..Default::default()
        })
    }

    /// Get the terrain configuration.
    pub const fn config(&self) -> &TerrainConfig {
        &self.config
    }

    /// Terrain height at normalized image coordinates.
    ///
    /// `u` and `v` wrap with period 1.
    pub fn height_at_uv(&self, u: f64, v: f64) -> f32 {
        let radius = self.config.feature_scale / TAU;
        let (su, cu) = (u * TAU).sin_cos();
        let (sv, cv) = (v * TAU).sin_cos();
        let n = self
            .height_noise
            .get([cu * radius, su * radius, cv * radius, sv * radius]);
        let normalized = ((n + 1.0) * 0.5).clamp(0.0, 1.0) as f32;
        self.config.base_height + normalized * self.config.terrain_height
    }

    /// Height field of `width x height` texels covering one full period.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn generate_heights(&self, width: u32, height: u32) -> Vec<f32> {
        let mut heights = vec![0.0; width as usize * height as usize];
        heights
            .par_chunks_mut(width as usize)
            .enumerate()
            .for_each(|(y, row)| {
                let v = y as f64 / f64::from(height);
                for (x, texel) in row.iter_mut().enumerate() {
                    *texel = self.height_at_uv(x as f64 / f64::from(width), v);
                }
            });
        heights
    }

    /// Generate every attribute image at the sizes `config` asks for.
    pub fn generate_images(&self, config: &ClipmapConfig) -> TileResult<AttributeImages> {
        let height_config = config.attribute(Attribute::Height);
        let heights = self.generate_heights(height_config.image_width, height_config.image_height);
        let height = AttributeImage::from_heights(
            height_config.image_width,
            height_config.image_height,
            &heights,
        )?;

        let diffuse_config = config.attribute(Attribute::Diffuse);
        let diffuse_heights =
            self.generate_heights(diffuse_config.image_width, diffuse_config.image_height);
        let diffuse = AttributeImage::from_rgba(
            Attribute::Diffuse,
            diffuse_config.image_width,
            diffuse_config.image_height,
            &self.diffuse_from_heights(
                &diffuse_heights,
                diffuse_config.image_width,
                diffuse_config.image_height,
                config.sample_world_size / diffuse_config.texels_per_sample as f32,
            ),
        )?;

        let normal_config = config.attribute(Attribute::Normal);
        let normal_heights =
            self.generate_heights(normal_config.image_width, normal_config.image_height);
        let normal = AttributeImage::from_rgba(
            Attribute::Normal,
            normal_config.image_width,
            normal_config.image_height,
            &normals_from_heights(
                &normal_heights,
                normal_config.image_width,
                normal_config.image_height,
                config.sample_world_size / normal_config.texels_per_sample as f32,
            ),
        )?;

        info!(
            seed = self.config.seed,
            height_width = height.width(),
            diffuse_width = diffuse.width(),
            normal_width = normal.width(),
            "Generated attribute images"
        );

        Ok(AttributeImages {
            height,
            diffuse,
            normal,
        })
    }

    /// Color ramp over normalized height, with steep slopes shown as rock.
    pub fn diffuse_from_heights(
        &self,
        heights: &[f32],
        width: u32,
        height: u32,
        texel_world_size: f32,
    ) -> Vec<[u8; 4]> {
        let mut texels = vec![[0u8; 4]; heights.len()];
        texels
            .par_chunks_mut(width as usize)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, texel) in row.iter_mut().enumerate() {
                    let h = heights[y * width as usize + x];
                    let t = (h - self.config.base_height) / self.config.terrain_height.max(f32::EPSILON);
                    let normal = surface_normal(heights, width, height, x as u32, y as u32, texel_world_size);
                    let [r, g, b] = self.material_color(t, normal.y);
                    *texel = [r, g, b, 255];
                }
            });
        texels
    }

    fn material_color(&self, t: f32, up: f32) -> [u8; 3] {
        let water = self.config.water_level;
        if t < water {
            return WATER;
        }
        if t < water + 0.04 {
            return SAND;
        }
        if up < 0.7 {
            return STONE;
        }
        if t > self.config.snow_level {
            return SNOW;
        }
        // Grass fades to dirt towards the rock line.
        let fade = ((t - water) / (self.config.snow_level - water)).clamp(0.0, 1.0);
        lerp_color(GRASS, DIRT, fade * fade)
    }
}

/// Encoded surface normals from wrapped central differences.
///
/// Each texel stores `normal * 0.5 + 0.5` in RGB and 255 in alpha.
pub fn normals_from_heights(heights: &[f32], width: u32, height: u32, texel_world_size: f32) -> Vec<[u8; 4]> {
    let mut texels = vec![[0u8; 4]; heights.len()];
    texels
        .par_chunks_mut(width as usize)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, texel) in row.iter_mut().enumerate() {
                let n = surface_normal(heights, width, height, x as u32, y as u32, texel_world_size);
                *texel = [encode_unit(n.x), encode_unit(n.y), encode_unit(n.z), 255];
            }
        });
    texels
}

/// Decode an RGBA8 normal texel.
pub fn decode_normal(texel: [u8; 4]) -> Vec3 {
    Vec3::new(
        f32::from(texel[0]) / 255.0,
        f32::from(texel[1]) / 255.0,
        f32::from(texel[2]) / 255.0,
    ) * 2.0
        - Vec3::ONE
}

fn surface_normal(heights: &[f32], width: u32, height: u32, x: u32, y: u32, texel_world_size: f32) -> Vec3 {
    let at = |x: u32, y: u32| heights[y as usize * width as usize + x as usize];
    let left = at((x + width - 1) % width, y);
    let right = at((x + 1) % width, y);
    let up = at(x, (y + height - 1) % height);
    let down = at(x, (y + 1) % height);
    let dx = (right - left) / (2.0 * texel_world_size);
    let dz = (down - up) / (2.0 * texel_world_size);
    Vec3::new(-dx, 1.0, -dz).normalize()
}

fn encode_unit(value: f32) -> u8 {
    ((value * 0.5 + 0.5).clamp(0.0, 1.0) * 255.0).round() as u8
}

fn lerp_color(a: [u8; 3], b: [u8; 3], t: f32) -> [u8; 3] {
    let mix = |a: u8, b: u8| (f32::from(a) + (f32::from(b) - f32::from(a)) * t).round() as u8;
    [mix(a[0], b[0]), mix(a[1], b[1]), mix(a[2], b[2])]
}
