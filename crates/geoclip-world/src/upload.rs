//! Upload requests handed to the GPU side.
//!
//! The streaming engine never talks to a graphics API directly. It builds a
//! [`LevelUpload`] for every populated level and passes it to a
//! [`ClipmapUploader`].

use bytemuck::{Pod, Zeroable};
use geoclip_core::constants::DISPATCH_GROUP_SIZE;
use geoclip_core::math::div_ceil_u32;
use geoclip_core::{Attribute, SampleCoord, TexelRect};
use glam::Vec2;
use thiserror::Error;

use crate::populate::{LevelTexture, LevelTextures};
use crate::tracker::{LevelUpdatePlan, TexelOffset};

/// Push constants for the region update compute pass.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct UploadPushConstants {
    /// Level origin in level samples (`origin >> level`).
    pub level_origin: [i32; 2],
    /// Toroidal write offset in texels.
    pub texel_offset: [u32; 2],
    /// Bounding box of the dirty regions.
    pub region_origin: [u32; 2],
    pub region_extent: [u32; 2],
    pub level: u32,
    /// Level spacing in level-0 samples.
    pub spacing: u32,
    pub texture_size: u32,
    pub first_upload: u32,
}

/// Compute workgroup counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchSize {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl DispatchSize {
    /// Workgroups covering `rect` with square groups of `group_size`.
    pub const fn covering(rect: &TexelRect, group_size: u32) -> Self {
        Self {
            x: div_ceil_u32(rect.width, group_size),
            y: div_ceil_u32(rect.height, group_size),
            z: 1,
        }
    }

    pub const fn is_empty(&self) -> bool {
        self.x == 0 || self.y == 0
    }
}

/// One dirty rectangle with packed texels for every attribute.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegionUpload {
    pub rect: TexelRect,
    data: [Vec<u8>; 3],
}

impl RegionUpload {
    /// Packed row-major texels of one attribute.
    pub fn data(&self, attribute: Attribute) -> &[u8] {
        &self.data[attribute.index()]
    }
}

/// Everything the GPU side needs to update one level.
#[derive(Clone, Debug)]
pub struct LevelUpload {
    pub level: usize,
    pub origin: SampleCoord,
    pub world_origin: Vec2,
    pub offset: TexelOffset,
    pub texture_size: u32,
    pub regions: Vec<RegionUpload>,
    /// Bounding box of all regions.
    pub bounds: TexelRect,
    pub dispatch: DispatchSize,
    pub push_constants: UploadPushConstants,
    /// The level images hold no valid contents yet, so the first layout
    /// transition starts from `UNDEFINED`.
    pub first_upload: bool,
}

impl LevelUpload {
    /// Package the regions of an executed plan from the CPU textures.
    pub fn from_plan(plan: &LevelUpdatePlan, textures: &LevelTextures, sample_world_size: f32) -> Self {
        let texture_size = textures.get(Attribute::Height).size();
        let regions = plan
            .regions
            .iter()
            .map(|rect| RegionUpload {
                rect: *rect,
                data: Attribute::ALL.map(|attribute| textures.get(attribute).region_bytes(rect)),
            })
            .collect();
        let bounds = TexelRect::bounding(&plan.regions);
        let spacing = 1i64 << plan.level;

        Self {
            level: plan.level,
            origin: plan.origin,
            world_origin: plan.origin.to_world(sample_world_size),
            offset: plan.offset,
            texture_size,
            regions,
            bounds,
            dispatch: DispatchSize::covering(&bounds, DISPATCH_GROUP_SIZE),
            push_constants: UploadPushConstants {
                level_origin: [
                    (plan.origin.x >> plan.level) as i32,
                    (plan.origin.y >> plan.level) as i32,
                ],
                texel_offset: [plan.offset.x, plan.offset.y],
                region_origin: [bounds.x, bounds.y],
                region_extent: [bounds.width, bounds.height],
                level: plan.level as u32,
                spacing: spacing as u32,
                texture_size,
                first_upload: u32::from(plan.first_upload),
            },
            first_upload: plan.first_upload,
        }
    }

    /// Bytes of texel data across all regions and attributes.
    pub fn total_bytes(&self) -> usize {
        self.regions
            .iter()
            .flat_map(|region| region.data.iter())
            .map(Vec::len)
            .sum()
    }

    /// Texels covered by the regions.
    pub fn texel_count(&self) -> u64 {
        self.regions.iter().map(|region| region.rect.area()).sum()
    }
}

/// GPU side of the streaming engine.
pub trait ClipmapUploader {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Apply `upload` to the level images. Must not return before the
    /// images are back in a shader-readable state.
    fn upload_level(&mut self, upload: &LevelUpload) -> Result<(), Self::Error>;
}

/// Failure injected into a [`RecordingUploader`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("injected upload failure for level {level}")]
pub struct InjectedUploadError {
    pub level: usize,
}

/// Summary of one recorded upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadRecord {
    pub level: usize,
    pub regions: Vec<TexelRect>,
    pub bounds: TexelRect,
    pub first_upload: bool,
}

/// CPU-only uploader that mirrors what the GPU images would contain.
///
/// A first upload starts from cleared images, matching an image whose
/// contents are undefined before its first write.
#[derive(Debug, Default)]
pub struct RecordingUploader {
    levels: Vec<Option<LevelTextures>>,
    records: Vec<UploadRecord>,
    fail_levels: Vec<usize>,
}

impl RecordingUploader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next upload of `level` fail.
    pub fn fail_next(&mut self, level: usize) {
        self.fail_levels.push(level);
    }

    pub fn records(&self) -> &[UploadRecord] {
        &self.records
    }

    /// Drain the recorded uploads.
    pub fn take_records(&mut self) -> Vec<UploadRecord> {
        std::mem::take(&mut self.records)
    }

    /// Mirrored image contents of a level, once it has been uploaded.
    pub fn texture(&self, level: usize, attribute: Attribute) -> Option<&LevelTexture> {
        self.levels
            .get(level)?
            .as_ref()
            .map(|textures| textures.get(attribute))
    }
}

impl ClipmapUploader for RecordingUploader {
    type Error = InjectedUploadError;

    fn upload_level(&mut self, upload: &LevelUpload) -> Result<(), Self::Error> {
        if let Some(index) = self.fail_levels.iter().position(|&level| level == upload.level) {
            self.fail_levels.swap_remove(index);
            return Err(InjectedUploadError {
                level: upload.level,
            });
        }

        if self.levels.len() <= upload.level {
            self.levels.resize_with(upload.level + 1, || None);
        }
        let textures = self.levels[upload.level].get_or_insert_with(|| LevelTextures::new(upload.texture_size));
        for attribute in Attribute::ALL {
            let texture = textures.get_mut(attribute);
            if upload.first_upload {
                texture.clear();
            }
            for region in &upload.regions {
                texture.write_region(&region.rect, region.data(attribute));
            }
        }

        self.records.push(UploadRecord {
            level: upload.level,
            regions: upload.regions.iter().map(|region| region.rect).collect(),
            bounds: upload.bounds,
            first_upload: upload.first_upload,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::LevelOriginTracker;

    #[test]
    fn dispatch_rounds_up_to_group_size() {
        let dispatch = DispatchSize::covering(&TexelRect::new(0, 0, 2, 256), 8);
        assert_eq!(dispatch, DispatchSize { x: 1, y: 32, z: 1 });
        assert!(DispatchSize::covering(&TexelRect::default(), 8).is_empty());
    }

    #[test]
    fn upload_packs_regions_and_bounds() {
        let mut tracker = LevelOriginTracker::new(1, 16);
        let first = tracker.plan(SampleCoord::new(-8, 4));
        tracker.commit(&first);
        let plan = tracker.plan(SampleCoord::new(-12, 8));
        let textures = LevelTextures::new(16);
        let upload = LevelUpload::from_plan(&plan, &textures, 0.5);

        assert_eq!(upload.regions.len(), plan.regions.len());
        assert_eq!(upload.texel_count(), plan.dirty_texels());
        assert_eq!(upload.total_bytes() as u64, plan.dirty_texels() * 12);
        assert_eq!(upload.push_constants.level_origin, [-6, 4]);
        assert_eq!(upload.push_constants.spacing, 2);
        assert_eq!(upload.world_origin, Vec2::new(-6.0, 4.0));
        assert!(!upload.first_upload);
        for region in &upload.regions {
            assert!(upload.bounds.union(&region.rect) == upload.bounds);
        }
    }

    #[test]
    fn recording_uploader_injects_failures_once() {
        let tracker = LevelOriginTracker::new(0, 8);
        let plan = tracker.plan(SampleCoord::ZERO);
        let upload = LevelUpload::from_plan(&plan, &LevelTextures::new(8), 1.0);

        let mut uploader = RecordingUploader::new();
        uploader.fail_next(0);
        assert_eq!(uploader.upload_level(&upload), Err(InjectedUploadError { level: 0 }));
        uploader.upload_level(&upload).unwrap();
        assert_eq!(uploader.records().len(), 1);
        assert!(uploader.records()[0].first_upload);
        assert!(uploader.texture(0, Attribute::Height).is_some());
        assert!(uploader.texture(1, Attribute::Height).is_none());
    }
}
