//! Vulkan side of clipmap streaming.
//!
//! Owns one image per level and attribute. Dirty regions are copied through
//! a host-visible staging buffer in a single blocking submission; an
//! optional compute pass can post-process the bounding box of the regions.

use std::sync::Arc;

use ash::vk;
use geoclip_core::{Attribute, ClipmapConfig};
use geoclip_gpu::command::{execute_single_time_commands, transition_image, CommandPool, ImageState};
use geoclip_gpu::descriptors::{write_storage_image, DescriptorPool, DescriptorSetLayoutBuilder};
use geoclip_gpu::error::{GpuError, Result};
use geoclip_gpu::memory::{GpuBuffer, GpuImage};
use geoclip_gpu::pipeline::ComputePipeline;
use geoclip_gpu::GpuContext;
use geoclip_world::upload::{ClipmapUploader, LevelUpload, UploadPushConstants};
use gpu_allocator::MemoryLocation;
use tracing::{debug, warn};

/// Smallest staging buffer allocation.
const MIN_STAGING_BYTES: u64 = 256 * 1024;

/// Image format of an attribute.
pub const fn attribute_format(attribute: Attribute) -> vk::Format {
    match attribute {
        Attribute::Height => vk::Format::R32_SFLOAT,
        Attribute::Diffuse | Attribute::Normal => vk::Format::R8G8B8A8_UNORM,
    }
}

/// Buffer-to-image copies per attribute, staged back to back from
/// `base_offset`: all height regions, then diffuse, then normal. Also
/// returns the number of staging bytes used.
pub fn staging_copies(upload: &LevelUpload, base_offset: u64) -> ([Vec<vk::BufferImageCopy>; 3], u64) {
    let mut offset = base_offset;
    let copies = Attribute::ALL.map(|attribute| {
        upload
            .regions
            .iter()
            .map(|region| {
                let copy = vk::BufferImageCopy::default()
                    .buffer_offset(offset)
                    .buffer_row_length(0)
                    .buffer_image_height(0)
                    .image_subresource(
                        vk::ImageSubresourceLayers::default()
                            .aspect_mask(vk::ImageAspectFlags::COLOR)
                            .mip_level(0)
                            .base_array_layer(0)
                            .layer_count(1),
                    )
                    .image_offset(vk::Offset3D {
                        x: region.rect.x as i32,
                        y: region.rect.y as i32,
                        z: 0,
                    })
                    .image_extent(vk::Extent3D {
                        width: region.rect.width,
                        height: region.rect.height,
                        depth: 1,
                    });
                offset += region.data(attribute).len() as u64;
                copy
            })
            .collect()
    });
    (copies, offset - base_offset)
}

/// Compute pass run over the dirty bounding box after the copy.
struct RegionUpdatePass {
    pipeline: ComputePipeline,
    set_layout: vk::DescriptorSetLayout,
    pool: DescriptorPool,
    /// One set per level binding its three images.
    sets: Vec<vk::DescriptorSet>,
}

/// Images of one level, indexed by attribute.
struct LevelImages {
    images: [GpuImage; 3],
}

/// [`ClipmapUploader`] writing into Vulkan images.
pub struct VulkanClipmapUploader {
    context: Arc<GpuContext>,
    command_pool: CommandPool,
    levels: Vec<LevelImages>,
    staging: Option<GpuBuffer>,
    region_pass: Option<RegionUpdatePass>,
    texture_size: u32,
}

impl VulkanClipmapUploader {
    /// Allocate level images for `config`.
    pub fn new(context: Arc<GpuContext>, config: &ClipmapConfig) -> Result<Self> {
        let texture_size = config.texture_size();
        let command_pool = unsafe {
            CommandPool::new(
                context.device(),
                context.queue_family(),
                vk::CommandPoolCreateFlags::TRANSIENT,
            )?
        };

        let mut uploader = Self {
            context,
            command_pool,
            levels: Vec::with_capacity(config.level_count),
            staging: None,
            region_pass: None,
            texture_size,
        };

        let usage = vk::ImageUsageFlags::TRANSFER_DST
            | vk::ImageUsageFlags::SAMPLED
            | vk::ImageUsageFlags::STORAGE;
        for level in 0..config.level_count {
            let mut allocator = uploader.context.allocator().lock();
            let mut images = Vec::with_capacity(3);
            for attribute in Attribute::ALL {
                let name = format!("clipmap_level{level}_{attribute}");
                images.push(allocator.create_image_2d(
                    texture_size,
                    attribute_format(attribute),
                    usage,
                    &name,
                )?);
            }
            drop(allocator);
            let images: [GpuImage; 3] = images
                .try_into()
                .map_err(|_| GpuError::InvalidState("expected three level images".to_string()))?;
            uploader.levels.push(LevelImages { images });
        }

        debug!(
            levels = config.level_count,
            texture_size, "Allocated clipmap level images"
        );
        Ok(uploader)
    }

    /// Enable the region update compute pass.
    ///
    /// The shader sees the level's height, diffuse and normal images as
    /// storage images at bindings 0, 1 and 2 and receives
    /// [`UploadPushConstants`].
    pub fn with_region_pass(mut self, shader_code: &[u32]) -> Result<Self> {
        let device = self.context.device();
        let stage = vk::ShaderStageFlags::COMPUTE;
        let set_layout = unsafe {
            DescriptorSetLayoutBuilder::new()
                .storage_image(0, stage)
                .storage_image(1, stage)
                .storage_image(2, stage)
                .build(device)?
        };

        let push_range = vk::PushConstantRange::default()
            .stage_flags(stage)
            .offset(0)
            .size(std::mem::size_of::<UploadPushConstants>() as u32);
        let pipeline =
            unsafe { ComputePipeline::new(device, shader_code, &[set_layout], &[push_range])? };

        let level_count = self.levels.len() as u32;
        let pool = unsafe {
            DescriptorPool::new(
                device,
                level_count,
                &[vk::DescriptorPoolSize {
                    ty: vk::DescriptorType::STORAGE_IMAGE,
                    descriptor_count: level_count * 3,
                }],
            )?
        };
        let layouts = vec![set_layout; self.levels.len()];
        let sets = unsafe { pool.allocate(device, &layouts)? };
        for (set, level) in sets.iter().zip(&self.levels) {
            for (binding, image) in level.images.iter().enumerate() {
                unsafe {
                    write_storage_image(device, *set, binding as u32, image.view, vk::ImageLayout::GENERAL);
                }
            }
        }

        self.region_pass = Some(RegionUpdatePass {
            pipeline,
            set_layout,
            pool,
            sets,
        });
        Ok(self)
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub const fn texture_size(&self) -> u32 {
        self.texture_size
    }

    /// Views of every level's image of one attribute, finest first.
    pub fn image_views(&self, attribute: Attribute) -> Vec<vk::ImageView> {
        self.levels
            .iter()
            .map(|level| level.images[attribute.index()].view)
            .collect()
    }

    fn ensure_staging(&mut self, bytes: u64) -> Result<&GpuBuffer> {
        let too_small = self.staging.as_ref().map_or(true, |buffer| buffer.size < bytes);
        if too_small {
            let mut allocator = self.context.allocator().lock();
            if let Some(mut old) = self.staging.take() {
                allocator.free_buffer(&mut old)?;
            }
            let size = bytes.next_power_of_two().max(MIN_STAGING_BYTES);
            self.staging = Some(allocator.create_buffer(
                size,
                vk::BufferUsageFlags::TRANSFER_SRC,
                MemoryLocation::CpuToGpu,
                "clipmap_staging",
            )?);
            debug!(size, "Resized clipmap staging buffer");
        }
        self.staging
            .as_ref()
            .ok_or_else(|| GpuError::InvalidState("staging buffer missing".to_string()))
    }
}

impl ClipmapUploader for VulkanClipmapUploader {
    type Error = GpuError;

    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    fn upload_level(&mut self, upload: &LevelUpload) -> Result<()> {
        if upload.regions.is_empty() {
            return Ok(());
        }
        if upload.level >= self.levels.len() || upload.texture_size != self.texture_size {
            return Err(GpuError::InvalidState(format!(
                "upload for level {} ({}²) does not match the allocated images",
                upload.level, upload.texture_size
            )));
        }

        let (copies, total) = staging_copies(upload, 0);
        let staging = self.ensure_staging(total)?;
        let mut offset = 0;
        for attribute in Attribute::ALL {
            for region in &upload.regions {
                let data = region.data(attribute);
                staging.write_bytes(offset, data)?;
                offset += data.len() as u64;
            }
        }
        let staging_buffer = staging.buffer;

        let device = self.context.device();
        let level = &self.levels[upload.level];
        let from = if upload.first_upload {
            ImageState::UNDEFINED
        } else {
            ImageState::SHADER_READ
        };
        let region_pass = self.region_pass.as_ref().filter(|_| !upload.dispatch.is_empty());

        unsafe {
            execute_single_time_commands(device, &self.command_pool, self.context.queue(), |cmd| {
                for image in &level.images {
                    transition_image(device, cmd, image.image, from, ImageState::GENERAL_WRITE);
                }
                for (image, regions) in level.images.iter().zip(&copies) {
                    device.cmd_copy_buffer_to_image(
                        cmd,
                        staging_buffer,
                        image.image,
                        vk::ImageLayout::GENERAL,
                        regions,
                    );
                }

                if let Some(pass) = region_pass {
                    for image in &level.images {
                        transition_image(
                            device,
                            cmd,
                            image.image,
                            ImageState::GENERAL_WRITE,
                            ImageState::GENERAL_WRITE,
                        );
                    }
                    device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, pass.pipeline.pipeline);
                    device.cmd_bind_descriptor_sets(
                        cmd,
                        vk::PipelineBindPoint::COMPUTE,
                        pass.pipeline.layout,
                        0,
                        &[pass.sets[upload.level]],
                        &[],
                    );
                    device.cmd_push_constants(
                        cmd,
                        pass.pipeline.layout,
                        vk::ShaderStageFlags::COMPUTE,
                        0,
                        bytemuck::bytes_of(&upload.push_constants),
                    );
                    device.cmd_dispatch(cmd, upload.dispatch.x, upload.dispatch.y, upload.dispatch.z);
                }

                for image in &level.images {
                    transition_image(device, cmd, image.image, ImageState::GENERAL_WRITE, ImageState::SHADER_READ);
                }
            })?;
        }

        Ok(())
    }
}

impl Drop for VulkanClipmapUploader {
    fn drop(&mut self) {
        let device = self.context.device();
        unsafe {
            if let Err(err) = device.device_wait_idle() {
                warn!(error = %err, "Device wait failed while dropping clipmap uploader");
            }
            if let Some(pass) = self.region_pass.take() {
                pass.pool.destroy(device);
                pass.pipeline.destroy(device);
                device.destroy_descriptor_set_layout(pass.set_layout, None);
            }
            self.command_pool.destroy(device);
        }

        let mut allocator = self.context.allocator().lock();
        if let Some(mut staging) = self.staging.take() {
            let _ = allocator.free_buffer(&mut staging);
        }
        for level in &mut self.levels {
            for image in &mut level.images {
                let _ = allocator.free_image(image);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geoclip_core::SampleCoord;
    use geoclip_world::populate::LevelTextures;
    use geoclip_world::tracker::LevelOriginTracker;

    #[test]
    fn staging_layout_is_packed_per_attribute() {
        let mut tracker = LevelOriginTracker::new(0, 16);
        let first = tracker.plan(SampleCoord::ZERO);
        tracker.commit(&first);
        let plan = tracker.plan(SampleCoord::new(-6, 4));
        let upload = LevelUpload::from_plan(&plan, &LevelTextures::new(16), 1.0);

        let (copies, total) = staging_copies(&upload, 64);
        assert_eq!(total as usize, upload.total_bytes());
        assert_eq!(copies[0][0].buffer_offset, 64);

        let mut expected = 64;
        for (attribute, attribute_copies) in Attribute::ALL.iter().zip(&copies) {
            assert_eq!(attribute_copies.len(), upload.regions.len());
            for (copy, region) in attribute_copies.iter().zip(&upload.regions) {
                assert_eq!(copy.buffer_offset, expected);
                assert_eq!(copy.image_extent.width, region.rect.width);
                assert_eq!(copy.image_offset.x, region.rect.x as i32);
                expected += region.data(*attribute).len() as u64;
            }
        }
    }

    #[test]
    fn formats_match_texel_sizes() {
        assert_eq!(attribute_format(Attribute::Height), vk::Format::R32_SFLOAT);
        for attribute in Attribute::ALL {
            assert_eq!(attribute.bytes_per_texel(), 4);
        }
    }
}
