//! Clipmap terrain drawing.
//!
//! The ring mesh is uploaded once. Per frame the driver writes
//! [`ClipmapUniforms`] for its frame slot and records one indexed draw per
//! mesh section per level, coarsest level first.

use std::sync::Arc;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use geoclip_core::constants::MAX_LEVEL_COUNT;
use geoclip_core::{Attribute, ClipmapConfig, SampleCoord};
use geoclip_gpu::descriptors::{
    write_sampled_images, write_uniform_buffer, DescriptorPool, DescriptorSetLayoutBuilder,
};
use geoclip_gpu::error::{GpuError, Result};
use geoclip_gpu::memory::{create_wrapping_sampler, GpuBuffer};
use geoclip_gpu::pipeline::{GraphicsPipeline, GraphicsPipelineConfig};
use geoclip_gpu::sync::FrameFences;
use geoclip_gpu::GpuContext;
use geoclip_world::LevelSnapshot;
use gpu_allocator::MemoryLocation;
use tracing::{debug, warn};

use crate::camera::{CameraUniforms, OrbitCamera};
use crate::clipmap_upload::VulkanClipmapUploader;
use crate::ring_mesh::{DrawCommand, DrawPushConstants, RingMesh, RingVertex};

/// Per-level data read by the terrain vertex stage.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GpuLevelData {
    /// World-space position of the level's first sample.
    pub world_origin: [f32; 2],
    /// World-space distance between samples.
    pub spacing: f32,
    pub texture_size: f32,
    /// Toroidal texel offset of the window origin.
    pub texel_offset: [u32; 2],
    pub level: u32,
    /// Non-zero once the level holds data.
    pub valid: u32,
}

impl GpuLevelData {
    pub fn from_snapshot(snapshot: &LevelSnapshot, config: &ClipmapConfig) -> Self {
        Self {
            world_origin: snapshot.world_origin.to_array(),
            spacing: snapshot.spacing as f32 * config.sample_world_size,
            texture_size: config.texture_size() as f32,
            texel_offset: [snapshot.offset.x, snapshot.offset.y],
            level: snapshot.level as u32,
            valid: u32::from(snapshot.is_initialized()),
        }
    }
}

/// Uniform buffer contents for one frame.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct ClipmapUniforms {
    pub camera: CameraUniforms,
    pub levels: [GpuLevelData; MAX_LEVEL_COUNT],
    pub level_count: u32,
    pub sample_world_size: f32,
    /// Skirt depth in world units.
    pub skirt_depth: f32,
    pub _pad: u32,
}

impl ClipmapUniforms {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new(
        camera: &OrbitCamera,
        snapshots: &[LevelSnapshot],
        config: &ClipmapConfig,
        skirt_depth: f32,
    ) -> Self {
        let mut levels = [GpuLevelData::default(); MAX_LEVEL_COUNT];
        for (slot, snapshot) in levels.iter_mut().zip(snapshots) {
            *slot = GpuLevelData::from_snapshot(snapshot, config);
        }
        Self {
            camera: camera.uniforms(),
            levels,
            level_count: snapshots.len().min(MAX_LEVEL_COUNT) as u32,
            sample_world_size: config.sample_world_size,
            skirt_depth,
            _pad: 0,
        }
    }
}

/// Vertex input state for [`RingVertex`].
pub fn vertex_input() -> (
    Vec<vk::VertexInputBindingDescription>,
    Vec<vk::VertexInputAttributeDescription>,
) {
    let bindings = vec![vk::VertexInputBindingDescription {
        binding: 0,
        stride: std::mem::size_of::<RingVertex>() as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    }];
    let attributes = vec![
        vk::VertexInputAttributeDescription {
            location: 0,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: std::mem::offset_of!(RingVertex, position) as u32,
        },
        vk::VertexInputAttributeDescription {
            location: 1,
            binding: 0,
            format: vk::Format::R32G32_SFLOAT,
            offset: std::mem::offset_of!(RingVertex, edge_dir) as u32,
        },
    ];
    (bindings, attributes)
}

/// Draws for a frame as `(level, draw)`, coarsest level first.
///
/// `camera` is the level-0 streaming sample the levels were snapped to; it
/// picks the interior trim and seam geometry of each coarser level.
pub fn frame_draws(mesh: &RingMesh, camera: SampleCoord, level_count: usize) -> Vec<(usize, DrawCommand)> {
    (0..level_count)
        .rev()
        .flat_map(|level| {
            mesh.draw_list(level as u32, mesh.nesting(camera, level))
                .into_iter()
                .map(move |draw| (level, draw))
        })
        .collect()
}

/// Shaders and target formats for the terrain pipeline.
pub struct TerrainShaders<'a> {
    pub vertex: &'a [u32],
    pub fragment: &'a [u32],
    pub color_format: vk::Format,
    pub depth_format: Option<vk::Format>,
}

/// GPU resources for drawing the clipmap.
///
/// Descriptor set layout: binding 0 is [`ClipmapUniforms`], bindings 1, 2
/// and 3 are per-level sampler arrays for height, diffuse and normal.
pub struct ClipmapRenderer {
    context: Arc<GpuContext>,
    mesh: RingMesh,
    level_count: usize,
    vertex_buffer: GpuBuffer,
    index_buffer: GpuBuffer,
    uniform_buffers: Vec<GpuBuffer>,
    pipeline: GraphicsPipeline,
    set_layout: vk::DescriptorSetLayout,
    pool: DescriptorPool,
    sets: Vec<vk::DescriptorSet>,
    sampler: vk::Sampler,
}

impl ClipmapRenderer {
    /// Upload `mesh` and create the terrain pipeline sampling the images of
    /// `uploader`.
    pub fn new(
        context: Arc<GpuContext>,
        mesh: RingMesh,
        uploader: &VulkanClipmapUploader,
        frames_in_flight: usize,
        shaders: &TerrainShaders<'_>,
    ) -> Result<Self> {
        let level_count = uploader.level_count();
        if frames_in_flight == 0 || level_count == 0 {
            return Err(GpuError::InvalidState(
                "clipmap renderer needs at least one frame slot and one level".to_string(),
            ));
        }
        if mesh.texture_size() != uploader.texture_size() {
            return Err(GpuError::InvalidState(format!(
                "ring mesh of {} cells does not fit level textures of {} texels",
                mesh.grid_size(),
                uploader.texture_size()
            )));
        }
        let device = context.device_arc();

        let (vertex_buffer, index_buffer, uniform_buffers) = {
            let mut allocator = context.allocator().lock();
            let vertex_buffer = allocator.create_buffer(
                mesh.vertex_bytes().len() as u64,
                vk::BufferUsageFlags::VERTEX_BUFFER,
                MemoryLocation::CpuToGpu,
                "clipmap_ring_vertices",
            )?;
            vertex_buffer.write_bytes(0, mesh.vertex_bytes())?;
            let index_buffer = allocator.create_buffer(
                mesh.index_bytes().len() as u64,
                vk::BufferUsageFlags::INDEX_BUFFER,
                MemoryLocation::CpuToGpu,
                "clipmap_ring_indices",
            )?;
            index_buffer.write_bytes(0, mesh.index_bytes())?;
            let uniform_buffers = (0..frames_in_flight)
                .map(|frame| {
                    allocator.create_buffer(
                        ClipmapUniforms::SIZE as u64,
                        vk::BufferUsageFlags::UNIFORM_BUFFER,
                        MemoryLocation::CpuToGpu,
                        &format!("clipmap_uniforms_{frame}"),
                    )
                })
                .collect::<Result<Vec<_>>>()?;
            (vertex_buffer, index_buffer, uniform_buffers)
        };

        let stages = vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT;
        let levels = level_count as u32;
        let set_layout = unsafe {
            DescriptorSetLayoutBuilder::new()
                .uniform_buffer(0, stages)
                .sampled_images(1, levels, stages)
                .sampled_images(2, levels, stages)
                .sampled_images(3, levels, stages)
                .build(&device)?
        };

        let push_range = vk::PushConstantRange::default()
            .stage_flags(stages)
            .offset(0)
            .size(std::mem::size_of::<DrawPushConstants>() as u32);
        let (bindings, attributes) = vertex_input();
        let mut config = GraphicsPipelineConfig::new(shaders.vertex.to_vec(), shaders.fragment.to_vec())
            .with_vertex_input(bindings, attributes)
            .with_color_formats(vec![shaders.color_format]);
        config.depth_format = shaders.depth_format;
        config.depth_test = shaders.depth_format.is_some();
        config.depth_write = shaders.depth_format.is_some();
        let pipeline = unsafe { GraphicsPipeline::new(&device, &config, &[set_layout], &[push_range])? };

        let slots = frames_in_flight as u32;
        let pool = unsafe {
            DescriptorPool::new(
                &device,
                slots,
                &[
                    vk::DescriptorPoolSize {
                        ty: vk::DescriptorType::UNIFORM_BUFFER,
                        descriptor_count: slots,
                    },
                    vk::DescriptorPoolSize {
                        ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                        descriptor_count: slots * levels * 3,
                    },
                ],
            )?
        };
        let sets = unsafe { pool.allocate(&device, &vec![set_layout; frames_in_flight])? };
        let sampler = unsafe { create_wrapping_sampler(&device, vk::Filter::LINEAR)? };

        for (set, buffer) in sets.iter().zip(&uniform_buffers) {
            unsafe {
                write_uniform_buffer(&device, *set, 0, buffer.buffer, 0, ClipmapUniforms::SIZE as u64);
                for (binding, attribute) in (1..).zip(Attribute::ALL) {
                    write_sampled_images(&device, *set, binding, &uploader.image_views(attribute), sampler);
                }
            }
        }

        debug!(
            levels = level_count,
            frames_in_flight,
            sections = mesh.sections.len(),
            "Created clipmap renderer"
        );

        Ok(Self {
            context,
            mesh,
            level_count,
            vertex_buffer,
            index_buffer,
            uniform_buffers,
            pipeline,
            set_layout,
            pool,
            sets,
            sampler,
        })
    }

    pub fn mesh(&self) -> &RingMesh {
        &self.mesh
    }

    /// Write the uniforms of the current frame slot.
    ///
    /// Waits on every other slot's fence first; the caller has already
    /// waited on the current slot's fence before recording.
    pub fn update_uniforms(&self, fences: &FrameFences, uniforms: &ClipmapUniforms) -> Result<()> {
        let slot = fences.current_frame();
        let buffer = self
            .uniform_buffers
            .get(slot)
            .ok_or_else(|| GpuError::InvalidState(format!("no uniform buffer for frame slot {slot}")))?;
        unsafe { fences.wait_others(self.context.device())? };
        buffer.write(std::slice::from_ref(uniforms))
    }

    /// Record every level's draws into `cmd` for levels snapped to `camera`.
    ///
    /// # Safety
    /// `cmd` must be recording inside a dynamic rendering scope whose
    /// attachments match the pipeline formats, with viewport and scissor set.
    pub unsafe fn record(&self, cmd: vk::CommandBuffer, frame_slot: usize, camera: SampleCoord) {
        let device = self.context.device();
        let Some(&set) = self.sets.get(frame_slot) else {
            warn!(frame_slot, "Skipping clipmap draw for unknown frame slot");
            return;
        };

        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline.pipeline);
        device.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::GRAPHICS,
            self.pipeline.layout,
            0,
            &[set],
            &[],
        );
        device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer.buffer], &[0]);
        device.cmd_bind_index_buffer(cmd, self.index_buffer.buffer, 0, vk::IndexType::UINT32);

        let stages = vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT;
        for (_, draw) in frame_draws(&self.mesh, camera, self.level_count) {
            device.cmd_push_constants(
                cmd,
                self.pipeline.layout,
                stages,
                0,
                bytemuck::bytes_of(&draw.push_constants),
            );
            device.cmd_draw_indexed(cmd, draw.index_count, 1, draw.first_index, 0, 0);
        }
    }
}

impl Drop for ClipmapRenderer {
    fn drop(&mut self) {
        let device = self.context.device();
        unsafe {
            let _ = device.device_wait_idle();
            device.destroy_sampler(self.sampler, None);
            self.pool.destroy(device);
            self.pipeline.destroy(device);
            device.destroy_descriptor_set_layout(self.set_layout, None);
        }

        let mut allocator = self.context.allocator().lock();
        let _ = allocator.free_buffer(&mut self.vertex_buffer);
        let _ = allocator.free_buffer(&mut self.index_buffer);
        for buffer in &mut self.uniform_buffers {
            let _ = allocator.free_buffer(buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring_mesh::{PatchType, RingMeshBuilder};
    use geoclip_world::TexelOffset;
    use glam::Vec2;

    #[test]
    fn uniform_layout_is_16_byte_aligned() {
        assert_eq!(std::mem::size_of::<GpuLevelData>(), 32);
        assert_eq!(ClipmapUniforms::SIZE % 16, 0);
        assert_eq!(std::mem::size_of::<DrawPushConstants>(), 16);
    }

    #[test]
    fn level_data_scales_spacing() {
        let config = ClipmapConfig::default().with_sample_world_size(0.5);
        let snapshot = LevelSnapshot {
            level: 3,
            spacing: 8,
            origin: Some(SampleCoord::new(-1024, 512)),
            world_origin: Vec2::new(-512.0, 256.0),
            offset: TexelOffset::new(5, 7),
            pending: false,
        };
        let data = GpuLevelData::from_snapshot(&snapshot, &config);
        assert_eq!(data.spacing, 4.0);
        assert_eq!(data.world_origin, [-512.0, 256.0]);
        assert_eq!(data.texel_offset, [5, 7]);
        assert_eq!(data.texture_size, 256.0);
        assert_eq!(data.valid, 1);

        let uniforms = ClipmapUniforms::new(&OrbitCamera::default(), &[snapshot], &config, 2.0);
        assert_eq!(uniforms.level_count, 1);
        assert_eq!(uniforms.levels[0], data);
        assert_eq!(uniforms.levels[1].valid, 0);
    }

    #[test]
    fn vertex_input_matches_vertex_layout() {
        let (bindings, attributes) = vertex_input();
        assert_eq!(bindings[0].stride, 20);
        assert_eq!(attributes[0].offset, 0);
        assert_eq!(attributes[1].offset, 12);
    }

    #[test]
    fn frames_draw_coarse_to_fine() {
        let mesh = RingMeshBuilder::new(14).with_block_size(4).build().unwrap();
        let camera = SampleCoord::new(5, -3);
        let draws = frame_draws(&mesh, camera, 3);
        let levels: Vec<usize> = draws.iter().map(|(level, _)| *level).collect();
        assert!(levels.windows(2).all(|pair| pair[0] >= pair[1]));
        assert_eq!(levels.first(), Some(&2));

        let fillers: Vec<usize> = draws
            .iter()
            .filter(|(_, draw)| draw.push_constants.patch_type == PatchType::Filler.as_u32())
            .map(|(level, _)| *level)
            .collect();
        assert_eq!(fillers, vec![0]);

        // Each coarser level draws the interior trim for where its finer level sits.
        for level in 1..3 {
            let orientation = mesh.nesting(camera, level).unwrap();
            let trims: Vec<u32> = draws
                .iter()
                .filter(|(l, draw)| *l == level && draw.push_constants.patch_type == PatchType::Trim.as_u32())
                .map(|(_, draw)| draw.push_constants.block)
                .collect();
            assert!(trims.contains(&orientation.index()));
        }
    }
}
