//! Rendering side of the Geoclip terrain streamer.
//!
//! This crate provides:
//! - The ring mesh shared by every clipmap level
//! - An orbit camera that drives the streaming origin
//! - A Vulkan uploader writing dirty regions into level images
//! - The clipmap draw pass

pub mod camera;
pub mod clipmap_render;
pub mod clipmap_upload;
pub mod ring_mesh;

pub use camera::{CameraUniforms, OrbitCamera};
pub use clipmap_render::{
    frame_draws, vertex_input, ClipmapRenderer, ClipmapUniforms, GpuLevelData, TerrainShaders,
};
pub use clipmap_upload::{attribute_format, staging_copies, VulkanClipmapUploader};
pub use ring_mesh::{
    DrawCommand, DrawPushConstants, EdgeSide, MeshSection, PatchType, RingMesh, RingMeshBuilder,
    RingVertex, TrimOrientation,
};
