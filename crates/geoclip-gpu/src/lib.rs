//! Vulkan layer for Geoclip.
//!
//! Headless device setup, memory allocation through gpu-allocator, one-shot
//! command submission, frame fences and pipeline creation. Presentation is
//! left to the embedding application.

pub mod command;
pub mod context;
pub mod descriptors;
pub mod error;
pub mod instance;
pub mod memory;
pub mod pipeline;
pub mod sync;

pub use command::{execute_single_time_commands, transition_image, CommandPool, ImageState};
pub use context::{GpuContext, GpuContextBuilder};
pub use descriptors::{
    write_sampled_images, write_storage_image, write_uniform_buffer, DescriptorPool,
    DescriptorSetLayoutBuilder,
};
pub use error::{GpuError, Result};
pub use memory::{create_wrapping_sampler, GpuAllocator, GpuBuffer, GpuImage};
pub use pipeline::{ComputePipeline, GraphicsPipeline, GraphicsPipelineConfig};
pub use sync::{create_fence, FrameFences};
