//! GPU error types.

use ash::vk;
use thiserror::Error;

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// Vulkan loader could not be opened.
    #[error("Failed to load Vulkan: {0}")]
    Loading(String),

    /// No suitable GPU found.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Shader module creation failed.
    #[error("Shader compilation failed: {0}")]
    ShaderCompilation(String),

    /// Pipeline creation failed.
    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl GpuError {
    /// True for swapchain conditions the caller should answer by recreating
    /// the swapchain rather than aborting.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::SUBOPTIMAL_KHR)
        )
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_swapchain_conditions() {
        assert!(GpuError::from(vk::Result::ERROR_OUT_OF_DATE_KHR).is_recoverable());
        assert!(GpuError::from(vk::Result::SUBOPTIMAL_KHR).is_recoverable());
        assert!(!GpuError::from(vk::Result::ERROR_DEVICE_LOST).is_recoverable());
        assert!(!GpuError::NoSuitableDevice.is_recoverable());
    }
}
