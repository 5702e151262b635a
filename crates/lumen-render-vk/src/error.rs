// SPDX-License-Identifier: CEPL-1.0
use std::fmt;
use std::path::PathBuf;

use ash::prelude::VkResult;
use ash::vk;
use thiserror::Error;

/// Which object a failed `vkCreate*`/`vkAllocate*` call was building.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Instance,
    DebugMessenger,
    Surface,
    Device,
    Swapchain,
    ImageView,
    Image,
    Memory,
    RenderPass,
    Framebuffer,
    ShaderModule,
    PipelineLayout,
    Pipeline,
    PipelineCache,
    CommandPool,
    CommandBuffer,
    Semaphore,
    Fence,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Instance => "instance",
            Self::DebugMessenger => "debug messenger",
            Self::Surface => "surface",
            Self::Device => "logical device",
            Self::Swapchain => "swapchain",
            Self::ImageView => "image view",
            Self::Image => "image",
            Self::Memory => "device memory",
            Self::RenderPass => "render pass",
            Self::Framebuffer => "framebuffer",
            Self::ShaderModule => "shader module",
            Self::PipelineLayout => "pipeline layout",
            Self::Pipeline => "pipeline",
            Self::PipelineCache => "pipeline cache",
            Self::CommandPool => "command pool",
            Self::CommandBuffer => "command buffer",
            Self::Semaphore => "semaphore",
            Self::Fence => "fence",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum VkError {
    #[error("could not load the Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("window handle unavailable: {0}")]
    Handle(#[from] raw_window_handle::HandleError),

    #[error("name contains an interior NUL: {0}")]
    InvalidName(#[from] std::ffi::NulError),

    #[error("layer {0} was requested but is not installed")]
    MissingLayer(String),

    #[error("required instance extension {0} is not available")]
    MissingExtension(String),

    #[error("no suitable physical device ({0})")]
    NoSuitableDevice(String),

    #[error("no memory type satisfies {0:?}")]
    NoMemoryType(vk::MemoryPropertyFlags),

    #[error("{kind} creation failed: {result}")]
    Create {
        kind: ResourceKind,
        result: vk::Result,
    },

    #[error("could not read shader {}: {source}", path.display())]
    ShaderIo {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("acquired image {0} has no framebuffer")]
    ImageOutOfRange(u32),

    #[error("fence/semaphore call failed: {0}")]
    Sync(vk::Result),

    #[error("device lost")]
    DeviceLost,

    #[error("Vulkan call failed: {0}")]
    Vulkan(vk::Result),
}

impl From<vk::Result> for VkError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_DEVICE_LOST => VkError::DeviceLost,
            other => VkError::Vulkan(other),
        }
    }
}

impl VkError {
    pub fn is_device_lost(&self) -> bool {
        matches!(self, VkError::DeviceLost)
    }
}

pub trait VkResultExt<T> {
    /// Tag a failed creation call with what it was creating.
    fn creating(self, kind: ResourceKind) -> Result<T, VkError>;
}

impl<T> VkResultExt<T> for VkResult<T> {
    fn creating(self, kind: ResourceKind) -> Result<T, VkError> {
        self.map_err(|result| match result {
            vk::Result::ERROR_DEVICE_LOST => VkError::DeviceLost,
            result => VkError::Create { kind, result },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creation_errors_name_the_resource() {
        let err = VkResult::<()>::Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)
            .creating(ResourceKind::RenderPass)
            .unwrap_err();
        assert!(err.to_string().starts_with("render pass creation failed"));
    }

    #[test]
    fn device_lost_is_recognized_everywhere() {
        assert!(VkError::from(vk::Result::ERROR_DEVICE_LOST).is_device_lost());
        assert!(VkResult::<()>::Err(vk::Result::ERROR_DEVICE_LOST)
            .creating(ResourceKind::Fence)
            .unwrap_err()
            .is_device_lost());
        assert!(!VkError::from(vk::Result::ERROR_OUT_OF_HOST_MEMORY).is_device_lost());
    }
}
