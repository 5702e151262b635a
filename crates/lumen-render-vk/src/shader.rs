// SPDX-License-Identifier: CEPL-1.0
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use ash::util::read_spv;
use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{ResourceKind, VkError, VkResultExt};

/// A SPIR-V module for one stage. Consumed by pipeline creation; the module
/// is destroyed when the `Shader` drops.
pub struct Shader {
    device: Arc<Device>,
    module: vk::ShaderModule,
    stage: vk::ShaderStageFlags,
}

impl Shader {
    /// Reads a precompiled SPIR-V blob. The bytes are not inspected beyond
    /// the word alignment and magic number `read_spv` checks.
    pub fn from_path(
        device: &Arc<Device>,
        path: &Path,
        stage: vk::ShaderStageFlags,
    ) -> Result<Self, VkError> {
        let io_err = |source| VkError::ShaderIo {
            path: path.to_path_buf(),
            source,
        };
        let bytes = std::fs::read(path).map_err(io_err)?;
        let code = read_spv(&mut Cursor::new(&bytes[..])).map_err(io_err)?;
        let shader = Self::from_words(device, &code, stage)?;
        debug!("vk: loaded {:?} shader {}", stage, path.display());
        Ok(shader)
    }

    pub fn from_words(
        device: &Arc<Device>,
        code: &[u32],
        stage: vk::ShaderStageFlags,
    ) -> Result<Self, VkError> {
        let ci = vk::ShaderModuleCreateInfo {
            s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
            code_size: std::mem::size_of_val(code),
            p_code: code.as_ptr(),
            ..Default::default()
        };
        // SAFETY: code outlives the call
        let module = unsafe { device.raw().create_shader_module(&ci, None) }
            .creating(ResourceKind::ShaderModule)?;
        Ok(Self {
            device: Arc::clone(device),
            module,
            stage,
        })
    }

    pub fn module(&self) -> vk::ShaderModule {
        self.module
    }

    pub fn stage(&self) -> vk::ShaderStageFlags {
        self.stage
    }

    pub(crate) fn stage_info(&self) -> vk::PipelineShaderStageCreateInfo<'static> {
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: self.stage,
            module: self.module,
            p_name: c"main".as_ptr(),
            ..Default::default()
        }
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        // SAFETY: pipelines built from the module no longer need it
        unsafe { self.device.raw().destroy_shader_module(self.module, None) };
    }
}
