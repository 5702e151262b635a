// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{ResourceKind, VkError, VkResultExt};
use crate::render_pass::RenderPass;
use crate::shader::Shader;

/// Procedural graphics pipeline: no vertex input, one color attachment.
pub struct GraphicsPipelineDesc {
    pub vertex: Shader,
    pub fragment: Shader,
    pub render_pass: Arc<RenderPass>,
}

impl GraphicsPipelineDesc {
    pub fn new(vertex: Shader, fragment: Shader, render_pass: Arc<RenderPass>) -> Self {
        Self {
            vertex,
            fragment,
            render_pass,
        }
    }
}

pub struct ComputePipelineDesc {
    pub shader: Shader,
}

impl ComputePipelineDesc {
    pub fn new(shader: Shader) -> Self {
        Self { shader }
    }
}

/// Shaders move into the descriptor and are destroyed once the pipeline
/// exists.
pub enum PipelineDesc {
    Graphics(GraphicsPipelineDesc),
    Compute(ComputePipelineDesc),
}

/// Immutable pipeline plus the layout it owns. A graphics pipeline keeps
/// its render pass alive.
pub struct Pipeline {
    device: Arc<Device>,
    raw: vk::Pipeline,
    layout: vk::PipelineLayout,
    bind_point: vk::PipelineBindPoint,
    render_pass: Option<Arc<RenderPass>>,
}

impl Pipeline {
    pub fn new(
        device: &Arc<Device>,
        cache: vk::PipelineCache,
        desc: PipelineDesc,
    ) -> Result<Self, VkError> {
        let layout_ci = vk::PipelineLayoutCreateInfo {
            s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
            ..Default::default()
        };
        // SAFETY: plain creation call
        let layout = unsafe { device.raw().create_pipeline_layout(&layout_ci, None) }
            .creating(ResourceKind::PipelineLayout)?;

        let built = match desc {
            PipelineDesc::Graphics(g) => {
                create_graphics(device, cache, layout, &g).map(|raw| (raw, Some(g.render_pass)))
            }
            PipelineDesc::Compute(c) => create_compute(device, cache, layout, &c).map(|raw| (raw, None)),
        };
        let (raw, render_pass) = match built {
            Ok(v) => v,
            Err(e) => {
                // SAFETY: nothing references the layout yet
                unsafe { device.raw().destroy_pipeline_layout(layout, None) };
                return Err(e);
            }
        };

        let bind_point = if render_pass.is_some() {
            vk::PipelineBindPoint::GRAPHICS
        } else {
            vk::PipelineBindPoint::COMPUTE
        };
        debug!("vk: pipeline created ({:?})", bind_point);
        Ok(Self {
            device: Arc::clone(device),
            raw,
            layout,
            bind_point,
            render_pass,
        })
    }

    pub fn raw(&self) -> vk::Pipeline {
        self.raw
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        self.bind_point
    }

    pub fn render_pass(&self) -> Option<&Arc<RenderPass>> {
        self.render_pass.as_ref()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        // SAFETY: no pending command buffer binds this pipeline
        unsafe {
            self.device.raw().destroy_pipeline(self.raw, None);
            self.device.raw().destroy_pipeline_layout(self.layout, None);
        }
    }
}

fn create_graphics(
    device: &Device,
    cache: vk::PipelineCache,
    layout: vk::PipelineLayout,
    desc: &GraphicsPipelineDesc,
) -> Result<vk::Pipeline, VkError> {
    let stages = [desc.vertex.stage_info(), desc.fragment.stage_info()];

    // Geometry comes from gl_VertexIndex.
    let vertex_input = vk::PipelineVertexInputStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
        ..Default::default()
    };
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
        topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        ..Default::default()
    };
    let dyn_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
        dynamic_state_count: dyn_states.len() as u32,
        p_dynamic_states: dyn_states.as_ptr(),
        ..Default::default()
    };
    let viewport_state = vk::PipelineViewportStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
        viewport_count: 1,
        scissor_count: 1,
        ..Default::default()
    };
    let raster = vk::PipelineRasterizationStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
        polygon_mode: vk::PolygonMode::FILL,
        cull_mode: vk::CullModeFlags::BACK,
        front_face: vk::FrontFace::CLOCKWISE,
        line_width: 1.0,
        ..Default::default()
    };
    let multisample = vk::PipelineMultisampleStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
        rasterization_samples: vk::SampleCountFlags::TYPE_1,
        ..Default::default()
    };
    let has_depth = desc.render_pass.depth_format().is_some();
    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DEPTH_STENCIL_STATE_CREATE_INFO,
        depth_test_enable: has_depth.into(),
        depth_write_enable: has_depth.into(),
        depth_compare_op: vk::CompareOp::LESS_OR_EQUAL,
        ..Default::default()
    };
    let color_blend_att = vk::PipelineColorBlendAttachmentState {
        color_write_mask: vk::ColorComponentFlags::RGBA,
        blend_enable: vk::FALSE,
        ..Default::default()
    };
    let color_blend = vk::PipelineColorBlendStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &color_blend_att,
        ..Default::default()
    };

    let info = vk::GraphicsPipelineCreateInfo {
        s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
        stage_count: stages.len() as u32,
        p_stages: stages.as_ptr(),
        p_vertex_input_state: &vertex_input,
        p_input_assembly_state: &input_assembly,
        p_viewport_state: &viewport_state,
        p_rasterization_state: &raster,
        p_multisample_state: &multisample,
        p_depth_stencil_state: &depth_stencil,
        p_color_blend_state: &color_blend,
        p_dynamic_state: &dynamic_state,
        layout,
        render_pass: desc.render_pass.raw(),
        subpass: 0,
        ..Default::default()
    };
    // SAFETY: every pointer in `info` refers to a local that outlives the call
    let pipelines = unsafe {
        device
            .raw()
            .create_graphics_pipelines(cache, std::slice::from_ref(&info), None)
    }
    .map_err(|(_, result)| VkError::Create {
        kind: ResourceKind::Pipeline,
        result,
    })?;
    pipelines
        .first()
        .copied()
        .ok_or(VkError::Create {
            kind: ResourceKind::Pipeline,
            result: vk::Result::ERROR_UNKNOWN,
        })
}

fn create_compute(
    device: &Device,
    cache: vk::PipelineCache,
    layout: vk::PipelineLayout,
    desc: &ComputePipelineDesc,
) -> Result<vk::Pipeline, VkError> {
    let info = vk::ComputePipelineCreateInfo {
        s_type: vk::StructureType::COMPUTE_PIPELINE_CREATE_INFO,
        stage: desc.shader.stage_info(),
        layout,
        ..Default::default()
    };
    // SAFETY: the shader module is alive for the call
    let pipelines = unsafe {
        device
            .raw()
            .create_compute_pipelines(cache, std::slice::from_ref(&info), None)
    }
    .map_err(|(_, result)| VkError::Create {
        kind: ResourceKind::Pipeline,
        result,
    })?;
    pipelines
        .first()
        .copied()
        .ok_or(VkError::Create {
            kind: ResourceKind::Pipeline,
            result: vk::Result::ERROR_UNKNOWN,
        })
}
