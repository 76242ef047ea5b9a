//! Owned parameter structures of the intercepted operations.
//!
//! These mirror the Vulkan create-info structures the layer cares about, but own their data instead
//! of pointing into the application's memory. The boundary copies the caller's structures into
//! these once; rewrite rules then work on the copy and the application's structures are never
//! aliased or mutated.

use ash::vk;

/// `VkPipelineShaderStageCreateInfo`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderStageDesc {
    pub stage: vk::ShaderStageFlags,
    pub module: vk::ShaderModule,
    pub entry_point: String,
}

impl ShaderStageDesc {
    pub fn new(stage: vk::ShaderStageFlags, module: vk::ShaderModule, entry_point: &str) -> Self {
        Self {
            stage,
            module,
            entry_point: entry_point.to_string(),
        }
    }
}

/// `VkPipelineRasterizationStateCreateInfo`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterizationState {
    pub depth_clamp_enable: bool,
    pub rasterizer_discard_enable: bool,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub depth_bias_enable: bool,
    pub depth_bias_constant_factor: f32,
    pub depth_bias_clamp: f32,
    pub depth_bias_slope_factor: f32,
    pub line_width: f32,
}

impl Default for RasterizationState {
    fn default() -> Self {
        Self {
            depth_clamp_enable: false,
            rasterizer_discard_enable: false,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_bias_enable: false,
            depth_bias_constant_factor: 0.0,
            depth_bias_clamp: 0.0,
            depth_bias_slope_factor: 0.0,
            line_width: 1.0,
        }
    }
}

/// `VkPipelineMultisampleStateCreateInfo` (without `pSampleMask`, which the layer never touches).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MultisampleState {
    pub rasterization_samples: vk::SampleCountFlags,
    pub sample_shading_enable: bool,
    pub min_sample_shading: f32,
    pub alpha_to_coverage_enable: bool,
    pub alpha_to_one_enable: bool,
}

impl Default for MultisampleState {
    fn default() -> Self {
        Self {
            rasterization_samples: vk::SampleCountFlags::TYPE_1,
            sample_shading_enable: false,
            min_sample_shading: 0.0,
            alpha_to_coverage_enable: false,
            alpha_to_one_enable: false,
        }
    }
}

/// `VkGraphicsPipelineCreateInfo`.
///
/// State blocks the layer does not rewrite (vertex input, blending, depth/stencil, dynamic state)
/// travel with the boundary's original structure and are not modelled here.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphicsPipelineDesc {
    pub flags: vk::PipelineCreateFlags,
    pub stages: Vec<ShaderStageDesc>,
    pub rasterization: Option<RasterizationState>,
    pub multisample: Option<MultisampleState>,
    pub layout: vk::PipelineLayout,
    pub render_pass: vk::RenderPass,
    pub subpass: u32,
    pub base_pipeline: vk::Pipeline,
    pub base_pipeline_index: i32,
}

impl Default for GraphicsPipelineDesc {
    fn default() -> Self {
        Self {
            flags: vk::PipelineCreateFlags::empty(),
            stages: Vec::new(),
            rasterization: None,
            multisample: None,
            layout: vk::PipelineLayout::null(),
            render_pass: vk::RenderPass::null(),
            subpass: 0,
            base_pipeline: vk::Pipeline::null(),
            base_pipeline_index: -1,
        }
    }
}

impl GraphicsPipelineDesc {
    /// Union of all shader stages present in the pipeline.
    pub fn stage_mask(&self) -> vk::ShaderStageFlags {
        self.stages
            .iter()
            .fold(vk::ShaderStageFlags::empty(), |mask, stage| mask | stage.stage)
    }
}

/// `VkComputePipelineCreateInfo`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComputePipelineDesc {
    pub flags: vk::PipelineCreateFlags,
    pub stage: ShaderStageDesc,
    pub layout: vk::PipelineLayout,
    pub base_pipeline: vk::Pipeline,
    pub base_pipeline_index: i32,
}

impl ComputePipelineDesc {
    pub fn new(stage: ShaderStageDesc, layout: vk::PipelineLayout) -> Self {
        Self {
            flags: vk::PipelineCreateFlags::empty(),
            stage,
            layout,
            base_pipeline: vk::Pipeline::null(),
            base_pipeline_index: -1,
        }
    }

    pub fn stage_mask(&self) -> vk::ShaderStageFlags {
        self.stage.stage
    }
}

/// `VkMemoryAllocateInfo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryAllocation {
    pub allocation_size: vk::DeviceSize,
    pub memory_type_index: u32,
}

/// `VkSubmitInfo`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SubmitBatch {
    pub wait_semaphores: Vec<vk::Semaphore>,
    pub wait_dst_stage_mask: Vec<vk::PipelineStageFlags>,
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub signal_semaphores: Vec<vk::Semaphore>,
}

impl SubmitBatch {
    pub fn with_command_buffers(command_buffers: Vec<vk::CommandBuffer>) -> Self {
        Self {
            command_buffers,
            ..Self::default()
        }
    }

    pub fn command_buffer_count(&self) -> usize {
        self.command_buffers.len()
    }
}
