use std::ffi::CStr;
use std::sync::Arc;

use ash::{vk, Device};
use bytemuck::{Pod, Zeroable};

use crate::error::{BackendError, Result, VkResultExt};
use crate::image::COLOR_FORMAT;
use crate::shader::{self, ShaderCompiler, ShaderSource};

const ENTRY_POINT: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") };

pub const TARGET_SIZE_OFFSET: u32 = 0;
pub const RECT_OFFSET: u32 = 8;
pub const ORIGIN_OFFSET: u32 = 24;
pub const COLOR_OFFSET: u32 = 32;

/// Size of the render target in pixels.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct TargetSize {
    pub width: u32,
    pub height: u32,
}

/// Rectangle covered by one draw, in target pixels.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct RectConstants {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

/// Where the source's top-left corner lands in the target.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct Origin {
    pub x: i32,
    pub y: i32,
}

/// Premultiplied RGBA.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct FillColor {
    pub rgba: [f32; 4],
}

fn push_constant_range(stage: vk::ShaderStageFlags, offset: u32, size: usize) -> vk::PushConstantRange {
    vk::PushConstantRange { stage_flags: stage, offset, size: size as u32 }
}

fn blit_push_constant_ranges() -> [vk::PushConstantRange; 1] {
    let size = std::mem::size_of::<Origin>() + ORIGIN_OFFSET as usize;
    [push_constant_range(vk::ShaderStageFlags::VERTEX, TARGET_SIZE_OFFSET, size)]
}

fn fill_push_constant_ranges() -> [vk::PushConstantRange; 2] {
    let vertex_size = RECT_OFFSET as usize + std::mem::size_of::<RectConstants>();
    [
        push_constant_range(vk::ShaderStageFlags::VERTEX, TARGET_SIZE_OFFSET, vertex_size),
        push_constant_range(
            vk::ShaderStageFlags::FRAGMENT,
            COLOR_OFFSET,
            std::mem::size_of::<FillColor>(),
        ),
    ]
}

/// A graphics pipeline drawing 4-vertex triangle strips into one
/// `COLOR_FORMAT` attachment with premultiplied "over" blending.
pub struct GraphicsPipeline {
    device: Arc<Device>,
    pub layout: vk::PipelineLayout,
    pub handle: vk::Pipeline,
}

impl GraphicsPipeline {
    pub fn new<C: ShaderCompiler + ?Sized>(
        device: Arc<Device>,
        compiler: &C,
        vertex: &ShaderSource,
        fragment: &ShaderSource,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> Result<Self> {
        let vert_shader_module = shader::compile_module(&device, compiler, vertex)?;
        let frag_shader_module = match shader::compile_module(&device, compiler, fragment) {
            Ok(module) => module,
            Err(e) => {
                unsafe { device.destroy_shader_module(vert_shader_module, None) };
                return Err(e);
            }
        };

        let result = Self::create(
            &device,
            vert_shader_module,
            frag_shader_module,
            set_layouts,
            push_constant_ranges,
        );

        // Shader modules are no longer needed once the pipeline exists.
        unsafe {
            device.destroy_shader_module(vert_shader_module, None);
            device.destroy_shader_module(frag_shader_module, None);
        }

        let (layout, handle) = result?;
        Ok(Self { device, layout, handle })
    }

    fn create(
        device: &Device,
        vert_shader_module: vk::ShaderModule,
        frag_shader_module: vk::ShaderModule,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> Result<(vk::PipelineLayout, vk::Pipeline)> {
        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vert_shader_module)
                .name(ENTRY_POINT)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(frag_shader_module)
                .name(ENTRY_POINT)
                .build(),
        ];

        // Corners are derived from gl_VertexIndex.
        let vertex_input_state_info = vk::PipelineVertexInputStateCreateInfo::builder();

        let input_assembly_state_info = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_STRIP)
            .primitive_restart_enable(false);

        // Viewport and scissor are dynamic; only the counts are fixed here.
        let viewport_state_info = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization_state_info = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false)
            .line_width(1.0);

        let multisample_state_info = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .sample_shading_enable(false);

        let color_blend_attachment_state = vk::PipelineColorBlendAttachmentState::builder()
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::ONE)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .alpha_blend_op(vk::BlendOp::ADD)
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .build();
        let color_blend_attachments = [color_blend_attachment_state];
        let color_blend_state_info = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state_info =
            vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let pipeline_layout_create_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constant_ranges);
        let layout = unsafe { device.create_pipeline_layout(&pipeline_layout_create_info, None) }
            .vk_context("vkCreatePipelineLayout")?;

        let color_formats = [COLOR_FORMAT];
        let mut rendering_info =
            vk::PipelineRenderingCreateInfo::builder().color_attachment_formats(&color_formats);

        let graphics_pipeline_create_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_state_info)
            .input_assembly_state(&input_assembly_state_info)
            .viewport_state(&viewport_state_info)
            .rasterization_state(&rasterization_state_info)
            .multisample_state(&multisample_state_info)
            .color_blend_state(&color_blend_state_info)
            .dynamic_state(&dynamic_state_info)
            .layout(layout)
            .push_next(&mut rendering_info)
            .build();

        let pipelines = unsafe {
            device.create_graphics_pipelines(
                vk::PipelineCache::null(),
                &[graphics_pipeline_create_info],
                None,
            )
        };

        match pipelines {
            Ok(pipelines) => match pipelines.first() {
                Some(&handle) => Ok((layout, handle)),
                None => {
                    unsafe { device.destroy_pipeline_layout(layout, None) };
                    Err(BackendError::Vk {
                        call: "vkCreateGraphicsPipelines",
                        result: vk::Result::ERROR_UNKNOWN,
                    })
                }
            },
            Err((partial, result)) => {
                unsafe {
                    for pipeline in partial.into_iter().filter(|p| *p != vk::Pipeline::null()) {
                        device.destroy_pipeline(pipeline, None);
                    }
                    device.destroy_pipeline_layout(layout, None);
                }
                Err(BackendError::Vk { call: "vkCreateGraphicsPipelines", result })
            }
        }
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.handle, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// The two pipelines compositing needs.
pub struct RenderPipelines {
    /// Samples the descriptor set bound at set 0.
    pub blit: GraphicsPipeline,
    pub fill: GraphicsPipeline,
}

impl RenderPipelines {
    pub fn new<C: ShaderCompiler + ?Sized>(
        device: Arc<Device>,
        compiler: &C,
        sampler_set_layout: vk::DescriptorSetLayout,
    ) -> Result<Self> {
        let blit = GraphicsPipeline::new(
            device.clone(),
            compiler,
            &shader::BLIT_VERTEX,
            &shader::BLIT_FRAGMENT,
            &[sampler_set_layout],
            &blit_push_constant_ranges(),
        )?;
        let fill = GraphicsPipeline::new(
            device,
            compiler,
            &shader::FILL_VERTEX,
            &shader::FILL_FRAGMENT,
            &[],
            &fill_push_constant_ranges(),
        )?;
        tracing::debug!("Created blit and fill pipelines");
        Ok(Self { blit, fill })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_constant_blocks_are_packed_like_the_shaders_expect() {
        assert_eq!(std::mem::size_of::<TargetSize>(), 8);
        assert_eq!(RECT_OFFSET as usize, std::mem::size_of::<TargetSize>());
        assert_eq!(ORIGIN_OFFSET as usize, RECT_OFFSET as usize + std::mem::size_of::<RectConstants>());
        assert_eq!(std::mem::size_of::<FillColor>(), 16);
    }

    #[test]
    fn blit_constants_are_vertex_only() {
        let [range] = blit_push_constant_ranges();
        assert_eq!(range.stage_flags, vk::ShaderStageFlags::VERTEX);
        assert_eq!((range.offset, range.size), (0, 32));
    }

    #[test]
    fn fill_colour_range_does_not_overlap_the_vertex_range() {
        let [vertex, fragment] = fill_push_constant_ranges();
        assert_eq!((vertex.offset, vertex.size), (0, 24));
        assert_eq!((fragment.offset, fragment.size), (32, 16));
        assert!(vertex.offset + vertex.size <= fragment.offset);
    }

    #[test]
    fn rect_constants_serialise_in_field_order() {
        let rect = RectConstants { x1: 1, y1: 2, x2: 3, y2: 4 };
        let words: &[i32] = bytemuck::cast_slice(bytemuck::bytes_of(&rect));
        assert_eq!(words, &[1, 2, 3, 4]);
    }
}
