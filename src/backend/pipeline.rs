// Graphics pipeline creation and management
//
// One fixed pipeline: three separate vertex streams, depth test and write,
// opaque output, one descriptor set. Viewport and scissor are baked in, so the
// pipeline belongs to a surface generation.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::render_graph::RenderGraph;
use super::shader::ShaderModule;
use super::VulkanDevice;

pub const POSITION_BINDING: u32 = 0;
pub const COLOR_BINDING: u32 = 1;
pub const UV_BINDING: u32 = 2;

/// Position (vec3), color (vec3) and uv (vec2), each in its own buffer
pub fn vertex_input_layout() -> (
    [vk::VertexInputBindingDescription; 3],
    [vk::VertexInputAttributeDescription; 3],
) {
    let stream = |binding: u32, components: usize| vk::VertexInputBindingDescription {
        binding,
        stride: (components * std::mem::size_of::<f32>()) as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    };

    // Location matches binding; every stream starts at offset 0
    let attribute = |binding: u32, format: vk::Format| vk::VertexInputAttributeDescription {
        location: binding,
        binding,
        format,
        offset: 0,
    };

    (
        [
            stream(POSITION_BINDING, 3),
            stream(COLOR_BINDING, 3),
            stream(UV_BINDING, 2),
        ],
        [
            attribute(POSITION_BINDING, vk::Format::R32G32B32_SFLOAT),
            attribute(COLOR_BINDING, vk::Format::R32G32B32_SFLOAT),
            attribute(UV_BINDING, vk::Format::R32G32_SFLOAT),
        ],
    )
}

pub struct GraphicsPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    device: Arc<VulkanDevice>,
}

impl GraphicsPipeline {
    pub fn new(
        device: Arc<VulkanDevice>,
        graph: &RenderGraph,
        shaders: &[ShaderModule],
        set_layout: vk::DescriptorSetLayout,
        extent: vk::Extent2D,
    ) -> Result<Self> {
        let shader_stages: Vec<_> = shaders.iter().map(ShaderModule::stage_info).collect();

        let (bindings, attributes) = vertex_input_layout();
        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let viewports = [vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }];
        let scissors = [vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        }];
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewports(&viewports)
            .scissors(&scissors);

        // The model is two flat quads seen from both sides
        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
            .build()];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let set_layouts = [set_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts);

        let layout = unsafe { device.device.create_pipeline_layout(&layout_info, None) }
            .context("Failed to create pipeline layout")?;

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .layout(layout)
            .render_pass(graph.render_pass)
            .subpass(0)
            .build();

        let pipelines = unsafe {
            device
                .device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        };

        let pipeline = match pipelines {
            Ok(pipelines) => pipelines[0],
            Err((_, e)) => {
                unsafe { device.device.destroy_pipeline_layout(layout, None) };
                return Err(e).context("Failed to create graphics pipeline");
            }
        };

        log::debug!("Created graphics pipeline for {}x{}", extent.width, extent.height);

        Ok(Self {
            pipeline,
            layout,
            device,
        })
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_pipeline(self.pipeline, None);
            self.device.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}
