// Pre-recorded command buffers
//
// Recorded once per surface generation. Each presentable image gets one
// variant per frame slot so the buffer submitted for (image, slot) already
// binds that slot's descriptor set. Nothing is recorded per frame.
//
// The table has one entry per presentable image, so `len()` is the image
// count K; the pool holds K x F buffers in total.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::descriptor::FrameDescriptors;
use super::pipeline::GraphicsPipeline;
use super::render_graph::RenderGraph;
use super::swapchain::Swapchain;
use super::VulkanDevice;

/// Flat indexing for `images` entries with `slots` variants each
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableLayout {
    pub images: usize,
    pub slots: usize,
}

impl TableLayout {
    pub fn len(&self) -> usize {
        self.images * self.slots
    }

    pub fn index(&self, image: usize, slot: usize) -> usize {
        debug_assert!(image < self.images && slot < self.slots);
        image * self.slots + slot
    }
}

/// Geometry bound by every recorded draw
#[derive(Debug, Clone, Copy)]
pub struct DrawInputs {
    pub vertex_buffers: [vk::Buffer; 3],
    pub index_buffer: vk::Buffer,
    pub index_count: u32,
}

pub struct CommandTable {
    pool: vk::CommandPool,
    buffers: Vec<vk::CommandBuffer>,
    layout: TableLayout,
    device: Arc<VulkanDevice>,
}

impl CommandTable {
    pub fn record(
        device: Arc<VulkanDevice>,
        graph: &RenderGraph,
        swapchain: &Swapchain,
        pipeline: &GraphicsPipeline,
        descriptors: &FrameDescriptors,
        draw: &DrawInputs,
        clear_color: [f32; 4],
    ) -> Result<Self> {
        let pool_info =
            vk::CommandPoolCreateInfo::builder().queue_family_index(device.queue_families.graphics);
        let pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .context("Failed to create command pool")?;

        let layout = TableLayout {
            images: swapchain.framebuffers.len(),
            slots: descriptors.len(),
        };

        // Destroying the pool frees the buffers, so Drop covers early returns
        let mut table = Self {
            pool,
            buffers: Vec::new(),
            layout,
            device,
        };

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(layout.len() as u32);
        table.buffers = unsafe { table.device.device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate command buffers")?;

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue { float32: clear_color },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
            },
        ];

        for (image, &framebuffer) in swapchain.framebuffers.iter().enumerate() {
            for slot in 0..layout.slots {
                let cmd = table.buffers[layout.index(image, slot)];
                table.record_one(
                    cmd,
                    graph,
                    framebuffer,
                    swapchain.extent,
                    pipeline,
                    descriptors.set(slot),
                    draw,
                    &clear_values,
                )?;
            }
        }

        log::debug!(
            "Recorded {} command buffers ({} images x {} slots)",
            layout.len(),
            layout.images,
            layout.slots
        );

        Ok(table)
    }

    #[allow(clippy::too_many_arguments)]
    fn record_one(
        &self,
        cmd: vk::CommandBuffer,
        graph: &RenderGraph,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        pipeline: &GraphicsPipeline,
        descriptor_set: vk::DescriptorSet,
        draw: &DrawInputs,
        clear_values: &[vk::ClearValue],
    ) -> Result<()> {
        let device = &self.device.device;

        let begin_info = vk::CommandBufferBeginInfo::builder();
        unsafe { device.begin_command_buffer(cmd, &begin_info) }
            .context("Failed to begin command buffer")?;

        let render_pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(graph.render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(clear_values);

        let offsets = [0; 3];

        unsafe {
            device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.pipeline);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline.layout,
                0,
                &[descriptor_set],
                &[],
            );
            device.cmd_bind_vertex_buffers(cmd, 0, &draw.vertex_buffers, &offsets);
            device.cmd_bind_index_buffer(cmd, draw.index_buffer, 0, vk::IndexType::UINT32);
            device.cmd_draw_indexed(cmd, draw.index_count, 1, 0, 0, 0);
            device.cmd_end_render_pass(cmd);
        }

        unsafe { device.end_command_buffer(cmd) }.context("Failed to end command buffer")
    }

    /// The buffer to submit for `image_index` from frame slot `slot`
    pub fn get(&self, image_index: u32, slot: usize) -> vk::CommandBuffer {
        self.buffers[self.layout.index(image_index as usize, slot)]
    }

    /// Number of presentable images covered
    pub fn len(&self) -> usize {
        self.layout.images
    }
}

impl Drop for CommandTable {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_command_pool(self.pool, None) };
    }
}
