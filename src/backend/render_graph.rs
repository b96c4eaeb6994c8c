// Render graph: one color + one depth attachment, one subpass
//
// The description is plain data so it can be inspected before any Vulkan
// object exists. `RenderGraph::build` turns it into an immutable render pass.
// A format change means building a new graph.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;

pub const COLOR_ATTACHMENT: u32 = 0;
pub const DEPTH_ATTACHMENT: u32 = 1;

/// Attachments, subpass references and the external dependency
#[derive(Debug, Clone)]
pub struct RenderGraphDesc {
    pub attachments: [vk::AttachmentDescription; 2],
    pub color_ref: vk::AttachmentReference,
    pub depth_ref: vk::AttachmentReference,
    pub dependency: vk::SubpassDependency,
}

impl RenderGraphDesc {
    pub fn new(color_format: vk::Format, depth_format: vk::Format) -> Self {
        // Color: cleared each pass, kept for presentation
        let color = vk::AttachmentDescription::builder()
            .format(color_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .build();

        // Depth: cleared each pass, never read afterwards
        let depth = vk::AttachmentDescription::builder()
            .format(depth_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .build();

        let color_ref = vk::AttachmentReference {
            attachment: COLOR_ATTACHMENT,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        };
        let depth_ref = vk::AttachmentReference {
            attachment: DEPTH_ATTACHMENT,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };

        // External work must finish color output and early depth tests before
        // this subpass touches the attachments. This is what lets the acquire
        // semaphore (waited at COLOR_ATTACHMENT_OUTPUT) gate the first write.
        let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
        let dependency = vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(stages)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(stages)
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            )
            .build();

        Self {
            attachments: [color, depth],
            color_ref,
            depth_ref,
            dependency,
        }
    }

    pub fn color_format(&self) -> vk::Format {
        self.attachments[COLOR_ATTACHMENT as usize].format
    }

    pub fn depth_format(&self) -> vk::Format {
        self.attachments[DEPTH_ATTACHMENT as usize].format
    }
}

/// Immutable render pass built from a [`RenderGraphDesc`]
pub struct RenderGraph {
    pub render_pass: vk::RenderPass,
    desc: RenderGraphDesc,
    device: Arc<VulkanDevice>,
}

impl RenderGraph {
    pub fn build(device: Arc<VulkanDevice>, desc: RenderGraphDesc) -> Result<Self> {
        let color_refs = [desc.color_ref];
        let subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)
            .depth_stencil_attachment(&desc.depth_ref)
            .build();

        let subpasses = [subpass];
        let dependencies = [desc.dependency];

        let render_pass_info = vk::RenderPassCreateInfo::builder()
            .attachments(&desc.attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let render_pass = unsafe { device.device.create_render_pass(&render_pass_info, None) }
            .context("Failed to create render pass")?;

        log::debug!(
            "Built render graph: color {:?}, depth {:?}",
            desc.color_format(),
            desc.depth_format()
        );

        Ok(Self {
            render_pass,
            desc,
            device,
        })
    }

    pub fn desc(&self) -> &RenderGraphDesc {
        &self.desc
    }
}

impl Drop for RenderGraph {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_render_pass(self.render_pass, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc() -> RenderGraphDesc {
        RenderGraphDesc::new(vk::Format::B8G8R8A8_SRGB, vk::Format::D32_SFLOAT)
    }

    #[test]
    fn color_is_cleared_and_kept_for_present() {
        let color = desc().attachments[COLOR_ATTACHMENT as usize];
        assert_eq!(color.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(color.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(color.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(color.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn depth_is_cleared_and_discarded() {
        let depth = desc().attachments[DEPTH_ATTACHMENT as usize];
        assert_eq!(depth.format, vk::Format::D32_SFLOAT);
        assert_eq!(depth.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(depth.store_op, vk::AttachmentStoreOp::DONT_CARE);
    }

    #[test]
    fn subpass_references_both_attachments() {
        let d = desc();
        assert_eq!(d.color_ref.attachment, COLOR_ATTACHMENT);
        assert_eq!(d.color_ref.layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(d.depth_ref.attachment, DEPTH_ATTACHMENT);
        assert_eq!(d.depth_ref.layout, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
    }

    #[test]
    fn external_dependency_gates_color_and_depth_stages() {
        let dep = desc().dependency;
        let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
        assert_eq!(dep.src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(dep.dst_subpass, 0);
        assert_eq!(dep.src_stage_mask, stages);
        assert_eq!(dep.dst_stage_mask, stages);
        assert!(dep.src_access_mask.is_empty());
        assert_eq!(
            dep.dst_access_mask,
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        );
    }
}
