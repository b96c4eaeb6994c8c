// Renderer - owns every GPU object and implements the frame target
//
// Objects fall into three lifetimes:
//   device context    created first, destroyed last (the Arc everyone holds)
//   persistent        frame slots, uniforms, descriptors, texture, mesh
//   surface generation swapchain, render graph, pipeline, command table
//
// A generation is rebuilt as a unit on resize, staleness or shader reload,
// always behind a device-idle barrier.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use crate::backend::buffer::Buffer;
use crate::backend::command::{CommandTable, DrawInputs};
use crate::backend::descriptor::{FrameDescriptors, MODEL_PARAMETERS};
use crate::backend::image::find_depth_format;
use crate::backend::pipeline::GraphicsPipeline;
use crate::backend::render_graph::{RenderGraph, RenderGraphDesc};
use crate::backend::shader::{ShaderModule, ShaderSource};
use crate::backend::swapchain::{
    choose_extent, is_drawable, AcquireOutcome, PresentOutcome, SurfaceSupport, Swapchain,
};
use crate::backend::sync::FrameSync;
use crate::backend::texture::{Texture, TextureData};
use crate::backend::transfer::OneTimeCommands;
use crate::backend::VulkanDevice;
use crate::config::Config;
use crate::frame::{FrameTarget, RebuildOutcome};
use crate::scene::Model;
use crate::uniforms::{PerFrameUniforms, UniformBlock};

/// Device-local vertex streams and index buffer for the model
struct MeshBuffers {
    positions: Buffer,
    colors: Buffer,
    uvs: Buffer,
    indices: Buffer,
    index_count: u32,
}

impl MeshBuffers {
    fn upload(device: &Arc<VulkanDevice>, commands: &OneTimeCommands, model: &Model) -> Result<Self> {
        let vertex = |data: &[f32]| {
            Buffer::device_local_with_data(
                device.clone(),
                commands,
                vk::BufferUsageFlags::VERTEX_BUFFER,
                bytemuck::cast_slice(data),
            )
        };

        Ok(Self {
            positions: vertex(&model.positions).context("Failed to upload positions")?,
            colors: vertex(&model.colors).context("Failed to upload colors")?,
            uvs: vertex(&model.uvs).context("Failed to upload uvs")?,
            indices: Buffer::device_local_with_data(
                device.clone(),
                commands,
                vk::BufferUsageFlags::INDEX_BUFFER,
                bytemuck::cast_slice(&model.indices),
            )
            .context("Failed to upload indices")?,
            index_count: model.indices.len() as u32,
        })
    }

    fn draw_inputs(&self) -> DrawInputs {
        DrawInputs {
            vertex_buffers: [self.positions.buffer, self.colors.buffer, self.uvs.buffer],
            index_buffer: self.indices.buffer,
            index_count: self.index_count,
        }
    }
}

/// Everything that depends on the surface's extent or format
struct SurfaceGeneration {
    command_table: CommandTable,
    pipeline: GraphicsPipeline,
    swapchain: Swapchain,
    render_graph: RenderGraph,
}

impl SurfaceGeneration {
    /// Dependents first: command buffers reference the pipeline and
    /// framebuffers, framebuffers reference the render pass.
    fn destroy(self) {
        let Self {
            command_table,
            pipeline,
            swapchain,
            render_graph,
        } = self;
        drop(command_table);
        drop(pipeline);
        drop(swapchain);
        drop(render_graph);
    }
}

pub struct Renderer {
    generation: Option<SurfaceGeneration>,
    shaders: Vec<ShaderModule>,
    shader_sources: Vec<ShaderSource>,
    mesh: MeshBuffers,
    /// Referenced by every slot's descriptor set; kept alive with them
    _texture: Texture,
    descriptors: FrameDescriptors,
    uniforms: PerFrameUniforms<Buffer>,
    frames: Vec<FrameSync>,
    commands: OneTimeCommands,
    present_mode: vk::PresentModeKHR,
    clear_color: [f32; 4],
    pixel_size: vk::Extent2D,
    /// Slot whose image-available semaphore a stale acquire left signaled
    signaled_acquire: Option<usize>,
    generation_count: u64,
    device: Arc<VulkanDevice>,
}

impl Renderer {
    pub fn new(
        device: Arc<VulkanDevice>,
        config: &Config,
        model: &Model,
        pixel_size: vk::Extent2D,
    ) -> Result<Self> {
        let frames_in_flight = config.graphics.frames_in_flight;
        let commands = OneTimeCommands::new(device.clone())?;

        // ─── Frame slots ────────────────────────────────────────────────
        let frames = FrameSync::for_slots(&device, frames_in_flight)?;
        let uniforms = PerFrameUniforms::allocate(&device, frames_in_flight)?;
        let descriptors = FrameDescriptors::new(device.clone(), &MODEL_PARAMETERS, frames_in_flight)?;

        // ─── Load-time uploads ──────────────────────────────────────────
        let texture_data = match &config.assets.texture {
            Some(path) => TextureData::load(path)?,
            None => {
                log::info!("No texture configured, using checkerboard");
                TextureData::checkerboard(256, 8)
            }
        };
        let texture = Texture::upload(device.clone(), &commands, &texture_data)?;
        let mesh = MeshBuffers::upload(&device, &commands, model)?;

        for slot in 0..frames_in_flight {
            descriptors.write(
                slot,
                uniforms.storage(slot).buffer,
                uniforms.storage(slot).size(),
                texture.image.view,
                texture.sampler,
            );
        }

        // ─── Shaders ────────────────────────────────────────────────────
        let shader_sources = vec![
            ShaderSource::new(
                &config.assets.vertex_shader,
                vk::ShaderStageFlags::VERTEX,
                &config.assets.shader_entry,
            )?,
            ShaderSource::new(
                &config.assets.fragment_shader,
                vk::ShaderStageFlags::FRAGMENT,
                &config.assets.shader_entry,
            )?,
        ];
        let shaders = shader_sources
            .iter()
            .map(|source| ShaderModule::new(device.clone(), source))
            .collect::<Result<Vec<_>>>()?;

        let mut renderer = Self {
            generation: None,
            shaders,
            shader_sources,
            mesh,
            _texture: texture,
            descriptors,
            uniforms,
            frames,
            commands,
            present_mode: config.preferred_present_mode(),
            clear_color: config.graphics.clear_color,
            pixel_size,
            signaled_acquire: None,
            generation_count: 0,
            device,
        };

        renderer.generation = Some(renderer.build_generation()?);
        log::info!("Renderer ready with {} frames in flight", renderer.uniforms.len());

        Ok(renderer)
    }

    fn build_generation(&mut self) -> Result<SurfaceGeneration> {
        let depth_format = find_depth_format(&self.device)?;

        let mut swapchain = Swapchain::new(
            self.device.clone(),
            &self.commands,
            self.pixel_size,
            self.present_mode,
            depth_format,
        )?;

        let render_graph = RenderGraph::build(
            self.device.clone(),
            RenderGraphDesc::new(swapchain.format, depth_format),
        )?;
        swapchain.create_framebuffers(&render_graph)?;

        let pipeline = GraphicsPipeline::new(
            self.device.clone(),
            &render_graph,
            &self.shaders,
            self.descriptors.layout,
            swapchain.extent,
        )?;

        let command_table = CommandTable::record(
            self.device.clone(),
            &render_graph,
            &swapchain,
            &pipeline,
            &self.descriptors,
            &self.mesh.draw_inputs(),
            self.clear_color,
        )?;

        self.generation_count += 1;
        log::info!(
            "Surface generation {}: {}x{}, {} images, {} command table entries, {:?}, depth {:?}",
            self.generation_count,
            swapchain.extent.width,
            swapchain.extent.height,
            swapchain.image_count(),
            command_table.len(),
            swapchain.present_mode,
            render_graph.desc().depth_format()
        );

        Ok(SurfaceGeneration {
            command_table,
            pipeline,
            swapchain,
            render_graph,
        })
    }

    /// Tear down and rebuild the surface generation.
    ///
    /// With `reload_shaders`, SPIR-V is re-read from disk first. A reload
    /// failure keeps the shaders already in use. While the surface has zero
    /// area the old generation is still torn down but no new one is built;
    /// the caller retries once the window has a size again.
    pub fn rebuild(&mut self, reload_shaders: bool) -> Result<RebuildOutcome> {
        self.device.wait_idle()?;

        if let Some(slot) = self.signaled_acquire.take() {
            self.frames[slot].recreate_image_available()?;
        }

        if reload_shaders {
            self.reload_shaders();
        }

        if let Some(generation) = self.generation.take() {
            generation.destroy();
        }

        let support = SurfaceSupport::query(&self.device)?;
        let extent = choose_extent(&support.capabilities, self.pixel_size);
        if !is_drawable(extent) {
            log::info!("Surface is {}x{}, deferring rebuild", extent.width, extent.height);
            return Ok(RebuildOutcome::Deferred);
        }

        self.generation = Some(self.build_generation()?);
        Ok(RebuildOutcome::Rebuilt)
    }

    /// False while a rebuild is deferred
    pub fn has_surface(&self) -> bool {
        self.generation.is_some()
    }

    fn reload_shaders(&mut self) {
        let reloaded = self
            .shader_sources
            .iter()
            .map(|source| ShaderModule::new(self.device.clone(), source))
            .collect::<Result<Vec<_>>>();

        match reloaded {
            Ok(shaders) => {
                log::info!("Reloaded {} shaders", shaders.len());
                self.shaders = shaders;
            }
            Err(e) => log::warn!("Shader reload failed, keeping current shaders: {:?}", e),
        }
    }

    /// Window framebuffer size in physical pixels, used by the next rebuild
    pub fn set_pixel_size(&mut self, width: u32, height: u32) {
        self.pixel_size = vk::Extent2D { width, height };
    }

    /// Extent of the current generation
    pub fn extent(&self) -> vk::Extent2D {
        self.generation
            .as_ref()
            .map(|g| g.swapchain.extent)
            .unwrap_or(self.pixel_size)
    }

    pub fn image_count(&self) -> usize {
        self.generation
            .as_ref()
            .map(|g| g.swapchain.image_count())
            .unwrap_or(0)
    }

    pub fn wait_idle(&self) -> Result<()> {
        self.device.wait_idle()
    }

    fn generation(&self) -> Result<&SurfaceGeneration> {
        self.generation.as_ref().context("No surface generation")
    }
}

impl FrameTarget for Renderer {
    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        self.frames[slot].wait()
    }

    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
        let semaphore = self.frames[slot].image_available;
        let outcome = self.generation()?.swapchain.acquire_next_image(semaphore)?;
        if let AcquireOutcome::Stale { semaphore_signaled: true } = outcome {
            self.signaled_acquire = Some(slot);
        }
        Ok(outcome)
    }

    fn write_uniforms(&mut self, slot: usize, block: &UniformBlock) -> Result<()> {
        self.uniforms.update(slot, block)
    }

    fn reset_slot_fence(&mut self, slot: usize) -> Result<()> {
        self.frames[slot].reset()
    }

    fn submit(&mut self, slot: usize, image_index: u32) -> Result<()> {
        let frame = &self.frames[slot];
        let generation = self.generation()?;

        let wait_semaphores = [frame.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [generation.command_table.get(image_index, slot)];
        let signal_semaphores = [frame.render_finished];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                &[submit_info.build()],
                frame.in_flight_fence,
            )
        }
        .context("Failed to submit draw command buffer")
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
        let semaphore = self.frames[slot].render_finished;
        self.generation()?.swapchain.present(image_index, semaphore)
    }

    fn rebuild_surface(&mut self) -> Result<RebuildOutcome> {
        self.rebuild(false)
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Shutting down renderer...");
        if let Err(e) = self.device.wait_idle() {
            log::error!("Device wait failed during shutdown: {:?}", e);
        }
        if let Some(generation) = self.generation.take() {
            generation.destroy();
        }
        // Persistent objects drop in field order; the device goes when the
        // last Arc does
    }
}
