// One-time command submission for load-time transfers
//
// Every submission blocks until the queue is idle. Uploads are serialized,
// which is fine for the small fixed data set loaded at startup but would not
// scale to streaming content.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;

pub struct OneTimeCommands {
    pool: vk::CommandPool,
    queue: vk::Queue,
    device: Arc<VulkanDevice>,
}

impl OneTimeCommands {
    pub fn new(device: Arc<VulkanDevice>) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.queue_families.graphics)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);

        let pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .context("Failed to create transfer command pool")?;

        Ok(Self {
            pool,
            queue: device.graphics_queue,
            device,
        })
    }

    /// Record with `record`, submit, and wait for the queue to drain.
    pub fn submit_sync<F>(&self, record: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer),
    {
        let device = &self.device.device;

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let cmd = unsafe { device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate one-time command buffer")?[0];

        let result = (|| -> Result<()> {
            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            unsafe { device.begin_command_buffer(cmd, &begin_info) }?;

            record(cmd);

            unsafe { device.end_command_buffer(cmd) }?;

            let command_buffers = [cmd];
            let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);

            unsafe {
                device
                    .queue_submit(self.queue, &[submit_info.build()], vk::Fence::null())
                    .context("Failed to submit one-time commands")?;
                device
                    .queue_wait_idle(self.queue)
                    .context("Failed waiting for one-time commands")?;
            }
            Ok(())
        })();

        unsafe { device.free_command_buffers(self.pool, &[cmd]) };
        result
    }
}

impl Drop for OneTimeCommands {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_command_pool(self.pool, None) };
    }
}
