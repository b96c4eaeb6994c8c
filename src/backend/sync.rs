// Synchronization primitives
//
// One set per frame slot: a semaphore for "image acquired", one for
// "rendering finished" and a fence the CPU waits on before reusing the slot.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;

pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
    device: Arc<VulkanDevice>,
}

impl FrameSync {
    pub fn new(device: Arc<VulkanDevice>) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        // Signaled so the first wait on each slot returns immediately
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        let image_available = unsafe { device.device.create_semaphore(&semaphore_info, None) }
            .context("Failed to create image-available semaphore")?;
        let render_finished = match unsafe { device.device.create_semaphore(&semaphore_info, None) } {
            Ok(s) => s,
            Err(e) => {
                unsafe { device.device.destroy_semaphore(image_available, None) };
                return Err(e).context("Failed to create render-finished semaphore");
            }
        };
        let in_flight_fence = match unsafe { device.device.create_fence(&fence_info, None) } {
            Ok(f) => f,
            Err(e) => {
                unsafe {
                    device.device.destroy_semaphore(image_available, None);
                    device.device.destroy_semaphore(render_finished, None);
                }
                return Err(e).context("Failed to create in-flight fence");
            }
        };

        Ok(Self {
            image_available,
            render_finished,
            in_flight_fence,
            device,
        })
    }

    /// Create `count` independent slots
    pub fn for_slots(device: &Arc<VulkanDevice>, count: usize) -> Result<Vec<Self>> {
        (0..count).map(|_| Self::new(device.clone())).collect()
    }

    /// Block until the slot's previous submission has retired
    pub fn wait(&self) -> Result<()> {
        unsafe {
            self.device
                .device
                .wait_for_fences(&[self.in_flight_fence], true, u64::MAX)
        }
        .context("Failed waiting for in-flight fence")
    }

    pub fn reset(&self) -> Result<()> {
        unsafe { self.device.device.reset_fences(&[self.in_flight_fence]) }
            .context("Failed to reset in-flight fence")
    }

    /// Replace the image-available semaphore.
    ///
    /// A suboptimal acquire signals the semaphore even though nothing will
    /// wait on it. Once the device is idle the only way back to unsignaled is
    /// a fresh semaphore.
    pub fn recreate_image_available(&mut self) -> Result<()> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let fresh = unsafe { self.device.device.create_semaphore(&semaphore_info, None) }
            .context("Failed to recreate image-available semaphore")?;
        let stale = std::mem::replace(&mut self.image_available, fresh);
        unsafe { self.device.device.destroy_semaphore(stale, None) };
        Ok(())
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_semaphore(self.image_available, None);
            self.device.device.destroy_semaphore(self.render_finished, None);
            self.device.device.destroy_fence(self.in_flight_fence, None);
        }
    }
}
