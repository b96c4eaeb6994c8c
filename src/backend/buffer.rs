// GPU buffers: vertex, index, uniform and staging
//
// Device-local destinations are filled through a temporary host-visible
// staging buffer and a one-time copy (see `transfer`). Uniform buffers stay
// host-visible and persistently mapped.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::error::SelectionError;
use super::transfer::OneTimeCommands;
use super::VulkanDevice;

/// Lowest memory type index allowed by `type_filter` that has every flag in
/// `properties`.
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> Result<u32, SelectionError> {
    (0..memory_properties.memory_type_count)
        .find(|&i| {
            let allowed = type_filter & (1 << i) != 0;
            allowed
                && memory_properties.memory_types[i as usize]
                    .property_flags
                    .contains(properties)
        })
        .ok_or(SelectionError::NoMemoryType { type_filter, properties })
}

/// Allocate and bind device memory satisfying `requirements`.
pub(crate) fn allocate_memory(
    device: &VulkanDevice,
    requirements: vk::MemoryRequirements,
    properties: vk::MemoryPropertyFlags,
) -> Result<vk::DeviceMemory> {
    let memory_type_index = find_memory_type(
        &device.memory_properties,
        requirements.memory_type_bits,
        properties,
    )?;

    let alloc_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index);

    unsafe { device.device.allocate_memory(&alloc_info, None) }
        .context("Failed to allocate device memory")
}

/// A buffer with its own dedicated memory allocation
pub struct Buffer {
    pub buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    mapped: Option<*mut u8>,
    device: Arc<VulkanDevice>,
}

impl Buffer {
    /// Create a buffer with specified usage and memory properties
    pub fn new(
        device: Arc<VulkanDevice>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory_properties: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
            .context("Failed to create buffer")?;

        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

        let memory = match allocate_memory(&device, requirements, memory_properties) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let buffer = Self {
            buffer,
            memory,
            size,
            mapped: None,
            device,
        };

        unsafe { buffer.device.device.bind_buffer_memory(buffer.buffer, buffer.memory, 0) }
            .context("Failed to bind buffer memory")?;

        Ok(buffer)
    }

    /// Host-visible, coherent buffer used as a transfer source
    pub fn staging(device: Arc<VulkanDevice>, data: &[u8]) -> Result<Self> {
        let mut staging = Self::new(
            device,
            data.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        staging.map()?.copy_from_slice(data);
        staging.unmap();
        Ok(staging)
    }

    /// Device-local buffer filled through a staging copy.
    ///
    /// Blocks until the copy has finished on the GPU. Load-time only.
    pub fn device_local_with_data(
        device: Arc<VulkanDevice>,
        commands: &OneTimeCommands,
        usage: vk::BufferUsageFlags,
        data: &[u8],
    ) -> Result<Self> {
        let size = data.len() as vk::DeviceSize;
        let staging = Self::staging(device.clone(), data)?;

        let destination = Self::new(
            device,
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        commands.submit_sync(|cmd| {
            let region = vk::BufferCopy::builder().size(size).build();
            unsafe {
                destination
                    .device
                    .device
                    .cmd_copy_buffer(cmd, staging.buffer, destination.buffer, &[region]);
            }
        })?;

        log::debug!("Uploaded {} bytes to device-local buffer ({:?})", size, usage);
        Ok(destination)
    }

    /// Map the whole buffer. Repeated calls return the existing mapping.
    pub fn map(&mut self) -> Result<&mut [u8]> {
        let ptr = match self.mapped {
            Some(ptr) => ptr,
            None => {
                let ptr = unsafe {
                    self.device.device.map_memory(
                        self.memory,
                        0,
                        self.size,
                        vk::MemoryMapFlags::empty(),
                    )
                }
                .context("Failed to map buffer memory")? as *mut u8;
                self.mapped = Some(ptr);
                ptr
            }
        };

        Ok(unsafe { std::slice::from_raw_parts_mut(ptr, self.size as usize) })
    }

    pub fn unmap(&mut self) {
        if self.mapped.take().is_some() {
            unsafe { self.device.device.unmap_memory(self.memory) };
        }
    }

    /// Contents of a currently mapped buffer
    pub fn mapped_bytes(&self) -> Option<&[u8]> {
        self.mapped
            .map(|ptr| unsafe { std::slice::from_raw_parts(ptr as *const u8, self.size as usize) })
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.unmap();
        unsafe {
            self.device.device.destroy_buffer(self.buffer, None);
            self.device.device.free_memory(self.memory, None);
        }
    }
}
