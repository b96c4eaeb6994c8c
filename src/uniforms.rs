// Per-frame uniform state
//
// Each frame slot owns its own uniform storage. A tick writes only the slot
// whose fence was just observed signaled, so the GPU can keep reading the
// other slots' copies.

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use std::sync::Arc;

use crate::backend::buffer::Buffer;
use crate::backend::VulkanDevice;
use crate::scene::ViewProjection;

/// Matches the `Transforms` block in model.vert
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct UniformBlock {
    pub model: Mat4,
    pub view: Mat4,
    pub projection: Mat4,
}

impl UniformBlock {
    pub const SIZE: vk::DeviceSize = std::mem::size_of::<Self>() as vk::DeviceSize;

    pub fn compose(view_projection: &ViewProjection, model: Mat4) -> Self {
        Self {
            model,
            view: view_projection.view,
            projection: view_projection.projection,
        }
    }
}

impl Default for UniformBlock {
    fn default() -> Self {
        Self {
            model: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
        }
    }
}

/// Host-writable bytes backing one slot's uniform block
pub trait UniformStorage {
    fn bytes_mut(&mut self) -> Result<&mut [u8]>;
    fn bytes(&self) -> Option<&[u8]>;
}

impl UniformStorage for Buffer {
    fn bytes_mut(&mut self) -> Result<&mut [u8]> {
        self.map()
    }

    fn bytes(&self) -> Option<&[u8]> {
        self.mapped_bytes()
    }
}

impl UniformStorage for Vec<u8> {
    fn bytes_mut(&mut self) -> Result<&mut [u8]> {
        Ok(self.as_mut_slice())
    }

    fn bytes(&self) -> Option<&[u8]> {
        Some(self.as_slice())
    }
}

pub struct PerFrameUniforms<S> {
    slots: Vec<S>,
}

impl<S: UniformStorage> PerFrameUniforms<S> {
    pub fn new(slots: Vec<S>) -> Self {
        Self { slots }
    }

    /// Write `block` into `slot`'s storage only
    pub fn update(&mut self, slot: usize, block: &UniformBlock) -> Result<()> {
        let count = self.slots.len();
        let storage = self
            .slots
            .get_mut(slot)
            .with_context(|| format!("Frame slot {} out of range ({} slots)", slot, count))?;

        let src = bytemuck::bytes_of(block);
        let dst = storage.bytes_mut()?;
        if dst.len() < src.len() {
            anyhow::bail!(
                "Uniform storage for slot {} is {} bytes, block needs {}",
                slot,
                dst.len(),
                src.len()
            );
        }
        dst[..src.len()].copy_from_slice(src);

        log::trace!("Wrote uniforms for slot {}", slot);
        Ok(())
    }

    /// Read back what the slot currently holds
    #[cfg(test)]
    pub fn read(&self, slot: usize) -> Option<UniformBlock> {
        let bytes = self.slots.get(slot)?.bytes()?;
        let size = std::mem::size_of::<UniformBlock>();
        (bytes.len() >= size).then(|| bytemuck::pod_read_unaligned(&bytes[..size]))
    }

    pub fn storage(&self, slot: usize) -> &S {
        &self.slots[slot]
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }
}

impl PerFrameUniforms<Buffer> {
    /// One host-visible, coherent, persistently mapped buffer per slot
    pub fn allocate(device: &Arc<VulkanDevice>, frames: usize) -> Result<Self> {
        let slots = (0..frames)
            .map(|_| {
                let mut buffer = Buffer::new(
                    device.clone(),
                    UniformBlock::SIZE,
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                    vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                )?;
                buffer.map()?;
                Ok(buffer)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::new(slots))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn uniforms(frames: usize) -> PerFrameUniforms<Vec<u8>> {
        PerFrameUniforms::new(vec![vec![0u8; UniformBlock::SIZE as usize]; frames])
    }

    fn block(angle: f32) -> UniformBlock {
        UniformBlock {
            model: Mat4::from_rotation_z(angle),
            view: Mat4::look_at_rh(Vec3::new(0.0, 0.0, 4.0), Vec3::ZERO, Vec3::Y),
            projection: Mat4::perspective_rh(1.0, 4.0 / 3.0, 0.1, 100.0),
        }
    }

    #[test]
    fn block_is_three_packed_matrices() {
        assert_eq!(UniformBlock::SIZE, 3 * 64);
    }

    #[test]
    fn written_block_reads_back_unchanged() {
        let mut frames = uniforms(2);
        let written = block(0.5);
        frames.update(1, &written).unwrap();
        assert_eq!(frames.read(1), Some(written));
    }

    #[test]
    fn slots_do_not_alias() {
        let mut frames = uniforms(3);
        let first = block(0.1);
        let second = block(0.2);
        frames.update(0, &first).unwrap();
        frames.update(1, &second).unwrap();

        assert_eq!(frames.read(0), Some(first));
        assert_eq!(frames.read(1), Some(second));
        assert_eq!(frames.read(2), Some(UniformBlock::zeroed()));
    }

    #[test]
    fn out_of_range_slot_is_an_error() {
        let mut frames = uniforms(2);
        assert!(frames.update(2, &block(0.0)).is_err());
        assert_eq!(frames.read(2), None);
    }

    #[test]
    fn undersized_storage_is_an_error() {
        let mut frames = PerFrameUniforms::new(vec![vec![0u8; 16]]);
        assert!(frames.update(0, &block(0.0)).is_err());
    }
}
