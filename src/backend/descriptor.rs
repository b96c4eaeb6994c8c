// Descriptors for the per-frame resource set
//
// One descriptor set per frame slot, all sharing one layout. The pool is
// sized exactly for the fixed parameter list times the slot count, so any
// over-allocation is caught at construction.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::error::SelectionError;
use super::VulkanDevice;

/// One shader-visible resource in the set layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformParameter {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub stage: vk::ShaderStageFlags,
}

pub const UNIFORM_BINDING: u32 = 0;
pub const TEXTURE_BINDING: u32 = 1;

/// Transform block for the vertex stage and the model texture for the
/// fragment stage
pub const MODEL_PARAMETERS: [UniformParameter; 2] = [
    UniformParameter {
        binding: UNIFORM_BINDING,
        descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
        stage: vk::ShaderStageFlags::VERTEX,
    },
    UniformParameter {
        binding: TEXTURE_BINDING,
        descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        stage: vk::ShaderStageFlags::FRAGMENT,
    },
];

/// Pool sizes and a running count of sets handed out
#[derive(Debug, Clone)]
pub struct PoolPlan {
    pub sizes: Vec<vk::DescriptorPoolSize>,
    pub max_sets: u32,
    allocated: u32,
}

impl PoolPlan {
    /// `frames` sets, each holding every parameter once
    pub fn for_parameters(parameters: &[UniformParameter], frames: u32) -> Self {
        let count = |ty: vk::DescriptorType| {
            parameters.iter().filter(|p| p.descriptor_type == ty).count() as u32
        };

        let sizes = [
            vk::DescriptorType::UNIFORM_BUFFER,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        ]
        .into_iter()
        .map(|ty| vk::DescriptorPoolSize {
            ty,
            descriptor_count: count(ty) * frames,
        })
        .filter(|size| size.descriptor_count > 0)
        .collect();

        Self {
            sizes,
            max_sets: frames,
            allocated: 0,
        }
    }

    /// Claim `sets` more sets from the plan
    pub fn reserve(&mut self, sets: u32) -> Result<(), SelectionError> {
        let requested = self.allocated + sets;
        if requested > self.max_sets {
            return Err(SelectionError::DescriptorCapacity {
                capacity: self.max_sets,
                requested,
            });
        }
        self.allocated = requested;
        Ok(())
    }

    pub fn descriptor_count(&self, ty: vk::DescriptorType) -> u32 {
        self.sizes
            .iter()
            .filter(|s| s.ty == ty)
            .map(|s| s.descriptor_count)
            .sum()
    }
}

/// Layout, pool and one set per frame slot
pub struct FrameDescriptors {
    pub layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    sets: Vec<vk::DescriptorSet>,
    device: Arc<VulkanDevice>,
}

impl FrameDescriptors {
    pub fn new(device: Arc<VulkanDevice>, parameters: &[UniformParameter], frames: usize) -> Result<Self> {
        let layout_bindings: Vec<_> = parameters
            .iter()
            .map(|p| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(p.binding)
                    .descriptor_type(p.descriptor_type)
                    .descriptor_count(1)
                    .stage_flags(p.stage)
                    .build()
            })
            .collect();

        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&layout_bindings);
        let layout = unsafe { device.device.create_descriptor_set_layout(&layout_info, None) }
            .context("Failed to create descriptor set layout")?;

        let mut plan = PoolPlan::for_parameters(parameters, frames as u32);
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&plan.sizes)
            .max_sets(plan.max_sets);

        let pool = match unsafe { device.device.create_descriptor_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(e) => {
                unsafe { device.device.destroy_descriptor_set_layout(layout, None) };
                return Err(e).context("Failed to create descriptor pool");
            }
        };

        let mut descriptors = Self {
            layout,
            pool,
            sets: Vec::new(),
            device,
        };

        plan.reserve(frames as u32)?;
        let layouts = vec![layout; frames];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&layouts);

        descriptors.sets = unsafe { descriptors.device.device.allocate_descriptor_sets(&alloc_info) }
            .context("Failed to allocate descriptor sets")?;

        log::debug!(
            "Allocated {} descriptor sets ({} uniform buffers, {} samplers)",
            frames,
            plan.descriptor_count(vk::DescriptorType::UNIFORM_BUFFER),
            plan.descriptor_count(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
        );

        Ok(descriptors)
    }

    /// Point `slot`'s set at its uniform buffer and the shared texture
    pub fn write(
        &self,
        slot: usize,
        uniform_buffer: vk::Buffer,
        uniform_range: vk::DeviceSize,
        texture_view: vk::ImageView,
        sampler: vk::Sampler,
    ) {
        let set = self.sets[slot];

        let buffer_info = [vk::DescriptorBufferInfo {
            buffer: uniform_buffer,
            offset: 0,
            range: uniform_range,
        }];
        let image_info = [vk::DescriptorImageInfo {
            sampler,
            image_view: texture_view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }];

        let writes = [
            vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(UNIFORM_BINDING)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(&buffer_info)
                .build(),
            vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(TEXTURE_BINDING)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .image_info(&image_info)
                .build(),
        ];

        unsafe { self.device.device.update_descriptor_sets(&writes, &[]) };
    }

    pub fn set(&self, slot: usize) -> vk::DescriptorSet {
        self.sets[slot]
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }
}

impl Drop for FrameDescriptors {
    fn drop(&mut self) {
        // Sets are freed with the pool
        unsafe {
            self.device.device.destroy_descriptor_pool(self.pool, None);
            self.device.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_is_sized_per_type_times_frames() {
        let plan = PoolPlan::for_parameters(&MODEL_PARAMETERS, 3);
        assert_eq!(plan.max_sets, 3);
        assert_eq!(plan.descriptor_count(vk::DescriptorType::UNIFORM_BUFFER), 3);
        assert_eq!(plan.descriptor_count(vk::DescriptorType::COMBINED_IMAGE_SAMPLER), 3);
    }

    #[test]
    fn unused_types_are_left_out() {
        let plan = PoolPlan::for_parameters(&MODEL_PARAMETERS[..1], 2);
        assert_eq!(plan.sizes.len(), 1);
        assert_eq!(plan.sizes[0].ty, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(plan.sizes[0].descriptor_count, 2);
    }

    #[test]
    fn reserving_exactly_capacity_succeeds() {
        let mut plan = PoolPlan::for_parameters(&MODEL_PARAMETERS, 2);
        assert!(plan.reserve(1).is_ok());
        assert!(plan.reserve(1).is_ok());
    }

    #[test]
    fn over_allocation_is_a_capacity_error() {
        let mut plan = PoolPlan::for_parameters(&MODEL_PARAMETERS, 2);
        plan.reserve(2).unwrap();
        assert_eq!(
            plan.reserve(1),
            Err(SelectionError::DescriptorCapacity {
                capacity: 2,
                requested: 3
            })
        );
    }

    #[test]
    fn parameters_cover_both_stages() {
        let stages: Vec<_> = MODEL_PARAMETERS.iter().map(|p| p.stage).collect();
        assert_eq!(
            stages,
            vec![vk::ShaderStageFlags::VERTEX, vk::ShaderStageFlags::FRAGMENT]
        );
    }
}
