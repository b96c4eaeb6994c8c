// Resource-selection failures
//
// These mean the hardware cannot satisfy a fixed requirement. They are fatal,
// but typed so callers can tell them apart from plain API failures.

use ash::vk;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("no memory type matches filter {type_filter:#b} with properties {properties:?}")]
    NoMemoryType {
        type_filter: u32,
        properties: vk::MemoryPropertyFlags,
    },

    #[error("none of the candidate formats {candidates:?} support {features:?} with {tiling:?} tiling")]
    NoSupportedFormat {
        candidates: Vec<vk::Format>,
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    },

    #[error("unsupported image layout transition {old:?} -> {new:?}")]
    UnsupportedTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },

    #[error("descriptor pool holds {capacity} sets, {requested} requested")]
    DescriptorCapacity { capacity: u32, requested: u32 },
}
