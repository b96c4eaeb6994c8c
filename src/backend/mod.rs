// Backend module - Vulkan abstraction layer
//
// Each type owns exactly one kind of GPU object and holds an Arc to the
// device that created it. Per-generation objects (swapchain, render graph,
// pipeline, command table) are torn down explicitly by the renderer.

pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod image;
pub mod pipeline;
pub mod render_graph;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod texture;
pub mod transfer;

pub use device::VulkanDevice;
