// Backend module - Vulkan abstraction layer
//
// Design: thin wrappers around ash; ownership and destruction order are
// explicit because the GPU outlives individual host-side scopes.

pub mod deletion;
pub mod device;
pub mod image;
pub mod swapchain;
pub mod sync;

pub use deletion::DeletionQueue;
pub use device::{GpuPreference, VulkanDevice};
pub use image::DrawTarget;
pub use swapchain::{AcquireStatus, Swapchain};
pub use sync::FrameSlot;
