// Per-frame synchronization and command recording resources
//
// One FrameSlot per in-flight frame. A slot is reused only after the fence
// from its previous submission has signaled.

use anyhow::{Context, Result};
use ash::vk;

use super::{DeletionQueue, VulkanDevice};

/// Everything one in-flight frame needs: a command recording context, the
/// two semaphores ordering acquire -> render -> present on the GPU, the
/// fence reporting completion back to the host, and a deferred-destruction
/// queue flushed once that fence proves the prior use of this slot finished.
pub struct FrameSlot {
    pub command_pool: vk::CommandPool,
    pub command_buffer: vk::CommandBuffer,
    /// Signaled when the acquired swapchain image is ready to be written.
    pub swapchain_semaphore: vk::Semaphore,
    /// Signaled when rendering completes; presentation waits on it.
    pub render_semaphore: vk::Semaphore,
    /// Signaled when this slot's submitted GPU work is done.
    pub render_fence: vk::Fence,
    pub deletion_queue: DeletionQueue,
}

impl FrameSlot {
    pub fn new(device: &VulkanDevice) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.graphics_queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let command_pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .context("Failed to create frame command pool")?;

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let command_buffer = unsafe { device.device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate frame command buffer")?[0];

        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        // Start signaled so the first wait on this slot doesn't block forever
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        unsafe {
            Ok(Self {
                command_pool,
                command_buffer,
                swapchain_semaphore: device.device.create_semaphore(&semaphore_info, None)?,
                render_semaphore: device.device.create_semaphore(&semaphore_info, None)?,
                render_fence: device.device.create_fence(&fence_info, None)?,
                deletion_queue: DeletionQueue::new(),
            })
        }
    }

    /// Flush the slot's deferred destructions and release its resources.
    /// Call only after a full device idle.
    pub fn destroy(&mut self, device: &ash::Device) {
        self.deletion_queue.flush();
        unsafe {
            device.destroy_command_pool(self.command_pool, None);
            device.destroy_semaphore(self.swapchain_semaphore, None);
            device.destroy_semaphore(self.render_semaphore, None);
            device.destroy_fence(self.render_fence, None);
        }
    }
}

/// Slot selected for a given frame: the ring cycles through all slots.
pub fn slot_index(frame_number: u64, slot_count: usize) -> usize {
    (frame_number % slot_count as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_index_cycles_through_the_ring() {
        let indices: Vec<usize> = (0..6).map(|f| slot_index(f, 2)).collect();
        assert_eq!(indices, vec![0, 1, 0, 1, 0, 1]);
    }

    #[test]
    fn consecutive_frames_never_share_a_slot_within_one_lap() {
        for slot_count in 1..=4usize {
            for start in 0..8u64 {
                let lap: Vec<usize> = (start..start + slot_count as u64)
                    .map(|f| slot_index(f, slot_count))
                    .collect();
                let mut deduped = lap.clone();
                deduped.sort_unstable();
                deduped.dedup();
                assert_eq!(deduped.len(), slot_count, "slot reused within one lap");
            }
        }
    }
}
