// Image layout transitions, blits, and the offscreen draw target
//
// Transitions use ALL_COMMANDS stage masks: every prior write is made visible
// before any later stage touches the image. This stalls the pipeline, which
// is fine at a handful of transitions per frame; a long post-process chain
// would want tighter masks.

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;

use super::VulkanDevice;

/// Format of the offscreen draw target. Wider than the 8-bit swapchain
/// formats, so intermediate results keep precision until the final blit.
pub const DRAW_IMAGE_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;

/// Aspect implied by the layout an image is moving into.
pub fn aspect_mask_for(new_layout: vk::ImageLayout) -> vk::ImageAspectFlags {
    if new_layout == vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

/// Subresource range covering every mip level and array layer.
pub fn subresource_range(aspect_mask: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask,
        base_mip_level: 0,
        level_count: vk::REMAINING_MIP_LEVELS,
        base_array_layer: 0,
        layer_count: vk::REMAINING_ARRAY_LAYERS,
    }
}

/// Record a full barrier moving `image` from `old_layout` to `new_layout`.
///
/// Stateless: the caller owns the image and decides when the transition is
/// valid relative to its own submissions.
pub fn transition_image(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) {
    let barrier = vk::ImageMemoryBarrier2::builder()
        .src_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
        .src_access_mask(vk::AccessFlags2::MEMORY_WRITE)
        .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
        .dst_access_mask(vk::AccessFlags2::MEMORY_WRITE | vk::AccessFlags2::MEMORY_READ)
        .old_layout(old_layout)
        .new_layout(new_layout)
        .subresource_range(subresource_range(aspect_mask_for(new_layout)))
        .image(image)
        .build();

    let dependency_info =
        vk::DependencyInfo::builder().image_memory_barriers(std::slice::from_ref(&barrier));

    unsafe {
        device.cmd_pipeline_barrier2(cmd, &dependency_info);
    }
}

/// Record a blit from `source` to `destination`, rescaling with a linear
/// filter when the extents differ.
///
/// Expects `source` in TRANSFER_SRC_OPTIMAL and `destination` in
/// TRANSFER_DST_OPTIMAL; the caller records the surrounding transitions.
pub fn copy_image_to_image(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    source: vk::Image,
    destination: vk::Image,
    src_extent: vk::Extent2D,
    dst_extent: vk::Extent2D,
) {
    let subresource = vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level: 0,
        base_array_layer: 0,
        layer_count: 1,
    };

    let region = vk::ImageBlit2::builder()
        .src_subresource(subresource)
        .src_offsets([vk::Offset3D::default(), blit_corner(src_extent)])
        .dst_subresource(subresource)
        .dst_offsets([vk::Offset3D::default(), blit_corner(dst_extent)])
        .build();

    let blit_info = vk::BlitImageInfo2::builder()
        .src_image(source)
        .src_image_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
        .dst_image(destination)
        .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .filter(vk::Filter::LINEAR)
        .regions(std::slice::from_ref(&region));

    unsafe {
        device.cmd_blit_image2(cmd, &blit_info);
    }
}

/// Far corner of a blit region covering the full extent.
pub fn blit_corner(extent: vk::Extent2D) -> vk::Offset3D {
    vk::Offset3D {
        x: extent.width as i32,
        y: extent.height as i32,
        z: 1,
    }
}

/// GPU-resident intermediate image the frame content is rendered into,
/// then blitted onto the acquired swapchain image.
///
/// Decoupled from the swapchain, so draw resolution and format can differ
/// from what is presented. Recreated alongside the swapchain.
pub struct DrawTarget {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    allocation: Option<gpu_allocator::vulkan::Allocation>,
}

impl DrawTarget {
    pub fn new(device: &VulkanDevice, extent: vk::Extent2D) -> Result<Self> {
        log::info!(
            "Creating draw target: {}x{} ({:?})",
            extent.width,
            extent.height,
            DRAW_IMAGE_FORMAT
        );

        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(DRAW_IMAGE_FORMAT)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(
                vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::TRANSFER_DST
                    | vk::ImageUsageFlags::STORAGE
                    | vk::ImageUsageFlags::COLOR_ATTACHMENT,
            );

        let image = unsafe { device.device.create_image(&image_info, None) }
            .context("Failed to create draw target image")?;

        let requirements = unsafe { device.device.get_image_memory_requirements(image) };

        let allocation = device
            .allocator()
            .allocate(&AllocationCreateDesc {
                name: "draw target",
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .context("Failed to allocate draw target memory")?;

        unsafe {
            device
                .device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
                .context("Failed to bind draw target memory")?;
        }

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(DRAW_IMAGE_FORMAT)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = unsafe { device.device.create_image_view(&view_info, None) }
            .context("Failed to create draw target view")?;

        Ok(Self {
            image,
            view,
            extent,
            format: DRAW_IMAGE_FORMAT,
            allocation: Some(allocation),
        })
    }

    /// Release the image, view, and backing memory. The caller must have
    /// proven the GPU is done with the target (fence wait or device idle).
    pub fn destroy(&mut self, device: &VulkanDevice) {
        unsafe {
            device.device.destroy_image_view(self.view, None);
            device.device.destroy_image(self.image, None);
        }
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = device.allocator().free(allocation) {
                log::error!("Failed to free draw target memory: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_layout_selects_depth_aspect() {
        assert_eq!(
            aspect_mask_for(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            aspect_mask_for(vk::ImageLayout::GENERAL),
            vk::ImageAspectFlags::COLOR
        );
        assert_eq!(
            aspect_mask_for(vk::ImageLayout::PRESENT_SRC_KHR),
            vk::ImageAspectFlags::COLOR
        );
    }

    #[test]
    fn blit_corner_spans_the_full_extent() {
        let corner = blit_corner(vk::Extent2D {
            width: 1700,
            height: 900,
        });
        assert_eq!((corner.x, corner.y, corner.z), (1700, 900, 1));
    }

    #[test]
    fn subresource_range_covers_all_levels_and_layers() {
        let range = subresource_range(vk::ImageAspectFlags::COLOR);
        assert_eq!(range.level_count, vk::REMAINING_MIP_LEVELS);
        assert_eq!(range.layer_count, vk::REMAINING_ARRAY_LAYERS);
        assert_eq!(range.base_mip_level, 0);
        assert_eq!(range.base_array_layer, 0);
    }
}
