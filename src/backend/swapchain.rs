// Swapchain - Window presentation
//
// Owns the chain of presentable images and their views. Recreated from
// scratch whenever the surface reports it is out of date or suboptimal.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;

/// Outcome of an image acquire.
pub enum AcquireStatus {
    /// An image is ready. `suboptimal` means the chain still works but
    /// should be recreated after this frame.
    Acquired { index: u32, suboptimal: bool },
    /// The surface changed; the chain must be recreated before acquiring
    /// again. No semaphore was signaled.
    OutOfDate,
}

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: ash::extensions::khr::Swapchain,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    device: Arc<VulkanDevice>,
}

impl Swapchain {
    pub fn new(
        device: Arc<VulkanDevice>,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::extensions::khr::Surface,
        desired_extent: vk::Extent2D,
        preferred_present_mode: vk::PresentModeKHR,
    ) -> Result<Self> {
        log::info!(
            "Creating swapchain: {}x{}",
            desired_extent.width,
            desired_extent.height
        );

        let surface_caps = unsafe {
            surface_loader
                .get_physical_device_surface_capabilities(device.physical_device, surface)
        }?;

        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(device.physical_device, surface)
        }?;

        let present_modes = unsafe {
            surface_loader
                .get_physical_device_surface_present_modes(device.physical_device, surface)
        }?;

        let surface_format = choose_surface_format(&formats)?;
        let present_mode = choose_present_mode(&present_modes, preferred_present_mode);
        let extent = choose_extent(&surface_caps, desired_extent);
        let image_count = choose_image_count(&surface_caps);

        log::info!(
            "Swapchain config: {:?}, {:?}, {} images",
            surface_format.format,
            present_mode,
            image_count
        );

        let swapchain_loader =
            ash::extensions::khr::Swapchain::new(&device.instance, &device.device);

        // TRANSFER_DST so the draw target can be blitted onto the chain's images
        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .context("Failed to create swapchain")?;

        let images = unsafe { swapchain_loader.get_swapchain_images(swapchain) }?;

        log::info!("Created swapchain with {} images", images.len());

        let image_views: Result<Vec<_>> = images
            .iter()
            .map(|&image| {
                let create_info = vk::ImageViewCreateInfo::builder()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(surface_format.format)
                    .components(vk::ComponentMapping {
                        r: vk::ComponentSwizzle::IDENTITY,
                        g: vk::ComponentSwizzle::IDENTITY,
                        b: vk::ComponentSwizzle::IDENTITY,
                        a: vk::ComponentSwizzle::IDENTITY,
                    })
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    });

                unsafe {
                    device
                        .device
                        .create_image_view(&create_info, None)
                        .context("Failed to create swapchain image view")
                }
            })
            .collect();

        Ok(Self {
            swapchain,
            swapchain_loader,
            images,
            image_views: image_views?,
            format: surface_format.format,
            present_mode,
            extent,
            device,
        })
    }

    /// Block until the next presentable image is ready or `timeout` (ns)
    /// elapses. On success the given semaphore is signaled when the image
    /// can be written. A timeout surfaces as an error.
    pub fn acquire_next_image(
        &self,
        timeout: u64,
        semaphore: vk::Semaphore,
    ) -> Result<AcquireStatus> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                timeout,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((index, suboptimal)) => Ok(AcquireStatus::Acquired { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireStatus::OutOfDate),
            Err(vk::Result::TIMEOUT) => {
                Err(anyhow::anyhow!("timed out acquiring a swapchain image"))
            }
            Err(e) => Err(e).context("Failed to acquire swapchain image"),
        }
    }

    /// Queue `image_index` for display once the wait semaphores signal.
    /// Returns `true` when the chain must be recreated before the next
    /// acquire; the condition is deferred rather than failing this frame.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.swapchain_loader.queue_present(queue, &present_info) };

        match result {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(e) => Err(e).context("Failed to present swapchain image"),
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        // Caller guarantees the GPU is idle with respect to these images
        unsafe {
            for &view in &self.image_views {
                self.device.device.destroy_image_view(view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

/// Pick an 8-bit surface format, preferring sRGB. Deterministic: the same
/// reported format list always yields the same choice.
fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Result<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| {
            formats.iter().find(|f| {
                f.format == vk::Format::B8G8R8A8_UNORM
                    && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
        })
        .or_else(|| formats.first())
        .copied()
        .context("Surface reports no formats")
}

/// Use the preferred mode when the surface supports it, otherwise FIFO,
/// which Vulkan guarantees is always available.
fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if available.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Surface-dictated extent when fixed, otherwise the desired size clamped
/// to the surface limits.
fn choose_extent(
    caps: &vk::SurfaceCapabilitiesKHR,
    desired: vk::Extent2D,
) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: desired
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: desired
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One image beyond the minimum so acquire rarely blocks on the display
/// engine; zero max means unlimited.
fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let mut count = caps.min_image_count + 1;
    if caps.max_image_count > 0 && count > caps.max_image_count {
        count = caps.max_image_count;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(f: vk::Format, cs: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format: f,
            color_space: cs,
        }
    }

    fn caps_1700x900() -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 8,
            current_extent: vk::Extent2D {
                width: 1700,
                height: 900,
            },
            ..Default::default()
        }
    }

    #[test]
    fn prefers_8bit_srgb() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn falls_back_to_8bit_unorm_then_first() {
        let formats = [
            format(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(
            choose_surface_format(&formats).unwrap().format,
            vk::Format::B8G8R8A8_UNORM
        );

        let exotic_only = [format(
            vk::Format::A2B10G10R10_UNORM_PACK32,
            vk::ColorSpaceKHR::SRGB_NONLINEAR,
        )];
        assert_eq!(
            choose_surface_format(&exotic_only).unwrap().format,
            vk::Format::A2B10G10R10_UNORM_PACK32
        );

        assert!(choose_surface_format(&[]).is_err());
    }

    #[test]
    fn format_choice_is_stable_across_recreation() {
        let formats = [
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let modes = [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO];

        let first = (
            choose_surface_format(&formats).unwrap(),
            choose_present_mode(&modes, vk::PresentModeKHR::FIFO),
        );
        let second = (
            choose_surface_format(&formats).unwrap(),
            choose_present_mode(&modes, vk::PresentModeKHR::FIFO),
        );
        assert_eq!(first.0.format, second.0.format);
        assert_eq!(first.0.color_space, second.0.color_space);
        assert_eq!(first.1, second.1);
    }

    #[test]
    fn unsupported_preference_falls_back_to_fifo() {
        let modes = [vk::PresentModeKHR::FIFO];
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::FIFO
        );
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::IMMEDIATE
        );
    }

    #[test]
    fn extent_follows_surface_when_fixed_and_clamps_otherwise() {
        let fixed = caps_1700x900();
        let extent = choose_extent(
            &fixed,
            vk::Extent2D {
                width: 400,
                height: 300,
            },
        );
        assert_eq!((extent.width, extent.height), (1700, 900));

        let free = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 200,
                height: 200,
            },
            max_image_extent: vk::Extent2D {
                width: 1600,
                height: 1200,
            },
            ..Default::default()
        };
        let extent = choose_extent(
            &free,
            vk::Extent2D {
                width: 4000,
                height: 100,
            },
        );
        assert_eq!((extent.width, extent.height), (1600, 200));
    }

    #[test]
    fn fifo_srgb_1700x900_scenario() {
        // 1700x900 surface with FIFO and an 8-bit sRGB format available:
        // expect that exact extent and format, and at least two images.
        let caps = caps_1700x900();
        let formats = [format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR)];
        let modes = [vk::PresentModeKHR::FIFO];

        let chosen_format = choose_surface_format(&formats).unwrap();
        let chosen_mode = choose_present_mode(&modes, vk::PresentModeKHR::FIFO);
        let extent = choose_extent(
            &caps,
            vk::Extent2D {
                width: 1700,
                height: 900,
            },
        );
        let count = choose_image_count(&caps);

        assert_eq!(chosen_format.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(chosen_mode, vk::PresentModeKHR::FIFO);
        assert_eq!((extent.width, extent.height), (1700, 900));
        assert!(count >= 2);
    }

    #[test]
    fn image_count_respects_surface_maximum() {
        let capped = vk::SurfaceCapabilitiesKHR {
            min_image_count: 3,
            max_image_count: 3,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&capped), 3);

        let unlimited = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&unlimited), 3);
    }
}
