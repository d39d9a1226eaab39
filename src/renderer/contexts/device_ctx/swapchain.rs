use std::sync::Arc;
use ash::prelude::VkResult;
use ash::vk;
use color_eyre::eyre::{eyre, OptionExt};
use color_eyre::Result;

/// Everything about the presentable image chain that its consumers depend on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainDesc {
    pub image_count: u32,
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

impl SwapchainDesc {
    /// Like [`SwapchainDesc::select`], but `None` while the surface has no area
    /// (a minimised window). The swapchain is kept until the surface regains a size.
    pub fn select_if_visible(
        capabilities: &vk::SurfaceCapabilitiesKHR,
        formats: &[vk::SurfaceFormatKHR],
        present_modes: &[vk::PresentModeKHR],
        window_size: (u32, u32),
        vsync: bool,
    ) -> Result<Option<Self>> {
        let extent = choose_extent(capabilities, window_size);
        if extent.width == 0 || extent.height == 0 {
            return Ok(None);
        }
        Self::select(capabilities, formats, present_modes, window_size, vsync).map(Some)
    }

    pub fn select(
        capabilities: &vk::SurfaceCapabilitiesKHR,
        formats: &[vk::SurfaceFormatKHR],
        present_modes: &[vk::PresentModeKHR],
        window_size: (u32, u32),
        vsync: bool,
    ) -> Result<Self> {
        let surface_format = choose_surface_format(formats)
            .ok_or_eyre("Surface reports no formats")?;
        let extent = choose_extent(capabilities, window_size);
        if extent.width == 0 || extent.height == 0 {
            return Err(eyre!("Cannot build a swapchain for a zero-area surface"));
        }
        let pre_transform = if capabilities
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            capabilities.current_transform
        };

        Ok(Self {
            image_count: choose_image_count(capabilities),
            format: surface_format.format,
            color_space: surface_format.color_space,
            extent,
            present_mode: choose_present_mode(present_modes, vsync),
            pre_transform,
        })
    }
}

/// Which consumer-visible properties differ between two swapchain generations
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainChanges {
    pub size_changed: bool,
    pub format_changed: bool,
}

impl SwapchainChanges {
    pub fn between(old: &SwapchainDesc, new: &SwapchainDesc) -> Self {
        Self {
            size_changed: old.extent != new.extent,
            format_changed: old.format != new.format || old.color_space != new.color_space,
        }
    }
}

/// Prefer 8-bit sRGB BGRA; otherwise take whatever the surface lists first
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|format| {
            format.format == vk::Format::B8G8R8A8_SRGB
                && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

pub fn choose_present_mode(modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }
    modes
        .iter()
        .copied()
        .find(|mode| *mode == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, window_size: (u32, u32)) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: window_size.0.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: window_size.1.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

/// One more than the minimum so acquire rarely waits on the driver, capped by the maximum (0 = none)
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let min = capabilities.min_image_count;
    let max = capabilities.max_image_count;
    if max > 0 && min + 1 > max {
        max
    } else {
        min + 1
    }
}

pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
    pub desc: SwapchainDesc,

    loader: ash::khr::swapchain::Device,
    device: Arc<ash::Device>,
}

impl Swapchain {
    /// `old` is retired by the new swapchain and may be destroyed once this returns
    pub fn new(
        surface: vk::SurfaceKHR,
        desc: SwapchainDesc,
        old: vk::SwapchainKHR,
        loader: &ash::khr::swapchain::Device,
        device: Arc<ash::Device>,
    ) -> Result<Self> {
        let swapchain_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(desc.image_count)
            .image_format(desc.format)
            .image_color_space(desc.color_space)
            .image_extent(desc.extent)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(desc.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(desc.present_mode)
            .clipped(true)
            .image_array_layers(1)
            .old_swapchain(old);

        let handle = unsafe {
            loader.create_swapchain(&swapchain_info, None)?
        };
        // Drop destroys the handle and any views if a later step fails
        let mut swapchain = Self {
            handle,
            images: Vec::new(),
            views: Vec::new(),
            desc,
            loader: loader.clone(),
            device,
        };
        swapchain.images = unsafe {
            loader.get_swapchain_images(handle)?
        };
        // The driver may hand out more images than requested
        swapchain.desc.image_count = swapchain.images.len() as u32;

        let device = swapchain.device.clone();
        swapchain.views = create_each(
            &swapchain.images,
            |image| {
                let view_info = vk::ImageViewCreateInfo::default()
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(desc.format)
                    .components(vk::ComponentMapping::default())
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    })
                    .image(*image);
                unsafe { device.create_image_view(&view_info, None) }
            },
            |view| unsafe { device.destroy_image_view(view, None) },
        )?;

        Ok(swapchain)
    }
}

/// Create one handle per item. On the first failure the handles created so far are destroyed.
fn create_each<I, H>(
    items: &[I],
    mut create: impl FnMut(&I) -> VkResult<H>,
    mut destroy: impl FnMut(H),
) -> VkResult<Vec<H>> {
    let mut created = Vec::with_capacity(items.len());
    for item in items {
        match create(item) {
            Ok(handle) => created.push(handle),
            Err(e) => {
                created.into_iter().for_each(&mut destroy);
                return Err(e);
            }
        }
    }
    Ok(created)
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for view in self.views.drain(..) {
                self.device.destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.handle, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(current: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 8,
            current_extent: vk::Extent2D { width: current.0, height: current.1 },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 4096, height: 4096 },
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        }
    }

    fn formats() -> Vec<vk::SurfaceFormatKHR> {
        vec![
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ]
    }

    #[test]
    fn selecting_twice_without_surface_change_is_identical() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        let first = SwapchainDesc::select(&caps((800, 600)), &formats(), &modes, (800, 600), false).unwrap();
        let second = SwapchainDesc::select(&caps((800, 600)), &formats(), &modes, (800, 600), false).unwrap();

        assert_eq!(first, second);
        assert_eq!(SwapchainChanges::between(&first, &second), SwapchainChanges::default());
    }

    #[test]
    fn resize_reports_size_change_only() {
        let modes = [vk::PresentModeKHR::FIFO];
        let small = SwapchainDesc::select(&caps((800, 600)), &formats(), &modes, (800, 600), true).unwrap();
        let large = SwapchainDesc::select(&caps((1920, 1080)), &formats(), &modes, (1920, 1080), true).unwrap();

        let changes = SwapchainChanges::between(&small, &large);
        assert!(changes.size_changed);
        assert!(!changes.format_changed);
        assert_eq!(large.extent, vk::Extent2D { width: 1920, height: 1080 });
    }

    #[test]
    fn format_change_is_detected() {
        let modes = [vk::PresentModeKHR::FIFO];
        let srgb = SwapchainDesc::select(&caps((800, 600)), &formats(), &modes, (800, 600), true).unwrap();
        let unorm = SwapchainDesc::select(&caps((800, 600)), &formats()[..1], &modes, (800, 600), true).unwrap();

        let changes = SwapchainChanges::between(&srgb, &unorm);
        assert!(changes.format_changed);
        assert!(!changes.size_changed);
    }

    #[test]
    fn prefers_srgb_and_falls_back_to_first_format() {
        assert_eq!(choose_surface_format(&formats()).map(|f| f.format), Some(vk::Format::B8G8R8A8_SRGB));
        assert_eq!(choose_surface_format(&formats()[..1]).map(|f| f.format), Some(vk::Format::B8G8R8A8_UNORM));
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn vsync_forces_fifo() {
        let modes = [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO];
        assert_eq!(choose_present_mode(&modes, true), vk::PresentModeKHR::FIFO);
        assert_eq!(choose_present_mode(&modes, false), vk::PresentModeKHR::MAILBOX);
        assert_eq!(choose_present_mode(&[vk::PresentModeKHR::FIFO], false), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn undefined_current_extent_clamps_window_size() {
        let mut c = caps((u32::MAX, u32::MAX));
        c.max_image_extent = vk::Extent2D { width: 1024, height: 1024 };
        assert_eq!(choose_extent(&c, (3000, 500)), vk::Extent2D { width: 1024, height: 500 });
    }

    #[test]
    fn image_count_respects_maximum() {
        let mut c = caps((800, 600));
        assert_eq!(choose_image_count(&c), 3);
        c.max_image_count = 2;
        assert_eq!(choose_image_count(&c), 2);
        c.max_image_count = 0;
        assert_eq!(choose_image_count(&c), 3);
    }

    #[test]
    fn zero_area_surface_is_rejected() {
        let modes = [vk::PresentModeKHR::FIFO];
        assert!(SwapchainDesc::select(&caps((0, 0)), &formats(), &modes, (0, 0), true).is_err());
    }

    #[test]
    fn zero_area_surface_defers_instead_of_failing() {
        let modes = [vk::PresentModeKHR::FIFO];
        let minimised = caps((0, 0));

        assert_eq!(
            SwapchainDesc::select_if_visible(&minimised, &formats(), &modes, (0, 0), true).unwrap(),
            None,
        );
        assert!(
            SwapchainDesc::select_if_visible(&caps((800, 600)), &formats(), &modes, (800, 600), true)
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn failed_creation_destroys_the_handles_already_made() {
        let mut destroyed = Vec::new();
        let result = create_each(
            &[1, 2, 3],
            |item| if *item == 3 { Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY) } else { Ok(*item * 10) },
            |handle| destroyed.push(handle),
        );

        assert_eq!(result, Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY));
        assert_eq!(destroyed, vec![10, 20]);
    }

    #[test]
    fn successful_creation_keeps_every_handle() {
        let mut destroyed = Vec::new();
        let result = create_each(&[1, 2], |item| Ok(*item), |handle: i32| destroyed.push(handle));

        assert_eq!(result, Ok(vec![1, 2]));
        assert!(destroyed.is_empty());
    }
}
