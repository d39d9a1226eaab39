use std::mem::ManuallyDrop;
use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::OptionExt;
use color_eyre::Result;
use winit::window::Window;
use crate::renderer::contexts::device_ctx::device::RenderDevice;
use crate::renderer::contexts::device_ctx::instance::RenderInstance;
use crate::renderer::contexts::device_ctx::swapchain::{Swapchain, SwapchainChanges, SwapchainDesc};

/// Presentation target of the renderer, encapsulating the window, surface, and swapchain
pub struct RenderTarget {
    pub window: Arc<Window>,

    pub surface: vk::SurfaceKHR,
    pub surface_loader: ash::khr::surface::Instance,
    pub swapchain_loader: ash::khr::swapchain::Device,

    pub swapchain: ManuallyDrop<Swapchain>,
    vsync: bool,
}

impl RenderTarget {
    pub fn new(
        window: Arc<Window>,
        surface: (vk::SurfaceKHR, ash::khr::surface::Instance),
        ins: &RenderInstance,
        dev: &RenderDevice,
        vsync: bool,
    ) -> Result<Self> {
        let (surface, surface_loader) = surface;
        let swapchain_loader = ash::khr::swapchain::Device::new(
            &ins.instance,
            &dev.logical,
        );

        let desc = Self::query_desc(&surface_loader, surface, dev, &window, vsync)?
            .ok_or_eyre("Window has no area to present to")?;
        let swapchain = Swapchain::new(
            surface,
            desc,
            vk::SwapchainKHR::null(),
            &swapchain_loader,
            dev.logical.clone(),
        )?;
        log::info!(
            "Swapchain created: {}x{} {:?}, {} images, {:?}",
            swapchain.desc.extent.width,
            swapchain.desc.extent.height,
            swapchain.desc.format,
            swapchain.desc.image_count,
            swapchain.desc.present_mode,
        );

        Ok(Self {
            window,
            surface,
            surface_loader,
            swapchain_loader,
            swapchain: ManuallyDrop::new(swapchain),
            vsync,
        })
    }

    pub fn desc(&self) -> &SwapchainDesc {
        &self.swapchain.desc
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.desc.extent
    }

    pub fn is_minimized(&self) -> bool {
        let size = self.window.inner_size();
        size.width == 0 || size.height == 0
    }

    /// Recreate the image chain from the current surface state.
    /// The caller must have waited for the device to go idle.
    /// Returns `None` and keeps the current swapchain while the surface has no area.
    pub fn rebuild(
        &mut self,
        dev: &RenderDevice,
    ) -> Result<Option<SwapchainChanges>> {
        let Some(desc) = Self::query_desc(&self.surface_loader, self.surface, dev, &self.window, self.vsync)? else {
            return Ok(None);
        };
        let swapchain = Swapchain::new(
            self.surface,
            desc,
            self.swapchain.handle,
            &self.swapchain_loader,
            dev.logical.clone(),
        )?;
        let changes = SwapchainChanges::between(&self.swapchain.desc, &swapchain.desc);

        // Drops the retired swapchain and its views
        *self.swapchain = swapchain;

        log::info!(
            "Swapchain rebuilt: {}x{} {:?}, {} images (size changed: {}, format changed: {})",
            self.swapchain.desc.extent.width,
            self.swapchain.desc.extent.height,
            self.swapchain.desc.format,
            self.swapchain.desc.image_count,
            changes.size_changed,
            changes.format_changed,
        );
        Ok(Some(changes))
    }

    fn query_desc(
        surface_loader: &ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
        dev: &RenderDevice,
        window: &Window,
        vsync: bool,
    ) -> Result<Option<SwapchainDesc>> {
        let (capabilities, formats, present_modes) = unsafe {
            (
                surface_loader.get_physical_device_surface_capabilities(dev.physical, surface)?,
                surface_loader.get_physical_device_surface_formats(dev.physical, surface)?,
                surface_loader.get_physical_device_surface_present_modes(dev.physical, surface)?,
            )
        };
        let size = window.inner_size();
        SwapchainDesc::select_if_visible(
            &capabilities,
            &formats,
            &present_modes,
            (size.width, size.height),
            vsync,
        )
    }
}

impl Drop for RenderTarget {
    fn drop(&mut self) {
        unsafe {
            ManuallyDrop::drop(&mut self.swapchain);
            self.surface_loader.destroy_surface(self.surface, None);
        }
    }
}
