pub mod device;
pub mod instance;
pub mod queue;
pub mod swapchain;
pub mod target;
pub mod transfer_ctx;

use std::sync::Arc;
use color_eyre::Result;
use winit::window::Window;
use crate::renderer::contexts::device_ctx::device::RenderDevice;
use crate::renderer::contexts::device_ctx::instance::RenderInstance;
use crate::renderer::contexts::device_ctx::target::RenderTarget;

/// Responsibilities:
/// - Manage the Vulkan instance, device, and queue
/// - Own the window surface and its swapchain
/// - Submit one-time transfer work
///
/// Fields are declared in teardown order.
pub struct RenderDeviceContext {
    pub target: RenderTarget,
    pub device: RenderDevice,
    pub instance: RenderInstance,
}

impl RenderDeviceContext {
    pub fn new(
        window: Arc<Window>,
        vsync: bool,
    ) -> Result<Self> {
        let instance = RenderInstance::new(&window)?;
        let (surface, surface_loader) = instance.create_surface(&window)?;
        let device = RenderDevice::new(&instance, surface, &surface_loader)?;
        let target = RenderTarget::new(
            window,
            (surface, surface_loader),
            &instance,
            &device,
            vsync,
        )?;

        Ok(Self {
            target,
            device,
            instance,
        })
    }
}
