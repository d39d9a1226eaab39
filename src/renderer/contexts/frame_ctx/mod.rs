pub mod frame;
pub mod scheduler;

use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::{eyre, OptionExt};
use color_eyre::Result;
use crate::renderer::contexts::device_ctx::device::RenderDevice;
use crate::renderer::contexts::device_ctx::queue::Queue;
use crate::renderer::contexts::device_ctx::target::RenderTarget;
use crate::renderer::contexts::frame_ctx::frame::FrameSlot;
use crate::renderer::contexts::frame_ctx::scheduler::{
    BeginFrame, FrameScheduler, FrameSync, FrameToken, SurfaceStatus,
};

/// Responsibilities:
/// - Own the per-frame command buffers and synchronisation objects
/// - Pace frames through the scheduler
/// - Drain the GPU before slot resources are released
///
/// Fields are declared in teardown order.
pub struct RenderFrameContext {
    scheduler: FrameScheduler,
    slots: Vec<FrameSlot>,
    command_pool: vk::CommandPool,

    queue: Arc<Queue>,
    device: Arc<ash::Device>,
}

impl RenderFrameContext {
    /// `slot_count` is fixed for the lifetime of the context
    pub fn new(dev: &RenderDevice, slot_count: usize) -> Result<Self> {
        let device = dev.logical.clone();
        let command_pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(dev.graphics_queue.family.index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe {
            device.create_command_pool(&command_pool_info, None)?
        };

        let slots = (0..slot_count)
            .map(|_| FrameSlot::new(command_pool, device.clone()))
            .collect::<Result<Vec<_>>>();
        let slots = match slots {
            Ok(slots) => slots,
            Err(e) => {
                unsafe { device.destroy_command_pool(command_pool, None) };
                return Err(e);
            }
        };
        log::debug!("Created {slot_count} frame slots");

        Ok(Self {
            scheduler: FrameScheduler::new(slot_count)?,
            slots,
            command_pool,
            queue: dev.graphics_queue.clone(),
            device,
        })
    }

    pub fn begin_frame(&mut self, target: &RenderTarget) -> Result<BeginFrame> {
        let mut sync = SlotSync {
            slots: &mut self.slots,
            target,
            queue: &self.queue,
            device: &self.device,
        };
        self.scheduler.begin_frame(&mut sync)
    }

    /// Reset the frame's command buffer and begin recording into it
    pub fn begin_recording(&self, token: &FrameToken) -> Result<vk::CommandBuffer> {
        let cmd = self.slot(token)?.command_buffer;
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            self.device.begin_command_buffer(cmd, &begin_info)?;
        }
        Ok(cmd)
    }

    /// Finish recording, submit and present
    pub fn end_frame(&mut self, target: &RenderTarget, token: FrameToken) -> Result<()> {
        let cmd = self.slot(&token)?.command_buffer;
        unsafe {
            self.device.end_command_buffer(cmd)?;
        }

        let mut sync = SlotSync {
            slots: &mut self.slots,
            target,
            queue: &self.queue,
            device: &self.device,
        };
        self.scheduler.end_frame(&mut sync, token)
    }

    pub fn request_rebuild(&mut self) {
        self.scheduler.request_rebuild();
    }

    pub fn take_rebuild_request(&mut self) -> bool {
        self.scheduler.take_rebuild_request()
    }

    pub fn shutdown(&mut self, target: &RenderTarget) -> Result<()> {
        let mut sync = SlotSync {
            slots: &mut self.slots,
            target,
            queue: &self.queue,
            device: &self.device,
        };
        self.scheduler.shutdown(&mut sync)
    }

    fn slot(&self, token: &FrameToken) -> Result<&FrameSlot> {
        self.slots
            .get(token.slot)
            .ok_or_eyre(format!("Frame slot {} does not exist", token.slot))
    }
}

impl Drop for RenderFrameContext {
    fn drop(&mut self) {
        if let Err(e) = unsafe { self.device.device_wait_idle() } {
            log::error!("device_wait_idle failed while releasing frame slots: {e}");
        }
        self.slots.clear();
        unsafe {
            self.device.destroy_command_pool(self.command_pool, None);
        }
    }
}

/// The scheduler's protocol steps over real fences, semaphores and the swapchain
struct SlotSync<'a> {
    slots: &'a mut [FrameSlot],
    target: &'a RenderTarget,
    queue: &'a Queue,
    device: &'a ash::Device,
}

impl SlotSync<'_> {
    fn slot(&self, slot: usize) -> Result<&FrameSlot> {
        self.slots
            .get(slot)
            .ok_or_eyre(format!("Frame slot {slot} does not exist"))
    }

    /// A suboptimal acquire still signals the semaphore. Waiting on it with an empty
    /// submission leaves it unsignalled for the retried acquire.
    fn consume_acquire_signal(&self, semaphore: vk::Semaphore) -> Result<()> {
        let wait_semaphores = [semaphore];
        let wait_stages = [vk::PipelineStageFlags::ALL_COMMANDS];
        let submit = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages);
        unsafe {
            self.device.queue_submit(self.queue.handle, &[submit], vk::Fence::null())?;
        }
        Ok(())
    }
}

impl FrameSync for SlotSync<'_> {
    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        let fence = self.slot(slot)?.frame_done;
        unsafe {
            self.device.wait_for_fences(&[fence], true, u64::MAX)?;
        }
        Ok(())
    }

    fn acquire_image(&mut self, slot: usize) -> Result<SurfaceStatus<u32>> {
        let semaphore = self.slot(slot)?.image_acquired;
        let result = unsafe {
            self.target.swapchain_loader.acquire_next_image(
                self.target.swapchain.handle,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };
        match result {
            Ok((image_index, false)) => Ok(SurfaceStatus::Ready(image_index)),
            Ok((_, true)) => {
                self.consume_acquire_signal(semaphore)?;
                Ok(SurfaceStatus::Stale)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(SurfaceStatus::Stale),
            Err(e) => Err(eyre!("Unable to acquire next swapchain image: {e}")),
        }
    }

    fn reset_slot(&mut self, slot: usize) -> Result<()> {
        let fence = self.slot(slot)?.frame_done;
        unsafe {
            self.device.reset_fences(&[fence])?;
        }
        Ok(())
    }

    fn submit(&mut self, slot: usize) -> Result<()> {
        let frame = self.slot(slot)?;
        let command_buffers = [frame.command_buffer];
        let wait_semaphores = [frame.image_acquired];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [frame.render_finished];
        let submit = vk::SubmitInfo::default()
            .command_buffers(&command_buffers)
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .signal_semaphores(&signal_semaphores);
        unsafe {
            self.device.queue_submit(self.queue.handle, &[submit], frame.frame_done)?;
        }
        Ok(())
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<SurfaceStatus<()>> {
        let wait_semaphores = [self.slot(slot)?.render_finished];
        let swapchains = [self.target.swapchain.handle];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.target.swapchain_loader.queue_present(self.queue.handle, &present_info)
        };
        match result {
            Ok(false) => Ok(SurfaceStatus::Ready(())),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(SurfaceStatus::Stale),
            Err(e) => Err(eyre!("Unable to present swapchain image {image_index}: {e}")),
        }
    }

    fn wait_idle(&mut self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }
}
