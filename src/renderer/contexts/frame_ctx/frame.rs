use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::OptionExt;
use color_eyre::Result;

/// Per-frame command buffer and synchronisation objects, reused every N frames
pub struct FrameSlot {
    pub command_buffer: vk::CommandBuffer,

    // Signals when the swapchain image can be rendered to
    pub image_acquired: vk::Semaphore,

    // Signals when rendering commands have finished, gating presentation
    pub render_finished: vk::Semaphore,

    // Signals when the slot's submission has retired on the GPU
    pub frame_done: vk::Fence,

    device: Arc<ash::Device>,
}

impl FrameSlot {
    /// The command buffer is freed together with `command_pool`
    pub fn new(
        command_pool: vk::CommandPool,
        device: Arc<ash::Device>,
    ) -> Result<Self> {
        let command_buffer_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool)
            .command_buffer_count(1)
            .level(vk::CommandBufferLevel::PRIMARY);
        let command_buffer = unsafe {
            device
                .allocate_command_buffers(&command_buffer_info)?
                .into_iter()
                .next()
                .ok_or_eyre("No frame command buffer allocated")?
        };

        let image_acquired = unsafe {
            device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)?
        };
        let render_finished = unsafe {
            device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)?
        };
        // Created signalled so the first wait on the slot returns immediately
        let frame_done = unsafe {
            device.create_fence(
                &vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED),
                None,
            )?
        };

        Ok(Self {
            command_buffer,
            image_acquired,
            render_finished,
            frame_done,
            device,
        })
    }
}

impl Drop for FrameSlot {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.frame_done, None);
            self.device.destroy_semaphore(self.render_finished, None);
            self.device.destroy_semaphore(self.image_acquired, None);
        }
    }
}
