use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::{OptionExt, Result};
use crate::renderer::contexts::device_ctx::queue::Queue;

/// One-time command submission used by the load-time upload path.
/// Every submission blocks until its dedicated fence signals.
pub struct TransferContext {
    fence: vk::Fence,
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,

    queue: Arc<Queue>,
    device: Arc<ash::Device>,
}

impl TransferContext {
    pub fn new(
        queue: Arc<Queue>,
        device: Arc<ash::Device>,
    ) -> Result<Self> {
        let fence = unsafe {
            device.create_fence(&vk::FenceCreateInfo::default(), None)?
        };

        let command_pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue.family.index)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let command_pool =
            unsafe { device.create_command_pool(&command_pool_info, None)? };

        let command_buffer_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool)
            .command_buffer_count(1)
            .level(vk::CommandBufferLevel::PRIMARY);
        let command_buffer = unsafe {
            device
                .allocate_command_buffers(&command_buffer_info)?
                .into_iter()
                .next()
                .ok_or_eyre("No transfer command buffer allocated")?
        };

        Ok(Self {
            fence,
            command_pool,
            command_buffer,
            queue,
            device,
        })
    }

    /// Record `func` into a one-time command buffer, submit it and wait for completion.
    /// Resources captured by `func` may be released as soon as this returns.
    pub fn immediate_submit<F, R>(
        &self,
        func: F,
    ) -> Result<R>
    where
        F: FnOnce(vk::CommandBuffer, &ash::Device) -> Result<R>,
    {
        let cmd = self.command_buffer;

        let cmd_begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device.begin_command_buffer(cmd, &cmd_begin_info)?;
        }

        let recorded = func(cmd, &self.device);

        unsafe {
            self.device.end_command_buffer(cmd)?;
        }
        let output = match recorded {
            Ok(output) => output,
            Err(e) => {
                unsafe {
                    self.device.reset_command_pool(
                        self.command_pool,
                        vk::CommandPoolResetFlags::empty(),
                    )?;
                }
                return Err(e);
            }
        };

        let cmds = [cmd];
        let submit = vk::SubmitInfo::default()
            .command_buffers(&cmds);
        unsafe {
            self.device.queue_submit(
                self.queue.handle,
                &[submit],
                self.fence,
            )?;
            self.device.wait_for_fences(&[self.fence], true, u64::MAX)?;
            self.device.reset_fences(&[self.fence])?;
            self.device.reset_command_pool(
                self.command_pool,
                vk::CommandPoolResetFlags::empty(),
            )?;
        }

        Ok(output)
    }
}

impl Drop for TransferContext {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_fence(self.fence, None);
        }
    }
}
