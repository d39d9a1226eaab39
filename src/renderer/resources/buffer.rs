use std::sync::{Arc, Mutex};
use ash::vk;
use color_eyre::eyre::Result;
use gpu_allocator::vulkan::Allocator;
use gpu_allocator::MemoryLocation;
use crate::renderer::resources::memory::BoundMemory;

/// A `vk::Buffer` with its own memory, freed on drop
pub struct AllocatedBuffer {
    pub buffer: vk::Buffer,
    pub size: u64,

    memory: BoundMemory,
    device: Arc<ash::Device>,
}

impl AllocatedBuffer {
    pub fn new(
        size: u64,
        usage: vk::BufferUsageFlags,
        name: &str,
        location: MemoryLocation,
        memory_allocator: Arc<Mutex<Allocator>>,
        device: Arc<ash::Device>,
    ) -> Result<Self> {
        let info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { device.create_buffer(&info, None)? };

        let memory = match BoundMemory::for_buffer(&device, buffer, location, name, memory_allocator) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e.wrap_err(format!("Allocating {size} bytes for buffer {name}")));
            }
        };

        Ok(Self {
            buffer,
            size,
            memory,
            device,
        })
    }

    /// Host-visible transfer source holding a copy of `data`
    pub fn new_staging<T: Copy>(
        data: &[T],
        name: &str,
        memory_allocator: Arc<Mutex<Allocator>>,
        device: Arc<ash::Device>,
    ) -> Result<Self> {
        // Zero-sized buffers are invalid
        let size = (size_of_val(data) as u64).max(4);
        let mut staging = Self::new(
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            name,
            MemoryLocation::CpuToGpu,
            memory_allocator,
            device,
        )?;
        staging.write(data, 0)?;
        Ok(staging)
    }

    /// Copy `data` into mapped memory at `offset` bytes. Host-visible buffers only.
    pub fn write<T: Copy>(
        &mut self,
        data: &[T],
        offset: usize,
    ) -> Result<presser::CopyRecord> {
        let allocation = self.memory.allocation_mut()?;
        Ok(presser::copy_from_slice_to_offset(data, allocation, offset)?)
    }
}

impl Drop for AllocatedBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
        }
    }
}
