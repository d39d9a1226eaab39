use std::sync::{Arc, Mutex};
use ash::vk;
use color_eyre::eyre::{eyre, OptionExt, Result};
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use gpu_allocator::MemoryLocation;

/// Memory bound to one buffer or image, returned to the allocator on drop.
/// The owner destroys its handle first.
pub struct BoundMemory {
    allocation: Option<Allocation>,
    allocator: Arc<Mutex<Allocator>>,
}

impl BoundMemory {
    /// On failure `buffer` is left unbound and still owned by the caller
    pub fn for_buffer(
        device: &ash::Device,
        buffer: vk::Buffer,
        location: MemoryLocation,
        name: &str,
        allocator: Arc<Mutex<Allocator>>,
    ) -> Result<Self> {
        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        let memory = Self::allocate(&allocator, &AllocationCreateDesc {
            name,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;
        let memory = Self { allocation: Some(memory), allocator };

        let allocation = memory.allocation()?;
        unsafe {
            device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset())?;
        }
        Ok(memory)
    }

    /// Dedicated device-local memory for an optimally tiled image
    pub fn for_image(
        device: &ash::Device,
        image: vk::Image,
        name: &str,
        allocator: Arc<Mutex<Allocator>>,
    ) -> Result<Self> {
        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let memory = Self::allocate(&allocator, &AllocationCreateDesc {
            name,
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::DedicatedImage(image),
        })?;
        let memory = Self { allocation: Some(memory), allocator };

        let allocation = memory.allocation()?;
        unsafe {
            device.bind_image_memory(image, allocation.memory(), allocation.offset())?;
        }
        Ok(memory)
    }

    pub fn allocation(&self) -> Result<&Allocation> {
        self.allocation.as_ref().ok_or_eyre("Allocation already released")
    }

    pub fn allocation_mut(&mut self) -> Result<&mut Allocation> {
        self.allocation.as_mut().ok_or_eyre("Allocation already released")
    }

    fn allocate(
        allocator: &Mutex<Allocator>,
        desc: &AllocationCreateDesc,
    ) -> Result<Allocation> {
        let mut allocator = allocator.lock().map_err(|e| eyre!(e.to_string()))?;
        Ok(allocator.allocate(desc)?)
    }
}

impl Drop for BoundMemory {
    fn drop(&mut self) {
        let Some(allocation) = self.allocation.take() else {
            return;
        };
        match self.allocator.lock() {
            Ok(mut allocator) => {
                if let Err(e) = allocator.free(allocation) {
                    log::error!("Failed to free GPU allocation: {e}");
                }
            }
            Err(e) => log::error!("Memory allocator poisoned while freeing: {e}"),
        }
    }
}
