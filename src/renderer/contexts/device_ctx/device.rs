use std::ffi::{c_char, CStr};
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex};
use ash::vk;
use bytemuck::Pod;
use color_eyre::eyre::{eyre, OptionExt};
use color_eyre::Result;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use gpu_allocator::MemoryLocation;
use gpu_descriptor::{
    CreatePoolError, DescriptorAllocator, DescriptorDevice, DescriptorPoolCreateFlags,
    DescriptorSet, DescriptorSetLayoutCreateFlags, DescriptorTotalCount, DeviceAllocationError,
};
use crate::renderer::contexts::device_ctx::instance::RenderInstance;
use crate::renderer::contexts::device_ctx::queue::{Queue, QueueFamily};
use crate::renderer::contexts::device_ctx::transfer_ctx::TransferContext;
use crate::renderer::contexts::resource_ctx::descriptor_set_layout_builder::SetLayout;
use crate::renderer::resources::buffer::AllocatedBuffer;
use crate::renderer::resources::upload::{self, CommandRecorder, Consumer};

pub type RawDescriptorAllocator = DescriptorAllocator<vk::DescriptorPool, vk::DescriptorSet>;
pub type AllocatedSet = DescriptorSet<vk::DescriptorSet>;

/// Logical device plus the allocators every GPU object is created through
pub struct RenderDevice {
    pub logical: Arc<ash::Device>,
    pub physical: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    /// Features enabled on the logical device
    pub features: vk::PhysicalDeviceFeatures,

    // Renders, presents and uploads
    pub graphics_queue: Arc<Queue>,

    memory_allocator: ManuallyDrop<Arc<Mutex<Allocator>>>,
    descriptor_allocator: Mutex<RawDescriptorAllocator>,
    descriptor_device: DescriptorAshDevice,

    transfer_context: ManuallyDrop<TransferContext>,
}

impl RenderDevice {
    pub fn new(
        instance: &RenderInstance,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> Result<Self> {
        let (
            physical_device,
            graphics_queue_family,
        ) = Self::select_physical_device(
            &instance.instance,
            surface,
            surface_loader,
        )?;

        let properties = unsafe {
            instance.instance.get_physical_device_properties(physical_device)
        };
        log::info!(
            "Selected GPU {:?} ({:?}), queue family {}",
            properties.device_name_as_c_str().unwrap_or(c"<unnamed>"),
            properties.device_type,
            graphics_queue_family.index,
        );

        let (
            logical_device,
            graphics_queue,
            features,
        ) = Self::create_logical_device(
            &instance.instance,
            physical_device,
            graphics_queue_family,
        )?;

        let memory_allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.instance.clone(),
            device: logical_device.clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: cfg!(debug_assertions),
                log_leaks_on_shutdown: true,
                store_stack_traces: false,
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;

        let logical_device = Arc::new(logical_device);
        let graphics_queue = Arc::new(graphics_queue);

        // Update-after-bind pools are never requested
        let descriptor_allocator = RawDescriptorAllocator::new(0);

        let transfer_context = TransferContext::new(
            graphics_queue.clone(),
            logical_device.clone(),
        )?;

        Ok(Self {
            descriptor_device: DescriptorAshDevice::from(logical_device.clone()),
            logical: logical_device,
            physical: physical_device,
            properties,
            features,

            graphics_queue,

            memory_allocator: ManuallyDrop::new(Arc::new(Mutex::new(memory_allocator))),
            descriptor_allocator: Mutex::new(descriptor_allocator),

            transfer_context: ManuallyDrop::new(transfer_context),
        })
    }

    pub fn memory_allocator(&self) -> Arc<Mutex<Allocator>> {
        Arc::clone(&self.memory_allocator)
    }

    pub fn immediate_submit<F, R>(
        &self,
        func: F,
    ) -> Result<R>
    where
        F: FnOnce(vk::CommandBuffer, &ash::Device) -> Result<R>,
    {
        self.transfer_context.immediate_submit(func)
    }

    /// Copy `data` into a new GPU-local buffer through a transient staging buffer.
    /// Blocks until the copy has completed.
    pub fn upload_buffer<T: Pod>(
        &self,
        data: &[T],
        usage: vk::BufferUsageFlags,
        name: &str,
        consumer: Consumer,
    ) -> Result<AllocatedBuffer> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        if bytes.is_empty() {
            return Err(eyre!("Refusing to upload empty buffer {name}"));
        }

        let staging = AllocatedBuffer::new_staging(
            bytes,
            &format!("{name} (staging)"),
            self.memory_allocator(),
            self.logical.clone(),
        )?;
        let dst = AllocatedBuffer::new(
            bytes.len() as u64,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            name,
            MemoryLocation::GpuOnly,
            self.memory_allocator(),
            self.logical.clone(),
        )?;

        self.immediate_submit(|cmd, device| {
            upload::record_bulk_upload(
                &mut CommandRecorder::new(device, cmd),
                staging.buffer,
                dst.buffer,
                bytes.len() as u64,
                consumer,
            );
            Ok(())
        })?;

        Ok(dst)
    }

    pub fn allocate_set(&self, layout: &SetLayout) -> Result<AllocatedSet> {
        let mut allocator = self
            .descriptor_allocator
            .lock()
            .map_err(|e| eyre!(e.to_string()))?;
        let sets = unsafe {
            allocator.allocate(
                &self.descriptor_device,
                &layout.raw,
                DescriptorSetLayoutCreateFlags::empty(),
                &layout.counts,
                1,
            )?
        };
        sets.into_iter()
            .next()
            .ok_or_eyre("Descriptor allocator returned no set")
    }

    /// Return sets to their pools. The sets must not be referenced by pending GPU work.
    pub fn free_sets(&self, sets: impl IntoIterator<Item = AllocatedSet>) -> Result<()> {
        let mut allocator = self
            .descriptor_allocator
            .lock()
            .map_err(|e| eyre!(e.to_string()))?;
        unsafe {
            allocator.free(&self.descriptor_device, sets);
        }
        Ok(())
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.logical.device_wait_idle()?;
        }
        Ok(())
    }

    fn select_physical_device(
        instance: &ash::Instance,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> Result<(vk::PhysicalDevice, QueueFamily)> {
        let required_exts = Self::get_required_device_extensions();

        let candidates = unsafe { instance.enumerate_physical_devices()? }
            .into_iter()
            .map(|physical| unsafe {
                let props = instance.get_physical_device_properties(physical);
                let supported_exts = instance
                    .enumerate_device_extension_properties(physical)
                    .unwrap_or_default();
                let has_extensions = required_exts.iter().all(|required| {
                    supported_exts
                        .iter()
                        .any(|ext| ext.extension_name_as_c_str() == Ok(*required))
                });
                let families = instance.get_physical_device_queue_family_properties(physical);
                let queue_family = QueueFamily::find_graphics_present(&families, |i| {
                    surface_loader
                        .get_physical_device_surface_support(physical, i, surface)
                        .unwrap_or(false)
                });
                DeviceCandidate {
                    physical,
                    device_type: props.device_type,
                    api_version: props.api_version,
                    has_extensions,
                    queue_family,
                }
            })
            .collect::<Vec<_>>();

        for candidate in &candidates {
            log::debug!(
                "GPU candidate {:?}: {:?}, api {}.{}, extensions: {}, graphics+present family: {:?}",
                candidate.physical,
                candidate.device_type,
                vk::api_version_major(candidate.api_version),
                vk::api_version_minor(candidate.api_version),
                candidate.has_extensions,
                candidate.queue_family.map(|f| f.index),
            );
        }

        pick_device(&candidates).ok_or_eyre("No Vulkan 1.3 device can render and present to the window")
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        graphics_queue_family: QueueFamily,
    ) -> Result<(ash::Device, Queue, vk::PhysicalDeviceFeatures)> {
        let queue_priorities = [1.0];
        let queue_create_infos = [
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(graphics_queue_family.index)
                .queue_priorities(&queue_priorities),
        ];

        let supported = unsafe {
            instance.get_physical_device_features(physical_device)
        };
        let enabled_features = vk::PhysicalDeviceFeatures::default()
            .sampler_anisotropy(supported.sampler_anisotropy == vk::TRUE);

        let device = {
            let enabled_extension_names = Self::get_required_device_extensions()
                .iter()
                .map(|ext| ext.as_ptr())
                .collect::<Vec<*const c_char>>();
            let device_create_info = vk::DeviceCreateInfo::default()
                .queue_create_infos(&queue_create_infos)
                .enabled_extension_names(&enabled_extension_names)
                .enabled_features(&enabled_features);

            unsafe {
                instance.create_device(physical_device, &device_create_info, None)?
            }
        };

        let graphics_queue = unsafe {
            let queue = device.get_device_queue(graphics_queue_family.index, 0);
            Queue::new(graphics_queue_family, queue)
        };

        Ok((device, graphics_queue, enabled_features))
    }

    fn get_required_device_extensions() -> Vec<&'static CStr> {
        vec![
            ash::khr::swapchain::NAME,

            #[cfg(target_os = "macos")]
            ash::khr::portability_subset::NAME,
        ]
    }
}

impl Drop for RenderDevice {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.logical.device_wait_idle() {
                log::error!("device_wait_idle failed during teardown: {e}");
            }
            ManuallyDrop::drop(&mut self.transfer_context);
            match self.descriptor_allocator.lock() {
                Ok(mut allocator) => allocator.cleanup(&self.descriptor_device),
                Err(e) => log::error!("Descriptor allocator poisoned during teardown: {e}"),
            }
            // Reports leaked allocations before the device goes away
            ManuallyDrop::drop(&mut self.memory_allocator);
            self.logical.destroy_device(None);
        }
    }
}

/// What device selection needs to know about one physical device
#[derive(Debug, Clone, Copy)]
struct DeviceCandidate {
    physical: vk::PhysicalDevice,
    device_type: vk::PhysicalDeviceType,
    api_version: u32,
    has_extensions: bool,
    queue_family: Option<QueueFamily>,
}

fn type_rank(device_type: vk::PhysicalDeviceType) -> u32 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 0,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
        vk::PhysicalDeviceType::CPU => 3,
        _ => 4,
    }
}

/// First usable device of the best type. Usable means Vulkan 1.3, the swapchain extension,
/// and one queue family that can both render and present.
fn pick_device(candidates: &[DeviceCandidate]) -> Option<(vk::PhysicalDevice, QueueFamily)> {
    candidates
        .iter()
        .filter(|c| c.api_version >= vk::API_VERSION_1_3 && c.has_extensions)
        .filter_map(|c| c.queue_family.map(|family| (c, family)))
        .min_by_key(|(c, _)| type_rank(c.device_type))
        .map(|(c, family)| (c.physical, family))
}

pub struct DescriptorAshDevice(Arc<ash::Device>);

impl From<Arc<ash::Device>> for DescriptorAshDevice {
    fn from(device: Arc<ash::Device>) -> Self {
        Self(device)
    }
}

fn pool_sizes(count: &DescriptorTotalCount) -> smallvec::SmallVec<[vk::DescriptorPoolSize; 12]> {
    [
        (vk::DescriptorType::SAMPLER, count.sampler),
        (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, count.combined_image_sampler),
        (vk::DescriptorType::SAMPLED_IMAGE, count.sampled_image),
        (vk::DescriptorType::STORAGE_IMAGE, count.storage_image),
        (vk::DescriptorType::UNIFORM_TEXEL_BUFFER, count.uniform_texel_buffer),
        (vk::DescriptorType::STORAGE_TEXEL_BUFFER, count.storage_texel_buffer),
        (vk::DescriptorType::UNIFORM_BUFFER, count.uniform_buffer),
        (vk::DescriptorType::STORAGE_BUFFER, count.storage_buffer),
        (vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, count.uniform_buffer_dynamic),
        (vk::DescriptorType::STORAGE_BUFFER_DYNAMIC, count.storage_buffer_dynamic),
        (vk::DescriptorType::INPUT_ATTACHMENT, count.input_attachment),
        (vk::DescriptorType::ACCELERATION_STRUCTURE_KHR, count.acceleration_structure),
    ]
        .into_iter()
        .filter(|(_, n)| *n != 0)
        .map(|(ty, descriptor_count)| vk::DescriptorPoolSize { ty, descriptor_count })
        .collect()
}

impl DescriptorDevice<vk::DescriptorSetLayout, vk::DescriptorPool, vk::DescriptorSet>
for DescriptorAshDevice
{
    unsafe fn create_descriptor_pool(
        &self,
        descriptor_count: &DescriptorTotalCount,
        max_sets: u32,
        flags: DescriptorPoolCreateFlags,
    ) -> Result<vk::DescriptorPool, CreatePoolError> {
        let sizes = pool_sizes(descriptor_count);

        let mut ash_flags = vk::DescriptorPoolCreateFlags::empty();
        if flags.contains(DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET) {
            ash_flags |= vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET;
        }
        if flags.contains(DescriptorPoolCreateFlags::UPDATE_AFTER_BIND) {
            ash_flags |= vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND;
        }

        let result = unsafe {
            self.0.create_descriptor_pool(
                &vk::DescriptorPoolCreateInfo::default()
                    .max_sets(max_sets)
                    .pool_sizes(&sizes)
                    .flags(ash_flags),
                None,
            )
        };

        match result {
            Ok(pool) => Ok(pool),
            Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY) => Err(CreatePoolError::OutOfDeviceMemory),
            Err(vk::Result::ERROR_FRAGMENTATION) => Err(CreatePoolError::Fragmentation),
            Err(err) => {
                log::error!("vkCreateDescriptorPool failed: {err}");
                Err(CreatePoolError::OutOfHostMemory)
            }
        }
    }

    unsafe fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe {
            self.0.destroy_descriptor_pool(pool, None)
        }
    }

    unsafe fn alloc_descriptor_sets<'a>(
        &self,
        pool: &mut vk::DescriptorPool,
        layouts: impl ExactSizeIterator<Item = &'a vk::DescriptorSetLayout>,
        sets: &mut impl Extend<vk::DescriptorSet>,
    ) -> Result<(), DeviceAllocationError> {
        let set_layouts: smallvec::SmallVec<[_; 16]> = layouts.copied().collect();

        let result = unsafe {
            self.0.allocate_descriptor_sets(
                &vk::DescriptorSetAllocateInfo::default()
                    .set_layouts(&set_layouts)
                    .descriptor_pool(*pool),
            )
        };
        match result {
            Ok(allocated) => {
                sets.extend(allocated);
                Ok(())
            }
            Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY) => Err(DeviceAllocationError::OutOfDeviceMemory),
            Err(vk::Result::ERROR_FRAGMENTED_POOL) => Err(DeviceAllocationError::FragmentedPool),
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY) => Err(DeviceAllocationError::OutOfPoolMemory),
            Err(err) => {
                log::error!("vkAllocateDescriptorSets failed: {err}");
                Err(DeviceAllocationError::OutOfHostMemory)
            }
        }
    }

    unsafe fn dealloc_descriptor_sets(
        &self,
        pool: &mut vk::DescriptorPool,
        sets: impl Iterator<Item = vk::DescriptorSet>,
    ) {
        let sets: smallvec::SmallVec<[_; 16]> = sets.collect();
        if let Err(err) = unsafe { self.0.free_descriptor_sets(*pool, &sets) } {
            log::error!("vkFreeDescriptorSets failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn candidate(raw: u64, device_type: vk::PhysicalDeviceType) -> DeviceCandidate {
        DeviceCandidate {
            physical: vk::PhysicalDevice::from_raw(raw),
            device_type,
            api_version: vk::API_VERSION_1_3,
            has_extensions: true,
            queue_family: Some(QueueFamily { index: 0, queue_count: 1 }),
        }
    }

    #[test]
    fn prefers_discrete_over_integrated() {
        let candidates = [
            candidate(1, vk::PhysicalDeviceType::INTEGRATED_GPU),
            candidate(2, vk::PhysicalDeviceType::DISCRETE_GPU),
        ];
        let (physical, _) = pick_device(&candidates).unwrap();
        assert_eq!(physical.as_raw(), 2);
    }

    #[test]
    fn skips_devices_that_cannot_present_or_are_too_old() {
        let mut no_present = candidate(1, vk::PhysicalDeviceType::DISCRETE_GPU);
        no_present.queue_family = None;
        let mut too_old = candidate(2, vk::PhysicalDeviceType::DISCRETE_GPU);
        too_old.api_version = vk::API_VERSION_1_2;
        let mut no_swapchain = candidate(3, vk::PhysicalDeviceType::DISCRETE_GPU);
        no_swapchain.has_extensions = false;
        let fallback = candidate(4, vk::PhysicalDeviceType::CPU);

        let (physical, _) = pick_device(&[no_present, too_old, no_swapchain, fallback]).unwrap();
        assert_eq!(physical.as_raw(), 4);
        assert!(pick_device(&[no_present, too_old]).is_none());
    }

    #[test]
    fn pool_sizes_skip_unused_descriptor_types() {
        let count = DescriptorTotalCount {
            uniform_buffer: 5,
            combined_image_sampler: 7,
            input_attachment: 3,
            ..Default::default()
        };
        let sizes = pool_sizes(&count);
        assert_eq!(sizes.len(), 3);
        assert!(sizes.iter().any(|s| s.ty == vk::DescriptorType::UNIFORM_BUFFER && s.descriptor_count == 5));
        assert!(sizes.iter().any(|s| s.ty == vk::DescriptorType::INPUT_ATTACHMENT && s.descriptor_count == 3));
    }
}
