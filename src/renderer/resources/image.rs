use std::sync::{Arc, Mutex};
use ash::vk;
use color_eyre::eyre::Result;
use gpu_allocator::vulkan::Allocator;
use crate::renderer::resources::memory::BoundMemory;

pub struct ImageCreateInfo<'a> {
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub usage: vk::ImageUsageFlags,
    /// Aspect of the default view
    pub aspect: vk::ImageAspectFlags,
    pub mip_levels: u32,
    pub name: &'a str,
}

impl ImageCreateInfo<'_> {
    fn full_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspect,
            base_mip_level: 0,
            level_count: self.mip_levels,
            base_array_layer: 0,
            layer_count: 1,
        }
    }
}

/// Device-local 2D image with one view over all of its mip levels
pub struct Image {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub aspect: vk::ImageAspectFlags,
    pub mip_levels: u32,

    memory: Option<BoundMemory>,
    device: Arc<ash::Device>,
}

impl Image {
    // The returned image has undefined contents and layout
    pub fn new(
        create_info: &ImageCreateInfo,
        memory_allocator: Arc<Mutex<Allocator>>,
        device: Arc<ash::Device>,
    ) -> Result<Self> {
        let info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(create_info.format)
            .extent(vk::Extent3D {
                width: create_info.extent.width,
                height: create_info.extent.height,
                depth: 1,
            })
            .mip_levels(create_info.mip_levels)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(create_info.usage)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        // Drop releases whatever was created if a later step fails
        let mut image = Self {
            image: unsafe { device.create_image(&info, None)? },
            view: vk::ImageView::null(),
            format: create_info.format,
            extent: create_info.extent,
            aspect: create_info.aspect,
            mip_levels: create_info.mip_levels,
            memory: None,
            device,
        };
        image.memory = Some(BoundMemory::for_image(
            &image.device,
            image.image,
            create_info.name,
            memory_allocator,
        )?);

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(create_info.format)
            .subresource_range(create_info.full_range());
        image.view = unsafe { image.device.create_image_view(&view_info, None)? };

        Ok(image)
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn full_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspect,
            base_mip_level: 0,
            level_count: self.mip_levels,
            base_array_layer: 0,
            layer_count: 1,
        }
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.destroy_image_view(self.view, None);
            }
            self.device.destroy_image(self.image, None);
        }
    }
}

/// Layout transition plus the access scopes it orders
#[derive(Debug, Clone, Copy)]
pub struct LayoutTransition {
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_stage: vk::PipelineStageFlags,
    pub src_access: vk::AccessFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub dst_access: vk::AccessFlags,
}

pub fn record_layout_transition(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    range: vk::ImageSubresourceRange,
    transition: LayoutTransition,
) {
    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(transition.old_layout)
        .new_layout(transition.new_layout)
        .src_access_mask(transition.src_access)
        .dst_access_mask(transition.dst_access)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(range);
    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            transition.src_stage,
            transition.dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
}
