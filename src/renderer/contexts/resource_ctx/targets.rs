use std::sync::{Arc, Mutex};
use ash::vk;
use color_eyre::Result;
use gpu_allocator::vulkan::Allocator;
use crate::renderer::contexts::device_ctx::device::RenderDevice;
use crate::renderer::resources::image::{record_layout_transition, Image, ImageCreateInfo, LayoutTransition};

pub const DEPTH_STENCIL_FORMAT: vk::Format = vk::Format::D32_SFLOAT_S8_UINT;
pub const GBUFFER_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
pub const OFFSCREEN_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;
pub const SHADOW_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetRole {
    Depth,
    /// Overdraw counter
    Stencil,
    /// Offscreen color, also the overdraw scratch attachment
    Color,
    Normal,
    Albedo,
    Shadow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetSpec {
    pub role: TargetRole,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub usage: vk::ImageUsageFlags,
    /// Aspect of the view bound as a framebuffer attachment
    pub attachment_aspect: vk::ImageAspectFlags,
    /// Aspect of the view read as an input attachment or sampled texture
    pub read_aspect: vk::ImageAspectFlags,
}

/// The targets recreated whenever the window size changes, in `TargetRole` order
pub fn size_dependent_specs(extent: vk::Extent2D) -> [TargetSpec; 5] {
    use vk::ImageAspectFlags as Aspect;
    use vk::ImageUsageFlags as Usage;

    let depth_stencil = |role, read_aspect| TargetSpec {
        role,
        format: DEPTH_STENCIL_FORMAT,
        extent,
        usage: Usage::DEPTH_STENCIL_ATTACHMENT | Usage::INPUT_ATTACHMENT,
        attachment_aspect: Aspect::DEPTH | Aspect::STENCIL,
        read_aspect,
    };
    let color = |role, format, usage| TargetSpec {
        role,
        format,
        extent,
        usage,
        attachment_aspect: Aspect::COLOR,
        read_aspect: Aspect::COLOR,
    };

    [
        depth_stencil(TargetRole::Depth, Aspect::DEPTH),
        depth_stencil(TargetRole::Stencil, Aspect::STENCIL),
        color(
            TargetRole::Color,
            OFFSCREEN_FORMAT,
            Usage::SAMPLED | Usage::COLOR_ATTACHMENT | Usage::INPUT_ATTACHMENT,
        ),
        color(TargetRole::Normal, GBUFFER_FORMAT, Usage::COLOR_ATTACHMENT | Usage::INPUT_ATTACHMENT),
        color(TargetRole::Albedo, GBUFFER_FORMAT, Usage::COLOR_ATTACHMENT | Usage::INPUT_ATTACHMENT),
    ]
}

pub fn shadow_spec(size: u32) -> TargetSpec {
    TargetSpec {
        role: TargetRole::Shadow,
        format: SHADOW_FORMAT,
        extent: vk::Extent2D { width: size, height: size },
        usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
        attachment_aspect: vk::ImageAspectFlags::DEPTH,
        read_aspect: vk::ImageAspectFlags::DEPTH,
    }
}

/// Render target image. Depth/stencil targets carry a second single-aspect view for reads.
pub struct TargetImage {
    pub role: TargetRole,
    read_view: Option<vk::ImageView>,
    image: Image,
}

impl TargetImage {
    pub fn new(
        spec: &TargetSpec,
        memory_allocator: Arc<Mutex<Allocator>>,
        device: Arc<ash::Device>,
    ) -> Result<Self> {
        let name = format!("{:?} target", spec.role);
        let image = Image::new(
            &ImageCreateInfo {
                format: spec.format,
                extent: spec.extent,
                usage: spec.usage,
                aspect: spec.attachment_aspect,
                mip_levels: 1,
                name: &name,
            },
            memory_allocator,
            device.clone(),
        )?;

        let read_view = if spec.read_aspect != spec.attachment_aspect {
            let info = vk::ImageViewCreateInfo::default()
                .view_type(vk::ImageViewType::TYPE_2D)
                .image(image.image)
                .format(spec.format)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: spec.read_aspect,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            Some(unsafe { device.create_image_view(&info, None)? })
        } else {
            None
        };

        Ok(Self {
            role: spec.role,
            read_view,
            image,
        })
    }

    pub fn attachment_view(&self) -> vk::ImageView {
        self.image.view
    }

    pub fn read_view(&self) -> vk::ImageView {
        self.read_view.unwrap_or(self.image.view)
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.image.extent
    }

    pub fn image(&self) -> &Image {
        &self.image
    }
}

impl Drop for TargetImage {
    fn drop(&mut self) {
        if let Some(view) = self.read_view.take() {
            unsafe {
                self.image.device().destroy_image_view(view, None);
            }
        }
    }
}

/// Window-sized attachments shared by the forward, offscreen, overdraw and deferred passes
pub struct RenderTargets {
    pub depth: TargetImage,
    pub stencil: TargetImage,
    pub color: TargetImage,
    pub normal: TargetImage,
    pub albedo: TargetImage,
}

impl RenderTargets {
    pub fn new(dev: &RenderDevice, extent: vk::Extent2D) -> Result<Self> {
        let [depth, stencil, color, normal, albedo] = size_dependent_specs(extent)
            .map(|spec| TargetImage::new(&spec, dev.memory_allocator(), dev.logical.clone()));

        Ok(Self {
            depth: depth?,
            stencil: stencil?,
            color: color?,
            normal: normal?,
            albedo: albedo?,
        })
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.depth.extent()
    }
}

/// Fixed-resolution depth target rendered from the main light
pub struct ShadowMap {
    pub target: TargetImage,
}

impl ShadowMap {
    /// The map starts out in the layout the forward pass samples it in, so frames without the
    /// shadow prepass can still bind it.
    pub fn new(dev: &RenderDevice, size: u32) -> Result<Self> {
        let target = TargetImage::new(&shadow_spec(size), dev.memory_allocator(), dev.logical.clone())?;

        dev.immediate_submit(|cmd, device| {
            record_layout_transition(
                device,
                cmd,
                target.image().image,
                target.image().full_range(),
                LayoutTransition {
                    old_layout: vk::ImageLayout::UNDEFINED,
                    new_layout: vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
                    src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
                    src_access: vk::AccessFlags::empty(),
                    dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
                    dst_access: vk::AccessFlags::SHADER_READ,
                },
            );
            Ok(())
        })?;

        Ok(Self { target })
    }

    pub fn size(&self) -> u32 {
        self.target.extent().width
    }
}
