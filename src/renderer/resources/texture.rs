use std::path::Path;
use ash::vk;
use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use crate::renderer::contexts::device_ctx::device::RenderDevice;
use crate::renderer::resources::buffer::AllocatedBuffer;
use crate::renderer::resources::image::{record_layout_transition, Image, ImageCreateInfo, LayoutTransition};

/// How the texel values of a texture are encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSpace {
    Linear,
    Srgb,
}

impl ColorSpace {
    pub fn format(self) -> vk::Format {
        match self {
            ColorSpace::Linear => vk::Format::R8G8B8A8_UNORM,
            ColorSpace::Srgb => vk::Format::R8G8B8A8_SRGB,
        }
    }
}

/// Number of levels in a full mip chain down to 1x1
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

fn mip_extent(size: u32, level: u32) -> u32 {
    (size >> level).max(1)
}

/// Decode an image file to RGBA8 (rows bottom-up) and upload it with a full mip chain
pub fn load_texture(
    dev: &RenderDevice,
    path: &Path,
    color_space: ColorSpace,
) -> Result<Image> {
    let decoded = image::open(path)
        .wrap_err_with(|| format!("Failed to decode texture {}", path.display()))?
        .flipv()
        .to_rgba8();
    let (width, height) = decoded.dimensions();
    log::debug!("Loaded texture {} ({}x{}, {:?})", path.display(), width, height, color_space);

    upload_rgba8(
        dev,
        decoded.as_raw(),
        width,
        height,
        color_space.format(),
        &path.display().to_string(),
    )
}

/// 1x1 texture bound for absent non-alpha material slots
pub fn placeholder_texture(dev: &RenderDevice, rgba: [u8; 4], name: &str) -> Result<Image> {
    upload_rgba8(dev, &rgba, 1, 1, vk::Format::R8G8B8A8_UNORM, name)
}

fn upload_rgba8(
    dev: &RenderDevice,
    pixels: &[u8],
    width: u32,
    height: u32,
    format: vk::Format,
    name: &str,
) -> Result<Image> {
    let expected = rgba8_len(width, height)
        .ok_or_else(|| eyre!("Texture {name} is too large: {width}x{height}"))?;
    if pixels.len() != expected {
        return Err(eyre!("Texture {name} has {} bytes for {width}x{height} RGBA8", pixels.len()));
    }

    let mip_levels = mip_level_count(width, height);
    let image = Image::new(
        &ImageCreateInfo {
            format,
            extent: vk::Extent2D { width, height },
            usage: vk::ImageUsageFlags::SAMPLED
                | vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST,
            aspect: vk::ImageAspectFlags::COLOR,
            mip_levels,
            name,
        },
        dev.memory_allocator(),
        dev.logical.clone(),
    )?;
    let staging = AllocatedBuffer::new_staging(
        pixels,
        &format!("{name} (staging)"),
        dev.memory_allocator(),
        dev.logical.clone(),
    )?;

    dev.immediate_submit(|cmd, device| {
        record_layout_transition(device, cmd, image.image, image.full_range(), LayoutTransition {
            old_layout: vk::ImageLayout::UNDEFINED,
            new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            src_access: vk::AccessFlags::empty(),
            dst_stage: vk::PipelineStageFlags::TRANSFER,
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
        });

        let copy_region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_offset: vk::Offset3D::default(),
            image_extent: vk::Extent3D { width, height, depth: 1 },
        };
        unsafe {
            device.cmd_copy_buffer_to_image(
                cmd,
                staging.buffer,
                image.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[copy_region],
            );
        }

        record_mip_chain(device, cmd, &image);
        Ok(())
    })?;

    Ok(image)
}

/// Each level is blitted from the one above it; every level ends shader-readable
fn record_mip_chain(device: &ash::Device, cmd: vk::CommandBuffer, image: &Image) {
    let level_range = |level: u32| vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: level,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    };
    let to_readable = |old_layout, src_access| LayoutTransition {
        old_layout,
        new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        src_stage: vk::PipelineStageFlags::TRANSFER,
        src_access,
        dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
        dst_access: vk::AccessFlags::SHADER_READ,
    };
    let (width, height) = (image.extent.width, image.extent.height);

    for level in 1..image.mip_levels {
        let src = level - 1;
        record_layout_transition(device, cmd, image.image, level_range(src), LayoutTransition {
            old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            new_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
            dst_access: vk::AccessFlags::TRANSFER_READ,
        });

        let blit = vk::ImageBlit {
            src_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: src,
                base_array_layer: 0,
                layer_count: 1,
            },
            src_offsets: [
                vk::Offset3D::default(),
                vk::Offset3D {
                    x: mip_extent(width, src) as i32,
                    y: mip_extent(height, src) as i32,
                    z: 1,
                },
            ],
            dst_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: level,
                base_array_layer: 0,
                layer_count: 1,
            },
            dst_offsets: [
                vk::Offset3D::default(),
                vk::Offset3D {
                    x: mip_extent(width, level) as i32,
                    y: mip_extent(height, level) as i32,
                    z: 1,
                },
            ],
        };
        unsafe {
            device.cmd_blit_image(
                cmd,
                image.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                image.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit],
                vk::Filter::LINEAR,
            );
        }

        record_layout_transition(
            device,
            cmd,
            image.image,
            level_range(src),
            to_readable(vk::ImageLayout::TRANSFER_SRC_OPTIMAL, vk::AccessFlags::TRANSFER_READ),
        );
    }

    record_layout_transition(
        device,
        cmd,
        image.image,
        level_range(image.mip_levels - 1),
        to_readable(vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::AccessFlags::TRANSFER_WRITE),
    );
}

fn rgba8_len(width: u32, height: u32) -> Option<usize> {
    (width as usize)
        .checked_mul(height as usize)?
        .checked_mul(4)
}
