use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use crate::renderer::contexts::device_ctx::device::RenderDevice;

pub struct Samplers {
    /// Trilinear, repeating. Used for every material texture.
    pub default: vk::Sampler,
    /// Depth comparison for shadow lookups
    pub shadow: vk::Sampler,
    /// Single-level clamped lookups into the offscreen color target
    pub post_process: vk::Sampler,
    device: Arc<ash::Device>,
}

impl Samplers {
    pub fn new(dev: &RenderDevice) -> Result<Self> {
        let device = dev.logical.clone();
        let anisotropy = dev.features.sampler_anisotropy == vk::TRUE;

        let default_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(anisotropy)
            .max_anisotropy(if anisotropy {
                dev.properties.limits.max_sampler_anisotropy
            } else {
                1.0
            })
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE);

        let shadow_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .compare_enable(true)
            .compare_op(vk::CompareOp::LESS_OR_EQUAL)
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE);

        let post_process_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .min_lod(0.0)
            .max_lod(0.0);

        unsafe {
            let default = device.create_sampler(&default_info, None)?;
            let shadow = device.create_sampler(&shadow_info, None)?;
            let post_process = device.create_sampler(&post_process_info, None)?;
            Ok(Self {
                default,
                shadow,
                post_process,
                device,
            })
        }
    }
}

impl Drop for Samplers {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_sampler(self.default, None);
            self.device.destroy_sampler(self.shadow, None);
            self.device.destroy_sampler(self.post_process, None);
        }
    }
}
