use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use crate::renderer::contexts::device_ctx::device::{AllocatedSet, RenderDevice};
use crate::renderer::contexts::resource_ctx::descriptor_set_layout_builder::{DescriptorSetLayoutBuilder, SetLayout};
use crate::renderer::contexts::resource_ctx::targets::{RenderTargets, ShadowMap};
use crate::renderer::contexts::resource_ctx::uniforms::FrameUniforms;
use crate::renderer::contexts::resource_ctx::samplers::Samplers;

/// Every descriptor set layout the pipelines are built from
pub struct DescriptorLayouts {
    pub scene: SetLayout,
    pub light: SetLayout,
    pub debug: SetLayout,
    pub lights: SetLayout,
    pub depth_mvp: SetLayout,
    pub shadow_map: SetLayout,
    pub material: SetLayout,
    pub post_process: SetLayout,
    pub overdraw: SetLayout,
    pub deferred: SetLayout,
}

impl DescriptorLayouts {
    pub fn new(device: Arc<ash::Device>) -> Result<Self> {
        use vk::DescriptorType as Ty;
        use vk::ShaderStageFlags as Stage;

        let uniform = |stages| {
            DescriptorSetLayoutBuilder::new()
                .add_binding(Ty::UNIFORM_BUFFER, stages)
                .build(device.clone())
        };
        let fragment_inputs = |count: usize| {
            (0..count)
                .fold(DescriptorSetLayoutBuilder::new(), |b, _| {
                    b.add_binding(Ty::INPUT_ATTACHMENT, Stage::FRAGMENT)
                })
                .build(device.clone())
        };

        Ok(Self {
            scene: uniform(Stage::VERTEX | Stage::FRAGMENT)?,
            light: uniform(Stage::FRAGMENT)?,
            debug: uniform(Stage::FRAGMENT)?,
            lights: uniform(Stage::FRAGMENT)?,
            depth_mvp: uniform(Stage::VERTEX)?,
            shadow_map: DescriptorSetLayoutBuilder::new()
                .add_binding(Ty::COMBINED_IMAGE_SAMPLER, Stage::FRAGMENT)
                .build(device.clone())?,
            // Base color, metalness, roughness, alpha mask, normal map
            material: (0..5)
                .fold(DescriptorSetLayoutBuilder::new(), |b, _| {
                    b.add_binding(Ty::COMBINED_IMAGE_SAMPLER, Stage::FRAGMENT)
                })
                .build(device.clone())?,
            post_process: DescriptorSetLayoutBuilder::new()
                .add_binding(Ty::COMBINED_IMAGE_SAMPLER, Stage::FRAGMENT)
                .build(device.clone())?,
            // Stencil count, scratch color
            overdraw: fragment_inputs(2)?,
            // Normal, albedo, depth
            deferred: fragment_inputs(3)?,
        })
    }
}

pub struct ImageWrite {
    pub binding: u32,
    pub ty: vk::DescriptorType,
    pub view: vk::ImageView,
    pub layout: vk::ImageLayout,
    pub sampler: vk::Sampler,
}

pub fn write_images(device: &ash::Device, set: vk::DescriptorSet, writes: &[ImageWrite]) {
    let infos: Vec<vk::DescriptorImageInfo> = writes
        .iter()
        .map(|w| vk::DescriptorImageInfo {
            sampler: w.sampler,
            image_view: w.view,
            image_layout: w.layout,
        })
        .collect();
    let descriptor_writes: Vec<vk::WriteDescriptorSet> = writes
        .iter()
        .zip(infos.iter())
        .map(|(w, info)| {
            vk::WriteDescriptorSet::default()
                .dst_set(set)
                .dst_binding(w.binding)
                .descriptor_type(w.ty)
                .image_info(std::slice::from_ref(info))
        })
        .collect();
    unsafe {
        device.update_descriptor_sets(&descriptor_writes, &[]);
    }
}

pub fn write_uniform(device: &ash::Device, set: vk::DescriptorSet, buffer: vk::Buffer) {
    let info = vk::DescriptorBufferInfo {
        buffer,
        offset: 0,
        range: vk::WHOLE_SIZE,
    };
    let write = vk::WriteDescriptorSet::default()
        .dst_set(set)
        .dst_binding(0)
        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
        .buffer_info(std::slice::from_ref(&info));
    unsafe {
        device.update_descriptor_sets(&[write], &[]);
    }
}

/// Sets whose contents never change after startup
pub struct FrameSets {
    pub scene: AllocatedSet,
    pub light: AllocatedSet,
    pub debug: AllocatedSet,
    pub lights: AllocatedSet,
    pub depth_mvp: AllocatedSet,
    pub shadow_map: AllocatedSet,
}

impl FrameSets {
    pub fn new(
        dev: &RenderDevice,
        layouts: &DescriptorLayouts,
        uniforms: &FrameUniforms,
        shadow_map: &ShadowMap,
        samplers: &Samplers,
    ) -> Result<Self> {
        let uniform_set = |layout: &SetLayout, buffer: vk::Buffer| -> Result<AllocatedSet> {
            let set = dev.allocate_set(layout)?;
            write_uniform(&dev.logical, *set.raw(), buffer);
            Ok(set)
        };

        let shadow_set = dev.allocate_set(&layouts.shadow_map)?;
        write_images(&dev.logical, *shadow_set.raw(), &[ImageWrite {
            binding: 0,
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            view: shadow_map.target.read_view(),
            layout: vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
            sampler: samplers.shadow,
        }]);

        Ok(Self {
            scene: uniform_set(&layouts.scene, uniforms.scene.buffer.buffer)?,
            light: uniform_set(&layouts.light, uniforms.light.buffer.buffer)?,
            debug: uniform_set(&layouts.debug, uniforms.debug.buffer.buffer)?,
            lights: uniform_set(&layouts.lights, uniforms.lights.buffer.buffer)?,
            depth_mvp: uniform_set(&layouts.depth_mvp, uniforms.depth_mvp.buffer.buffer)?,
            shadow_map: shadow_set,
        })
    }

    pub fn into_sets(self) -> [AllocatedSet; 6] {
        [self.scene, self.light, self.debug, self.lights, self.depth_mvp, self.shadow_map]
    }
}

/// Sets that reference window-sized render targets. Freed and reallocated whenever the targets are.
pub struct SizeDependentSets {
    pub post_process: AllocatedSet,
    pub overdraw: AllocatedSet,
    pub deferred: AllocatedSet,
}

impl SizeDependentSets {
    pub fn new(
        dev: &RenderDevice,
        layouts: &DescriptorLayouts,
        targets: &RenderTargets,
        samplers: &Samplers,
    ) -> Result<Self> {
        let input = |binding: u32, view: vk::ImageView, layout: vk::ImageLayout| ImageWrite {
            binding,
            ty: vk::DescriptorType::INPUT_ATTACHMENT,
            view,
            layout,
            sampler: vk::Sampler::null(),
        };

        let post_process = dev.allocate_set(&layouts.post_process)?;
        write_images(&dev.logical, *post_process.raw(), &[ImageWrite {
            binding: 0,
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            view: targets.color.read_view(),
            layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            sampler: samplers.post_process,
        }]);

        let overdraw = dev.allocate_set(&layouts.overdraw)?;
        write_images(&dev.logical, *overdraw.raw(), &[
            input(0, targets.stencil.read_view(), vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL),
            input(1, targets.color.read_view(), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
        ]);

        let deferred = dev.allocate_set(&layouts.deferred)?;
        write_images(&dev.logical, *deferred.raw(), &[
            input(0, targets.normal.read_view(), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
            input(1, targets.albedo.read_view(), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
            input(2, targets.depth.read_view(), vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL),
        ]);

        Ok(Self {
            post_process,
            overdraw,
            deferred,
        })
    }

    pub fn into_sets(self) -> [AllocatedSet; 3] {
        [self.post_process, self.overdraw, self.deferred]
    }
}
