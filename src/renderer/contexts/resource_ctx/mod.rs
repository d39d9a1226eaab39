pub mod descriptor_set_layout_builder;
pub mod descriptors;
pub mod samplers;
pub mod targets;
pub mod uniforms;

use ash::vk;
use color_eyre::eyre::OptionExt;
use color_eyre::Result;
use crate::renderer::config::RenderConfig;
use crate::renderer::contexts::device_ctx::device::RenderDevice;
use crate::renderer::contexts::resource_ctx::descriptors::{DescriptorLayouts, FrameSets, SizeDependentSets};
use crate::renderer::contexts::resource_ctx::samplers::Samplers;
use crate::renderer::contexts::resource_ctx::targets::{RenderTargets, ShadowMap};
use crate::renderer::contexts::resource_ctx::uniforms::FrameUniforms;
use crate::renderer::resources::material::MaterialTable;
use crate::renderer::resources::mesh::MeshRecord;
use crate::renderer::resources::model::BakedModel;

/// Symbolic name of a descriptor set bound during pass recording
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetRef {
    Scene,
    Light,
    Debug,
    Lights,
    DepthMvp,
    ShadowMap,
    PostProcess,
    Overdraw,
    Deferred,
}

/// Responsibilities:
/// - Own meshes, materials, render targets, uniform buffers, and samplers
/// - Allocate descriptor sets and rebind them when window-sized targets change
/// - Return every descriptor set to the device allocator before teardown
///
/// Fields are declared in teardown order.
pub struct RenderResourceContext {
    size_sets: Option<SizeDependentSets>,
    frame_sets: Option<FrameSets>,
    pub materials: MaterialTable,
    pub meshes: Vec<MeshRecord>,

    pub targets: RenderTargets,
    pub shadow_map: ShadowMap,
    pub uniforms: FrameUniforms,
    pub samplers: Samplers,
    pub layouts: DescriptorLayouts,
}

impl RenderResourceContext {
    pub fn new(
        dev: &RenderDevice,
        config: &RenderConfig,
        extent: vk::Extent2D,
    ) -> Result<Self> {
        let layouts = DescriptorLayouts::new(dev.logical.clone())?;
        let samplers = Samplers::new(dev)?;
        let uniforms = FrameUniforms::new(dev)?;
        let shadow_map = ShadowMap::new(dev, config.shadow_map_size)?;
        let targets = RenderTargets::new(dev, extent)?;

        let model = BakedModel::load(&config.model_path)?;
        let materials = MaterialTable::new(
            dev,
            &model.textures,
            &model.materials,
            &layouts.material,
            samplers.default,
        )?;
        let meshes = model
            .meshes
            .iter()
            .enumerate()
            .map(|(i, mesh)| {
                MeshRecord::upload(
                    dev,
                    mesh,
                    materials.uses_alpha_mask(mesh.material_id),
                    &format!("Mesh {i}"),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let frame_sets = FrameSets::new(dev, &layouts, &uniforms, &shadow_map, &samplers)?;
        let size_sets = SizeDependentSets::new(dev, &layouts, &targets, &samplers)?;

        Ok(Self {
            size_sets: Some(size_sets),
            frame_sets: Some(frame_sets),
            materials,
            meshes,
            targets,
            shadow_map,
            uniforms,
            samplers,
            layouts,
        })
    }

    /// Recreate window-sized targets and the sets that reference them.
    /// The device must be idle.
    pub fn rebuild_targets(
        &mut self,
        dev: &RenderDevice,
        extent: vk::Extent2D,
    ) -> Result<()> {
        if let Some(old) = self.size_sets.take() {
            dev.free_sets(old.into_sets())?;
        }
        self.targets = RenderTargets::new(dev, extent)?;
        self.size_sets = Some(SizeDependentSets::new(
            dev,
            &self.layouts,
            &self.targets,
            &self.samplers,
        )?);
        log::debug!(
            "Render targets and size-dependent descriptor sets rebuilt at {}x{}",
            extent.width,
            extent.height,
        );
        Ok(())
    }

    pub fn set(&self, set: SetRef) -> Result<vk::DescriptorSet> {
        let frame = self.frame_sets.as_ref();
        let size = self.size_sets.as_ref();
        let allocated = match set {
            SetRef::Scene => frame.map(|s| &s.scene),
            SetRef::Light => frame.map(|s| &s.light),
            SetRef::Debug => frame.map(|s| &s.debug),
            SetRef::Lights => frame.map(|s| &s.lights),
            SetRef::DepthMvp => frame.map(|s| &s.depth_mvp),
            SetRef::ShadowMap => frame.map(|s| &s.shadow_map),
            SetRef::PostProcess => size.map(|s| &s.post_process),
            SetRef::Overdraw => size.map(|s| &s.overdraw),
            SetRef::Deferred => size.map(|s| &s.deferred),
        };
        allocated
            .map(|s| *s.raw())
            .ok_or_eyre(format!("Descriptor set {set:?} has been released"))
    }

    /// Free every descriptor set. Called once, after the device has gone idle.
    pub fn release_sets(&mut self, dev: &RenderDevice) -> Result<()> {
        if let Some(sets) = self.size_sets.take() {
            dev.free_sets(sets.into_sets())?;
        }
        if let Some(sets) = self.frame_sets.take() {
            dev.free_sets(sets.into_sets())?;
        }
        dev.free_sets(self.materials.take_sets())
    }
}
