pub mod encoder;
pub mod pass;
pub mod plan;

use std::collections::HashMap;
use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::{eyre, OptionExt};
use color_eyre::Result;
use smallvec::{smallvec, SmallVec};
use crate::renderer::contexts::device_ctx::swapchain::Swapchain;
use crate::renderer::contexts::graph_ctx::pass::{Pass, PassKind};
use crate::renderer::contexts::resource_ctx::RenderResourceContext;
use crate::renderer::lifecycle::RebuildPlan;

/// Responsibilities:
/// - Own the render passes of every plan
/// - Own framebuffers, one per swapchain image for passes that present
/// - Rebuild both when the swapchain or the window-sized targets change
///
/// Fields are declared in teardown order.
pub struct RenderGraphContext {
    framebuffers: HashMap<PassKind, Vec<vk::Framebuffer>>,
    passes: HashMap<PassKind, Pass>,
    swapchain_extent: vk::Extent2D,
    shadow_extent: vk::Extent2D,
    device: Arc<ash::Device>,
}

impl RenderGraphContext {
    pub fn new(
        device: Arc<ash::Device>,
        swapchain: &Swapchain,
        resources: &RenderResourceContext,
    ) -> Result<Self> {
        let passes = PassKind::ALL
            .into_iter()
            .map(|kind| Ok((kind, Pass::new(kind, swapchain.desc.format, device.clone())?)))
            .collect::<Result<HashMap<_, _>>>()?;

        let shadow_size = resources.shadow_map.size();
        let mut graph = Self {
            framebuffers: HashMap::new(),
            passes,
            swapchain_extent: swapchain.desc.extent,
            shadow_extent: vk::Extent2D {
                width: shadow_size,
                height: shadow_size,
            },
            device,
        };
        for kind in PassKind::ALL {
            graph.create_framebuffers(kind, swapchain, resources)?;
        }
        Ok(graph)
    }

    /// Apply a swapchain rebuild. The device must be idle, and `resources` must already hold
    /// targets matching the new swapchain extent.
    pub fn rebuild(
        &mut self,
        plan: RebuildPlan,
        swapchain: &Swapchain,
        resources: &RenderResourceContext,
    ) -> Result<()> {
        self.swapchain_extent = swapchain.desc.extent;

        if plan.passes {
            for kind in PassKind::ALL.into_iter().filter(|k| k.depends_on_swapchain_format()) {
                self.destroy_framebuffers(kind);
                let pass = Pass::new(kind, swapchain.desc.format, self.device.clone())?;
                // Drops the old pass
                self.passes.insert(kind, pass);
            }
            log::debug!("Swapchain-format passes rebuilt for {:?}", swapchain.desc.format);
        }

        if plan.framebuffers {
            // The shadow framebuffer only references the fixed-size shadow map
            for kind in PassKind::ALL.into_iter().filter(|k| *k != PassKind::Shadow) {
                self.destroy_framebuffers(kind);
                self.create_framebuffers(kind, swapchain, resources)?;
            }
            log::debug!(
                "Framebuffers rebuilt for {} swapchain images",
                swapchain.views.len(),
            );
        }
        Ok(())
    }

    pub fn pass(&self, kind: PassKind) -> Result<&Pass> {
        self.passes
            .get(&kind)
            .ok_or_eyre(format!("Render pass {kind:?} is missing"))
    }

    pub fn framebuffer(&self, kind: PassKind, image_index: u32) -> Result<vk::Framebuffer> {
        let framebuffers = self
            .framebuffers
            .get(&kind)
            .ok_or_eyre(format!("Framebuffers for {kind:?} are missing"))?;
        let index = if kind.targets_swapchain() {
            image_index as usize
        } else {
            0
        };
        framebuffers
            .get(index)
            .copied()
            .filter(|fb| *fb != vk::Framebuffer::null())
            .ok_or_else(|| eyre!("Framebuffer {index} of {kind:?} is stale"))
    }

    /// Area covered by `kind`'s framebuffers
    pub fn render_area(&self, kind: PassKind) -> vk::Extent2D {
        match kind {
            PassKind::Shadow => self.shadow_extent,
            _ => self.swapchain_extent,
        }
    }

    fn create_framebuffers(
        &mut self,
        kind: PassKind,
        swapchain: &Swapchain,
        resources: &RenderResourceContext,
    ) -> Result<()> {
        let targets = &resources.targets;
        let fixed: SmallVec<[vk::ImageView; 3]> = match kind {
            PassKind::Shadow => smallvec![resources.shadow_map.target.attachment_view()],
            PassKind::Forward => smallvec![targets.depth.attachment_view()],
            PassKind::Offscreen => smallvec![
                targets.color.attachment_view(),
                targets.depth.attachment_view(),
            ],
            PassKind::PostProcess => smallvec![],
            PassKind::OverdrawVis => smallvec![
                targets.color.attachment_view(),
                targets.stencil.attachment_view(),
            ],
            PassKind::Deferred => smallvec![
                targets.normal.attachment_view(),
                targets.albedo.attachment_view(),
                targets.depth.attachment_view(),
            ],
        };

        // Presenting passes put the swapchain image at attachment 0
        let attachment_sets: Vec<SmallVec<[vk::ImageView; 4]>> = if kind.targets_swapchain() {
            swapchain
                .views
                .iter()
                .map(|view| std::iter::once(*view).chain(fixed.iter().copied()).collect())
                .collect()
        } else {
            vec![fixed.iter().copied().collect()]
        };

        let render_pass = self.pass(kind)?.raw;
        let extent = self.render_area(kind);
        let mut framebuffers = Vec::with_capacity(attachment_sets.len());
        for attachments in &attachment_sets {
            let info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass)
                .attachments(attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);
            match unsafe { self.device.create_framebuffer(&info, None) } {
                Ok(framebuffer) => framebuffers.push(framebuffer),
                Err(e) => {
                    for framebuffer in framebuffers {
                        unsafe { self.device.destroy_framebuffer(framebuffer, None) };
                    }
                    return Err(eyre!("Failed to create {kind:?} framebuffer: {e}"));
                }
            }
        }
        self.framebuffers.insert(kind, framebuffers);
        Ok(())
    }

    fn destroy_framebuffers(&mut self, kind: PassKind) {
        if let Some(framebuffers) = self.framebuffers.remove(&kind) {
            for framebuffer in framebuffers {
                unsafe {
                    self.device.destroy_framebuffer(framebuffer, None);
                }
            }
        }
    }
}

impl Drop for RenderGraphContext {
    fn drop(&mut self) {
        for kind in PassKind::ALL {
            self.destroy_framebuffers(kind);
        }
    }
}
