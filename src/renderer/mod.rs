pub mod camera;
pub mod config;
pub mod state;

mod contexts;
mod lifecycle;
mod resources;
mod shader_data;

use color_eyre::Result;
use std::sync::Arc;
use winit::window::Window;
use crate::renderer::config::RenderConfig;
use crate::renderer::contexts::device_ctx::RenderDeviceContext;
use crate::renderer::contexts::frame_ctx::scheduler::BeginFrame;
use crate::renderer::contexts::frame_ctx::RenderFrameContext;
use crate::renderer::contexts::graph_ctx::encoder::VkPassEncoder;
use crate::renderer::contexts::graph_ctx::plan::{record_plan, MeshClass};
use crate::renderer::contexts::graph_ctx::RenderGraphContext;
use crate::renderer::contexts::pipeline_ctx::RenderPipelineContext;
use crate::renderer::contexts::resource_ctx::RenderResourceContext;
use crate::renderer::lifecycle::RebuildPlan;
use crate::renderer::resources::upload::{record_uniform_updates, CommandRecorder};
use crate::renderer::shader_data::FrameUniformSnapshot;
use crate::renderer::state::{RenderMode, RenderState};

/// Fields are declared in teardown order.
pub struct Renderer {
    frm: RenderFrameContext,
    pip: RenderPipelineContext,
    grp: RenderGraphContext,
    res: RenderResourceContext,
    dev: RenderDeviceContext,

    config: RenderConfig,
}

impl Renderer {
    pub fn new(
        window: Arc<Window>,
        config: RenderConfig,
    ) -> Result<Self> {
        let dev = RenderDeviceContext::new(window, config.vsync)?;
        let extent = dev.target.extent();

        let res = RenderResourceContext::new(&dev.device, &config, extent)?;
        let grp = RenderGraphContext::new(
            dev.device.logical.clone(),
            &dev.target.swapchain,
            &res,
        )?;
        let pip = RenderPipelineContext::new(
            dev.device.logical.clone(),
            &config.shader_dir,
            &res.layouts,
            &grp,
            extent,
            config.shadow_map_size,
        )?;
        let frm = RenderFrameContext::new(&dev.device, dev.target.swapchain.images.len())?;

        log::info!(
            "Renderer ready: {} meshes, {}x{} {:?}",
            res.meshes.len(),
            extent.width,
            extent.height,
            dev.target.desc().format,
        );

        Ok(Self {
            frm,
            pip,
            grp,
            res,
            dev,
            config,
        })
    }

    pub fn request_resize(&mut self) {
        self.frm.request_rebuild();
    }

    pub fn draw(&mut self, state: &RenderState) -> Result<()> {
        if self.dev.target.is_minimized() {
            return Ok(());
        }
        if self.frm.take_rebuild_request() {
            self.rebuild_swapchain()?;
        }

        let token = match self.frm.begin_frame(&self.dev.target)? {
            BeginFrame::Ready(token) => token,
            BeginFrame::Retry => {
                self.frm.take_rebuild_request();
                return self.rebuild_swapchain();
            }
        };

        let cmd = self.frm.begin_recording(&token)?;
        let device = self.dev.device.logical.as_ref();
        let mode = state.mode();

        let snapshot = FrameUniformSnapshot::new(
            state.camera_to_world,
            self.dev.target.extent(),
            debug_channel(mode),
            mode == RenderMode::Regular { shadows: true },
        );
        let uploads = self.res.uniforms.uploads(&snapshot);
        record_uniform_updates(&mut CommandRecorder::new(device, cmd), &uploads)?;

        let meshes: Vec<MeshClass> = self
            .res
            .meshes
            .iter()
            .map(|mesh| MeshClass {
                material_id: mesh.material_id,
                alpha_masked: mesh.alpha_masked,
            })
            .collect();
        let mut encoder = VkPassEncoder::new(
            device,
            cmd,
            token.image_index,
            self.config.clear_color,
            &self.grp,
            &self.pip,
            &self.res,
        );
        record_plan(mode, &meshes, &mut encoder)?;

        self.frm.end_frame(&self.dev.target, token)
    }

    /// Recreate the swapchain and everything derived from it. Only the groups the
    /// surface change invalidates are rebuilt.
    fn rebuild_swapchain(&mut self) -> Result<()> {
        self.dev.device.wait_idle()?;

        let Some(changes) = self.dev.target.rebuild(&self.dev.device)? else {
            // Minimised after the frame started; try again once the window has area
            log::debug!("Surface has no area, deferring swapchain rebuild");
            self.frm.request_rebuild();
            return Ok(());
        };
        let plan = RebuildPlan::from(changes);
        let extent = self.dev.target.extent();

        if plan.targets {
            self.res.rebuild_targets(&self.dev.device, extent)?;
        }
        self.grp.rebuild(plan, &self.dev.target.swapchain, &self.res)?;
        if plan.pipelines {
            self.pip.rebuild(&self.grp, extent)?;
        }

        log::debug!("Swapchain rebuild applied: {plan:?}");
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.frm.shutdown(&self.dev.target) {
            log::error!("Failed to drain in-flight frames: {e}");
        }
        if let Err(e) = self.res.release_sets(&self.dev.device) {
            log::error!("Failed to release descriptor sets: {e}");
        }
    }
}

/// Channel written into the debug uniform. Only the debug plan reads it.
fn debug_channel(mode: RenderMode) -> u8 {
    match mode {
        RenderMode::DebugChannel(channel) => channel,
        _ => 1,
    }
}
