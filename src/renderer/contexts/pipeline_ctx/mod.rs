pub mod builder;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::OptionExt;
use color_eyre::Result;
use smallvec::{smallvec, SmallVec};
use crate::renderer::contexts::graph_ctx::pass::PassKind;
use crate::renderer::contexts::graph_ctx::RenderGraphContext;
use crate::renderer::contexts::pipeline_ctx::builder::{GraphicsPipelineBuilder, Pipeline, VertexStreams};
use crate::renderer::contexts::resource_ctx::descriptor_set_layout_builder::SetLayout;
use crate::renderer::contexts::resource_ctx::descriptors::DescriptorLayouts;
use crate::renderer::resources::shader::GraphicsShader;

const SHADOW_DEPTH_BIAS_CONSTANT: f32 = 7.0;
const SHADOW_DEPTH_BIAS_SLOPE: f32 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    Shadow,
    Forward,
    ForwardAlpha,
    Debug,
    Offscreen,
    OffscreenAlpha,
    PostProcess,
    OverVisWrite,
    OverVisRead,
    GBufferWrite,
    DeferredShading,
}

impl PipelineKind {
    pub const ALL: [PipelineKind; 11] = [
        PipelineKind::Shadow,
        PipelineKind::Forward,
        PipelineKind::ForwardAlpha,
        PipelineKind::Debug,
        PipelineKind::Offscreen,
        PipelineKind::OffscreenAlpha,
        PipelineKind::PostProcess,
        PipelineKind::OverVisWrite,
        PipelineKind::OverVisRead,
        PipelineKind::GBufferWrite,
        PipelineKind::DeferredShading,
    ];

    /// Render pass and subpass the pipeline is compiled against
    pub fn pass(self) -> (PassKind, u32) {
        match self {
            Self::Shadow => (PassKind::Shadow, 0),
            Self::Forward | Self::ForwardAlpha | Self::Debug => (PassKind::Forward, 0),
            Self::Offscreen | Self::OffscreenAlpha => (PassKind::Offscreen, 0),
            Self::PostProcess => (PassKind::PostProcess, 0),
            Self::OverVisWrite => (PassKind::OverdrawVis, 0),
            Self::OverVisRead => (PassKind::OverdrawVis, 1),
            Self::GBufferWrite => (PassKind::Deferred, 0),
            Self::DeferredShading => (PassKind::Deferred, 1),
        }
    }

    pub fn streams(self) -> VertexStreams {
        match self {
            Self::Shadow | Self::OverVisWrite => VertexStreams::PositionOnly,
            Self::Debug => VertexStreams::PositionTexcoord,
            Self::Forward
            | Self::ForwardAlpha
            | Self::Offscreen
            | Self::OffscreenAlpha
            | Self::GBufferWrite => VertexStreams::Full,
            Self::PostProcess | Self::OverVisRead | Self::DeferredShading => VertexStreams::None,
        }
    }

    /// Everything except the shadow pipeline bakes in the window extent
    pub fn is_window_sized(self) -> bool {
        self != Self::Shadow
    }

    fn shader_name(self) -> &'static str {
        match self {
            Self::Shadow => "shadow",
            Self::Forward | Self::ForwardAlpha | Self::Offscreen | Self::OffscreenAlpha => "forward",
            Self::Debug => "debug",
            Self::PostProcess => "mosaic",
            Self::OverVisWrite => "overdraw_write",
            Self::OverVisRead => "overdraw_read",
            Self::GBufferWrite => "gbuffer_write",
            Self::DeferredShading => "deferred_shading",
        }
    }

    fn layout(self) -> LayoutKind {
        match self {
            Self::Shadow => LayoutKind::Shadow,
            Self::Forward | Self::ForwardAlpha | Self::Offscreen | Self::OffscreenAlpha => LayoutKind::Forward,
            Self::Debug => LayoutKind::Debug,
            Self::PostProcess => LayoutKind::PostProcess,
            Self::OverVisWrite => LayoutKind::OverVisWrite,
            Self::OverVisRead => LayoutKind::OverVisRead,
            Self::GBufferWrite => LayoutKind::GBuffer,
            Self::DeferredShading => LayoutKind::Deferred,
        }
    }

    fn configure<'a>(self, builder: GraphicsPipelineBuilder<'a>) -> GraphicsPipelineBuilder<'a> {
        let builder = builder.with_vertex_streams(self.streams());
        let ccw = vk::FrontFace::COUNTER_CLOCKWISE;
        match self {
            // Front faces only, biased away from the light
            Self::Shadow => builder
                .with_cull_mode(vk::CullModeFlags::BACK, ccw)
                .with_depth_bias(SHADOW_DEPTH_BIAS_CONSTANT, SHADOW_DEPTH_BIAS_SLOPE)
                .with_color_attachments(0),
            Self::Forward | Self::Offscreen => builder.with_cull_mode(vk::CullModeFlags::BACK, ccw),
            Self::ForwardAlpha | Self::OffscreenAlpha | Self::Debug => builder,
            Self::OverVisWrite => builder
                .with_cull_mode(vk::CullModeFlags::BACK, ccw)
                .with_stencil_counter()
                .with_dynamic_state(vk::DynamicState::DEPTH_TEST_ENABLE),
            Self::GBufferWrite => builder
                .with_color_attachments(2)
                .with_dynamic_state(vk::DynamicState::CULL_MODE),
            Self::PostProcess | Self::OverVisRead | Self::DeferredShading => {
                builder.with_depth_test(false, false)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum LayoutKind {
    Forward,
    Debug,
    Shadow,
    PostProcess,
    OverVisWrite,
    OverVisRead,
    GBuffer,
    Deferred,
}

impl LayoutKind {
    const ALL: [LayoutKind; 8] = [
        LayoutKind::Forward,
        LayoutKind::Debug,
        LayoutKind::Shadow,
        LayoutKind::PostProcess,
        LayoutKind::OverVisWrite,
        LayoutKind::OverVisRead,
        LayoutKind::GBuffer,
        LayoutKind::Deferred,
    ];

    /// Set layouts in set-index order
    fn set_layouts(self, l: &DescriptorLayouts) -> SmallVec<[vk::DescriptorSetLayout; 5]> {
        let layouts: SmallVec<[&SetLayout; 5]> = match self {
            Self::Forward => smallvec![&l.scene, &l.material, &l.light, &l.depth_mvp, &l.shadow_map],
            Self::Debug => smallvec![&l.scene, &l.material, &l.debug],
            Self::Shadow => smallvec![&l.depth_mvp],
            Self::PostProcess => smallvec![&l.post_process],
            Self::OverVisWrite => smallvec![&l.scene],
            Self::OverVisRead => smallvec![&l.overdraw],
            Self::GBuffer => smallvec![&l.scene, &l.material],
            Self::Deferred => smallvec![&l.deferred, &l.scene, &l.lights],
        };
        layouts.iter().map(|layout| layout.raw).collect()
    }
}

/// Responsibilities:
/// - Load every shader pair once at startup
/// - Own pipeline layouts and the graphics pipelines built from them
/// - Rebuild window-sized pipelines after a swapchain change
///
/// Fields are declared in teardown order.
pub struct RenderPipelineContext {
    pipelines: HashMap<PipelineKind, Pipeline>,
    shaders: HashMap<&'static str, GraphicsShader>,
    layouts: HashMap<LayoutKind, vk::PipelineLayout>,
    shadow_extent: vk::Extent2D,
    device: Arc<ash::Device>,
}

impl RenderPipelineContext {
    pub fn new(
        device: Arc<ash::Device>,
        shader_dir: &Path,
        set_layouts: &DescriptorLayouts,
        graph: &RenderGraphContext,
        extent: vk::Extent2D,
        shadow_map_size: u32,
    ) -> Result<Self> {
        let mut ctx = Self {
            pipelines: HashMap::new(),
            shaders: HashMap::new(),
            layouts: HashMap::new(),
            shadow_extent: vk::Extent2D {
                width: shadow_map_size,
                height: shadow_map_size,
            },
            device,
        };

        for kind in LayoutKind::ALL {
            let raw_layouts = kind.set_layouts(set_layouts);
            let info = vk::PipelineLayoutCreateInfo::default().set_layouts(&raw_layouts);
            let layout = unsafe { ctx.device.create_pipeline_layout(&info, None)? };
            ctx.layouts.insert(kind, layout);
        }

        for kind in PipelineKind::ALL {
            let name = kind.shader_name();
            if !ctx.shaders.contains_key(name) {
                let shader = GraphicsShader::new(shader_dir, name, ctx.device.clone())?;
                ctx.shaders.insert(name, shader);
            }
        }
        log::info!("Loaded {} shader programs from {}", ctx.shaders.len(), shader_dir.display());

        for kind in PipelineKind::ALL {
            let pipeline = ctx.build(kind, graph, extent)?;
            ctx.pipelines.insert(kind, pipeline);
        }

        Ok(ctx)
    }

    /// Recreate pipelines with a baked window viewport against the current passes.
    /// The device must be idle.
    pub fn rebuild(
        &mut self,
        graph: &RenderGraphContext,
        extent: vk::Extent2D,
    ) -> Result<()> {
        for kind in PipelineKind::ALL.into_iter().filter(|k| k.is_window_sized()) {
            let pipeline = self.build(kind, graph, extent)?;
            // Drops the old pipeline
            self.pipelines.insert(kind, pipeline);
        }
        log::debug!("Window-sized pipelines rebuilt at {}x{}", extent.width, extent.height);
        Ok(())
    }

    pub fn pipeline(&self, kind: PipelineKind) -> Result<&Pipeline> {
        self.pipelines
            .get(&kind)
            .ok_or_eyre(format!("Pipeline {kind:?} is missing"))
    }

    fn build(
        &self,
        kind: PipelineKind,
        graph: &RenderGraphContext,
        extent: vk::Extent2D,
    ) -> Result<Pipeline> {
        let (pass, subpass) = kind.pass();
        let shader = self
            .shaders
            .get(kind.shader_name())
            .ok_or_eyre(format!("Shader {} is not loaded", kind.shader_name()))?;
        let layout = self
            .layouts
            .get(&kind.layout())
            .copied()
            .ok_or_eyre(format!("Pipeline layout for {kind:?} is missing"))?;
        let viewport = if kind.is_window_sized() {
            extent
        } else {
            self.shadow_extent
        };

        let builder = GraphicsPipelineBuilder::new()
            .with_shader(shader)
            .with_pipeline_layout(layout)
            .with_render_pass(graph.pass(pass)?.raw, subpass)
            .with_viewport(viewport);
        kind.configure(builder).build(self.device.clone())
    }
}

impl Drop for RenderPipelineContext {
    fn drop(&mut self) {
        self.pipelines.clear();
        self.shaders.clear();
        unsafe {
            for (_, layout) in self.layouts.drain() {
                self.device.destroy_pipeline_layout(layout, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::contexts::graph_ctx::pass::describe;

    #[test]
    fn every_pipeline_targets_an_existing_subpass() {
        for kind in PipelineKind::ALL {
            let (pass, subpass) = kind.pass();
            assert!((subpass as usize) < describe(pass).subpasses.len(), "{kind:?}");
        }
    }

    #[test]
    fn input_attachment_subpasses_draw_without_vertex_input() {
        for kind in PipelineKind::ALL {
            let (pass, subpass) = kind.pass();
            let reads_inputs = !describe(pass).subpasses[subpass as usize].inputs.is_empty();
            if reads_inputs {
                assert_eq!(kind.streams(), VertexStreams::None, "{kind:?}");
            }
        }
    }

    #[test]
    fn only_the_shadow_pipeline_keeps_its_viewport_across_resizes() {
        let fixed: Vec<PipelineKind> = PipelineKind::ALL
            .into_iter()
            .filter(|k| !k.is_window_sized())
            .collect();
        assert_eq!(fixed, vec![PipelineKind::Shadow]);
    }

    #[test]
    fn gbuffer_writes_match_geometry_subpass_colors() {
        let (pass, subpass) = PipelineKind::GBufferWrite.pass();
        let colors = describe(pass).subpasses[subpass as usize].colors.len();
        assert_eq!(colors, 2);
    }
}
