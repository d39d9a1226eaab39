use ash::vk;
use color_eyre::Result;
use crate::renderer::contexts::graph_ctx::pass::PassKind;
use crate::renderer::contexts::pipeline_ctx::builder::VertexStreams;
use crate::renderer::contexts::pipeline_ctx::PipelineKind;
use crate::renderer::contexts::resource_ctx::SetRef;
use crate::renderer::state::RenderMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshFilter {
    Opaque,
    AlphaMasked,
    All,
}

impl MeshFilter {
    fn accepts(self, mesh: &MeshClass) -> bool {
        match self {
            Self::Opaque => !mesh.alpha_masked,
            Self::AlphaMasked => mesh.alpha_masked,
            Self::All => true,
        }
    }
}

/// One command of a pass plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    BindPipeline(PipelineKind),
    BindSet { index: u32, set: SetRef },
    SetCullMode(vk::CullModeFlags),
    SetDepthTest(bool),
    /// Draw every accepted mesh in load order, binding its material at `material_set` if given
    DrawMeshes {
        filter: MeshFilter,
        material_set: Option<u32>,
    },
    /// Three vertices, positions generated in the vertex shader
    DrawFullscreen,
    NextSubpass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassPlan {
    pub pass: PassKind,
    pub steps: &'static [Step],
}

const SHADOW: PassPlan = PassPlan {
    pass: PassKind::Shadow,
    steps: &[
        Step::BindPipeline(PipelineKind::Shadow),
        Step::BindSet { index: 0, set: SetRef::DepthMvp },
        Step::DrawMeshes { filter: MeshFilter::Opaque, material_set: None },
    ],
};

/// Shared by the forward and offscreen passes of the regular and mosaic plans
macro_rules! lit_geometry_steps {
    ($opaque:expr, $masked:expr) => {
        &[
            Step::BindPipeline($opaque),
            Step::BindSet { index: 0, set: SetRef::Scene },
            Step::BindSet { index: 2, set: SetRef::Light },
            Step::BindSet { index: 3, set: SetRef::DepthMvp },
            Step::BindSet { index: 4, set: SetRef::ShadowMap },
            Step::DrawMeshes { filter: MeshFilter::Opaque, material_set: Some(1) },
            Step::BindPipeline($masked),
            Step::DrawMeshes { filter: MeshFilter::AlphaMasked, material_set: Some(1) },
        ]
    };
}

const FORWARD: PassPlan = PassPlan {
    pass: PassKind::Forward,
    steps: lit_geometry_steps!(PipelineKind::Forward, PipelineKind::ForwardAlpha),
};

const DEBUG: PassPlan = PassPlan {
    pass: PassKind::Forward,
    steps: &[
        Step::BindPipeline(PipelineKind::Debug),
        Step::BindSet { index: 0, set: SetRef::Scene },
        Step::BindSet { index: 2, set: SetRef::Debug },
        Step::DrawMeshes { filter: MeshFilter::All, material_set: Some(1) },
    ],
};

const OFFSCREEN: PassPlan = PassPlan {
    pass: PassKind::Offscreen,
    steps: lit_geometry_steps!(PipelineKind::Offscreen, PipelineKind::OffscreenAlpha),
};

const MOSAIC: PassPlan = PassPlan {
    pass: PassKind::PostProcess,
    steps: &[
        Step::BindPipeline(PipelineKind::PostProcess),
        Step::BindSet { index: 0, set: SetRef::PostProcess },
        Step::DrawFullscreen,
    ],
};

macro_rules! over_vis_steps {
    ($depth_test:expr) => {
        &[
            Step::BindPipeline(PipelineKind::OverVisWrite),
            Step::BindSet { index: 0, set: SetRef::Scene },
            Step::SetDepthTest($depth_test),
            Step::DrawMeshes { filter: MeshFilter::All, material_set: None },
            Step::NextSubpass,
            Step::BindPipeline(PipelineKind::OverVisRead),
            Step::BindSet { index: 0, set: SetRef::Overdraw },
            Step::DrawFullscreen,
        ]
    };
}

/// Depth test off: every rasterised fragment is counted
const OVERDRAW: PassPlan = PassPlan {
    pass: PassKind::OverdrawVis,
    steps: over_vis_steps!(false),
};

/// Depth test on: only fragments that survive the test are counted
const OVERSHADING: PassPlan = PassPlan {
    pass: PassKind::OverdrawVis,
    steps: over_vis_steps!(true),
};

const DEFERRED: PassPlan = PassPlan {
    pass: PassKind::Deferred,
    steps: &[
        Step::BindPipeline(PipelineKind::GBufferWrite),
        Step::BindSet { index: 0, set: SetRef::Scene },
        Step::SetCullMode(vk::CullModeFlags::BACK),
        Step::DrawMeshes { filter: MeshFilter::Opaque, material_set: Some(1) },
        Step::SetCullMode(vk::CullModeFlags::NONE),
        Step::DrawMeshes { filter: MeshFilter::AlphaMasked, material_set: Some(1) },
        Step::NextSubpass,
        Step::BindPipeline(PipelineKind::DeferredShading),
        Step::BindSet { index: 0, set: SetRef::Deferred },
        Step::BindSet { index: 1, set: SetRef::Scene },
        Step::BindSet { index: 2, set: SetRef::Lights },
        Step::DrawFullscreen,
    ],
};

/// The passes recorded for `mode`, in submission order
pub fn plan_for(mode: RenderMode) -> &'static [PassPlan] {
    match mode {
        RenderMode::Regular { shadows: true } => &[SHADOW, FORWARD],
        RenderMode::Regular { shadows: false } => &[FORWARD],
        RenderMode::DebugChannel(_) => &[DEBUG],
        RenderMode::OverdrawVis => &[OVERDRAW],
        RenderMode::OvershadingVis => &[OVERSHADING],
        RenderMode::DeferredShading => &[DEFERRED],
        RenderMode::MosaicPostProcess => &[OFFSCREEN, MOSAIC],
    }
}

/// What the plan needs to know about a loaded mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshClass {
    pub material_id: u32,
    pub alpha_masked: bool,
}

/// Render commands a pass plan is recorded into.
/// Implemented over a real command buffer and by test doubles.
pub trait PassEncoder {
    fn begin_pass(&mut self, pass: PassKind) -> Result<()>;
    fn next_subpass(&mut self);
    fn end_pass(&mut self);
    fn bind_pipeline(&mut self, pipeline: PipelineKind) -> Result<()>;
    fn bind_set(&mut self, index: u32, set: SetRef) -> Result<()>;
    fn bind_material(&mut self, index: u32, material_id: u32) -> Result<()>;
    fn set_cull_mode(&mut self, cull_mode: vk::CullModeFlags);
    fn set_depth_test(&mut self, enabled: bool);
    fn draw_mesh(&mut self, mesh_index: usize, streams: VertexStreams) -> Result<()>;
    fn draw_fullscreen(&mut self);
}

/// Record exactly the passes of `mode`. Alpha-masked batches follow opaque ones,
/// and meshes within a batch are drawn in load order.
pub fn record_plan(
    mode: RenderMode,
    meshes: &[MeshClass],
    encoder: &mut impl PassEncoder,
) -> Result<()> {
    for plan in plan_for(mode) {
        encoder.begin_pass(plan.pass)?;
        let mut streams = VertexStreams::None;

        for step in plan.steps {
            match *step {
                Step::BindPipeline(pipeline) => {
                    encoder.bind_pipeline(pipeline)?;
                    streams = pipeline.streams();
                }
                Step::BindSet { index, set } => encoder.bind_set(index, set)?,
                Step::SetCullMode(cull_mode) => encoder.set_cull_mode(cull_mode),
                Step::SetDepthTest(enabled) => encoder.set_depth_test(enabled),
                Step::DrawMeshes { filter, material_set } => {
                    for (i, mesh) in meshes.iter().enumerate().filter(|(_, m)| filter.accepts(m)) {
                        if let Some(index) = material_set {
                            encoder.bind_material(index, mesh.material_id)?;
                        }
                        encoder.draw_mesh(i, streams)?;
                    }
                }
                Step::DrawFullscreen => encoder.draw_fullscreen(),
                Step::NextSubpass => encoder.next_subpass(),
            }
        }

        encoder.end_pass();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use color_eyre::eyre::eyre;

    #[derive(Debug, Clone, PartialEq)]
    enum Cmd {
        Begin(PassKind),
        Next,
        End,
        Pipeline(PipelineKind),
        Set(u32, SetRef),
        Material(u32),
        Cull(vk::CullModeFlags),
        DepthTest(bool),
        Draw(usize, VertexStreams),
        Fullscreen,
    }

    #[derive(Default)]
    struct TraceEncoder {
        cmds: Vec<Cmd>,
        fail_on: Option<PipelineKind>,
    }

    impl TraceEncoder {
        fn passes(&self) -> Vec<PassKind> {
            self.cmds
                .iter()
                .filter_map(|c| match c {
                    Cmd::Begin(p) => Some(*p),
                    _ => None,
                })
                .collect()
        }

        fn draws(&self) -> Vec<usize> {
            self.cmds
                .iter()
                .filter_map(|c| match c {
                    Cmd::Draw(i, _) => Some(*i),
                    _ => None,
                })
                .collect()
        }
    }

    impl PassEncoder for TraceEncoder {
        fn begin_pass(&mut self, pass: PassKind) -> Result<()> {
            self.cmds.push(Cmd::Begin(pass));
            Ok(())
        }

        fn next_subpass(&mut self) {
            self.cmds.push(Cmd::Next);
        }

        fn end_pass(&mut self) {
            self.cmds.push(Cmd::End);
        }

        fn bind_pipeline(&mut self, pipeline: PipelineKind) -> Result<()> {
            if self.fail_on == Some(pipeline) {
                return Err(eyre!("Pipeline {pipeline:?} is stale"));
            }
            self.cmds.push(Cmd::Pipeline(pipeline));
            Ok(())
        }

        fn bind_set(&mut self, index: u32, set: SetRef) -> Result<()> {
            self.cmds.push(Cmd::Set(index, set));
            Ok(())
        }

        fn bind_material(&mut self, _index: u32, material_id: u32) -> Result<()> {
            self.cmds.push(Cmd::Material(material_id));
            Ok(())
        }

        fn set_cull_mode(&mut self, cull_mode: vk::CullModeFlags) {
            self.cmds.push(Cmd::Cull(cull_mode));
        }

        fn set_depth_test(&mut self, enabled: bool) {
            self.cmds.push(Cmd::DepthTest(enabled));
        }

        fn draw_mesh(&mut self, mesh_index: usize, streams: VertexStreams) -> Result<()> {
            self.cmds.push(Cmd::Draw(mesh_index, streams));
            Ok(())
        }

        fn draw_fullscreen(&mut self) {
            self.cmds.push(Cmd::Fullscreen);
        }
    }

    const ALL_MODES: [RenderMode; 8] = [
        RenderMode::Regular { shadows: false },
        RenderMode::Regular { shadows: true },
        RenderMode::DebugChannel(2),
        RenderMode::DebugChannel(4),
        RenderMode::OverdrawVis,
        RenderMode::OvershadingVis,
        RenderMode::DeferredShading,
        RenderMode::MosaicPostProcess,
    ];

    /// Masked, opaque, masked, opaque
    fn scene() -> Vec<MeshClass> {
        (0..4)
            .map(|i| MeshClass {
                material_id: 10 + i,
                alpha_masked: i % 2 == 0,
            })
            .collect()
    }

    fn record(mode: RenderMode) -> TraceEncoder {
        let mut encoder = TraceEncoder::default();
        record_plan(mode, &scene(), &mut encoder).unwrap();
        encoder
    }

    #[test]
    fn each_mode_records_only_its_own_passes() {
        let expected: [&[PassKind]; 8] = [
            &[PassKind::Forward],
            &[PassKind::Shadow, PassKind::Forward],
            &[PassKind::Forward],
            &[PassKind::Forward],
            &[PassKind::OverdrawVis],
            &[PassKind::OverdrawVis],
            &[PassKind::Deferred],
            &[PassKind::Offscreen, PassKind::PostProcess],
        ];
        for (mode, passes) in ALL_MODES.into_iter().zip(expected) {
            assert_eq!(record(mode).passes(), passes, "{mode:?}");
        }
    }

    #[test]
    fn passes_never_interleave() {
        for mode in ALL_MODES {
            let cmds = record(mode).cmds;
            let mut open = false;
            for cmd in &cmds {
                match cmd {
                    Cmd::Begin(_) => {
                        assert!(!open, "{mode:?} began a pass inside another");
                        open = true;
                    }
                    Cmd::End => open = false,
                    _ => assert!(open, "{mode:?} recorded {cmd:?} outside a pass"),
                }
            }
            assert!(!open);
        }
    }

    #[test]
    fn pipelines_belong_to_the_pass_they_are_bound_in() {
        for mode in ALL_MODES {
            let mut pass = None;
            let mut subpass = 0;
            for cmd in record(mode).cmds {
                match cmd {
                    Cmd::Begin(p) => {
                        pass = Some(p);
                        subpass = 0;
                    }
                    Cmd::Next => subpass += 1,
                    Cmd::Pipeline(pipeline) => {
                        assert_eq!(Some(pipeline.pass()), pass.map(|p| (p, subpass)), "{mode:?}");
                    }
                    _ => {}
                }
            }
        }
    }

    #[test]
    fn masked_meshes_are_drawn_after_opaque_ones() {
        for mode in [
            RenderMode::Regular { shadows: false },
            RenderMode::DeferredShading,
            RenderMode::MosaicPostProcess,
        ] {
            assert_eq!(record(mode).draws(), vec![1, 3, 0, 2], "{mode:?}");
        }
    }

    #[test]
    fn shadow_prepass_draws_opaque_geometry_positions_only() {
        let trace = record(RenderMode::Regular { shadows: true });
        let end_of_shadow = trace.cmds.iter().position(|c| *c == Cmd::End).unwrap();
        let shadow_draws: Vec<&Cmd> = trace.cmds[..end_of_shadow]
            .iter()
            .filter(|c| matches!(c, Cmd::Draw(..)))
            .collect();
        assert_eq!(shadow_draws, vec![
            &Cmd::Draw(1, VertexStreams::PositionOnly),
            &Cmd::Draw(3, VertexStreams::PositionOnly),
        ]);

        for mode in ALL_MODES {
            let has_shadow = record(mode).passes().contains(&PassKind::Shadow);
            assert_eq!(has_shadow, mode == RenderMode::Regular { shadows: true }, "{mode:?}");
        }
    }

    #[test]
    fn overdraw_and_overshading_differ_only_in_depth_test() {
        let overdraw = record(RenderMode::OverdrawVis).cmds;
        let overshading = record(RenderMode::OvershadingVis).cmds;

        let first_draw = overdraw.iter().position(|c| matches!(c, Cmd::Draw(..))).unwrap();
        assert!(overdraw[..first_draw].contains(&Cmd::DepthTest(false)));
        assert!(overshading[..first_draw].contains(&Cmd::DepthTest(true)));

        let differing = overdraw.iter().zip(&overshading).filter(|(a, b)| a != b).count();
        assert_eq!(differing, 1);
        assert_eq!(record(RenderMode::OverdrawVis).draws(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn deferred_culls_opaque_batch_and_resolves_with_one_triangle() {
        let cmds = record(RenderMode::DeferredShading).cmds;
        let back = cmds.iter().position(|c| *c == Cmd::Cull(vk::CullModeFlags::BACK)).unwrap();
        let none = cmds.iter().position(|c| *c == Cmd::Cull(vk::CullModeFlags::NONE)).unwrap();
        let first_masked = cmds.iter().position(|c| *c == Cmd::Draw(0, VertexStreams::Full)).unwrap();
        assert!(back < none && none < first_masked);

        let next = cmds.iter().position(|c| *c == Cmd::Next).unwrap();
        let after: Vec<&Cmd> = cmds[next..].iter().collect();
        assert!(!after.iter().any(|c| matches!(c, Cmd::Draw(..))));
        assert_eq!(after.iter().filter(|c| ***c == Cmd::Fullscreen).count(), 1);
    }

    #[test]
    fn each_drawn_mesh_binds_its_own_material() {
        let cmds = record(RenderMode::Regular { shadows: false }).cmds;
        for (i, cmd) in cmds.iter().enumerate() {
            if let Cmd::Draw(mesh, _) = cmd {
                assert_eq!(cmds[i - 1], Cmd::Material(10 + *mesh as u32));
            }
        }
    }

    #[test]
    fn stale_pipeline_aborts_recording() {
        let mut encoder = TraceEncoder {
            fail_on: Some(PipelineKind::ForwardAlpha),
            ..Default::default()
        };
        let result = record_plan(RenderMode::Regular { shadows: false }, &scene(), &mut encoder);
        assert!(result.is_err());
        assert!(!encoder.cmds.contains(&Cmd::End));
    }
}
