use ash::vk;
use color_eyre::eyre::{eyre, OptionExt};
use color_eyre::Result;
use smallvec::SmallVec;
use crate::renderer::contexts::graph_ctx::pass::PassKind;
use crate::renderer::contexts::graph_ctx::plan::PassEncoder;
use crate::renderer::contexts::graph_ctx::RenderGraphContext;
use crate::renderer::contexts::pipeline_ctx::builder::VertexStreams;
use crate::renderer::contexts::pipeline_ctx::{PipelineKind, RenderPipelineContext};
use crate::renderer::contexts::resource_ctx::{RenderResourceContext, SetRef};

/// Records pass plans into a frame's command buffer. Every handle is resolved at record time,
/// so a stale pass, framebuffer, pipeline or set surfaces as an error.
pub struct VkPassEncoder<'a> {
    device: &'a ash::Device,
    cmd: vk::CommandBuffer,
    image_index: u32,
    clear_color: [f32; 4],

    graph: &'a RenderGraphContext,
    pipelines: &'a RenderPipelineContext,
    resources: &'a RenderResourceContext,

    bound_layout: Option<vk::PipelineLayout>,
}

impl<'a> VkPassEncoder<'a> {
    pub fn new(
        device: &'a ash::Device,
        cmd: vk::CommandBuffer,
        image_index: u32,
        clear_color: [f32; 4],
        graph: &'a RenderGraphContext,
        pipelines: &'a RenderPipelineContext,
        resources: &'a RenderResourceContext,
    ) -> Self {
        Self {
            device,
            cmd,
            image_index,
            clear_color,
            graph,
            pipelines,
            resources,
            bound_layout: None,
        }
    }

    fn bind_raw_set(&self, index: u32, set: vk::DescriptorSet, what: &str) -> Result<()> {
        if set == vk::DescriptorSet::null() {
            return Err(eyre!("Descriptor set {what} is stale"));
        }
        let layout = self
            .bound_layout
            .ok_or_eyre(format!("Descriptor set {what} bound before any pipeline"))?;
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                self.cmd,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                index,
                &[set],
                &[],
            );
        }
        Ok(())
    }
}

impl PassEncoder for VkPassEncoder<'_> {
    fn begin_pass(&mut self, kind: PassKind) -> Result<()> {
        let pass = self.graph.pass(kind)?;
        let framebuffer = self.graph.framebuffer(kind, self.image_index)?;
        let clear_values = pass.desc.clear_values(self.clear_color);

        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(pass.raw)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: self.graph.render_area(kind),
            })
            .clear_values(&clear_values);
        unsafe {
            self.device.cmd_begin_render_pass(self.cmd, &begin_info, vk::SubpassContents::INLINE);
        }
        self.bound_layout = None;
        Ok(())
    }

    fn next_subpass(&mut self) {
        unsafe {
            self.device.cmd_next_subpass(self.cmd, vk::SubpassContents::INLINE);
        }
    }

    fn end_pass(&mut self) {
        unsafe {
            self.device.cmd_end_render_pass(self.cmd);
        }
    }

    fn bind_pipeline(&mut self, kind: PipelineKind) -> Result<()> {
        let pipeline = self.pipelines.pipeline(kind)?;
        if pipeline.raw == vk::Pipeline::null() {
            return Err(eyre!("Pipeline {kind:?} is stale"));
        }
        unsafe {
            self.device.cmd_bind_pipeline(self.cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.raw);
        }
        self.bound_layout = Some(pipeline.layout);
        Ok(())
    }

    fn bind_set(&mut self, index: u32, set: SetRef) -> Result<()> {
        let raw = self.resources.set(set)?;
        self.bind_raw_set(index, raw, &format!("{set:?}"))
    }

    fn bind_material(&mut self, index: u32, material_id: u32) -> Result<()> {
        let raw = self.resources.materials.set(material_id);
        self.bind_raw_set(index, raw, &format!("of material {material_id}"))
    }

    fn set_cull_mode(&mut self, cull_mode: vk::CullModeFlags) {
        unsafe {
            self.device.cmd_set_cull_mode(self.cmd, cull_mode);
        }
    }

    fn set_depth_test(&mut self, enabled: bool) {
        unsafe {
            self.device.cmd_set_depth_test_enable(self.cmd, enabled);
        }
    }

    fn draw_mesh(&mut self, mesh_index: usize, streams: VertexStreams) -> Result<()> {
        let mesh = self
            .resources
            .meshes
            .get(mesh_index)
            .ok_or_eyre(format!("Mesh {mesh_index} is not loaded"))?;

        let buffers = &mesh.full_streams()[..streams.count()];
        let offsets: SmallVec<[vk::DeviceSize; 4]> = buffers.iter().map(|_| 0).collect();
        unsafe {
            self.device.cmd_bind_vertex_buffers(self.cmd, 0, buffers, &offsets);
            self.device.cmd_bind_index_buffer(self.cmd, mesh.indices.buffer, 0, vk::IndexType::UINT32);
            self.device.cmd_draw_indexed(self.cmd, mesh.index_count, 1, 0, 0, 0);
        }
        Ok(())
    }

    fn draw_fullscreen(&mut self) {
        unsafe {
            self.device.cmd_draw(self.cmd, 3, 1, 0, 0);
        }
    }
}
