use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::{eyre, OptionExt};
use color_eyre::Result;
use smallvec::SmallVec;
use crate::renderer::resources::shader::GraphicsShader;

/// Which of a mesh's vertex buffers a pipeline consumes, always as a prefix of
/// position, texcoord, normal, tangent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexStreams {
    Full,
    PositionTexcoord,
    PositionOnly,
    /// Full-screen triangle generated from the vertex index
    None,
}

const STREAM_LAYOUT: [(u32, vk::Format); 4] = [
    (12, vk::Format::R32G32B32_SFLOAT),
    (8, vk::Format::R32G32_SFLOAT),
    (12, vk::Format::R32G32B32_SFLOAT),
    // Packed tangent frame
    (4, vk::Format::A2R10G10B10_UNORM_PACK32),
];

impl VertexStreams {
    pub fn count(self) -> usize {
        match self {
            Self::Full => 4,
            Self::PositionTexcoord => 2,
            Self::PositionOnly => 1,
            Self::None => 0,
        }
    }

    /// One binding per stream, attribute location equal to binding number
    pub fn description(
        self,
    ) -> (
        SmallVec<[vk::VertexInputBindingDescription; 4]>,
        SmallVec<[vk::VertexInputAttributeDescription; 4]>,
    ) {
        STREAM_LAYOUT[..self.count()]
            .iter()
            .enumerate()
            .map(|(i, (stride, format))| {
                (
                    vk::VertexInputBindingDescription {
                        binding: i as u32,
                        stride: *stride,
                        input_rate: vk::VertexInputRate::VERTEX,
                    },
                    vk::VertexInputAttributeDescription {
                        location: i as u32,
                        binding: i as u32,
                        format: *format,
                        offset: 0,
                    },
                )
            })
            .unzip()
    }
}

pub struct Pipeline {
    pub raw: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    device: Arc<ash::Device>,
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.raw, None);
        }
    }
}

pub struct GraphicsPipelineBuilder<'a> {
    streams: VertexStreams,
    input_assembly: vk::PipelineInputAssemblyStateCreateInfo<'static>,
    rasterization: vk::PipelineRasterizationStateCreateInfo<'static>,
    color_blend_attachment: vk::PipelineColorBlendAttachmentState,
    color_attachment_count: u32,
    multisample: vk::PipelineMultisampleStateCreateInfo<'static>,
    depth_stencil: vk::PipelineDepthStencilStateCreateInfo<'static>,
    dynamic_states: SmallVec<[vk::DynamicState; 2]>,
    viewport_extent: Option<vk::Extent2D>,
    shader: Option<&'a GraphicsShader>,
    pipeline_layout: Option<vk::PipelineLayout>,
    render_pass: Option<(vk::RenderPass, u32)>,
}

impl<'a> GraphicsPipelineBuilder<'a> {
    pub fn new() -> Self {
        Self {
            streams: VertexStreams::Full,
            input_assembly: Self::default_input_assembly_info(),
            rasterization: Self::default_rasterization_info(),
            color_blend_attachment: Self::default_color_blend_state(),
            color_attachment_count: 1,
            multisample: Self::default_multisample_info(),
            depth_stencil: Self::default_depth_stencil_info(),
            dynamic_states: SmallVec::new(),
            viewport_extent: None,
            shader: None,
            pipeline_layout: None,
            render_pass: None,
        }
    }

    pub fn with_shader(mut self, shader: &'a GraphicsShader) -> Self {
        let _ = self.shader.replace(shader);
        self
    }

    pub fn with_pipeline_layout(mut self, layout: vk::PipelineLayout) -> Self {
        let _ = self.pipeline_layout.replace(layout);
        self
    }

    pub fn with_render_pass(mut self, render_pass: vk::RenderPass, subpass: u32) -> Self {
        let _ = self.render_pass.replace((render_pass, subpass));
        self
    }

    pub fn with_vertex_streams(mut self, streams: VertexStreams) -> Self {
        self.streams = streams;
        self
    }

    /// Viewport and scissor are baked in, so the pipeline is rebuilt whenever `extent` changes
    pub fn with_viewport(mut self, extent: vk::Extent2D) -> Self {
        self.viewport_extent = Some(extent);
        self
    }

    pub fn with_cull_mode(
        mut self,
        cull_mode: vk::CullModeFlags,
        front_face: vk::FrontFace,
    ) -> Self {
        self.rasterization.cull_mode = cull_mode;
        self.rasterization.front_face = front_face;
        self
    }

    pub fn with_depth_bias(mut self, constant: f32, slope: f32) -> Self {
        self.rasterization.depth_bias_enable = vk::TRUE;
        self.rasterization.depth_bias_constant_factor = constant;
        self.rasterization.depth_bias_slope_factor = slope;
        self
    }

    pub fn with_color_attachments(mut self, count: u32) -> Self {
        self.color_attachment_count = count;
        self
    }

    pub fn with_depth_test(
        mut self,
        test: bool,
        write: bool,
    ) -> Self {
        self.depth_stencil.depth_test_enable = test as vk::Bool32;
        self.depth_stencil.depth_write_enable = write as vk::Bool32;
        self.depth_stencil.depth_compare_op = if test {
            vk::CompareOp::LESS_OR_EQUAL
        } else {
            vk::CompareOp::ALWAYS
        };
        self
    }

    /// Every rasterized fragment increments the stencil value, saturating at 255
    pub fn with_stencil_counter(mut self) -> Self {
        let op = vk::StencilOpState {
            fail_op: vk::StencilOp::KEEP,
            pass_op: vk::StencilOp::INCREMENT_AND_CLAMP,
            depth_fail_op: vk::StencilOp::KEEP,
            compare_op: vk::CompareOp::ALWAYS,
            compare_mask: 0xff,
            write_mask: 0xff,
            reference: 1,
        };
        self.depth_stencil.stencil_test_enable = vk::TRUE;
        self.depth_stencil.front = op;
        self.depth_stencil.back = op;
        self
    }

    pub fn with_dynamic_state(mut self, state: vk::DynamicState) -> Self {
        if !self.dynamic_states.contains(&state) {
            self.dynamic_states.push(state);
        }
        self
    }

    pub fn build(self, device: Arc<ash::Device>) -> Result<Pipeline> {
        let shader = self
            .shader
            .ok_or_eyre("No shader provided for GraphicsPipelineBuilder")?;
        let pipeline_layout = self.pipeline_layout.ok_or_eyre(
            "No pipeline layout provided for GraphicsPipelineBuilder",
        )?;
        let (render_pass, subpass) = self
            .render_pass
            .ok_or_eyre("No render pass provided for GraphicsPipelineBuilder")?;
        let extent = self
            .viewport_extent
            .ok_or_eyre("No viewport provided for GraphicsPipelineBuilder")?;

        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(shader.vert_mod)
                .name(c"main"),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(shader.frag_mod)
                .name(c"main"),
        ];

        let (bindings, attributes) = self.streams.description();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let viewports = [vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }];
        let scissors = [vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        }];
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewports(&viewports)
            .scissors(&scissors);

        let blend_attachments: SmallVec<[vk::PipelineColorBlendAttachmentState; 2]> =
            (0..self.color_attachment_count)
                .map(|_| self.color_blend_attachment)
                .collect();
        let color_blend_info = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(&blend_attachments);

        let dynamic_info = vk::PipelineDynamicStateCreateInfo::default()
            .dynamic_states(&self.dynamic_states);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .layout(pipeline_layout)
            .render_pass(render_pass)
            .subpass(subpass)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&self.input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&self.rasterization)
            .multisample_state(&self.multisample)
            .color_blend_state(&color_blend_info)
            .depth_stencil_state(&self.depth_stencil)
            .dynamic_state(&dynamic_info);

        let pipelines = unsafe {
            device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                .map_err(|(_, e)| eyre!("Failed to create graphics pipeline: {e}"))?
        };
        let raw = pipelines
            .into_iter()
            .next()
            .ok_or_eyre("Driver returned no graphics pipeline")?;

        Ok(Pipeline {
            raw,
            layout: pipeline_layout,
            device,
        })
    }

    fn default_input_assembly_info() -> vk::PipelineInputAssemblyStateCreateInfo<'static> {
        vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false)
    }

    fn default_rasterization_info() -> vk::PipelineRasterizationStateCreateInfo<'static> {
        vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false)
    }

    fn default_color_blend_state() -> vk::PipelineColorBlendAttachmentState {
        // Masked materials discard in the shader, so nothing blends
        vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
    }

    fn default_multisample_info() -> vk::PipelineMultisampleStateCreateInfo<'static> {
        vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            // 1 sample per pixel means no multisampling
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .min_sample_shading(1.0)
            .alpha_to_coverage_enable(false)
            .alpha_to_one_enable(false)
    }

    fn default_depth_stencil_info() -> vk::PipelineDepthStencilStateCreateInfo<'static> {
        vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL)
            .depth_bounds_test_enable(false)
            .min_depth_bounds(0.0)
            .max_depth_bounds(1.0)
            .stencil_test_enable(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_streams_match_baked_vertex_layout() {
        let (bindings, attributes) = VertexStreams::Full.description();
        let strides: Vec<u32> = bindings.iter().map(|b| b.stride).collect();
        assert_eq!(strides, vec![12, 8, 12, 4]);
        assert_eq!(attributes[3].format, vk::Format::A2R10G10B10_UNORM_PACK32);
        assert!(attributes.iter().all(|a| a.location == a.binding && a.offset == 0));
    }

    #[test]
    fn partial_streams_are_prefixes() {
        assert_eq!(VertexStreams::PositionOnly.description().0.len(), 1);
        let (bindings, _) = VertexStreams::PositionTexcoord.description();
        assert_eq!(bindings[1].stride, 8);
        assert!(VertexStreams::None.description().1.is_empty());
    }

    #[test]
    fn stencil_counter_increments_on_every_fragment() {
        let builder = GraphicsPipelineBuilder::new()
            .with_depth_test(false, true)
            .with_stencil_counter()
            .with_dynamic_state(vk::DynamicState::DEPTH_TEST_ENABLE)
            .with_dynamic_state(vk::DynamicState::DEPTH_TEST_ENABLE);

        let front = builder.depth_stencil.front;
        assert_eq!(front.pass_op, vk::StencilOp::INCREMENT_AND_CLAMP);
        assert_eq!(front.compare_op, vk::CompareOp::ALWAYS);
        assert_eq!(builder.depth_stencil.depth_compare_op, vk::CompareOp::ALWAYS);
        assert_eq!(builder.dynamic_states.len(), 1);
    }

    #[test]
    fn depth_bias_is_enabled_with_factors() {
        let builder = GraphicsPipelineBuilder::new().with_depth_bias(7.0, 10.0);
        assert_eq!(builder.rasterization.depth_bias_enable, vk::TRUE);
        assert_eq!(builder.rasterization.depth_bias_constant_factor, 7.0);
        assert_eq!(builder.rasterization.depth_bias_slope_factor, 10.0);
    }
}
