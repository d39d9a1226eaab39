use std::mem::size_of;
use ash::vk;
use color_eyre::Result;
use gpu_allocator::MemoryLocation;
use crate::renderer::contexts::device_ctx::device::RenderDevice;
use crate::renderer::resources::buffer::AllocatedBuffer;
use crate::renderer::resources::upload::UniformUpload;
use crate::renderer::shader_data::{
    DebugUniform, DepthMvp, FrameUniformSnapshot, LightUniform, MultipleLights, SceneUniform,
};

/// Device-local uniform buffer rewritten in place every frame
pub struct UniformBuffer {
    pub buffer: AllocatedBuffer,
    /// Shader stages that read it
    pub stages: vk::PipelineStageFlags,
}

impl UniformBuffer {
    fn new<T>(dev: &RenderDevice, stages: vk::PipelineStageFlags, name: &str) -> Result<Self> {
        let buffer = AllocatedBuffer::new(
            size_of::<T>() as u64,
            vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            name,
            MemoryLocation::GpuOnly,
            dev.memory_allocator(),
            dev.logical.clone(),
        )?;
        Ok(Self { buffer, stages })
    }

    fn upload<'a>(&self, bytes: &'a [u8]) -> UniformUpload<'a> {
        UniformUpload {
            buffer: self.buffer.buffer,
            stages: self.stages,
            bytes,
        }
    }
}

/// The five per-frame uniform buffers
pub struct FrameUniforms {
    pub scene: UniformBuffer,
    pub light: UniformBuffer,
    pub debug: UniformBuffer,
    pub lights: UniformBuffer,
    pub depth_mvp: UniformBuffer,
}

impl FrameUniforms {
    pub fn new(dev: &RenderDevice) -> Result<Self> {
        use vk::PipelineStageFlags as Stage;

        Ok(Self {
            scene: UniformBuffer::new::<SceneUniform>(
                dev,
                Stage::VERTEX_SHADER | Stage::FRAGMENT_SHADER,
                "Scene uniform",
            )?,
            light: UniformBuffer::new::<LightUniform>(dev, Stage::FRAGMENT_SHADER, "Light uniform")?,
            debug: UniformBuffer::new::<DebugUniform>(dev, Stage::FRAGMENT_SHADER, "Debug uniform")?,
            lights: UniformBuffer::new::<MultipleLights>(dev, Stage::FRAGMENT_SHADER, "Brazier lights uniform")?,
            // Add FRAGMENT_SHADER here if a fragment stage ever reads the light matrix
            depth_mvp: UniformBuffer::new::<DepthMvp>(dev, Stage::VERTEX_SHADER, "Depth MVP uniform")?,
        })
    }

    /// One update per buffer, in a fixed order
    pub fn uploads<'a>(&self, snapshot: &'a FrameUniformSnapshot) -> [UniformUpload<'a>; 5] {
        [
            self.scene.upload(bytemuck::bytes_of(&snapshot.scene)),
            self.light.upload(bytemuck::bytes_of(&snapshot.light)),
            self.debug.upload(bytemuck::bytes_of(&snapshot.debug)),
            self.lights.upload(bytemuck::bytes_of(&snapshot.lights)),
            self.depth_mvp.upload(bytemuck::bytes_of(&snapshot.depth_mvp)),
        ]
    }
}
