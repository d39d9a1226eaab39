use ash::vk;
use color_eyre::Result;
use crate::renderer::contexts::device_ctx::device::RenderDevice;
use crate::renderer::resources::buffer::AllocatedBuffer;
use crate::renderer::resources::model::BakedMesh;
use crate::renderer::resources::upload::Consumer;

/// GPU-resident vertex streams of one baked mesh. Immutable after upload.
pub struct MeshRecord {
    pub positions: AllocatedBuffer,
    pub texcoords: AllocatedBuffer,
    pub normals: AllocatedBuffer,
    pub tangents: AllocatedBuffer,
    pub indices: AllocatedBuffer,
    pub index_count: u32,
    pub material_id: u32,
    pub alpha_masked: bool,
}

impl MeshRecord {
    pub fn upload(
        dev: &RenderDevice,
        mesh: &BakedMesh,
        alpha_masked: bool,
        name: &str,
    ) -> Result<Self> {
        let vertex_stream = |data: &[u8], stream: &str| {
            dev.upload_buffer(
                data,
                vk::BufferUsageFlags::VERTEX_BUFFER,
                &format!("{name} {stream}"),
                Consumer::VERTEX_INPUT,
            )
        };

        Ok(Self {
            positions: vertex_stream(bytemuck::cast_slice(&mesh.positions), "positions")?,
            texcoords: vertex_stream(bytemuck::cast_slice(&mesh.texcoords), "texcoords")?,
            normals: vertex_stream(bytemuck::cast_slice(&mesh.normals), "normals")?,
            tangents: vertex_stream(bytemuck::cast_slice(&mesh.tangents), "tangents")?,
            indices: dev.upload_buffer(
                &mesh.indices,
                vk::BufferUsageFlags::INDEX_BUFFER,
                &format!("{name} indices"),
                Consumer::INDEX_INPUT,
            )?,
            index_count: mesh.indices.len() as u32,
            material_id: mesh.material_id,
            alpha_masked,
        })
    }

    /// Position, texcoord, normal and tangent buffers in binding order
    pub fn full_streams(&self) -> [vk::Buffer; 4] {
        [
            self.positions.buffer,
            self.texcoords.buffer,
            self.normals.buffer,
            self.tangents.buffer,
        ]
    }
}
