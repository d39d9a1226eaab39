//! Reader for `.sunmesh` baked scenes.
//!
//! Little-endian layout:
//!
//! ```text
//! magic    [u8; 16]   "sunspire.sunmesh"
//! variant  [u8; 16]   "ptnt-u32-index\0\0"
//! u32 texture count,  per texture:  u8 color space (0 linear, 1 sRGB), u32 byte length, UTF-8 path
//! u32 material count, per material: u32 x 5 texture ids (base color, metalness, roughness,
//!                                   alpha mask, normal map), 0xFFFFFFFF = absent
//! u32 mesh count,     per mesh:     u32 material id, u32 vertex count,
//!                                   [f32; 3] positions, [f32; 2] texcoords, [f32; 3] normals,
//!                                   u32 packed tangent frames (A2R10G10B10), u32 index count, u32 indices
//! ```
//!
//! Texture paths are relative to the directory containing the model file.

use std::io::Read;
use std::path::{Path, PathBuf};
use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use glam::{Vec2, Vec3};
use crate::renderer::resources::material::{MaterialTextureIds, ABSENT_TEXTURE};
use crate::renderer::resources::texture::ColorSpace;

pub const MAGIC: &[u8; 16] = b"sunspire.sunmesh";
pub const VARIANT: &[u8; 16] = b"ptnt-u32-index\0\0";

#[derive(Debug, Clone, PartialEq)]
pub struct TextureRef {
    pub path: PathBuf,
    pub color_space: ColorSpace,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BakedMesh {
    pub material_id: u32,
    pub positions: Vec<Vec3>,
    pub texcoords: Vec<Vec2>,
    pub normals: Vec<Vec3>,
    pub tangents: Vec<u32>,
    pub indices: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BakedModel {
    pub textures: Vec<TextureRef>,
    pub materials: Vec<MaterialTextureIds>,
    pub meshes: Vec<BakedMesh>,
}

impl BakedModel {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .wrap_err_with(|| format!("Failed to read model {}", path.display()))?;
        let base_dir = path.parent().unwrap_or(Path::new(""));
        let model = Self::parse(&mut bytes.as_slice(), base_dir)
            .wrap_err_with(|| format!("Malformed model {}", path.display()))?;
        log::info!(
            "Loaded {}: {} meshes, {} materials, {} textures",
            path.display(),
            model.meshes.len(),
            model.materials.len(),
            model.textures.len(),
        );
        Ok(model)
    }

    pub fn parse(reader: &mut impl Read, base_dir: &Path) -> Result<Self> {
        let mut r = Reader(reader);

        if &r.array::<16>()? != MAGIC {
            return Err(eyre!("Not a sunmesh file"));
        }
        let variant = r.array::<16>()?;
        if &variant != VARIANT {
            return Err(eyre!(
                "Unsupported sunmesh variant {:?}",
                String::from_utf8_lossy(&variant).trim_end_matches('\0')
            ));
        }

        let texture_count = r.u32()?;
        let textures = (0..texture_count)
            .map(|_| {
                let color_space = match r.u8()? {
                    0 => ColorSpace::Linear,
                    1 => ColorSpace::Srgb,
                    other => return Err(eyre!("Unknown color space tag {other}")),
                };
                let len = r.u32()? as usize;
                let path = String::from_utf8(r.bytes(len)?)?;
                Ok(TextureRef {
                    path: base_dir.join(path),
                    color_space,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let material_count = r.u32()?;
        let materials = (0..material_count)
            .map(|_| {
                let ids = MaterialTextureIds {
                    base_color: r.u32()?,
                    metalness: r.u32()?,
                    roughness: r.u32()?,
                    alpha_mask: r.u32()?,
                    normal_map: r.u32()?,
                };
                if let Some(bad) = ids.all().into_iter().find(|id| *id != ABSENT_TEXTURE && *id >= texture_count) {
                    return Err(eyre!("Material references texture {bad} of {texture_count}"));
                }
                Ok(ids)
            })
            .collect::<Result<Vec<_>>>()?;

        let mesh_count = r.u32()?;
        let meshes = (0..mesh_count)
            .map(|mesh_index| {
                let material_id = r.u32()?;
                if material_id >= material_count {
                    return Err(eyre!("Mesh {mesh_index} references material {material_id} of {material_count}"));
                }
                let vertex_count = r.u32()? as usize;
                let positions = r.pod_vec::<[f32; 3]>(vertex_count)?.into_iter().map(Vec3::from).collect();
                let texcoords = r.pod_vec::<[f32; 2]>(vertex_count)?.into_iter().map(Vec2::from).collect();
                let normals = r.pod_vec::<[f32; 3]>(vertex_count)?.into_iter().map(Vec3::from).collect();
                let tangents = r.pod_vec::<u32>(vertex_count)?;
                let index_count = r.u32()? as usize;
                let indices = r.pod_vec::<u32>(index_count)?;
                if indices.is_empty() {
                    return Err(eyre!("Mesh {mesh_index} has no indices"));
                }
                if let Some(bad) = indices.iter().find(|i| **i as usize >= vertex_count) {
                    return Err(eyre!("Mesh {mesh_index} index {bad} out of {vertex_count} vertices"));
                }
                Ok(BakedMesh {
                    material_id,
                    positions,
                    texcoords,
                    normals,
                    tangents,
                    indices,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            textures,
            materials,
            meshes,
        })
    }
}

struct Reader<'a, R: Read>(&'a mut R);

impl<R: Read> Reader<'_, R> {
    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.0.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array::<4>()?))
    }

    fn bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.0.by_ref().take(len as u64).read_to_end(&mut buf)?;
        if buf.len() != len {
            return Err(eyre!("Unexpected end of file"));
        }
        Ok(buf)
    }

    /// `count` little-endian plain-old-data elements
    fn pod_vec<T: bytemuck::Pod>(&mut self, count: usize) -> Result<Vec<T>> {
        let size = std::mem::size_of::<T>();
        let bytes = self.bytes(count * size)?;
        Ok(bytes
            .chunks_exact(size)
            .map(|chunk| {
                let mut value = <T as bytemuck::Zeroable>::zeroed();
                let dst = bytemuck::bytes_of_mut(&mut value);
                // Components are 4-byte little-endian scalars
                for (d, s) in dst.chunks_exact_mut(4).zip(chunk.chunks_exact(4)) {
                    let word = u32::from_le_bytes([s[0], s[1], s[2], s[3]]);
                    d.copy_from_slice(&word.to_ne_bytes());
                }
                value
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ModelWriter(Vec<u8>);

    impl ModelWriter {
        fn new() -> Self {
            let mut bytes = MAGIC.to_vec();
            bytes.extend_from_slice(VARIANT);
            Self(bytes)
        }

        fn u32(&mut self, v: u32) -> &mut Self {
            self.0.extend_from_slice(&v.to_le_bytes());
            self
        }

        fn f32s(&mut self, vs: &[f32]) -> &mut Self {
            for v in vs {
                self.0.extend_from_slice(&v.to_le_bytes());
            }
            self
        }

        fn texture(&mut self, srgb: bool, path: &str) -> &mut Self {
            self.0.push(srgb as u8);
            self.u32(path.len() as u32);
            self.0.extend_from_slice(path.as_bytes());
            self
        }

        fn triangle(&mut self, material_id: u32) -> &mut Self {
            self.u32(material_id).u32(3);
            self.f32s(&[0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
            self.f32s(&[0.0, 0.0, 1.0, 0.0, 0.0, 1.0]);
            self.f32s(&[0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0]);
            self.u32(7).u32(8).u32(9);
            self.u32(3).u32(0).u32(1).u32(2)
        }
    }

    fn two_material_scene() -> Vec<u8> {
        let mut w = ModelWriter::new();
        w.u32(2).texture(true, "textures/albedo.png").texture(false, "textures/mask.png");
        w.u32(2);
        w.u32(0).u32(ABSENT_TEXTURE).u32(ABSENT_TEXTURE).u32(ABSENT_TEXTURE).u32(ABSENT_TEXTURE);
        w.u32(0).u32(ABSENT_TEXTURE).u32(ABSENT_TEXTURE).u32(1).u32(ABSENT_TEXTURE);
        w.u32(2).triangle(1).triangle(0);
        w.0
    }

    #[test]
    fn parses_tables_and_resolves_paths_against_model_dir() {
        let bytes = two_material_scene();
        let model = BakedModel::parse(&mut bytes.as_slice(), Path::new("assets")).unwrap();

        assert_eq!(model.textures.len(), 2);
        assert_eq!(model.textures[0].path, Path::new("assets/textures/albedo.png"));
        assert_eq!(model.textures[0].color_space, ColorSpace::Srgb);
        assert_eq!(model.textures[1].color_space, ColorSpace::Linear);

        assert_eq!(model.materials[0].alpha_mask, ABSENT_TEXTURE);
        assert_eq!(model.materials[1].alpha_mask, 1);

        assert_eq!(model.meshes.len(), 2);
        let mesh = &model.meshes[0];
        assert_eq!(mesh.material_id, 1);
        assert_eq!(mesh.positions[1], Vec3::X);
        assert_eq!(mesh.texcoords[2], Vec2::Y);
        assert_eq!(mesh.tangents, vec![7, 8, 9]);
        assert_eq!(mesh.indices, vec![0, 1, 2]);
    }

    #[test]
    fn rejects_wrong_magic() {
        let mut bytes = two_material_scene();
        bytes[0] = b'x';
        assert!(BakedModel::parse(&mut bytes.as_slice(), Path::new("")).is_err());
    }

    #[test]
    fn rejects_truncated_file() {
        let bytes = two_material_scene();
        let cut = &bytes[..bytes.len() - 2];
        assert!(BakedModel::parse(&mut &cut[..], Path::new("")).is_err());
    }

    #[test]
    fn rejects_dangling_material_reference() {
        let mut w = ModelWriter::new();
        w.u32(0).u32(1);
        w.u32(ABSENT_TEXTURE).u32(ABSENT_TEXTURE).u32(ABSENT_TEXTURE).u32(ABSENT_TEXTURE).u32(ABSENT_TEXTURE);
        w.u32(1).triangle(4);
        assert!(BakedModel::parse(&mut w.0.as_slice(), Path::new("")).is_err());
    }

    #[test]
    fn rejects_dangling_texture_reference() {
        let mut w = ModelWriter::new();
        w.u32(0).u32(1);
        w.u32(3).u32(ABSENT_TEXTURE).u32(ABSENT_TEXTURE).u32(ABSENT_TEXTURE).u32(ABSENT_TEXTURE);
        w.u32(0);
        assert!(BakedModel::parse(&mut w.0.as_slice(), Path::new("")).is_err());
    }
}
