use ash::vk;
use color_eyre::eyre::OptionExt;
use color_eyre::Result;
use crate::renderer::contexts::device_ctx::device::{AllocatedSet, RenderDevice};
use crate::renderer::contexts::resource_ctx::descriptor_set_layout_builder::SetLayout;
use crate::renderer::contexts::resource_ctx::descriptors::{write_images, ImageWrite};
use crate::renderer::resources::image::Image;
use crate::renderer::resources::model::TextureRef;
use crate::renderer::resources::texture::{load_texture, placeholder_texture};

/// Texture id meaning "no texture in this slot"
pub const ABSENT_TEXTURE: u32 = 0xFFFF_FFFF;

/// Texture table indices of one baked material, in descriptor binding order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaterialTextureIds {
    pub base_color: u32,
    pub metalness: u32,
    pub roughness: u32,
    pub alpha_mask: u32,
    pub normal_map: u32,
}

/// What ends up bound at one material binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureSlot {
    Texture(u32),
    White,
    FlatNormal,
}

impl MaterialTextureIds {
    pub fn all(&self) -> [u32; 5] {
        [self.base_color, self.metalness, self.roughness, self.alpha_mask, self.normal_map]
    }

    pub fn uses_alpha_mask(&self) -> bool {
        self.alpha_mask != ABSENT_TEXTURE
    }

    /// An absent alpha mask aliases the base color texture. Other absent slots get a neutral texel.
    pub fn resolve(&self) -> [TextureSlot; 5] {
        let or = |id: u32, fallback: TextureSlot| {
            if id == ABSENT_TEXTURE {
                fallback
            } else {
                TextureSlot::Texture(id)
            }
        };
        let base_color = or(self.base_color, TextureSlot::White);
        [
            base_color,
            or(self.metalness, TextureSlot::White),
            or(self.roughness, TextureSlot::White),
            or(self.alpha_mask, base_color),
            or(self.normal_map, TextureSlot::FlatNormal),
        ]
    }
}

/// Material textures and their descriptor sets, one set per baked material
pub struct MaterialTable {
    sets: Vec<AllocatedSet>,
    alpha_masked: Vec<bool>,

    _textures: Vec<Image>,
    _white: Image,
    _flat_normal: Image,
}

impl MaterialTable {
    pub fn new(
        dev: &RenderDevice,
        textures: &[TextureRef],
        materials: &[MaterialTextureIds],
        layout: &SetLayout,
        sampler: vk::Sampler,
    ) -> Result<Self> {
        let images = textures
            .iter()
            .map(|texture| load_texture(dev, &texture.path, texture.color_space))
            .collect::<Result<Vec<_>>>()?;
        let white = placeholder_texture(dev, [255, 255, 255, 255], "Placeholder white")?;
        let flat_normal = placeholder_texture(dev, [128, 128, 255, 255], "Placeholder normal")?;

        let mut sets = Vec::with_capacity(materials.len());
        for ids in materials {
            let set = dev.allocate_set(layout)?;
            let writes = ids
                .resolve()
                .iter()
                .enumerate()
                .map(|(binding, slot)| {
                    let view = match slot {
                        TextureSlot::Texture(id) => images
                            .get(*id as usize)
                            .ok_or_eyre("Material references a missing texture")?
                            .view,
                        TextureSlot::White => white.view,
                        TextureSlot::FlatNormal => flat_normal.view,
                    };
                    Ok(ImageWrite {
                        binding: binding as u32,
                        ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                        view,
                        layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                        sampler,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            write_images(&dev.logical, *set.raw(), &writes);
            sets.push(set);
        }

        Ok(Self {
            sets,
            alpha_masked: materials.iter().map(MaterialTextureIds::uses_alpha_mask).collect(),
            _textures: images,
            _white: white,
            _flat_normal: flat_normal,
        })
    }

    pub fn set(&self, material_id: u32) -> vk::DescriptorSet {
        self.sets
            .get(material_id as usize)
            .map(|set| *set.raw())
            .unwrap_or(vk::DescriptorSet::null())
    }

    pub fn uses_alpha_mask(&self, material_id: u32) -> bool {
        self.alpha_masked.get(material_id as usize).copied().unwrap_or(false)
    }

    pub fn take_sets(&mut self) -> Vec<AllocatedSet> {
        std::mem::take(&mut self.sets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(base_color: u32, alpha_mask: u32) -> MaterialTextureIds {
        MaterialTextureIds {
            base_color,
            metalness: 1,
            roughness: 2,
            alpha_mask,
            normal_map: ABSENT_TEXTURE,
        }
    }

    #[test]
    fn absent_alpha_mask_binds_base_color() {
        let slots = ids(4, ABSENT_TEXTURE).resolve();
        assert_eq!(slots[3], TextureSlot::Texture(4));
        assert_eq!(slots[0], slots[3]);
        assert!(!ids(4, ABSENT_TEXTURE).uses_alpha_mask());
    }

    #[test]
    fn present_alpha_mask_is_kept() {
        let material = ids(4, 9);
        assert_eq!(material.resolve()[3], TextureSlot::Texture(9));
        assert!(material.uses_alpha_mask());
    }

    #[test]
    fn other_absent_slots_get_neutral_texels() {
        let slots = ids(ABSENT_TEXTURE, ABSENT_TEXTURE).resolve();
        assert_eq!(slots[0], TextureSlot::White);
        assert_eq!(slots[3], TextureSlot::White);
        assert_eq!(slots[4], TextureSlot::FlatNormal);
        assert_eq!(slots[1], TextureSlot::Texture(1));
    }
}
