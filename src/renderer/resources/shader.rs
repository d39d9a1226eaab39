use std::path::Path;
use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;

/// Precompiled vertex + fragment SPIR-V pair, `{name}.vert.spv` / `{name}.frag.spv`
pub struct GraphicsShader {
    pub vert_mod: vk::ShaderModule,
    pub frag_mod: vk::ShaderModule,
    device: Arc<ash::Device>,
}

impl GraphicsShader {
    pub fn new(shader_dir: &Path, shader_name: &str, device: Arc<ash::Device>) -> Result<Self> {
        let vert_mod = create_shader_module(
            &shader_dir.join(format!("{shader_name}.vert.spv")),
            &device,
        )?;
        let frag_mod = match create_shader_module(
            &shader_dir.join(format!("{shader_name}.frag.spv")),
            &device,
        ) {
            Ok(module) => module,
            Err(e) => {
                unsafe { device.destroy_shader_module(vert_mod, None) };
                return Err(e);
            }
        };
        Ok(Self { vert_mod, frag_mod, device })
    }
}

impl Drop for GraphicsShader {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.vert_mod, None);
            self.device.destroy_shader_module(self.frag_mod, None);
        }
    }
}

fn create_shader_module(filepath: &Path, device: &ash::Device) -> Result<vk::ShaderModule> {
    let bytes = std::fs::read(filepath)
        .wrap_err_with(|| format!("Failed to read shader {}", filepath.display()))?;
    let code = spirv_words(&bytes)
        .ok_or_else(|| eyre!("{} is not a SPIR-V module", filepath.display()))?;

    let shader_module_info = vk::ShaderModuleCreateInfo::default()
        .code(&code);

    let shader_module = unsafe {
        device.create_shader_module(&shader_module_info, None)?
    };

    Ok(shader_module)
}

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Reinterpret file bytes as SPIR-V words. Copies so alignment of the file buffer does not matter.
fn spirv_words(bytes: &[u8]) -> Option<Vec<u32>> {
    if bytes.len() < 4 || bytes.len() % 4 != 0 {
        return None;
    }
    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|w| u32::from_ne_bytes([w[0], w[1], w[2], w[3]]))
        .collect();
    (words[0] == SPIRV_MAGIC).then_some(words)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_word_aligned_spirv() {
        let mut bytes = SPIRV_MAGIC.to_ne_bytes().to_vec();
        bytes.extend_from_slice(&[0; 12]);
        assert_eq!(spirv_words(&bytes).map(|w| w.len()), Some(4));
    }

    #[test]
    fn rejects_truncated_or_foreign_bytes() {
        assert!(spirv_words(&[0x03, 0x02, 0x23]).is_none());
        assert!(spirv_words(b"#version 450").is_none());
    }
}
