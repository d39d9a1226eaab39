use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use gpu_descriptor::DescriptorTotalCount;

/// A descriptor set layout together with the per-type totals gpu-descriptor sizes its pools with
pub struct SetLayout {
    pub raw: vk::DescriptorSetLayout,
    pub counts: DescriptorTotalCount,
    device: Arc<ash::Device>,
}

impl Drop for SetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_set_layout(self.raw, None);
        }
    }
}

pub struct DescriptorSetLayoutBuilder<'a> {
    bindings: Vec<vk::DescriptorSetLayoutBinding<'a>>,
    counts: DescriptorTotalCount,
}

impl DescriptorSetLayoutBuilder<'_> {
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
            counts: DescriptorTotalCount::default(),
        }
    }

    /// Binding numbers are assigned in call order
    pub fn add_binding(
        mut self,
        descriptor_type: vk::DescriptorType,
        stages: vk::ShaderStageFlags,
    ) -> Self {
        let binding = vk::DescriptorSetLayoutBinding::default()
            .binding(self.bindings.len() as u32)
            .descriptor_type(descriptor_type)
            .descriptor_count(1)
            .stage_flags(stages);

        tally(&mut self.counts, descriptor_type, 1);
        self.bindings.push(binding);
        self
    }

    pub fn build(
        self,
        device: Arc<ash::Device>,
    ) -> Result<SetLayout> {
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default()
            .bindings(&self.bindings);

        let raw = unsafe {
            device.create_descriptor_set_layout(&layout_info, None)?
        };
        Ok(SetLayout {
            raw,
            counts: self.counts,
            device,
        })
    }
}

fn tally(counts: &mut DescriptorTotalCount, ty: vk::DescriptorType, n: u32) {
    match ty {
        vk::DescriptorType::UNIFORM_BUFFER => counts.uniform_buffer += n,
        vk::DescriptorType::COMBINED_IMAGE_SAMPLER => counts.combined_image_sampler += n,
        vk::DescriptorType::INPUT_ATTACHMENT => counts.input_attachment += n,
        vk::DescriptorType::SAMPLED_IMAGE => counts.sampled_image += n,
        vk::DescriptorType::SAMPLER => counts.sampler += n,
        vk::DescriptorType::STORAGE_BUFFER => counts.storage_buffer += n,
        vk::DescriptorType::STORAGE_IMAGE => counts.storage_image += n,
        other => log::warn!("Descriptor type {other:?} not counted for pool sizing"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tallies_descriptor_types() {
        let builder = DescriptorSetLayoutBuilder::new()
            .add_binding(vk::DescriptorType::INPUT_ATTACHMENT, vk::ShaderStageFlags::FRAGMENT)
            .add_binding(vk::DescriptorType::INPUT_ATTACHMENT, vk::ShaderStageFlags::FRAGMENT)
            .add_binding(vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::VERTEX);

        assert_eq!(builder.counts.input_attachment, 2);
        assert_eq!(builder.counts.uniform_buffer, 1);
        assert_eq!(builder.counts.combined_image_sampler, 0);
        let numbers: Vec<u32> = builder.bindings.iter().map(|b| b.binding).collect();
        assert_eq!(numbers, vec![0, 1, 2]);
    }
}
