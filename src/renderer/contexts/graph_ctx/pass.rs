use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use smallvec::{smallvec, SmallVec};
use crate::renderer::contexts::resource_ctx::targets::{
    DEPTH_STENCIL_FORMAT, GBUFFER_FORMAT, OFFSCREEN_FORMAT, SHADOW_FORMAT,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassKind {
    Shadow,
    Forward,
    Offscreen,
    PostProcess,
    OverdrawVis,
    Deferred,
}

impl PassKind {
    pub const ALL: [PassKind; 6] = [
        PassKind::Shadow,
        PassKind::Forward,
        PassKind::Offscreen,
        PassKind::PostProcess,
        PassKind::OverdrawVis,
        PassKind::Deferred,
    ];

    pub fn depends_on_swapchain_format(self) -> bool {
        describe(self)
            .attachments
            .iter()
            .any(|a| a.format == AttachmentFormat::Swapchain)
    }

    /// Passes rendering into the presentable image need one framebuffer per swapchain image
    pub fn targets_swapchain(self) -> bool {
        self.depends_on_swapchain_format()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentFormat {
    Swapchain,
    Fixed(vk::Format),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentDesc {
    pub format: AttachmentFormat,
    pub store: bool,
    pub final_layout: vk::ImageLayout,
}

impl AttachmentDesc {
    fn is_depth(&self) -> bool {
        matches!(
            self.format,
            AttachmentFormat::Fixed(DEPTH_STENCIL_FORMAT) | AttachmentFormat::Fixed(SHADOW_FORMAT)
        )
    }

    fn has_stencil(&self) -> bool {
        self.format == AttachmentFormat::Fixed(DEPTH_STENCIL_FORMAT)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubpassDesc {
    pub colors: SmallVec<[u32; 2]>,
    /// Attachment index and the layout it is read in, in input attachment index order
    pub inputs: SmallVec<[(u32, vk::ImageLayout); 3]>,
    pub depth: Option<u32>,
}

/// Attachments, subpasses and dependency edges of one render pass.
/// Every attachment is cleared on load and starts in `UNDEFINED`.
#[derive(Debug, Clone)]
pub struct PassDesc {
    pub attachments: SmallVec<[AttachmentDesc; 4]>,
    pub subpasses: SmallVec<[SubpassDesc; 2]>,
    pub dependencies: SmallVec<[vk::SubpassDependency; 4]>,
}

fn attachment(format: vk::Format, store: bool, final_layout: vk::ImageLayout) -> AttachmentDesc {
    AttachmentDesc {
        format: AttachmentFormat::Fixed(format),
        store,
        final_layout,
    }
}

const PRESENTED: AttachmentDesc = AttachmentDesc {
    format: AttachmentFormat::Swapchain,
    store: true,
    final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
};

fn dependency(
    src_subpass: u32,
    dst_subpass: u32,
    src: (vk::PipelineStageFlags, vk::AccessFlags),
    dst: (vk::PipelineStageFlags, vk::AccessFlags),
) -> vk::SubpassDependency {
    vk::SubpassDependency {
        src_subpass,
        dst_subpass,
        src_stage_mask: src.0,
        src_access_mask: src.1,
        dst_stage_mask: dst.0,
        dst_access_mask: dst.1,
        dependency_flags: vk::DependencyFlags::BY_REGION,
    }
}

/// Color writes wait for the acquired image
fn color_output(dst_subpass: u32) -> vk::SubpassDependency {
    dependency(
        vk::SUBPASS_EXTERNAL,
        dst_subpass,
        (vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT, vk::AccessFlags::empty()),
        (vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT, vk::AccessFlags::COLOR_ATTACHMENT_WRITE),
    )
}

/// Depth writes of this frame wait for the depth tests of the previous one
fn depth_reuse(dst_subpass: u32) -> vk::SubpassDependency {
    let tests = vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
    dependency(
        vk::SUBPASS_EXTERNAL,
        dst_subpass,
        (tests, vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE),
        (
            tests,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
    )
}

/// Attachments written in subpass 0 are read as input attachments at the same pixel in subpass 1
fn attachments_to_inputs() -> vk::SubpassDependency {
    dependency(
        0,
        1,
        (
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        (vk::PipelineStageFlags::FRAGMENT_SHADER, vk::AccessFlags::INPUT_ATTACHMENT_READ),
    )
}

pub fn describe(kind: PassKind) -> PassDesc {
    use vk::ImageLayout as Layout;

    let depth = attachment(DEPTH_STENCIL_FORMAT, false, Layout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

    match kind {
        PassKind::Shadow => PassDesc {
            attachments: smallvec![attachment(SHADOW_FORMAT, true, Layout::DEPTH_STENCIL_READ_ONLY_OPTIMAL)],
            subpasses: smallvec![SubpassDesc {
                depth: Some(0),
                ..Default::default()
            }],
            dependencies: smallvec![
                // Previous frame's shadow lookups finish before the map is overwritten
                dependency(
                    vk::SUBPASS_EXTERNAL,
                    0,
                    (vk::PipelineStageFlags::FRAGMENT_SHADER, vk::AccessFlags::SHADER_READ),
                    (
                        vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
                        vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                    ),
                ),
                dependency(
                    0,
                    vk::SUBPASS_EXTERNAL,
                    (
                        vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
                        vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                    ),
                    (vk::PipelineStageFlags::FRAGMENT_SHADER, vk::AccessFlags::SHADER_READ),
                ),
            ],
        },
        PassKind::Forward => PassDesc {
            attachments: smallvec![PRESENTED, depth],
            subpasses: smallvec![SubpassDesc {
                colors: smallvec![0],
                depth: Some(1),
                ..Default::default()
            }],
            dependencies: smallvec![color_output(0), depth_reuse(0)],
        },
        PassKind::Offscreen => PassDesc {
            attachments: smallvec![
                attachment(OFFSCREEN_FORMAT, true, Layout::SHADER_READ_ONLY_OPTIMAL),
                depth,
            ],
            subpasses: smallvec![SubpassDesc {
                colors: smallvec![0],
                depth: Some(1),
                ..Default::default()
            }],
            dependencies: smallvec![
                // Previous frame's post-process sampling finishes before the target is overwritten
                dependency(
                    vk::SUBPASS_EXTERNAL,
                    0,
                    (vk::PipelineStageFlags::FRAGMENT_SHADER, vk::AccessFlags::SHADER_READ),
                    (
                        vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                        vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                    ),
                ),
                depth_reuse(0),
                dependency(
                    0,
                    vk::SUBPASS_EXTERNAL,
                    (
                        vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                        vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                    ),
                    (vk::PipelineStageFlags::FRAGMENT_SHADER, vk::AccessFlags::SHADER_READ),
                ),
            ],
        },
        PassKind::PostProcess => PassDesc {
            attachments: smallvec![PRESENTED],
            subpasses: smallvec![SubpassDesc {
                colors: smallvec![0],
                ..Default::default()
            }],
            dependencies: smallvec![color_output(0)],
        },
        PassKind::OverdrawVis => PassDesc {
            attachments: smallvec![
                PRESENTED,
                attachment(OFFSCREEN_FORMAT, false, Layout::COLOR_ATTACHMENT_OPTIMAL),
                attachment(DEPTH_STENCIL_FORMAT, false, Layout::DEPTH_STENCIL_READ_ONLY_OPTIMAL),
            ],
            subpasses: smallvec![
                SubpassDesc {
                    colors: smallvec![1],
                    depth: Some(2),
                    ..Default::default()
                },
                SubpassDesc {
                    colors: smallvec![0],
                    inputs: smallvec![
                        (2, Layout::DEPTH_STENCIL_READ_ONLY_OPTIMAL),
                        (1, Layout::SHADER_READ_ONLY_OPTIMAL),
                    ],
                    depth: None,
                },
            ],
            dependencies: smallvec![
                color_output(0),
                depth_reuse(0),
                color_output(1),
                attachments_to_inputs(),
            ],
        },
        PassKind::Deferred => PassDesc {
            attachments: smallvec![
                PRESENTED,
                attachment(GBUFFER_FORMAT, false, Layout::SHADER_READ_ONLY_OPTIMAL),
                attachment(GBUFFER_FORMAT, false, Layout::SHADER_READ_ONLY_OPTIMAL),
                attachment(DEPTH_STENCIL_FORMAT, false, Layout::DEPTH_STENCIL_READ_ONLY_OPTIMAL),
            ],
            subpasses: smallvec![
                SubpassDesc {
                    colors: smallvec![1, 2],
                    depth: Some(3),
                    ..Default::default()
                },
                SubpassDesc {
                    colors: smallvec![0],
                    inputs: smallvec![
                        (1, Layout::SHADER_READ_ONLY_OPTIMAL),
                        (2, Layout::SHADER_READ_ONLY_OPTIMAL),
                        (3, Layout::DEPTH_STENCIL_READ_ONLY_OPTIMAL),
                    ],
                    depth: None,
                },
            ],
            dependencies: smallvec![
                color_output(0),
                depth_reuse(0),
                color_output(1),
                attachments_to_inputs(),
            ],
        },
    }
}

impl PassDesc {
    pub fn clear_values(&self, clear_color: [f32; 4]) -> SmallVec<[vk::ClearValue; 4]> {
        self.attachments
            .iter()
            .map(|a| {
                if a.is_depth() {
                    vk::ClearValue {
                        depth_stencil: vk::ClearDepthStencilValue {
                            depth: 1.0,
                            stencil: 0,
                        },
                    }
                } else {
                    vk::ClearValue {
                        color: vk::ClearColorValue {
                            float32: clear_color,
                        },
                    }
                }
            })
            .collect()
    }

    pub fn build(
        &self,
        device: &ash::Device,
        swapchain_format: vk::Format,
    ) -> Result<vk::RenderPass> {
        let attachments: SmallVec<[vk::AttachmentDescription; 4]> = self
            .attachments
            .iter()
            .map(|a| {
                let store_op = if a.store {
                    vk::AttachmentStoreOp::STORE
                } else {
                    vk::AttachmentStoreOp::DONT_CARE
                };
                vk::AttachmentDescription {
                    format: match a.format {
                        AttachmentFormat::Swapchain => swapchain_format,
                        AttachmentFormat::Fixed(format) => format,
                    },
                    samples: vk::SampleCountFlags::TYPE_1,
                    load_op: vk::AttachmentLoadOp::CLEAR,
                    store_op,
                    stencil_load_op: if a.has_stencil() {
                        vk::AttachmentLoadOp::CLEAR
                    } else {
                        vk::AttachmentLoadOp::DONT_CARE
                    },
                    stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                    initial_layout: vk::ImageLayout::UNDEFINED,
                    final_layout: a.final_layout,
                    ..Default::default()
                }
            })
            .collect();

        let colors: SmallVec<[SmallVec<[vk::AttachmentReference; 2]>; 2]> = self
            .subpasses
            .iter()
            .map(|s| {
                s.colors
                    .iter()
                    .map(|&attachment| vk::AttachmentReference {
                        attachment,
                        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                    })
                    .collect()
            })
            .collect();
        let inputs: SmallVec<[SmallVec<[vk::AttachmentReference; 3]>; 2]> = self
            .subpasses
            .iter()
            .map(|s| {
                s.inputs
                    .iter()
                    .map(|&(attachment, layout)| vk::AttachmentReference { attachment, layout })
                    .collect()
            })
            .collect();
        let depths: SmallVec<[Option<vk::AttachmentReference>; 2]> = self
            .subpasses
            .iter()
            .map(|s| {
                s.depth.map(|attachment| vk::AttachmentReference {
                    attachment,
                    layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                })
            })
            .collect();

        let subpasses: SmallVec<[vk::SubpassDescription; 2]> = (0..self.subpasses.len())
            .map(|i| {
                let subpass = vk::SubpassDescription::default()
                    .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                    .color_attachments(&colors[i])
                    .input_attachments(&inputs[i]);
                match &depths[i] {
                    Some(depth) => subpass.depth_stencil_attachment(depth),
                    None => subpass,
                }
            })
            .collect();

        let info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&self.dependencies);

        Ok(unsafe { device.create_render_pass(&info, None)? })
    }
}

/// A built render pass, destroyed with its owner
pub struct Pass {
    pub raw: vk::RenderPass,
    pub desc: PassDesc,
    device: Arc<ash::Device>,
}

impl Pass {
    pub fn new(
        kind: PassKind,
        swapchain_format: vk::Format,
        device: Arc<ash::Device>,
    ) -> Result<Self> {
        let desc = describe(kind);
        let raw = desc.build(&device, swapchain_format)?;
        Ok(Self { raw, desc, device })
    }
}

impl Drop for Pass {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_render_pass(self.raw, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(desc: &PassDesc, src: u32, dst: u32) -> vk::SubpassDependency {
        *desc
            .dependencies
            .iter()
            .find(|d| d.src_subpass == src && d.dst_subpass == dst)
            .unwrap()
    }

    #[test]
    fn deferred_shading_waits_for_gbuffer_writes_per_pixel() {
        let desc = describe(PassKind::Deferred);
        let dep = edge(&desc, 0, 1);

        assert_eq!(dep.dependency_flags, vk::DependencyFlags::BY_REGION);
        assert!(dep.src_stage_mask.contains(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
        ));
        assert!(dep.src_access_mask.contains(vk::AccessFlags::COLOR_ATTACHMENT_WRITE));
        assert!(dep.src_access_mask.contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));
        assert_eq!(dep.dst_stage_mask, vk::PipelineStageFlags::FRAGMENT_SHADER);
        assert_eq!(dep.dst_access_mask, vk::AccessFlags::INPUT_ATTACHMENT_READ);
    }

    #[test]
    fn deferred_shading_subpass_reads_the_gbuffer_it_wrote() {
        let desc = describe(PassKind::Deferred);
        let geometry = &desc.subpasses[0];
        let shading = &desc.subpasses[1];

        let written: Vec<u32> = geometry.colors.iter().copied().chain(geometry.depth).collect();
        let read: Vec<u32> = shading.inputs.iter().map(|(a, _)| *a).collect();
        assert_eq!(written, read);
        assert_eq!(shading.depth, None);
        assert_eq!(shading.colors.as_slice(), &[0]);
    }

    #[test]
    fn overdraw_resolve_reads_stencil_then_scratch_color() {
        let desc = describe(PassKind::OverdrawVis);
        let resolve = &desc.subpasses[1];
        assert_eq!(resolve.inputs[0], (2, vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL));
        assert_eq!(resolve.inputs[1].0, 1);
        edge(&desc, 0, 1);
    }

    #[test]
    fn only_presenting_passes_follow_the_swapchain_format() {
        let following: Vec<PassKind> = PassKind::ALL
            .into_iter()
            .filter(|k| k.depends_on_swapchain_format())
            .collect();
        assert_eq!(following, vec![
            PassKind::Forward,
            PassKind::PostProcess,
            PassKind::OverdrawVis,
            PassKind::Deferred,
        ]);
    }

    #[test]
    fn shadow_pass_leaves_the_map_ready_for_sampling() {
        let desc = describe(PassKind::Shadow);
        assert!(desc.subpasses[0].colors.is_empty());
        assert_eq!(desc.attachments[0].final_layout, vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL);
        assert!(desc.attachments[0].store);
    }

    #[test]
    fn depth_attachments_clear_to_far_plane() {
        let desc = describe(PassKind::Forward);
        let clears = desc.clear_values([0.1, 0.1, 0.1, 1.0]);
        assert_eq!(clears.len(), 2);
        let depth = unsafe { clears[1].depth_stencil };
        assert_eq!(depth.depth, 1.0);
        let color = unsafe { clears[0].color.float32 };
        assert_eq!(color, [0.1, 0.1, 0.1, 1.0]);
    }
}
