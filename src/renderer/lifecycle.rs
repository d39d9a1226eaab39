use crate::renderer::contexts::device_ctx::swapchain::SwapchainChanges;

/// Which resource groups a swapchain rebuild invalidates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RebuildPlan {
    /// Passes whose attachment formats follow the swapchain
    pub passes: bool,
    pub targets: bool,
    /// Per-image framebuffers reference the new image views, so they are always rebuilt
    pub framebuffers: bool,
    /// Pipelines with a fixed viewport or a swapchain-format pass
    pub pipelines: bool,
    pub size_dependent_sets: bool,
}

impl From<SwapchainChanges> for RebuildPlan {
    fn from(changes: SwapchainChanges) -> Self {
        Self {
            passes: changes.format_changed,
            targets: changes.size_changed,
            framebuffers: true,
            pipelines: changes.size_changed || changes.format_changed,
            size_dependent_sets: changes.size_changed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unchanged_surface_only_rebinds_framebuffers() {
        let plan = RebuildPlan::from(SwapchainChanges::default());
        assert_eq!(plan, RebuildPlan {
            framebuffers: true,
            ..Default::default()
        });
    }

    #[test]
    fn resize_rebuilds_targets_sets_and_pipelines_but_not_passes() {
        let plan = RebuildPlan::from(SwapchainChanges {
            size_changed: true,
            format_changed: false,
        });
        assert!(plan.targets && plan.size_dependent_sets && plan.pipelines && plan.framebuffers);
        assert!(!plan.passes);
    }

    #[test]
    fn format_change_rebuilds_passes_and_pipelines_but_keeps_targets() {
        let plan = RebuildPlan::from(SwapchainChanges {
            size_changed: false,
            format_changed: true,
        });
        assert!(plan.passes && plan.pipelines);
        assert!(!plan.targets && !plan.size_dependent_sets);
    }
}
