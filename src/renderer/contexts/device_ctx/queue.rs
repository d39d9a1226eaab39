use ash::vk;

pub struct Queue {
    pub family: QueueFamily,
    pub handle: vk::Queue,
}

impl Queue {
    pub fn new(
        family: QueueFamily,
        handle: vk::Queue,
    ) -> Self {
        Self {
            family,
            handle,
        }
    }
}

/// A queue family able to both render and present to the window surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamily {
    pub index: u32,
    pub queue_count: u32,
}

impl QueueFamily {
    /// Index of the first family with graphics support that `presents` accepts
    pub fn find_graphics_present(
        props: &[vk::QueueFamilyProperties],
        mut presents: impl FnMut(u32) -> bool,
    ) -> Option<Self> {
        props
            .iter()
            .enumerate()
            .find(|(i, q)| {
                q.queue_flags.contains(vk::QueueFlags::GRAPHICS) && presents(*i as u32)
            })
            .map(|(i, q)| Self {
                index: i as u32,
                queue_count: q.queue_count,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn picks_first_graphics_family_that_can_present() {
        let props = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS),
        ];
        let picked = QueueFamily::find_graphics_present(&props, |i| i == 2);
        assert_eq!(picked.map(|f| f.index), Some(2));
    }

    #[test]
    fn none_when_no_family_presents() {
        let props = [family(vk::QueueFlags::GRAPHICS)];
        assert!(QueueFamily::find_graphics_present(&props, |_| false).is_none());
    }
}
