use glam::Mat4;
use winit::keyboard::KeyCode;

/// Exactly one of these selects the pass plan recorded each frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    Regular { shadows: bool },
    /// Channel 2 mip level utilisation, 3 fragment depth, 4 depth derivatives
    DebugChannel(u8),
    OverdrawVis,
    OvershadingVis,
    DeferredShading,
    MosaicPostProcess,
}

/// Raw operator toggles. Several can be set at once; `mode` resolves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeToggles {
    /// 1 regular, 2-4 debug channels, 5 overdraw, 6 overshading
    pub channel: u8,
    pub mosaic: bool,
    pub deferred: bool,
    pub shadows: bool,
}

impl Default for ModeToggles {
    fn default() -> Self {
        Self {
            channel: 1,
            mosaic: false,
            deferred: false,
            shadows: false,
        }
    }
}

impl ModeToggles {
    pub fn mode(&self) -> RenderMode {
        if self.deferred && !self.mosaic {
            RenderMode::DeferredShading
        } else if self.mosaic {
            RenderMode::MosaicPostProcess
        } else {
            match self.channel {
                1 => RenderMode::Regular { shadows: self.shadows },
                5 => RenderMode::OverdrawVis,
                6 => RenderMode::OvershadingVis,
                n => RenderMode::DebugChannel(n),
            }
        }
    }

    /// Apply a released key. Returns whether the key is a mode key.
    pub fn on_key_released(&mut self, key: KeyCode) -> bool {
        match key {
            KeyCode::Digit1 => self.channel = 1,
            KeyCode::Digit2 => self.channel = 2,
            KeyCode::Digit3 => self.channel = 3,
            KeyCode::Digit4 => self.channel = 4,
            KeyCode::Digit5 => self.mosaic = !self.mosaic,
            KeyCode::Digit6 => self.channel = 5,
            KeyCode::Digit7 => self.channel = 6,
            KeyCode::Digit8 => self.deferred = !self.deferred,
            KeyCode::Digit9 => self.shadows = !self.shadows,
            _ => return false,
        }
        true
    }
}

/// Per-frame inputs of the renderer, owned by the application and lent to `Renderer::draw`
#[derive(Debug, Clone, Copy)]
pub struct RenderState {
    pub toggles: ModeToggles,
    pub camera_to_world: Mat4,
}

impl RenderState {
    pub fn new(camera_to_world: Mat4) -> Self {
        Self {
            toggles: ModeToggles::default(),
            camera_to_world,
        }
    }

    pub fn mode(&self) -> RenderMode {
        self.toggles.mode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn after(keys: &[KeyCode]) -> RenderMode {
        let mut toggles = ModeToggles::default();
        for key in keys {
            toggles.on_key_released(*key);
        }
        toggles.mode()
    }

    #[test]
    fn starts_in_regular_mode_without_shadows() {
        assert_eq!(after(&[]), RenderMode::Regular { shadows: false });
        assert_eq!(after(&[KeyCode::Digit9]), RenderMode::Regular { shadows: true });
    }

    #[test]
    fn channel_keys_select_debug_and_visualisations() {
        assert_eq!(after(&[KeyCode::Digit3]), RenderMode::DebugChannel(3));
        assert_eq!(after(&[KeyCode::Digit6]), RenderMode::OverdrawVis);
        assert_eq!(after(&[KeyCode::Digit7]), RenderMode::OvershadingVis);
        assert_eq!(after(&[KeyCode::Digit7, KeyCode::Digit1]), RenderMode::Regular { shadows: false });
    }

    #[test]
    fn deferred_wins_unless_mosaic_is_on() {
        assert_eq!(after(&[KeyCode::Digit2, KeyCode::Digit8]), RenderMode::DeferredShading);
        assert_eq!(after(&[KeyCode::Digit8, KeyCode::Digit5]), RenderMode::MosaicPostProcess);
        assert_eq!(
            after(&[KeyCode::Digit8, KeyCode::Digit5, KeyCode::Digit5]),
            RenderMode::DeferredShading,
        );
    }

    #[test]
    fn mosaic_overrides_every_channel() {
        assert_eq!(after(&[KeyCode::Digit6, KeyCode::Digit5]), RenderMode::MosaicPostProcess);
        assert_eq!(after(&[KeyCode::Digit9, KeyCode::Digit5]), RenderMode::MosaicPostProcess);
    }

    #[test]
    fn other_keys_are_ignored() {
        let mut toggles = ModeToggles::default();
        assert!(!toggles.on_key_released(KeyCode::KeyW));
        assert_eq!(toggles, ModeToggles::default());
    }
}
