use std::path::PathBuf;

/// Contains configuration options for the renderer like vsync, asset locations, and other settings
pub struct RenderConfig {
    /// FIFO presentation when set, otherwise MAILBOX when the surface offers it
    pub vsync: bool,
    pub model_path: PathBuf,
    /// Directory holding the precompiled `{name}.vert.spv`/`{name}.frag.spv` pairs
    pub shader_dir: PathBuf,
    pub shadow_map_size: u32,
    pub clear_color: [f32; 4],
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            vsync: false,
            model_path: PathBuf::from("assets/suntemple.sunmesh"),
            shader_dir: PathBuf::from("assets/shaders"),
            shadow_map_size: 2048,
            clear_color: [0.1, 0.1, 0.1, 1.0],
        }
    }
}
