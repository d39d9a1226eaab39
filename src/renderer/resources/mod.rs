//! Owned GPU objects and the scene data they are created from.
//! Everything here frees its Vulkan handles on drop.

pub mod buffer;
pub mod image;
pub mod material;
pub mod memory;
pub mod mesh;
pub mod model;
pub mod shader;
pub mod texture;
pub mod upload;
