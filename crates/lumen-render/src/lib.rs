// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::{fmt, str::FromStr};

mod assets;
mod mesh;
mod none;
mod texture;

pub use assets::{DecodedImage, ImageError, ShaderSource, FRAGMENT_SHADER, VERTEX_SHADER};
pub use mesh::{Mesh, Vertex};
pub use none::NoneContext;
pub use texture::{
    ImageAspects, MemoryUsage, SampleCount, TextureDesc, TextureError, TextureFlags,
    TextureFormat, TextureUsage,
};

slotmap::new_key_type! {
    pub struct VertexBufferId;
    pub struct IndexBufferId;
    pub struct TextureId;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Minimized windows report a zero dimension.
    pub fn is_zero(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BackendKind {
    None,
    #[default]
    Vulkan,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::None => "none",
            BackendKind::Vulkan => "vulkan",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(BackendKind::None),
            "vulkan" | "vk" => Ok(BackendKind::Vulkan),
            other => Err(anyhow::anyhow!("unknown backend '{other}' (expected none | vulkan)")),
        }
    }
}

/// What a call to [`GfxContext::update`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    /// A frame was submitted and queued for presentation.
    Presented,
    /// The swapchain was stale and got rebuilt; nothing was submitted.
    Recreated,
    /// The framebuffer is zero-sized; nothing was submitted.
    Minimized,
    /// The backend draws nothing.
    Idle,
}

/// The window collaborator: native handles plus the current framebuffer size
/// in physical pixels.
pub trait WindowHost: HasWindowHandle + HasDisplayHandle {
    fn framebuffer_size(&self) -> RenderSize;
}

/// Everything a backend needs at startup besides the window.
pub struct GfxInit<'a> {
    pub app_name: &'a str,
    pub validation: bool,
    pub shaders: &'a dyn ShaderSource,
    pub mesh: &'a Mesh,
    pub texture: &'a DecodedImage,
}

pub trait GfxContext {
    fn init(host: &dyn WindowHost, init: &GfxInit<'_>) -> Result<Self>
    where
        Self: Sized;

    /// Draw and present one frame.
    fn update(&mut self) -> Result<FrameStatus>;

    fn create_vertex_buffer(&mut self, vertices: &[Vertex]) -> Result<VertexBufferId>;
    fn destroy_vertex_buffer(&mut self, id: VertexBufferId);

    fn create_index_buffer(&mut self, indices: &[u16]) -> Result<IndexBufferId>;
    fn destroy_index_buffer(&mut self, id: IndexBufferId);

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId>;
    fn destroy_texture(&mut self, id: TextureId);

    /// Force a swapchain rebuild at the given framebuffer size. A zero size
    /// defers the rebuild until a nonzero size arrives.
    fn resize_framebuffer(&mut self, size: RenderSize) -> Result<()>;

    fn backend_kind(&self) -> BackendKind;

    /// Drain the GPU and destroy everything. Idempotent.
    fn cleanup(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_kind_parses_aliases() {
        assert_eq!("vk".parse::<BackendKind>().unwrap(), BackendKind::Vulkan);
        assert_eq!(" Vulkan ".parse::<BackendKind>().unwrap(), BackendKind::Vulkan);
        assert_eq!("none".parse::<BackendKind>().unwrap(), BackendKind::None);
        assert!("d3d12".parse::<BackendKind>().is_err());
        assert_eq!(BackendKind::default().to_string(), "vulkan");
    }

    #[test]
    fn zero_dimension_means_minimized() {
        assert!(RenderSize::new(0, 600).is_zero());
        assert!(RenderSize::new(800, 0).is_zero());
        assert!(!RenderSize::new(1, 1).is_zero());
    }
}
