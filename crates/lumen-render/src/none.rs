// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use slotmap::SlotMap;
use tracing::{info, warn};

use crate::{
    BackendKind, FrameStatus, GfxContext, GfxInit, IndexBufferId, RenderSize, TextureDesc,
    TextureId, Vertex, VertexBufferId, WindowHost,
};

/// Backend that accepts every call and draws nothing. Handles it returns are
/// real keys so callers can exercise create/destroy pairs.
#[derive(Default)]
pub struct NoneContext {
    vertex_buffers: SlotMap<VertexBufferId, usize>,
    index_buffers: SlotMap<IndexBufferId, usize>,
    textures: SlotMap<TextureId, TextureDesc>,
    framebuffer: RenderSize,
}

impl NoneContext {
    pub fn live_resources(&self) -> usize {
        self.vertex_buffers.len() + self.index_buffers.len() + self.textures.len()
    }
}

impl GfxContext for NoneContext {
    fn init(host: &dyn WindowHost, init: &GfxInit<'_>) -> Result<Self> {
        let framebuffer = host.framebuffer_size();
        info!(
            "none backend for '{}' ({}x{})",
            init.app_name, framebuffer.width, framebuffer.height
        );
        Ok(Self {
            framebuffer,
            ..Default::default()
        })
    }

    fn update(&mut self) -> Result<FrameStatus> {
        if self.framebuffer.is_zero() {
            return Ok(FrameStatus::Minimized);
        }
        Ok(FrameStatus::Idle)
    }

    fn create_vertex_buffer(&mut self, vertices: &[Vertex]) -> Result<VertexBufferId> {
        Ok(self.vertex_buffers.insert(vertices.len()))
    }

    fn destroy_vertex_buffer(&mut self, id: VertexBufferId) {
        if self.vertex_buffers.remove(id).is_none() {
            warn!("none: destroy of unknown vertex buffer {id:?}");
        }
    }

    fn create_index_buffer(&mut self, indices: &[u16]) -> Result<IndexBufferId> {
        Ok(self.index_buffers.insert(indices.len()))
    }

    fn destroy_index_buffer(&mut self, id: IndexBufferId) {
        if self.index_buffers.remove(id).is_none() {
            warn!("none: destroy of unknown index buffer {id:?}");
        }
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId> {
        desc.validate()?;
        Ok(self.textures.insert(*desc))
    }

    fn destroy_texture(&mut self, id: TextureId) {
        if self.textures.remove(id).is_none() {
            warn!("none: destroy of unknown texture {id:?}");
        }
    }

    fn resize_framebuffer(&mut self, size: RenderSize) -> Result<()> {
        self.framebuffer = size;
        Ok(())
    }

    fn backend_kind(&self) -> BackendKind {
        BackendKind::None
    }

    fn cleanup(&mut self) {
        self.vertex_buffers.clear();
        self.index_buffers.clear();
        self.textures.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Mesh, TextureFlags, TextureFormat};

    #[test]
    fn hands_out_and_reclaims_handles() {
        let mut ctx = NoneContext::default();
        let mesh = Mesh::stacked_quads();
        let vb = ctx.create_vertex_buffer(&mesh.vertices).unwrap();
        let ib = ctx.create_index_buffer(&mesh.indices).unwrap();
        let tex = ctx
            .create_texture(&TextureDesc::sampled_rgba(16, 16))
            .unwrap();
        assert_eq!(ctx.live_resources(), 3);

        ctx.destroy_vertex_buffer(vb);
        ctx.destroy_index_buffer(ib);
        ctx.destroy_texture(tex);
        // stale handle is ignored
        ctx.destroy_texture(tex);
        assert_eq!(ctx.live_resources(), 0);
        assert_eq!(ctx.backend_kind(), BackendKind::None);
    }

    #[test]
    fn stale_keys_never_alias_new_resources() {
        let mut ctx = NoneContext::default();
        let mesh = Mesh::stacked_quads();
        let desc = TextureDesc::sampled_rgba(8, 8);

        let vb = ctx.create_vertex_buffer(&mesh.vertices).unwrap();
        let ib = ctx.create_index_buffer(&mesh.indices).unwrap();
        let tex = ctx.create_texture(&desc).unwrap();
        ctx.destroy_vertex_buffer(vb);
        ctx.destroy_index_buffer(ib);
        ctx.destroy_texture(tex);

        // slots are reused with a bumped version
        let vb2 = ctx.create_vertex_buffer(&mesh.vertices).unwrap();
        let ib2 = ctx.create_index_buffer(&mesh.indices).unwrap();
        let tex2 = ctx.create_texture(&desc).unwrap();
        assert_ne!(vb, vb2);
        assert_ne!(ib, ib2);
        assert_ne!(tex, tex2);

        ctx.destroy_vertex_buffer(vb);
        ctx.destroy_index_buffer(ib);
        ctx.destroy_texture(tex);
        assert_eq!(ctx.live_resources(), 3);

        ctx.destroy_vertex_buffer(vb2);
        ctx.destroy_index_buffer(ib2);
        ctx.destroy_texture(tex2);
        assert_eq!(ctx.live_resources(), 0);
    }

    #[test]
    fn invalid_texture_is_rejected() {
        let mut ctx = NoneContext::default();
        let mut desc = TextureDesc::new(8, 8, TextureFormat::R8G8B8A8Srgb, TextureFlags::SAMPLED)
            .unwrap();
        desc.width = 0;
        assert!(ctx.create_texture(&desc).is_err());
    }

    #[test]
    fn minimized_until_resized() {
        let mut ctx = NoneContext::default();
        assert_eq!(ctx.update().unwrap(), FrameStatus::Minimized);
        ctx.resize_framebuffer(RenderSize::new(640, 480)).unwrap();
        assert_eq!(ctx.update().unwrap(), FrameStatus::Idle);
        ctx.cleanup();
        ctx.cleanup();
    }
}
