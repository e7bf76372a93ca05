// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use lumen_render::{
    DecodedImage, GfxContext, IndexBufferId, Mesh, TextureDesc, TextureId, VertexBufferId,
};
use tracing::info;

/// Scene geometry and texture registered through the backend's resource
/// handles. Released before the backend is torn down.
#[derive(Debug)]
pub struct SceneResources {
    pub vertices: VertexBufferId,
    pub indices: IndexBufferId,
    pub texture: TextureId,
}

impl SceneResources {
    pub fn upload(ctx: &mut dyn GfxContext, mesh: &Mesh, image: &DecodedImage) -> Result<Self> {
        let vertices = ctx
            .create_vertex_buffer(&mesh.vertices)
            .context("scene vertex buffer")?;
        let indices = match ctx.create_index_buffer(&mesh.indices) {
            Ok(id) => id,
            Err(e) => {
                ctx.destroy_vertex_buffer(vertices);
                return Err(e.context("scene index buffer"));
            }
        };
        let desc = TextureDesc::sampled_rgba(image.width(), image.height());
        let texture = match ctx.create_texture(&desc) {
            Ok(id) => id,
            Err(e) => {
                ctx.destroy_index_buffer(indices);
                ctx.destroy_vertex_buffer(vertices);
                return Err(e.context("scene texture"));
            }
        };
        info!(
            "scene resources: {} vertices, {} indices, {}x{} texture",
            mesh.vertices.len(),
            mesh.indices.len(),
            image.width(),
            image.height()
        );
        Ok(Self {
            vertices,
            indices,
            texture,
        })
    }

    pub fn release(self, ctx: &mut dyn GfxContext) {
        ctx.destroy_texture(self.texture);
        ctx.destroy_index_buffer(self.indices);
        ctx.destroy_vertex_buffer(self.vertices);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_render::NoneContext;

    #[test]
    fn upload_then_release_leaves_nothing_behind() {
        let mut ctx = NoneContext::default();
        let image = DecodedImage::checkerboard(64, 8);
        let scene = SceneResources::upload(&mut ctx, &Mesh::stacked_quads(), &image).unwrap();
        assert_eq!(ctx.live_resources(), 3);

        scene.release(&mut ctx);
        assert_eq!(ctx.live_resources(), 0);
    }

    #[test]
    fn repeated_uploads_get_distinct_handles() {
        let mut ctx = NoneContext::default();
        let image = DecodedImage::checkerboard(32, 4);
        let mesh = Mesh::stacked_quads();
        let a = SceneResources::upload(&mut ctx, &mesh, &image).unwrap();
        let b = SceneResources::upload(&mut ctx, &mesh, &image).unwrap();
        assert_ne!(a.vertices, b.vertices);
        assert_ne!(a.texture, b.texture);
        assert_eq!(ctx.live_resources(), 6);

        a.release(&mut ctx);
        assert_eq!(ctx.live_resources(), 3);
        b.release(&mut ctx);
        assert_eq!(ctx.live_resources(), 0);
    }
}
