// SPDX-License-Identifier: CEPL-1.0
use bytemuck::{Pod, Zeroable};

/// Interleaved vertex: location 0 = pos, 1 = color, 2 = tex_coord.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub color: [f32; 3],
    pub tex_coord: [f32; 2],
}

impl Vertex {
    pub const fn new(pos: [f32; 3], color: [f32; 3], tex_coord: [f32; 2]) -> Self {
        Self {
            pos,
            color,
            tex_coord,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u16>,
}

const STACKED_QUADS: [Vertex; 8] = [
    Vertex::new([-0.5, -0.5, 0.0], [1.0, 0.0, 0.0], [1.0, 0.0]),
    Vertex::new([0.5, -0.5, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0]),
    Vertex::new([0.5, 0.5, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0]),
    Vertex::new([-0.5, 0.5, 0.0], [1.0, 1.0, 1.0], [1.0, 1.0]),
    Vertex::new([-0.5, -1.0, 0.5], [1.0, 0.0, 0.0], [1.0, 0.0]),
    Vertex::new([0.5, -1.0, 0.5], [0.0, 1.0, 0.0], [0.0, 0.0]),
    Vertex::new([0.5, 0.0, 0.5], [0.0, 0.0, 1.0], [0.0, 1.0]),
    Vertex::new([-0.5, 0.0, 0.5], [1.0, 1.0, 1.0], [1.0, 1.0]),
];

const STACKED_QUAD_INDICES: [u16; 12] = [0, 1, 2, 2, 3, 0, 4, 5, 6, 6, 7, 4];

impl Mesh {
    /// Two textured quads, the second one offset down and back.
    pub fn stacked_quads() -> Self {
        Self {
            vertices: STACKED_QUADS.to_vec(),
            indices: STACKED_QUAD_INDICES.to_vec(),
        }
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    /// True when every index addresses an existing vertex.
    pub fn indices_in_range(&self) -> bool {
        self.indices
            .iter()
            .all(|&i| (i as usize) < self.vertices.len())
    }
}
