// SPDX-License-Identifier: CEPL-1.0
//! Camera math feeding the per-image uniform buffer.
//!
//! Depth convention: the projection is reversed and infinite-far (near plane
//! maps to depth 1, infinity to 0). It is paired with an inverted viewport depth
//! range and a `LESS` compare in the Vulkan backend; the three only make sense
//! together and must be changed as one unit.

pub use glam::{Mat4, Vec3, Vec4};

use bytemuck::{Pod, Zeroable};

pub const FOVY_DEGREES: f32 = 45.0;
pub const NEAR_PLANE: f32 = 0.1;

/// Eye position of the orbiting camera after `t` seconds.
pub fn orbit_eye(t: f32) -> Vec3 {
    Vec3::new((t * 0.5).sin() * 1.5, (t * 0.3).sin(), -2.0)
}

/// Right-handed look-at from the orbit eye to the origin, +Y up.
pub fn orbit_view(t: f32) -> Mat4 {
    Mat4::look_at_rh(orbit_eye(t), Vec3::ZERO, Vec3::Y)
}

/// Reversed, infinite-far perspective.
///
/// Columns: `[f/aspect,0,0,0]`, `[0,f,0,0]`, `[0,0,0,-1]`, `[0,0,near,0]`
/// with `f = 1 / tan(fovy / 2)`.
pub fn reversed_infinite_perspective(fovy_radians: f32, aspect: f32, near: f32) -> Mat4 {
    Mat4::perspective_infinite_reverse_rh(fovy_radians, aspect, near)
}

/// Width over height; a degenerate height yields 1.0 so the matrix stays finite.
pub fn aspect_ratio(width: u32, height: u32) -> f32 {
    if height == 0 {
        1.0
    } else {
        width as f32 / height as f32
    }
}

/// Matches `layout(binding = 0) uniform UniformBufferObject` in `simple.vert`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct UniformBufferObject {
    pub model: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
}

impl UniformBufferObject {
    /// Transforms for `elapsed` seconds since the scheduler's clock start.
    pub fn orbiting(elapsed: f32, width: u32, height: u32) -> Self {
        let proj = reversed_infinite_perspective(
            FOVY_DEGREES.to_radians(),
            aspect_ratio(width, height),
            NEAR_PLANE,
        );
        Self {
            model: Mat4::IDENTITY.to_cols_array_2d(),
            view: orbit_view(elapsed).to_cols_array_2d(),
            proj: proj.to_cols_array_2d(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn projection_matches_explicit_columns() {
        let fovy = 45f32.to_radians();
        let aspect = 800.0 / 600.0;
        let f = 1.0 / (fovy * 0.5).tan();
        let m = reversed_infinite_perspective(fovy, aspect, 0.1).to_cols_array_2d();

        let want = [
            [f / aspect, 0.0, 0.0, 0.0],
            [0.0, f, 0.0, 0.0],
            [0.0, 0.0, 0.0, -1.0],
            [0.0, 0.0, 0.1, 0.0],
        ];
        for c in 0..4 {
            for r in 0..4 {
                assert!(close(m[c][r], want[c][r]), "col {c} row {r}: {} vs {}", m[c][r], want[c][r]);
            }
        }
    }

    #[test]
    fn near_plane_maps_to_depth_one() {
        let p = reversed_infinite_perspective(FOVY_DEGREES.to_radians(), 1.0, NEAR_PLANE);
        let clip = p * Vec4::new(0.0, 0.0, -NEAR_PLANE, 1.0);
        assert!(close(clip.z / clip.w, 1.0));

        let far = p * Vec4::new(0.0, 0.0, -1.0e6, 1.0);
        assert!(far.z / far.w < 1e-6);
    }

    #[test]
    fn orbit_starts_behind_origin() {
        assert_eq!(orbit_eye(0.0), Vec3::new(0.0, 0.0, -2.0));
        let view = orbit_view(0.0);
        // origin sits 2 units in front of the camera
        let o = view.transform_point3(Vec3::ZERO);
        assert!(close(o.z, -2.0));
    }

    #[test]
    fn ubo_layout_is_three_mat4() {
        assert_eq!(std::mem::size_of::<UniformBufferObject>(), 192);
        let ubo = UniformBufferObject::orbiting(1.25, 1280, 720);
        assert_eq!(ubo.model, Mat4::IDENTITY.to_cols_array_2d());
        assert_eq!(ubo.as_bytes().len(), 192);
    }

    #[test]
    fn zero_height_aspect_stays_finite() {
        assert_eq!(aspect_ratio(640, 0), 1.0);
        assert!(close(aspect_ratio(1920, 1080), 16.0 / 9.0));
    }
}
