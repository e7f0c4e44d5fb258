//! View frustum tests and texture-space matrices shared by culling and shadow code.

use glam::{Mat4, Vec3, Vec4};
use render_api::Aabb;

/// Six planes (normal.xyz, d) pointing inwards, extracted from a view-projection matrix with a
/// 0..1 depth range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    planes: [Vec4; 6],
}

impl Frustum {
    pub fn from_view_projection(m: &Mat4) -> Self {
        let (r0, r1, r2, r3) = (m.row(0), m.row(1), m.row(2), m.row(3));
        let mut planes = [r3 + r0, r3 - r0, r3 + r1, r3 - r1, r2, r3 - r2];
        for p in planes.iter_mut() {
            let len = p.truncate().length();
            if len > 0.0 {
                *p /= len;
            }
        }
        Self { planes }
    }

    pub fn contains_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.planes.iter().all(|p| p.truncate().dot(center) + p.w >= -radius)
    }

    /// Conservative box test: false only when the box is fully outside one plane.
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        self.planes.iter().all(|p| {
            let n = p.truncate();
            let positive = Vec3::select(n.cmpge(Vec3::ZERO), aabb.max, aabb.min);
            n.dot(positive) + p.w >= 0.0
        })
    }
}

/// Maps clip space xy [-1, 1] into the normalized texture rectangle `rect` (x, y, w, h), with
/// texture v growing downwards. Depth passes through.
pub fn viewport_matrix(rect: Vec4) -> Mat4 {
    let (x, y, w, h) = (rect.x, rect.y, rect.z, rect.w);
    Mat4::from_cols(
        Vec4::new(w * 0.5, 0.0, 0.0, 0.0),
        Vec4::new(0.0, -h * 0.5, 0.0, 0.0),
        Vec4::new(0.0, 0.0, 1.0, 0.0),
        Vec4::new(x + w * 0.5, y + h * 0.5, 0.0, 1.0),
    )
}

/// Clip space to full-texture coordinates.
pub fn scale_bias_matrix() -> Mat4 {
    viewport_matrix(Vec4::new(0.0, 0.0, 1.0, 1.0))
}

pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn camera_frustum() -> Frustum {
        let proj = Mat4::perspective_rh(60f32.to_radians(), 1.0, 0.1, 100.0);
        let view = Mat4::look_at_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
        Frustum::from_view_projection(&(proj * view))
    }

    #[test]
    fn sphere_in_front_is_visible() {
        let f = camera_frustum();
        assert!(f.contains_sphere(Vec3::new(0.0, 0.0, -10.0), 1.0));
        assert!(!f.contains_sphere(Vec3::new(0.0, 0.0, 10.0), 1.0));
        assert!(f.contains_sphere(Vec3::new(0.0, 0.0, 0.5), 1.0));
        assert!(!f.contains_sphere(Vec3::new(0.0, 0.0, -200.0), 1.0));
    }

    #[test]
    fn boxes_behind_are_culled() {
        let f = camera_frustum();
        let front = Aabb::from_center_half_extents(Vec3::new(0.0, 0.0, -5.0), Vec3::ONE);
        let behind = Aabb::from_center_half_extents(Vec3::new(0.0, 0.0, 5.0), Vec3::ONE);
        assert!(f.intersects_aabb(&front));
        assert!(!f.intersects_aabb(&behind));
    }

    #[test]
    fn viewport_maps_clip_corners() {
        let m = viewport_matrix(Vec4::new(0.5, 0.25, 0.25, 0.5));
        let top_left = m * Vec4::new(-1.0, 1.0, 0.3, 1.0);
        assert_abs_diff_eq!(top_left.x, 0.5);
        assert_abs_diff_eq!(top_left.y, 0.25);
        assert_abs_diff_eq!(top_left.z, 0.3);
        let bottom_right = m * Vec4::new(1.0, -1.0, 0.0, 1.0);
        assert_abs_diff_eq!(bottom_right.x, 0.75);
        assert_abs_diff_eq!(bottom_right.y, 0.75);
    }
}
