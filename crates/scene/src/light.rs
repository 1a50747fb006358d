//! Light definitions and shadow projection math.
//!
//! The structs here are uploaded verbatim, so they are `#[repr(C)]` and
//! `Pod`. Shadow cameras use Vulkan's `[0, 1]` depth range.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Upper bounds baked into the light uniform block.
pub const MAX_DIRECTIONAL_LIGHTS: usize = 4;
pub const MAX_POINT_LIGHTS: usize = 8;

/// Near plane of the point light cube cameras.
pub const POINT_SHADOW_NEAR: f32 = 0.1;

/// Sphere enclosing the shadow casters, used to fit directional shadow
/// cameras.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SceneBounds {
    pub center: Vec3,
    pub radius: f32,
}

impl Default for SceneBounds {
    fn default() -> Self {
        Self {
            center: Vec3::ZERO,
            radius: 10.0,
        }
    }
}

/// A directional light (sun-like).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct DirectionalLight {
    /// Direction the light travels in, normalized
    pub direction: Vec3,
    pub intensity: f32,
    pub color: Vec3,
    pub _pad0: f32,
}

impl DirectionalLight {
    pub fn new(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            direction: direction.normalize_or(Vec3::NEG_Y),
            intensity,
            color,
            _pad0: 0.0,
        }
    }

    /// Orthographic shadow camera looking along the light at the bounds
    /// center, covering the whole bounding sphere.
    pub fn view_projection(&self, bounds: &SceneBounds) -> Mat4 {
        let radius = bounds.radius.max(f32::EPSILON);
        let direction = self.direction.normalize_or(Vec3::NEG_Y);
        let eye = bounds.center - direction * radius * 2.0;
        let view = Mat4::look_at_rh(eye, bounds.center, stable_up(direction));
        let projection = Mat4::orthographic_rh(-radius, radius, -radius, radius, radius, radius * 3.0);
        projection * view
    }
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self::new(Vec3::NEG_Y, Vec3::ONE, 1.0)
    }
}

/// A point light (omnidirectional), shadowed through six cube faces.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct PointLight {
    pub position: Vec3,
    /// Attenuation radius, also the far plane of the shadow cube
    pub radius: f32,
    pub color: Vec3,
    pub intensity: f32,
}

impl PointLight {
    pub fn new(position: Vec3, color: Vec3, intensity: f32, radius: f32) -> Self {
        Self {
            position,
            radius,
            color,
            intensity,
        }
    }

    /// 90° perspective camera for one cube face.
    pub fn face_view_projection(&self, face: CubeFace) -> Mat4 {
        let far = self.radius.max(POINT_SHADOW_NEAR * 2.0);
        let view = Mat4::look_at_rh(
            self.position,
            self.position + face.direction(),
            face.up(),
        );
        let projection =
            Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, POINT_SHADOW_NEAR, far);
        projection * view
    }
}

impl Default for PointLight {
    fn default() -> Self {
        Self::new(Vec3::ZERO, Vec3::ONE, 1.0, 10.0)
    }
}

/// Cube map faces in the conventional layer order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CubeFace {
    PositiveX,
    NegativeX,
    PositiveY,
    NegativeY,
    PositiveZ,
    NegativeZ,
}

impl CubeFace {
    pub const ALL: [CubeFace; 6] = [
        CubeFace::PositiveX,
        CubeFace::NegativeX,
        CubeFace::PositiveY,
        CubeFace::NegativeY,
        CubeFace::PositiveZ,
        CubeFace::NegativeZ,
    ];

    /// Layer index of this face, `0..6`.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn direction(self) -> Vec3 {
        match self {
            CubeFace::PositiveX => Vec3::X,
            CubeFace::NegativeX => Vec3::NEG_X,
            CubeFace::PositiveY => Vec3::Y,
            CubeFace::NegativeY => Vec3::NEG_Y,
            CubeFace::PositiveZ => Vec3::Z,
            CubeFace::NegativeZ => Vec3::NEG_Z,
        }
    }

    pub fn up(self) -> Vec3 {
        match self {
            CubeFace::PositiveY => Vec3::Z,
            CubeFace::NegativeY => Vec3::NEG_Z,
            _ => Vec3::NEG_Y,
        }
    }
}

/// Uniform block holding every light plus the directional shadow matrices.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct LightUniforms {
    pub directional_view_projection: [Mat4; MAX_DIRECTIONAL_LIGHTS],
    pub directional: [DirectionalLight; MAX_DIRECTIONAL_LIGHTS],
    pub point: [PointLight; MAX_POINT_LIGHTS],
    pub directional_count: u32,
    pub point_count: u32,
    pub _pad: [u32; 2],
}

impl LightUniforms {
    /// Packs the first `MAX_*` lights of each kind. Extra lights still cast
    /// shadows but are not shaded.
    pub fn pack(
        directional: &[DirectionalLight],
        point: &[PointLight],
        bounds: &SceneBounds,
    ) -> Self {
        let mut uniforms = Self::zeroed();
        for (i, light) in directional.iter().take(MAX_DIRECTIONAL_LIGHTS).enumerate() {
            uniforms.directional[i] = *light;
            uniforms.directional_view_projection[i] = light.view_projection(bounds);
        }
        for (i, light) in point.iter().take(MAX_POINT_LIGHTS).enumerate() {
            uniforms.point[i] = *light;
        }
        uniforms.directional_count = directional.len().min(MAX_DIRECTIONAL_LIGHTS) as u32;
        uniforms.point_count = point.len().min(MAX_POINT_LIGHTS) as u32;
        uniforms
    }
}

fn stable_up(direction: Vec3) -> Vec3 {
    if direction.cross(Vec3::Y).length_squared() < 1e-6 {
        Vec3::Z
    } else {
        Vec3::Y
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    fn project(m: Mat4, p: Vec3) -> Vec3 {
        let clip = m * Vec4::new(p.x, p.y, p.z, 1.0);
        clip.truncate() / clip.w
    }

    fn inside_ndc(p: Vec3) -> bool {
        p.x.abs() <= 1.0 && p.y.abs() <= 1.0 && (0.0..=1.0).contains(&p.z)
    }

    #[test]
    fn test_gpu_struct_sizes() {
        assert_eq!(std::mem::size_of::<DirectionalLight>(), 32);
        assert_eq!(std::mem::size_of::<PointLight>(), 32);
        assert_eq!(std::mem::size_of::<LightUniforms>() % 16, 0);
    }

    #[test]
    fn test_directional_shadow_covers_bounds() {
        let light = DirectionalLight::new(Vec3::new(-1.0, -1.0, 0.0), Vec3::ONE, 1.0);
        let bounds = SceneBounds {
            center: Vec3::new(2.0, 0.0, 0.0),
            radius: 5.0,
        };
        let vp = light.view_projection(&bounds);

        let center = project(vp, bounds.center);
        assert!(center.x.abs() < 1e-4 && center.y.abs() < 1e-4);
        assert!(inside_ndc(center));
        assert!(inside_ndc(project(vp, bounds.center + Vec3::new(0.0, 0.0, 4.9))));
    }

    #[test]
    fn test_straight_down_light_has_valid_view() {
        let light = DirectionalLight::default();
        let vp = light.view_projection(&SceneBounds::default());
        assert!(vp.is_finite());
    }

    #[test]
    fn test_point_faces_see_their_direction() {
        let light = PointLight::new(Vec3::new(1.0, 2.0, 3.0), Vec3::ONE, 1.0, 20.0);
        for face in CubeFace::ALL {
            let vp = light.face_view_projection(face);
            let target = light.position + face.direction() * 5.0;
            let ndc = project(vp, target);
            assert!(inside_ndc(ndc), "{face:?} -> {ndc:?}");
            assert!(ndc.x.abs() < 1e-4 && ndc.y.abs() < 1e-4);

            // The opposite direction is behind the camera
            let behind = light.position - face.direction() * 5.0;
            let clip = vp * Vec4::new(behind.x, behind.y, behind.z, 1.0);
            assert!(clip.w < 0.0);
        }
    }

    #[test]
    fn test_cube_face_order() {
        assert_eq!(CubeFace::ALL.len(), 6);
        for (i, face) in CubeFace::ALL.iter().enumerate() {
            assert_eq!(face.index(), i);
            assert_eq!(CubeFace::from_index(i), Some(*face));
        }
        assert_eq!(CubeFace::from_index(6), None);
    }

    #[test]
    fn test_pack_truncates_and_counts() {
        let directional = vec![DirectionalLight::default(); MAX_DIRECTIONAL_LIGHTS + 2];
        let point = vec![PointLight::default(); 3];
        let uniforms = LightUniforms::pack(&directional, &point, &SceneBounds::default());
        assert_eq!(uniforms.directional_count as usize, MAX_DIRECTIONAL_LIGHTS);
        assert_eq!(uniforms.point_count, 3);
        assert_eq!(bytemuck::bytes_of(&uniforms).len(), std::mem::size_of::<LightUniforms>());
    }
}
