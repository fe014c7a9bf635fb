//! Bridges between engine math (`glam`) and backend math (`nalgebra`)

use crate::dimension::{Transform2, Transform3};
use glam::{Mat4, Quat, Vec2, Vec3};
use nalgebra::{
    Isometry2, Isometry3, Matrix4, Point2, Point3, Quaternion, Translation3, UnitQuaternion,
    Vector2, Vector3,
};

/// Engine value -> backend value
pub trait ToBackend {
    type Backend;
    fn to_backend(self) -> Self::Backend;
}

/// Backend value -> engine value
pub trait ToEngine {
    type Engine;
    fn to_engine(self) -> Self::Engine;
}

impl ToBackend for Vec2 {
    type Backend = Vector2<f32>;

    #[inline]
    fn to_backend(self) -> Vector2<f32> {
        Vector2::new(self.x, self.y)
    }
}

impl ToEngine for Vector2<f32> {
    type Engine = Vec2;

    #[inline]
    fn to_engine(self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }
}

impl ToEngine for Point2<f32> {
    type Engine = Vec2;

    #[inline]
    fn to_engine(self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }
}

impl ToBackend for Vec3 {
    type Backend = Vector3<f32>;

    #[inline]
    fn to_backend(self) -> Vector3<f32> {
        Vector3::new(self.x, self.y, self.z)
    }
}

impl ToEngine for Vector3<f32> {
    type Engine = Vec3;

    #[inline]
    fn to_engine(self) -> Vec3 {
        Vec3::new(self.x, self.y, self.z)
    }
}

impl ToEngine for Point3<f32> {
    type Engine = Vec3;

    #[inline]
    fn to_engine(self) -> Vec3 {
        Vec3::new(self.x, self.y, self.z)
    }
}

impl ToBackend for Quat {
    type Backend = UnitQuaternion<f32>;

    /// Renormalizes, so slightly drifted engine quaternions are accepted.
    #[inline]
    fn to_backend(self) -> UnitQuaternion<f32> {
        UnitQuaternion::new_normalize(Quaternion::new(self.w, self.x, self.y, self.z))
    }
}

impl ToEngine for UnitQuaternion<f32> {
    type Engine = Quat;

    #[inline]
    fn to_engine(self) -> Quat {
        Quat::from_xyzw(self.i, self.j, self.k, self.w)
    }
}

impl ToBackend for Transform2 {
    type Backend = Isometry2<f32>;

    fn to_backend(self) -> Isometry2<f32> {
        Isometry2::new(self.translation.to_backend(), self.rotation)
    }
}

impl ToEngine for Isometry2<f32> {
    type Engine = Transform2;

    fn to_engine(self) -> Transform2 {
        Transform2::new(self.translation.vector.to_engine(), self.rotation.angle())
    }
}

impl ToBackend for Transform3 {
    type Backend = Isometry3<f32>;

    fn to_backend(self) -> Isometry3<f32> {
        Isometry3::from_parts(
            Translation3::from(self.translation.to_backend()),
            self.rotation.to_backend(),
        )
    }
}

impl ToEngine for Isometry3<f32> {
    type Engine = Transform3;

    fn to_engine(self) -> Transform3 {
        Transform3::new(self.translation.vector.to_engine(), self.rotation.to_engine())
    }
}

impl ToBackend for Mat4 {
    type Backend = Matrix4<f32>;

    fn to_backend(self) -> Matrix4<f32> {
        // both column-major
        Matrix4::from_column_slice(&self.to_cols_array())
    }
}

impl ToEngine for Matrix4<f32> {
    type Engine = Mat4;

    fn to_engine(self) -> Mat4 {
        Mat4::from_cols_slice(self.as_slice())
    }
}

#[inline]
pub fn point2(v: Vec2) -> Point2<f32> {
    Point2::new(v.x, v.y)
}

#[inline]
pub fn point3(v: Vec3) -> Point3<f32> {
    Point3::new(v.x, v.y, v.z)
}

/// World matrix of a 3D transform, for handing body poses to rendering
pub fn transform_to_mat4(transform: &Transform3) -> Mat4 {
    Mat4::from_rotation_translation(transform.rotation, transform.translation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_quat_roundtrip_keeps_orientation() {
        let q = Quat::from_rotation_y(0.7) * Quat::from_rotation_x(-0.3);
        let back = q.to_backend().to_engine();
        assert!(back.abs_diff_eq(q, 1e-6) || back.abs_diff_eq(-q, 1e-6));
    }

    #[test]
    fn test_unnormalized_quat_is_normalized() {
        let q = Quat::from_xyzw(0.0, 0.0, 0.0, 2.0);
        let unit = q.to_backend();
        assert_relative_eq!(unit.w, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_isometry3_matches_mat4() {
        let t = Transform3::new(Vec3::new(1.0, 2.0, 3.0), Quat::from_rotation_z(0.5));
        let from_iso = t.to_backend().to_homogeneous().to_engine();
        let direct = transform_to_mat4(&t);
        assert!(from_iso.abs_diff_eq(direct, 1e-5));
        assert!(direct.to_backend().to_engine().abs_diff_eq(direct, 0.0));
    }

    #[test]
    fn test_isometry2_angle() {
        let t = Transform2::new(Vec2::new(-4.0, 0.5), 1.25);
        let iso = t.to_backend();
        let back = iso.to_engine();
        assert_relative_eq!(back.rotation, 1.25, epsilon = 1e-6);
        assert_eq!(back.translation, Vec2::new(-4.0, 0.5));
    }

    #[test]
    fn test_points() {
        assert_eq!(point3(Vec3::X).to_engine(), Vec3::X);
        assert_eq!(point2(Vec2::Y).to_engine(), Vec2::Y);
    }
}
