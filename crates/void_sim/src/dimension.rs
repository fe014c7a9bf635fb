//! Dimension markers shared by the 2D and 3D simulations
//!
//! Backend-independent descriptors ([`crate::ShapeDefinition`],
//! [`crate::BodyDefinition`], event records) are generic over a
//! [`Dimension`] so both worlds speak the same vocabulary with their own
//! engine math types.

use glam::{Quat, Vec2, Vec3};
use std::fmt::Debug;

/// Engine-side math vocabulary of one simulation dimension
pub trait Dimension: Debug + Clone + Copy + PartialEq + Default + Send + Sync + 'static {
    /// Position / direction / extent vector
    type Vector: Debug + Clone + Copy + PartialEq + Send + Sync + 'static;
    /// Orientation (angle in 2D, unit quaternion in 3D)
    type Rotation: Debug + Clone + Copy + PartialEq + Send + Sync + 'static;
    /// Angular velocity (scalar in 2D, axis-rate vector in 3D)
    type Angular: Debug + Clone + Copy + PartialEq + Send + Sync + 'static;

    /// Human readable name used in log lines
    const NAME: &'static str;

    fn zero() -> Self::Vector;
    fn identity() -> Self::Rotation;
    fn zero_angular() -> Self::Angular;

    fn is_finite(v: Self::Vector) -> bool;
    fn rotation_is_finite(r: Self::Rotation) -> bool;
    fn angular_is_finite(w: Self::Angular) -> bool;
    fn length(v: Self::Vector) -> f32;
    fn distance(a: Self::Vector, b: Self::Vector) -> f32;
    /// Smallest component, used to reject flat or inverted boxes
    fn min_element(v: Self::Vector) -> f32;
}

/// Planar simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Dim2;

/// Spatial simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Dim3;

impl Dimension for Dim2 {
    type Vector = Vec2;
    type Rotation = f32;
    type Angular = f32;

    const NAME: &'static str = "2d";

    fn zero() -> Vec2 {
        Vec2::ZERO
    }

    fn identity() -> f32 {
        0.0
    }

    fn zero_angular() -> f32 {
        0.0
    }

    fn is_finite(v: Vec2) -> bool {
        v.is_finite()
    }

    fn rotation_is_finite(angle: f32) -> bool {
        angle.is_finite()
    }

    fn angular_is_finite(w: f32) -> bool {
        w.is_finite()
    }

    fn length(v: Vec2) -> f32 {
        v.length()
    }

    fn distance(a: Vec2, b: Vec2) -> f32 {
        a.distance(b)
    }

    fn min_element(v: Vec2) -> f32 {
        v.min_element()
    }
}

impl Dimension for Dim3 {
    type Vector = Vec3;
    type Rotation = Quat;
    type Angular = Vec3;

    const NAME: &'static str = "3d";

    fn zero() -> Vec3 {
        Vec3::ZERO
    }

    fn identity() -> Quat {
        Quat::IDENTITY
    }

    fn zero_angular() -> Vec3 {
        Vec3::ZERO
    }

    fn is_finite(v: Vec3) -> bool {
        v.is_finite()
    }

    fn rotation_is_finite(q: Quat) -> bool {
        q.is_finite()
    }

    fn angular_is_finite(w: Vec3) -> bool {
        w.is_finite()
    }

    fn length(v: Vec3) -> f32 {
        v.length()
    }

    fn distance(a: Vec3, b: Vec3) -> f32 {
        a.distance(b)
    }

    fn min_element(v: Vec3) -> f32 {
        v.min_element()
    }
}

/// Rigid transform (translation + rotation)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform<D: Dimension> {
    pub translation: D::Vector,
    pub rotation: D::Rotation,
}

impl<D: Dimension> Transform<D> {
    pub fn new(translation: D::Vector, rotation: D::Rotation) -> Self {
        Self { translation, rotation }
    }

    pub fn from_translation(translation: D::Vector) -> Self {
        Self::new(translation, D::identity())
    }

    pub fn identity() -> Self {
        Self::new(D::zero(), D::identity())
    }
}

impl<D: Dimension> Default for Transform<D> {
    fn default() -> Self {
        Self::identity()
    }
}

/// 2D transform
pub type Transform2 = Transform<Dim2>;
/// 3D transform
pub type Transform3 = Transform<Dim3>;
