//! Body handles, definitions and cached state

use crate::dimension::{Dimension, Transform};
use crate::layers::ObjectLayer;
use crate::material::Material;
use serde::{Deserialize, Serialize};

/// Opaque handle to a body owned by a simulation.
///
/// Generational: once the body is destroyed (or its simulation disposed)
/// every copy of the handle is stale, even if the slot is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BodyHandle {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl BodyHandle {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Pack into 64 bits (generation high, index low)
    pub fn to_bits(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    pub fn from_bits(bits: u64) -> Self {
        Self {
            index: bits as u32,
            generation: (bits >> 32) as u32,
        }
    }

    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

/// Type of body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BodyType {
    /// Never moves, infinite mass
    Static,
    /// Fully simulated
    #[default]
    Dynamic,
    /// Moved by its velocity only, pushes dynamic bodies
    Kinematic,
}

/// Behaviour switches of a body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyFlags {
    /// Never rotates
    pub fixed_rotation: bool,
    /// Continuous collision against other moving bodies
    pub bullet: bool,
    /// Participates in the simulation at all
    pub enabled: bool,
    /// Skip the per-step angular speed clamp
    pub allow_fast_rotation: bool,
    /// May fall asleep when at rest
    pub enable_sleep: bool,
}

impl Default for BodyFlags {
    fn default() -> Self {
        Self {
            fixed_rotation: false,
            bullet: false,
            enabled: true,
            allow_fast_rotation: false,
            enable_sleep: true,
        }
    }
}

/// Declarative description of a body, independent of the backend
#[derive(Debug, Clone, PartialEq)]
pub struct BodyDefinition<D: Dimension> {
    pub body_type: BodyType,
    pub position: D::Vector,
    pub rotation: D::Rotation,
    pub linear_velocity: D::Vector,
    pub angular_velocity: D::Angular,
    pub linear_damping: f32,
    pub angular_damping: f32,
    /// 0 = no gravity, 1 = normal
    pub gravity_scale: f32,
    /// Linear speed below which the body is considered at rest (m/s)
    pub sleep_threshold: f32,
    pub flags: BodyFlags,
    /// Must be registered in the simulation's layer table
    pub layer: ObjectLayer,
    /// Detects overlaps without collision response
    pub is_sensor: bool,
    pub material: Material,
    /// Report begin/end touch events
    pub enable_contact_events: bool,
    /// Report hit events above the configured impulse threshold
    pub enable_hit_events: bool,
    /// Caller data (entity id, etc.)
    pub user_data: u64,
}

impl<D: Dimension> Default for BodyDefinition<D> {
    fn default() -> Self {
        Self {
            body_type: BodyType::Dynamic,
            position: D::zero(),
            rotation: D::identity(),
            linear_velocity: D::zero(),
            angular_velocity: D::zero_angular(),
            linear_damping: 0.0,
            angular_damping: 0.0,
            gravity_scale: 1.0,
            sleep_threshold: 0.05,
            flags: BodyFlags::default(),
            layer: ObjectLayer::MOVING,
            is_sensor: false,
            material: Material::default(),
            enable_contact_events: true,
            enable_hit_events: false,
            user_data: 0,
        }
    }
}

impl<D: Dimension> BodyDefinition<D> {
    /// Static body on the `NonMoving` layer
    pub fn fixed() -> Self {
        Self {
            body_type: BodyType::Static,
            layer: ObjectLayer::NON_MOVING,
            ..Default::default()
        }
    }

    /// Dynamic body on the `Moving` layer
    pub fn dynamic() -> Self {
        Self::default()
    }

    /// Kinematic body on the `Moving` layer
    pub fn kinematic() -> Self {
        Self {
            body_type: BodyType::Kinematic,
            ..Default::default()
        }
    }

    pub fn with_position(mut self, position: D::Vector) -> Self {
        self.position = position;
        self
    }

    pub fn with_rotation(mut self, rotation: D::Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_linear_velocity(mut self, velocity: D::Vector) -> Self {
        self.linear_velocity = velocity;
        self
    }

    pub fn with_angular_velocity(mut self, velocity: D::Angular) -> Self {
        self.angular_velocity = velocity;
        self
    }

    pub fn with_damping(mut self, linear: f32, angular: f32) -> Self {
        self.linear_damping = linear.max(0.0);
        self.angular_damping = angular.max(0.0);
        self
    }

    pub fn with_gravity_scale(mut self, scale: f32) -> Self {
        self.gravity_scale = scale;
        self
    }

    pub fn with_sleep_threshold(mut self, threshold: f32) -> Self {
        self.sleep_threshold = threshold.max(0.0);
        self
    }

    pub fn with_flags(mut self, flags: BodyFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_layer(mut self, layer: ObjectLayer) -> Self {
        self.layer = layer;
        self
    }

    /// Turn the body into a sensor
    pub fn sensor(mut self) -> Self {
        self.is_sensor = true;
        self
    }

    pub fn with_material(mut self, material: Material) -> Self {
        self.material = material;
        self
    }

    pub fn with_hit_events(mut self, enabled: bool) -> Self {
        self.enable_hit_events = enabled;
        self
    }

    pub fn with_contact_events(mut self, enabled: bool) -> Self {
        self.enable_contact_events = enabled;
        self
    }

    pub fn with_user_data(mut self, data: u64) -> Self {
        self.user_data = data;
        self
    }

    pub fn initial_transform(&self) -> Transform<D> {
        Transform::new(self.position, self.rotation)
    }
}

/// Read-only snapshot of a body, refreshed after every step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyState<D: Dimension> {
    pub transform: Transform<D>,
    pub linear_velocity: D::Vector,
    pub angular_velocity: D::Angular,
    pub awake: bool,
}

impl<D: Dimension> BodyState<D> {
    pub fn position(&self) -> D::Vector {
        self.transform.translation
    }

    pub fn rotation(&self) -> D::Rotation {
        self.transform.rotation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimension::{Dim2, Dim3};
    use glam::{Vec2, Vec3};

    #[test]
    fn test_handle_bits() {
        let handle = BodyHandle::new(17, 4);
        assert_eq!(BodyHandle::from_bits(handle.to_bits()), handle);
        assert_ne!(BodyHandle::new(17, 5).to_bits(), handle.to_bits());
    }

    #[test]
    fn test_definition_defaults() {
        let fixed = BodyDefinition::<Dim3>::fixed();
        assert_eq!(fixed.body_type, BodyType::Static);
        assert_eq!(fixed.layer, ObjectLayer::NON_MOVING);

        let dynamic = BodyDefinition::<Dim2>::dynamic().with_position(Vec2::new(1.0, 2.0));
        assert_eq!(dynamic.layer, ObjectLayer::MOVING);
        assert!(dynamic.flags.enabled && dynamic.flags.enable_sleep);
        assert_eq!(dynamic.initial_transform().translation, Vec2::new(1.0, 2.0));
    }

    #[test]
    fn test_damping_clamped() {
        let def = BodyDefinition::<Dim3>::dynamic()
            .with_damping(-1.0, 0.5)
            .with_linear_velocity(Vec3::X);
        assert_eq!(def.linear_damping, 0.0);
        assert_eq!(def.angular_damping, 0.5);
    }
}
