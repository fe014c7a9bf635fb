//! Surface materials

use serde::{Deserialize, Serialize};

/// Surface properties of a body's shape
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Material {
    /// Friction coefficient (0 = frictionless)
    pub friction: f32,
    /// Restitution/bounciness (0 = no bounce, 1 = perfect bounce)
    pub restitution: f32,
    /// Density for mass computation (kg/m³, kg/m² in 2D)
    pub density: f32,
    pub friction_combine: CombineRule,
    pub restitution_combine: CombineRule,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            friction: 0.6,
            restitution: 0.0,
            density: 1.0,
            friction_combine: CombineRule::Average,
            restitution_combine: CombineRule::Average,
        }
    }
}

impl Material {
    pub fn new(friction: f32, restitution: f32) -> Self {
        Self {
            friction: friction.max(0.0),
            restitution: restitution.clamp(0.0, 1.0),
            ..Default::default()
        }
    }

    /// Bouncy rubber-like material
    pub fn rubber() -> Self {
        Self {
            friction: 0.8,
            restitution: 0.8,
            density: 1.1,
            ..Default::default()
        }
    }

    /// Frictionless ice-like material
    pub fn ice() -> Self {
        Self {
            friction: 0.05,
            density: 0.9,
            ..Default::default()
        }
    }

    pub fn with_density(mut self, density: f32) -> Self {
        self.density = density.max(0.001);
        self
    }

    pub fn with_friction_combine(mut self, rule: CombineRule) -> Self {
        self.friction_combine = rule;
        self
    }

    pub fn with_restitution_combine(mut self, rule: CombineRule) -> Self {
        self.restitution_combine = rule;
        self
    }

    /// Friction the backend applies when this material touches `other`
    pub fn combined_friction(&self, other: &Material) -> f32 {
        self.friction_combine
            .resolve(other.friction_combine)
            .combine(self.friction, other.friction)
    }

    /// Restitution the backend applies when this material touches `other`
    pub fn combined_restitution(&self, other: &Material) -> f32 {
        self.restitution_combine
            .resolve(other.restitution_combine)
            .combine(self.restitution, other.restitution)
    }
}

/// Rule for combining the coefficients of two touching materials.
///
/// When both sides disagree the higher variant wins
/// (`Average < Min < Multiply < Max`), matching the backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum CombineRule {
    #[default]
    Average,
    Min,
    Multiply,
    Max,
}

impl CombineRule {
    /// Rule used for a pair
    pub fn resolve(self, other: Self) -> Self {
        self.max(other)
    }

    pub fn combine(self, a: f32, b: f32) -> f32 {
        match self {
            Self::Average => (a + b) * 0.5,
            Self::Min => a.min(b),
            Self::Multiply => a * b,
            Self::Max => a.max(b),
        }
    }
}
