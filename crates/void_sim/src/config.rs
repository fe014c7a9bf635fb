//! Simulation settings

use crate::error::{PhysicsError, Result};
use serde::{Deserialize, Serialize};

/// Settings shared by both dimensions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommonSettings {
    /// Hard cap on live bodies
    pub max_bodies: usize,

    /// Expected number of simultaneously overlapping body pairs
    pub max_body_pairs: usize,

    /// Expected number of contact constraints per step
    pub max_contact_constraints: usize,

    /// Let the backend parallelize a step. Needs the `parallel` feature;
    /// when false the step runs on a single thread either way
    pub multithreaded: bool,

    /// Panic on stale handles instead of returning an error
    pub strict_handles: bool,

    /// Minimum pair impulse reported as a hit event
    pub hit_event_threshold: f32,
}

impl Default for CommonSettings {
    fn default() -> Self {
        Self {
            max_bodies: 10_240,
            max_body_pairs: 65_536,
            max_contact_constraints: 10_240,
            multithreaded: false,
            strict_handles: false,
            hit_event_threshold: 1.0,
        }
    }
}

impl CommonSettings {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("max_bodies", self.max_bodies),
            ("max_body_pairs", self.max_body_pairs),
            ("max_contact_constraints", self.max_contact_constraints),
        ] {
            if value == 0 {
                return Err(PhysicsError::Configuration(format!("{name} must be positive")));
            }
        }
        if !(self.hit_event_threshold.is_finite() && self.hit_event_threshold >= 0.0) {
            return Err(PhysicsError::Configuration(format!(
                "hit_event_threshold must be non-negative, got {}",
                self.hit_event_threshold
            )));
        }
        Ok(())
    }
}

/// 2D world settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings2D {
    /// Gravity vector (default: -10 in Y)
    pub gravity: [f32; 2],

    /// Solver iterations for velocity
    pub velocity_iterations: usize,

    /// Solver iterations for position correction
    pub position_iterations: usize,

    #[serde(flatten)]
    pub common: CommonSettings,
}

impl Default for Settings2D {
    fn default() -> Self {
        Self {
            gravity: [0.0, -10.0],
            velocity_iterations: 8,
            position_iterations: 3,
            common: CommonSettings::default(),
        }
    }
}

impl Settings2D {
    pub fn with_gravity(mut self, x: f32, y: f32) -> Self {
        self.gravity = [x, y];
        self
    }

    pub fn with_iterations(mut self, velocity: usize, position: usize) -> Self {
        self.velocity_iterations = velocity;
        self.position_iterations = position;
        self
    }

    pub fn with_common(mut self, common: CommonSettings) -> Self {
        self.common = common;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.gravity.iter().all(|g| g.is_finite()) {
            return Err(PhysicsError::Configuration(format!(
                "gravity must be finite, got {:?}",
                self.gravity
            )));
        }
        if self.velocity_iterations == 0 {
            return Err(PhysicsError::Configuration(
                "velocity_iterations must be positive".into(),
            ));
        }
        if self.position_iterations == 0 {
            return Err(PhysicsError::Configuration(
                "position_iterations must be positive".into(),
            ));
        }
        self.common.validate()
    }
}

/// 3D world settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings3D {
    /// Gravity vector (default: -9.81 in Y)
    pub gravity: [f32; 3],

    /// Solver iterations per step
    pub solver_iterations: usize,

    /// Use the legacy projected Gauss-Seidel solver instead of the soft
    /// sub-stepping one
    pub alternate_solver: bool,

    #[serde(flatten)]
    pub common: CommonSettings,
}

impl Default for Settings3D {
    fn default() -> Self {
        Self {
            gravity: [0.0, -9.81, 0.0],
            solver_iterations: 4,
            alternate_solver: false,
            common: CommonSettings::default(),
        }
    }
}

impl Settings3D {
    pub fn with_gravity(mut self, x: f32, y: f32, z: f32) -> Self {
        self.gravity = [x, y, z];
        self
    }

    pub fn with_alternate_solver(mut self, enabled: bool) -> Self {
        self.alternate_solver = enabled;
        self
    }

    pub fn with_common(mut self, common: CommonSettings) -> Self {
        self.common = common;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.gravity.iter().all(|g| g.is_finite()) {
            return Err(PhysicsError::Configuration(format!(
                "gravity must be finite, got {:?}",
                self.gravity
            )));
        }
        if self.solver_iterations == 0 {
            return Err(PhysicsError::Configuration(
                "solver_iterations must be positive".into(),
            ));
        }
        self.common.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(Settings2D::default().validate().is_ok());
        assert!(Settings3D::default().validate().is_ok());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let settings = Settings3D::default().with_common(CommonSettings {
            max_bodies: 0,
            ..Default::default()
        });
        assert!(matches!(settings.validate(), Err(PhysicsError::Configuration(_))));
    }

    #[test]
    fn test_bad_gravity_and_iterations() {
        assert!(Settings3D::default().with_gravity(0.0, f32::NAN, 0.0).validate().is_err());
        assert!(Settings2D::default().with_iterations(0, 1).validate().is_err());
        assert!(matches!(
            Settings2D::default().with_iterations(8, 0).validate(),
            Err(PhysicsError::Configuration(_))
        ));
        assert!(Settings2D::default().with_iterations(1, 1).validate().is_ok());
        let negative_hits = CommonSettings {
            hit_event_threshold: -1.0,
            ..Default::default()
        };
        assert!(negative_hits.validate().is_err());
    }

    #[test]
    fn test_settings_from_json() {
        let json = r#"{
            "gravity": [0.0, -3.0],
            "velocity_iterations": 6,
            "position_iterations": 2,
            "max_bodies": 16,
            "max_body_pairs": 64,
            "max_contact_constraints": 64,
            "multithreaded": false,
            "strict_handles": true,
            "hit_event_threshold": 0.5
        }"#;
        let settings: Settings2D = serde_json::from_str(json).unwrap();
        assert_eq!(settings.gravity, [0.0, -3.0]);
        assert_eq!(settings.common.max_bodies, 16);
        assert!(settings.common.strict_handles);
        assert!(settings.validate().is_ok());
    }
}
