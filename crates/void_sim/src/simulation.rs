//! Contract shared by the 2D and 3D worlds

use crate::body::{BodyDefinition, BodyHandle, BodyState};
use crate::dimension::{Dimension, Transform};
use crate::error::{PhysicsError, Result};
use crate::events::{EventDispatcher, StepReport};
use crate::layers::{LayerTable, SpatialFilter};
use crate::query::{QueryFilter, RayHit};
use crate::shape::ShapeDefinition;

/// Engine vector type of a simulation
pub type VectorOf<S> = <<S as Simulation>::Dim as Dimension>::Vector;

/// A rigid-body world owned by one scene.
///
/// Every method is driven from a single thread of control. Listeners only
/// ever see event values, so no simulation method can be reached from
/// inside the `step` that produced them.
pub trait Simulation {
    type Dim: Dimension;

    /// Advance exactly one fixed increment and deliver its events
    fn step(&mut self, dt: f32) -> Result<StepReport>;

    /// First body hit within `max_distance`, or `None`
    fn ray_cast(
        &self,
        origin: VectorOf<Self>,
        direction: VectorOf<Self>,
        max_distance: f32,
        filter: &QueryFilter<'_>,
    ) -> Result<Option<RayHit<Self::Dim>>>;

    /// Every body hit within `max_distance`, nearest first
    fn ray_cast_all(
        &self,
        origin: VectorOf<Self>,
        direction: VectorOf<Self>,
        max_distance: f32,
        filter: &QueryFilter<'_>,
    ) -> Result<Vec<RayHit<Self::Dim>>>;

    /// Bodies whose shape contains `point`
    fn overlap_point(&self, point: VectorOf<Self>, filter: &QueryFilter<'_>)
        -> Result<Vec<BodyHandle>>;

    /// Resolve the descriptors into backend resources.
    ///
    /// On error the world is left untouched.
    fn create_body(
        &mut self,
        body: &BodyDefinition<Self::Dim>,
        shape: &ShapeDefinition<Self::Dim>,
    ) -> Result<BodyHandle>;

    fn destroy_body(&mut self, body: BodyHandle) -> Result<()>;

    /// Tear the backend world down; every handle becomes stale. Idempotent.
    fn dispose(&mut self);

    fn is_disposed(&self) -> bool;

    /// Snapshot published by the last step (or by the last mutation)
    fn body_state(&self, body: BodyHandle) -> Result<BodyState<Self::Dim>>;

    fn position(&self, body: BodyHandle) -> Result<VectorOf<Self>> {
        Ok(self.body_state(body)?.position())
    }

    fn rotation(&self, body: BodyHandle) -> Result<<Self::Dim as Dimension>::Rotation> {
        Ok(self.body_state(body)?.rotation())
    }

    fn linear_velocity(&self, body: BodyHandle) -> Result<VectorOf<Self>> {
        Ok(self.body_state(body)?.linear_velocity)
    }

    fn angular_velocity(&self, body: BodyHandle) -> Result<<Self::Dim as Dimension>::Angular> {
        Ok(self.body_state(body)?.angular_velocity)
    }

    fn is_awake(&self, body: BodyHandle) -> Result<bool> {
        Ok(self.body_state(body)?.awake)
    }

    /// Teleport a body
    fn set_transform(&mut self, body: BodyHandle, transform: Transform<Self::Dim>) -> Result<()>;

    fn set_linear_velocity(&mut self, body: BodyHandle, velocity: VectorOf<Self>) -> Result<()>;

    fn set_angular_velocity(
        &mut self,
        body: BodyHandle,
        velocity: <Self::Dim as Dimension>::Angular,
    ) -> Result<()>;

    /// Force applied at the center of mass during the next step only
    fn apply_force(&mut self, body: BodyHandle, force: VectorOf<Self>) -> Result<()>;

    fn apply_linear_impulse(&mut self, body: BodyHandle, impulse: VectorOf<Self>) -> Result<()>;

    /// Listener registration
    fn events(&mut self) -> &mut EventDispatcher<Self::Dim>;

    fn layers(&self) -> &LayerTable;

    fn spatial_filter(&self) -> &SpatialFilter;

    fn body_count(&self) -> usize;

    /// Steps taken so far
    fn step_count(&self) -> u64;
}

/// Most a body may turn in one step without `allow_fast_rotation`
pub const MAX_ROTATION_PER_STEP: f32 = 0.25 * std::f32::consts::PI;

/// Error for a stale handle, honouring strict mode
pub(crate) fn stale_handle(strict: bool, body: BodyHandle) -> PhysicsError {
    if strict {
        panic!("stale body handle {body:?} used in strict mode");
    }
    log::warn!("Ignoring operation on stale body handle {body:?}");
    PhysicsError::StaleHandle(body)
}

/// Reject a step delta that cannot advance the world
pub(crate) fn check_delta(dt: f32) -> Result<()> {
    if dt.is_finite() && dt > 0.0 {
        Ok(())
    } else {
        Err(PhysicsError::Configuration(format!(
            "step delta must be positive and finite, got {dt}"
        )))
    }
}
