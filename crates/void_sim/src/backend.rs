//! Backend glue shared by the 2D and 3D worlds
//!
//! Checks that do not depend on the rapier flavour are plain functions.
//! Hooks, the event collector and the other items that differ only in the
//! rapier crate they name are stamped out per world by [`rapier_glue!`].

use crate::body::{BodyDefinition, BodyHandle};
use crate::dimension::Dimension;
use crate::error::{PhysicsError, Result};
use crate::layers::LayerTable;
use crate::query::{QueryFilter, RayHit};
use crate::simulation::stale_handle;

/// Reject a body definition before anything reaches the backend
pub(crate) fn check_definition<D: Dimension>(
    layers: &LayerTable,
    def: &BodyDefinition<D>,
    live_bodies: usize,
    max_bodies: usize,
) -> Result<()> {
    if !layers.is_registered(def.layer) {
        return Err(PhysicsError::UnmappedLayer(def.layer));
    }
    let finite = D::is_finite(def.position)
        && D::rotation_is_finite(def.rotation)
        && D::is_finite(def.linear_velocity)
        && D::angular_is_finite(def.angular_velocity);
    if !finite {
        return Err(PhysicsError::Configuration(
            "body definition has non-finite motion state".into(),
        ));
    }
    if live_bodies >= max_bodies {
        return Err(PhysicsError::CapacityExceeded { limit: max_bodies });
    }
    Ok(())
}

/// Reject filters naming stale bodies, then a disposed world
pub(crate) fn check_query(
    filter: &QueryFilter<'_>,
    is_live: impl Fn(BodyHandle) -> bool,
    strict: bool,
    disposed: bool,
) -> Result<()> {
    if let Some(&stale) = filter.excluded.iter().find(|&&body| !is_live(body)) {
        return Err(stale_handle(strict, stale));
    }
    if disposed {
        return Err(PhysicsError::Disposed);
    }
    Ok(())
}

/// Finite origin and direction, nonzero direction, positive reach
pub(crate) fn ray_is_castable<D: Dimension>(
    origin: D::Vector,
    direction: D::Vector,
    max_distance: f32,
) -> bool {
    D::is_finite(origin)
        && D::is_finite(direction)
        && D::length(direction) > 0.0
        && max_distance.is_finite()
        && max_distance > 0.0
}

pub(crate) fn sort_by_distance<D: Dimension>(hits: &mut [RayHit<D>]) {
    hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
}

/// Segment index pairs of an open or closed chain
pub(crate) fn chain_indices(len: usize, closed: bool) -> Vec<[u32; 2]> {
    let len = len as u32;
    let mut indices: Vec<[u32; 2]> = (1..len).map(|i| [i - 1, i]).collect();
    if closed && len > 2 {
        indices.push([len - 1, 0]);
    }
    indices
}

/// Tracks whether the live pair count sits above `max_body_pairs`
#[derive(Debug, Default)]
pub(crate) struct PairBudget {
    over: bool,
}

impl PairBudget {
    /// Warn once per crossing; returns true on the step that crossed
    pub fn observe(&mut self, pairs: usize, limit: usize) -> bool {
        let over = pairs > limit;
        let crossed = over && !self.over;
        if crossed {
            log::warn!("{pairs} body pairs exceed the configured budget of {limit}");
        }
        self.over = over;
        crossed
    }
}

/// Runs the backend step, on one thread unless multithreading was asked for.
///
/// With the `parallel` feature the backends fan out on the current rayon
/// pool, so single-threaded worlds step inside a private one-thread pool.
#[derive(Debug)]
pub(crate) struct StepRunner {
    #[cfg(feature = "parallel")]
    serial: Option<rayon::ThreadPool>,
}

impl StepRunner {
    pub fn new(multithreaded: bool) -> Result<Self> {
        #[cfg(feature = "parallel")]
        {
            let serial = if multithreaded {
                None
            } else {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(1)
                    .thread_name(|i| format!("void-sim-step-{i}"))
                    .build()
                    .map_err(|err| {
                        PhysicsError::Backend(format!("failed to build the step thread pool: {err}"))
                    })?;
                Some(pool)
            };
            Ok(Self { serial })
        }
        #[cfg(not(feature = "parallel"))]
        {
            if multithreaded {
                log::warn!("Multithreaded stepping requested but the `parallel` feature is off; stepping on one thread");
            }
            Ok(Self {})
        }
    }

    pub fn is_serial(&self) -> bool {
        #[cfg(feature = "parallel")]
        {
            self.serial.is_some()
        }
        #[cfg(not(feature = "parallel"))]
        {
            true
        }
    }

    pub fn run<R: Send>(&self, step: impl FnOnce() -> R + Send) -> R {
        #[cfg(feature = "parallel")]
        {
            if let Some(pool) = &self.serial {
                return pool.install(step);
            }
        }
        step()
    }
}

/// Items that only differ in the rapier crate they name.
///
/// Expects the rapier prelude in scope under the given alias.
macro_rules! rapier_glue {
    ($rapier:ident) => {
        fn combine_rule(rule: $crate::material::CombineRule) -> $rapier::CoefficientCombineRule {
            use $crate::material::CombineRule;
            match rule {
                CombineRule::Average => $rapier::CoefficientCombineRule::Average,
                CombineRule::Min => $rapier::CoefficientCombineRule::Min,
                CombineRule::Multiply => $rapier::CoefficientCombineRule::Multiply,
                CombineRule::Max => $rapier::CoefficientCombineRule::Max,
            }
        }

        /// Backend query filter running `predicate` on every candidate collider
        fn backend_filter<'a>(
            filter: &$crate::query::QueryFilter<'_>,
            predicate: &'a impl Fn($rapier::ColliderHandle, &$rapier::Collider) -> bool,
        ) -> $rapier::QueryFilter<'a> {
            let backend = $rapier::QueryFilter::new().predicate(predicate);
            if filter.include_sensors {
                backend
            } else {
                backend.exclude_sensors()
            }
        }

        /// Pair filter enforcing the object-layer table
        struct LayerHooks<'a> {
            layers: &'a $crate::layers::LayerTable,
        }

        impl LayerHooks<'_> {
            fn authorized(&self, context: &$rapier::PairFilterContext) -> bool {
                match (
                    context.colliders.get(context.collider1),
                    context.colliders.get(context.collider2),
                ) {
                    (Some(a), Some(b)) => {
                        $crate::registry::tags_may_collide(self.layers, a.user_data, b.user_data)
                    }
                    _ => false,
                }
            }
        }

        impl $rapier::PhysicsHooks for LayerHooks<'_> {
            fn filter_contact_pair(
                &self,
                context: &$rapier::PairFilterContext,
            ) -> Option<$rapier::SolverFlags> {
                self.authorized(context)
                    .then_some($rapier::SolverFlags::COMPUTE_IMPULSES)
            }

            fn filter_intersection_pair(&self, context: &$rapier::PairFilterContext) -> bool {
                self.authorized(context)
            }
        }

        /// Contact impulse of a pair, ready for translation
        struct HitRecord {
            collider1: $rapier::ColliderHandle,
            collider2: $rapier::ColliderHandle,
            impulse: f32,
            normal: $rapier::Vector<f32>,
        }

        /// Channel-based event collector for Rapier
        struct ChannelEventCollector {
            collision_events: ::crossbeam_channel::Sender<$rapier::CollisionEvent>,
            hit_events: ::crossbeam_channel::Sender<HitRecord>,
            hit_threshold: f32,
        }

        impl $rapier::EventHandler for ChannelEventCollector {
            fn handle_collision_event(
                &self,
                _bodies: &$rapier::RigidBodySet,
                _colliders: &$rapier::ColliderSet,
                event: $rapier::CollisionEvent,
                _contact_pair: Option<&$rapier::ContactPair>,
            ) {
                let _ = self.collision_events.send(event);
            }

            fn handle_contact_force_event(
                &self,
                dt: f32,
                _bodies: &$rapier::RigidBodySet,
                _colliders: &$rapier::ColliderSet,
                contact_pair: &$rapier::ContactPair,
                total_force_magnitude: f32,
            ) {
                let impulse = total_force_magnitude * dt;
                if impulse < self.hit_threshold {
                    return;
                }
                let manifold_impulse = |m: &$rapier::ContactManifold| {
                    m.points.iter().map(|p| p.data.impulse).sum::<f32>()
                };
                let normal = contact_pair
                    .manifolds
                    .iter()
                    .max_by(|a, b| manifold_impulse(a).total_cmp(&manifold_impulse(b)))
                    .map(|m| m.data.normal)
                    .unwrap_or_else($rapier::Vector::zeros);
                let _ = self.hit_events.send(HitRecord {
                    collider1: contact_pair.collider1,
                    collider2: contact_pair.collider2,
                    impulse,
                    normal,
                });
            }
        }
    };
}

pub(crate) use rapier_glue;
