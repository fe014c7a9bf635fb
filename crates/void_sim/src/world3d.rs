//! 3D physics world backed by rapier3d

use crate::backend::{self, rapier_glue, PairBudget, StepRunner};
use crate::body::{BodyDefinition, BodyHandle, BodyState, BodyType};
use crate::config::Settings3D;
use crate::conversion::{point3, ToBackend, ToEngine};
use crate::dimension::{Dim3, Dimension, Transform3};
use crate::error::{PhysicsError, Result};
use crate::events::{ContactHitEvent, EventBatch, EventDispatcher, MoveEvent, StepReport};
use crate::layers::{LayerTable, SpatialFilter};
use crate::query::{QueryFilter, RayHit};
use crate::registry::{BodyEntry, BodyRegistry, ColliderTag};
use crate::shape::{ShapeDefinition, LINEAR_SLOP};
use crate::simulation::{check_delta, stale_handle, Simulation, MAX_ROTATION_PER_STEP};
use glam::Vec3;
use rapier3d::prelude as rapier;
use std::num::NonZeroUsize;

type Entry = BodyEntry<Dim3, (rapier::RigidBodyHandle, rapier::ColliderHandle)>;

/// Rigid-body world in three dimensions
pub struct PhysicsWorld3D {
    settings: Settings3D,
    layers: LayerTable,
    spatial: SpatialFilter,

    pipeline: rapier::PhysicsPipeline,
    gravity: rapier::Vector<f32>,
    integration_params: rapier::IntegrationParameters,
    islands: rapier::IslandManager,
    broad_phase: rapier::DefaultBroadPhase,
    narrow_phase: rapier::NarrowPhase,
    impulse_joints: rapier::ImpulseJointSet,
    multibody_joints: rapier::MultibodyJointSet,
    ccd_solver: rapier::CCDSolver,
    query_pipeline: rapier::QueryPipeline,
    bodies: rapier::RigidBodySet,
    colliders: rapier::ColliderSet,

    registry: BodyRegistry<Entry>,
    events: EventDispatcher<Dim3>,
    steps: u64,
    pair_budget: PairBudget,
    runner: StepRunner,
    disposed: bool,
}

impl PhysicsWorld3D {
    /// Create a world from settings and a finished layer table
    pub fn new(settings: Settings3D, layers: LayerTable) -> Result<Self> {
        settings.validate()?;
        let spatial = layers.build_spatial_filter()?;

        let iterations = NonZeroUsize::new(settings.solver_iterations).ok_or_else(|| {
            PhysicsError::Configuration("solver_iterations must be positive".into())
        })?;
        let integration_params = if settings.alternate_solver {
            let mut params = rapier::IntegrationParameters::pgs_legacy();
            params.num_internal_pgs_iterations = iterations.get();
            params
        } else {
            let mut params = rapier::IntegrationParameters::default();
            params.num_solver_iterations = iterations;
            params
        };

        let runner = StepRunner::new(settings.common.multithreaded)?;

        let [gx, gy, gz] = settings.gravity;
        log::info!(
            "Created {} physics world (gravity [{gx}, {gy}, {gz}], {} solver iterations, {} layers, {} stepping)",
            Dim3::NAME,
            settings.solver_iterations,
            layers.layers().count(),
            if runner.is_serial() { "serial" } else { "parallel" }
        );

        Ok(Self {
            gravity: rapier::Vector::new(gx, gy, gz),
            settings,
            layers,
            spatial,
            pipeline: rapier::PhysicsPipeline::new(),
            integration_params,
            islands: rapier::IslandManager::new(),
            broad_phase: rapier::DefaultBroadPhase::new(),
            narrow_phase: rapier::NarrowPhase::new(),
            impulse_joints: rapier::ImpulseJointSet::new(),
            multibody_joints: rapier::MultibodyJointSet::new(),
            ccd_solver: rapier::CCDSolver::new(),
            query_pipeline: rapier::QueryPipeline::new(),
            bodies: rapier::RigidBodySet::new(),
            colliders: rapier::ColliderSet::new(),
            registry: BodyRegistry::new(),
            events: EventDispatcher::new(),
            steps: 0,
            pair_budget: PairBudget::default(),
            runner,
            disposed: false,
        })
    }

    /// World with default settings and the two-layer table
    pub fn with_defaults() -> Result<Self> {
        Self::new(Settings3D::default(), LayerTable::default())
    }

    pub fn settings(&self) -> &Settings3D {
        &self.settings
    }

    pub fn gravity(&self) -> Vec3 {
        self.gravity.to_engine()
    }

    pub fn set_gravity(&mut self, gravity: Vec3) {
        self.gravity = gravity.to_backend();
    }

    /// Dynamic bodies currently awake
    pub fn active_body_count(&self) -> usize {
        self.islands.active_dynamic_bodies().len()
    }

    fn entry(&self, body: BodyHandle) -> Result<&Entry> {
        self.registry
            .get(body)
            .ok_or_else(|| stale_handle(self.settings.common.strict_handles, body))
    }

    /// Backend body and registry entry of a live handle
    fn body_mut(&mut self, body: BodyHandle) -> Result<(&mut rapier::RigidBody, &mut Entry)> {
        let strict = self.settings.common.strict_handles;
        let entry = self
            .registry
            .get_mut(body)
            .ok_or_else(|| stale_handle(strict, body))?;
        let rb = self.bodies.get_mut(entry.backend.0).ok_or_else(|| {
            PhysicsError::Backend(format!("body {body:?} missing from the backend set"))
        })?;
        Ok((rb, entry))
    }

    /// Reject filters naming stale bodies, then a disposed world
    fn check_query(&self, filter: &QueryFilter<'_>) -> Result<()> {
        backend::check_query(
            filter,
            |body| self.registry.contains(body),
            self.settings.common.strict_handles,
            self.disposed,
        )
    }

    fn rigid_body(def: &BodyDefinition<Dim3>) -> rapier::RigidBodyBuilder {
        let body_type = match def.body_type {
            BodyType::Static => rapier::RigidBodyType::Fixed,
            BodyType::Dynamic => rapier::RigidBodyType::Dynamic,
            BodyType::Kinematic => rapier::RigidBodyType::KinematicVelocityBased,
        };
        let mut builder = rapier::RigidBodyBuilder::new(body_type)
            .position(def.initial_transform().to_backend())
            .linvel(def.linear_velocity.to_backend())
            .angvel(def.angular_velocity.to_backend())
            .linear_damping(def.linear_damping)
            .angular_damping(def.angular_damping)
            .gravity_scale(def.gravity_scale)
            .ccd_enabled(def.flags.bullet)
            .can_sleep(def.flags.enable_sleep)
            .enabled(def.flags.enabled);
        if def.flags.fixed_rotation {
            builder = builder.lock_rotations();
        }
        builder
    }

    fn collider(
        &self,
        def: &BodyDefinition<Dim3>,
        shape: rapier::SharedShape,
        offset: rapier::Isometry<f32>,
        tag: ColliderTag,
    ) -> Result<rapier::ColliderBuilder> {
        let bucket = self
            .spatial
            .bucket_of(def.layer)
            .ok_or(PhysicsError::UnmappedLayer(def.layer))?;
        let groups = rapier::InteractionGroups::new(
            rapier::Group::from_bits_truncate(bucket.bit()),
            rapier::Group::from_bits_truncate(self.spatial.bucket_mask(bucket)),
        );

        let mut events = rapier::ActiveEvents::empty();
        if def.is_sensor || def.enable_contact_events {
            events |= rapier::ActiveEvents::COLLISION_EVENTS;
        }
        if def.enable_hit_events && !def.is_sensor {
            events |= rapier::ActiveEvents::CONTACT_FORCE_EVENTS;
        }

        let mut collision_types = rapier::ActiveCollisionTypes::default();
        if def.is_sensor {
            collision_types |= rapier::ActiveCollisionTypes::KINEMATIC_FIXED
                | rapier::ActiveCollisionTypes::KINEMATIC_KINEMATIC;
        }

        let material = &def.material;
        Ok(rapier::ColliderBuilder::new(shape)
            .position(offset)
            .sensor(def.is_sensor)
            .friction(material.friction)
            .restitution(material.restitution)
            .density(material.density)
            .friction_combine_rule(combine_rule(material.friction_combine))
            .restitution_combine_rule(combine_rule(material.restitution_combine))
            .collision_groups(groups)
            .active_hooks(
                rapier::ActiveHooks::FILTER_CONTACT_PAIRS
                    | rapier::ActiveHooks::FILTER_INTERSECTION_PAIR,
            )
            .active_events(events)
            .active_collision_types(collision_types)
            .contact_force_event_threshold(0.0)
            .user_data(tag.encode()))
    }

    /// Clamp spin, clear one-step forces, and publish moves since the last step
    fn refresh_states(&mut self, dt: f32, batch: &mut EventBatch<Dim3>) {
        let max_spin = MAX_ROTATION_PER_STEP / dt;
        for (handle, entry) in self.registry.iter_mut() {
            if entry.body_type == BodyType::Static {
                continue;
            }
            let Some(rb) = self.bodies.get_mut(entry.backend.0) else {
                continue;
            };

            if entry.body_type == BodyType::Dynamic {
                if !entry.allow_fast_rotation {
                    let spin = *rb.angvel();
                    let speed = spin.norm();
                    if speed > max_spin {
                        rb.set_angvel(spin * (max_spin / speed), false);
                    }
                }
                rb.reset_forces(false);
                rb.reset_torques(false);
            }

            let transform = rb.position().to_engine();
            let awake = !rb.is_sleeping();
            let fell_asleep = entry.state.awake && !awake;
            let moved = transform != entry.state.transform;

            entry.state = BodyState {
                transform,
                linear_velocity: rb.linvel().to_engine(),
                angular_velocity: rb.angvel().to_engine(),
                awake,
            };
            if moved || fell_asleep {
                batch.moves.push(MoveEvent {
                    body: handle,
                    transform,
                    fell_asleep,
                    user_data: entry.user_data,
                });
            }
        }
    }

    fn tag_of(&self, collider: rapier::ColliderHandle) -> Option<ColliderTag> {
        let tag = ColliderTag::decode(self.colliders.get(collider)?.user_data);
        self.registry.contains(tag.body).then_some(tag)
    }

    fn ray(origin: Vec3, direction: Vec3, max_distance: f32) -> Option<rapier::Ray> {
        backend::ray_is_castable::<Dim3>(origin, direction, max_distance)
            .then(|| rapier::Ray::new(point3(origin), direction.normalize().to_backend()))
    }

    fn ray_hit(
        &self,
        collider: rapier::ColliderHandle,
        ray: &rapier::Ray,
        hit: rapier::RayIntersection,
        max_distance: f32,
    ) -> Option<RayHit<Dim3>> {
        let tag = ColliderTag::decode(self.colliders.get(collider)?.user_data);
        Some(RayHit {
            body: tag.body,
            point: ray.point_at(hit.time_of_impact).to_engine(),
            normal: hit.normal.to_engine(),
            fraction: hit.time_of_impact / max_distance,
            distance: hit.time_of_impact,
        })
    }
}

impl Simulation for PhysicsWorld3D {
    type Dim = Dim3;

    fn step(&mut self, dt: f32) -> Result<StepReport> {
        if self.disposed {
            return Err(PhysicsError::Disposed);
        }
        check_delta(dt)?;
        self.integration_params.dt = dt;

        let (collision_send, collision_recv) = crossbeam_channel::unbounded();
        let (hit_send, hit_recv) = crossbeam_channel::unbounded();
        let collector = ChannelEventCollector {
            collision_events: collision_send,
            hit_events: hit_send,
            hit_threshold: self.settings.common.hit_event_threshold,
        };
        let hooks = LayerHooks {
            layers: &self.layers,
        };

        self.runner.run(|| {
            self.pipeline.step(
                &self.gravity,
                &self.integration_params,
                &mut self.islands,
                &mut self.broad_phase,
                &mut self.narrow_phase,
                &mut self.bodies,
                &mut self.colliders,
                &mut self.impulse_joints,
                &mut self.multibody_joints,
                &mut self.ccd_solver,
                Some(&mut self.query_pipeline),
                &hooks,
                &collector,
            );
        });
        drop(collector);
        self.steps += 1;

        let mut batch = EventBatch::default();
        self.refresh_states(dt, &mut batch);

        for event in collision_recv.try_iter() {
            let (h1, h2, begin) = match event {
                rapier::CollisionEvent::Started(h1, h2, _) => (h1, h2, true),
                rapier::CollisionEvent::Stopped(h1, h2, _) => (h1, h2, false),
            };
            // pairs involving destroyed bodies are dropped
            if let (Some(first), Some(second)) = (self.tag_of(h1), self.tag_of(h2)) {
                batch.push_touch(first, second, begin);
            }
        }
        for hit in hit_recv.try_iter() {
            if let (Some(a), Some(b)) = (self.tag_of(hit.collider1), self.tag_of(hit.collider2)) {
                batch.hits.push(ContactHitEvent {
                    a: a.body,
                    b: b.body,
                    impulse: hit.impulse,
                    normal: hit.normal.to_engine(),
                });
            }
        }

        self.pair_budget.observe(
            self.narrow_phase.contact_pairs().count(),
            self.settings.common.max_body_pairs,
        );

        let counts = batch.counts();
        log::debug!("Physics step {} produced {} events", self.steps, counts.total());
        let failures = self.events.dispatch(batch.into_ordered());

        Ok(StepReport {
            step: self.steps,
            events: counts,
            failures,
        })
    }

    fn ray_cast(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
        filter: &QueryFilter<'_>,
    ) -> Result<Option<RayHit<Dim3>>> {
        self.check_query(filter)?;
        let Some(ray) = Self::ray(origin, direction, max_distance) else {
            return Ok(None);
        };
        let predicate = |_: rapier::ColliderHandle, collider: &rapier::Collider| {
            let tag = ColliderTag::decode(collider.user_data);
            filter.accepts(&self.spatial, tag.body, tag.layer, tag.is_sensor)
        };
        let backend_filter = backend_filter(filter, &predicate);

        Ok(self
            .query_pipeline
            .cast_ray_and_get_normal(
                &self.bodies,
                &self.colliders,
                &ray,
                max_distance,
                true,
                backend_filter,
            )
            .and_then(|(collider, hit)| self.ray_hit(collider, &ray, hit, max_distance)))
    }

    fn ray_cast_all(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
        filter: &QueryFilter<'_>,
    ) -> Result<Vec<RayHit<Dim3>>> {
        self.check_query(filter)?;
        let Some(ray) = Self::ray(origin, direction, max_distance) else {
            return Ok(Vec::new());
        };
        let predicate = |_: rapier::ColliderHandle, collider: &rapier::Collider| {
            let tag = ColliderTag::decode(collider.user_data);
            filter.accepts(&self.spatial, tag.body, tag.layer, tag.is_sensor)
        };

        let mut hits = Vec::new();
        self.query_pipeline.intersections_with_ray(
            &self.bodies,
            &self.colliders,
            &ray,
            max_distance,
            true,
            backend_filter(filter, &predicate),
            |collider, hit| {
                hits.extend(self.ray_hit(collider, &ray, hit, max_distance));
                true
            },
        );
        backend::sort_by_distance(&mut hits);
        Ok(hits)
    }

    fn overlap_point(&self, point: Vec3, filter: &QueryFilter<'_>) -> Result<Vec<BodyHandle>> {
        self.check_query(filter)?;
        let predicate = |_: rapier::ColliderHandle, collider: &rapier::Collider| {
            let tag = ColliderTag::decode(collider.user_data);
            filter.accepts(&self.spatial, tag.body, tag.layer, tag.is_sensor)
        };

        let mut found = Vec::new();
        self.query_pipeline.intersections_with_point(
            &self.bodies,
            &self.colliders,
            &point3(point),
            backend_filter(filter, &predicate),
            |collider| {
                if let Some(c) = self.colliders.get(collider) {
                    found.push(ColliderTag::decode(c.user_data).body);
                }
                true
            },
        );
        Ok(found)
    }

    fn create_body(
        &mut self,
        body: &BodyDefinition<Dim3>,
        shape: &ShapeDefinition<Dim3>,
    ) -> Result<BodyHandle> {
        if self.disposed {
            return Err(PhysicsError::Disposed);
        }
        let (shared, offset) = shape.validate().and_then(|()| resolve_shape(shape)).map_err(|err| {
            log::warn!("Rejected {} shape: {err}", shape.kind());
            err
        })?;
        backend::check_definition(
            &self.layers,
            body,
            self.registry.len(),
            self.settings.common.max_bodies,
        )?;

        let handle = self.registry.next_handle();
        let tag = ColliderTag {
            body: handle,
            layer: body.layer,
            is_sensor: body.is_sensor,
        };
        let collider = self.collider(body, shared, offset, tag)?;

        let rb_handle = self.bodies.insert(Self::rigid_body(body));
        if let Some(rb) = self.bodies.get_mut(rb_handle) {
            rb.activation_mut().normalized_linear_threshold = body.sleep_threshold;
        }
        let co_handle = self
            .colliders
            .insert_with_parent(collider, rb_handle, &mut self.bodies);
        self.query_pipeline.update(&self.colliders);

        let inserted = self.registry.insert(Entry {
            backend: (rb_handle, co_handle),
            body_type: body.body_type,
            allow_fast_rotation: body.flags.allow_fast_rotation,
            user_data: body.user_data,
            state: BodyState {
                transform: body.initial_transform(),
                linear_velocity: body.linear_velocity,
                angular_velocity: body.angular_velocity,
                awake: body.body_type != BodyType::Static && body.flags.enabled,
            },
        });
        debug_assert_eq!(inserted, handle);

        log::debug!(
            "Created {:?} {} body {handle:?} ({} on layer {:?})",
            body.body_type,
            Dim3::NAME,
            shape.kind(),
            self.layers.name(body.layer).unwrap_or("?")
        );
        Ok(handle)
    }

    fn destroy_body(&mut self, body: BodyHandle) -> Result<()> {
        let entry = self
            .registry
            .remove(body)
            .ok_or_else(|| stale_handle(self.settings.common.strict_handles, body))?;
        self.bodies.remove(
            entry.backend.0,
            &mut self.islands,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            true,
        );
        self.query_pipeline.update(&self.colliders);
        log::debug!("Destroyed body {body:?}");
        Ok(())
    }

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        let bodies = self.registry.len();
        self.registry.clear();
        self.events.clear();
        self.bodies = rapier::RigidBodySet::new();
        self.colliders = rapier::ColliderSet::new();
        self.islands = rapier::IslandManager::new();
        self.broad_phase = rapier::DefaultBroadPhase::new();
        self.narrow_phase = rapier::NarrowPhase::new();
        self.impulse_joints = rapier::ImpulseJointSet::new();
        self.multibody_joints = rapier::MultibodyJointSet::new();
        self.ccd_solver = rapier::CCDSolver::new();
        self.query_pipeline = rapier::QueryPipeline::new();
        self.disposed = true;
        log::info!("Disposed {} physics world ({bodies} bodies released)", Dim3::NAME);
    }

    fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn body_state(&self, body: BodyHandle) -> Result<BodyState<Dim3>> {
        Ok(self.entry(body)?.state)
    }

    fn set_transform(&mut self, body: BodyHandle, transform: Transform3) -> Result<()> {
        let (rb, entry) = self.body_mut(body)?;
        rb.set_position(transform.to_backend(), true);
        entry.state.transform = transform;
        Ok(())
    }

    fn set_linear_velocity(&mut self, body: BodyHandle, velocity: Vec3) -> Result<()> {
        let (rb, entry) = self.body_mut(body)?;
        rb.set_linvel(velocity.to_backend(), true);
        entry.state.linear_velocity = velocity;
        Ok(())
    }

    fn set_angular_velocity(&mut self, body: BodyHandle, velocity: Vec3) -> Result<()> {
        let (rb, entry) = self.body_mut(body)?;
        rb.set_angvel(velocity.to_backend(), true);
        entry.state.angular_velocity = velocity;
        Ok(())
    }

    fn apply_force(&mut self, body: BodyHandle, force: Vec3) -> Result<()> {
        let (rb, _) = self.body_mut(body)?;
        rb.add_force(force.to_backend(), true);
        Ok(())
    }

    fn apply_linear_impulse(&mut self, body: BodyHandle, impulse: Vec3) -> Result<()> {
        let (rb, _) = self.body_mut(body)?;
        rb.apply_impulse(impulse.to_backend(), true);
        Ok(())
    }

    fn events(&mut self) -> &mut EventDispatcher<Dim3> {
        &mut self.events
    }

    fn layers(&self) -> &LayerTable {
        &self.layers
    }

    fn spatial_filter(&self) -> &SpatialFilter {
        &self.spatial
    }

    fn body_count(&self) -> usize {
        self.registry.len()
    }

    fn step_count(&self) -> u64 {
        self.steps
    }
}

impl std::fmt::Debug for PhysicsWorld3D {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicsWorld3D")
            .field("bodies", &self.registry.len())
            .field("steps", &self.steps)
            .field("disposed", &self.disposed)
            .finish_non_exhaustive()
    }
}

/// Backend shape plus its offset from the body origin.
///
/// Offsets compose into the collider position instead of nesting compound
/// shapes.
fn resolve_shape(shape: &ShapeDefinition<Dim3>) -> Result<(rapier::SharedShape, rapier::Isometry<f32>)> {
    let shared = match shape {
        ShapeDefinition::Box { half_extents } => {
            rapier::SharedShape::cuboid(half_extents.x, half_extents.y, half_extents.z)
        }
        ShapeDefinition::Ball { radius } => rapier::SharedShape::ball(*radius),
        ShapeDefinition::Capsule {
            radius,
            half_height,
        } => rapier::SharedShape::capsule_y(*half_height, *radius),
        ShapeDefinition::Polygon { vertices } => convex_shape(vertices)?,
        ShapeDefinition::Chain { vertices, closed } => {
            let points = vertices.iter().copied().map(point3).collect();
            rapier::SharedShape::polyline(points, Some(backend::chain_indices(vertices.len(), *closed)))
        }
        ShapeDefinition::Segment { a, b } => rapier::SharedShape::segment(point3(*a), point3(*b)),
        ShapeDefinition::Transformed { shape, offset } => {
            let (inner, inner_offset) = resolve_shape(shape)?;
            return Ok((inner, offset.to_backend() * inner_offset));
        }
    };
    Ok((shared, rapier::Isometry::identity()))
}

/// Triangle for three points, convex hull for a volume
fn convex_shape(vertices: &[Vec3]) -> Result<rapier::SharedShape> {
    let points: Vec<_> = vertices.iter().copied().map(point3).collect();
    if let [a, b, c] = points[..] {
        if (b - a).cross(&(c - a)).norm() <= LINEAR_SLOP * LINEAR_SLOP {
            return Err(PhysicsError::InvalidShape("polygon vertices are collinear".into()));
        }
        return Ok(rapier::SharedShape::triangle(a, b, c));
    }
    if !spans_volume(vertices) {
        return Err(PhysicsError::InvalidShape(
            "polygons with more than three vertices must enclose a volume".into(),
        ));
    }
    rapier::SharedShape::convex_hull(&points)
        .ok_or_else(|| PhysicsError::InvalidShape("convex hull computation failed".into()))
}

fn spans_volume(vertices: &[Vec3]) -> bool {
    let Some(&origin) = vertices.first() else {
        return false;
    };
    let normal = vertices
        .iter()
        .flat_map(|a| vertices.iter().map(move |b| (*a - origin).cross(*b - origin)))
        .find(|n| n.length() > LINEAR_SLOP);
    match normal {
        Some(normal) => {
            let normal = normal.normalize();
            vertices.iter().any(|v| normal.dot(*v - origin).abs() > LINEAR_SLOP)
        }
        None => false,
    }
}

rapier_glue!(rapier);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::ObjectLayer;
    use approx::assert_relative_eq;
    use glam::Quat;

    fn world() -> PhysicsWorld3D {
        PhysicsWorld3D::with_defaults().unwrap()
    }

    #[test]
    fn test_create_world() {
        let world = world();
        assert_eq!(world.body_count(), 0);
        assert_eq!(world.step_count(), 0);
        assert_relative_eq!(world.gravity().y, -9.81);
    }

    #[test]
    fn test_create_and_destroy_body() {
        let mut world = world();
        let body = world
            .create_body(
                &BodyDefinition::dynamic().with_position(Vec3::new(0.0, 5.0, 0.0)),
                &ShapeDefinition::ball(0.5),
            )
            .unwrap();
        assert_eq!(world.body_count(), 1);
        assert_eq!(world.position(body).unwrap(), Vec3::new(0.0, 5.0, 0.0));

        world.destroy_body(body).unwrap();
        assert_eq!(world.body_count(), 0);
        assert!(matches!(world.destroy_body(body), Err(PhysicsError::StaleHandle(h)) if h == body));
    }

    #[test]
    fn test_gravity_fall() {
        let mut world = world();
        let body = world
            .create_body(
                &BodyDefinition::dynamic().with_position(Vec3::new(0.0, 10.0, 0.0)),
                &ShapeDefinition::ball(1.0),
            )
            .unwrap();
        for _ in 0..60 {
            world.step(1.0 / 60.0).unwrap();
        }
        assert!(world.position(body).unwrap().y < 10.0);
        assert!(world.linear_velocity(body).unwrap().y < 0.0);
    }

    #[test]
    fn test_stepping_mode_follows_settings() {
        let trajectory = |multithreaded: bool| {
            let mut settings = Settings3D::default();
            settings.common.multithreaded = multithreaded;
            let mut world = PhysicsWorld3D::new(settings, LayerTable::default()).unwrap();
            assert_eq!(world.runner.is_serial(), !multithreaded || !cfg!(feature = "parallel"));
            let body = world
                .create_body(
                    &BodyDefinition::dynamic().with_position(Vec3::new(0.0, 10.0, 0.0)),
                    &ShapeDefinition::ball(1.0),
                )
                .unwrap();
            for _ in 0..30 {
                world.step(1.0 / 60.0).unwrap();
            }
            world.position(body).unwrap()
        };
        let serial = trajectory(false);
        let parallel = trajectory(true);
        assert!(serial.y < 10.0);
        assert!(serial.abs_diff_eq(parallel, 1e-5), "{serial} vs {parallel}");
    }

    #[test]
    fn test_unregistered_layer_rejected() {
        let mut world = world();
        let result = world.create_body(
            &BodyDefinition::dynamic().with_layer(ObjectLayer(7)),
            &ShapeDefinition::ball(1.0),
        );
        assert!(matches!(result, Err(PhysicsError::UnmappedLayer(ObjectLayer(7)))));
        assert_eq!(world.body_count(), 0);
    }

    #[test]
    fn test_capacity_limit() {
        let mut settings = Settings3D::default();
        settings.common.max_bodies = 2;
        let mut world = PhysicsWorld3D::new(settings, LayerTable::default()).unwrap();
        for _ in 0..2 {
            world
                .create_body(&BodyDefinition::dynamic(), &ShapeDefinition::ball(0.5))
                .unwrap();
        }
        let result = world.create_body(&BodyDefinition::dynamic(), &ShapeDefinition::ball(0.5));
        assert!(matches!(result, Err(PhysicsError::CapacityExceeded { limit: 2 })));
    }

    #[test]
    fn test_transformed_shape_offsets_collider() {
        let (_, offset) = resolve_shape(
            &ShapeDefinition::<Dim3>::cuboid(Vec3::splat(0.5))
                .transformed(Transform3::from_translation(Vec3::new(0.0, 2.0, 0.0)))
                .transformed(Transform3::from_translation(Vec3::new(1.0, 0.0, 0.0))),
        )
        .unwrap();
        assert_relative_eq!(offset.translation.vector.x, 1.0);
        assert_relative_eq!(offset.translation.vector.y, 2.0);
    }

    #[test]
    fn test_flat_polygon_rejected() {
        let square = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 1.0),
            Vec3::new(0.0, 0.0, 1.0),
        ];
        assert!(matches!(convex_shape(&square), Err(PhysicsError::InvalidShape(_))));

        let mut tetra = square[..3].to_vec();
        tetra.push(Vec3::Y);
        assert!(convex_shape(&tetra).is_ok());
        assert!(convex_shape(&square[..3]).is_ok());
    }


    #[test]
    fn test_fast_rotation_clamped() {
        let mut world = PhysicsWorld3D::new(
            Settings3D::default().with_gravity(0.0, 0.0, 0.0),
            LayerTable::default(),
        )
        .unwrap();
        let spin = Vec3::new(0.0, 200.0, 0.0);
        let clamped = world
            .create_body(
                &BodyDefinition::dynamic().with_angular_velocity(spin),
                &ShapeDefinition::ball(0.5),
            )
            .unwrap();
        let mut flags = crate::body::BodyFlags::default();
        flags.allow_fast_rotation = true;
        let free = world
            .create_body(
                &BodyDefinition::dynamic()
                    .with_position(Vec3::new(5.0, 0.0, 0.0))
                    .with_angular_velocity(spin)
                    .with_flags(flags),
                &ShapeDefinition::ball(0.5),
            )
            .unwrap();

        let dt = 1.0 / 60.0;
        world.step(dt).unwrap();
        let limit = MAX_ROTATION_PER_STEP / dt;
        assert!(world.angular_velocity(clamped).unwrap().length() <= limit * 1.001);
        assert!(world.angular_velocity(free).unwrap().length() > limit);
    }

    #[test]
    fn test_disposed_world_rejects_work() {
        let mut world = world();
        let body = world
            .create_body(&BodyDefinition::dynamic(), &ShapeDefinition::ball(0.5))
            .unwrap();
        world.dispose();
        world.dispose();
        assert!(world.is_disposed());
        assert_eq!(world.body_count(), 0);
        assert!(matches!(world.step(1.0 / 60.0), Err(PhysicsError::Disposed)));
        assert!(matches!(world.body_state(body), Err(PhysicsError::StaleHandle(_))));
        let result = world.create_body(&BodyDefinition::dynamic(), &ShapeDefinition::ball(0.5));
        assert!(matches!(result, Err(PhysicsError::Disposed)));
    }

    #[test]
    fn test_rotation_roundtrip_through_backend() {
        let mut world = world();
        let rotation = Quat::from_rotation_y(0.7);
        let body = world
            .create_body(
                &BodyDefinition::kinematic().with_rotation(rotation),
                &ShapeDefinition::cuboid(Vec3::ONE),
            )
            .unwrap();
        world.step(1.0 / 60.0).unwrap();
        let actual = world.rotation(body).unwrap();
        assert_relative_eq!(actual.dot(rotation).abs(), 1.0, epsilon = 1e-5);
    }
}
