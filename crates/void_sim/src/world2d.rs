//! 2D physics world backed by rapier2d

use crate::backend::{self, rapier_glue, PairBudget, StepRunner};
use crate::body::{BodyDefinition, BodyHandle, BodyState, BodyType};
use crate::config::Settings2D;
use crate::conversion::{point2, ToBackend, ToEngine};
use crate::dimension::{Dim2, Dimension, Transform2};
use crate::error::{PhysicsError, Result};
use crate::events::{ContactHitEvent, EventBatch, EventDispatcher, MoveEvent, StepReport};
use crate::layers::{LayerTable, SpatialFilter};
use crate::query::{QueryFilter, RayHit};
use crate::registry::{BodyEntry, BodyRegistry, ColliderTag};
use crate::shape::{ShapeDefinition, LINEAR_SLOP};
use crate::simulation::{check_delta, stale_handle, Simulation, MAX_ROTATION_PER_STEP};
use glam::Vec2;
use rapier2d::prelude as rapier;
use std::num::NonZeroUsize;

type Entry = BodyEntry<Dim2, (rapier::RigidBodyHandle, rapier::ColliderHandle)>;

/// Rigid-body world in the plane
pub struct PhysicsWorld2D {
    settings: Settings2D,
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
    events: EventDispatcher<Dim2>,
    steps: u64,
    pair_budget: PairBudget,
    runner: StepRunner,
    disposed: bool,
}

impl PhysicsWorld2D {
    /// Create a world from settings and a finished layer table
    pub fn new(settings: Settings2D, layers: LayerTable) -> Result<Self> {
        settings.validate()?;
        let spatial = layers.build_spatial_filter()?;

        let mut integration_params = rapier::IntegrationParameters::default();
        integration_params.num_solver_iterations = NonZeroUsize::new(settings.velocity_iterations)
            .ok_or_else(|| {
                PhysicsError::Configuration("velocity_iterations must be positive".into())
            })?;
        integration_params.num_internal_pgs_iterations = settings.position_iterations;

        let runner = StepRunner::new(settings.common.multithreaded)?;

        let [gx, gy] = settings.gravity;
        log::info!(
            "Created {} physics world (gravity [{gx}, {gy}], {}/{} iterations, {} layers, {} stepping)",
            Dim2::NAME,
            settings.velocity_iterations,
            settings.position_iterations,
            layers.layers().count(),
            if runner.is_serial() { "serial" } else { "parallel" }
        );

        Ok(Self {
            gravity: rapier::Vector::new(gx, gy),
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
        Self::new(Settings2D::default(), LayerTable::default())
    }

    pub fn settings(&self) -> &Settings2D {
        &self.settings
    }

    pub fn gravity(&self) -> Vec2 {
        self.gravity.to_engine()
    }

    pub fn set_gravity(&mut self, gravity: Vec2) {
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

    fn rigid_body(def: &BodyDefinition<Dim2>) -> rapier::RigidBodyBuilder {
        let body_type = match def.body_type {
            BodyType::Static => rapier::RigidBodyType::Fixed,
            BodyType::Dynamic => rapier::RigidBodyType::Dynamic,
            BodyType::Kinematic => rapier::RigidBodyType::KinematicVelocityBased,
        };
        let mut builder = rapier::RigidBodyBuilder::new(body_type)
            .position(def.initial_transform().to_backend())
            .linvel(def.linear_velocity.to_backend())
            .angvel(def.angular_velocity)
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
        def: &BodyDefinition<Dim2>,
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
    fn refresh_states(&mut self, dt: f32, batch: &mut EventBatch<Dim2>) {
        let max_spin = MAX_ROTATION_PER_STEP / dt;
        for (handle, entry) in self.registry.iter_mut() {
            if entry.body_type == BodyType::Static {
                continue;
            }
            let Some(rb) = self.bodies.get_mut(entry.backend.0) else {
                continue;
            };

            if entry.body_type == BodyType::Dynamic {
                let spin = rb.angvel();
                if !entry.allow_fast_rotation && spin.abs() > max_spin {
                    rb.set_angvel(max_spin.copysign(spin), false);
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
                angular_velocity: rb.angvel(),
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

    fn ray(origin: Vec2, direction: Vec2, max_distance: f32) -> Option<rapier::Ray> {
        backend::ray_is_castable::<Dim2>(origin, direction, max_distance)
            .then(|| rapier::Ray::new(point2(origin), direction.normalize().to_backend()))
    }

    fn ray_hit(
        &self,
        collider: rapier::ColliderHandle,
        ray: &rapier::Ray,
        hit: rapier::RayIntersection,
        max_distance: f32,
    ) -> Option<RayHit<Dim2>> {
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

impl Simulation for PhysicsWorld2D {
    type Dim = Dim2;

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
        origin: Vec2,
        direction: Vec2,
        max_distance: f32,
        filter: &QueryFilter<'_>,
    ) -> Result<Option<RayHit<Dim2>>> {
        self.check_query(filter)?;
        let Some(ray) = Self::ray(origin, direction, max_distance) else {
            return Ok(None);
        };
        let predicate = |_: rapier::ColliderHandle, collider: &rapier::Collider| {
            let tag = ColliderTag::decode(collider.user_data);
            filter.accepts(&self.spatial, tag.body, tag.layer, tag.is_sensor)
        };

        Ok(self
            .query_pipeline
            .cast_ray_and_get_normal(
                &self.bodies,
                &self.colliders,
                &ray,
                max_distance,
                true,
                backend_filter(filter, &predicate),
            )
            .and_then(|(collider, hit)| self.ray_hit(collider, &ray, hit, max_distance)))
    }

    fn ray_cast_all(
        &self,
        origin: Vec2,
        direction: Vec2,
        max_distance: f32,
        filter: &QueryFilter<'_>,
    ) -> Result<Vec<RayHit<Dim2>>> {
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

    fn overlap_point(&self, point: Vec2, filter: &QueryFilter<'_>) -> Result<Vec<BodyHandle>> {
        self.check_query(filter)?;
        let predicate = |_: rapier::ColliderHandle, collider: &rapier::Collider| {
            let tag = ColliderTag::decode(collider.user_data);
            filter.accepts(&self.spatial, tag.body, tag.layer, tag.is_sensor)
        };

        let mut found = Vec::new();
        self.query_pipeline.intersections_with_point(
            &self.bodies,
            &self.colliders,
            &point2(point),
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
        body: &BodyDefinition<Dim2>,
        shape: &ShapeDefinition<Dim2>,
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
            Dim2::NAME,
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
        log::info!("Disposed {} physics world ({bodies} bodies released)", Dim2::NAME);
    }

    fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn body_state(&self, body: BodyHandle) -> Result<BodyState<Dim2>> {
        Ok(self.entry(body)?.state)
    }

    fn set_transform(&mut self, body: BodyHandle, transform: Transform2) -> Result<()> {
        let (rb, entry) = self.body_mut(body)?;
        rb.set_position(transform.to_backend(), true);
        entry.state.transform = transform;
        Ok(())
    }

    fn set_linear_velocity(&mut self, body: BodyHandle, velocity: Vec2) -> Result<()> {
        let (rb, entry) = self.body_mut(body)?;
        rb.set_linvel(velocity.to_backend(), true);
        entry.state.linear_velocity = velocity;
        Ok(())
    }

    fn set_angular_velocity(&mut self, body: BodyHandle, velocity: f32) -> Result<()> {
        let (rb, entry) = self.body_mut(body)?;
        rb.set_angvel(velocity, true);
        entry.state.angular_velocity = velocity;
        Ok(())
    }

    fn apply_force(&mut self, body: BodyHandle, force: Vec2) -> Result<()> {
        let (rb, _) = self.body_mut(body)?;
        rb.add_force(force.to_backend(), true);
        Ok(())
    }

    fn apply_linear_impulse(&mut self, body: BodyHandle, impulse: Vec2) -> Result<()> {
        let (rb, _) = self.body_mut(body)?;
        rb.apply_impulse(impulse.to_backend(), true);
        Ok(())
    }

    fn events(&mut self) -> &mut EventDispatcher<Dim2> {
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

impl std::fmt::Debug for PhysicsWorld2D {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicsWorld2D")
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
fn resolve_shape(shape: &ShapeDefinition<Dim2>) -> Result<(rapier::SharedShape, rapier::Isometry<f32>)> {
    let shared = match shape {
        ShapeDefinition::Box { half_extents } => {
            rapier::SharedShape::cuboid(half_extents.x, half_extents.y)
        }
        ShapeDefinition::Ball { radius } => rapier::SharedShape::ball(*radius),
        ShapeDefinition::Capsule {
            radius,
            half_height,
        } => rapier::SharedShape::capsule_y(*half_height, *radius),
        ShapeDefinition::Polygon { vertices } => convex_shape(vertices)?,
        ShapeDefinition::Chain { vertices, closed } => {
            let points = vertices.iter().copied().map(point2).collect();
            rapier::SharedShape::polyline(points, Some(backend::chain_indices(vertices.len(), *closed)))
        }
        ShapeDefinition::Segment { a, b } => rapier::SharedShape::segment(point2(*a), point2(*b)),
        ShapeDefinition::Transformed { shape, offset } => {
            let (inner, inner_offset) = resolve_shape(shape)?;
            return Ok((inner, offset.to_backend() * inner_offset));
        }
    };
    Ok((shared, rapier::Isometry::identity()))
}

/// Convex hull of a polygon with nonzero area
fn convex_shape(vertices: &[Vec2]) -> Result<rapier::SharedShape> {
    let origin = vertices.first().copied().unwrap_or(Vec2::ZERO);
    let has_area = vertices
        .iter()
        .any(|a| vertices.iter().any(|b| (*a - origin).perp_dot(*b - origin).abs() > LINEAR_SLOP * LINEAR_SLOP));
    if !has_area {
        return Err(PhysicsError::InvalidShape("polygon vertices are collinear".into()));
    }
    let points: Vec<_> = vertices.iter().copied().map(point2).collect();
    rapier::SharedShape::convex_hull(&points)
        .ok_or_else(|| PhysicsError::InvalidShape("convex hull computation failed".into()))
}

rapier_glue!(rapier);
