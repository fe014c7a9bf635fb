//! End-to-end scenarios for void_sim
//!
//! Each test builds a small scene, steps it at the fixed tick and checks
//! what listeners and accessors observe.

use approx::assert_relative_eq;
use glam::{Vec2, Vec3};
use parking_lot::Mutex;
use std::sync::Arc;
use void_sim::*;

const DT: f32 = 1.0 / 60.0;

const DEBRIS: ObjectLayer = ObjectLayer(2);

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn record<E: Clone + Send + 'static>() -> (Arc<Mutex<Vec<E>>>, impl FnMut(&E) -> ListenerResult + Send + 'static) {
    let store: Arc<Mutex<Vec<E>>> = Arc::default();
    let sink = store.clone();
    (store, move |event: &E| {
        sink.lock().push(event.clone());
        Ok(())
    })
}

fn ground_3d(world: &mut PhysicsWorld3D) -> BodyHandle {
    world
        .create_body(&BodyDefinition::fixed(), &ShapeDefinition::cuboid(Vec3::new(10.0, 0.5, 10.0)))
        .unwrap()
}

#[test]
fn scenario_box_settles_on_ground() {
    init_logging();
    let mut world = PhysicsWorld3D::new(
        Settings3D::default().with_gravity(0.0, -9.81, 0.0),
        LayerTable::default(),
    )
    .unwrap();
    let ground = ground_3d(&mut world);
    let falling = world
        .create_body(
            &BodyDefinition::dynamic().with_position(Vec3::new(0.0, 10.0, 0.0)),
            &ShapeDefinition::cuboid(Vec3::splat(0.5)),
        )
        .unwrap();

    let (contacts, listener) = record::<ContactTouchEvent>();
    world.events().on_contact_touch(listener);

    for _ in 0..180 {
        world.step(DT).unwrap();
    }

    // ground top (0.5) plus the box half extent (0.5)
    let resting = world.position(falling).unwrap();
    assert_relative_eq!(resting.y, 1.0, epsilon = 0.02);
    assert_relative_eq!(resting.x, 0.0, epsilon = 1e-3);

    let contacts = contacts.lock();
    let begins: Vec<_> = contacts.iter().filter(|e| e.begin).collect();
    assert_eq!(begins.len(), 1, "{contacts:?}");
    let pair = [begins[0].a, begins[0].b];
    assert!(pair.contains(&ground) && pair.contains(&falling));
    assert!(contacts.iter().all(|e| e.begin));
}

#[test]
fn scenario_unauthorized_layers_pass_through() {
    init_logging();
    let mut layers = LayerTable::default();
    layers
        .define_layer(DEBRIS, "Debris")
        .unwrap()
        .map_to_broad_phase(DEBRIS, BroadPhaseLayer::MOVING)
        .unwrap();
    // debris shares the Moving bucket, but no rule covers debris <-> debris

    let mut world =
        PhysicsWorld3D::new(Settings3D::default().with_gravity(0.0, 0.0, 0.0), layers).unwrap();
    let a = world
        .create_body(
            &BodyDefinition::dynamic().with_layer(DEBRIS),
            &ShapeDefinition::cuboid(Vec3::splat(0.5)),
        )
        .unwrap();
    let b = world
        .create_body(
            &BodyDefinition::dynamic()
                .with_layer(DEBRIS)
                .with_position(Vec3::new(0.3, 0.0, 0.0)),
            &ShapeDefinition::cuboid(Vec3::splat(0.5)),
        )
        .unwrap();

    let (contacts, listener) = record::<ContactTouchEvent>();
    world.events().on_contact_touch(listener);
    for _ in 0..30 {
        world.step(DT).unwrap();
    }

    assert!(contacts.lock().is_empty());
    // overlapping, yet never pushed apart
    assert_relative_eq!(world.position(a).unwrap().x, 0.0, epsilon = 1e-5);
    assert_relative_eq!(world.position(b).unwrap().x, 0.3, epsilon = 1e-5);

    // the same overlap on the Moving layer is resolved
    let c = world
        .create_body(
            &BodyDefinition::dynamic().with_position(Vec3::new(0.0, 5.0, 0.0)),
            &ShapeDefinition::cuboid(Vec3::splat(0.5)),
        )
        .unwrap();
    let d = world
        .create_body(
            &BodyDefinition::dynamic().with_position(Vec3::new(0.3, 5.0, 0.0)),
            &ShapeDefinition::cuboid(Vec3::splat(0.5)),
        )
        .unwrap();
    for _ in 0..30 {
        world.step(DT).unwrap();
    }
    let contacts = contacts.lock();
    assert!(contacts.iter().any(|e| e.begin && [e.a, e.b].contains(&c) && [e.a, e.b].contains(&d)));
}

#[test]
fn scenario_sensor_reports_enter_and_exit() {
    init_logging();
    let mut world = PhysicsWorld2D::with_defaults().unwrap();
    let sensor = world
        .create_body(
            &BodyDefinition::fixed().sensor(),
            &ShapeDefinition::cuboid(Vec2::new(2.0, 0.5)),
        )
        .unwrap();
    let ball = world
        .create_body(
            &BodyDefinition::dynamic().with_position(Vec2::new(0.0, 3.0)),
            &ShapeDefinition::ball(0.25),
        )
        .unwrap();

    let (touches, listener) = record::<SensorTouchEvent>();
    world.events().on_sensor_touch(listener);
    let (contacts, listener) = record::<ContactTouchEvent>();
    world.events().on_contact_touch(listener);

    for _ in 0..120 {
        world.step(DT).unwrap();
    }

    let touches = touches.lock();
    assert_eq!(
        *touches,
        vec![
            SensorTouchEvent { sensor, other: ball, begin: true },
            SensorTouchEvent { sensor, other: ball, begin: false },
        ]
    );
    // sensors never produce contacts, and the ball fell straight through
    assert!(contacts.lock().is_empty());
    assert!(world.position(ball).unwrap().y < -3.0);
}

#[test]
fn scenario_resting_body_falls_asleep() {
    init_logging();
    let mut world = PhysicsWorld3D::with_defaults().unwrap();
    ground_3d(&mut world);
    let body = world
        .create_body(
            &BodyDefinition::dynamic()
                .with_position(Vec3::new(0.0, 1.5, 0.0))
                .with_user_data(77),
            &ShapeDefinition::cuboid(Vec3::splat(0.5)),
        )
        .unwrap();

    let (moves, listener) = record::<MoveEvent<Dim3>>();
    world.events().on_move(listener);

    for _ in 0..600 {
        world.step(DT).unwrap();
        if !world.is_awake(body).unwrap() {
            break;
        }
    }
    assert!(!world.is_awake(body).unwrap(), "body never slept");

    let last = moves.lock().last().copied().unwrap();
    assert_eq!(last.body, body);
    assert_eq!(last.user_data, 77);
    assert!(last.fell_asleep);
    assert_eq!(moves.lock().iter().filter(|m| m.fell_asleep).count(), 1);

    // a sleeping body stays silent
    let before = moves.lock().len();
    for _ in 0..30 {
        let report = world.step(DT).unwrap();
        assert_eq!(report.events.moves, 0);
    }
    assert_eq!(moves.lock().len(), before);

    // waking it resumes move events
    world.apply_linear_impulse(body, Vec3::new(0.0, 3.0, 0.0)).unwrap();
    let report = world.step(DT).unwrap();
    assert_eq!(report.events.moves, 1);
    assert!(world.is_awake(body).unwrap());
}

#[test]
fn scenario_hard_landing_reports_hit() {
    init_logging();
    let mut settings = Settings3D::default();
    settings.common.hit_event_threshold = 0.5;
    let mut world = PhysicsWorld3D::new(settings, LayerTable::default()).unwrap();
    let ground = ground_3d(&mut world);
    let ball = world
        .create_body(
            &BodyDefinition::dynamic()
                .with_position(Vec3::new(0.0, 6.0, 0.0))
                .with_hit_events(true),
            &ShapeDefinition::ball(0.5),
        )
        .unwrap();
    let quiet = world
        .create_body(
            &BodyDefinition::dynamic().with_position(Vec3::new(4.0, 6.0, 0.0)),
            &ShapeDefinition::ball(0.5),
        )
        .unwrap();

    let (hits, listener) = record::<ContactHitEvent<Dim3>>();
    world.events().on_contact_hit(listener);
    for _ in 0..120 {
        world.step(DT).unwrap();
    }

    let hits = hits.lock();
    assert!(!hits.is_empty());
    for hit in hits.iter() {
        let pair = [hit.a, hit.b];
        assert!(pair.contains(&ball) && pair.contains(&ground));
        assert!(!pair.contains(&quiet));
        assert!(hit.impulse >= 0.5);
        assert_relative_eq!(hit.normal.length(), 1.0, epsilon = 1e-3);
        assert_relative_eq!(hit.normal.y.abs(), 1.0, epsilon = 1e-2);
    }
}

#[test]
fn scenario_ray_cast_filters() {
    init_logging();
    let mut world =
        PhysicsWorld3D::new(Settings3D::default().with_gravity(0.0, 0.0, 0.0), LayerTable::default())
            .unwrap();
    let sensor = world
        .create_body(
            &BodyDefinition::fixed().sensor().with_position(Vec3::new(1.0, 0.0, 0.0)),
            &ShapeDefinition::ball(0.25),
        )
        .unwrap();
    let mover = world
        .create_body(
            &BodyDefinition::kinematic().with_position(Vec3::new(3.0, 0.0, 0.0)),
            &ShapeDefinition::cuboid(Vec3::splat(0.5)),
        )
        .unwrap();
    let wall = world
        .create_body(
            &BodyDefinition::fixed().with_position(Vec3::new(6.0, 0.0, 0.0)),
            &ShapeDefinition::cuboid(Vec3::splat(0.5)),
        )
        .unwrap();

    let cast = |filter: &QueryFilter<'_>| {
        world
            .ray_cast(Vec3::ZERO, Vec3::X, 20.0, filter)
            .unwrap()
            .map(|hit| hit.body)
    };

    assert_eq!(cast(&QueryFilter::new()), Some(mover));
    assert_eq!(cast(&QueryFilter::new().with_sensors(true)), Some(sensor));
    let skip = [mover];
    assert_eq!(cast(&QueryFilter::new().excluding(&skip)), Some(wall));
    assert_eq!(cast(&QueryFilter::new().only_layer(ObjectLayer::NON_MOVING)), Some(wall));
    assert_eq!(
        cast(&QueryFilter::new().with_broad_phase(BroadPhaseLayer::NON_MOVING.bit())),
        Some(wall)
    );
    let not_mover = |body: BodyHandle| body != mover;
    assert_eq!(cast(&QueryFilter::new().with_predicate(&not_mover)), Some(wall));

    let hit = world
        .ray_cast(Vec3::ZERO, Vec3::X * 4.0, 20.0, &QueryFilter::new())
        .unwrap()
        .unwrap();
    assert_relative_eq!(hit.distance, 2.5, epsilon = 1e-4);
    assert_relative_eq!(hit.fraction, 2.5 / 20.0, epsilon = 1e-5);
    assert_relative_eq!(hit.point.x, 2.5, epsilon = 1e-4);
    assert_relative_eq!(hit.normal.x, -1.0, epsilon = 1e-4);

    let all: Vec<_> = world
        .ray_cast_all(Vec3::ZERO, Vec3::X, 20.0, &QueryFilter::new().with_sensors(true))
        .unwrap()
        .into_iter()
        .map(|hit| hit.body)
        .collect();
    assert_eq!(all, vec![sensor, mover, wall]);

    let inside = world
        .overlap_point(Vec3::new(6.2, 0.1, 0.0), &QueryFilter::new())
        .unwrap();
    assert_eq!(inside, vec![wall]);
    assert!(world
        .overlap_point(Vec3::new(1.0, 0.0, 0.0), &QueryFilter::new())
        .unwrap()
        .is_empty());
}

#[test]
fn scenario_static_view_filter() {
    let mut world = PhysicsWorld2D::with_defaults().unwrap();
    let floor = world
        .create_body(&BodyDefinition::fixed(), &ShapeDefinition::cuboid(Vec2::new(5.0, 0.5)))
        .unwrap();
    world
        .create_body(
            &BodyDefinition::fixed().with_position(Vec2::new(0.0, 3.0)),
            &ShapeDefinition::cuboid(Vec2::new(5.0, 0.5)),
        )
        .unwrap();
    let crate_box = world
        .create_body(
            &BodyDefinition::dynamic().with_position(Vec2::new(0.0, 1.5)),
            &ShapeDefinition::cuboid(Vec2::splat(0.25)),
        )
        .unwrap();

    // what a static body could collide with: only moving things
    let filter =
        QueryFilter::colliding_with(world.layers(), world.spatial_filter(), ObjectLayer::NON_MOVING);
    let hits: Vec<_> = world
        .ray_cast_all(Vec2::new(0.0, 5.0), Vec2::NEG_Y, 10.0, &filter)
        .unwrap()
        .into_iter()
        .map(|hit| hit.body)
        .collect();
    assert_eq!(hits, vec![crate_box]);

    let everything = world
        .ray_cast_all(Vec2::new(0.0, 5.0), Vec2::NEG_Y, 10.0, &QueryFilter::new())
        .unwrap();
    assert_eq!(everything.len(), 3);
    assert_eq!(everything.last().map(|hit| hit.body), Some(floor));
}

#[test]
fn scenario_kinematic_moves_are_published() {
    let mut world = PhysicsWorld2D::with_defaults().unwrap();
    world
        .create_body(&BodyDefinition::fixed(), &ShapeDefinition::ball(1.0))
        .unwrap();
    let platform = world
        .create_body(
            &BodyDefinition::kinematic()
                .with_position(Vec2::new(0.0, 5.0))
                .with_linear_velocity(Vec2::new(2.0, 0.0))
                .with_user_data(0xfeed),
            &ShapeDefinition::cuboid(Vec2::new(1.0, 0.1)),
        )
        .unwrap();

    let (moves, listener) = record::<MoveEvent<Dim2>>();
    world.events().on_move(listener);
    for _ in 0..10 {
        let report = world.step(DT).unwrap();
        assert_eq!(report.events.moves, 1);
    }

    let moves = moves.lock();
    assert!(moves.iter().all(|m| m.body == platform && m.user_data == 0xfeed && !m.fell_asleep));
    assert_relative_eq!(moves[9].transform.translation.x, 20.0 * DT, epsilon = 1e-4);
    assert_relative_eq!(world.linear_velocity(platform).unwrap().x, 2.0, epsilon = 1e-5);
}

#[test]
fn scenario_destroyed_body_events_are_dropped() {
    init_logging();
    let mut world = PhysicsWorld2D::with_defaults().unwrap();
    world
        .create_body(
            &BodyDefinition::fixed().sensor(),
            &ShapeDefinition::cuboid(Vec2::new(5.0, 5.0)),
        )
        .unwrap();
    let inside = world
        .create_body(
            &BodyDefinition::dynamic().with_gravity_scale(0.0),
            &ShapeDefinition::ball(0.5),
        )
        .unwrap();

    let (touches, listener) = record::<SensorTouchEvent>();
    world.events().on_sensor_touch(listener);
    world.step(DT).unwrap();
    assert_eq!(touches.lock().len(), 1);

    world.destroy_body(inside).unwrap();
    for _ in 0..5 {
        world.step(DT).unwrap();
    }
    // the overlap ended with the body, but nothing names a dead handle
    assert_eq!(touches.lock().len(), 1);
}

#[test]
fn scenario_forces_last_one_step() {
    let mut world =
        PhysicsWorld3D::new(Settings3D::default().with_gravity(0.0, 0.0, 0.0), LayerTable::default())
            .unwrap();
    // unit cube of unit density: 1 kg
    let body = world
        .create_body(&BodyDefinition::dynamic(), &ShapeDefinition::cuboid(Vec3::splat(0.5)))
        .unwrap();

    world.apply_force(body, Vec3::new(60.0, 0.0, 0.0)).unwrap();
    world.step(DT).unwrap();
    assert_relative_eq!(world.linear_velocity(body).unwrap().x, 1.0, epsilon = 1e-3);

    world.step(DT).unwrap();
    assert_relative_eq!(world.linear_velocity(body).unwrap().x, 1.0, epsilon = 1e-3);

    world.apply_linear_impulse(body, Vec3::new(0.0, 0.0, 2.0)).unwrap();
    world.step(DT).unwrap();
    assert_relative_eq!(world.linear_velocity(body).unwrap().z, 2.0, epsilon = 1e-3);

    world.set_linear_velocity(body, Vec3::ZERO).unwrap();
    world.set_angular_velocity(body, Vec3::Y).unwrap();
    assert_eq!(world.linear_velocity(body).unwrap(), Vec3::ZERO);
    world.step(DT).unwrap();
    assert_relative_eq!(world.angular_velocity(body).unwrap().y, 1.0, epsilon = 1e-3);

    world
        .set_transform(body, Transform3::from_translation(Vec3::new(0.0, 7.0, 0.0)))
        .unwrap();
    world.step(DT).unwrap();
    assert_relative_eq!(world.position(body).unwrap().y, 7.0, epsilon = 1e-3);
}

#[test]
fn scenario_custom_layer_table_from_json() {
    let mut layers = LayerTable::default();
    layers
        .define_layer(DEBRIS, "Debris")
        .unwrap()
        .map_to_broad_phase(DEBRIS, BroadPhaseLayer::MOVING)
        .unwrap()
        .enable_collision(DEBRIS, ObjectLayer::NON_MOVING)
        .unwrap();
    let json = serde_json::to_string(&layers).unwrap();
    let loaded: LayerTable = serde_json::from_str(&json).unwrap();
    assert_eq!(loaded.layer_by_name("Debris"), Some(DEBRIS));

    let mut world = PhysicsWorld2D::new(Settings2D::default(), loaded).unwrap();
    world
        .create_body(&BodyDefinition::fixed(), &ShapeDefinition::cuboid(Vec2::new(10.0, 0.5)))
        .unwrap();
    let debris = world
        .create_body(
            &BodyDefinition::dynamic()
                .with_layer(DEBRIS)
                .with_position(Vec2::new(0.0, 2.0)),
            &ShapeDefinition::ball(0.25),
        )
        .unwrap();
    for _ in 0..120 {
        world.step(DT).unwrap();
    }
    // debris lands on the static floor
    assert_relative_eq!(world.position(debris).unwrap().y, 0.75, epsilon = 0.02);
}
