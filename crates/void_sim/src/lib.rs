//! Void Sim - layered rigid-body simulation on Rapier
//!
//! One backend-independent vocabulary (bodies, shapes, layers, events,
//! queries) drives a 2D world on rapier2d and a 3D world on rapier3d.
//!
//! # Features
//!
//! - Static, dynamic and kinematic bodies with sensors
//! - Object layers grouped into broad-phase buckets, with an explicit
//!   symmetric collision table
//! - Move, sensor, contact and hit events delivered in a fixed order
//!   after every step
//! - Ray casts and point queries with composable filters
//! - Generational body handles; stale handles are reported, never reused
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │           PhysicsWorld2D / PhysicsWorld3D         │
//! │  ┌──────────────┐ ┌────────────┐ ┌─────────────┐ │
//! │  │ BodyRegistry │ │ LayerTable │ │ QueryFilter │ │
//! │  └──────────────┘ └────────────┘ └─────────────┘ │
//! │  ┌──────────────────────────────────────────────┐│
//! │  │  Rapier pipeline + layer hooks + collector   ││
//! │  └──────────────────────────────────────────────┘│
//! └──────────────────────────────────────────────────┘
//!                         │ step()
//!                         ▼
//!                  ┌─────────────┐
//!                  │ EventBatch  │──▶ EventDispatcher ──▶ listeners
//!                  └─────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use void_sim::prelude::*;
//! use glam::Vec3;
//!
//! let mut world = PhysicsWorld3D::new(Settings3D::default(), LayerTable::default())?;
//!
//! world.create_body(&BodyDefinition::fixed(), &ShapeDefinition::cuboid(Vec3::new(10.0, 0.5, 10.0)))?;
//! let crate_box = world.create_body(
//!     &BodyDefinition::dynamic().with_position(Vec3::new(0.0, 10.0, 0.0)),
//!     &ShapeDefinition::cuboid(Vec3::splat(0.5)),
//! )?;
//!
//! world.events().on_contact_touch(|event| {
//!     println!("touch {:?} <-> {:?}", event.a, event.b);
//!     Ok(())
//! });
//!
//! let report = world.step(1.0 / 60.0)?;
//! assert!(report.is_clean());
//! let position = world.position(crate_box)?;
//! ```

#[cfg(any(feature = "dim2", feature = "dim3"))]
mod backend;
pub mod body;
pub mod config;
pub mod conversion;
pub mod dimension;
pub mod error;
pub mod events;
pub mod layers;
pub mod material;
pub mod query;
mod registry;
pub mod shape;
pub mod simulation;
#[cfg(feature = "dim2")]
pub mod world2d;
#[cfg(feature = "dim3")]
pub mod world3d;

pub mod prelude {
    //! Common imports for simulation code
    pub use crate::body::{BodyDefinition, BodyFlags, BodyHandle, BodyState, BodyType};
    pub use crate::config::{CommonSettings, Settings2D, Settings3D};
    pub use crate::dimension::{Dim2, Dim3, Dimension, Transform, Transform2, Transform3};
    pub use crate::error::{PhysicsError, Result};
    pub use crate::events::{
        ContactHitEvent, ContactTouchEvent, EventCounts, EventDispatcher, EventKind,
        ListenerError, ListenerFailure, ListenerId, ListenerResult, MoveEvent, PhysicsEvent,
        SensorTouchEvent, StepReport,
    };
    pub use crate::layers::{
        BroadPhaseLayer, LayerTable, ObjectLayer, SpatialFilter, MAX_BROAD_PHASE_LAYERS,
        MAX_OBJECT_LAYERS,
    };
    pub use crate::material::{CombineRule, Material};
    pub use crate::query::{QueryFilter, RayHit};
    pub use crate::shape::ShapeDefinition;
    pub use crate::simulation::Simulation;
    #[cfg(feature = "dim2")]
    pub use crate::world2d::PhysicsWorld2D;
    #[cfg(feature = "dim3")]
    pub use crate::world3d::PhysicsWorld3D;
}

pub use prelude::*;
