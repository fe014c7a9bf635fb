//! Spatial query filters and results

use crate::body::BodyHandle;
use crate::dimension::Dimension;
use crate::layers::{LayerTable, ObjectLayer, SpatialFilter};

/// Composable filter for ray casts and point queries.
///
/// The broad-phase predicate, the object-layer predicate and the body
/// predicate are ANDed: a body is reported only if all three accept it.
#[derive(Clone, Copy)]
pub struct QueryFilter<'a> {
    /// Bits of the broad-phase buckets to search
    pub broad_phase: u32,
    /// Bits of the object layers to accept
    pub object_layers: u64,
    /// Report sensor bodies too
    pub include_sensors: bool,
    /// Bodies never reported
    pub excluded: &'a [BodyHandle],
    /// Extra per-body predicate
    pub predicate: Option<&'a dyn Fn(BodyHandle) -> bool>,
}

impl Default for QueryFilter<'_> {
    fn default() -> Self {
        Self {
            broad_phase: u32::MAX,
            object_layers: u64::MAX,
            include_sensors: false,
            excluded: &[],
            predicate: None,
        }
    }
}

impl std::fmt::Debug for QueryFilter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryFilter")
            .field("broad_phase", &format_args!("{:#x}", self.broad_phase))
            .field("object_layers", &format_args!("{:#x}", self.object_layers))
            .field("include_sensors", &self.include_sensors)
            .field("excluded", &self.excluded)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

impl<'a> QueryFilter<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept only what a body on `layer` could collide with
    pub fn colliding_with(table: &LayerTable, filter: &SpatialFilter, layer: ObjectLayer) -> Self {
        Self {
            broad_phase: filter.object_mask(layer),
            object_layers: table.collision_mask(layer),
            ..Self::default()
        }
    }

    pub fn with_broad_phase(mut self, mask: u32) -> Self {
        self.broad_phase = mask;
        self
    }

    pub fn with_object_layers(mut self, mask: u64) -> Self {
        self.object_layers = mask;
        self
    }

    /// Restrict to a single object layer
    pub fn only_layer(mut self, layer: ObjectLayer) -> Self {
        self.object_layers = layer.bit();
        self
    }

    pub fn with_sensors(mut self, include: bool) -> Self {
        self.include_sensors = include;
        self
    }

    pub fn excluding(mut self, bodies: &'a [BodyHandle]) -> Self {
        self.excluded = bodies;
        self
    }

    pub fn with_predicate(mut self, predicate: &'a dyn Fn(BodyHandle) -> bool) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Whether a candidate body passes every predicate
    pub fn accepts(
        &self,
        spatial: &SpatialFilter,
        body: BodyHandle,
        layer: ObjectLayer,
        is_sensor: bool,
    ) -> bool {
        let in_bucket = spatial
            .bucket_of(layer)
            .is_some_and(|bucket| self.broad_phase & bucket.bit() != 0);
        in_bucket
            && self.object_layers & layer.bit() != 0
            && (self.include_sensors || !is_sensor)
            && !self.excluded.contains(&body)
            && self.predicate.map_or(true, |p| p(body))
    }
}

/// First (or every) body struck by a ray
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit<D: Dimension> {
    pub body: BodyHandle,
    /// World-space hit point
    pub point: D::Vector,
    /// Surface normal at the hit point
    pub normal: D::Vector,
    /// Position along the ray in `[0, 1]` of the max distance
    pub fraction: f32,
    /// Distance from the ray origin
    pub distance: f32,
}
