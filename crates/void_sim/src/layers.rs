//! Collision layers and filtering
//!
//! Two tiers decide whether two bodies may ever interact:
//!
//! - **Object layers** carry the fine-grained pairwise authorization table.
//! - **Broad-phase layers** are coarse buckets; every object layer maps to
//!   exactly one. The [`SpatialFilter`] derived from the table tells the
//!   backend which bucket pairs are worth testing at all.
//!
//! Everything here is plain data: bit rows indexed by layer id.

use crate::error::{PhysicsError, Result};
use serde::{Deserialize, Serialize};

/// Maximum number of object layers
pub const MAX_OBJECT_LAYERS: usize = 64;

/// Maximum number of broad-phase buckets
pub const MAX_BROAD_PHASE_LAYERS: usize = 32;

/// Fine-grained collision layer identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectLayer(pub u16);

impl ObjectLayer {
    /// Static environment
    pub const NON_MOVING: Self = Self(0);
    /// Everything that moves
    pub const MOVING: Self = Self(1);

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Row bit for this layer; zero when the id is out of range
    #[inline]
    pub fn bit(self) -> u64 {
        1u64.checked_shl(u32::from(self.0)).unwrap_or(0)
    }
}

/// Coarse broad-phase bucket identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BroadPhaseLayer(pub u8);

impl BroadPhaseLayer {
    pub const NON_MOVING: Self = Self(0);
    pub const MOVING: Self = Self(1);

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Mask bit for this bucket; zero when the id is out of range
    #[inline]
    pub fn bit(self) -> u32 {
        1u32.checked_shl(u32::from(self.0)).unwrap_or(0)
    }
}

/// Registered layers, their broad-phase mapping and the collision table
///
/// Deserialized tables go through the same checks as the builder methods:
/// exact lengths, buckets in range, rows naming registered layers only and
/// a symmetric collision table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawLayerTable")]
pub struct LayerTable {
    /// Layer names, indexed by layer id
    names: Vec<Option<String>>,
    /// Broad-phase bucket, indexed by layer id
    broad_phase: Vec<Option<BroadPhaseLayer>>,
    /// Row `i` holds the bits of every layer that collides with layer `i`
    rows: Vec<u64>,
}

/// Unchecked wire form of [`LayerTable`]
#[derive(Deserialize)]
struct RawLayerTable {
    names: Vec<Option<String>>,
    broad_phase: Vec<Option<BroadPhaseLayer>>,
    rows: Vec<u64>,
}

impl TryFrom<RawLayerTable> for LayerTable {
    type Error = PhysicsError;

    fn try_from(raw: RawLayerTable) -> Result<Self> {
        let lengths = [raw.names.len(), raw.broad_phase.len(), raw.rows.len()];
        if lengths.iter().any(|&len| len != MAX_OBJECT_LAYERS) {
            return Err(PhysicsError::Configuration(format!(
                "layer table needs {MAX_OBJECT_LAYERS} entries per column, got {lengths:?}"
            )));
        }

        let registered = raw
            .names
            .iter()
            .enumerate()
            .filter(|(_, name)| name.is_some())
            .fold(0u64, |mask, (i, _)| mask | ObjectLayer(i as u16).bit());

        for (i, bucket) in raw.broad_phase.iter().enumerate() {
            let layer = ObjectLayer(i as u16);
            let Some(bucket) = bucket else { continue };
            if registered & layer.bit() == 0 {
                return Err(PhysicsError::UnmappedLayer(layer));
            }
            if bucket.index() >= MAX_BROAD_PHASE_LAYERS {
                return Err(PhysicsError::Configuration(format!(
                    "broad-phase layer {} out of range (max {})",
                    bucket.0,
                    MAX_BROAD_PHASE_LAYERS - 1
                )));
            }
        }

        for (i, &row) in raw.rows.iter().enumerate() {
            let layer = ObjectLayer(i as u16);
            if row == 0 {
                continue;
            }
            if registered & layer.bit() == 0 || row & !registered != 0 {
                return Err(PhysicsError::Configuration(format!(
                    "collision row {i} names unregistered layers"
                )));
            }
            for j in 0..MAX_OBJECT_LAYERS {
                let other = ObjectLayer(j as u16);
                if row & other.bit() != 0 && raw.rows[j] & layer.bit() == 0 {
                    return Err(PhysicsError::Configuration(format!(
                        "collision table is not symmetric: {i} -> {j} without {j} -> {i}"
                    )));
                }
            }
        }

        Ok(Self {
            names: raw.names,
            broad_phase: raw.broad_phase,
            rows: raw.rows,
        })
    }
}

impl Default for LayerTable {
    /// `NonMoving` and `Moving` in their own buckets; moving bodies collide
    /// with everything, static bodies never collide with each other.
    fn default() -> Self {
        let (still, moving) = (ObjectLayer::NON_MOVING, ObjectLayer::MOVING);
        let mut table = Self::new();
        table.names[still.index()] = Some("NonMoving".to_string());
        table.names[moving.index()] = Some("Moving".to_string());
        table.broad_phase[still.index()] = Some(BroadPhaseLayer::NON_MOVING);
        table.broad_phase[moving.index()] = Some(BroadPhaseLayer::MOVING);
        table.rows[still.index()] = moving.bit();
        table.rows[moving.index()] = moving.bit() | still.bit();
        table
    }
}

impl LayerTable {
    /// Create a table with no layers
    pub fn new() -> Self {
        Self {
            names: vec![None; MAX_OBJECT_LAYERS],
            broad_phase: vec![None; MAX_OBJECT_LAYERS],
            rows: vec![0; MAX_OBJECT_LAYERS],
        }
    }

    /// Register a layer
    pub fn define_layer(&mut self, layer: ObjectLayer, name: &str) -> Result<&mut Self> {
        if layer.index() >= MAX_OBJECT_LAYERS {
            return Err(PhysicsError::Configuration(format!(
                "object layer {} out of range (max {})",
                layer.0,
                MAX_OBJECT_LAYERS - 1
            )));
        }
        let slot = &mut self.names[layer.index()];
        if slot.is_some() {
            return Err(PhysicsError::DuplicateLayer(layer));
        }
        *slot = Some(name.to_string());
        Ok(self)
    }

    /// Assign a registered layer to a broad-phase bucket
    pub fn map_to_broad_phase(
        &mut self,
        layer: ObjectLayer,
        broad: BroadPhaseLayer,
    ) -> Result<&mut Self> {
        self.require_registered(layer)?;
        if broad.index() >= MAX_BROAD_PHASE_LAYERS {
            return Err(PhysicsError::Configuration(format!(
                "broad-phase layer {} out of range (max {})",
                broad.0,
                MAX_BROAD_PHASE_LAYERS - 1
            )));
        }
        self.broad_phase[layer.index()] = Some(broad);
        Ok(self)
    }

    /// Mark the unordered pair `{a, b}` as collidable
    pub fn enable_collision(&mut self, a: ObjectLayer, b: ObjectLayer) -> Result<&mut Self> {
        self.require_registered(a)?;
        self.require_registered(b)?;
        self.rows[a.index()] |= b.bit();
        self.rows[b.index()] |= a.bit();
        Ok(self)
    }

    /// Remove the unordered pair `{a, b}` from the table
    pub fn disable_collision(&mut self, a: ObjectLayer, b: ObjectLayer) -> Result<&mut Self> {
        self.require_registered(a)?;
        self.require_registered(b)?;
        self.rows[a.index()] &= !b.bit();
        self.rows[b.index()] &= !a.bit();
        Ok(self)
    }

    /// Whether bodies on `a` and `b` may interact
    pub fn authorize_pair(&self, a: ObjectLayer, b: ObjectLayer) -> bool {
        a.index() < MAX_OBJECT_LAYERS
            && b.index() < MAX_OBJECT_LAYERS
            && self.rows[a.index()] & b.bit() != 0
    }

    /// Bitmask of layers `layer` collides with
    pub fn collision_mask(&self, layer: ObjectLayer) -> u64 {
        self.rows.get(layer.index()).copied().unwrap_or(0)
    }

    pub fn is_registered(&self, layer: ObjectLayer) -> bool {
        self.names.get(layer.index()).is_some_and(Option::is_some)
    }

    pub fn name(&self, layer: ObjectLayer) -> Option<&str> {
        self.names.get(layer.index())?.as_deref()
    }

    /// Look a layer up by its registered name
    pub fn layer_by_name(&self, name: &str) -> Option<ObjectLayer> {
        self.names
            .iter()
            .position(|n| n.as_deref() == Some(name))
            .map(|i| ObjectLayer(i as u16))
    }

    pub fn broad_phase_of(&self, layer: ObjectLayer) -> Option<BroadPhaseLayer> {
        self.broad_phase.get(layer.index()).copied().flatten()
    }

    /// Registered layers in id order
    pub fn layers(&self) -> impl Iterator<Item = ObjectLayer> + '_ {
        self.names
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_some())
            .map(|(i, _)| ObjectLayer(i as u16))
    }

    /// Derive the bucket-pair filter used by the backend.
    ///
    /// Fails with [`PhysicsError::UnmappedLayer`] unless every registered
    /// layer has a broad-phase bucket.
    pub fn build_spatial_filter(&self) -> Result<SpatialFilter> {
        let mut layer_buckets = [None; MAX_OBJECT_LAYERS];
        for layer in self.layers() {
            let bucket = self
                .broad_phase_of(layer)
                .ok_or(PhysicsError::UnmappedLayer(layer))?;
            layer_buckets[layer.index()] = Some(bucket);
        }

        let mut bucket_masks = [0u32; MAX_BROAD_PHASE_LAYERS];
        let mut object_masks = [0u32; MAX_OBJECT_LAYERS];
        for a in self.layers() {
            for b in self.layers() {
                if !self.authorize_pair(a, b) {
                    continue;
                }
                // both mapped, checked above
                let (Some(ba), Some(bb)) = (layer_buckets[a.index()], layer_buckets[b.index()])
                else {
                    continue;
                };
                bucket_masks[ba.index()] |= bb.bit();
                bucket_masks[bb.index()] |= ba.bit();
                object_masks[a.index()] |= bb.bit();
            }
        }

        Ok(SpatialFilter {
            layer_buckets,
            bucket_masks,
            object_masks,
        })
    }

    fn require_registered(&self, layer: ObjectLayer) -> Result<()> {
        if self.is_registered(layer) {
            Ok(())
        } else {
            Err(PhysicsError::UnmappedLayer(layer))
        }
    }
}

/// Bucket-level filter derived from a [`LayerTable`]
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialFilter {
    layer_buckets: [Option<BroadPhaseLayer>; MAX_OBJECT_LAYERS],
    /// Bucket `i` -> bits of buckets it may pair with
    bucket_masks: [u32; MAX_BROAD_PHASE_LAYERS],
    /// Object layer `i` -> bits of buckets holding something it collides with
    object_masks: [u32; MAX_OBJECT_LAYERS],
}

impl SpatialFilter {
    /// Whether objects in buckets `a` and `b` are ever tested against each other
    pub fn buckets_may_pair(&self, a: BroadPhaseLayer, b: BroadPhaseLayer) -> bool {
        self.bucket_mask(a) & b.bit() != 0
    }

    /// Whether an object on `layer` may collide with anything in `bucket`
    pub fn object_vs_bucket(&self, layer: ObjectLayer, bucket: BroadPhaseLayer) -> bool {
        self.object_masks
            .get(layer.index())
            .is_some_and(|mask| mask & bucket.bit() != 0)
    }

    pub fn bucket_of(&self, layer: ObjectLayer) -> Option<BroadPhaseLayer> {
        self.layer_buckets.get(layer.index()).copied().flatten()
    }

    /// Bits of every bucket `bucket` may pair with
    pub fn bucket_mask(&self, bucket: BroadPhaseLayer) -> u32 {
        self.bucket_masks.get(bucket.index()).copied().unwrap_or(0)
    }

    /// Bits of every bucket an object on `layer` may pair with
    pub fn object_mask(&self, layer: ObjectLayer) -> u32 {
        self.object_masks.get(layer.index()).copied().unwrap_or(0)
    }
}
