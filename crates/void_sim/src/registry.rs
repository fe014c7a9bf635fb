//! Generational body registry and collider tagging

use crate::body::{BodyHandle, BodyState, BodyType};
use crate::dimension::Dimension;
use crate::layers::{LayerTable, ObjectLayer};

/// Identity carried in a backend collider's `user_data`, so hooks and
/// event collectors resolve bodies without a map lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ColliderTag {
    pub body: BodyHandle,
    pub layer: ObjectLayer,
    pub is_sensor: bool,
}

impl ColliderTag {
    // bits 0..1 sensor, 16..32 layer, 64..128 body handle
    pub fn encode(self) -> u128 {
        ((self.body.to_bits() as u128) << 64) | ((self.layer.0 as u128) << 16) | self.is_sensor as u128
    }

    pub fn decode(bits: u128) -> Self {
        Self {
            body: BodyHandle::from_bits((bits >> 64) as u64),
            layer: ObjectLayer((bits >> 16) as u16),
            is_sensor: bits & 1 != 0,
        }
    }
}

/// Fine-grained layer check run by the backend's pair filter hooks
pub(crate) fn tags_may_collide(table: &LayerTable, a: u128, b: u128) -> bool {
    table.authorize_pair(ColliderTag::decode(a).layer, ColliderTag::decode(b).layer)
}

/// Per-body bookkeeping kept next to the backend handles
#[derive(Debug, Clone)]
pub(crate) struct BodyEntry<D: Dimension, B> {
    /// Backend rigid body + collider handles
    pub backend: B,
    pub body_type: BodyType,
    pub allow_fast_rotation: bool,
    pub user_data: u64,
    /// Snapshot published after the last step
    pub state: BodyState<D>,
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot map handing out [`BodyHandle`]s
#[derive(Debug)]
pub(crate) struct BodyRegistry<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Default for BodyRegistry<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }
}

impl<T> BodyRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle the next `insert` will return
    pub fn next_handle(&self) -> BodyHandle {
        match self.free.last() {
            Some(&index) => BodyHandle::new(index, self.slots[index as usize].generation),
            None => BodyHandle::new(self.slots.len() as u32, 0),
        }
    }

    pub fn insert(&mut self, value: T) -> BodyHandle {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return BodyHandle::new(index, slot.generation);
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        BodyHandle::new(index, 0)
    }

    pub fn get(&self, handle: BodyHandle) -> Option<&T> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, handle: BodyHandle) -> Option<&mut T> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    pub fn contains(&self, handle: BodyHandle) -> bool {
        self.get(handle).is_some()
    }

    pub fn remove(&mut self, handle: BodyHandle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.len -= 1;
        Some(value)
    }

    /// Drop every value; all outstanding handles become stale
    pub fn clear(&mut self) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.value.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
            }
        }
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (BodyHandle, &mut T)> {
        self.slots.iter_mut().enumerate().filter_map(|(i, slot)| {
            let generation = slot.generation;
            slot.value
                .as_mut()
                .map(move |v| (BodyHandle::new(i as u32, generation), v))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_roundtrip() {
        let tag = ColliderTag {
            body: BodyHandle::new(9, 3),
            layer: ObjectLayer(42),
            is_sensor: true,
        };
        assert_eq!(ColliderTag::decode(tag.encode()), tag);
    }

    #[test]
    fn test_tags_follow_layer_table() {
        let table = LayerTable::default();
        let tag = |layer| {
            ColliderTag {
                body: BodyHandle::new(0, 0),
                layer,
                is_sensor: false,
            }
            .encode()
        };
        assert!(tags_may_collide(&table, tag(ObjectLayer::MOVING), tag(ObjectLayer::NON_MOVING)));
        assert!(!tags_may_collide(&table, tag(ObjectLayer::NON_MOVING), tag(ObjectLayer::NON_MOVING)));
    }

    #[test]
    fn test_removed_handle_is_stale() {
        let mut registry = BodyRegistry::new();
        let a = registry.insert("a");
        assert_eq!(registry.remove(a), Some("a"));
        assert_eq!(registry.remove(a), None);
        assert!(!registry.contains(a));

        // slot is reused with a new generation
        let b = registry.insert("b");
        assert_eq!(b.index(), a.index());
        assert_ne!(b, a);
        assert_eq!(registry.get(a), None);
        assert_eq!(registry.get(b), Some(&"b"));
    }

    #[test]
    fn test_next_handle_predicts_insert() {
        let mut registry = BodyRegistry::new();
        let a = registry.insert(1);
        registry.insert(2);
        registry.remove(a);
        let predicted = registry.next_handle();
        assert_eq!(registry.insert(3), predicted);
    }

    #[test]
    fn test_clear_invalidates_everything() {
        let mut registry = BodyRegistry::new();
        let handles: Vec<_> = (0..4).map(|i| registry.insert(i)).collect();
        registry.clear();
        assert_eq!(registry.len(), 0);
        assert!(handles.iter().all(|h| !registry.contains(*h)));
        assert_eq!(registry.iter_mut().count(), 0);
    }
}
