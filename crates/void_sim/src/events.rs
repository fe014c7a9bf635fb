//! Simulation events and their delivery
//!
//! After every step the world drains the backend's raw queues into an
//! owned [`EventBatch`], flattens it into the fixed delivery order and hands
//! it to the [`EventDispatcher`]. Nothing is retained afterwards: an event
//! nobody listened to during its step is gone.

use crate::body::BodyHandle;
use crate::dimension::{Dimension, Transform};
use crate::registry::ColliderTag;
use std::panic::{self, AssertUnwindSafe};

/// A body's transform changed (or it just fell asleep)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveEvent<D: Dimension> {
    pub body: BodyHandle,
    pub transform: Transform<D>,
    /// Set on the step the body went to sleep
    pub fell_asleep: bool,
    /// The body's `user_data`
    pub user_data: u64,
}

/// Overlap began or ended between a sensor and another body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorTouchEvent {
    pub sensor: BodyHandle,
    pub other: BodyHandle,
    pub begin: bool,
}

/// Two solid bodies started or stopped touching
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContactTouchEvent {
    pub a: BodyHandle,
    pub b: BodyHandle,
    pub begin: bool,
}

/// Contact impulse above the configured threshold
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactHitEvent<D: Dimension> {
    pub a: BodyHandle,
    pub b: BodyHandle,
    /// Total normal impulse of the pair during the step
    pub impulse: f32,
    /// Contact normal, pointing from `a` to `b`
    pub normal: D::Vector,
}

/// Delivery class of an event; declaration order is delivery order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventKind {
    Move,
    SensorBegin,
    SensorEnd,
    ContactBegin,
    ContactEnd,
    ContactHit,
}

/// Tagged event value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PhysicsEvent<D: Dimension> {
    Move(MoveEvent<D>),
    SensorTouch(SensorTouchEvent),
    ContactTouch(ContactTouchEvent),
    ContactHit(ContactHitEvent<D>),
}

impl<D: Dimension> PhysicsEvent<D> {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Move(_) => EventKind::Move,
            Self::SensorTouch(e) if e.begin => EventKind::SensorBegin,
            Self::SensorTouch(_) => EventKind::SensorEnd,
            Self::ContactTouch(e) if e.begin => EventKind::ContactBegin,
            Self::ContactTouch(_) => EventKind::ContactEnd,
            Self::ContactHit(_) => EventKind::ContactHit,
        }
    }
}

/// Events drained from the backend during one step, grouped by kind
#[derive(Debug, Default)]
pub(crate) struct EventBatch<D: Dimension> {
    pub moves: Vec<MoveEvent<D>>,
    pub sensor_begin: Vec<SensorTouchEvent>,
    pub sensor_end: Vec<SensorTouchEvent>,
    pub contact_begin: Vec<ContactTouchEvent>,
    pub contact_end: Vec<ContactTouchEvent>,
    pub hits: Vec<ContactHitEvent<D>>,
}

impl<D: Dimension> EventBatch<D> {
    pub fn push_sensor(&mut self, event: SensorTouchEvent) {
        if event.begin {
            self.sensor_begin.push(event);
        } else {
            self.sensor_end.push(event);
        }
    }

    /// Classify a raw begin/end pair: any sensor side makes it a sensor event
    pub fn push_touch(&mut self, first: ColliderTag, second: ColliderTag, begin: bool) {
        match (first.is_sensor, second.is_sensor) {
            (true, _) => self.push_sensor(SensorTouchEvent {
                sensor: first.body,
                other: second.body,
                begin,
            }),
            (false, true) => self.push_sensor(SensorTouchEvent {
                sensor: second.body,
                other: first.body,
                begin,
            }),
            (false, false) => self.push_contact(ContactTouchEvent {
                a: first.body,
                b: second.body,
                begin,
            }),
        }
    }

    pub fn push_contact(&mut self, event: ContactTouchEvent) {
        if event.begin {
            self.contact_begin.push(event);
        } else {
            self.contact_end.push(event);
        }
    }

    pub fn counts(&self) -> EventCounts {
        EventCounts {
            moves: self.moves.len(),
            sensor_begin: self.sensor_begin.len(),
            sensor_end: self.sensor_end.len(),
            contact_begin: self.contact_begin.len(),
            contact_end: self.contact_end.len(),
            hits: self.hits.len(),
        }
    }

    /// Flatten into delivery order: moves, sensor begin/end, contact
    /// begin/end, hits
    pub fn into_ordered(self) -> Vec<PhysicsEvent<D>> {
        let mut out = Vec::with_capacity(self.counts().total());
        out.extend(self.moves.into_iter().map(PhysicsEvent::Move));
        out.extend(self.sensor_begin.into_iter().map(PhysicsEvent::SensorTouch));
        out.extend(self.sensor_end.into_iter().map(PhysicsEvent::SensorTouch));
        out.extend(self.contact_begin.into_iter().map(PhysicsEvent::ContactTouch));
        out.extend(self.contact_end.into_iter().map(PhysicsEvent::ContactTouch));
        out.extend(self.hits.into_iter().map(PhysicsEvent::ContactHit));
        out
    }
}

/// Number of events of each kind produced by a step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventCounts {
    pub moves: usize,
    pub sensor_begin: usize,
    pub sensor_end: usize,
    pub contact_begin: usize,
    pub contact_end: usize,
    pub hits: usize,
}

impl EventCounts {
    pub fn total(&self) -> usize {
        self.moves
            + self.sensor_begin
            + self.sensor_end
            + self.contact_begin
            + self.contact_end
            + self.hits
    }
}

/// Error a listener may return
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Return type of every listener
pub type ListenerResult = std::result::Result<(), ListenerError>;

type Listener<E> = Box<dyn FnMut(&E) -> ListenerResult + Send>;

/// Subscription token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A listener that returned an error or panicked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerFailure {
    pub listener: ListenerId,
    pub kind: EventKind,
    pub message: String,
}

/// Outcome of one `step`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepReport {
    /// 1-based index of the step
    pub step: u64,
    pub events: EventCounts,
    pub failures: Vec<ListenerFailure>,
}

impl StepReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

struct ListenerList<E> {
    entries: Vec<(ListenerId, Listener<E>)>,
}

impl<E> Default for ListenerList<E> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<E> ListenerList<E> {
    fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        self.entries.len() != before
    }

    /// Call every listener in registration order; failures never stop the loop
    fn deliver(&mut self, event: &E, kind: EventKind, failures: &mut Vec<ListenerFailure>) {
        for (id, listener) in &mut self.entries {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener(event)));
            let message = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err.to_string(),
                Err(payload) => panic_message(payload.as_ref()),
            };
            log::error!("{kind:?} listener {id:?} failed: {message}");
            failures.push(ListenerFailure {
                listener: *id,
                kind,
                message,
            });
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

/// Per-kind listener lists of one simulation
pub struct EventDispatcher<D: Dimension> {
    moves: ListenerList<MoveEvent<D>>,
    sensors: ListenerList<SensorTouchEvent>,
    contacts: ListenerList<ContactTouchEvent>,
    hits: ListenerList<ContactHitEvent<D>>,
    next_id: u64,
}

impl<D: Dimension> Default for EventDispatcher<D> {
    fn default() -> Self {
        Self {
            moves: ListenerList::default(),
            sensors: ListenerList::default(),
            contacts: ListenerList::default(),
            hits: ListenerList::default(),
            next_id: 1,
        }
    }
}

impl<D: Dimension> std::fmt::Debug for EventDispatcher<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("moves", &self.moves.entries.len())
            .field("sensors", &self.sensors.entries.len())
            .field("contacts", &self.contacts.entries.len())
            .field("hits", &self.hits.entries.len())
            .finish()
    }
}

impl<D: Dimension> EventDispatcher<D> {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn on_move<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&MoveEvent<D>) -> ListenerResult + Send + 'static,
    {
        let id = self.next_id();
        self.moves.entries.push((id, Box::new(listener)));
        id
    }

    /// Sensor begin and end events
    pub fn on_sensor_touch<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&SensorTouchEvent) -> ListenerResult + Send + 'static,
    {
        let id = self.next_id();
        self.sensors.entries.push((id, Box::new(listener)));
        id
    }

    /// Contact begin and end events
    pub fn on_contact_touch<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&ContactTouchEvent) -> ListenerResult + Send + 'static,
    {
        let id = self.next_id();
        self.contacts.entries.push((id, Box::new(listener)));
        id
    }

    pub fn on_contact_hit<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&ContactHitEvent<D>) -> ListenerResult + Send + 'static,
    {
        let id = self.next_id();
        self.hits.entries.push((id, Box::new(listener)));
        id
    }

    /// Remove a listener; false if it was not registered
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.moves.remove(id)
            || self.sensors.remove(id)
            || self.contacts.remove(id)
            || self.hits.remove(id)
    }

    pub fn listener_count(&self) -> usize {
        self.moves.entries.len()
            + self.sensors.entries.len()
            + self.contacts.entries.len()
            + self.hits.entries.len()
    }

    pub fn clear(&mut self) {
        self.moves.entries.clear();
        self.sensors.entries.clear();
        self.contacts.entries.clear();
        self.hits.entries.clear();
    }

    /// Deliver an ordered batch; consumes it
    pub fn dispatch(&mut self, events: Vec<PhysicsEvent<D>>) -> Vec<ListenerFailure> {
        let mut failures = Vec::new();
        for event in events {
            let kind = event.kind();
            match event {
                PhysicsEvent::Move(e) => self.moves.deliver(&e, kind, &mut failures),
                PhysicsEvent::SensorTouch(e) => self.sensors.deliver(&e, kind, &mut failures),
                PhysicsEvent::ContactTouch(e) => self.contacts.deliver(&e, kind, &mut failures),
                PhysicsEvent::ContactHit(e) => self.hits.deliver(&e, kind, &mut failures),
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimension::Dim2;
    use glam::Vec2;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn handle(i: u32) -> BodyHandle {
        BodyHandle::new(i, 0)
    }

    fn sample_batch() -> EventBatch<Dim2> {
        let mut batch = EventBatch::default();
        batch.hits.push(ContactHitEvent {
            a: handle(0),
            b: handle(1),
            impulse: 3.0,
            normal: Vec2::Y,
        });
        batch.push_contact(ContactTouchEvent { a: handle(0), b: handle(1), begin: false });
        batch.push_contact(ContactTouchEvent { a: handle(0), b: handle(1), begin: true });
        batch.push_sensor(SensorTouchEvent { sensor: handle(2), other: handle(0), begin: false });
        batch.push_sensor(SensorTouchEvent { sensor: handle(2), other: handle(0), begin: true });
        batch.moves.push(MoveEvent {
            body: handle(0),
            transform: Transform::from_translation(Vec2::ONE),
            fell_asleep: false,
            user_data: 0,
        });
        batch
    }

    #[test]
    fn test_touch_classified_by_sensor_side() {
        use crate::layers::ObjectLayer;
        let tag = |i, is_sensor| ColliderTag {
            body: handle(i),
            layer: ObjectLayer::MOVING,
            is_sensor,
        };
        let mut batch = EventBatch::<Dim2>::default();
        batch.push_touch(tag(0, false), tag(1, true), true);
        batch.push_touch(tag(0, false), tag(1, false), false);
        assert_eq!(batch.sensor_begin, vec![SensorTouchEvent { sensor: handle(1), other: handle(0), begin: true }]);
        assert_eq!(batch.contact_end, vec![ContactTouchEvent { a: handle(0), b: handle(1), begin: false }]);
    }

    #[test]
    fn test_batch_delivery_order() {
        let kinds: Vec<_> = sample_batch().into_ordered().iter().map(|e| e.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::Move,
                EventKind::SensorBegin,
                EventKind::SensorEnd,
                EventKind::ContactBegin,
                EventKind::ContactEnd,
                EventKind::ContactHit,
            ]
        );
        assert!(kinds.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_listeners_run_in_registration_order() {
        let mut dispatcher = EventDispatcher::<Dim2>::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for name in ["first", "second", "third"] {
            let order = order.clone();
            dispatcher.on_contact_touch(move |e| {
                order.lock().push((name, e.begin));
                Ok(())
            });
        }

        let failures = dispatcher.dispatch(sample_batch().into_ordered());
        assert!(failures.is_empty());
        let seen = order.lock();
        assert_eq!(
            *seen,
            vec![
                ("first", true),
                ("second", true),
                ("third", true),
                ("first", false),
                ("second", false),
                ("third", false),
            ]
        );
    }

    #[test]
    fn test_failing_listener_does_not_block_others() {
        let mut dispatcher = EventDispatcher::<Dim2>::new();
        let delivered = Arc::new(Mutex::new(0));

        let failing = dispatcher.on_move(|_| Err("listener refused".into()));
        let panicking = dispatcher.on_move(|_| panic!("boom"));
        let counter = delivered.clone();
        dispatcher.on_move(move |_| {
            *counter.lock() += 1;
            Ok(())
        });

        let failures = dispatcher.dispatch(sample_batch().into_ordered());
        assert_eq!(*delivered.lock(), 1);
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].listener, failing);
        assert_eq!(failures[0].message, "listener refused");
        assert_eq!(failures[1].listener, panicking);
        assert!(failures[1].message.contains("boom"));
        assert!(failures.iter().all(|f| f.kind == EventKind::Move));
    }

    #[test]
    fn test_unsubscribe() {
        let mut dispatcher = EventDispatcher::<Dim2>::new();
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();
        let id = dispatcher.on_contact_hit(move |_| {
            *counter.lock() += 1;
            Ok(())
        });
        assert_eq!(dispatcher.listener_count(), 1);
        assert!(dispatcher.unsubscribe(id));
        assert!(!dispatcher.unsubscribe(id));

        dispatcher.dispatch(sample_batch().into_ordered());
        assert_eq!(*calls.lock(), 0);
    }

    #[test]
    fn test_counts() {
        let counts = sample_batch().counts();
        assert_eq!(counts.total(), 6);
        assert_eq!(counts.contact_begin, 1);
        assert_eq!(counts.sensor_end, 1);
    }
}
