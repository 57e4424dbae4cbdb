//! Cache change events

use crate::Filter;
use std::sync::Arc;

/// The kind of change an event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Inserted,
    Updated,
    Deleted,
}

impl EventKind {
    /// Decode the wire tag (`1=Inserted|2=Updated|3=Deleted`).
    pub fn from_wire(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(EventKind::Inserted),
            2 => Some(EventKind::Updated),
            3 => Some(EventKind::Deleted),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            EventKind::Inserted => 1,
            EventKind::Updated => 2,
            EventKind::Deleted => 3,
        }
    }
}

/// Whether an event is eligible for (or has undergone) transformation by an
/// event-transformer filter.
///
/// `Transformed` events MUST NOT be delivered to key-scoped listeners —
/// they may have been mutated in ways the key listener did not request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransformState {
    Transformable,
    NonTransformable,
    Transformed,
}

/// A cache change event, as delivered to `MapListener`s.
#[derive(Debug, Clone)]
pub struct CacheEvent {
    /// Originating cache name.
    pub source: String,
    pub kind: EventKind,
    /// `None` only for the synthetic deactivation event.
    pub key: Option<Vec<u8>>,
    pub old_value: Option<Vec<u8>>,
    pub new_value: Option<Vec<u8>>,
    pub is_synthetic: bool,
    pub transform_state: TransformState,
    pub is_priming: bool,
    /// The filters that matched this event, attached when computed
    /// client-side (Listener Registry `NoOptimize` slow path).
    pub filters: Option<Vec<Arc<dyn Filter>>>,
    /// Server-supplied filter ids this event is tagged with, when present.
    pub filter_ids: Option<Vec<i64>>,
}

impl CacheEvent {
    /// The synthetic `Deleted` event with a null key fired to deactivation
    /// listeners exactly once per channel closure or explicit destroy.
    pub fn deactivation(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            kind: EventKind::Deleted,
            key: None,
            old_value: None,
            new_value: None,
            is_synthetic: true,
            transform_state: TransformState::NonTransformable,
            is_priming: false,
            filters: None,
            filter_ids: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_roundtrip() {
        for kind in [EventKind::Inserted, EventKind::Updated, EventKind::Deleted] {
            assert_eq!(EventKind::from_wire(kind.to_wire()), Some(kind));
        }
        assert_eq!(EventKind::from_wire(9), None);
    }

    #[test]
    fn test_deactivation_event_shape() {
        let e = CacheEvent::deactivation("my-cache");
        assert_eq!(e.kind, EventKind::Deleted);
        assert!(e.key.is_none());
        assert!(e.is_synthetic);
    }
}
