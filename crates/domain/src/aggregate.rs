//! Core aggregate and domain event traits.

use common::AggregateId;
use event_store::{EventEnvelope, Version};
use serde::{Serialize, de::DeserializeOwned};

/// Trait for domain events.
///
/// Domain events represent facts that have happened. They are immutable and
/// named in past tense.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Returns the event type name stored alongside the payload.
    fn event_type(&self) -> &'static str;
}

/// Trait for event-sourced aggregates.
///
/// Aggregates are rebuilt by replaying their stream. `apply` must be pure and
/// deterministic: the same state and event always produce the same new state,
/// with no side effects and no failure.
pub trait Aggregate: Default + Send + Sync + Sized {
    /// The type of events this aggregate consumes.
    type Event: DomainEvent;

    /// Returns the aggregate type name used to tag stored events.
    fn aggregate_type() -> &'static str;

    /// Returns the stream id, or None for an aggregate with no events yet.
    fn id(&self) -> Option<AggregateId>;

    /// Returns the version of the last applied event.
    fn version(&self) -> Version;

    fn set_version(&mut self, version: Version);

    /// Applies an event to the aggregate, updating its state.
    fn apply(&mut self, event: Self::Event);

    /// Applies multiple events in sequence.
    fn apply_events(&mut self, events: impl IntoIterator<Item = Self::Event>) {
        for event in events {
            self.apply(event);
        }
    }
}

/// Rebuilds an aggregate from its stored stream.
///
/// Returns None when the stream is empty.
pub fn rehydrate<A: Aggregate>(
    envelopes: Vec<EventEnvelope>,
) -> Result<Option<A>, serde_json::Error> {
    if envelopes.is_empty() {
        return Ok(None);
    }

    let mut aggregate = A::default();
    for envelope in envelopes {
        let version = envelope.version;
        let event: A::Event = serde_json::from_value(envelope.payload)?;
        aggregate.apply(event);
        aggregate.set_version(version);
    }
    Ok(Some(aggregate))
}
