use chrono::{DateTime, Utc};
use common::{AggregateId, RunId, WaitToken};
use event_store::Version;

use crate::aggregate::Aggregate;

use super::{RsvpPayload, WaitEvent};

/// A webhook wait, rebuilt from its stream.
#[derive(Debug, Clone, Default)]
pub struct RsvpWait {
    token: Option<WaitToken>,
    version: Version,
    run_id: Option<RunId>,
    registered_at: Option<DateTime<Utc>>,
    resolution: Option<(RsvpPayload, DateTime<Utc>)>,
}

impl Aggregate for RsvpWait {
    type Event = WaitEvent;

    fn aggregate_type() -> &'static str {
        "RsvpWait"
    }

    fn id(&self) -> Option<AggregateId> {
        self.token.map(|token| token.aggregate_id())
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            WaitEvent::WaitRegistered(data) => {
                self.token = Some(data.token);
                self.run_id = Some(data.run_id);
                self.registered_at = Some(data.registered_at);
            }
            WaitEvent::WaitResolved(data) => {
                // First resolution wins
                if self.resolution.is_none() {
                    self.resolution = Some((data.payload, data.resolved_at));
                }
            }
        }
    }
}

impl RsvpWait {
    /// Decides the resolution event. None when unregistered or already resolved.
    pub fn resolve(&self, payload: RsvpPayload, at: DateTime<Utc>) -> Option<WaitEvent> {
        if self.token.is_none() || self.resolution.is_some() {
            return None;
        }
        Some(WaitEvent::resolved(payload, at))
    }

    pub fn token(&self) -> Option<WaitToken> {
        self.token
    }

    pub fn run_id(&self) -> Option<RunId> {
        self.run_id
    }

    pub fn registered_at(&self) -> Option<DateTime<Utc>> {
        self.registered_at
    }

    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }

    pub fn payload(&self) -> Option<&RsvpPayload> {
        self.resolution.as_ref().map(|(payload, _)| payload)
    }

    pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
        self.resolution.as_ref().map(|(_, at)| *at)
    }
}
