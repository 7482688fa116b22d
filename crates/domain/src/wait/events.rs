//! Webhook wait events.

use chrono::{DateTime, Utc};
use common::{RunId, WaitToken};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

use super::RsvpPayload;

/// Events on a webhook wait stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WaitEvent {
    /// The wait was allocated for a run.
    WaitRegistered(WaitRegisteredData),

    /// The first matching signal arrived.
    WaitResolved(WaitResolvedData),
}

impl DomainEvent for WaitEvent {
    fn event_type(&self) -> &'static str {
        match self {
            WaitEvent::WaitRegistered(_) => "WaitRegistered",
            WaitEvent::WaitResolved(_) => "WaitResolved",
        }
    }
}

/// Data for WaitRegistered event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitRegisteredData {
    pub token: WaitToken,
    pub run_id: RunId,
    pub registered_at: DateTime<Utc>,
}

/// Data for WaitResolved event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitResolvedData {
    pub payload: RsvpPayload,
    pub resolved_at: DateTime<Utc>,
}

impl WaitEvent {
    pub fn registered(token: WaitToken, run_id: RunId, registered_at: DateTime<Utc>) -> Self {
        WaitEvent::WaitRegistered(WaitRegisteredData {
            token,
            run_id,
            registered_at,
        })
    }

    pub fn resolved(payload: RsvpPayload, resolved_at: DateTime<Utc>) -> Self {
        WaitEvent::WaitResolved(WaitResolvedData {
            payload,
            resolved_at,
        })
    }
}
