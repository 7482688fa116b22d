use serde::{Deserialize, Serialize};

use crate::run::RsvpDecision;

/// What an RSVP click carries: the reply and the address echoed in the link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RsvpPayload {
    pub reply: RsvpDecision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl RsvpPayload {
    /// Builds a payload from raw query values. A missing or unknown reply is
    /// no-response; a blank email is dropped.
    pub fn from_query(reply: Option<&str>, email: Option<&str>) -> Self {
        Self {
            reply: RsvpDecision::from_reply(reply),
            email: email
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(str::to_string),
        }
    }
}
