//! Validated saga input.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;

use super::{EmailAddress, EventDate};

/// The request that starts a birthday card run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunInput {
    pub prompt: String,
    pub recipient_email: EmailAddress,
    /// Guests to invite, de-duplicated in first-occurrence order. A guest's
    /// index in this list is the ordinal of its per-guest steps.
    #[serde(default)]
    pub rsvp_emails: Vec<EmailAddress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_date: Option<EventDate>,
}

impl RunInput {
    /// Validates an untyped request body.
    ///
    /// The checks run in field order so the first problem is the one reported.
    pub fn from_json(body: &Value) -> Result<Self, ValidationError> {
        let object = body.as_object().ok_or(ValidationError::NotAnObject)?;

        let prompt = match object.get("prompt") {
            Some(Value::String(prompt)) if !prompt.trim().is_empty() => prompt.clone(),
            _ => return Err(ValidationError::Prompt),
        };

        let recipient_email = match object.get("recipientEmail") {
            Some(Value::String(raw)) => EmailAddress::parse(raw)
                .ok_or_else(|| ValidationError::RecipientInvalid(raw.clone()))?,
            _ => return Err(ValidationError::RecipientMissing),
        };

        let rsvp_emails = match object.get("rsvpEmails") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => {
                let mut guests: Vec<EmailAddress> = Vec::with_capacity(items.len());
                for item in items {
                    let raw = item.as_str().ok_or(ValidationError::RsvpNotAList)?;
                    let email = EmailAddress::parse(raw)
                        .ok_or_else(|| ValidationError::RsvpInvalid(raw.to_string()))?;
                    if guests.contains(&email) {
                        tracing::debug!(guest = %email, "dropping duplicate RSVP email");
                        continue;
                    }
                    guests.push(email);
                }
                guests
            }
            Some(_) => return Err(ValidationError::RsvpNotAList),
        };

        let event_date = match object.get("eventDate") {
            None | Some(Value::Null) => None,
            Some(Value::String(raw)) => Some(
                EventDate::parse(raw).ok_or_else(|| ValidationError::EventDate(raw.clone()))?,
            ),
            Some(other) => return Err(ValidationError::EventDate(other.to_string())),
        };

        Ok(Self {
            prompt,
            recipient_email,
            rsvp_emails,
            event_date,
        })
    }

    /// Returns true when the run will wait for RSVP replies.
    pub fn has_guests(&self) -> bool {
        !self.rsvp_emails.is_empty()
    }

    /// Iterates guests with their step ordinals.
    pub fn guests(&self) -> impl Iterator<Item = (u32, &EmailAddress)> {
        (0u32..).zip(self.rsvp_emails.iter())
    }
}
