//! Birthday card saga definition: step names, prompts and e-mail templates.

use std::time::Duration;

use chrono::{DateTime, Utc};
use domain::{EmailAddress, RsvpDecision, RunInput, WorkflowResult};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::services::{Attachment, EmailMessage};
use crate::timer::deadline_after;

/// Step name: split the user prompt into image and text prompts.
pub const STEP_SPLIT_PROMPT: &str = "split_prompt";

/// Step name: generate the card image.
pub const STEP_GENERATE_IMAGE: &str = "generate_image";

/// Step name: generate the card text.
pub const STEP_GENERATE_MESSAGE: &str = "generate_message";

/// Step name: e-mail one guest an invitation. Ordinal is the guest index.
pub const STEP_REQUEST_RSVP: &str = "request_rsvp";

/// Wait name: one guest's RSVP webhook. Ordinal is the guest index.
pub const WAIT_RSVP: &str = "await_rsvp";

/// Timer name: cut-off for a bounded RSVP wait.
pub const TIMER_RSVP_DEADLINE: &str = "rsvp_deadline";

/// Timer name: sleep until the event.
pub const TIMER_EVENT: &str = "sleep_until_event";

/// Step name: deliver the card to the recipient.
pub const STEP_NOTIFY_RECIPIENT: &str = "notify_recipient";

/// Prefix of the prompt-splitting request sent to the text provider.
pub const SPLIT_INSTRUCTION: &str = "Split this birthday card request into a prompt for the \
    card image and a prompt for the card message. Answer only with JSON of the form \
    {\"imagePrompt\": \"...\", \"textPrompt\": \"...\"}.\nRequest: ";

/// Output of the prompt-splitting step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptParts {
    pub image_prompt: String,
    pub text_prompt: String,
}

impl PromptParts {
    /// Reads the provider's answer. Tolerates prose around the JSON object.
    pub fn parse(reply: &str) -> Option<Self> {
        let start = reply.find('{')?;
        let end = reply.rfind('}')?;
        let parts: PromptParts = serde_json::from_str(reply.get(start..=end)?).ok()?;
        if parts.image_prompt.trim().is_empty() || parts.text_prompt.trim().is_empty() {
            return None;
        }
        Some(parts)
    }

    /// Both sub-prompts are the original prompt.
    pub fn fallback(prompt: &str) -> Self {
        Self {
            image_prompt: prompt.to_string(),
            text_prompt: prompt.to_string(),
        }
    }
}

pub fn split_request(prompt: &str) -> String {
    format!("{SPLIT_INSTRUCTION}{prompt}")
}

pub fn message_request(text_prompt: &str) -> String {
    format!("Write a short, warm birthday card message. Theme: {text_prompt}")
}

/// When the card goes out: the event date if one was given, otherwise
/// `card_delay` after the run started.
pub fn card_deadline(
    input: &RunInput,
    started_at: DateTime<Utc>,
    card_delay: Duration,
) -> Result<DateTime<Utc>> {
    match input.event_date {
        Some(date) => Ok(date.deadline()),
        None => deadline_after(started_at, card_delay),
    }
}

pub fn invitation_email(
    guest: &EmailAddress,
    card_text: &str,
    yes_url: &str,
    no_url: &str,
) -> EmailMessage {
    EmailMessage {
        to: guest.clone(),
        subject: "You're invited to a birthday celebration".to_string(),
        body: format!(
            "{card_text}\n\nWill you join us?\n\nYes: {yes_url}\nNo: {no_url}\n"
        ),
        attachments: Vec::new(),
    }
}

pub fn card_email(recipient: &EmailAddress, result: &WorkflowResult) -> EmailMessage {
    let mut body = format!("{}\n", result.text);

    if !result.rsvp_replies.is_empty() {
        body.push_str("\nRSVPs:\n");
        for reply in &result.rsvp_replies {
            body.push_str(&format!("- {}: {}\n", reply.email, reply.reply));
        }
        let coming = result
            .rsvp_replies
            .iter()
            .filter(|r| r.reply == RsvpDecision::Yes)
            .count();
        body.push_str(&format!("\n{coming} of {} guests are coming.\n", result.rsvp_replies.len()));
    }

    let filename = match result.image.media_type() {
        Some("image/png") => "birthday-card.png",
        Some("image/jpeg") => "birthday-card.jpg",
        Some("image/svg+xml") => "birthday-card.svg",
        _ => "birthday-card",
    };

    EmailMessage {
        to: recipient.clone(),
        subject: "Happy birthday!".to_string(),
        body,
        attachments: vec![Attachment {
            filename: filename.to_string(),
            content: result.image.clone(),
        }],
    }
}
