//! Value objects for the birthday card domain.

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// A syntactically valid e-mail address.
///
/// Validation is shallow: one `@`, a non-empty local part and a dotted
/// domain, no whitespace. Deliverability is the mailer's concern. Addresses
/// are stored lowercased so `A@X.com` and `a@x.com` name the same guest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmailAddress(String);

impl EmailAddress {
    /// Parses an address, trimming surrounding whitespace and folding case.
    pub fn parse(raw: &str) -> Option<Self> {
        let candidate = raw.trim();
        if candidate.chars().any(char::is_whitespace) {
            return None;
        }

        let (local, domain) = candidate.split_once('@')?;
        if local.is_empty() || domain.contains('@') {
            return None;
        }

        let labels: Vec<&str> = domain.split('.').collect();
        if labels.len() < 2 || labels.iter().any(|label| label.is_empty()) {
            return None;
        }

        Some(Self(candidate.to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for EmailAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The party date supplied with the card request.
///
/// Either a calendar date (`2026-05-01`, read as midnight UTC) or a full
/// RFC 3339 timestamp. Serialized back in the form it was given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EventDate {
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
}

impl EventDate {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            return Some(EventDate::Date(date));
        }
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|at| EventDate::DateTime(at.with_timezone(&Utc)))
    }

    /// Returns the instant the card should be delivered at.
    pub fn deadline(&self) -> DateTime<Utc> {
        match self {
            EventDate::Date(date) => date.and_time(NaiveTime::MIN).and_utc(),
            EventDate::DateTime(at) => *at,
        }
    }
}

impl std::fmt::Display for EventDate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventDate::Date(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            EventDate::DateTime(at) => write!(f, "{}", at.to_rfc3339()),
        }
    }
}

impl TryFrom<String> for EventDate {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        EventDate::parse(&value).ok_or_else(|| format!("invalid event date: {value}"))
    }
}

impl From<EventDate> for String {
    fn from(date: EventDate) -> Self {
        date.to_string()
    }
}

/// A generated card image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ImageArtifact {
    /// Hosted by the provider.
    Url { url: String },

    /// Inline bytes, base64 encoded.
    #[serde(rename_all = "camelCase")]
    Bytes { media_type: String, data: String },
}

impl ImageArtifact {
    pub fn url(url: impl Into<String>) -> Self {
        ImageArtifact::Url { url: url.into() }
    }

    pub fn from_bytes(media_type: impl Into<String>, bytes: &[u8]) -> Self {
        ImageArtifact::Bytes {
            media_type: media_type.into(),
            data: STANDARD.encode(bytes),
        }
    }

    /// Returns true when the artifact carries no image at all.
    pub fn is_empty(&self) -> bool {
        match self {
            ImageArtifact::Url { url } => url.trim().is_empty(),
            ImageArtifact::Bytes { data, .. } => data.is_empty(),
        }
    }

    pub fn media_type(&self) -> Option<&str> {
        match self {
            ImageArtifact::Url { .. } => None,
            ImageArtifact::Bytes { media_type, .. } => Some(media_type),
        }
    }

    /// Decodes inline bytes. Hosted images return None.
    pub fn decode(&self) -> Option<Vec<u8>> {
        match self {
            ImageArtifact::Url { .. } => None,
            ImageArtifact::Bytes { data, .. } => STANDARD.decode(data).ok(),
        }
    }
}

/// Renders the image as something a browser can load: the URL itself or a
/// `data:` URI.
impl std::fmt::Display for ImageArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageArtifact::Url { url } => write!(f, "{url}"),
            ImageArtifact::Bytes { media_type, data } => {
                write!(f, "data:{media_type};base64,{data}")
            }
        }
    }
}

/// A guest's answer to an invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RsvpDecision {
    Yes,
    No,
    #[default]
    NoResponse,
}

impl RsvpDecision {
    /// Reads the `reply` query value. Anything but yes/no is no-response.
    pub fn from_reply(reply: Option<&str>) -> Self {
        match reply.map(|r| r.trim().to_ascii_lowercase()).as_deref() {
            Some("yes") => RsvpDecision::Yes,
            Some("no") => RsvpDecision::No,
            _ => RsvpDecision::NoResponse,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RsvpDecision::Yes => "yes",
            RsvpDecision::No => "no",
            RsvpDecision::NoResponse => "no-response",
        }
    }
}

impl std::fmt::Display for RsvpDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_accepts_plain_addresses() {
        let email = EmailAddress::parse("  a@x.com ").unwrap();
        assert_eq!(email.as_str(), "a@x.com");
        assert!(EmailAddress::parse("first.last+tag@mail.example.org").is_some());
    }

    #[test]
    fn email_folds_case() {
        let email = EmailAddress::parse("Ann.Lee@Example.COM").unwrap();
        assert_eq!(email.as_str(), "ann.lee@example.com");
        assert_eq!(EmailAddress::parse("A@x.com"), EmailAddress::parse("a@X.COM"));
    }

    #[test]
    fn email_rejects_malformed_addresses() {
        for raw in ["", "plain", "@x.com", "a@", "a@x", "a@@x.com", "a b@x.com", "a@x..com"] {
            assert!(EmailAddress::parse(raw).is_none(), "{raw} should be rejected");
        }
    }

    #[test]
    fn event_date_reads_calendar_dates_as_midnight_utc() {
        let date = EventDate::parse("2026-05-01").unwrap();
        assert_eq!(date.deadline().to_rfc3339(), "2026-05-01T00:00:00+00:00");
        assert_eq!(date.to_string(), "2026-05-01");
    }

    #[test]
    fn event_date_normalizes_offsets() {
        let date = EventDate::parse("2026-05-01T18:30:00+02:00").unwrap();
        assert_eq!(date.deadline().to_rfc3339(), "2026-05-01T16:30:00+00:00");
        assert!(EventDate::parse("next friday").is_none());
        assert!(EventDate::parse("2026-13-01").is_none());
    }

    #[test]
    fn event_date_serializes_as_string() {
        let date = EventDate::parse("2026-05-01").unwrap();
        let json = serde_json::to_value(date).unwrap();
        assert_eq!(json, serde_json::json!("2026-05-01"));
        let back: EventDate = serde_json::from_value(json).unwrap();
        assert_eq!(back, date);
    }

    #[test]
    fn image_bytes_render_as_data_uri() {
        let image = ImageArtifact::from_bytes("image/png", b"png");
        assert_eq!(image.to_string(), "data:image/png;base64,cG5n");
        assert_eq!(image.decode().unwrap(), b"png");
        assert_eq!(image.media_type(), Some("image/png"));
        assert!(!image.is_empty());
    }

    #[test]
    fn image_url_renders_as_itself() {
        let image = ImageArtifact::url("https://img.example/card.png");
        assert_eq!(image.to_string(), "https://img.example/card.png");
        assert!(image.decode().is_none());
        assert!(ImageArtifact::url("  ").is_empty());
    }

    #[test]
    fn decision_defaults_to_no_response() {
        assert_eq!(RsvpDecision::from_reply(Some("yes")), RsvpDecision::Yes);
        assert_eq!(RsvpDecision::from_reply(Some(" NO ")), RsvpDecision::No);
        assert_eq!(RsvpDecision::from_reply(Some("maybe")), RsvpDecision::NoResponse);
        assert_eq!(RsvpDecision::from_reply(None), RsvpDecision::NoResponse);
        assert_eq!(
            serde_json::to_value(RsvpDecision::NoResponse).unwrap(),
            serde_json::json!("no-response")
        );
    }
}
