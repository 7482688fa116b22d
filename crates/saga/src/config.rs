use std::time::Duration;

use crate::retry::RetryPolicy;

/// How long a run waits for guests to answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RsvpWaitPolicy {
    /// Wait for every guest, however long it takes. An unresponsive guest
    /// blocks the run indefinitely.
    #[default]
    Unbounded,
    /// Stop waiting after this long; silent guests are recorded as no-response.
    Bounded(Duration),
}

/// Saga settings. Built by the host application; never read from the environment here.
#[derive(Debug, Clone)]
pub struct SagaConfig {
    pub retry: RetryPolicy,
    pub rsvp_wait: RsvpWaitPolicy,
    /// Sleep before delivery when the request has no event date.
    pub card_delay: Duration,
    /// Public base URL the RSVP links in invitation e-mails point at.
    pub webhook_base_url: String,
    /// Fallback re-check of the store for resolutions made by another process.
    pub wait_poll_interval: Duration,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            rsvp_wait: RsvpWaitPolicy::default(),
            card_delay: Duration::from_secs(5),
            webhook_base_url: "http://localhost:3000".to_string(),
            wait_poll_interval: Duration::from_secs(1),
        }
    }
}

impl SagaConfig {
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_rsvp_wait(mut self, policy: RsvpWaitPolicy) -> Self {
        self.rsvp_wait = policy;
        self
    }

    pub fn with_card_delay(mut self, delay: Duration) -> Self {
        self.card_delay = delay;
        self
    }

    pub fn with_webhook_base_url(mut self, url: impl Into<String>) -> Self {
        self.webhook_base_url = url.into();
        self
    }

    pub fn with_wait_poll_interval(mut self, interval: Duration) -> Self {
        self.wait_poll_interval = interval;
        self
    }
}
