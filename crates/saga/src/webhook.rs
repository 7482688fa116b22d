//! External event gateway: RSVP webhook waits.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{RunId, WaitToken};
use domain::{CommandHandler, DomainError, RsvpDecision, RsvpPayload, RsvpWait, WaitEvent};
use event_store::EventStore;
use tokio::sync::Notify;
use url::Url;

use crate::error::{Result, SagaError};

/// A freshly allocated wait: its token and the URL that resolves it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitHandle {
    pub token: WaitToken,
    pub url: Url,
}

/// Allocates webhook waits and resolves them from inbound signals.
///
/// Every wait is its own event stream keyed by the token. A resolution is an
/// append at version 1, so when two signals race only one is recorded and the
/// other sees a concurrency conflict, which is reported as a no-op.
pub struct WebhookGateway<S: EventStore> {
    waits: CommandHandler<S, RsvpWait>,
    base_url: String,
    notifiers: Arc<Mutex<HashMap<WaitToken, Arc<Notify>>>>,
    poll_interval: Duration,
}

impl<S: EventStore + Clone> Clone for WebhookGateway<S> {
    fn clone(&self) -> Self {
        Self {
            waits: self.waits.clone(),
            base_url: self.base_url.clone(),
            notifiers: Arc::clone(&self.notifiers),
            poll_interval: self.poll_interval,
        }
    }
}

impl<S: EventStore> WebhookGateway<S> {
    pub fn new(store: S, base_url: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            waits: CommandHandler::new(store),
            base_url: base_url.into(),
            notifiers: Arc::new(Mutex::new(HashMap::new())),
            poll_interval,
        }
    }

    fn notifiers(&self) -> MutexGuard<'_, HashMap<WaitToken, Arc<Notify>>> {
        self.notifiers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notifier(&self, token: WaitToken) -> Arc<Notify> {
        Arc::clone(self.notifiers().entry(token).or_default())
    }

    /// Registers a new wait for `run_id`.
    pub async fn create_wait(&self, run_id: RunId, now: DateTime<Utc>) -> Result<WaitHandle> {
        let token = WaitToken::new();
        self.waits
            .execute(token.aggregate_id(), |_| {
                Ok(vec![WaitEvent::registered(token, run_id, now)])
            })
            .await?;
        tracing::debug!(%run_id, %token, "webhook wait registered");
        Ok(WaitHandle {
            token,
            url: self.wait_url(token)?,
        })
    }

    /// `{base}/rsvp/{token}`.
    pub fn wait_url(&self, token: WaitToken) -> Result<Url> {
        let mut base = Url::parse(&self.base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(base.join(&format!("rsvp/{token}"))?)
    }

    /// The link a guest clicks to answer.
    pub fn reply_url(&self, token: WaitToken, reply: RsvpDecision, guest: &str) -> Result<Url> {
        let mut url = self.wait_url(token)?;
        url.query_pairs_mut()
            .append_pair("reply", reply.as_str())
            .append_pair("email", guest);
        Ok(url)
    }

    /// Records the first signal for `token` and wakes its waiter.
    ///
    /// Returns false for unknown tokens and for waits that were already
    /// resolved. Neither is an error.
    #[tracing::instrument(skip(self, payload, now), fields(reply = %payload.reply))]
    pub async fn resolve(
        &self,
        token: WaitToken,
        payload: RsvpPayload,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if self.waits.load_existing(token.aggregate_id()).await?.is_none() {
            tracing::debug!("signal for unknown wait ignored");
            return Ok(false);
        }

        let outcome = self
            .waits
            .execute(token.aggregate_id(), |wait| {
                Ok(wait.resolve(payload, now).into_iter().collect())
            })
            .await;

        let resolved = match outcome {
            Ok(result) => !result.events.is_empty(),
            Err(DomainError::EventStore(e)) if e.is_conflict() => false,
            Err(e) => return Err(SagaError::from(e)),
        };

        if resolved {
            metrics::counter!("rsvp_waits_resolved_total").increment(1);
            tracing::info!("webhook wait resolved");
            if let Some(notify) = self.notifiers().get(&token) {
                notify.notify_waiters();
            }
        } else {
            metrics::counter!("rsvp_duplicate_resolutions_total").increment(1);
            tracing::debug!("duplicate signal ignored");
        }
        Ok(resolved)
    }

    /// Current resolution of a wait, if any.
    pub async fn resolution(&self, token: WaitToken) -> Result<Option<RsvpPayload>> {
        let wait = self.waits.load_existing(token.aggregate_id()).await?;
        Ok(wait.and_then(|w| w.payload().cloned()))
    }

    /// Suspends until the wait is resolved and returns its payload.
    ///
    /// Woken in-process by [`resolve`](Self::resolve); re-reads the store every
    /// poll interval to pick up resolutions recorded elsewhere.
    pub async fn wait(&self, token: WaitToken) -> Result<RsvpPayload> {
        let notify = self.notifier(token);
        let outcome = loop {
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.resolution(token).await {
                Ok(Some(payload)) => break Ok(payload),
                Ok(None) => {}
                Err(e) => break Err(e),
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        };
        self.notifiers().remove(&token);
        outcome
    }
}
