//! Memoized, retried step invocation.

use std::future::Future;

use domain::{RunEvent, StepKey};
use event_store::EventStore;
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{Result, SagaError};
use crate::journal::RunJournal;
use crate::retry::RetryPolicy;
use crate::services::StepError;

/// Runs steps under the memoization and retry contract.
///
/// A key with a recorded output is never executed again; its output is
/// decoded from the journal instead. Otherwise the operation is attempted up
/// to `max_attempts` times, backing off between transient failures. Success is
/// recorded once; a provider side effect may repeat if the process dies
/// between the call and the record.
#[derive(Debug, Clone)]
pub struct StepRunner {
    retry: RetryPolicy,
}

impl StepRunner {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    #[tracing::instrument(skip_all, fields(run_id = %journal.run_id(), step = %key))]
    pub async fn invoke<S, T, F, Fut>(
        &self,
        journal: &RunJournal<S>,
        key: StepKey,
        mut operation: F,
    ) -> Result<T>
    where
        S: EventStore,
        T: Serialize + DeserializeOwned,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = std::result::Result<T, StepError>>,
    {
        let cached = journal.read(|run| run.step_output(&key).cloned()).await;
        if let Some(output) = cached {
            tracing::debug!("step result replayed from journal");
            metrics::counter!("saga_step_cache_hits_total", "step" => key.name.clone()).increment(1);
            return Ok(serde_json::from_value(output)?);
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            metrics::counter!("saga_step_attempts_total", "step" => key.name.clone()).increment(1);

            match operation(attempt).await {
                Ok(output) => {
                    let value = serde_json::to_value(&output)?;
                    journal
                        .record(RunEvent::step_completed(key, value, attempt))
                        .await?;
                    return Ok(output);
                }
                Err(error) if error.is_retryable() && self.retry.allows_retry_after(attempt) => {
                    let delay = self.retry.calculate_delay(attempt - 1);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "step attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    metrics::counter!("saga_step_failures_total", "step" => key.name.clone())
                        .increment(1);
                    tracing::error!(attempt, error = %error, "step failed");
                    let failure = SagaError::step(key.name.clone(), attempt, &error);
                    journal
                        .record(RunEvent::step_failed(
                            key,
                            error.to_string(),
                            attempt,
                            !error.is_retryable(),
                        ))
                        .await?;
                    return Err(failure);
                }
            }
        }
    }
}
