//! Retrying wrapper around a `GenerativeModel`.
//!
//! One `AiClient` owns one `RetryState`. The state lock is only held to read or
//! update the streak, never across a sleep or a model call, so a shared client
//! does not serialize unrelated callers behind someone else's cooldown.

use crate::extract;
use crate::retry::{RetryPolicy, RetryState};
use specsplit_core::{CancelFlag, Error, Extracted, GenerativeModel, Result};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Granularity at which long waits re-check the cancel flag.
const CANCEL_POLL: Duration = Duration::from_millis(250);

#[derive(Debug)]
pub struct AiClient<M> {
    model: M,
    policy: RetryPolicy,
    state: Mutex<RetryState>,
}

impl<M: GenerativeModel> AiClient<M> {
    pub fn new(model: M) -> Self {
        Self::with_policy(model, RetryPolicy::default())
    }

    pub fn with_policy(model: M, policy: RetryPolicy) -> Self {
        Self {
            model,
            policy,
            state: Mutex::new(RetryState::default()),
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Snapshot of the current failure streak.
    pub fn retry_state(&self) -> RetryState {
        self.state().clone()
    }

    fn state(&self) -> MutexGuard<'_, RetryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub async fn call(
        &self,
        prompt: &str,
        extract_structured: bool,
        max_retries: u32,
    ) -> Result<Extracted> {
        self.call_with_cancel(prompt, extract_structured, max_retries, None)
            .await
    }

    /// [`AiClient::call`] with the policy's `max_retries`.
    pub async fn call_default(&self, prompt: &str, extract_structured: bool) -> Result<Extracted> {
        self.call(prompt, extract_structured, self.policy.max_retries)
            .await
    }

    /// Like [`AiClient::call`], but gives up with `Error::Cancelled` at the next
    /// sleep boundary once `cancel` is set.
    pub async fn call_with_cancel(
        &self,
        prompt: &str,
        extract_structured: bool,
        max_retries: u32,
        cancel: Option<&CancelFlag>,
    ) -> Result<Extracted> {
        let attempts = max_retries.max(1);

        let cooldown = self.state().remaining_cooldown(&self.policy, Instant::now());
        if let Some(wait) = cooldown {
            tracing::info!(
                wait_ms = wait.as_millis() as u64,
                model = self.model.name(),
                "rate limit cooldown before next request"
            );
            pause(wait, cancel).await?;
        }

        let mut last_failure: Option<(bool, String)> = None;
        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self.policy.backoff(attempt);
                tracing::info!(
                    attempt = attempt + 1,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    "retrying model call"
                );
                pause(delay, cancel).await?;
            }

            match self.model.generate(prompt).await {
                Ok(text) => {
                    self.state().record_success();
                    if !extract_structured {
                        return Ok(Extracted::Raw(text));
                    }
                    let out = extract::extract_structured(&text);
                    if matches!(out, Extracted::Raw(_)) {
                        tracing::warn!(
                            len = text.len(),
                            "structured extraction did not apply; falling back to raw text"
                        );
                    }
                    return Ok(out);
                }
                Err(e @ (Error::Cancelled | Error::NotConfigured(_) | Error::Configuration(_))) => {
                    return Err(e);
                }
                Err(e) => {
                    let rate_limited = e.is_rate_limit();
                    if rate_limited {
                        self.state().record_rate_limit(Instant::now());
                    }
                    let message = e.to_string();
                    if attempt + 1 < attempts {
                        tracing::warn!(
                            attempt = attempt + 1,
                            attempts,
                            rate_limited,
                            error = %message,
                            "model call failed; will retry"
                        );
                    } else {
                        tracing::error!(
                            attempts,
                            rate_limited,
                            error = %message,
                            "model call failed; retries exhausted"
                        );
                    }
                    last_failure = Some((rate_limited, message));
                }
            }
        }

        let (rate_limited, message) =
            last_failure.unwrap_or((false, "no attempt was made".to_string()));
        if rate_limited {
            Err(Error::RateLimited { attempts, message })
        } else {
            Err(Error::TransientCall { attempts, message })
        }
    }
}

fn cancelled(cancel: Option<&CancelFlag>) -> bool {
    cancel.is_some_and(|c| c.is_cancelled())
}

pub(crate) async fn pause(total: Duration, cancel: Option<&CancelFlag>) -> Result<()> {
    if cancelled(cancel) {
        return Err(Error::Cancelled);
    }
    if cancel.is_none() {
        tokio::time::sleep(total).await;
        return Ok(());
    }
    let deadline = Instant::now() + total;
    loop {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        tokio::time::sleep((deadline - now).min(CANCEL_POLL)).await;
        if cancelled(cancel) {
            return Err(Error::Cancelled);
        }
    }
    Ok(())
}
