//! Timeout and retry policy for collaborator calls.
//!
//! Every collaborator call goes through [`call_with_retry`]:
//! - the call is bounded by `call_timeout`
//! - failures are retried up to `retry_limit` times in total per call, with
//!   exponential backoff (factor 2, capped at `backoff_max`)
//! - `MalformedOutput` takes at most one of those retries, then escalates
//! - cancellation is observed while the call is in flight and while backing off
//!
//! Retries never touch a unit's revision counter; callers get the list of
//! retried errors back so they can record them.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::PipelineConfig;
use crate::errors::{CallKind, CollaboratorError};

/// `MalformedOutput` gets one more chance before it escalates.
const MALFORMED_RETRY_LIMIT: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retry_limit: u32,
    pub call_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            retry_limit: config.retry_limit,
            call_timeout: config.call_timeout,
            backoff_base: config.backoff_base,
            backoff_max: config.backoff_max,
        }
    }

    /// Retries allowed for malformed output: one, unless retries are disabled.
    pub fn malformed_retry_limit(&self) -> u32 {
        MALFORMED_RETRY_LIMIT.min(self.retry_limit)
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32, error: &CollaboratorError) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        let exponential = self.backoff_base.saturating_mul(1u32 << exponent);
        let delay = match error {
            CollaboratorError::RateLimited {
                retry_after: Some(after),
                ..
            } => *after,
            _ => exponential,
        };
        delay.min(self.backoff_max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

/// A transient failure that was retried.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryRecord {
    /// Attempt number that failed (1-based).
    pub attempt: u32,
    pub error: CollaboratorError,
}

/// A call that succeeded, possibly after retries.
#[derive(Debug)]
pub struct CallOutcome<T> {
    pub value: T,
    pub retries: Vec<RetryRecord>,
}

/// A call that did not succeed.
#[derive(Debug)]
pub enum CallError {
    /// The call's retry budget (or the malformed-output sub-cap) is spent.
    Exhausted {
        error: CollaboratorError,
        attempts: u32,
        retries: Vec<RetryRecord>,
    },
    Cancelled { retries: Vec<RetryRecord> },
}

impl CallError {
    pub fn retries(&self) -> &[RetryRecord] {
        match self {
            CallError::Exhausted { retries, .. } | CallError::Cancelled { retries } => retries,
        }
    }
}

/// Run `op` under the policy. `op` is invoked once per attempt.
pub async fn call_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    call: CallKind,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<CallOutcome<T>, CallError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CollaboratorError>>,
{
    let mut retries = Vec::new();
    let mut used = 0u32;
    let mut malformed_retries = 0u32;
    let mut attempts = 0u32;

    loop {
        attempts += 1;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CallError::Cancelled { retries }),
            r = tokio::time::timeout(policy.call_timeout, op()) => r,
        };

        let error = match result {
            Ok(Ok(value)) => return Ok(CallOutcome { value, retries }),
            Ok(Err(e)) => e,
            Err(_) => CollaboratorError::timeout(call, policy.call_timeout),
        };

        let within_sub_cap =
            error.is_transient() || malformed_retries < policy.malformed_retry_limit();
        if used >= policy.retry_limit || !within_sub_cap {
            return Err(CallError::Exhausted {
                error,
                attempts,
                retries,
            });
        }
        used += 1;
        if !error.is_transient() {
            malformed_retries += 1;
        }
        let retry_number = used;

        let delay = policy.backoff(retry_number, &error);
        warn!(
            call = %call,
            attempt = attempts,
            error = %error,
            delay_ms = delay.as_millis() as u64,
            "Collaborator call failed, retrying"
        );
        retries.push(RetryRecord {
            attempt: attempts,
            error,
        });

        if !delay.is_zero() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CallError::Cancelled { retries }),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
