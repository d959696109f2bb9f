// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Retry with exponential backoff around a single model call

use std::time::Duration;
use tracing::warn;

use crate::model::{ModelBackend, ModelRequest, ModelResponse};
use crate::validation::redact;
use crate::{Result, ScriptoriumError};

/// Message fragments that mark an error as transient
const TRANSIENT_MARKERS: &[&str] = &[
    "429",
    "quota",
    "rate limit",
    "resource has been exhausted",
    "resource exhausted",
    "resource_exhausted",
    "timeout",
    "timed out",
    "temporar",
    "unavailable",
];

/// How many times to try and how long to wait in between
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub factor: u32,
    /// Upper bound on any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            factor: 2,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based), capped at `max_delay`
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        u64::from(self.factor)
            .checked_pow(exponent)
            .and_then(|m| u32::try_from(m).ok())
            .and_then(|m| self.initial_delay.checked_mul(m))
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// Emitted before sleeping ahead of another attempt
#[derive(Debug, Clone)]
pub struct RetryNotice {
    pub attempt: u32,
    pub max_attempts: u32,
    pub delay: Duration,
    pub message: String,
}

/// A successful call and how many attempts it took
#[derive(Debug, Clone)]
pub struct Generation {
    pub response: ModelResponse,
    pub attempts: u32,
}

/// Whether an error is worth another attempt
pub fn is_retryable(err: &ScriptoriumError) -> bool {
    match err {
        ScriptoriumError::Api { status, message } => {
            matches!(status, 408 | 429 | 500 | 502 | 503 | 504) || mentions_transient(message)
        }
        ScriptoriumError::Http(e) => {
            e.is_timeout()
                || e.is_connect()
                || e.status().is_some_and(|s| s.as_u16() == 429 || s.is_server_error())
        }
        ScriptoriumError::ModelCall { source, .. } => is_retryable(source),
        ScriptoriumError::FileSystem(_)
        | ScriptoriumError::MissingApiKey
        | ScriptoriumError::InvalidApiKey
        | ScriptoriumError::Cancelled => false,
        other => mentions_transient(&other.to_string()),
    }
}

fn mentions_transient(message: &str) -> bool {
    let lower = message.to_lowercase();
    TRANSIENT_MARKERS.iter().any(|m| lower.contains(m))
}

/// Call `backend`, retrying transient failures per `policy`.
///
/// The final error is wrapped in [`ScriptoriumError::ModelCall`] with the
/// number of attempts made.
pub async fn generate_with_retry<F>(
    backend: &dyn ModelBackend,
    request: &ModelRequest,
    policy: &RetryPolicy,
    mut on_retry: F,
) -> Result<Generation>
where
    F: FnMut(&RetryNotice) + Send,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match backend.generate(request).await {
            Ok(response) => return Ok(Generation { response, attempts: attempt }),
            Err(e) => {
                if attempt >= max_attempts || !is_retryable(&e) {
                    return Err(ScriptoriumError::ModelCall {
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }

                let delay = policy.delay_after(attempt);
                let notice = RetryNotice {
                    attempt,
                    max_attempts,
                    delay,
                    message: redact(&e.to_string()).into_owned(),
                };
                warn!(
                    "Transient error on attempt {}/{}: {}. Retrying in {:?}",
                    attempt, max_attempts, notice.message, delay
                );
                on_retry(&notice);
                tokio::time::sleep(delay).await;
            }
        }
    }
}
