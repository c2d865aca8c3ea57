//! Optional retry layer around the token exchange.
//!
//! The builder itself performs exactly one exchange per call. Callers that want
//! resilience wrap it with [`with_session_token_retrying`], which retries only
//! transient endpoint failures (transport errors, unavailable endpoint).
//! Rejections, invalid transitions and cancellation are returned immediately.
//!
//! # Backoff
//!
//! Delay doubles per attempt starting at `initial_backoff`, capped at
//! `max_backoff`, plus 0-50% random jitter. Backoff sleeps end early when the
//! context is cancelled or its deadline passes.

use std::time::Duration;

use rand::Rng;
use tokio::time::{sleep, sleep_until};

use super::keys::Identity;
use super::provider::TokenEndpoint;
use super::request_context::RequestContext;
use super::session::SessionContextBuilder;
use crate::error::{CancelReason, SessionError, SessionResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Zero behaves as one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, initial_backoff: Duration::from_millis(100), max_backoff: Duration::from_secs(2) }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self { Self { max_attempts: 1, ..Self::default() } }

    /// Default backoff with `extra` attempts after the first.
    pub fn with_retries(extra: u32) -> Self { Self { max_attempts: extra.saturating_add(1), ..Self::default() } }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff.saturating_mul(1u32 << attempt.min(16));
        let capped = base.min(self.max_backoff);
        let jitter_ms = (capped.as_millis() as u64) / 2;
        let jitter = if jitter_ms == 0 { 0 } else { rand::thread_rng().gen_range(0..=jitter_ms) };
        capped + Duration::from_millis(jitter)
    }
}

#[tracing::instrument(skip_all, fields(request_id = %ctx.request_id, max_attempts = policy.max_attempts))]
pub async fn with_session_token_retrying<E: TokenEndpoint>(
    builder: &SessionContextBuilder<E>,
    ctx: &RequestContext,
    identity: &Identity,
    policy: &RetryPolicy,
) -> SessionResult<RequestContext> {
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        match builder.with_session_token(ctx, identity).await {
            Ok(out) => {
                if attempt > 0 {
                    tracing::debug!(target: "threadgate::session", attempt = attempt + 1, "token exchange succeeded after retry");
                }
                return Ok(out);
            }
            Err(err) if err.is_transient() && attempt + 1 < attempts => {
                let delay = policy.backoff(attempt);
                tracing::debug!(
                    target: "threadgate::session",
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient token exchange failure, retrying after backoff"
                );
                wait_or_cancel(ctx, delay).await?;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

async fn wait_or_cancel(ctx: &RequestContext, delay: Duration) -> SessionResult<()> {
    let deadline = async {
        match ctx.deadline() {
            Some(d) => sleep_until(d).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        biased;
        _ = ctx.cancellation_token().cancelled() => Err(SessionError::Cancelled { reason: CancelReason::Cancelled }),
        _ = deadline => Err(SessionError::Cancelled { reason: CancelReason::DeadlineExceeded }),
        _ = sleep(delay) => Ok(()),
    }
}
