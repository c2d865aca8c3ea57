//! Token-path tests against in-process stub endpoints: approval, rejection,
//! cancellation, deadlines and the retry layer.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use threadgate::error::{CancelReason, SessionError};
use threadgate::identity::{
    generate_group_secret, verify_group_auth, with_session_token_retrying, AuthState, EndpointError, Identity,
    ManualClock, RequestContext, RetryPolicy, SessionContextBuilder, SessionToken, TokenEndpoint,
};

struct Approve(&'static str);

#[async_trait]
impl TokenEndpoint for Approve {
    async fn issue_token(&self, _identity: &Identity) -> Result<SessionToken, EndpointError> {
        Ok(SessionToken::new(self.0))
    }
}

struct Reject;

#[async_trait]
impl TokenEndpoint for Reject {
    async fn issue_token(&self, _identity: &Identity) -> Result<SessionToken, EndpointError> {
        Err(EndpointError::Rejected("identity proof refused".into()))
    }
}

struct Slow(Duration);

#[async_trait]
impl TokenEndpoint for Slow {
    async fn issue_token(&self, _identity: &Identity) -> Result<SessionToken, EndpointError> {
        tokio::time::sleep(self.0).await;
        Ok(SessionToken::new("too-late"))
    }
}

/// Fails with `err` for the first `failures` calls, then approves.
struct Flaky {
    failures: usize,
    err: EndpointError,
    calls: AtomicUsize,
}

impl Flaky {
    fn new(failures: usize, err: EndpointError) -> Self { Self { failures, err, calls: AtomicUsize::new(0) } }
    fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }
}

#[async_trait]
impl TokenEndpoint for Flaky {
    async fn issue_token(&self, _identity: &Identity) -> Result<SessionToken, EndpointError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures { Err(self.err.clone()) } else { Ok(SessionToken::new(format!("tok-{}", n))) }
    }
}

fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy { max_attempts, initial_backoff: Duration::from_millis(1), max_backoff: Duration::from_millis(5) }
}

#[tokio::test]
async fn approving_endpoint_attaches_issued_token() -> Result<()> {
    let builder = SessionContextBuilder::new(Approve("issued-by-stub"));
    let identity = Identity::generate()?;
    let base = RequestContext::new();

    let ctx = builder.with_session_token(&base, &identity).await?;
    assert_eq!(ctx.token().map(SessionToken::as_str), Some("issued-by-stub"));
    assert_eq!(ctx.request_id, base.request_id);
    assert_eq!(base.auth(), &AuthState::Bare);
    let md = ctx.metadata();
    assert!(md.contains(&("authorization", "Bearer issued-by-stub".to_string())));
    Ok(())
}

#[tokio::test]
async fn rejecting_endpoint_leaves_context_reusable() -> Result<()> {
    let identity = Identity::generate()?;
    let base = RequestContext::new();
    let before = base.metadata();

    let err = SessionContextBuilder::new(Reject).with_session_token(&base, &identity).await.unwrap_err();
    assert!(matches!(err, SessionError::TokenExchangeFailed(EndpointError::Rejected(_))), "{err:?}");
    assert_eq!(base.metadata(), before);
    assert!(!base.is_cancelled());

    let ctx = SessionContextBuilder::new(Approve("second-try")).with_session_token(&base, &identity).await?;
    assert_eq!(ctx.token().unwrap().as_str(), "second-try");
    Ok(())
}

#[tokio::test]
async fn cancellation_aborts_slow_exchange() -> Result<()> {
    let builder = SessionContextBuilder::new(Slow(Duration::from_secs(30)));
    let identity = Identity::generate()?;
    let base = RequestContext::new();

    let canceller = base.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let res = tokio::time::timeout(Duration::from_secs(5), builder.with_session_token(&base, &identity)).await?;
    let err = res.unwrap_err();
    assert!(matches!(err, SessionError::Cancelled { reason: CancelReason::Cancelled }), "{err:?}");
    assert_eq!(err.code(), "cancelled");
    Ok(())
}

#[tokio::test]
async fn deadline_aborts_slow_exchange() -> Result<()> {
    let builder = SessionContextBuilder::new(Slow(Duration::from_secs(30)));
    let identity = Identity::generate()?;
    let base = RequestContext::new().with_timeout(Duration::from_millis(50));

    let started = tokio::time::Instant::now();
    let res = tokio::time::timeout(Duration::from_secs(5), builder.with_session_token(&base, &identity)).await?;
    let err = res.unwrap_err();
    assert!(matches!(err, SessionError::Cancelled { reason: CancelReason::DeadlineExceeded }), "{err:?}");
    assert!(started.elapsed() < Duration::from_secs(5));
    Ok(())
}

#[tokio::test]
async fn cancelling_a_child_does_not_touch_the_parent() -> Result<()> {
    let builder = SessionContextBuilder::new(Slow(Duration::from_millis(20)));
    let identity = Identity::generate()?;
    let parent = RequestContext::new();
    let child = parent.child();
    child.cancel();

    assert!(builder.with_session_token(&child, &identity).await.unwrap_err().is_cancelled());
    let ctx = builder.with_session_token(&parent, &identity).await?;
    assert_eq!(ctx.token().unwrap().as_str(), "too-late");
    Ok(())
}

#[tokio::test]
async fn builder_clock_drives_group_window() -> Result<()> {
    let t0 = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
    let clock = ManualClock::new(t0);
    let builder = SessionContextBuilder::new(Reject).with_clock(Arc::new(clock.clone()));
    let secret = generate_group_secret()?;

    let ctx = builder.with_group_auth(&RequestContext::new(), "team", &secret)?;
    let auth = ctx.group_auth().unwrap();
    assert_eq!(auth.not_before, t0);
    assert!(verify_group_auth(auth, &secret, t0 + chrono::Duration::seconds(60)).is_ok());
    assert!(verify_group_auth(auth, &secret, t0 + chrono::Duration::seconds(61)).is_err());
    Ok(())
}

#[tokio::test]
async fn retry_recovers_from_transient_failures() -> Result<()> {
    let builder = SessionContextBuilder::new(Flaky::new(2, EndpointError::Unavailable("503".into())));
    let identity = Identity::generate()?;

    let ctx = with_session_token_retrying(&builder, &RequestContext::new(), &identity, &fast_policy(3)).await?;
    assert_eq!(ctx.token().unwrap().as_str(), "tok-2");
    assert_eq!(builder.endpoint().calls(), 3);
    Ok(())
}

#[tokio::test]
async fn retry_gives_up_after_max_attempts() -> Result<()> {
    let builder = SessionContextBuilder::new(Flaky::new(10, EndpointError::Transport("reset".into())));
    let identity = Identity::generate()?;

    let err = with_session_token_retrying(&builder, &RequestContext::new(), &identity, &fast_policy(4))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::TokenExchangeFailed(EndpointError::Transport(_))));
    assert_eq!(builder.endpoint().calls(), 4);
    Ok(())
}

#[tokio::test]
async fn retry_does_not_repeat_rejections() -> Result<()> {
    let builder = SessionContextBuilder::new(Flaky::new(10, EndpointError::Rejected("bad proof".into())));
    let identity = Identity::generate()?;

    let err = with_session_token_retrying(&builder, &RequestContext::new(), &identity, &fast_policy(5))
        .await
        .unwrap_err();
    assert!(!err.is_transient());
    assert_eq!(builder.endpoint().calls(), 1);
    Ok(())
}

#[tokio::test]
async fn retry_backoff_honours_cancellation() -> Result<()> {
    let builder = SessionContextBuilder::new(Flaky::new(10, EndpointError::Unavailable("503".into())));
    let identity = Identity::generate()?;
    let policy =
        RetryPolicy { max_attempts: 5, initial_backoff: Duration::from_secs(30), max_backoff: Duration::from_secs(30) };
    let base = RequestContext::new().with_timeout(Duration::from_millis(50));

    let res =
        tokio::time::timeout(Duration::from_secs(5), with_session_token_retrying(&builder, &base, &identity, &policy))
            .await?;
    assert!(matches!(res.unwrap_err(), SessionError::Cancelled { reason: CancelReason::DeadlineExceeded }));
    assert_eq!(builder.endpoint().calls(), 1);
    Ok(())
}
