use std::sync::Arc;

use tokio::time::sleep_until;

use super::clock::{Clock, SystemClock};
use super::group_auth;
use super::keys::Identity;
use super::provider::TokenEndpoint;
use super::request_context::{AuthState, RequestContext};
use crate::error::{CancelReason, SessionError, SessionResult};

/// Attaches authentication material to outbound request contexts.
///
/// Two independent paths are offered: group auth (key plus a time-boxed
/// signature, computed locally) and session tokens (one exchange with the
/// remote endpoint). A context moves from bare to exactly one of them.
pub struct SessionContextBuilder<E> {
    endpoint: E,
    clock: Arc<dyn Clock>,
}

impl<E: TokenEndpoint> SessionContextBuilder<E> {
    pub fn new(endpoint: E) -> Self { Self { endpoint, clock: Arc::new(SystemClock) } }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn endpoint(&self) -> &E { &self.endpoint }

    pub fn clock(&self) -> &dyn Clock { self.clock.as_ref() }

    /// Group-auth path, with the window starting at the builder clock's now.
    pub fn with_group_auth(&self, ctx: &RequestContext, group_key: &str, group_secret: &str) -> SessionResult<RequestContext> {
        group_auth::with_group_auth(ctx, group_key, group_secret, self.clock.now())
    }

    /// Token path: exchange `identity` for a bearer token and attach it to a
    /// copy of `ctx`.
    ///
    /// The exchange is raced against the context's cancellation token and
    /// deadline; whichever fires first drops the in-flight exchange and
    /// returns [`SessionError::Cancelled`].
    pub async fn with_session_token(&self, ctx: &RequestContext, identity: &Identity) -> SessionResult<RequestContext> {
        if let AuthState::GroupAuthed(_) = ctx.auth() {
            return Err(SessionError::InvalidTransition { from: ctx.auth().name(), to: "tokened" });
        }
        if ctx.is_cancelled() {
            return Err(SessionError::Cancelled { reason: CancelReason::Cancelled });
        }
        if ctx.deadline_passed() {
            return Err(SessionError::Cancelled { reason: CancelReason::DeadlineExceeded });
        }

        let deadline = async {
            match ctx.deadline() {
                Some(d) => sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        tracing::debug!(
            target: "threadgate::session",
            request_id = %ctx.request_id,
            endpoint = %self.endpoint.describe(),
            public_key = %identity.public_key(),
            "token exchange started"
        );
        let token = tokio::select! {
            biased;
            _ = ctx.cancellation_token().cancelled() => {
                return Err(SessionError::Cancelled { reason: CancelReason::Cancelled });
            }
            _ = deadline => {
                return Err(SessionError::Cancelled { reason: CancelReason::DeadlineExceeded });
            }
            res = self.endpoint.issue_token(identity) => res.map_err(SessionError::TokenExchangeFailed)?,
        };
        tracing::debug!(target: "threadgate::session", request_id = %ctx.request_id, "session token attached");
        Ok(ctx.with_auth(AuthState::Tokened(token)))
    }
}
