use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, InvalidHeaderValue};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::group_auth::GroupAuth;
use super::provider::SessionToken;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const API_KEY_HEADER: &str = "x-api-key";
pub const API_SIG_HEADER: &str = "x-api-sig";
pub const API_SIG_MSG_HEADER: &str = "x-api-sig-msg";
pub const AUTHORIZATION_HEADER: &str = "authorization";

/// Credentials carried by a context. Holding them in one enum keeps a context
/// to at most one token and at most one signature window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AuthState {
    #[default]
    Bare,
    GroupAuthed(GroupAuth),
    Tokened(SessionToken),
}

impl AuthState {
    pub fn name(&self) -> &'static str {
        match self {
            AuthState::Bare => "bare",
            AuthState::GroupAuthed(_) => "group_authed",
            AuthState::Tokened(_) => "tokened",
        }
    }
}

/// Per-request carrier for auth material, cancellation and deadline.
///
/// Contexts are values: auth operations borrow one and return a new one, so a
/// failed operation always leaves the caller's context as it was. Clones share
/// the same cancellation token.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    cancel: CancellationToken,
    deadline: Option<Instant>,
    auth: AuthState,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            cancel: CancellationToken::new(),
            deadline: None,
            auth: AuthState::Bare,
        }
    }
}

impl RequestContext {
    pub fn new() -> Self { Self::default() }

    /// A context bound to an existing cancellation token.
    pub fn with_cancellation(token: CancellationToken) -> Self { Self { cancel: token, ..Self::default() } }

    /// Derive a context whose token is cancelled with this one but can also be
    /// cancelled on its own.
    pub fn child(&self) -> Self {
        Self {
            request_id: self.request_id.clone(),
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
            auth: self.auth.clone(),
        }
    }

    /// Derive a context with a deadline `timeout` from now. An earlier
    /// deadline already on the context wins.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        };
        Self { deadline: Some(deadline), ..self.clone() }
    }

    pub(crate) fn with_auth(&self, auth: AuthState) -> Self { Self { auth, ..self.clone() } }

    pub fn auth(&self) -> &AuthState { &self.auth }

    pub fn group_auth(&self) -> Option<&GroupAuth> {
        match &self.auth {
            AuthState::GroupAuthed(g) => Some(g),
            _ => None,
        }
    }

    pub fn token(&self) -> Option<&SessionToken> {
        match &self.auth {
            AuthState::Tokened(t) => Some(t),
            _ => None,
        }
    }

    pub fn cancellation_token(&self) -> &CancellationToken { &self.cancel }

    pub fn cancel(&self) { self.cancel.cancel(); }

    pub fn is_cancelled(&self) -> bool { self.cancel.is_cancelled() }

    pub fn deadline(&self) -> Option<Instant> { self.deadline }

    pub fn deadline_passed(&self) -> bool { self.deadline.map(|d| Instant::now() >= d).unwrap_or(false) }

    /// Request metadata for the RPC layer, in a stable order.
    pub fn metadata(&self) -> Vec<(&'static str, String)> {
        let mut out = vec![(REQUEST_ID_HEADER, self.request_id.clone())];
        match &self.auth {
            AuthState::Bare => {}
            AuthState::GroupAuthed(g) => {
                out.push((API_KEY_HEADER, g.key.clone()));
                out.push((API_SIG_MSG_HEADER, g.message.clone()));
                out.push((API_SIG_HEADER, g.signature.clone()));
            }
            AuthState::Tokened(t) => {
                out.push((AUTHORIZATION_HEADER, format!("Bearer {}", t.as_str())));
            }
        }
        out
    }

    pub fn header_map(&self) -> Result<HeaderMap, InvalidHeaderValue> {
        let mut headers = HeaderMap::new();
        for (name, value) in self.metadata() {
            let mut v = HeaderValue::from_str(&value)?;
            if name == AUTHORIZATION_HEADER || name == API_SIG_HEADER {
                v.set_sensitive(true);
            }
            headers.insert(HeaderName::from_static(name), v);
        }
        Ok(headers)
    }
}
