//! Error model for identity generation, context signing and token exchange.
//! Every failure is returned to the caller as a `SessionError`; nothing in the
//! library logs an error it returns or terminates the process.

use std::fmt::{Display, Formatter};

use thiserror::Error;

use crate::identity::EndpointError;

/// Why a token exchange was abandoned before the remote answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The context's cancellation token fired.
    Cancelled,
    /// The context's deadline passed.
    DeadlineExceeded,
}

impl Display for CancelReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelReason::Cancelled => f.write_str("context cancelled"),
            CancelReason::DeadlineExceeded => f.write_str("deadline exceeded"),
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    #[error("signing failed: {0}")]
    SigningFailed(String),

    #[error("token exchange failed: {0}")]
    TokenExchangeFailed(#[source] EndpointError),

    #[error("token exchange aborted: {reason}")]
    Cancelled { reason: CancelReason },

    /// The context already carries credentials from the other auth path.
    #[error("cannot move request context from {from} to {to}")]
    InvalidTransition { from: &'static str, to: &'static str },
}

impl SessionError {
    pub fn signing<S: Into<String>>(msg: S) -> Self { SessionError::SigningFailed(msg.into()) }

    /// Stable machine-readable code, suitable for logs and wire error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::KeyGenerationFailed(_) => "key_generation_failed",
            SessionError::SigningFailed(_) => "signing_failed",
            SessionError::TokenExchangeFailed(_) => "token_exchange_failed",
            SessionError::Cancelled { reason: CancelReason::Cancelled } => "cancelled",
            SessionError::Cancelled { reason: CancelReason::DeadlineExceeded } => "deadline_exceeded",
            SessionError::InvalidTransition { .. } => "invalid_transition",
        }
    }

    pub fn is_cancelled(&self) -> bool { matches!(self, SessionError::Cancelled { .. }) }

    /// True when a retry layer may try the same exchange again.
    pub fn is_transient(&self) -> bool {
        match self {
            SessionError::TokenExchangeFailed(e) => e.is_transient(),
            _ => false,
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
