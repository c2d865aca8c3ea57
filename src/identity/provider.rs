use std::fmt::{Debug, Formatter};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::keys::Identity;

/// Opaque bearer credential issued by a remote authority.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new<S: Into<String>>(s: S) -> Self { Self(s.into()) }
    pub fn as_str(&self) -> &str { &self.0 }
    pub fn into_inner(self) -> String { self.0 }
}

impl Debug for SessionToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str("SessionToken(***)") }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
    /// Connection, DNS, TLS or timeout failure before an answer arrived.
    #[error("transport error: {0}")]
    Transport(String),
    /// The endpoint answered and refused the identity proof.
    #[error("rejected: {0}")]
    Rejected(String),
    /// The endpoint answered but could not serve the request right now.
    #[error("unavailable: {0}")]
    Unavailable(String),
    /// The endpoint answered with something we could not understand.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The endpoint could not be set up from its configuration.
    #[error("invalid endpoint configuration: {0}")]
    Config(String),
}

impl EndpointError {
    pub fn is_transient(&self) -> bool { matches!(self, EndpointError::Transport(_) | EndpointError::Unavailable(_)) }
}

/// A remote authority that exchanges an identity proof for a bearer token.
///
/// Implementations send the identity's public key, sign the challenge they get
/// back with [`Identity::sign`], and return the issued token. One call is one
/// exchange; implementations must not retry on their own.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    async fn issue_token(&self, identity: &Identity) -> Result<SessionToken, EndpointError>;

    /// Short description for logs.
    fn describe(&self) -> String { "token-endpoint".to_string() }
}

#[async_trait]
impl<E: TokenEndpoint + ?Sized> TokenEndpoint for std::sync::Arc<E> {
    async fn issue_token(&self, identity: &Identity) -> Result<SessionToken, EndpointError> {
        (**self).issue_token(identity).await
    }

    fn describe(&self) -> String { (**self).describe() }
}
