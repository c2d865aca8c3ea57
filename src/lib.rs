//! threadgate: identities, group-signature contexts and bearer-token contexts
//! for clients of a remote threaded-database service, plus a reference token
//! issuer.

pub mod cli;
pub mod config;
pub mod error;
pub mod identity;
pub mod server;
pub mod wire;

pub use config::SessionConfig;
pub use error::{CancelReason, SessionError, SessionResult};
pub use identity::{new_identity, Identity, RequestContext, SessionContextBuilder, SessionToken, TokenEndpoint};
