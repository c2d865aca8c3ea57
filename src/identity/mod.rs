//! Identities and request-scoped auth contexts for talking to the remote
//! threads service. Keep the public surface thin and split implementation
//! across sub-modules.

mod clock;
mod group_auth;
mod keys;
mod provider;
mod request_context;
mod retry;
mod session;

pub use clock::{Clock, ManualClock, SystemClock};
pub use group_auth::{
    generate_group_secret, group_auth_window, verify_group_auth, with_group_auth, with_group_auth_from, GroupAuth,
    GroupAuthRejection, GROUP_AUTH_WINDOW_SECS, MIN_SECRET_LEN,
};
pub use keys::{new_identity, Identity, IdentitySignature, KeyParseError, PublicKey};
pub use provider::{EndpointError, SessionToken, TokenEndpoint};
pub use request_context::{
    AuthState, RequestContext, API_KEY_HEADER, API_SIG_HEADER, API_SIG_MSG_HEADER, AUTHORIZATION_HEADER,
    REQUEST_ID_HEADER,
};
pub use retry::{with_session_token_retrying, RetryPolicy};
pub use session::SessionContextBuilder;
