//! JSON bodies exchanged with the token endpoint over HTTP.

use serde::{Deserialize, Serialize};

pub const CHALLENGE_PATH: &str = "token/challenge";
pub const TOKEN_PATH: &str = "token";
pub const WHOAMI_PATH: &str = "whoami";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeRequest {
    pub public_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeResponse {
    pub challenge_id: String,
    /// base64url nonce the caller must sign with its identity key.
    pub nonce: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRequest {
    pub challenge_id: String,
    pub public_key: String,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
    #[serde(default)]
    pub expires_in_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Principal {
    Identity { public_key: String },
    Group { key: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub status: String,
    #[serde(default)]
    pub error: String,
}
