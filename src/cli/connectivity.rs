use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::SessionConfig;
use crate::identity::{EndpointError, Identity, RequestContext, SessionContextBuilder, SessionToken, TokenEndpoint};
use crate::wire::{
    ChallengeRequest, ChallengeResponse, ErrorBody, Principal, TokenRequest, TokenResponse, CHALLENGE_PATH,
    TOKEN_PATH, WHOAMI_PATH,
};

/// Token endpoint reached over HTTP/JSON.
///
/// One `issue_token` call posts the public key to `token/challenge`, signs the
/// returned nonce and posts the proof to `token`. No retries.
#[derive(Clone)]
pub struct HttpTokenEndpoint {
    base: Url,
    client: reqwest::Client,
}

impl HttpTokenEndpoint {
    pub fn new(base: &str, timeout: Duration) -> Result<Self, EndpointError> {
        let mut base_url = Url::parse(base).map_err(|e| EndpointError::Config(format!("invalid base URL '{}': {}", base, e)))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(EndpointError::Config(format!("unsupported scheme '{}'", base_url.scheme())));
        }
        // relative joins need a trailing slash to keep any base path
        if !base_url.path().ends_with('/') {
            let p = format!("{}/", base_url.path());
            base_url.set_path(&p);
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EndpointError::Config(e.to_string()))?;
        Ok(Self { base: base_url, client })
    }

    pub fn from_config(cfg: &SessionConfig) -> Result<Self, EndpointError> { Self::new(&cfg.endpoint, cfg.timeout()) }

    pub fn base(&self) -> &Url { &self.base }

    async fn post_json<B: Serialize, R: DeserializeOwned>(&self, path: &str, body: &B) -> Result<R, EndpointError> {
        let url = self.base.join(path).map_err(|e| EndpointError::Config(e.to_string()))?;
        let resp = self.client.post(url).json(body).send().await.map_err(transport_error)?;
        read_json(resp).await
    }

    /// Ask the endpoint who a context authenticates as.
    pub async fn whoami(&self, ctx: &RequestContext) -> Result<Principal, EndpointError> {
        let url = self.base.join(WHOAMI_PATH).map_err(|e| EndpointError::Config(e.to_string()))?;
        let headers = ctx.header_map().map_err(|e| EndpointError::Protocol(format!("unsendable context metadata: {}", e)))?;
        let resp = self.client.get(url).headers(headers).send().await.map_err(transport_error)?;
        read_json(resp).await
    }
}

impl SessionContextBuilder<HttpTokenEndpoint> {
    pub fn from_config(cfg: &SessionConfig) -> Result<Self, EndpointError> {
        Ok(SessionContextBuilder::new(HttpTokenEndpoint::from_config(cfg)?))
    }
}

#[async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
    async fn issue_token(&self, identity: &Identity) -> Result<SessionToken, EndpointError> {
        let public_key = identity.public_key().to_string();
        let challenge: ChallengeResponse =
            self.post_json(CHALLENGE_PATH, &ChallengeRequest { public_key: public_key.clone() }).await?;
        let nonce = URL_SAFE_NO_PAD
            .decode(challenge.nonce.trim())
            .map_err(|e| EndpointError::Protocol(format!("challenge nonce is not base64url: {}", e)))?;
        let signature = identity.sign(&nonce).to_string();
        let issued: TokenResponse = self
            .post_json(TOKEN_PATH, &TokenRequest { challenge_id: challenge.challenge_id, public_key, signature })
            .await?;
        if issued.token.is_empty() {
            return Err(EndpointError::Protocol("empty token".into()));
        }
        Ok(SessionToken::new(issued.token))
    }

    fn describe(&self) -> String { format!("http:{}", self.base) }
}

fn transport_error(e: reqwest::Error) -> EndpointError { EndpointError::Transport(e.to_string()) }

async fn read_json<R: DeserializeOwned>(resp: reqwest::Response) -> Result<R, EndpointError> {
    let status = resp.status();
    if status.is_success() {
        return resp.json::<R>().await.map_err(|e| EndpointError::Protocol(e.to_string()));
    }
    let detail = resp
        .json::<ErrorBody>()
        .await
        .map(|b| if b.error.is_empty() { b.status } else { b.error })
        .unwrap_or_else(|_| format!("HTTP {}", status));
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => EndpointError::Rejected(detail),
        StatusCode::TOO_MANY_REQUESTS => EndpointError::Unavailable(detail),
        s if s.is_server_error() => EndpointError::Unavailable(detail),
        _ => EndpointError::Protocol(format!("HTTP {}: {}", status, detail)),
    })
}
