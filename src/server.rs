//!
//! threadgate token issuer
//! -----------------------
//! Axum-based reference implementation of the remote token endpoint.
//!
//! Responsibilities:
//! - Challenge/response token issuance: a caller posts its public key, signs the
//!   returned nonce with its identity key and receives a bearer token.
//! - Bearer token validation with a fixed TTL.
//! - Group-auth verification (key + time-boxed HMAC signature) for a single
//!   configured group.
//! - `GET /whoami` reporting which principal a request authenticated as.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde_json::json;
use tracing::{debug, info};

use crate::identity::{verify_group_auth, Clock, GroupAuth, IdentitySignature, PublicKey, SystemClock, AUTHORIZATION_HEADER};
use crate::wire::{ChallengeRequest, ChallengeResponse, Principal, TokenRequest, TokenResponse};

pub const DEFAULT_HTTP_PORT: u16 = 6006;

#[derive(Debug, Clone)]
pub struct IssuerConfig {
    /// Group accepted on `/whoami` via group-auth headers, as (key, secret).
    pub group: Option<(String, String)>,
    pub token_ttl: Duration,
    pub challenge_ttl: Duration,
}

impl Default for IssuerConfig {
    fn default() -> Self { Self { group: None, token_ttl: Duration::hours(1), challenge_ttl: Duration::seconds(30) } }
}

impl IssuerConfig {
    /// Read `THREADGATE_GROUP_KEY`, `THREADGATE_GROUP_SECRET` and
    /// `THREADGATE_TOKEN_TTL_SECS`.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let (Ok(k), Ok(s)) = (std::env::var("THREADGATE_GROUP_KEY"), std::env::var("THREADGATE_GROUP_SECRET")) {
            if !k.trim().is_empty() && !s.trim().is_empty() {
                cfg.group = Some((k.trim().to_string(), s.trim().to_string()));
            }
        }
        let ttl = std::env::var("THREADGATE_TOKEN_TTL_SECS").ok().and_then(|v| v.trim().parse::<i64>().ok());
        if let Some(ttl) = ttl.filter(|s| *s > 0).and_then(Duration::try_seconds) {
            cfg.token_ttl = ttl;
        }
        cfg
    }
}

struct PendingChallenge {
    public_key: PublicKey,
    nonce: Vec<u8>,
    expires_at: DateTime<Utc>,
}

struct IssuedToken {
    public_key: PublicKey,
    expires_at: DateTime<Utc>,
}

struct Issuer {
    cfg: IssuerConfig,
    clock: Arc<dyn Clock>,
    challenges: RwLock<HashMap<String, PendingChallenge>>,
    tokens: RwLock<HashMap<String, IssuedToken>>,
}

/// Shared issuer state injected into all handlers.
#[derive(Clone)]
pub struct IssuerState {
    inner: Arc<Issuer>,
}

impl IssuerState {
    pub fn new(cfg: IssuerConfig) -> Self { Self::with_clock(cfg, Arc::new(SystemClock)) }

    pub fn with_clock(cfg: IssuerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Issuer {
                cfg,
                clock,
                challenges: RwLock::new(HashMap::new()),
                tokens: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Public key a live token was issued to.
    pub fn token_owner(&self, token: &str) -> Option<PublicKey> {
        let now = self.inner.clock.now();
        let map = self.inner.tokens.read();
        map.get(token).filter(|t| t.expires_at > now).map(|t| t.public_key)
    }

    pub fn live_tokens(&self) -> usize {
        let now = self.inner.clock.now();
        self.inner.tokens.read().values().filter(|t| t.expires_at > now).count()
    }
}

fn gen_id(len: usize) -> Result<String, getrandom::Error> {
    let mut buf = vec![0u8; len];
    getrandom::getrandom(&mut buf)?;
    Ok(URL_SAFE_NO_PAD.encode(buf))
}

type Reply = (StatusCode, Json<serde_json::Value>);

fn unauthorized(msg: &str) -> Reply {
    (StatusCode::UNAUTHORIZED, Json(json!({"status": "unauthorized", "error": msg})))
}

fn bad_request(msg: &str) -> Reply {
    (StatusCode::BAD_REQUEST, Json(json!({"status": "bad_request", "error": msg})))
}

fn internal(msg: &str) -> Reply {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"status": "error", "error": msg})))
}

async fn issue_challenge(State(state): State<IssuerState>, Json(req): Json<ChallengeRequest>) -> Reply {
    let Ok(public_key) = req.public_key.parse::<PublicKey>() else {
        return bad_request("invalid public key");
    };
    let (challenge_id, nonce) = match (gen_id(16), gen_id(32)) {
        (Ok(id), Ok(n)) => (id, n),
        _ => return internal("entropy unavailable"),
    };
    let Ok(nonce_bytes) = URL_SAFE_NO_PAD.decode(&nonce) else {
        return internal("nonce encoding");
    };
    let now = state.inner.clock.now();
    let Some(expires_at) = now.checked_add_signed(state.inner.cfg.challenge_ttl) else {
        return internal("challenge ttl out of range");
    };
    {
        let mut map = state.inner.challenges.write();
        map.retain(|_, c| c.expires_at > now);
        map.insert(challenge_id.clone(), PendingChallenge { public_key, nonce: nonce_bytes, expires_at });
    }
    debug!(target: "threadgate::server", %public_key, "challenge issued");
    let body = ChallengeResponse { challenge_id, nonce };
    (StatusCode::OK, Json(json!(body)))
}

async fn issue_token(State(state): State<IssuerState>, Json(req): Json<TokenRequest>) -> Reply {
    // challenges are single use whatever the outcome
    let Some(pending) = state.inner.challenges.write().remove(&req.challenge_id) else {
        return unauthorized("unknown challenge");
    };
    let now = state.inner.clock.now();
    if pending.expires_at <= now {
        return unauthorized("challenge expired");
    }
    match req.public_key.parse::<PublicKey>() {
        Ok(pk) if pk == pending.public_key => {}
        _ => return unauthorized("public key does not match challenge"),
    }
    let Ok(sig) = req.signature.parse::<IdentitySignature>() else {
        return unauthorized("malformed proof");
    };
    if !pending.public_key.verify(&pending.nonce, &sig) {
        return unauthorized("invalid proof");
    }
    let Ok(token) = gen_id(32) else {
        return internal("entropy unavailable");
    };
    let ttl = state.inner.cfg.token_ttl;
    let Some(expires_at) = now.checked_add_signed(ttl) else {
        return internal("token ttl out of range");
    };
    {
        let mut map = state.inner.tokens.write();
        map.retain(|_, t| t.expires_at > now);
        map.insert(token.clone(), IssuedToken { public_key: pending.public_key, expires_at });
    }
    info!(target: "threadgate::server", public_key = %pending.public_key, ttl_secs = ttl.num_seconds(), "token issued");
    let body = TokenResponse { token, expires_in_secs: Some(ttl.num_seconds().max(0) as u64) };
    (StatusCode::OK, Json(json!(body)))
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    let v = headers.get(AUTHORIZATION_HEADER)?.to_str().ok()?;
    let (scheme, token) = v.split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") { Some(token.trim()) } else { None }
}

async fn whoami(State(state): State<IssuerState>, headers: HeaderMap) -> Reply {
    if let Some(token) = bearer(&headers) {
        return match state.token_owner(token) {
            Some(pk) => (StatusCode::OK, Json(json!(Principal::Identity { public_key: pk.to_string() }))),
            None => unauthorized("unknown or expired token"),
        };
    }
    let Some((group_key, group_secret)) = state.inner.cfg.group.as_ref() else {
        return unauthorized("missing credentials");
    };
    let auth = match GroupAuth::from_metadata(&headers) {
        Ok(a) => a,
        Err(e) => return unauthorized(&e.to_string()),
    };
    if &auth.key != group_key {
        return unauthorized("unknown group key");
    }
    match verify_group_auth(&auth, group_secret, state.inner.clock.now()) {
        Ok(()) => (StatusCode::OK, Json(json!(Principal::Group { key: auth.key }))),
        Err(e) => unauthorized(&e.to_string()),
    }
}

pub fn router(state: IssuerState) -> Router {
    Router::new()
        .route("/", get(|| async { "threadgate ok" }))
        .route("/token/challenge", post(issue_challenge))
        .route("/token", post(issue_token))
        .route("/whoami", get(whoami))
        .with_state(state)
}

/// Serve the issuer on an already-bound listener.
pub async fn serve(listener: tokio::net::TcpListener, state: IssuerState) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    info!(target: "threadgate::server", "token issuer listening on {}", addr);
    axum::serve(listener, router(state)).await.context("token issuer stopped")?;
    Ok(())
}

pub async fn run(http_port: u16, cfg: IssuerConfig) -> anyhow::Result<()> {
    info!(
        target: "threadgate::server",
        group_auth = cfg.group.is_some(),
        token_ttl_secs = cfg.token_ttl.num_seconds(),
        "starting token issuer"
    );
    let addr: SocketAddr = format!("0.0.0.0:{}", http_port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.with_context(|| format!("bind {}", addr))?;
    serve(listener, IssuerState::new(cfg)).await
}
