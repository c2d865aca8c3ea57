//! Group auth: a group key plus an HMAC-SHA256 signature over a short validity
//! window, computed with the group's shared secret.
//!
//! The signed message is the window in ISO 8601 interval form,
//! `<start>/<end>`, each end rendered as RFC 3339 with nanoseconds. Verifiers
//! recompute the MAC over that message and accept the request only while their
//! clock is inside the window.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroizing;

use super::clock::Clock;
use super::request_context::{AuthState, RequestContext, API_KEY_HEADER, API_SIG_HEADER, API_SIG_MSG_HEADER};
use crate::error::{SessionError, SessionResult};

type HmacSha256 = Hmac<Sha256>;

/// Length of the signature validity window.
pub const GROUP_AUTH_WINDOW_SECS: i64 = 60;

/// Shortest accepted decoded group secret.
pub const MIN_SECRET_LEN: usize = 16;

pub fn group_auth_window() -> Duration { Duration::seconds(GROUP_AUTH_WINDOW_SECS) }

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupAuth {
    pub key: String,
    pub message: String,
    pub signature: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GroupAuthRejection {
    #[error("missing header {0}")]
    MissingHeader(&'static str),
    #[error("malformed signature message")]
    MalformedMessage,
    #[error("malformed group secret")]
    MalformedSecret,
    #[error("signature mismatch")]
    BadSignature,
    #[error("signature not valid until {0}")]
    NotYetValid(DateTime<Utc>),
    #[error("signature expired at {0}")]
    Expired(DateTime<Utc>),
    #[error("signature window longer than {GROUP_AUTH_WINDOW_SECS}s")]
    WindowTooLong,
}

impl GroupAuth {
    /// Parse group-auth material from request headers.
    pub fn from_metadata(headers: &HeaderMap) -> Result<Self, GroupAuthRejection> {
        fn get<'a>(h: &'a HeaderMap, name: &'static str) -> Result<&'a str, GroupAuthRejection> {
            h.get(name)
                .and_then(|v: &HeaderValue| v.to_str().ok())
                .ok_or(GroupAuthRejection::MissingHeader(name))
        }
        let key = get(headers, API_KEY_HEADER)?.to_string();
        let message = get(headers, API_SIG_MSG_HEADER)?.to_string();
        let signature = get(headers, API_SIG_HEADER)?.to_string();
        let (not_before, not_after) = parse_window(&message).ok_or(GroupAuthRejection::MalformedMessage)?;
        Ok(Self { key, message, signature, not_before, not_after })
    }
}

/// Random group secret in the encoding `with_group_auth` expects.
pub fn generate_group_secret() -> SessionResult<String> {
    let mut raw = Zeroizing::new([0u8; 32]);
    getrandom::getrandom(&mut raw[..]).map_err(|e| SessionError::KeyGenerationFailed(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(&raw[..]))
}

fn decode_secret(secret: &str) -> Option<Zeroizing<Vec<u8>>> {
    let trimmed = secret.trim().trim_end_matches('=');
    if trimmed.is_empty() {
        return None;
    }
    let raw = Zeroizing::new(URL_SAFE_NO_PAD.decode(trimmed).ok()?);
    if raw.len() < MIN_SECRET_LEN {
        return None;
    }
    Some(raw)
}

fn window_message(start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    format!(
        "{}/{}",
        start.to_rfc3339_opts(SecondsFormat::Nanos, true),
        end.to_rfc3339_opts(SecondsFormat::Nanos, true)
    )
}

fn parse_window(message: &str) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let (a, b) = message.split_once('/')?;
    let start = DateTime::parse_from_rfc3339(a).ok()?.with_timezone(&Utc);
    let end = DateTime::parse_from_rfc3339(b).ok()?.with_timezone(&Utc);
    if end < start {
        return None;
    }
    Some((start, end))
}

fn sign_message(secret: &[u8], message: &str) -> Result<String, hmac::digest::InvalidLength> {
    let mut mac = HmacSha256::new_from_slice(secret)?;
    mac.update(message.as_bytes());
    Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
}

/// Sign a window starting at `now` and attach it, with the group key, to a
/// copy of `ctx`. On error `ctx` is untouched and nothing is returned.
pub fn with_group_auth(
    ctx: &RequestContext,
    group_key: &str,
    group_secret: &str,
    now: DateTime<Utc>,
) -> SessionResult<RequestContext> {
    if let AuthState::Tokened(_) = ctx.auth() {
        return Err(SessionError::InvalidTransition { from: ctx.auth().name(), to: "group_authed" });
    }
    if group_key.trim().is_empty() {
        return Err(SessionError::signing("group key is empty"));
    }
    if HeaderValue::from_str(group_key).is_err() {
        return Err(SessionError::signing("group key is not a valid header value"));
    }
    let secret = decode_secret(group_secret)
        .ok_or_else(|| SessionError::signing("group secret is empty or not base64url"))?;

    let not_before = now;
    let not_after = now
        .checked_add_signed(group_auth_window())
        .ok_or_else(|| SessionError::signing("validity window overflows"))?;
    let message = window_message(not_before, not_after);
    let signature = sign_message(&secret, &message).map_err(|e| SessionError::signing(e.to_string()))?;

    tracing::debug!(target: "threadgate::session", group_key, %not_after, "group auth attached");
    let auth = GroupAuth { key: group_key.to_string(), message, signature, not_before, not_after };
    Ok(ctx.with_auth(AuthState::GroupAuthed(auth)))
}

/// [`with_group_auth`] with `now` read from a clock.
pub fn with_group_auth_from(
    ctx: &RequestContext,
    group_key: &str,
    group_secret: &str,
    clock: &dyn Clock,
) -> SessionResult<RequestContext> {
    with_group_auth(ctx, group_key, group_secret, clock.now())
}

/// Check group-auth material against the shared secret at time `at`.
pub fn verify_group_auth(auth: &GroupAuth, group_secret: &str, at: DateTime<Utc>) -> Result<(), GroupAuthRejection> {
    let secret = decode_secret(group_secret).ok_or(GroupAuthRejection::MalformedSecret)?;
    let sig = URL_SAFE_NO_PAD.decode(auth.signature.trim()).map_err(|_| GroupAuthRejection::BadSignature)?;
    let mut mac = HmacSha256::new_from_slice(&secret).map_err(|_| GroupAuthRejection::MalformedSecret)?;
    mac.update(auth.message.as_bytes());
    mac.verify_slice(&sig).map_err(|_| GroupAuthRejection::BadSignature)?;

    // only the signed message is trusted for the window
    let (not_before, not_after) = parse_window(&auth.message).ok_or(GroupAuthRejection::MalformedMessage)?;
    if not_after - not_before > group_auth_window() {
        return Err(GroupAuthRejection::WindowTooLong);
    }
    if at < not_before {
        return Err(GroupAuthRejection::NotYetValid(not_before));
    }
    if at > not_after {
        return Err(GroupAuthRejection::Expired(not_after));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::clock::ManualClock;
    use crate::identity::provider::SessionToken;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> { Utc.with_ymd_and_hms(2024, 3, 9, 10, 30, 0).unwrap() + Duration::nanoseconds(123_456_789) }

    fn secret() -> String { URL_SAFE_NO_PAD.encode(b"0123456789abcdef0123456789abcdef") }

    #[test]
    fn attaches_key_and_window() {
        let ctx = with_group_auth(&RequestContext::new(), "k", &secret(), t0()).unwrap();
        let g = ctx.group_auth().unwrap();
        assert_eq!(g.key, "k");
        assert_eq!(g.not_before, t0());
        assert_eq!(g.not_after, t0() + Duration::seconds(60));
        assert_eq!(ctx.auth().name(), "group_authed");
    }

    #[test]
    fn verifies_inside_window_only() {
        let ctx = with_group_auth(&RequestContext::new(), "k", &secret(), t0()).unwrap();
        let g = ctx.group_auth().unwrap();
        for offset_ms in [0i64, 1, 15_000, 59_999, 60_000] {
            let at = t0() + Duration::milliseconds(offset_ms);
            assert_eq!(verify_group_auth(g, &secret(), at), Ok(()), "offset {offset_ms}ms");
        }
        let late = t0() + Duration::seconds(60) + Duration::nanoseconds(1);
        assert!(matches!(verify_group_auth(g, &secret(), late), Err(GroupAuthRejection::Expired(_))));
        let early = t0() - Duration::nanoseconds(1);
        assert!(matches!(verify_group_auth(g, &secret(), early), Err(GroupAuthRejection::NotYetValid(_))));
    }

    #[test]
    fn wrong_secret_or_tampered_window_fails() {
        let ctx = with_group_auth(&RequestContext::new(), "k", &secret(), t0()).unwrap();
        let g = ctx.group_auth().unwrap().clone();
        let other = URL_SAFE_NO_PAD.encode(b"fedcba9876543210fedcba9876543210");
        assert_eq!(verify_group_auth(&g, &other, t0()), Err(GroupAuthRejection::BadSignature));

        let mut stretched = g.clone();
        stretched.message = window_message(t0(), t0() + Duration::hours(1));
        assert_eq!(
            verify_group_auth(&stretched, &secret(), t0() + Duration::minutes(30)),
            Err(GroupAuthRejection::BadSignature)
        );
    }

    #[test]
    fn malformed_secret_fails_and_leaves_context_alone() {
        let base = RequestContext::new();
        let before = base.metadata();
        for bad in ["", "   ", "not*base64", "c2hvcnQ"] {
            let err = with_group_auth(&base, "k", bad, t0()).unwrap_err();
            assert!(matches!(err, SessionError::SigningFailed(_)), "secret {bad:?}");
        }
        assert!(matches!(with_group_auth(&base, "", &secret(), t0()), Err(SessionError::SigningFailed(_))));
        assert_eq!(base.metadata(), before);
        assert_eq!(base.auth(), &AuthState::Bare);
    }

    #[test]
    fn resigning_replaces_the_window() {
        let clock = ManualClock::new(t0());
        let first = with_group_auth_from(&RequestContext::new(), "k", &secret(), &clock).unwrap();
        clock.advance(Duration::seconds(45));
        let second = with_group_auth_from(&first, "k", &secret(), &clock).unwrap();
        let sigs: Vec<_> = second.metadata().into_iter().filter(|(k, _)| *k == API_SIG_HEADER).collect();
        assert_eq!(sigs.len(), 1);
        assert_eq!(second.group_auth().unwrap().not_before, t0() + Duration::seconds(45));
    }

    #[test]
    fn window_past_the_end_of_time_is_a_signing_error() {
        let base = RequestContext::new();
        let err = with_group_auth(&base, "k", &secret(), DateTime::<Utc>::MAX_UTC).unwrap_err();
        assert!(matches!(err, SessionError::SigningFailed(_)), "{err:?}");
        assert_eq!(base.auth(), &AuthState::Bare);
    }

    #[test]
    fn correctly_signed_long_window_is_refused() {
        let raw = URL_SAFE_NO_PAD.decode(secret()).unwrap();
        let message = window_message(t0(), t0() + Duration::days(1));
        let auth = GroupAuth {
            key: "k".into(),
            signature: sign_message(&raw, &message).unwrap(),
            message,
            not_before: t0(),
            not_after: t0() + Duration::days(1),
        };
        assert_eq!(
            verify_group_auth(&auth, &secret(), t0() + Duration::hours(2)),
            Err(GroupAuthRejection::WindowTooLong)
        );
    }

    #[test]
    fn refuses_tokened_context() {
        let tokened = RequestContext::new().with_auth(AuthState::Tokened(SessionToken::new("t")));
        let err = with_group_auth(&tokened, "k", &secret(), t0()).unwrap_err();
        assert_eq!(err.code(), "invalid_transition");
    }

    #[test]
    fn headers_parse_back() {
        let ctx = with_group_auth(&RequestContext::new(), "group-1", &secret(), t0()).unwrap();
        let parsed = GroupAuth::from_metadata(&ctx.header_map().unwrap()).unwrap();
        assert_eq!(&parsed, ctx.group_auth().unwrap());

        let bare = RequestContext::new().header_map().unwrap();
        assert_eq!(GroupAuth::from_metadata(&bare), Err(GroupAuthRejection::MissingHeader(API_KEY_HEADER)));
    }

    #[test]
    fn generated_secret_is_accepted() {
        let s = generate_group_secret().unwrap();
        let ctx = with_group_auth(&RequestContext::new(), "k", &s, t0()).unwrap();
        assert!(verify_group_auth(ctx.group_auth().unwrap(), &s, t0()).is_ok());
    }
}
