//! Identity provider: fresh Ed25519 identities used to answer token challenges
//! and prove ownership of remote records.

use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use zeroize::Zeroizing;

use crate::error::{SessionError, SessionResult};

/// An in-memory key pair. The private half never leaves this value and is
/// zeroed when it is dropped.
pub struct Identity {
    signing: SigningKey,
}

impl Identity {
    /// Generate a new identity from the OS entropy source.
    pub fn generate() -> SessionResult<Self> {
        let mut seed = Zeroizing::new([0u8; 32]);
        getrandom::getrandom(&mut seed[..])
            .map_err(|e| SessionError::KeyGenerationFailed(e.to_string()))?;
        let signing = SigningKey::from_bytes(&seed);
        let identity = Self { signing };
        tracing::debug!(target: "threadgate::identity", public_key = %identity.public_key(), "identity generated");
        Ok(identity)
    }

    pub fn public_key(&self) -> PublicKey { PublicKey(self.signing.verifying_key()) }

    pub fn sign(&self, msg: &[u8]) -> IdentitySignature { IdentitySignature(self.signing.sign(msg)) }
}

/// Shorthand for [`Identity::generate`].
pub fn new_identity() -> SessionResult<Identity> { Identity::generate() }

impl Debug for Identity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity").field("public_key", &self.public_key().to_string()).finish_non_exhaustive()
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    pub fn to_bytes(&self) -> [u8; 32] { self.0.to_bytes() }

    /// Strict verification; rejects weak keys and malleable signatures.
    pub fn verify(&self, msg: &[u8], sig: &IdentitySignature) -> bool {
        self.0.verify_strict(msg, &sig.0).is_ok()
    }
}

impl Display for PublicKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&URL_SAFE_NO_PAD.encode(self.0.to_bytes()))
    }
}

impl Debug for PublicKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { write!(f, "PublicKey({})", self) }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid key material: {0}")]
pub struct KeyParseError(String);

impl FromStr for PublicKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = URL_SAFE_NO_PAD.decode(s.trim()).map_err(|e| KeyParseError(e.to_string()))?;
        let bytes: [u8; 32] = raw
            .as_slice()
            .try_into()
            .map_err(|_| KeyParseError(format!("expected 32 bytes, got {}", raw.len())))?;
        VerifyingKey::from_bytes(&bytes).map(PublicKey).map_err(|e| KeyParseError(e.to_string()))
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct IdentitySignature(Signature);

impl IdentitySignature {
    pub fn to_bytes(&self) -> [u8; 64] { self.0.to_bytes() }
}

impl Display for IdentitySignature {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&URL_SAFE_NO_PAD.encode(self.0.to_bytes()))
    }
}

impl Debug for IdentitySignature {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { write!(f, "IdentitySignature({})", self) }
}

impl FromStr for IdentitySignature {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = URL_SAFE_NO_PAD.decode(s.trim()).map_err(|e| KeyParseError(e.to_string()))?;
        let bytes: [u8; 64] = raw
            .as_slice()
            .try_into()
            .map_err(|_| KeyParseError(format!("expected 64 bytes, got {}", raw.len())))?;
        Ok(IdentitySignature(Signature::from_bytes(&bytes)))
    }
}
