//! Cryptographic operations: secret generation, secret encryption at rest,
//! and payload signing.
//!
//! Subscription secrets are stored AES-256-GCM encrypted. Payload
//! signatures are HMAC-SHA256 over `{timestamp}.{canonical_body}` so the
//! timestamp header is bound into the signature and replayed bodies fail
//! verification.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

use crate::error::WebhookError;

type HmacSha256 = Hmac<Sha256>;

/// AES-GCM nonce size (96 bits).
const NONCE_SIZE: usize = 12;

/// Prefix for generated webhook secrets.
const SECRET_PREFIX: &str = "whsec_";

// ---------------------------------------------------------------------------
// Secret generation
// ---------------------------------------------------------------------------

/// Generate a fresh webhook secret: `whsec_` plus 32 random bytes hex.
#[must_use]
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    format!("{SECRET_PREFIX}{}", hex::encode(bytes))
}

// ---------------------------------------------------------------------------
// AES-256-GCM encryption of secrets at rest
// ---------------------------------------------------------------------------

/// Encrypt a plaintext secret for storage.
///
/// Output format: base64(nonce || ciphertext || tag).
///
/// # Errors
///
/// Returns `WebhookError::EncryptionFailed` on an invalid key length or a
/// cipher failure.
pub fn encrypt_secret(plaintext: &str, key: &[u8]) -> Result<String, WebhookError> {
    let cipher = cipher_for(key)?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| WebhookError::EncryptionFailed(e.to_string()))?;

    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);

    Ok(BASE64.encode(&out))
}

/// Decrypt a stored secret back to plaintext.
///
/// # Errors
///
/// Returns `WebhookError::EncryptionFailed` if the input is malformed or
/// was encrypted under a different key.
pub fn decrypt_secret(encoded: &str, key: &[u8]) -> Result<String, WebhookError> {
    let cipher = cipher_for(key)?;

    let blob = BASE64
        .decode(encoded)
        .map_err(|e| WebhookError::EncryptionFailed(format!("base64 decode failed: {e}")))?;

    if blob.len() <= NONCE_SIZE {
        return Err(WebhookError::EncryptionFailed(
            "ciphertext too short".to_string(),
        ));
    }

    let nonce = Nonce::from_slice(&blob[..NONCE_SIZE]);
    let plaintext = cipher
        .decrypt(nonce, &blob[NONCE_SIZE..])
        .map_err(|e| WebhookError::EncryptionFailed(e.to_string()))?;

    String::from_utf8(plaintext).map_err(|e| WebhookError::EncryptionFailed(e.to_string()))
}

fn cipher_for(key: &[u8]) -> Result<Aes256Gcm, WebhookError> {
    if key.len() != 32 {
        return Err(WebhookError::EncryptionFailed(format!(
            "invalid key length: expected 32 bytes, got {}",
            key.len()
        )));
    }
    Aes256Gcm::new_from_slice(key).map_err(|e| WebhookError::EncryptionFailed(e.to_string()))
}

// ---------------------------------------------------------------------------
// HMAC-SHA256 payload signing
// ---------------------------------------------------------------------------

/// Sign `{timestamp}.{body}` with HMAC-SHA256, returning the hex digest.
///
/// # Errors
///
/// Returns `WebhookError::MissingSecret` for an empty secret. An active
/// subscription always has a secret, so callers treat this as an
/// internal-consistency fault.
pub fn sign_payload(secret: &str, timestamp: &str, body: &[u8]) -> Result<String, WebhookError> {
    if secret.is_empty() {
        return Err(WebhookError::MissingSecret);
    }

    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .map_err(|e| WebhookError::Internal(format!("HMAC init failed: {e}")))?;

    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);

    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Reference verifier: recompute the signature and compare in constant
/// time. Endpoint implementors mirror this.
#[must_use]
pub fn verify_signature(expected_hex: &str, secret: &str, timestamp: &str, body: &[u8]) -> bool {
    match sign_payload(secret, timestamp, body) {
        Ok(computed) => constant_time_eq(expected_hex.as_bytes(), computed.as_bytes()),
        Err(_) => false,
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    a.ct_eq(b).into()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
