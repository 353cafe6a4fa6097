//! Per-tenant message signing and envelope decryption
//!
//! Callbacks from the platform are authenticated with an HMAC-SHA256
//! signature over the canonical `(timestamp, nonce, extra)` inputs and,
//! for tenants in secure mode, carried inside an AES-256-GCM sealed
//! envelope that embeds the tenant identity. The cipher is consumed as an
//! opaque capability behind the [`MessageCrypter`] trait; any certified
//! implementation of the same contract can be substituted.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Length of the GCM nonce prefix in bytes (96 bits)
const NONCE_LENGTH: usize = 12;
/// Length of the big-endian payload-length prefix in bytes
const LEN_PREFIX: usize = 4;

#[derive(Debug, Error)]
pub enum CrypterError {
    #[error("ciphertext is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("ciphertext blob is too short")]
    Truncated,
    #[error("decryption failed")]
    Cipher,
    #[error("decrypted payload is malformed")]
    Malformed,
}

/// Signing/decryption capability keyed by `(token, encryption_key, tenant_id)`
pub trait MessageCrypter: Send + Sync {
    /// Compute the callback signature over the canonical inputs.
    /// Deterministic: the same inputs always produce the same string.
    fn signature_of(&self, timestamp: &str, nonce: &str, extra: &str) -> String;

    /// Decrypt an envelope blob, returning the payload and the tenant
    /// identity the platform embedded in it. Callers must still compare
    /// the embedded identity against the path identity.
    fn decrypt(&self, blob: &str) -> Result<(Vec<u8>, String), CrypterError>;

    /// Verify a provided signature for the challenge exchange.
    /// This deployment fixes the third canonical input to the empty string.
    fn verify_signature(&self, timestamp: &str, nonce: &str, provided: &str) -> bool {
        let expected = self.signature_of(timestamp, nonce, "");
        if expected.len() != provided.len() {
            return false;
        }
        // Byte-wise fold keeps the comparison time independent of where a
        // mismatch occurs
        expected
            .bytes()
            .zip(provided.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

/// Production crypter for one tenant
pub struct TenantCrypter {
    token: String,
    key: [u8; 32],
    tenant_id: String,
}

impl TenantCrypter {
    pub fn new(token: &str, encryption_key: &str, tenant_id: &str) -> Self {
        // The configured key string is free-form; derive the fixed-size
        // cipher key from it
        let key = Sha256::digest(encryption_key.as_bytes()).into();
        Self {
            token: token.to_string(),
            key,
            tenant_id: tenant_id.to_string(),
        }
    }

    /// Seal a payload into an envelope blob under this tenant's key,
    /// embedding the tenant identity. Counterpart of
    /// [`MessageCrypter::decrypt`]; the plaintext layout is
    /// `len(4, BE) || payload || tenant_id`.
    pub fn encrypt(&self, payload: &[u8]) -> Result<String, CrypterError> {
        let mut plaintext = Vec::with_capacity(LEN_PREFIX + payload.len() + self.tenant_id.len());
        plaintext.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        plaintext.extend_from_slice(payload);
        plaintext.extend_from_slice(self.tenant_id.as_bytes());

        let mut nonce = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce);

        let cipher = Aes256Gcm::new(&self.key.into());
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|_| CrypterError::Cipher)?;

        let mut blob = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(blob))
    }
}

impl MessageCrypter for TenantCrypter {
    fn signature_of(&self, timestamp: &str, nonce: &str, extra: &str) -> String {
        let mut inputs = [timestamp, nonce, extra];
        inputs.sort_unstable();

        // Qualified: KeyInit is also in scope for the envelope cipher
        let mut mac = <HmacSha256 as Mac>::new_from_slice(self.token.as_bytes())
            .expect("HMAC accepts keys of any length");
        for input in inputs {
            mac.update(input.as_bytes());
        }
        hex::encode(mac.finalize().into_bytes())
    }

    fn decrypt(&self, blob: &str) -> Result<(Vec<u8>, String), CrypterError> {
        let raw = BASE64.decode(blob.trim())?;
        if raw.len() <= NONCE_LENGTH {
            return Err(CrypterError::Truncated);
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_LENGTH);

        let cipher = Aes256Gcm::new(&self.key.into());
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CrypterError::Cipher)?;

        if plaintext.len() < LEN_PREFIX {
            return Err(CrypterError::Malformed);
        }
        let payload_len = u32::from_be_bytes(
            plaintext[..LEN_PREFIX]
                .try_into()
                .expect("slice has LEN_PREFIX bytes"),
        ) as usize;
        let payload_end = LEN_PREFIX
            .checked_add(payload_len)
            .ok_or(CrypterError::Malformed)?;
        if payload_end > plaintext.len() {
            return Err(CrypterError::Malformed);
        }

        let payload = plaintext[LEN_PREFIX..payload_end].to_vec();
        let tenant_id = String::from_utf8(plaintext[payload_end..].to_vec())
            .map_err(|_| CrypterError::Malformed)?;
        Ok((payload, tenant_id))
    }
}
