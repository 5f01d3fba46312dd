// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Secret-field encryption for yourmoment-core.
//!
//! Upstream passwords and LLM API keys are stored only as authenticated
//! ciphertext. The cipher is initialized once at startup from
//! `YOURMOMENT_ENCRYPTION_KEY` (a base64-encoded 32-byte key) and applied at
//! the data-mapper boundary; plaintext exists only in the in-memory
//! snapshots a worker holds for a single invocation.
//!
//! Token envelope: `enc:v1:<nonce_b64>:<ciphertext_b64>` with URL-safe
//! unpadded base64.

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use chacha20poly1305::aead::Aead;
use chacha20poly1305::{ChaCha20Poly1305, KeyInit, Nonce};
use thiserror::Error;
use uuid::Uuid;

const ENVELOPE_PREFIX: &str = "enc:v1:";

/// Errors from field encryption and decryption.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CryptoError {
    /// The configured key is not a 32-byte base64 value.
    #[error("Encryption key must be a base64-encoded 32-byte value")]
    InvalidKey,

    /// Encryption failed.
    #[error("Failed to encrypt field: {0}")]
    Encrypt(String),

    /// The stored token does not match the expected envelope.
    #[error("Invalid secret envelope")]
    InvalidEnvelope,

    /// Decryption failed (wrong key or corrupted data).
    #[error("Failed to decrypt field: {0}")]
    Decrypt(String),
}

/// Symmetric cipher for secret columns.
///
/// Cheap to clone; holds only the key material.
#[derive(Clone)]
pub struct FieldCipher {
    key: [u8; 32],
}

impl std::fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material is never printed.
        f.debug_struct("FieldCipher").finish_non_exhaustive()
    }
}

impl FieldCipher {
    /// Create a cipher from a base64-encoded 32-byte key.
    ///
    /// Accepts both URL-safe and standard base64 alphabets.
    pub fn from_base64_key(encoded: &str) -> Result<Self, CryptoError> {
        let trimmed = encoded.trim();
        let decoded = URL_SAFE_NO_PAD
            .decode(trimmed.as_bytes())
            .or_else(|_| STANDARD.decode(trimmed.as_bytes()))
            .map_err(|_| CryptoError::InvalidKey)?;

        if decoded.len() != 32 {
            return Err(CryptoError::InvalidKey);
        }

        let mut key = [0u8; 32];
        key.copy_from_slice(&decoded);
        Ok(Self { key })
    }

    /// Encrypt a plaintext field into an envelope token.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let nonce_source = Uuid::new_v4().as_bytes().to_owned();
        let nonce = Nonce::from_slice(&nonce_source[..12]);

        let aead = ChaCha20Poly1305::new_from_slice(&self.key)
            .map_err(|e| CryptoError::Encrypt(e.to_string()))?;
        let ciphertext = aead
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| CryptoError::Encrypt(e.to_string()))?;

        let nonce_b64 = URL_SAFE_NO_PAD.encode(&nonce_source[..12]);
        let ciphertext_b64 = URL_SAFE_NO_PAD.encode(ciphertext);
        Ok(format!("{ENVELOPE_PREFIX}{nonce_b64}:{ciphertext_b64}"))
    }

    /// Decrypt an envelope token back to plaintext.
    pub fn decrypt(&self, token: &str) -> Result<String, CryptoError> {
        let body = token
            .strip_prefix(ENVELOPE_PREFIX)
            .ok_or(CryptoError::InvalidEnvelope)?;

        let mut parts = body.split(':');
        let nonce_b64 = parts.next().ok_or(CryptoError::InvalidEnvelope)?;
        let ciphertext_b64 = parts.next().ok_or(CryptoError::InvalidEnvelope)?;
        if parts.next().is_some() {
            return Err(CryptoError::InvalidEnvelope);
        }

        let nonce_raw = URL_SAFE_NO_PAD
            .decode(nonce_b64.as_bytes())
            .map_err(|_| CryptoError::InvalidEnvelope)?;
        if nonce_raw.len() != 12 {
            return Err(CryptoError::InvalidEnvelope);
        }
        let ciphertext = URL_SAFE_NO_PAD
            .decode(ciphertext_b64.as_bytes())
            .map_err(|_| CryptoError::InvalidEnvelope)?;

        let nonce = Nonce::from_slice(&nonce_raw);
        let aead = ChaCha20Poly1305::new_from_slice(&self.key)
            .map_err(|e| CryptoError::Decrypt(e.to_string()))?;
        let plaintext = aead
            .decrypt(nonce, ciphertext.as_ref())
            .map_err(|e| CryptoError::Decrypt(e.to_string()))?;

        String::from_utf8(plaintext).map_err(|e| CryptoError::Decrypt(e.to_string()))
    }

    /// Check whether a stored value carries the encryption envelope.
    pub fn is_encrypted(value: &str) -> bool {
        value.starts_with(ENVELOPE_PREFIX)
    }
}
