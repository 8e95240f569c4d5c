//! Encoding of tickets at rest.
//!
//! Persistent stores write tickets through a [`TicketCodec`]:
//!
//! - **plain**: `bincode` bytes, ticket id used as-is in the storage key
//! - **encrypted**: `bincode` bytes sealed with AES-256-GCM
//!   (`nonce (12 bytes) ‖ ciphertext`), and the storage key derived from a
//!   SHA-512 digest of the ticket id so ids never appear in the backend
//!
//! ⚠️ The encryption key MUST come from a secrets manager or environment
//! variable, be exactly 32 bytes, and be shared by every node reading the
//! same store.

use crate::error::{Result, TicketError};
use crate::ticket::{Ticket, TicketId};
use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha512};
use std::sync::Arc;

/// AES-GCM nonce length (96 bits).
const NONCE_LEN: usize = 12;

/// AES-256-GCM cipher for ticket payloads.
#[derive(Clone)]
pub struct TicketCipher {
    cipher: Arc<Aes256Gcm>,
}

impl std::fmt::Debug for TicketCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TicketCipher { .. }")
    }
}

impl TicketCipher {
    /// Create a cipher from a 32-byte key.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::Encryption`] if the key is not 32 bytes.
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() != 32 {
            return Err(TicketError::Encryption(format!(
                "Encryption key must be exactly 32 bytes (got {})",
                key.len()
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| TicketError::Encryption(format!("Failed to create cipher: {e}")))?;
        Ok(Self {
            cipher: Arc::new(cipher),
        })
    }

    /// Encrypt `plaintext` under a fresh random nonce.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::Encryption`] if encryption fails.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| TicketError::Encryption(format!("Failed to encrypt ticket: {e}")))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Decrypt bytes produced by [`Self::encrypt`].
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::Encryption`] if the data is truncated, was
    /// tampered with, or was sealed under another key.
    pub fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < NONCE_LEN {
            return Err(TicketError::Encryption(
                "Encrypted ticket is shorter than its nonce".into(),
            ));
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| TicketError::Encryption(format!("Failed to decrypt ticket: {e}")))
    }
}

/// SHA-512 digest of a ticket id, base64url without padding.
#[must_use]
pub fn digest_id(id: &TicketId) -> String {
    URL_SAFE_NO_PAD.encode(Sha512::digest(id.as_str().as_bytes()))
}

/// Serializes tickets for persistent stores, optionally encrypting them.
#[derive(Debug, Clone, Default)]
pub struct TicketCodec {
    cipher: Option<TicketCipher>,
}

impl TicketCodec {
    /// Plain `bincode` encoding.
    #[must_use]
    pub const fn plain() -> Self {
        Self { cipher: None }
    }

    /// Encrypted encoding with digested keys.
    #[must_use]
    pub const fn encrypted(cipher: TicketCipher) -> Self {
        Self {
            cipher: Some(cipher),
        }
    }

    /// Whether payloads are encrypted.
    #[must_use]
    pub const fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    /// Backend key component for `id`.
    #[must_use]
    pub fn storage_id(&self, id: &TicketId) -> String {
        if self.is_encrypted() {
            digest_id(id)
        } else {
            id.to_string()
        }
    }

    /// Serialize (and encrypt) a ticket.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::Serialization`] or [`TicketError::Encryption`].
    pub fn encode(&self, ticket: &Ticket) -> Result<Vec<u8>> {
        let bytes =
            bincode::serialize(ticket).map_err(|e| TicketError::Serialization(e.to_string()))?;
        match &self.cipher {
            Some(cipher) => cipher.encrypt(&bytes),
            None => Ok(bytes),
        }
    }

    /// Decrypt (if needed) and deserialize a ticket.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::Serialization`] or [`TicketError::Encryption`].
    pub fn decode(&self, bytes: &[u8]) -> Result<Ticket> {
        let plain = match &self.cipher {
            Some(cipher) => cipher.decrypt(bytes)?,
            None => bytes.to_vec(),
        };
        bincode::deserialize(&plain).map_err(|e| TicketError::Serialization(e.to_string()))
    }
}
