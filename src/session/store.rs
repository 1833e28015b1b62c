//! Encrypted-at-rest persistence for source sessions.
//!
//! Session cookies are as good as a password, so payloads are sealed with
//! XChaCha20-Poly1305 under a key derived from the configured secret before
//! they reach the `source_sessions` table. Layout: magic, 24-byte nonce,
//! ciphertext.

use std::fmt;
use std::sync::Arc;

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use super::SourceSession;
use crate::clock::{Clock, unix_secs};
use crate::db::Database;

const MAGIC: &[u8; 4] = b"SSS1";
const NONCE_LEN: usize = 24;
const KEY_LEN: usize = 32;

/// Errors for persisted session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionStoreError {
    /// Database access failed.
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    /// Serialization/deserialization failed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Stored encrypted payload is malformed.
    #[error("persisted session payload is invalid")]
    InvalidPayload,
    /// Encryption failed.
    #[error("failed to encrypt session")]
    EncryptionFailed,
    /// Decryption failed (wrong secret or tampered payload).
    #[error("failed to decrypt persisted session\n  Suggestion: the session secret may have changed; the session will be recreated on next login")]
    DecryptionFailed,
}

/// Persists [`SourceSession`]s in the database, encrypted.
#[derive(Clone)]
pub struct SessionStore {
    db: Database,
    key: [u8; KEY_LEN],
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore").finish_non_exhaustive()
    }
}

impl SessionStore {
    /// Creates a store sealing payloads under `secret`.
    #[must_use]
    pub fn new(db: Database, secret: &str, clock: Arc<dyn Clock>) -> Self {
        Self {
            db,
            key: derive_key_bytes(secret),
            clock,
        }
    }

    /// Saves (or replaces) a source's session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionStoreError`] when encoding, encryption or the write fails.
    #[instrument(skip(self, session), fields(source = %session.source_id))]
    pub async fn save(&self, session: &SourceSession) -> Result<(), SessionStoreError> {
        let plaintext = serde_json::to_vec(session)?;
        let payload = encrypt_bytes(&plaintext, &self.key)?;
        sqlx::query(
            "INSERT INTO source_sessions (source_id, payload, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(source_id) DO UPDATE SET payload = excluded.payload, updated_at = excluded.updated_at",
        )
        .bind(&session.source_id)
        .bind(payload)
        .bind(unix_secs(self.clock.now()))
        .execute(self.db.pool())
        .await?;
        debug!("session persisted");
        Ok(())
    }

    /// Loads a source's session, if one was saved.
    ///
    /// # Errors
    ///
    /// Returns [`SessionStoreError`] when the read, decryption or decoding fails.
    #[instrument(skip(self))]
    pub async fn load(&self, source_id: &str) -> Result<Option<SourceSession>, SessionStoreError> {
        let row: Option<(Vec<u8>,)> =
            sqlx::query_as("SELECT payload FROM source_sessions WHERE source_id = ?")
                .bind(source_id)
                .fetch_optional(self.db.pool())
                .await?;
        let Some((payload,)) = row else {
            return Ok(None);
        };
        let plaintext = decrypt_bytes(&payload, &self.key)?;
        Ok(Some(serde_json::from_slice(&plaintext)?))
    }

    /// Deletes a source's session. Returns true when a row existed.
    ///
    /// # Errors
    ///
    /// Returns [`SessionStoreError::Database`] if the delete fails.
    #[instrument(skip(self))]
    pub async fn delete(&self, source_id: &str) -> Result<bool, SessionStoreError> {
        let result = sqlx::query("DELETE FROM source_sessions WHERE source_id = ?")
            .bind(source_id)
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn derive_key_bytes(key_material: &str) -> [u8; KEY_LEN] {
    let digest = Sha256::digest(key_material.as_bytes());
    let mut key = [0_u8; KEY_LEN];
    key.copy_from_slice(&digest[..KEY_LEN]);
    key
}

fn encrypt_bytes(plaintext: &[u8], key: &[u8; KEY_LEN]) -> Result<Vec<u8>, SessionStoreError> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));

    let mut nonce = [0_u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    let nonce_ref = XNonce::from_slice(&nonce);

    let ciphertext = cipher
        .encrypt(nonce_ref, plaintext)
        .map_err(|_| SessionStoreError::EncryptionFailed)?;

    let mut output = Vec::with_capacity(MAGIC.len() + NONCE_LEN + ciphertext.len());
    output.extend_from_slice(MAGIC);
    output.extend_from_slice(&nonce);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

fn decrypt_bytes(payload: &[u8], key: &[u8; KEY_LEN]) -> Result<Vec<u8>, SessionStoreError> {
    if payload.len() < MAGIC.len() + NONCE_LEN || &payload[..MAGIC.len()] != MAGIC {
        return Err(SessionStoreError::InvalidPayload);
    }

    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    let nonce_start = MAGIC.len();
    let nonce_end = nonce_start + NONCE_LEN;
    let nonce = XNonce::from_slice(&payload[nonce_start..nonce_end]);
    let ciphertext = &payload[nonce_end..];

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| SessionStoreError::DecryptionFailed)
}
