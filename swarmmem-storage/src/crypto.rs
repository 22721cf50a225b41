//! Encryption key manager: generates, wraps, rotates, and resolves
//! data-encryption keys, and performs AEAD encrypt/decrypt of entry
//! payloads under them.
//!
//! Key material is never persisted in the clear. A process-level master
//! key, derived from an operator-supplied secret via Argon2, wraps every
//! generated data-encryption key (DEK) before it touches the store; only
//! the wrapped bytes are ever written. Unwrapped DEKs are held only in
//! memory, behind `ZeroizeOnDrop`, for as long as a caller needs them.

use std::sync::Arc;

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use argon2::Argon2;
use chrono::Utc;
use rand::{rngs::OsRng, RngCore};
use swarmmem_core::{
    AgentId, AuditRecord, CryptoError, EncryptionKey, EntityIdType, KeyId, KeyStatus,
    RotationCause, SwarmMemError, SwarmMemResult,
};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::StorageTrait;

const DEK_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const ALGORITHM: &str = "aes-256-gcm";

/// Salt for the master-key KDF. The master secret is an operator-supplied
/// high-entropy value (not a user password), so a fixed, public salt is
/// sufficient to separate this derivation from any other use of the same
/// secret; it is not protecting against dictionary attacks on the input.
const MASTER_KEY_SALT: &[u8] = b"swarmmem-master-key-kdf-salt-v1\0";

/// A 256-bit data-encryption key, held unwrapped only as long as a caller
/// needs it and wiped on drop.
#[derive(ZeroizeOnDrop)]
struct UnwrappedKey {
    bytes: [u8; DEK_LEN],
}

impl UnwrappedKey {
    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new_from_slice(&self.bytes).expect("DEK is always 32 bytes")
    }
}

/// The process master key, derived once at startup and zeroized on drop.
#[derive(ZeroizeOnDrop)]
struct MasterKey {
    bytes: [u8; DEK_LEN],
}

impl MasterKey {
    fn derive(secret: &[u8]) -> SwarmMemResult<Self> {
        let mut bytes = [0u8; DEK_LEN];
        Argon2::default()
            .hash_password_into(secret, MASTER_KEY_SALT, &mut bytes)
            .map_err(|e| {
                SwarmMemError::Crypto(CryptoError::KeyWrapFailed {
                    reason: format!("master key derivation: {e}"),
                })
            })?;
        Ok(Self { bytes })
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new_from_slice(&self.bytes).expect("master key is always 32 bytes")
    }
}

/// Result of encrypting an entry payload: the generation used, the
/// AEAD nonce, the ciphertext (tag stripped), and the tag, which the
/// caller stores in a separate column.
#[derive(Debug, Clone)]
pub struct EncryptedPayload {
    pub key_id: KeyId,
    pub iv: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_LEN],
}

/// Generates, wraps, rotates, and resolves data-encryption keys.
///
/// At most one key is ever `Active`. `Retired` keys still decrypt so
/// that entries encrypted under them remain readable; `Compromised`
/// keys decrypt only to let a forced re-encryption sweep move their
/// entries onto the active key.
pub struct KeyManager {
    storage: Arc<dyn StorageTrait>,
    master_key: MasterKey,
    active: RwLock<Option<(EncryptionKey, Arc<UnwrappedKey>)>>,
}

impl KeyManager {
    /// Build a key manager. `master_secret` is an operator-supplied
    /// process secret (e.g. from an environment variable or a secrets
    /// manager); it never touches the store.
    pub fn new(master_secret: &[u8], storage: Arc<dyn StorageTrait>) -> SwarmMemResult<Self> {
        Ok(Self {
            storage,
            master_key: MasterKey::derive(master_secret)?,
            active: RwLock::new(None),
        })
    }

    /// Ensure an active key exists, generating the first generation if
    /// the store has none yet. Idempotent.
    pub async fn bootstrap(&self) -> SwarmMemResult<KeyId> {
        if let Some(existing) = self.storage.key_get_active().await? {
            let unwrapped = self.unwrap_key(&existing)?;
            let key_id = existing.key_id;
            *self.active.write().await = Some((existing, Arc::new(unwrapped)));
            return Ok(key_id);
        }
        self.generate_and_activate(1).await
    }

    fn unwrap_key(&self, key: &EncryptionKey) -> SwarmMemResult<UnwrappedKey> {
        if key.key_material_wrapped.len() < NONCE_LEN + DEK_LEN + TAG_LEN {
            return Err(CryptoError::KeyWrapFailed {
                reason: "wrapped key material too short".to_string(),
            }
            .into());
        }
        let (nonce_bytes, ciphertext) = key.key_material_wrapped.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self
            .master_key
            .cipher()
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::KeyWrapFailed {
                reason: "master key unwrap failed".to_string(),
            })?;
        let mut bytes = [0u8; DEK_LEN];
        bytes.copy_from_slice(&plaintext);
        Ok(UnwrappedKey { bytes })
    }

    fn wrap_key(&self, dek: &[u8; DEK_LEN]) -> SwarmMemResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .master_key
            .cipher()
            .encrypt(nonce, dek.as_slice())
            .map_err(|_| CryptoError::KeyWrapFailed {
                reason: "master key wrap failed".to_string(),
            })?;
        let mut wrapped = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        wrapped.extend_from_slice(&nonce_bytes);
        wrapped.extend_from_slice(&ciphertext);
        Ok(wrapped)
    }

    async fn generate_and_activate(&self, generation: u64) -> SwarmMemResult<KeyId> {
        let mut dek = [0u8; DEK_LEN];
        OsRng.fill_bytes(&mut dek);
        let wrapped = self.wrap_key(&dek);
        let unwrapped = UnwrappedKey { bytes: dek };
        dek.zeroize();
        let wrapped = wrapped?;

        let now = Utc::now();
        let key = EncryptionKey {
            key_id: KeyId::now_v7(),
            generation,
            key_material_wrapped: wrapped,
            algorithm: ALGORITHM.to_string(),
            created_at: now,
            activated_at: Some(now),
            retired_at: None,
            status: KeyStatus::Active,
        };
        self.storage.key_insert(key.clone()).await?;
        let key_id = key.key_id;
        *self.active.write().await = Some((key, Arc::new(unwrapped)));
        info!(key_id = %key_id, generation, "encryption key activated");
        Ok(key_id)
    }

    /// Return the currently active key's id.
    pub async fn active_key_id(&self) -> SwarmMemResult<KeyId> {
        let guard = self.active.read().await;
        guard
            .as_ref()
            .map(|(key, _)| key.key_id)
            .ok_or_else(|| CryptoError::NoActiveKey.into())
    }

    async fn load_unwrapped(&self, key_id: KeyId) -> SwarmMemResult<Arc<UnwrappedKey>> {
        if let Some((key, unwrapped)) = self.active.read().await.as_ref() {
            if key.key_id == key_id {
                return Ok(unwrapped.clone());
            }
        }
        let key = self
            .storage
            .key_get(key_id)
            .await?
            .ok_or(CryptoError::KeyNotFound { key_id })?;
        if key.status == KeyStatus::Active {
            return Err(CryptoError::KeyWrapFailed {
                reason: "active key missing from in-memory cache".to_string(),
            }
            .into());
        }
        Ok(Arc::new(self.unwrap_key(&key)?))
    }

    /// Encrypt `plaintext` under the currently active key.
    pub async fn encrypt(&self, plaintext: &[u8]) -> SwarmMemResult<EncryptedPayload> {
        let (key_id, unwrapped) = {
            let guard = self.active.read().await;
            let (key, unwrapped) = guard.as_ref().ok_or(CryptoError::NoActiveKey)?;
            (key.key_id, unwrapped.clone())
        };
        let mut iv = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut iv);
        let nonce = Nonce::from_slice(&iv);
        let sealed = unwrapped
            .cipher()
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad: key_id.as_uuid().as_bytes(),
                },
            )
            .map_err(|e| CryptoError::EncryptFailed {
                reason: e.to_string(),
            })?;
        let (ciphertext, tag_slice) = sealed.split_at(sealed.len() - TAG_LEN);
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(tag_slice);
        Ok(EncryptedPayload {
            key_id,
            iv,
            ciphertext: ciphertext.to_vec(),
            tag,
        })
    }

    /// Decrypt a payload bound to `key_id`. Succeeds for active, retired,
    /// and compromised generations; fails only if the key is unknown.
    pub async fn decrypt(
        &self,
        key_id: KeyId,
        iv: &[u8; NONCE_LEN],
        ciphertext: &[u8],
        tag: &[u8; TAG_LEN],
    ) -> SwarmMemResult<Vec<u8>> {
        let unwrapped = self.load_unwrapped(key_id).await?;
        let nonce = Nonce::from_slice(iv);
        let mut sealed = Vec::with_capacity(ciphertext.len() + TAG_LEN);
        sealed.extend_from_slice(ciphertext);
        sealed.extend_from_slice(tag);
        unwrapped
            .cipher()
            .decrypt(
                nonce,
                Payload {
                    msg: &sealed,
                    aad: key_id.as_uuid().as_bytes(),
                },
            )
            .map_err(|_| {
                CryptoError::DecryptFailed {
                    reason: "AEAD tag verification failed".to_string(),
                }
                .into()
            })
    }

    /// Re-encrypt a payload currently bound to `old_key_id` under the
    /// active key. Used by the lazy-rebind-on-write path and by the
    /// forced re-encryption sweep after a compromise.
    pub async fn reencrypt(
        &self,
        old_key_id: KeyId,
        iv: &[u8; NONCE_LEN],
        ciphertext: &[u8],
        tag: &[u8; TAG_LEN],
    ) -> SwarmMemResult<EncryptedPayload> {
        let plaintext = self.decrypt(old_key_id, iv, ciphertext, tag).await?;
        self.encrypt(&plaintext).await
    }

    /// Generate a fresh key generation, make it active, and retire (or,
    /// for a compromise-triggered rotation, mark compromised) whatever
    /// key was previously active. Appends an audit record.
    pub async fn rotate(&self, cause: RotationCause, actor: swarmmem_core::AgentId) -> SwarmMemResult<KeyId> {
        let previous = self.active.read().await.as_ref().map(|(k, _)| k.clone());
        let next_generation = previous.as_ref().map(|k| k.generation + 1).unwrap_or(1);

        let new_key_id = self.generate_and_activate(next_generation).await?;

        if let Some(prev) = previous {
            let new_status = match cause {
                RotationCause::Compromise => KeyStatus::Compromised,
                RotationCause::Scheduled | RotationCause::Manual => KeyStatus::Retired,
            };
            self.storage
                .key_set_status(prev.key_id, new_status)
                .await?;
            warn!(
                old_key_id = %prev.key_id,
                new_key_id = %new_key_id,
                cause = %cause,
                new_status = %new_status,
                "encryption key rotated"
            );
        }

        self.storage
            .audit_append(AuditRecord {
                audit_id: swarmmem_core::AuditId::now_v7(),
                actor_id: actor,
                resource: format!("key:{new_key_id}"),
                action: "rotate".to_string(),
                previous_excerpt: None,
                next_excerpt: None,
                acl_level: swarmmem_core::ACLLevel::System,
                risk_tag: format!("rotation_cause={cause}"),
                timestamp: Utc::now(),
            })
            .await?;

        Ok(new_key_id)
    }

    /// Mark a key (typically already `Retired`) as `Compromised` without
    /// generating a new active key. Used when a retired key's material
    /// is discovered leaked after rotation already moved on.
    pub async fn mark_compromised(&self, key_id: KeyId) -> SwarmMemResult<()> {
        self.storage
            .key_set_status(key_id, KeyStatus::Compromised)
            .await?;
        debug!(key_id = %key_id, "encryption key marked compromised");
        Ok(())
    }

    /// List every key generation known to the store.
    pub async fn list_keys(&self) -> SwarmMemResult<Vec<EncryptionKey>> {
        self.storage.key_list().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockStorage;

    fn manager() -> KeyManager {
        let storage: Arc<dyn StorageTrait> = Arc::new(MockStorage::new());
        KeyManager::new(b"test-master-secret-do-not-use-in-prod", storage).unwrap()
    }

    #[tokio::test]
    async fn test_bootstrap_generates_active_key() {
        let km = manager();
        let key_id = km.bootstrap().await.unwrap();
        assert_eq!(km.active_key_id().await.unwrap(), key_id);
        let keys = km.list_keys().await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].status, KeyStatus::Active);
        assert_eq!(keys[0].generation, 1);
    }

    #[tokio::test]
    async fn test_bootstrap_idempotent() {
        let km = manager();
        let k1 = km.bootstrap().await.unwrap();
        let k2 = km.bootstrap().await.unwrap();
        assert_eq!(k1, k2);
        assert_eq!(km.list_keys().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_encrypt_decrypt_roundtrip() {
        let km = manager();
        km.bootstrap().await.unwrap();
        let plaintext = b"top secret swarm memory payload";
        let sealed = km.encrypt(plaintext).await.unwrap();
        let recovered = km
            .decrypt(sealed.key_id, &sealed.iv, &sealed.ciphertext, &sealed.tag)
            .await
            .unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[tokio::test]
    async fn test_decrypt_wrong_tag_fails() {
        let km = manager();
        km.bootstrap().await.unwrap();
        let sealed = km.encrypt(b"hello").await.unwrap();
        let mut bad_tag = sealed.tag;
        bad_tag[0] ^= 0xFF;
        let result = km
            .decrypt(sealed.key_id, &sealed.iv, &sealed.ciphertext, &bad_tag)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_rotation_preserves_old_key_readability() {
        let km = manager();
        km.bootstrap().await.unwrap();
        let sealed_before = km.encrypt(b"pre-rotation payload").await.unwrap();
        let old_key_id = sealed_before.key_id;

        let actor = AgentId::now_v7();
        let new_key_id = km.rotate(RotationCause::Scheduled, actor).await.unwrap();
        assert_ne!(new_key_id, old_key_id);
        assert_eq!(km.active_key_id().await.unwrap(), new_key_id);

        let recovered = km
            .decrypt(
                old_key_id,
                &sealed_before.iv,
                &sealed_before.ciphertext,
                &sealed_before.tag,
            )
            .await
            .unwrap();
        assert_eq!(recovered, b"pre-rotation payload");

        let keys = km.list_keys().await.unwrap();
        let old = keys.iter().find(|k| k.key_id == old_key_id).unwrap();
        assert_eq!(old.status, KeyStatus::Retired);
    }

    #[tokio::test]
    async fn test_compromise_rotation_marks_old_key_compromised() {
        let km = manager();
        km.bootstrap().await.unwrap();
        let actor = AgentId::now_v7();
        let old_key_id = km.active_key_id().await.unwrap();
        km.rotate(RotationCause::Compromise, actor).await.unwrap();
        let keys = km.list_keys().await.unwrap();
        let old = keys.iter().find(|k| k.key_id == old_key_id).unwrap();
        assert_eq!(old.status, KeyStatus::Compromised);
    }

    #[tokio::test]
    async fn test_mark_compromised_standalone() {
        let km = manager();
        km.bootstrap().await.unwrap();
        let old_key_id = km.active_key_id().await.unwrap();
        let actor = AgentId::now_v7();
        km.rotate(RotationCause::Scheduled, actor).await.unwrap();
        km.mark_compromised(old_key_id).await.unwrap();
        let keys = km.list_keys().await.unwrap();
        let old = keys.iter().find(|k| k.key_id == old_key_id).unwrap();
        assert_eq!(old.status, KeyStatus::Compromised);
    }

    #[tokio::test]
    async fn test_reencrypt_moves_payload_to_active_key() {
        let km = manager();
        km.bootstrap().await.unwrap();
        let sealed = km.encrypt(b"payload bound to old key").await.unwrap();
        let old_key_id = sealed.key_id;
        let actor = AgentId::now_v7();
        let new_key_id = km.rotate(RotationCause::Compromise, actor).await.unwrap();

        let rewrapped = km
            .reencrypt(old_key_id, &sealed.iv, &sealed.ciphertext, &sealed.tag)
            .await
            .unwrap();
        assert_eq!(rewrapped.key_id, new_key_id);

        let recovered = km
            .decrypt(
                rewrapped.key_id,
                &rewrapped.iv,
                &rewrapped.ciphertext,
                &rewrapped.tag,
            )
            .await
            .unwrap();
        assert_eq!(recovered, b"payload bound to old key");
    }

    #[tokio::test]
    async fn test_unknown_key_id_fails() {
        let km = manager();
        km.bootstrap().await.unwrap();
        let bogus = KeyId::now_v7();
        let result = km.decrypt(bogus, &[0u8; 12], b"x", &[0u8; 16]).await;
        assert!(matches!(
            result,
            Err(SwarmMemError::Crypto(CryptoError::KeyNotFound { .. }))
        ));
    }
}
