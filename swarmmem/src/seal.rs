//! The write/read payload pipeline: compress, then encrypt on the way in;
//! decrypt, then decompress, then verify on the way out.

use swarmmem_core::{
    compute_content_hash, ACLLevel, Compression, ContentHash, EncryptionMode, KeyId, MemoryKind,
    StoreError, SwarmMemError, SwarmMemResult,
};
use swarmmem_storage::compression::{compress, decompress};
use swarmmem_storage::crypto::KeyManager;

/// Everything a `set` needs to fill in on `MemoryEntry`'s encrypted fields.
pub struct SealedPayload {
    pub value_blob: Vec<u8>,
    pub compression: Compression,
    pub encryption: EncryptionMode,
    pub iv: Option<[u8; 12]>,
    pub tag: Option<[u8; 16]>,
    pub key_id: Option<KeyId>,
    pub size_bytes: u64,
    pub checksum: ContentHash,
}

fn compression_error(err: swarmmem_storage::CompressionError) -> SwarmMemError {
    StoreError::Backend {
        reason: err.to_string(),
    }
    .into()
}

/// Compress `plaintext` when it exceeds `threshold_bytes`, then encrypt
/// under the key manager's currently active key. The checksum is taken
/// over the original plaintext so a read can verify integrity without
/// knowing the encryption mode up front.
///
/// `kind` picks the codec when compression is attempted at all: `Artifact`
/// entries (long-lived, read rarely relative to their size) use gzip for
/// its better ratio, everything else uses lz4 for decompression speed.
/// Either way the compressed form is kept only if it's strictly smaller
/// than the plaintext; otherwise the entry is stored uncompressed.
///
/// Encryption is applied whenever `acl_level` is `Team` or more
/// restrictive (`Private`/`Team`) — the levels meant to be sealed off
/// even from a compromised storage tier. Wider-audience levels are
/// stored unencrypted since they're already readable by most of the
/// swarm.
pub async fn seal(
    plaintext: &[u8],
    threshold_bytes: u64,
    kind: MemoryKind,
    acl_level: ACLLevel,
    keys: &KeyManager,
) -> SwarmMemResult<SealedPayload> {
    let checksum = compute_content_hash(plaintext);

    let candidate = if plaintext.len() as u64 >= threshold_bytes && threshold_bytes > 0 {
        let codec = match kind {
            MemoryKind::Artifact => Compression::Gzip,
            _ => Compression::Lz4,
        };
        let compressed = compress(codec, plaintext).map_err(compression_error)?;
        if compressed.len() < plaintext.len() {
            Some((codec, compressed))
        } else {
            None
        }
    } else {
        None
    };
    let (compression, body) = candidate.unwrap_or_else(|| (Compression::None, plaintext.to_vec()));

    let should_encrypt = acl_level <= ACLLevel::Team;
    let (ciphertext, encryption, iv, tag, key_id) = if should_encrypt {
        let payload = keys.encrypt(&body).await?;
        (
            payload.ciphertext,
            EncryptionMode::Aead,
            Some(payload.iv),
            Some(payload.tag),
            Some(payload.key_id),
        )
    } else {
        (body, EncryptionMode::None, None, None, None)
    };

    Ok(SealedPayload {
        value_blob: ciphertext,
        compression,
        encryption,
        iv,
        tag,
        key_id,
        size_bytes: plaintext.len() as u64,
        checksum,
    })
}

/// Decrypt, decompress, and verify a stored entry's payload. Returns the
/// original plaintext `set` was called with.
pub async fn unseal(
    value_blob: &[u8],
    compression: Compression,
    encryption: EncryptionMode,
    iv: Option<&[u8; 12]>,
    tag: Option<&[u8; 16]>,
    key_id: Option<KeyId>,
    checksum: ContentHash,
    entry_id: swarmmem_core::EntryId,
    keys: &KeyManager,
) -> SwarmMemResult<Vec<u8>> {
    let compressed = match encryption {
        EncryptionMode::Aead => {
            let (key_id, iv, tag) = match (key_id, iv, tag) {
                (Some(key_id), Some(iv), Some(tag)) => (key_id, iv, tag),
                _ => {
                    return Err(StoreError::Corruption { entry_id }.into());
                }
            };
            keys.decrypt(key_id, iv, value_blob, tag).await?
        }
        EncryptionMode::None => value_blob.to_vec(),
    };

    let plaintext = decompress(compression, &compressed).map_err(compression_error)?;

    if compute_content_hash(&plaintext) != checksum {
        return Err(StoreError::Corruption { entry_id }.into());
    }

    Ok(plaintext)
}
