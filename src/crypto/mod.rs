//! Envelope encryption for individual attribute values.
//!
//! Plain AES-256-GCM envelope encryption under a KMS-managed data key - no
//! searchable-index term generation, no compound indexer. One attribute in,
//! one `M{v,edk,nonce,ct}` envelope out.

mod encoding;
mod provider;
mod rewrite;

pub use encoding::{decode_plaintext, encode_plaintext};
pub use provider::{DataKey, KmsKeyProvider};
pub use rewrite::{apply_encrypted_values, find_pending_encryptions, PendingEncryption};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;

use crate::attribute_value::AttributeValue;
use crate::error::CryptoError;

const AAD_PREFIX: &str = "dynamorm:encrypted:v1|attr=";
const ENVELOPE_VERSION: &str = "1";

/// Builds the additional authenticated data bound to one attribute's envelope.
/// A ciphertext sealed under one attribute name will not decrypt under another.
fn aad_for(attr_name: &str) -> Vec<u8> {
    format!("{AAD_PREFIX}{attr_name}").into_bytes()
}

/// Encrypts one plaintext attribute value, returning its envelope.
///
/// Generates a fresh data key via `key_provider.generate_data_key`, seals the
/// stably-encoded plaintext under it with a random 96-bit nonce, and wraps the
/// result as a DynamoDB `M{v,edk,nonce,ct}`. The plaintext data key is zeroized
/// (via its `Drop` impl) before this function returns.
pub async fn encrypt_av(
    attr_name: &str,
    av: &AttributeValue,
    key_ref: &str,
    key_provider: &dyn KmsKeyProvider,
) -> Result<AttributeValue, CryptoError> {
    let data_key = key_provider
        .generate_data_key(key_ref)
        .await
        .map_err(CryptoError::Kms)?;
    if data_key.plaintext.len() != 32 {
        return Err(CryptoError::BadDataKeyLength(data_key.plaintext.len()));
    }

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&data_key.plaintext));

    let mut nonce_bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let plaintext = encode_plaintext(av);
    let aad = aad_for(attr_name);

    let ct = cipher
        .encrypt(
            nonce,
            aes_gcm::aead::Payload {
                msg: &plaintext,
                aad: &aad,
            },
        )
        .map_err(|_| CryptoError::InvalidEnvelope("seal failed".to_string()))?;

    let mut envelope = std::collections::HashMap::new();
    envelope.insert("v".to_string(), AttributeValue::S(ENVELOPE_VERSION.to_string()));
    envelope.insert("edk".to_string(), AttributeValue::B(data_key.ciphertext_blob));
    envelope.insert("nonce".to_string(), AttributeValue::B(nonce_bytes.to_vec()));
    envelope.insert("ct".to_string(), AttributeValue::B(ct));

    Ok(AttributeValue::M(envelope))
}

/// Decrypts an envelope previously produced by [`encrypt_av`] for the same
/// `attr_name`. Any malformed field, version mismatch, or authentication
/// failure is [`CryptoError::InvalidEnvelope`].
pub async fn decrypt_av(
    attr_name: &str,
    envelope_av: &AttributeValue,
    key_provider: &dyn KmsKeyProvider,
) -> Result<AttributeValue, CryptoError> {
    let AttributeValue::M(map) = envelope_av else {
        return Err(CryptoError::InvalidEnvelope(
            "expected an M-typed envelope".to_string(),
        ));
    };

    let version = match map.get("v") {
        Some(AttributeValue::S(v)) => v.as_str(),
        _ => return Err(CryptoError::InvalidEnvelope("missing v".to_string())),
    };
    if version != ENVELOPE_VERSION {
        return Err(CryptoError::InvalidEnvelope(format!(
            "unsupported envelope version `{version}`"
        )));
    }

    let edk = match map.get("edk") {
        Some(AttributeValue::B(b)) => b.clone(),
        _ => return Err(CryptoError::InvalidEnvelope("missing edk".to_string())),
    };
    let nonce_bytes = match map.get("nonce") {
        Some(AttributeValue::B(b)) if b.len() == 12 => b.clone(),
        Some(AttributeValue::B(_)) => {
            return Err(CryptoError::InvalidEnvelope("nonce must be 12 bytes".to_string()))
        }
        _ => return Err(CryptoError::InvalidEnvelope("missing nonce".to_string())),
    };
    let ct = match map.get("ct") {
        Some(AttributeValue::B(b)) => b.clone(),
        _ => return Err(CryptoError::InvalidEnvelope("missing ct".to_string())),
    };

    let data_key = key_provider
        .decrypt(&edk)
        .await
        .map_err(CryptoError::Kms)?;
    if data_key.plaintext.len() != 32 {
        return Err(CryptoError::BadDataKeyLength(data_key.plaintext.len()));
    }

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&data_key.plaintext));
    let nonce = Nonce::from_slice(&nonce_bytes);
    let aad = aad_for(attr_name);

    let plaintext = cipher
        .decrypt(
            nonce,
            aes_gcm::aead::Payload {
                msg: &ct,
                aad: &aad,
            },
        )
        .map_err(|_| CryptoError::InvalidEnvelope("authentication failed".to_string()))?;

    decode_plaintext(&plaintext)
        .ok_or_else(|| CryptoError::InvalidEnvelope("malformed plaintext encoding".to_string()))
}
