//! KMS data-key provider.
//!
//! The external collaborator for key management: two operations,
//! `generate_data_key` and `decrypt`, both returning a 32-byte plaintext key that
//! must be zeroized on drop and never logged.

use async_trait::async_trait;
use zeroize::Zeroizing;

/// A plaintext/wrapped key pair as returned by KMS `GenerateDataKey`, or the
/// plaintext recovered from a `Decrypt` call. `plaintext` zeroizes its backing
/// buffer on drop.
pub struct DataKey {
    pub plaintext: Zeroizing<Vec<u8>>,
    pub ciphertext_blob: Vec<u8>,
}

/// Abstraction over AWS KMS's `GenerateDataKey`/`Decrypt` operations. The
/// default implementation forwards to `aws_sdk_kms::Client`; hosts may supply
/// their own for testing or for a different key-management backend.
#[async_trait]
pub trait KmsKeyProvider: Send + Sync {
    /// Requests a fresh AES-256 data key wrapped under `key_ref`.
    async fn generate_data_key(&self, key_ref: &str) -> Result<DataKey, String>;

    /// Unwraps a previously generated data key's ciphertext blob.
    async fn decrypt(&self, ciphertext_blob: &[u8]) -> Result<DataKey, String>;
}

/// [`KmsKeyProvider`] backed by a live `aws_sdk_kms::Client`.
pub struct AwsKmsKeyProvider {
    client: aws_sdk_kms::Client,
}

impl AwsKmsKeyProvider {
    pub fn new(client: aws_sdk_kms::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KmsKeyProvider for AwsKmsKeyProvider {
    async fn generate_data_key(&self, key_ref: &str) -> Result<DataKey, String> {
        let output = self
            .client
            .generate_data_key()
            .key_id(key_ref)
            .key_spec(aws_sdk_kms::types::DataKeySpec::Aes256)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let plaintext = output
            .plaintext()
            .ok_or_else(|| "KMS GenerateDataKey response had no plaintext".to_string())?
            .as_ref()
            .to_vec();
        let ciphertext_blob = output
            .ciphertext_blob()
            .ok_or_else(|| "KMS GenerateDataKey response had no ciphertext blob".to_string())?
            .as_ref()
            .to_vec();

        Ok(DataKey {
            plaintext: Zeroizing::new(plaintext),
            ciphertext_blob,
        })
    }

    async fn decrypt(&self, ciphertext_blob: &[u8]) -> Result<DataKey, String> {
        let output = self
            .client
            .decrypt()
            .ciphertext_blob(aws_sdk_kms::primitives::Blob::new(ciphertext_blob.to_vec()))
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let plaintext = output
            .plaintext()
            .ok_or_else(|| "KMS Decrypt response had no plaintext".to_string())?
            .as_ref()
            .to_vec();

        Ok(DataKey {
            plaintext: Zeroizing::new(plaintext),
            ciphertext_blob: ciphertext_blob.to_vec(),
        })
    }
}
