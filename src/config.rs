//! Client configuration.
//!
//! `DynamormConfig` is built the way the rest of this ecosystem builds its
//! configs: a `builder()` entry point, `.with_env()` to pick up the handful of
//! environment variables operators actually set, and a fallible `.build()` that
//! catches missing required fields before any network call happens.

use std::env;
use std::sync::Arc;

use crate::crypto::KmsKeyProvider;
use crate::error::ModelError;

/// Runtime configuration for a [`crate::Client`].
#[derive(Clone)]
pub struct DynamormConfig {
    pub(crate) table_name: String,
    pub(crate) region: Option<String>,
    pub(crate) endpoint_override: Option<String>,
    pub(crate) credentials_ref: Option<String>,
    pub(crate) key_provider: Option<Arc<dyn KmsKeyProvider>>,
    pub(crate) kms_key_ref: Option<String>,
    pub(crate) max_retries: u32,
    pub(crate) scan_segments: u32,
    pub(crate) default_rcu: Option<i64>,
    pub(crate) default_wcu: Option<i64>,
    pub(crate) batch_max_attempts: u32,
    pub(crate) batch_base_delay_ms: u64,
}

impl DynamormConfig {
    pub fn builder() -> DynamormConfigBuilder {
        DynamormConfigBuilder::default()
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn key_provider(&self) -> Option<Arc<dyn KmsKeyProvider>> {
        self.key_provider.clone()
    }

    pub fn kms_key_ref(&self) -> Option<&str> {
        self.kms_key_ref.as_deref()
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn scan_segments(&self) -> u32 {
        self.scan_segments
    }

    pub fn batch_max_attempts(&self) -> u32 {
        self.batch_max_attempts
    }

    pub fn batch_base_delay_ms(&self) -> u64 {
        self.batch_base_delay_ms
    }
}

/// Builder for [`DynamormConfig`].
///
/// `DYNAMORM_TABLE_NAME`, `AWS_REGION`/`DYNAMORM_REGION`, and
/// `DYNAMORM_ENDPOINT_URL` are read by [`DynamormConfigBuilder::with_env`]; explicit
/// setters called afterwards still win.
#[derive(Default)]
pub struct DynamormConfigBuilder {
    table_name: Option<String>,
    region: Option<String>,
    endpoint_override: Option<String>,
    credentials_ref: Option<String>,
    key_provider: Option<Arc<dyn KmsKeyProvider>>,
    kms_key_ref: Option<String>,
    max_retries: Option<u32>,
    scan_segments: Option<u32>,
    default_rcu: Option<i64>,
    default_wcu: Option<i64>,
    batch_max_attempts: Option<u32>,
    batch_base_delay_ms: Option<u64>,
}

impl DynamormConfigBuilder {
    pub fn table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = Some(table_name.into());
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn endpoint_override(mut self, endpoint_override: impl Into<String>) -> Self {
        self.endpoint_override = Some(endpoint_override.into());
        self
    }

    pub fn credentials_ref(mut self, credentials_ref: impl Into<String>) -> Self {
        self.credentials_ref = Some(credentials_ref.into());
        self
    }

    pub fn key_provider(mut self, key_provider: Arc<dyn KmsKeyProvider>) -> Self {
        self.key_provider = Some(key_provider);
        self
    }

    /// The KMS key reference passed to `GenerateDataKey`/`Decrypt` for every
    /// encrypted field. Required if any registered model has an `encrypted` field.
    pub fn kms_key_ref(mut self, kms_key_ref: impl Into<String>) -> Self {
        self.kms_key_ref = Some(kms_key_ref.into());
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Number of segments used by parallel scan. Defaults to 1 (no parallelism).
    pub fn scan_segments(mut self, scan_segments: u32) -> Self {
        self.scan_segments = Some(scan_segments);
        self
    }

    pub fn default_rcu(mut self, rcu: i64) -> Self {
        self.default_rcu = Some(rcu);
        self
    }

    pub fn default_wcu(mut self, wcu: i64) -> Self {
        self.default_wcu = Some(wcu);
        self
    }

    /// Maximum retry attempts for batch `UnprocessedItems`/`UnprocessedKeys`. Defaults to 5.
    pub fn batch_max_attempts(mut self, attempts: u32) -> Self {
        self.batch_max_attempts = Some(attempts);
        self
    }

    /// Base delay, in milliseconds, for the linear `base_delay * attempt` batch
    /// retry backoff. Defaults to 25.
    pub fn batch_base_delay_ms(mut self, delay_ms: u64) -> Self {
        self.batch_base_delay_ms = Some(delay_ms);
        self
    }

    /// Fills in any field still unset from the process environment.
    pub fn with_env(mut self) -> Self {
        if self.table_name.is_none() {
            self.table_name = env::var("DYNAMORM_TABLE_NAME").ok();
        }
        if self.region.is_none() {
            self.region = env::var("DYNAMORM_REGION")
                .or_else(|_| env::var("AWS_REGION"))
                .ok();
        }
        if self.endpoint_override.is_none() {
            self.endpoint_override = env::var("DYNAMORM_ENDPOINT_URL").ok();
        }
        if self.kms_key_ref.is_none() {
            self.kms_key_ref = env::var("DYNAMORM_KMS_KEY_REF").ok();
        }
        self
    }

    pub fn build(self) -> Result<DynamormConfig, ModelError> {
        let table_name = self.table_name.ok_or_else(|| ModelError {
            type_name: "DynamormConfig",
            reason: "table_name is required (set it explicitly or via DYNAMORM_TABLE_NAME)"
                .to_string(),
        })?;

        Ok(DynamormConfig {
            table_name,
            region: self.region,
            endpoint_override: self.endpoint_override,
            credentials_ref: self.credentials_ref,
            key_provider: self.key_provider,
            kms_key_ref: self.kms_key_ref,
            max_retries: self.max_retries.unwrap_or(8),
            scan_segments: self.scan_segments.unwrap_or(1),
            default_rcu: self.default_rcu,
            default_wcu: self.default_wcu,
            batch_max_attempts: self.batch_max_attempts.unwrap_or(5),
            batch_base_delay_ms: self.batch_base_delay_ms.unwrap_or(25),
        })
    }
}
