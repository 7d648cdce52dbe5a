//! Type-safe, high-level client for Amazon DynamoDB with per-field envelope encryption.
//!
//! The crate root wires together the pieces the rest of the modules define:
//! [`Client`] owns the wire transport and the optional KMS key provider,
//! [`model`] hands out a [`executor::Model<T>`] for a registered record type,
//! and `#[derive(DynamormTable)]` (in `dynamorm-derive`) generates the
//! `build_metadata()` every model needs to register itself.

pub mod attribute_value;
pub mod config;
pub mod crypto;
pub mod cursor;
pub mod error;
pub mod executor;
pub mod expr;
pub mod marshal;
pub mod planner;
pub mod registry;
pub mod transport;

pub use dynamorm_derive::DynamormTable;

pub use attribute_value::AttributeValue;
pub use config::{DynamormConfig, DynamormConfigBuilder};
pub use error::{Error, ErrorKind};
pub use executor::{
    BatchGetResult, BatchWriteResult, Fetch, Model, Page, PrimaryKey, QueryBuilder,
    TransactBuilder, UpdateBuilder,
};
pub use registry::{DynamormTable as DynamormTableTrait, SchemaRegistry};
pub use transport::{AwsTransport, Transport};

use std::any::Any;
use std::sync::Arc;

use aws_sdk_dynamodb::Client as AwsDynamoClient;
use aws_sdk_kms::Client as AwsKmsClient;

use crate::crypto::AwsKmsKeyProvider;
use crate::error::ModelError;
use crate::registry::DynamormTable;

/// A live connection to one DynamoDB table, plus whatever KMS key provider is
/// configured for envelope encryption. Cloning a `Client` is cheap: every
/// field is an `Arc` or plain config value.
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    config: DynamormConfig,
}

impl Client {
    /// Wraps an already-configured AWS SDK client and KMS provider.
    pub fn new(transport: Arc<dyn Transport>, config: DynamormConfig) -> Self {
        Self { transport, config }
    }

    /// Builds a `Client` from the ambient AWS config (`~/.aws/config`, env vars,
    /// instance metadata, ...), the same credential chain `aws-config` resolves
    /// for every other AWS SDK client in this ecosystem.
    pub async fn from_env(mut config: DynamormConfig) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = config.region.clone() {
            loader = loader.region(aws_sdk_dynamodb::config::Region::new(region));
        }
        let shared_config = loader.load().await;

        let mut dynamo_builder =
            aws_sdk_dynamodb::config::Builder::from(&shared_config);
        if let Some(endpoint) = &config.endpoint_override {
            dynamo_builder = dynamo_builder.endpoint_url(endpoint);
        }
        let dynamo_client = AwsDynamoClient::from_conf(dynamo_builder.build());

        if config.kms_key_ref.is_some() && config.key_provider.is_none() {
            let kms_client = AwsKmsClient::new(&shared_config);
            config.key_provider = Some(Arc::new(AwsKmsKeyProvider::new(kms_client)));
        }

        Self {
            transport: Arc::new(AwsTransport::new(dynamo_client)),
            config,
        }
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }

    pub fn config(&self) -> &DynamormConfig {
        &self.config
    }
}

/// Registers `T` with the process-wide [`SchemaRegistry`] (on first use) and
/// returns a [`Model<T>`] bound to `client`: `dynamorm::model::<Order>(&client).get(key).await?`.
pub fn model<T>(client: &Client) -> Result<Model<T>, ModelError>
where
    T: DynamormTable + Any + Default + Send + Sync,
{
    Model::new(client).map_err(|e| match e {
        error::ExecutorError::Model(inner) => inner,
        other => ModelError {
            type_name: T::type_name(),
            reason: other.to_string(),
        },
    })
}
