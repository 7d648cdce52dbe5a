//! The wire transport boundary.
//!
//! `Transport` has one method per DynamoDB API, taking and returning the SDK's
//! own input/output types directly rather than a bespoke mirror - staying
//! bit-exact with DynamoDB's JSON protocol is then automatic rather than
//! something this crate has to keep in sync by hand.

use async_trait::async_trait;
use aws_sdk_dynamodb::operation::batch_get_item::{BatchGetItemInput, BatchGetItemOutput};
use aws_sdk_dynamodb::operation::batch_write_item::{BatchWriteItemInput, BatchWriteItemOutput};
use aws_sdk_dynamodb::operation::create_table::{CreateTableInput, CreateTableOutput};
use aws_sdk_dynamodb::operation::delete_item::{DeleteItemInput, DeleteItemOutput};
use aws_sdk_dynamodb::operation::delete_table::{DeleteTableInput, DeleteTableOutput};
use aws_sdk_dynamodb::operation::describe_table::{DescribeTableInput, DescribeTableOutput};
use aws_sdk_dynamodb::operation::get_item::{GetItemInput, GetItemOutput};
use aws_sdk_dynamodb::operation::put_item::{PutItemInput, PutItemOutput};
use aws_sdk_dynamodb::operation::query::{QueryInput, QueryOutput};
use aws_sdk_dynamodb::operation::scan::{ScanInput, ScanOutput};
use aws_sdk_dynamodb::operation::transact_get_items::{
    TransactGetItemsInput, TransactGetItemsOutput,
};
use aws_sdk_dynamodb::operation::transact_write_items::{
    TransactWriteItemsInput, TransactWriteItemsOutput,
};
use aws_sdk_dynamodb::operation::update_item::{UpdateItemInput, UpdateItemOutput};
use aws_sdk_dynamodb::operation::update_time_to_live::{
    UpdateTimeToLiveInput, UpdateTimeToLiveOutput,
};

/// A raw transport-layer failure: an AWS error code plus message, normalized by
/// [`crate::error::normalize_transport_error`] into the executor's error taxonomy.
///
/// `cancellation_reasons` is populated only for a cancelled `TransactWriteItems`
/// call, one entry per action in request order (`"None"` where DynamoDB reports no
/// reason for that action) - the executor uses it to build a
/// [`crate::error::TransactionFailure`].
#[derive(Debug, Clone)]
pub struct TransportError {
    pub code: String,
    pub message: String,
    pub cancellation_reasons: Option<Vec<String>>,
}

/// DynamoDB wire operations. The default implementation forwards each method
/// to a live `aws_sdk_dynamodb::Client`; hosts may supply a mock for unit tests.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get_item(&self, input: GetItemInput) -> Result<GetItemOutput, TransportError>;
    async fn put_item(&self, input: PutItemInput) -> Result<PutItemOutput, TransportError>;
    async fn update_item(&self, input: UpdateItemInput) -> Result<UpdateItemOutput, TransportError>;
    async fn delete_item(&self, input: DeleteItemInput) -> Result<DeleteItemOutput, TransportError>;
    async fn query(&self, input: QueryInput) -> Result<QueryOutput, TransportError>;
    async fn scan(&self, input: ScanInput) -> Result<ScanOutput, TransportError>;
    async fn batch_get_item(
        &self,
        input: BatchGetItemInput,
    ) -> Result<BatchGetItemOutput, TransportError>;
    async fn batch_write_item(
        &self,
        input: BatchWriteItemInput,
    ) -> Result<BatchWriteItemOutput, TransportError>;
    async fn transact_write_items(
        &self,
        input: TransactWriteItemsInput,
    ) -> Result<TransactWriteItemsOutput, TransportError>;
    async fn transact_get_items(
        &self,
        input: TransactGetItemsInput,
    ) -> Result<TransactGetItemsOutput, TransportError>;
    async fn create_table(&self, input: CreateTableInput) -> Result<CreateTableOutput, TransportError>;
    async fn describe_table(
        &self,
        input: DescribeTableInput,
    ) -> Result<DescribeTableOutput, TransportError>;
    async fn delete_table(&self, input: DeleteTableInput) -> Result<DeleteTableOutput, TransportError>;
    async fn update_time_to_live(
        &self,
        input: UpdateTimeToLiveInput,
    ) -> Result<UpdateTimeToLiveOutput, TransportError>;
}

/// [`Transport`] backed by a live `aws_sdk_dynamodb::Client`.
pub struct AwsTransport {
    client: aws_sdk_dynamodb::Client,
}

impl AwsTransport {
    pub fn new(client: aws_sdk_dynamodb::Client) -> Self {
        Self { client }
    }
}

fn to_transport_error<E, R>(err: aws_sdk_dynamodb::error::SdkError<E, R>) -> TransportError
where
    E: std::error::Error + aws_sdk_dynamodb::error::ProvideErrorMetadata,
{
    TransportError {
        code: err
            .code()
            .map(str::to_string)
            .unwrap_or_else(|| "Unknown".to_string()),
        message: err.to_string(),
        cancellation_reasons: None,
    }
}

fn to_transact_write_error(
    err: aws_sdk_dynamodb::error::SdkError<
        aws_sdk_dynamodb::operation::transact_write_items::TransactWriteItemsError,
    >,
) -> TransportError {
    use aws_sdk_dynamodb::operation::transact_write_items::TransactWriteItemsError;

    let cancellation_reasons = match err.as_service_error() {
        Some(TransactWriteItemsError::TransactionCanceledException(e)) => {
            e.cancellation_reasons().map(|reasons| {
                reasons
                    .iter()
                    .map(|r| r.code().unwrap_or("None").to_string())
                    .collect()
            })
        }
        _ => None,
    };

    TransportError {
        code: err
            .code()
            .map(str::to_string)
            .unwrap_or_else(|| "Unknown".to_string()),
        message: err.to_string(),
        cancellation_reasons,
    }
}

// `aws-sdk-dynamodb`'s fluent builders don't expose a single "apply this input
// struct" method, so each operation below is written out explicitly rather
// than generated.
#[async_trait]
impl Transport for AwsTransport {
    async fn get_item(&self, input: GetItemInput) -> Result<GetItemOutput, TransportError> {
        self.client
            .get_item()
            .set_table_name(input.table_name().map(str::to_string))
            .set_key(input.key().cloned())
            .set_consistent_read(input.consistent_read())
            .set_projection_expression(input.projection_expression().map(str::to_string))
            .set_expression_attribute_names(input.expression_attribute_names().cloned())
            .send()
            .await
            .map_err(to_transport_error)
    }

    async fn put_item(&self, input: PutItemInput) -> Result<PutItemOutput, TransportError> {
        self.client
            .put_item()
            .set_table_name(input.table_name().map(str::to_string))
            .set_item(input.item().cloned())
            .set_condition_expression(input.condition_expression().map(str::to_string))
            .set_expression_attribute_names(input.expression_attribute_names().cloned())
            .set_expression_attribute_values(input.expression_attribute_values().cloned())
            .send()
            .await
            .map_err(to_transport_error)
    }

    async fn update_item(&self, input: UpdateItemInput) -> Result<UpdateItemOutput, TransportError> {
        self.client
            .update_item()
            .set_table_name(input.table_name().map(str::to_string))
            .set_key(input.key().cloned())
            .set_update_expression(input.update_expression().map(str::to_string))
            .set_condition_expression(input.condition_expression().map(str::to_string))
            .set_expression_attribute_names(input.expression_attribute_names().cloned())
            .set_expression_attribute_values(input.expression_attribute_values().cloned())
            .send()
            .await
            .map_err(to_transport_error)
    }

    async fn delete_item(&self, input: DeleteItemInput) -> Result<DeleteItemOutput, TransportError> {
        self.client
            .delete_item()
            .set_table_name(input.table_name().map(str::to_string))
            .set_key(input.key().cloned())
            .set_condition_expression(input.condition_expression().map(str::to_string))
            .set_expression_attribute_names(input.expression_attribute_names().cloned())
            .set_expression_attribute_values(input.expression_attribute_values().cloned())
            .send()
            .await
            .map_err(to_transport_error)
    }

    async fn query(&self, input: QueryInput) -> Result<QueryOutput, TransportError> {
        self.client
            .query()
            .set_table_name(input.table_name().map(str::to_string))
            .set_index_name(input.index_name().map(str::to_string))
            .set_key_condition_expression(input.key_condition_expression().map(str::to_string))
            .set_filter_expression(input.filter_expression().map(str::to_string))
            .set_projection_expression(input.projection_expression().map(str::to_string))
            .set_expression_attribute_names(input.expression_attribute_names().cloned())
            .set_expression_attribute_values(input.expression_attribute_values().cloned())
            .set_scan_index_forward(input.scan_index_forward())
            .set_consistent_read(input.consistent_read())
            .set_limit(input.limit())
            .set_exclusive_start_key(input.exclusive_start_key().cloned())
            .send()
            .await
            .map_err(to_transport_error)
    }

    async fn scan(&self, input: ScanInput) -> Result<ScanOutput, TransportError> {
        self.client
            .scan()
            .set_table_name(input.table_name().map(str::to_string))
            .set_index_name(input.index_name().map(str::to_string))
            .set_filter_expression(input.filter_expression().map(str::to_string))
            .set_projection_expression(input.projection_expression().map(str::to_string))
            .set_expression_attribute_names(input.expression_attribute_names().cloned())
            .set_expression_attribute_values(input.expression_attribute_values().cloned())
            .set_limit(input.limit())
            .set_exclusive_start_key(input.exclusive_start_key().cloned())
            .set_segment(input.segment())
            .set_total_segments(input.total_segments())
            .send()
            .await
            .map_err(to_transport_error)
    }

    async fn batch_get_item(
        &self,
        input: BatchGetItemInput,
    ) -> Result<BatchGetItemOutput, TransportError> {
        self.client
            .batch_get_item()
            .set_request_items(input.request_items().cloned())
            .send()
            .await
            .map_err(to_transport_error)
    }

    async fn batch_write_item(
        &self,
        input: BatchWriteItemInput,
    ) -> Result<BatchWriteItemOutput, TransportError> {
        self.client
            .batch_write_item()
            .set_request_items(input.request_items().cloned())
            .send()
            .await
            .map_err(to_transport_error)
    }

    async fn transact_write_items(
        &self,
        input: TransactWriteItemsInput,
    ) -> Result<TransactWriteItemsOutput, TransportError> {
        self.client
            .transact_write_items()
            .set_transact_items(input.transact_items().map(|items| items.to_vec()))
            .send()
            .await
            .map_err(to_transact_write_error)
    }

    async fn transact_get_items(
        &self,
        input: TransactGetItemsInput,
    ) -> Result<TransactGetItemsOutput, TransportError> {
        self.client
            .transact_get_items()
            .set_transact_items(input.transact_items().map(|items| items.to_vec()))
            .send()
            .await
            .map_err(to_transport_error)
    }

    async fn create_table(&self, input: CreateTableInput) -> Result<CreateTableOutput, TransportError> {
        self.client
            .create_table()
            .set_table_name(input.table_name().map(str::to_string))
            .set_attribute_definitions(input.attribute_definitions().map(|v| v.to_vec()))
            .set_key_schema(input.key_schema().map(|v| v.to_vec()))
            .set_global_secondary_indexes(input.global_secondary_indexes().map(|v| v.to_vec()))
            .set_local_secondary_indexes(input.local_secondary_indexes().map(|v| v.to_vec()))
            .set_billing_mode(input.billing_mode().cloned())
            .set_provisioned_throughput(input.provisioned_throughput().cloned())
            .send()
            .await
            .map_err(to_transport_error)
    }

    async fn describe_table(
        &self,
        input: DescribeTableInput,
    ) -> Result<DescribeTableOutput, TransportError> {
        self.client
            .describe_table()
            .set_table_name(input.table_name().map(str::to_string))
            .send()
            .await
            .map_err(to_transport_error)
    }

    async fn delete_table(&self, input: DeleteTableInput) -> Result<DeleteTableOutput, TransportError> {
        self.client
            .delete_table()
            .set_table_name(input.table_name().map(str::to_string))
            .send()
            .await
            .map_err(to_transport_error)
    }

    async fn update_time_to_live(
        &self,
        input: UpdateTimeToLiveInput,
    ) -> Result<UpdateTimeToLiveOutput, TransportError> {
        self.client
            .update_time_to_live()
            .set_table_name(input.table_name().map(str::to_string))
            .set_time_to_live_specification(input.time_to_live_specification().cloned())
            .send()
            .await
            .map_err(to_transport_error)
    }
}
