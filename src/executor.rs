//! Operation Executor.
//!
//! Dispatches Get/Put/Update/Delete, batch and transactional writes, and
//! Query/Scan, against a [`crate::transport::Transport`]. The executor never
//! reads before writing: callers supply the observed version.

use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use aws_sdk_dynamodb::operation::batch_get_item::BatchGetItemInput;
use aws_sdk_dynamodb::operation::batch_write_item::BatchWriteItemInput;
use aws_sdk_dynamodb::operation::delete_item::DeleteItemInput;
use aws_sdk_dynamodb::operation::get_item::GetItemInput;
use aws_sdk_dynamodb::operation::put_item::PutItemInput;
use aws_sdk_dynamodb::operation::query::QueryInput;
use aws_sdk_dynamodb::operation::scan::ScanInput;
use aws_sdk_dynamodb::operation::transact_get_items::TransactGetItemsInput;
use aws_sdk_dynamodb::operation::transact_write_items::TransactWriteItemsInput;
use aws_sdk_dynamodb::operation::update_item::UpdateItemInput;
use aws_sdk_dynamodb::types::{
    Delete, DeleteRequest, Get, KeysAndAttributes, Put, PutRequest, TransactGetItem,
    TransactWriteItem, WriteRequest,
};

use crate::attribute_value::{map_from_wire, map_to_wire, AttributeMap, AttributeValue};
use crate::crypto::{self, KmsKeyProvider};
use crate::error::{normalize_transport_error, CryptoError, ExecutorError, TransactionFailure};
use crate::expr::{ExpressionBuilder, Operator};
use crate::marshal::{marshal_item, unmarshal_item};
use crate::planner::{plan_query, AccessMode, PlanRequest, Predicate, SortDirection};
use crate::registry::{DynamormTable, Metadata, SchemaRegistry};
use crate::transport::Transport;
use crate::Client;

/// A base-table or index primary key: a partition key and, if the schema
/// declares one, a sort key.
#[derive(Debug, Clone)]
pub struct PrimaryKey {
    pub pk: AttributeValue,
    pub sk: Option<AttributeValue>,
}

impl PrimaryKey {
    pub fn partition(pk: AttributeValue) -> Self {
        Self { pk, sk: None }
    }

    pub fn composite(pk: AttributeValue, sk: AttributeValue) -> Self {
        Self { pk, sk: Some(sk) }
    }
}

fn key_attribute_map(metadata: &Metadata, key: &PrimaryKey) -> Result<AttributeMap, ExecutorError> {
    let mut map = AttributeMap::new();
    map.insert(metadata.pk_field().wire_name.to_string(), key.pk.clone());
    match (metadata.sk_field(), &key.sk) {
        (Some(sk_field), Some(sk_value)) => {
            map.insert(sk_field.wire_name.to_string(), sk_value.clone());
        }
        (None, None) => {}
        _ => return Err(ExecutorError::MissingPrimaryKey),
    }
    Ok(map)
}

/// The inverse of [`key_attribute_map`]: recovers a [`PrimaryKey`] from a raw
/// wire item (or key map), used to report unprocessed batch keys back in a
/// form callers can retry with.
fn primary_key_from_attribute_map(metadata: &Metadata, map: &AttributeMap) -> Option<PrimaryKey> {
    let pk = map.get(metadata.pk_field().wire_name.as_ref())?.clone();
    let sk = match metadata.sk_field() {
        Some(sk_field) => Some(map.get(sk_field.wire_name.as_ref())?.clone()),
        None => None,
    };
    Some(PrimaryKey { pk, sk })
}

/// How much of a paginated Query/Scan to retrieve.
pub enum Fetch {
    /// Auto-iterate until `LastEvaluatedKey` is absent.
    All,
    /// A single page, limit 1.
    First,
    /// A single page, with a cursor for resuming.
    AllPaginated,
}

/// One page of a paginated Query/Scan.
#[derive(Debug, Default)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
    pub scanned_count: i32,
}

/// Result of [`Model::batch_get`]: every key that resolved, plus any keys
/// DynamoDB still reported as unprocessed after `batch_max_attempts` retries.
#[derive(Debug, Default)]
pub struct BatchGetResult<T> {
    pub items: Vec<T>,
    pub unprocessed: Vec<PrimaryKey>,
}

/// Result of a batch write ([`Model::batch_create`]/[`Model::batch_delete`]):
/// the raw `WriteRequest`s DynamoDB still reported as unprocessed after
/// `batch_max_attempts` retries.
#[derive(Debug, Default)]
pub struct BatchWriteResult {
    pub unprocessed: Vec<WriteRequest>,
}

fn is_retriable_err(code: &str) -> bool {
    matches!(
        code,
        "ProvisionedThroughputExceededException"
            | "ThrottlingException"
            | "RequestLimitExceeded"
            | "InternalServerError"
    )
}

/// A model-centric view over one record type.
pub struct Model<T> {
    transport: Arc<dyn Transport>,
    key_provider: Option<Arc<dyn KmsKeyProvider>>,
    kms_key_ref: Option<String>,
    batch_max_attempts: u32,
    batch_base_delay_ms: u64,
    scan_segments: u32,
    metadata: Arc<Metadata>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Model<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            key_provider: self.key_provider.clone(),
            kms_key_ref: self.kms_key_ref.clone(),
            batch_max_attempts: self.batch_max_attempts,
            batch_base_delay_ms: self.batch_base_delay_ms,
            scan_segments: self.scan_segments,
            metadata: self.metadata.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> Model<T>
where
    T: DynamormTable + Any + Default + Send + Sync,
{
    pub fn new(client: &Client) -> Result<Self, ExecutorError> {
        let metadata = SchemaRegistry::global().metadata::<T>()?;
        Ok(Self {
            transport: client.transport(),
            key_provider: client.config().key_provider(),
            kms_key_ref: client.config().kms_key_ref().map(str::to_string),
            batch_max_attempts: client.config().batch_max_attempts(),
            batch_base_delay_ms: client.config().batch_base_delay_ms(),
            scan_segments: client.config().scan_segments(),
            metadata,
            _marker: PhantomData,
        })
    }

    fn ensure_encryption_configured(&self) -> Result<(), ExecutorError> {
        if self.metadata.has_encrypted_fields
            && (self.key_provider.is_none() || self.kms_key_ref.is_none())
        {
            return Err(CryptoError::EncryptionNotConfigured.into());
        }
        Ok(())
    }

    fn key_ref(&self) -> &str {
        // `ensure_encryption_configured` has already verified this is `Some` on
        // every path that calls into `encrypt_item`.
        self.kms_key_ref.as_deref().unwrap_or_default()
    }

    async fn encrypt_item(&self, item: &mut AttributeMap) -> Result<(), ExecutorError> {
        let Some(provider) = &self.key_provider else {
            return Ok(());
        };
        for field in &self.metadata.fields {
            if !field.is_encrypted {
                continue;
            }
            if let Some(plaintext) = item.remove(field.wire_name.as_ref()) {
                let envelope = crypto::encrypt_av(
                    field.wire_name.as_ref(),
                    &plaintext,
                    self.key_ref(),
                    provider.as_ref(),
                )
                .await?;
                item.insert(field.wire_name.to_string(), envelope);
            }
        }
        Ok(())
    }

    async fn decrypt_item(&self, item: &mut AttributeMap) -> Result<(), ExecutorError> {
        let Some(provider) = &self.key_provider else {
            return Ok(());
        };
        for field in &self.metadata.fields {
            if !field.is_encrypted {
                continue;
            }
            if let Some(envelope) = item.remove(field.wire_name.as_ref()) {
                let plaintext =
                    crypto::decrypt_av(field.wire_name.as_ref(), &envelope, provider.as_ref())
                        .await?;
                item.insert(field.wire_name.to_string(), plaintext);
            }
        }
        Ok(())
    }

    /// Inserts a new record. Fails the write with [`ExecutorError::ConditionFailed`]
    /// if a record already exists at its primary key.
    pub async fn create(&self, record: &T) -> Result<(), ExecutorError> {
        self.put(record, true).await
    }

    /// Inserts or overwrites a record unconditionally.
    pub async fn put(&self, record: &T, if_not_exists: bool) -> Result<(), ExecutorError> {
        self.ensure_encryption_configured()?;

        let mut item = marshal_item(record, &self.metadata, true);
        self.encrypt_item(&mut item).await?;

        let (condition_expr, names) = if if_not_exists {
            let mut b = ExpressionBuilder::new();
            b.add_condition_check(
                self.metadata.pk_field().wire_name.as_ref(),
                Operator::AttributeNotExists,
                vec![],
            )?;
            let built = b.build();
            (built.condition_expr, built.names)
        } else {
            (None, HashMap::new())
        };

        let input = PutItemInput::builder()
            .table_name(self.metadata.table_name.clone())
            .set_item(Some(map_to_wire(item)))
            .set_condition_expression(condition_expr)
            .set_expression_attribute_names((!names.is_empty()).then_some(names))
            .build()
            .map_err(build_error)?;

        self.transport
            .put_item(input)
            .await
            .map_err(|e| normalize_transport_error(&e.code, e.message, false))?;
        Ok(())
    }

    /// Fetches a record by primary key. No item → [`ExecutorError::ItemNotFound`].
    pub async fn get(&self, key: PrimaryKey) -> Result<T, ExecutorError> {
        self.ensure_encryption_configured()?;
        let key_map = key_attribute_map(&self.metadata, &key)?;

        let input = GetItemInput::builder()
            .table_name(self.metadata.table_name.clone())
            .set_key(Some(map_to_wire(key_map)))
            .build()
            .map_err(build_error)?;

        let output = self
            .transport
            .get_item(input)
            .await
            .map_err(|e| normalize_transport_error(&e.code, e.message, true))?;

        let Some(wire_item) = output.item().cloned() else {
            return Err(ExecutorError::ItemNotFound);
        };

        let mut item = map_from_wire(wire_item);
        self.decrypt_item(&mut item).await?;
        Ok(unmarshal_item(item, &self.metadata)?)
    }

    /// Deletes a record by primary key. If `expected_version` is given and the
    /// schema has a version field, the delete is conditioned on it.
    pub async fn delete(
        &self,
        key: PrimaryKey,
        expected_version: Option<i64>,
    ) -> Result<(), ExecutorError> {
        let key_map = key_attribute_map(&self.metadata, &key)?;

        let (condition_expr, names, values) =
            if let (Some(version_field), Some(expected)) =
                (self.metadata.version_field, expected_version)
            {
                let mut b = ExpressionBuilder::new();
                b.add_condition_check(
                    self.metadata.fields[version_field].wire_name.as_ref(),
                    Operator::Eq,
                    vec![AttributeValue::n(expected)],
                )?;
                let built = b.build();
                (built.condition_expr, built.names, built.values)
            } else {
                (None, HashMap::new(), HashMap::new())
            };

        let input = DeleteItemInput::builder()
            .table_name(self.metadata.table_name.clone())
            .set_key(Some(map_to_wire(key_map)))
            .set_condition_expression(condition_expr)
            .set_expression_attribute_names((!names.is_empty()).then_some(names))
            .set_expression_attribute_values((!values.is_empty()).then_some(map_to_wire(values)))
            .build()
            .map_err(build_error)?;

        self.transport
            .delete_item(input)
            .await
            .map_err(|e| normalize_transport_error(&e.code, e.message, false))?;
        Ok(())
    }

    /// Updates the named fields on `record`, conditioned on `expected_version`.
    /// `version == 0` is rejected before any wire call - it isn't a valid
    /// observed version, only ever a sign a caller forgot to read first.
    pub async fn update(
        &self,
        key: PrimaryKey,
        fields: &[&str],
        values: Vec<(&str, AttributeValue)>,
        expected_version: i64,
    ) -> Result<(), ExecutorError> {
        if expected_version == 0 {
            return Err(ExecutorError::ZeroVersion);
        }
        self.ensure_encryption_configured()?;

        let mut builder = self.update_builder(key).expected_version(expected_version);
        for (field, value) in values {
            if fields.contains(&field) {
                builder = builder.set(field, value)?;
            }
        }
        builder.execute().await
    }

    pub fn update_builder(&self, key: PrimaryKey) -> UpdateBuilder<T> {
        UpdateBuilder::new(self.clone(), key)
    }

    /// Starts a fluent query/scan builder against this model's base table or
    /// one of its secondary indexes.
    pub fn query(&self) -> QueryBuilder<T> {
        QueryBuilder::new(self.clone())
    }

    /// Issues a full-table scan directly (equivalent to `query()` with no
    /// predicates - the planner always falls back to `Scan` in that case).
    pub fn scan(&self) -> QueryBuilder<T> {
        QueryBuilder::new(self.clone())
    }

    /// Fetches up to 100 keys per DynamoDB request, retrying `UnprocessedKeys`
    /// with linear backoff. Keys still unprocessed after `batch_max_attempts`
    /// are returned in [`BatchGetResult::unprocessed`] rather than dropped.
    pub async fn batch_get(&self, keys: Vec<PrimaryKey>) -> Result<BatchGetResult<T>, ExecutorError> {
        self.ensure_encryption_configured()?;

        let mut out = Vec::with_capacity(keys.len());
        let mut unprocessed_out = Vec::new();
        for chunk in keys.chunks(100) {
            let mut pending: Vec<AttributeMap> = chunk
                .iter()
                .map(|k| key_attribute_map(&self.metadata, k))
                .collect::<Result<_, _>>()?;

            let mut attempt = 0u32;
            loop {
                attempt += 1;
                let keys_and_attrs = KeysAndAttributes::builder()
                    .set_keys(Some(
                        pending.iter().cloned().map(map_to_wire).collect(),
                    ))
                    .build()
                    .map_err(build_error)?;

                let mut request_items = HashMap::new();
                request_items.insert(self.metadata.table_name.clone(), keys_and_attrs);

                let input = BatchGetItemInput::builder()
                    .set_request_items(Some(request_items))
                    .build()
                    .map_err(build_error)?;

                let output = self
                    .transport
                    .batch_get_item(input)
                    .await
                    .map_err(|e| normalize_transport_error(&e.code, e.message, false))?;

                if let Some(responses) = output.responses() {
                    if let Some(items) = responses.get(&self.metadata.table_name) {
                        for wire_item in items.iter().cloned() {
                            let mut item = map_from_wire(wire_item);
                            self.decrypt_item(&mut item).await?;
                            out.push(unmarshal_item(item, &self.metadata)?);
                        }
                    }
                }

                let unprocessed = output
                    .unprocessed_keys()
                    .and_then(|m| m.get(&self.metadata.table_name))
                    .and_then(|k| k.keys())
                    .map(|keys| keys.iter().cloned().map(map_from_wire).collect::<Vec<_>>())
                    .unwrap_or_default();

                if unprocessed.is_empty() {
                    break;
                }
                if attempt >= self.batch_max_attempts {
                    log::warn!(
                        "batch_get_item: {} keys still unprocessed after {} attempts",
                        unprocessed.len(),
                        attempt
                    );
                    unprocessed_out.extend(
                        unprocessed
                            .iter()
                            .filter_map(|m| primary_key_from_attribute_map(&self.metadata, m)),
                    );
                    break;
                }
                tokio::time::sleep(Duration::from_millis(
                    self.batch_base_delay_ms * attempt as u64,
                ))
                .await;
                pending = unprocessed;
            }
        }

        Ok(BatchGetResult {
            items: out,
            unprocessed: unprocessed_out,
        })
    }

    /// Creates up to 25 records per DynamoDB request, retrying `UnprocessedItems`.
    pub async fn batch_create(&self, records: Vec<T>) -> Result<BatchWriteResult, ExecutorError> {
        self.ensure_encryption_configured()?;

        let mut items = Vec::with_capacity(records.len());
        for record in &records {
            let mut item = marshal_item(record, &self.metadata, true);
            self.encrypt_item(&mut item).await?;
            items.push(item);
        }

        let requests: Vec<WriteRequest> = items
            .into_iter()
            .map(|item| {
                WriteRequest::builder()
                    .put(
                        PutRequest::builder()
                            .set_item(Some(map_to_wire(item)))
                            .build()
                            .expect("PutRequest requires only `item`, which is always set"),
                    )
                    .build()
            })
            .collect();

        self.batch_write(requests).await
    }

    /// Deletes up to 25 keys per DynamoDB request, retrying `UnprocessedItems`.
    pub async fn batch_delete(&self, keys: Vec<PrimaryKey>) -> Result<BatchWriteResult, ExecutorError> {
        let requests: Vec<WriteRequest> = keys
            .iter()
            .map(|k| key_attribute_map(&self.metadata, k))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|key| {
                WriteRequest::builder()
                    .delete(
                        DeleteRequest::builder()
                            .set_key(Some(map_to_wire(key)))
                            .build()
                            .expect("DeleteRequest requires only `key`, which is always set"),
                    )
                    .build()
            })
            .collect();

        self.batch_write(requests).await
    }

    /// Unprocessed requests still outstanding after `batch_max_attempts` are
    /// returned in [`BatchWriteResult::unprocessed`] rather than dropped.
    async fn batch_write(&self, requests: Vec<WriteRequest>) -> Result<BatchWriteResult, ExecutorError> {
        let mut unprocessed_out = Vec::new();
        for chunk in requests.chunks(25) {
            let mut pending = chunk.to_vec();
            let mut attempt = 0u32;
            loop {
                attempt += 1;
                let mut request_items = HashMap::new();
                request_items.insert(self.metadata.table_name.clone(), pending.clone());

                let input = BatchWriteItemInput::builder()
                    .set_request_items(Some(request_items))
                    .build()
                    .map_err(build_error)?;

                let output = self
                    .transport
                    .batch_write_item(input)
                    .await
                    .map_err(|e| normalize_transport_error(&e.code, e.message, false))?;

                let unprocessed = output
                    .unprocessed_items()
                    .and_then(|m| m.get(&self.metadata.table_name))
                    .cloned()
                    .unwrap_or_default();

                if unprocessed.is_empty() {
                    break;
                }
                if attempt >= self.batch_max_attempts {
                    log::warn!(
                        "batch_write_item: {} requests still unprocessed after {} attempts",
                        unprocessed.len(),
                        attempt
                    );
                    unprocessed_out.extend(unprocessed);
                    break;
                }
                tokio::time::sleep(Duration::from_millis(
                    self.batch_base_delay_ms * attempt as u64,
                ))
                .await;
                pending = unprocessed;
            }
        }
        Ok(BatchWriteResult {
            unprocessed: unprocessed_out,
        })
    }

    /// Issues `total_segments` concurrent parallel scans and merges their
    /// results. `total_segments` must be in `1..=1_000_000`.
    pub async fn scan_all_segments(&self, total_segments: u32) -> Result<Vec<T>, ExecutorError> {
        if !(1..=1_000_000).contains(&total_segments) {
            return Err(ExecutorError::Transport {
                message: format!("total_segments must be 1..=1_000_000, got {total_segments}"),
                retriable: false,
            });
        }

        let mut tasks = Vec::with_capacity(total_segments as usize);
        for segment in 0..total_segments {
            let model = self.clone();
            tasks.push(tokio::spawn(async move {
                model.scan_segment(segment, total_segments).await
            }));
        }

        let mut merged = Vec::new();
        for task in tasks {
            let segment_items = task
                .await
                .map_err(|e| ExecutorError::Transport {
                    message: format!("parallel scan segment task panicked: {e}"),
                    retriable: false,
                })??;
            merged.extend(segment_items);
        }
        Ok(merged)
    }

    async fn scan_segment(&self, segment: u32, total_segments: u32) -> Result<Vec<T>, ExecutorError> {
        self.ensure_encryption_configured()?;
        let mut items = Vec::new();
        let mut exclusive_start_key = None;
        loop {
            let input = ScanInput::builder()
                .table_name(self.metadata.table_name.clone())
                .segment(segment as i32)
                .total_segments(total_segments as i32)
                .set_exclusive_start_key(exclusive_start_key.clone())
                .build()
                .map_err(build_error)?;

            let output = self
                .transport
                .scan(input)
                .await
                .map_err(|e| normalize_transport_error(&e.code, e.message, false))?;

            for wire_item in output.items().unwrap_or_default().iter().cloned() {
                let mut item = map_from_wire(wire_item);
                self.decrypt_item(&mut item).await?;
                items.push(unmarshal_item(item, &self.metadata)?);
            }

            exclusive_start_key = output.last_evaluated_key().cloned();
            if exclusive_start_key.is_none() {
                break;
            }
        }
        Ok(items)
    }
}

fn build_error(err: impl std::fmt::Display) -> ExecutorError {
    ExecutorError::Transport {
        message: err.to_string(),
        retriable: false,
    }
}

/// Accumulates `Where`/`Filter`/`Index`/`OrderBy`/`Limit`/`Cursor` calls before
/// asking [`crate::planner::plan_query`] to choose an access mode.
pub struct QueryBuilder<T> {
    model: Model<T>,
    predicates: Vec<Predicate>,
    values: HashMap<String, Vec<AttributeValue>>,
    index_hint: Option<String>,
    order_by: Option<(String, SortDirection)>,
    consistent_read: bool,
    limit: Option<i32>,
    cursor: Option<String>,
}

impl<T> QueryBuilder<T>
where
    T: DynamormTable + Any + Default + Send + Sync,
{
    fn new(model: Model<T>) -> Self {
        Self {
            model,
            predicates: Vec::new(),
            values: HashMap::new(),
            index_hint: None,
            order_by: None,
            consistent_read: false,
            limit: None,
            cursor: None,
        }
    }

    /// `field` may be either the record's Rust field name or its wire attribute
    /// name; it is resolved to the canonical field name the planner matches
    /// index candidates against.
    pub fn where_(
        mut self,
        field: &str,
        operator: Operator,
        values: Vec<AttributeValue>,
    ) -> Result<Self, ExecutorError> {
        let resolved = self.resolve_field(field)?;
        self.predicates.push(Predicate {
            field: resolved.to_string(),
            operator,
        });
        self.values.insert(resolved.to_string(), values);
        Ok(self)
    }

    fn resolve_field(&self, field: &str) -> Result<&'static str, ExecutorError> {
        self.model
            .metadata
            .field(field)
            .or_else(|| self.model.metadata.field_by_wire_name(field))
            .map(|f| f.name)
            .ok_or_else(|| {
                crate::error::ModelError {
                    type_name: self.model.metadata.type_name,
                    reason: format!("no such field `{field}`"),
                }
                .into()
            })
    }

    pub fn index(mut self, name: impl Into<String>) -> Self {
        self.index_hint = Some(name.into());
        self
    }

    pub fn order_by(mut self, field: &str, direction: SortDirection) -> Result<Self, ExecutorError> {
        let resolved = self.resolve_field(field)?;
        self.order_by = Some((resolved.to_string(), direction));
        Ok(self)
    }

    pub fn consistent_read(mut self) -> Self {
        self.consistent_read = true;
        self
    }

    pub fn limit(mut self, limit: i32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    fn build_expression(&self) -> Result<crate::expr::BuiltExpression, ExecutorError> {
        let metadata = &self.model.metadata;
        let plan_request = PlanRequest {
            predicates: &self.predicates,
            index_hint: self.index_hint.as_deref(),
            order_by: self
                .order_by
                .as_ref()
                .map(|(f, d)| (f.as_str(), *d)),
            consistent_read: self.consistent_read,
        };
        let plan = plan_query(metadata, plan_request)?;

        let mut b = ExpressionBuilder::new();
        for predicate in &self.predicates {
            let field = metadata.field(&predicate.field).ok_or_else(|| {
                ExecutorError::from(crate::error::ModelError {
                    type_name: metadata.type_name,
                    reason: format!("no such field `{}`", predicate.field),
                })
            })?;
            let values = self.values.get(&predicate.field).cloned().unwrap_or_default();
            let for_key = plan.mode == AccessMode::Query
                && (predicate.field == metadata.pk_field().name
                    || metadata
                        .sk_field()
                        .is_some_and(|f| predicate.field == f.name));
            b.add_condition(field.wire_name.as_ref(), predicate.operator, values, for_key)?;
        }
        Ok(b.build())
    }

    /// Fetches records per `fetch` (`All`/`First`/`AllPaginated`).
    pub async fn send(self, fetch: Fetch) -> Result<Page<T>, ExecutorError> {
        self.model.ensure_encryption_configured()?;

        let metadata = self.model.metadata.clone();
        let plan_request = PlanRequest {
            predicates: &self.predicates,
            index_hint: self.index_hint.as_deref(),
            order_by: self.order_by.as_ref().map(|(f, d)| (f.as_str(), *d)),
            consistent_read: self.consistent_read,
        };
        let plan = plan_query(&metadata, plan_request)?;
        let built = self.build_expression()?;

        let mut exclusive_start_key = match &self.cursor {
            Some(s) => Some(map_to_wire(crate::cursor::decode_cursor(s)?.last_evaluated_key)),
            None => None,
        };

        let limit = match fetch {
            Fetch::First => Some(1),
            _ => self.limit,
        };

        let mut items = Vec::new();
        let mut scanned_count = 0i32;
        let mut last_evaluated_key = None;

        loop {
            let (wire_items, page_scanned, next_key) = if plan.mode == AccessMode::Query {
                let input = QueryInput::builder()
                    .table_name(metadata.table_name.clone())
                    .set_index_name(plan.index_name.clone())
                    .set_key_condition_expression(built.key_expr.clone())
                    .set_filter_expression(built.filter_expr.clone())
                    .set_expression_attribute_names(
                        (!built.names.is_empty()).then(|| built.names.clone()),
                    )
                    .set_expression_attribute_values(
                        (!built.values.is_empty())
                            .then(|| map_to_wire(built.values.clone())),
                    )
                    .scan_index_forward(plan.scan_forward)
                    .consistent_read(plan.consistent_read)
                    .set_limit(limit)
                    .set_exclusive_start_key(exclusive_start_key.clone())
                    .build()
                    .map_err(build_error)?;

                let output = self
                    .model
                    .transport
                    .query(input)
                    .await
                    .map_err(|e| normalize_transport_error(&e.code, e.message, false))?;

                (
                    output.items().unwrap_or_default().to_vec(),
                    output.scanned_count(),
                    output.last_evaluated_key().cloned(),
                )
            } else {
                let input = ScanInput::builder()
                    .table_name(metadata.table_name.clone())
                    .set_index_name(plan.index_name.clone())
                    .set_filter_expression(built.filter_expr.clone())
                    .set_expression_attribute_names(
                        (!built.names.is_empty()).then(|| built.names.clone()),
                    )
                    .set_expression_attribute_values(
                        (!built.values.is_empty())
                            .then(|| map_to_wire(built.values.clone())),
                    )
                    .set_limit(limit)
                    .set_exclusive_start_key(exclusive_start_key.clone())
                    .build()
                    .map_err(build_error)?;

                let output = self
                    .model
                    .transport
                    .scan(input)
                    .await
                    .map_err(|e| normalize_transport_error(&e.code, e.message, false))?;

                (
                    output.items().unwrap_or_default().to_vec(),
                    output.scanned_count(),
                    output.last_evaluated_key().cloned(),
                )
            };

            scanned_count += page_scanned;
            for wire_item in wire_items {
                let mut item = map_from_wire(wire_item);
                self.model.decrypt_item(&mut item).await?;
                items.push(unmarshal_item(item, &metadata)?);
            }

            last_evaluated_key = next_key;

            match fetch {
                Fetch::All if last_evaluated_key.is_some() => {
                    exclusive_start_key = last_evaluated_key.clone();
                    continue;
                }
                _ => break,
            }
        }

        let next_cursor = last_evaluated_key.map(|lek| {
            crate::cursor::encode_cursor(&crate::cursor::Cursor {
                last_evaluated_key: map_from_wire(lek),
                index_name: plan.index_name.clone(),
                direction: if plan.scan_forward {
                    crate::cursor::CursorDirection::Ascending
                } else {
                    crate::cursor::CursorDirection::Descending
                },
            })
        });

        Ok(Page {
            items,
            next_cursor,
            scanned_count,
        })
    }

    pub async fn count(self) -> Result<i64, ExecutorError> {
        Ok(self.send(Fetch::All).await?.items.len() as i64)
    }
}

/// Low-level update builder: accumulates SET/REMOVE/ADD/DELETE clauses, then
/// renders and sends a single `UpdateItem`. [`Model::update`] is a convenience
/// wrapper over this for the common "set a list of fields" case.
pub struct UpdateBuilder<T> {
    model: Model<T>,
    key: PrimaryKey,
    expected_version: Option<i64>,
    sets: Vec<(String, AttributeValue)>,
    set_if_not_exists: Vec<(String, AttributeValue)>,
    removes: Vec<String>,
    adds: Vec<(String, AttributeValue)>,
    deletes: Vec<(String, AttributeValue)>,
}

impl<T> UpdateBuilder<T>
where
    T: DynamormTable + Any + Default + Send + Sync,
{
    fn new(model: Model<T>, key: PrimaryKey) -> Self {
        Self {
            model,
            key,
            expected_version: None,
            sets: Vec::new(),
            set_if_not_exists: Vec::new(),
            removes: Vec::new(),
            adds: Vec::new(),
            deletes: Vec::new(),
        }
    }

    pub fn expected_version(mut self, version: i64) -> Self {
        self.expected_version = Some(version);
        self
    }

    pub fn set(mut self, field: &str, value: AttributeValue) -> Result<Self, ExecutorError> {
        let wire_name = self.wire_name(field)?;
        self.sets.push((wire_name, value));
        Ok(self)
    }

    pub fn set_if_not_exists(
        mut self,
        field: &str,
        default: AttributeValue,
    ) -> Result<Self, ExecutorError> {
        let wire_name = self.wire_name(field)?;
        self.set_if_not_exists.push((wire_name, default));
        Ok(self)
    }

    pub fn remove(mut self, field: &str) -> Result<Self, ExecutorError> {
        let wire_name = self.wire_name(field)?;
        self.removes.push(wire_name);
        Ok(self)
    }

    /// `ADD`/`DELETE` clauses are refused outright for an `encrypted` attribute,
    /// with no exception for set-typed attributes: the envelope is an opaque
    /// blob and DynamoDB's numeric/set ADD semantics have no meaning over it.
    pub fn add(mut self, field: &str, value: AttributeValue) -> Result<Self, ExecutorError> {
        let wire_name = self.unencrypted_wire_name(field)?;
        self.adds.push((wire_name, value));
        Ok(self)
    }

    pub fn delete(mut self, field: &str, value: AttributeValue) -> Result<Self, ExecutorError> {
        let wire_name = self.unencrypted_wire_name(field)?;
        self.deletes.push((wire_name, value));
        Ok(self)
    }

    fn field(&self, field: &str) -> Result<&crate::registry::FieldMetadata, ExecutorError> {
        let f = self
            .model
            .metadata
            .field(field)
            .or_else(|| self.model.metadata.field_by_wire_name(field))
            .ok_or_else(|| {
                crate::error::ModelError {
                    type_name: self.model.metadata.type_name,
                    reason: format!("no such field `{field}`"),
                }
            })?;
        if f.is_pk || f.is_sk || f.is_created_at || f.is_version {
            return Err(crate::error::ExpressionError::InvalidField(
                field.to_string(),
                "pk/sk/created_at/version fields cannot be modified through update()",
            )
            .into());
        }
        Ok(f)
    }

    fn wire_name(&self, field: &str) -> Result<String, ExecutorError> {
        Ok(self.field(field)?.wire_name.to_string())
    }

    fn unencrypted_wire_name(&self, field: &str) -> Result<String, ExecutorError> {
        let f = self.field(field)?;
        if f.is_encrypted {
            return Err(crate::error::ModelError {
                type_name: self.model.metadata.type_name,
                reason: format!("field `{field}` is encrypted; ADD/DELETE are not supported on it"),
            }
            .into());
        }
        Ok(f.wire_name.to_string())
    }

    pub async fn execute(self) -> Result<(), ExecutorError> {
        self.model.ensure_encryption_configured()?;
        let metadata = self.model.metadata.clone();

        let mut b = ExpressionBuilder::new();
        for (wire_name, value) in &self.sets {
            b.add_update_set(wire_name, value.clone())?;
        }
        for (wire_name, default) in &self.set_if_not_exists {
            b.add_update_set_if_not_exists(wire_name, default.clone())?;
        }
        for wire_name in &self.removes {
            b.add_update_remove(wire_name)?;
        }
        for (wire_name, value) in &self.adds {
            b.add_update_add(wire_name, value.clone())?;
        }
        for (wire_name, value) in &self.deletes {
            b.add_update_delete(wire_name, value.clone())?;
        }

        if let Some(updated_at) = metadata.updated_at_field {
            b.add_update_set(
                metadata.fields[updated_at].wire_name.as_ref(),
                AttributeValue::S(crate::marshal::rfc3339_now()),
            )?;
        }

        let expected_version = if let Some(version_field) = metadata.version_field {
            let expected = self.expected_version.ok_or(ExecutorError::ZeroVersion)?;
            if expected == 0 {
                return Err(ExecutorError::ZeroVersion);
            }
            b.add_update_add(
                metadata.fields[version_field].wire_name.as_ref(),
                AttributeValue::n(1i64),
            )?;
            b.add_condition_check(
                metadata.fields[version_field].wire_name.as_ref(),
                Operator::Eq,
                vec![AttributeValue::n(expected)],
            )?;
            Some(expected)
        } else {
            None
        };
        let _ = expected_version;

        let mut built = b.build();

        let pending = crypto::find_pending_encryptions(
            built.update_expr.as_deref().unwrap_or(""),
            &built.names,
            &metadata,
        )?;
        if !pending.is_empty() {
            let provider = self
                .model
                .key_provider
                .as_ref()
                .ok_or(CryptoError::EncryptionNotConfigured)?;
            let mut resolved = Vec::with_capacity(pending.len());
            for p in pending {
                let plaintext = built
                    .values
                    .get(&p.value_placeholder)
                    .cloned()
                    .ok_or_else(|| crate::error::MarshalError::Decode(p.value_placeholder.clone()))?;
                let envelope = crypto::encrypt_av(
                    &p.attr_name,
                    &plaintext,
                    self.model.key_ref(),
                    provider.as_ref(),
                )
                .await?;
                resolved.push((p, envelope));
            }
            crypto::apply_encrypted_values(&mut built.values, resolved);
        }

        let key_map = key_attribute_map(&metadata, &self.key)?;

        let input = UpdateItemInput::builder()
            .table_name(metadata.table_name.clone())
            .set_key(Some(map_to_wire(key_map)))
            .set_update_expression(built.update_expr)
            .set_condition_expression(built.condition_expr)
            .set_expression_attribute_names((!built.names.is_empty()).then_some(built.names))
            .set_expression_attribute_values(
                (!built.values.is_empty()).then(|| map_to_wire(built.values)),
            )
            .build()
            .map_err(build_error)?;

        self.model
            .transport
            .update_item(input)
            .await
            .map_err(|e| normalize_transport_error(&e.code, e.message, false))?;
        Ok(())
    }
}

/// One action inside a [`TransactBuilder`] transaction.
enum TransactAction {
    Put {
        table_name: String,
        item: AttributeMap,
        condition_expr: Option<String>,
        names: HashMap<String, String>,
        values: HashMap<String, AttributeValue>,
    },
    Delete {
        table_name: String,
        key: AttributeMap,
        condition_expr: Option<String>,
        names: HashMap<String, String>,
        values: HashMap<String, AttributeValue>,
    },
    ConditionCheck {
        table_name: String,
        key: AttributeMap,
        condition_expr: String,
        names: HashMap<String, String>,
        values: HashMap<String, AttributeValue>,
    },
}

/// Accumulates up to 100 put/delete/condition-check actions across one or more
/// models, then sends a single `TransactWriteItems` call.
#[derive(Default)]
pub struct TransactBuilder {
    actions: Vec<TransactAction>,
}

impl TransactBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put<T: DynamormTable + Any>(
        mut self,
        metadata: &Metadata,
        record: &T,
    ) -> Result<Self, ExecutorError> {
        let item = marshal_item(record, metadata, true);
        self.actions.push(TransactAction::Put {
            table_name: metadata.table_name.clone(),
            item,
            condition_expr: None,
            names: HashMap::new(),
            values: HashMap::new(),
        });
        Ok(self)
    }

    pub fn delete(mut self, metadata: &Metadata, key: PrimaryKey) -> Result<Self, ExecutorError> {
        let key_map = key_attribute_map(metadata, &key)?;
        self.actions.push(TransactAction::Delete {
            table_name: metadata.table_name.clone(),
            key: key_map,
            condition_expr: None,
            names: HashMap::new(),
            values: HashMap::new(),
        });
        Ok(self)
    }

    /// Conditions the most recently added put/delete action on `field operator
    /// value`, e.g. the optimistic-concurrency check for an `update`-style action.
    pub fn condition(
        mut self,
        field: &str,
        operator: Operator,
        values: Vec<AttributeValue>,
    ) -> Result<Self, ExecutorError> {
        let mut b = ExpressionBuilder::new();
        b.add_condition_check(field, operator, values)?;
        let built = b.build();

        match self.actions.last_mut() {
            Some(TransactAction::Put {
                condition_expr,
                names,
                values,
                ..
            })
            | Some(TransactAction::Delete {
                condition_expr,
                names,
                values,
                ..
            }) => {
                *condition_expr = built.condition_expr;
                *names = built.names;
                *values = built.values;
            }
            _ => {
                return Err(crate::error::ModelError {
                    type_name: "TransactBuilder",
                    reason: "condition() must follow a put() or delete()".to_string(),
                }
                .into())
            }
        }
        Ok(self)
    }

    /// A standalone `ConditionCheck` action that does not itself write.
    pub fn condition_check(
        mut self,
        metadata: &Metadata,
        key: PrimaryKey,
        field: &str,
        operator: Operator,
        values: Vec<AttributeValue>,
    ) -> Result<Self, ExecutorError> {
        let key_map = key_attribute_map(metadata, &key)?;
        let mut b = ExpressionBuilder::new();
        b.add_condition_check(field, operator, values)?;
        let built = b.build();
        self.actions.push(TransactAction::ConditionCheck {
            table_name: metadata.table_name.clone(),
            key: key_map,
            condition_expr: built
                .condition_expr
                .expect("add_condition_check always produces a condition_expr"),
            names: built.names,
            values: built.values,
        });
        Ok(self)
    }

    /// Sends all accumulated actions as one `TransactWriteItems` call. Up to 100
    /// actions; DynamoDB either applies all of them or none.
    pub async fn execute(self, client: &Client) -> Result<(), ExecutorError> {
        let transport = client.transport();
        let transport = transport.as_ref();
        if self.actions.len() > 100 {
            return Err(ExecutorError::Transport {
                message: format!(
                    "transact_write_items accepts at most 100 actions, got {}",
                    self.actions.len()
                ),
                retriable: false,
            });
        }

        let mut kinds = Vec::with_capacity(self.actions.len());
        let mut items = Vec::with_capacity(self.actions.len());

        for action in self.actions {
            let item = match action {
                TransactAction::Put {
                    table_name,
                    item,
                    condition_expr,
                    names,
                    values,
                } => {
                    kinds.push("Put".to_string());
                    TransactWriteItem::builder()
                        .put(
                            Put::builder()
                                .table_name(table_name)
                                .set_item(Some(map_to_wire(item)))
                                .set_condition_expression(condition_expr)
                                .set_expression_attribute_names(
                                    (!names.is_empty()).then_some(names),
                                )
                                .set_expression_attribute_values(
                                    (!values.is_empty()).then(|| map_to_wire(values)),
                                )
                                .build()
                                .map_err(build_error)?,
                        )
                        .build()
                }
                TransactAction::Delete {
                    table_name,
                    key,
                    condition_expr,
                    names,
                    values,
                } => {
                    kinds.push("Delete".to_string());
                    TransactWriteItem::builder()
                        .delete(
                            Delete::builder()
                                .table_name(table_name)
                                .set_key(Some(map_to_wire(key)))
                                .set_condition_expression(condition_expr)
                                .set_expression_attribute_names(
                                    (!names.is_empty()).then_some(names),
                                )
                                .set_expression_attribute_values(
                                    (!values.is_empty()).then(|| map_to_wire(values)),
                                )
                                .build()
                                .map_err(build_error)?,
                        )
                        .build()
                }
                TransactAction::ConditionCheck {
                    table_name,
                    key,
                    condition_expr,
                    names,
                    values,
                } => {
                    kinds.push("ConditionCheck".to_string());
                    TransactWriteItem::builder()
                        .condition_check(
                            aws_sdk_dynamodb::types::ConditionCheck::builder()
                                .table_name(table_name)
                                .set_key(Some(map_to_wire(key)))
                                .condition_expression(condition_expr)
                                .set_expression_attribute_names(
                                    (!names.is_empty()).then_some(names),
                                )
                                .set_expression_attribute_values(
                                    (!values.is_empty()).then(|| map_to_wire(values)),
                                )
                                .build()
                                .map_err(build_error)?,
                        )
                        .build()
                }
            };
            items.push(item);
        }

        let input = TransactWriteItemsInput::builder()
            .set_transact_items(Some(items))
            .build()
            .map_err(build_error)?;

        transport.transact_write_items(input).await.map_err(|e| {
            if let Some(reasons) = e.cancellation_reasons {
                for (index, reason_code) in reasons.iter().enumerate() {
                    if reason_code != "None" {
                        return crate::error::TransactionError(TransactionFailure {
                            operation_index: index,
                            operation_kind: kinds.get(index).cloned().unwrap_or_default(),
                            reason_code: reason_code.clone(),
                        })
                        .into();
                    }
                }
            }
            normalize_transport_error(&e.code, e.message, false)
        })?;
        Ok(())
    }
}

/// Reads a list of keys in one `TransactGetItems` call, in request order.
pub async fn transact_get<T>(
    model: &Model<T>,
    keys: Vec<PrimaryKey>,
) -> Result<Vec<Option<T>>, ExecutorError>
where
    T: DynamormTable + Any + Default + Send + Sync,
{
    if keys.len() > 100 {
        return Err(ExecutorError::Transport {
            message: format!(
                "transact_get_items accepts at most 100 keys, got {}",
                keys.len()
            ),
            retriable: false,
        });
    }
    model.ensure_encryption_configured()?;

    let items: Vec<TransactGetItem> = keys
        .iter()
        .map(|k| key_attribute_map(&model.metadata, k))
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|key| {
            TransactGetItem::builder()
                .get(
                    Get::builder()
                        .table_name(model.metadata.table_name.clone())
                        .set_key(Some(map_to_wire(key)))
                        .build()
                        .expect("Get requires only `table_name`/`key`, both always set"),
                )
                .build()
        })
        .collect();

    let input = TransactGetItemsInput::builder()
        .set_transact_items(Some(items))
        .build()
        .map_err(build_error)?;

    let output = model
        .transport
        .transact_get_items(input)
        .await
        .map_err(|e| normalize_transport_error(&e.code, e.message, false))?;

    let mut out = Vec::new();
    for response in output.responses().unwrap_or_default() {
        match response.item().cloned() {
            Some(wire_item) => {
                let mut item = map_from_wire(wire_item);
                model.decrypt_item(&mut item).await?;
                out.push(Some(unmarshal_item(item, &model.metadata)?));
            }
            None => out.push(None),
        }
    }
    Ok(out)
}
