//! Schema registry.
//!
//! Rust has no runtime field reflection, so the derive macro in `dynamorm-derive`
//! does the reflective work at *compile* time: it reads the `#[dynamorm(...)]` /
//! `#[pk]` / `#[sk]` / ... attributes on a struct and emits a `build_metadata()`
//! function returning a fully-populated [`Metadata`]. [`SchemaRegistry`] still
//! owns the runtime side of the contract - memoizing that `Metadata` per type on
//! first use and exposing it by table name - so call sites in [`crate::executor`]
//! see one stable interface regardless of record type.

use std::any::{Any, TypeId};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use crate::attribute_value::AttributeValue;
use crate::error::ModelError;

/// Which side of a (possibly composite) index a field participates as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexRole {
    Partition,
    Sort,
}

/// `GlobalSecondary` (GSI) or `LocalSecondary` (LSI).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    GlobalSecondary,
    LocalSecondary,
}

/// A named secondary index over a record type.
#[derive(Debug, Clone)]
pub struct IndexSchema {
    pub name: Cow<'static, str>,
    pub kind: IndexKind,
    /// Index into `Metadata::fields` for the index's partition key.
    pub pk_field: usize,
    /// Index into `Metadata::fields`, if this index has a sort key.
    pub sk_field: Option<usize>,
}

/// Everything the rest of the crate needs to know about one field of a record
/// type, captured at derive-macro expansion time.
///
/// `get`/`set` are the compile-time stand-in for reflective field access: the
/// derive macro generates a small closure per field that downcasts the `&dyn Any`
/// to the concrete record type and reads or writes that one field.
pub struct FieldMetadata {
    pub name: &'static str,
    pub wire_name: Cow<'static, str>,
    pub is_pk: bool,
    pub is_sk: bool,
    pub is_version: bool,
    pub is_ttl: bool,
    pub is_created_at: bool,
    pub is_updated_at: bool,
    pub is_encrypted: bool,
    pub is_set: bool,
    pub is_json: bool,
    pub omit_empty: bool,
    pub is_sparse: bool,
    pub index_participation: Vec<(Cow<'static, str>, IndexRole)>,
    pub get: fn(&dyn Any) -> AttributeValue,
    pub set: fn(&mut dyn Any, AttributeValue) -> Result<(), String>,
}

impl std::fmt::Debug for FieldMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldMetadata")
            .field("name", &self.name)
            .field("wire_name", &self.wire_name)
            .field("is_pk", &self.is_pk)
            .field("is_sk", &self.is_sk)
            .field("is_encrypted", &self.is_encrypted)
            .finish_non_exhaustive()
    }
}

/// The registry's cached, immutable-after-construction description of a record
/// type. Built once by the derive macro's `build_metadata()` and memoized by
/// [`SchemaRegistry`] for the life of the process.
#[derive(Debug)]
pub struct Metadata {
    pub type_name: &'static str,
    pub table_name: String,
    pub fields: Vec<FieldMetadata>,
    pub fields_by_name: HashMap<&'static str, usize>,
    pub fields_by_wire_name: HashMap<String, usize>,
    pub pk: usize,
    pub sk: Option<usize>,
    pub indexes: Vec<IndexSchema>,
    pub version_field: Option<usize>,
    pub ttl_field: Option<usize>,
    pub created_at_field: Option<usize>,
    pub updated_at_field: Option<usize>,
    pub has_encrypted_fields: bool,
}

impl Metadata {
    pub fn field(&self, name: &str) -> Option<&FieldMetadata> {
        self.fields_by_name.get(name).map(|&i| &self.fields[i])
    }

    pub fn field_by_wire_name(&self, wire_name: &str) -> Option<&FieldMetadata> {
        self.fields_by_wire_name.get(wire_name).map(|&i| &self.fields[i])
    }

    pub fn index(&self, name: &str) -> Option<&IndexSchema> {
        self.indexes.iter().find(|i| i.name == name)
    }

    pub fn pk_field(&self) -> &FieldMetadata {
        &self.fields[self.pk]
    }

    pub fn sk_field(&self) -> Option<&FieldMetadata> {
        self.sk.map(|i| &self.fields[i])
    }
}

/// Raw, unvalidated metadata as produced by a derive-macro expansion. Validated
/// and promoted to [`Metadata`] by [`SchemaRegistry::register`].
pub struct MetadataBuilder {
    pub type_name: &'static str,
    pub table_name: String,
    pub fields: Vec<FieldMetadata>,
    pub indexes: Vec<IndexSchema>,
}

/// The trait every `#[derive(DynamormTable)]` type implements.
///
/// `build_metadata` is called exactly once per type, from
/// [`SchemaRegistry::register`]; its result is memoized behind the registry's
/// lock thereafter.
pub trait DynamormTable: Any + Send + Sync + 'static {
    fn type_name() -> &'static str
    where
        Self: Sized;

    fn build_metadata() -> MetadataBuilder
    where
        Self: Sized;
}

fn validate(builder: MetadataBuilder) -> Result<Metadata, ModelError> {
    let MetadataBuilder {
        type_name,
        table_name,
        fields,
        indexes,
    } = builder;

    let invalid = |reason: impl Into<String>| ModelError {
        type_name,
        reason: reason.into(),
    };

    let pk_candidates: Vec<usize> = fields
        .iter()
        .enumerate()
        .filter(|(_, f)| f.is_pk)
        .map(|(i, _)| i)
        .collect();
    if pk_candidates.len() != 1 {
        return Err(invalid(format!(
            "exactly one field must be tagged pk, found {}",
            pk_candidates.len()
        )));
    }
    let pk = pk_candidates[0];

    let sk_candidates: Vec<usize> = fields
        .iter()
        .enumerate()
        .filter(|(_, f)| f.is_sk)
        .map(|(i, _)| i)
        .collect();
    if sk_candidates.len() > 1 {
        return Err(invalid("at most one field may be tagged sk"));
    }
    let sk = sk_candidates.first().copied();

    for (flag_name, count) in [
        ("version", fields.iter().filter(|f| f.is_version).count()),
        ("ttl", fields.iter().filter(|f| f.is_ttl).count()),
        (
            "created_at",
            fields.iter().filter(|f| f.is_created_at).count(),
        ),
        (
            "updated_at",
            fields.iter().filter(|f| f.is_updated_at).count(),
        ),
    ] {
        if count > 1 {
            return Err(invalid(format!(
                "at most one field may be tagged {flag_name}, found {count}"
            )));
        }
    }

    let mut wire_names = std::collections::HashSet::new();
    for f in &fields {
        if !wire_names.insert(f.wire_name.clone()) {
            return Err(invalid(format!(
                "duplicate wire attribute name `{}`",
                f.wire_name
            )));
        }
        if f.is_encrypted {
            let key_or_role = f.is_pk
                || f.is_sk
                || f.is_version
                || f.is_ttl
                || f.is_created_at
                || f.is_updated_at
                || !f.index_participation.is_empty();
            if key_or_role {
                return Err(invalid(format!(
                    "field `{}` cannot be both encrypted and a key/role/index field",
                    f.name
                )));
            }
        }
    }

    for idx in &indexes {
        if idx.pk_field >= fields.len() || idx.sk_field.is_some_and(|i| i >= fields.len()) {
            return Err(invalid(format!(
                "index `{}` references a field out of range",
                idx.name
            )));
        }
    }

    let has_encrypted_fields = fields.iter().any(|f| f.is_encrypted);

    let mut fields_by_name = HashMap::new();
    let mut fields_by_wire_name = HashMap::new();
    for (i, f) in fields.iter().enumerate() {
        fields_by_name.insert(f.name, i);
        fields_by_wire_name.insert(f.wire_name.to_string(), i);
    }

    let version_field = fields.iter().position(|f| f.is_version);
    let ttl_field = fields.iter().position(|f| f.is_ttl);
    let created_at_field = fields.iter().position(|f| f.is_created_at);
    let updated_at_field = fields.iter().position(|f| f.is_updated_at);

    Ok(Metadata {
        type_name,
        table_name,
        fields,
        fields_by_name,
        fields_by_wire_name,
        pk,
        sk,
        indexes,
        version_field,
        ttl_field,
        created_at_field,
        updated_at_field,
        has_encrypted_fields,
    })
}

/// Process-wide registry of record-type [`Metadata`].
///
/// Read-biased: registration happens once per type, at or before first use;
/// lookups are the hot path thereafter.
pub struct SchemaRegistry {
    by_type: RwLock<HashMap<TypeId, Arc<Metadata>>>,
    by_table: RwLock<HashMap<String, Arc<Metadata>>>,
}

impl SchemaRegistry {
    fn new() -> Self {
        Self {
            by_type: RwLock::new(HashMap::new()),
            by_table: RwLock::new(HashMap::new()),
        }
    }

    /// The process-wide registry instance.
    pub fn global() -> &'static SchemaRegistry {
        static REGISTRY: OnceLock<SchemaRegistry> = OnceLock::new();
        REGISTRY.get_or_init(SchemaRegistry::new)
    }

    /// Registers `T`, building and validating its `Metadata` if this is the first
    /// call for this type. Idempotent.
    pub fn register<T: DynamormTable>(&self) -> Result<Arc<Metadata>, ModelError> {
        let type_id = TypeId::of::<T>();
        if let Some(existing) = self.by_type.read().unwrap().get(&type_id) {
            return Ok(existing.clone());
        }

        let metadata = Arc::new(validate(T::build_metadata())?);
        log::debug!(
            "registered record type `{}` -> table `{}`",
            metadata.type_name,
            metadata.table_name
        );

        self.by_type
            .write()
            .unwrap()
            .insert(type_id, metadata.clone());
        self.by_table
            .write()
            .unwrap()
            .insert(metadata.table_name.clone(), metadata.clone());

        Ok(metadata)
    }

    /// Returns `T`'s cached metadata, registering it on demand.
    pub fn metadata<T: DynamormTable>(&self) -> Result<Arc<Metadata>, ModelError> {
        self.register::<T>()
    }

    /// Looks up metadata by table name, if some type has already registered under it.
    pub fn metadata_by_table(&self, name: &str) -> Option<Arc<Metadata>> {
        self.by_table.read().unwrap().get(name).cloned()
    }
}
