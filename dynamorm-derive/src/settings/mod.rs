//! Parsed `#[dynamorm(...)]` / `#[pk]` / ... attributes for one record type.
//!
//! `builder.rs` walks the `syn::DeriveInput` and accumulates clauses; this
//! module holds the result and the bits of domain logic (index grouping,
//! table name derivation) `codegen.rs` needs.

pub(crate) mod builder;

use indexmap::IndexMap;
use syn::Ident;

pub(crate) use builder::SettingsBuilder;

/// Which side of an index a field participates as. Mirrors
/// `dynamorm::registry::IndexRole` - kept separate since the derive crate
/// cannot depend on the runtime crate it generates code for.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum IndexRole {
    Partition,
    Sort,
}

/// Mirrors `dynamorm::registry::IndexKind`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum IndexKind {
    Global,
    Local,
}

pub(crate) struct IndexSpec {
    pub kind: IndexKind,
    pub pk_part: Option<Ident>,
    pub sk_part: Option<Ident>,
}

pub(crate) struct FieldSettings {
    pub ident: Ident,
    pub name: String,
    pub wire_name: String,
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
    /// `(index name, role, kind)` tuples this field participates in.
    pub index_participation: Vec<(String, IndexRole, IndexKind)>,
}

pub(crate) struct Settings {
    pub ident: Ident,
    pub type_name: String,
    pub table_name: Option<String>,
    pub fields: Vec<FieldSettings>,
}

impl Settings {
    pub(crate) fn builder(input: &syn::DeriveInput) -> SettingsBuilder {
        SettingsBuilder::new(input)
    }

    /// Explicit `#[dynamorm(table = "...")]`, else the type name
    /// snake_cased and pluralized.
    pub(crate) fn table_name(&self) -> String {
        self.table_name
            .clone()
            .unwrap_or_else(|| pluralize(&to_snake_case(&self.type_name)))
    }

    /// Groups per-field index participation into named index specs, in
    /// first-declared order (`IndexMap` preserves insertion order so the
    /// generated `Vec<IndexSchema>` is deterministic across builds).
    pub(crate) fn indexes(&self) -> Result<IndexMap<String, IndexSpec>, syn::Error> {
        let mut out: IndexMap<String, IndexSpec> = IndexMap::new();

        for field in &self.fields {
            for (name, role, kind) in &field.index_participation {
                let spec = out.entry(name.clone()).or_insert_with(|| IndexSpec {
                    kind: *kind,
                    pk_part: None,
                    sk_part: None,
                });
                if spec.kind != *kind {
                    return Err(syn::Error::new_spanned(
                        &field.ident,
                        format!("index `{name}` declared with conflicting `kind` values"),
                    ));
                }
                match role {
                    IndexRole::Partition => {
                        if spec.pk_part.is_some() {
                            return Err(syn::Error::new_spanned(
                                &field.ident,
                                format!("index `{name}` already has a partition-key field"),
                            ));
                        }
                        spec.pk_part = Some(field.ident.clone());
                    }
                    IndexRole::Sort => {
                        if spec.sk_part.is_some() {
                            return Err(syn::Error::new_spanned(
                                &field.ident,
                                format!("index `{name}` already has a sort-key field"),
                            ));
                        }
                        spec.sk_part = Some(field.ident.clone());
                    }
                }
            }
        }

        for (name, spec) in &out {
            if spec.pk_part.is_none() && spec.kind == IndexKind::Global {
                return Err(syn::Error::new_spanned(
                    &self.ident,
                    format!("index `{name}` has no field with role = \"pk\" (required unless kind = \"lsi\")"),
                ));
            }
        }

        Ok(out)
    }
}

fn to_snake_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() {
            if i != 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn pluralize(s: &str) -> String {
    if s.ends_with('s') {
        s.to_string()
    } else {
        format!("{s}s")
    }
}
