//! Emits `impl dynamorm::registry::DynamormTable for #ident` from parsed
//! [`Settings`].
//!
//! One `quote!` template assembling per-field fragments built in a `.map()`
//! over `settings.fields`/`settings.indexes()`.

use proc_macro2::TokenStream;
use quote::quote;
use syn::DeriveInput;

use crate::settings::{FieldSettings, IndexKind as ParsedIndexKind, Settings};

pub(crate) fn derive_dynamorm_table(input: DeriveInput) -> syn::Result<TokenStream> {
    let settings = Settings::builder(&input)
        .container_attributes(&input)?
        .field_attributes(&input)?
        .build()?;

    let ident = settings.ident.clone();
    let type_name = settings.type_name.clone();
    let table_name = settings.table_name();

    let pk_position = settings
        .fields
        .iter()
        .position(|f| f.is_pk)
        .expect("build() already validated exactly one #[pk] field");

    let field_tokens: Vec<TokenStream> = settings
        .fields
        .iter()
        .map(|f| field_metadata_tokens(&ident, f))
        .collect::<Result<_, _>>()?;

    let indexes = settings.indexes()?;
    let field_position = |target: &syn::Ident| {
        settings
            .fields
            .iter()
            .position(|f| &f.ident == target)
            .expect("index field must be a declared struct field")
    };

    let index_tokens: Vec<TokenStream> = indexes
        .iter()
        .map(|(name, spec)| {
            let kind_tokens = match spec.kind {
                ParsedIndexKind::Global => quote! { ::dynamorm::registry::IndexKind::GlobalSecondary },
                ParsedIndexKind::Local => quote! { ::dynamorm::registry::IndexKind::LocalSecondary },
            };
            let pk_field = match &spec.pk_part {
                Some(ident) => field_position(ident),
                None => pk_position,
            };
            let sk_field_tokens = match &spec.sk_part {
                Some(ident) => {
                    let pos = field_position(ident);
                    quote! { Some(#pos) }
                }
                None => quote! { None },
            };
            quote! {
                ::dynamorm::registry::IndexSchema {
                    name: ::std::borrow::Cow::Borrowed(#name),
                    kind: #kind_tokens,
                    pk_field: #pk_field,
                    sk_field: #sk_field_tokens,
                }
            }
        })
        .collect();

    Ok(quote! {
        #[automatically_derived]
        impl ::dynamorm::registry::DynamormTable for #ident {
            fn type_name() -> &'static str {
                #type_name
            }

            fn build_metadata() -> ::dynamorm::registry::MetadataBuilder {
                ::dynamorm::registry::MetadataBuilder {
                    type_name: #type_name,
                    table_name: #table_name.to_string(),
                    fields: vec![#(#field_tokens,)*],
                    indexes: vec![#(#index_tokens,)*],
                }
            }
        }
    })
}

fn field_metadata_tokens(ident: &syn::Ident, field: &FieldSettings) -> syn::Result<TokenStream> {
    let field_ident = &field.ident;
    let name = &field.name;
    let wire_name = &field.wire_name;
    let is_pk = field.is_pk;
    let is_sk = field.is_sk;
    let is_version = field.is_version;
    let is_ttl = field.is_ttl;
    let is_created_at = field.is_created_at;
    let is_updated_at = field.is_updated_at;
    let is_encrypted = field.is_encrypted;
    let is_set = field.is_set;
    let is_json = field.is_json;
    let omit_empty = field.omit_empty;
    let is_sparse = field.is_sparse;

    if field.is_set && field.is_json {
        return Err(syn::Error::new_spanned(
            field_ident,
            "a field cannot be tagged both `set` and `json`",
        ));
    }

    let index_participation_tokens: Vec<TokenStream> = field
        .index_participation
        .iter()
        .map(|(name, role, _kind)| {
            let role_tokens = match role {
                crate::settings::IndexRole::Partition => {
                    quote! { ::dynamorm::registry::IndexRole::Partition }
                }
                crate::settings::IndexRole::Sort => {
                    quote! { ::dynamorm::registry::IndexRole::Sort }
                }
            };
            quote! { (::std::borrow::Cow::Borrowed(#name), #role_tokens) }
        })
        .collect();

    let getter = if field.is_set {
        quote! { ::dynamorm::attribute_value::ToAttributeSet::to_attribute_set(&this.#field_ident) }
    } else if field.is_json {
        quote! { ::dynamorm::attribute_value::to_json_attribute(&this.#field_ident) }
    } else {
        quote! { ::dynamorm::attribute_value::ToAttributeValue::to_attribute_value(&this.#field_ident) }
    };

    let setter = if field.is_set {
        quote! { ::dynamorm::attribute_value::FromAttributeSet::from_attribute_set(v)? }
    } else if field.is_json {
        quote! { ::dynamorm::attribute_value::from_json_attribute(v)? }
    } else {
        quote! { ::dynamorm::attribute_value::FromAttributeValue::from_attribute_value(v)? }
    };

    let downcast_err = format!("dynamorm: downcast to `{ident}` failed");

    Ok(quote! {
        ::dynamorm::registry::FieldMetadata {
            name: #name,
            wire_name: ::std::borrow::Cow::Borrowed(#wire_name),
            is_pk: #is_pk,
            is_sk: #is_sk,
            is_version: #is_version,
            is_ttl: #is_ttl,
            is_created_at: #is_created_at,
            is_updated_at: #is_updated_at,
            is_encrypted: #is_encrypted,
            is_set: #is_set,
            is_json: #is_json,
            omit_empty: #omit_empty,
            is_sparse: #is_sparse,
            index_participation: vec![#(#index_participation_tokens,)*],
            get: |r: &dyn ::core::any::Any| -> ::dynamorm::attribute_value::AttributeValue {
                let this = r.downcast_ref::<#ident>().expect(#downcast_err);
                #getter
            },
            set: |r: &mut dyn ::core::any::Any, v: ::dynamorm::attribute_value::AttributeValue| -> ::std::result::Result<(), ::std::string::String> {
                let this = r.downcast_mut::<#ident>().expect(#downcast_err);
                this.#field_ident = #setter;
                Ok(())
            },
        }
    })
}
