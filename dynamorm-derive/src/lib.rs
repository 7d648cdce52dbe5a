//! `#[derive(DynamormTable)]` - reads the `#[dynamorm(...)]` container/field
//! attributes and the `#[pk]`/`#[sk]`/`#[version]`/`#[ttl]`/`#[created_at]`/
//! `#[updated_at]`/`#[encrypted]` field markers, and emits an
//! `impl dynamorm::registry::DynamormTable` that builds the record's
//! `Metadata` at first use - the compile-time stand-in for runtime reflection.

extern crate proc_macro2;
extern crate quote;
extern crate syn;

mod codegen;
mod settings;

use proc_macro::TokenStream;
use syn::{parse_macro_input, DeriveInput};

#[proc_macro_derive(
    DynamormTable,
    attributes(dynamorm, pk, sk, version, ttl, created_at, updated_at, encrypted)
)]
pub fn derive_dynamorm_table(input: TokenStream) -> TokenStream {
    codegen::derive_dynamorm_table(parse_macro_input!(input as DeriveInput))
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}
