//! Accumulates `#[dynamorm(...)]` / `#[pk]` / ... clauses into a [`Settings`].
//!
//! A chained builder
//! (`SettingsBuilder::new(...).container_attributes(...)?.field_attributes(...)?.build()?`)
//! that uses `attr.parse_nested_meta` closures for parsing attribute lists.

use syn::{Data, DeriveInput, Fields, Ident};

use super::{FieldSettings, IndexKind, IndexRole, Settings};

pub(crate) struct SettingsBuilder {
    ident: Ident,
    type_name: String,
    table_name: Option<String>,
    fields: Vec<FieldSettings>,
}

impl SettingsBuilder {
    pub(crate) fn new(input: &DeriveInput) -> Self {
        Self {
            ident: input.ident.clone(),
            type_name: input.ident.to_string(),
            table_name: None,
            fields: Vec::new(),
        }
    }

    /// Parses the struct-level `#[dynamorm(table = "...")]` attribute, if present.
    pub(crate) fn container_attributes(mut self, input: &DeriveInput) -> syn::Result<Self> {
        for attr in &input.attrs {
            if !attr.path().is_ident("dynamorm") {
                continue;
            }
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("table") {
                    let value = meta.value()?;
                    let lit: syn::LitStr = value.parse()?;
                    self.table_name = Some(lit.value());
                    Ok(())
                } else {
                    Err(meta.error("unrecognized `dynamorm` container clause"))
                }
            })?;
        }
        Ok(self)
    }

    /// Parses every field's marker attributes (`#[pk]`, `#[sk]`, ...) and its
    /// `#[dynamorm(...)]` clause list.
    pub(crate) fn field_attributes(mut self, input: &DeriveInput) -> syn::Result<Self> {
        let Data::Struct(data) = &input.data else {
            return Err(syn::Error::new_spanned(
                &input.ident,
                "DynamormTable can only be derived for structs",
            ));
        };
        let Fields::Named(named) = &data.fields else {
            return Err(syn::Error::new_spanned(
                &input.ident,
                "DynamormTable requires named fields",
            ));
        };

        for field in &named.named {
            let ident = field.ident.clone().expect("named field");
            let name = ident.to_string();

            let mut settings = FieldSettings {
                ident: ident.clone(),
                name: name.clone(),
                wire_name: name.clone(),
                is_pk: false,
                is_sk: false,
                is_version: false,
                is_ttl: false,
                is_created_at: false,
                is_updated_at: false,
                is_encrypted: false,
                is_set: false,
                is_json: false,
                omit_empty: false,
                is_sparse: false,
                index_participation: Vec::new(),
            };

            for attr in &field.attrs {
                if attr.path().is_ident("pk") {
                    settings.is_pk = true;
                } else if attr.path().is_ident("sk") {
                    settings.is_sk = true;
                } else if attr.path().is_ident("version") {
                    settings.is_version = true;
                } else if attr.path().is_ident("ttl") {
                    settings.is_ttl = true;
                } else if attr.path().is_ident("created_at") {
                    settings.is_created_at = true;
                } else if attr.path().is_ident("updated_at") {
                    settings.is_updated_at = true;
                } else if attr.path().is_ident("encrypted") {
                    settings.is_encrypted = true;
                } else if attr.path().is_ident("dynamorm") {
                    let mut index_name: Option<String> = None;
                    let mut role: Option<String> = None;
                    let mut kind: Option<String> = None;

                    attr.parse_nested_meta(|meta| {
                        if meta.path.is_ident("attr") {
                            let value = meta.value()?;
                            let lit: syn::LitStr = value.parse()?;
                            settings.wire_name = lit.value();
                        } else if meta.path.is_ident("set") {
                            settings.is_set = true;
                        } else if meta.path.is_ident("json") {
                            settings.is_json = true;
                        } else if meta.path.is_ident("omit_empty") {
                            settings.omit_empty = true;
                        } else if meta.path.is_ident("sparse") {
                            settings.is_sparse = true;
                        } else if meta.path.is_ident("index") {
                            let value = meta.value()?;
                            let lit: syn::LitStr = value.parse()?;
                            index_name = Some(lit.value());
                        } else if meta.path.is_ident("role") {
                            let value = meta.value()?;
                            let lit: syn::LitStr = value.parse()?;
                            role = Some(lit.value());
                        } else if meta.path.is_ident("kind") {
                            let value = meta.value()?;
                            let lit: syn::LitStr = value.parse()?;
                            kind = Some(lit.value());
                        } else {
                            return Err(meta.error("unrecognized `dynamorm` field clause"));
                        }
                        Ok(())
                    })?;

                    if let Some(index_name) = index_name {
                        let role = match role.as_deref() {
                            Some("pk") => IndexRole::Partition,
                            Some("sk") => IndexRole::Sort,
                            _ => {
                                return Err(syn::Error::new_spanned(
                                    attr,
                                    "dynamorm(index = ...) requires role = \"pk\" or \"sk\"",
                                ))
                            }
                        };
                        let kind = match kind.as_deref() {
                            None | Some("gsi") | Some("global") => IndexKind::Global,
                            Some("lsi") | Some("local") => IndexKind::Local,
                            Some(other) => {
                                return Err(syn::Error::new_spanned(
                                    attr,
                                    format!("unknown index kind `{other}`, expected \"gsi\" or \"lsi\""),
                                ))
                            }
                        };
                        settings.index_participation.push((index_name, role, kind));
                    } else if role.is_some() || kind.is_some() {
                        return Err(syn::Error::new_spanned(
                            attr,
                            "dynamorm(role = ...) / dynamorm(kind = ...) require index = \"name\"",
                        ));
                    }
                }
            }

            self.fields.push(settings);
        }

        Ok(self)
    }

    pub(crate) fn build(self) -> syn::Result<Settings> {
        let pk_count = self.fields.iter().filter(|f| f.is_pk).count();
        if pk_count != 1 {
            return Err(syn::Error::new_spanned(
                &self.ident,
                format!("exactly one field must be tagged #[pk], found {pk_count}"),
            ));
        }
        let sk_count = self.fields.iter().filter(|f| f.is_sk).count();
        if sk_count > 1 {
            return Err(syn::Error::new_spanned(
                &self.ident,
                "at most one field may be tagged #[sk]",
            ));
        }

        Ok(Settings {
            ident: self.ident,
            type_name: self.type_name,
            table_name: self.table_name,
            fields: self.fields,
        })
    }
}
