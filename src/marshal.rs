//! Record ⇄ attribute-value map conversion.
//!
//! `marshal_item`/`unmarshal_item` are the only place timestamp, version, and TTL
//! auto-management happens; every other component works with plain
//! [`AttributeMap`]s. Encrypted fields are marshaled to plaintext here and handed
//! to [`crate::crypto`] by the executor, which is the only caller that also holds
//! a key provider.

use std::any::Any;

use time::OffsetDateTime;

use crate::attribute_value::{AttributeMap, AttributeValue};
use crate::error::MarshalError;
use crate::registry::Metadata;

/// Converts a record to its wire attribute-value map.
///
/// `is_create` controls `created_at`/`version` initialization: on create, an
/// empty `created_at` is stamped with `now` and `version` is forced to `1`
/// regardless of the record's in-memory value. `updated_at` is always stamped
/// with `now` on every marshal, create or update.
pub fn marshal_item<T: Any>(record: &T, metadata: &Metadata, is_create: bool) -> AttributeMap {
    let any_ref: &dyn Any = record;
    let now = rfc3339_now();
    let mut out = AttributeMap::new();

    for field in &metadata.fields {
        let mut value = (field.get)(any_ref);

        if field.is_created_at {
            let is_unset = matches!(&value, AttributeValue::S(s) if s.is_empty())
                || matches!(value, AttributeValue::Null);
            if is_create || is_unset {
                value = AttributeValue::S(now.clone());
            }
        } else if field.is_updated_at {
            value = AttributeValue::S(now.clone());
        } else if field.is_version {
            if is_create {
                value = AttributeValue::n(1i64);
            }
        } else if field.is_ttl {
            if value.is_empty_for_omit() {
                continue;
            }
        }

        if field.omit_empty && value.is_empty_for_omit() {
            continue;
        }

        out.insert(field.wire_name.to_string(), value);
    }

    out
}

/// Converts a wire attribute-value map back into a record, via the field setters
/// captured in `metadata`.
///
/// Missing optional fields are left at the record's zero value; a value present
/// under the wrong variant is a [`MarshalError::Decode`].
pub fn unmarshal_item<T: Any + Default>(
    map: AttributeMap,
    metadata: &Metadata,
) -> Result<T, MarshalError> {
    let mut record = T::default();
    let any_mut: &mut dyn Any = &mut record;

    for field in &metadata.fields {
        let Some(value) = map.get(field.wire_name.as_ref()) else {
            continue;
        };
        (field.set)(any_mut, value.clone()).map_err(|_| MarshalError::Decode(field.name.to_string()))?;
    }

    Ok(record)
}

/// The current time, RFC 3339-formatted. Shared with [`crate::executor`] so
/// `UpdateBuilder` can stamp `updated_at` the same way `marshal_item` does.
pub fn rfc3339_now() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .expect("RFC 3339 formatting of the current time never fails")
}

/// Validates a `set`-tagged sequence's string representation for uniqueness:
/// duplicates are a programmer error, not silently coalesced.
pub fn check_set_unique(values: &[String], field_name: &str) -> Result<(), MarshalError> {
    let mut seen = std::collections::HashSet::new();
    for v in values {
        if !seen.insert(v) {
            return Err(MarshalError::Decode(format!(
                "{field_name}: duplicate set element `{v}`"
            )));
        }
    }
    Ok(())
}
