//! Pagination cursor encoding.
//!
//! A versioned wrapper (a format-version byte ahead of the base64url payload)
//! rather than raw attribute-value JSON, so the encoding can change without
//! breaking cursors already handed out to callers.

use std::collections::HashMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::attribute_value::AttributeValue;
use crate::crypto::{decode_plaintext, encode_plaintext};
use crate::error::MarshalError;

const CURSOR_FORMAT_VERSION: u8 = 1;

/// Sort direction recorded in a cursor, for resuming a `Query` consistently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorDirection {
    Ascending,
    Descending,
}

/// Decoded cursor payload: the last evaluated key, which index it was taken
/// from, and the direction the query was scanning in.
#[derive(Debug, Clone)]
pub struct Cursor {
    pub last_evaluated_key: HashMap<String, AttributeValue>,
    pub index_name: Option<String>,
    pub direction: CursorDirection,
}

/// Encodes a cursor as an opaque base64url (no padding) string, prefixed with a
/// one-byte format version. Reuses the crypto module's stable attribute-value
/// encoding, since the requirements (discriminated, lossless, not serde-derived)
/// are identical.
pub fn encode_cursor(cursor: &Cursor) -> String {
    let mut bytes = vec![CURSOR_FORMAT_VERSION];

    let index_av = match &cursor.index_name {
        Some(name) => AttributeValue::S(name.clone()),
        None => AttributeValue::Null,
    };
    let direction_av = AttributeValue::S(
        match cursor.direction {
            CursorDirection::Ascending => "asc",
            CursorDirection::Descending => "desc",
        }
        .to_string(),
    );
    let lek_av = AttributeValue::M(cursor.last_evaluated_key.clone());

    let mut envelope = HashMap::new();
    envelope.insert("lek".to_string(), lek_av);
    envelope.insert("index".to_string(), index_av);
    envelope.insert("dir".to_string(), direction_av);

    bytes.extend(encode_plaintext(&AttributeValue::M(envelope)));
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decodes a cursor produced by [`encode_cursor`]. Rejects malformed base64,
/// unknown format versions, and payloads missing the required `lek` field.
pub fn decode_cursor(s: &str) -> Result<Cursor, MarshalError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(s)
        .map_err(|_| MarshalError::Decode("cursor: invalid base64".to_string()))?;

    let (version, payload) = bytes
        .split_first()
        .ok_or_else(|| MarshalError::Decode("cursor: empty".to_string()))?;
    if *version != CURSOR_FORMAT_VERSION {
        return Err(MarshalError::Decode(format!(
            "cursor: unsupported format version {version}"
        )));
    }

    let AttributeValue::M(mut envelope) = decode_plaintext(payload)
        .ok_or_else(|| MarshalError::Decode("cursor: malformed payload".to_string()))?
    else {
        return Err(MarshalError::Decode("cursor: expected a map".to_string()));
    };

    let AttributeValue::M(last_evaluated_key) = envelope
        .remove("lek")
        .ok_or_else(|| MarshalError::Decode("cursor: missing lek".to_string()))?
    else {
        return Err(MarshalError::Decode("cursor: lek must be a map".to_string()));
    };

    let index_name = match envelope.remove("index") {
        Some(AttributeValue::S(name)) => Some(name),
        Some(AttributeValue::Null) | None => None,
        Some(_) => return Err(MarshalError::Decode("cursor: index must be a string".to_string())),
    };

    let direction = match envelope.remove("dir") {
        Some(AttributeValue::S(d)) if d == "asc" => CursorDirection::Ascending,
        Some(AttributeValue::S(d)) if d == "desc" => CursorDirection::Descending,
        _ => return Err(MarshalError::Decode("cursor: invalid dir".to_string())),
    };

    Ok(Cursor {
        last_evaluated_key,
        index_name,
        direction,
    })
}
