//! The DynamoDB attribute-value model.
//!
//! [`AttributeValue`] is a tagged union mirroring the scalar and compound types
//! DynamoDB itself understands (`S`, `N`, `B`, `BOOL`, `NULL`, `L`, `M`, `SS`, `NS`,
//! `BS`). Every other component in this crate - the marshal engine, the expression
//! builder, the encryption service - speaks this type rather than the wire SDK's
//! own `AttributeValue`, so that only this module needs to know how the two line up.

use std::collections::HashMap;

use aws_sdk_dynamodb::primitives::Blob;
use aws_sdk_dynamodb::types::AttributeValue as WireValue;

/// A DynamoDB attribute value.
///
/// Equality on `N` compares the canonical decimal text, which is how this crate
/// always constructs numeric variants (see [`AttributeValue::n`]).
#[derive(Clone, Debug, PartialEq)]
pub enum AttributeValue {
    S(String),
    N(String),
    B(Vec<u8>),
    Bool(bool),
    Null,
    L(Vec<AttributeValue>),
    M(HashMap<String, AttributeValue>),
    Ss(Vec<String>),
    Ns(Vec<String>),
    Bs(Vec<Vec<u8>>),
}

impl AttributeValue {
    /// Build a canonical `N` from any integer.
    pub fn n(value: impl std::fmt::Display) -> Self {
        AttributeValue::N(value.to_string())
    }

    /// Build a canonical `N` from a float, using Rust's shortest round-tripping
    /// decimal formatting (the same guarantee `ryu`/Grisu give, without the extra
    /// dependency).
    pub fn n_float(value: f64) -> Self {
        AttributeValue::N(value.to_string())
    }

    pub fn is_empty_for_omit(&self) -> bool {
        match self {
            AttributeValue::S(s) => s.is_empty(),
            AttributeValue::N(n) => matches!(n.as_str(), "0" | "0.0" | "-0" | ""),
            AttributeValue::B(b) => b.is_empty(),
            AttributeValue::Bool(b) => !b,
            AttributeValue::Null => true,
            AttributeValue::L(l) => l.is_empty(),
            AttributeValue::M(m) => m.is_empty(),
            AttributeValue::Ss(s) => s.is_empty(),
            AttributeValue::Ns(n) => n.is_empty(),
            AttributeValue::Bs(b) => b.is_empty(),
        }
    }

    /// A short discriminant tag used by the stable encoding in
    /// [`crate::crypto::encode_plaintext`] and in decode error messages.
    pub fn type_tag(&self) -> &'static str {
        match self {
            AttributeValue::S(_) => "s",
            AttributeValue::N(_) => "n",
            AttributeValue::B(_) => "b",
            AttributeValue::Bool(_) => "bool",
            AttributeValue::Null => "null",
            AttributeValue::L(_) => "l",
            AttributeValue::M(_) => "m",
            AttributeValue::Ss(_) => "ss",
            AttributeValue::Ns(_) => "ns",
            AttributeValue::Bs(_) => "bs",
        }
    }
}

impl From<AttributeValue> for WireValue {
    fn from(value: AttributeValue) -> Self {
        match value {
            AttributeValue::S(s) => WireValue::S(s),
            AttributeValue::N(n) => WireValue::N(n),
            AttributeValue::B(b) => WireValue::B(Blob::new(b)),
            AttributeValue::Bool(b) => WireValue::Bool(b),
            AttributeValue::Null => WireValue::Null(true),
            AttributeValue::L(items) => {
                WireValue::L(items.into_iter().map(WireValue::from).collect())
            }
            AttributeValue::M(map) => WireValue::M(
                map.into_iter()
                    .map(|(k, v)| (k, WireValue::from(v)))
                    .collect(),
            ),
            AttributeValue::Ss(items) => WireValue::Ss(items),
            AttributeValue::Ns(items) => WireValue::Ns(items),
            AttributeValue::Bs(items) => {
                WireValue::Bs(items.into_iter().map(Blob::new).collect())
            }
        }
    }
}

impl From<WireValue> for AttributeValue {
    fn from(value: WireValue) -> Self {
        match value {
            WireValue::S(s) => AttributeValue::S(s),
            WireValue::N(n) => AttributeValue::N(n),
            WireValue::B(b) => AttributeValue::B(b.into_inner()),
            WireValue::Bool(b) => AttributeValue::Bool(b),
            WireValue::Null(_) => AttributeValue::Null,
            WireValue::L(items) => {
                AttributeValue::L(items.into_iter().map(AttributeValue::from).collect())
            }
            WireValue::M(map) => AttributeValue::M(
                map.into_iter()
                    .map(|(k, v)| (k, AttributeValue::from(v)))
                    .collect(),
            ),
            WireValue::Ss(items) => AttributeValue::Ss(items),
            WireValue::Ns(items) => AttributeValue::Ns(items),
            WireValue::Bs(items) => {
                AttributeValue::Bs(items.into_iter().map(Blob::into_inner).collect())
            }
            // The SDK's enum is non-exhaustive; DynamoDB never actually sends a
            // variant we don't already handle above.
            other => panic!("unsupported wire attribute value: {other:?}"),
        }
    }
}

/// Converts a Rust field value to its [`AttributeValue`] representation.
///
/// `dynamorm-derive` generates one `get` closure per field; for fields with no
/// `set`/`json` tag, that closure is just `self.field.to_attribute_value()`.
pub trait ToAttributeValue {
    fn to_attribute_value(&self) -> AttributeValue;
}

/// The inverse of [`ToAttributeValue`], used by generated `set` closures.
pub trait FromAttributeValue: Sized {
    fn from_attribute_value(value: AttributeValue) -> Result<Self, String>;
}

macro_rules! impl_attribute_value_int {
    ($($t:ty),+) => {
        $(
            impl ToAttributeValue for $t {
                fn to_attribute_value(&self) -> AttributeValue {
                    AttributeValue::n(*self)
                }
            }
            impl FromAttributeValue for $t {
                fn from_attribute_value(value: AttributeValue) -> Result<Self, String> {
                    match value {
                        AttributeValue::N(n) => n.parse().map_err(|_| format!("not a valid {}: `{n}`", stringify!($t))),
                        other => Err(format!("expected N, got {}", other.type_tag())),
                    }
                }
            }
        )+
    };
}

impl_attribute_value_int!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl ToAttributeValue for f32 {
    fn to_attribute_value(&self) -> AttributeValue {
        AttributeValue::n_float(*self as f64)
    }
}
impl FromAttributeValue for f32 {
    fn from_attribute_value(value: AttributeValue) -> Result<Self, String> {
        match value {
            AttributeValue::N(n) => n.parse().map_err(|_| format!("not a valid f32: `{n}`")),
            other => Err(format!("expected N, got {}", other.type_tag())),
        }
    }
}

impl ToAttributeValue for f64 {
    fn to_attribute_value(&self) -> AttributeValue {
        AttributeValue::n_float(*self)
    }
}
impl FromAttributeValue for f64 {
    fn from_attribute_value(value: AttributeValue) -> Result<Self, String> {
        match value {
            AttributeValue::N(n) => n.parse().map_err(|_| format!("not a valid f64: `{n}`")),
            other => Err(format!("expected N, got {}", other.type_tag())),
        }
    }
}

impl ToAttributeValue for String {
    fn to_attribute_value(&self) -> AttributeValue {
        AttributeValue::S(self.clone())
    }
}
impl FromAttributeValue for String {
    fn from_attribute_value(value: AttributeValue) -> Result<Self, String> {
        match value {
            AttributeValue::S(s) => Ok(s),
            other => Err(format!("expected S, got {}", other.type_tag())),
        }
    }
}

impl ToAttributeValue for bool {
    fn to_attribute_value(&self) -> AttributeValue {
        AttributeValue::Bool(*self)
    }
}
impl FromAttributeValue for bool {
    fn from_attribute_value(value: AttributeValue) -> Result<Self, String> {
        match value {
            AttributeValue::Bool(b) => Ok(b),
            other => Err(format!("expected BOOL, got {}", other.type_tag())),
        }
    }
}

impl ToAttributeValue for Vec<u8> {
    fn to_attribute_value(&self) -> AttributeValue {
        AttributeValue::B(self.clone())
    }
}
impl FromAttributeValue for Vec<u8> {
    fn from_attribute_value(value: AttributeValue) -> Result<Self, String> {
        match value {
            AttributeValue::B(b) => Ok(b),
            other => Err(format!("expected B, got {}", other.type_tag())),
        }
    }
}

impl<T: ToAttributeValue> ToAttributeValue for Option<T> {
    fn to_attribute_value(&self) -> AttributeValue {
        match self {
            Some(v) => v.to_attribute_value(),
            None => AttributeValue::Null,
        }
    }
}
impl<T: FromAttributeValue> FromAttributeValue for Option<T> {
    fn from_attribute_value(value: AttributeValue) -> Result<Self, String> {
        match value {
            AttributeValue::Null => Ok(None),
            other => T::from_attribute_value(other).map(Some),
        }
    }
}

impl<T: ToAttributeValue> ToAttributeValue for Vec<T> {
    fn to_attribute_value(&self) -> AttributeValue {
        AttributeValue::L(self.iter().map(|v| v.to_attribute_value()).collect())
    }
}
impl<T: FromAttributeValue> FromAttributeValue for Vec<T> {
    fn from_attribute_value(value: AttributeValue) -> Result<Self, String> {
        match value {
            AttributeValue::L(items) => items
                .into_iter()
                .map(T::from_attribute_value)
                .collect::<Result<Vec<_>, _>>(),
            other => Err(format!("expected L, got {}", other.type_tag())),
        }
    }
}

impl<T: ToAttributeValue> ToAttributeValue for HashMap<String, T> {
    fn to_attribute_value(&self) -> AttributeValue {
        AttributeValue::M(
            self.iter()
                .map(|(k, v)| (k.clone(), v.to_attribute_value()))
                .collect(),
        )
    }
}
impl<T: FromAttributeValue> FromAttributeValue for HashMap<String, T> {
    fn from_attribute_value(value: AttributeValue) -> Result<Self, String> {
        match value {
            AttributeValue::M(map) => map
                .into_iter()
                .map(|(k, v)| T::from_attribute_value(v).map(|v| (k, v)))
                .collect::<Result<HashMap<_, _>, _>>(),
            other => Err(format!("expected M, got {}", other.type_tag())),
        }
    }
}

/// Marshals a slice-like field as a DynamoDB typed Set (`#[dynamorm(set)]`)
/// instead of an `L`.
pub trait ToAttributeSet {
    fn to_attribute_set(&self) -> AttributeValue;
}

/// The inverse of [`ToAttributeSet`].
pub trait FromAttributeSet: Sized {
    fn from_attribute_set(value: AttributeValue) -> Result<Self, String>;
}

impl ToAttributeSet for Vec<String> {
    fn to_attribute_set(&self) -> AttributeValue {
        AttributeValue::Ss(self.clone())
    }
}
impl FromAttributeSet for Vec<String> {
    fn from_attribute_set(value: AttributeValue) -> Result<Self, String> {
        match value {
            AttributeValue::Ss(items) => Ok(items),
            other => Err(format!("expected SS, got {}", other.type_tag())),
        }
    }
}

macro_rules! impl_attribute_set_numeric {
    ($($t:ty),+) => {
        $(
            impl ToAttributeSet for Vec<$t> {
                fn to_attribute_set(&self) -> AttributeValue {
                    AttributeValue::Ns(self.iter().map(|v| v.to_string()).collect())
                }
            }
            impl FromAttributeSet for Vec<$t> {
                fn from_attribute_set(value: AttributeValue) -> Result<Self, String> {
                    match value {
                        AttributeValue::Ns(items) => items
                            .into_iter()
                            .map(|n| n.parse().map_err(|_| format!("not a valid {}: `{n}`", stringify!($t))))
                            .collect(),
                        other => Err(format!("expected NS, got {}", other.type_tag())),
                    }
                }
            }
        )+
    };
}

impl_attribute_set_numeric!(i64, i32, u64, u32, f64);

impl ToAttributeSet for Vec<Vec<u8>> {
    fn to_attribute_set(&self) -> AttributeValue {
        AttributeValue::Bs(self.clone())
    }
}
impl FromAttributeSet for Vec<Vec<u8>> {
    fn from_attribute_set(value: AttributeValue) -> Result<Self, String> {
        match value {
            AttributeValue::Bs(items) => Ok(items),
            other => Err(format!("expected BS, got {}", other.type_tag())),
        }
    }
}

/// Marshals a field as a JSON string (`#[dynamorm(json)]`).
pub fn to_json_attribute<T: serde::Serialize>(value: &T) -> AttributeValue {
    AttributeValue::S(serde_json::to_string(value).expect("JSON-tagged field failed to serialize"))
}

/// The inverse of [`to_json_attribute`].
pub fn from_json_attribute<T: serde::de::DeserializeOwned>(
    value: AttributeValue,
) -> Result<T, String> {
    match value {
        AttributeValue::S(s) => serde_json::from_str(&s).map_err(|e| e.to_string()),
        other => Err(format!("expected S (json), got {}", other.type_tag())),
    }
}

pub type AttributeMap = HashMap<String, AttributeValue>;

pub(crate) fn map_to_wire(map: AttributeMap) -> HashMap<String, WireValue> {
    map.into_iter().map(|(k, v)| (k, v.into())).collect()
}

pub(crate) fn map_from_wire(map: HashMap<String, WireValue>) -> AttributeMap {
    map.into_iter().map(|(k, v)| (k, v.into())).collect()
}
