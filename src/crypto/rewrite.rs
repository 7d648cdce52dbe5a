//! Update-expression rewriting for encrypted attributes.
//!
//! An update expression may `SET` an encrypted attribute; since the expression
//! builder only ever sees placeholders (`#n0`, `:v0`), the value that needs
//! encrypting has to be found by walking the parsed clauses and cross-referencing
//! the name/value maps built by [`crate::expr`]. This module is the synchronous
//! half of that work (parsing and validating which values need encryption); the
//! executor performs the actual async `encrypt_av` calls and substitutes the
//! results back in.

use std::collections::HashMap;

use crate::attribute_value::AttributeValue;
use crate::error::CryptoError;
use crate::registry::Metadata;

/// One `:value` placeholder that must be encrypted before the wire call, because
/// it is the right-hand side of a `SET` onto an encrypted attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEncryption {
    pub value_placeholder: String,
    pub attr_name: String,
}

/// Splits an update expression into its four top-level clauses (`SET`, `REMOVE`,
/// `ADD`, `DELETE`), respecting parenthesis depth so `if_not_exists(a, b)` isn't
/// split on its internal comma.
fn split_clauses(expr: &str) -> HashMap<&'static str, Vec<String>> {
    let mut clauses: HashMap<&'static str, Vec<String>> = HashMap::new();
    let keywords = ["SET", "REMOVE", "ADD", "DELETE"];
    let mut current_kw: Option<&'static str> = None;
    let mut depth = 0i32;
    let mut buf = String::new();
    let mut tokens: Vec<String> = Vec::new();

    let mut i = 0;
    let chars: Vec<char> = expr.chars().collect();
    while i < chars.len() {
        let rest: String = chars[i..].iter().collect();
        let mut matched_kw = None;
        for kw in keywords {
            if rest.starts_with(kw)
                && rest[kw.len()..]
                    .chars()
                    .next()
                    .map(|c| c.is_whitespace())
                    .unwrap_or(true)
                && (i == 0 || chars[i - 1].is_whitespace())
                && depth == 0
            {
                matched_kw = Some(kw);
            }
        }

        if let Some(kw) = matched_kw {
            flush(&mut buf, &mut tokens);
            if let Some(prev) = current_kw {
                clauses.entry(prev).or_default().extend(tokens.drain(..));
            } else {
                tokens.clear();
            }
            current_kw = Some(kw);
            i += kw.len();
            continue;
        }

        match chars[i] {
            '(' => {
                depth += 1;
                buf.push('(');
            }
            ')' => {
                depth -= 1;
                buf.push(')');
            }
            ',' if depth == 0 => {
                flush(&mut buf, &mut tokens);
            }
            c => buf.push(c),
        }
        i += 1;
    }
    flush(&mut buf, &mut tokens);
    if let Some(kw) = current_kw {
        clauses.entry(kw).or_default().extend(tokens);
    }

    clauses
}

fn flush(buf: &mut String, tokens: &mut Vec<String>) {
    let trimmed = buf.trim();
    if !trimmed.is_empty() {
        tokens.push(trimmed.to_string());
    }
    buf.clear();
}

/// Scans a parsed `SET`/`REMOVE`/`ADD`/`DELETE` update expression for value
/// placeholders that need encrypting before the wire call.
///
/// `names` maps `#nN` placeholders to wire attribute names; `metadata` is used to
/// tell whether a given attribute is `encrypted`.
pub fn find_pending_encryptions(
    expr: &str,
    names: &HashMap<String, String>,
    metadata: &Metadata,
) -> Result<Vec<PendingEncryption>, CryptoError> {
    let clauses = split_clauses(expr);
    let mut pending = Vec::new();

    for op in ["ADD", "DELETE"] {
        if let Some(assignments) = clauses.get(op) {
            for assignment in assignments {
                if let Some(name_token) = assignment.split_whitespace().next() {
                    if let Some(attr) = resolve_encrypted_attr(name_token, names, metadata) {
                        return Err(CryptoError::UnsupportedUpdateExpression(
                            attr,
                            "ADD/DELETE is not supported for encrypted attributes",
                        ));
                    }
                }
            }
        }
    }

    if let Some(assignments) = clauses.get("SET") {
        for assignment in assignments {
            let Some((lhs, rhs)) = assignment.split_once('=') else {
                continue;
            };
            let (lhs, rhs) = (lhs.trim(), rhs.trim());

            if lhs.contains('.') || lhs.contains('[') {
                if let Some(attr) = resolve_encrypted_attr(
                    lhs.split(['.', '[']).next().unwrap_or(lhs),
                    names,
                    metadata,
                ) {
                    return Err(CryptoError::UnsupportedUpdateExpression(
                        attr,
                        "nested/indexed updates are not supported for encrypted attributes",
                    ));
                }
                continue;
            }

            let Some(attr) = resolve_encrypted_attr(lhs, names, metadata) else {
                continue;
            };

            if let Some(value_placeholder) = rhs.strip_prefix(':') {
                pending.push(PendingEncryption {
                    value_placeholder: format!(":{value_placeholder}"),
                    attr_name: attr,
                });
            } else if let Some(inner) = rhs
                .strip_prefix("if_not_exists(")
                .and_then(|s| s.strip_suffix(')'))
            {
                let parts: Vec<&str> = inner.splitn(2, ',').map(str::trim).collect();
                if parts.len() == 2 {
                    if let Some(default_placeholder) = parts[1].strip_prefix(':') {
                        pending.push(PendingEncryption {
                            value_placeholder: format!(":{default_placeholder}"),
                            attr_name: attr,
                        });
                        continue;
                    }
                }
                return Err(CryptoError::UnsupportedUpdateExpression(
                    attr,
                    "unsupported if_not_exists form",
                ));
            } else {
                return Err(CryptoError::UnsupportedUpdateExpression(
                    attr,
                    "right-hand side must be a bare value or if_not_exists(attr, default)",
                ));
            }
        }
    }

    Ok(pending)
}

fn resolve_encrypted_attr(
    name_token: &str,
    names: &HashMap<String, String>,
    metadata: &Metadata,
) -> Option<String> {
    let wire_name = names.get(name_token)?;
    let field = metadata.field_by_wire_name(wire_name)?;
    field.is_encrypted.then(|| wire_name.clone())
}

/// Rewrites `values` in place, substituting encrypted envelopes for the pending
/// placeholders. Called by the executor after resolving every `PendingEncryption`
/// through [`crate::crypto::encrypt_av`].
pub fn apply_encrypted_values(
    values: &mut HashMap<String, AttributeValue>,
    resolved: Vec<(PendingEncryption, AttributeValue)>,
) {
    for (pending, envelope) in resolved {
        values.insert(pending.value_placeholder, envelope);
    }
}
