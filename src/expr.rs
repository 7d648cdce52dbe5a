//! Safe construction of DynamoDB key/filter/update/condition expressions.
//!
//! A stateful builder that allocates `#nN`/`:vN` placeholders for an arbitrary
//! sequence of conditions, covering the full operator whitelist and the
//! reserved-word/illegal-character hardening rules below.

use std::collections::HashMap;

use crate::attribute_value::AttributeValue;
use crate::error::ExpressionError;

const MAX_FIELD_NAME_LEN: usize = 255;
const MAX_FIELD_DEPTH: usize = 32;
const MAX_STRING_VALUE_LEN: usize = 400_000;
const MAX_RAW_EXPR_LEN: usize = 4_096;
const MAX_IN_VALUES: usize = 100;

/// A condition operator drawn from the supported whitelist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Between,
    In,
    BeginsWith,
    Contains,
    AttributeExists,
    AttributeNotExists,
}

impl Operator {
    pub fn parse(raw: &str) -> Result<Self, ExpressionError> {
        match raw.to_ascii_uppercase().as_str() {
            "=" => Ok(Operator::Eq),
            "!=" => Ok(Operator::Ne),
            "<" => Ok(Operator::Lt),
            "<=" => Ok(Operator::Le),
            ">" => Ok(Operator::Gt),
            ">=" => Ok(Operator::Ge),
            "BETWEEN" => Ok(Operator::Between),
            "IN" => Ok(Operator::In),
            "BEGINS_WITH" => Ok(Operator::BeginsWith),
            "CONTAINS" => Ok(Operator::Contains),
            "ATTRIBUTE_EXISTS" => Ok(Operator::AttributeExists),
            "ATTRIBUTE_NOT_EXISTS" => Ok(Operator::AttributeNotExists),
            other => Err(ExpressionError::InvalidOperator(other.to_string())),
        }
    }

    /// Whether this operator is usable as a sort-key condition in a Query.
    pub fn is_sort_key_eligible(self) -> bool {
        matches!(
            self,
            Operator::Eq
                | Operator::Lt
                | Operator::Le
                | Operator::Gt
                | Operator::Ge
                | Operator::Between
                | Operator::BeginsWith
        )
    }
}

const DANGEROUS_PATTERNS: &[&str] = &[
    "--", ";--", "/*", "*/", "<script", "</script", "eval(", "javascript:", "\0",
];

fn contains_dangerous_pattern(s: &str) -> Option<&'static str> {
    let lower = s.to_ascii_lowercase();
    DANGEROUS_PATTERNS
        .iter()
        .find(|p| lower.contains(*p))
        .copied()
}

/// Validates a (possibly dotted, possibly list-indexed) field name against
/// the hardening rules below (length, reserved words, illegal characters).
pub fn validate_field_name(name: &str) -> Result<(), ExpressionError> {
    if name.is_empty() || name.len() > MAX_FIELD_NAME_LEN {
        return Err(ExpressionError::InvalidField(
            name.to_string(),
            "length must be 1-255 characters",
        ));
    }
    if name.chars().any(|c| c.is_control()) {
        return Err(ExpressionError::InvalidField(
            name.to_string(),
            "control characters are not allowed",
        ));
    }
    if let Some(pattern) = contains_dangerous_pattern(name) {
        return Err(ExpressionError::DangerousPattern(pattern.to_string()));
    }

    let segments: Vec<&str> = name.split('.').collect();
    if segments.len() > MAX_FIELD_DEPTH {
        return Err(ExpressionError::InvalidField(
            name.to_string(),
            "nesting depth exceeds 32",
        ));
    }

    for segment in segments {
        let base = match segment.find('[') {
            Some(idx) => {
                let (base, rest) = segment.split_at(idx);
                if !rest.ends_with(']')
                    || !rest[1..rest.len() - 1].chars().all(|c| c.is_ascii_digit())
                    || rest.len() < 3
                {
                    return Err(ExpressionError::InvalidField(
                        name.to_string(),
                        "list-index suffix must be `[<digits>]`",
                    ));
                }
                base
            }
            None => segment,
        };

        let mut chars = base.chars();
        let ok = matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
            && chars.all(|c| c == '_' || c.is_ascii_alphanumeric());
        if !ok {
            return Err(ExpressionError::InvalidField(
                name.to_string(),
                "segments must match ^[A-Za-z_][A-Za-z0-9_]*$",
            ));
        }
    }

    Ok(())
}

fn validate_string_value(s: &str) -> Result<(), ExpressionError> {
    if s.len() > MAX_STRING_VALUE_LEN {
        return Err(ExpressionError::ValueTooLarge(s.to_string()));
    }
    if let Some(pattern) = contains_dangerous_pattern(s) {
        return Err(ExpressionError::DangerousPattern(pattern.to_string()));
    }
    Ok(())
}

fn validate_value(value: &AttributeValue) -> Result<(), ExpressionError> {
    match value {
        AttributeValue::S(s) => validate_string_value(s),
        AttributeValue::Ss(items) => items.iter().try_for_each(|s| validate_string_value(s)),
        AttributeValue::L(items) => items.iter().try_for_each(validate_value),
        AttributeValue::M(map) => map.values().try_for_each(validate_value),
        _ => Ok(()),
    }
}

pub fn validate_table_or_index_name(name: &str) -> Result<(), ExpressionError> {
    if name.len() < 3 || name.len() > 255 {
        return Err(ExpressionError::InvalidField(
            name.to_string(),
            "length must be 3-255 characters",
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err(ExpressionError::InvalidField(
            name.to_string(),
            "must match [A-Za-z0-9_.-]+",
        ));
    }
    Ok(())
}

/// A single condition accumulated by the builder before `build()` renders it.
struct Condition {
    field_placeholder: String,
    operator: Operator,
    value_placeholders: Vec<String>,
}

fn render_condition(c: &Condition) -> String {
    let f = &c.field_placeholder;
    match c.operator {
        Operator::Eq => format!("{f} = {}", c.value_placeholders[0]),
        Operator::Ne => format!("{f} <> {}", c.value_placeholders[0]),
        Operator::Lt => format!("{f} < {}", c.value_placeholders[0]),
        Operator::Le => format!("{f} <= {}", c.value_placeholders[0]),
        Operator::Gt => format!("{f} > {}", c.value_placeholders[0]),
        Operator::Ge => format!("{f} >= {}", c.value_placeholders[0]),
        Operator::Between => format!(
            "{f} BETWEEN {} AND {}",
            c.value_placeholders[0], c.value_placeholders[1]
        ),
        Operator::In => format!("{f} IN ({})", c.value_placeholders.join(", ")),
        Operator::BeginsWith => format!("begins_with({f}, {})", c.value_placeholders[0]),
        Operator::Contains => format!("contains({f}, {})", c.value_placeholders[0]),
        Operator::AttributeExists => format!("attribute_exists({f})"),
        Operator::AttributeNotExists => format!("attribute_not_exists({f})"),
    }
}

/// The rendered output of [`ExpressionBuilder::build`].
#[derive(Debug, Default, Clone)]
pub struct BuiltExpression {
    pub key_expr: Option<String>,
    pub filter_expr: Option<String>,
    pub update_expr: Option<String>,
    pub condition_expr: Option<String>,
    pub projection_expr: Option<String>,
    pub names: HashMap<String, String>,
    pub values: HashMap<String, AttributeValue>,
}

/// Accumulates key/filter/update/condition conditions and renders them into
/// DynamoDB expression strings with deduplicated `#nN`/`:vN` placeholders.
#[derive(Default)]
pub struct ExpressionBuilder {
    name_by_wire: HashMap<String, String>,
    names: HashMap<String, String>,
    value_seq: Vec<(String, AttributeValue)>,
    next_name: usize,
    next_value: usize,

    key_conditions: Vec<Condition>,
    filter_conditions: Vec<Condition>,
    set_clauses: Vec<String>,
    remove_clauses: Vec<String>,
    add_clauses: Vec<String>,
    delete_clauses: Vec<String>,
    condition_conditions: Vec<Condition>,
    projection_fields: Vec<String>,
    raw_filter_fragments: Vec<String>,
}

impl ExpressionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc_name(&mut self, field: &str) -> Result<String, ExpressionError> {
        validate_field_name(field)?;
        if let Some(existing) = self.name_by_wire.get(field) {
            return Ok(existing.clone());
        }
        let placeholder = format!("#n{}", self.next_name);
        self.next_name += 1;
        self.names.insert(placeholder.clone(), field.to_string());
        self.name_by_wire.insert(field.to_string(), placeholder.clone());
        Ok(placeholder)
    }

    fn alloc_value(&mut self, value: AttributeValue) -> Result<String, ExpressionError> {
        validate_value(&value)?;
        if let Some((placeholder, existing)) =
            self.value_seq.iter().find(|(_, v)| *v == value)
        {
            return Ok(placeholder.clone());
        }
        let placeholder = format!(":v{}", self.next_value);
        self.next_value += 1;
        self.value_seq.push((placeholder.clone(), value));
        Ok(placeholder)
    }

    /// Adds a key or filter condition. `for_key` selects which clause it joins;
    /// callers building a key condition should pass `true`.
    pub fn add_condition(
        &mut self,
        field: &str,
        operator: Operator,
        values: Vec<AttributeValue>,
        for_key: bool,
    ) -> Result<(), ExpressionError> {
        self.check_operand_count(operator, &values)?;
        let field_placeholder = self.alloc_name(field)?;
        let mut value_placeholders = Vec::with_capacity(values.len());
        for v in values {
            value_placeholders.push(self.alloc_value(v)?);
        }
        let condition = Condition {
            field_placeholder,
            operator,
            value_placeholders,
        };
        if for_key {
            self.key_conditions.push(condition);
        } else {
            self.filter_conditions.push(condition);
        }
        Ok(())
    }

    pub fn add_raw_condition(
        &mut self,
        expression: &str,
        values: HashMap<String, AttributeValue>,
    ) -> Result<(), ExpressionError> {
        if expression.len() > MAX_RAW_EXPR_LEN {
            return Err(ExpressionError::ValueTooLarge("raw expression".to_string()));
        }
        if let Some(pattern) = contains_dangerous_pattern(expression) {
            return Err(ExpressionError::DangerousPattern(pattern.to_string()));
        }
        for v in values.values() {
            validate_value(v)?;
        }
        for (placeholder, value) in values {
            if let Some((_, existing)) = self.value_seq.iter().find(|(p, _)| *p == placeholder) {
                if *existing != value {
                    return Err(ExpressionError::InvalidField(
                        placeholder,
                        "placeholder already bound to a different value",
                    ));
                }
            } else {
                self.value_seq.push((placeholder, value));
            }
        }
        self.raw_filter_fragments.push(expression.to_string());
        Ok(())
    }

    fn check_operand_count(
        &self,
        operator: Operator,
        values: &[AttributeValue],
    ) -> Result<(), ExpressionError> {
        match operator {
            Operator::Between if values.len() != 2 => Err(ExpressionError::InvalidOperator(
                "BETWEEN requires exactly 2 values".to_string(),
            )),
            Operator::In if values.is_empty() => Err(ExpressionError::InvalidOperator(
                "IN requires at least 1 value".to_string(),
            )),
            Operator::In if values.len() > MAX_IN_VALUES => {
                Err(ExpressionError::TooManyInValues(values.len()))
            }
            Operator::AttributeExists | Operator::AttributeNotExists if !values.is_empty() => {
                Err(ExpressionError::InvalidOperator(
                    "ATTRIBUTE_EXISTS/ATTRIBUTE_NOT_EXISTS take no value".to_string(),
                ))
            }
            Operator::Eq
            | Operator::Ne
            | Operator::Lt
            | Operator::Le
            | Operator::Gt
            | Operator::Ge
            | Operator::BeginsWith
            | Operator::Contains
                if values.len() != 1 =>
            {
                Err(ExpressionError::InvalidOperator(
                    "this operator requires exactly 1 value".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }

    pub fn add_update_set(
        &mut self,
        field: &str,
        value: AttributeValue,
    ) -> Result<(), ExpressionError> {
        let name = self.alloc_name(field)?;
        let value_placeholder = self.alloc_value(value)?;
        self.set_clauses.push(format!("{name} = {value_placeholder}"));
        Ok(())
    }

    pub fn add_update_set_if_not_exists(
        &mut self,
        field: &str,
        default: AttributeValue,
    ) -> Result<(), ExpressionError> {
        let name = self.alloc_name(field)?;
        let value_placeholder = self.alloc_value(default)?;
        self.set_clauses
            .push(format!("{name} = if_not_exists({name}, {value_placeholder})"));
        Ok(())
    }

    pub fn add_update_remove(&mut self, field: &str) -> Result<(), ExpressionError> {
        let name = self.alloc_name(field)?;
        self.remove_clauses.push(name);
        Ok(())
    }

    pub fn add_update_add(
        &mut self,
        field: &str,
        value: AttributeValue,
    ) -> Result<(), ExpressionError> {
        let name = self.alloc_name(field)?;
        let value_placeholder = self.alloc_value(value)?;
        self.add_clauses.push(format!("{name} {value_placeholder}"));
        Ok(())
    }

    pub fn add_update_delete(
        &mut self,
        field: &str,
        value: AttributeValue,
    ) -> Result<(), ExpressionError> {
        let name = self.alloc_name(field)?;
        let value_placeholder = self.alloc_value(value)?;
        self.delete_clauses.push(format!("{name} {value_placeholder}"));
        Ok(())
    }

    pub fn add_condition_check(
        &mut self,
        field: &str,
        operator: Operator,
        values: Vec<AttributeValue>,
    ) -> Result<(), ExpressionError> {
        self.check_operand_count(operator, &values)?;
        let field_placeholder = self.alloc_name(field)?;
        let mut value_placeholders = Vec::with_capacity(values.len());
        for v in values {
            value_placeholders.push(self.alloc_value(v)?);
        }
        self.condition_conditions.push(Condition {
            field_placeholder,
            operator,
            value_placeholders,
        });
        Ok(())
    }

    pub fn add_projection(&mut self, field: &str) -> Result<(), ExpressionError> {
        let name = self.alloc_name(field)?;
        self.projection_fields.push(name);
        Ok(())
    }

    pub fn build(self) -> BuiltExpression {
        let key_expr = (!self.key_conditions.is_empty()).then(|| {
            self.key_conditions
                .iter()
                .map(render_condition)
                .collect::<Vec<_>>()
                .join(" AND ")
        });

        let mut filter_parts: Vec<String> =
            self.filter_conditions.iter().map(render_condition).collect();
        filter_parts.extend(self.raw_filter_fragments.iter().cloned());
        let filter_expr = (!filter_parts.is_empty()).then(|| filter_parts.join(" AND "));

        let mut update_parts = Vec::new();
        if !self.set_clauses.is_empty() {
            update_parts.push(format!("SET {}", self.set_clauses.join(", ")));
        }
        if !self.remove_clauses.is_empty() {
            update_parts.push(format!("REMOVE {}", self.remove_clauses.join(", ")));
        }
        if !self.add_clauses.is_empty() {
            update_parts.push(format!("ADD {}", self.add_clauses.join(", ")));
        }
        if !self.delete_clauses.is_empty() {
            update_parts.push(format!("DELETE {}", self.delete_clauses.join(", ")));
        }
        let update_expr = (!update_parts.is_empty()).then(|| update_parts.join(" "));

        let condition_expr = (!self.condition_conditions.is_empty()).then(|| {
            self.condition_conditions
                .iter()
                .map(render_condition)
                .collect::<Vec<_>>()
                .join(" AND ")
        });

        let projection_expr =
            (!self.projection_fields.is_empty()).then(|| self.projection_fields.join(", "));

        BuiltExpression {
            key_expr,
            filter_expr,
            update_expr,
            condition_expr,
            projection_expr,
            names: self.names,
            values: self.value_seq.into_iter().collect(),
        }
    }
}
