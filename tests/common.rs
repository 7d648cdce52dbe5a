//! Shared fixtures for the integration tests: an in-memory stand-in for
//! `Transport` and `KmsKeyProvider` so these tests run without a live
//! DynamoDB/KMS endpoint.

#![allow(dead_code)]

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use aws_sdk_dynamodb::operation::batch_get_item::{BatchGetItemInput, BatchGetItemOutput};
use aws_sdk_dynamodb::operation::batch_write_item::{BatchWriteItemInput, BatchWriteItemOutput};
use aws_sdk_dynamodb::operation::create_table::{CreateTableInput, CreateTableOutput};
use aws_sdk_dynamodb::operation::delete_item::{DeleteItemInput, DeleteItemOutput};
use aws_sdk_dynamodb::operation::delete_table::{DeleteTableInput, DeleteTableOutput};
use aws_sdk_dynamodb::operation::describe_table::{DescribeTableInput, DescribeTableOutput};
use aws_sdk_dynamodb::operation::get_item::{GetItemInput, GetItemOutput};
use aws_sdk_dynamodb::operation::put_item::{PutItemInput, PutItemOutput};
use aws_sdk_dynamodb::operation::query::{QueryInput, QueryOutput};
use aws_sdk_dynamodb::operation::scan::{ScanInput, ScanOutput};
use aws_sdk_dynamodb::operation::transact_get_items::{
    TransactGetItemsInput, TransactGetItemsOutput,
};
use aws_sdk_dynamodb::operation::transact_write_items::{
    TransactWriteItemsInput, TransactWriteItemsOutput,
};
use aws_sdk_dynamodb::operation::update_item::{UpdateItemInput, UpdateItemOutput};
use aws_sdk_dynamodb::operation::update_time_to_live::{
    UpdateTimeToLiveInput, UpdateTimeToLiveOutput,
};
use aws_sdk_dynamodb::types::{AttributeValue as WireValue, ItemResponse, KeysAndAttributes};

use dynamorm::crypto::{DataKey, KmsKeyProvider};
use dynamorm::transport::{Transport, TransportError};
use dynamorm::AttributeValue;

type WireItem = HashMap<String, WireValue>;

#[macro_export]
macro_rules! assert_err {
    ($cond:expr,) => {
        $crate::assert_err!($cond);
    };
    ($cond:expr) => {
        match $cond {
            Ok(t) => {
                panic!("assertion failed, expected Err(..), got Ok({:?})", t);
            },
            Err(e) => e,
        }
    };
    ($cond:expr, $($arg:tt)+) => {
        match $cond {
            Ok(t) => {
                panic!("assertion failed, expected Err(..), got Ok({:?}): {}", t, format_args!($($arg)+));
            },
            Err(e) => e,
        }
    };
}

#[macro_export]
macro_rules! assert_none {
    ($cond:expr,) => {
        $crate::assert_none!($cond);
    };
    ($cond:expr) => {
        match $cond {
            Some(t) => {
                panic!("assertion failed, expected Err(..), got Ok({:?})", t);
            },
            None => (),
        }
    };
    ($cond:expr, $($arg:tt)+) => {
        match $cond {
            Ok(t) => {
                panic!("assertion failed, expected None, got Some({:?}): {}", t, format_args!($($arg)+));
            },
            Err(e) => (),
        }
    };
}

fn av_from_wire(v: &WireValue) -> AttributeValue {
    AttributeValue::from(v.clone())
}

fn key_matches(pk: &str, sk: Option<&str>, item: &WireItem, key: &WireItem) -> bool {
    if item.get(pk) != key.get(pk) {
        return false;
    }
    if let Some(sk) = sk {
        if item.get(sk) != key.get(sk) {
            return false;
        }
    }
    true
}

fn find_index(table: &FakeTable, needle: &WireItem) -> Option<usize> {
    table
        .items
        .iter()
        .position(|item| key_matches(&table.pk, table.sk.as_deref(), item, needle))
}

fn av_cmp(a: &AttributeValue, b: &AttributeValue) -> Ordering {
    match (a, b) {
        (AttributeValue::N(x), AttributeValue::N(y)) => {
            let xf: f64 = x.parse().unwrap_or(0.0);
            let yf: f64 = y.parse().unwrap_or(0.0);
            xf.partial_cmp(&yf).unwrap_or(Ordering::Equal)
        }
        (AttributeValue::S(x), AttributeValue::S(y)) => x.cmp(y),
        (AttributeValue::B(x), AttributeValue::B(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Clause {
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
    Exists,
    NotExists,
}

// Re-merges a BETWEEN clause's bare second operand, which also contains " AND ".
fn split_conjuncts(expr: &str) -> Vec<String> {
    let parts: Vec<&str> = expr.split(" AND ").collect();
    let mut out: Vec<String> = Vec::new();
    let mut i = 0;
    while i < parts.len() {
        if parts[i].contains("BETWEEN") && i + 1 < parts.len() {
            out.push(format!("{} AND {}", parts[i], parts[i + 1]));
            i += 2;
        } else {
            out.push(parts[i].to_string());
            i += 1;
        }
    }
    out
}

fn parse_clause(c: &str) -> (Clause, Vec<String>) {
    let c = c.trim();
    if let Some(inner) = c
        .strip_prefix("attribute_not_exists(")
        .and_then(|s| s.strip_suffix(')'))
    {
        return (Clause::NotExists, vec![inner.trim().to_string()]);
    }
    if let Some(inner) = c
        .strip_prefix("attribute_exists(")
        .and_then(|s| s.strip_suffix(')'))
    {
        return (Clause::Exists, vec![inner.trim().to_string()]);
    }
    if let Some(inner) = c
        .strip_prefix("begins_with(")
        .and_then(|s| s.strip_suffix(')'))
    {
        let (f, v) = inner.split_once(',').expect("begins_with(f, v)");
        return (
            Clause::BeginsWith,
            vec![f.trim().to_string(), v.trim().to_string()],
        );
    }
    if let Some(inner) = c
        .strip_prefix("contains(")
        .and_then(|s| s.strip_suffix(')'))
    {
        let (f, v) = inner.split_once(',').expect("contains(f, v)");
        return (
            Clause::Contains,
            vec![f.trim().to_string(), v.trim().to_string()],
        );
    }
    if let Some((f, rest)) = c.split_once(" BETWEEN ") {
        let (lo, hi) = rest.split_once(" AND ").expect("BETWEEN lo AND hi");
        return (
            Clause::Between,
            vec![f.trim().to_string(), lo.trim().to_string(), hi.trim().to_string()],
        );
    }
    if let Some((f, rest)) = c.split_once(" IN (") {
        let rest = rest.trim_end_matches(')');
        let mut operands = vec![f.trim().to_string()];
        operands.extend(rest.split(',').map(|s| s.trim().to_string()));
        return (Clause::In, operands);
    }
    for (token, clause) in [
        (" <> ", Clause::Ne),
        (" <= ", Clause::Le),
        (" >= ", Clause::Ge),
        (" = ", Clause::Eq),
        (" < ", Clause::Lt),
        (" > ", Clause::Gt),
    ] {
        if let Some((f, v)) = c.split_once(token) {
            return (clause, vec![f.trim().to_string(), v.trim().to_string()]);
        }
    }
    panic!("unrecognized condition clause: {c}");
}

fn resolve_name<'a>(token: &'a str, names: &'a HashMap<String, String>) -> &'a str {
    names.get(token).map(String::as_str).unwrap_or(token)
}

fn resolve_value(token: &str, values: &HashMap<String, WireValue>) -> Option<AttributeValue> {
    values.get(token).map(av_from_wire)
}

fn eval_conjunction(
    expr: Option<&str>,
    item: &WireItem,
    names: &HashMap<String, String>,
    values: &HashMap<String, WireValue>,
) -> bool {
    let Some(expr) = expr else { return true };
    split_conjuncts(expr).iter().all(|clause| {
        let (kind, operands) = parse_clause(clause);
        match kind {
            Clause::Exists => item.contains_key(resolve_name(&operands[0], names)),
            Clause::NotExists => !item.contains_key(resolve_name(&operands[0], names)),
            Clause::Eq | Clause::Ne => {
                let field = resolve_name(&operands[0], names);
                let want = resolve_value(&operands[1], values);
                let have = item.get(field).map(av_from_wire);
                (kind == Clause::Eq) == (have == want)
            }
            Clause::Lt | Clause::Le | Clause::Gt | Clause::Ge => {
                let field = resolve_name(&operands[0], names);
                let (Some(have), Some(want)) = (
                    item.get(field).map(av_from_wire),
                    resolve_value(&operands[1], values),
                ) else {
                    return false;
                };
                let ord = av_cmp(&have, &want);
                match kind {
                    Clause::Lt => ord == Ordering::Less,
                    Clause::Le => ord != Ordering::Greater,
                    Clause::Gt => ord == Ordering::Greater,
                    Clause::Ge => ord != Ordering::Less,
                    _ => unreachable!(),
                }
            }
            Clause::Between => {
                let field = resolve_name(&operands[0], names);
                let Some(have) = item.get(field).map(av_from_wire) else {
                    return false;
                };
                let (Some(lo), Some(hi)) = (
                    resolve_value(&operands[1], values),
                    resolve_value(&operands[2], values),
                ) else {
                    return false;
                };
                av_cmp(&have, &lo) != Ordering::Less && av_cmp(&have, &hi) != Ordering::Greater
            }
            Clause::In => {
                let field = resolve_name(&operands[0], names);
                let Some(have) = item.get(field).map(av_from_wire) else {
                    return false;
                };
                operands[1..]
                    .iter()
                    .filter_map(|v| resolve_value(v, values))
                    .any(|v| v == have)
            }
            Clause::BeginsWith => {
                let field = resolve_name(&operands[0], names);
                let Some(AttributeValue::S(have)) = item.get(field).map(av_from_wire) else {
                    return false;
                };
                matches!(resolve_value(&operands[1], values), Some(AttributeValue::S(prefix)) if have.starts_with(&prefix))
            }
            Clause::Contains => {
                let field = resolve_name(&operands[0], names);
                match item.get(field).map(av_from_wire) {
                    Some(AttributeValue::Ss(set)) => {
                        matches!(resolve_value(&operands[1], values), Some(AttributeValue::S(v)) if set.contains(&v))
                    }
                    Some(AttributeValue::S(s)) => {
                        matches!(resolve_value(&operands[1], values), Some(AttributeValue::S(v)) if s.contains(&v))
                    }
                    _ => false,
                }
            }
        }
    })
}

#[derive(Debug)]
enum SetRhs {
    Value(String),
    IfNotExists(String, String),
}

#[derive(Default, Debug)]
struct UpdateOps {
    sets: Vec<(String, SetRhs)>,
    removes: Vec<String>,
    adds: Vec<(String, String)>,
    deletes: Vec<(String, String)>,
}

// Paren-depth-aware: if_not_exists(name, default) has an internal comma.
fn split_top_level_commas(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut cur = String::new();
    for ch in s.chars() {
        match ch {
            '(' => {
                depth += 1;
                cur.push(ch);
            }
            ')' => {
                depth -= 1;
                cur.push(ch);
            }
            ',' if depth == 0 => {
                out.push(cur.trim().to_string());
                cur.clear();
            }
            _ => cur.push(ch),
        }
    }
    if !cur.trim().is_empty() {
        out.push(cur.trim().to_string());
    }
    out
}

fn find_clause_keyword_spans(expr: &str) -> Vec<(usize, &'static str)> {
    let keywords = ["SET", "REMOVE", "ADD", "DELETE"];
    let mut spans = Vec::new();
    for kw in keywords {
        let mut start = 0;
        while let Some(pos) = expr[start..].find(kw) {
            let abs = start + pos;
            let before_ok = abs == 0 || !expr.as_bytes()[abs - 1].is_ascii_alphanumeric();
            let after = abs + kw.len();
            let after_ok = after >= expr.len() || expr.as_bytes()[after] == b' ';
            if before_ok && after_ok {
                spans.push((abs, kw));
            }
            start = abs + kw.len();
        }
    }
    spans.sort_by_key(|(pos, _)| *pos);
    spans
}

fn parse_update_expr(expr: &str) -> UpdateOps {
    let mut ops = UpdateOps::default();
    let spans = find_clause_keyword_spans(expr);
    for (i, (pos, kw)) in spans.iter().enumerate() {
        let body_start = pos + kw.len();
        let body_end = spans.get(i + 1).map(|(p, _)| *p).unwrap_or(expr.len());
        let body = expr[body_start..body_end].trim();
        if body.is_empty() {
            continue;
        }
        match *kw {
            "SET" => {
                for clause in split_top_level_commas(body) {
                    let (name, rhs) = clause.split_once('=').expect("SET name = value");
                    let name = name.trim().to_string();
                    let rhs = rhs.trim();
                    if let Some(inner) = rhs
                        .strip_prefix("if_not_exists(")
                        .and_then(|s| s.strip_suffix(')'))
                    {
                        let (existing, default) =
                            inner.split_once(',').expect("if_not_exists(name, default)");
                        ops.sets.push((
                            name,
                            SetRhs::IfNotExists(existing.trim().to_string(), default.trim().to_string()),
                        ));
                    } else {
                        ops.sets.push((name, SetRhs::Value(rhs.to_string())));
                    }
                }
            }
            "REMOVE" => {
                for clause in split_top_level_commas(body) {
                    ops.removes.push(clause);
                }
            }
            "ADD" => {
                for clause in split_top_level_commas(body) {
                    let (n, v) = clause.split_once(' ').expect("ADD name value");
                    ops.adds.push((n.trim().to_string(), v.trim().to_string()));
                }
            }
            "DELETE" => {
                for clause in split_top_level_commas(body) {
                    let (n, v) = clause.split_once(' ').expect("DELETE name value");
                    ops.deletes
                        .push((n.trim().to_string(), v.trim().to_string()));
                }
            }
            _ => unreachable!(),
        }
    }
    ops
}

fn apply_update(
    expr: Option<&str>,
    names: &HashMap<String, String>,
    values: &HashMap<String, WireValue>,
    item: &mut WireItem,
) {
    let Some(expr) = expr else { return };
    let ops = parse_update_expr(expr);

    for (name_token, rhs) in ops.sets {
        let field = resolve_name(&name_token, names).to_string();
        let value = match rhs {
            SetRhs::Value(token) => values.get(&token).cloned(),
            SetRhs::IfNotExists(_existing_token, default_token) => {
                if item.contains_key(&field) {
                    item.get(&field).cloned()
                } else {
                    values.get(&default_token).cloned()
                }
            }
        };
        if let Some(value) = value {
            item.insert(field, value);
        }
    }

    for name_token in ops.removes {
        item.remove(resolve_name(&name_token, names));
    }

    for (name_token, value_token) in ops.adds {
        let field = resolve_name(&name_token, names).to_string();
        let delta = values.get(&value_token).cloned();
        match (item.get(&field).cloned(), delta) {
            (Some(WireValue::N(cur)), Some(WireValue::N(by))) => {
                let cur: f64 = cur.parse().unwrap_or(0.0);
                let by: f64 = by.parse().unwrap_or(0.0);
                item.insert(field, WireValue::N((cur + by).to_string()));
            }
            (None, Some(WireValue::N(by))) => {
                item.insert(field, WireValue::N(by));
            }
            (Some(WireValue::Ss(mut cur)), Some(WireValue::Ss(add))) => {
                for v in add {
                    if !cur.contains(&v) {
                        cur.push(v);
                    }
                }
                item.insert(field, WireValue::Ss(cur));
            }
            (None, Some(WireValue::Ss(add))) => {
                item.insert(field, WireValue::Ss(add));
            }
            _ => {}
        }
    }

    for (name_token, value_token) in ops.deletes {
        let field = resolve_name(&name_token, names).to_string();
        let remove = values.get(&value_token).cloned();
        if let (Some(WireValue::Ss(cur)), Some(WireValue::Ss(rem))) =
            (item.get(&field).cloned(), remove)
        {
            let remaining: Vec<String> = cur.into_iter().filter(|v| !rem.contains(v)).collect();
            if remaining.is_empty() {
                item.remove(&field);
            } else {
                item.insert(field, WireValue::Ss(remaining));
            }
        }
    }
}

struct FakeTable {
    pk: String,
    sk: Option<String>,
    items: Vec<WireItem>,
}

/// In-memory stand-in for [`Transport`], keyed by table name.
///
/// transport.rs notes implementors may "supply a mock for unit tests" -
/// this is that mock.
pub struct FakeTransport {
    tables: Mutex<HashMap<String, FakeTable>>,
    unprocessed_first_call: Mutex<usize>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
            unprocessed_first_call: Mutex::new(0),
        }
    }

    /// Holds back the last `n` keys/write-requests of the very next
    /// `batch_get_item`/`batch_write_item` call as unprocessed, then serves
    /// every later batch call in full. Models a transport that throttles part
    /// of a batch on the first attempt but succeeds on retry.
    pub fn fail_first_batch(self, n: usize) -> Self {
        *self.unprocessed_first_call.lock().unwrap() = n;
        self
    }

    /// Registers a table's key schema up front.
    pub fn table(self, name: &str, pk: &str, sk: Option<&str>) -> Self {
        self.tables.lock().unwrap().insert(
            name.to_string(),
            FakeTable {
                pk: pk.to_string(),
                sk: sk.map(str::to_string),
                items: Vec::new(),
            },
        );
        self
    }

    /// Seeds `table` with an already-marshalled item.
    pub fn seed(&self, table: &str, item: HashMap<String, AttributeValue>) {
        let wire: WireItem = item.into_iter().map(|(k, v)| (k, v.into())).collect();
        let mut tables = self.tables.lock().unwrap();
        let t = tables.get_mut(table).expect("unknown table in seed()");
        t.items.push(wire);
    }

    pub fn item_count(&self, table: &str) -> usize {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .map_or(0, |t| t.items.len())
    }
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn cond_fail(message: &str) -> TransportError {
    TransportError {
        code: "ConditionalCheckFailedException".to_string(),
        message: message.to_string(),
        cancellation_reasons: None,
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn get_item(&self, input: GetItemInput) -> Result<GetItemOutput, TransportError> {
        let tables = self.tables.lock().unwrap();
        let table = tables.get(input.table_name().unwrap_or_default());
        let key: WireItem = input.key().cloned().unwrap_or_default();
        let found = table.and_then(|t| {
            t.items
                .iter()
                .find(|item| key_matches(&t.pk, t.sk.as_deref(), item, &key))
                .cloned()
        });
        Ok(GetItemOutput::builder().set_item(found).build())
    }

    async fn put_item(&self, input: PutItemInput) -> Result<PutItemOutput, TransportError> {
        let mut tables = self.tables.lock().unwrap();
        let table_name = input.table_name().unwrap_or_default().to_string();
        let item: WireItem = input.item().cloned().unwrap_or_default();
        let names = input.expression_attribute_names().cloned().unwrap_or_default();
        let values = input.expression_attribute_values().cloned().unwrap_or_default();

        let table = tables.entry(table_name).or_insert_with(|| FakeTable {
            pk: "pk".to_string(),
            sk: None,
            items: Vec::new(),
        });

        let existing_item = find_index(table, &item)
            .map(|i| table.items[i].clone())
            .unwrap_or_default();
        if !eval_conjunction(input.condition_expression(), &existing_item, &names, &values) {
            return Err(cond_fail("condition expression evaluated false"));
        }

        match find_index(table, &item) {
            Some(i) => table.items[i] = item,
            None => table.items.push(item),
        }
        Ok(PutItemOutput::builder().build())
    }

    async fn delete_item(&self, input: DeleteItemInput) -> Result<DeleteItemOutput, TransportError> {
        let mut tables = self.tables.lock().unwrap();
        let table_name = input.table_name().unwrap_or_default();
        let key: WireItem = input.key().cloned().unwrap_or_default();
        let names = input.expression_attribute_names().cloned().unwrap_or_default();
        let values = input.expression_attribute_values().cloned().unwrap_or_default();

        let Some(table) = tables.get_mut(table_name) else {
            return Ok(DeleteItemOutput::builder().build());
        };
        let existing_item = find_index(table, &key)
            .map(|i| table.items[i].clone())
            .unwrap_or_default();
        if !eval_conjunction(input.condition_expression(), &existing_item, &names, &values) {
            return Err(cond_fail("condition expression evaluated false"));
        }
        if let Some(i) = find_index(table, &key) {
            table.items.remove(i);
        }
        Ok(DeleteItemOutput::builder().build())
    }

    async fn update_item(&self, input: UpdateItemInput) -> Result<UpdateItemOutput, TransportError> {
        let mut tables = self.tables.lock().unwrap();
        let table_name = input.table_name().unwrap_or_default().to_string();
        let key: WireItem = input.key().cloned().unwrap_or_default();
        let names = input.expression_attribute_names().cloned().unwrap_or_default();
        let values = input.expression_attribute_values().cloned().unwrap_or_default();

        let table = tables.entry(table_name).or_insert_with(|| FakeTable {
            pk: "pk".to_string(),
            sk: None,
            items: Vec::new(),
        });

        let idx = find_index(table, &key);
        let existing = idx.map(|i| table.items[i].clone()).unwrap_or_default();

        if !eval_conjunction(input.condition_expression(), &existing, &names, &values) {
            return Err(cond_fail("condition expression evaluated false"));
        }

        let mut item = existing;
        for (k, v) in &key {
            item.insert(k.clone(), v.clone());
        }
        apply_update(input.update_expression(), &names, &values, &mut item);

        match idx {
            Some(i) => table.items[i] = item.clone(),
            None => table.items.push(item.clone()),
        }
        Ok(UpdateItemOutput::builder().set_attributes(Some(item)).build())
    }

    async fn query(&self, input: QueryInput) -> Result<QueryOutput, TransportError> {
        let tables = self.tables.lock().unwrap();
        let table_name = input.table_name().unwrap_or_default();
        let Some(table) = tables.get(table_name) else {
            return Ok(QueryOutput::builder().count(0).scanned_count(0).build());
        };
        let names = input.expression_attribute_names().cloned().unwrap_or_default();
        let values = input.expression_attribute_values().cloned().unwrap_or_default();

        let mut matched: Vec<WireItem> = table
            .items
            .iter()
            .filter(|item| {
                eval_conjunction(input.key_condition_expression(), item, &names, &values)
                    && eval_conjunction(input.filter_expression(), item, &names, &values)
            })
            .cloned()
            .collect();

        if let Some(sk) = &table.sk {
            matched.sort_by(|a, b| {
                let x = a.get(sk).map(av_from_wire);
                let y = b.get(sk).map(av_from_wire);
                match (x, y) {
                    (Some(x), Some(y)) => av_cmp(&x, &y),
                    _ => Ordering::Equal,
                }
            });
        }
        if !input.scan_index_forward().unwrap_or(true) {
            matched.reverse();
        }

        if let Some(start) = input.exclusive_start_key() {
            if let Some(pos) = matched
                .iter()
                .position(|item| key_matches(&table.pk, table.sk.as_deref(), item, start))
            {
                matched = matched.split_off(pos + 1);
            }
        }

        let limit = input.limit().map(|l| l as usize).unwrap_or(matched.len());
        let truncated = matched.len() > limit;
        matched.truncate(limit);

        let last_key = if truncated {
            matched.last().map(|item| {
                let mut k = HashMap::new();
                k.insert(table.pk.clone(), item[&table.pk].clone());
                if let Some(sk) = &table.sk {
                    if let Some(v) = item.get(sk) {
                        k.insert(sk.clone(), v.clone());
                    }
                }
                k
            })
        } else {
            None
        };

        Ok(QueryOutput::builder()
            .set_items(Some(matched.clone()))
            .count(matched.len() as i32)
            .scanned_count(matched.len() as i32)
            .set_last_evaluated_key(last_key)
            .build())
    }

    async fn scan(&self, input: ScanInput) -> Result<ScanOutput, TransportError> {
        let tables = self.tables.lock().unwrap();
        let table_name = input.table_name().unwrap_or_default();
        let Some(table) = tables.get(table_name) else {
            return Ok(ScanOutput::builder().count(0).scanned_count(0).build());
        };
        let names = input.expression_attribute_names().cloned().unwrap_or_default();
        let values = input.expression_attribute_values().cloned().unwrap_or_default();
        let total_segments = input.total_segments().unwrap_or(1).max(1);
        let segment = input.segment().unwrap_or(0);

        let mut matched: Vec<WireItem> = table
            .items
            .iter()
            .enumerate()
            .filter(|(i, _)| (*i as i32) % total_segments == segment)
            .map(|(_, item)| item.clone())
            .filter(|item| eval_conjunction(input.filter_expression(), item, &names, &values))
            .collect();

        if let Some(start) = input.exclusive_start_key() {
            if let Some(pos) = matched
                .iter()
                .position(|item| key_matches(&table.pk, table.sk.as_deref(), item, start))
            {
                matched = matched.split_off(pos + 1);
            }
        }

        let limit = input.limit().map(|l| l as usize).unwrap_or(matched.len());
        let truncated = matched.len() > limit;
        matched.truncate(limit);

        let last_key = if truncated {
            matched.last().map(|item| {
                let mut k = HashMap::new();
                k.insert(table.pk.clone(), item[&table.pk].clone());
                if let Some(sk) = &table.sk {
                    if let Some(v) = item.get(sk) {
                        k.insert(sk.clone(), v.clone());
                    }
                }
                k
            })
        } else {
            None
        };

        Ok(ScanOutput::builder()
            .set_items(Some(matched.clone()))
            .count(matched.len() as i32)
            .scanned_count(matched.len() as i32)
            .set_last_evaluated_key(last_key)
            .build())
    }

    async fn batch_get_item(
        &self,
        input: BatchGetItemInput,
    ) -> Result<BatchGetItemOutput, TransportError> {
        let budget = std::mem::take(&mut *self.unprocessed_first_call.lock().unwrap());
        let tables = self.tables.lock().unwrap();
        let mut responses = HashMap::new();
        let mut unprocessed_keys = HashMap::new();
        if let Some(request_items) = input.request_items() {
            for (table_name, keys_and_attrs) in request_items {
                let Some(table) = tables.get(table_name) else {
                    continue;
                };
                let all_keys = keys_and_attrs.keys().unwrap_or_default();
                let hold_back = budget.min(all_keys.len());
                let (serve, hold) = all_keys.split_at(all_keys.len() - hold_back);

                let mut found = Vec::new();
                for key in serve {
                    if let Some(item) = table
                        .items
                        .iter()
                        .find(|item| key_matches(&table.pk, table.sk.as_deref(), item, key))
                    {
                        found.push(item.clone());
                    }
                }
                responses.insert(table_name.clone(), found);

                if !hold.is_empty() {
                    let keys_and_attrs = KeysAndAttributes::builder()
                        .set_keys(Some(hold.to_vec()))
                        .build()
                        .expect("KeysAndAttributes requires only `keys`, which is always set");
                    unprocessed_keys.insert(table_name.clone(), keys_and_attrs);
                }
            }
        }
        Ok(BatchGetItemOutput::builder()
            .set_responses(Some(responses))
            .set_unprocessed_keys((!unprocessed_keys.is_empty()).then_some(unprocessed_keys))
            .build())
    }

    async fn batch_write_item(
        &self,
        input: BatchWriteItemInput,
    ) -> Result<BatchWriteItemOutput, TransportError> {
        let budget = std::mem::take(&mut *self.unprocessed_first_call.lock().unwrap());
        let mut tables = self.tables.lock().unwrap();
        let mut unprocessed_items = HashMap::new();
        if let Some(request_items) = input.request_items() {
            for (table_name, writes) in request_items {
                let hold_back = budget.min(writes.len());
                let (serve, hold) = writes.split_at(writes.len() - hold_back);

                let table = tables
                    .entry(table_name.clone())
                    .or_insert_with(|| FakeTable {
                        pk: "pk".to_string(),
                        sk: None,
                        items: Vec::new(),
                    });
                for write in serve {
                    if let Some(put) = write.put_request() {
                        let item: WireItem = put.item().cloned().unwrap_or_default();
                        match find_index(table, &item) {
                            Some(i) => table.items[i] = item,
                            None => table.items.push(item),
                        }
                    } else if let Some(del) = write.delete_request() {
                        let key: WireItem = del.key().cloned().unwrap_or_default();
                        if let Some(i) = find_index(table, &key) {
                            table.items.remove(i);
                        }
                    }
                }

                if !hold.is_empty() {
                    unprocessed_items.insert(table_name.clone(), hold.to_vec());
                }
            }
        }
        Ok(BatchWriteItemOutput::builder()
            .set_unprocessed_items((!unprocessed_items.is_empty()).then_some(unprocessed_items))
            .build())
    }

    async fn transact_write_items(
        &self,
        input: TransactWriteItemsInput,
    ) -> Result<TransactWriteItemsOutput, TransportError> {
        let mut tables = self.tables.lock().unwrap();
        let items = input.transact_items().unwrap_or_default();

        let mut reasons = Vec::with_capacity(items.len());
        let mut any_failed = false;
        for ti in items {
            let (table_name, key_or_item, condition_expr, names, values) = if let Some(p) = ti.put()
            {
                (
                    p.table_name().unwrap_or_default().to_string(),
                    p.item().cloned().unwrap_or_default(),
                    p.condition_expression().map(str::to_string),
                    p.expression_attribute_names().cloned().unwrap_or_default(),
                    p.expression_attribute_values().cloned().unwrap_or_default(),
                )
            } else if let Some(d) = ti.delete() {
                (
                    d.table_name().unwrap_or_default().to_string(),
                    d.key().cloned().unwrap_or_default(),
                    d.condition_expression().map(str::to_string),
                    d.expression_attribute_names().cloned().unwrap_or_default(),
                    d.expression_attribute_values().cloned().unwrap_or_default(),
                )
            } else if let Some(c) = ti.condition_check() {
                (
                    c.table_name().unwrap_or_default().to_string(),
                    c.key().cloned().unwrap_or_default(),
                    c.condition_expression().map(str::to_string),
                    c.expression_attribute_names().cloned().unwrap_or_default(),
                    c.expression_attribute_values().cloned().unwrap_or_default(),
                )
            } else {
                reasons.push("None".to_string());
                continue;
            };

            let existing = tables
                .get(&table_name)
                .and_then(|t| find_index(t, &key_or_item).map(|i| t.items[i].clone()))
                .unwrap_or_default();

            if eval_conjunction(condition_expr.as_deref(), &existing, &names, &values) {
                reasons.push("None".to_string());
            } else {
                reasons.push("ConditionalCheckFailed".to_string());
                any_failed = true;
            }
        }

        if any_failed {
            return Err(TransportError {
                code: "TransactionCanceledException".to_string(),
                message: "transaction cancelled".to_string(),
                cancellation_reasons: Some(reasons),
            });
        }

        for ti in items {
            if let Some(p) = ti.put() {
                let table = tables
                    .entry(p.table_name().unwrap_or_default().to_string())
                    .or_insert_with(|| FakeTable {
                        pk: "pk".to_string(),
                        sk: None,
                        items: Vec::new(),
                    });
                let item = p.item().cloned().unwrap_or_default();
                match find_index(table, &item) {
                    Some(i) => table.items[i] = item,
                    None => table.items.push(item),
                }
            } else if let Some(d) = ti.delete() {
                if let Some(table) = tables.get_mut(d.table_name().unwrap_or_default()) {
                    let key = d.key().cloned().unwrap_or_default();
                    if let Some(i) = find_index(table, &key) {
                        table.items.remove(i);
                    }
                }
            }
        }

        Ok(TransactWriteItemsOutput::builder().build())
    }

    async fn transact_get_items(
        &self,
        input: TransactGetItemsInput,
    ) -> Result<TransactGetItemsOutput, TransportError> {
        let tables = self.tables.lock().unwrap();
        let mut responses = Vec::new();
        for ti in input.transact_items().unwrap_or_default() {
            let get = ti.get().expect("transact_get_items: Get item");
            let table = tables.get(get.table_name().unwrap_or_default());
            let key = get.key().cloned().unwrap_or_default();
            let found = table.and_then(|t| {
                t.items
                    .iter()
                    .find(|item| key_matches(&t.pk, t.sk.as_deref(), item, &key))
                    .cloned()
            });
            responses.push(ItemResponse::builder().set_item(found).build());
        }
        Ok(TransactGetItemsOutput::builder()
            .set_responses(Some(responses))
            .build())
    }

    async fn create_table(
        &self,
        _input: CreateTableInput,
    ) -> Result<CreateTableOutput, TransportError> {
        Ok(CreateTableOutput::builder().build())
    }

    async fn describe_table(
        &self,
        _input: DescribeTableInput,
    ) -> Result<DescribeTableOutput, TransportError> {
        Ok(DescribeTableOutput::builder().build())
    }

    async fn delete_table(
        &self,
        _input: DeleteTableInput,
    ) -> Result<DeleteTableOutput, TransportError> {
        Ok(DeleteTableOutput::builder().build())
    }

    async fn update_time_to_live(
        &self,
        _input: UpdateTimeToLiveInput,
    ) -> Result<UpdateTimeToLiveOutput, TransportError> {
        Ok(UpdateTimeToLiveOutput::builder().build())
    }
}

/// Deterministic, in-process stand-in for KMS, mirroring the crate's own
/// test-only key provider fixture.
pub struct FakeKmsKeyProvider {
    wrapped: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
}

impl FakeKmsKeyProvider {
    pub fn new() -> Self {
        Self {
            wrapped: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for FakeKmsKeyProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KmsKeyProvider for FakeKmsKeyProvider {
    async fn generate_data_key(&self, _key_ref: &str) -> Result<DataKey, String> {
        let plaintext = vec![0x42u8; 32];
        let blob = format!("wrapped-{}", plaintext.len()).into_bytes();
        self.wrapped
            .lock()
            .unwrap()
            .insert(blob.clone(), plaintext.clone());
        Ok(DataKey {
            plaintext: plaintext.into(),
            ciphertext_blob: blob,
        })
    }

    async fn decrypt(&self, ciphertext_blob: &[u8]) -> Result<DataKey, String> {
        let plaintext = self
            .wrapped
            .lock()
            .unwrap()
            .get(ciphertext_blob)
            .cloned()
            .ok_or_else(|| "unknown wrapped key".to_string())?;
        Ok(DataKey {
            plaintext: plaintext.into(),
            ciphertext_blob: ciphertext_blob.to_vec(),
        })
    }
}
