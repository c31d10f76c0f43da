//! Translation of filter trees into the Elasticsearch query DSL
//!
//! [`compile_filter`] is pure and total: it never fails. Two behaviours follow
//! the historical wire format:
//!
//! - a [`Filter::Empty`] node compiles to `None`, i.e. no constraint at all. Inside
//!   a bool node it shows up as a JSON `null` child.
//! - a range bound equal to `0` is omitted, so `Gt(0)` compiles to an empty range
//!   (`{"range": {"key": {}}}`) and cannot be told apart from "no bound".

use crate::filters::{BoolFilterOp, Filter, RangeBound};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Sort direction of search results
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Ascending => "asc",
            SortOrder::Descending => "desc",
        }
    }
}

/// Compile a filter tree into a query fragment
///
/// `prefix` is prepended to every field key, which lets callers target fields
/// of nested documents (`"Metric."`, `"Parent."`, ...). A missing filter matches
/// every document.
pub fn compile_filter(filter: Option<&Filter>, prefix: &str) -> Option<Value> {
    let filter = match filter {
        Some(filter) => filter,
        None => return Some(json!({ "match_all": {} })),
    };

    match filter {
        Filter::Bool { op, filters } => {
            let children: Vec<Value> = filters
                .iter()
                .map(|child| compile_filter(Some(child), prefix).unwrap_or(Value::Null))
                .collect();
            Some(json!({ "bool": { bool_keyword(*op): children } }))
        }
        Filter::TermString { key, value } => Some(field_clause("term", prefix, key, json!(value))),
        Filter::TermInt64 { key, value } => Some(field_clause("term", prefix, key, json!(value))),
        Filter::Regex { key, pattern } => Some(field_clause("regexp", prefix, key, json!(pattern))),
        Filter::Range { key, value, bound } => {
            let mut bounds = Map::new();
            if *value != 0 {
                bounds.insert(range_keyword(*bound).to_string(), json!(value));
            }
            Some(field_clause("range", prefix, key, Value::Object(bounds)))
        }
        Filter::Empty => None,
    }
}

/// Build a `_search` request body from an optional filter
pub fn search_body(
    filter: Option<&Filter>,
    prefix: &str,
    sort: Option<(&str, SortOrder)>,
    size: Option<usize>,
) -> Value {
    let mut body = Map::new();
    if let Some(query) = compile_filter(filter, prefix) {
        body.insert("query".to_string(), query);
    }
    if let Some((field, order)) = sort {
        body.insert(
            "sort".to_string(),
            json!([{ field: { "order": order.as_str() } }]),
        );
    }
    if let Some(size) = size {
        body.insert("size".to_string(), json!(size));
    }
    Value::Object(body)
}

fn bool_keyword(op: BoolFilterOp) -> &'static str {
    match op {
        BoolFilterOp::Not => "must_not",
        BoolFilterOp::Or => "should",
        BoolFilterOp::And => "must",
    }
}

fn range_keyword(bound: RangeBound) -> &'static str {
    match bound {
        RangeBound::Gt => "gt",
        RangeBound::Lt => "lt",
        RangeBound::Gte => "gte",
        RangeBound::Lte => "lte",
    }
}

fn field_clause(kind: &str, prefix: &str, key: &str, value: Value) -> Value {
    let mut field = Map::new();
    field.insert(format!("{}{}", prefix, key), value);
    let mut clause = Map::new();
    clause.insert(kind.to_string(), Value::Object(field));
    Value::Object(clause)
}
