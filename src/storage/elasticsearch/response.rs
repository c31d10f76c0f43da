//! Engine response documents
//!
//! Only the envelope is typed; `_source` and aggregations stay opaque JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Response to single-document operations (index, update, get, delete)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BaseResponse {
    #[serde(rename = "_index", default)]
    pub index: String,

    #[serde(rename = "_type", default)]
    pub doc_type: String,

    #[serde(rename = "_id", default)]
    pub id: String,

    #[serde(rename = "_version", default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,

    #[serde(default)]
    pub found: bool,

    #[serde(rename = "_source", default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Value>,

    /// `created`, `updated`, `deleted`, `not_found`, ...
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

/// Response to `_search`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    #[serde(default)]
    pub took: u64,

    #[serde(default)]
    pub timed_out: bool,

    #[serde(rename = "_shards", default, skip_serializing_if = "Option::is_none")]
    pub shards: Option<Value>,

    #[serde(default)]
    pub hits: Hits,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregations: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Hits {
    /// A bare number on older engines, `{"value": n, "relation": "eq"}` on newer ones
    #[serde(default)]
    pub total: Value,

    #[serde(default)]
    pub max_score: Option<f64>,

    #[serde(default)]
    pub hits: Vec<Hit>,
}

impl Hits {
    pub fn total_count(&self) -> u64 {
        match &self.total {
            Value::Number(n) => n.as_u64().unwrap_or(0),
            Value::Object(map) => map.get("value").and_then(Value::as_u64).unwrap_or(0),
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Hit {
    #[serde(rename = "_index", default)]
    pub index: String,

    #[serde(rename = "_type", default)]
    pub doc_type: String,

    #[serde(rename = "_id", default)]
    pub id: String,

    #[serde(rename = "_score", default)]
    pub score: Option<f64>,

    #[serde(rename = "_source", default)]
    pub source: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<Vec<Value>>,
}
