//! Abstract filter trees
//!
//! A [`Filter`] describes a boolean/comparison predicate over document fields
//! independently of any storage engine. Backends translate it into their own
//! query language (see [`crate::storage::elasticsearch::compile_filter`]).
//!
//! Filters serialize to the wire shape used by topology clients, where every
//! node is an object with exactly one populated member:
//!
//! ```json
//! {"BoolFilter": {"Op": "OR", "Filters": [
//!     {"TermStringFilter": {"Key": "Name", "Value": "eth0"}},
//!     {"GtInt64Filter": {"Key": "MTU", "Value": 1500}}
//! ]}}
//! ```

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Boolean combinator of a [`Filter::Bool`] node
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum BoolFilterOp {
    And,
    Or,
    Not,
}

/// Kind of bound carried by a [`Filter::Range`] node
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum RangeBound {
    /// Strictly greater than
    Gt,
    /// Strictly lower than
    Lt,
    /// Greater than or equal
    Gte,
    /// Lower than or equal
    Lte,
}

/// A node of a filter tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "FilterWire", into = "FilterWire")]
pub enum Filter {
    /// Boolean combination of child filters, in order
    Bool {
        op: BoolFilterOp,
        filters: Vec<Filter>,
    },

    /// Exact match on a string field
    TermString { key: String, value: String },

    /// Exact match on an integer field
    TermInt64 { key: String, value: i64 },

    /// Regular expression match on a field
    Regex { key: String, pattern: String },

    /// Single numeric bound on a field
    Range {
        key: String,
        value: i64,
        bound: RangeBound,
    },

    /// A node without any populated shape. Backends treat it as unsupported.
    Empty,
}

impl Filter {
    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::Bool {
            op: BoolFilterOp::And,
            filters,
        }
    }

    pub fn or(filters: Vec<Filter>) -> Self {
        Filter::Bool {
            op: BoolFilterOp::Or,
            filters,
        }
    }

    pub fn not(filters: Vec<Filter>) -> Self {
        Filter::Bool {
            op: BoolFilterOp::Not,
            filters,
        }
    }

    pub fn term_string(key: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::TermString {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn term_int64(key: impl Into<String>, value: i64) -> Self {
        Filter::TermInt64 {
            key: key.into(),
            value,
        }
    }

    pub fn regex(key: impl Into<String>, pattern: impl Into<String>) -> Self {
        Filter::Regex {
            key: key.into(),
            pattern: pattern.into(),
        }
    }

    pub fn range(key: impl Into<String>, bound: RangeBound, value: i64) -> Self {
        Filter::Range {
            key: key.into(),
            value,
            bound,
        }
    }

    pub fn gt(key: impl Into<String>, value: i64) -> Self {
        Self::range(key, RangeBound::Gt, value)
    }

    pub fn lt(key: impl Into<String>, value: i64) -> Self {
        Self::range(key, RangeBound::Lt, value)
    }

    pub fn gte(key: impl Into<String>, value: i64) -> Self {
        Self::range(key, RangeBound::Gte, value)
    }

    pub fn lte(key: impl Into<String>, value: i64) -> Self {
        Self::range(key, RangeBound::Lte, value)
    }

    /// Parse a filter tree from its JSON wire form
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

// Wire representation: one optional member per shape, at most one populated.

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct FilterWire {
    #[serde(rename = "BoolFilter", default, skip_serializing_if = "Option::is_none")]
    bool_filter: Option<BoolFilterWire>,

    #[serde(rename = "TermStringFilter", default, skip_serializing_if = "Option::is_none")]
    term_string: Option<KeyValue<String>>,

    #[serde(rename = "TermInt64Filter", default, skip_serializing_if = "Option::is_none")]
    term_int64: Option<KeyValue<i64>>,

    #[serde(rename = "RegexFilter", default, skip_serializing_if = "Option::is_none")]
    regex: Option<KeyValue<String>>,

    #[serde(rename = "GtInt64Filter", default, skip_serializing_if = "Option::is_none")]
    gt: Option<KeyValue<i64>>,

    #[serde(rename = "LtInt64Filter", default, skip_serializing_if = "Option::is_none")]
    lt: Option<KeyValue<i64>>,

    #[serde(rename = "GteInt64Filter", default, skip_serializing_if = "Option::is_none")]
    gte: Option<KeyValue<i64>>,

    #[serde(rename = "LteInt64Filter", default, skip_serializing_if = "Option::is_none")]
    lte: Option<KeyValue<i64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BoolFilterWire {
    #[serde(rename = "Op")]
    op: BoolFilterOp,

    #[serde(rename = "Filters", default)]
    filters: Vec<Filter>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeyValue<T> {
    #[serde(rename = "Key")]
    key: String,

    #[serde(rename = "Value")]
    value: T,
}

impl From<FilterWire> for Filter {
    fn from(wire: FilterWire) -> Self {
        // First populated shape wins, in declaration order.
        if let Some(f) = wire.bool_filter {
            return Filter::Bool {
                op: f.op,
                filters: f.filters,
            };
        }
        if let Some(f) = wire.term_string {
            return Filter::TermString {
                key: f.key,
                value: f.value,
            };
        }
        if let Some(f) = wire.term_int64 {
            return Filter::TermInt64 {
                key: f.key,
                value: f.value,
            };
        }
        if let Some(f) = wire.regex {
            return Filter::Regex {
                key: f.key,
                pattern: f.value,
            };
        }

        let bounds = [
            (wire.gt, RangeBound::Gt),
            (wire.lt, RangeBound::Lt),
            (wire.gte, RangeBound::Gte),
            (wire.lte, RangeBound::Lte),
        ];
        for (kv, bound) in bounds {
            if let Some(f) = kv {
                return Filter::Range {
                    key: f.key,
                    value: f.value,
                    bound,
                };
            }
        }

        Filter::Empty
    }
}

impl From<Filter> for FilterWire {
    fn from(filter: Filter) -> Self {
        let mut wire = FilterWire::default();
        match filter {
            Filter::Bool { op, filters } => wire.bool_filter = Some(BoolFilterWire { op, filters }),
            Filter::TermString { key, value } => wire.term_string = Some(KeyValue { key, value }),
            Filter::TermInt64 { key, value } => wire.term_int64 = Some(KeyValue { key, value }),
            Filter::Regex { key, pattern } => {
                wire.regex = Some(KeyValue {
                    key,
                    value: pattern,
                })
            }
            Filter::Range { key, value, bound } => {
                let kv = Some(KeyValue { key, value });
                match bound {
                    RangeBound::Gt => wire.gt = kv,
                    RangeBound::Lt => wire.lt = kv,
                    RangeBound::Gte => wire.gte = kv,
                    RangeBound::Lte => wire.lte = kv,
                }
            }
            Filter::Empty => {}
        }
        wire
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    #[test]
    fn test_parse_nested_filter() {
        let filter = Filter::from_json(
            r#"{"BoolFilter": {"Op": "OR", "Filters": [
                {"TermStringFilter": {"Key": "Name", "Value": "eth0"}},
                {"GteInt64Filter": {"Key": "MTU", "Value": 1500}}
            ]}}"#,
        )
        .unwrap();

        assert_eq!(
            filter,
            Filter::or(vec![
                Filter::term_string("Name", "eth0"),
                Filter::gte("MTU", 1500),
            ])
        );
    }

    #[test]
    fn test_empty_object_is_empty_filter() {
        let filter = Filter::from_json("{}").unwrap();
        assert_eq!(filter, Filter::Empty);
    }

    #[test]
    fn test_first_populated_shape_wins() {
        let filter = Filter::from_json(
            r#"{"RegexFilter": {"Key": "Name", "Value": "eth.*"},
                "LtInt64Filter": {"Key": "MTU", "Value": 9000}}"#,
        )
        .unwrap();

        assert_eq!(filter, Filter::regex("Name", "eth.*"));
    }

    #[test]
    fn test_serialize_range_uses_bound_member() {
        let value = serde_json::to_value(Filter::lt("Metric.RxBytes", 42)).unwrap();
        assert_eq!(
            value,
            json!({"LtInt64Filter": {"Key": "Metric.RxBytes", "Value": 42}})
        );
    }

    #[test]
    fn test_bool_op_from_str() {
        assert_eq!(BoolFilterOp::from_str("and").unwrap(), BoolFilterOp::And);
        assert_eq!(BoolFilterOp::Not.to_string(), "NOT");
        assert_eq!(RangeBound::Gte.to_string(), "gte");
    }
}
