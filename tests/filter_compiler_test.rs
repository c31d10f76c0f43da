//! Filter trees parsed from their wire form and compiled into query fragments

use serde_json::{json, Value};
use topology_store::filters::{BoolFilterOp, Filter};
use topology_store::storage::elasticsearch::compile_filter;

fn compile_json(filter: &str, prefix: &str) -> Option<Value> {
    let filter = Filter::from_json(filter).unwrap();
    compile_filter(Some(&filter), prefix)
}

#[test]
fn test_or_of_terms() {
    let filter = Filter::or(vec![
        Filter::term_string("Name", "eth0"),
        Filter::term_int64("MTU", 1500),
    ]);

    assert_eq!(
        compile_filter(Some(&filter), ""),
        Some(json!({"bool": {"should": [
            {"term": {"Name": "eth0"}},
            {"term": {"MTU": 1500}}
        ]}}))
    );
}

#[test]
fn test_wire_filter_compiles_like_constructed_one() {
    let fragment = compile_json(
        r#"{"BoolFilter": {"Op": "AND", "Filters": [
            {"TermStringFilter": {"Key": "Type", "Value": "veth"}},
            {"BoolFilter": {"Op": "NOT", "Filters": [
                {"RegexFilter": {"Key": "Name", "Value": "lo.*"}}
            ]}},
            {"GteInt64Filter": {"Key": "RxBytes", "Value": 1024}},
            {"LtInt64Filter": {"Key": "RxBytes", "Value": 4096}}
        ]}}"#,
        "Metric.",
    );

    assert_eq!(
        fragment,
        Some(json!({"bool": {"must": [
            {"term": {"Metric.Type": "veth"}},
            {"bool": {"must_not": [{"regexp": {"Metric.Name": "lo.*"}}]}},
            {"range": {"Metric.RxBytes": {"gte": 1024}}},
            {"range": {"Metric.RxBytes": {"lt": 4096}}}
        ]}}))
    );
}

#[test]
fn test_bool_op_keywords() {
    let cases = [
        (BoolFilterOp::Not, "must_not"),
        (BoolFilterOp::Or, "should"),
        (BoolFilterOp::And, "must"),
    ];

    for (op, keyword) in cases {
        let filter = Filter::Bool {
            op,
            filters: vec![Filter::term_int64("Depth", 2)],
        };
        let fragment = compile_filter(Some(&filter), "").unwrap();
        assert_eq!(fragment["bool"][keyword], json!([{"term": {"Depth": 2}}]));
        assert_eq!(fragment["bool"].as_object().unwrap().len(), 1);
    }
}

#[test]
fn test_children_keep_order_and_count() {
    let children: Vec<Filter> = (0..5).map(|i| Filter::term_int64("Index", i)).collect();
    let fragment = compile_filter(Some(&Filter::and(children)), "").unwrap();

    let compiled = fragment["bool"]["must"].as_array().unwrap();
    assert_eq!(compiled.len(), 5);
    for (i, child) in compiled.iter().enumerate() {
        assert_eq!(child, &json!({"term": {"Index": i}}));
    }
}

#[test]
fn test_empty_bool_node() {
    assert_eq!(
        compile_filter(Some(&Filter::or(vec![])), ""),
        Some(json!({"bool": {"should": []}}))
    );
}

#[test]
fn test_malformed_node_compiles_to_nothing() {
    assert_eq!(compile_json("{}", ""), None);

    // inside a bool node the malformed child becomes null
    assert_eq!(
        compile_json(
            r#"{"BoolFilter": {"Op": "OR", "Filters": [{}, {"TermInt64Filter": {"Key": "MTU", "Value": 1500}}]}}"#,
            ""
        ),
        Some(json!({"bool": {"should": [null, {"term": {"MTU": 1500}}]}}))
    );
}

#[test]
fn test_zero_bound_compiles_to_empty_range() {
    assert_eq!(
        compile_filter(Some(&Filter::gt("RxBytes", 0)), ""),
        Some(json!({"range": {"RxBytes": {}}}))
    );
    assert_eq!(
        compile_filter(Some(&Filter::lte("RxBytes", -1)), ""),
        Some(json!({"range": {"RxBytes": {"lte": -1}}}))
    );
}

#[test]
fn test_absent_filter_matches_everything() {
    assert_eq!(compile_filter(None, "Parent."), Some(json!({"match_all": {}})));
}

#[test]
fn test_prefix_applies_at_every_depth() {
    let filter = Filter::not(vec![Filter::or(vec![
        Filter::term_string("Name", "eth0"),
        Filter::regex("Driver", "e1000.*"),
    ])]);

    let fragment = compile_filter(Some(&filter), "Parent.").unwrap();
    assert_eq!(
        fragment,
        json!({"bool": {"must_not": [{"bool": {"should": [
            {"term": {"Parent.Name": "eth0"}},
            {"regexp": {"Parent.Driver": "e1000.*"}}
        ]}}]}})
    );
}
