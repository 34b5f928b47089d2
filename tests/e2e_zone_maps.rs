//! End-to-end tests for zone-map pruning on property scans.

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use quiver_db::{Config, Error, Graph, PropertyMap, RuntimeError, Value, props};

fn no_params() -> PropertyMap {
    PropertyMap::new()
}

/// 100 Person nodes whose ages rise from 18 to 80 in insertion order.
fn setup_ages(chunk_size: usize) -> Graph {
    let graph = Graph::new(Config::default().with_chunk_size(chunk_size));
    graph
        .transaction(|tx| {
            for i in 0..100i64 {
                let age = 18 + i * 62 / 99;
                tx.create_node(&["Person"], props([("age", age), ("seq", i)]))?;
            }
            Ok(())
        })
        .unwrap();
    graph
}

fn sorted_ids(graph: &Graph, query: &str) -> (Vec<i64>, u64) {
    let result = graph.query(query, &no_params()).unwrap();
    let mut ids: Vec<i64> = result.column("seq").unwrap();
    ids.sort_unstable();
    (ids, result.stats.chunks_skipped)
}

#[test]
fn test_pruned_scan_matches_unpruned_filter() {
    let graph = setup_ages(10);
    let (pruned, skipped) = sorted_ids(&graph, "MATCH (n:Person) WHERE n.age > 75 RETURN n.seq AS seq");
    let (unpruned, unpruned_skips) =
        sorted_ids(&graph, "MATCH (n:Person) WHERE n.age + 0 > 75 RETURN n.seq AS seq");

    assert_eq!(pruned, unpruned);
    assert_eq!(pruned, (93..100).collect::<Vec<i64>>());
    assert_eq!(skipped, 9);
    assert_eq!(unpruned_skips, 0);
}

#[test]
fn test_literal_on_the_left_is_pushed_too() {
    let graph = setup_ages(10);
    let (ids, skipped) = sorted_ids(&graph, "MATCH (n:Person) WHERE 20 >= n.age RETURN n.seq AS seq");
    assert_eq!(ids, (0..5).collect::<Vec<i64>>());
    assert!(skipped > 0);
}

#[test]
fn test_parameter_predicates_prune() {
    let graph = setup_ages(10);
    let result = graph
        .query(
            "MATCH (n:Person) WHERE n.age >= $lo AND n.age < $hi RETURN count(*) AS c",
            &props([("lo", 40), ("hi", 50)]),
        )
        .unwrap();
    let expected = (0..100i64).map(|i| 18 + i * 62 / 99).filter(|a| (40..50).contains(a)).count() as i64;
    assert_eq!(result.rows[0].get::<i64>("c").unwrap(), expected);
    assert!(result.stats.chunks_skipped > 0);
}

#[test]
fn test_mixed_type_chunk_reports_type_mismatch() {
    let graph = setup_ages(10);
    graph.query("CREATE (:Person {age: 'unknown', seq: 100})", &no_params()).unwrap();
    let err = graph
        .query("MATCH (n:Person) WHERE n.age > 75 RETURN n.seq AS seq", &no_params())
        .unwrap_err();
    assert!(matches!(err, Error::Runtime(RuntimeError::TypeMismatch { .. })));
}

#[test]
fn test_missing_property_is_never_a_match() {
    let graph = setup_ages(10);
    graph.query("CREATE (:Person {seq: 200})", &no_params()).unwrap();
    let (ids, _) = sorted_ids(&graph, "MATCH (n:Person) WHERE n.age > 75 RETURN n.seq AS seq");
    assert_eq!(ids, (93..100).collect::<Vec<i64>>());
}

/// One `:Item` node per entry, tagged with its position in `seq`. `Null`
/// entries leave `x` unset.
fn setup_items(chunk_size: usize, values: &[Value]) -> Graph {
    let graph = Graph::new(Config::default().with_chunk_size(chunk_size));
    graph
        .transaction(|tx| {
            for (i, value) in values.iter().enumerate() {
                let mut properties = props([("seq", i as i64)]);
                if !value.is_null() {
                    properties.insert("x".to_string(), value.clone());
                }
                tx.create_node(&["Item"], properties)?;
            }
            Ok(())
        })
        .unwrap();
    graph
}

fn matching(graph: &Graph, predicate: &str, literal: &Value) -> (Vec<i64>, u64) {
    let query = format!("MATCH (n:Item) WHERE {predicate} RETURN n.seq AS seq");
    let result = graph.query(&query, &props([("lit", literal.clone())])).unwrap();
    let mut ids: Vec<i64> = result.column("seq").unwrap();
    ids.sort_unstable();
    (ids, result.stats.chunks_skipped)
}

const OPS: [&str; 6] = ["=", "<>", "<", "<=", ">", ">="];

fn number() -> impl Strategy<Value = Value> {
    prop_oneof![
        3 => (-3i64..4).prop_map(Value::Int),
        3 => (-6i32..7).prop_map(|h| Value::Float(f64::from(h) / 2.0)),
        1 => Just(Value::Float(f64::NAN)),
        1 => Just(Value::Null),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn pruned_and_unpruned_comparisons_agree(
        values in prop::collection::vec(number(), 0..24),
        literal in number(),
        chunk_size in 1usize..6,
    ) {
        let graph = setup_items(chunk_size, &values);
        for op in OPS {
            let (pruned, _) = matching(&graph, &format!("n.x {op} $lit"), &literal);
            let (unpruned, skipped) = matching(&graph, &format!("n.x + 0 {op} $lit"), &literal);
            prop_assert_eq!(skipped, 0);
            prop_assert_eq!(pruned, unpruned, "op {} literal {:?}", op, literal);
        }
    }
}

#[test]
fn test_nan_row_matches_not_equal() {
    let graph = setup_items(4, &[Value::Float(5.0), Value::Float(5.0), Value::Float(f64::NAN)]);
    let result = graph
        .query("MATCH (n:Item) WHERE n.x <> 5.0 RETURN count(*) AS c", &no_params())
        .unwrap();
    assert_eq!(result.rows[0].get::<i64>("c").unwrap(), 1);

    let (ids, _) = matching(&graph, "n.x <> $lit", &Value::Float(5.0));
    assert_eq!(ids, vec![2]);
    let (ids, _) = matching(&graph, "n.x = $lit", &Value::Float(f64::NAN));
    assert!(ids.is_empty());
}

#[test]
fn test_mixed_int_and_float_chunks_under_not_equal() {
    let graph = setup_items(
        4,
        &[
            // chunk 0: every value equals 5
            Value::Int(5),
            Value::Float(5.0),
            Value::Int(5),
            Value::Float(5.0),
            // chunk 1: one value differs
            Value::Int(5),
            Value::Float(5.5),
            Value::Int(5),
            Value::Null,
        ],
    );
    for literal in [Value::Int(5), Value::Float(5.0)] {
        let (ids, skipped) = matching(&graph, "n.x <> $lit", &literal);
        assert_eq!(ids, vec![5]);
        assert_eq!(skipped, 1);
    }
    let (ids, skipped) = matching(&graph, "n.x <> $lit", &Value::Int(6));
    assert_eq!(ids, vec![0, 1, 2, 3, 4, 5, 6]);
    assert_eq!(skipped, 0);
}

#[test]
fn test_mixed_chunks_beyond_exact_floats_match_the_row_filter() {
    let big = 1i64 << 53;
    let values = [Value::Int(big + 1), Value::Float(big as f64), Value::Int(big - 1), Value::Int(7)];
    let graph = setup_items(4, &values);
    let literals = [Value::Int(big), Value::Int(big + 1), Value::Float(big as f64), Value::Int(big + 2)];
    for literal in &literals {
        for op in OPS {
            let (pruned, _) = matching(&graph, &format!("n.x {op} $lit"), literal);
            let (unpruned, _) = matching(&graph, &format!("n.x + 0 {op} $lit"), literal);
            assert_eq!(pruned, unpruned, "op {op} literal {literal:?}");
        }
    }
}

#[test]
fn test_removing_boundary_values_keeps_results_exact() {
    let values: Vec<Value> = [1, 10, 10, 4].into_iter().map(Value::Int).collect();
    let graph = setup_items(4, &values);

    // One of two maximum values goes; the other must still be found.
    graph.query("MATCH (n:Item) WHERE n.seq = 1 DELETE n", &no_params()).unwrap();
    let (ids, _) = matching(&graph, "n.x = $lit", &Value::Int(10));
    assert_eq!(ids, vec![2]);

    // The last maximum goes: the chunk now prunes for > 5.
    graph.query("MATCH (n:Item) WHERE n.seq = 2 DELETE n", &no_params()).unwrap();
    let (ids, skipped) = matching(&graph, "n.x > $lit", &Value::Int(5));
    assert!(ids.is_empty());
    assert_eq!(skipped, 1);

    // The minimum is overwritten with a larger value.
    graph.query("MATCH (n:Item) WHERE n.seq = 0 SET n.x = 20", &no_params()).unwrap();
    let (ids, _) = matching(&graph, "n.x > $lit", &Value::Int(5));
    assert_eq!(ids, vec![0]);
    let (ids, _) = matching(&graph, "n.x < $lit", &Value::Int(2));
    assert!(ids.is_empty());
    let (ids, _) = matching(&graph, "n.x <= $lit", &Value::Int(4));
    assert_eq!(ids, vec![3]);

    // Removing the property entirely is a removal too.
    graph.query("MATCH (n:Item) WHERE n.seq = 3 REMOVE n.x", &no_params()).unwrap();
    let (ids, _) = matching(&graph, "n.x <> $lit", &Value::Int(0));
    assert_eq!(ids, vec![0]);
}

#[test]
fn test_removing_nan_restores_not_equal_pruning() {
    let graph = setup_items(4, &[Value::Float(5.0), Value::Float(5.0), Value::Float(f64::NAN)]);
    graph.query("MATCH (n:Item) WHERE n.seq = 2 DELETE n", &no_params()).unwrap();
    let (ids, skipped) = matching(&graph, "n.x <> $lit", &Value::Float(5.0));
    assert!(ids.is_empty());
    assert_eq!(skipped, 1);

    graph
        .query("MATCH (n:Item) WHERE n.seq = 0 SET n.x = $nan", &props([("nan", f64::NAN)]))
        .unwrap();
    let (ids, _) = matching(&graph, "n.x <> $lit", &Value::Float(5.0));
    assert_eq!(ids, vec![0]);
}
