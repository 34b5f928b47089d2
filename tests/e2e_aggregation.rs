//! End-to-end tests for aggregation, grouping, DISTINCT and ordering.

use pretty_assertions::assert_eq;
use quiver_db::{Graph, PropertyMap, Value};

fn no_params() -> PropertyMap {
    PropertyMap::new()
}

fn setup_people() -> Graph {
    let graph = Graph::open_memory();
    let people = [
        ("Alice", 25, "Berlin"),
        ("Bob", 30, "Paris"),
        ("Charlie", 35, "Berlin"),
        ("Diana", 28, "Paris"),
        ("Eve", 22, "Rome"),
    ];
    for (name, age, city) in people {
        let params = quiver_db::props([
            ("name", Value::from(name)),
            ("age", Value::from(age)),
            ("city", Value::from(city)),
        ]);
        graph
            .query("CREATE (n:Person {name: $name, age: $age, city: $city})", &params)
            .unwrap();
    }
    graph
}

#[test]
fn test_count_sum_avg_min_max() {
    let graph = setup_people();
    let result = graph
        .query(
            "MATCH (n:Person) RETURN count(n) AS c, sum(n.age) AS s, avg(n.age) AS a, \
             min(n.age) AS lo, max(n.name) AS hi",
            &no_params(),
        )
        .unwrap();
    let row = &result.rows[0];
    assert_eq!(row.get::<i64>("c").unwrap(), 5);
    assert_eq!(row.get::<i64>("s").unwrap(), 140);
    assert_eq!(row.get::<f64>("a").unwrap(), 28.0);
    assert_eq!(row.get::<i64>("lo").unwrap(), 22);
    assert_eq!(row.get::<String>("hi").unwrap(), "Eve");
}

#[test]
fn test_count_on_empty_match_is_zero() {
    let graph = Graph::open_memory();
    let result = graph
        .query("MATCH (n:Nobody) RETURN count(*) AS c, avg(n.age) AS a", &no_params())
        .unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result.rows[0].get::<i64>("c").unwrap(), 0);
    assert_eq!(result.rows[0].value("a"), Some(&Value::Null));
}

#[test]
fn test_grouped_aggregation() {
    let graph = setup_people();
    let result = graph
        .query(
            "MATCH (n:Person) RETURN n.city AS city, count(*) AS people ORDER BY people DESC, city",
            &no_params(),
        )
        .unwrap();
    let cities: Vec<String> = result.column("city").unwrap();
    let counts: Vec<i64> = result.column("people").unwrap();
    assert_eq!(cities, vec!["Berlin", "Paris", "Rome"]);
    assert_eq!(counts, vec![2, 2, 1]);
}

#[test]
fn test_collect_and_distinct_count() {
    let graph = setup_people();
    let result = graph
        .query(
            "MATCH (n:Person) WHERE n.city = 'Berlin' \
             RETURN collect(n.name) AS names, count(DISTINCT n.city) AS cities",
            &no_params(),
        )
        .unwrap();
    let mut names: Vec<String> = result.rows[0].get("names").unwrap();
    names.sort();
    assert_eq!(names, vec!["Alice", "Charlie"]);
    assert_eq!(result.rows[0].get::<i64>("cities").unwrap(), 1);
}

#[test]
fn test_return_distinct() {
    let graph = setup_people();
    let result = graph
        .query("MATCH (n:Person) RETURN DISTINCT n.city AS city ORDER BY city", &no_params())
        .unwrap();
    assert_eq!(result.column::<String>("city").unwrap(), vec!["Berlin", "Paris", "Rome"]);
}

#[test]
fn test_order_by_with_nulls() {
    let graph = setup_people();
    graph.query("CREATE (n:Person {name: 'Zed'})", &no_params()).unwrap();

    let ages = |query: &str| -> Vec<Option<i64>> { graph.query(query, &no_params()).unwrap().column("age").unwrap() };
    let asc = ages("MATCH (n:Person) RETURN n.age AS age ORDER BY age");
    assert_eq!(asc.last(), Some(&None));
    assert_eq!(asc.first(), Some(&Some(22)));

    let desc = ages("MATCH (n:Person) RETURN n.age AS age ORDER BY age DESC");
    assert_eq!(desc.first(), Some(&None));

    let nulls_first = ages("MATCH (n:Person) RETURN n.age AS age ORDER BY age ASC NULLS FIRST LIMIT 2");
    assert_eq!(nulls_first, vec![None, Some(22)]);
}

#[test]
fn test_aggregate_over_multi_hop() {
    let graph = Graph::open_memory();
    graph
        .query(
            "CREATE (r:Root)-[:HAS]->(m1:Mid {w: 1})-[:HAS]->(:Leaf {v: 10}), \
                    (r)-[:HAS]->(m2:Mid {w: 2})-[:HAS]->(:Leaf {v: 20})",
            &no_params(),
        )
        .unwrap();
    graph
        .query("MATCH (m:Mid {w: 2}) CREATE (m)-[:HAS]->(:Leaf {v: 30})", &no_params())
        .unwrap();
    let result = graph
        .query(
            "MATCH (r:Root)-[:HAS]->(m)-[:HAS]->(l) RETURN m.w AS w, count(l) AS leaves, sum(l.v) AS total ORDER BY w",
            &no_params(),
        )
        .unwrap();
    assert_eq!(result.column::<i64>("leaves").unwrap(), vec![1, 2]);
    assert_eq!(result.column::<i64>("total").unwrap(), vec![10, 50]);
}
