//! End-to-end tests for multi-part statements: OPTIONAL MATCH, WITH and
//! UNWIND, in Cypher and through the statement builder.

use pretty_assertions::assert_eq;
use quiver_db::pattern::{EdgePattern, Expr, NodePattern, Pattern, ReturnItem, WithClause};
use quiver_db::{Graph, PropertyMap, Statement, Value, props};

fn no_params() -> PropertyMap {
    PropertyMap::new()
}

/// Ann, Ben and Cat are employed; Dan is not. Ann knows Ben and Cat, Ben
/// knows Cat.
fn setup_staff() -> Graph {
    let graph = Graph::open_memory();
    graph
        .query(
            "CREATE (ann:Person {name: 'Ann', age: 31})-[:WORKS_AT]->(acme:Company {name: 'Acme'}), \
                    (ben:Person {name: 'Ben', age: 45})-[:WORKS_AT]->(acme), \
                    (cat:Person {name: 'Cat', age: 28})-[:WORKS_AT]->(:Company {name: 'Globex'}), \
                    (:Person {name: 'Dan', age: 52}), \
                    (ann)-[:KNOWS]->(ben), (ann)-[:KNOWS]->(cat), (ben)-[:KNOWS]->(cat)",
            &no_params(),
        )
        .unwrap();
    graph
}

// ============================================================================
// OPTIONAL MATCH
// ============================================================================

#[test]
fn test_optional_match_keeps_unmatched_rows() {
    let graph = setup_staff();
    let result = graph
        .query(
            "MATCH (p:Person) OPTIONAL MATCH (p)-[:WORKS_AT]->(c:Company) \
             RETURN p.name AS person, c.name AS company ORDER BY person",
            &no_params(),
        )
        .unwrap();
    assert_eq!(result.len(), 4);
    let people: Vec<String> = result.column("person").unwrap();
    let companies: Vec<Option<String>> = result.column("company").unwrap();
    assert_eq!(people, vec!["Ann", "Ben", "Cat", "Dan"]);
    assert_eq!(
        companies,
        vec![Some("Acme".to_string()), Some("Acme".to_string()), Some("Globex".to_string()), None]
    );
}

#[test]
fn test_optional_where_only_limits_the_optional_part() {
    let graph = setup_staff();
    let result = graph
        .query(
            "MATCH (p:Person) OPTIONAL MATCH (p)-[:WORKS_AT]->(c) WHERE p.age > 40 \
             RETURN p.name AS person, c.name AS company ORDER BY person",
            &no_params(),
        )
        .unwrap();
    let companies: Vec<Option<String>> = result.column("company").unwrap();
    // Dan passes the filter but has no employer.
    assert_eq!(companies, vec![None, Some("Acme".to_string()), None, None]);
}

#[test]
fn test_count_of_optional_variable_skips_nulls() {
    let graph = setup_staff();
    let result = graph
        .query(
            "MATCH (p:Person) OPTIONAL MATCH (p)-[:WORKS_AT]->(c) RETURN count(c) AS employed, count(*) AS people",
            &no_params(),
        )
        .unwrap();
    assert_eq!(result.rows[0].get::<i64>("employed").unwrap(), 3);
    assert_eq!(result.rows[0].get::<i64>("people").unwrap(), 4);
}

#[test]
fn test_optional_match_without_input_yields_one_null_row() {
    let graph = setup_staff();
    let result = graph.query("OPTIONAL MATCH (x:Robot) RETURN x", &no_params()).unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result.rows[0].value("x"), Some(&Value::Null));
}

#[test]
fn test_optional_match_plan_shape() {
    let graph = setup_staff();
    let stmt = Statement::new()
        .match_pattern(Pattern::start(NodePattern::var("p").label("Person")))
        .optional_match(
            vec![Pattern::start(NodePattern::var("p")).then(EdgePattern::out().edge_type("KNOWS"), NodePattern::var("f"))],
            None,
        )
        .returning([Expr::prop("p", "name"), Expr::prop("f", "name")]);
    let plan = graph.explain(&stmt).unwrap();
    assert!(plan.contains("Optional"));
    assert!(plan.contains("Outer"));
    assert!(!plan.is_factorized());

    // Ann knows two people, Ben one, Cat and Dan nobody.
    let result = graph.execute(&stmt).unwrap();
    assert_eq!(result.len(), 5);
}

// ============================================================================
// WITH
// ============================================================================

#[test]
fn test_with_aggregates_then_filters() {
    let graph = setup_staff();
    let result = graph
        .query(
            "MATCH (p:Person)-[:WORKS_AT]->(c:Company) WITH c, count(p) AS staff WHERE staff > 1 \
             RETURN c.name AS company, staff",
            &no_params(),
        )
        .unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result.rows[0].values(), &[Value::from("Acme"), Value::Int(2)]);
}

#[test]
fn test_with_carries_nodes_into_the_next_match() {
    let graph = setup_staff();
    let result = graph
        .query(
            "MATCH (a:Person {name: 'Ann'}) WITH a MATCH (a)-[:KNOWS]->(f) RETURN f.name AS name ORDER BY name",
            &no_params(),
        )
        .unwrap();
    let names: Vec<String> = result.column("name").unwrap();
    assert_eq!(names, vec!["Ben", "Cat"]);
}

#[test]
fn test_with_alias_keeps_node_constraints() {
    let graph = setup_staff();
    let result = graph
        .query(
            "MATCH (p)-[:WORKS_AT]->(c) WITH c AS employer, count(*) AS n \
             MATCH (employer:Company)<-[:WORKS_AT]-(q {age: 28}) RETURN employer.name AS name, n, q.name AS who",
            &no_params(),
        )
        .unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(
        result.rows[0].values(),
        &[Value::from("Globex"), Value::Int(1), Value::from("Cat")]
    );
}

#[test]
fn test_with_order_and_limit_before_next_part() {
    let graph = setup_staff();
    let result = graph
        .query(
            "MATCH (p:Person) WITH p ORDER BY p.age DESC LIMIT 2 \
             OPTIONAL MATCH (p)-[:WORKS_AT]->(c) RETURN p.name AS name, c.name AS company ORDER BY name",
            &no_params(),
        )
        .unwrap();
    let names: Vec<String> = result.column("name").unwrap();
    let companies: Vec<Option<String>> = result.column("company").unwrap();
    assert_eq!(names, vec!["Ben", "Dan"]);
    assert_eq!(companies, vec![Some("Acme".to_string()), None]);
}

#[test]
fn test_with_distinct_and_star() {
    let graph = setup_staff();
    let result = graph
        .query(
            "MATCH (:Person)-[:KNOWS]->(f) WITH DISTINCT f WITH * RETURN f.name AS name ORDER BY name",
            &no_params(),
        )
        .unwrap();
    let names: Vec<String> = result.column("name").unwrap();
    assert_eq!(names, vec!["Ben", "Cat"]);
}

#[test]
fn test_with_through_statement_builder() {
    let graph = setup_staff();
    let employs = Pattern::start(NodePattern::var("c").label("Company"))
        .then(EdgePattern::incoming().edge_type("WORKS_AT"), NodePattern::var("p"));
    let stmt = Statement::new()
        .match_pattern(employs)
        .with(
            WithClause::new([
                ReturnItem::new(Expr::prop("c", "name")).alias("company"),
                ReturnItem::new(Expr::call("avg", vec![Expr::prop("p", "age")])).alias("mean"),
            ])
            .filter(Expr::var("mean").greater_than(Expr::lit(30))),
        )
        .returning([Expr::var("company"), Expr::var("mean")]);
    let result = graph.execute(&stmt).unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result.rows[0].values(), &[Value::from("Acme"), Value::Float(38.0)]);
}

// ============================================================================
// UNWIND
// ============================================================================

#[test]
fn test_unwind_literal_list() {
    let graph = Graph::open_memory();
    let result = graph.query("UNWIND [1, 2, 3] AS x RETURN x", &no_params()).unwrap();
    assert_eq!(result.len(), 3);
    let xs: Vec<i64> = result.column("x").unwrap();
    assert_eq!(xs, vec![1, 2, 3]);
}

#[test]
fn test_unwind_null_and_empty_produce_no_rows() {
    let graph = Graph::open_memory();
    assert!(graph.query("UNWIND null AS x RETURN x", &no_params()).unwrap().is_empty());
    assert!(graph.query("UNWIND [] AS x RETURN x", &no_params()).unwrap().is_empty());
}

#[test]
fn test_unwind_multiplies_matched_rows() {
    let graph = setup_staff();
    let result = graph
        .query(
            "MATCH (p:Person {name: 'Ann'}) UNWIND [10, 20] AS bonus RETURN p.name AS name, bonus ORDER BY bonus",
            &no_params(),
        )
        .unwrap();
    let bonuses: Vec<i64> = result.column("bonus").unwrap();
    assert_eq!(bonuses, vec![10, 20]);
}

#[test]
fn test_unwind_parameter_then_match() {
    let graph = setup_staff();
    let params = props([("names", vec!["Dan", "Ben", "Zed"])]);
    let result = graph
        .query(
            "UNWIND $names AS wanted WITH wanted MATCH (p:Person {name: wanted}) RETURN p.age AS age ORDER BY age",
            &params,
        )
        .unwrap();
    let ages: Vec<i64> = result.column("age").unwrap();
    assert_eq!(ages, vec![45, 52]);
}

#[test]
fn test_unwind_feeds_aggregation_and_writes() {
    let graph = Graph::open_memory();
    let result = graph
        .query("UNWIND [1, 2, 3, 4] AS x WITH x WHERE x > 1 RETURN sum(x) AS total", &no_params())
        .unwrap();
    assert_eq!(result.rows[0].get::<i64>("total").unwrap(), 9);

    let created = graph.query("UNWIND ['a', 'b'] AS tag CREATE (:Tag {name: tag})", &no_params()).unwrap();
    assert_eq!(created.stats.nodes_created, 2);
    let tags = graph.query("MATCH (t:Tag) RETURN t.name AS name ORDER BY name", &no_params()).unwrap();
    let names: Vec<String> = tags.column("name").unwrap();
    assert_eq!(names, vec!["a", "b"]);
}
