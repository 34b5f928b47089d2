//! End-to-end tests for multi-hop patterns: direction, type alternation,
//! variable-length repetition, cycles and the flat/factorized plan choice.

use pretty_assertions::assert_eq;
use quiver_db::pattern::{EdgePattern, Expr, NodePattern, Pattern};
use quiver_db::planner::ExpandMode;
use quiver_db::{Graph, PropertyMap, Statement};

fn no_params() -> PropertyMap {
    PropertyMap::new()
}

/// Linear chain a -> b -> c -> d of NEXT edges, plus a LIKES edge a -> d.
fn setup_chain() -> Graph {
    let graph = Graph::open_memory();
    graph
        .query(
            "CREATE (a:Stop {name: 'a'})-[:NEXT]->(b:Stop {name: 'b'})-[:NEXT]->(c:Stop {name: 'c'})\
                    -[:NEXT]->(d:Stop {name: 'd'})",
            &no_params(),
        )
        .unwrap();
    graph
        .query(
            "MATCH (a:Stop {name: 'a'}), (d:Stop {name: 'd'}) CREATE (a)-[:LIKES {since: 2020}]->(d)",
            &no_params(),
        )
        .unwrap();
    graph
}

fn names(graph: &Graph, query: &str) -> Vec<String> {
    graph.query(query, &no_params()).unwrap().column("name").unwrap()
}

#[test]
fn test_incoming_and_undirected_edges() {
    let graph = setup_chain();
    assert_eq!(names(&graph, "MATCH (x:Stop {name: 'b'})<-[:NEXT]-(y) RETURN y.name AS name"), vec!["a"]);
    assert_eq!(
        names(&graph, "MATCH (x:Stop {name: 'b'})-[:NEXT]-(y) RETURN y.name AS name ORDER BY name"),
        vec!["a", "c"]
    );
}

#[test]
fn test_type_alternation_and_edge_properties() {
    let graph = setup_chain();
    assert_eq!(
        names(&graph, "MATCH (x:Stop {name: 'a'})-[:NEXT|LIKES]->(y) RETURN y.name AS name ORDER BY name"),
        vec!["b", "d"]
    );
    let result = graph
        .query("MATCH (:Stop)-[r:LIKES]->(:Stop) RETURN r.since AS since, type(r) AS t", &no_params())
        .unwrap();
    assert_eq!(result.rows[0].get::<i64>("since").unwrap(), 2020);
    assert_eq!(result.rows[0].get::<String>("t").unwrap(), "LIKES");
}

#[test]
fn test_variable_length_bounds() {
    let graph = setup_chain();
    assert_eq!(
        names(&graph, "MATCH (x:Stop {name: 'a'})-[:NEXT*1..2]->(y) RETURN y.name AS name ORDER BY name"),
        vec!["b", "c"]
    );
    assert_eq!(
        names(&graph, "MATCH (x:Stop {name: 'a'})-[:NEXT*]->(y) RETURN y.name AS name ORDER BY name"),
        vec!["b", "c", "d"]
    );
    assert_eq!(
        names(&graph, "MATCH (x:Stop {name: 'a'})-[:NEXT*0..1]->(y) RETURN y.name AS name ORDER BY name"),
        vec!["a", "b"]
    );
}

#[test]
fn test_path_length_of_repetition() {
    let graph = setup_chain();
    let result = graph
        .query(
            "MATCH (x:Stop {name: 'a'})-[p:NEXT*1..3]->(y:Stop {name: 'd'}) RETURN length(p) AS hops",
            &no_params(),
        )
        .unwrap();
    assert_eq!(result.column::<i64>("hops").unwrap(), vec![3]);
}

#[test]
fn test_cycle_closes_on_bound_variable() {
    let graph = Graph::open_memory();
    graph
        .query(
            "CREATE (a:N {name: 'a'})-[:E]->(b:N {name: 'b'})-[:E]->(c:N {name: 'c'})",
            &no_params(),
        )
        .unwrap();
    graph
        .query("MATCH (a:N {name: 'a'}), (c:N {name: 'c'}) CREATE (c)-[:E]->(a)", &no_params())
        .unwrap();
    let result = graph
        .query("MATCH (x)-[:E]->(y)-[:E]->(z)-[:E]->(x) RETURN count(*) AS triangles", &no_params())
        .unwrap();
    // one triangle seen from each of its three rotations
    assert_eq!(result.column::<i64>("triangles").unwrap(), vec![3]);
}

#[test]
fn test_homomorphic_matching_revisits_nodes() {
    let graph = Graph::open_memory();
    graph
        .query("CREATE (a:P {name: 'a'})-[:F]->(b:P {name: 'b'})", &no_params())
        .unwrap();
    // a -> b <- a reuses node a for both ends
    let result = graph
        .query("MATCH (x:P {name: 'a'})-[:F]->(y)<-[:F]-(z) RETURN z.name AS name", &no_params())
        .unwrap();
    assert_eq!(result.column::<String>("name").unwrap(), vec!["a"]);
}

#[test]
fn test_plan_choice_depends_on_consumer() {
    let graph = setup_chain();
    let chain = || {
        Pattern::start(NodePattern::var("a").label("Stop"))
            .then(EdgePattern::out().edge_type("NEXT"), NodePattern::var("b"))
            .then(EdgePattern::out().edge_type("NEXT"), NodePattern::var("c"))
    };

    let rows = Statement::new().match_pattern(chain()).returning([Expr::var("a"), Expr::var("c")]);
    let plan = graph.explain(&rows).unwrap();
    assert!(!plan.is_factorized());

    let counting = Statement::new().match_pattern(chain()).returning([Expr::count_star()]);
    let plan = graph.explain(&counting).unwrap();
    assert!(plan.is_factorized());
    assert_ne!(plan.expand_modes(), vec![ExpandMode::Flat; 2]);
    assert!(!plan.to_string().is_empty());

    let flat = graph.execute(&rows).unwrap().len() as i64;
    let counted: i64 = graph.execute(&counting).unwrap().rows[0].get("count(*)").unwrap();
    assert_eq!(flat, counted);
    assert_eq!(counted, 2);
}
