//! Property tests: factorized and flat plans agree on aggregates and
//! DISTINCT projections over random graphs.

use proptest::prelude::*;
use quiver_db::{Config, Graph, NodeId, PropertyMap, Value, props};

fn build(config: Config, nodes: usize, edges: &[(usize, usize)]) -> Graph {
    let graph = Graph::new(config);
    graph
        .transaction(|tx| {
            let ids: Vec<NodeId> = (0..nodes)
                .map(|i| tx.create_node(&["N"], props([("v", (i % 5) as i64)])).map(|n| n.id))
                .collect::<quiver_db::Result<_>>()?;
            for &(a, b) in edges {
                tx.create_edge(ids[a % nodes], ids[b % nodes], "E", PropertyMap::new())?;
            }
            Ok(())
        })
        .unwrap();
    graph
}

fn rows(graph: &Graph, query: &str) -> Vec<Vec<Value>> {
    graph
        .query(query, &PropertyMap::new())
        .unwrap()
        .rows
        .iter()
        .map(|r| r.values().to_vec())
        .collect()
}

const QUERIES: &[&str] = &[
    "MATCH (a:N)-[:E]->(b)-[:E]->(c) RETURN count(*) AS n, count(DISTINCT c) AS d, sum(c.v) AS s",
    "MATCH (a:N)-[:E]->(b)-[:E]->(c)-[:E]->(d) RETURN count(d) AS n, sum(d.v) AS s",
    "MATCH (a:N)-[:E]->(b)-[:E]->(c) RETURN a.v AS k, count(c) AS n, sum(c.v) AS s ORDER BY k",
    "MATCH (a:N)-[:E]-(b)-[:E*1..2]->(c) RETURN count(*) AS n, count(DISTINCT c) AS d",
    "MATCH (a:N)-[:E]->(b)-[:E]->(c) RETURN DISTINCT b.v AS v ORDER BY v",
    "MATCH (a:N)-[:E]->(b)-[:E]->(c) RETURN DISTINCT b ORDER BY b",
    "MATCH (a:N)-[:E]->(b)-[:E]->(c) RETURN DISTINCT a.v AS x, c.v AS y ORDER BY x, y",
];

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn factorized_and_flat_aggregates_agree(
        nodes in 1usize..10,
        edges in prop::collection::vec((0usize..10, 0usize..10), 0..30),
    ) {
        let factorized = build(Config::default(), nodes, &edges);
        let flat = build(Config::default().with_factorized_execution(false), nodes, &edges);
        for query in QUERIES {
            prop_assert_eq!(rows(&factorized, query), rows(&flat, query), "query: {}", query);
        }
    }
}

#[test]
fn test_plans_really_differ() {
    let factorized = build(Config::default(), 3, &[(0, 1), (1, 2)]);
    let flat = build(Config::default().with_factorized_execution(false), 3, &[(0, 1), (1, 2)]);
    let stmt = quiver_db::cypher::parse(QUERIES[1]).unwrap();
    assert!(factorized.explain(&stmt).unwrap().is_factorized());
    assert!(!flat.explain(&stmt).unwrap().is_factorized());
}

#[test]
fn test_distinct_of_middle_hop_is_factorized() {
    let factorized = build(Config::default(), 4, &[(0, 1), (1, 2), (2, 3), (0, 2)]);
    let stmt = quiver_db::cypher::parse(QUERIES[5]).unwrap();
    assert!(factorized.explain(&stmt).unwrap().is_factorized());
    let ids: Vec<Value> = rows(&factorized, QUERIES[5]).into_iter().flatten().collect();
    // b ranges over nodes with both an incoming and an outgoing edge.
    assert_eq!(ids.len(), 2);
}
