//! End-to-end tests for transaction lifecycle, isolation and auto-commit
//! policies.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use quiver_db::{
    AutoCommit, CancellationToken, Config, Error, Graph, PropertyMap, TransactionError, TxState, props,
};

fn no_params() -> PropertyMap {
    PropertyMap::new()
}

fn count_label(graph: &Graph, label: &str) -> i64 {
    graph
        .query(&format!("MATCH (n:{label}) RETURN count(n) AS c"), &no_params())
        .unwrap()
        .rows[0]
        .get("c")
        .unwrap()
}

#[test]
fn test_rollback_discards_writes() {
    let graph = Graph::open_memory();
    let mut tx = graph.begin_transaction().unwrap();
    tx.create_node(&["Temp"], props([("k", 1)])).unwrap();
    assert_eq!(tx.view().label_count("Temp"), 1);
    tx.rollback().unwrap();
    assert_eq!(count_label(&graph, "Temp"), 0);
}

#[test]
fn test_commit_persists_and_advances_version() {
    let graph = Graph::open_memory();
    let before = graph.snapshot().version();
    let mut tx = graph.begin_transaction().unwrap();
    let cypher = quiver_db::cypher::parse("CREATE (:Kept)").unwrap();
    tx.execute(&cypher).unwrap();
    let version = tx.commit().unwrap();
    assert_eq!(version, before + 1);
    assert_eq!(count_label(&graph, "Kept"), 1);
}

#[test]
fn test_drop_commits_active_transaction() {
    let graph = Graph::open_memory();
    {
        let mut tx = graph.begin_transaction().unwrap();
        tx.create_node(&["Scoped"], PropertyMap::new()).unwrap();
    }
    assert_eq!(count_label(&graph, "Scoped"), 1);
}

#[test]
fn test_panic_inside_scope_rolls_back() {
    let graph = Graph::open_memory();
    let handle = graph.clone();
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
        let mut tx = handle.begin_transaction().unwrap();
        tx.create_node(&["Doomed"], PropertyMap::new()).unwrap();
        panic!("boom");
    }));
    assert!(outcome.is_err());
    assert_eq!(count_label(&graph, "Doomed"), 0);
    // the writer slot was released
    graph.create_node(&["After"], PropertyMap::new()).unwrap();
}

#[test]
fn test_closure_error_rolls_back() {
    let graph = Graph::open_memory();
    let result: quiver_db::Result<()> = graph.transaction(|tx| {
        tx.execute(&quiver_db::cypher::parse("CREATE (:Half)")?)?;
        tx.execute(&quiver_db::cypher::parse("MATCH (n:Half) SET n.x = 1 / 0")?)?;
        Ok(())
    });
    assert!(matches!(result, Err(Error::Runtime(_))));
    assert_eq!(count_label(&graph, "Half"), 0);
}

#[test]
fn test_finished_transaction_rejects_operations() {
    let graph = Graph::open_memory();
    let mut tx = graph.begin_transaction().unwrap();
    tx.create_node(&["A"], PropertyMap::new()).unwrap();
    let statement = quiver_db::cypher::parse("MATCH (n) RETURN n").unwrap();
    // a failed statement keeps the transaction usable
    assert!(tx.execute(&quiver_db::cypher::parse("MATCH (n) RETURN n.x!").unwrap()).is_err());
    assert!(tx.is_active());
    assert_eq!(tx.execute(&statement).unwrap().len(), 1);
    tx.commit().unwrap();

    let mut reader = graph.begin_read_transaction().unwrap();
    assert_eq!(reader.state(), TxState::Active);
    assert_eq!(reader.execute(&statement).unwrap().len(), 1);
    reader.rollback().unwrap();
}

#[test]
fn test_readers_see_snapshot_not_pending_writes() {
    let graph = Graph::open_memory();
    graph.create_node(&["Base"], PropertyMap::new()).unwrap();

    let reader = graph.begin_read_transaction().unwrap();
    let mut writer = graph.begin_transaction().unwrap();
    writer.create_node(&["Base"], PropertyMap::new()).unwrap();

    // read-your-own-writes for the writer, old snapshot for everyone else
    assert_eq!(writer.view().label_count("Base"), 2);
    assert_eq!(reader.view().label_count("Base"), 1);
    assert_eq!(count_label(&graph, "Base"), 1);

    writer.commit().unwrap();
    assert_eq!(reader.view().label_count("Base"), 1);
    assert_eq!(count_label(&graph, "Base"), 2);
}

#[test]
fn test_second_writer_gets_conflict() {
    let graph = Graph::open_memory();
    let mut first = graph.begin_transaction().unwrap();
    first.create_node(&["W"], PropertyMap::new()).unwrap();
    let err = graph.create_node(&["W"], PropertyMap::new()).unwrap_err();
    assert!(matches!(err, Error::Transaction(TransactionError::WriteConflict { .. })));
    first.commit().unwrap();
    graph.create_node(&["W"], PropertyMap::new()).unwrap();
    assert_eq!(count_label(&graph, "W"), 2);
}

#[test]
fn test_script_per_statement_keeps_earlier_commits() {
    let graph = Graph::open_memory();
    let err = graph
        .query_script("CREATE (:S {v: 1}); CREATE (:S {v: 2}); MATCH (n:S) SET n.bad = 1 / 0")
        .unwrap_err();
    assert!(matches!(err, Error::Runtime(_)));
    assert_eq!(count_label(&graph, "S"), 2);
}

#[test]
fn test_script_per_script_is_all_or_nothing() {
    let graph = Graph::new(Config::default().with_auto_commit(AutoCommit::PerScript));
    let err = graph
        .query_script("CREATE (:S {v: 1}); CREATE (:S {v: 2}); MATCH (n:S) SET n.bad = 1 / 0")
        .unwrap_err();
    assert!(matches!(err, Error::Runtime(_)));
    assert_eq!(count_label(&graph, "S"), 0);

    let results = graph.query_script("CREATE (:S); MATCH (n:S) RETURN count(n) AS c;").unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[1].rows[0].get::<i64>("c").unwrap(), 1);
}

#[test]
fn test_cancelled_statement() {
    let graph = Graph::open_memory();
    graph.query("CREATE (:C), (:C), (:C)", &no_params()).unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let mut tx = graph.begin_read_transaction().unwrap();
    let stmt = quiver_db::cypher::parse("MATCH (n:C) RETURN n").unwrap();
    let err = tx.execute_cancellable(&stmt, &no_params(), &cancel).unwrap_err();
    assert!(matches!(err, Error::Cancelled));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_readers_with_one_writer() {
    let graph = Arc::new(Graph::open_memory());
    graph.query("CREATE (:Counter {n: 0})", &no_params()).unwrap();

    let writer = {
        let graph = Arc::clone(&graph);
        tokio::task::spawn_blocking(move || {
            for i in 1..=50 {
                graph
                    .query("MATCH (c:Counter) SET c.n = $i", &props([("i", i)]))
                    .unwrap();
            }
        })
    };

    let mut readers = Vec::new();
    for _ in 0..4 {
        let graph = Arc::clone(&graph);
        readers.push(tokio::task::spawn_blocking(move || {
            let mut last = 0;
            for _ in 0..50 {
                let n: i64 = graph
                    .query("MATCH (c:Counter) RETURN c.n AS n", &PropertyMap::new())
                    .unwrap()
                    .rows[0]
                    .get("n")
                    .unwrap();
                // committed versions only ever move forward
                assert!(n >= last);
                last = n;
            }
        }));
    }

    writer.await.unwrap();
    for reader in readers {
        reader.await.unwrap();
    }
    let final_value: i64 = graph
        .query("MATCH (c:Counter) RETURN c.n AS n", &no_params())
        .unwrap()
        .rows[0]
        .get("n")
        .unwrap();
    assert_eq!(final_value, 50);
}

#[test]
fn test_many_small_commits_keep_old_snapshots_intact() {
    let graph = Graph::new(Config::default().with_chunk_size(16));
    let mut held = Vec::new();
    let mut prev: Option<quiver_db::NodeId> = None;
    for i in 0..3000i64 {
        let node = graph.create_node(&["Item"], props([("i", i)])).unwrap();
        if let Some(p) = prev {
            graph.create_edge(p, node.id, "NEXT", PropertyMap::new()).unwrap();
        }
        prev = Some(node.id);
        if i % 1000 == 0 {
            held.push((i, graph.snapshot()));
        }
    }

    assert_eq!(graph.snapshot().node_count(), 3000);
    assert_eq!(graph.snapshot().edge_count(), 2999);
    for (i, snapshot) in &held {
        let expected = *i as usize + 1;
        assert_eq!(snapshot.node_count(), expected);
        assert_eq!(snapshot.label_count("Item"), expected);
        assert_eq!(snapshot.edge_count(), expected - 1);
    }
    let total: i64 = graph
        .query("MATCH (n:Item) WHERE n.i >= 2990 RETURN count(*) AS c", &no_params())
        .unwrap()
        .rows[0]
        .get("c")
        .unwrap();
    assert_eq!(total, 10);
}
