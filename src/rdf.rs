//! Triple-style access on top of the property graph.
//!
//! A resource is a node labeled [`RESOURCE_LABEL`] whose [`URI_KEY`]
//! property holds its IRI. A triple whose object is another resource is
//! an edge typed by the predicate; a triple whose object is a literal is
//! a property of the subject named by the predicate.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::model::{props, NodeId, Value};
use crate::storage::{CmpOp, GraphSnapshot, ScanPredicate};
use crate::tx::Transaction;
use crate::{Error, Result};

pub const RESOURCE_LABEL: &str = "Resource";
pub const URI_KEY: &str = "uri";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TripleObject {
    Iri(String),
    Literal(Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Triple {
    pub subject: String,
    pub predicate: String,
    pub object: TripleObject,
}

/// Finds the resource node for `iri`.
pub fn resource(view: &GraphSnapshot, iri: &str) -> Result<Option<NodeId>> {
    let predicates = [ScanPredicate::new(URI_KEY, CmpOp::Eq, iri)];
    let found = view.scan_nodes(RESOURCE_LABEL, &predicates).next().transpose()?;
    Ok(found)
}

fn resource_or_create(tx: &mut Transaction, iri: &str) -> Result<NodeId> {
    if let Some(id) = resource(tx.view(), iri)? {
        return Ok(id);
    }
    let node = tx.create_node(&[RESOURCE_LABEL], props([(URI_KEY, iri)]))?;
    Ok(node.id)
}

/// Stores one triple, creating the subject (and an IRI object) on first
/// mention. Re-inserting an IRI triple that already exists is a no-op;
/// re-inserting a literal overwrites the previous value.
pub fn insert_triple(tx: &mut Transaction, subject: &str, predicate: &str, object: TripleObject) -> Result<()> {
    if predicate == URI_KEY {
        return Err(Error::Runtime(crate::RuntimeError::ConstraintViolation(format!(
            "predicate `{URI_KEY}` is reserved for resource identity"
        ))));
    }
    trace!(subject, predicate, "insert triple");
    let s = resource_or_create(tx, subject)?;
    match object {
        TripleObject::Iri(iri) => {
            let o = resource_or_create(tx, &iri)?;
            let exists = tx
                .view()
                .neighbors(s, Some(predicate), crate::model::Direction::Outgoing)
                .any(|(_, n)| n == o);
            if !exists {
                tx.create_edge(s, o, predicate, Default::default())?;
            }
        }
        TripleObject::Literal(value) => tx.set_node_property(s, predicate, value)?,
    }
    Ok(())
}

/// Every triple in `view`, ordered by subject then predicate.
pub fn triples(view: &GraphSnapshot) -> Result<Vec<Triple>> {
    let mut out = Vec::new();
    for id in view.scan_nodes(RESOURCE_LABEL, &[]) {
        let id = id?;
        let Some(subject) = iri_of(view, id) else { continue };
        for (key, value) in view.node_properties(id) {
            if key != URI_KEY {
                out.push(Triple { subject: subject.clone(), predicate: key, object: TripleObject::Literal(value) });
            }
        }
        for (edge, target) in view.neighbors(id, None, crate::model::Direction::Outgoing) {
            let (Some(predicate), Some(object)) = (view.edge_type(edge), iri_of(view, target)) else { continue };
            out.push(Triple {
                subject: subject.clone(),
                predicate: predicate.to_string(),
                object: TripleObject::Iri(object),
            });
        }
    }
    out.sort_by(|a, b| (&a.subject, &a.predicate).cmp(&(&b.subject, &b.predicate)));
    Ok(out)
}

fn iri_of(view: &GraphSnapshot, id: NodeId) -> Option<String> {
    if !view.has_label(id, RESOURCE_LABEL) {
        return None;
    }
    view.node_property(id, URI_KEY).and_then(Value::as_str).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Graph;

    const ALICE: &str = "http://example.org/person/alice";
    const BOB: &str = "http://example.org/person/bob";

    #[test]
    fn test_insert_and_list_triples() {
        let graph = Graph::open_memory();
        let mut tx = graph.begin_transaction().unwrap();
        insert_triple(&mut tx, ALICE, "knows", TripleObject::Iri(BOB.into())).unwrap();
        insert_triple(&mut tx, ALICE, "knows", TripleObject::Iri(BOB.into())).unwrap();
        insert_triple(&mut tx, ALICE, "name", TripleObject::Literal(Value::from("Alice"))).unwrap();
        tx.commit().unwrap();

        let snapshot = graph.snapshot();
        assert_eq!(snapshot.node_count(), 2);
        assert_eq!(snapshot.edge_count(), 1);
        let all = triples(&snapshot).unwrap();
        assert_eq!(
            all,
            vec![
                Triple { subject: ALICE.into(), predicate: "knows".into(), object: TripleObject::Iri(BOB.into()) },
                Triple {
                    subject: ALICE.into(),
                    predicate: "name".into(),
                    object: TripleObject::Literal(Value::from("Alice")),
                },
            ]
        );
        assert!(resource(&snapshot, BOB).unwrap().is_some());
        assert!(resource(&snapshot, "http://example.org/none").unwrap().is_none());
    }

    #[test]
    fn test_uri_predicate_is_rejected() {
        let graph = Graph::open_memory();
        let mut tx = graph.begin_transaction().unwrap();
        let err = insert_triple(&mut tx, ALICE, URI_KEY, TripleObject::Literal(Value::from("x"))).unwrap_err();
        assert!(matches!(err, Error::Runtime(crate::RuntimeError::ConstraintViolation(_))));
    }
}
