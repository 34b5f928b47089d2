//! Columnar property storage.
//!
//! Entities sharing a label (nodes) or type (edges) form a table. Each
//! table packs the values of one property key into a column of fixed-size
//! chunks, and every chunk carries a [`ZoneMap`]. A node with several
//! labels has a row in each of its label tables; nodes without labels live
//! in the [`UNLABELED`] table.
//!
//! Chunks, row slots and memberships live in [`IdMap`]s, so they are
//! shared between snapshot versions. Writing to a chunk copies it, and the
//! trie path leading to it, only if an older version still references it.
//!
//! Deleted rows leave a hole. Once holes outnumber live rows (and fill at
//! least a chunk) the table is rebuilt densely.

use std::sync::Arc;

use hashbrown::HashMap;
use smallvec::SmallVec;
use tracing::trace;

use crate::model::{PropertyMap, Value};
use crate::RuntimeError;
use super::id_map::{EntityId, IdMap};
use super::zone_map::{CmpOp, ZoneMap};

/// Table holding nodes that carry no label.
pub const UNLABELED: &str = "";

// ============================================================================
// Scan predicates
// ============================================================================

/// A `key <op> literal` predicate evaluated during a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanPredicate {
    pub key: String,
    pub op: CmpOp,
    pub value: Value,
}

impl ScanPredicate {
    pub fn new(key: impl Into<String>, op: CmpOp, value: impl Into<Value>) -> Self {
        Self { key: key.into(), op, value: value.into() }
    }

    /// Row-level check; `Null` (absent) never satisfies a comparison.
    pub fn matches(&self, value: &Value) -> Result<bool, RuntimeError> {
        Ok(self.op.apply(value, &self.value)?.unwrap_or(false))
    }
}

// ============================================================================
// Chunks and columns
// ============================================================================

#[derive(Debug, Clone, Default)]
struct Chunk {
    values: Vec<Value>,
    zone: ZoneMap,
}

#[derive(Debug, Clone, Default)]
struct Column {
    /// Chunk index to chunk; a chunk no row ever wrote is absent.
    chunks: IdMap<usize, Arc<Chunk>>,
}

impl Column {
    fn get(&self, row: usize, chunk_size: usize) -> Option<&Value> {
        self.chunks
            .get(row / chunk_size)
            .and_then(|c| c.values.get(row % chunk_size))
            .filter(|v| !v.is_null())
    }

    /// Writes a slot and returns the previous value (`Null` if absent).
    fn set(&mut self, row: usize, value: Value, chunk_size: usize) -> Value {
        let (ci, offset) = (row / chunk_size, row % chunk_size);
        if value.is_null() && !self.chunks.contains_key(ci) {
            return Value::Null;
        }
        let chunk = Arc::make_mut(self.chunks.get_or_insert_with(ci, Default::default));
        if chunk.values.len() <= offset {
            if value.is_null() {
                return Value::Null;
            }
            if chunk.values.len() < offset {
                chunk.zone.has_null = true;
            }
            chunk.values.resize(offset + 1, Value::Null);
        }
        let old = std::mem::replace(&mut chunk.values[offset], value);
        if !old.is_null() && chunk.zone.is_boundary(&old) {
            chunk.zone = ZoneMap::build(&chunk.values);
        } else {
            let new = &chunk.values[offset];
            chunk.zone.include(new);
            if !old.is_null() {
                chunk.zone.non_null -= 1;
            }
        }
        old
    }
}

#[derive(Debug, Clone)]
struct Table<I: EntityId> {
    /// Row slot to owning entity; deleted rows are absent.
    rows: IdMap<usize, I>,
    row_of: IdMap<I, usize>,
    /// Row slots handed out so far, live or deleted.
    next_row: usize,
    columns: HashMap<String, Column>,
}

impl<I: EntityId> Table<I> {
    fn new() -> Self {
        Self { rows: IdMap::new(), row_of: IdMap::new(), next_row: 0, columns: HashMap::new() }
    }

    fn live(&self) -> usize {
        self.row_of.len()
    }

    fn push(&mut self, id: I) -> usize {
        let row = self.next_row;
        self.next_row += 1;
        self.rows.insert(row, id);
        self.row_of.insert(id, row);
        row
    }

    fn dead(&self) -> usize {
        self.next_row - self.live()
    }

    /// Rebuilds the table without holes, keeping row order.
    fn compact(&mut self, chunk_size: usize) {
        let mut dense = Table::new();
        for (old, id) in self.rows.iter() {
            let row = dense.push(*id);
            for (key, column) in &self.columns {
                if let Some(value) = column.get(old, chunk_size) {
                    dense.columns.entry(key.clone()).or_default().set(row, value.clone(), chunk_size);
                }
            }
        }
        trace!(dropped = self.dead(), live = dense.live(), "table compacted");
        *self = dense;
    }
}

// ============================================================================
// PropertyStore
// ============================================================================

/// Column-oriented property storage for one kind of entity.
#[derive(Debug, Clone)]
pub struct PropertyStore<I: EntityId> {
    chunk_size: usize,
    tables: HashMap<String, Arc<Table<I>>>,
    memberships: IdMap<I, SmallVec<[String; 2]>>,
}

impl<I: EntityId> PropertyStore<I> {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            tables: HashMap::new(),
            memberships: IdMap::new(),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn contains(&self, id: I) -> bool {
        self.memberships.contains_key(id)
    }

    /// Registers an entity in the given tables with its initial properties.
    pub fn insert(&mut self, id: I, tables: &[&str], props: &PropertyMap) {
        for table in tables {
            self.add_membership_with(id, table, props);
        }
    }

    fn add_membership_with(&mut self, id: I, table_name: &str, props: &PropertyMap) {
        let chunk_size = self.chunk_size;
        let members = self.memberships.get_or_insert_with(id, SmallVec::new);
        if members.iter().any(|t| t == table_name) {
            return;
        }
        members.push(table_name.to_string());

        let table = Arc::make_mut(
            self.tables.entry(table_name.to_string()).or_insert_with(|| Arc::new(Table::new())),
        );
        let row = table.push(id);
        for (key, value) in props {
            if value.is_null() {
                continue;
            }
            table.columns.entry(key.clone()).or_default().set(row, value.clone(), chunk_size);
        }
    }

    /// Adds the entity to another table, copying its current properties.
    pub fn add_membership(&mut self, id: I, table: &str) {
        let props = self.properties(id);
        self.add_membership_with(id, table, &props);
    }

    /// Removes the entity from one table. Its properties stay reachable
    /// through its remaining tables.
    pub fn remove_membership(&mut self, id: I, table_name: &str) {
        let Some(pos) = self.memberships.get(id).and_then(|m| m.iter().position(|t| t == table_name)) else {
            return;
        };
        let Some(members) = self.memberships.get_mut(id) else { return };
        members.remove(pos);
        if members.is_empty() {
            self.memberships.remove(id);
        }
        self.drop_row(id, table_name);
    }

    fn drop_row(&mut self, id: I, table_name: &str) {
        let chunk_size = self.chunk_size;
        let Some(table) = self.tables.get_mut(table_name) else { return };
        let table = Arc::make_mut(table);
        let Some(row) = table.row_of.remove(id) else { return };
        table.rows.remove(row);
        for column in table.columns.values_mut() {
            if column.get(row, chunk_size).is_some() {
                column.set(row, Value::Null, chunk_size);
            }
        }
        if table.live() == 0 {
            self.tables.remove(table_name);
        } else if table.dead() >= chunk_size && table.dead() > table.live() {
            table.compact(chunk_size);
        }
    }

    /// Removes the entity entirely, returning its properties.
    pub fn delete(&mut self, id: I) -> PropertyMap {
        let props = self.properties(id);
        let tables: Vec<String> = self
            .memberships
            .remove(id)
            .map(|m| m.into_iter().collect())
            .unwrap_or_default();
        for table in &tables {
            self.drop_row(id, table);
        }
        props
    }

    /// Sets a property on every table row of the entity. Writing `Null`
    /// removes the property. Returns the previous value.
    pub fn put(&mut self, id: I, key: &str, value: Value) -> Option<Value> {
        let chunk_size = self.chunk_size;
        let members = self.memberships.get(id)?.clone();
        let mut previous = None;
        for table_name in &members {
            let Some(table) = self.tables.get_mut(table_name.as_str()) else { continue };
            let table = Arc::make_mut(table);
            let Some(&row) = table.row_of.get(id) else { continue };
            let old = if value.is_null() {
                match table.columns.get_mut(key) {
                    Some(column) => column.set(row, Value::Null, chunk_size),
                    None => Value::Null,
                }
            } else {
                table.columns.entry(key.to_string()).or_default().set(row, value.clone(), chunk_size)
            };
            if previous.is_none() && !old.is_null() {
                previous = Some(old);
            }
        }
        previous
    }

    pub fn remove(&mut self, id: I, key: &str) -> Option<Value> {
        self.put(id, key, Value::Null)
    }

    pub fn get(&self, id: I, key: &str) -> Option<&Value> {
        let table_name = self.memberships.get(id)?.first()?;
        let table = self.tables.get(table_name.as_str())?;
        let row = *table.row_of.get(id)?;
        table.columns.get(key)?.get(row, self.chunk_size)
    }

    /// All properties of an entity.
    pub fn properties(&self, id: I) -> PropertyMap {
        let mut props = PropertyMap::new();
        let Some(table_name) = self.memberships.get(id).and_then(|m| m.first()) else {
            return props;
        };
        let Some(table) = self.tables.get(table_name.as_str()) else { return props };
        let Some(&row) = table.row_of.get(id) else { return props };
        for (key, column) in &table.columns {
            if let Some(v) = column.get(row, self.chunk_size) {
                props.insert(key.clone(), v.clone());
            }
        }
        props
    }

    /// Number of live entities in a table.
    pub fn count(&self, table: &str) -> usize {
        self.tables.get(table).map_or(0, |t| t.live())
    }

    /// Names and live counts of all non-empty tables.
    pub fn table_counts(&self) -> impl Iterator<Item = (&str, usize)> + '_ {
        self.tables.iter().map(|(name, t)| (name.as_str(), t.live()))
    }

    /// Lazily yields the entities of `table` satisfying every predicate.
    ///
    /// Chunks whose zone maps exclude any predicate are skipped without
    /// touching their rows.
    pub fn scan<'a>(&'a self, table: &str, predicates: &'a [ScanPredicate]) -> ScanIter<'a, I> {
        let table = self.tables.get(table).map(|t| t.as_ref());
        let chunk_count = table.map_or(0, |t| t.next_row.div_ceil(self.chunk_size));
        ScanIter {
            table,
            predicates,
            chunk_size: self.chunk_size,
            chunk_count,
            chunk: 0,
            row: 0,
            row_end: 0,
            chunks_skipped: 0,
            rows_examined: 0,
        }
    }
}

// ============================================================================
// ScanIter
// ============================================================================

/// Lazy scan over a property table with zone-map pruning.
pub struct ScanIter<'a, I: EntityId> {
    table: Option<&'a Table<I>>,
    predicates: &'a [ScanPredicate],
    chunk_size: usize,
    chunk_count: usize,
    chunk: usize,
    row: usize,
    row_end: usize,
    /// Chunks skipped by zone maps so far.
    pub chunks_skipped: u64,
    /// Rows evaluated so far.
    pub rows_examined: u64,
}

impl<I: EntityId> ScanIter<'_, I> {
    /// Whether chunk `ci` may hold a row satisfying every predicate.
    fn chunk_survives(&self, table: &Table<I>, ci: usize) -> bool {
        self.predicates.iter().all(|p| {
            table
                .columns
                .get(&p.key)
                .and_then(|col| col.chunks.get(ci))
                .is_some_and(|chunk| chunk.zone.might_match(p.op, &p.value))
        })
    }

    /// Advances to the next surviving chunk. Returns false when exhausted.
    fn next_chunk(&mut self, table: &Table<I>) -> bool {
        while self.chunk < self.chunk_count {
            let ci = self.chunk;
            self.chunk += 1;
            if self.chunk_survives(table, ci) {
                self.row = ci * self.chunk_size;
                self.row_end = ((ci + 1) * self.chunk_size).min(table.next_row);
                return true;
            }
            self.chunks_skipped += 1;
        }
        false
    }
}

impl<I: EntityId> Iterator for ScanIter<'_, I> {
    type Item = Result<I, RuntimeError>;

    fn next(&mut self) -> Option<Self::Item> {
        let table = self.table?;
        loop {
            if self.row >= self.row_end && !self.next_chunk(table) {
                return None;
            }
            let row = self.row;
            self.row += 1;
            let Some(&id) = table.rows.get(row) else { continue };
            self.rows_examined += 1;

            let mut keep = true;
            for p in self.predicates {
                let value = table
                    .columns
                    .get(&p.key)
                    .and_then(|c| c.get(row, self.chunk_size))
                    .unwrap_or(&Value::Null);
                match p.matches(value) {
                    Ok(true) => {}
                    Ok(false) => {
                        keep = false;
                        break;
                    }
                    Err(e) => return Some(Err(e)),
                }
            }
            if keep {
                return Some(Ok(id));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{props, NodeId};

    fn store_with_ages(n: u64, chunk_size: usize) -> PropertyStore<NodeId> {
        let mut store = PropertyStore::new(chunk_size);
        for i in 0..n {
            store.insert(NodeId(i), &["Person"], &props([("age", Value::Int(18 + i as i64))]));
        }
        store
    }

    #[test]
    fn test_put_get_remove() {
        let mut store = PropertyStore::new(4);
        let id = NodeId(1);
        store.insert(id, &["Person"], &props([("name", "Alice")]));
        assert_eq!(store.get(id, "name"), Some(&Value::from("Alice")));

        assert_eq!(store.put(id, "name", Value::from("Ada")), Some(Value::from("Alice")));
        assert_eq!(store.get(id, "name"), Some(&Value::from("Ada")));

        assert_eq!(store.remove(id, "name"), Some(Value::from("Ada")));
        assert!(store.get(id, "name").is_none());
    }

    #[test]
    fn test_multi_label_rows_stay_consistent() {
        let mut store = PropertyStore::new(4);
        let id = NodeId(7);
        store.insert(id, &["Person", "Employee"], &props([("age", 30)]));
        store.put(id, "age", Value::Int(31));

        let a: Vec<_> = store
            .scan("Employee", &[ScanPredicate::new("age", CmpOp::Eq, 31)])
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(a, vec![id]);

        store.remove_membership(id, "Person");
        assert_eq!(store.get(id, "age"), Some(&Value::Int(31)));
        assert_eq!(store.count("Person"), 0);
    }

    #[test]
    fn test_scan_skips_chunks() {
        let store = store_with_ages(64, 8);
        let preds = [ScanPredicate::new("age", CmpOp::Gt, 75)];
        let mut iter = store.scan("Person", &preds);
        let ids: Vec<NodeId> = iter.by_ref().collect::<Result<_, _>>().unwrap();
        // ages 76..=81 -> ids 58..=63
        assert_eq!(ids, (58..64).map(NodeId).collect::<Vec<_>>());
        assert_eq!(iter.chunks_skipped, 7);
        assert_eq!(iter.rows_examined, 8);
    }

    #[test]
    fn test_scan_type_mismatch_reported() {
        let mut store = PropertyStore::new(8);
        store.insert(NodeId(1), &["T"], &props([("x", "text")]));
        let preds = [ScanPredicate::new("x", CmpOp::Gt, 3)];
        let result: Result<Vec<_>, _> = store.scan("T", &preds).collect();
        assert!(matches!(result, Err(RuntimeError::TypeMismatch { .. })));
    }

    #[test]
    fn test_delete_clears_zone_maps() {
        let mut store = store_with_ages(8, 8);
        for i in 0..8 {
            store.delete(NodeId(i));
        }
        assert_eq!(store.count("Person"), 0);
        let preds = [ScanPredicate::new("age", CmpOp::Ge, 0)];
        assert_eq!(store.scan("Person", &preds).count(), 0);
    }

    #[test]
    fn test_deleted_rows_are_compacted() {
        let mut store = store_with_ages(64, 8);
        for i in 0..40 {
            store.delete(NodeId(i));
        }
        let table = &store.tables["Person"];
        // compaction ran once dead rows (33) outnumbered live ones (31)
        assert_eq!(table.next_row, 31);
        assert_eq!(table.live(), 24);

        let preds = [ScanPredicate::new("age", CmpOp::Ge, 0)];
        let ids: Vec<NodeId> = store.scan("Person", &preds).collect::<Result<_, _>>().unwrap();
        assert_eq!(ids, (40..64).map(NodeId).collect::<Vec<_>>());
        assert_eq!(store.get(NodeId(63), "age"), Some(&Value::Int(81)));

        // new rows go after the compacted ones and stay reachable
        store.insert(NodeId(100), &["Person"], &props([("age", Value::Int(5))]));
        let young: Vec<NodeId> = store
            .scan("Person", &[ScanPredicate::new("age", CmpOp::Lt, 10)])
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(young, vec![NodeId(100)]);
    }

    #[test]
    fn test_small_tables_keep_their_holes() {
        let mut store = store_with_ages(6, 8);
        for i in 0..5 {
            store.delete(NodeId(i));
        }
        // fewer dead rows than one chunk: no rebuild
        assert_eq!(store.tables["Person"].next_row, 6);
        assert_eq!(store.count("Person"), 1);
        assert_eq!(store.get(NodeId(5), "age"), Some(&Value::Int(23)));
    }

    #[test]
    fn test_clone_shares_untouched_chunks() {
        let mut store = store_with_ages(64, 8);
        let frozen = store.clone();
        store.put(NodeId(3), "age", Value::Int(99));

        let before = &frozen.tables["Person"].columns["age"];
        let after = &store.tables["Person"].columns["age"];
        let chunk = |c: &Column, i: usize| c.chunks.get(i).map(Arc::clone);
        assert!(Arc::ptr_eq(&chunk(before, 5).unwrap(), &chunk(after, 5).unwrap()));
        assert!(!Arc::ptr_eq(&chunk(before, 0).unwrap(), &chunk(after, 0).unwrap()));
        assert_eq!(frozen.get(NodeId(3), "age"), Some(&Value::Int(21)));
    }

    #[test]
    fn test_overwrite_shrinks_bounds() {
        let mut store = store_with_ages(4, 4);
        // max age is 21 (id 3); lower it and check the chunk now prunes > 20
        store.put(NodeId(3), "age", Value::Int(5));
        let preds = [ScanPredicate::new("age", CmpOp::Gt, 20)];
        let mut iter = store.scan("Person", &preds);
        assert_eq!(iter.by_ref().count(), 0);
        assert_eq!(iter.chunks_skipped, 1);
    }
}
