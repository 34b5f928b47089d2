//! Persistent map keyed by dense integer ids.
//!
//! An [`IdMap`] is a 32-way radix trie whose nodes are `Arc`-shared.
//! Cloning a map copies only its root pointer; a write copies the nodes on
//! the path to the written key and nothing else. A snapshot clone is
//! therefore O(1) and each write after it costs O(log32 n).
//!
//! Keys are visited in ascending order.

use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::model::{EdgeId, NodeId};

const BITS: u32 = 5;
const WIDTH: usize = 1 << BITS;
const MASK: u64 = WIDTH as u64 - 1;

/// A key that maps onto a `u64` and back.
pub trait MapKey: Copy {
    fn to_bits(self) -> u64;
    fn from_bits(bits: u64) -> Self;
}

impl MapKey for usize {
    fn to_bits(self) -> u64 {
        self as u64
    }

    fn from_bits(bits: u64) -> Self {
        bits as usize
    }
}

impl MapKey for NodeId {
    fn to_bits(self) -> u64 {
        self.0
    }

    fn from_bits(bits: u64) -> Self {
        NodeId(bits)
    }
}

impl MapKey for EdgeId {
    fn to_bits(self) -> u64 {
        self.0
    }

    fn from_bits(bits: u64) -> Self {
        EdgeId(bits)
    }
}

/// Identifier types that can own properties.
pub trait EntityId: MapKey + Eq + Hash + Ord + fmt::Debug + Send + Sync + 'static {}

impl EntityId for NodeId {}
impl EntityId for EdgeId {}

#[derive(Clone)]
enum Node<V> {
    Branch(Vec<Option<Arc<Node<V>>>>),
    Leaf(Vec<Option<V>>),
}

impl<V> Node<V> {
    fn empty(level: u32) -> Self {
        if level == 0 {
            Node::Leaf((0..WIDTH).map(|_| None).collect())
        } else {
            Node::Branch(vec![None; WIDTH])
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Node::Branch(children) => children.iter().all(Option::is_none),
            Node::Leaf(values) => values.iter().all(Option::is_none),
        }
    }
}

fn index(key: u64, level: u32) -> usize {
    ((key >> (BITS * level)) & MASK) as usize
}

/// Whether a root with `depth` levels below it can hold `key`.
fn covers(depth: u32, key: u64) -> bool {
    let bits = BITS * (depth + 1);
    bits >= 64 || key >> bits == 0
}

fn slot_mut<V: Clone>(node: &mut Arc<Node<V>>, key: u64, level: u32) -> &mut Option<V> {
    match Arc::make_mut(node) {
        Node::Leaf(values) => &mut values[index(key, 0)],
        Node::Branch(children) => {
            let child = children[index(key, level)].get_or_insert_with(|| Arc::new(Node::empty(level - 1)));
            slot_mut(child, key, level - 1)
        }
    }
}

/// Removes `key` below `node`, dropping children left empty.
fn take<V: Clone>(node: &mut Arc<Node<V>>, key: u64, level: u32) -> Option<V> {
    match Arc::make_mut(node) {
        Node::Leaf(values) => values[index(key, 0)].take(),
        Node::Branch(children) => {
            let i = index(key, level);
            let child = children[i].as_mut()?;
            let old = take(child, key, level - 1);
            if child.is_empty() {
                children[i] = None;
            }
            old
        }
    }
}

/// Copy-on-write map from ids to values.
pub struct IdMap<K, V> {
    root: Option<Arc<Node<V>>>,
    /// Trie levels below the root.
    depth: u32,
    len: usize,
    _key: PhantomData<fn() -> K>,
}

impl<K, V> Clone for IdMap<K, V> {
    fn clone(&self) -> Self {
        Self { root: self.root.clone(), depth: self.depth, len: self.len, _key: PhantomData }
    }
}

impl<K, V> Default for IdMap<K, V> {
    fn default() -> Self {
        Self { root: None, depth: 0, len: 0, _key: PhantomData }
    }
}

impl<K: MapKey, V: Clone> IdMap<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, id: K) -> Option<&V> {
        let key = id.to_bits();
        if !covers(self.depth, key) {
            return None;
        }
        let mut node = self.root.as_deref()?;
        let mut level = self.depth;
        loop {
            match node {
                Node::Branch(children) => {
                    node = children[index(key, level)].as_deref()?;
                    level -= 1;
                }
                Node::Leaf(values) => return values[index(key, 0)].as_ref(),
            }
        }
    }

    pub fn contains_key(&self, id: K) -> bool {
        self.get(id).is_some()
    }

    /// Mutable access. Copies the path to `id` if another version shares it.
    pub fn get_mut(&mut self, id: K) -> Option<&mut V> {
        if !self.contains_key(id) {
            return None;
        }
        let root = self.root.as_mut()?;
        slot_mut(root, id.to_bits(), self.depth).as_mut()
    }

    pub fn insert(&mut self, id: K, value: V) -> Option<V> {
        let slot = self.slot(id.to_bits());
        let old = slot.replace(value);
        if old.is_none() {
            self.len += 1;
        }
        old
    }

    pub fn get_or_insert_with(&mut self, id: K, default: impl FnOnce() -> V) -> &mut V {
        let key = id.to_bits();
        self.reserve(key);
        let depth = self.depth;
        let root = self.root.get_or_insert_with(|| Arc::new(Node::empty(depth)));
        let slot = slot_mut(root, key, depth);
        if slot.is_none() {
            self.len += 1;
        }
        slot.get_or_insert_with(default)
    }

    pub fn remove(&mut self, id: K) -> Option<V> {
        if !self.contains_key(id) {
            return None;
        }
        let root = self.root.as_mut()?;
        let old = take(root, id.to_bits(), self.depth);
        let emptied = root.is_empty();
        if emptied {
            self.root = None;
            self.depth = 0;
        }
        if old.is_some() {
            self.len -= 1;
        }
        old
    }

    /// Entries in ascending key order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        let stack = self.root.as_deref().map(|root| (root, self.depth, 0, 0)).into_iter().collect();
        Iter { stack, _key: PhantomData }
    }

    pub fn keys(&self) -> impl Iterator<Item = K> + '_ {
        self.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> + '_ {
        self.iter().map(|(_, v)| v)
    }

    fn reserve(&mut self, key: u64) {
        while !covers(self.depth, key) {
            if let Some(root) = self.root.take() {
                let mut children = vec![None; WIDTH];
                children[0] = Some(root);
                self.root = Some(Arc::new(Node::Branch(children)));
            }
            self.depth += 1;
        }
    }

    fn slot(&mut self, key: u64) -> &mut Option<V> {
        self.reserve(key);
        let depth = self.depth;
        let root = self.root.get_or_insert_with(|| Arc::new(Node::empty(depth)));
        slot_mut(root, key, depth)
    }

    #[cfg(test)]
    fn shares_path_with(&self, other: &Self, id: K) -> bool {
        let key = id.to_bits();
        let (mut a, mut b) = match (self.root.as_ref(), other.root.as_ref()) {
            (Some(a), Some(b)) if self.depth == other.depth => (a, b),
            _ => return false,
        };
        let mut level = self.depth;
        loop {
            if Arc::ptr_eq(a, b) {
                return true;
            }
            match (a.as_ref(), b.as_ref()) {
                (Node::Branch(x), Node::Branch(y)) if level > 0 => {
                    let i = index(key, level);
                    let (Some(x), Some(y)) = (x[i].as_ref(), y[i].as_ref()) else { return false };
                    a = x;
                    b = y;
                    level -= 1;
                }
                _ => return false,
            }
        }
    }
}

impl<K: MapKey, V: Clone> FromIterator<(K, V)> for IdMap<K, V> {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl<K: MapKey + fmt::Debug, V: Clone + fmt::Debug> fmt::Debug for IdMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// Ascending iterator over an [`IdMap`].
pub struct Iter<'a, K, V> {
    /// Node, its level, the key prefix it covers and the next slot.
    stack: Vec<(&'a Node<V>, u32, u64, usize)>,
    _key: PhantomData<fn() -> K>,
}

impl<'a, K: MapKey, V> Iterator for Iter<'a, K, V> {
    type Item = (K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let top = self.stack.last_mut()?;
            if top.3 == WIDTH {
                self.stack.pop();
                continue;
            }
            let (node, level, base, i) = *top;
            top.3 += 1;
            let key = base | ((i as u64) << (BITS * level));
            match node {
                Node::Leaf(values) => {
                    if let Some(value) = &values[i] {
                        return Some((K::from_bits(key), value));
                    }
                }
                Node::Branch(children) => {
                    if let Some(child) = &children[i] {
                        self.stack.push((child, level - 1, key, 0));
                    }
                }
            }
        }
    }
}
