//! PropertyMap: the key-value store on nodes and edges.

use super::Value;

/// A map of property names to values. Keys are unique; a later write to
/// the same key replaces the earlier value.
pub type PropertyMap = hashbrown::HashMap<String, Value>;

/// Build a [`PropertyMap`] from `(key, value)` pairs.
pub fn props<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> PropertyMap
where
    K: Into<String>,
    V: Into<Value>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}
