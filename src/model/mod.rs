//! # Property Graph Model
//!
//! Plain data types shared by storage, planner, execution and callers.
//! This module is pure data: no I/O, no state.

pub mod node;
pub mod edge;
pub mod value;
pub mod property_map;

pub use node::{Node, NodeId, LabelSet};
pub use edge::{Edge, EdgeId, Direction};
pub use value::{Value, ValueClass, GroupKey};
pub use property_map::{PropertyMap, props};
