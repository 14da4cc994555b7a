//! Core data model shared by the Canopy crates
//!
//! This crate provides:
//! - `TreePath`, the universal addressing key for tree nodes
//! - `Token`, an opaque surrogate for an element's identity
//! - `ModelDelta`, a tree-shaped description of structural/state changes

pub mod delta;
pub mod path;
pub mod token;

use std::fmt::Debug;
use std::hash::Hash;

// Re-exports
pub use delta::{DeltaAddress, DeltaElement, DeltaFlags, ModelDelta};
pub use path::TreePath;
pub use token::Token;

/// Bound for element identities stored in paths, deltas and the view
///
/// Elements are compared by equality per segment. They cross thread
/// boundaries inside provider replies, hence `Send + Sync`.
pub trait Element: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T> Element for T where T: Clone + Eq + Hash + Debug + Send + Sync + 'static {}
