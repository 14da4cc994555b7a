//! Observers owned by a viewer instance
//!
//! All callbacks run on the owner thread. Every method has an empty default
//! so observers implement only what they need.

use canopy_core::{ModelDelta, TreePath};
use scheduler::PendingUpdate;

/// Progress of content fetches
pub trait UpdateListener<E> {
    /// First fetch started after the viewer was idle
    fn updates_begin(&self) {}

    /// Last outstanding fetch finished
    fn updates_complete(&self) {}

    fn update_started(&self, _update: &PendingUpdate<E>) {}

    fn update_complete(&self, _update: &PendingUpdate<E>) {}
}

/// Kind of token request issued by the state tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateRequestKind {
    /// Token for the input, looked up in the state cache
    RestoreKey,
    /// Token for an element being saved
    Encode,
    /// Comparison of a saved token with a live element
    Compare,
}

/// Progress of viewer state save and restore
pub trait StateListener<E> {
    fn save_begins(&self, _input: &E) {}

    fn save_complete(&self, _input: &E) {}

    fn restore_begins(&self, _input: &E) {}

    /// Every saved expansion and selection has been replayed or discarded
    fn restore_complete(&self, _input: &E) {}

    fn request_started(&self, _input: &E, _kind: StateRequestKind, _path: &TreePath<E>) {}

    fn request_complete(&self, _input: &E, _kind: StateRequestKind, _path: &TreePath<E>) {}
}

/// Deltas applied to the viewer
pub trait ModelChangedListener<E> {
    fn model_changed(&self, delta: &ModelDelta<E>);
}
