//! Bounded cache of saved viewer states

use canopy_core::{ModelDelta, Token};
use lru::LruCache;
use std::num::NonZeroUsize;
use tracing::trace;

/// Saved expansion and selection state of one input
///
/// Every node below the root carries a token instead of a live element.
pub type SavedState<E> = ModelDelta<E>;

/// Saved states keyed by the token of their input, least recently used out
pub struct StateCache<E> {
    states: LruCache<Token, SavedState<E>>,
}

impl<E> StateCache<E> {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            states: LruCache::new(capacity),
        }
    }

    /// Store the state for `key`, evicting the oldest entry when full
    pub fn put(&mut self, key: Token, state: SavedState<E>) {
        if let Some((evicted, _)) = self.states.push(key.clone(), state) {
            if evicted != key {
                trace!(key = %evicted, "evicted saved state");
            }
        }
    }

    /// Remove and return the state for `key`
    pub fn take(&mut self, key: &Token) -> Option<SavedState<E>> {
        self.states.pop(key)
    }

    pub fn contains(&self, key: &Token) -> bool {
        self.states.contains(key)
    }

    pub fn peek(&self, key: &Token) -> Option<&SavedState<E>> {
        self.states.peek(key)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.states.cap().get()
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }
}
