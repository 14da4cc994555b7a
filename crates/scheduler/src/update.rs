//! Pending fetch requests

use canopy_core::TreePath;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Identifier of a scheduled update, unique per scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UpdateId(pub u64);

impl fmt::Display for UpdateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What an update fetches from the content provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateKind {
    /// Whether the element has any children
    HasChildren,
    /// Number of children of the element
    ChildCount,
    /// Children `offset..offset + length` of the element
    Children { offset: usize, length: usize },
}

impl UpdateKind {
    /// Priority class; lower values start first
    pub fn priority(&self) -> u8 {
        match self {
            UpdateKind::HasChildren => 1,
            UpdateKind::ChildCount => 2,
            UpdateKind::Children { .. } => 3,
        }
    }

    /// Whether two kinds may be merged into one request
    fn same_variant(&self, other: &UpdateKind) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateKind::HasChildren => write!(f, "has-children"),
            UpdateKind::ChildCount => write!(f, "child-count"),
            UpdateKind::Children { offset, length } => {
                write!(f, "children[{}..{}]", offset, offset + length)
            }
        }
    }
}

/// One outstanding asynchronous fetch
#[derive(Clone)]
pub struct PendingUpdate<E> {
    pub(crate) id: UpdateId,
    pub(crate) kind: UpdateKind,
    pub(crate) element_path: TreePath<E>,
    pub(crate) scheduling_path: TreePath<E>,
    pub(crate) arrival: u64,
    pub(crate) canceled: Arc<AtomicBool>,
}

impl<E: Clone + PartialEq> PendingUpdate<E> {
    pub(crate) fn new(id: UpdateId, kind: UpdateKind, element_path: TreePath<E>, arrival: u64) -> Self {
        let scheduling_path = scheduling_path_for(&kind, &element_path);
        Self {
            id,
            kind,
            element_path,
            scheduling_path,
            arrival,
            canceled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> UpdateId {
        self.id
    }

    pub fn kind(&self) -> UpdateKind {
        self.kind
    }

    /// Path of the element the update is about
    pub fn element_path(&self) -> &TreePath<E> {
        &self.element_path
    }

    /// Path used to order and coalesce the update
    pub fn scheduling_path(&self) -> &TreePath<E> {
        &self.scheduling_path
    }

    pub fn priority(&self) -> u8 {
        self.kind.priority()
    }

    /// Arrival sequence, used to break priority ties
    pub fn arrival(&self) -> u64 {
        self.arrival
    }

    /// Shared cancel flag, handed to the provider with the request
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.canceled)
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    pub(crate) fn mark_canceled(&self) {
        self.canceled.store(true, Ordering::Release);
    }

    /// Whether `other` asks for exactly the same data
    pub(crate) fn is_same_request(&self, kind: &UpdateKind, element_path: &TreePath<E>) -> bool {
        self.kind == *kind && self.element_path == *element_path
    }

    /// Try to absorb a new request into this waiting one
    ///
    /// Children ranges merge when they overlap or touch; the other kinds
    /// merge when they address the same element.
    pub(crate) fn coalesce(&mut self, kind: &UpdateKind, element_path: &TreePath<E>) -> bool {
        if !self.kind.same_variant(kind) || self.element_path != *element_path {
            return false;
        }
        match (&mut self.kind, kind) {
            (
                UpdateKind::Children { offset, length },
                UpdateKind::Children {
                    offset: other_offset,
                    length: other_length,
                },
            ) => {
                let end = *offset + *length;
                let other_end = other_offset + other_length;
                if *other_offset > end || *offset > other_end {
                    return false;
                }
                let start = (*offset).min(*other_offset);
                *length = end.max(other_end) - start;
                *offset = start;
                true
            }
            _ => true,
        }
    }

    /// Whether the update concerns `path` or anything below it
    pub(crate) fn is_contained(&self, path: &TreePath<E>) -> bool {
        self.element_path.starts_with(path)
    }
}

/// Children fetches are keyed by their own element, the others by its parent
fn scheduling_path_for<E: Clone + PartialEq>(kind: &UpdateKind, element_path: &TreePath<E>) -> TreePath<E> {
    match kind {
        UpdateKind::Children { .. } => element_path.clone(),
        UpdateKind::HasChildren | UpdateKind::ChildCount => {
            element_path.parent().unwrap_or_else(TreePath::root)
        }
    }
}

impl<E: fmt::Debug> fmt::Debug for PendingUpdate<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingUpdate")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("element_path", &self.element_path)
            .field("canceled", &self.canceled.load(Ordering::Relaxed))
            .finish()
    }
}
