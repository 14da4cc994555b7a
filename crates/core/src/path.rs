//! Tree paths: ordered, immutable sequences of element identities

use smallvec::SmallVec;
use std::fmt;

/// Path from the (implicit) input element down to a node
///
/// The empty path addresses the input itself. Uses SmallVec so that the
/// shallow paths that dominate real trees stay on the stack.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct TreePath<E> {
    segments: SmallVec<[E; 4]>,
}

impl<E: Clone + PartialEq> TreePath<E> {
    /// The empty path (the input element)
    pub fn root() -> Self {
        Self {
            segments: SmallVec::new(),
        }
    }

    /// Build a path from root-to-leaf segments
    pub fn from_segments<I: IntoIterator<Item = E>>(segments: I) -> Self {
        Self {
            segments: segments.into_iter().collect(),
        }
    }

    /// Number of segments
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Whether this is the root path
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Segment at `index`, counted from the root
    pub fn segment(&self, index: usize) -> Option<&E> {
        self.segments.get(index)
    }

    /// All segments, root first
    pub fn segments(&self) -> &[E] {
        &self.segments
    }

    /// The leaf element, `None` for the root path
    pub fn last(&self) -> Option<&E> {
        self.segments.last()
    }

    /// Parent path, `None` for the root path
    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        Some(self.truncated(self.segments.len() - 1))
    }

    /// Path of the given child of this node
    pub fn child(&self, element: E) -> Self {
        let mut segments = self.segments.clone();
        segments.push(element);
        Self { segments }
    }

    /// First `len` segments of this path
    pub fn truncated(&self, len: usize) -> Self {
        Self {
            segments: self.segments.iter().take(len).cloned().collect(),
        }
    }

    /// Whether `prefix` is this path or one of its ancestors
    pub fn starts_with(&self, prefix: &TreePath<E>) -> bool {
        prefix.len() <= self.len() && self.segments[..prefix.len()] == prefix.segments[..]
    }

    /// Whether this path is a strict ancestor of `other`
    pub fn is_ancestor_of(&self, other: &TreePath<E>) -> bool {
        self.len() < other.len() && other.starts_with(self)
    }

    /// Iterate over segments, root first
    pub fn iter(&self) -> std::slice::Iter<'_, E> {
        self.segments.iter()
    }
}

impl<E: Clone + PartialEq> Default for TreePath<E> {
    fn default() -> Self {
        Self::root()
    }
}

impl<E: Clone + PartialEq> FromIterator<E> for TreePath<E> {
    fn from_iter<I: IntoIterator<Item = E>>(iter: I) -> Self {
        Self::from_segments(iter)
    }
}

impl<E: fmt::Debug> fmt::Debug for TreePath<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.segments.iter()).finish()
    }
}

impl<E: fmt::Display> fmt::Display for TreePath<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return write!(f, "/");
        }
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}
