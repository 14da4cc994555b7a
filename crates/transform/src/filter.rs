//! Filter trie keyed by element identity
//!
//! Each trie node mirrors one parent path of the tree and holds the model
//! indexes of its children that are currently filtered out, together with
//! the filtered elements themselves (parallel arrays, ascending by index).
//! Nodes are created on the first filter event at a path and pruned as soon
//! as they hold no indexes and no children.

use ahash::AHashMap;
use canopy_core::{Element, TreePath};

/// A trie node for one parent path
#[derive(Debug, Clone)]
struct FilterNode<E> {
    /// Filtered model indexes, sorted ascending, no duplicates
    indexes: Vec<usize>,
    /// Filtered elements, `elements[i]` sits at `indexes[i]`
    elements: Vec<E>,
    children: AHashMap<E, FilterNode<E>>,
}

impl<E: Element> FilterNode<E> {
    fn new() -> Self {
        Self {
            indexes: Vec::new(),
            elements: Vec::new(),
            children: AHashMap::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.indexes.is_empty() && self.children.is_empty()
    }

    fn remove_at(&mut self, pos: usize) {
        self.indexes.remove(pos);
        self.elements.remove(pos);
    }
}

/// Model/view index transform for a whole tree
///
/// Not thread-safe on purpose: the owning viewer confines all access to its
/// owner thread.
#[derive(Debug, Clone)]
pub struct FilterTransform<E> {
    root: FilterNode<E>,
}

impl<E: Element> Default for FilterTransform<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Element> FilterTransform<E> {
    /// Create an empty transform (nothing filtered)
    pub fn new() -> Self {
        Self {
            root: FilterNode::new(),
        }
    }

    fn node(&self, parent: &TreePath<E>) -> Option<&FilterNode<E>> {
        let mut node = &self.root;
        for segment in parent.iter() {
            node = node.children.get(segment)?;
        }
        Some(node)
    }

    fn node_mut(&mut self, parent: &TreePath<E>) -> Option<&mut FilterNode<E>> {
        let mut node = &mut self.root;
        for segment in parent.iter() {
            node = node.children.get_mut(segment)?;
        }
        Some(node)
    }

    fn node_or_create(&mut self, parent: &TreePath<E>) -> &mut FilterNode<E> {
        let mut node = &mut self.root;
        for segment in parent.iter() {
            node = node
                .children
                .entry(segment.clone())
                .or_insert_with(FilterNode::new);
        }
        node
    }

    /// Collapse empty nodes along `parent`, deepest first
    fn prune(&mut self, parent: &TreePath<E>) {
        fn prune_from<E: Element>(node: &mut FilterNode<E>, segments: &[E]) {
            if let Some((first, rest)) = segments.split_first() {
                let empty = match node.children.get_mut(first) {
                    Some(child) => {
                        prune_from(child, rest);
                        child.is_empty()
                    }
                    None => false,
                };
                if empty {
                    node.children.remove(first);
                }
            }
        }
        prune_from(&mut self.root, parent.segments());
    }

    /// Record that the child at `model_index` under `parent` is hidden
    ///
    /// Returns `false` if the index was already recorded.
    pub fn add_filtered_index(&mut self, parent: &TreePath<E>, model_index: usize, element: E) -> bool {
        let node = self.node_or_create(parent);
        match node.indexes.binary_search(&model_index) {
            Ok(_) => false,
            Err(pos) => {
                node.indexes.insert(pos, model_index);
                node.elements.insert(pos, element);
                true
            }
        }
    }

    /// Forget the filter record at `model_index` under `parent`
    pub fn clear_filtered_index(&mut self, parent: &TreePath<E>, model_index: usize) {
        let Some(node) = self.node_mut(parent) else {
            return;
        };
        if let Ok(pos) = node.indexes.binary_search(&model_index) {
            node.remove_at(pos);
            self.prune(parent);
        }
    }

    /// Forget every filter record at and below `parent`
    pub fn clear_subtree(&mut self, parent: &TreePath<E>) {
        let Some(last) = parent.last() else {
            self.clear_all();
            return;
        };
        let owner = parent.truncated(parent.len() - 1);
        if let Some(node) = self.node_mut(&owner) {
            node.children.remove(last);
            self.prune(&owner);
        }
    }

    /// Forget every filter record
    pub fn clear_all(&mut self) {
        self.root = FilterNode::new();
    }

    /// Whether no filter records exist at all
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Whether the child at `model_index` under `parent` is hidden
    pub fn is_filtered(&self, parent: &TreePath<E>, model_index: usize) -> bool {
        self.node(parent)
            .map(|node| node.indexes.binary_search(&model_index).is_ok())
            .unwrap_or(false)
    }

    /// Hidden model indexes under `parent`, ascending
    pub fn filtered_children(&self, parent: &TreePath<E>) -> &[usize] {
        self.node(parent)
            .map(|node| node.indexes.as_slice())
            .unwrap_or(&[])
    }

    /// Number of hidden children under `parent`
    pub fn filtered_count(&self, parent: &TreePath<E>) -> usize {
        self.filtered_children(parent).len()
    }

    /// View index of the child at `model_index`, `None` if it is filtered
    pub fn model_to_view_index(&self, parent: &TreePath<E>, model_index: usize) -> Option<usize> {
        let Some(node) = self.node(parent) else {
            return Some(model_index);
        };
        match node.indexes.binary_search(&model_index) {
            Ok(_) => None,
            Err(rank) => Some(model_index - rank),
        }
    }

    /// Model index of the `view_index`-th visible child
    pub fn view_to_model_index(&self, parent: &TreePath<E>, view_index: usize) -> usize {
        let mut model_index = view_index;
        for &filtered in self.filtered_children(parent) {
            if filtered <= model_index {
                model_index += 1;
            } else {
                break;
            }
        }
        model_index
    }

    /// Visible child count for a model child count
    pub fn model_to_view_count(&self, parent: &TreePath<E>, count: usize) -> usize {
        let hidden = self
            .filtered_children(parent)
            .iter()
            .take_while(|&&index| index < count)
            .count();
        count - hidden
    }

    /// Model child count for a visible child count
    pub fn view_to_model_count(&self, parent: &TreePath<E>, count: usize) -> usize {
        count + self.filtered_count(parent)
    }

    /// Apply an authoritative model child count, dropping records beyond it
    pub fn set_model_child_count(&mut self, parent: &TreePath<E>, count: usize) {
        let Some(node) = self.node_mut(parent) else {
            return;
        };
        let keep = node.indexes.partition_point(|&index| index < count);
        if keep == node.indexes.len() {
            return;
        }
        node.indexes.truncate(keep);
        node.elements.truncate(keep);
        self.prune(parent);
    }

    /// Shift records after a model removal at `model_index`
    ///
    /// A record at `model_index` itself is dropped, later ones move down by one.
    pub fn on_element_removed(&mut self, parent: &TreePath<E>, model_index: usize) {
        let Some(node) = self.node_mut(parent) else {
            return;
        };
        let mut changed = false;
        if let Ok(pos) = node.indexes.binary_search(&model_index) {
            node.remove_at(pos);
            changed = true;
        }
        for index in node.indexes.iter_mut() {
            if *index > model_index {
                *index -= 1;
            }
        }
        if changed {
            self.prune(parent);
        }
    }

    /// Shift records after a model insertion at `model_index`
    pub fn on_element_inserted(&mut self, parent: &TreePath<E>, model_index: usize) {
        if let Some(node) = self.node_mut(parent) {
            for index in node.indexes.iter_mut() {
                if *index >= model_index {
                    *index += 1;
                }
            }
        }
    }

    /// Model index of a filtered `element` under `parent`
    pub fn index_of_filtered_element(&self, parent: &TreePath<E>, element: &E) -> Option<usize> {
        let node = self.node(parent)?;
        node.elements
            .iter()
            .position(|e| e == element)
            .map(|pos| node.indexes[pos])
    }

    /// Filtered element at `model_index` under `parent`
    pub fn filtered_element(&self, parent: &TreePath<E>, model_index: usize) -> Option<&E> {
        let node = self.node(parent)?;
        let pos = node.indexes.binary_search(&model_index).ok()?;
        node.elements.get(pos)
    }
}
