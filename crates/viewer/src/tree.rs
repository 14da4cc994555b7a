//! Headless virtual tree
//!
//! The lazily populated structure a UI would render. All indexes and counts
//! here are in view space. A node exists for every materialized path; its
//! children are slots that stay empty until the element at that position has
//! been fetched.

use ahash::AHashMap;
use canopy_core::{Element, TreePath};

/// State of one materialized node
#[derive(Debug, Clone)]
pub struct ViewNode<E> {
    child_count: Option<usize>,
    children: Vec<Option<E>>,
    has_children: Option<bool>,
    expanded: bool,
}

impl<E> ViewNode<E> {
    fn new() -> Self {
        Self {
            child_count: None,
            children: Vec::new(),
            has_children: None,
            expanded: false,
        }
    }

    /// View child count, `None` until known
    pub fn child_count(&self) -> Option<usize> {
        self.child_count
    }

    /// Child slots; `None` marks a slot not fetched yet
    pub fn children(&self) -> &[Option<E>] {
        &self.children
    }

    pub fn is_expanded(&self) -> bool {
        self.expanded
    }

    /// Whether the node has children, `None` until known
    pub fn has_children(&self) -> Option<bool> {
        match self.child_count {
            Some(count) => Some(count > 0),
            None => self.has_children,
        }
    }
}

/// The view: materialized nodes, selection and top item
#[derive(Debug, Clone)]
pub struct VirtualTree<E> {
    nodes: AHashMap<TreePath<E>, ViewNode<E>>,
    selection: Vec<TreePath<E>>,
    top_item: Option<TreePath<E>>,
}

impl<E: Element> Default for VirtualTree<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Element> VirtualTree<E> {
    /// Tree holding only the (always expanded) input node
    pub fn new() -> Self {
        let mut root = ViewNode::new();
        root.expanded = true;
        let mut nodes = AHashMap::new();
        nodes.insert(TreePath::root(), root);
        Self {
            nodes,
            selection: Vec::new(),
            top_item: None,
        }
    }

    pub fn node(&self, path: &TreePath<E>) -> Option<&ViewNode<E>> {
        self.nodes.get(path)
    }

    pub fn contains(&self, path: &TreePath<E>) -> bool {
        self.nodes.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1 && self.child_count(&TreePath::root()).unwrap_or(0) == 0
    }

    pub fn child_count(&self, path: &TreePath<E>) -> Option<usize> {
        self.nodes.get(path).and_then(|n| n.child_count)
    }

    /// Element in view slot `index` of `parent`
    pub fn child(&self, parent: &TreePath<E>, index: usize) -> Option<&E> {
        self.nodes
            .get(parent)
            .and_then(|n| n.children.get(index))
            .and_then(|slot| slot.as_ref())
    }

    /// Materialized children of `parent` with their view indexes
    pub fn children(&self, parent: &TreePath<E>) -> Vec<(usize, E)> {
        self.nodes
            .get(parent)
            .map(|n| {
                n.children
                    .iter()
                    .enumerate()
                    .filter_map(|(i, slot)| slot.clone().map(|e| (i, e)))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn has_children(&self, path: &TreePath<E>) -> Option<bool> {
        self.nodes.get(path).and_then(|n| n.has_children())
    }

    pub fn is_expanded(&self, path: &TreePath<E>) -> bool {
        self.nodes.get(path).map(|n| n.expanded).unwrap_or(false)
    }

    /// Whether every ancestor of `path` is expanded
    pub fn is_visible(&self, path: &TreePath<E>) -> bool {
        if !self.contains(path) {
            return false;
        }
        (0..path.len()).all(|len| self.is_expanded(&path.truncated(len)))
    }

    /// View index of `element` under `parent`
    pub fn find_element_index(&self, parent: &TreePath<E>, element: &E) -> Option<usize> {
        self.nodes
            .get(parent)?
            .children
            .iter()
            .position(|slot| slot.as_ref() == Some(element))
    }

    /// First empty slot under `parent`
    pub fn find_unmapped_index(&self, parent: &TreePath<E>) -> Option<usize> {
        self.nodes
            .get(parent)?
            .children
            .iter()
            .position(Option::is_none)
    }

    /// Whether the child count of `path` is known and every slot is filled
    pub fn children_realized(&self, path: &TreePath<E>) -> bool {
        match self.nodes.get(path) {
            Some(node) => {
                node.child_count.is_some() && node.children.iter().all(Option::is_some)
            }
            None => false,
        }
    }

    /// Set the view child count, dropping nodes beyond it
    pub fn set_child_count(&mut self, path: &TreePath<E>, count: usize) {
        let Some(node) = self.nodes.get_mut(path) else {
            return;
        };
        node.child_count = Some(count);
        if count == 0 {
            node.has_children = Some(false);
            node.expanded = path.is_empty();
        }
        let dropped: Vec<E> = if node.children.len() > count {
            node.children.drain(count..).flatten().collect()
        } else {
            node.children.resize(count, None);
            Vec::new()
        };
        for element in dropped {
            self.remove_subtree(&path.child(element));
        }
    }

    /// Record whether `path` has children
    pub fn set_has_children(&mut self, path: &TreePath<E>, has_children: bool) {
        let Some(node) = self.nodes.get_mut(path) else {
            return;
        };
        node.has_children = Some(has_children);
        if !has_children {
            self.set_child_count(path, 0);
        }
    }

    /// Put `element` into view slot `index`, replacing what was there
    ///
    /// Returns `false` if the slot does not exist.
    pub fn replace(&mut self, parent: &TreePath<E>, index: usize, element: E) -> bool {
        let Some(node) = self.nodes.get_mut(parent) else {
            return false;
        };
        let Some(slot) = node.children.get_mut(index) else {
            return false;
        };
        let previous = slot.replace(element.clone());
        match previous {
            Some(previous) if previous == element => {}
            Some(previous) => {
                self.remove_subtree(&parent.child(previous));
                self.nodes.entry(parent.child(element)).or_insert_with(ViewNode::new);
            }
            None => {
                self.nodes.entry(parent.child(element)).or_insert_with(ViewNode::new);
            }
        }
        true
    }

    /// Insert `element` at view `index`, shifting later slots down
    pub fn insert(&mut self, parent: &TreePath<E>, index: usize, element: E) -> bool {
        let Some(node) = self.nodes.get_mut(parent) else {
            return false;
        };
        let index = index.min(node.children.len());
        node.children.insert(index, Some(element.clone()));
        node.child_count = Some(node.children.len());
        self.nodes.entry(parent.child(element)).or_insert_with(ViewNode::new);
        true
    }

    /// Remove view slot `index` of `parent` together with its subtree
    pub fn remove(&mut self, parent: &TreePath<E>, index: usize) -> Option<E> {
        let node = self.nodes.get_mut(parent)?;
        if index >= node.children.len() {
            return None;
        }
        let removed = node.children.remove(index);
        node.child_count = Some(node.children.len());
        if node.children.is_empty() {
            node.has_children = Some(false);
        }
        if let Some(element) = &removed {
            self.remove_subtree(&parent.child(element.clone()));
        }
        removed
    }

    /// Forget every child of `path` (the node itself stays)
    pub fn reset_children(&mut self, path: &TreePath<E>) {
        let Some(node) = self.nodes.get_mut(path) else {
            return;
        };
        node.child_count = None;
        node.has_children = None;
        let children: Vec<E> = node.children.drain(..).flatten().collect();
        for element in children {
            self.remove_subtree(&path.child(element));
        }
    }

    /// Drop `path` and every node below it, including their selection
    pub fn remove_subtree(&mut self, path: &TreePath<E>) {
        self.nodes.retain(|p, _| !p.starts_with(path));
        self.selection.retain(|p| !p.starts_with(path));
        if self
            .top_item
            .as_ref()
            .map(|top| top.starts_with(path))
            .unwrap_or(false)
        {
            self.top_item = None;
        }
    }

    pub fn set_expanded(&mut self, path: &TreePath<E>, expanded: bool) -> bool {
        match self.nodes.get_mut(path) {
            Some(node) => {
                node.expanded = expanded || path.is_empty();
                true
            }
            None => false,
        }
    }

    /// Materialized paths that are expanded, shallowest first
    pub fn expanded_paths(&self) -> Vec<TreePath<E>> {
        let mut paths: Vec<TreePath<E>> = self
            .nodes
            .iter()
            .filter(|(p, n)| n.expanded && !p.is_empty())
            .map(|(p, _)| p.clone())
            .collect();
        paths.sort_by_key(|p| p.len());
        paths
    }

    pub fn selection(&self) -> &[TreePath<E>] {
        &self.selection
    }

    /// Replace the selection; paths that are not materialized are dropped
    pub fn set_selection(&mut self, paths: Vec<TreePath<E>>) {
        let mut selection = Vec::with_capacity(paths.len());
        for path in paths {
            if !path.is_empty() && self.contains(&path) && !selection.contains(&path) {
                selection.push(path);
            }
        }
        self.selection = selection;
    }

    pub fn is_selected(&self, path: &TreePath<E>) -> bool {
        self.selection.contains(path)
    }

    pub fn top_item(&self) -> Option<&TreePath<E>> {
        self.top_item.as_ref()
    }

    /// Scroll `path` to the top
    pub fn set_top_item(&mut self, path: TreePath<E>) -> bool {
        if path.is_empty() || !self.contains(&path) {
            return false;
        }
        self.top_item = Some(path);
        true
    }

    /// Materialized, visible paths in display order
    pub fn visible_paths(&self) -> Vec<TreePath<E>> {
        let mut out = Vec::new();
        self.collect_visible(&TreePath::root(), &mut out);
        out
    }

    fn collect_visible(&self, parent: &TreePath<E>, out: &mut Vec<TreePath<E>>) {
        let Some(node) = self.nodes.get(parent) else {
            return;
        };
        if !node.expanded {
            return;
        }
        for element in node.children.iter().flatten() {
            let path = parent.child(element.clone());
            out.push(path.clone());
            self.collect_visible(&path, out);
        }
    }
}
