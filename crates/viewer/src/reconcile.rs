//! Applying model deltas to the view
//!
//! A delta is applied in three depth-first passes: removals first, then
//! additions and content changes, then expansion, selection and reveal.
//! Within a pass each node's flags are handled in a fixed order.

use crate::viewer::TreeViewer;
use canopy_core::{DeltaFlags, Element, ModelDelta, TreePath};
use scheduler::UpdateKind;
use tracing::{debug, trace};

const REMOVALS: DeltaFlags = DeltaFlags::REMOVED.union(DeltaFlags::UNINSTALL);

const CHANGES: DeltaFlags = DeltaFlags::ADDED
    .union(DeltaFlags::CONTENT)
    .union(DeltaFlags::STATE)
    .union(DeltaFlags::INSERTED)
    .union(DeltaFlags::REPLACED)
    .union(DeltaFlags::INSTALL);

const VIEW_STATE: DeltaFlags = DeltaFlags::EXPAND
    .union(DeltaFlags::COLLAPSE)
    .union(DeltaFlags::SELECT)
    .union(DeltaFlags::REVEAL);

/// Parent node and tree path of the node at `address`
fn parent_of<'d, E: Element>(
    delta: &'d ModelDelta<E>,
    address: &[usize],
) -> Option<(&'d ModelDelta<E>, TreePath<E>)> {
    let (_, parent) = address.split_last()?;
    Some((delta.node_at(parent)?, delta.path_of(parent)?))
}

impl<E: Element> TreeViewer<E> {
    /// Apply `delta` on the owner thread
    pub(crate) fn process_delta(&mut self, delta: ModelDelta<E>) {
        if self.input.is_none() || delta.element.as_element() != self.input.as_ref() {
            debug!("ignoring delta for another input");
            return;
        }
        trace!("model changed\n{}", delta);
        for pass in [REMOVALS, CHANGES, VIEW_STATE] {
            self.apply_pass(&delta, pass);
        }
        self.check_if_restore_complete();
        self.notify_model_changed(&delta);
    }

    fn apply_pass(&mut self, delta: &ModelDelta<E>, mask: DeltaFlags) {
        let mut addresses = Vec::new();
        delta.accept_addressed(&mut |address, node| {
            if node.flags.intersects(mask) {
                addresses.push(address.clone());
            }
            true
        });

        for address in addresses {
            let Some(node) = delta.node_at(&address) else {
                continue;
            };
            let flags = node.flags & mask;
            if flags.contains(DeltaFlags::ADDED) {
                self.handle_add(delta, &address);
            }
            if flags.contains(DeltaFlags::REMOVED) {
                self.handle_remove(delta, &address);
            }
            if flags.contains(DeltaFlags::CONTENT) {
                self.handle_content(delta, &address);
            }
            if flags.contains(DeltaFlags::STATE) {
                self.handle_state(delta, &address);
            }
            if flags.contains(DeltaFlags::INSERTED) {
                self.handle_insert(delta, &address);
            }
            if flags.contains(DeltaFlags::REPLACED) {
                self.handle_replace(delta, &address);
            }
            if flags.contains(DeltaFlags::INSTALL) {
                if let Some(path) = delta.path_of(&address) {
                    self.install_proxy(&path);
                }
            }
            if flags.contains(DeltaFlags::UNINSTALL) {
                if let Some(path) = delta.path_of(&address) {
                    self.dispose_proxy(&path);
                }
            }
            if flags.contains(DeltaFlags::EXPAND) {
                self.handle_expand(delta, &address);
            }
            if flags.contains(DeltaFlags::COLLAPSE) {
                self.handle_collapse(delta, &address);
            }
            if flags.contains(DeltaFlags::SELECT) {
                self.handle_select(delta, &address);
            }
            if flags.contains(DeltaFlags::REVEAL) {
                self.handle_reveal(delta, &address);
            }
        }
    }

    fn handle_add(&mut self, delta: &ModelDelta<E>, address: &[usize]) {
        let Some(node) = delta.node_at(address) else {
            return;
        };
        let Some(element) = node.element.as_element().cloned() else {
            return;
        };
        let Some((parent, parent_path)) = parent_of(delta, address) else {
            return;
        };
        if !self.tree.contains(&parent_path) {
            return;
        }
        let Some(count) = parent.child_count.filter(|count| *count > 0) else {
            self.schedule(UpdateKind::ChildCount, parent_path);
            return;
        };
        let index = node.index.unwrap_or(count - 1);
        let old_count = self
            .tree
            .child_count(&parent_path)
            .map(|view| self.transform.view_to_model_count(&parent_path, view));
        let inserted = old_count.map_or(false, |old| index < old && old < count);

        if inserted {
            trace!(parent = ?parent_path, index, "added element inserted before the end");
            self.transform.on_element_inserted(&parent_path, index);
            if self.should_filter(&parent_path, &element) {
                self.transform.add_filtered_index(&parent_path, index, element);
            } else if let Some(view_index) = self.transform.model_to_view_index(&parent_path, index) {
                self.tree.insert(&parent_path, view_index, element.clone());
                self.materialized(&parent_path, index, element);
            }
            self.apply_model_child_count(&parent_path, count);
        } else {
            self.apply_model_child_count(&parent_path, count);
            self.apply_child(&parent_path, index, element);
        }
    }

    fn handle_remove(&mut self, delta: &ModelDelta<E>, address: &[usize]) {
        let Some(node) = delta.node_at(address) else {
            return;
        };
        let Some((parent, parent_path)) = parent_of(delta, address) else {
            return;
        };
        if !self.tree.contains(&parent_path) {
            return;
        }
        let element = node.element.as_element();
        let mut model_index = node.index;
        let mut view_index =
            model_index.and_then(|index| self.transform.model_to_view_index(&parent_path, index));

        if model_index.is_none() {
            if let Some(element) = element {
                if let Some(index) = self.transform.index_of_filtered_element(&parent_path, element) {
                    model_index = Some(index);
                } else if let Some(index) = self.tree.find_element_index(&parent_path, element) {
                    view_index = Some(index);
                    model_index = Some(self.transform.view_to_model_index(&parent_path, index));
                }
            }
        }
        if model_index.is_none() {
            // the removed element may never have been fetched
            if let Some(index) = self.tree.find_unmapped_index(&parent_path) {
                view_index = Some(index);
                model_index = Some(self.transform.view_to_model_index(&parent_path, index));
            }
        }

        match model_index {
            Some(index) => self.remove_child(&parent_path, index, view_index),
            None => {
                let consistent = match (self.tree.child_count(&parent_path), parent.child_count) {
                    (Some(items), Some(count)) => {
                        self.transform.model_to_view_count(&parent_path, count) == items
                    }
                    _ => false,
                };
                if !consistent {
                    debug!(parent = ?parent_path, "removed element not found, refreshing parent");
                    self.refresh_path(&parent_path);
                }
            }
        }
    }

    fn remove_child(&mut self, parent: &TreePath<E>, model_index: usize, view_index: Option<usize>) {
        trace!(parent = ?parent, model_index, "removing child");
        self.scheduler.reschedule_after_removal(parent, model_index);
        if let Some(view_index) = view_index {
            self.drop_view_slot(parent, view_index);
        }
        self.transform.on_element_removed(parent, model_index);
    }

    fn handle_content(&mut self, delta: &ModelDelta<E>, address: &[usize]) {
        let Some(path) = delta.path_of(address) else {
            return;
        };
        if !self.tree.contains(&path) {
            return;
        }
        self.cancel_state_subtree(&path);
        self.append_to_pending_state(&path);
        self.refresh_path(&path);
    }

    /// Refetch the element so the filters see its new state
    fn handle_state(&mut self, delta: &ModelDelta<E>, address: &[usize]) {
        let Some(node) = delta.node_at(address) else {
            return;
        };
        let Some(element) = node.element.as_element() else {
            return;
        };
        let Some((_, parent_path)) = parent_of(delta, address) else {
            return;
        };
        if !self.tree.contains(&parent_path) {
            return;
        }
        let index = node
            .index
            .or_else(|| self.transform.index_of_filtered_element(&parent_path, element))
            .or_else(|| {
                self.tree
                    .find_element_index(&parent_path, element)
                    .map(|view| self.transform.view_to_model_index(&parent_path, view))
            });
        if let Some(index) = index {
            self.update_element(&parent_path, index);
        }
    }

    fn handle_insert(&mut self, delta: &ModelDelta<E>, address: &[usize]) {
        let Some(node) = delta.node_at(address) else {
            return;
        };
        let Some(index) = node.index else {
            self.handle_add(delta, address);
            return;
        };
        let Some(element) = node.element.as_element().cloned() else {
            return;
        };
        let Some((_, parent_path)) = parent_of(delta, address) else {
            return;
        };
        // an unknown count is fetched whole later
        if self.tree.child_count(&parent_path).is_none() {
            return;
        }
        self.transform.on_element_inserted(&parent_path, index);
        if self.should_filter(&parent_path, &element) {
            self.transform.add_filtered_index(&parent_path, index, element);
            return;
        }
        let Some(view_index) = self.transform.model_to_view_index(&parent_path, index) else {
            return;
        };
        self.tree.insert(&parent_path, view_index, element.clone());
        self.materialized(&parent_path, index, element);
    }

    fn handle_replace(&mut self, delta: &ModelDelta<E>, address: &[usize]) {
        let Some(node) = delta.node_at(address) else {
            return;
        };
        let (Some(old), Some(replacement)) = (node.element.as_element(), node.replacement.clone())
        else {
            return;
        };
        let Some((_, parent)) = parent_of(delta, address) else {
            return;
        };
        if !self.tree.contains(&parent) {
            return;
        }
        let index = node
            .index
            .or_else(|| self.transform.index_of_filtered_element(&parent, old))
            .or_else(|| {
                self.tree
                    .find_element_index(&parent, old)
                    .map(|view| self.transform.view_to_model_index(&parent, view))
            });
        let Some(index) = index else {
            return;
        };

        let was_filtered = self.transform.is_filtered(&parent, index);
        let hide = self.should_filter(&parent, &replacement);
        let view_before = self.transform.model_to_view_index(&parent, index);
        if was_filtered {
            self.transform.clear_filtered_index(&parent, index);
        }
        if hide {
            self.transform
                .add_filtered_index(&parent, index, replacement.clone());
        }

        match (was_filtered, hide) {
            (true, true) => {}
            (true, false) => {
                if let Some(view_index) = self.transform.model_to_view_index(&parent, index) {
                    self.tree.insert(&parent, view_index, replacement.clone());
                    self.materialized(&parent, index, replacement);
                }
            }
            (false, true) => {
                if let Some(view_index) = view_before {
                    self.drop_view_slot(&parent, view_index);
                }
            }
            (false, false) => {
                let Some(view_index) = view_before else {
                    return;
                };
                if let Some(current) = self.tree.child(&parent, view_index).cloned() {
                    if current != replacement {
                        self.cancel_path(&parent.child(current));
                    }
                }
                if self.tree.replace(&parent, view_index, replacement.clone()) {
                    self.materialized(&parent, index, replacement);
                }
            }
        }
    }

    /// Expand the node at `address`, materializing unexpanded ancestors
    fn handle_expand(&mut self, delta: &ModelDelta<E>, address: &[usize]) {
        let Some((_, parent_address)) = address.split_last() else {
            if let Some(count) = delta.child_count.filter(|count| *count > 0) {
                self.apply_model_child_count(&TreePath::root(), count);
            }
            return;
        };
        let parent_expands = delta
            .node_at(parent_address)
            .map_or(false, |parent| parent.flags.contains(DeltaFlags::EXPAND));
        if !parent_expands {
            self.handle_expand(delta, parent_address);
        }

        let Some(node) = delta.node_at(address) else {
            return;
        };
        let Some(path) = delta.path_of(address) else {
            return;
        };
        if let (Some(index), Some(parent), Some(element)) = (node.index, path.parent(), path.last()) {
            self.materialize_at(&parent, index, element.clone());
        }
        if !self.tree.contains(&path) {
            return;
        }
        if let Some(count) = node.child_count.filter(|count| *count > 0) {
            self.apply_model_child_count(&path, count);
        }
        self.expand_path(&path);
    }

    /// Put `element` into the view slot of model index `model_index`
    ///
    /// Returns whether the element is now in the tree at that slot.
    fn materialize_at(&mut self, parent: &TreePath<E>, model_index: usize, element: E) -> bool {
        if !self.tree.contains(parent) || self.should_filter(parent, &element) {
            return false;
        }
        let Some(view_index) = self.transform.model_to_view_index(parent, model_index) else {
            return false;
        };
        if self
            .tree
            .child_count(parent)
            .map_or(true, |count| view_index >= count)
        {
            return false;
        }
        if self.tree.child(parent, view_index) == Some(&element) {
            return true;
        }
        if let Some(current) = self.tree.child(parent, view_index).cloned() {
            self.cancel_path(&parent.child(current));
        }
        if !self.tree.replace(parent, view_index, element.clone()) {
            return false;
        }
        self.materialized(parent, model_index, element);
        true
    }

    fn handle_collapse(&mut self, delta: &ModelDelta<E>, address: &[usize]) {
        let Some(path) = delta.path_of(address) else {
            return;
        };
        if self.tree.contains(&path) {
            self.tree.set_expanded(&path, false);
        }
        self.cancel_restore(&path, DeltaFlags::EXPAND);
    }

    fn handle_select(&mut self, delta: &ModelDelta<E>, address: &[usize]) {
        let Some(node) = delta.node_at(address) else {
            return;
        };
        let Some(path) = delta.path_of(address) else {
            return;
        };
        let candidate = vec![path.clone()];
        if !node.flags.contains(DeltaFlags::FORCE) && !self.override_selection(&candidate) {
            debug!(path = ?path, "selection change vetoed");
            return;
        }
        self.tree.set_selection(Vec::new());
        if let (Some(index), Some((parent, parent_path)), Some(element)) =
            (node.index, parent_of(delta, address), path.last())
        {
            if let Some(count) = parent.child_count.filter(|count| *count > 0) {
                self.apply_model_child_count(&parent_path, count);
            }
            self.materialize_at(&parent_path, index, element.clone());
        }
        self.tree.set_selection(candidate);
        self.cancel_restore(&path, DeltaFlags::SELECT);
    }

    fn handle_reveal(&mut self, delta: &ModelDelta<E>, address: &[usize]) {
        let Some((_, parent_address)) = address.split_last() else {
            return;
        };
        self.handle_expand(delta, parent_address);
        let Some(node) = delta.node_at(address) else {
            return;
        };
        let Some(path) = delta.path_of(address) else {
            return;
        };
        if let (Some(index), Some(parent), Some(element)) = (node.index, path.parent(), path.last()) {
            self.materialize_at(&parent, index, element.clone());
        }
        if self.tree.contains(&path) {
            self.tree.set_top_item(path.clone());
        }
        self.cancel_restore(&path, DeltaFlags::REVEAL);
    }
}
