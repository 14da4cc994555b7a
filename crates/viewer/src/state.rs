//! Saving and restoring viewer state
//!
//! A save walks the virtual tree into a delta marked with `EXPAND`,
//! `SELECT` and `REVEAL`, asks the token provider for a token per node and
//! files the result in the [`StateCache`] under the token of the input.
//!
//! A restore takes that delta back out and keeps it as the pending state.
//! Each fetch that lands in the tree is matched against it: token nodes are
//! compared with the live element, matched nodes replay their flags. Nodes
//! whose parent has nothing left to replay and that no outstanding work can
//! still match are dropped. The restore completes once only `REVEAL` flags on
//! matched elements remain.

use crate::cache::StateCache;
use crate::listener::StateRequestKind;
use crate::provider::{CompareRequest, EncodeRequest, EncodeTarget};
use crate::viewer::{Task, TreeViewer};
use crate::error::ProviderError;
use ahash::AHashMap;
use canopy_core::{DeltaAddress, DeltaElement, DeltaFlags, Element, ModelDelta, Token, TreePath};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// An encode request of a save that has not been answered yet
struct Outstanding<E> {
    address: DeltaAddress,
    path: TreePath<E>,
    canceled: Arc<AtomicBool>,
}

struct SaveJob<E> {
    input: E,
    delta: ModelDelta<E>,
    outstanding: AHashMap<u64, Outstanding<E>>,
    root_token: Option<Token>,
}

enum SaveProgress {
    Waiting,
    Finished,
    Failed,
}

struct RestoreKey<E> {
    id: u64,
    input: E,
    canceled: Arc<AtomicBool>,
}

/// A comparison of a saved token with a fetched element
struct PendingCompare<E> {
    path: TreePath<E>,
    token: Token,
    /// Index recorded on the saved node
    index: Option<usize>,
    /// Model index the element was fetched at
    model_index: Option<usize>,
    knows_has_children: bool,
    knows_child_count: bool,
    check_children_realized: bool,
    canceled: Arc<AtomicBool>,
}

/// A reveal that waits for the tree to settle before it takes effect
pub(crate) struct PendingReveal<E> {
    input: E,
    path: TreePath<E>,
    /// Element and index of every saved ancestor below the root
    ancestry: Vec<(E, Option<usize>)>,
    parent_child_count: Option<usize>,
    node: ModelDelta<E>,
    cycles: u32,
}

/// Save and restore bookkeeping of one viewer
pub(crate) struct StateTracker<E> {
    pub(crate) cache: StateCache<E>,
    pub(crate) pending: Option<ModelDelta<E>>,
    pub(crate) pending_reveal: Option<PendingReveal<E>>,
    in_restore: bool,
    saves: AHashMap<u64, SaveJob<E>>,
    queued_restore: Option<E>,
    restore_key: Option<RestoreKey<E>>,
    compares: AHashMap<u64, PendingCompare<E>>,
    next_id: u64,
}

impl<E> StateTracker<E> {
    pub(crate) fn new(cache: StateCache<E>) -> Self {
        Self {
            cache,
            pending: None,
            pending_reveal: None,
            in_restore: false,
            saves: AHashMap::new(),
            queued_restore: None,
            restore_key: None,
            compares: AHashMap::new(),
            next_id: 0,
        }
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Whether no token request or deferred reveal is outstanding
    pub(crate) fn is_idle(&self) -> bool {
        self.saves.is_empty()
            && self.restore_key.is_none()
            && self.compares.is_empty()
            && self.pending_reveal.is_none()
    }
}

impl<E: Element> TreeViewer<E> {
    // ---------------------------------------------------------------
    // Save
    // ---------------------------------------------------------------

    /// Capture the state of the tree shown for `input` and encode it
    pub(crate) fn save_viewer_state(&mut self, input: &E) {
        self.cancel_compares();
        if self.tokens.is_none() {
            return;
        }
        let mut save_root = self.build_viewer_state(input);

        if let Some(reveal) = self.state.pending_reveal.take() {
            merge_pending_reveal(&mut save_root, &reveal);
        }
        if let Some(pending) = &self.state.pending {
            // not yet replayed parts of an earlier restore survive the save
            merge_pending(&mut save_root, pending, true);
        }
        if save_root.children.is_empty() {
            trace!(input = ?input, "nothing to save");
            return;
        }
        self.encode_delta(input.clone(), save_root);
    }

    fn build_viewer_state(&self, input: &E) -> ModelDelta<E> {
        let mut root = ModelDelta::new(input.clone(), DeltaFlags::NO_CHANGE);
        let saved = self.save_element_state(
            &TreePath::root(),
            &mut root,
            DeltaFlags::SELECT | DeltaFlags::EXPAND,
        );
        if saved {
            if let Some(top) = self.tree.top_item().cloned() {
                self.mark_top_item(&mut root, &top);
            }
        }
        root
    }

    fn mark_top_item(&self, root: &mut ModelDelta<E>, top: &TreePath<E>) {
        if top.is_empty() {
            return;
        }
        let mut node = root;
        let mut parent = TreePath::root();
        for element in top.iter() {
            let Some(view_index) = self.tree.find_element_index(&parent, element) else {
                return;
            };
            let model_index = self.transform.view_to_model_index(&parent, view_index);
            let key = DeltaElement::Element(element.clone());
            let pos = match node.find_child(&key, Some(model_index)) {
                Some(pos) => pos,
                None => {
                    node.add_indexed_node(element.clone(), model_index, DeltaFlags::NO_CHANGE, None);
                    node.children.len() - 1
                }
            };
            node = &mut node.children[pos];
            parent = parent.child(element.clone());
        }
        node.flags |= DeltaFlags::REVEAL;
    }

    /// Record the state of `path` and its expanded descendants in `delta`
    ///
    /// Returns `false` when the node has no children to describe.
    pub(crate) fn save_element_state(
        &self,
        path: &TreePath<E>,
        delta: &mut ModelDelta<E>,
        mask: DeltaFlags,
    ) -> bool {
        let Some(node) = self.tree.node(path) else {
            return false;
        };
        if path.is_empty() {
            let view_count = node.child_count().unwrap_or(0);
            delta.child_count = Some(self.transform.view_to_model_count(path, view_count));
            if mask.contains(DeltaFlags::EXPAND) {
                delta.flags |= DeltaFlags::EXPAND;
            }
        } else {
            if node.is_expanded() {
                delta.child_count = node
                    .child_count()
                    .map(|count| self.transform.view_to_model_count(path, count));
                if mask.contains(DeltaFlags::EXPAND) {
                    delta.flags |= DeltaFlags::EXPAND;
                }
            } else if mask.contains(DeltaFlags::COLLAPSE) && node.has_children() == Some(true) {
                delta.flags |= DeltaFlags::COLLAPSE;
            }
            if mask.contains(DeltaFlags::SELECT) && self.tree.is_selected(path) {
                delta.flags |= DeltaFlags::SELECT;
            }
        }
        if node.children().is_empty() {
            return false;
        }
        for (view_index, element) in self.tree.children(path) {
            self.save_child_state(path, delta, view_index, element, mask);
        }
        true
    }

    fn save_child_state(
        &self,
        parent: &TreePath<E>,
        delta: &mut ModelDelta<E>,
        view_index: usize,
        element: E,
        mask: DeltaFlags,
    ) {
        let path = parent.child(element.clone());
        let Some(node) = self.tree.node(&path) else {
            return;
        };
        let expanded = node.is_expanded();
        let mut flags = DeltaFlags::NO_CHANGE;
        if expanded {
            if mask.contains(DeltaFlags::EXPAND) {
                flags |= DeltaFlags::EXPAND;
            }
        } else if mask.contains(DeltaFlags::COLLAPSE) && node.has_children() == Some(true) {
            flags |= DeltaFlags::COLLAPSE;
        }
        if mask.contains(DeltaFlags::SELECT) && self.tree.is_selected(&path) {
            flags |= DeltaFlags::SELECT;
        }
        if !expanded && flags.is_empty() {
            return;
        }
        let model_index = self.transform.view_to_model_index(parent, view_index);
        let child_count = node
            .child_count()
            .map(|count| self.transform.view_to_model_count(&path, count));
        let child = delta.add_indexed_node(element, model_index, flags, child_count);
        if expanded {
            for (index, grandchild) in self.tree.children(&path) {
                self.save_child_state(&path, child, index, grandchild, mask);
            }
        }
    }

    /// Mark every node for content replay and request a token per node
    fn encode_delta(&mut self, input: E, mut delta: ModelDelta<E>) {
        let Some(tokens) = self.tokens.clone() else {
            return;
        };
        delta.accept_mut(&mut |node, _| {
            node.flags |= DeltaFlags::CONTENT;
            true
        });

        let mut targets = Vec::new();
        delta.accept_addressed(&mut |address, node| {
            if address.is_empty() {
                targets.push((address.clone(), TreePath::root(), input.clone()));
            } else if let DeltaElement::Element(element) = &node.element {
                // nodes below an unmatched token keep their element
                if let Some(path) = delta.path_of(address) {
                    targets.push((address.clone(), path, element.clone()));
                }
            }
            true
        });

        let job_id = self.state.next_id();
        let mut job = SaveJob {
            input: input.clone(),
            delta,
            outstanding: AHashMap::new(),
            root_token: None,
        };
        let mut requests = Vec::with_capacity(targets.len());
        for (address, path, element) in targets {
            let id = self.state.next_id();
            let canceled = Arc::new(AtomicBool::new(false));
            job.outstanding.insert(
                id,
                Outstanding {
                    address,
                    path: path.clone(),
                    canceled: canceled.clone(),
                },
            );
            requests.push(EncodeRequest::new(
                EncodeTarget::SaveNode(job_id, id),
                element,
                path,
                canceled,
                self.sender.clone(),
            ));
        }

        debug!(input = ?input, nodes = requests.len(), "saving viewer state");
        self.notify_state(|l| l.save_begins(&input));
        self.state.saves.insert(job_id, job);
        for request in requests {
            let path = request.element_path().clone();
            self.notify_state(|l| l.request_started(&input, StateRequestKind::Encode, &path));
            tokens.encode(request);
        }
    }

    pub(crate) fn on_encode(&mut self, target: EncodeTarget, result: Result<Token, ProviderError>) {
        match target {
            EncodeTarget::RestoreKey(id) => self.on_restore_key(id, result),
            EncodeTarget::SaveNode(job_id, node_id) => self.on_save_node(job_id, node_id, result),
        }
    }

    fn on_save_node(&mut self, job_id: u64, node_id: u64, result: Result<Token, ProviderError>) {
        let Some(job) = self.state.saves.get_mut(&job_id) else {
            trace!(job = job_id, "token for canceled save");
            return;
        };
        let Some(node) = job.outstanding.remove(&node_id) else {
            return;
        };
        let input = job.input.clone();
        let progress = match result {
            Ok(token) => {
                if node.address.is_empty() {
                    job.root_token = Some(token.clone());
                }
                if let Some(target) = job.delta.node_at_mut(&node.address) {
                    target.element = DeltaElement::Token(token);
                }
                if job.outstanding.is_empty() {
                    SaveProgress::Finished
                } else {
                    SaveProgress::Waiting
                }
            }
            Err(err) => {
                warn!(path = ?node.path, error = %err, "encoding failed, dropping saved state");
                for rest in job.outstanding.values() {
                    rest.canceled.store(true, Ordering::Release);
                }
                SaveProgress::Failed
            }
        };
        self.notify_state(|l| l.request_complete(&input, StateRequestKind::Encode, &node.path));

        match progress {
            SaveProgress::Waiting => {}
            SaveProgress::Finished => {
                if let Some(job) = self.state.saves.remove(&job_id) {
                    match job.root_token {
                        Some(key) => {
                            debug!(input = ?input, key = %key, "viewer state saved");
                            self.state.cache.put(key, job.delta);
                        }
                        None => warn!(input = ?input, "save finished without an input token"),
                    }
                }
                self.save_complete(&input);
            }
            SaveProgress::Failed => {
                self.state.saves.remove(&job_id);
                self.save_complete(&input);
            }
        }
    }

    fn save_complete(&mut self, input: &E) {
        self.notify_state(|l| l.save_complete(input));
        if !self.state.saves.is_empty() {
            return;
        }
        if let Some(queued) = self.state.queued_restore.take() {
            if self.input.as_ref() == Some(&queued) {
                self.start_restore(&queued);
            }
        }
    }

    // ---------------------------------------------------------------
    // Restore
    // ---------------------------------------------------------------

    /// Look up and replay the state saved for `input`
    pub(crate) fn restore_viewer_state(&mut self, input: &E) {
        self.state.pending = None;
        if !self.state.saves.is_empty() {
            debug!(input = ?input, "restore waits for running save");
            self.state.queued_restore = Some(input.clone());
            return;
        }
        self.start_restore(input);
    }

    fn start_restore(&mut self, input: &E) {
        let Some(tokens) = self.tokens.clone() else {
            return;
        };
        let id = self.state.next_id();
        let canceled = Arc::new(AtomicBool::new(false));
        self.state.restore_key = Some(RestoreKey {
            id,
            input: input.clone(),
            canceled: canceled.clone(),
        });
        let root = TreePath::root();
        self.notify_state(|l| l.restore_begins(input));
        self.notify_state(|l| l.request_started(input, StateRequestKind::RestoreKey, &root));
        tokens.encode(EncodeRequest::new(
            EncodeTarget::RestoreKey(id),
            input.clone(),
            root,
            canceled,
            self.sender.clone(),
        ));
    }

    fn on_restore_key(&mut self, id: u64, result: Result<Token, ProviderError>) {
        if self.state.restore_key.as_ref().map(|key| key.id) != Some(id) {
            return;
        }
        let Some(key) = self.state.restore_key.take() else {
            return;
        };
        let root = TreePath::root();
        self.notify_state(|l| l.request_complete(&key.input, StateRequestKind::RestoreKey, &root));
        match result {
            Ok(token) if self.state.cache.contains(&token) => {
                self.tasks.push_back(Task::BeginRestore {
                    input: key.input,
                    key: token,
                });
            }
            Ok(token) => {
                debug!(input = ?key.input, key = %token, "no saved state");
                self.notify_state(|l| l.restore_complete(&key.input));
            }
            Err(err) => {
                warn!(input = ?key.input, error = %err, "encoding input failed, not restoring");
                self.notify_state(|l| l.restore_complete(&key.input));
            }
        }
    }

    pub(crate) fn begin_restore(&mut self, input: E, key: Token) {
        if self.input.as_ref() != Some(&input) {
            debug!(input = ?input, "input changed before restore began");
            self.notify_state(|l| l.restore_complete(&input));
            return;
        }
        let Some(mut state) = self.state.cache.take(&key) else {
            self.notify_state(|l| l.restore_complete(&input));
            return;
        };
        state.element = DeltaElement::Element(input);
        mark_reveal_delta(&mut state);
        trace!("restoring viewer state\n{}", state);
        self.state.pending = Some(state);
        self.replay_subtree(&TreePath::root(), None);
    }

    /// Match the pending state against `path` and everything materialized
    /// below it
    fn replay_subtree(&mut self, path: &TreePath<E>, model_index: Option<usize>) {
        if self.state.pending.is_none() {
            return;
        }
        let knows_has_children = self.tree.has_children(path).is_some();
        let knows_child_count = self.tree.child_count(path).is_some();
        self.restore_on_update(path, model_index, knows_has_children, knows_child_count, true);
        for (view_index, element) in self.tree.children(path) {
            let index = self.transform.view_to_model_index(path, view_index);
            self.replay_subtree(&path.child(element), Some(index));
        }
    }

    /// Replay pending state for `path` after new information about it arrived
    pub(crate) fn restore_on_update(
        &mut self,
        path: &TreePath<E>,
        model_index: Option<usize>,
        knows_has_children: bool,
        knows_child_count: bool,
        check_children_realized: bool,
    ) {
        let Some(pending) = self.state.pending.as_ref() else {
            return;
        };
        let candidates = match_candidates(pending, path);
        for candidate in candidates {
            match candidate {
                Candidate::Node(address) => self.restore_node(
                    &address,
                    knows_has_children,
                    knows_child_count,
                    check_children_realized,
                ),
                Candidate::Token(address, token) => {
                    let compare = PendingCompare {
                        path: path.clone(),
                        token,
                        index: None,
                        model_index,
                        knows_has_children,
                        knows_child_count,
                        check_children_realized,
                        canceled: Arc::new(AtomicBool::new(false)),
                    };
                    self.start_compare(&address, compare);
                }
            }
        }
        self.check_if_restore_complete();
    }

    fn start_compare(&mut self, address: &[usize], mut compare: PendingCompare<E>) {
        let (Some(tokens), Some(input)) = (self.tokens.clone(), self.input.clone()) else {
            return;
        };
        let Some(element) = compare.path.last().cloned() else {
            return;
        };
        compare.index = self
            .state
            .pending
            .as_ref()
            .and_then(|pending| pending.node_at(address))
            .and_then(|node| node.index);

        if let Some(existing) = self.state.compares.values_mut().find(|c| {
            c.path == compare.path && c.token == compare.token && c.index == compare.index
        }) {
            existing.knows_has_children |= compare.knows_has_children;
            existing.knows_child_count |= compare.knows_child_count;
            existing.check_children_realized |= compare.check_children_realized;
            if compare.model_index.is_some() {
                existing.model_index = compare.model_index;
            }
            return;
        }

        let id = self.state.next_id();
        let request = CompareRequest::new(
            id,
            element,
            compare.path.clone(),
            compare.token.clone(),
            compare.canceled.clone(),
            self.sender.clone(),
        );
        let path = compare.path.clone();
        self.state.compares.insert(id, compare);
        self.notify_state(|l| l.request_started(&input, StateRequestKind::Compare, &path));
        tokens.compare(request);
    }

    pub(crate) fn on_compare(&mut self, id: u64, result: Result<bool, ProviderError>) {
        let Some(compare) = self.state.compares.remove(&id) else {
            trace!(id, "comparison canceled");
            return;
        };
        if let Some(input) = self.input.clone() {
            self.notify_state(|l| l.request_complete(&input, StateRequestKind::Compare, &compare.path));
        }
        let equal = match result {
            Ok(equal) => equal,
            Err(err) => {
                warn!(path = ?compare.path, error = %err, "comparison failed");
                false
            }
        };
        let Some(address) = self.find_token_node(&compare.path, &compare.token, compare.index) else {
            self.check_if_restore_complete();
            return;
        };

        if equal {
            if let (Some(node), Some(element)) = (
                self.state.pending.as_mut().and_then(|p| p.node_at_mut(&address)),
                compare.path.last(),
            ) {
                node.element = DeltaElement::Element(element.clone());
            }
            trace!(path = ?compare.path, "saved node matched");
            self.restore_node(
                &address,
                compare.knows_has_children,
                compare.knows_child_count,
                compare.check_children_realized,
            );
            // children fetched before the match never saw this node
            for (view_index, element) in self.tree.children(&compare.path) {
                let index = self.transform.view_to_model_index(&compare.path, view_index);
                self.replay_subtree(&compare.path.child(element), Some(index));
            }
        } else if let Some(model_index) = compare.model_index {
            if let Some(node) = self.state.pending.as_mut().and_then(|p| p.node_at_mut(&address)) {
                // another element now sits where the revealed one was
                if node.flags.contains(DeltaFlags::REVEAL) && node.index == Some(model_index) {
                    node.flags.remove(DeltaFlags::REVEAL);
                }
            }
        }
        self.check_if_restore_complete();
    }

    fn find_token_node(
        &self,
        path: &TreePath<E>,
        token: &Token,
        index: Option<usize>,
    ) -> Option<DeltaAddress> {
        let pending = self.state.pending.as_ref()?;
        let parent = path.parent()?;
        let mut address = pending.find_path(&parent)?;
        let parent_node = pending.node_at(&address)?;
        let pos = parent_node.find_child(&DeltaElement::Token(token.clone()), index)?;
        address.push(pos);
        Some(address)
    }

    /// Apply the flags of the matched node at `address` to the tree
    fn restore_node(
        &mut self,
        address: &[usize],
        knows_has_children: bool,
        knows_child_count: bool,
        check_children_realized: bool,
    ) {
        let Some(pending) = self.state.pending.as_ref() else {
            return;
        };
        let (Some(node), Some(path)) = (pending.node_at(address), pending.path_of(address)) else {
            return;
        };
        let flags = node.flags;
        let has_child_reveal = node
            .children
            .iter()
            .any(|child| child.flags.contains(DeltaFlags::REVEAL));
        let child_reveals: Vec<(usize, usize)> = node
            .children
            .iter()
            .enumerate()
            .filter(|(_, child)| child.flags.contains(DeltaFlags::REVEAL))
            .filter_map(|(pos, child)| child.index.map(|index| (pos, index)))
            .collect();

        self.state.in_restore = true;
        let mut clear = DeltaFlags::NO_CHANGE;
        let mut strip = Vec::new();

        if knows_has_children {
            if flags.contains(DeltaFlags::EXPAND) {
                trace!(path = ?path, "restoring expansion");
                self.expand_path(&path);
                clear |= DeltaFlags::EXPAND;
            }
            if flags.contains(DeltaFlags::COLLAPSE) {
                if !self.config.auto_expands(path.len()) {
                    self.tree.set_expanded(&path, false);
                }
                clear |= DeltaFlags::COLLAPSE;
            }
        }
        if flags.contains(DeltaFlags::SELECT) {
            clear |= DeltaFlags::SELECT;
            if !self.tree.is_selected(&path) {
                let mut selection = self.tree.selection().to_vec();
                selection.push(path.clone());
                self.tree.set_selection(selection);
            }
        }
        if flags.contains(DeltaFlags::REVEAL) {
            clear |= DeltaFlags::REVEAL;
            if !has_child_reveal {
                self.defer_reveal(&path, address);
            }
        }
        if knows_child_count {
            if let Some(view_count) = self.tree.child_count(&path) {
                let model_count = self.transform.view_to_model_count(&path, view_count);
                for (pos, index) in child_reveals {
                    if index < model_count {
                        self.update_element(&path, index);
                    } else {
                        strip.push(pos);
                    }
                }
            }
        }
        let children_done = check_children_realized
            && !self.scheduler.has_children_updates(&path)
            && self.tree.children_realized(&path);
        let leaf = knows_has_children && self.tree.has_children(&path) == Some(false);
        if children_done || leaf {
            clear |= DeltaFlags::CONTENT;
        }
        self.state.in_restore = false;

        if let Some(node) = self.state.pending.as_mut().and_then(|p| p.node_at_mut(address)) {
            node.flags.remove(clear);
            for pos in strip {
                if let Some(child) = node.children.get_mut(pos) {
                    child.flags.remove(DeltaFlags::REVEAL);
                }
            }
        }
    }

    fn defer_reveal(&mut self, path: &TreePath<E>, address: &[usize]) {
        if self.state.pending_reveal.is_some() || address.is_empty() {
            return;
        }
        let (Some(input), Some(pending)) = (self.input.clone(), self.state.pending.as_ref()) else {
            return;
        };
        let Some(node) = pending.node_at(address) else {
            return;
        };
        let mut ancestry = Vec::with_capacity(address.len() - 1);
        for len in 1..address.len() {
            let Some(ancestor) = pending.node_at(&address[..len]) else {
                return;
            };
            let Some(element) = ancestor.element.as_element() else {
                return;
            };
            ancestry.push((element.clone(), ancestor.index));
        }
        let parent_child_count = pending
            .node_at(&address[..address.len() - 1])
            .and_then(|parent| parent.child_count);
        let mut node = node.clone();
        node.flags |= DeltaFlags::REVEAL;

        debug!(path = ?path, "reveal deferred until updates settle");
        self.state.pending_reveal = Some(PendingReveal {
            input,
            path: path.clone(),
            ancestry,
            parent_child_count,
            node,
            cycles: 0,
        });
        if self.scheduler.is_idle() {
            self.tasks.push_back(Task::RevealIdleCheck);
        }
    }

    /// One idle cycle of the deferred reveal
    pub(crate) fn reveal_idle_cycle(&mut self) {
        let Some(reveal) = self.state.pending_reveal.as_mut() else {
            return;
        };
        reveal.cycles += 1;
        let cycles = reveal.cycles;
        let path = reveal.path.clone();
        if self.tree.top_item() != Some(&path) && self.tree.contains(&path) {
            trace!(path = ?path, "revealing");
            self.tree.set_top_item(path);
        }
        if cycles > 1 || self.state.pending.is_none() {
            self.dispose_pending_reveal();
        } else if self.scheduler.is_idle() {
            self.tasks.push_back(Task::RevealIdleCheck);
        }
    }

    fn dispose_pending_reveal(&mut self) {
        let Some(reveal) = self.state.pending_reveal.take() else {
            return;
        };
        if self.state.pending.is_none() {
            debug!(input = ?reveal.input, "state restore complete");
            self.notify_state(|l| l.restore_complete(&reveal.input));
        } else {
            self.check_if_restore_complete();
        }
    }

    /// Drop exhausted nodes and finish the restore when nothing is left
    pub(crate) fn check_if_restore_complete(&mut self) {
        let Some(pending) = self.state.pending.as_ref() else {
            return;
        };
        let scheduler = &self.scheduler;
        let compares = &self.state.compares;
        let mut removals: Vec<DeltaAddress> = Vec::new();
        let mut complete = true;

        pending.accept_addressed(&mut |address, node| {
            if node.element.is_removed() {
                return false;
            }
            let flags = node.flags & !DeltaFlags::CONTENT;
            if flags.is_empty() {
                return true;
            }
            let parent = address
                .split_last()
                .and_then(|(_, parent)| pending.node_at(parent));
            if let Some(parent) = parent {
                if parent.flags.is_empty() {
                    let updating = pending
                        .path_of(address)
                        .map(|path| scheduler.has_updates_for(&path))
                        .unwrap_or(false);
                    let comparing = node
                        .element
                        .as_token()
                        .map(|token| compares.values().any(|c| &c.token == token))
                        .unwrap_or(false);
                    if !updating && !comparing {
                        removals.push(address.clone());
                        return false;
                    }
                }
            }
            if flags != DeltaFlags::REVEAL || node.element.as_token().is_some() {
                complete = false;
                return false;
            }
            true
        });

        if let Some(pending) = self.state.pending.as_mut() {
            for address in &removals {
                if let Some(node) = pending.node_at_mut(address) {
                    trace!("dropping unmatched saved state");
                    node.mark_removed();
                }
            }
        }
        if !complete {
            return;
        }
        let Some(done) = self.state.pending.take() else {
            return;
        };
        if self.state.pending_reveal.is_none() {
            if let DeltaElement::Element(input) = &done.element {
                debug!(input = ?input, "state restore complete");
                self.notify_state(|l| l.restore_complete(input));
            }
        }
    }

    /// Forget pending `flags` at `path` after the user overrode them
    pub(crate) fn cancel_restore(&mut self, path: &TreePath<E>, flags: DeltaFlags) {
        if self.state.in_restore {
            return;
        }
        if flags.contains(DeltaFlags::REVEAL) && self.state.pending_reveal.is_some() {
            self.dispose_pending_reveal();
            return;
        }
        let Some(pending) = self.state.pending.as_mut() else {
            return;
        };
        let global = flags & (DeltaFlags::SELECT | DeltaFlags::REVEAL);
        if !global.is_empty() {
            pending.clear_flags(global);
        }
        let structural = flags & !(DeltaFlags::SELECT | DeltaFlags::REVEAL);
        if !structural.is_empty() {
            cancel_at_path(pending, path.segments(), structural);
        }
        self.check_if_restore_complete();
    }

    /// Fold the current state below `path` into the pending state so that a
    /// refresh of `path` can restore it
    pub(crate) fn append_to_pending_state(&mut self, path: &TreePath<E>) {
        let Some(input) = self.input.clone() else {
            return;
        };
        let mut append_root = ModelDelta::new(input.clone(), DeltaFlags::NO_CHANGE);
        {
            let mut node = &mut append_root;
            let mut parent = TreePath::root();
            for element in path.iter() {
                let mut child = ModelDelta::new(element.clone(), DeltaFlags::NO_CHANGE);
                if let Some(view_index) = self.tree.find_element_index(&parent, element) {
                    child.index = Some(self.transform.view_to_model_index(&parent, view_index));
                }
                node = node.push_child(child);
                parent = parent.child(element.clone());
            }
            let mask = DeltaFlags::COLLAPSE | DeltaFlags::EXPAND | DeltaFlags::SELECT;
            if !self.save_element_state(path, node, mask) {
                return;
            }
            node.accept_mut(&mut |n, _| {
                if n.flags.contains(DeltaFlags::EXPAND) {
                    n.flags |= DeltaFlags::CONTENT;
                }
                true
            });
        }

        if let Some(pending) = self.state.pending.as_ref() {
            if !path.is_empty() {
                // keep what is still pending for the ancestors of `path`
                pending.accept_addressed(&mut |address, node| {
                    let Some(node_path) = pending.path_of(address) else {
                        return false;
                    };
                    if !path.starts_with(&node_path) {
                        return false;
                    }
                    if node_path.len() < path.len() {
                        let target = append_root
                            .find_path(&node_path)
                            .and_then(|found| append_root.node_at_mut(&found));
                        if let Some(target) = target {
                            target.flags = node.flags;
                            target.child_count = node.child_count;
                            if node.index.is_some() {
                                target.index = node.index;
                            }
                        }
                    }
                    true
                });
            }
            merge_pending(&mut append_root, pending, false);
        }

        if append_root.children.is_empty() {
            return;
        }
        if self.state.pending.is_none() {
            debug!(path = ?path, "keeping state across refresh");
            self.notify_state(|l| l.restore_begins(&input));
        }
        self.state.pending = Some(append_root);
    }

    fn cancel_compares(&mut self) {
        for (_, compare) in self.state.compares.drain() {
            compare.canceled.store(true, Ordering::Release);
        }
    }

    /// Cancel comparisons for `path` and below
    pub(crate) fn cancel_state_subtree(&mut self, path: &TreePath<E>) {
        self.state.compares.retain(|_, compare| {
            if compare.path.starts_with(path) {
                compare.canceled.store(true, Ordering::Release);
                false
            } else {
                true
            }
        });
    }

    /// Abandon any restore in progress
    pub(crate) fn reset_restore(&mut self) {
        self.cancel_compares();
        if let Some(key) = self.state.restore_key.take() {
            key.canceled.store(true, Ordering::Release);
        }
        if self.state.pending.take().is_some() {
            debug!("abandoning pending restore");
        }
        self.state.pending_reveal = None;
        self.state.queued_restore = None;
        self.tasks
            .retain(|task| !matches!(task, Task::BeginRestore { .. }));
    }

    pub(crate) fn dispose_state(&mut self) {
        self.reset_restore();
        for (_, job) in self.state.saves.drain() {
            for node in job.outstanding.values() {
                node.canceled.store(true, Ordering::Release);
            }
        }
        self.state.cache.clear();
    }
}

/// A pending node that may describe a freshly fetched element
#[derive(Debug, PartialEq)]
enum Candidate {
    /// Element node equal to the fetched element
    Node(DeltaAddress),
    /// Token node that needs a comparison
    Token(DeltaAddress, Token),
}

fn match_candidates<E: Element>(pending: &ModelDelta<E>, path: &TreePath<E>) -> Vec<Candidate> {
    let Some(last) = path.last() else {
        return vec![Candidate::Node(DeltaAddress::new())];
    };
    let parent_len = path.len() - 1;
    let segments = path.segments();
    let mut found = Vec::new();
    pending.accept_addressed(&mut |address, node| {
        let depth = address.len();
        if depth > 0 {
            match &node.element {
                DeltaElement::Element(element) if element == &segments[depth - 1] => {}
                _ => return false,
            }
        }
        if depth < parent_len {
            return true;
        }
        for (pos, child) in node.children.iter().enumerate() {
            let mut child_address = address.clone();
            child_address.push(pos);
            match &child.element {
                DeltaElement::Element(element) if element == last => {
                    found.push(Candidate::Node(child_address));
                }
                DeltaElement::Token(token) => {
                    found.push(Candidate::Token(child_address, token.clone()));
                }
                _ => {}
            }
        }
        false
    });
    found
}

/// Propagate the first `REVEAL` to its ancestors so each level fetches the
/// next element on the way
fn mark_reveal_delta<E: Element>(root: &mut ModelDelta<E>) {
    let mut found: Option<DeltaAddress> = None;
    root.accept_addressed(&mut |address, node| {
        if found.is_some() {
            return false;
        }
        if node.flags.contains(DeltaFlags::REVEAL) {
            found = Some(address.clone());
            return false;
        }
        true
    });
    let Some(address) = found else {
        return;
    };
    for len in 1..address.len() {
        if let Some(node) = root.node_at_mut(&address[..len]) {
            node.flags |= DeltaFlags::REVEAL;
        }
    }
}

/// Address in `dest` of the node matching the parent of `address` in `source`
fn find_sub_delta_parent<E: Element>(
    dest: &ModelDelta<E>,
    source: &ModelDelta<E>,
    address: &[usize],
) -> Option<DeltaAddress> {
    let (_, ancestors) = address.split_last()?;
    let mut src = source;
    let mut dst = dest;
    let mut found = DeltaAddress::new();
    for pos in ancestors {
        src = src.children.get(*pos)?;
        let matched = dst.find_child(&src.element, src.index)?;
        found.push(matched);
        dst = &dst.children[matched];
    }
    Some(found)
}

/// Copy flagged `source` nodes missing from `dest` under their matching
/// parents
fn merge_pending<E: Element>(dest: &mut ModelDelta<E>, source: &ModelDelta<E>, clear_reveal: bool) {
    let mut addresses = Vec::new();
    source.accept_addressed(&mut |address, node| {
        if node.element.is_removed() {
            return false;
        }
        if !address.is_empty() {
            addresses.push(address.clone());
        }
        !matches!(node.element, DeltaElement::Token(_)) && node.child_count.unwrap_or(0) > 0
    });

    for address in addresses {
        let Some(node) = source.node_at(&address) else {
            continue;
        };
        if node.flags.is_empty() {
            continue;
        }
        let Some(parent_address) = find_sub_delta_parent(dest, source, &address) else {
            continue;
        };
        let present = dest
            .node_at(&parent_address)
            .map(|parent| parent.find_child(&node.element, node.index).is_some())
            .unwrap_or(true);
        if present {
            continue;
        }
        if clear_reveal && node.flags.contains(DeltaFlags::REVEAL) {
            dest.clear_flags(DeltaFlags::REVEAL);
        }
        let source_count = source
            .node_at(&address[..address.len() - 1])
            .and_then(|parent| parent.child_count);
        if let Some(parent) = dest.node_at_mut(&parent_address) {
            parent.child_count = source_count;
            parent.push_child(node.clone());
        }
    }
}

fn merge_pending_reveal<E: Element>(dest: &mut ModelDelta<E>, reveal: &PendingReveal<E>) {
    let mut address = DeltaAddress::new();
    {
        let mut node: &ModelDelta<E> = &*dest;
        for (element, index) in &reveal.ancestry {
            let key = DeltaElement::Element(element.clone());
            let Some(pos) = node.find_child(&key, *index) else {
                return;
            };
            address.push(pos);
            node = &node.children[pos];
        }
    }
    dest.clear_flags(DeltaFlags::REVEAL);
    let Some(parent) = dest.node_at_mut(&address) else {
        return;
    };
    match parent.find_child(&reveal.node.element, reveal.node.index) {
        Some(pos) => parent.children[pos].flags |= DeltaFlags::REVEAL,
        None => {
            parent.child_count = reveal.parent_child_count;
            parent.push_child(reveal.node.clone());
        }
    }
}

/// Remove `mask` from the node at `segments`; canceling an expansion also
/// forgets everything saved below it
fn cancel_at_path<E: Element>(node: &mut ModelDelta<E>, segments: &[E], mask: DeltaFlags) {
    match segments.split_first() {
        None => {
            node.flags.remove(mask);
            if mask.contains(DeltaFlags::EXPAND) {
                for child in &mut node.children {
                    child.accept_mut(&mut |n, _| {
                        n.flags = DeltaFlags::NO_CHANGE;
                        true
                    });
                }
            }
        }
        Some((first, rest)) => {
            for child in &mut node.children {
                if child.element.as_element() == Some(first) {
                    cancel_at_path(child, rest, mask);
                }
            }
        }
    }
}
