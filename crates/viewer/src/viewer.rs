//! The owner-thread engine
//!
//! `TreeViewer` ties the pieces together:
//! - scheduled fetches are dispatched to the content provider
//! - provider replies, token replies and posted deltas arrive on a channel
//!   and are applied in [`TreeViewer::process_pending`]
//! - local follow-up work runs from a task queue on the same thread
//!
//! Every mutating operation asserts that it runs on the thread that created
//! the viewer. Nothing inside the engine blocks except
//! [`TreeViewer::wait_for_completions`].

use crate::cache::StateCache;
use crate::config::ViewerConfig;
use crate::error::ViewerError;
use crate::listener::{ModelChangedListener, StateListener, UpdateListener};
use crate::provider::{
    Completion, ContentProvider, ContentReply, ContentRequest, ElementFilter, ModelProxy,
    ModelProxyFactory, SelectionPolicy, TokenProvider,
};
use crate::state::StateTracker;
use crate::tree::VirtualTree;
use ahash::AHashMap;
use canopy_core::{DeltaFlags, Element, ModelDelta, Token, TreePath};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use scheduler::{SchedulerEvent, UpdateKind, UpdateScheduler};
use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};
use transform::FilterTransform;

/// Follow-up work queued on the owner thread
pub(crate) enum Task<E> {
    /// Adopt the cached state stored under `key` if `input` is still current
    BeginRestore { input: E, key: Token },
    /// Idle cycle for a deferred reveal
    RevealIdleCheck,
}

/// Thread-safe route for posting deltas to a viewer
///
/// Handed to model proxies; deltas posted here are applied on the owner
/// thread during the next [`TreeViewer::process_pending`].
pub struct ViewerHandle<E> {
    sender: Sender<Completion<E>>,
}

impl<E> Clone for ViewerHandle<E> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<E: Element> ViewerHandle<E> {
    /// Queue `delta` for the owner thread; `false` once the viewer is gone
    pub fn post_delta(&self, delta: ModelDelta<E>) -> bool {
        self.sender.send(Completion::Delta(delta)).is_ok()
    }
}

/// Asynchronous, filterable, virtual tree viewer
pub struct TreeViewer<E: Element> {
    owner: ThreadId,
    pub(crate) config: ViewerConfig,
    content: Arc<dyn ContentProvider<E>>,
    pub(crate) tokens: Option<Arc<dyn TokenProvider<E>>>,
    selection_policy: Option<Arc<dyn SelectionPolicy<E>>>,
    proxy_factory: Option<Arc<dyn ModelProxyFactory<E>>>,
    filters: Vec<Arc<dyn ElementFilter<E>>>,
    pub(crate) input: Option<E>,
    pub(crate) tree: VirtualTree<E>,
    pub(crate) transform: FilterTransform<E>,
    pub(crate) scheduler: UpdateScheduler<E>,
    pub(crate) state: StateTracker<E>,
    proxies: AHashMap<TreePath<E>, Box<dyn ModelProxy<E>>>,
    pub(crate) tasks: VecDeque<Task<E>>,
    pub(crate) sender: Sender<Completion<E>>,
    receiver: Receiver<Completion<E>>,
    update_listeners: Vec<Arc<dyn UpdateListener<E>>>,
    state_listeners: Vec<Arc<dyn StateListener<E>>>,
    model_listeners: Vec<Arc<dyn ModelChangedListener<E>>>,
    disposed: bool,
}

impl<E: Element> TreeViewer<E> {
    /// Create a viewer owned by the calling thread
    ///
    /// Out-of-range settings are clamped to the nearest valid value.
    pub fn new(content: Arc<dyn ContentProvider<E>>, config: ViewerConfig) -> Self {
        if let Err(err) = config.validate() {
            warn!(error = %err, "clamping viewer config");
        }
        let config = config.clamped();
        let capacity = NonZeroUsize::new(config.state_cache_capacity).unwrap_or(NonZeroUsize::MIN);
        let (sender, receiver) = unbounded();
        Self {
            owner: thread::current().id(),
            config,
            content,
            tokens: None,
            selection_policy: None,
            proxy_factory: None,
            filters: Vec::new(),
            input: None,
            tree: VirtualTree::new(),
            transform: FilterTransform::new(),
            scheduler: UpdateScheduler::new(),
            state: StateTracker::new(StateCache::new(capacity)),
            proxies: AHashMap::new(),
            tasks: VecDeque::new(),
            sender,
            receiver,
            update_listeners: Vec::new(),
            state_listeners: Vec::new(),
            model_listeners: Vec::new(),
            disposed: false,
        }
    }

    /// Enable state save and restore through `provider`
    pub fn set_token_provider(&mut self, provider: Arc<dyn TokenProvider<E>>) {
        self.check_thread();
        self.tokens = Some(provider);
    }

    pub fn set_selection_policy(&mut self, policy: Arc<dyn SelectionPolicy<E>>) {
        self.check_thread();
        self.selection_policy = Some(policy);
    }

    pub fn set_proxy_factory(&mut self, factory: Arc<dyn ModelProxyFactory<E>>) {
        self.check_thread();
        self.proxy_factory = Some(factory);
    }

    pub(crate) fn check_thread(&self) {
        assert_eq!(
            thread::current().id(),
            self.owner,
            "TreeViewer used outside its owner thread"
        );
    }

    fn check_live(&self) -> Result<(), ViewerError> {
        self.check_thread();
        if self.disposed {
            return Err(ViewerError::Disposed);
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Input lifecycle
    // ---------------------------------------------------------------

    /// Replace the input
    ///
    /// The state of the previous input is saved, everything outstanding for
    /// it is canceled, and a restore of any state saved for the new input
    /// begins.
    pub fn set_input(&mut self, input: E) -> Result<(), ViewerError> {
        self.check_live()?;
        debug!(input = ?input, "setting input");

        if let Some(old) = self.input.clone() {
            self.save_viewer_state(&old);
        }
        self.dispose_proxies();
        self.scheduler.reset();
        self.reset_restore();
        self.transform.clear_all();
        self.tree = VirtualTree::new();

        self.input = Some(input.clone());
        self.install_proxy(&TreePath::root());
        self.schedule(UpdateKind::ChildCount, TreePath::root());
        self.restore_viewer_state(&input);
        self.pump();
        Ok(())
    }

    pub fn input(&self) -> Option<&E> {
        self.input.as_ref()
    }

    /// Cancel everything and detach from the model
    pub fn dispose(&mut self) {
        self.check_thread();
        if self.disposed {
            return;
        }
        debug!("disposing viewer");
        self.dispose_proxies();
        self.scheduler.dispose();
        self.dispose_state();
        self.tasks.clear();
        self.update_listeners.clear();
        self.state_listeners.clear();
        self.model_listeners.clear();
        self.input = None;
        self.disposed = true;
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    /// Handle for posting deltas from any thread
    pub fn handle(&self) -> ViewerHandle<E> {
        ViewerHandle {
            sender: self.sender.clone(),
        }
    }

    // ---------------------------------------------------------------
    // User operations
    // ---------------------------------------------------------------

    fn require_node(&self, path: &TreePath<E>) -> Result<(), ViewerError> {
        if self.input.is_none() {
            return Err(ViewerError::NoInput);
        }
        if !self.tree.contains(path) {
            return Err(ViewerError::PathNotMaterialized(format!("{:?}", path)));
        }
        Ok(())
    }

    /// Expand `path`, fetching its children as needed
    pub fn expand(&mut self, path: &TreePath<E>) -> Result<(), ViewerError> {
        self.check_live()?;
        self.require_node(path)?;
        self.expand_path(path);
        self.cancel_restore(path, DeltaFlags::COLLAPSE);
        self.pump();
        Ok(())
    }

    pub fn collapse(&mut self, path: &TreePath<E>) -> Result<(), ViewerError> {
        self.check_live()?;
        self.require_node(path)?;
        self.tree.set_expanded(path, false);
        self.cancel_restore(path, DeltaFlags::EXPAND);
        Ok(())
    }

    /// Replace the selection; unmaterialized paths are ignored
    pub fn set_selection(&mut self, paths: Vec<TreePath<E>>) -> Result<(), ViewerError> {
        self.check_live()?;
        if self.input.is_none() {
            return Err(ViewerError::NoInput);
        }
        self.tree.set_selection(paths);
        self.cancel_restore(&TreePath::root(), DeltaFlags::SELECT);
        Ok(())
    }

    /// Scroll `path` to the top
    pub fn reveal(&mut self, path: &TreePath<E>) -> Result<(), ViewerError> {
        self.check_live()?;
        self.require_node(path)?;
        self.tree.set_top_item(path.clone());
        self.cancel_restore(path, DeltaFlags::REVEAL);
        Ok(())
    }

    /// Refetch the whole tree, keeping expansion and selection
    pub fn refresh(&mut self) -> Result<(), ViewerError> {
        self.check_live()?;
        if self.input.is_none() {
            return Err(ViewerError::NoInput);
        }
        let root = TreePath::root();
        self.cancel_state_subtree(&root);
        self.append_to_pending_state(&root);
        self.refresh_path(&root);
        self.pump();
        Ok(())
    }

    pub fn add_filter(&mut self, filter: Arc<dyn ElementFilter<E>>) -> Result<(), ViewerError> {
        self.check_live()?;
        self.filters.push(filter);
        if self.input.is_some() {
            self.refresh()?;
        }
        Ok(())
    }

    pub fn clear_filters(&mut self) -> Result<(), ViewerError> {
        self.check_live()?;
        if self.filters.is_empty() {
            return Ok(());
        }
        self.filters.clear();
        if self.input.is_some() {
            self.refresh()?;
        }
        Ok(())
    }

    /// Apply a delta on the owner thread
    ///
    /// Other threads post through [`ViewerHandle::post_delta`] instead.
    pub fn model_changed(&mut self, delta: ModelDelta<E>) -> Result<(), ViewerError> {
        self.check_live()?;
        self.process_delta(delta);
        self.pump();
        Ok(())
    }

    // ---------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------

    pub fn tree(&self) -> &VirtualTree<E> {
        &self.tree
    }

    pub fn transform(&self) -> &FilterTransform<E> {
        &self.transform
    }

    pub fn view_to_model_index(&self, parent: &TreePath<E>, view_index: usize) -> usize {
        self.transform.view_to_model_index(parent, view_index)
    }

    pub fn model_to_view_index(&self, parent: &TreePath<E>, model_index: usize) -> Option<usize> {
        self.transform.model_to_view_index(parent, model_index)
    }

    pub fn view_to_model_count(&self, parent: &TreePath<E>, count: usize) -> usize {
        self.transform.view_to_model_count(parent, count)
    }

    pub fn model_to_view_count(&self, parent: &TreePath<E>, count: usize) -> usize {
        self.transform.model_to_view_count(parent, count)
    }

    /// Whether nothing is being fetched, encoded or compared
    pub fn is_idle(&self) -> bool {
        self.scheduler.is_idle() && self.tasks.is_empty() && self.state.is_idle()
    }

    /// Whether a restore is still replaying saved state
    pub fn is_restoring(&self) -> bool {
        self.state.pending.is_some() || self.state.pending_reveal.is_some()
    }

    /// Number of saved states held for later inputs
    pub fn saved_state_count(&self) -> usize {
        self.state.cache.len()
    }

    // ---------------------------------------------------------------
    // Listeners
    // ---------------------------------------------------------------

    pub fn add_update_listener(&mut self, listener: Arc<dyn UpdateListener<E>>) {
        self.check_thread();
        self.update_listeners.push(listener);
    }

    pub fn remove_update_listener(&mut self, listener: &Arc<dyn UpdateListener<E>>) {
        self.check_thread();
        self.update_listeners.retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub fn add_state_listener(&mut self, listener: Arc<dyn StateListener<E>>) {
        self.check_thread();
        self.state_listeners.push(listener);
    }

    pub fn remove_state_listener(&mut self, listener: &Arc<dyn StateListener<E>>) {
        self.check_thread();
        self.state_listeners.retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub fn add_model_changed_listener(&mut self, listener: Arc<dyn ModelChangedListener<E>>) {
        self.check_thread();
        self.model_listeners.push(listener);
    }

    pub fn remove_model_changed_listener(&mut self, listener: &Arc<dyn ModelChangedListener<E>>) {
        self.check_thread();
        self.model_listeners.retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub(crate) fn notify_state<F>(&self, f: F)
    where
        F: Fn(&dyn StateListener<E>),
    {
        for listener in &self.state_listeners {
            f(listener.as_ref());
        }
    }

    pub(crate) fn notify_model_changed(&self, delta: &ModelDelta<E>) {
        for listener in &self.model_listeners {
            listener.model_changed(delta);
        }
    }

    // ---------------------------------------------------------------
    // Completion queue
    // ---------------------------------------------------------------

    /// Apply every reply that has arrived so far
    ///
    /// Returns the number of replies handled.
    pub fn process_pending(&mut self) -> usize {
        self.check_thread();
        let mut handled = 0;
        self.pump();
        while let Ok(completion) = self.receiver.try_recv() {
            if self.disposed {
                continue;
            }
            self.handle_completion(completion);
            self.pump();
            handled += 1;
        }
        handled
    }

    /// Block until at least one reply arrives or `timeout` passes, then
    /// apply everything pending
    pub fn wait_for_completions(&mut self, timeout: Duration) -> usize {
        self.check_thread();
        self.pump();
        match self.receiver.recv_timeout(timeout) {
            Ok(completion) => {
                if !self.disposed {
                    self.handle_completion(completion);
                    self.pump();
                }
                1 + self.process_pending()
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => 0,
        }
    }

    /// Process replies until the viewer is idle or `timeout` passes
    ///
    /// Returns whether the viewer became idle.
    pub fn run_until_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.process_pending();
            if self.is_idle() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.wait_for_completions(deadline - now);
        }
    }

    /// Drain scheduler events and local tasks
    pub(crate) fn pump(&mut self) {
        loop {
            if let Some(event) = self.scheduler.next_event() {
                self.handle_scheduler_event(event);
                continue;
            }
            if let Some(task) = self.tasks.pop_front() {
                self.run_task(task);
                continue;
            }
            break;
        }
    }

    fn handle_scheduler_event(&mut self, event: SchedulerEvent<E>) {
        match event {
            SchedulerEvent::SequenceBegins => {
                for listener in &self.update_listeners {
                    listener.updates_begin();
                }
            }
            SchedulerEvent::Started(update) => {
                for listener in &self.update_listeners {
                    listener.update_started(&update);
                }
                if update.is_canceled() {
                    return;
                }
                let Some(input) = self.input.clone() else {
                    return;
                };
                let request = ContentRequest::new(
                    update.id(),
                    update.kind(),
                    input,
                    update.element_path().clone(),
                    update.cancel_flag(),
                    self.sender.clone(),
                );
                self.content.update(request);
            }
            SchedulerEvent::Completed { update, .. } => {
                for listener in &self.update_listeners {
                    listener.update_complete(&update);
                }
            }
            SchedulerEvent::SequenceComplete => {
                for listener in &self.update_listeners {
                    listener.updates_complete();
                }
                self.reveal_idle_cycle();
            }
        }
    }

    fn run_task(&mut self, task: Task<E>) {
        match task {
            Task::BeginRestore { input, key } => self.begin_restore(input, key),
            Task::RevealIdleCheck => self.reveal_idle_cycle(),
        }
    }

    fn handle_completion(&mut self, completion: Completion<E>) {
        match completion {
            Completion::Content { id, result } => {
                let Some(update) = self.scheduler.in_progress(id).cloned() else {
                    trace!(id = %id, "ignoring reply for canceled update");
                    return;
                };
                if update.is_canceled() {
                    return;
                }
                let path = update.element_path().clone();
                match (update.kind(), result) {
                    (_, Err(err)) => {
                        warn!(path = ?path, kind = %update.kind(), error = %err, "content update failed");
                    }
                    (UpdateKind::ChildCount, Ok(ContentReply::ChildCount(count))) => {
                        self.on_child_count(&path, count);
                    }
                    (UpdateKind::HasChildren, Ok(ContentReply::HasChildren(has_children))) => {
                        self.on_has_children(&path, has_children);
                    }
                    (UpdateKind::Children { offset, .. }, Ok(ContentReply::Children(children))) => {
                        self.on_children(&path, offset, children);
                    }
                    (kind, Ok(_)) => {
                        warn!(path = ?path, kind = %kind, "reply does not match request");
                    }
                }
                self.scheduler.complete(id);
                if matches!(update.kind(), UpdateKind::Children { .. }) {
                    // the finished fetch no longer counts as outstanding
                    self.restore_on_update(&path, None, false, false, true);
                }
            }
            Completion::Encode { target, result } => self.on_encode(target, result),
            Completion::Compare { id, result } => self.on_compare(id, result),
            Completion::Delta(delta) => self.process_delta(delta),
        }
    }

    // ---------------------------------------------------------------
    // Content updates
    // ---------------------------------------------------------------

    /// Schedule a fetch unless an equivalent one is outstanding
    pub(crate) fn schedule(&mut self, kind: UpdateKind, path: TreePath<E>) {
        if self.scheduler.is_pending(&kind, &path) {
            return;
        }
        self.scheduler.schedule(kind, path);
    }

    /// Fetch the model child at `model_index` of `parent`
    pub(crate) fn update_element(&mut self, parent: &TreePath<E>, model_index: usize) {
        let kind = UpdateKind::Children {
            offset: model_index,
            length: 1,
        };
        self.schedule(kind, parent.clone());
    }

    /// Fetch the unrealized children of `path`, up to the prefetch limit
    pub(crate) fn fetch_children(&mut self, path: &TreePath<E>) {
        let Some(count) = self.tree.child_count(path) else {
            self.schedule(UpdateKind::ChildCount, path.clone());
            return;
        };
        let limit = count.min(self.config.prefetch_limit);
        for view_index in 0..limit {
            if self.tree.child(path, view_index).is_some() {
                continue;
            }
            let offset = self.transform.view_to_model_index(path, view_index);
            let single = UpdateKind::Children { offset, length: 1 };
            if self.scheduler.is_pending(&single, path) {
                continue;
            }
            self.scheduler.schedule(
                UpdateKind::Children {
                    offset,
                    length: self.config.children_batch_size,
                },
                path.clone(),
            );
        }
    }

    /// Expand `path` and its ancestors, fetching what the expansion shows
    pub(crate) fn expand_path(&mut self, path: &TreePath<E>) -> bool {
        if !self.tree.contains(path) || self.tree.has_children(path) == Some(false) {
            return false;
        }
        for len in 1..path.len() {
            self.tree.set_expanded(&path.truncated(len), true);
        }
        self.tree.set_expanded(path, true);
        self.fetch_children(path);
        true
    }

    /// Apply an authoritative model child count for `path`
    pub(crate) fn apply_model_child_count(&mut self, path: &TreePath<E>, count: usize) {
        if !self.tree.contains(path) {
            return;
        }
        self.transform.set_model_child_count(path, count);
        let view_count = self.transform.model_to_view_count(path, count);
        self.tree.set_child_count(path, view_count);
        if self.tree.is_expanded(path) {
            self.fetch_children(path);
        }
    }

    fn on_child_count(&mut self, path: &TreePath<E>, count: usize) {
        trace!(path = ?path, count, "child count");
        self.apply_model_child_count(path, count);
        self.restore_on_update(path, None, true, true, false);
    }

    fn on_has_children(&mut self, path: &TreePath<E>, has_children: bool) {
        if !self.tree.contains(path) {
            return;
        }
        trace!(path = ?path, has_children, "has children");
        self.tree.set_has_children(path, has_children);
        if !has_children {
            self.transform.set_model_child_count(path, 0);
        } else if self.tree.is_expanded(path) && self.tree.child_count(path).is_none() {
            self.schedule(UpdateKind::ChildCount, path.clone());
        }
        self.restore_on_update(path, None, true, false, false);
    }

    fn on_children(&mut self, parent: &TreePath<E>, offset: usize, children: Vec<E>) {
        let Some(view_count) = self.tree.child_count(parent) else {
            return;
        };
        let model_count = self.transform.view_to_model_count(parent, view_count);
        for (i, element) in children.into_iter().enumerate() {
            let model_index = offset + i;
            if model_index >= model_count {
                break;
            }
            self.apply_child(parent, model_index, element);
        }
    }

    /// Place a fetched child, re-evaluating the filters for it
    pub(crate) fn apply_child(&mut self, parent: &TreePath<E>, model_index: usize, element: E) {
        if self.should_filter(parent, &element) {
            if self.transform.is_filtered(parent, model_index) {
                // keep the recorded element current
                self.transform.clear_filtered_index(parent, model_index);
                self.transform.add_filtered_index(parent, model_index, element);
                return;
            }
            let view_index = self.transform.model_to_view_index(parent, model_index);
            self.transform.add_filtered_index(parent, model_index, element.clone());
            if let Some(view_index) = view_index {
                self.drop_view_slot(parent, view_index);
            }
            trace!(parent = ?parent, element = ?element, "filtered");
            return;
        }

        if self.transform.is_filtered(parent, model_index) {
            self.transform.clear_filtered_index(parent, model_index);
            let Some(view_index) = self.transform.model_to_view_index(parent, model_index) else {
                return;
            };
            self.tree.insert(parent, view_index, element.clone());
        } else {
            let Some(view_index) = self.transform.model_to_view_index(parent, model_index) else {
                return;
            };
            if self.tree.child(parent, view_index) != Some(&element) {
                if let Some(old) = self.tree.child(parent, view_index).cloned() {
                    self.cancel_path(&parent.child(old));
                }
                if !self.tree.replace(parent, view_index, element.clone()) {
                    return;
                }
            }
        }
        self.materialized(parent, model_index, element);
    }

    /// Follow-up for a child that just became visible in the view
    pub(crate) fn materialized(&mut self, parent: &TreePath<E>, model_index: usize, element: E) {
        let path = parent.child(element);
        if self.config.auto_expands(path.len()) {
            self.tree.set_expanded(&path, true);
        }
        if self.tree.is_expanded(&path) {
            if self.tree.child_count(&path).is_none() {
                self.schedule(UpdateKind::ChildCount, path.clone());
            }
        } else if self.tree.has_children(&path).is_none() {
            self.schedule(UpdateKind::HasChildren, path.clone());
        }
        self.restore_on_update(&path, Some(model_index), false, false, false);
    }

    /// Remove view slot `view_index` of `parent`, canceling work below it
    pub(crate) fn drop_view_slot(&mut self, parent: &TreePath<E>, view_index: usize) {
        if let Some(old) = self.tree.child(parent, view_index).cloned() {
            self.cancel_path(&parent.child(old));
        }
        self.tree.remove(parent, view_index);
    }

    /// Cancel fetches and comparisons for a path leaving the view
    pub(crate) fn cancel_path(&mut self, path: &TreePath<E>) {
        self.scheduler.cancel_subtree(path);
        self.cancel_state_subtree(path);
        self.transform.clear_subtree(path);
    }

    /// Drop and refetch everything below `path`
    pub(crate) fn refresh_path(&mut self, path: &TreePath<E>) {
        if !self.tree.contains(path) {
            return;
        }
        debug!(path = ?path, "refreshing");
        self.scheduler.cancel_subtree(path);
        self.transform.clear_subtree(path);
        self.tree.reset_children(path);
        if path.is_empty() || self.tree.is_expanded(path) {
            self.schedule(UpdateKind::ChildCount, path.clone());
        } else {
            self.schedule(UpdateKind::HasChildren, path.clone());
        }
    }

    pub(crate) fn should_filter(&self, parent: &TreePath<E>, element: &E) -> bool {
        self.filters.iter().any(|filter| !filter.select(parent, element))
    }

    /// Whether a model-driven selection may replace the current one
    pub(crate) fn override_selection(&self, candidate: &[TreePath<E>]) -> bool {
        let current = self.tree.selection();
        if current.is_empty() {
            return true;
        }
        match &self.selection_policy {
            Some(policy) => policy.overrides(current, candidate),
            None => true,
        }
    }

    // ---------------------------------------------------------------
    // Model proxies
    // ---------------------------------------------------------------

    pub(crate) fn install_proxy(&mut self, path: &TreePath<E>) {
        let (Some(factory), Some(input)) = (self.proxy_factory.clone(), self.input.clone()) else {
            return;
        };
        self.dispose_proxy(path);
        if let Some(mut proxy) = factory.create(&input, path) {
            debug!(path = ?path, "installing model proxy");
            proxy.installed(self.handle());
            self.proxies.insert(path.clone(), proxy);
        }
    }

    pub(crate) fn dispose_proxy(&mut self, path: &TreePath<E>) {
        if let Some(mut proxy) = self.proxies.remove(path) {
            debug!(path = ?path, "disposing model proxy");
            proxy.dispose();
        }
    }

    fn dispose_proxies(&mut self) {
        for (_, mut proxy) in self.proxies.drain() {
            proxy.dispose();
        }
    }

    /// Paths with an installed model proxy
    pub fn proxy_paths(&self) -> Vec<TreePath<E>> {
        self.proxies.keys().cloned().collect()
    }
}

impl<E: Element> Drop for TreeViewer<E> {
    fn drop(&mut self) {
        self.dispose_proxies();
    }
}
