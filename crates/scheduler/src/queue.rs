//! Per-path update scheduling
//!
//! Each scheduling path is in one of three states: no request, requests in
//! progress, or requests waiting. A request waits while any request is in
//! progress at a strict ancestor or strict descendant of its scheduling path,
//! so a parent's child count is always resolved before its children are
//! fetched. Requests at the same path may run side by side.
//!
//! The scheduler performs no I/O. Every state transition is appended to an
//! outbox of [`SchedulerEvent`]s which the owner drains and acts upon.

use crate::update::{PendingUpdate, UpdateId, UpdateKind};
use ahash::AHashMap;
use canopy_core::TreePath;
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::fmt::Debug;
use std::hash::Hash;
use tracing::{debug, trace};

/// Transition reported by the scheduler
#[derive(Debug, Clone)]
pub enum SchedulerEvent<E> {
    /// First update started on an idle scheduler
    SequenceBegins,
    /// Update handed to the provider
    Started(PendingUpdate<E>),
    /// Update finished, normally or canceled
    Completed {
        update: PendingUpdate<E>,
        canceled: bool,
    },
    /// Last outstanding update finished
    SequenceComplete,
}

/// Scheduling state of one path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathState {
    NoRequest,
    /// Number of requests running at the path
    InProgress(usize),
    /// Number of requests queued at the path
    Waiting(usize),
}

/// Orders, coalesces and tracks fetch requests
pub struct UpdateScheduler<E> {
    in_progress: AHashMap<TreePath<E>, Vec<PendingUpdate<E>>>,
    waiting: AHashMap<TreePath<E>, Vec<PendingUpdate<E>>>,
    events: VecDeque<SchedulerEvent<E>>,
    next_id: u64,
    next_arrival: u64,
    sequence_open: bool,
    disposed: bool,
}

impl<E> Default for UpdateScheduler<E>
where
    E: Clone + Eq + Hash + Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E> UpdateScheduler<E>
where
    E: Clone + Eq + Hash + Debug,
{
    pub fn new() -> Self {
        Self {
            in_progress: AHashMap::new(),
            waiting: AHashMap::new(),
            events: VecDeque::new(),
            next_id: 0,
            next_arrival: 0,
            sequence_open: false,
            disposed: false,
        }
    }

    /// Schedule a fetch of `kind` for the element at `element_path`
    ///
    /// Returns the id of the request now covering the fetch: a new request,
    /// or the waiting request it was coalesced into. Returns `None` once the
    /// scheduler is disposed.
    pub fn schedule(&mut self, kind: UpdateKind, element_path: TreePath<E>) -> Option<UpdateId> {
        if self.disposed {
            return None;
        }
        let id = self.enqueue(kind, element_path);
        self.finish_if_idle();
        Some(id)
    }

    fn enqueue(&mut self, kind: UpdateKind, element_path: TreePath<E>) -> UpdateId {
        let update = self.make_update(kind, element_path);
        let path = update.scheduling_path.clone();

        // A waiting list at this path means the path is still blocked
        if let Some(queue) = self.waiting.get_mut(&path) {
            for waiting in queue.iter_mut() {
                if waiting.coalesce(&kind, &update.element_path) {
                    trace!(id = %waiting.id, kind = %waiting.kind, "coalesced update");
                    return waiting.id;
                }
            }
        }

        // An identical request already running is stale by now
        let stale: SmallVec<[UpdateId; 2]> = self
            .in_progress
            .get(&path)
            .map(|running| {
                running
                    .iter()
                    .filter(|u| u.is_same_request(&kind, &update.element_path))
                    .map(|u| u.id)
                    .collect()
            })
            .unwrap_or_default();
        for stale_id in stale {
            trace!(id = %stale_id, "superseding stale update");
            self.remove_in_progress(stale_id, true);
        }

        let id = update.id;
        if self.waiting.contains_key(&path) || self.is_blocked(&path) {
            trace!(id = %id, kind = %kind, path = ?path, "update waiting");
            self.waiting.entry(path).or_default().push(update);
        } else {
            self.start(update);
        }
        id
    }

    fn make_update(&mut self, kind: UpdateKind, element_path: TreePath<E>) -> PendingUpdate<E> {
        self.next_id += 1;
        self.next_arrival += 1;
        PendingUpdate::new(UpdateId(self.next_id), kind, element_path, self.next_arrival)
    }

    fn start(&mut self, update: PendingUpdate<E>) {
        if !self.sequence_open {
            debug!("update sequence begins");
            self.sequence_open = true;
            self.events.push_back(SchedulerEvent::SequenceBegins);
        }
        trace!(id = %update.id, kind = %update.kind, path = ?update.element_path, "update started");
        self.events.push_back(SchedulerEvent::Started(update.clone()));
        self.in_progress
            .entry(update.scheduling_path.clone())
            .or_default()
            .push(update);
    }

    /// Whether a request at `path` must wait
    fn is_blocked(&self, path: &TreePath<E>) -> bool {
        self.in_progress
            .keys()
            .any(|running| running.is_ancestor_of(path) || path.is_ancestor_of(running))
    }

    fn find_in_progress(&self, id: UpdateId) -> Option<(TreePath<E>, usize)> {
        self.in_progress.iter().find_map(|(path, updates)| {
            updates
                .iter()
                .position(|u| u.id == id)
                .map(|pos| (path.clone(), pos))
        })
    }

    fn find_waiting(&self, id: UpdateId) -> Option<(TreePath<E>, usize)> {
        self.waiting.iter().find_map(|(path, updates)| {
            updates
                .iter()
                .position(|u| u.id == id)
                .map(|pos| (path.clone(), pos))
        })
    }

    fn remove_in_progress(&mut self, id: UpdateId, canceled: bool) -> Option<PendingUpdate<E>> {
        let (path, pos) = self.find_in_progress(id)?;
        let updates = self.in_progress.get_mut(&path)?;
        let update = updates.remove(pos);
        if updates.is_empty() {
            self.in_progress.remove(&path);
        }
        if canceled {
            update.mark_canceled();
            debug!(id = %update.id, kind = %update.kind, "update canceled");
        }
        self.events.push_back(SchedulerEvent::Completed {
            update: update.clone(),
            canceled,
        });
        Some(update)
    }

    fn remove_waiting(&mut self, id: UpdateId) -> Option<PendingUpdate<E>> {
        let (path, pos) = self.find_waiting(id)?;
        let updates = self.waiting.get_mut(&path)?;
        let update = updates.remove(pos);
        if updates.is_empty() {
            self.waiting.remove(&path);
        }
        update.mark_canceled();
        trace!(id = %update.id, "waiting update dropped");
        Some(update)
    }

    /// Mark the update `id` as finished
    ///
    /// Returns the update if its reply should be applied. Unknown and
    /// canceled updates yield `None`, so late replies are ignored.
    pub fn complete(&mut self, id: UpdateId) -> Option<PendingUpdate<E>> {
        let update = self.remove_in_progress(id, false)?;
        trace!(id = %id, "update complete");
        self.trigger();
        self.finish_if_idle();
        if update.is_canceled() {
            return None;
        }
        Some(update)
    }

    /// Start every waiting queue that is no longer blocked
    ///
    /// Shallower paths go first so a parent always starts ahead of its
    /// descendants, which then stay blocked until the parent finishes.
    fn trigger(&mut self) {
        if self.waiting.is_empty() {
            return;
        }
        let mut candidates: Vec<(usize, u8, u64, TreePath<E>)> = self
            .waiting
            .iter()
            .map(|(path, queue)| {
                let priority = queue.iter().map(|u| u.priority()).min().unwrap_or(u8::MAX);
                let arrival = queue.iter().map(|u| u.arrival).min().unwrap_or(u64::MAX);
                (path.len(), priority, arrival, path.clone())
            })
            .collect();
        candidates.sort_by(|a, b| (a.0, a.1, a.2).cmp(&(b.0, b.1, b.2)));

        for (_, _, _, path) in candidates {
            if self.is_blocked(&path) {
                continue;
            }
            let Some(mut queue) = self.waiting.remove(&path) else {
                continue;
            };
            queue.sort_by_key(|u| (u.priority(), u.arrival));
            for update in queue {
                self.start(update);
            }
        }
    }

    fn finish_if_idle(&mut self) {
        if self.sequence_open && self.in_progress.is_empty() && self.waiting.is_empty() {
            debug!("update sequence complete");
            self.sequence_open = false;
            self.events.push_back(SchedulerEvent::SequenceComplete);
        }
    }

    /// Cancel one update, running or waiting
    pub fn cancel(&mut self, id: UpdateId) -> bool {
        let found = if self.remove_in_progress(id, true).is_some() {
            true
        } else {
            self.remove_waiting(id).is_some()
        };
        if found {
            self.trigger();
            self.finish_if_idle();
        }
        found
    }

    /// Cancel every update whose element lies at or below `path`
    pub fn cancel_subtree(&mut self, path: &TreePath<E>) -> usize {
        let running: Vec<UpdateId> = self
            .in_progress
            .values()
            .flatten()
            .filter(|u| u.is_contained(path))
            .map(|u| u.id)
            .collect();
        let queued: Vec<UpdateId> = self
            .waiting
            .values()
            .flatten()
            .filter(|u| u.is_contained(path))
            .map(|u| u.id)
            .collect();
        let count = running.len() + queued.len();
        if count > 0 {
            debug!(path = ?path, count, "canceling subtree updates");
        }
        for id in running {
            self.remove_in_progress(id, true);
        }
        for id in queued {
            self.remove_waiting(id);
        }
        if count > 0 {
            self.trigger();
            self.finish_if_idle();
        }
        count
    }

    /// Repair children fetches of `parent` after a removal at `removed_index`
    ///
    /// Running fetches starting past the removed slot are canceled and
    /// scheduled again one slot lower; waiting ones are shifted in place.
    pub fn reschedule_after_removal(&mut self, parent: &TreePath<E>, removed_index: usize) {
        if self.disposed {
            return;
        }
        let shifted: Vec<(UpdateId, usize, usize)> = self
            .in_progress
            .get(parent)
            .map(|running| {
                running
                    .iter()
                    .filter_map(|u| match u.kind {
                        UpdateKind::Children { offset, length }
                            if offset > removed_index && u.element_path == *parent =>
                        {
                            Some((u.id, offset, length))
                        }
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        if let Some(queue) = self.waiting.get_mut(parent) {
            for update in queue.iter_mut() {
                if let UpdateKind::Children { offset, .. } = &mut update.kind {
                    if *offset > removed_index {
                        *offset -= 1;
                    }
                }
            }
        }

        for (id, offset, length) in shifted {
            trace!(id = %id, offset, "rescheduling shifted children update");
            self.remove_in_progress(id, true);
            self.enqueue(
                UpdateKind::Children {
                    offset: offset - 1,
                    length,
                },
                parent.clone(),
            );
        }
        self.trigger();
        self.finish_if_idle();
    }

    /// Cancel everything and refuse further requests
    pub fn dispose(&mut self) {
        self.reset();
        self.disposed = true;
    }

    /// Cancel everything outstanding
    pub fn reset(&mut self) {
        let running: Vec<UpdateId> = self.in_progress.values().flatten().map(|u| u.id).collect();
        for id in running {
            self.remove_in_progress(id, true);
        }
        for update in self.waiting.drain().flat_map(|(_, queue)| queue) {
            update.mark_canceled();
        }
        self.finish_if_idle();
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Scheduling state of `path`
    pub fn path_state(&self, path: &TreePath<E>) -> PathState {
        if let Some(running) = self.in_progress.get(path) {
            return PathState::InProgress(running.len());
        }
        match self.waiting.get(path) {
            Some(queue) => PathState::Waiting(queue.len()),
            None => PathState::NoRequest,
        }
    }

    fn all_updates(&self) -> impl Iterator<Item = &PendingUpdate<E>> {
        self.in_progress.values().chain(self.waiting.values()).flatten()
    }

    /// Whether anything about the element at `path` is still being fetched
    ///
    /// Covers updates on the element itself and children fetches of its
    /// parent, which may still replace the element.
    pub fn has_updates_for(&self, path: &TreePath<E>) -> bool {
        let parent = path.parent();
        self.all_updates().any(|u| {
            u.element_path == *path
                || (matches!(u.kind, UpdateKind::Children { .. })
                    && parent.as_ref() == Some(&u.element_path))
        })
    }

    /// Whether children of `path` are still being fetched
    pub fn has_children_updates(&self, path: &TreePath<E>) -> bool {
        self.all_updates()
            .any(|u| matches!(u.kind, UpdateKind::Children { .. }) && u.element_path == *path)
    }

    /// Whether an update of `kind` for `element_path` is outstanding
    pub fn is_pending(&self, kind: &UpdateKind, element_path: &TreePath<E>) -> bool {
        self.all_updates().any(|u| match (&u.kind, kind) {
            (
                UpdateKind::Children { offset, length },
                UpdateKind::Children {
                    offset: wanted,
                    length: wanted_length,
                },
            ) => {
                u.element_path == *element_path
                    && *offset <= *wanted
                    && wanted + wanted_length <= offset + length
            }
            _ => u.is_same_request(kind, element_path),
        })
    }

    /// Running update with the given id
    pub fn in_progress(&self, id: UpdateId) -> Option<&PendingUpdate<E>> {
        self.in_progress.values().flatten().find(|u| u.id == id)
    }

    /// Number of running updates
    pub fn in_progress_count(&self) -> usize {
        self.in_progress.values().map(Vec::len).sum()
    }

    /// Number of waiting updates
    pub fn waiting_count(&self) -> usize {
        self.waiting.values().map(Vec::len).sum()
    }

    /// Whether nothing is running or waiting
    pub fn is_idle(&self) -> bool {
        self.in_progress.is_empty() && self.waiting.is_empty()
    }

    /// Take all pending events, oldest first
    pub fn drain_events(&mut self) -> Vec<SchedulerEvent<E>> {
        self.events.drain(..).collect()
    }

    /// Take the oldest pending event
    pub fn next_event(&mut self) -> Option<SchedulerEvent<E>> {
        self.events.pop_front()
    }

    /// Paths with running requests
    pub fn in_progress_paths(&self) -> impl Iterator<Item = &TreePath<E>> {
        self.in_progress.keys()
    }
}
