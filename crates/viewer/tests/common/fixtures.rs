//! Scripted providers answering from an in-memory model

#![allow(dead_code)]

use canopy_core::{Token, TreePath};
use parking_lot::{Mutex, RwLock};
use scheduler::UpdateKind;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use viewer::{
    CompareRequest, ContentProvider, ContentReply, ContentRequest, EncodeRequest, ProviderError,
    StateListener, TokenProvider, TreeViewer,
};

pub type Path = TreePath<&'static str>;

pub fn path(segments: &[&'static str]) -> Path {
    TreePath::from_segments(segments.iter().copied())
}

/// Run the viewer until nothing is outstanding
pub fn settle(viewer: &mut TreeViewer<&'static str>) {
    assert!(
        viewer.run_until_idle(Duration::from_secs(5)),
        "viewer did not settle"
    );
}

/// Element names are unique across the model, so children are keyed by name
#[derive(Debug, Default, Clone)]
pub struct Model {
    children: HashMap<&'static str, Vec<&'static str>>,
}

impl Model {
    pub fn new(entries: &[(&'static str, &[&'static str])]) -> Self {
        let children = entries
            .iter()
            .map(|(parent, children)| (*parent, children.to_vec()))
            .collect();
        Self { children }
    }

    /// root: a b c, a: a1 a2, c: c1; plus a second input `other`: x y
    pub fn sample() -> Self {
        Self::new(&[
            ("root", &["a", "b", "c"]),
            ("a", &["a1", "a2"]),
            ("c", &["c1"]),
            ("other", &["x", "y"]),
        ])
    }

    pub fn children(&self, element: &str) -> Vec<&'static str> {
        self.children.get(element).cloned().unwrap_or_default()
    }

    pub fn set_children(&mut self, element: &'static str, children: Vec<&'static str>) {
        self.children.insert(element, children);
    }
}

type FailWhen = Box<dyn Fn(UpdateKind, &Path) -> bool + Send + Sync>;

/// Content provider answering immediately or when told to
pub struct TestContent {
    model: RwLock<Model>,
    deferred: AtomicBool,
    fail_when: Mutex<Option<FailWhen>>,
    queue: Mutex<Vec<ContentRequest<&'static str>>>,
    log: Mutex<Vec<(UpdateKind, Path)>>,
}

impl TestContent {
    pub fn new(model: Model) -> Arc<Self> {
        Arc::new(Self {
            model: RwLock::new(model),
            deferred: AtomicBool::new(false),
            fail_when: Mutex::new(None),
            queue: Mutex::new(Vec::new()),
            log: Mutex::new(Vec::new()),
        })
    }

    pub fn deferred(model: Model) -> Arc<Self> {
        let content = Self::new(model);
        content.set_deferred(true);
        content
    }

    pub fn set_deferred(&self, deferred: bool) {
        self.deferred.store(deferred, Ordering::SeqCst);
    }

    /// Answer matching requests with an error from now on
    pub fn fail_when<F>(&self, pred: F)
    where
        F: Fn(UpdateKind, &Path) -> bool + Send + Sync + 'static,
    {
        *self.fail_when.lock() = Some(Box::new(pred));
    }

    pub fn edit(&self, f: impl FnOnce(&mut Model)) {
        f(&mut self.model.write());
    }

    /// Every request received so far
    pub fn log(&self) -> Vec<(UpdateKind, Path)> {
        self.log.lock().clone()
    }

    pub fn clear_log(&self) {
        self.log.lock().clear();
    }

    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    /// Remove queued requests without answering them
    pub fn take_requests(&self) -> Vec<ContentRequest<&'static str>> {
        std::mem::take(&mut *self.queue.lock())
    }

    pub fn answer(&self, request: ContentRequest<&'static str>) {
        let failing = self
            .fail_when
            .lock()
            .as_ref()
            .map(|pred| pred(request.kind(), request.element_path()))
            .unwrap_or(false);
        if failing {
            request.done(Err(ProviderError::Failed("scripted failure".to_string())));
            return;
        }
        let children = self.model.read().children(request.element());
        let reply = match request.kind() {
            UpdateKind::HasChildren => ContentReply::HasChildren(!children.is_empty()),
            UpdateKind::ChildCount => ContentReply::ChildCount(children.len()),
            UpdateKind::Children { offset, length } => ContentReply::Children(
                children.iter().skip(offset).take(length).copied().collect(),
            ),
        };
        request.done(Ok(reply));
    }

    /// Answer queued requests matching `pred`; returns how many
    pub fn answer_where<F>(&self, pred: F) -> usize
    where
        F: Fn(&ContentRequest<&'static str>) -> bool,
    {
        let (matching, rest): (Vec<_>, Vec<_>) = self.take_requests().into_iter().partition(|r| pred(r));
        self.queue.lock().extend(rest);
        let answered = matching.len();
        for request in matching {
            self.answer(request);
        }
        answered
    }

    /// Answer matching requests, and those they cause, until none is left
    pub fn answer_until_quiet<F>(&self, viewer: &mut TreeViewer<&'static str>, pred: F)
    where
        F: Fn(&ContentRequest<&'static str>) -> bool,
    {
        for _ in 0..1000 {
            viewer.process_pending();
            if self.answer_where(&pred) == 0 {
                viewer.process_pending();
                return;
            }
        }
        panic!("requests kept coming");
    }
}

impl ContentProvider<&'static str> for TestContent {
    fn update(&self, request: ContentRequest<&'static str>) {
        self.log
            .lock()
            .push((request.kind(), request.element_path().clone()));
        if self.deferred.load(Ordering::SeqCst) {
            self.queue.lock().push(request);
        } else {
            self.answer(request);
        }
    }
}

/// Tokens are element names
#[derive(Default)]
pub struct TestTokens {
    encodes: Mutex<usize>,
    compares: Mutex<usize>,
    failing_encodes: Mutex<Vec<&'static str>>,
    failing_compares: AtomicBool,
}

impl TestTokens {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn encodes(&self) -> usize {
        *self.encodes.lock()
    }

    pub fn compares(&self) -> usize {
        *self.compares.lock()
    }

    /// Fail every encode of `element`
    pub fn fail_encoding_of(&self, element: &'static str) {
        self.failing_encodes.lock().push(element);
    }

    pub fn set_failing_compares(&self, failing: bool) {
        self.failing_compares.store(failing, Ordering::SeqCst);
    }
}

impl TokenProvider<&'static str> for TestTokens {
    fn encode(&self, request: EncodeRequest<&'static str>) {
        *self.encodes.lock() += 1;
        if self.failing_encodes.lock().contains(request.element()) {
            request.done(Err(ProviderError::Failed("cannot encode".to_string())));
            return;
        }
        let token = Token::from(*request.element());
        request.done(Ok(token));
    }

    fn compare(&self, request: CompareRequest<&'static str>) {
        *self.compares.lock() += 1;
        if self.failing_compares.load(Ordering::SeqCst) {
            request.done(Err(ProviderError::Unavailable));
            return;
        }
        let equal = request.token().as_bytes() == request.element().as_bytes();
        request.done(Ok(equal));
    }
}

/// Records save and restore notifications as `kind:input`
#[derive(Default)]
pub struct StateEvents {
    events: Mutex<Vec<String>>,
}

impl StateEvents {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn contains(&self, event: &str) -> bool {
        self.events.lock().iter().any(|e| e == event)
    }

    fn push(&self, kind: &str, input: &str) {
        self.events.lock().push(format!("{}:{}", kind, input));
    }
}

impl StateListener<&'static str> for StateEvents {
    fn save_begins(&self, input: &&'static str) {
        self.push("save_begins", input);
    }

    fn save_complete(&self, input: &&'static str) {
        self.push("save_complete", input);
    }

    fn restore_begins(&self, input: &&'static str) {
        self.push("restore_begins", input);
    }

    fn restore_complete(&self, input: &&'static str) {
        self.push("restore_complete", input);
    }
}
