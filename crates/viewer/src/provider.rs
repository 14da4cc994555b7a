//! External collaborators and the request objects handed to them
//!
//! Providers may answer on any thread, synchronously or later. Every reply
//! travels back through the viewer's completion queue and is applied on the
//! owner thread by [`TreeViewer::process_pending`](crate::TreeViewer::process_pending).
//! Requests carry a shared cancel flag; a provider may skip work for a
//! canceled request, and the engine ignores replies to canceled requests.

use crate::error::ProviderError;
use canopy_core::{Element, ModelDelta, Token, TreePath};
use crossbeam_channel::Sender;
use scheduler::{UpdateId, UpdateKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Answer to a content request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentReply<E> {
    HasChildren(bool),
    ChildCount(usize),
    /// Children starting at the requested offset; may be shorter than asked
    Children(Vec<E>),
}

/// Identifies an encode request within the state tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum EncodeTarget {
    /// Key lookup for a restore of the current input
    RestoreKey(u64),
    /// One node of a state save
    SaveNode(u64, u64),
}

/// Messages delivered to the owner thread
pub(crate) enum Completion<E> {
    Content {
        id: UpdateId,
        result: Result<ContentReply<E>, ProviderError>,
    },
    Encode {
        target: EncodeTarget,
        result: Result<Token, ProviderError>,
    },
    Compare {
        id: u64,
        result: Result<bool, ProviderError>,
    },
    Delta(ModelDelta<E>),
}

/// Cancel flag plus the route back to the owner thread
struct Reply<E> {
    canceled: Arc<AtomicBool>,
    sender: Sender<Completion<E>>,
}

impl<E> Reply<E> {
    fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    fn send(&self, completion: Completion<E>) {
        // The viewer may be gone already
        if self.sender.send(completion).is_err() {
            trace!("reply dropped, viewer disposed");
        }
    }
}

/// Fetch of child count, has-children or a range of children
pub struct ContentRequest<E> {
    id: UpdateId,
    kind: UpdateKind,
    input: E,
    element_path: TreePath<E>,
    reply: Reply<E>,
}

impl<E: Element> ContentRequest<E> {
    pub(crate) fn new(
        id: UpdateId,
        kind: UpdateKind,
        input: E,
        element_path: TreePath<E>,
        canceled: Arc<AtomicBool>,
        sender: Sender<Completion<E>>,
    ) -> Self {
        Self {
            id,
            kind,
            input,
            element_path,
            reply: Reply { canceled, sender },
        }
    }

    pub fn id(&self) -> UpdateId {
        self.id
    }

    pub fn kind(&self) -> UpdateKind {
        self.kind
    }

    /// The viewer input the request was issued for
    pub fn input(&self) -> &E {
        &self.input
    }

    /// Path of the element being asked about
    pub fn element_path(&self) -> &TreePath<E> {
        &self.element_path
    }

    /// The element being asked about; the input for the root path
    pub fn element(&self) -> &E {
        self.element_path.last().unwrap_or(&self.input)
    }

    pub fn is_canceled(&self) -> bool {
        self.reply.is_canceled()
    }

    /// Complete the request
    pub fn done(self, result: Result<ContentReply<E>, ProviderError>) {
        self.reply.send(Completion::Content {
            id: self.id,
            result,
        });
    }
}

/// Request to serialize an element into a token
pub struct EncodeRequest<E> {
    target: EncodeTarget,
    element: E,
    element_path: TreePath<E>,
    reply: Reply<E>,
}

impl<E: Element> EncodeRequest<E> {
    pub(crate) fn new(
        target: EncodeTarget,
        element: E,
        element_path: TreePath<E>,
        canceled: Arc<AtomicBool>,
        sender: Sender<Completion<E>>,
    ) -> Self {
        Self {
            target,
            element,
            element_path,
            reply: Reply { canceled, sender },
        }
    }

    pub fn element(&self) -> &E {
        &self.element
    }

    pub fn element_path(&self) -> &TreePath<E> {
        &self.element_path
    }

    pub fn is_canceled(&self) -> bool {
        self.reply.is_canceled()
    }

    pub fn done(self, result: Result<Token, ProviderError>) {
        self.reply.send(Completion::Encode {
            target: self.target,
            result,
        });
    }
}

/// Request to decide whether a token denotes an element
pub struct CompareRequest<E> {
    id: u64,
    element: E,
    element_path: TreePath<E>,
    token: Token,
    reply: Reply<E>,
}

impl<E: Element> CompareRequest<E> {
    pub(crate) fn new(
        id: u64,
        element: E,
        element_path: TreePath<E>,
        token: Token,
        canceled: Arc<AtomicBool>,
        sender: Sender<Completion<E>>,
    ) -> Self {
        Self {
            id,
            element,
            element_path,
            token,
            reply: Reply { canceled, sender },
        }
    }

    pub fn element(&self) -> &E {
        &self.element
    }

    pub fn element_path(&self) -> &TreePath<E> {
        &self.element_path
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    pub fn is_canceled(&self) -> bool {
        self.reply.is_canceled()
    }

    pub fn done(self, result: Result<bool, ProviderError>) {
        self.reply.send(Completion::Compare {
            id: self.id,
            result,
        });
    }
}

/// Asynchronous source of tree content
pub trait ContentProvider<E>: Send + Sync {
    /// Start answering `request`; reply through [`ContentRequest::done`]
    fn update(&self, request: ContentRequest<E>);
}

/// Asynchronous source of element tokens
pub trait TokenProvider<E>: Send + Sync {
    /// Serialize the element; reply through [`EncodeRequest::done`]
    fn encode(&self, request: EncodeRequest<E>);

    /// Compare a token with a live element; reply through [`CompareRequest::done`]
    fn compare(&self, request: CompareRequest<E>);
}

/// Veto on model-driven selection changes
pub trait SelectionPolicy<E>: Send + Sync {
    /// Whether `candidate` may replace the `current` selection
    fn overrides(&self, current: &[TreePath<E>], candidate: &[TreePath<E>]) -> bool;
}

/// Filter predicate, evaluated once per element per structural change
pub trait ElementFilter<E>: Send + Sync {
    /// Whether `element` under `parent` is shown
    fn select(&self, parent: &TreePath<E>, element: &E) -> bool;
}

impl<E, F> ElementFilter<E> for F
where
    F: Fn(&TreePath<E>, &E) -> bool + Send + Sync,
{
    fn select(&self, parent: &TreePath<E>, element: &E) -> bool {
        self(parent, element)
    }
}

/// Binding between a model element and the viewer
///
/// A proxy watches its part of the model and posts deltas through the
/// handle it receives on installation.
pub trait ModelProxy<E>: Send {
    fn installed(&mut self, handle: crate::ViewerHandle<E>);

    fn dispose(&mut self);
}

/// Creates model proxies for the input and for `INSTALL` deltas
pub trait ModelProxyFactory<E>: Send + Sync {
    fn create(&self, input: &E, path: &TreePath<E>) -> Option<Box<dyn ModelProxy<E>>>;
}
