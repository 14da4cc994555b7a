//! Asynchronous virtual tree viewer
//!
//! A [`TreeViewer`] shows a lazily fetched tree. Children, child counts and
//! has-children flags come from a [`ContentProvider`] that may answer on any
//! thread; the viewer applies the answers on the thread that owns it.
//!
//! On top of the fetched content the viewer maintains:
//! - element filters, kept in a [`transform::FilterTransform`] so model and
//!   view indexes can be translated both ways
//! - an [`scheduler::UpdateScheduler`] that coalesces fetches and never runs
//!   a fetch concurrently with one for an ancestor
//! - reconciliation of [`ModelDelta`](canopy_core::ModelDelta)s posted by
//!   model proxies
//! - save and restore of expansion, selection and scroll position per input,
//!   keyed by tokens from a [`TokenProvider`]

pub mod cache;
pub mod config;
pub mod error;
pub mod listener;
pub mod provider;
mod reconcile;
mod state;
pub mod tree;
mod viewer;

pub use cache::{SavedState, StateCache};
pub use config::{ViewerConfig, ALL_LEVELS};
pub use error::{ConfigError, ProviderError, ViewerError};
pub use listener::{ModelChangedListener, StateListener, StateRequestKind, UpdateListener};
pub use provider::{
    CompareRequest, ContentProvider, ContentReply, ContentRequest, ElementFilter, EncodeRequest,
    ModelProxy, ModelProxyFactory, SelectionPolicy, TokenProvider,
};
pub use tree::{ViewNode, VirtualTree};
pub use viewer::{TreeViewer, ViewerHandle};
