//! Index transform between model space and view space
//!
//! This crate provides:
//! - A filter trie recording, per parent path, which model children are hidden
//! - Conversion of child indexes and counts between model and view space
//! - Index shifting as elements are inserted into or removed from the model

pub mod filter;

// Re-exports
pub use filter::FilterTransform;
