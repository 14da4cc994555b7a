//! Common utilities for integration tests

pub mod fixtures;

pub use fixtures::{path, settle, Model, Path, StateEvents, TestContent, TestTokens};
