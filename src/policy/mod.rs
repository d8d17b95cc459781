//! Policy matching and manifest handling.
//!
//! Provides glob matching, selector evaluation, loading of policy,
//! namespace, and role binding manifests from a directory, and hot-reload
//! via file system watching.

pub mod glob;
pub mod loader;
pub mod selector;
pub mod watcher;
