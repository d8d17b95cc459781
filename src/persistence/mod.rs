//! Object store for policies, namespaces, and requests.
//!
//! The [`Store`] trait is the only way the controller reads snapshots and
//! writes state. Two implementations are provided: [`memory::MemoryStore`]
//! and [`sqlite_store::SqliteStore`].

pub mod db;
pub mod memory;
pub mod schema;
pub mod sqlite_store;

use std::future::Future;
use std::pin::Pin;

use crate::models::namespace::Namespace;
use crate::models::policy::{Policy, PolicyStatus};
use crate::models::request::{CertificateRequest, RequestKey, TerminalOutcome};
use crate::Result;

/// Re-export the database pool type for convenience.
pub use sqlx::SqlitePool;

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Read/write access to the objects the engine works on.
pub trait Store: Send + Sync {
    /// All policies, each with its latest published status.
    fn list_policies(&self) -> StoreFuture<'_, Vec<Policy>>;

    /// One policy by name.
    fn get_policy<'a>(&'a self, name: &'a str) -> StoreFuture<'a, Option<Policy>>;

    /// Insert or replace a policy's name and spec. Replacing the spec of an
    /// existing policy bumps its generation and keeps its status, which no
    /// longer counts as ready until it is republished. Returns whether
    /// anything changed.
    fn upsert_policy<'a>(&'a self, policy: &'a Policy) -> StoreFuture<'a, bool>;

    /// Remove a policy. Returns whether it existed.
    fn delete_policy<'a>(&'a self, name: &'a str) -> StoreFuture<'a, bool>;

    /// Publish a policy's status.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the policy does not exist.
    fn update_policy_status<'a>(
        &'a self,
        name: &'a str,
        status: &'a PolicyStatus,
    ) -> StoreFuture<'a, ()>;

    /// All namespaces.
    fn list_namespaces(&self) -> StoreFuture<'_, Vec<Namespace>>;

    /// One namespace by name.
    fn get_namespace<'a>(&'a self, name: &'a str) -> StoreFuture<'a, Option<Namespace>>;

    /// Insert or replace a namespace. Returns whether anything changed.
    fn upsert_namespace<'a>(&'a self, namespace: &'a Namespace) -> StoreFuture<'a, bool>;

    /// Remove a namespace. Returns whether it existed.
    fn delete_namespace<'a>(&'a self, name: &'a str) -> StoreFuture<'a, bool>;

    /// Insert a new request.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Invalid` if a request with the same key exists.
    fn create_request<'a>(&'a self, request: &'a CertificateRequest) -> StoreFuture<'a, ()>;

    /// One request by key.
    fn get_request<'a>(&'a self, key: &'a RequestKey)
        -> StoreFuture<'a, Option<CertificateRequest>>;

    /// Keys of requests with no terminal outcome, optionally limited to one
    /// namespace.
    fn list_pending_requests<'a>(
        &'a self,
        namespace: Option<&'a str>,
    ) -> StoreFuture<'a, Vec<RequestKey>>;

    /// Record a request's terminal outcome, at most once.
    ///
    /// # Errors
    ///
    /// Returns `AppError::AlreadyDecided` if an outcome is already recorded
    /// and `AppError::NotFound` if the request does not exist.
    fn set_outcome<'a>(
        &'a self,
        key: &'a RequestKey,
        outcome: &'a TerminalOutcome,
    ) -> StoreFuture<'a, ()>;
}
