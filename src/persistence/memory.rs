//! In-memory store.

use std::collections::BTreeMap;

use tokio::sync::RwLock;

use super::{Store, StoreFuture};
use crate::models::namespace::Namespace;
use crate::models::policy::{Policy, PolicyStatus};
use crate::models::request::{CertificateRequest, RequestKey, TerminalOutcome};
use crate::AppError;

/// Store holding every object in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    policies: RwLock<BTreeMap<String, Policy>>,
    namespaces: RwLock<BTreeMap<String, Namespace>>,
    requests: RwLock<BTreeMap<RequestKey, CertificateRequest>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn list_policies(&self) -> StoreFuture<'_, Vec<Policy>> {
        Box::pin(async move { Ok(self.policies.read().await.values().cloned().collect()) })
    }

    fn get_policy<'a>(&'a self, name: &'a str) -> StoreFuture<'a, Option<Policy>> {
        Box::pin(async move { Ok(self.policies.read().await.get(name).cloned()) })
    }

    fn upsert_policy<'a>(&'a self, policy: &'a Policy) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut policies = self.policies.write().await;
            if let Some(existing) = policies.get_mut(&policy.name) {
                if existing.spec == policy.spec {
                    return Ok(false);
                }
                existing.spec = policy.spec.clone();
                existing.generation += 1;
                return Ok(true);
            }
            policies.insert(policy.name.clone(), policy.clone());
            Ok(true)
        })
    }

    fn delete_policy<'a>(&'a self, name: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move { Ok(self.policies.write().await.remove(name).is_some()) })
    }

    fn update_policy_status<'a>(
        &'a self,
        name: &'a str,
        status: &'a PolicyStatus,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut policies = self.policies.write().await;
            let policy = policies
                .get_mut(name)
                .ok_or_else(|| AppError::NotFound(format!("policy {name} not found")))?;
            policy.status = status.clone();
            Ok(())
        })
    }

    fn list_namespaces(&self) -> StoreFuture<'_, Vec<Namespace>> {
        Box::pin(async move { Ok(self.namespaces.read().await.values().cloned().collect()) })
    }

    fn get_namespace<'a>(&'a self, name: &'a str) -> StoreFuture<'a, Option<Namespace>> {
        Box::pin(async move { Ok(self.namespaces.read().await.get(name).cloned()) })
    }

    fn upsert_namespace<'a>(&'a self, namespace: &'a Namespace) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut namespaces = self.namespaces.write().await;
            if namespaces.get(&namespace.name) == Some(namespace) {
                return Ok(false);
            }
            namespaces.insert(namespace.name.clone(), namespace.clone());
            Ok(true)
        })
    }

    fn delete_namespace<'a>(&'a self, name: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move { Ok(self.namespaces.write().await.remove(name).is_some()) })
    }

    fn create_request<'a>(&'a self, request: &'a CertificateRequest) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut requests = self.requests.write().await;
            let key = request.key();
            if requests.contains_key(&key) {
                return Err(AppError::Invalid(format!("request {key} already exists")));
            }
            requests.insert(key, request.clone());
            Ok(())
        })
    }

    fn get_request<'a>(
        &'a self,
        key: &'a RequestKey,
    ) -> StoreFuture<'a, Option<CertificateRequest>> {
        Box::pin(async move { Ok(self.requests.read().await.get(key).cloned()) })
    }

    fn list_pending_requests<'a>(
        &'a self,
        namespace: Option<&'a str>,
    ) -> StoreFuture<'a, Vec<RequestKey>> {
        Box::pin(async move {
            Ok(self
                .requests
                .read()
                .await
                .values()
                .filter(|r| !r.is_decided())
                .filter(|r| namespace.is_none_or(|ns| r.namespace == ns))
                .map(CertificateRequest::key)
                .collect())
        })
    }

    fn set_outcome<'a>(
        &'a self,
        key: &'a RequestKey,
        outcome: &'a TerminalOutcome,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut requests = self.requests.write().await;
            let request = requests
                .get_mut(key)
                .ok_or_else(|| AppError::NotFound(format!("request {key} not found")))?;
            if request.outcome.is_some() {
                return Err(AppError::AlreadyDecided(format!("request {key}")));
            }
            request.outcome = Some(outcome.clone());
            Ok(())
        })
    }
}
