//! `SQLite`-backed store.
//!
//! Policy specs, namespace labels, and request bodies are kept as JSON
//! text. A request's terminal outcome lives in dedicated columns so the
//! at-most-once write can be a single conditional `UPDATE`.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::db::Database;
use super::{Store, StoreFuture};
use crate::models::namespace::Namespace;
use crate::models::policy::{Policy, PolicySpec, PolicyStatus};
use crate::models::request::{CertificateRequest, Decision, RequestKey, TerminalOutcome};
use crate::{AppError, Result};

/// Store persisting every object in `SQLite`.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Database>,
}

#[derive(sqlx::FromRow)]
struct PolicyRow {
    name: String,
    spec: String,
    generation: i64,
    status: String,
}

impl PolicyRow {
    fn into_policy(self) -> Result<Policy> {
        let spec: PolicySpec = serde_json::from_str(&self.spec)
            .map_err(|e| AppError::Db(format!("invalid policy spec for {}: {e}", self.name)))?;
        let status: PolicyStatus = serde_json::from_str(&self.status)
            .map_err(|e| AppError::Db(format!("invalid policy status for {}: {e}", self.name)))?;
        Ok(Policy {
            name: self.name,
            spec,
            generation: self.generation,
            status,
        })
    }
}

#[derive(sqlx::FromRow)]
struct NamespaceRow {
    name: String,
    labels: String,
}

impl NamespaceRow {
    fn into_namespace(self) -> Result<Namespace> {
        let labels: BTreeMap<String, String> = serde_json::from_str(&self.labels)
            .map_err(|e| AppError::Db(format!("invalid labels for {}: {e}", self.name)))?;
        Ok(Namespace {
            name: self.name,
            labels,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RequestRow {
    body: String,
    decision: Option<String>,
    reason: Option<String>,
    message: Option<String>,
    decided_at: Option<String>,
}

impl RequestRow {
    fn into_request(self) -> Result<CertificateRequest> {
        let mut request: CertificateRequest = serde_json::from_str(&self.body)
            .map_err(|e| AppError::Db(format!("invalid request body: {e}")))?;
        request.outcome = match self.decision.as_deref() {
            None => None,
            Some(decision) => Some(TerminalOutcome {
                decision: parse_decision(decision)?,
                reason: self.reason.unwrap_or_default(),
                message: self.message.unwrap_or_default(),
                decided_at: parse_time(self.decided_at.as_deref())?,
            }),
        };
        Ok(request)
    }
}

#[derive(sqlx::FromRow)]
struct KeyRow {
    namespace: String,
    name: String,
}

fn parse_decision(s: &str) -> Result<Decision> {
    match s {
        "approved" => Ok(Decision::Approved),
        "denied" => Ok(Decision::Denied),
        other => Err(AppError::Db(format!("invalid decision: {other}"))),
    }
}

fn parse_time(s: Option<&str>) -> Result<DateTime<Utc>> {
    let s = s.ok_or_else(|| AppError::Db("decided request missing decided_at".into()))?;
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::Db(format!("invalid decided_at: {e}")))
}

impl SqliteStore {
    /// Create a new store over an open pool.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    async fn fetch_policy(&self, name: &str) -> Result<Option<Policy>> {
        let row: Option<PolicyRow> = sqlx::query_as("SELECT * FROM policy WHERE name = ?1")
            .bind(name)
            .fetch_optional(self.db.as_ref())
            .await?;
        row.map(PolicyRow::into_policy).transpose()
    }

    async fn fetch_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        let row: Option<NamespaceRow> =
            sqlx::query_as("SELECT * FROM namespace WHERE name = ?1")
                .bind(name)
                .fetch_optional(self.db.as_ref())
                .await?;
        row.map(NamespaceRow::into_namespace).transpose()
    }
}

impl Store for SqliteStore {
    fn list_policies(&self) -> StoreFuture<'_, Vec<Policy>> {
        Box::pin(async move {
            let rows: Vec<PolicyRow> = sqlx::query_as("SELECT * FROM policy ORDER BY name")
                .fetch_all(self.db.as_ref())
                .await?;
            rows.into_iter().map(PolicyRow::into_policy).collect()
        })
    }

    fn get_policy<'a>(&'a self, name: &'a str) -> StoreFuture<'a, Option<Policy>> {
        Box::pin(self.fetch_policy(name))
    }

    fn upsert_policy<'a>(&'a self, policy: &'a Policy) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            if let Some(existing) = self.fetch_policy(&policy.name).await? {
                if existing.spec == policy.spec {
                    return Ok(false);
                }
                let spec = serde_json::to_string(&policy.spec)?;
                sqlx::query(
                    "UPDATE policy SET spec = ?1, generation = generation + 1 WHERE name = ?2",
                )
                .bind(&spec)
                .bind(&policy.name)
                .execute(self.db.as_ref())
                .await?;
                return Ok(true);
            }

            let spec = serde_json::to_string(&policy.spec)?;
            let status = serde_json::to_string(&policy.status)?;
            sqlx::query(
                "INSERT INTO policy (name, spec, generation, status) VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(&policy.name)
            .bind(&spec)
            .bind(policy.generation)
            .bind(&status)
            .execute(self.db.as_ref())
            .await?;
            Ok(true)
        })
    }

    fn delete_policy<'a>(&'a self, name: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM policy WHERE name = ?1")
                .bind(name)
                .execute(self.db.as_ref())
                .await?;
            Ok(result.rows_affected() > 0)
        })
    }

    fn update_policy_status<'a>(
        &'a self,
        name: &'a str,
        status: &'a PolicyStatus,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let status = serde_json::to_string(status)?;
            let result = sqlx::query("UPDATE policy SET status = ?1 WHERE name = ?2")
                .bind(&status)
                .bind(name)
                .execute(self.db.as_ref())
                .await?;
            if result.rows_affected() == 0 {
                return Err(AppError::NotFound(format!("policy {name} not found")));
            }
            Ok(())
        })
    }

    fn list_namespaces(&self) -> StoreFuture<'_, Vec<Namespace>> {
        Box::pin(async move {
            let rows: Vec<NamespaceRow> =
                sqlx::query_as("SELECT * FROM namespace ORDER BY name")
                    .fetch_all(self.db.as_ref())
                    .await?;
            rows.into_iter().map(NamespaceRow::into_namespace).collect()
        })
    }

    fn get_namespace<'a>(&'a self, name: &'a str) -> StoreFuture<'a, Option<Namespace>> {
        Box::pin(self.fetch_namespace(name))
    }

    fn upsert_namespace<'a>(&'a self, namespace: &'a Namespace) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            if self.fetch_namespace(&namespace.name).await?.as_ref() == Some(namespace) {
                return Ok(false);
            }
            let labels = serde_json::to_string(&namespace.labels)?;
            sqlx::query(
                "INSERT INTO namespace (name, labels) VALUES (?1, ?2)
                 ON CONFLICT(name) DO UPDATE SET labels = excluded.labels",
            )
            .bind(&namespace.name)
            .bind(&labels)
            .execute(self.db.as_ref())
            .await?;
            Ok(true)
        })
    }

    fn delete_namespace<'a>(&'a self, name: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM namespace WHERE name = ?1")
                .bind(name)
                .execute(self.db.as_ref())
                .await?;
            Ok(result.rows_affected() > 0)
        })
    }

    fn create_request<'a>(&'a self, request: &'a CertificateRequest) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut body = request.clone();
            let outcome = body.outcome.take();
            let body = serde_json::to_string(&body)?;

            let result = sqlx::query(
                "INSERT OR IGNORE INTO certificate_request
                 (namespace, name, uid, body, decision, reason, message, decided_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )
            .bind(&request.namespace)
            .bind(&request.name)
            .bind(&request.uid)
            .bind(&body)
            .bind(outcome.as_ref().map(|o| o.decision.as_str()))
            .bind(outcome.as_ref().map(|o| o.reason.as_str()))
            .bind(outcome.as_ref().map(|o| o.message.as_str()))
            .bind(outcome.as_ref().map(|o| o.decided_at.to_rfc3339()))
            .bind(request.created_at.to_rfc3339())
            .execute(self.db.as_ref())
            .await?;

            if result.rows_affected() == 0 {
                return Err(AppError::Invalid(format!(
                    "request {} already exists",
                    request.key()
                )));
            }
            Ok(())
        })
    }

    fn get_request<'a>(
        &'a self,
        key: &'a RequestKey,
    ) -> StoreFuture<'a, Option<CertificateRequest>> {
        Box::pin(async move {
            let row: Option<RequestRow> = sqlx::query_as(
                "SELECT body, decision, reason, message, decided_at FROM certificate_request
                 WHERE namespace = ?1 AND name = ?2",
            )
            .bind(&key.namespace)
            .bind(&key.name)
            .fetch_optional(self.db.as_ref())
            .await?;
            row.map(RequestRow::into_request).transpose()
        })
    }

    fn list_pending_requests<'a>(
        &'a self,
        namespace: Option<&'a str>,
    ) -> StoreFuture<'a, Vec<RequestKey>> {
        Box::pin(async move {
            let rows: Vec<KeyRow> = sqlx::query_as(
                "SELECT namespace, name FROM certificate_request
                 WHERE decision IS NULL AND (?1 IS NULL OR namespace = ?1)
                 ORDER BY namespace, name",
            )
            .bind(namespace)
            .fetch_all(self.db.as_ref())
            .await?;
            Ok(rows
                .into_iter()
                .map(|row| RequestKey::new(row.namespace, row.name))
                .collect())
        })
    }

    fn set_outcome<'a>(
        &'a self,
        key: &'a RequestKey,
        outcome: &'a TerminalOutcome,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE certificate_request
                 SET decision = ?1, reason = ?2, message = ?3, decided_at = ?4
                 WHERE namespace = ?5 AND name = ?6 AND decision IS NULL",
            )
            .bind(outcome.decision.as_str())
            .bind(&outcome.reason)
            .bind(&outcome.message)
            .bind(outcome.decided_at.to_rfc3339())
            .bind(&key.namespace)
            .bind(&key.name)
            .execute(self.db.as_ref())
            .await?;

            if result.rows_affected() > 0 {
                return Ok(());
            }

            let exists: Option<(i64,)> = sqlx::query_as(
                "SELECT 1 FROM certificate_request WHERE namespace = ?1 AND name = ?2",
            )
            .bind(&key.namespace)
            .bind(&key.name)
            .fetch_optional(self.db.as_ref())
            .await?;

            match exists {
                Some(_) => Err(AppError::AlreadyDecided(format!("request {key}"))),
                None => Err(AppError::NotFound(format!("request {key} not found"))),
            }
        })
    }
}
