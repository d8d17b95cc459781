//! Error types shared across the engine.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Persistence failure when interacting with the object store.
    Db(String),
    /// Policy manifest loading or watching failure.
    Policy(String),
    /// The authorization backend could not produce an answer.
    Authorization(String),
    /// An approver readiness or evaluation call failed.
    Approver(String),
    /// A policy references a plugin that is not registered.
    UnknownPlugin(String),
    /// The reconciliation was cancelled before completing.
    Cancelled(String),
    /// An external call did not finish before the reconciliation deadline.
    DeadlineExceeded(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// The request already carries a terminal outcome.
    AlreadyDecided(String),
    /// Caller-supplied object failed validation.
    Invalid(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl AppError {
    /// Whether the failure is transient and the reconciliation should be retried.
    ///
    /// Retryable errors never result in a committed outcome.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Db(_)
                | Self::Authorization(_)
                | Self::Approver(_)
                | Self::Cancelled(_)
                | Self::DeadlineExceeded(_)
                | Self::NotFound(_)
                | Self::Io(_)
        )
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::Policy(msg) => write!(f, "policy: {msg}"),
            Self::Authorization(msg) => write!(f, "authorization: {msg}"),
            Self::Approver(msg) => write!(f, "approver: {msg}"),
            Self::UnknownPlugin(msg) => write!(f, "unknown plugin: {msg}"),
            Self::Cancelled(msg) => write!(f, "cancelled: {msg}"),
            Self::DeadlineExceeded(msg) => write!(f, "deadline exceeded: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::AlreadyDecided(msg) => write!(f, "already decided: {msg}"),
            Self::Invalid(msg) => write!(f, "invalid: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Invalid(format!("malformed json: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
