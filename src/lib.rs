#![forbid(unsafe_code)]

//! Approval engine for certificate requests.
//!
//! Administrator-defined policies select requests by issuer and namespace,
//! requesters must be granted use of a policy, and each eligible policy's
//! approvers judge the request. Any denial wins; otherwise the request is
//! approved once.

pub mod api;
pub mod approver;
pub mod authz;
pub mod config;
pub mod controller;
pub mod engine;
pub mod errors;
pub mod models;
pub mod persistence;
pub mod policy;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
