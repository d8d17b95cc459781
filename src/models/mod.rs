//! Domain model module declarations.

pub mod binding;
pub mod namespace;
pub mod policy;
pub mod request;
pub mod verdict;
