//! service-core: Shared HTTP infrastructure for the consultation services.
pub mod config;
pub mod error;
pub mod middleware;
pub mod observability;
