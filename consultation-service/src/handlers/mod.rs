//! HTTP handlers for the consultation service.

pub mod consultation;
pub mod health;
pub mod metrics;
