//! Consultation summary service.
//!
//! Accepts a visit note on `POST /api` and streams a model-written summary,
//! next steps and a draft patient email back as server-sent events.

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod prompts;
pub mod services;
pub mod startup;
