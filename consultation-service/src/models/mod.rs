//! Domain models for the consultation service.

pub mod visit;

pub use visit::Visit;
