pub mod logging;

pub use logging::{TelemetryGuard, init_tracing};
