pub mod metrics;
pub mod providers;
pub mod relay;

pub use providers::{ProviderError, ProviderStream, StreamChunk, TextProvider};
