//! Configuration: settings persistence and the provider registry.
//!
//! Settings are stored in the user's config directory as JSON. The
//! [`ProviderRegistry`] is derived from them once and then shared read-only.

mod registry;
mod settings;

pub use registry::{ProviderEndpoint, ProviderRegistry, SUBMISSION_PORT};
pub use settings::{ConfigError, Settings, TimeoutSettings};
