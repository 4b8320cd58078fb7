//! Domain types: messages under construction and session credentials.

mod credentials;
mod message;
mod types;

pub use credentials::SessionCredentials;
pub use message::{ContentOperation, MessageBuilder};
pub use types::ProviderId;
