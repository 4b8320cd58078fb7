//! postbox - Compose messages and deliver them over authenticated SMTP
//!
//! This crate provides a deferred [`MessageBuilder`] that records text and
//! attachment operations and renders them to MIME only when sent, and a
//! [`MailSession`] that owns one STARTTLS-secured, authenticated SMTP
//! connection to a named provider.

pub mod config;
pub mod domain;
pub mod error;
pub mod services;
pub mod transport;

pub use config::{ProviderRegistry, Settings};
pub use domain::{MessageBuilder, SessionCredentials};
pub use error::{Error, Result, TerminationWarning};
pub use services::{ConnectionState, MailSession};
