//! Session layer.
//!
//! The session sits between callers and the transport:
//!
//! ```text
//! Caller (MessageBuilder, receiver)
//!          |
//!          v
//!    MailSession  <-- You are here
//!          |
//!          v
//! Transport (Connector, Connection)
//! ```
//!
//! - [`MailSession`]: Opens, uses and closes one authenticated SMTP connection

mod session;

pub use session::{ConnectionState, MailSession};
