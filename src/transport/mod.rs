//! SMTP transport layer.
//!
//! This module contains the [`Connector`] and [`Connection`] traits the
//! session drives, and the built-in implementation over TCP:
//!
//! - [`SmtpConnector`] - opens plaintext connections and upgrades them with STARTTLS
//! - [`Reply`] - parsed server replies, with the exact codes in [`codes`]
//!
//! # Example
//!
//! ```ignore
//! use postbox::transport::{codes, Connector, SmtpConnector};
//!
//! let connector = SmtpConnector::new("client.example.com");
//! let mut connection = connector.open_plaintext("smtp.example.com", 587).await?;
//! let reply = connection.upgrade_to_tls().await?;
//! assert_eq!(reply.code, codes::READY);
//! ```

mod reply;
mod smtp;
mod traits;

pub use reply::{codes, Reply};
pub use smtp::{SmtpConnection, SmtpConnector};
pub use traits::{Connection, Connector, Rejection, Result, TransportError};

#[cfg(test)]
pub use traits::{MockConnection, MockConnector};
