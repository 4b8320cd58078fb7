//! Transport trait definitions.
//!
//! The session state machine never touches a socket directly. It opens
//! connections through a [`Connector`] and drives each step of the SMTP
//! exchange through the resulting [`Connection`]. The built-in implementation
//! lives in [`smtp`](super::smtp); tests substitute their own.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::Reply;

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors raised by the transport itself, as opposed to server replies.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Network I/O failed.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The TLS handshake or configuration failed.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The server sent something that is not an SMTP reply.
    #[error("malformed reply: {0}")]
    MalformedReply(String),

    /// The server closed the connection.
    #[error("connection closed by server")]
    Closed,

    /// An earlier exchange was interrupted, so replies on the wire no longer
    /// line up with commands.
    #[error("connection is out of step with the server after an interrupted transaction")]
    Desynchronized,

    /// The server greeted with something other than a service-ready reply.
    #[error("server refused the connection ({code}): {detail}")]
    Greeting {
        /// Greeting reply code.
        code: u16,
        /// Greeting reply text.
        detail: String,
    },
}

/// A recipient the server refused during submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    /// The refused recipient address.
    pub recipient: String,
    /// Reply code that refused it.
    pub code: u16,
    /// Reply text that refused it.
    pub detail: String,
}

impl Rejection {
    /// Creates a rejection record.
    pub fn new(recipient: impl Into<String>, code: u16, detail: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            code,
            detail: detail.into(),
        }
    }
}

/// Opens plaintext SMTP connections.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a plaintext connection to `host:port` and completes the greeting.
    async fn open_plaintext(&self, host: &str, port: u16) -> Result<Box<dyn Connection>>;
}

/// One SMTP connection, exclusively owned by a session.
///
/// Each method performs a single protocol step and hands the server's reply
/// back unchanged. Deciding whether a reply code means success is the
/// caller's job.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Connection: Send {
    /// Issues `STARTTLS` and, if the server is ready, performs the handshake.
    async fn upgrade_to_tls(&mut self) -> Result<Reply>;

    /// Runs the login exchange.
    async fn authenticate(&mut self, user: &str, secret: &str) -> Result<Reply>;

    /// Submits `document` from `from` to every address in `to`.
    ///
    /// Returns the recipients the server refused; an empty vector means the
    /// message was accepted for every recipient.
    async fn submit(&mut self, from: &str, to: &[String], document: &[u8])
        -> Result<Vec<Rejection>>;

    /// Issues `QUIT`.
    async fn terminate(&mut self) -> Result<Reply>;
}
