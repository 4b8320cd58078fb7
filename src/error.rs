//! Error types for composing and delivering mail.
//!
//! Every fallible operation on [`MessageBuilder`](crate::domain::MessageBuilder)
//! and [`MailSession`](crate::services::MailSession) returns [`Error`].
//! Closing a session never fails on protocol grounds; an unexpected reply to
//! `QUIT` is reported as a [`TerminationWarning`] instead.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::transport::{Rejection, TransportError};

/// Result type alias for mail operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while composing or delivering mail.
#[derive(Debug, Error)]
pub enum Error {
    /// The provider identifier has no entry in the registry.
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    /// The transport could not be opened or the TLS upgrade was refused.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The server rejected the login exchange.
    #[error("authentication failed ({code}): {detail}")]
    Authentication {
        /// Reply code returned by the server.
        code: u16,
        /// Reply text returned by the server.
        detail: String,
    },

    /// The operation requires an open session.
    #[error("session is not connected")]
    NotConnected,

    /// `open` was called on a session that is already connected.
    #[error("session is already connected")]
    AlreadyConnected,

    /// A queued attachment could not be read at compile time.
    #[error("failed to read attachment {}: {source}", .path.display())]
    AttachmentRead {
        /// Path that was queued on the builder.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The server refused one or more recipients.
    #[error("delivery rejected for {}", describe_rejections(.rejected))]
    DeliveryRejected {
        /// Per-recipient rejection detail.
        rejected: Vec<Rejection>,
    },

    /// A network step did not complete before its deadline.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// The protocol step that timed out.
        operation: &'static str,
        /// The deadline that elapsed.
        after: Duration,
    },

    /// A sender or receiver could not be encoded as a mailbox.
    #[error("invalid address {address:?}: {reason}")]
    InvalidAddress {
        /// The address as given by the caller.
        address: String,
        /// Why the encoder refused it.
        reason: String,
    },

    /// The document encoder failed.
    #[error("failed to compose message: {0}")]
    Compose(String),

    /// The transport failed mid-session.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

fn describe_rejections(rejected: &[Rejection]) -> String {
    rejected
        .iter()
        .map(|r| format!("{} ({} {})", r.recipient, r.code, r.detail))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Non-fatal outcome of a close whose `QUIT` exchange did not end cleanly.
///
/// The transport has already been released when this is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("session terminated uncleanly: {detail}")]
pub struct TerminationWarning {
    /// Reply code, if the server answered at all.
    pub code: Option<u16>,
    /// Server reply text or the local failure description.
    pub detail: String,
}
