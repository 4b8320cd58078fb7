//! SMTP session state machine.
//!
//! A [`MailSession`] is either `Disconnected` or `Connected`. It only becomes
//! `Connected` after the server has accepted both the STARTTLS upgrade and the
//! login, and the transport handle exists exactly while it is `Connected`.
//!
//! ```text
//!                open(): 220 then 235
//!  Disconnected ----------------------> Connected --+ send()
//!       ^                                  |   ^    |
//!       +---------- close() / drop --------+   +----+
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ProviderRegistry, Settings, TimeoutSettings};
use crate::domain::{MessageBuilder, SessionCredentials};
use crate::error::{Error, Result, TerminationWarning};
use crate::transport::{codes, Connection, Connector, SmtpConnector};

/// Whether a session currently holds an authenticated connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport is held.
    Disconnected,
    /// Authenticated and ready to send.
    Connected,
}

/// One authenticated SMTP connection at a time, for one set of credentials.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use postbox::config::ProviderRegistry;
/// use postbox::domain::{MessageBuilder, SessionCredentials};
/// use postbox::services::MailSession;
///
/// let registry = Arc::new(ProviderRegistry::builtin());
/// let credentials = SessionCredentials::new("gmail", "me@gmail.com", "app-password");
/// let mut session = MailSession::new(credentials, registry);
///
/// let mut message = MessageBuilder::new("Hello");
/// message.add_text("Sent with postbox");
///
/// // One-shot
/// session.quick_send("friend@example.com", &message).await?;
///
/// // Or several messages over one connection
/// session.open().await?;
/// session.send("a@example.com", &message).await?;
/// session.send("b@example.com", &message).await?;
/// session.close().await?;
/// ```
pub struct MailSession {
    credentials: SessionCredentials,
    registry: Arc<ProviderRegistry>,
    connector: Arc<dyn Connector>,
    timeouts: TimeoutSettings,
    /// Present exactly while connected.
    connection: Option<Box<dyn Connection>>,
}

impl MailSession {
    /// Creates a disconnected session using the built-in SMTP transport.
    pub fn new(credentials: SessionCredentials, registry: Arc<ProviderRegistry>) -> Self {
        Self {
            credentials,
            registry,
            connector: Arc::new(SmtpConnector::default()),
            timeouts: TimeoutSettings::default(),
            connection: None,
        }
    }

    /// Creates a disconnected session configured from `settings`.
    pub fn from_settings(
        credentials: SessionCredentials,
        registry: Arc<ProviderRegistry>,
        settings: &Settings,
    ) -> Self {
        Self::new(credentials, registry)
            .with_connector(Arc::new(SmtpConnector::new(settings.hello_name.clone())))
            .with_timeouts(settings.timeouts.clone())
    }

    /// Replaces the transport used to open connections.
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Replaces the per-step deadlines.
    pub fn with_timeouts(mut self, timeouts: TimeoutSettings) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Returns the current connection state.
    pub fn state(&self) -> ConnectionState {
        if self.connection.is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    /// Returns true while an authenticated connection is held.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Returns the session credentials.
    pub fn credentials(&self) -> &SessionCredentials {
        &self.credentials
    }

    /// Connects, upgrades to TLS and logs in.
    ///
    /// On any failure the session stays `Disconnected` and no transport is
    /// retained.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyConnected`] if the session is already open
    /// - [`Error::UnknownProvider`] if the provider is not in the registry
    /// - [`Error::ConnectionFailed`] if the connection or the TLS upgrade fails
    /// - [`Error::Authentication`] if the login reply is not 235
    /// - [`Error::Timeout`] if a step exceeds its deadline
    pub async fn open(&mut self) -> Result<()> {
        if self.connection.is_some() {
            return Err(Error::AlreadyConnected);
        }

        let endpoint = self.registry.resolve(&self.credentials.provider_id)?;
        tracing::info!(
            provider = %self.credentials.provider_id,
            host = %endpoint.host,
            port = endpoint.port,
            "Opening SMTP session"
        );

        let mut connection = deadline(
            "connect",
            self.timeouts.connect(),
            self.connector.open_plaintext(&endpoint.host, endpoint.port),
        )
        .await?
        .map_err(|e| Error::ConnectionFailed(e.to_string()))?;

        let upgrade = deadline(
            "starttls",
            self.timeouts.starttls(),
            connection.upgrade_to_tls(),
        )
        .await?
        .map_err(|e| Error::ConnectionFailed(format!("STARTTLS failed: {e}")))?;

        if !upgrade.is(codes::READY) {
            tracing::warn!(code = upgrade.code, detail = %upgrade.detail(), "STARTTLS refused");
            self.discard(connection).await;
            return Err(Error::ConnectionFailed(format!(
                "STARTTLS refused ({}): {}",
                upgrade.code,
                upgrade.detail()
            )));
        }

        let login = deadline(
            "authenticate",
            self.timeouts.authenticate(),
            connection.authenticate(&self.credentials.user, &self.credentials.secret),
        )
        .await?
        .map_err(|e| Error::ConnectionFailed(format!("authentication exchange failed: {e}")))?;

        if !login.is(codes::AUTH_SUCCESSFUL) {
            tracing::warn!(
                user = %self.credentials.user,
                code = login.code,
                detail = %login.detail(),
                "Login refused"
            );
            self.discard(connection).await;
            return Err(Error::Authentication {
                code: login.code,
                detail: login.detail(),
            });
        }

        tracing::info!(user = %self.credentials.user, "SMTP session authenticated");
        self.connection = Some(connection);
        Ok(())
    }

    /// Compiles `message` for `receiver` and submits it.
    ///
    /// The session stays connected whatever the outcome. If submission timed
    /// out or failed mid-transaction, the built-in transport refuses further
    /// submissions with [`TransportError::Desynchronized`]; `close` and `open`
    /// again to recover.
    ///
    /// [`TransportError::Desynchronized`]: crate::transport::TransportError::Desynchronized
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if the session is not open; nothing is sent
    /// - any error from [`MessageBuilder::compile`]
    /// - [`Error::DeliveryRejected`] if the server refused the recipient
    /// - [`Error::Transport`] if the connection failed mid-submission
    /// - [`Error::Timeout`] if submission exceeds its deadline
    pub async fn send(&mut self, receiver: &str, message: &MessageBuilder) -> Result<()> {
        let Some(connection) = self.connection.as_mut() else {
            return Err(Error::NotConnected);
        };

        let document = message.compile(&self.credentials.user, receiver).await?;
        let recipients = [receiver.to_string()];

        let rejected = deadline(
            "submit",
            self.timeouts.submit(),
            connection.submit(&self.credentials.user, &recipients, &document),
        )
        .await??;

        if rejected.is_empty() {
            tracing::info!(receiver = %receiver, bytes = document.len(), "Email sent via SMTP");
            Ok(())
        } else {
            tracing::warn!(receiver = %receiver, rejected = rejected.len(), "Delivery rejected");
            Err(Error::DeliveryRejected { rejected })
        }
    }

    /// Says goodbye to the server and releases the connection.
    ///
    /// The transport is released even if `QUIT` fails; in that case the
    /// returned [`TerminationWarning`] carries the detail.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if the session is not open.
    pub async fn close(&mut self) -> Result<Option<TerminationWarning>> {
        let mut connection = self.connection.take().ok_or(Error::NotConnected)?;

        let outcome = deadline("quit", self.timeouts.quit(), connection.terminate()).await;
        drop(connection);

        let warning = match outcome {
            Ok(Ok(reply)) if reply.is(codes::CLOSING) => None,
            Ok(Ok(reply)) => Some(TerminationWarning {
                code: Some(reply.code),
                detail: reply.detail(),
            }),
            Ok(Err(e)) => Some(TerminationWarning {
                code: None,
                detail: e.to_string(),
            }),
            Err(e) => Some(TerminationWarning {
                code: None,
                detail: e.to_string(),
            }),
        };

        match &warning {
            None => tracing::info!(provider = %self.credentials.provider_id, "SMTP session closed"),
            Some(w) => tracing::warn!(code = ?w.code, detail = %w.detail, "QUIT did not complete cleanly"),
        }
        Ok(warning)
    }

    /// Opens a session, sends one message and closes again.
    ///
    /// `close` always runs after a successful `open`, even if sending failed.
    /// The result is the outcome of the send.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownProvider`] or [`Error::AlreadyConnected`] unchanged
    /// - [`Error::ConnectionFailed`] for any other failure to open
    /// - any error from [`send`](Self::send)
    pub async fn quick_send(&mut self, receiver: &str, message: &MessageBuilder) -> Result<()> {
        if let Err(e) = self.open().await {
            return Err(match e {
                Error::UnknownProvider(_) | Error::AlreadyConnected | Error::ConnectionFailed(_) => e,
                other => Error::ConnectionFailed(other.to_string()),
            });
        }

        let outcome = self.send(receiver, message).await;

        if let Err(e) = self.close().await {
            tracing::debug!(error = %e, "close after quick send failed");
        }

        outcome
    }

    /// Best-effort `QUIT` on a connection that never became the session's.
    async fn discard(&self, mut connection: Box<dyn Connection>) {
        match deadline("quit", self.timeouts.quit(), connection.terminate()).await {
            Ok(Ok(reply)) => tracing::debug!(code = reply.code, "Connection discarded"),
            Ok(Err(e)) => tracing::debug!(error = %e, "QUIT after failed open did not complete"),
            Err(e) => tracing::debug!(error = %e, "QUIT after failed open timed out"),
        }
    }
}

/// Runs `future` under a deadline, reporting expiry as [`Error::Timeout`].
async fn deadline<F: Future>(operation: &'static str, after: Duration, future: F) -> Result<F::Output> {
    tokio::time::timeout(after, future).await.map_err(|_| {
        tracing::warn!(operation, ?after, "Deadline exceeded");
        Error::Timeout { operation, after }
    })
}

impl Drop for MailSession {
    fn drop(&mut self) {
        if self.connection.take().is_some() {
            tracing::debug!(
                provider = %self.credentials.provider_id,
                "Session dropped while connected; socket closed without QUIT"
            );
        }
    }
}

impl fmt::Debug for MailSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailSession")
            .field("credentials", &self.credentials)
            .field("state", &self.state())
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}
