//! Built-in SMTP transport over TCP with STARTTLS.
//!
//! # Protocol Details
//!
//! - Plaintext connect, `220` greeting, `EHLO` (falling back to `HELO`)
//! - `STARTTLS` (RFC 3207) upgraded with rustls against the webpki roots,
//!   followed by a fresh `EHLO`
//! - `AUTH PLAIN`, or `AUTH LOGIN` when it is the only advertised mechanism
//!   (RFC 4954)
//! - `MAIL FROM` / `RCPT TO` / `DATA` with dot-stuffing (RFC 5321 §4.5.2)
//! - `QUIT`
//!
//! A transaction cut short (for example by a caller's deadline) leaves the
//! connection unusable: later submissions and `QUIT` fail with
//! [`TransportError::Desynchronized`] rather than read stale replies.

use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use super::reply::codes;
use super::{Connection, Connector, Rejection, Reply, Result, TransportError};

/// Size of each socket read.
const READ_CHUNK: usize = 4096;

/// Upper bound on a single buffered reply (1 MiB).
const MAX_REPLY_SIZE: usize = 1024 * 1024;

/// Opens [`SmtpConnection`]s to real servers.
#[derive(Clone)]
pub struct SmtpConnector {
    hello_name: String,
    tls_config: Arc<ClientConfig>,
}

impl SmtpConnector {
    /// Creates a connector that identifies itself as `hello_name` and trusts
    /// the webpki root certificates.
    pub fn new(hello_name: impl Into<String>) -> Self {
        let config = ClientConfig::builder()
            .with_root_certificates(RootCertStore::from_iter(
                webpki_roots::TLS_SERVER_ROOTS.iter().cloned(),
            ))
            .with_no_client_auth();

        Self::with_tls_config(hello_name, Arc::new(config))
    }

    /// Creates a connector with a caller-supplied TLS configuration.
    pub fn with_tls_config(hello_name: impl Into<String>, tls_config: Arc<ClientConfig>) -> Self {
        Self {
            hello_name: hello_name.into(),
            tls_config,
        }
    }

    /// Returns the `EHLO` identity.
    pub fn hello_name(&self) -> &str {
        &self.hello_name
    }
}

impl Default for SmtpConnector {
    fn default() -> Self {
        Self::new("localhost")
    }
}

impl std::fmt::Debug for SmtpConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConnector")
            .field("hello_name", &self.hello_name)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Connector for SmtpConnector {
    async fn open_plaintext(&self, host: &str, port: u16) -> Result<Box<dyn Connection>> {
        let connection = SmtpConnection::connect(
            host,
            port,
            self.hello_name.clone(),
            Arc::clone(&self.tls_config),
        )
        .await?;
        Ok(Box::new(connection))
    }
}

/// The socket under a connection, before or after STARTTLS.
enum Stream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Stream {
    async fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        match self {
            Self::Plain(stream) => stream.write_all(data).await,
            Self::Tls(stream) => {
                stream.write_all(data).await?;
                stream.flush().await
            }
        }
    }

    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Plain(stream) => stream.read(buf).await,
            Self::Tls(stream) => stream.read(buf).await,
        }
    }

    async fn shutdown(&mut self) -> std::io::Result<()> {
        match self {
            Self::Plain(stream) => stream.shutdown().await,
            Self::Tls(stream) => stream.shutdown().await,
        }
    }
}

/// A live SMTP connection.
pub struct SmtpConnection {
    stream: Option<Stream>,
    buffer: Vec<u8>,
    host: String,
    hello_name: String,
    tls_config: Arc<ClientConfig>,
    /// Extension keywords from the latest `EHLO` reply.
    extensions: Vec<String>,
    /// Set while a mail transaction is in flight; still set afterwards if it
    /// was cut short.
    in_transaction: bool,
}

impl SmtpConnection {
    /// Connects to `host:port`, reads the greeting and introduces itself.
    pub async fn connect(
        host: &str,
        port: u16,
        hello_name: String,
        tls_config: Arc<ClientConfig>,
    ) -> Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        tracing::debug!(host, port, "TCP connection established");

        let mut connection = Self {
            stream: Some(Stream::Plain(stream)),
            buffer: Vec::with_capacity(READ_CHUNK),
            host: host.to_string(),
            hello_name,
            tls_config,
            extensions: Vec::new(),
            in_transaction: false,
        };

        let greeting = connection.read_reply().await?;
        if !greeting.is(codes::READY) {
            return Err(TransportError::Greeting {
                code: greeting.code,
                detail: greeting.detail(),
            });
        }

        connection.hello().await?;
        Ok(connection)
    }

    /// Returns true if the latest `EHLO` advertised `keyword`.
    pub fn supports(&self, keyword: &str) -> bool {
        self.extensions.iter().any(|ext| {
            ext.split_whitespace()
                .next()
                .is_some_and(|k| k.eq_ignore_ascii_case(keyword))
        })
    }

    /// Returns true once STARTTLS has completed.
    pub fn is_encrypted(&self) -> bool {
        matches!(self.stream, Some(Stream::Tls(_)))
    }

    /// Authentication mechanisms advertised by the latest `EHLO`.
    fn auth_mechanisms(&self) -> Vec<String> {
        self.extensions
            .iter()
            .filter_map(|ext| {
                let mut words = ext.split_whitespace();
                match words.next() {
                    Some(k) if k.eq_ignore_ascii_case("AUTH") => {
                        Some(words.map(str::to_ascii_uppercase).collect::<Vec<_>>())
                    }
                    _ => None,
                }
            })
            .flatten()
            .collect()
    }

    async fn hello(&mut self) -> Result<()> {
        let ehlo = self.command(&format!("EHLO {}", self.hello_name)).await?;
        if ehlo.is(codes::OK) {
            self.extensions = ehlo.lines.into_iter().skip(1).collect();
            return Ok(());
        }

        tracing::debug!(code = ehlo.code, "EHLO refused, falling back to HELO");
        self.extensions.clear();
        let helo = self.command(&format!("HELO {}", self.hello_name)).await?;
        if !helo.is(codes::OK) {
            return Err(TransportError::Greeting {
                code: helo.code,
                detail: helo.detail(),
            });
        }
        Ok(())
    }

    async fn command(&mut self, line: &str) -> Result<Reply> {
        let verb = line.split_whitespace().next().unwrap_or_default();
        self.exchange(line, verb).await
    }

    /// Sends a line whose content must not reach the logs.
    async fn command_secret(&mut self, line: &str) -> Result<Reply> {
        self.exchange(line, "<credentials>").await
    }

    async fn exchange(&mut self, line: &str, log_as: &str) -> Result<Reply> {
        self.write(format!("{line}\r\n").as_bytes()).await?;
        let reply = self.read_reply().await?;
        tracing::debug!(command = log_as, code = reply.code, "SMTP exchange");
        Ok(reply)
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        stream.write_all(data).await?;
        Ok(())
    }

    async fn read_reply(&mut self) -> Result<Reply> {
        loop {
            if let Some((reply, consumed)) = Reply::parse(&self.buffer)? {
                self.buffer.drain(..consumed);
                return Ok(reply);
            }

            if self.buffer.len() >= MAX_REPLY_SIZE {
                return Err(TransportError::MalformedReply(format!(
                    "reply exceeds {MAX_REPLY_SIZE} bytes"
                )));
            }

            let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
            let mut chunk = [0u8; READ_CHUNK];
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(TransportError::Closed);
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    async fn reset(&mut self) -> Result<()> {
        let reply = self.command("RSET").await?;
        if !reply.is(codes::OK) {
            tracing::debug!(code = reply.code, "RSET not acknowledged");
        }
        Ok(())
    }

    async fn auth_plain(&mut self, user: &str, secret: &str) -> Result<Reply> {
        let token = STANDARD.encode(format!("\0{user}\0{secret}"));
        self.command_secret(&format!("AUTH PLAIN {token}")).await
    }

    async fn auth_login(&mut self, user: &str, secret: &str) -> Result<Reply> {
        let reply = self.command("AUTH LOGIN").await?;
        if !reply.is(codes::AUTH_CONTINUE) {
            return Ok(reply);
        }

        let reply = self.command_secret(&STANDARD.encode(user)).await?;
        if !reply.is(codes::AUTH_CONTINUE) {
            return Ok(reply);
        }

        self.command_secret(&STANDARD.encode(secret)).await
    }
}

#[async_trait]
impl Connection for SmtpConnection {
    async fn upgrade_to_tls(&mut self) -> Result<Reply> {
        let reply = self.command("STARTTLS").await?;
        if !reply.is(codes::READY) {
            return Ok(reply);
        }

        let tcp = match self.stream.take() {
            Some(Stream::Plain(tcp)) => tcp,
            Some(tls @ Stream::Tls(_)) => {
                self.stream = Some(tls);
                return Err(TransportError::Tls("connection is already encrypted".into()));
            }
            None => return Err(TransportError::Closed),
        };

        let server_name = ServerName::try_from(self.host.clone())
            .map_err(|e| TransportError::Tls(format!("invalid server name: {e}")))?;
        let connector = TlsConnector::from(Arc::clone(&self.tls_config));
        let tls = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| TransportError::Tls(format!("TLS handshake failed: {e}")))?;

        self.stream = Some(Stream::Tls(Box::new(tls)));
        self.buffer.clear();
        tracing::debug!(host = %self.host, "TLS established");

        self.hello().await?;
        Ok(reply)
    }

    async fn authenticate(&mut self, user: &str, secret: &str) -> Result<Reply> {
        let mechanisms = self.auth_mechanisms();
        let only_login = !mechanisms.is_empty()
            && !mechanisms.iter().any(|m| m == "PLAIN")
            && mechanisms.iter().any(|m| m == "LOGIN");

        if only_login {
            self.auth_login(user, secret).await
        } else {
            self.auth_plain(user, secret).await
        }
    }

    async fn submit(
        &mut self,
        from: &str,
        to: &[String],
        document: &[u8],
    ) -> Result<Vec<Rejection>> {
        if self.in_transaction {
            return Err(TransportError::Desynchronized);
        }

        self.in_transaction = true;
        let rejected = self.transaction(from, to, document).await?;
        self.in_transaction = false;
        Ok(rejected)
    }

    async fn terminate(&mut self) -> Result<Reply> {
        if self.in_transaction {
            tracing::debug!(host = %self.host, "Skipping QUIT on an interrupted transaction");
            self.shutdown().await;
            return Err(TransportError::Desynchronized);
        }

        let reply = self.command("QUIT").await;
        self.shutdown().await;
        reply
    }
}

impl SmtpConnection {
    /// Runs `MAIL FROM` through the end of `DATA`.
    async fn transaction(
        &mut self,
        from: &str,
        to: &[String],
        document: &[u8],
    ) -> Result<Vec<Rejection>> {
        let mail = self.command(&format!("MAIL FROM:<{from}>")).await?;
        if !mail.is(codes::OK) {
            self.reset().await?;
            return Ok(reject_all(to.iter(), &mail));
        }

        let mut accepted = Vec::with_capacity(to.len());
        let mut rejected = Vec::new();
        for recipient in to {
            let reply = self.command(&format!("RCPT TO:<{recipient}>")).await?;
            if reply.is(codes::OK) || reply.is(codes::WILL_FORWARD) {
                accepted.push(recipient);
            } else {
                tracing::warn!(recipient = %recipient, code = reply.code, "recipient refused");
                rejected.push(Rejection::new(recipient.as_str(), reply.code, reply.detail()));
            }
        }

        if accepted.is_empty() {
            self.reset().await?;
            return Ok(rejected);
        }

        let data = self.command("DATA").await?;
        if !data.is(codes::START_MAIL_INPUT) {
            self.reset().await?;
            rejected.extend(reject_all(accepted.into_iter(), &data));
            return Ok(rejected);
        }

        self.write(&dot_stuff(document)).await?;
        let reply = self.read_reply().await?;
        tracing::debug!(command = "<message>", code = reply.code, "SMTP exchange");
        if !reply.is(codes::OK) {
            rejected.extend(reject_all(accepted.into_iter(), &reply));
        }

        Ok(rejected)
    }

    async fn shutdown(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                tracing::debug!(error = %e, "Socket shutdown failed");
            }
        }
    }
}

fn reject_all<'a>(recipients: impl Iterator<Item = &'a String>, reply: &Reply) -> Vec<Rejection> {
    recipients
        .map(|r| Rejection::new(r.as_str(), reply.code, reply.detail()))
        .collect()
}

/// Escapes leading dots and appends the end-of-data marker.
pub(crate) fn dot_stuff(document: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(document.len() + 8);
    let mut line_start = true;

    for &byte in document {
        if line_start && byte == b'.' {
            out.push(b'.');
        }
        out.push(byte);
        line_start = byte == b'\n';
    }

    if !out.is_empty() && !out.ends_with(b"\r\n") {
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b".\r\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_stuff_escapes_leading_dots() {
        let stuffed = dot_stuff(b"Subject: x\r\n\r\n.hidden\r\nfine.\r\n..two\r\n");
        assert_eq!(
            stuffed,
            b"Subject: x\r\n\r\n..hidden\r\nfine.\r\n...two\r\n.\r\n".to_vec()
        );
    }

    #[test]
    fn dot_stuff_terminates_unterminated_document() {
        assert_eq!(dot_stuff(b"body"), b"body\r\n.\r\n".to_vec());
        assert_eq!(dot_stuff(b""), b".\r\n".to_vec());
    }

    #[test]
    fn dot_stuff_escapes_first_byte() {
        assert_eq!(dot_stuff(b".\r\n"), b"..\r\n.\r\n".to_vec());
    }

    #[test]
    fn reject_all_copies_reply() {
        let to = vec!["a@example.com".to_string(), "b@example.com".to_string()];
        let rejected = reject_all(to.iter(), &Reply::new(554, "transaction failed"));

        assert_eq!(rejected.len(), 2);
        assert_eq!(rejected[1], Rejection::new("b@example.com", 554, "transaction failed"));
    }

    #[test]
    fn default_connector_identity() {
        assert_eq!(SmtpConnector::default().hello_name(), "localhost");
        assert_eq!(SmtpConnector::new("mx.local").hello_name(), "mx.local");
    }
}
