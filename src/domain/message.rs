//! Deferred message composition.
//!
//! A [`MessageBuilder`] records what should go into a message without doing
//! any I/O. The document is only materialized by [`MessageBuilder::compile`],
//! which reads attachments from disk at that moment. The same builder can be
//! compiled any number of times, for example once per recipient.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::Message;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// One queued content operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ContentOperation {
    /// Append a text/plain body part.
    Text(String),
    /// Append the file at this path as a binary attachment.
    Attachment(String),
}

impl ContentOperation {
    /// Materializes this operation into a MIME part.
    async fn render(&self) -> Result<SinglePart> {
        match self {
            Self::Text(body) => Ok(SinglePart::plain(body.clone())),
            Self::Attachment(path) => {
                let content = tokio::fs::read(path)
                    .await
                    .map_err(|source| Error::AttachmentRead {
                        path: PathBuf::from(path),
                        source,
                    })?;
                let content_type = ContentType::parse("application/octet-stream")
                    .map_err(|e| Error::Compose(e.to_string()))?;

                // The filename is the queued path, directories included.
                Ok(Attachment::new(path.clone()).body(content, content_type))
            }
        }
    }
}

/// An email under construction.
///
/// # Example
///
/// ```ignore
/// use postbox::domain::MessageBuilder;
///
/// let mut message = MessageBuilder::new("Quarterly report");
/// message.add_text("Numbers attached.").add_attachment("reports/q3.pdf");
///
/// let document = message.compile("me@example.com", "boss@example.com").await?;
/// ```
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    subject: Option<String>,
    operations: Vec<ContentOperation>,
    /// Stamped into the `Date` header.
    created_at: DateTime<Utc>,
    /// Seeds the multipart boundary and per-recipient Message-IDs.
    id: Uuid,
}

impl MessageBuilder {
    /// Creates a builder with the given subject.
    pub fn new(subject: impl Into<String>) -> Self {
        Self::with_subject(Some(subject.into()))
    }

    /// Creates a builder with an optional subject.
    pub fn with_subject(subject: Option<String>) -> Self {
        Self {
            subject,
            operations: Vec::new(),
            created_at: Utc::now(),
            id: Uuid::new_v4(),
        }
    }

    /// Appends a text body part.
    pub fn add_text(&mut self, body: impl Into<String>) -> &mut Self {
        self.operations.push(ContentOperation::Text(body.into()));
        self
    }

    /// Queues the file at `path` as an attachment.
    ///
    /// The file is not touched until the message is compiled, so it need not
    /// exist yet.
    pub fn add_attachment(&mut self, path: impl Into<String>) -> &mut Self {
        self.operations
            .push(ContentOperation::Attachment(path.into()));
        self
    }

    /// Returns the subject, if any.
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    /// Returns the queued operations in insertion order.
    pub fn operations(&self) -> &[ContentOperation] {
        &self.operations
    }

    /// Returns the number of queued operations.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Returns true if nothing has been queued.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Compiles the message into a transmittable RFC 5322 document.
    ///
    /// Parts appear in the order they were added. Every queued attachment is
    /// read from disk on each call. Compiling twice with the same addresses
    /// and unchanged files yields identical bytes.
    ///
    /// # Errors
    ///
    /// - [`Error::AttachmentRead`] if a queued file cannot be read
    /// - [`Error::InvalidAddress`] if `sender` or `receiver` is not a mailbox.
    ///   This is a limit of the MIME encoder, which needs parseable `From` and
    ///   `To` headers, not address validation.
    /// - [`Error::Compose`] if the encoder rejects the message
    pub async fn compile(&self, sender: &str, receiver: &str) -> Result<Vec<u8>> {
        let from = parse_mailbox(sender)?;
        let to = parse_mailbox(receiver)?;
        let message_id = self.message_id(&from, &to);

        let mut parts = Vec::with_capacity(self.operations.len());
        for operation in &self.operations {
            parts.push(operation.render().await?);
        }

        let mut builder = Message::builder()
            .from(from)
            .to(to)
            .date(self.created_at.into())
            .message_id(Some(message_id));
        if let Some(subject) = &self.subject {
            builder = builder.subject(subject.clone());
        }

        let mut parts = parts.into_iter();
        let message = match parts.next() {
            None => builder.header(ContentType::TEXT_PLAIN).body(String::new()),
            Some(first) => {
                let body = parts.fold(
                    MultiPart::mixed().boundary(self.boundary()).singlepart(first),
                    MultiPart::singlepart,
                );
                builder.multipart(body)
            }
        }
        .map_err(|e| Error::Compose(e.to_string()))?;

        Ok(message.formatted())
    }

    fn boundary(&self) -> String {
        format!("postbox-{}", self.id.simple())
    }

    /// Stable per (builder, sender, receiver), distinct across receivers.
    fn message_id(&self, from: &Mailbox, to: &Mailbox) -> String {
        let name = format!("{}\n{}", from.email, to.email);
        let unique = Uuid::new_v5(&self.id, name.as_bytes());
        format!("<{}@{}>", unique.simple(), from.email.domain())
    }
}

impl Default for MessageBuilder {
    fn default() -> Self {
        Self::with_subject(None)
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox> {
    address.parse().map_err(|e: lettre::address::AddressError| Error::InvalidAddress {
        address: address.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mail_parser::{MessageParser, MimeHeaders};
    use pretty_assertions::assert_eq;

    const SENDER: &str = "sender@example.com";
    const RECEIVER: &str = "receiver@example.org";

    fn find(haystack: &[u8], needle: &str) -> Option<usize> {
        haystack
            .windows(needle.len())
            .position(|w| w == needle.as_bytes())
    }

    #[test]
    fn queueing_does_not_touch_files() {
        let mut message = MessageBuilder::new("Later");
        message
            .add_text("first")
            .add_attachment("/definitely/not/here.bin")
            .add_text("");

        assert_eq!(
            message.operations(),
            &[
                ContentOperation::Text("first".into()),
                ContentOperation::Attachment("/definitely/not/here.bin".into()),
                ContentOperation::Text(String::new()),
            ]
        );
        assert_eq!(message.len(), 3);
        assert_eq!(message.subject(), Some("Later"));
    }

    #[test]
    fn default_builder_has_no_subject() {
        let message = MessageBuilder::default();
        assert!(message.is_empty());
        assert_eq!(message.subject(), None);
    }

    #[tokio::test]
    async fn compile_sets_headers() {
        let mut message = MessageBuilder::new("Hi");
        message.add_text("body");

        let document = message.compile(SENDER, RECEIVER).await.unwrap();
        let parsed = MessageParser::default().parse(&document).unwrap();

        assert_eq!(parsed.subject(), Some("Hi"));
        assert_eq!(
            parsed.from().and_then(|a| a.first()).and_then(|a| a.address()),
            Some(SENDER)
        );
        assert_eq!(
            parsed.to().and_then(|a| a.first()).and_then(|a| a.address()),
            Some(RECEIVER)
        );
        assert_eq!(
            parsed.body_text(0).as_deref().map(str::trim_end),
            Some("body")
        );
    }

    #[tokio::test]
    async fn compile_is_repeatable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, [0u8, 159, 146, 150, 255]).unwrap();

        let mut message = MessageBuilder::new("Twice");
        message
            .add_text("hello")
            .add_attachment(path.to_string_lossy());

        let first = message.compile(SENDER, RECEIVER).await.unwrap();
        let second = message.compile(SENDER, RECEIVER).await.unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn compile_preserves_operation_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f1.txt");
        std::fs::write(&path, b"attachment bytes").unwrap();

        let mut message = MessageBuilder::new("Order");
        message
            .add_text("alpha-marker")
            .add_attachment(path.to_string_lossy())
            .add_text("omega-marker");

        let document = message.compile(SENDER, RECEIVER).await.unwrap();

        let alpha = find(&document, "alpha-marker").unwrap();
        let attachment = find(&document, "Content-Disposition: attachment").unwrap();
        let omega = find(&document, "omega-marker").unwrap();
        assert!(alpha < attachment, "text part must precede attachment");
        assert!(attachment < omega, "attachment must precede trailing text");
    }

    #[tokio::test]
    async fn attachment_keeps_path_as_filename() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("reports");
        std::fs::create_dir(&nested).unwrap();
        let path = nested.join("q3.bin");
        std::fs::write(&path, b"\x00\x01binary\xff").unwrap();
        let path = path.to_string_lossy().into_owned();

        let mut message = MessageBuilder::new("Report");
        message.add_attachment(path.clone());

        let document = message.compile(SENDER, RECEIVER).await.unwrap();
        let parsed = MessageParser::default().parse(&document).unwrap();
        let attachment = parsed.attachments().next().unwrap();

        assert_eq!(attachment.attachment_name(), Some(path.as_str()));
        assert_eq!(attachment.contents(), b"\x00\x01binary\xff");
    }

    #[tokio::test]
    async fn missing_attachment_fails_at_compile_time() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.pdf").to_string_lossy().into_owned();

        let mut message = MessageBuilder::new("Broken");
        message.add_text("before").add_attachment(missing.clone());
        let before = message.operations().to_vec();

        let err = message.compile(SENDER, RECEIVER).await.unwrap_err();

        match err {
            Error::AttachmentRead { path, .. } => assert_eq!(path, PathBuf::from(&missing)),
            other => panic!("expected AttachmentRead, got {other:?}"),
        }
        assert_eq!(message.operations(), before.as_slice());
    }

    #[tokio::test]
    async fn attachment_created_after_queueing_is_picked_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("late.txt");

        let mut message = MessageBuilder::new("Late");
        message.add_attachment(path.to_string_lossy());
        assert!(message.compile(SENDER, RECEIVER).await.is_err());

        std::fs::write(&path, b"now it exists").unwrap();
        assert!(message.compile(SENDER, RECEIVER).await.is_ok());
    }

    #[tokio::test]
    async fn receivers_get_distinct_message_ids() {
        let mut message = MessageBuilder::new("Broadcast");
        message.add_text("same body");

        let a = message.compile(SENDER, "a@example.org").await.unwrap();
        let b = message.compile(SENDER, "b@example.org").await.unwrap();

        let id_a = MessageParser::default().parse(&a).unwrap().message_id().map(str::to_owned);
        let id_b = MessageParser::default().parse(&b).unwrap().message_id().map(str::to_owned);
        assert!(id_a.is_some());
        assert_ne!(id_a, id_b);
    }

    #[tokio::test]
    async fn empty_builder_compiles_to_plain_document() {
        let message = MessageBuilder::default();
        let document = message.compile(SENDER, RECEIVER).await.unwrap();
        let parsed = MessageParser::default().parse(&document).unwrap();

        assert_eq!(parsed.subject(), None);
        assert!(find(&document, "multipart").is_none());
    }

    #[tokio::test]
    async fn invalid_address_is_reported() {
        let message = MessageBuilder::new("Oops");
        let err = message.compile("not an address", RECEIVER).await.unwrap_err();

        assert!(matches!(err, Error::InvalidAddress { ref address, .. } if address == "not an address"));
    }
}
