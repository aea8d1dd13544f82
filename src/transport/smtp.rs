//! SMTP transport using lettre

use std::time::Duration;

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType as ContentTypeHeader, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::{RenderedMail, Transport};
use crate::error::BoxError;

/// How the connection to the relay is secured
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    /// Plain connection upgraded with STARTTLS
    #[default]
    Starttls,
    /// Implicit TLS (usually port 465)
    Tls,
    /// No encryption, for local relays such as Mailpit
    None,
}

/// Content type of the rendered body
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum ContentType {
    #[default]
    #[serde(rename = "text/plain")]
    Plain,
    #[serde(rename = "text/html")]
    Html,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub tls: TlsMode,
    /// Connection timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub content_type: ContentType,
}

fn default_port() -> u16 {
    587
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            username: None,
            password: None,
            tls: TlsMode::default(),
            timeout_secs: default_timeout_secs(),
            content_type: ContentType::default(),
        }
    }
}

/// Delivers rendered mail through an SMTP relay
pub struct SmtpTransport {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    content_type: ContentType,
}

impl SmtpTransport {
    /// Build the transport; no connection is opened until the first send.
    pub fn new(config: &SmtpConfig) -> Result<Self, lettre::transport::smtp::Error> {
        let mut builder = match config.tls {
            TlsMode::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host),
            TlsMode::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)?,
            TlsMode::Starttls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?,
        };

        builder = builder
            .port(config.port)
            .timeout(Some(Duration::from_secs(config.timeout_secs)));

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            content_type: config.content_type,
        })
    }

    fn build_message(&self, mail: &RenderedMail) -> Result<Message, BoxError> {
        let from: Mailbox = mail.from.parse()?;
        let to: Mailbox = mail.to.parse()?;

        let content_type = match self.content_type {
            ContentType::Plain => ContentTypeHeader::TEXT_PLAIN,
            ContentType::Html => ContentTypeHeader::TEXT_HTML,
        };

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(mail.subject.clone())
            .header(content_type)
            .body(mail.body_text())?;

        Ok(message)
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn send(&self, cancel: &CancellationToken, mail: &RenderedMail) -> Result<(), BoxError> {
        let message = self.build_message(mail)?;

        if cancel.is_cancelled() {
            return Err("send cancelled".into());
        }

        let response = self.transport.send(message).await?;
        tracing::debug!(
            to = %mail.to,
            code = %response.code(),
            "SMTP relay accepted message"
        );

        Ok(())
    }

    fn name(&self) -> &'static str {
        "smtp"
    }
}
