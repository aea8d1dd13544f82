//! Message transports.
//!
//! A transport delivers one rendered message. The mailer calls it once per
//! row and treats any error as that row's failure.
//!
//! - `SmtpTransport`: delivery through an SMTP relay
//! - `LogTransport`: dry run, every message is logged instead of sent
//! - `MemoryTransport`: in-memory recorder for tests and embedding

mod log;
mod memory;
mod smtp;

pub use log::LogTransport;
pub use memory::MemoryTransport;
pub use smtp::{ContentType, SmtpConfig, SmtpTransport, TlsMode};

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::BoxError;

/// A fully rendered message for one recipient
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedMail {
    pub subject: String,
    pub from: String,
    pub to: String,
    pub body: Vec<u8>,
}

impl RenderedMail {
    /// Body as text, replacing invalid UTF-8 sequences
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Delivers a single rendered message.
///
/// `cancel` is the batch cancellation signal. Implementations should not
/// begin a delivery once it is cancelled; a delivery already in progress
/// may run to completion.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, cancel: &CancellationToken, mail: &RenderedMail) -> Result<(), BoxError>;

    /// Transport name, used in logs
    fn name(&self) -> &'static str;
}
