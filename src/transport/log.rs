use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{RenderedMail, Transport};
use crate::error::BoxError;

/// Dry-run transport: logs each message and reports success
#[derive(Debug, Default, Clone)]
pub struct LogTransport {
    include_body: bool,
}

impl LogTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also log the rendered body
    pub fn with_body(mut self) -> Self {
        self.include_body = true;
        self
    }
}

#[async_trait]
impl Transport for LogTransport {
    async fn send(&self, cancel: &CancellationToken, mail: &RenderedMail) -> Result<(), BoxError> {
        if cancel.is_cancelled() {
            return Err("send cancelled".into());
        }

        if self.include_body {
            tracing::info!(
                from = %mail.from,
                to = %mail.to,
                subject = %mail.subject,
                body = %mail.body_text(),
                "Dry run: message not sent"
            );
        } else {
            tracing::info!(
                from = %mail.from,
                to = %mail.to,
                subject = %mail.subject,
                body_bytes = mail.body.len(),
                "Dry run: message not sent"
            );
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
