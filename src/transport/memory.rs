//! In-memory transport that records every message

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::{RenderedMail, Transport};
use crate::error::BoxError;

/// Transport that keeps delivered messages in memory.
///
/// Tracks the highest number of concurrent `send` calls observed, and can
/// be told to fail for given recipients or to hold each send for a while.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    sent: Mutex<Vec<RenderedMail>>,
    attempts: Mutex<Vec<String>>,
    failures: HashMap<String, String>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every send for `delay` before completing it
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail sends addressed to `recipient` with `message`
    pub fn failing_for(mut self, recipient: impl Into<String>, message: impl Into<String>) -> Self {
        self.failures.insert(recipient.into(), message.into());
        self
    }

    /// Messages delivered successfully, in completion order
    pub async fn sent(&self) -> Vec<RenderedMail> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_count(&self) -> usize {
        self.sent.lock().await.len()
    }

    /// Recipients of every send that was started, failed ones included
    pub async fn attempted(&self) -> Vec<String> {
        self.attempts.lock().await.clone()
    }

    pub async fn was_sent_to(&self, recipient: &str) -> bool {
        self.sent.lock().await.iter().any(|m| m.to == recipient)
    }

    /// Highest number of sends that were in progress at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub async fn clear(&self) {
        self.sent.lock().await.clear();
        self.attempts.lock().await.clear();
        self.max_in_flight.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, cancel: &CancellationToken, mail: &RenderedMail) -> Result<(), BoxError> {
        if cancel.is_cancelled() {
            return Err("send cancelled".into());
        }

        self.attempts.lock().await.push(mail.to.clone());

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(message) = self.failures.get(&mail.to) {
            return Err(message.clone().into());
        }

        self.sent.lock().await.push(mail.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mail(to: &str) -> RenderedMail {
        RenderedMail {
            subject: "Test Subject".to_string(),
            from: "sender@mail.com".to_string(),
            to: to.to_string(),
            body: b"Test body".to_vec(),
        }
    }

    #[tokio::test]
    async fn test_memory_transport_records_mail() {
        let transport = MemoryTransport::new();
        transport
            .send(&CancellationToken::new(), &mail("test@example.com"))
            .await
            .unwrap();

        let sent = transport.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "test@example.com");
        assert!(transport.was_sent_to("test@example.com").await);
        assert!(!transport.was_sent_to("other@example.com").await);
    }

    #[tokio::test]
    async fn test_memory_transport_injected_failure() {
        let transport = MemoryTransport::new().failing_for("bad@example.com", "mailbox unavailable");

        let err = transport
            .send(&CancellationToken::new(), &mail("bad@example.com"))
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "mailbox unavailable");
        assert_eq!(transport.sent_count().await, 0);
        assert_eq!(transport.attempted().await, vec!["bad@example.com".to_string()]);
    }

    #[tokio::test]
    async fn test_memory_transport_cancelled() {
        let transport = MemoryTransport::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(transport.send(&cancel, &mail("a@b.c")).await.is_err());
        assert!(transport.attempted().await.is_empty());
    }

    #[tokio::test]
    async fn test_memory_transport_clear() {
        let transport = MemoryTransport::new();
        transport.send(&CancellationToken::new(), &mail("a@b.c")).await.unwrap();
        assert_eq!(transport.max_in_flight(), 1);

        transport.clear().await;
        assert_eq!(transport.sent_count().await, 0);
        assert_eq!(transport.max_in_flight(), 0);
    }
}
