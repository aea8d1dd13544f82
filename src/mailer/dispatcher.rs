use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::error::{MailMergeError, Result};
use crate::metrics::MailMetrics;
use crate::table::Row;
use crate::transport::RenderedMail;

use super::{resolve_subject, MailerConfig, Prepared, MANDATORY_FIELD};

/// Result of a batch in which every row was sent
#[derive(Debug, Clone, Serialize)]
pub struct SendReport {
    /// Batch identifier, also present on the batch tracing span
    pub batch_id: Uuid,
    /// Rows in the table
    pub total: usize,
    /// Rows accepted by the transport
    pub sent: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Counters for one batch
#[derive(Debug, Default)]
struct BatchStats {
    sent: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
}

/// Slot holding the first error of a batch.
///
/// Only the caller that wins the compare-exchange stores its error; every
/// later error is dropped.
#[derive(Debug, Default)]
struct FirstError {
    claimed: AtomicBool,
    error: Mutex<Option<MailMergeError>>,
}

impl FirstError {
    fn record(&self, error: MailMergeError) -> bool {
        if self
            .claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(error = %error, "Discarding error after first failure");
            return false;
        }

        *self.error.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
        true
    }

    fn take(&self) -> Option<MailMergeError> {
        self.error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Cancels the batch when a row task unwinds, before its permit is released
struct CancelOnPanic(CancellationToken);

impl Drop for CancelOnPanic {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.cancel();
        }
    }
}

enum RowOutcome {
    Sent,
    Skipped,
}

/// Renders and sends one row
struct RowJob {
    position: usize,
    prepared: Arc<Prepared>,
    config: Arc<MailerConfig>,
}

impl RowJob {
    async fn run(&self, token: &CancellationToken) -> Result<RowOutcome> {
        if token.is_cancelled() {
            return Ok(RowOutcome::Skipped);
        }

        let row = &self.prepared.table.rows()[self.position];
        let mail = match self.render(row) {
            Ok(mail) => mail,
            Err(err) => {
                MailMetrics::record_render_failed();
                return Err(err);
            }
        };

        // Rendering may have raced a failure elsewhere
        if token.is_cancelled() {
            return Ok(RowOutcome::Skipped);
        }

        MailMetrics::send_started();
        let started = Instant::now();
        let result = self.config.transport.send(token, &mail).await;
        MailMetrics::send_finished();

        match result {
            Ok(()) => {
                MailMetrics::record_sent(started.elapsed());
                tracing::debug!(to = %mail.to, "Mail sent");
                Ok(RowOutcome::Sent)
            }
            // Failures after cancellation count as skipped rows
            Err(_) if token.is_cancelled() => {
                tracing::debug!(to = %mail.to, "Send abandoned after cancellation");
                Ok(RowOutcome::Skipped)
            }
            Err(source) => {
                MailMetrics::record_transport_failed(started.elapsed());
                Err(MailMergeError::Transport {
                    recipient: mail.to,
                    source,
                })
            }
        }
    }

    fn render(&self, row: &Row) -> Result<RenderedMail> {
        let context = row.as_context();

        let body = self.prepared.body.render(&context)?;
        let subject = match &self.prepared.subject {
            Some(template) => template.render_string(&context)?,
            None => String::new(),
        };

        Ok(RenderedMail {
            subject: resolve_subject(subject, &self.config.default_subject),
            from: self.config.sender.clone(),
            to: row.get_cell(MANDATORY_FIELD).to_string(),
            body,
        })
    }
}

/// Sends every row of a prepared table under the concurrency bound
pub(crate) struct BatchDispatcher {
    prepared: Arc<Prepared>,
    config: Arc<MailerConfig>,
}

impl BatchDispatcher {
    pub(crate) fn new(prepared: Arc<Prepared>, config: Arc<MailerConfig>) -> Self {
        Self { prepared, config }
    }

    /// Run one batch.
    ///
    /// The first failing row cancels the batch: rows not yet started are
    /// skipped, rows in flight finish, and the first error is returned once
    /// every started task has completed.
    #[tracing::instrument(
        name = "mailer.batch",
        skip(self, batch_id, cancel),
        fields(
            batch_id = %batch_id,
            rows = self.prepared.table.len(),
            concurrency = self.config.effective_concurrency(),
            transport = self.config.transport.name()
        )
    )]
    pub(crate) async fn run(&self, batch_id: Uuid, cancel: &CancellationToken) -> Result<SendReport> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let total = self.prepared.table.len();

        let semaphore = Arc::new(Semaphore::new(self.config.effective_concurrency()));
        let token = cancel.child_token();
        let first_error = Arc::new(FirstError::default());
        let stats = Arc::new(BatchStats::default());
        let mut tasks = JoinSet::new();
        let mut scheduled = 0;

        for position in 0..total {
            let permit = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            scheduled += 1;

            let job = RowJob {
                position,
                prepared: Arc::clone(&self.prepared),
                config: Arc::clone(&self.config),
            };
            let token = token.clone();
            let first_error = Arc::clone(&first_error);
            let stats = Arc::clone(&stats);

            tasks.spawn(
                async move {
                    let _permit = permit;
                    let _cancel_on_panic = CancelOnPanic(token.clone());
                    match job.run(&token).await {
                        Ok(RowOutcome::Sent) => {
                            stats.sent.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(RowOutcome::Skipped) => {
                            stats.skipped.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(error) => {
                            stats.failed.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!(error = %error, kind = error.kind(), "Row failed");
                            if first_error.record(error) {
                                token.cancel();
                            }
                        }
                    }
                }
                .instrument(tracing::debug_span!("mailer.row", position)),
            );
        }

        stats.skipped.fetch_add(total - scheduled, Ordering::Relaxed);

        while let Some(joined) = tasks.join_next().await {
            if let Err(join_error) = joined {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                if first_error.record(MailMergeError::Worker(join_error)) {
                    token.cancel();
                }
            }
        }

        let sent = stats.sent.load(Ordering::Relaxed);
        let failed = stats.failed.load(Ordering::Relaxed);
        let skipped = stats.skipped.load(Ordering::Relaxed);
        MailMetrics::record_skipped(skipped);
        MailMetrics::record_batch(clock.elapsed());

        if let Some(error) = first_error.take() {
            tracing::warn!(
                sent = sent,
                failed = failed,
                skipped = skipped,
                error = %error,
                "Batch aborted"
            );
            return Err(error);
        }

        if skipped > 0 {
            tracing::warn!(sent = sent, skipped = skipped, "Batch cancelled");
            return Err(MailMergeError::Cancelled);
        }

        tracing::info!(
            sent = sent,
            elapsed_ms = clock.elapsed().as_millis() as u64,
            "Batch completed"
        );

        Ok(SendReport {
            batch_id,
            total,
            sent,
            started_at,
            finished_at: Utc::now(),
        })
    }
}
