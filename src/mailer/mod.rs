//! Mail merge orchestration.
//!
//! A `Mailer` moves through `Unparsed -> Parsed -> Sending -> Sent | Failed`:
//! - `parse()` loads the recipient table, checks the `email` column and
//!   compiles the body and subject templates
//! - `send_all()` renders every row and hands it to the transport, with at
//!   most `concurrency` rows in progress at once
//!
//! # Example
//!
//! ```ignore
//! let config = MailerConfig::new("sender@mail.com", Arc::new(MemoryTransport::new()))
//!     .with_default_subject("Welcome")
//!     .with_concurrency(4);
//! let sources = MergeSources::new(csv.as_bytes(), body.as_bytes());
//!
//! let mut mailer = Mailer::new(config, sources);
//! mailer.parse()?;
//! let report = mailer.send_all(&CancellationToken::new()).await?;
//! ```

mod dispatcher;

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use dispatcher::SendReport;

use crate::error::{MailMergeError, Result};
use crate::metrics::ParseMetrics;
use crate::table::Table;
use crate::template::{CompiledTemplate, FilterRegistry};
use crate::transport::Transport;
use dispatcher::BatchDispatcher;

/// Column every recipient table must declare
pub const MANDATORY_FIELD: &str = "email";

const BODY_TEMPLATE: &str = "body";
const SUBJECT_TEMPLATE: &str = "subject";

/// Use the rendered subject unless it is empty
pub fn resolve_subject(rendered: String, default_subject: &str) -> String {
    if rendered.is_empty() {
        default_subject.to_string()
    } else {
        rendered
    }
}

/// Immutable mailer configuration
pub struct MailerConfig {
    /// Sender address placed on every message
    pub sender: String,
    /// Subject used when the subject template renders empty or is absent
    pub default_subject: String,
    /// Maximum rows in progress at once; 0 behaves as 1
    pub concurrency: usize,
    pub transport: Arc<dyn Transport>,
    pub filters: FilterRegistry,
}

impl MailerConfig {
    pub fn new(sender: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            sender: sender.into(),
            default_subject: String::new(),
            concurrency: 1,
            transport,
            filters: FilterRegistry::with_defaults(),
        }
    }

    pub fn with_default_subject(mut self, subject: impl Into<String>) -> Self {
        self.default_subject = subject.into();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Add a filter for this mailer's templates, replacing one of the same name
    pub fn with_filter<F>(mut self, name: impl Into<String>, filter: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.filters.register(name, filter);
        self
    }

    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.max(1)
    }
}

impl fmt::Debug for MailerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailerConfig")
            .field("sender", &self.sender)
            .field("default_subject", &self.default_subject)
            .field("concurrency", &self.concurrency)
            .field("transport", &self.transport.name())
            .field("filters", &self.filters)
            .finish()
    }
}

type Source = Box<dyn Read + Send>;

/// Raw inputs consumed by `Mailer::parse`
pub struct MergeSources {
    csv: Source,
    body: Source,
    subject: Option<Source>,
}

impl MergeSources {
    pub fn new<C, B>(csv: C, body: B) -> Self
    where
        C: Read + Send + 'static,
        B: Read + Send + 'static,
    {
        Self {
            csv: Box::new(csv),
            body: Box::new(body),
            subject: None,
        }
    }

    pub fn with_subject<S>(mut self, subject: S) -> Self
    where
        S: Read + Send + 'static,
    {
        self.subject = Some(Box::new(subject));
        self
    }

    /// Open the recipient list and template files
    pub fn open(csv: &Path, body: &Path, subject: Option<&Path>) -> io::Result<Self> {
        let mut sources = Self::new(File::open(csv)?, File::open(body)?);
        if let Some(subject) = subject {
            sources = sources.with_subject(File::open(subject)?);
        }
        Ok(sources)
    }
}

impl fmt::Debug for MergeSources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeSources")
            .field("has_subject", &self.subject.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Unparsed,
    Parsed,
    Sending,
    Sent,
    Failed,
}

/// Parsed table and compiled templates, shared read-only by row tasks
#[derive(Debug)]
pub(crate) struct Prepared {
    pub(crate) table: Table,
    pub(crate) body: CompiledTemplate,
    pub(crate) subject: Option<CompiledTemplate>,
}

pub struct Mailer {
    config: Arc<MailerConfig>,
    sources: Option<MergeSources>,
    prepared: Option<Arc<Prepared>>,
    phase: Phase,
}

impl Mailer {
    pub fn new(config: MailerConfig, sources: MergeSources) -> Self {
        Self {
            config: Arc::new(config),
            sources: Some(sources),
            prepared: None,
            phase: Phase::Unparsed,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &MailerConfig {
        &self.config
    }

    /// Recipient table, once parsed
    pub fn table(&self) -> Option<&Table> {
        self.prepared.as_deref().map(|prepared| &prepared.table)
    }

    /// Parse the recipient table and compile the templates.
    ///
    /// On failure nothing is kept and the mailer stays `Unparsed`. Sources
    /// are consumed by the first call.
    #[tracing::instrument(name = "mailer.parse", skip(self))]
    pub fn parse(&mut self) -> Result<()> {
        if self.prepared.is_some() {
            return Err(MailMergeError::AlreadyParsed);
        }
        let sources = self.sources.take().ok_or(MailMergeError::SourcesConsumed)?;

        match prepare(sources, &self.config.filters) {
            Ok(prepared) => {
                ParseMetrics::record_rows(prepared.table.len());
                tracing::info!(
                    rows = prepared.table.len(),
                    columns = prepared.table.headers().len(),
                    has_subject = prepared.subject.is_some(),
                    "Sources parsed"
                );
                self.prepared = Some(Arc::new(prepared));
                self.phase = Phase::Parsed;
                Ok(())
            }
            Err(err) => {
                ParseMetrics::record_failure(err.kind());
                tracing::warn!(error = %err, kind = err.kind(), "Parse failed");
                Err(err)
            }
        }
    }

    /// Render and send one message per row.
    ///
    /// Returns the first row error, after every started row has finished.
    /// Cancelling `cancel` stops rows that have not started yet.
    #[tracing::instrument(name = "mailer.send_all", skip(self, cancel))]
    pub async fn send_all(&mut self, cancel: &CancellationToken) -> Result<SendReport> {
        let prepared = self.prepared.clone().ok_or(MailMergeError::NotReady)?;

        self.phase = Phase::Sending;
        let dispatcher = BatchDispatcher::new(prepared, Arc::clone(&self.config));
        let result = dispatcher.run(Uuid::new_v4(), cancel).await;

        self.phase = match result {
            Ok(_) => Phase::Sent,
            Err(_) => Phase::Failed,
        };
        result
    }
}

impl fmt::Debug for Mailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailer")
            .field("config", &self.config)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

fn prepare(sources: MergeSources, filters: &FilterRegistry) -> Result<Prepared> {
    let MergeSources { csv, body, subject } = sources;

    let table = Table::parse(csv)?;
    if !table.is_header(MANDATORY_FIELD) {
        return Err(MailMergeError::MissingMandatoryField(MANDATORY_FIELD.to_string()));
    }

    let body = CompiledTemplate::compile(BODY_TEMPLATE, read_source(body)?, filters)?;

    let subject = match subject {
        Some(reader) => {
            let text = read_source(reader)?;
            if text.is_empty() {
                None
            } else {
                Some(CompiledTemplate::compile(SUBJECT_TEMPLATE, text, filters)?)
            }
        }
        None => None,
    };

    Ok(Prepared {
        table,
        body,
        subject,
    })
}

fn read_source(mut reader: Source) -> Result<String> {
    let mut text = String::new();
    reader.read_to_string(&mut text)?;
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;

    const RECIPIENTS: &str = "email,name,token\njohn@doe.com,john doe,token1\n";

    fn config() -> MailerConfig {
        MailerConfig::new("sender@mail.com", Arc::new(MemoryTransport::new()))
    }

    #[test]
    fn test_resolve_subject() {
        assert_eq!(resolve_subject(String::new(), "Welcome"), "Welcome");
        assert_eq!(resolve_subject("Hi Ann".to_string(), "Welcome"), "Hi Ann");
        assert_eq!(resolve_subject(" ".to_string(), "Welcome"), " ");
    }

    #[test]
    fn test_effective_concurrency() {
        assert_eq!(config().with_concurrency(0).effective_concurrency(), 1);
        assert_eq!(config().with_concurrency(1).effective_concurrency(), 1);
        assert_eq!(config().with_concurrency(8).effective_concurrency(), 8);
    }

    #[test]
    fn test_parse_moves_to_parsed() {
        let sources = MergeSources::new(RECIPIENTS.as_bytes(), "Hello {{ name }}".as_bytes());
        let mut mailer = Mailer::new(config(), sources);
        assert_eq!(mailer.phase(), Phase::Unparsed);

        mailer.parse().unwrap();
        assert_eq!(mailer.phase(), Phase::Parsed);
        assert_eq!(mailer.table().map(Table::len), Some(1));
    }

    #[test]
    fn test_parse_requires_email_column() {
        let sources = MergeSources::new("name\nann\n".as_bytes(), "Hello".as_bytes());
        let mut mailer = Mailer::new(config(), sources);

        let err = mailer.parse().unwrap_err();
        assert!(matches!(err, MailMergeError::MissingMandatoryField(ref f) if f == "email"));
        assert_eq!(mailer.phase(), Phase::Unparsed);
        assert!(mailer.table().is_none());
    }

    #[test]
    fn test_missing_email_checked_before_templates() {
        let sources = MergeSources::new("name\nann\n".as_bytes(), "{{ broken".as_bytes());
        let mut mailer = Mailer::new(config(), sources);

        assert!(matches!(
            mailer.parse(),
            Err(MailMergeError::MissingMandatoryField(_))
        ));
    }

    #[test]
    fn test_bad_subject_template_aborts_parse() {
        let sources = MergeSources::new(RECIPIENTS.as_bytes(), "Hello".as_bytes())
            .with_subject("{% if %}".as_bytes());
        let mut mailer = Mailer::new(config(), sources);

        let err = mailer.parse().unwrap_err();
        assert!(matches!(err, MailMergeError::TemplateSyntax { ref template, .. } if template == "subject"));
        assert!(mailer.table().is_none());
    }

    #[test]
    fn test_empty_subject_source_is_absent() {
        let sources =
            MergeSources::new(RECIPIENTS.as_bytes(), "Hello".as_bytes()).with_subject("".as_bytes());
        let mut mailer = Mailer::new(config(), sources);
        mailer.parse().unwrap();

        assert!(mailer.prepared.as_ref().unwrap().subject.is_none());
    }

    #[test]
    fn test_parse_twice() {
        let sources = MergeSources::new(RECIPIENTS.as_bytes(), "Hello".as_bytes());
        let mut mailer = Mailer::new(config(), sources);

        mailer.parse().unwrap();
        assert!(matches!(mailer.parse(), Err(MailMergeError::AlreadyParsed)));
    }

    #[test]
    fn test_parse_after_failure() {
        let sources = MergeSources::new("".as_bytes(), "Hello".as_bytes());
        let mut mailer = Mailer::new(config(), sources);

        assert!(matches!(mailer.parse(), Err(MailMergeError::MalformedInput { .. })));
        assert!(matches!(mailer.parse(), Err(MailMergeError::SourcesConsumed)));
    }

    #[tokio::test]
    async fn test_send_all_before_parse_is_not_ready() {
        let transport = Arc::new(MemoryTransport::new());
        let config = MailerConfig::new("sender@mail.com", transport.clone());
        let sources = MergeSources::new(RECIPIENTS.as_bytes(), "Hello".as_bytes());
        let mut mailer = Mailer::new(config, sources);

        let err = mailer.send_all(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, MailMergeError::NotReady));
        assert_eq!(mailer.phase(), Phase::Unparsed);
        assert!(transport.attempted().await.is_empty());
    }
}
