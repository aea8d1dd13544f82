use thiserror::Error;

/// Opaque error type returned by transports.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum MailMergeError {
    #[error("Malformed input: {reason}")]
    MalformedInput {
        reason: String,
        #[source]
        source: Option<csv::Error>,
    },

    #[error("Missing mandatory field: {0}")]
    MissingMandatoryField(String),

    #[error("Template syntax error in '{template}': {source}")]
    TemplateSyntax {
        template: String,
        #[source]
        source: minijinja::Error,
    },

    #[error("Render error in '{template}': {source}")]
    Render {
        template: String,
        #[source]
        source: minijinja::Error,
    },

    /// Displayed exactly as the transport reported it.
    #[error("{source}")]
    Transport {
        recipient: String,
        #[source]
        source: BoxError,
    },

    #[error("Mailer is not ready: parse() must succeed before send_all()")]
    NotReady,

    #[error("Mailer sources were already parsed")]
    AlreadyParsed,

    #[error("Mailer sources were consumed by a failed parse")]
    SourcesConsumed,

    #[error("Dispatch cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl MailMergeError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        MailMergeError::MalformedInput {
            reason: reason.into(),
            source: None,
        }
    }

    /// Short stable label, used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            MailMergeError::MalformedInput { .. } => "malformed_input",
            MailMergeError::MissingMandatoryField(_) => "missing_mandatory_field",
            MailMergeError::TemplateSyntax { .. } => "template_syntax",
            MailMergeError::Render { .. } => "render",
            MailMergeError::Transport { .. } => "transport",
            MailMergeError::NotReady => "not_ready",
            MailMergeError::AlreadyParsed => "already_parsed",
            MailMergeError::SourcesConsumed => "sources_consumed",
            MailMergeError::Cancelled => "cancelled",
            MailMergeError::Io(_) => "io",
            MailMergeError::Worker(_) => "worker",
        }
    }
}

impl From<csv::Error> for MailMergeError {
    fn from(err: csv::Error) -> Self {
        MailMergeError::MalformedInput {
            reason: err.to_string(),
            source: Some(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, MailMergeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_is_verbatim() {
        let err = MailMergeError::Transport {
            recipient: "john@doe.com".to_string(),
            source: "connection refused".into(),
        };
        assert_eq!(err.to_string(), "connection refused");
        assert_eq!(err.kind(), "transport");
    }

    #[test]
    fn test_csv_error_maps_to_malformed_input() {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader("a,b\nc\n".as_bytes());
        let err = reader
            .records()
            .find_map(|r| r.err())
            .expect("ragged record should fail");

        let err = MailMergeError::from(err);
        assert!(matches!(err, MailMergeError::MalformedInput { source: Some(_), .. }));
    }
}
