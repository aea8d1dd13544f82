// Core engine
pub mod mailer;
pub mod table;
pub mod template;
pub mod transport;

// Supporting modules
pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;

pub use error::{MailMergeError, Result};
pub use mailer::{Mailer, MailerConfig, MergeSources, Phase, SendReport};
