use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use thiserror::Error;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::transport::SmtpConfig;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid configuration: {0}")]
    Validation(#[from] ValidationErrors),
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct Settings {
    /// Sender address
    #[validate(email)]
    pub sender: String,
    /// Path to the recipient CSV file
    #[validate(length(min = 1))]
    pub csv_list: String,
    #[validate(nested)]
    pub template: TemplateConfig,
    #[serde(default)]
    pub default_subject: String,
    /// Concurrent sends; 0 behaves as 1
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub smtp: SmtpConfig,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TemplateConfig {
    /// Path to the subject template (optional)
    #[serde(default)]
    pub subject: Option<String>,
    /// Path to the body template
    #[validate(length(min = 1))]
    pub body: String,
}

fn default_concurrency() -> usize {
    1
}

impl Settings {
    /// Load settings from a JSON file, then `MAILMERGER__*` environment variables.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let path = path.to_string_lossy();
        let settings: Settings = Config::builder()
            .set_default("concurrency", 1)?
            .set_default("default_subject", "")?
            .add_source(File::new(&path, FileFormat::Json))
            // MAILMERGER__SENDER, MAILMERGER__SMTP__PASSWORD, etc.
            .add_source(
                Environment::with_prefix("MAILMERGER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Additional checks when messages go out over SMTP
    pub fn validate_for_delivery(&self) -> Result<(), SettingsError> {
        if self.smtp.host.trim().is_empty() {
            let mut errors = ValidationErrors::new();
            errors.add("smtp", ValidationError::new("smtp host is required"));
            return Err(errors.into());
        }
        Ok(())
    }

    pub fn csv_path(&self) -> PathBuf {
        PathBuf::from(&self.csv_list)
    }

    pub fn body_path(&self) -> PathBuf {
        PathBuf::from(&self.template.body)
    }

    /// Subject template path; an empty string counts as absent
    pub fn subject_path(&self) -> Option<PathBuf> {
        self.template
            .subject
            .as_deref()
            .filter(|path| !path.is_empty())
            .map(PathBuf::from)
    }
}
