use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use mailmerger::config::Settings;
use mailmerger::metrics::encode_metrics;
use mailmerger::telemetry::{init_tracing, LogFormat};
use mailmerger::transport::{LogTransport, SmtpTransport, Transport};
use mailmerger::{Mailer, MailerConfig, MergeSources};

/// Send one templated email per row of a CSV file
#[derive(Debug, Parser)]
#[command(name = "mailmerger", version, about)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Log every message instead of sending it
    #[arg(long)]
    dry_run: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let format = if cli.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    init_tracing(format)?;

    let settings = Settings::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!(config = %cli.config.display(), "Configuration loaded");

    let transport: Arc<dyn Transport> = if cli.dry_run {
        Arc::new(LogTransport::new().with_body())
    } else {
        settings.validate_for_delivery()?;
        Arc::new(SmtpTransport::new(&settings.smtp).context("failed to build SMTP transport")?)
    };

    let subject_path = settings.subject_path();
    let sources = MergeSources::open(
        &settings.csv_path(),
        &settings.body_path(),
        subject_path.as_deref(),
    )
    .context("failed to open merge sources")?;

    let config = MailerConfig::new(settings.sender.clone(), transport)
        .with_default_subject(settings.default_subject.clone())
        .with_concurrency(settings.concurrency);

    let mut mailer = Mailer::new(config, sources);
    mailer.parse()?;

    let cancel = CancellationToken::new();
    let shutdown = tokio::spawn(cancel_on_signal(cancel.clone()));

    tracing::info!("Start sending email");
    let result = mailer.send_all(&cancel).await;
    shutdown.abort();

    match encode_metrics() {
        Ok(metrics) => tracing::debug!(metrics = %metrics, "Batch metrics"),
        Err(e) => tracing::warn!(error = %e, "Failed to encode metrics"),
    }

    let report = result?;
    tracing::info!(
        batch_id = %report.batch_id,
        sent = report.sent,
        report = %serde_json::to_string(&report)?,
        "Success"
    );

    Ok(())
}

async fn cancel_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, cancelling remaining sends");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, cancelling remaining sends");
        }
    }

    cancel.cancel();
}
