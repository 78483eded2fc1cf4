//! Tracing subscriber setup
//!
//! Logs go to stderr so stdout carries only the child's output.

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::settings::{LogFormat, LogSettings};

const LOG_FILE_NAME: &str = "esther-trigger.log";

/// Install the global subscriber
///
/// The returned guard flushes the file writer on drop; keep it alive for
/// the lifetime of the program.
pub fn init(settings: &LogSettings) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .with_context(|| format!("Invalid log filter '{}'", settings.level))?;

    let (file_writer, guard) = match &settings.dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let file_layer =
        file_writer.map(|writer| fmt::layer().json().with_ansi(false).with_writer(writer));
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer);

    match settings.format {
        // Production: JSON structured logging
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .try_init(),
        // Development: Pretty formatting with colors
        LogFormat::Pretty => registry
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .try_init(),
    }
    .context("Failed to install tracing subscriber")?;

    Ok(guard)
}
