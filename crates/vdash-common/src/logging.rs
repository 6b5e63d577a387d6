//! ---
//! vdash_section: "01-core-functionality"
//! vdash_subsection: "module"
//! vdash_type: "source"
//! vdash_scope: "code"
//! vdash_description: "Shared primitives and utilities for the dashboard runtime."
//! vdash_version: "v0.1.0"
//! vdash_owner: "tbd"
//! ---
//! Tracing setup for the daemon: one console layer in the configured format and a
//! daily JSON file next to it.
use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::{info, Subscriber};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "VDASH_LOG";
const FALLBACK_DIRECTIVE: &str = "info";

/// Writer guards for the console and the log file. Dropping them loses buffered lines.
static WRITER_GUARDS: OnceCell<(WorkerGuard, WorkerGuard)> = OnceCell::new();

/// Console output format. The log file is JSON either way.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

/// Install the global subscriber for `service_name`.
///
/// The filter comes from `VDASH_LOG`, then `RUST_LOG`, then `info`. A second call keeps the
/// subscriber that is already installed.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    std::fs::create_dir_all(&config.directory).with_context(|| {
        format!(
            "unable to create log directory {}",
            config.directory.display()
        )
    })?;

    let file_name = log_file_name(service_name, config.file_prefix.as_deref());
    let (file_writer, file_guard) =
        tracing_appender::non_blocking(daily(&config.directory, file_name));
    let (console_writer, console_guard) = tracing_appender::non_blocking(std::io::stdout());
    let _ = WRITER_GUARDS.set((console_guard, file_guard));

    let (filter, rejected) = select_filter(
        std::env::var(LOG_ENV).ok(),
        std::env::var(EnvFilter::DEFAULT_ENV).ok(),
    );
    if let Some(err) = rejected {
        eprintln!("ignoring {LOG_ENV}: {err}");
    }

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer(config.format, console_writer))
        .with(
            fmt::layer()
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .json()
                .with_writer(file_writer),
        )
        .try_init()
        .ok();

    info!(
        service = %service_name,
        log_dir = %config.directory.display(),
        format = ?config.format,
        "tracing initialised"
    );
    Ok(())
}

fn console_layer<S>(format: LogFormat, writer: NonBlocking) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let layer = fmt::layer()
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_writer(writer);
    match format {
        LogFormat::StructuredJson => layer.json().boxed(),
        LogFormat::Pretty => layer.boxed(),
    }
}

fn log_file_name(service_name: &str, prefix: Option<&str>) -> String {
    format!("{}.log", prefix.unwrap_or(service_name))
}

/// Resolve the filter from the two environment directives. A malformed `VDASH_LOG` is
/// reported back and the next source is used instead.
fn select_filter(
    vdash_log: Option<String>,
    rust_log: Option<String>,
) -> (EnvFilter, Option<String>) {
    let mut rejected = None;
    if let Some(directive) = vdash_log {
        match EnvFilter::try_new(&directive) {
            Ok(filter) => return (filter, None),
            Err(err) => rejected = Some(format!("'{directive}' ({err})")),
        }
    }
    let filter = rust_log
        .and_then(|directive| EnvFilter::try_new(directive).ok())
        .unwrap_or_else(|| EnvFilter::new(FALLBACK_DIRECTIVE));
    (filter, rejected)
}
