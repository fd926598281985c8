//! Tracing setup: compact stdout output plus a daily-rotated log file.

use std::path::Path;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize the tracing subscriber.
///
/// Terminal output stays compact; the full record goes to a daily-rotated
/// `gssg.log` under the cache directory. `RUST_LOG` overrides the default
/// level (e.g. `RUST_LOG=gssg=debug`).
pub fn init(log_dir: &Path, verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(log_dir)?;

    let default_level = if verbose { "gssg=debug,info" } else { "gssg=info,warn" };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))?;

    let file_appender = tracing_appender::rolling::daily(log_dir, "gssg.log");
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_target(true)
        .with_ansi(false)
        .compact()
        .with_filter(env_filter);

    let stdout_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))?;
    let stdout_layer = fmt::layer()
        .with_target(false)
        .compact()
        .with_filter(stdout_filter);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stdout_layer)
        .init();

    // The guard must outlive the process or buffered lines are dropped.
    Box::leak(Box::new(file_guard));

    Ok(())
}
