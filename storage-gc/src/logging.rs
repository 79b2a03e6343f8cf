// SPDX-License-Identifier: GPL-3.0-only

use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

const LOG_PREFIX: &str = "storage-gc.log";

/// Install the global subscriber: stderr always, plus daily files when a
/// log directory is configured. `RUST_LOG` overrides the configured level.
pub fn init(config: &LoggingConfig) {
    let level = config.level.as_directive();
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("storage_gc={level},storage_sys={level},warn"))
    });

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    let Some(dir) = config.directory.as_deref() else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
        return;
    };

    match file_writer(dir, config.keep_days) {
        Ok((writer, guard)) => {
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .with(file_layer)
                .init();

            // Keep the background writer alive until exit.
            let _ = LOG_GUARD.set(guard);
        }
        Err(e) => {
            eprintln!("storage-gc: failed to initialize file logging: {e}");
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .init();
        }
    }
}

fn file_writer(
    dir: &Path,
    keep_days: u64,
) -> std::io::Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    fs::create_dir_all(dir)?;
    prune_logs(dir, keep_days);

    let appender = tracing_appender::rolling::daily(dir, LOG_PREFIX);
    Ok(tracing_appender::non_blocking(appender))
}

/// Remove rolled files in `dir` last written more than `keep_days` ago.
fn prune_logs(dir: &Path, keep_days: u64) {
    let max_age = Duration::from_secs(keep_days.saturating_mul(24 * 60 * 60));
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };

    let expired = entries
        .flatten()
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(LOG_PREFIX))
        .filter(|entry| {
            entry
                .metadata()
                .ok()
                .filter(fs::Metadata::is_file)
                .and_then(|metadata| metadata.modified().ok())
                .and_then(|modified| modified.elapsed().ok())
                .is_some_and(|age| age > max_age)
        });

    for entry in expired {
        let _ = fs::remove_file(entry.path());
    }
}
