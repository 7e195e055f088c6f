//! Diagnostic logging setup.
//!
//! Console and file layers are independently leveled: the console follows
//! `level` (and can be disabled entirely), the file follows `file_level`
//! and appends to the configured filename. `RUST_LOG` overrides both
//! filters when set.

use crate::config::LoggingSettings;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

/// Initialize the global subscriber from logging settings.
///
/// Returns the file writer's guard; dropping it flushes buffered log
/// lines, so callers hold it for the life of the process. Safe to call
/// once; later calls are ignored.
pub fn init(settings: &LoggingSettings) -> Option<WorkerGuard> {
    let mut guard = None;

    let file_layer = if settings.enable_file_logging {
        let appender = tracing_appender::rolling::never(".", &settings.filename);
        let (writer, worker_guard) = tracing_appender::non_blocking(appender);
        guard = Some(worker_guard);
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_filter(filter_for(&settings.file_level)),
        )
    } else {
        None
    };

    let console_layer = if settings.console {
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(settings.use_colored_logs)
                .with_target(false)
                .with_filter(filter_for(&settings.level)),
        )
    } else {
        None
    };

    let _ = tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .try_init();
    guard
}

/// Build a filter from a configured level, honoring `RUST_LOG` overrides.
fn filter_for(level: &str) -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        return EnvFilter::from_default_env();
    }
    EnvFilter::new(normalize_level(level))
}

/// Accept the level spellings config files actually contain.
fn normalize_level(level: &str) -> String {
    match level.trim().to_ascii_uppercase().as_str() {
        "CRITICAL" | "ERROR" => "error",
        "WARNING" | "WARN" => "warn",
        "INFO" => "info",
        "DEBUG" | "VERBOSE" => "debug",
        "TRACE" => "trace",
        "OFF" | "NONE" => "off",
        _ => "info",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_normalization() {
        assert_eq!(normalize_level("DEBUG"), "debug");
        assert_eq!(normalize_level("warning"), "warn");
        assert_eq!(normalize_level("CRITICAL"), "error");
        assert_eq!(normalize_level("Verbose"), "debug");
        assert_eq!(normalize_level(" info "), "info");
        assert_eq!(normalize_level("bogus"), "info");
        assert_eq!(normalize_level("OFF"), "off");
    }
}
