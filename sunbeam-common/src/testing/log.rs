//! Structured test logging.
//!
//! Tests across the workspace call [`init_global_test_logging`] (usually from
//! a `#[ctor::ctor]` hook) to get JSONL output of every tracing event plus a
//! compact human-readable copy on the test writer.

use std::path::PathBuf;
use std::sync::{Mutex, Once};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;

static GLOBAL_LOGGING_INIT: Once = Once::new();

/// Initialize global JSONL logging for all tests.
///
/// Events are written to `target/test-logs/all_tests.jsonl` and to the test
/// writer. Safe to call multiple times.
///
/// # Environment Variables
///
/// - `SUNBEAM_TEST_LOG_FILE`: override the log file path
/// - `SUNBEAM_TEST_LOG_LEVEL`: level filter for workspace crates (default: `info`)
pub fn init_global_test_logging() {
    GLOBAL_LOGGING_INIT.call_once(|| {
        let file_layer = create_global_log_file().map(|file| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(Mutex::new(file))
                .with_span_events(FmtSpan::CLOSE)
                .with_current_span(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
        });

        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_test_writer()
            .with_target(true)
            .with_level(true)
            .compact();

        let level = std::env::var("SUNBEAM_TEST_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let filter = tracing_subscriber::EnvFilter::try_new(test_filter_directive(&level))
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .with(stderr_layer);

        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

fn test_filter_directive(level: &str) -> String {
    format!("sunbeam={level},sunbeam_common={level},sunbeam_juju={level}")
}

fn create_global_log_file() -> Option<std::fs::File> {
    if let Ok(custom_path) = std::env::var("SUNBEAM_TEST_LOG_FILE") {
        if let Some(parent) = PathBuf::from(&custom_path).parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        return std::fs::File::create(&custom_path).ok();
    }

    let log_dir = find_target_dir().join("test-logs");
    let _ = std::fs::create_dir_all(&log_dir);
    std::fs::File::create(log_dir.join("all_tests.jsonl")).ok()
}

/// Find the target directory by searching up from the current directory.
fn find_target_dir() -> PathBuf {
    if let Ok(target_dir) = std::env::var("CARGO_TARGET_DIR") {
        return PathBuf::from(target_dir);
    }

    let mut cwd = std::env::current_dir().unwrap_or_default();
    loop {
        let target = cwd.join("target");
        if target.is_dir() {
            return target;
        }
        if !cwd.pop() {
            return PathBuf::from("target");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directive_covers_workspace_crates() {
        let directive = test_filter_directive("debug");
        assert!(directive.contains("sunbeam_juju=debug"));
        assert!(directive.contains("sunbeam_common=debug"));
        assert!(tracing_subscriber::EnvFilter::try_new(directive).is_ok());
    }

    #[test]
    fn test_init_is_idempotent() {
        init_global_test_logging();
        init_global_test_logging();
        tracing::info!(check = "idempotent", "logging initialized twice");
    }
}
