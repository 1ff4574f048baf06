//! Tracing subscriber setup for the CLI.

use anyhow::{Context, Result};
use std::io;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const CRATES: &[&str] = &["sunbeam", "sunbeam_juju", "sunbeam_common"];

/// How the CLI logs.
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Level from configuration, e.g. `info`.
    pub level: String,
    pub verbose: bool,
    pub json: bool,
    pub file: Option<PathBuf>,
}

impl LogOptions {
    /// Filter directives for the workspace crates. `RUST_LOG` wins when set.
    pub fn filter(&self) -> EnvFilter {
        let level = if self.verbose { "debug" } else { self.level.as_str() };
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let directives: Vec<String> = CRATES.iter().map(|c| format!("{c}={level}")).collect();
            EnvFilter::new(format!("warn,{}", directives.join(",")))
        })
    }
}

/// Keeps the file writer alive; drop it last to flush.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Install the global subscriber: stderr output, text or JSON, plus an
/// optional non-blocking file writer.
pub fn init_logging(options: &LogOptions) -> Result<LoggingGuard> {
    let text_layer = (!options.json).then(|| {
        fmt::layer()
            .with_writer(io::stderr)
            .with_target(false)
            .compact()
    });
    let json_layer = options
        .json
        .then(|| fmt::layer().with_writer(io::stderr).json().with_current_span(true));

    let (file_layer, file_guard) = match &options.file {
        Some(path) => {
            let (dir, name) = split_log_path(path)?;
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false).json();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(options.filter())
        .with(text_layer)
        .with(json_layer)
        .with(file_layer)
        .try_init()
        .context("installing tracing subscriber")?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

fn split_log_path(path: &Path) -> Result<(PathBuf, PathBuf)> {
    let name = path
        .file_name()
        .with_context(|| format!("log file {} has no file name", path.display()))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, PathBuf::from(name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_log_path() {
        let (dir, name) = split_log_path(Path::new("/var/log/sunbeam/wait.log")).unwrap();
        assert_eq!(dir, PathBuf::from("/var/log/sunbeam"));
        assert_eq!(name, PathBuf::from("wait.log"));

        let (dir, name) = split_log_path(Path::new("wait.log")).unwrap();
        assert_eq!(dir, PathBuf::from("."));
        assert_eq!(name, PathBuf::from("wait.log"));

        assert!(split_log_path(Path::new("/")).is_err());
    }

    #[test]
    fn test_verbose_overrides_configured_level() {
        let options = LogOptions {
            level: "warn".into(),
            verbose: true,
            ..LogOptions::default()
        };
        if std::env::var_os("RUST_LOG").is_none() {
            assert!(options.filter().to_string().contains("sunbeam_juju=debug"));
        }
    }
}
