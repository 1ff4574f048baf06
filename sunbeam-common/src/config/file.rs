//! TOML configuration file with environment overrides.

use super::env::{EnvError, EnvParser, expand_home};
use super::source::Sourced;
use crate::errors::ErrorCode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default budget for a convergence wait.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Default cadence for status polling.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Default timeout for a single juju command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// Errors produced while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("invalid environment: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    Env(Vec<EnvError>),
}

impl ConfigError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::ConfigNotFound,
            Self::Read { .. } | Self::Parse { .. } => ErrorCode::ConfigParseError,
            Self::Invalid(_) => ErrorCode::ConfigValidationError,
            Self::Env(_) => ErrorCode::ConfigEnvError,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SunbeamConfig {
    #[serde(default)]
    pub juju: JujuSettings,
    #[serde(default)]
    pub wait: WaitSettings,
    #[serde(default)]
    pub log: LogSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JujuSettings {
    /// Path to the juju binary.
    #[serde(default = "default_juju_binary")]
    pub binary: PathBuf,
    /// Controller name; the client's current controller when unset.
    #[serde(default)]
    pub controller: Option<String>,
    /// Timeout for a single juju command.
    #[serde(default = "default_command_timeout", with = "duration_str")]
    pub command_timeout: Duration,
}

impl Default for JujuSettings {
    fn default() -> Self {
        Self {
            binary: default_juju_binary(),
            controller: None,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WaitSettings {
    /// Budget for a convergence wait.
    #[serde(default = "default_wait_timeout", with = "duration_str")]
    pub timeout: Duration,
    /// Cadence of status polls, shared by every wait path.
    #[serde(default = "default_poll_interval", with = "duration_str")]
    pub poll_interval: Duration,
    /// Cadence of liveness checks; the poll interval when unset.
    #[serde(default, with = "duration_str::option")]
    pub reconnect_interval: Option<Duration>,
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_WAIT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            reconnect_interval: None,
        }
    }
}

impl WaitSettings {
    pub fn effective_reconnect_interval(&self) -> Duration {
        self.reconnect_interval.unwrap_or(self.poll_interval)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_juju_binary() -> PathBuf {
    PathBuf::from("juju")
}

fn default_command_timeout() -> Duration {
    DEFAULT_COMMAND_TIMEOUT
}

fn default_wait_timeout() -> Duration {
    DEFAULT_WAIT_TIMEOUT
}

fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Configuration plus where it was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: SunbeamConfig,
    /// File the configuration was read from, if any.
    pub path: Option<PathBuf>,
    /// Environment variables that overrode file or default values.
    pub env_overrides: Vec<String>,
}

/// Default configuration file location (`$XDG_CONFIG_HOME/sunbeam/config.toml`).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("sunbeam").join("config.toml"))
}

impl SunbeamConfig {
    /// Parse configuration from TOML text.
    pub fn from_toml(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: SunbeamConfig = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read a configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        Self::from_toml(&text, path)
    }

    /// Load configuration from `explicit`, else the default location, else
    /// built-in defaults, then apply `SUNBEAM_*` overrides.
    ///
    /// An explicit path that does not exist is an error; a missing default
    /// file is not.
    pub fn load(explicit: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
        let (mut config, path) = match explicit {
            Some(path) => (Self::from_file(path)?, Some(path.to_path_buf())),
            None => match default_config_path() {
                Some(path) if path.exists() => (Self::from_file(&path)?, Some(path)),
                _ => (Self::default(), None),
            },
        };
        let env_overrides = config.apply_env()?;
        config.validate()?;
        Ok(LoadedConfig {
            config,
            path,
            env_overrides,
        })
    }

    /// Apply `SUNBEAM_*` environment overrides, returning the variables used.
    pub fn apply_env(&mut self) -> Result<Vec<String>, ConfigError> {
        let mut parser = EnvParser::new();
        let mut applied = Vec::new();

        let binary = parser.get_path("JUJU_BINARY", &self.juju.binary.to_string_lossy());
        let controller = parser.get_optional_string("CONTROLLER");
        let timeout = parser.get_duration("WAIT_TIMEOUT", self.wait.timeout);
        let poll_interval = parser.get_duration("POLL_INTERVAL", self.wait.poll_interval);
        let level = parser.get_log_level("LOG_LEVEL", &self.log.level);

        if parser.has_errors() {
            return Err(ConfigError::Env(parser.take_errors()));
        }

        record(&mut applied, binary, &mut self.juju.binary);
        if controller.is_overridden() {
            if let Some(var) = controller.var {
                applied.push(var);
            }
            self.juju.controller = controller.value;
        }
        record(&mut applied, timeout, &mut self.wait.timeout);
        record(&mut applied, poll_interval, &mut self.wait.poll_interval);
        record(&mut applied, level, &mut self.log.level);

        Ok(applied)
    }

    /// Check invariants serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.wait.timeout.is_zero() {
            return Err(ConfigError::Invalid("wait.timeout must be non-zero".into()));
        }
        if self.wait.poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "wait.poll_interval must be non-zero".into(),
            ));
        }
        if self.wait.reconnect_interval.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::Invalid(
                "wait.reconnect_interval must be non-zero".into(),
            ));
        }
        if self.juju.command_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "juju.command_timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Juju binary with `~/` expanded.
    pub fn juju_binary(&self) -> PathBuf {
        expand_home(&self.juju.binary.to_string_lossy())
    }
}

fn record<T>(applied: &mut Vec<String>, sourced: Sourced<T>, slot: &mut T) {
    if sourced.is_overridden() {
        if let Some(var) = sourced.var {
            applied.push(var);
        }
        *slot = sourced.value;
    }
}

/// Serde adapter for durations written in humantime syntax.
mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(text.trim()).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(d) => super::serialize(d, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            let text = Option::<String>::deserialize(deserializer)?;
            text.map(|t| humantime::parse_duration(t.trim()).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn clear_sunbeam_env() {
        for var in [
            "SUNBEAM_JUJU_BINARY",
            "SUNBEAM_CONTROLLER",
            "SUNBEAM_WAIT_TIMEOUT",
            "SUNBEAM_POLL_INTERVAL",
            "SUNBEAM_LOG_LEVEL",
        ] {
            // SAFETY: env-mutating tests are serialized
            unsafe { std::env::remove_var(var) };
        }
    }

    #[test]
    fn test_defaults() {
        let config = SunbeamConfig::default();
        assert_eq!(config.wait.timeout, Duration::from_secs(600));
        assert_eq!(config.wait.poll_interval, Duration::from_secs(15));
        assert_eq!(
            config.wait.effective_reconnect_interval(),
            Duration::from_secs(15)
        );
        assert_eq!(config.juju.binary, PathBuf::from("juju"));
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_from_toml_parses_durations() {
        let text = r#"
            [juju]
            controller = "sunbeam-controller"
            command_timeout = "30s"

            [wait]
            timeout = "20m"
            poll_interval = "5s"
            reconnect_interval = "1m"
        "#;
        let config = SunbeamConfig::from_toml(text, Path::new("inline.toml")).unwrap();
        assert_eq!(config.juju.controller.as_deref(), Some("sunbeam-controller"));
        assert_eq!(config.juju.command_timeout, Duration::from_secs(30));
        assert_eq!(config.wait.timeout, Duration::from_secs(1200));
        assert_eq!(config.wait.poll_interval, Duration::from_secs(5));
        assert_eq!(
            config.wait.effective_reconnect_interval(),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_from_toml_rejects_zero_interval() {
        let text = "[wait]\npoll_interval = \"0s\"\n";
        let err = SunbeamConfig::from_toml(text, Path::new("inline.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert_eq!(err.code(), ErrorCode::ConfigValidationError);
    }

    #[test]
    fn test_from_toml_rejects_unknown_keys() {
        let text = "[wait]\npoll = \"5s\"\n";
        let err = SunbeamConfig::from_toml(text, Path::new("inline.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_round_trip_preserves_values() {
        let mut config = SunbeamConfig::default();
        config.wait.reconnect_interval = Some(Duration::from_secs(45));
        let text = toml::to_string(&config).unwrap();
        let parsed = SunbeamConfig::from_toml(&text, Path::new("inline.toml")).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    #[serial]
    fn test_load_explicit_missing_file_is_error() {
        clear_sunbeam_env();
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let err = SunbeamConfig::load(Some(&missing)).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    #[serial]
    fn test_load_applies_env_over_file() {
        clear_sunbeam_env();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[wait]\ntimeout = \"5m\"\npoll_interval = \"10s\"").unwrap();

        // SAFETY: env-mutating tests are serialized
        unsafe { std::env::set_var("SUNBEAM_POLL_INTERVAL", "3s") };
        let loaded = SunbeamConfig::load(Some(file.path())).unwrap();
        clear_sunbeam_env();

        assert_eq!(loaded.config.wait.timeout, Duration::from_secs(300));
        assert_eq!(loaded.config.wait.poll_interval, Duration::from_secs(3));
        assert_eq!(loaded.env_overrides, vec!["SUNBEAM_POLL_INTERVAL".to_string()]);
        assert_eq!(loaded.path.as_deref(), Some(file.path()));
    }

    #[test]
    #[serial]
    fn test_apply_env_reports_all_errors() {
        clear_sunbeam_env();
        // SAFETY: env-mutating tests are serialized
        unsafe {
            std::env::set_var("SUNBEAM_WAIT_TIMEOUT", "forever");
            std::env::set_var("SUNBEAM_LOG_LEVEL", "loud");
        }
        let mut config = SunbeamConfig::default();
        let err = config.apply_env().unwrap_err();
        clear_sunbeam_env();

        match err {
            ConfigError::Env(errors) => assert_eq!(errors.len(), 2),
            other => panic!("expected Env error, got {other:?}"),
        }
        assert_eq!(config, SunbeamConfig::default());
    }
}
