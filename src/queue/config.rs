//! Operator configuration and TOML loading
//!
//! Configuration is a plain value handed to [`QueueOperator`](crate::queue::QueueOperator)
//! at construction. There is no process-wide state, so differently configured
//! operators can coexist in one process.
//!
//! ```toml
//! connection = "Endpoint=sb://ns.servicebus.windows.net/;SharedAccessKeyName=root;SharedAccessKey=..."
//! lease-duration = 30          # seconds
//! receive-timeout = 1          # seconds, 0 = do not wait
//! max-concurrent-sends = 4
//! max-delivery-count = 10
//! send-retry-attempts = 3
//! send-retry-delay-ms = 500
//! log-level = "info"
//! log-format = "text"          # text | ext | json
//! log-file = "none"
//! ```

use crate::core::retry::RetryPolicy;
use crate::queue::error::{QueueError, QueueResult};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;

/// Environment variable that overrides the configured connection string
pub const CONNECTION_ENV_VAR: &str = "HIVEQUEUE_CONNECTION";

/// Static configuration of a queue operator
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorConfig {
    /// Broker connection string; required by `QueueOperator::connect` only
    pub connection: Option<String>,
    /// Lease requested on every pull and renewal
    pub lease_duration: Duration,
    /// How long a pull may wait for a message before reporting an empty queue
    pub receive_timeout: Duration,
    /// Upper bound on batches in flight during one push
    pub max_concurrent_sends: usize,
    /// Deliveries after which a message is dead-lettered
    ///
    /// Read by the broker constructors that take this configuration
    /// (`InMemoryBroker::from_config`, `ServiceBusBroker::from_config`); a broker
    /// built any other way keeps its own limit.
    pub max_delivery_count: u32,
    /// Retry policy for transient failures while sending batches
    pub send_retry: RetryPolicy,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
    pub log_file: Option<PathBuf>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            connection: None,
            lease_duration: Duration::from_secs(30),
            receive_timeout: Duration::from_secs(1),
            max_concurrent_sends: 4,
            max_delivery_count: 10,
            send_retry: RetryPolicy::default(),
            log_level: None,
            log_format: None,
            log_file: None,
        }
    }
}

impl OperatorConfig {
    /// Load configuration, falling back to defaults when no file is found
    ///
    /// An explicitly given file must exist. Without one, the default location
    /// is used if present. The connection string can be overridden through
    /// [`CONNECTION_ENV_VAR`].
    pub async fn load(config_file: Option<PathBuf>) -> QueueResult<Self> {
        let config_path = match config_file {
            Some(path) => {
                if !path.exists() {
                    return Err(QueueError::Configuration {
                        message: format!(
                            "The specified configuration file does not exist: {}",
                            path.display()
                        ),
                    });
                }
                Some(path)
            }
            None => Self::default_config_path().filter(|path| path.exists()),
        };

        let mut config = match config_path {
            Some(path) => {
                log::debug!("Loading configuration from {}", path.display());
                let contents = tokio::fs::read_to_string(&path).await.map_err(|e| {
                    QueueError::Configuration {
                        message: format!(
                            "Error reading configuration file {}: {}",
                            path.display(),
                            e
                        ),
                    }
                })?;
                Self::from_toml_str(&contents).map_err(|e| QueueError::Configuration {
                    message: format!("{}: {}", path.display(), e),
                })?
            }
            None => Self::default(),
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// `<config dir>/Hivequeue/hivequeue.toml`
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("Hivequeue").join("hivequeue.toml"))
    }

    /// Parse TOML text onto the defaults
    pub fn from_toml_str(contents: &str) -> QueueResult<Self> {
        let table = toml::from_str::<toml::Table>(contents).map_err(|e| {
            QueueError::Configuration {
                message: format!("Error parsing configuration: {}", e),
            }
        })?;

        let mut config = Self::default();
        config.apply_toml_values(&table)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply TOML configuration values onto this configuration
    pub fn apply_toml_values(&mut self, config: &toml::Table) -> QueueResult<()> {
        if let Some(connection) = get_str(config, "connection")? {
            self.connection = Some(connection.to_string());
        }
        if let Some(secs) = get_u64(config, "lease-duration")? {
            self.lease_duration = Duration::from_secs(secs);
        }
        if let Some(secs) = get_u64(config, "receive-timeout")? {
            self.receive_timeout = Duration::from_secs(secs);
        }
        if let Some(sends) = get_u64(config, "max-concurrent-sends")? {
            self.max_concurrent_sends = sends as usize;
        }
        if let Some(count) = get_u64(config, "max-delivery-count")? {
            self.max_delivery_count =
                u32::try_from(count).map_err(|_| QueueError::Configuration {
                    message: format!("max-delivery-count is too large: {}", count),
                })?;
        }
        if let Some(attempts) = get_u64(config, "send-retry-attempts")? {
            self.send_retry.max_attempts = attempts as usize;
        }
        if let Some(millis) = get_u64(config, "send-retry-delay-ms")? {
            self.send_retry.delay = Duration::from_millis(millis);
        }
        if let Some(log_level) = get_str(config, "log-level")? {
            self.log_level = Some(log_level.to_string());
        }
        if let Some(log_format) = get_str(config, "log-format")? {
            self.log_format = Some(log_format.to_string());
        }
        if let Some(log_file) = get_str(config, "log-file")? {
            if log_file.eq_ignore_ascii_case("none") || log_file == "-" {
                self.log_file = None; // "none" and "-" disable file logging
            } else {
                self.log_file = Some(PathBuf::from(log_file));
            }
        }

        Ok(())
    }

    /// Apply environment overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(connection) = std::env::var(CONNECTION_ENV_VAR) {
            if !connection.trim().is_empty() {
                log::debug!("Using connection string from {}", CONNECTION_ENV_VAR);
                self.connection = Some(connection);
            }
        }
    }

    pub fn validate(&self) -> QueueResult<()> {
        let invalid = |message: &str| {
            Err(QueueError::Configuration {
                message: message.to_string(),
            })
        };

        if self.lease_duration.is_zero() {
            return invalid("lease-duration must be greater than zero");
        }
        deadline_after(Instant::now(), self.lease_duration, "lease-duration")?;
        deadline_after(Instant::now(), self.receive_timeout, "receive-timeout")?;
        if self.max_concurrent_sends == 0 {
            return invalid("max-concurrent-sends must be greater than zero");
        }
        if self.max_delivery_count == 0 {
            return invalid("max-delivery-count must be greater than zero");
        }
        if let Some(format) = self.log_format.as_deref() {
            if !matches!(format, "text" | "ext" | "json") {
                return invalid("log-format must be one of: text, ext, json");
            }
        }
        Ok(())
    }

    /// Start the log backend from the logging keys of this configuration
    pub fn init_logging(&self) -> QueueResult<()> {
        let color_enabled = colored::control::SHOULD_COLORIZE.should_colorize();
        let log_file = self.log_file.as_ref().map(|p| p.to_string_lossy().to_string());

        crate::core::logging::init_logging(
            self.log_level.as_deref(),
            self.log_format.as_deref(),
            log_file.as_deref(),
            color_enabled,
        )
        .map_err(|e| QueueError::Configuration {
            message: format!("Unable to initialise logging: {}", e),
        })
    }
}

/// `now + duration`, or a `Configuration` error when the clock cannot hold it
pub(crate) fn deadline_after(
    now: Instant,
    duration: Duration,
    what: &str,
) -> QueueResult<Instant> {
    now.checked_add(duration)
        .ok_or_else(|| QueueError::Configuration {
            message: format!("{} of {:?} is too large", what, duration),
        })
}

fn get_str<'a>(config: &'a toml::Table, key: &str) -> QueueResult<Option<&'a str>> {
    match config.get(key) {
        None => Ok(None),
        Some(value) => value
            .as_str()
            .map(Some)
            .ok_or_else(|| QueueError::Configuration {
                message: format!("{} must be a string", key),
            }),
    }
}

fn get_u64(config: &toml::Table, key: &str) -> QueueResult<Option<u64>> {
    match config.get(key) {
        None => Ok(None),
        Some(value) => value
            .as_integer()
            .and_then(|v| u64::try_from(v).ok())
            .map(Some)
            .ok_or_else(|| QueueError::Configuration {
                message: format!("{} must be a non-negative integer", key),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = OperatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.lease_duration, Duration::from_secs(30));
        assert_eq!(config.max_concurrent_sends, 4);
    }

    #[test]
    fn test_toml_values_override_defaults() {
        let config = OperatorConfig::from_toml_str(
            r#"
            connection = "Endpoint=sb://ns.servicebus.windows.net/"
            lease-duration = 45
            receive-timeout = 0
            max-concurrent-sends = 8
            max-delivery-count = 3
            send-retry-attempts = 5
            send-retry-delay-ms = 20
            log-level = "debug"
            log-format = "json"
            log-file = "none"
            "#,
        )
        .unwrap();

        assert_eq!(
            config.connection.as_deref(),
            Some("Endpoint=sb://ns.servicebus.windows.net/")
        );
        assert_eq!(config.lease_duration, Duration::from_secs(45));
        assert_eq!(config.receive_timeout, Duration::ZERO);
        assert_eq!(config.max_concurrent_sends, 8);
        assert_eq!(config.max_delivery_count, 3);
        assert_eq!(config.send_retry.max_attempts, 5);
        assert_eq!(config.send_retry.delay, Duration::from_millis(20));
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.log_format.as_deref(), Some("json"));
        assert_eq!(config.log_file, None);
    }

    #[test]
    fn test_wrong_types_are_rejected() {
        assert!(OperatorConfig::from_toml_str("lease-duration = \"30\"").is_err());
        assert!(OperatorConfig::from_toml_str("lease-duration = -1").is_err());
        assert!(OperatorConfig::from_toml_str("connection = 12").is_err());
    }

    #[test]
    fn test_zero_values_fail_validation() {
        assert!(OperatorConfig::from_toml_str("lease-duration = 0").is_err());
        assert!(OperatorConfig::from_toml_str("max-concurrent-sends = 0").is_err());
        assert!(OperatorConfig::from_toml_str("max-delivery-count = 0").is_err());
        assert!(OperatorConfig::from_toml_str("log-format = \"xml\"").is_err());
    }

    #[test]
    fn test_durations_past_the_clock_range_fail_validation() {
        for key in ["lease-duration", "receive-timeout"] {
            let result = OperatorConfig::from_toml_str(&format!("{} = {}", key, i64::MAX));
            match result {
                Err(QueueError::Configuration { message }) => {
                    assert!(message.starts_with(key), "got: {}", message)
                }
                other => panic!("expected configuration error for {}, got {:?}", key, other),
            }
        }

        // A day-long lease is unusual but fine
        assert!(OperatorConfig::from_toml_str("lease-duration = 86400").is_ok());
    }

    #[test]
    fn test_deadline_after_reports_overflow() {
        let now = Instant::now();
        assert_eq!(
            deadline_after(now, Duration::from_secs(5), "period").unwrap(),
            now + Duration::from_secs(5)
        );
        assert!(deadline_after(now, Duration::MAX, "period").is_err());
    }

    #[tokio::test]
    #[serial]
    async fn test_load_from_explicit_file() {
        std::env::remove_var(CONNECTION_ENV_VAR);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "lease-duration = 12").unwrap();

        let config = OperatorConfig::load(Some(file.path().to_path_buf()))
            .await
            .unwrap();
        assert_eq!(config.lease_duration, Duration::from_secs(12));
    }

    #[tokio::test]
    async fn test_load_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = OperatorConfig::load(Some(dir.path().join("absent.toml"))).await;

        assert!(matches!(result, Err(QueueError::Configuration { .. })));
    }

    #[tokio::test]
    #[serial]
    async fn test_environment_overrides_connection() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "connection = \"from-file\"").unwrap();

        std::env::set_var(CONNECTION_ENV_VAR, "from-env");
        let config = OperatorConfig::load(Some(file.path().to_path_buf())).await;
        std::env::remove_var(CONNECTION_ENV_VAR);

        assert_eq!(config.unwrap().connection.as_deref(), Some("from-env"));
    }
}
