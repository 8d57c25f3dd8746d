//! Service configuration loaded from environment variables.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use domain::ExistencePolicy;
use thiserror::Error;

/// A configuration value that could not be used.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("{var}: unsupported URL {value:?}, expected one of {expected}")]
    UnsupportedScheme {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Where the event store or the read model lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageUrl {
    Memory,
    Postgres(String),
}

impl StorageUrl {
    fn parse(var: &'static str, value: &str) -> Result<Self, ConfigError> {
        if value == "memory://" {
            Ok(StorageUrl::Memory)
        } else if value.starts_with("postgres://") || value.starts_with("postgresql://") {
            Ok(StorageUrl::Postgres(value.to_string()))
        } else {
            Err(ConfigError::UnsupportedScheme {
                var,
                value: value.to_string(),
                expected: "memory://, postgres://",
            })
        }
    }
}

/// Which broker carries product events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerUrl {
    Memory,
    /// Comma-separated `host:port` bootstrap list.
    Kafka(String),
}

impl BrokerUrl {
    fn parse(var: &'static str, value: &str) -> Result<Self, ConfigError> {
        if value == "memory://" {
            return Ok(BrokerUrl::Memory);
        }
        match value.strip_prefix("kafka://") {
            Some(brokers) if !brokers.is_empty() => Ok(BrokerUrl::Kafka(brokers.to_string())),
            _ => Err(ConfigError::UnsupportedScheme {
                var,
                value: value.to_string(),
                expected: "memory://, kafka://host:port",
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("expected text or json, got {other}")),
        }
    }
}

/// Runtime configuration of the products service.
///
/// Reads from environment variables:
/// - `BROKER_URL`: `memory://` or `kafka://host:port[,host:port]` (default: `memory://`)
/// - `BROKER_TOPIC`: fanout exchange (default: `product_events`)
/// - `DEAD_LETTER_TOPIC`: dead-letter exchange, empty disables
///   (default: `product_events.dead_letter`)
/// - `EVENT_STORE_URL`, `READ_MODEL_URL`: `memory://` or `postgres://…` (default: `memory://`)
/// - `PROJECTOR_RETRY_SECS` (default: `5`)
/// - `PROJECTOR_REBUILD_ON_START` (default: `false`)
/// - `OUTBOX_POLL_MS` (default: `1000`), `OUTBOX_BATCH_SIZE` (default: `100`)
/// - `EXISTENCE_POLICY`: `strict` or `permissive` (default: `strict`)
/// - `METRICS_ADDR` (default: `0.0.0.0:9000`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub broker_url: BrokerUrl,
    pub broker_topic: String,
    pub dead_letter_topic: Option<String>,
    pub event_store_url: StorageUrl,
    pub read_model_url: StorageUrl,
    pub projector_retry: Duration,
    pub rebuild_on_start: bool,
    pub outbox_poll_interval: Duration,
    pub outbox_batch_size: usize,
    pub existence_policy: ExistencePolicy,
    pub metrics_addr: SocketAddr,
    pub log_format: LogFormat,
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Loads configuration through `lookup`, falling back to defaults for
    /// unset variables.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string());

        let broker_url = match var("BROKER_URL") {
            Some(value) => BrokerUrl::parse("BROKER_URL", &value)?,
            None => defaults.broker_url,
        };
        let event_store_url = match var("EVENT_STORE_URL") {
            Some(value) => StorageUrl::parse("EVENT_STORE_URL", &value)?,
            None => defaults.event_store_url,
        };
        let read_model_url = match var("READ_MODEL_URL") {
            Some(value) => StorageUrl::parse("READ_MODEL_URL", &value)?,
            None => defaults.read_model_url,
        };
        let dead_letter_topic = match var("DEAD_LETTER_TOPIC") {
            Some(value) if value.is_empty() => None,
            Some(value) => Some(value),
            None => defaults.dead_letter_topic,
        };

        Ok(Self {
            broker_url,
            broker_topic: var("BROKER_TOPIC")
                .filter(|t| !t.is_empty())
                .unwrap_or(defaults.broker_topic),
            dead_letter_topic,
            event_store_url,
            read_model_url,
            projector_retry: parse_var(&var, "PROJECTOR_RETRY_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.projector_retry),
            rebuild_on_start: parse_var(&var, "PROJECTOR_REBUILD_ON_START")?
                .unwrap_or(defaults.rebuild_on_start),
            outbox_poll_interval: parse_var(&var, "OUTBOX_POLL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.outbox_poll_interval),
            outbox_batch_size: match parse_var::<usize>(&var, "OUTBOX_BATCH_SIZE")? {
                Some(0) => {
                    return Err(ConfigError::Invalid {
                        var: "OUTBOX_BATCH_SIZE",
                        value: "0".to_string(),
                        reason: "must be at least 1".to_string(),
                    });
                }
                Some(size) => size,
                None => defaults.outbox_batch_size,
            },
            existence_policy: parse_var(&var, "EXISTENCE_POLICY")?
                .unwrap_or(defaults.existence_policy),
            metrics_addr: parse_var(&var, "METRICS_ADDR")?.unwrap_or(defaults.metrics_addr),
            log_format: parse_var(&var, "LOG_FORMAT")?.unwrap_or(defaults.log_format),
        })
    }
}

fn parse_var<T>(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        None => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::Invalid {
                var: name,
                reason: e.to_string(),
                value,
            }),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker_url: BrokerUrl::Memory,
            broker_topic: "product_events".to_string(),
            dead_letter_topic: Some("product_events.dead_letter".to_string()),
            event_store_url: StorageUrl::Memory,
            read_model_url: StorageUrl::Memory,
            projector_retry: Duration::from_secs(5),
            rebuild_on_start: false,
            outbox_poll_interval: Duration::from_millis(1000),
            outbox_batch_size: 100,
            existence_policy: ExistencePolicy::Strict,
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 9000)),
            log_format: LogFormat::Text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = load(&[]).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.broker_topic, "product_events");
        assert_eq!(
            config.dead_letter_topic.as_deref(),
            Some("product_events.dead_letter")
        );
        assert_eq!(config.projector_retry, Duration::from_secs(5));
        assert_eq!(config.existence_policy, ExistencePolicy::Strict);
        assert_eq!(config.metrics_addr.to_string(), "0.0.0.0:9000");
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("BROKER_URL", "kafka://localhost:9092,localhost:9093"),
            ("BROKER_TOPIC", "catalog"),
            ("EVENT_STORE_URL", "postgres://u:p@db/events"),
            ("READ_MODEL_URL", "postgresql://u:p@db/reads"),
            ("PROJECTOR_RETRY_SECS", "1"),
            ("PROJECTOR_REBUILD_ON_START", "true"),
            ("OUTBOX_POLL_MS", "250"),
            ("OUTBOX_BATCH_SIZE", "10"),
            ("EXISTENCE_POLICY", "Permissive"),
            ("METRICS_ADDR", "127.0.0.1:9100"),
            ("LOG_FORMAT", "json"),
        ])
        .unwrap();

        assert_eq!(
            config.broker_url,
            BrokerUrl::Kafka("localhost:9092,localhost:9093".to_string())
        );
        assert_eq!(config.broker_topic, "catalog");
        assert_eq!(
            config.event_store_url,
            StorageUrl::Postgres("postgres://u:p@db/events".to_string())
        );
        assert!(matches!(config.read_model_url, StorageUrl::Postgres(_)));
        assert_eq!(config.projector_retry, Duration::from_secs(1));
        assert!(config.rebuild_on_start);
        assert_eq!(config.outbox_poll_interval, Duration::from_millis(250));
        assert_eq!(config.outbox_batch_size, 10);
        assert_eq!(config.existence_policy, ExistencePolicy::Permissive);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_empty_dead_letter_topic_disables_it() {
        let config = load(&[("DEAD_LETTER_TOPIC", "")]).unwrap();
        assert_eq!(config.dead_letter_topic, None);
    }

    #[test]
    fn test_unsupported_scheme() {
        let err = load(&[("EVENT_STORE_URL", "mysql://db")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::UnsupportedScheme {
                var: "EVENT_STORE_URL",
                ..
            }
        ));

        assert!(load(&[("BROKER_URL", "kafka://")]).is_err());
        assert!(load(&[("BROKER_URL", "amqp://localhost")]).is_err());
    }

    #[test]
    fn test_invalid_numbers_and_flags() {
        assert!(matches!(
            load(&[("PROJECTOR_RETRY_SECS", "soon")]),
            Err(ConfigError::Invalid {
                var: "PROJECTOR_RETRY_SECS",
                ..
            })
        ));
        assert!(load(&[("PROJECTOR_REBUILD_ON_START", "yes")]).is_err());
        assert!(load(&[("OUTBOX_BATCH_SIZE", "0")]).is_err());
        assert!(load(&[("EXISTENCE_POLICY", "lenient")]).is_err());
        assert!(load(&[("LOG_FORMAT", "xml")]).is_err());
        assert!(load(&[("METRICS_ADDR", "nowhere")]).is_err());
    }
}
