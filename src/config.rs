use serde::Deserialize;
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use std::collections::HashMap;
use std::time::Duration;

use crate::utils::RetryConfig;

// ============================================================================
// Application Configuration
// ============================================================================
//
// Layers, lowest precedence first:
// 1. Built-in defaults (below)
// 2. Optional file `order-pipeline.{yaml,toml,json}` or $ORDER_PIPELINE_CONFIG
// 3. Environment: ORDER_PIPELINE_<SECTION>__<KEY>, e.g.
//    ORDER_PIPELINE_POSTGRES__HOST=db ORDER_PIPELINE_KAFKA__BROKERS=a:9092,b:9092
//
// ============================================================================

const ENV_PREFIX: &str = "ORDER_PIPELINE";
const CONFIG_PATH_ENV: &str = "ORDER_PIPELINE_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "order-pipeline";

/// Fatal at startup: the process cannot run with this configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub environment: String,
    pub log_filter: String,
    pub postgres: PostgresConfig,
    pub kafka: KafkaConfig,
    pub relay: RelaySettings,
    pub consumer: ConsumerSettings,
    pub ingestion: IngestionSettings,
    pub pricing: PricingSettings,
    pub metrics: MetricsSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            log_filter: "info,order_pipeline=debug".to_string(),
            postgres: PostgresConfig::default(),
            kafka: KafkaConfig::default(),
            relay: RelaySettings::default(),
            consumer: ConsumerSettings::default(),
            ingestion: IngestionSettings::default(),
            pricing: PricingSettings::default(),
            metrics: MetricsSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub ssl_mode: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub max_lifetime_secs: u64,
    /// How long a caller waits for a pooled connection before failing
    pub acquire_timeout_ms: u64,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "postgres-main".to_string(),
            port: 5432,
            database: "delivery".to_string(),
            user: "user".to_string(),
            password: "password".to_string(),
            ssl_mode: "disable".to_string(),
            max_connections: 25,
            min_connections: 5,
            max_lifetime_secs: 300,
            acquire_timeout_ms: 5_000,
        }
    }
}

impl PostgresConfig {
    /// Connection target for the pool. Credentials are passed as fields, so
    /// any characters are allowed in them.
    pub fn connect_options(&self) -> Result<PgConnectOptions, sqlx::Error> {
        let ssl_mode: PgSslMode = self.ssl_mode.parse()?;
        Ok(PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
            .ssl_mode(ssl_mode))
    }

    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    /// Comma-separated bootstrap servers
    pub brokers: String,
    pub topic: String,
    /// -1 (all in-sync replicas), 0 or 1
    pub required_acks: i16,
    pub producer_timeout_ms: u64,
    pub group_id: String,
    pub session_timeout_ms: u64,
    /// Defaults to `<topic>.dlq`
    pub dead_letter_topic: Option<String>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            topic: "user-order".to_string(),
            required_acks: -1,
            producer_timeout_ms: 15_000,
            group_id: "restaurant-group".to_string(),
            session_timeout_ms: 30_000,
            dead_letter_topic: None,
        }
    }
}

impl KafkaConfig {
    pub fn producer_timeout(&self) -> Duration {
        Duration::from_millis(self.producer_timeout_ms)
    }

    pub fn dead_letter_topic(&self) -> String {
        self.dead_letter_topic
            .clone()
            .unwrap_or_else(|| format!("{}.dlq", self.topic))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    pub poll_interval_ms: u64,
    pub batch_size: usize,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            batch_size: 100,
            backoff_initial_ms: 100,
            backoff_max_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RelaySettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn backoff(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: u32::MAX,
            initial_delay: Duration::from_millis(self.backoff_initial_ms),
            max_delay: Duration::from_millis(self.backoff_max_ms),
            multiplier: self.backoff_multiplier,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsumerSettings {
    /// Handler attempts per message before it is parked
    pub max_attempts: u32,
    pub retry_initial_ms: u64,
    pub retry_max_ms: u64,
    /// Buffered messages per partition worker
    pub lane_capacity: usize,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_initial_ms: 200,
            retry_max_ms: 10_000,
            lane_capacity: 64,
        }
    }
}

impl ConsumerSettings {
    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.retry_initial_ms),
            max_delay: Duration::from_millis(self.retry_max_ms),
            multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestionSettings {
    pub request_timeout_ms: u64,
    /// Place one sample order at startup
    pub demo_order: bool,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: 5_000,
            demo_order: false,
        }
    }
}

impl IngestionSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PricingSettings {
    /// Price for products missing from `prices`; unset rejects them
    pub default_price: Option<i64>,
    pub prices: HashMap<i64, i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9090,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        use config::{Config, Environment, File};

        let file = std::env::var(CONFIG_PATH_ENV)
            .map(|path| File::with_name(&path).required(true))
            .unwrap_or_else(|_| File::with_name(DEFAULT_CONFIG_FILE).required(false));

        let config: AppConfig = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.kafka.brokers.trim().is_empty() {
            return invalid("kafka.brokers must not be empty");
        }
        if self.kafka.topic.trim().is_empty() {
            return invalid("kafka.topic must not be empty");
        }
        if self.kafka.group_id.trim().is_empty() {
            return invalid("kafka.group_id must not be empty");
        }
        if !matches!(self.kafka.required_acks, -1 | 0 | 1) {
            return invalid("kafka.required_acks must be -1, 0 or 1");
        }
        if self.kafka.dead_letter_topic() == self.kafka.topic {
            return invalid("kafka.dead_letter_topic must differ from kafka.topic");
        }
        if let Err(e) = self.postgres.connect_options() {
            return Err(ConfigError::Invalid(format!("postgres.ssl_mode: {}", e)));
        }
        if self.postgres.max_connections == 0 {
            return invalid("postgres.max_connections must be at least 1");
        }
        if self.postgres.min_connections > self.postgres.max_connections {
            return invalid("postgres.min_connections exceeds postgres.max_connections");
        }
        if self.relay.batch_size == 0 {
            return invalid("relay.batch_size must be at least 1");
        }
        if self.relay.backoff_multiplier < 1.0 {
            return invalid("relay.backoff_multiplier must be >= 1.0");
        }
        if self.consumer.max_attempts == 0 {
            return invalid("consumer.max_attempts must be at least 1");
        }
        if self.consumer.lane_capacity == 0 {
            return invalid("consumer.lane_capacity must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.kafka.dead_letter_topic(), "user-order.dlq");

        let options = config.postgres.connect_options().unwrap();
        assert_eq!(options.get_host(), "postgres-main");
        assert_eq!(options.get_port(), 5432);
        assert_eq!(options.get_database(), Some("delivery"));
        assert_eq!(options.get_username(), "user");
    }

    #[test]
    fn test_reserved_characters_in_password_keep_target() {
        for password in ["p@ss/w#rd", "s3cr?t", "a:b@c"] {
            let mut config = AppConfig::default();
            config.postgres.password = password.to_string();

            let options = config.postgres.connect_options().unwrap();
            assert_eq!(options.get_host(), "postgres-main");
            assert_eq!(options.get_port(), 5432);
            assert_eq!(options.get_database(), Some("delivery"));
        }
    }

    #[test]
    fn test_rejects_unknown_ssl_mode() {
        let mut config = AppConfig::default();
        config.postgres.ssl_mode = "sometimes".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_bad_acks() {
        let mut config = AppConfig::default();
        config.kafka.required_acks = 2;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_min_above_max_connections() {
        let mut config = AppConfig::default();
        config.postgres.min_connections = 30;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_dead_letter_topic_equal_to_source() {
        let mut config = AppConfig::default();
        config.kafka.dead_letter_topic = Some("user-order".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        use config::{Config, File, FileFormat};

        let yaml = "kafka:\n  topic: orders\nrelay:\n  batch_size: 10\n";
        let config: AppConfig = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.kafka.topic, "orders");
        assert_eq!(config.kafka.group_id, "restaurant-group");
        assert_eq!(config.relay.batch_size, 10);
        assert_eq!(config.relay.poll_interval_ms, 500);
    }
}
