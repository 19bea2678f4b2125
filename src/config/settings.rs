use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// Includes settings for the broker and for logging.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub logging: LoggingSettings,
}

/// Configuration settings for the broker.
///
/// Controls the replay window and the two delivery pipelines.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BrokerSettings {
    /// Maximum age of a message kept for replay, in milliseconds. `0` disables replay.
    pub replay_window_ms: i64,
    /// Worker threads for synchronous sends. `1` delivers inline on the caller's thread.
    pub sync_workers: usize,
    /// Shards of the asynchronous pipeline. `0` disables asynchronous sends.
    pub async_shards: usize,
    /// Bound of each work queue shard.
    pub queue_capacity: usize,
    /// Attempts per asynchronous delivery before it is logged and dropped.
    pub max_delivery_attempts: u32,
    /// Pause between asynchronous delivery attempts, in milliseconds.
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub broker: Option<PartialBrokerSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

/// Partial broker settings.
#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub replay_window_ms: Option<i64>,
    pub sync_workers: Option<usize>,
    pub async_shards: Option<usize>,
    pub queue_capacity: Option<usize>,
    pub max_delivery_attempts: Option<u32>,
    pub retry_backoff_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            replay_window_ms: 5000,
            sync_workers: 1,
            async_shards: 1,
            queue_capacity: 1024,
            max_delivery_attempts: 3,
            retry_backoff_ms: 10,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Provides default values for `Settings`.
///
/// Ensures the application has sensible defaults if no configuration is provided.
impl Default for Settings {
    fn default() -> Self {
        Self {
            broker: BrokerSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl PartialBrokerSettings {
    fn merge(self, default: BrokerSettings) -> BrokerSettings {
        BrokerSettings {
            replay_window_ms: self.replay_window_ms.unwrap_or(default.replay_window_ms),
            sync_workers: self.sync_workers.unwrap_or(default.sync_workers),
            async_shards: self.async_shards.unwrap_or(default.async_shards),
            queue_capacity: self.queue_capacity.unwrap_or(default.queue_capacity),
            max_delivery_attempts: self
                .max_delivery_attempts
                .unwrap_or(default.max_delivery_attempts),
            retry_backoff_ms: self.retry_backoff_ms.unwrap_or(default.retry_backoff_ms),
        }
    }
}

impl PartialSettings {
    /// Fills every missing value from `Settings::default()`.
    pub fn merge_with_defaults(self) -> Settings {
        let default = Settings::default();
        Settings {
            broker: match self.broker {
                Some(partial) => partial.merge(default.broker),
                None => default.broker,
            },
            logging: LoggingSettings {
                level: self
                    .logging
                    .and_then(|l| l.level)
                    .unwrap_or(default.logging.level),
            },
        }
    }
}
