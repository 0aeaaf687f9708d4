use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::buildtask::FailurePolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub execution: ExecutionConfig,
    pub schema: SchemaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_lifetime_secs: u64,
    /// A checked-out connection held longer than this is reported as a probable leak.
    pub leak_detection_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Upper bound on how long a caller waits for the world writer.
    pub world_timeout_secs: u64,
    pub world_queue_capacity: usize,
    pub failure_policy: FailurePolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaConfig {
    pub allow_destructive_reset: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:data/build_tasks.db".to_string(),
            max_connections: 10,
            min_connections: 2,
            acquire_timeout_secs: 30,
            idle_timeout_secs: 600,
            max_lifetime_secs: 1800,
            leak_detection_ms: 60_000,
        }
    }
}

impl DatabaseConfig {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs)
    }

    pub fn leak_detection_threshold(&self) -> Duration {
        Duration::from_millis(self.leak_detection_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            allow_destructive_reset: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            server: ServerConfig::default(),
            execution: ExecutionConfig::default(),
            schema: SchemaConfig::default(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            world_timeout_secs: 30,
            world_queue_capacity: 256,
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl ExecutionConfig {
    pub fn world_timeout(&self) -> Duration {
        Duration::from_secs(self.world_timeout_secs)
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let failure_policy = match env::var("BUILD_FAILURE_POLICY") {
            Ok(raw) => FailurePolicy::from_str(&raw).map_err(|e| anyhow::anyhow!(e))?,
            Err(_) => FailurePolicy::default(),
        };

        Ok(Self {
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite:data/build_tasks.db".to_string()),
                max_connections: env_or("DB_MAX_CONNECTIONS", 10),
                min_connections: env_or("DB_MIN_CONNECTIONS", 2),
                acquire_timeout_secs: env_or("DB_ACQUIRE_TIMEOUT_SECS", 30),
                idle_timeout_secs: env_or("DB_IDLE_TIMEOUT_SECS", 600),
                max_lifetime_secs: env_or("DB_MAX_LIFETIME_SECS", 1800),
                leak_detection_ms: env_or("DB_LEAK_DETECTION_MS", 60_000),
            },
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env_or("SERVER_PORT", 3000),
            },
            execution: ExecutionConfig {
                world_timeout_secs: env_or("WORLD_TIMEOUT_SECS", 30),
                world_queue_capacity: env_or("WORLD_QUEUE_CAPACITY", 256),
                failure_policy,
            },
            schema: SchemaConfig {
                allow_destructive_reset: env_or("SCHEMA_ALLOW_RESET", false),
            },
        })
    }

    /// Defaults everywhere except the database location.
    pub fn with_database_url(url: impl Into<String>) -> Self {
        Self {
            database: DatabaseConfig::with_url(url),
            ..Self::default()
        }
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}
