//! Configuration for the storage backends.

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

use crate::error::Result;

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Which backend to use and how to reach it.
    pub backend: BackendConfig,
}

/// Backend selection.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    /// Volatile in-process storage.
    Memory,
    /// Redis-backed storage.
    Redis(RedisConfig),
    /// Relational storage.
    Sql(DatabaseConfig),
}

/// Redis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis address as `host:port`, or a full `redis://` URL.
    #[serde(default = "default_redis_address")]
    pub address: String,
    /// Optional password.
    #[serde(default)]
    pub password: Option<String>,
    /// Logical database index.
    #[serde(default)]
    pub db: i64,
    /// Prefix for every key this backend writes.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Connection timeout in seconds.
    #[serde(default = "default_redis_connect_timeout")]
    pub connect_timeout_seconds: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            address: default_redis_address(),
            password: None,
            db: 0,
            key_prefix: default_key_prefix(),
            connect_timeout_seconds: default_redis_connect_timeout(),
        }
    }
}

impl RedisConfig {
    /// Connection URL built from the address, password and database index.
    #[must_use]
    pub fn url(&self) -> String {
        if self.address.starts_with("redis://") || self.address.starts_with("rediss://") {
            return self.address.clone();
        }
        match &self.password {
            Some(password) => format!("redis://:{password}@{}/{}", self.address, self.db),
            None => format!("redis://{}/{}", self.address, self.db),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL (mysql://..., postgres://... or sqlite://...).
    pub url: String,
    /// Maximum connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds.
    #[serde(default = "default_db_connect_timeout")]
    pub connect_timeout_seconds: u64,
    /// Create the `job` table during `init` if it does not exist.
    #[serde(default)]
    pub create_table: bool,
}

impl DatabaseConfig {
    /// Configuration for `url` with default pool settings.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_seconds: default_db_connect_timeout(),
            create_table: false,
        }
    }
}

fn default_redis_address() -> String {
    "127.0.0.1:6379".to_string()
}

fn default_key_prefix() -> String {
    "gearmand:".to_string()
}

const fn default_redis_connect_timeout() -> u64 {
    5
}

const fn default_max_connections() -> u32 {
    10
}

const fn default_min_connections() -> u32 {
    1
}

const fn default_db_connect_timeout() -> u64 {
    30
}

impl StorageConfig {
    /// Load configuration from files and environment.
    ///
    /// # Errors
    ///
    /// Returns error if configuration cannot be loaded or parsed.
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Toml::file("config/default.toml"))
            .merge(Toml::file("config/local.toml"))
            .merge(Env::prefixed("GEARMAND_STORAGE_").split("__"));

        Self::from_figment(&figment)
    }

    /// Extract configuration from an arbitrary figment.
    ///
    /// # Errors
    ///
    /// Returns error if the figment does not describe a valid configuration.
    pub fn from_figment(figment: &Figment) -> Result<Self> {
        let config: Self = figment.extract()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> Result<StorageConfig> {
        StorageConfig::from_figment(&Figment::new().merge(Toml::string(toml)))
    }

    #[test]
    fn test_default_redis_config() {
        let config = RedisConfig::default();
        assert_eq!(config.address, "127.0.0.1:6379");
        assert_eq!(config.key_prefix, "gearmand:");
        assert_eq!(config.url(), "redis://127.0.0.1:6379/0");
    }

    #[test]
    fn test_redis_url_with_password() {
        let config = RedisConfig {
            password: Some("secret".to_string()),
            db: 2,
            ..RedisConfig::default()
        };
        assert_eq!(config.url(), "redis://:secret@127.0.0.1:6379/2");
    }

    #[test]
    fn test_redis_url_passthrough() {
        let config = RedisConfig {
            address: "rediss://cache.internal:6380/1".to_string(),
            ..RedisConfig::default()
        };
        assert_eq!(config.url(), "rediss://cache.internal:6380/1");
    }

    #[test]
    fn test_parse_sql_backend() {
        let config = parse(
            r#"
            [backend]
            kind = "sql"
            url = "mysql://root@localhost:3306/gogearmand"
            max_connections = 4
            "#,
        )
        .unwrap();

        match config.backend {
            BackendConfig::Sql(db) => {
                assert_eq!(db.url, "mysql://root@localhost:3306/gogearmand");
                assert_eq!(db.max_connections, 4);
                assert_eq!(db.min_connections, 1);
                assert_eq!(db.connect_timeout_seconds, 30);
                assert!(!db.create_table);
            }
            other => panic!("expected sql backend, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_redis_backend_defaults() {
        let config = parse(
            r#"
            [backend]
            kind = "redis"
            "#,
        )
        .unwrap();

        match config.backend {
            BackendConfig::Redis(redis) => {
                assert_eq!(redis.address, "127.0.0.1:6379");
                assert_eq!(redis.connect_timeout_seconds, 5);
            }
            other => panic!("expected redis backend, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_memory_backend() {
        let config = parse("backend = { kind = \"memory\" }").unwrap();
        assert!(matches!(config.backend, BackendConfig::Memory));
    }

    #[test]
    fn test_sql_backend_requires_url() {
        let err = parse(
            r#"
            [backend]
            kind = "sql"
            "#,
        )
        .unwrap_err();
        assert_eq!(err.class(), crate::ErrorClass::Initialization);
    }
}
