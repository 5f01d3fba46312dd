// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for yourmoment-core.

/// Core configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres URL for the relational store
    pub database_url: String,
    /// Base64-encoded 32-byte key for secret columns
    pub encryption_key: String,
    /// Database connection pool size
    pub db_pool_size: u32,
    /// Maximum simultaneously running processes per user
    pub max_processes_per_user: i64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("YOURMOMENT_DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("YOURMOMENT_DATABASE_URL"))?;

        let encryption_key = std::env::var("YOURMOMENT_ENCRYPTION_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("YOURMOMENT_ENCRYPTION_KEY"))?;

        let db_pool_size = std::env::var("YOURMOMENT_DB_POOL_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);

        let max_processes_per_user = std::env::var("YOURMOMENT_MAX_PROCESSES_PER_USER")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);

        Ok(Self {
            database_url,
            encryption_key,
            db_pool_size,
            max_processes_per_user,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// An environment variable holds an unparseable value.
    #[error("Invalid value for {0}")]
    InvalidValue(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Helper to set env vars for a test and restore them after
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    #[test]
    fn test_config_from_env_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("YOURMOMENT_DATABASE_URL", "postgres://localhost/test");
        guard.set("YOURMOMENT_ENCRYPTION_KEY", "a".repeat(43).as_str());
        guard.remove("YOURMOMENT_DB_POOL_SIZE");
        guard.remove("YOURMOMENT_MAX_PROCESSES_PER_USER");

        let config = Config::from_env().unwrap();

        assert_eq!(config.database_url, "postgres://localhost/test");
        assert_eq!(config.db_pool_size, 10);
        assert_eq!(config.max_processes_per_user, 10);
    }

    #[test]
    fn test_config_from_env_all_custom() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set(
            "YOURMOMENT_DATABASE_URL",
            "postgres://user:pass@db:5432/prod",
        );
        guard.set("YOURMOMENT_ENCRYPTION_KEY", "key-material");
        guard.set("YOURMOMENT_DB_POOL_SIZE", "25");
        guard.set("YOURMOMENT_MAX_PROCESSES_PER_USER", "3");

        let config = Config::from_env().unwrap();

        assert_eq!(config.database_url, "postgres://user:pass@db:5432/prod");
        assert_eq!(config.db_pool_size, 25);
        assert_eq!(config.max_processes_per_user, 3);
    }

    #[test]
    fn test_config_missing_database_url() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.remove("YOURMOMENT_DATABASE_URL");
        guard.set("YOURMOMENT_ENCRYPTION_KEY", "key-material");

        let result = Config::from_env();
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::MissingEnvVar("YOURMOMENT_DATABASE_URL")
        ));
    }

    #[test]
    fn test_config_missing_encryption_key() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("YOURMOMENT_DATABASE_URL", "postgres://localhost/test");
        guard.remove("YOURMOMENT_ENCRYPTION_KEY");

        let result = Config::from_env();
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::MissingEnvVar("YOURMOMENT_ENCRYPTION_KEY")
        ));
    }

    #[test]
    fn test_config_error_display() {
        let missing = ConfigError::MissingEnvVar("MY_VAR");
        assert_eq!(
            missing.to_string(),
            "Missing required environment variable: MY_VAR"
        );
    }
}
