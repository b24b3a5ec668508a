//! Configuration module for bookkeeping-service.

use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone)]
pub struct BookkeepingConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub grpc_port: u16,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub trace_queries: bool,
    pub database: DatabaseConfig,
    pub security: SecurityConfig,
    pub workers: WorkerConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub replica_url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub migrate: bool,
    pub migrations_path: String,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub run_securely: bool,
    pub oidc_audience: String,
    pub oidc_issuer: String,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_count: usize,
    pub pipe_capacity: usize,
    pub search_batch_size: i64,
}

impl BookkeepingConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required")))?;
        Self::from_env_with(common, database_url)
    }

    /// Build from the environment with an explicit HTTP config and database
    /// URL. Tests use this to point at their own database and ports.
    pub fn from_env_with(
        common: core_config::Config,
        database_url: String,
    ) -> Result<Self, AppError> {
        let grpc_port = match env::var("GRPC_PORT") {
            Ok(raw) => raw.parse().map_err(|_| {
                AppError::ConfigError(anyhow::anyhow!("GRPC_PORT is not a port: {}", raw))
            })?,
            Err(_) if common.port == 0 => 0,
            Err(_) => common.port.checked_add(1).ok_or_else(|| {
                AppError::ConfigError(anyhow::anyhow!("HTTP port leaves no room for gRPC"))
            })?,
        };

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "bookkeeping-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            grpc_port,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            trace_queries: env_flag("TRACE_QUERIES", false),
            database: DatabaseConfig {
                url: database_url,
                replica_url: env::var("DATABASE_REPLICA_URL")
                    .ok()
                    .filter(|s| !s.is_empty()),
                max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 10),
                min_connections: env_parse("DATABASE_MIN_CONNECTIONS", 2),
                migrate: env_flag("DATABASE_MIGRATE", true),
                migrations_path: env::var("DATABASE_MIGRATIONS_PATH")
                    .unwrap_or_else(|_| "./migrations".to_string()),
            },
            security: SecurityConfig {
                run_securely: env_flag("RUN_SECURELY", false),
                oidc_audience: env::var("OIDC_AUDIENCE").unwrap_or_default(),
                oidc_issuer: env::var("OIDC_ISSUER").unwrap_or_default(),
            },
            workers: WorkerConfig {
                worker_count: env_parse("WORKER_COUNT", 8),
                pipe_capacity: env_parse("PIPE_CAPACITY", 4),
                search_batch_size: env_parse("SEARCH_BATCH_SIZE", 50),
            },
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(raw) => parse_flag(&raw).unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag(" on "), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn test_env_parse_falls_back() {
        assert_eq!(env_parse("BOOKKEEPING_TEST_UNSET_VALUE", 7usize), 7);
    }

    #[test]
    #[serial]
    fn test_grpc_port_follows_http_port() {
        env::remove_var("GRPC_PORT");
        let config =
            BookkeepingConfig::from_env_with(core_config::Config::with_port(9000), "postgres://x".into())
                .unwrap();
        assert_eq!(config.grpc_port, 9001);
        assert_eq!(config.workers.search_batch_size, 50);
        assert!(!config.security.run_securely);

        let config =
            BookkeepingConfig::from_env_with(core_config::Config::with_port(0), "postgres://x".into())
                .unwrap();
        assert_eq!(config.grpc_port, 0);
    }

    #[test]
    #[serial]
    fn test_grpc_port_override() {
        env::set_var("GRPC_PORT", "7443");
        let config =
            BookkeepingConfig::from_env_with(core_config::Config::with_port(9000), "postgres://x".into());
        env::set_var("GRPC_PORT", "not-a-port");
        let invalid =
            BookkeepingConfig::from_env_with(core_config::Config::with_port(9000), "postgres://x".into());
        env::remove_var("GRPC_PORT");

        assert_eq!(config.unwrap().grpc_port, 7443);
        assert!(invalid.is_err());
    }
}
