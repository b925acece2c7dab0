use crate::domain::Decimal;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub store_backend: StoreBackend,
    /// Required for the SQLite backend, ignored otherwise.
    pub database_path: Option<String>,
    /// Markup applied when an order has no commercial terms in force.
    pub fallback_markup_percent: Option<Decimal>,
    /// Period of the background sweep; 0 disables it.
    pub sweep_interval_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite,
    Memory,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = env_map
            .get("PORT")
            .map(|s| s.as_str())
            .unwrap_or("8080")
            .parse::<u16>()
            .map_err(|_| {
                ConfigError::InvalidValue("PORT".to_string(), "must be a valid u16".to_string())
            })?;

        let store_backend = match env_map
            .get("STORE_BACKEND")
            .map(|s| s.as_str())
            .unwrap_or("sqlite")
        {
            "sqlite" => StoreBackend::Sqlite,
            "memory" => StoreBackend::Memory,
            other => {
                return Err(ConfigError::InvalidValue(
                    "STORE_BACKEND".to_string(),
                    format!("must be sqlite or memory, got {}", other),
                ))
            }
        };

        let database_path = env_map.get("DATABASE_PATH").cloned();
        if store_backend == StoreBackend::Sqlite && database_path.is_none() {
            return Err(ConfigError::MissingEnv("DATABASE_PATH".to_string()));
        }

        let fallback_markup_percent = match env_map.get("LEDGER_FALLBACK_MARKUP_PERCENT") {
            None => None,
            Some(raw) => {
                let markup = Decimal::from_str_canonical(raw).map_err(|_| {
                    ConfigError::InvalidValue(
                        "LEDGER_FALLBACK_MARKUP_PERCENT".to_string(),
                        "must be a decimal".to_string(),
                    )
                })?;
                if markup.is_negative() {
                    return Err(ConfigError::InvalidValue(
                        "LEDGER_FALLBACK_MARKUP_PERCENT".to_string(),
                        "must be >= 0".to_string(),
                    ));
                }
                Some(markup)
            }
        };

        let sweep_interval_ms = env_map
            .get("SWEEP_INTERVAL_MS")
            .map(|s| s.as_str())
            .unwrap_or("60000")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::InvalidValue(
                    "SWEEP_INTERVAL_MS".to_string(),
                    "must be a valid u64".to_string(),
                )
            })?;

        Ok(Config {
            port,
            store_backend,
            database_path,
            fallback_markup_percent,
            sweep_interval_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_required_env() -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("DATABASE_PATH".to_string(), "/tmp/test.db".to_string());
        map
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_env_map(setup_required_env()).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.store_backend, StoreBackend::Sqlite);
        assert_eq!(config.database_path.as_deref(), Some("/tmp/test.db"));
        assert_eq!(config.fallback_markup_percent, None);
        assert_eq!(config.sweep_interval_ms, 60_000);
    }

    #[test]
    fn test_missing_database_path() {
        let mut env_map = setup_required_env();
        env_map.remove("DATABASE_PATH");
        let result = Config::from_env_map(env_map);
        match result {
            Err(ConfigError::MissingEnv(s)) => assert_eq!(s, "DATABASE_PATH"),
            _ => panic!("Expected MissingEnv error"),
        }
    }

    #[test]
    fn test_memory_backend_needs_no_database() {
        let mut env_map = HashMap::new();
        env_map.insert("STORE_BACKEND".to_string(), "memory".to_string());
        let config = Config::from_env_map(env_map).unwrap();
        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert!(config.database_path.is_none());
    }

    #[test]
    fn test_invalid_port() {
        let mut env_map = setup_required_env();
        env_map.insert("PORT".to_string(), "not_a_number".to_string());
        let result = Config::from_env_map(env_map);
        match result {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "PORT"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_invalid_store_backend() {
        let mut env_map = setup_required_env();
        env_map.insert("STORE_BACKEND".to_string(), "postgres".to_string());
        let result = Config::from_env_map(env_map);
        match result {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "STORE_BACKEND"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_fallback_markup_parsed_and_validated() {
        let mut env_map = setup_required_env();
        env_map.insert(
            "LEDGER_FALLBACK_MARKUP_PERCENT".to_string(),
            "12.5".to_string(),
        );
        let config = Config::from_env_map(env_map.clone()).unwrap();
        assert_eq!(
            config.fallback_markup_percent,
            Some(Decimal::from_str_canonical("12.5").unwrap())
        );

        env_map.insert(
            "LEDGER_FALLBACK_MARKUP_PERCENT".to_string(),
            "-3".to_string(),
        );
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => {
                assert_eq!(k, "LEDGER_FALLBACK_MARKUP_PERCENT")
            }
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_sweep_interval_zero_allowed() {
        let mut env_map = setup_required_env();
        env_map.insert("SWEEP_INTERVAL_MS".to_string(), "0".to_string());
        assert_eq!(Config::from_env_map(env_map).unwrap().sweep_interval_ms, 0);
    }
}
