use std::{env, fmt::Display, str::FromStr};

use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment variable {0} must be set")]
    Missing(&'static str),

    #[error("Invalid {key} value: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct RabbitMqConfig {
    pub uri: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct AdminBootstrap {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub mongodb_uri: Option<String>,
    pub mongodb_db: String,
    pub rabbitmq: Option<RabbitMqConfig>,
    pub jwt_secret: String,
    pub access_token_ttl_secs: i64,
    pub refresh_token_ttl_secs: i64,
    pub admin: Option<AdminBootstrap>,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let rabbitmq = match optional("RABBITMQ_URI") {
            Some(uri) => Some(RabbitMqConfig {
                uri,
                port: try_load("RABBITMQ_PORT", "5672")?,
                username: try_load("RABBITMQ_USER", "guest")?,
                password: try_load("RABBITMQ_PASS", "guest")?,
            }),
            None => None,
        };

        let admin = match (optional("ADMIN_USERNAME"), optional("ADMIN_PASSWORD")) {
            (Some(username), Some(password)) => Some(AdminBootstrap {
                email: optional("ADMIN_EMAIL").unwrap_or_else(|| format!("{}@reachhub.local", username)),
                username,
                password,
            }),
            _ => None,
        };

        Ok(Self {
            port: try_load("AXUM_PORT", "8000")?,
            mongodb_uri: optional("MONGODB_URI"),
            mongodb_db: try_load("MONGODB_DB", "reachhub")?,
            rabbitmq,
            jwt_secret: optional("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?,
            access_token_ttl_secs: try_load("ACCESS_TOKEN_TTL_SECS", "300")?,
            refresh_token_ttl_secs: try_load("REFRESH_TOKEN_TTL_SECS", "86400")?,
            admin,
        })
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn try_load<T: FromStr>(key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    optional(key)
        .unwrap_or_else(|| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e: T::Err| {
            warn!("Invalid {key} value: {e}");
            ConfigError::Invalid {
                key,
                reason: e.to_string(),
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_load_falls_back_to_default() {
        let port: u16 = try_load("REACHHUB_TEST_UNSET_PORT", "8123").unwrap();
        assert_eq!(port, 8123);
    }

    #[test]
    fn try_load_reports_unparseable_values() {
        env::set_var("REACHHUB_TEST_BAD_PORT", "not-a-port");

        let result: Result<u16, ConfigError> = try_load("REACHHUB_TEST_BAD_PORT", "8000");
        assert!(matches!(result, Err(ConfigError::Invalid { key: "REACHHUB_TEST_BAD_PORT", .. })));
    }
}
