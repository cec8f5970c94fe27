// src/config.rs

use std::env;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key} has an invalid value: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    /// When absent the service runs on the in-memory store.
    pub mongo_uri: Option<String>,
    pub database_name: String,
    pub jwt_secret: String,
    pub jwt_expiration_hours: i64,
    pub bcrypt_cost: u32,
    pub frontend_origin: String,
    pub recent_activity_hours: i64,
}

fn parsed<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Defaults for everything except the signing secret.
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            mongo_uri: None,
            database_name: "team_productivity".to_string(),
            jwt_secret: jwt_secret.into(),
            jwt_expiration_hours: 24,
            bcrypt_cost: bcrypt::DEFAULT_COST,
            frontend_origin: "http://localhost:3000".to_string(),
            recent_activity_hours: 24,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        let jwt_secret = env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?;
        let defaults = Self::new(jwt_secret);

        Ok(Self {
            bind_addr: env::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
            mongo_uri: env::var("MONGO_URI").ok().filter(|uri| !uri.trim().is_empty()),
            database_name: env::var("DATABASE_NAME").unwrap_or(defaults.database_name),
            jwt_expiration_hours: parsed("JWT_EXPIRATION_HOURS", defaults.jwt_expiration_hours)?,
            bcrypt_cost: parsed("BCRYPT_COST", defaults.bcrypt_cost)?,
            frontend_origin: env::var("FRONTEND_ORIGIN").unwrap_or(defaults.frontend_origin),
            recent_activity_hours: parsed("RECENT_ACTIVITY_HOURS", defaults.recent_activity_hours)?,
            jwt_secret: defaults.jwt_secret,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_fills_in_defaults() {
        let config = Config::new("s3cret");
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.database_name, "team_productivity");
        assert_eq!(config.jwt_expiration_hours, 24);
        assert_eq!(config.recent_activity_hours, 24);
        assert!(config.mongo_uri.is_none());
    }

    #[test]
    fn invalid_number_is_reported_with_its_key() {
        env::set_var("TP_TEST_HOURS", "soon");
        let err = parsed::<i64>("TP_TEST_HOURS", 24).unwrap_err();
        assert_eq!(err.to_string(), "TP_TEST_HOURS has an invalid value: soon");
        env::remove_var("TP_TEST_HOURS");
        assert_eq!(parsed::<i64>("TP_TEST_HOURS", 24).unwrap(), 24);
    }
}
