use std::{env, fmt::Display, path::PathBuf, str::FromStr, time::Duration};
use thiserror::Error;

use crate::search::DEFAULT_DEBOUNCE;

const DEFAULT_CATALOG_URL: &str = "https://www.themealdb.com/api/json/v1/1";
const DEFAULT_DB_PATH: &str = "/tmp/recipe-finder/favorites.db";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {key} value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub catalog_url: String,
    pub db_path: PathBuf,
    pub debounce: Duration,
    pub http_timeout: Duration,
    pub default_term: String,
    pub session_idle: Duration,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            catalog_url: try_load(&lookup, "CATALOG_BASE_URL", DEFAULT_CATALOG_URL)?,
            db_path: try_load(&lookup, "FAVORITES_DB", DEFAULT_DB_PATH)?,
            debounce: Duration::from_millis(try_load(
                &lookup,
                "SEARCH_DEBOUNCE_MS",
                &DEFAULT_DEBOUNCE.as_millis().to_string(),
            )?),
            http_timeout: Duration::from_secs(try_load(&lookup, "HTTP_TIMEOUT_SECS", "30")?),
            default_term: try_load(&lookup, "DEFAULT_SEARCH_TERM", "chicken")?,
            session_idle: Duration::from_secs(try_load(&lookup, "SESSION_IDLE_SECS", "3600")?),
        })
    }
}

fn try_load<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: &str,
) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    let value = lookup(key).unwrap_or_else(|| {
        log::info!("{key} not set, using default: {default}");
        default.to_string()
    });
    match value.trim().parse() {
        Ok(parsed) => Ok(parsed),
        Err(e) => Err(ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value,
        }),
    }
}
