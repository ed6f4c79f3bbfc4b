use std::path::PathBuf;
use std::str::FromStr;

use url::Url;

use crate::errors::Error;

/// All configuration comes from the environment (or a `.env` file loaded by
/// the CLI), prefixed with `PY_LOAD_EUROSTAT_` and nested with `__`.
const ENV_PREFIX: &str = "PY_LOAD_EUROSTAT_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseType {
    Postgres,
    Sqlite,
}

impl FromStr for DatabaseType {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "postgres" => Ok(DatabaseType::Postgres),
            "sqlite" => Ok(DatabaseType::Sqlite),
            other => Err(Error::Config(format!("unsupported database type: {other}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    /// Database name for Postgres, file path for SQLite.
    pub name: String,
    pub use_unlogged_tables: bool,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub path: PathBuf,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: String,
}

#[derive(Debug, Clone)]
pub struct EurostatSettings {
    pub base_url: Url,
    pub sdmx_api_version: String,
    pub sdmx_agency_id: String,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub db_type: DatabaseType,
    pub managed_datasets_path: PathBuf,
    pub db: DatabaseSettings,
    pub cache: CacheSettings,
    pub log: LoggingSettings,
    pub eurostat: EurostatSettings,
}

impl Settings {
    pub fn from_env() -> Result<Settings, Error> {
        let db_type = match var("DB_TYPE") {
            Some(value) => value.parse()?,
            None => DatabaseType::Postgres,
        };

        let db = DatabaseSettings {
            host: var("DB__HOST").unwrap_or_else(|| "localhost".to_string()),
            port: parsed_var("DB__PORT")?.unwrap_or(5432),
            user: var("DB__USER").unwrap_or_else(|| "postgres".to_string()),
            password: var("DB__PASSWORD"),
            name: var("DB__NAME").unwrap_or_else(|| "eurostat".to_string()),
            use_unlogged_tables: bool_var("DB__USE_UNLOGGED_TABLES")?.unwrap_or(true),
        };

        let cache = CacheSettings {
            path: var("CACHE__PATH").map(PathBuf::from).unwrap_or_else(default_cache_path),
            enabled: bool_var("CACHE__ENABLED")?.unwrap_or(true),
        };

        let log = LoggingSettings {
            level: var("LOG__LEVEL").unwrap_or_else(|| "INFO".to_string()),
        };

        let base_url = var("EUROSTAT__BASE_URL")
            .unwrap_or_else(|| "https://ec.europa.eu/eurostat/api/dissemination".to_string());
        let base_url = Url::parse(&base_url)
            .map_err(|err| Error::Config(format!("invalid EUROSTAT__BASE_URL: {err}")))?;

        let eurostat = EurostatSettings {
            base_url,
            sdmx_api_version: var("EUROSTAT__SDMX_API_VERSION").unwrap_or_else(|| "2.1".to_string()),
            sdmx_agency_id: var("EUROSTAT__SDMX_AGENCY_ID").unwrap_or_else(|| "ESTAT".to_string()),
        };

        Ok(Settings {
            db_type,
            managed_datasets_path: var("MANAGED_DATASETS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("managed_datasets.yml")),
            db,
            cache,
            log,
            eurostat,
        })
    }
}

fn var(key: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{key}"))
        .ok()
        .filter(|value| !value.is_empty())
}

fn parsed_var<T>(key: &str) -> Result<Option<T>, Error>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|err| Error::Config(format!("invalid value for {ENV_PREFIX}{key}: {err}"))),
        None => Ok(None),
    }
}

fn bool_var(key: &str) -> Result<Option<bool>, Error> {
    match var(key) {
        Some(value) => parse_bool(&value)
            .map(Some)
            .ok_or_else(|| Error::Config(format!("invalid boolean for {ENV_PREFIX}{key}: {value}"))),
        None => Ok(None),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn default_cache_path() -> PathBuf {
    let home = std::env::var("HOME").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("."));
    home.join(".cache").join("py-load-eurostat")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_booleans() {
        assert_eq!(parse_bool("true"), Some(true));
        assert_eq!(parse_bool("False"), Some(false));
        assert_eq!(parse_bool("1"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parses_database_type() {
        assert_eq!("postgres".parse::<DatabaseType>().unwrap(), DatabaseType::Postgres);
        assert_eq!("SQLite".parse::<DatabaseType>().unwrap(), DatabaseType::Sqlite);
        assert!("oracle".parse::<DatabaseType>().is_err());
    }

    // Environment mutation happens in a single test so parallel test threads
    // never observe each other's values.
    #[test]
    fn settings_read_defaults_and_overrides() {
        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.db_type, DatabaseType::Postgres);
        assert_eq!(settings.db.host, "localhost");
        assert_eq!(settings.db.port, 5432);
        assert!(settings.db.use_unlogged_tables);
        assert!(settings.cache.enabled);
        assert_eq!(
            settings.eurostat.base_url.as_str(),
            "https://ec.europa.eu/eurostat/api/dissemination"
        );
        assert_eq!(settings.eurostat.sdmx_agency_id, "ESTAT");

        std::env::set_var("PY_LOAD_EUROSTAT_DB_TYPE", "sqlite");
        std::env::set_var("PY_LOAD_EUROSTAT_DB__NAME", "test.db");
        std::env::set_var("PY_LOAD_EUROSTAT_DB__USE_UNLOGGED_TABLES", "false");
        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.db_type, DatabaseType::Sqlite);
        assert_eq!(settings.db.name, "test.db");
        assert!(!settings.db.use_unlogged_tables);

        std::env::remove_var("PY_LOAD_EUROSTAT_DB_TYPE");
        std::env::remove_var("PY_LOAD_EUROSTAT_DB__NAME");
        std::env::remove_var("PY_LOAD_EUROSTAT_DB__USE_UNLOGGED_TABLES");
    }
}
