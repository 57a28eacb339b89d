use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use tracing::warn;

use super::{HtmlConfig, TrendsConfig};
use crate::models::DEFAULT_MODEL_VERSION;

pub const DEFAULT_CONFIG_FILE: &str = "demand-forecast.toml";
const ENV_PREFIX: &str = "DEMAND";

/// Top-level application configuration.
///
/// Layers, lowest precedence first: built-in defaults, the optional TOML file,
/// `DEMAND_*` environment variables (`DEMAND_MODEL__VERSION`: one `_` after the
/// prefix, `__` between nested keys), then the
/// legacy variables `DATABASE_URL`, `SCRAPE_BASE_URL`, `REQUESTS_TIMEOUT`,
/// `REQUESTS_SLEEP_BETWEEN` and `USER_AGENT`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub html: HtmlConfig,
    pub trends: TrendsConfig,
    pub model: ModelConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub path: PathBuf,
    pub version: String,
    pub horizon_days: i64,
    pub train_lookback_days: i64,
    pub train_gap_days: i64,
    pub recommendation_offset_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl AppConfig {
    /// Load configuration from an optional file plus the environment
    pub fn load(path: Option<&str>) -> Result<Self> {
        let file = path.unwrap_or(DEFAULT_CONFIG_FILE);

        let settings = config::Config::builder()
            .add_source(config::File::with_name(file).required(path.is_some()))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {}", file))?;

        let mut app_config: AppConfig = settings
            .try_deserialize()
            .with_context(|| format!("Failed to parse configuration from {}", file))?;

        app_config.apply_legacy_env(|key| env::var(key).ok());
        Ok(app_config)
    }

    /// Apply the flat legacy variables on top of the layered configuration
    pub fn apply_legacy_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DATABASE_URL") {
            self.database.path = PathBuf::from(sqlite_path_from_url(&url));
        }

        if let Some(base_url) = lookup("SCRAPE_BASE_URL") {
            self.html.site.base_url = base_url;
        }

        if let Some(timeout) = lookup("REQUESTS_TIMEOUT") {
            match timeout.trim().parse::<u64>() {
                Ok(seconds) => self.html.scraping.timeout_seconds = seconds,
                Err(_) => warn!("Ignoring invalid REQUESTS_TIMEOUT: {}", timeout),
            }
        }

        if let Some(sleep) = lookup("REQUESTS_SLEEP_BETWEEN") {
            match sleep.trim().parse::<f64>() {
                Ok(seconds) if seconds >= 0.0 => {
                    self.html.scraping.delay_between_requests_ms = (seconds * 1000.0).round() as u64
                }
                _ => warn!("Ignoring invalid REQUESTS_SLEEP_BETWEEN: {}", sleep),
            }
        }

        if let Some(user_agent) = lookup("USER_AGENT") {
            self.html.site.user_agent = user_agent;
        }
    }
}

/// Accept either a bare path or a `sqlite://` style URL
fn sqlite_path_from_url(url: &str) -> String {
    url.strip_prefix("sqlite:///")
        .map(|rest| format!("/{}", rest))
        .or_else(|| url.strip_prefix("sqlite://").map(|rest| rest.to_string()))
        .or_else(|| url.strip_prefix("sqlite:").map(|rest| rest.to_string()))
        .unwrap_or_else(|| url.to_string())
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/demand.db"),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("models/demand_model.json"),
            version: DEFAULT_MODEL_VERSION.to_string(),
            horizon_days: 30,
            train_lookback_days: 365,
            train_gap_days: 30,
            recommendation_offset_days: 30,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    // Tests that call `AppConfig::load` read the process environment
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    struct EnvVar(&'static str);

    impl EnvVar {
        fn set(key: &'static str, value: &str) -> Self {
            unsafe { env::set_var(key, value) };
            Self(key)
        }
    }

    impl Drop for EnvVar {
        fn drop(&mut self) {
            unsafe { env::remove_var(self.0) };
        }
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.database.path, PathBuf::from("data/demand.db"));
        assert_eq!(config.model.version, "rf_v1");
        assert_eq!(config.model.horizon_days, 30);
        assert_eq!(config.html.site.user_agent, "demand-forecast-bot/1.0");
    }

    #[test]
    fn test_legacy_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("DATABASE_URL", "sqlite:///var/lib/demand.db"),
            ("SCRAPE_BASE_URL", "https://example.ru/catalog/"),
            ("REQUESTS_TIMEOUT", "20"),
            ("REQUESTS_SLEEP_BETWEEN", "0.5"),
            ("USER_AGENT", "test-agent/2.0"),
        ]);

        let mut config = AppConfig::default();
        config.apply_legacy_env(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.database.path, PathBuf::from("/var/lib/demand.db"));
        assert_eq!(config.html.site.base_url, "https://example.ru/catalog/");
        assert_eq!(config.html.scraping.timeout_seconds, 20);
        assert_eq!(config.html.scraping.delay_between_requests_ms, 500);
        assert_eq!(config.html.site.user_agent, "test-agent/2.0");
    }

    #[test]
    fn test_invalid_legacy_values_are_ignored() {
        let mut config = AppConfig::default();
        config.apply_legacy_env(|key| match key {
            "REQUESTS_TIMEOUT" => Some("soon".to_string()),
            "REQUESTS_SLEEP_BETWEEN" => Some("-1".to_string()),
            _ => None,
        });

        assert_eq!(config.html.scraping.timeout_seconds, 15);
        assert_eq!(config.html.scraping.delay_between_requests_ms, 1200);
    }

    #[test]
    fn test_sqlite_url_forms() {
        assert_eq!(sqlite_path_from_url("sqlite://data/x.db"), "data/x.db");
        assert_eq!(sqlite_path_from_url("sqlite:///abs/x.db"), "/abs/x.db");
        assert_eq!(sqlite_path_from_url("plain.db"), "plain.db");
    }

    #[test]
    fn test_load_from_toml_file() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.toml");
        std::fs::write(
            &path,
            r#"
[database]
path = "custom.db"

[html.scraping]
max_pages = 3

[model]
version = "rf_v2"
"#,
        )
        .unwrap();

        let config = AppConfig::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(config.html.scraping.max_pages, 3);
        assert_eq!(config.model.version, "rf_v2");
        // Untouched sections keep their defaults
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.html.scraping.delay_between_requests_ms, 1200);
    }

    #[test]
    fn test_prefixed_env_overrides_file() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.toml");
        std::fs::write(&path, "[model]\nversion = \"rf_v2\"\nhorizon_days = 14\n").unwrap();

        let _version = EnvVar::set("DEMAND_MODEL__VERSION", "rf_env");
        let _ignored = EnvVar::set("DEMAND__MODEL__HORIZON_DAYS", "99");

        let config = AppConfig::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(config.model.version, "rf_env");
        // A doubled prefix separator is not a recognised key
        assert_eq!(config.model.horizon_days, 14);
    }
}
