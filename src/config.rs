//! Daemon configuration.
//!
//! Read from `~/.benchwatch/config.yaml` when present, then overlaid with
//! `BENCHWATCH_*` environment variables. Every field has a default, so an
//! empty or missing file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{MetricsError, Result};
use crate::settings::{MetricSettings, MetricSettingsItem, MetricsBlockList};

const ENV_PREFIX: &str = "BENCHWATCH_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub distribution_interval_ms: u64,
    pub discovery_timeout_ms: u64,
    pub discovery_interval_secs: u64,
    pub debounce_window_ms: u64,
    pub debounce_max_delay_ms: u64,
    pub log_level: String,
    pub log_json: bool,
    /// Metrics polled from the start.
    pub metrics: Vec<MetricSettingsItem>,
    pub blocked_metrics: MetricsBlockList,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            distribution_interval_ms: 1000,
            discovery_timeout_ms: 5000,
            discovery_interval_secs: 60,
            debounce_window_ms: 200,
            debounce_max_delay_ms: 10_000,
            log_level: "info".into(),
            log_json: false,
            metrics: Vec::new(),
            blocked_metrics: MetricsBlockList::default(),
        }
    }
}

impl Config {
    /// `~/.benchwatch`, if a home directory can be determined.
    pub fn data_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".benchwatch"))
    }

    pub fn default_path() -> Option<PathBuf> {
        Self::data_dir().map(|dir| dir.join("config.yaml"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Default file (if any) plus environment overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path)?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `BENCHWATCH_*` variables read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(v) = var("DISTRIBUTION_INTERVAL_MS") {
            self.distribution_interval_ms = parse_number("DISTRIBUTION_INTERVAL_MS", &v)?;
        }
        if let Some(v) = var("DISCOVERY_TIMEOUT_MS") {
            self.discovery_timeout_ms = parse_number("DISCOVERY_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = var("DISCOVERY_INTERVAL_SECS") {
            self.discovery_interval_secs = parse_number("DISCOVERY_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = var("DEBOUNCE_WINDOW_MS") {
            self.debounce_window_ms = parse_number("DEBOUNCE_WINDOW_MS", &v)?;
        }
        if let Some(v) = var("DEBOUNCE_MAX_DELAY_MS") {
            self.debounce_max_delay_ms = parse_number("DEBOUNCE_MAX_DELAY_MS", &v)?;
        }
        if let Some(v) = var("LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = var("LOG_JSON") {
            self.log_json = matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.distribution_interval_ms == 0 {
            return Err(MetricsError::config("distribution_interval_ms must be positive"));
        }
        if self.discovery_interval_secs == 0 {
            return Err(MetricsError::config("discovery_interval_secs must be positive"));
        }
        if self.debounce_max_delay_ms < self.debounce_window_ms {
            return Err(MetricsError::config(
                "debounce_max_delay_ms must not be shorter than debounce_window_ms",
            ));
        }
        Ok(())
    }

    pub fn distribution_interval(&self) -> Duration {
        Duration::from_millis(self.distribution_interval_ms)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_secs(self.discovery_interval_secs)
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_window_ms)
    }

    pub fn debounce_max_delay(&self) -> Duration {
        Duration::from_millis(self.debounce_max_delay_ms)
    }

    /// The configured metric settings; duplicates are an error.
    pub fn metric_settings(&self) -> Result<MetricSettings> {
        MetricSettings::new(self.metrics.clone(), self.blocked_metrics.clone())
    }
}

fn parse_number(name: &str, value: &str) -> Result<u64> {
    value.trim().parse().map_err(|_| {
        MetricsError::config(format!("{}{} is not a number: '{}'", ENV_PREFIX, name, value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.distribution_interval(), Duration::from_secs(1));
        assert_eq!(config.discovery_timeout(), Duration::from_secs(5));
        assert_eq!(config.debounce_window(), Duration::from_millis(200));
        assert_eq!(config.debounce_max_delay(), Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_yaml_with_metrics() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
discovery_timeout_ms: 2500
log_json: true
metrics:
  - specifier:
      name: Temperature
      group: Sensors
      value_type: {{ kind: double, nullable: false }}
    poll_rate: 60
blocked_metrics:
  - 'Double \ Sensors \ Humidity'
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.discovery_timeout_ms, 2500);
        assert_eq!(config.distribution_interval_ms, 1000);
        assert!(config.log_json);
        assert_eq!(config.metrics.len(), 1);
        assert!(config.metrics[0].enabled);
        assert_eq!(config.metrics[0].poll_rate, 60);
        assert_eq!(config.blocked_metrics.len(), 1);

        let settings = config.metric_settings().unwrap();
        assert_eq!(settings.due(120).len(), 1);
    }

    #[test]
    fn test_empty_file_is_default() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert_eq!(Config::load(file.path()).unwrap(), Config::default());
    }

    #[test]
    fn test_env_overlay() {
        let vars: HashMap<&str, &str> = [
            ("BENCHWATCH_DISCOVERY_INTERVAL_SECS", "30"),
            ("BENCHWATCH_LOG_LEVEL", "debug"),
            ("BENCHWATCH_LOG_JSON", "yes"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config
            .apply_env(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.discovery_interval_secs, 30);
        assert_eq!(config.log_level, "debug");
        assert!(config.log_json);

        let err = config
            .apply_env(|key| (key == "BENCHWATCH_DEBOUNCE_WINDOW_MS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, MetricsError::Config(_)));
    }

    #[test]
    fn test_invalid_debounce_rejected() {
        let config = Config {
            debounce_window_ms: 500,
            debounce_max_delay_ms: 100,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
