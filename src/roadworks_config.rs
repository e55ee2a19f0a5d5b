//! Unified configuration for the roadworks core.
//!
//! Settings are read from `roadworks.toml` and layered as
//! file → environment → CLI flags. Every section is optional.
//!
//! # Configuration File Format
//!
//! ```toml
//! [areas]
//! min_area = 10.0
//! max_area = 1000000.0
//!
//! [sessions]
//! sks = ["2026-11-05", "2027-02-11"]
//! kap = ["2026-11-19"]
//! oks = ["2026-12-03"]
//!
//! [needs]
//! civil_engineering_unit = "civil-engineering"
//!
//! [database]
//! path = "roadworks.db"
//!
//! [logging]
//! level = "info"
//! format = "pretty"
//! ```
//!
//! Dates must be quoted strings (`YYYY-MM-DD`).
//!
//! The engines never read this struct directly. They take a
//! [`LifecycleSettings`] snapshot from a [`ConfigSource`] at the start of
//! each operation, so tests can inject arbitrary bounds.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE_NAME: &str = "roadworks.toml";

/// Area bounds for activity and need footprints, in square metres.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AreasConfig {
    /// Exclusive lower bound.
    #[serde(default = "default_min_area")]
    pub min_area: f64,
    /// Inclusive upper bound.
    #[serde(default = "default_max_area")]
    pub max_area: f64,
}

fn default_min_area() -> f64 {
    10.0
}

fn default_max_area() -> f64 {
    1_000_000.0
}

impl Default for AreasConfig {
    fn default() -> Self {
        Self {
            min_area: default_min_area(),
            max_area: default_max_area(),
        }
    }
}

/// Planned SKS/KAP/OKS session dates. New activities default their planned
/// milestone dates to the next session on or after the creation day.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionsConfig {
    #[serde(default)]
    pub sks: Vec<NaiveDate>,
    #[serde(default)]
    pub kap: Vec<NaiveDate>,
    #[serde(default)]
    pub oks: Vec<NaiveDate>,
}

impl SessionsConfig {
    pub fn next_sks(&self, today: NaiveDate) -> Option<NaiveDate> {
        next_on_or_after(&self.sks, today)
    }

    pub fn next_kap(&self, today: NaiveDate) -> Option<NaiveDate> {
        next_on_or_after(&self.kap, today)
    }

    pub fn next_oks(&self, today: NaiveDate) -> Option<NaiveDate> {
        next_on_or_after(&self.oks, today)
    }
}

fn next_on_or_after(dates: &[NaiveDate], today: NaiveDate) -> Option<NaiveDate> {
    dates.iter().copied().filter(|d| *d >= today).min()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeedsConfig {
    /// Organisational unit whose needs must carry a full cost breakdown.
    #[serde(default = "default_civil_engineering_unit")]
    pub civil_engineering_unit: String,
}

fn default_civil_engineering_unit() -> String {
    "civil-engineering".to_string()
}

impl Default for NeedsConfig {
    fn default() -> Self {
        Self {
            civil_engineering_unit: default_civil_engineering_unit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("roadworks.db")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => anyhow::bail!("Invalid log format '{}'. Valid values: pretty, json", s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `ROADWORKS_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Root of `roadworks.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoadworksConfig {
    #[serde(default)]
    pub areas: AreasConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub needs: NeedsConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RoadworksConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse roadworks.toml")
    }

    /// Load the file if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize roadworks.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply overrides from the process environment.
    pub fn with_env(mut self) -> Result<Self> {
        self.apply_env(|key| std::env::var(key).ok())?;
        Ok(self)
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("ROADWORKS_MIN_AREA") {
            self.areas.min_area = value
                .trim()
                .parse()
                .with_context(|| format!("ROADWORKS_MIN_AREA is not a number: {}", value))?;
        }
        if let Some(value) = lookup("ROADWORKS_MAX_AREA") {
            self.areas.max_area = value
                .trim()
                .parse()
                .with_context(|| format!("ROADWORKS_MAX_AREA is not a number: {}", value))?;
        }
        if let Some(value) = lookup("ROADWORKS_DB_PATH") {
            self.database.path = PathBuf::from(value);
        }
        if let Some(value) = lookup("ROADWORKS_LOG_FORMAT") {
            self.logging.format = value.parse()?;
        }
        Ok(())
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        let AreasConfig { min_area, max_area } = self.areas;
        if !min_area.is_finite() || !max_area.is_finite() {
            anyhow::bail!("Area bounds must be finite numbers");
        }
        if min_area < 0.0 {
            anyhow::bail!("min_area must not be negative (got {})", min_area);
        }
        if min_area >= max_area {
            anyhow::bail!(
                "min_area ({}) must be smaller than max_area ({})",
                min_area,
                max_area
            );
        }
        if self.needs.civil_engineering_unit.trim().is_empty() {
            anyhow::bail!("needs.civil_engineering_unit must not be empty");
        }
        Ok(())
    }

    pub fn lifecycle_settings(&self) -> LifecycleSettings {
        LifecycleSettings {
            min_area: self.areas.min_area,
            max_area: self.areas.max_area,
            sessions: self.sessions.clone(),
            civil_engineering_unit: self.needs.civil_engineering_unit.clone(),
        }
    }
}

/// Configuration snapshot consumed by one lifecycle operation.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleSettings {
    pub min_area: f64,
    pub max_area: f64,
    pub sessions: SessionsConfig,
    pub civil_engineering_unit: String,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        RoadworksConfig::default().lifecycle_settings()
    }
}

impl LifecycleSettings {
    pub fn with_area_bounds(mut self, min_area: f64, max_area: f64) -> Self {
        self.min_area = min_area;
        self.max_area = max_area;
        self
    }
}

/// Supplies a fresh settings snapshot per operation.
pub trait ConfigSource: Send + Sync {
    fn snapshot(&self) -> LifecycleSettings;
}

impl ConfigSource for LifecycleSettings {
    fn snapshot(&self) -> LifecycleSettings {
        self.clone()
    }
}

impl ConfigSource for RoadworksConfig {
    fn snapshot(&self) -> LifecycleSettings {
        self.lifecycle_settings()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn test_defaults_when_sections_missing() -> Result<()> {
        let config = RoadworksConfig::parse("")?;
        assert_eq!(config.areas.min_area, 10.0);
        assert_eq!(config.areas.max_area, 1_000_000.0);
        assert_eq!(config.database.path, PathBuf::from("roadworks.db"));
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_eq!(config.needs.civil_engineering_unit, "civil-engineering");
        config.validate()?;
        Ok(())
    }

    #[test]
    fn test_parse_full_file() -> Result<()> {
        let config = RoadworksConfig::parse(
            r#"
            [areas]
            min_area = 25.0
            max_area = 5000.0

            [sessions]
            sks = ["2026-11-05", "2027-02-11"]
            kap = ["2026-11-19"]

            [logging]
            level = "debug"
            format = "json"
            "#,
        )?;
        assert_eq!(config.areas.min_area, 25.0);
        assert_eq!(config.sessions.sks.len(), 2);
        assert!(config.sessions.oks.is_empty());
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "debug");
        Ok(())
    }

    #[test]
    fn test_validate_rejects_inverted_bounds() {
        let mut config = RoadworksConfig::default();
        config.areas.min_area = 500.0;
        config.areas.max_area = 100.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("must be smaller"));
    }

    #[test]
    fn test_env_overrides_file_values() -> Result<()> {
        let env: HashMap<&str, &str> = [
            ("ROADWORKS_MIN_AREA", "42"),
            ("ROADWORKS_DB_PATH", "/tmp/other.db"),
            ("ROADWORKS_LOG_FORMAT", "json"),
        ]
        .into_iter()
        .collect();
        let mut config = RoadworksConfig::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()))?;
        assert_eq!(config.areas.min_area, 42.0);
        assert_eq!(config.areas.max_area, 1_000_000.0);
        assert_eq!(config.database.path, PathBuf::from("/tmp/other.db"));
        assert_eq!(config.logging.format, LogFormat::Json);
        Ok(())
    }

    #[test]
    fn test_env_rejects_garbage_numbers() {
        let mut config = RoadworksConfig::default();
        let result = config.apply_env(|key| {
            (key == "ROADWORKS_MAX_AREA").then(|| "lots".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_save_and_load_round_trip() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join(CONFIG_FILE_NAME);
        let mut config = RoadworksConfig::default();
        config.sessions.oks = vec![date("2026-12-03")];
        config.save(&path)?;

        let loaded = RoadworksConfig::load_or_default(&path)?;
        assert_eq!(loaded.sessions, config.sessions);

        let missing = RoadworksConfig::load_or_default(&dir.path().join("absent.toml"))?;
        assert!(missing.sessions.oks.is_empty());
        Ok(())
    }

    #[test]
    fn test_next_session_picks_first_on_or_after_today() {
        let sessions = SessionsConfig {
            sks: vec![date("2027-02-11"), date("2026-11-05"), date("2026-06-01")],
            kap: vec![],
            oks: vec![date("2026-10-16")],
        };
        let today = date("2026-10-16");
        assert_eq!(sessions.next_sks(today), Some(date("2026-11-05")));
        assert_eq!(sessions.next_kap(today), None);
        assert_eq!(sessions.next_oks(today), Some(today));
    }

    #[test]
    fn test_settings_snapshot_reflects_config() {
        let mut config = RoadworksConfig::default();
        config.areas.max_area = 1234.0;
        let settings = config.snapshot();
        assert_eq!(settings.max_area, 1234.0);
        let custom = LifecycleSettings::default().with_area_bounds(1.0, 2.0);
        assert_eq!(custom.snapshot().min_area, 1.0);
    }
}
