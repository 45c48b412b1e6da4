use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::admission::AdmissionConfig;
use crate::load::LoadConfig;
use crate::logging::LogConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::risk::RiskPolicy;

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application metadata
    pub metadata: ConfigMetadata,

    /// General application settings
    pub settings: AppSettings,

    /// Load estimator time constants and readiness weights
    #[serde(default)]
    pub load: LoadConfig,

    /// Safety policy thresholds
    #[serde(default)]
    pub risk: RiskPolicy,

    #[serde(default)]
    pub admission: AdmissionConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    #[serde(default)]
    pub logging: LogConfig,
}

/// Configuration metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigMetadata {
    /// Configuration format version
    pub version: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last modification timestamp
    pub updated_at: DateTime<Utc>,
}

/// General application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    /// Data directory path
    pub data_dir: PathBuf,

    /// SQLite file name, relative to `data_dir` unless absolute
    pub database_file: PathBuf,
}

impl Default for AppSettings {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("coachrs");

        Self {
            data_dir,
            database_file: PathBuf::from("coachrs.db"),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            metadata: ConfigMetadata {
                version: env!("CARGO_PKG_VERSION").to_string(),
                created_at: now,
                updated_at: now,
            },
            settings: AppSettings::default(),
            load: LoadConfig::default(),
            risk: RiskPolicy::default(),
            admission: AdmissionConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: AppConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path.as_ref()))?;

        Ok(config)
    }

    /// Save configuration to file, creating parent directories as needed
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(&path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Default config location: `~/.coachrs/config.toml`
    pub fn default_config_path() -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or_else(|| anyhow!("Could not determine home directory"))?;
        Ok(home.join(".coachrs").join("config.toml"))
    }

    /// Load from the given path or the default one, falling back to defaults
    /// when the file is absent. A file that exists but does not parse is an error.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_config_path()?,
        };

        if path.exists() {
            Self::load_from_file(&path)
        } else {
            tracing::debug!(path = ?path, "No config file found, using defaults");
            Ok(Self::default())
        }
    }

    pub fn save(&mut self, path: Option<&Path>) -> Result<()> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_config_path()?,
        };
        self.metadata.updated_at = Utc::now();
        self.save_to_file(path)
    }

    /// Resolved path of the SQLite database
    pub fn database_path(&self) -> PathBuf {
        if self.settings.database_file.is_absolute() {
            self.settings.database_file.clone()
        } else {
            self.settings.data_dir.join(&self.settings.database_file)
        }
    }

    /// Read a value by dotted key, e.g. `risk.min_rest_days`
    pub fn get_value(&self, key: &str) -> Result<Option<String>> {
        let root = toml::Value::try_from(self).context("Failed to serialize configuration")?;
        let mut current = &root;

        for part in key.split('.') {
            match current.get(part) {
                Some(value) => current = value,
                None if OPTIONAL_KEYS.contains(&key) => return Ok(None),
                None => bail!("Unknown config key: {}", key),
            }
        }

        Ok(Some(match current {
            toml::Value::String(s) => s.clone(),
            other => other.to_string(),
        }))
    }

    /// Set a value by dotted key. The raw string is coerced to the type of
    /// the current value and the whole config is re-validated by deserializing.
    pub fn set_value(&mut self, key: &str, raw: &str) -> Result<()> {
        let mut root = toml::Value::try_from(&*self).context("Failed to serialize configuration")?;
        let parts: Vec<&str> = key.split('.').collect();
        let (leaf, sections) = match parts.split_last() {
            Some((leaf, sections)) if !sections.is_empty() => (*leaf, sections),
            _ => bail!("Config key must be of the form section.name: {}", key),
        };

        let mut table = &mut root;
        for section in sections {
            table = table
                .get_mut(*section)
                .filter(|v| v.is_table())
                .ok_or_else(|| anyhow!("Unknown config section: {}", section))?;
        }

        let table = table
            .as_table_mut()
            .ok_or_else(|| anyhow!("Not a config section: {}", key))?;

        let value = match table.get(leaf) {
            Some(existing) => coerce_like(existing, raw)
                .with_context(|| format!("Invalid value for {}: {}", key, raw))?,
            None if OPTIONAL_KEYS.contains(&key) => infer_value(raw),
            None => bail!("Unknown config key: {}", key),
        };
        table.insert(leaf.to_string(), value);

        let updated: AppConfig = root
            .try_into()
            .with_context(|| format!("Invalid value for {}: {}", key, raw))?;

        *self = updated;
        Ok(())
    }
}

fn coerce_like(existing: &toml::Value, raw: &str) -> Result<toml::Value> {
    Ok(match existing {
        toml::Value::String(_) => toml::Value::String(raw.to_string()),
        toml::Value::Integer(_) => toml::Value::Integer(raw.parse()?),
        toml::Value::Float(_) => toml::Value::Float(raw.parse()?),
        toml::Value::Boolean(_) => toml::Value::Boolean(raw.parse()?),
        _ => bail!("only scalar values can be set"),
    })
}

/// Used for keys currently unset (`None` options are omitted from TOML)
fn infer_value(raw: &str) -> toml::Value {
    if let Ok(i) = raw.parse::<i64>() {
        toml::Value::Integer(i)
    } else if let Ok(b) = raw.parse::<bool>() {
        toml::Value::Boolean(b)
    } else {
        toml::Value::String(raw.to_string())
    }
}

/// Optional keys that may legitimately be absent from the serialized form
const OPTIONAL_KEYS: &[&str] = &[
    "admission.approval_timeout_hours",
    "logging.file_path",
];

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.load.acute_time_constant, 7);
        assert_eq!(config.load.chronic_time_constant, 28);
        assert_eq!(config.admission.approval_timeout_hours, Some(72));
        assert_eq!(config.risk.volume_increase_ceiling_pct, dec!(10));
        assert_eq!(config.settings.database_file, PathBuf::from("coachrs.db"));
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.risk.min_rest_days = 2;
        config.save_to_file(&path).unwrap();

        let loaded = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[metadata]
version = "0.1.0"
created_at = "2024-01-01T00:00:00Z"
updated_at = "2024-01-01T00:00:00Z"

[settings]
data_dir = "/tmp/coach"
database_file = "coach.db"

[risk]
min_rest_days = 2
"#,
        )
        .unwrap();

        let config = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(config.risk.min_rest_days, 2);
        assert_eq!(config.risk.long_session_min, RiskPolicy::default().long_session_min);
        assert_eq!(config.load, LoadConfig::default());
        assert_eq!(config.database_path(), PathBuf::from("/tmp/coach/coach.db"));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempdir().unwrap();
        let config = AppConfig::load_or_default(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.risk, RiskPolicy::default());
    }

    #[test]
    fn test_load_or_default_rejects_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "not = [valid").unwrap();
        assert!(AppConfig::load_or_default(Some(&path)).is_err());
    }

    #[test]
    fn test_dotted_get_and_set() {
        let mut config = AppConfig::default();

        assert_eq!(config.get_value("risk.min_rest_days").unwrap().as_deref(), Some("1"));
        config.set_value("risk.min_rest_days", "2").unwrap();
        assert_eq!(config.risk.min_rest_days, 2);

        config.set_value("risk.max_high_intensity_pct", "25").unwrap();
        assert_eq!(config.risk.max_high_intensity_pct, dec!(25));

        config.set_value("logging.level", "debug").unwrap();
        assert_eq!(config.logging.level, crate::logging::LogLevel::Debug);

        config.set_value("orchestrator.cache_load_states", "false").unwrap();
        assert!(!config.orchestrator.cache_load_states);
    }

    #[test]
    fn test_dotted_set_optional_key() {
        let mut config = AppConfig::default();
        config.admission.approval_timeout_hours = None;

        assert_eq!(config.get_value("admission.approval_timeout_hours").unwrap(), None);
        config.set_value("admission.approval_timeout_hours", "48").unwrap();
        assert_eq!(config.admission.approval_timeout_hours, Some(48));
    }

    #[test]
    fn test_dotted_set_rejects_bad_input() {
        let mut config = AppConfig::default();
        assert!(config.set_value("risk.min_rest_days", "many").is_err());
        assert!(config.set_value("logging.level", "loud").is_err());
        assert!(config.set_value("nosuch.key", "1").is_err());
        assert!(config.set_value("toplevel", "1").is_err());
        assert!(config.get_value("risk.nosuch").is_err());
        assert_eq!(config.risk, RiskPolicy::default());
    }
}
