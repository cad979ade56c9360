use serde::Deserialize;

pub const DEFAULT_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Engine-wide settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// `chrono` format used by the `datetime` conversion
    pub datetime_format: String,
    /// Log every statement the SQL executor runs at debug level
    pub log_statements: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            datetime_format: DEFAULT_DATETIME_FORMAT.to_string(),
            log_statements: false,
        }
    }
}

impl EngineConfig {
    /// Read overrides from `REFRACTION_DATETIME_FORMAT` and `REFRACTION_LOG_STATEMENTS`
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(format) = std::env::var("REFRACTION_DATETIME_FORMAT") {
            if !format.is_empty() {
                config.datetime_format = format;
            }
        }
        if let Ok(flag) = std::env::var("REFRACTION_LOG_STATEMENTS") {
            config.log_statements = matches!(flag.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        config
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_fill_missing_keys() {
        let config = EngineConfig::from_json(json!({ "log_statements": true })).unwrap();
        assert_eq!(config.datetime_format, DEFAULT_DATETIME_FORMAT);
        assert!(config.log_statements);
    }

    #[test]
    fn test_rejects_wrong_types() {
        assert!(EngineConfig::from_json(json!({ "datetime_format": 5 })).is_err());
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("REFRACTION_DATETIME_FORMAT", "%d/%m/%Y");
        std::env::set_var("REFRACTION_LOG_STATEMENTS", "Yes");
        let config = EngineConfig::from_env();
        std::env::remove_var("REFRACTION_DATETIME_FORMAT");
        std::env::remove_var("REFRACTION_LOG_STATEMENTS");

        assert_eq!(config.datetime_format, "%d/%m/%Y");
        assert!(config.log_statements);
        assert_eq!(EngineConfig::from_env(), EngineConfig::default());
    }
}
