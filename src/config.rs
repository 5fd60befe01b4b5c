//! Configuration for the compliance engine.
//!
//! Everything is driven by environment variables so the same binary can run
//! against a local export or the study warehouse without code changes.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::adapters::BloodPressureCounting;

/// Default Ultrahuman partner endpoint
pub const DEFAULT_WEAR_API_ENDPOINT: &str = "https://partner.ultrahuman.com/api/v1/metrics";

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory segment holding enrolled participants
    pub segment_id: Option<String>,

    /// Vendor wear API fallback settings
    pub wear_api: WearApiConfig,

    /// Directory for cached vendor API responses
    pub cache_dir: PathBuf,

    /// Directory of CSV table exports backing the query source
    pub data_dir: Option<PathBuf>,

    /// Participant directory export (JSON)
    pub directory_file: Option<PathBuf>,

    /// Warehouse location, passed through to query backends untouched
    pub warehouse: WarehouseConfig,

    /// How blood pressure days are combined across source systems
    pub bp_counting: BloodPressureCounting,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            segment_id: None,
            wear_api: WearApiConfig::default(),
            cache_dir: PathBuf::from(".cache"),
            data_dir: None,
            directory_file: None,
            warehouse: WarehouseConfig::default(),
            bp_counting: BloodPressureCounting::default(),
        }
    }
}

/// Ultrahuman API fallback settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WearApiConfig {
    /// Count ring wear through the vendor API instead of the `temp` table
    pub enabled: bool,
    pub endpoint: String,
    /// Authorization header value; never serialized
    #[serde(skip_serializing, default)]
    pub credential: Option<String>,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Sustained request rate allowed against the API
    pub requests_per_sec: f64,
}

impl Default for WearApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: DEFAULT_WEAR_API_ENDPOINT.to_string(),
            credential: None,
            timeout_secs: 10,
            requests_per_sec: 2.0,
        }
    }
}

impl WearApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Check that the request rate can drive a token bucket.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.requests_per_sec.is_finite() || self.requests_per_sec <= 0.0 {
            return Err(ConfigError::Invalid {
                key: "COMPLIANCE_API_RATE_PER_SEC".to_string(),
                value: self.requests_per_sec.to_string(),
            });
        }
        Ok(())
    }
}

/// Opaque warehouse parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WarehouseConfig {
    pub profile_name: Option<String>,
    pub database: Option<String>,
    pub s3_location: Option<String>,
    pub workgroup: Option<String>,
}

impl Config {
    /// Build configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Config::default();

        config.segment_id = get("MDH_SEGMENT_ID");

        config.wear_api.enabled = get("UH_API_CALL").is_some();
        config.wear_api.credential = get("UHKEY");
        if let Some(endpoint) = get("UH_API_ENDPOINT") {
            config.wear_api.endpoint = endpoint;
        }
        if let Some(raw) = get("COMPLIANCE_HTTP_TIMEOUT_SECS") {
            config.wear_api.timeout_secs = parse_value("COMPLIANCE_HTTP_TIMEOUT_SECS", &raw)?;
        }
        if let Some(raw) = get("COMPLIANCE_API_RATE_PER_SEC") {
            config.wear_api.requests_per_sec = parse_value("COMPLIANCE_API_RATE_PER_SEC", &raw)?;
        }

        if let Some(dir) = get("COMPLIANCE_CACHE_DIR") {
            config.cache_dir = PathBuf::from(dir);
        }
        config.data_dir = get("COMPLIANCE_DATA_DIR").map(PathBuf::from);
        config.directory_file = get("COMPLIANCE_DIRECTORY_FILE").map(PathBuf::from);

        config.warehouse = WarehouseConfig {
            profile_name: get("AWS_PROFILE_NAME"),
            database: get("AWS_BIOBAYB_DB_NAME"),
            s3_location: get("AWS_BIOBAYB_S3_LOCATION"),
            workgroup: get("AWS_BIOBAYB_WORKGROUP"),
        };

        if let Some(raw) = get("COMPLIANCE_BP_COUNTING") {
            config.bp_counting = BloodPressureCounting::from_str_opt(&raw).ok_or_else(|| {
                ConfigError::Invalid {
                    key: "COMPLIANCE_BP_COUNTING".to_string(),
                    value: raw.clone(),
                }
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field requirements.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.wear_api.validate()?;
        if self.wear_api.enabled && self.wear_api.credential.is_none() {
            return Err(ConfigError::MissingCredential("UHKEY".to_string()));
        }
        Ok(())
    }

    /// Ensure the cache directory exists.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.cache_dir).map_err(|e| ConfigError::Io(e.to_string()))
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        key: key.to_string(),
        value: raw.to_string(),
    })
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing credential {0} while the wear API fallback is enabled")]
    MissingCredential(String),

    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: String, value: String },

    #[error("IO error: {0}")]
    Io(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert!(!config.wear_api.enabled);
        assert_eq!(config.wear_api.endpoint, DEFAULT_WEAR_API_ENDPOINT);
        assert_eq!(config.cache_dir, PathBuf::from(".cache"));
        assert_eq!(config.bp_counting, BloodPressureCounting::Union);
    }

    #[test]
    fn test_api_fallback_requires_credential() {
        let result = Config::from_lookup(lookup(&[("UH_API_CALL", "1")]));
        assert!(matches!(result, Err(ConfigError::MissingCredential(_))));

        let config = Config::from_lookup(lookup(&[("UH_API_CALL", "1"), ("UHKEY", "secret")]))
            .unwrap();
        assert!(config.wear_api.enabled);
        assert_eq!(config.wear_api.credential.as_deref(), Some("secret"));
    }

    #[test]
    fn test_credential_not_serialized() {
        let config = Config::from_lookup(lookup(&[("UHKEY", "secret")])).unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
    }

    #[test]
    fn test_invalid_numbers_rejected() {
        let result = Config::from_lookup(lookup(&[("COMPLIANCE_HTTP_TIMEOUT_SECS", "soon")]));
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));

        let result = Config::from_lookup(lookup(&[("COMPLIANCE_API_RATE_PER_SEC", "0")]));
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_rate_must_be_positive_and_finite() {
        for raw in ["-1", "inf", "NaN"] {
            let result = Config::from_lookup(lookup(&[("COMPLIANCE_API_RATE_PER_SEC", raw)]));
            assert!(matches!(result, Err(ConfigError::Invalid { .. })), "{raw}");
        }

        let json = r#"{
            "segment_id": null,
            "wear_api": {
                "enabled": false,
                "endpoint": "https://example.org",
                "timeout_secs": 10,
                "requests_per_sec": 0.0
            },
            "cache_dir": ".cache",
            "data_dir": null,
            "directory_file": null,
            "warehouse": {},
            "bp_counting": "union"
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_warehouse_and_bp_counting() {
        let config = Config::from_lookup(lookup(&[
            ("AWS_BIOBAYB_DB_NAME", "biobayb"),
            ("COMPLIANCE_BP_COUNTING", "greatest"),
            ("MDH_SEGMENT_ID", "seg-1"),
        ]))
        .unwrap();
        assert_eq!(config.warehouse.database.as_deref(), Some("biobayb"));
        assert_eq!(config.bp_counting, BloodPressureCounting::GreatestPerSource);
        assert_eq!(config.segment_id.as_deref(), Some("seg-1"));
    }
}
