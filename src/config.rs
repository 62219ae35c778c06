//! Configuration management for the enrichment engine
//!
//! Handles loading configuration from files, environment variables,
//! and provides validation for all configuration settings.

use crate::EnrichError;
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use std::path::PathBuf;
use std::time::Duration;

/// Usage policy of the public Nominatim instance
const NOMINATIM_PUBLIC_MIN_DELAY_MS: u64 = 1000;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichConfig {
    /// Reverse geocoding configuration
    pub geocoding: GeocodingConfig,
    /// Weather API configuration
    pub weather: WeatherConfig,
    /// Cache configuration
    pub cache: CacheConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Which reverse geocoder to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeocoderKind {
    /// Courtesy public geocoder (OpenStreetMap Nominatim), no key needed
    Nominatim,
    /// Commercial reverse geocoding API (positionstack), key required
    Positionstack,
}

/// Pacing and retry knobs shared by every provider section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingConfig {
    /// Minimum delay between two outbound calls to the provider
    #[serde(default)]
    pub min_delay_ms: u64,
    /// Random delay added before each call
    #[serde(default)]
    pub jitter_min_ms: u64,
    #[serde(default)]
    pub jitter_max_ms: u64,
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Random delay between attempts
    #[serde(default = "default_backoff_min")]
    pub backoff_min_ms: u64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,
}

/// A `[*.pacing]` table as written; absent fields keep the provider default
#[derive(Debug, Default, Deserialize)]
struct PacingOverrides {
    min_delay_ms: Option<u64>,
    jitter_min_ms: Option<u64>,
    jitter_max_ms: Option<u64>,
    max_retries: Option<u32>,
    backoff_min_ms: Option<u64>,
    backoff_max_ms: Option<u64>,
}

impl PacingOverrides {
    fn apply(self, base: PacingConfig) -> PacingConfig {
        PacingConfig {
            min_delay_ms: self.min_delay_ms.unwrap_or(base.min_delay_ms),
            jitter_min_ms: self.jitter_min_ms.unwrap_or(base.jitter_min_ms),
            jitter_max_ms: self.jitter_max_ms.unwrap_or(base.jitter_max_ms),
            max_retries: self.max_retries.unwrap_or(base.max_retries),
            backoff_min_ms: self.backoff_min_ms.unwrap_or(base.backoff_min_ms),
            backoff_max_ms: self.backoff_max_ms.unwrap_or(base.backoff_max_ms),
        }
    }
}

fn geocoding_pacing<'de, D: Deserializer<'de>>(deserializer: D) -> Result<PacingConfig, D::Error> {
    PacingOverrides::deserialize(deserializer).map(|o| o.apply(default_geocoding_pacing()))
}

fn weather_pacing<'de, D: Deserializer<'de>>(deserializer: D) -> Result<PacingConfig, D::Error> {
    PacingOverrides::deserialize(deserializer).map(|o| o.apply(default_weather_pacing()))
}

/// Reverse geocoding settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocodingConfig {
    #[serde(default = "default_geocoder")]
    pub provider: GeocoderKind,
    /// API key (positionstack only)
    pub api_key: Option<String>,
    /// Base URL override; each provider has its own default
    pub base_url: Option<String>,
    /// Preferred response language
    #[serde(default = "default_language")]
    pub language: String,
    /// User agent sent with every request (Nominatim requires one)
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u32,
    /// Number of concurrent workers
    #[serde(default = "default_geocoding_workers")]
    pub workers: usize,
    #[serde(default = "default_geocoding_pacing", deserialize_with = "geocoding_pacing")]
    pub pacing: PacingConfig,
}

/// Weather API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    /// OpenWeather API key
    pub api_key: Option<String>,
    /// Base URL for the weather API
    #[serde(default = "default_weather_base_url")]
    pub base_url: String,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u32,
    /// Number of concurrent workers
    #[serde(default = "default_weather_workers")]
    pub workers: usize,
    /// Preceding calendar days fetched per city
    #[serde(default = "default_history_days")]
    pub history_days: u32,
    #[serde(default = "default_weather_pacing", deserialize_with = "weather_pacing")]
    pub pacing: PacingConfig,
}

/// Cache configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache directory location
    #[serde(default = "default_cache_location")]
    pub location: String,
    /// Remember permanent "no data" outcomes
    #[serde(default = "default_negative_results")]
    pub negative_results: bool,
}

/// Logging configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (pretty or json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_geocoder() -> GeocoderKind {
    GeocoderKind::Nominatim
}

fn default_language() -> String {
    "en".to_string()
}

fn default_user_agent() -> String {
    format!("geoenrich/{}", crate::VERSION)
}

fn default_timeout() -> u32 {
    30
}

fn default_geocoding_workers() -> usize {
    10
}

fn default_weather_workers() -> usize {
    5
}

fn default_history_days() -> u32 {
    5
}

fn default_max_retries() -> u32 {
    2
}

fn default_backoff_min() -> u64 {
    500
}

fn default_backoff_max() -> u64 {
    1500
}

fn default_geocoding_pacing() -> PacingConfig {
    PacingConfig {
        min_delay_ms: 1500,
        jitter_min_ms: 300,
        jitter_max_ms: 1000,
        max_retries: default_max_retries(),
        backoff_min_ms: default_backoff_min(),
        backoff_max_ms: default_backoff_max(),
    }
}

fn default_weather_pacing() -> PacingConfig {
    PacingConfig {
        min_delay_ms: 0,
        jitter_min_ms: 0,
        jitter_max_ms: 0,
        max_retries: default_max_retries(),
        backoff_min_ms: default_backoff_min(),
        backoff_max_ms: default_backoff_max(),
    }
}

fn default_weather_base_url() -> String {
    "https://api.openweathermap.org/data/2.5".to_string()
}

fn default_cache_location() -> String {
    dirs::cache_dir()
        .map(|dir| dir.join("geoenrich").to_string_lossy().into_owned())
        .unwrap_or_else(|| ".geoenrich-cache".to_string())
}

fn default_negative_results() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn section<T: DeserializeOwned>(settings: &Config, key: &str) -> Result<Option<T>> {
    match settings.get::<T>(key) {
        Ok(value) => Ok(Some(value)),
        Err(config::ConfigError::NotFound(_)) => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Invalid [{key}] configuration section")),
    }
}

impl PacingConfig {
    #[must_use]
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }
}

impl GeocodingConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.into())
    }
}

impl WeatherConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.into())
    }
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            geocoding: GeocodingConfig {
                provider: default_geocoder(),
                api_key: None,
                base_url: None,
                language: default_language(),
                user_agent: default_user_agent(),
                timeout_seconds: default_timeout(),
                workers: default_geocoding_workers(),
                pacing: default_geocoding_pacing(),
            },
            weather: WeatherConfig {
                api_key: None,
                base_url: default_weather_base_url(),
                timeout_seconds: default_timeout(),
                workers: default_weather_workers(),
                history_days: default_history_days(),
                pacing: default_weather_pacing(),
            },
            cache: CacheConfig {
                location: default_cache_location(),
                negative_results: default_negative_results(),
            },
            logging: LoggingConfig {
                level: default_log_level(),
                format: default_log_format(),
            },
        }
    }
}

impl EnrichConfig {
    /// Load configuration from file and environment variables
    pub fn load() -> Result<Self> {
        Self::load_from_path(None)
    }

    /// Load configuration from specified path
    pub fn load_from_path(config_path: Option<PathBuf>) -> Result<Self> {
        let mut builder = Config::builder();

        let config_file = config_path.unwrap_or_else(|| {
            Self::get_config_path().unwrap_or_else(|| PathBuf::from("config.toml"))
        });

        if config_file.exists() {
            builder = builder.add_source(
                File::from(config_file.clone())
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        // GEOENRICH_WEATHER__API_KEY=... overrides weather.api_key
        builder = builder.add_source(
            Environment::with_prefix("GEOENRICH")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder
            .build()
            .with_context(|| "Failed to build configuration")?;

        let mut config = Self::default();
        config.merge(settings)?;

        config.apply_defaults();
        config.validate()?;

        Ok(config)
    }

    /// Overlay every section the sources actually provide on top of the defaults
    fn merge(&mut self, settings: Config) -> Result<()> {
        if let Some(geocoding) = section(&settings, "geocoding")? {
            self.geocoding = geocoding;
        }
        if let Some(weather) = section(&settings, "weather")? {
            self.weather = weather;
        }
        if let Some(cache) = section(&settings, "cache")? {
            self.cache = cache;
        }
        if let Some(logging) = section(&settings, "logging")? {
            self.logging = logging;
        }
        Ok(())
    }

    /// Get the default configuration file path
    #[must_use]
    pub fn get_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("geoenrich").join("config.toml"))
    }

    /// Apply default values to missing configuration fields
    pub fn apply_defaults(&mut self) {
        if self.geocoding.language.is_empty() {
            self.geocoding.language = default_language();
        }
        if self.geocoding.user_agent.is_empty() {
            self.geocoding.user_agent = default_user_agent();
        }
        if self.geocoding.timeout_seconds == 0 {
            self.geocoding.timeout_seconds = default_timeout();
        }
        if self.geocoding.workers == 0 {
            self.geocoding.workers = default_geocoding_workers();
        }
        if self.weather.base_url.is_empty() {
            self.weather.base_url = default_weather_base_url();
        }
        if self.weather.timeout_seconds == 0 {
            self.weather.timeout_seconds = default_timeout();
        }
        if self.weather.workers == 0 {
            self.weather.workers = default_weather_workers();
        }
        if self.weather.history_days == 0 {
            self.weather.history_days = default_history_days();
        }
        if self.cache.location.is_empty() {
            self.cache.location = default_cache_location();
        }
        if self.logging.level.is_empty() {
            self.logging.level = default_log_level();
        }
        if self.logging.format.is_empty() {
            self.logging.format = default_log_format();
        }
    }

    /// Validate all configuration settings
    pub fn validate(&self) -> Result<()> {
        self.validate_api_keys()?;
        self.validate_numeric_ranges()?;
        self.validate_string_values()?;
        Ok(())
    }

    /// Validate API keys and credentials that are present
    pub fn validate_api_keys(&self) -> Result<()> {
        for (name, key) in [
            ("Geocoding", &self.geocoding.api_key),
            ("Weather", &self.weather.api_key),
        ] {
            if let Some(api_key) = key {
                if api_key.trim().is_empty() {
                    return Err(EnrichError::config(format!(
                        "{name} API key cannot be empty if provided. Either remove it or provide a valid key."
                    ))
                    .into());
                }
                if api_key.len() > 100 {
                    return Err(EnrichError::config(format!(
                        "{name} API key appears to be invalid (too long). Please check your API key."
                    ))
                    .into());
                }
            }
        }
        Ok(())
    }

    /// Check that every configured provider has the credentials it needs
    pub fn require_credentials(&self) -> Result<()> {
        if self.geocoding.provider == GeocoderKind::Positionstack
            && self.geocoding.api_key.is_none()
        {
            return Err(EnrichError::config("positionstack geocoding requires geocoding.api_key").into());
        }
        if self.weather.api_key.is_none() {
            return Err(EnrichError::config("weather enrichment requires weather.api_key").into());
        }
        Ok(())
    }

    /// Validate numeric configuration ranges
    fn validate_numeric_ranges(&self) -> Result<()> {
        if self.geocoding.timeout_seconds > 300 || self.weather.timeout_seconds > 300 {
            return Err(EnrichError::config("API timeout cannot exceed 300 seconds").into());
        }

        for (name, pacing) in [
            ("geocoding", &self.geocoding.pacing),
            ("weather", &self.weather.pacing),
        ] {
            if pacing.max_retries > 10 {
                return Err(
                    EnrichError::config(format!("{name} max retries cannot exceed 10")).into(),
                );
            }
            if pacing.jitter_min_ms > pacing.jitter_max_ms {
                return Err(EnrichError::config(format!(
                    "{name} jitter_min_ms cannot exceed jitter_max_ms"
                ))
                .into());
            }
            if pacing.backoff_min_ms > pacing.backoff_max_ms {
                return Err(EnrichError::config(format!(
                    "{name} backoff_min_ms cannot exceed backoff_max_ms"
                ))
                .into());
            }
        }

        if self.geocoding.provider == GeocoderKind::Nominatim
            && self.geocoding.base_url.is_none()
            && self.geocoding.pacing.min_delay_ms < NOMINATIM_PUBLIC_MIN_DELAY_MS
        {
            return Err(EnrichError::config(format!(
                "The public Nominatim instance allows one request per second; geocoding.pacing.min_delay_ms must be at least {NOMINATIM_PUBLIC_MIN_DELAY_MS}"
            ))
            .into());
        }

        if self.geocoding.workers > 256 || self.weather.workers > 256 {
            return Err(EnrichError::config("Worker count cannot exceed 256").into());
        }

        if self.weather.history_days > 30 {
            return Err(EnrichError::config("Weather history cannot exceed 30 days").into());
        }

        Ok(())
    }

    /// Validate string configuration values
    fn validate_string_values(&self) -> Result<()> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.logging.level.as_str()) {
            return Err(EnrichError::config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            ))
            .into());
        }

        let valid_log_formats = ["pretty", "json"];
        if !valid_log_formats.contains(&self.logging.format.as_str()) {
            return Err(EnrichError::config(format!(
                "Invalid log format '{}'. Must be one of: {}",
                self.logging.format,
                valid_log_formats.join(", ")
            ))
            .into());
        }

        let urls = std::iter::once(&self.weather.base_url).chain(self.geocoding.base_url.as_ref());
        for url in urls {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(EnrichError::config(format!(
                    "API base URL '{url}' must be a valid HTTP or HTTPS URL"
                ))
                .into());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = EnrichConfig::default();
        assert_eq!(config.geocoding.provider, GeocoderKind::Nominatim);
        assert_eq!(config.geocoding.pacing.min_delay_ms, 1500);
        assert_eq!(config.geocoding.pacing.max_retries, 2);
        assert_eq!(config.geocoding.workers, 10);
        assert_eq!(config.weather.history_days, 5);
        assert_eq!(config.weather.base_url, "https://api.openweathermap.org/data/2.5");
        assert_eq!(config.logging.level, "info");
        assert!(config.cache.negative_results);
        assert!(config.weather.api_key.is_none());
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(EnrichConfig::default().validate().is_ok());
    }

    #[test]
    fn test_missing_credentials_are_configuration_errors() {
        let mut config = EnrichConfig::default();
        let err = config.require_credentials().unwrap_err();
        assert!(err.to_string().contains("weather.api_key"));

        config.weather.api_key = Some("weather_key_123".to_string());
        assert!(config.require_credentials().is_ok());

        config.geocoding.provider = GeocoderKind::Positionstack;
        let err = config.require_credentials().unwrap_err();
        assert!(err.to_string().contains("geocoding.api_key"));
    }

    #[test]
    fn test_config_validation_empty_api_key() {
        let mut config = EnrichConfig::default();
        config.weather.api_key = Some("  ".to_string());
        assert!(config.validate_api_keys().is_err());
    }

    #[test]
    fn test_config_validation_invalid_log_level() {
        let mut config = EnrichConfig::default();
        config.logging.level = "invalid".to_string();
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Invalid log level"));
    }

    #[test]
    fn test_config_validation_numeric_ranges() {
        let mut config = EnrichConfig::default();
        config.weather.timeout_seconds = 500;
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("timeout cannot exceed"));

        let mut config = EnrichConfig::default();
        config.geocoding.pacing.jitter_min_ms = 2000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_apply_defaults_fills_zeroes() {
        let mut config = EnrichConfig::default();
        config.geocoding.workers = 0;
        config.weather.history_days = 0;
        config.logging.format = String::new();
        config.apply_defaults();
        assert_eq!(config.geocoding.workers, 10);
        assert_eq!(config.weather.history_days, 5);
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
[geocoding]
provider = "positionstack"
api_key = "geo_key_123"
workers = 4

[weather]
api_key = "weather_key_123"
"#
        )
        .unwrap();

        let config = EnrichConfig::load_from_path(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.geocoding.provider, GeocoderKind::Positionstack);
        assert_eq!(config.geocoding.workers, 4);
        assert_eq!(config.geocoding.language, "en");
        assert_eq!(config.geocoding.pacing.min_delay_ms, 1500);
        assert_eq!(config.weather.api_key.as_deref(), Some("weather_key_123"));
        assert_eq!(config.weather.history_days, 5);
    }

    #[test]
    fn test_partial_pacing_keeps_provider_defaults() {
        let mut file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
[geocoding]
language = "de"

[geocoding.pacing]
max_retries = 3

[weather.pacing]
backoff_max_ms = 4000
"#
        )
        .unwrap();

        let config = EnrichConfig::load_from_path(Some(file.path().to_path_buf())).unwrap();
        let geocoding = &config.geocoding.pacing;
        assert_eq!(geocoding.max_retries, 3);
        assert_eq!(geocoding.min_delay_ms, 1500);
        assert_eq!(geocoding.jitter_min_ms, 300);
        assert_eq!(geocoding.jitter_max_ms, 1000);

        let weather = &config.weather.pacing;
        assert_eq!(weather.backoff_max_ms, 4000);
        assert_eq!(weather.backoff_min_ms, 500);
        assert_eq!(weather.min_delay_ms, 0);
    }

    #[test]
    fn test_public_nominatim_requires_one_second_spacing() {
        let mut config = EnrichConfig::default();
        config.geocoding.pacing.min_delay_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("min_delay_ms must be at least 1000"));

        config.geocoding.base_url = Some("http://localhost:8080".to_string());
        assert!(config.validate().is_ok());

        config.geocoding.base_url = None;
        config.geocoding.provider = GeocoderKind::Positionstack;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_path_generation() {
        if let Some(path) = EnrichConfig::get_config_path() {
            assert!(path.to_string_lossy().contains("geoenrich"));
            assert!(path.to_string_lossy().ends_with("config.toml"));
        }
    }
}
