//! Configuration management for the Shelfie engine
//!
//! Provides strongly-typed configuration with validation, environment variable parsing,
//! and sensible defaults. Values are read from the process environment (after loading
//! an optional `.env` file) or from an explicit variable map.
//!
//! # Example
//! ```no_run
//! use shelfie::Config;
//! let config = Config::from_env().expect("failed to load config");
//! println!("Recommendations from: {}", config.source.url);
//! ```

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Queue engine tuning
    pub queue: QueueConfig,
    /// Recommendation API
    pub source: SourceConfig,
    /// Cover lookup service
    pub covers: CoverConfig,
    /// Cover image downloads
    pub images: ImageConfig,
    /// Library database
    pub database: DatabaseConfig,
    /// API server configuration
    pub api: ApiConfig,
}

/// Queue engine configuration
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Refill is requested once this many undecided books or fewer remain
    pub low_water_mark: usize,
    /// Maximum number of covers resolved at the same time
    pub illustration_concurrency: usize,
    /// Buffered events per subscriber before lagging
    pub event_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            low_water_mark: 2,
            illustration_concurrency: 8,
            event_capacity: 64,
        }
    }
}

/// Recommendation API configuration
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Endpoint that accepts liked/disliked books and returns a batch
    pub url: String,
    /// Request timeout
    pub timeout: Duration,
}

/// Cover search configuration
#[derive(Debug, Clone)]
pub struct CoverConfig {
    /// Title search endpoint
    pub search_url: String,
    /// Base URL cover ids are resolved against
    pub image_base_url: String,
    /// Cover size suffix (S, M or L)
    pub size: String,
    /// Request timeout
    pub timeout: Duration,
}

/// Image download configuration
#[derive(Debug, Clone)]
pub struct ImageConfig {
    /// Request timeout
    pub timeout: Duration,
    /// Largest accepted body in bytes
    pub max_bytes: usize,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// SQLite connection URL
    pub url: String,
    /// Maximum connections in pool
    pub max_connections: u32,
    /// Connection timeout
    pub connect_timeout: Duration,
}

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Port to listen on
    pub port: u16,
    /// Host to bind to
    pub host: String,
    /// Request timeout
    pub request_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Try to load .env file (ignore if not found)
        dotenvy::dotenv().ok();

        let vars: HashMap<String, String> = std::env::vars().collect();
        let config = Self::from_vars(&vars)?;
        config.log_summary();

        Ok(config)
    }

    /// Build configuration from an explicit variable map
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        let env = Vars(vars);

        let config = Self {
            queue: QueueConfig::from_vars(&env)?,
            source: SourceConfig::from_vars(&env)?,
            covers: CoverConfig::from_vars(&env)?,
            images: ImageConfig::from_vars(&env)?,
            database: DatabaseConfig::from_vars(&env)?,
            api: ApiConfig::from_vars(&env)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        for (key, url) in [
            ("REC_API_URL", &self.source.url),
            ("COVER_SEARCH_URL", &self.covers.search_url),
            ("COVER_IMAGE_BASE_URL", &self.covers.image_base_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(Error::InvalidConfig {
                    key,
                    message: format!("Expected an http(s) URL, got '{}'", url).into(),
                });
            }
        }

        if !matches!(self.covers.size.as_str(), "S" | "M" | "L") {
            return Err(Error::InvalidConfig {
                key: "COVER_SIZE",
                message: format!("Cover size must be S, M or L, got '{}'", self.covers.size).into(),
            });
        }

        if self.queue.illustration_concurrency == 0 {
            return Err(Error::InvalidConfig {
                key: "QUEUE_ILLUSTRATION_CONCURRENCY",
                message: "At least one concurrent illustration is required".into(),
            });
        }

        if self.queue.event_capacity == 0 {
            return Err(Error::InvalidConfig {
                key: "QUEUE_EVENT_CAPACITY",
                message: "Event channel capacity must be positive".into(),
            });
        }

        if self.images.max_bytes == 0 {
            return Err(Error::InvalidConfig {
                key: "IMAGE_MAX_BYTES",
                message: "Image size limit must be positive".into(),
            });
        }

        Ok(())
    }

    /// Log configuration summary (without sensitive data)
    fn log_summary(&self) {
        info!("Configuration loaded:");
        info!("  Queue:");
        info!("    Low-water mark: {}", self.queue.low_water_mark);
        info!(
            "    Illustration concurrency: {}",
            self.queue.illustration_concurrency
        );
        info!("  Sources:");
        info!("    Recommendations: {}", mask_url(&self.source.url));
        info!("    Cover search: {}", self.covers.search_url);
        info!("  Database:");
        info!("    URL: {}", mask_url(&self.database.url));
        info!("  API:");
        info!("    Listening on: {}:{}", self.api.host, self.api.port);
    }
}

impl QueueConfig {
    fn from_vars(env: &Vars<'_>) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            low_water_mark: env.parsed_or("QUEUE_LOW_WATER_MARK", defaults.low_water_mark)?,
            illustration_concurrency: env.parsed_or(
                "QUEUE_ILLUSTRATION_CONCURRENCY",
                defaults.illustration_concurrency,
            )?,
            event_capacity: env.parsed_or("QUEUE_EVENT_CAPACITY", defaults.event_capacity)?,
        })
    }
}

impl SourceConfig {
    fn from_vars(env: &Vars<'_>) -> Result<Self> {
        Ok(Self {
            url: env.required("REC_API_URL")?,
            timeout: Duration::from_secs(env.parsed_or("REC_API_TIMEOUT_SECS", 20)?),
        })
    }
}

impl CoverConfig {
    fn from_vars(env: &Vars<'_>) -> Result<Self> {
        Ok(Self {
            search_url: env.or("COVER_SEARCH_URL", "https://openlibrary.org/search.json"),
            image_base_url: env
                .or("COVER_IMAGE_BASE_URL", "https://covers.openlibrary.org")
                .trim_end_matches('/')
                .to_string(),
            size: env.or("COVER_SIZE", "L").to_uppercase(),
            timeout: Duration::from_secs(env.parsed_or("COVER_TIMEOUT_SECS", 10)?),
        })
    }
}

impl ImageConfig {
    fn from_vars(env: &Vars<'_>) -> Result<Self> {
        Ok(Self {
            timeout: Duration::from_secs(env.parsed_or("IMAGE_TIMEOUT_SECS", 15)?),
            max_bytes: env.parsed_or("IMAGE_MAX_BYTES", 5 * 1024 * 1024)?,
        })
    }
}

impl DatabaseConfig {
    fn from_vars(env: &Vars<'_>) -> Result<Self> {
        Ok(Self {
            url: env.or("DATABASE_URL", "sqlite://shelfie.db"),
            max_connections: env.parsed_or("DB_MAX_CONNECTIONS", 5)?,
            connect_timeout: Duration::from_secs(env.parsed_or("DB_CONNECT_TIMEOUT_SECS", 10)?),
        })
    }
}

impl ApiConfig {
    fn from_vars(env: &Vars<'_>) -> Result<Self> {
        Ok(Self {
            port: env.parsed_or("API_PORT", 8080)?,
            host: env.or("API_HOST", "127.0.0.1"),
            request_timeout: Duration::from_secs(env.parsed_or("API_REQUEST_TIMEOUT_SECS", 30)?),
        })
    }
}

// ============================================================================
// Helper functions
// ============================================================================

/// Read-only view over configuration variables
struct Vars<'a>(&'a HashMap<String, String>);

impl Vars<'_> {
    /// Get required variable
    fn required(&self, key: &'static str) -> Result<String> {
        self.0
            .get(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or(Error::MissingEnvVar { var: key })
    }

    /// Get variable with default
    fn or(&self, key: &str, default: &str) -> String {
        self.0
            .get(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| default.to_string())
    }

    /// Get and parse variable, falling back to a default when unset
    fn parsed_or<T>(&self, key: &'static str, default: T) -> Result<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.0.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|e: T::Err| Error::InvalidConfig {
                key,
                message: format!("Invalid value '{}': {}", value, e).into(),
            }),
        }
    }
}

/// Mask sensitive parts of URL
fn mask_url(url: &str) -> String {
    // Mask password if present
    if let Some(at_pos) = url.find('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            let (before, after) = url.split_at(colon_pos + 1);
            let (_, rest) = after.split_at(at_pos - colon_pos - 1);
            return format!("{}****{}", before, rest);
        }
    }
    url.to_string()
}
