//! Configuration management

use crate::error::{ErrorContext, WsscError, WsscResult};
use crate::types::{SessionConfig, WsscConfig};

use std::path::Path;

/// Prefix of environment variables overriding file settings,
/// e.g. `WSSC_SESSION__DEFAULT_KEY_SIZE=16`
pub const ENV_PREFIX: &str = "WSSC";

impl WsscConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> WsscResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| WsscError::Config {
            message: format!("Failed to read config file: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("read_file")
                .with_suggestion("Check if the config file exists and is readable"),
        })?;

        let config: WsscConfig = toml::from_str(&content).map_err(|e| WsscError::Config {
            message: format!("Failed to parse config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("parse_toml")
                .with_suggestion("Check TOML syntax in config file"),
        })?;

        Ok(config)
    }

    /// Load configuration from an optional file layered with `WSSC_*`
    /// environment overrides, then validate it
    pub fn load(path: Option<&Path>) -> WsscResult<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: WsscConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| WsscError::Config {
                message: format!("Failed to load config: {}", e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("config")
                    .with_operation("load")
                    .with_suggestion("Check the config file and WSSC_* environment variables"),
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> WsscResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| WsscError::Config {
            message: format!("Failed to serialize config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config").with_operation("serialize_toml"),
        })?;

        std::fs::write(path, content).map_err(|e| WsscError::Config {
            message: format!("Failed to write config file: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("write_file")
                .with_suggestion("Check if the directory exists and is writable"),
        })?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> WsscResult<()> {
        self.session.validate()?;

        if self.cluster.maintenance_interval_ms == 0 {
            return Err(invalid(
                "cluster.maintenance_interval_ms must be greater than 0",
                "Set cluster.maintenance_interval_ms to a positive value",
            ));
        }

        Ok(())
    }
}

impl SessionConfig {
    /// Validate size ranges and the sweep interval
    pub fn validate(&self) -> WsscResult<()> {
        let ranges = [
            ("key_size", self.min_key_size, self.max_key_size),
            ("client_entropy", self.min_client_entropy, self.max_client_entropy),
            ("server_entropy", self.min_server_entropy, self.max_server_entropy),
            ("shared_secret", self.min_shared_secret, self.max_shared_secret),
        ];
        for (name, min, max) in ranges {
            if min == 0 || min > max {
                return Err(invalid(
                    &format!(
                        "session.min_{name} ({min}) must be at least 1 and not exceed session.max_{name} ({max})"
                    ),
                    "Use a non-empty, ordered byte range",
                ));
            }
        }

        let key_range = self.min_key_size..=self.max_key_size;
        if !key_range.contains(&self.default_key_size) {
            return Err(invalid(
                &format!(
                    "session.default_key_size ({}) is outside [{}, {}]",
                    self.default_key_size, self.min_key_size, self.max_key_size
                ),
                "Pick a default key size inside the key size range",
            ));
        }
        for entry in &self.namespace_key_sizes {
            if !key_range.contains(&entry.key_size) {
                return Err(invalid(
                    &format!(
                        "key size {} for namespace {} is outside [{}, {}]",
                        entry.key_size, entry.namespace, self.min_key_size, self.max_key_size
                    ),
                    "Pick namespace key sizes inside the key size range",
                ));
            }
        }

        // Without sweeps, sessions that are never read again are never freed
        if self.sweep_interval_ms <= 0 {
            return Err(invalid(
                "session.sweep_interval_ms must be greater than 0",
                "Set session.sweep_interval_ms to a positive value (default 300000)",
            ));
        }

        Ok(())
    }
}

fn invalid(message: &str, suggestion: &str) -> WsscError {
    WsscError::Config {
        message: message.to_string(),
        source: None,
        context: ErrorContext::new("config")
            .with_operation("validate")
            .with_suggestion(suggestion),
    }
}
