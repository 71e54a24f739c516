//! Bridge configuration.

use std::{path::PathBuf, time::Duration};

use thiserror::Error;

/// Default endpoint name.
pub const DEFAULT_PATH_NAME: &str = "remote-objects";

/// Sessions expire after 5 minutes without a request.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(300);

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Server-side bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Last path segment that identifies bridge traffic.
    pub path_name: String,
    /// Idle time after which a session is swept.
    pub session_ttl: Duration,
    /// Upper bound for POST bodies.
    pub max_body_bytes: usize,
    /// Directory reported to clients as the server's base directory.
    pub base_dir: PathBuf,
    /// Allow only one builder scope per page load.
    pub single_scope: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            path_name: DEFAULT_PATH_NAME.to_string(),
            session_ttl: DEFAULT_SESSION_TTL,
            max_body_bytes: 16 * 1024 * 1024,
            base_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            single_scope: false,
        }
    }
}

impl BridgeConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    ///
    /// # Errors
    /// Returns error if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path_name) = lookup("REMOTE_OBJECTS_PATH") {
            if path_name.is_empty() || path_name.contains('/') {
                return Err(ConfigError::Invalid {
                    key: "REMOTE_OBJECTS_PATH",
                    value: path_name,
                });
            }
            config.path_name = path_name;
        }

        if let Some(secs) = lookup("REMOTE_OBJECTS_SESSION_TTL_SECS") {
            let secs = secs.parse().map_err(|_| ConfigError::Invalid {
                key: "REMOTE_OBJECTS_SESSION_TTL_SECS",
                value: secs,
            })?;
            config.session_ttl = Duration::from_secs(secs);
        }

        if let Some(bytes) = lookup("REMOTE_OBJECTS_MAX_BODY_BYTES") {
            config.max_body_bytes = bytes.parse().map_err(|_| ConfigError::Invalid {
                key: "REMOTE_OBJECTS_MAX_BODY_BYTES",
                value: bytes,
            })?;
        }

        if let Some(dir) = lookup("REMOTE_OBJECTS_BASE_DIR") {
            config.base_dir = PathBuf::from(dir);
        }

        config.single_scope = lookup("REMOTE_OBJECTS_ONCE").is_some_and(|v| v == "true" || v == "1");

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.path_name, "remote-objects");
        assert_eq!(config.session_ttl, Duration::from_secs(300));
        assert!(!config.single_scope);
    }

    #[test]
    fn test_overrides() {
        let config = BridgeConfig::from_lookup(lookup(&[
            ("REMOTE_OBJECTS_PATH", "bridge"),
            ("REMOTE_OBJECTS_SESSION_TTL_SECS", "30"),
            ("REMOTE_OBJECTS_ONCE", "1"),
            ("REMOTE_OBJECTS_BASE_DIR", "/srv/app"),
        ]))
        .unwrap();
        assert_eq!(config.path_name, "bridge");
        assert_eq!(config.session_ttl, Duration::from_secs(30));
        assert!(config.single_scope);
        assert_eq!(config.base_dir, PathBuf::from("/srv/app"));
    }

    #[test]
    fn test_invalid_values() {
        assert!(BridgeConfig::from_lookup(lookup(&[("REMOTE_OBJECTS_SESSION_TTL_SECS", "soon")])).is_err());
        assert!(BridgeConfig::from_lookup(lookup(&[("REMOTE_OBJECTS_PATH", "a/b")])).is_err());
    }
}
