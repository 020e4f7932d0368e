//! Environment-backed configuration for the gateway.
//!
//! All recognised options are enumerated here; nothing else is read from the
//! environment. `POSTGRES_DSN` and `REDIS_ADDR` are required, everything else
//! has a default or may be absent.

use secrecy::{ExposeSecret, SecretString};
use serde::{Serialize, Serializer};

/// Root configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen port.
    pub port: u16,
    /// PostgreSQL connection string (required).
    pub postgres_dsn: String,
    /// Redis address, host:port (required).
    pub redis_addr: String,
    /// Upstream provider credentials. May be empty; the provider will then
    /// fail with an upstream auth error when selected.
    pub openai_api_key: ProviderKey,
    pub gemini_api_key: ProviderKey,
    pub anthropic_api_key: ProviderKey,
    /// Default per-tenant token budget per minute.
    pub default_rate_limit_tpm: i64,
    /// When true, a well-known test API key is inserted at startup.
    pub run_seed: bool,
}

/// Provider API key that redacts in Debug/Display/Serialize.
///
/// The raw value is only reachable via [`ProviderKey::expose_secret`], so
/// every use site is auditable with `grep expose_secret`.
#[derive(Clone)]
pub struct ProviderKey(SecretString);

impl ProviderKey {
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().is_empty()
    }
}

impl From<String> for ProviderKey {
    fn from(s: String) -> Self {
        ProviderKey(SecretString::from(s))
    }
}

impl From<&str> for ProviderKey {
    fn from(s: &str) -> Self {
        ProviderKey(SecretString::from(s))
    }
}

impl std::fmt::Debug for ProviderKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for ProviderKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl Serialize for ProviderKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("[REDACTED]")
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("environment variable '{0}' is required")]
    Missing(&'static str),

    #[error("invalid value for '{var}': {message}")]
    Invalid { var: &'static str, message: String },
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an injectable variable lookup.
    ///
    /// Tests use this to avoid mutating process-wide environment state.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let port_str = lookup("PORT").unwrap_or_else(|| "8080".to_string());
        let port: u16 = port_str.parse().map_err(|e| ConfigError::Invalid {
            var: "PORT",
            message: format!("{e}"),
        })?;

        let tpm_str = lookup("DEFAULT_RATE_LIMIT_TPM").unwrap_or_else(|| "100000".to_string());
        let default_rate_limit_tpm: i64 = tpm_str.parse().map_err(|e| ConfigError::Invalid {
            var: "DEFAULT_RATE_LIMIT_TPM",
            message: format!("{e}"),
        })?;

        let config = Config {
            port,
            postgres_dsn: lookup("POSTGRES_DSN").ok_or(ConfigError::Missing("POSTGRES_DSN"))?,
            redis_addr: lookup("REDIS_ADDR").ok_or(ConfigError::Missing("REDIS_ADDR"))?,
            openai_api_key: lookup("OPENAI_API_KEY").unwrap_or_default().into(),
            gemini_api_key: lookup("GEMINI_API_KEY").unwrap_or_default().into(),
            anthropic_api_key: lookup("ANTHROPIC_API_KEY").unwrap_or_default().into(),
            default_rate_limit_tpm,
            run_seed: lookup("RUN_SEED").as_deref() == Some("true"),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.postgres_dsn.is_empty() {
            return Err(ConfigError::Missing("POSTGRES_DSN"));
        }
        if self.redis_addr.is_empty() {
            return Err(ConfigError::Missing("REDIS_ADDR"));
        }
        if self.default_rate_limit_tpm <= 0 {
            return Err(ConfigError::Invalid {
                var: "DEFAULT_RATE_LIMIT_TPM",
                message: "must be positive".to_string(),
            });
        }
        if self.openai_api_key.is_empty()
            && self.gemini_api_key.is_empty()
            && self.anthropic_api_key.is_empty()
        {
            tracing::warn!("no provider API keys configured - upstream calls will fail");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn load(vars: &HashMap<String, String>) -> Result<Config, ConfigError> {
        Config::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn test_defaults_applied() {
        let vars = env(&[
            ("POSTGRES_DSN", "postgres://localhost/gw"),
            ("REDIS_ADDR", "localhost:6379"),
        ]);
        let config = load(&vars).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.default_rate_limit_tpm, 100_000);
        assert!(!config.run_seed);
        assert!(config.openai_api_key.is_empty());
    }

    #[test]
    fn test_missing_postgres_dsn() {
        let vars = env(&[("REDIS_ADDR", "localhost:6379")]);
        let err = load(&vars).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("POSTGRES_DSN")));
    }

    #[test]
    fn test_missing_redis_addr() {
        let vars = env(&[("POSTGRES_DSN", "postgres://localhost/gw")]);
        let err = load(&vars).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("REDIS_ADDR")));
    }

    #[test]
    fn test_invalid_rate_limit() {
        let vars = env(&[
            ("POSTGRES_DSN", "postgres://localhost/gw"),
            ("REDIS_ADDR", "localhost:6379"),
            ("DEFAULT_RATE_LIMIT_TPM", "not-a-number"),
        ]);
        let err = load(&vars).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                var: "DEFAULT_RATE_LIMIT_TPM",
                ..
            }
        ));
    }

    #[test]
    fn test_run_seed_flag() {
        let vars = env(&[
            ("POSTGRES_DSN", "postgres://localhost/gw"),
            ("REDIS_ADDR", "localhost:6379"),
            ("RUN_SEED", "true"),
        ]);
        assert!(load(&vars).unwrap().run_seed);
    }

    #[test]
    fn test_provider_key_redacted() {
        let key = ProviderKey::from("sk-super-secret");
        assert_eq!(format!("{key:?}"), "[REDACTED]");
        assert_eq!(format!("{key}"), "[REDACTED]");
        assert_eq!(key.expose_secret(), "sk-super-secret");
    }
}
