use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};
use std::path::Path;
use std::time::Duration;

use crate::body::DEFAULT_BODY_LIMIT;
use crate::errors::ConfigError;

/// Every generated route is mounted under this prefix
pub const API_PREFIX: &str = "/api";

/// Default configuration file, read from the working directory when present
pub const CONFIG_FILE: &str = "crudchain.toml";

const ENV_PREFIX: &str = "CRUDCHAIN_";

/// Settings shared by every route an [`Api`](crate::Api) generates.
///
/// Values come from, lowest priority first: the defaults below, `crudchain.toml`,
/// and `CRUDCHAIN_*` environment variables (`CRUDCHAIN_JWT_KEY`,
/// `CRUDCHAIN_BODY_LIMIT`, `CRUDCHAIN_TOKEN_TTL_SECS`, `CRUDCHAIN_HTTP_LATENCY`).
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// HS256 signing secret. Authentication cannot be enabled while this is empty.
    pub jwt_key: String,
    /// Token lifetime in seconds
    pub token_ttl_secs: u64,
    /// Largest accepted request body in bytes
    pub body_limit: usize,
    /// Artificial delay added to every generated route, in milliseconds. Development only.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub http_latency: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            jwt_key: String::new(),
            token_ttl_secs: 3600,
            body_limit: DEFAULT_BODY_LIMIT,
            http_latency: Duration::ZERO,
        }
    }
}

impl ApiConfig {
    /// Defaults with the given signing key
    #[must_use]
    pub fn with_jwt_key(key: impl Into<String>) -> Self {
        Self {
            jwt_key: key.into(),
            ..Self::default()
        }
    }

    /// Load from `crudchain.toml` (if present) and the environment.
    ///
    /// # Errors
    /// Returns [`ConfigError::Figment`] when a source holds an invalid value.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(CONFIG_FILE)
    }

    /// Load from a specific TOML file (if present) and the environment.
    ///
    /// # Errors
    /// Returns [`ConfigError::Figment`] when a source holds an invalid value.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));
        if path.exists() {
            tracing::info!(path = %path.display(), "Loading configuration");
            figment = figment.merge(Toml::file(path));
        }
        let config: Self = figment.merge(Env::prefixed(ENV_PREFIX)).extract()?;
        Ok(config)
    }

    #[must_use]
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }
}
