use std::env;
use std::time::Duration;

use url::Url;

use crate::channel::ReconnectPolicy;
use crate::error::ConfigError;

pub const DEFAULT_BASE_URL: &str = "https://hos-miniapp-backend-181509438418.us-central1.run.app";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
pub const MIN_REQUEST_TIMEOUT_MS: u64 = 250;

pub const ENV_BASE_URL: &str = "DISPATCH_BASE_URL";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "DISPATCH_REQUEST_TIMEOUT_MS";
pub const ENV_CONNECT_TIMEOUT_MS: &str = "DISPATCH_CONNECT_TIMEOUT_MS";
pub const ENV_RECONNECT_BASE_BACKOFF_MS: &str = "DISPATCH_RECONNECT_BASE_BACKOFF_MS";
pub const ENV_RECONNECT_MAX_BACKOFF_MS: &str = "DISPATCH_RECONNECT_MAX_BACKOFF_MS";
pub const ENV_RECONNECT_RANDOMIZATION: &str = "DISPATCH_RECONNECT_RANDOMIZATION";
pub const ENV_RECONNECT_MAX_ATTEMPTS: &str = "DISPATCH_RECONNECT_MAX_ATTEMPTS";

/// Client configuration shared by the HTTP backend and the live channel.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Unset or blank keys keep
    /// their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Self::default();
        let policy = defaults.reconnect.clone();

        let base_url = match read(ENV_BASE_URL) {
            Some(value) => normalize_base_url(&value)?,
            None => defaults.base_url,
        };
        let request_timeout_ms = read(ENV_REQUEST_TIMEOUT_MS)
            .map(|value| value.parse::<u64>())
            .transpose()
            .map_err(|error| ConfigError::InvalidRequestTimeout(error.to_string()))?
            .unwrap_or(defaults.request_timeout_ms);
        let connect_timeout_ms = read(ENV_CONNECT_TIMEOUT_MS)
            .map(|value| value.parse::<u64>())
            .transpose()
            .map_err(|error| ConfigError::InvalidConnectTimeout(error.to_string()))?
            .unwrap_or(defaults.connect_timeout_ms);
        let base_backoff_ms = read(ENV_RECONNECT_BASE_BACKOFF_MS)
            .map(|value| value.parse::<u64>())
            .transpose()
            .map_err(|error| ConfigError::InvalidReconnectBaseBackoff(error.to_string()))?
            .unwrap_or(policy.base_backoff_ms);
        let max_backoff_ms = read(ENV_RECONNECT_MAX_BACKOFF_MS)
            .map(|value| value.parse::<u64>())
            .transpose()
            .map_err(|error| ConfigError::InvalidReconnectMaxBackoff(error.to_string()))?
            .unwrap_or(policy.max_backoff_ms);
        let randomization = read(ENV_RECONNECT_RANDOMIZATION)
            .map(|value| value.parse::<f64>())
            .transpose()
            .map_err(|error| ConfigError::InvalidReconnectRandomization(error.to_string()))?
            .unwrap_or(policy.randomization);
        if !randomization.is_finite() {
            return Err(ConfigError::InvalidReconnectRandomization(
                "must be a finite number".to_string(),
            ));
        }
        let max_attempts = read(ENV_RECONNECT_MAX_ATTEMPTS)
            .map(|value| value.parse::<u32>())
            .transpose()
            .map_err(|error| ConfigError::InvalidReconnectMaxAttempts(error.to_string()))?;

        if max_backoff_ms < base_backoff_ms {
            return Err(ConfigError::InvalidReconnectMaxBackoff(format!(
                "{max_backoff_ms} is below the base backoff {base_backoff_ms}"
            )));
        }

        Ok(Self {
            base_url,
            request_timeout_ms,
            connect_timeout_ms,
            reconnect: ReconnectPolicy {
                base_backoff_ms,
                max_backoff_ms,
                randomization: randomization.clamp(0.0, 1.0),
                max_attempts,
            },
        })
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.max(MIN_REQUEST_TIMEOUT_MS))
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Websocket endpoint of the live channel for this backend.
    ///
    /// Always served at `/socket.io/` on the backend's origin. A path on the
    /// base URL names a Socket.IO namespace, not a mount point, so it is
    /// dropped here; only the default namespace is joined.
    pub fn socket_url(&self) -> Result<Url, ConfigError> {
        let base = normalize_base_url(&self.base_url)?;
        let mut url =
            Url::parse(&base).map_err(|error| ConfigError::InvalidBaseUrl(error.to_string()))?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|()| ConfigError::InvalidBaseUrl(format!("cannot use scheme {scheme}")))?;
        url.set_path("/socket.io/");
        url.set_query(Some("EIO=4&transport=websocket"));
        Ok(url)
    }
}

/// Trim, drop trailing slashes, and require an http(s) URL with a host.
pub fn normalize_base_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ConfigError::InvalidBaseUrl("must not be empty".to_string()));
    }
    let parsed =
        Url::parse(trimmed).map_err(|error| ConfigError::InvalidBaseUrl(error.to_string()))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(ConfigError::InvalidBaseUrl(format!(
            "URL must use http:// or https:// scheme, got: {}",
            parsed.scheme()
        )));
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(ConfigError::InvalidBaseUrl("missing host".to_string()));
    }
    Ok(trimmed.to_string())
}
