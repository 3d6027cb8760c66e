//! Client and listener configuration.
//!
//! Configuration is an explicit value handed to constructors. Nothing in this
//! crate reads credentials from ambient process state on its own; the
//! [`ClientConfig::load`] helper exists for binaries that want the usual
//! file-plus-environment layering.

use crate::error::ConfigurationError;
use crate::retry::RetryPolicy;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use url::Url;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Environment variable prefix used by [`ClientConfig::load`]
pub const ENV_PREFIX: &str = "SQS_COURIER";

/// Longest long-poll wait the service accepts, in seconds
pub const MAX_WAIT_SECONDS: u32 = 20;

/// Access key pair used to sign requests
///
/// The secret key is never included in Debug output and is wiped on drop.
#[derive(Clone, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    access_key: String,
    secret_key: String,
}

impl Credentials {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }

    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    /// Get the secret key (only for immediate use in signing)
    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        if self.access_key.trim().is_empty() {
            return Err(ConfigurationError::Missing {
                key: "credentials.access_key".to_string(),
            });
        }
        if self.secret_key.is_empty() {
            return Err(ConfigurationError::Missing {
                key: "credentials.secret_key".to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}

/// Configuration for [`crate::SignedHttpClient`] and [`crate::QueueClient`]
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Service region (e.g. "us-east-1"), part of every credential scope
    pub region: String,

    /// Service name used in the credential scope
    #[serde(default = "default_service")]
    pub service: String,

    /// Endpoint override; defaults to `https://sqs.<region>.amazonaws.com`
    #[serde(default)]
    pub endpoint: Option<String>,

    /// API version sent with every action
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Transport timeout in seconds; must exceed the longest long poll
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    #[serde(default)]
    pub credentials: Option<Credentials>,

    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_service() -> String {
    "sqs".to_string()
}

fn default_api_version() -> String {
    "2012-11-05".to_string()
}

fn default_timeout_seconds() -> u64 {
    30
}

impl ClientConfig {
    pub fn new(region: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            region: region.into(),
            service: default_service(),
            endpoint: None,
            api_version: default_api_version(),
            timeout_seconds: default_timeout_seconds(),
            credentials: Some(credentials),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_seconds = timeout.as_secs();
        self
    }

    /// Load configuration from an optional file plus `SQS_COURIER__*` variables.
    ///
    /// Sources (later sources override earlier ones):
    ///  1. `path`, when given (format inferred from the extension)
    ///  2. Environment variables, e.g. `SQS_COURIER__REGION=eu-west-1` or
    ///     `SQS_COURIER__CREDENTIALS__ACCESS_KEY=...`
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    /// Same as [`ClientConfig::load`] with a custom environment prefix.
    pub fn load_with_prefix(path: Option<&Path>, env_prefix: &str) -> Result<Self, ConfigurationError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let loaded = builder
            .add_source(
                config::Environment::with_prefix(env_prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigurationError::Parsing {
                message: e.to_string(),
            })?;

        let config: Self = loaded
            .try_deserialize()
            .map_err(|e| ConfigurationError::Parsing {
                message: e.to_string(),
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration is complete enough to sign requests.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.region.trim().is_empty() {
            return Err(ConfigurationError::Missing {
                key: "region".to_string(),
            });
        }
        if self.service.trim().is_empty() {
            return Err(ConfigurationError::Missing {
                key: "service".to_string(),
            });
        }

        self.credentials()?.validate()?;
        self.endpoint_url()?;
        self.retry.validate()?;

        if self.timeout_seconds <= u64::from(MAX_WAIT_SECONDS) {
            return Err(ConfigurationError::Invalid {
                message: format!(
                    "timeout_seconds ({}) must exceed the maximum long-poll wait of {}s",
                    self.timeout_seconds, MAX_WAIT_SECONDS
                ),
            });
        }

        Ok(())
    }

    pub fn credentials(&self) -> Result<&Credentials, ConfigurationError> {
        self.credentials
            .as_ref()
            .ok_or_else(|| ConfigurationError::Missing {
                key: "credentials".to_string(),
            })
    }

    /// Resolve the service endpoint
    pub fn endpoint_url(&self) -> Result<Url, ConfigurationError> {
        let raw = match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!("https://sqs.{}.amazonaws.com", self.region),
        };

        let url = Url::parse(&raw).map_err(|e| ConfigurationError::Invalid {
            message: format!("endpoint '{}' is not a valid URL: {}", raw, e),
        })?;

        if url.host_str().is_none() {
            return Err(ConfigurationError::Invalid {
                message: format!("endpoint '{}' has no host", raw),
            });
        }

        Ok(url)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Settings for the long-poll listeners
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Long-poll wait per receive call, in seconds (0..=20)
    pub poll_time: u32,

    /// Visibility timeout requested for received messages
    pub visibility_timeout: Option<u32>,

    /// Pause after a failed receive before polling again, in milliseconds
    pub error_backoff_ms: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            poll_time: 5,
            visibility_timeout: None,
            error_backoff_ms: 1000,
        }
    }
}

impl ListenerConfig {
    pub fn with_poll_time(mut self, poll_time: u32) -> Self {
        self.poll_time = poll_time;
        self
    }

    pub fn with_visibility_timeout(mut self, seconds: u32) -> Self {
        self.visibility_timeout = Some(seconds);
        self
    }

    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.poll_time > MAX_WAIT_SECONDS {
            return Err(ConfigurationError::Invalid {
                message: format!(
                    "poll_time ({}) exceeds the service maximum of {}s",
                    self.poll_time, MAX_WAIT_SECONDS
                ),
            });
        }
        Ok(())
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
