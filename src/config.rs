//! Client configuration for the Eventide agent.
//!
//! This module provides the configuration struct used to construct an
//! [`EventideClient`](crate::EventideClient), with support for chainable
//! builders and environment-based loading.
//!
//! # Example
//!
//! ```rust
//! use eventide::EventideClientConfig;
//! use std::time::Duration;
//!
//! let config = EventideClientConfig::new("http://localhost:8520")
//!     .with_token("secret-token")
//!     .with_timeout(Duration::from_secs(10));
//!
//! assert_eq!(config.base_url, "http://localhost:8520");
//! ```

use std::time::Duration;
use thiserror::Error;

/// Default agent address used when none is configured.
pub const DEFAULT_AGENT_ADDR: &str = "http://localhost:8520";

/// Default timeout for plain request/response calls.
///
/// Blocking watch polls override this per request; see
/// [`WatchOptions`](crate::WatchOptions).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur during configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configured base URL is not a valid URL.
    #[error("Invalid agent address: {0}")]
    InvalidAddress(String),
}

/// Eventide agent client configuration.
///
/// # Example
///
/// ```rust
/// use eventide::EventideClientConfig;
///
/// let config = EventideClientConfig::new("http://agent.internal:8520")
///     .with_token("jwt");
/// assert_eq!(config.token.as_deref(), Some("jwt"));
/// ```
#[derive(Debug, Clone)]
pub struct EventideClientConfig {
    /// Base URL of the Eventide agent, without a trailing slash.
    pub base_url: String,

    /// Bearer token attached to every request, if the agent requires one.
    pub token: Option<String>,

    /// Timeout applied to plain request/response calls.
    pub timeout: Duration,
}

impl Default for EventideClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_AGENT_ADDR)
    }
}

impl EventideClientConfig {
    /// Creates a configuration targeting the given agent address.
    ///
    /// A trailing slash on the address is stripped so request paths can be
    /// appended directly.
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Sets the bearer token sent with every request.
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    /// Sets the timeout for plain request/response calls.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Loads configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// * `EVENTIDE_AGENT_ADDR` - Agent base URL (default: `http://localhost:8520`)
    /// * `EVENTIDE_AGENT_TOKEN` - Bearer token (optional)
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAddress`] if `EVENTIDE_AGENT_ADDR` is
    /// set to something that does not parse as a URL.
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url =
            std::env::var("EVENTIDE_AGENT_ADDR").unwrap_or_else(|_| DEFAULT_AGENT_ADDR.to_string());

        url::Url::parse(&base_url).map_err(|_| ConfigError::InvalidAddress(base_url.clone()))?;

        let mut config = Self::new(&base_url);
        if let Ok(token) = std::env::var("EVENTIDE_AGENT_TOKEN") {
            config.token = Some(token);
        }

        Ok(config)
    }

    /// Validates the configured base URL.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAddress`] if the base URL does not
    /// parse as a URL.
    pub fn validate(&self) -> Result<(), ConfigError> {
        url::Url::parse(&self.base_url)
            .map_err(|_| ConfigError::InvalidAddress(self.base_url.clone()))?;
        Ok(())
    }
}
