//! HTTP client for the Eventide agent's user-event API.
//!
//! This module provides [`EventideClient`], which covers the agent's
//! request/response event endpoints (fire, list) and the raw blocking
//! poll used by the watch loop in [`crate::watch`].
//!
//! # Example
//!
//! ```rust,no_run
//! use eventide::{EventideClient, EventideClientConfig, FireOptions, ListOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EventideClientConfig::new("http://localhost:8520");
//!     let client = EventideClient::new(config)?;
//!
//!     let fired = client
//!         .fire("deploy", Some(b"v1.4.2"), FireOptions::new())
//!         .await?;
//!     println!("fired event {} at LTime {}", fired.id, fired.ltime);
//!
//!     let recent = client.list(ListOptions::new().with_name("deploy")).await?;
//!     println!("{} recent deploy events", recent.len());
//!
//!     Ok(())
//! }
//! ```

use std::time::Duration;

use reqwest::{Client, Method, StatusCode};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{ConfigError, EventideClientConfig};
use crate::event::{FireOptions, ListOptions, UserEvent};

/// Response header carrying the agent's change-stream index.
///
/// The value is an opaque cursor; legacy agents may emit a comma-joined
/// compound value, which [`crate::watch`] normalizes before reuse.
pub const INDEX_HEADER: &str = "X-Eventide-Index";

/// Errors that can occur during client operations.
#[derive(Error, Debug)]
pub enum ClientError {
    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API error with status code.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message from the agent.
        message: String,
    },

    /// The request was rejected before being sent.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Client for the Eventide agent's user-event API.
///
/// The client is cheap to clone; clones share the underlying connection
/// pool. Watch sessions started from the same client therefore share
/// transport resources while keeping fully independent cursors.
#[derive(Debug, Clone)]
pub struct EventideClient {
    http: Client,
    config: EventideClientConfig,
}

impl EventideClient {
    /// Creates a new client from configuration.
    ///
    /// No network I/O is performed at construction time.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] if the configured base URL is not a
    /// valid URL, or [`ClientError::Http`] if the HTTP client cannot be
    /// built.
    pub fn new(config: EventideClientConfig) -> Result<Self, ClientError> {
        config.validate()?;

        let http = Client::builder().timeout(config.timeout).build()?;

        Ok(Self { http, config })
    }

    /// Creates a client from environment variables.
    ///
    /// See [`EventideClientConfig::from_env`] for the variables consulted.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] if the environment holds an invalid
    /// agent address.
    pub fn from_env() -> Result<Self, ClientError> {
        let config = EventideClientConfig::from_env()?;
        Self::new(config)
    }

    /// Returns the configured agent base URL.
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Builds a request with authentication headers.
    fn build_request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.config.base_url, path);
        let mut req = self.http.request(method, &url);
        if let Some(token) = &self.config.token {
            req = req.header("Authorization", format!("Bearer {}", token));
        }
        req
    }

    /// Fires a new user event.
    ///
    /// The payload, if any, is sent verbatim as the request body; the agent
    /// stores and redistributes it base64-encoded. The returned record has
    /// its payload decoded back to the original bytes.
    ///
    /// # Arguments
    ///
    /// * `name` - Event name; must be non-empty
    /// * `payload` - Optional raw payload
    /// * `opts` - Delivery filters
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidRequest`] if `name` is empty or
    /// contains a path separator, and [`ClientError::Api`] if the agent
    /// rejects the event.
    pub async fn fire(
        &self,
        name: &str,
        payload: Option<&[u8]>,
        opts: FireOptions,
    ) -> Result<UserEvent, ClientError> {
        validate_event_name(name)?;

        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(node) = &opts.node_filter {
            query.push(("node", node.clone()));
        }
        if let Some(service) = &opts.service_filter {
            query.push(("service", service.clone()));
        }
        if let Some(tag) = &opts.tag_filter {
            query.push(("tag", tag.clone()));
        }

        let mut req = self
            .build_request(Method::PUT, &format!("/v1/event/fire/{}", name))
            .query(&query);
        if let Some(body) = payload {
            req = req.body(body.to_vec());
        }

        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let mut event: UserEvent = response.json().await?;
        event.decode_payload();

        info!(
            event_id = %event.id,
            name = %event.name,
            "Fired user event"
        );
        Ok(event)
    }

    /// Lists the most recent events the agent has seen.
    ///
    /// Payloads are base64-decoded according to
    /// [`ListOptions::decode_payload`].
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Api`] if the agent returns an error status.
    pub async fn list(&self, opts: ListOptions) -> Result<Vec<UserEvent>, ClientError> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(name) = &opts.name {
            query.push(("name", name.clone()));
        }

        let response = self
            .build_request(Method::GET, "/v1/event/list")
            .query(&query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let mut events = decode_event_list(response).await?.0;
        if opts.decode_payload {
            for event in &mut events {
                event.decode_payload();
            }
        }

        Ok(events)
    }

    /// Issues a single blocking poll against the event-list endpoint.
    ///
    /// The request carries `wait` and `index` query parameters so the agent
    /// holds it open until something changed or `wait` elapsed, and a
    /// client-side `timeout` that must be shorter than `wait`. Returns the
    /// raw event list together with the response's [`INDEX_HEADER`] value,
    /// unnormalized; callers resume from that cursor on the next poll.
    ///
    /// Most callers want [`watch`](EventideClient::watch) instead, which
    /// drives this in a loop and filters out already-seen events.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Http`] for transport failures (including the
    /// client-side timeout firing) and [`ClientError::Api`] for error
    /// statuses. Both are routine under blocking-query semantics; the watch
    /// loop treats them as retryable.
    pub async fn poll_events(
        &self,
        name: Option<&str>,
        index: &str,
        wait: Duration,
        timeout: Duration,
    ) -> Result<(Vec<UserEvent>, Option<String>), ClientError> {
        let mut query: Vec<(&str, String)> = vec![
            ("wait", format!("{}s", wait.as_secs())),
            ("index", index.to_string()),
        ];
        if let Some(name) = name {
            query.push(("name", name.to_string()));
        }

        debug!(index = %index, wait_secs = wait.as_secs(), "Polling event list");

        let response = self
            .build_request(Method::GET, "/v1/event/list")
            .query(&query)
            .timeout(timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        decode_event_list(response).await
    }
}

/// Reads the index header and decodes the body of an event-list response.
///
/// Agents serialize an empty event list as JSON `null`.
async fn decode_event_list(
    response: reqwest::Response,
) -> Result<(Vec<UserEvent>, Option<String>), ClientError> {
    let index = response
        .headers()
        .get(INDEX_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let events: Option<Vec<UserEvent>> = response.json().await?;
    Ok((events.unwrap_or_default(), index))
}

/// Validates a user-supplied event name before it is placed in a URL path.
fn validate_event_name(name: &str) -> Result<(), ClientError> {
    if name.is_empty() {
        return Err(ClientError::InvalidRequest("name required".to_string()));
    }
    if name.contains('/') || name.chars().any(char::is_whitespace) {
        return Err(ClientError::InvalidRequest(format!(
            "invalid event name: {:?}",
            name
        )));
    }
    Ok(())
}

/// Returns true if `status` indicates the request itself is malformed and
/// retrying it unchanged cannot succeed.
pub(crate) fn is_terminal_status(status: u16) -> bool {
    status == StatusCode::BAD_REQUEST.as_u16()
}
