//! User-event wire types for the Eventide agent.
//!
//! This module provides Rust structs to deserialize user-event records
//! returned by the agent's `/v1/event` endpoints, plus the option structs
//! for firing and listing events.
//!
//! # Example
//!
//! ```rust
//! use eventide::UserEvent;
//!
//! let json = r#"{
//!   "ID": "b54fe110-7af5-cafc-d1fb-afc8ba432b1c",
//!   "Name": "deploy",
//!   "Payload": "aGVsbG8=",
//!   "NodeFilter": "",
//!   "ServiceFilter": "",
//!   "TagFilter": "",
//!   "Version": 1,
//!   "LTime": 19
//! }"#;
//!
//! let event: UserEvent = serde_json::from_str(json).unwrap();
//! assert_eq!(event.name, "deploy");
//! assert_eq!(event.ltime, 19);
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A user event as reported by the Eventide agent.
///
/// The agent transports payloads as base64 strings; see
/// [`UserEvent::decode_payload`]. The logical clock value `LTime` is
/// assigned by the agent and increases with each fired event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserEvent {
    /// Unique event identifier.
    #[serde(rename = "ID", default)]
    pub id: String,

    /// Event name.
    pub name: String,

    /// Event payload, base64-encoded on the wire.
    #[serde(default)]
    pub payload: Option<String>,

    /// Regular expression restricting delivery to matching node names.
    #[serde(default)]
    pub node_filter: String,

    /// Regular expression restricting delivery to nodes running a matching service.
    #[serde(default)]
    pub service_filter: String,

    /// Regular expression restricting delivery to matching service tags.
    #[serde(default)]
    pub tag_filter: String,

    /// Wire format version of the event record.
    #[serde(default)]
    pub version: u64,

    /// Logical clock value assigned by the agent.
    #[serde(rename = "LTime", default)]
    pub ltime: u64,
}

impl UserEvent {
    /// Decodes the base64 payload in place.
    ///
    /// A payload that is not valid base64 is left untouched and logged;
    /// the event is still usable with its raw payload.
    pub fn decode_payload(&mut self) {
        let Some(encoded) = self.payload.as_deref() else {
            return;
        };

        match STANDARD.decode(encoded) {
            Ok(bytes) => {
                self.payload = Some(String::from_utf8_lossy(&bytes).into_owned());
            }
            Err(err) => {
                warn!(
                    event = %self.name,
                    error = %err,
                    "event payload is not valid base64; leaving it encoded"
                );
            }
        }
    }
}

/// Delivery filters for [`fire`](crate::EventideClient::fire).
///
/// All filters are optional; an unset filter places no restriction on
/// which nodes receive the event.
#[derive(Debug, Clone, Default)]
pub struct FireOptions {
    /// Restrict delivery to nodes whose name matches this expression.
    pub node_filter: Option<String>,

    /// Restrict delivery to nodes running a service matching this expression.
    pub service_filter: Option<String>,

    /// Restrict delivery to services with a tag matching this expression.
    pub tag_filter: Option<String>,
}

impl FireOptions {
    /// Creates an option set with no delivery filters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts delivery to nodes whose name matches `filter`.
    pub fn with_node_filter(mut self, filter: &str) -> Self {
        self.node_filter = Some(filter.to_string());
        self
    }

    /// Restricts delivery to nodes running a service matching `filter`.
    pub fn with_service_filter(mut self, filter: &str) -> Self {
        self.service_filter = Some(filter.to_string());
        self
    }

    /// Restricts delivery to services carrying a tag matching `filter`.
    pub fn with_tag_filter(mut self, filter: &str) -> Self {
        self.tag_filter = Some(filter.to_string());
        self
    }
}

/// Options for [`list`](crate::EventideClient::list).
#[derive(Debug, Clone)]
pub struct ListOptions {
    /// Only return events with this name.
    pub name: Option<String>,

    /// Base64-decode each event's payload before returning it.
    pub decode_payload: bool,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            name: None,
            decode_payload: true,
        }
    }
}

impl ListOptions {
    /// Creates the default option set: no name filter, payloads decoded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Only return events with the given name.
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Controls whether payloads are base64-decoded before returning.
    pub fn with_decode_payload(mut self, decode: bool) -> Self {
        self.decode_payload = decode;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event(ltime: u64) -> UserEvent {
        UserEvent {
            id: format!("event-{}", ltime),
            name: "deploy".to_string(),
            payload: None,
            node_filter: String::new(),
            service_filter: String::new(),
            tag_filter: String::new(),
            version: 1,
            ltime,
        }
    }

    #[test]
    fn test_deserialize_wire_record() {
        let json = r#"{
            "ID": "b54fe110-7af5-cafc-d1fb-afc8ba432b1c",
            "Name": "deploy",
            "Payload": "aGVsbG8=",
            "NodeFilter": "",
            "ServiceFilter": "web",
            "TagFilter": "",
            "Version": 1,
            "LTime": 19
        }"#;

        let event: UserEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.id, "b54fe110-7af5-cafc-d1fb-afc8ba432b1c");
        assert_eq!(event.name, "deploy");
        assert_eq!(event.payload.as_deref(), Some("aGVsbG8="));
        assert_eq!(event.service_filter, "web");
        assert_eq!(event.ltime, 19);
    }

    #[test]
    fn test_deserialize_minimal_record() {
        // Agents omit empty fields from older wire versions.
        let json = r#"{"Name": "ping", "LTime": 3}"#;

        let event: UserEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.name, "ping");
        assert_eq!(event.ltime, 3);
        assert!(event.payload.is_none());
        assert!(event.id.is_empty());
    }

    #[test]
    fn test_decode_payload() {
        let mut event = sample_event(1);
        event.payload = Some("aGVsbG8=".to_string());

        event.decode_payload();
        assert_eq!(event.payload.as_deref(), Some("hello"));
    }

    #[test]
    fn test_decode_payload_absent_is_noop() {
        let mut event = sample_event(1);
        event.decode_payload();
        assert!(event.payload.is_none());
    }

    #[test]
    fn test_decode_payload_invalid_base64_left_intact() {
        let mut event = sample_event(1);
        event.payload = Some("not base64!!".to_string());

        event.decode_payload();
        assert_eq!(event.payload.as_deref(), Some("not base64!!"));
    }

    #[test]
    fn test_fire_options_builder() {
        let opts = FireOptions::new()
            .with_node_filter("node-[0-9]+")
            .with_service_filter("web")
            .with_tag_filter("primary");

        assert_eq!(opts.node_filter.as_deref(), Some("node-[0-9]+"));
        assert_eq!(opts.service_filter.as_deref(), Some("web"));
        assert_eq!(opts.tag_filter.as_deref(), Some("primary"));
    }

    #[test]
    fn test_list_options_defaults() {
        let opts = ListOptions::new();
        assert!(opts.name.is_none());
        assert!(opts.decode_payload);
    }

    #[test]
    fn test_list_options_builder() {
        let opts = ListOptions::new()
            .with_name("deploy")
            .with_decode_payload(false);

        assert_eq!(opts.name.as_deref(), Some("deploy"));
        assert!(!opts.decode_payload);
    }
}
