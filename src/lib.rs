//! Eventide - async client for the Eventide coordination agent's user-event API
//!
//! This library covers the agent's user-event endpoints: firing events,
//! listing recent events, and watching for new events as a continuous
//! stream built on the agent's blocking-query mechanism.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `config`: Client configuration and environment loading
//! - `client`: HTTP client for the fire/list/poll endpoints
//! - `event`: User-event wire types and payload decoding
//! - `watch`: The long-polling watch loop, cursor tracking, and
//!   logical-clock filtering
//!
//! # Example
//!
//! ```no_run
//! use eventide::{EventideClient, EventideClientConfig, WatchOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = EventideClient::new(EventideClientConfig::from_env()?)?;
//!
//!     let mut watch = client.watch(WatchOptions::new().with_name("deploy"))?;
//!     while let Some(event) = watch.recv().await {
//!         let event = event?;
//!         println!("{} (LTime {})", event.name, event.ltime);
//!     }
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod event;
pub mod watch;

// Re-export commonly used types
pub use client::{ClientError, EventideClient, INDEX_HEADER};
pub use config::{ConfigError, EventideClientConfig};
pub use event::{FireOptions, ListOptions, UserEvent};
pub use watch::{EventHandler, EventWatch, WatchError, WatchHandle, WatchOptions};
