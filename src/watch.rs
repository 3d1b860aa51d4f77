//! Long-polling event watch for the Eventide agent.
//!
//! The agent's only change-notification mechanism is the blocking query:
//! a `GET /v1/event/list` that the agent holds open until something
//! changed or a wait duration elapsed, resumed from an opaque index
//! cursor. The index only signals that *some* change occurred; it does
//! not say which events are new. Each event therefore carries a logical
//! clock value (`LTime`), and this module keeps a per-session watermark
//! of the highest `LTime` delivered so far, emitting exactly the events
//! above it.
//!
//! A watch runs as a spawned task that polls, filters, and delivers
//! events into a bounded channel until it is stopped or the receiver is
//! dropped. Transport failures and timeouts are retried with the same
//! cursor and never reach the consumer.
//!
//! # Example
//!
//! ```rust,no_run
//! use eventide::{EventideClient, EventideClientConfig, WatchOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = EventideClient::new(EventideClientConfig::default())?;
//!     let mut watch = client.watch(WatchOptions::new().with_name("deploy"))?;
//!
//!     let stop = watch.handle();
//!     tokio::spawn(async move {
//!         tokio::time::sleep(std::time::Duration::from_secs(300)).await;
//!         stop.stop();
//!     });
//!
//!     while let Some(event) = watch.recv().await {
//!         let event = event?;
//!         println!("{} (LTime {})", event.name, event.ltime);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Known limitation
//!
//! If the agent restarts and its logical clock resets below the session
//! watermark, events are suppressed until the clock passes the old
//! watermark again. The watermark is the only reliable de-duplication
//! key across polls, so this trade-off is accepted rather than papered
//! over with weaker semantics.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::client::{is_terminal_status, ClientError, EventideClient};
use crate::event::UserEvent;

/// Server-side hold duration requested on each poll.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(60);

/// Client-side per-poll timeout.
///
/// Kept strictly below [`DEFAULT_WAIT`] so the client re-polls on its own
/// schedule instead of trusting the agent to answer exactly at the wait
/// boundary.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(59);

/// First backoff step after consecutive poll failures.
pub const DEFAULT_RETRY_BASE: Duration = Duration::from_millis(500);

/// Upper bound on the failure backoff.
pub const DEFAULT_RETRY_CAP: Duration = Duration::from_secs(30);

/// Cursor value meaning "no index established yet".
const UNSET_INDEX: &str = "0";

/// Capacity of the event delivery channel.
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Errors surfaced by a watch session.
#[derive(Error, Debug)]
pub enum WatchError {
    /// The watch options are unusable; reported before any poll is issued.
    #[error("Invalid watch options: {0}")]
    Config(String),

    /// The agent rejected the poll request itself; retrying it unchanged
    /// cannot succeed, so the session terminates.
    #[error("Watch rejected by agent ({status}): {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Error message from the agent.
        message: String,
    },
}

/// Options for [`EventideClient::watch`].
///
/// # Example
///
/// ```rust
/// use eventide::WatchOptions;
///
/// let opts = WatchOptions::new()
///     .with_name("deploy")
///     .with_decode_payload(false);
/// assert_eq!(opts.name.as_deref(), Some("deploy"));
/// ```
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Server-side event-name filter; fixed for the session's lifetime.
    pub name: Option<String>,

    /// Base64-decode each event's payload before delivery.
    pub decode_payload: bool,

    /// Hold duration requested from the agent on each poll.
    pub wait: Duration,

    /// Client-side timeout per poll; must be strictly less than `wait`.
    pub poll_timeout: Duration,

    /// First backoff step after consecutive poll failures.
    pub retry_base: Duration,

    /// Upper bound on the failure backoff.
    pub retry_cap: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            name: None,
            decode_payload: true,
            wait: DEFAULT_WAIT,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            retry_base: DEFAULT_RETRY_BASE,
            retry_cap: DEFAULT_RETRY_CAP,
        }
    }
}

impl WatchOptions {
    /// Creates the default option set: all events, payloads decoded,
    /// one-minute server wait with a 59-second client timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Only watch events with the given name.
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Controls whether payloads are base64-decoded before delivery.
    pub fn with_decode_payload(mut self, decode: bool) -> Self {
        self.decode_payload = decode;
        self
    }

    /// Sets the server-side hold duration requested on each poll.
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    /// Sets the client-side per-poll timeout.
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Sets the first backoff step used after consecutive poll failures.
    pub fn with_retry_base(mut self, base: Duration) -> Self {
        self.retry_base = base;
        self
    }

    /// Sets the upper bound on the failure backoff.
    pub fn with_retry_cap(mut self, cap: Duration) -> Self {
        self.retry_cap = cap;
        self
    }

    /// Validates the option set before a session is started.
    fn validate(&self) -> Result<(), WatchError> {
        if let Some(name) = &self.name {
            if name.is_empty() {
                return Err(WatchError::Config("event name filter is empty".to_string()));
            }
            if name.chars().any(char::is_whitespace) {
                return Err(WatchError::Config(format!(
                    "event name filter contains whitespace: {:?}",
                    name
                )));
            }
        }
        if self.poll_timeout >= self.wait {
            return Err(WatchError::Config(format!(
                "poll timeout ({:?}) must be strictly less than the server wait ({:?})",
                self.poll_timeout, self.wait
            )));
        }
        Ok(())
    }
}

/// Session lifecycle state.
///
/// A session moves from `Bootstrapping` to `Streaming` after its first
/// successful poll and never back; on first contact every existing event
/// is old, so the first batch only establishes the watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Bootstrapping,
    Streaming,
}

/// State carried across poll iterations of one watch session.
///
/// Holds the resume cursor and the logical-clock watermark. Kept separate
/// from the network driver so the filtering invariants are testable on
/// plain event lists.
#[derive(Debug)]
struct WatchSession {
    /// Opaque resume cursor for the next poll, already normalized.
    index: String,

    /// Highest `LTime` delivered so far; never decreases.
    ltime_floor: u64,

    state: SessionState,
}

impl WatchSession {
    fn new() -> Self {
        Self {
            index: UNSET_INDEX.to_string(),
            ltime_floor: 0,
            state: SessionState::Bootstrapping,
        }
    }

    /// Stores the cursor returned by a poll, normalizing compound values.
    fn record_index(&mut self, raw: &str) {
        self.index = normalize_index(raw).to_string();
    }

    /// Splits a poll result into the events not yet delivered.
    ///
    /// The first successful poll establishes the watermark and yields
    /// nothing. After that, events are kept in server order and the
    /// watermark advances per kept event, so a batch that interleaves old
    /// and new entries yields exactly the new ones.
    fn sift(&mut self, events: Vec<UserEvent>) -> Vec<UserEvent> {
        match self.state {
            SessionState::Bootstrapping => {
                for event in &events {
                    if event.ltime > self.ltime_floor {
                        self.ltime_floor = event.ltime;
                    }
                }
                self.state = SessionState::Streaming;
                Vec::new()
            }
            SessionState::Streaming => {
                let mut fresh = Vec::new();
                for event in events {
                    if event.ltime > self.ltime_floor {
                        self.ltime_floor = event.ltime;
                        fresh.push(event);
                    }
                }
                fresh
            }
        }
    }
}

/// Normalizes a raw index header value into an effective cursor.
///
/// Legacy agents may join two index values with a comma; the usable
/// cursor is the part after the comma. Applied unconditionally on every
/// poll result.
fn normalize_index(raw: &str) -> &str {
    match raw.split_once(',') {
        Some((_, effective)) => effective.trim_start(),
        None => raw,
    }
}

/// Backoff before retrying after `failures` consecutive poll failures.
///
/// The first failure retries immediately: a timed-out blocking query is
/// the steady-state outcome when nothing changed. Repeated failures back
/// off geometrically from `base` up to `cap`.
fn retry_delay(base: Duration, cap: Duration, failures: u32) -> Duration {
    if failures <= 1 {
        return Duration::ZERO;
    }
    let exponent = failures.saturating_sub(2).min(16);
    base.saturating_mul(1u32 << exponent).min(cap)
}

/// Handle for stopping a watch session.
///
/// Cloneable; any clone can stop the session. Stopping prevents further
/// polls and further emission. An in-flight poll at the moment of
/// cancellation is aborted and its result discarded.
#[derive(Debug, Clone)]
pub struct WatchHandle {
    token: CancellationToken,
}

impl WatchHandle {
    /// Stops the watch session.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Returns true once the session has been stopped.
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Handler trait for processing watched events.
///
/// Implement this to consume a watch with [`EventWatch::run`] instead of
/// receiving events one at a time.
///
/// # Example
///
/// ```rust
/// use eventide::{EventHandler, UserEvent};
///
/// struct Printer;
///
/// #[async_trait::async_trait]
/// impl EventHandler for Printer {
///     async fn handle(
///         &self,
///         event: UserEvent,
///     ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
///         println!("{} at LTime {}", event.name, event.ltime);
///         Ok(())
///     }
/// }
/// ```
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync {
    /// Process one watched event.
    ///
    /// Return `Err` if processing failed; the watch continues with the
    /// next event.
    async fn handle(
        &self,
        event: UserEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// An active watch session.
///
/// Delivers events in the order the agent reports them, each at most
/// once. The stream ends when the session is stopped, or after a single
/// terminal [`WatchError`] item if the agent rejects the poll request
/// outright.
#[derive(Debug)]
pub struct EventWatch {
    events: mpsc::Receiver<Result<UserEvent, WatchError>>,
    handle: WatchHandle,
}

impl EventWatch {
    /// Receives the next event, or `None` once the session has ended.
    pub async fn recv(&mut self) -> Option<Result<UserEvent, WatchError>> {
        self.events.recv().await
    }

    /// Returns a handle that can stop this session.
    pub fn handle(&self) -> WatchHandle {
        self.handle.clone()
    }

    /// Stops the session. Equivalent to `self.handle().stop()`.
    pub fn stop(&self) {
        self.handle.stop();
    }

    /// Converts the watch into a [`futures::Stream`] of events.
    ///
    /// Grab a [`handle`](EventWatch::handle) first if you need to stop the
    /// session explicitly; dropping the stream also ends it.
    pub fn into_stream(self) -> ReceiverStream<Result<UserEvent, WatchError>> {
        ReceiverStream::new(self.events)
    }

    /// Drives the watch to completion through a handler.
    ///
    /// Handler errors are logged and the watch continues; a terminal
    /// session error is returned. Returns `Ok(())` once the session is
    /// stopped.
    pub async fn run<H: EventHandler + 'static>(
        mut self,
        handler: Arc<H>,
    ) -> Result<(), WatchError> {
        while let Some(item) = self.recv().await {
            match item {
                Ok(event) => {
                    if let Err(err) = handler.handle(event).await {
                        error!(error = %err, "Event handler failed");
                    }
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

impl EventideClient {
    /// Starts a watch session for new user events.
    ///
    /// Returns immediately with an [`EventWatch`]; the first poll happens
    /// in a background task, so the first event may arrive after an
    /// arbitrary delay. The session runs until stopped via
    /// [`WatchHandle::stop`] or until the [`EventWatch`] is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Config`] for unusable options (empty name
    /// filter, poll timeout not below the server wait). No other error is
    /// reported at start time; transport failures are retried internally.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn watch(&self, opts: WatchOptions) -> Result<EventWatch, WatchError> {
        opts.validate()?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let token = CancellationToken::new();
        let handle = WatchHandle {
            token: token.clone(),
        };

        let client = self.clone();
        tokio::spawn(async move {
            drive_watch(client, opts, tx, token).await;
        });

        Ok(EventWatch { events: rx, handle })
    }
}

/// The watch loop: poll, filter, deliver, repeat.
///
/// One logical stream of control per session; the next poll is not issued
/// until every event from the previous poll has been delivered. Exits
/// when cancelled, when the consumer goes away, or after reporting a
/// terminal error.
async fn drive_watch(
    client: EventideClient,
    opts: WatchOptions,
    tx: mpsc::Sender<Result<UserEvent, WatchError>>,
    token: CancellationToken,
) {
    let mut session = WatchSession::new();
    let mut failures: u32 = 0;

    loop {
        if token.is_cancelled() {
            break;
        }

        let polled = tokio::select! {
            _ = token.cancelled() => break,
            _ = tx.closed() => break,
            result = client.poll_events(
                opts.name.as_deref(),
                &session.index,
                opts.wait,
                opts.poll_timeout,
            ) => result,
        };

        match polled {
            Ok((events, index_header)) => {
                failures = 0;

                match index_header {
                    Some(raw) => session.record_index(&raw),
                    None => warn!(
                        index = %session.index,
                        "Poll response carried no index header; keeping previous cursor"
                    ),
                }

                let fresh = session.sift(events);
                debug!(
                    index = %session.index,
                    ltime_floor = session.ltime_floor,
                    fresh = fresh.len(),
                    "Poll completed"
                );

                for mut event in fresh {
                    if opts.decode_payload {
                        event.decode_payload();
                    }
                    if token.is_cancelled() {
                        return;
                    }
                    if tx.send(Ok(event)).await.is_err() {
                        debug!("Event receiver dropped; stopping watch");
                        return;
                    }
                }
            }
            Err(ClientError::Api { status, message }) if is_terminal_status(status) => {
                error!(status, message = %message, "Agent rejected the watch poll; closing session");
                let _ = tx.send(Err(WatchError::Rejected { status, message })).await;
                return;
            }
            Err(err) => {
                failures = failures.saturating_add(1);
                let delay = retry_delay(opts.retry_base, opts.retry_cap, failures);
                debug!(
                    error = %err,
                    failures,
                    delay_ms = delay.as_millis() as u64,
                    index = %session.index,
                    "Poll failed; retrying with the same cursor"
                );
                if !delay.is_zero() {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tx.closed() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}
