//! Core types shared by the listener components.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Unique identifier for a subscription.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

impl fmt::Debug for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriptionId({})", self.0)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time. Clocks set before the epoch read as zero.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0);
        Timestamp(micros)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// A message received on a channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Channel the notification was published on.
    pub channel: String,
    /// Payload text (empty when none was sent).
    pub payload: String,
    /// Payload size in bytes, as reported by the server.
    pub length: usize,
    /// Backend process id of the publishing session.
    pub process_id: u32,
}

impl Notification {
    pub fn new(channel: impl Into<String>, payload: impl Into<String>, process_id: u32) -> Self {
        let payload = payload.into();
        Self {
            channel: channel.into(),
            length: payload.len(),
            payload,
            process_id,
        }
    }
}

/// Context handed over by the driver when a connection is lost.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LostContext {
    /// Backend process id of the lost session, if the driver knew it.
    pub process_id: Option<u32>,
}

/// Lifecycle state of a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    /// Initial connect in progress.
    Connecting,
    /// Holding a live connection.
    Connected,
    /// Connection lost, reconnect in progress.
    Reconnecting,
    /// Reconnect gave up. Terminal.
    Dead,
    /// Cancelled by the owner. Terminal.
    Closed,
}

impl SubscriptionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SubscriptionState::Dead | SubscriptionState::Closed)
    }
}
