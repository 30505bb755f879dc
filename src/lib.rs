//! # pg-listener
//!
//! Long-lived `LISTEN` / `NOTIFY` subscriptions that survive connection loss.
//!
//! ## Core Concepts
//!
//! - **Subscriptions**: one dedicated connection plus a set of channels
//! - **Reconnection**: lost connections are re-established in the background
//!   under a [`RetryOptions`] policy, replaying every tracked channel
//! - **Delivery**: every notification goes to all handlers and all streams
//! - **Registry**: active subscriptions, for diagnostics and bulk cancel
//!
//! Delivery is best effort: notifications published while a subscription is
//! reconnecting are lost.
//!
//! ## Example
//!
//! ```ignore
//! use pg_listener::{ListenEvents, Listener, ListenerConfig, RetryOptions};
//! use std::time::Duration;
//!
//! let mut config = ListenerConfig::new(driver);
//! config.retry_all = RetryOptions::limit(10).with_delay(Duration::from_secs(1));
//! let listener = Listener::new(config);
//!
//! let sub = listener.subscribe(
//!     &["orders", "payments"],
//!     ListenEvents::new().on_message(|n| println!("{}: {}", n.channel, n.payload)),
//! )?;
//!
//! sub.add(&["refunds"])?;
//! sub.notify(&["orders"], Some("created:42"))?;
//!
//! listener.cancel_all_subscriptions(true);
//! ```

pub mod driver;
pub mod error;
pub mod listener;
pub mod memory;
pub mod retry;
pub mod sql;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use driver::{ConnectOptions, Connection, Driver, DriverError, LostCallback, NotificationSink};
pub use error::{ListenError, Result};
pub use listener::{Listener, ListenerConfig};
pub use memory::{MemoryDriver, MemoryDriverError};
pub use retry::{retry_operation, Delay, Retry, RetryHook, RetryOptions, RetryStatus};
pub use sql::Statements;
pub use subscriptions::{
    ConnectionRecord, ListenEvents, MessageHandler, NotificationStream, Registry, Subscription,
};
pub use types::{LostContext, Notification, SubscriptionId, SubscriptionState, Timestamp};
