//! Channel subscriptions with automatic reconnection.
//!
//! A [`Subscription`] owns one dedicated connection and a set of channels.
//! When the connection drops it reconnects in the background and listens on
//! every tracked channel again. Notifications reach consumers in two ways,
//! usable together:
//! - Handlers registered through [`ListenEvents::on_message`]
//! - Any number of [`NotificationStream`]s created with [`Subscription::stream`]
//!
//! # Example
//!
//! ```ignore
//! let sub = listener.subscribe(&["orders"], ListenEvents::new())?;
//! let stream = sub.stream();
//!
//! sub.notify(&["orders"], Some("created:42"))?;
//!
//! for n in stream {
//!     println!("{} from pid {}: {}", n.channel, n.process_id, n.payload);
//! }
//! ```

mod delivery;
mod registry;
mod subscription;
mod types;

pub use registry::{ConnectionRecord, Registry};
pub use subscription::Subscription;
pub use types::{ListenEvents, MessageHandler, NotificationStream};
