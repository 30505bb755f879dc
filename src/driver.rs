//! Contract with the database driver.
//!
//! The listener never speaks the wire protocol itself. It asks a [`Driver`]
//! for dedicated connections, runs statement batches on them and receives
//! notifications through a sink registered on each connection.

use crate::types::{LostContext, Notification};
use std::sync::Arc;

/// Error type reported by driver implementations.
pub type DriverError = Box<dyn std::error::Error + Send + Sync>;

/// Callback receiving every notification that arrives on a connection.
pub type NotificationSink = Arc<dyn Fn(Notification) + Send + Sync>;

/// Invoked by the driver when a physical connection is lost.
///
/// Being `FnOnce`, a driver can fire it at most once per connection.
pub type LostCallback = Box<dyn FnOnce(DriverError, LostContext) + Send>;

/// Options for acquiring a connection.
pub struct ConnectOptions {
    /// Request a dedicated physical connection rather than a pooled one.
    pub direct: bool,
    /// Fired when the connection drops unexpectedly. Not fired on `release`.
    pub on_lost: LostCallback,
}

/// A database handle able to open connections.
pub trait Driver: Send + Sync {
    fn connect(&self, options: ConnectOptions) -> Result<Arc<dyn Connection>, DriverError>;
}

/// One physical connection.
pub trait Connection: Send + Sync {
    /// Execute statements as a single batch.
    fn execute_batch(&self, statements: &[String]) -> Result<(), DriverError>;

    /// Route incoming notifications to `sink`, replacing any previous sink.
    fn register_sink(&self, sink: NotificationSink);

    /// Stop routing notifications.
    fn unregister_sink(&self);

    /// Give the connection back. The loss callback is not fired.
    fn release(&self);

    /// Backend process id of the session, if known.
    fn process_id(&self) -> Option<u32> {
        None
    }
}
