//! Handler and consumer types for subscriptions.

use crate::driver::Connection;
use crate::error::ListenError;
use crate::types::{LostContext, Notification};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Handler invoked for every notification.
pub type MessageHandler = Box<dyn Fn(&Notification) + Send + Sync>;

type ConnectedHandler = Box<dyn Fn(&dyn Connection, u32) + Send + Sync>;
type DisconnectedHandler = Box<dyn Fn(&ListenError, &LostContext) + Send + Sync>;
type FailedReconnectHandler = Box<dyn Fn(&ListenError) + Send + Sync>;

/// Event handlers for a subscription. Every handler is optional.
///
/// ```ignore
/// let events = ListenEvents::new()
///     .on_message(|n| println!("{}: {}", n.channel, n.payload))
///     .on_failed_reconnect(|e| eprintln!("gave up: {}", e));
/// ```
#[derive(Default)]
pub struct ListenEvents {
    pub(crate) messages: Vec<MessageHandler>,
    connected: Option<ConnectedHandler>,
    disconnected: Option<DisconnectedHandler>,
    failed_reconnect: Option<FailedReconnectHandler>,
}

impl ListenEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a notification handler. Several may be registered.
    pub fn on_message<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.messages.push(Box::new(handler));
        self
    }

    /// Called after every successful (re)connect with the connect counter.
    pub fn on_connected<F>(mut self, handler: F) -> Self
    where
        F: Fn(&dyn Connection, u32) + Send + Sync + 'static,
    {
        self.connected = Some(Box::new(handler));
        self
    }

    /// Called when the connection is lost, before reconnecting starts.
    ///
    /// Runs on whichever thread the driver reports the loss from. A driver
    /// that reports it from inside a statement batch runs the handler while
    /// the `add`, `remove` or `cancel` issuing that batch still holds the
    /// subscription's control lock, so the handler must not call those on
    /// the same subscription. Hand the work to another thread instead.
    pub fn on_disconnected<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ListenError, &LostContext) + Send + Sync + 'static,
    {
        self.disconnected = Some(Box::new(handler));
        self
    }

    /// Called once if reconnecting gives up. The subscription is dead after this.
    pub fn on_failed_reconnect<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ListenError) + Send + Sync + 'static,
    {
        self.failed_reconnect = Some(Box::new(handler));
        self
    }

    pub(crate) fn connected(&self, connection: &dyn Connection, count: u32) {
        if let Some(handler) = &self.connected {
            handler(connection, count);
        }
    }

    pub(crate) fn disconnected(&self, error: &ListenError, context: &LostContext) {
        if let Some(handler) = &self.disconnected {
            handler(error, context);
        }
    }

    pub(crate) fn failed_reconnect(&self, error: &ListenError) {
        if let Some(handler) = &self.failed_reconnect {
            handler(error);
        }
    }
}

/// Pull consumer of a subscription's notifications.
///
/// Sees only notifications that arrive after it was created. Iterating
/// blocks until the next notification and ends once the subscription is
/// cancelled or dies.
pub struct NotificationStream {
    pub(crate) receiver: Receiver<Notification>,
    pub(crate) closed: Arc<AtomicBool>,
}

impl NotificationStream {
    /// Receive the next notification (blocking). `None` once the subscription ended.
    pub fn recv(&self) -> Option<Notification> {
        match self.receiver.recv() {
            Ok(n) if !self.is_closed() => Some(n),
            _ => None,
        }
    }

    /// Take a buffered notification without blocking.
    pub fn try_recv(&self) -> Option<Notification> {
        match self.receiver.try_recv() {
            Ok(n) if !self.is_closed() => Some(n),
            _ => None,
        }
    }

    /// Receive with timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Notification, RecvTimeoutError> {
        if self.is_closed() {
            return Err(RecvTimeoutError::Disconnected);
        }
        let n = self.receiver.recv_timeout(timeout)?;
        if self.is_closed() {
            return Err(RecvTimeoutError::Disconnected);
        }
        Ok(n)
    }

    /// Whether the subscription has ended.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Iterator for NotificationStream {
    type Item = Notification;

    fn next(&mut self) -> Option<Notification> {
        self.recv()
    }
}
