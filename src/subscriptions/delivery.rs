//! Fan-out of notifications to handlers and pull streams.

use crate::driver::NotificationSink;
use crate::types::Notification;
use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::types::{MessageHandler, NotificationStream};

/// Broadcasts every notification of one subscription.
pub(crate) struct Fanout {
    handlers: Vec<MessageHandler>,
    /// One sender per live stream.
    consumers: Mutex<Vec<Sender<Notification>>>,
    closed: Arc<AtomicBool>,
}

impl Fanout {
    pub(crate) fn new(handlers: Vec<MessageHandler>) -> Self {
        Self {
            handlers,
            consumers: Mutex::new(Vec::new()),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Sink to register on a connection.
    pub(crate) fn sink(self: &Arc<Self>) -> NotificationSink {
        let fanout = Arc::clone(self);
        Arc::new(move |n| fanout.deliver(n))
    }

    /// Hand `n` to every handler, then to every stream. Drops streams whose
    /// consumer went away.
    pub(crate) fn deliver(&self, n: Notification) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        for handler in &self.handlers {
            handler(&n);
        }
        self.consumers
            .lock()
            .retain(|consumer| consumer.send(n.clone()).is_ok());
    }

    /// New stream receiving everything delivered from now on.
    pub(crate) fn stream(&self) -> NotificationStream {
        let (sender, receiver) = unbounded();
        {
            let mut consumers = self.consumers.lock();
            if !self.closed.load(Ordering::SeqCst) {
                consumers.push(sender);
            }
        }
        NotificationStream {
            receiver,
            closed: Arc::clone(&self.closed),
        }
    }

    /// End all streams and stop delivering.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.consumers.lock().clear();
    }

    pub(crate) fn stream_count(&self) -> usize {
        self.consumers.lock().len()
    }
}
