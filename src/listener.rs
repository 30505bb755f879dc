//! Listener tying configuration, registry and subscriptions together.

use crate::driver::Driver;
use crate::error::{ListenError, Result};
use crate::retry::RetryOptions;
use crate::sql::{unique_channels, Statements};
use crate::subscriptions::{ConnectionRecord, ListenEvents, Registry, Subscription};
use crate::types::SubscriptionId;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Listener configuration.
#[derive(Clone)]
pub struct ListenerConfig {
    /// Database handle connections are taken from.
    pub driver: Arc<dyn Driver>,

    /// Policy for reconnecting after a lost connection, and for the initial
    /// connect when `retry_initial` is unset.
    pub retry_all: RetryOptions<ListenError>,

    /// Policy for the initial connect only.
    pub retry_initial: Option<RetryOptions<ListenError>>,

    /// Emit upper-case SQL keywords.
    pub capitalized_sql: bool,
}

impl ListenerConfig {
    /// Config reconnecting up to 5 times after 5, 25, 125, 625 and 3125 ms.
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver,
            retry_all: RetryOptions::exponential(5, 5),
            retry_initial: None,
            capitalized_sql: false,
        }
    }
}

impl fmt::Debug for ListenerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerConfig")
            .field("retry_all", &self.retry_all)
            .field("retry_initial", &self.retry_initial)
            .field("capitalized_sql", &self.capitalized_sql)
            .finish_non_exhaustive()
    }
}

/// Entry point: creates subscriptions and keeps track of the active ones.
pub struct Listener {
    config: ListenerConfig,
    registry: Arc<Registry>,
    next_id: AtomicU64,
}

impl Listener {
    pub fn new(config: ListenerConfig) -> Self {
        Self {
            config,
            registry: Arc::new(Registry::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    /// Open a dedicated connection and listen on `channels`.
    ///
    /// Returns once the initial connect succeeded, retried under
    /// `retry_initial` (or `retry_all`). Pass no channels for a connection
    /// that only sends notifications.
    pub fn subscribe<S: AsRef<str>>(
        &self,
        channels: &[S],
        events: ListenEvents,
    ) -> Result<Subscription> {
        let channels = unique_channels(channels)?;
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let subscription = Subscription::new(
            id,
            channels,
            events,
            Arc::clone(&self.config.driver),
            Statements::new(self.config.capitalized_sql),
            self.config.retry_all.clone(),
            Arc::downgrade(&self.registry),
        );

        let initial = self
            .config
            .retry_initial
            .as_ref()
            .unwrap_or(&self.config.retry_all);
        subscription.connect(initial)?;
        subscription.register(&self.registry);
        Ok(subscription)
    }

    /// Active subscriptions, oldest first.
    pub fn active_subscriptions(&self) -> Vec<ConnectionRecord> {
        self.registry.records()
    }

    /// Cancel every active subscription and return how many were open.
    pub fn cancel_all_subscriptions(&self, unlisten_all: bool) -> usize {
        self.registry.cancel_all(unlisten_all)
    }
}
