//! Registry of active subscriptions.

use crate::types::{SubscriptionId, Timestamp};
use parking_lot::RwLock;

use super::subscription::Subscription;

/// Diagnostics view of one registered subscription.
#[derive(Clone, Debug)]
pub struct ConnectionRecord {
    pub id: SubscriptionId,
    pub created: Timestamp,
    /// Channels tracked when the record was taken.
    pub channels: Vec<String>,
    pub subscription: Subscription,
}

/// Active subscriptions in creation order.
///
/// A subscription enters once its initial connect succeeded and leaves when
/// it is cancelled or its reconnect gives up.
#[derive(Default)]
pub struct Registry {
    entries: RwLock<Vec<Subscription>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, subscription: Subscription) {
        self.entries.write().push(subscription);
    }

    /// Returns whether an entry was removed.
    pub(crate) fn remove(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.write();
        match entries.iter().position(|s| s.id() == id) {
            Some(pos) => {
                entries.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Copy of the current entries.
    pub fn snapshot(&self) -> Vec<Subscription> {
        self.entries.read().clone()
    }

    pub fn records(&self) -> Vec<ConnectionRecord> {
        // Built from a snapshot: reading channels takes the subscription's
        // state lock, which must never be taken under the registry lock.
        self.snapshot()
            .into_iter()
            .map(|subscription| ConnectionRecord {
                id: subscription.id(),
                created: subscription.created(),
                channels: subscription.channels(),
                subscription,
            })
            .collect()
    }

    /// Cancel every registered subscription. Returns how many were still open.
    pub fn cancel_all(&self, unlisten_all: bool) -> usize {
        let cancelled = self
            .snapshot()
            .iter()
            .filter(|s| s.cancel(unlisten_all))
            .count();
        tracing::info!(cancelled, "cancelled all subscriptions");
        cancelled
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
