//! Subscription lifecycle: connecting, reconnecting and channel membership.

use crate::driver::{ConnectOptions, Connection, Driver, DriverError};
use crate::error::{ListenError, Result};
use crate::retry::{retry_operation, RetryOptions};
use crate::sql::{unique_channels, validate_channel, Statements};
use crate::types::{LostContext, SubscriptionId, SubscriptionState, Timestamp};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use super::delivery::Fanout;
use super::registry::Registry;
use super::types::{ListenEvents, NotificationStream};

/// The connection currently serving a subscription.
struct Live {
    /// Which acquisition this connection came from.
    generation: u64,
    connection: Arc<dyn Connection>,
}

struct State {
    phase: SubscriptionState,
    /// Tracked channels, unique, in the order they were added.
    channels: Vec<String>,
    live: Option<Live>,
    connect_count: u32,
    /// Loss reported for a connection that was still being set up.
    early_loss: Option<DriverError>,
}

pub(crate) struct Shared {
    id: SubscriptionId,
    created: Timestamp,
    driver: Arc<dyn Driver>,
    statements: Statements,
    reconnect: RetryOptions<ListenError>,
    events: ListenEvents,
    fanout: Arc<Fanout>,
    state: Mutex<State>,
    /// Serializes control operations and connect attempts. Never taken by
    /// the loss callback.
    ops: Mutex<()>,
    generation: AtomicU64,
    registry: Weak<Registry>,
}

impl Shared {
    /// One connect attempt, firing `on_connected` on success.
    ///
    /// Every count `attach` hands out is reported, even if the connection
    /// was lost again in the meantime.
    fn connect_once(self: &Arc<Self>) -> Result<()> {
        if let Some((connection, count)) = self.attach()? {
            self.events.connected(connection.as_ref(), count);
        }
        Ok(())
    }

    /// Acquire a connection, hook up delivery and replay the channel set.
    ///
    /// Returns `None` without connecting if the subscription already ended.
    fn attach(self: &Arc<Self>) -> Result<Option<(Arc<dyn Connection>, u32)>> {
        let _ops = self.ops.lock();
        let channels = {
            let mut state = self.state.lock();
            if state.phase.is_terminal() {
                tracing::debug!(subscription = %self.id, "subscription ended, not connecting");
                return Ok(None);
            }
            state.early_loss = None;
            state.channels.clone()
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let weak = Arc::downgrade(self);
        let options = ConnectOptions {
            direct: true,
            on_lost: Box::new(move |error, context| {
                if let Some(shared) = weak.upgrade() {
                    shared.connection_lost(generation, error, context);
                }
            }),
        };
        let connection = self.driver.connect(options).map_err(ListenError::Connect)?;
        connection.register_sink(self.fanout.sink());

        if !channels.is_empty() {
            if let Err(e) = connection.execute_batch(&self.statements.listen(&channels)) {
                connection.unregister_sink();
                connection.release();
                return Err(ListenError::Statement(e));
            }
        }

        let mut state = self.state.lock();
        if let Some(error) = state.early_loss.take() {
            drop(state);
            connection.unregister_sink();
            connection.release();
            return Err(ListenError::ConnectionLost(error));
        }
        state.live = Some(Live {
            generation,
            connection: Arc::clone(&connection),
        });
        state.phase = SubscriptionState::Connected;
        state.connect_count += 1;
        let count = state.connect_count;
        drop(state);

        let process_id = connection.process_id();
        tracing::info!(
            subscription = %self.id,
            count,
            channels = channels.len(),
            process_id = ?process_id,
            "connected"
        );
        Ok(Some((connection, count)))
    }

    /// Loss callback target. Ignores losses of connections no longer in use.
    fn connection_lost(self: &Arc<Self>, generation: u64, error: DriverError, context: LostContext) {
        let connection = {
            let mut state = self.state.lock();
            let current = matches!(&state.live, Some(live) if live.generation == generation);
            if !current {
                if !state.phase.is_terminal()
                    && generation == self.generation.load(Ordering::SeqCst)
                {
                    state.early_loss = Some(error);
                }
                return;
            }
            let Some(live) = state.live.take() else {
                return;
            };
            state.phase = SubscriptionState::Reconnecting;
            live.connection
        };
        connection.unregister_sink();

        let error = ListenError::ConnectionLost(error);
        tracing::warn!(subscription = %self.id, error = %error, "connection lost, reconnecting");
        self.events.disconnected(&error, &context);

        let shared = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("pg-listener-reconnect-{}", self.id))
            .spawn(move || shared.reconnect());
        if let Err(e) = spawned {
            self.fail(ListenError::Io(e));
        }
    }

    fn reconnect(self: Arc<Self>) {
        let result = retry_operation(&self.reconnect, |status| {
            tracing::debug!(subscription = %self.id, attempt = status.index, "reconnect attempt");
            self.connect_once()
        });
        if let Err(error) = result {
            self.fail(error);
        }
    }

    /// Permanent reconnect failure.
    fn fail(&self, error: ListenError) {
        {
            let mut state = self.state.lock();
            if state.phase.is_terminal() {
                return;
            }
            state.phase = SubscriptionState::Dead;
        }
        self.fanout.close();
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
        tracing::error!(subscription = %self.id, error = %error, "reconnect failed, giving up");
        self.events.failed_reconnect(&error);
    }

    fn connection(&self) -> Option<Arc<dyn Connection>> {
        self.state
            .lock()
            .live
            .as_ref()
            .map(|live| Arc::clone(&live.connection))
    }
}

/// Handle to one subscription, returned by [`Listener::subscribe`](crate::Listener::subscribe).
///
/// Cloning gives another handle to the same subscription.
#[derive(Clone)]
pub struct Subscription {
    shared: Arc<Shared>,
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriptionId,
        channels: Vec<String>,
        mut events: ListenEvents,
        driver: Arc<dyn Driver>,
        statements: Statements,
        reconnect: RetryOptions<ListenError>,
        registry: Weak<Registry>,
    ) -> Self {
        let fanout = Arc::new(Fanout::new(std::mem::take(&mut events.messages)));
        let shared = Shared {
            id,
            created: Timestamp::now(),
            driver,
            statements,
            reconnect,
            events,
            fanout,
            state: Mutex::new(State {
                phase: SubscriptionState::Connecting,
                channels,
                live: None,
                connect_count: 0,
                early_loss: None,
            }),
            ops: Mutex::new(()),
            generation: AtomicU64::new(0),
            registry,
        };
        Self {
            shared: Arc::new(shared),
        }
    }

    /// Initial connect under `policy`.
    pub(crate) fn connect(&self, policy: &RetryOptions<ListenError>) -> Result<()> {
        retry_operation(policy, |status| {
            tracing::debug!(subscription = %self.shared.id, attempt = status.index, "connect attempt");
            self.shared.connect_once()
        })
    }

    /// Enter `registry` unless the subscription already ended.
    pub(crate) fn register(&self, registry: &Registry) {
        let state = self.shared.state.lock();
        if !state.phase.is_terminal() {
            registry.insert(self.clone());
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.shared.id
    }

    pub fn created(&self) -> Timestamp {
        self.shared.created
    }

    pub fn state(&self) -> SubscriptionState {
        self.shared.state.lock().phase
    }

    /// True while a connection is held.
    pub fn is_connected(&self) -> bool {
        self.shared.state.lock().live.is_some()
    }

    /// True until the subscription is cancelled or reconnecting gives up.
    /// Stays true while a reconnect is in progress.
    pub fn is_live(&self) -> bool {
        !self.state().is_terminal()
    }

    /// Number of successful connects so far, the initial one included.
    pub fn connect_count(&self) -> u32 {
        self.shared.state.lock().connect_count
    }

    /// Tracked channels.
    pub fn channels(&self) -> Vec<String> {
        self.shared.state.lock().channels.clone()
    }

    /// Start listening on the channels not tracked yet and return those.
    ///
    /// While disconnected the channels are only tracked; the next reconnect
    /// subscribes to them.
    pub fn add<S: AsRef<str>>(&self, channels: &[S]) -> Result<Vec<String>> {
        let requested = unique_channels(channels)?;
        let shared = &self.shared;
        let _ops = shared.ops.lock();

        let (fresh, connection) = {
            let state = shared.state.lock();
            let fresh: Vec<String> = requested
                .into_iter()
                .filter(|c| !state.channels.contains(c))
                .collect();
            (fresh, state.live.as_ref().map(|l| Arc::clone(&l.connection)))
        };
        if fresh.is_empty() {
            return Ok(fresh);
        }

        if let Some(connection) = connection {
            connection
                .execute_batch(&shared.statements.listen(&fresh))
                .map_err(ListenError::Statement)?;
        }
        shared.state.lock().channels.extend(fresh.iter().cloned());
        tracing::debug!(subscription = %shared.id, channels = ?fresh, "channels added");
        Ok(fresh)
    }

    /// Stop listening on the tracked channels among `channels` and return
    /// those. The connection stays open even when no channel is left.
    pub fn remove<S: AsRef<str>>(&self, channels: &[S]) -> Result<Vec<String>> {
        let requested = unique_channels(channels)?;
        let shared = &self.shared;
        let _ops = shared.ops.lock();

        let (gone, connection) = {
            let state = shared.state.lock();
            let gone: Vec<String> = requested
                .into_iter()
                .filter(|c| state.channels.contains(c))
                .collect();
            (gone, state.live.as_ref().map(|l| Arc::clone(&l.connection)))
        };
        if gone.is_empty() {
            return Ok(gone);
        }

        if let Some(connection) = connection {
            connection
                .execute_batch(&shared.statements.unlisten(&gone))
                .map_err(ListenError::Statement)?;
        }
        shared.state.lock().channels.retain(|c| !gone.contains(c));
        tracing::debug!(subscription = %shared.id, channels = ?gone, "channels removed");
        Ok(gone)
    }

    /// End the subscription and release its connection.
    ///
    /// With `unlisten_all`, every tracked channel is unlistened first. Returns
    /// true the first time, false once the subscription already ended.
    ///
    /// A subscription in the middle of reconnecting is live too: cancelling it
    /// returns true and the pending reconnect gives up without connecting.
    /// [`Listener::cancel_all_subscriptions`](crate::Listener::cancel_all_subscriptions)
    /// counts such subscriptions as well.
    pub fn cancel(&self, unlisten_all: bool) -> bool {
        let shared = &self.shared;
        let _ops = shared.ops.lock();

        let (live, channels) = {
            let mut state = shared.state.lock();
            if state.phase.is_terminal() {
                return false;
            }
            state.phase = SubscriptionState::Closed;
            (state.live.take(), state.channels.clone())
        };
        shared.fanout.close();

        if let Some(live) = live {
            live.connection.unregister_sink();
            if unlisten_all && !channels.is_empty() {
                if let Err(e) = live
                    .connection
                    .execute_batch(&shared.statements.unlisten(&channels))
                {
                    tracing::warn!(subscription = %shared.id, error = %e, "unlisten failed during cancel");
                }
            }
            live.connection.release();
        }

        if let Some(registry) = shared.registry.upgrade() {
            registry.remove(shared.id);
        }
        tracing::info!(subscription = %shared.id, "cancelled");
        true
    }

    /// Publish `payload` on each channel. Returns false without doing anything
    /// when `channels` is empty or no connection is held.
    pub fn notify<S: AsRef<str>>(&self, channels: &[S], payload: Option<&str>) -> Result<bool> {
        if channels.is_empty() {
            return Ok(false);
        }
        let channels = channels
            .iter()
            .map(|c| {
                let c = c.as_ref();
                validate_channel(c).map(|_| c.to_string())
            })
            .collect::<Result<Vec<_>>>()?;

        let Some(connection) = self.shared.connection() else {
            return Ok(false);
        };
        let statements = self.shared.statements.notify(&channels, payload.unwrap_or(""));
        connection
            .execute_batch(&statements)
            .map_err(ListenError::Statement)?;
        Ok(true)
    }

    /// Publish a serializable value. Strings go out verbatim, `null` as an
    /// empty payload, anything else as JSON text.
    pub fn notify_json<S, T>(&self, channels: &[S], value: &T) -> Result<bool>
    where
        S: AsRef<str>,
        T: Serialize + ?Sized,
    {
        let payload = match serde_json::to_value(value)? {
            serde_json::Value::Null => String::new(),
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        self.notify(channels, Some(&payload))
    }

    /// New pull consumer of notifications arriving from now on.
    pub fn stream(&self) -> NotificationStream {
        let stream = self.shared.fanout.stream();
        tracing::debug!(
            subscription = %self.shared.id,
            streams = self.shared.fanout.stream_count(),
            "stream created"
        );
        stream
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Subscription")
            .field("id", &self.shared.id)
            .field("state", &state.phase)
            .field("channels", &state.channels)
            .field("connect_count", &state.connect_count)
            .finish()
    }
}
