//! In-process driver.
//!
//! [`MemoryDriver`] behaves like a single database server: sessions listen
//! on channels, `NOTIFY` reaches every session listening on the channel
//! (the sender included), and the server can be told to refuse
//! connections, reject statements or drop every open session.

use crate::driver::{
    ConnectOptions, Connection, Driver, DriverError, LostCallback, NotificationSink,
};
use crate::types::{LostContext, Notification};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;

/// Errors reported by [`MemoryDriver`].
#[derive(Debug, Error)]
pub enum MemoryDriverError {
    #[error("Server unreachable")]
    Unreachable,

    #[error("Connection is closed")]
    Closed,

    #[error("Connection severed: {0}")]
    Severed(String),

    #[error("Statement rejected: {0}")]
    Rejected(String),

    #[error("Cannot parse statement: {0}")]
    Parse(String),
}

/// Process id of notifications published from outside any session.
pub const EXTERNAL_PROCESS_ID: u32 = 0;

const REFUSE_ALWAYS: u32 = u32::MAX;

struct Bus {
    sessions: Mutex<Vec<Arc<Session>>>,
    next_pid: AtomicU32,
    /// Connects still to refuse; `REFUSE_ALWAYS` refuses until reset.
    refused: AtomicU32,
    reject_statements: AtomicBool,
    connect_attempts: AtomicUsize,
    journal: Mutex<Vec<String>>,
}

impl Bus {
    fn deliver(&self, channel: &str, payload: &str, process_id: u32) -> usize {
        let sessions = self.sessions.lock().clone();
        let notification = Notification::new(channel, payload, process_id);
        let mut delivered = 0;
        for session in sessions {
            if !session.is_open() || !session.listening.lock().contains(channel) {
                continue;
            }
            let sink = session.sink.lock().clone();
            if let Some(sink) = sink {
                sink(notification.clone());
                delivered += 1;
            }
        }
        delivered
    }

    fn detach(&self, pid: u32) {
        self.sessions.lock().retain(|s| s.pid != pid);
    }
}

/// One server session.
struct Session {
    pid: u32,
    bus: Weak<Bus>,
    open: AtomicBool,
    listening: Mutex<HashSet<String>>,
    sink: Mutex<Option<NotificationSink>>,
    on_lost: Mutex<Option<LostCallback>>,
}

impl Session {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Close the session, returning its loss callback if it was open.
    fn close(&self) -> Option<LostCallback> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return None;
        }
        *self.sink.lock() = None;
        self.listening.lock().clear();
        self.on_lost.lock().take()
    }
}

impl Connection for Session {
    fn execute_batch(&self, statements: &[String]) -> Result<(), DriverError> {
        if !self.is_open() {
            return Err(MemoryDriverError::Closed.into());
        }
        let bus = self.bus.upgrade().ok_or(MemoryDriverError::Closed)?;
        if bus.reject_statements.load(Ordering::SeqCst) {
            return Err(MemoryDriverError::Rejected(statements.join("; ")).into());
        }
        let commands = statements
            .iter()
            .map(|s| parse(s))
            .collect::<Result<Vec<_>, _>>()?;
        bus.journal.lock().extend(statements.iter().cloned());

        let mut outgoing = Vec::new();
        {
            let mut listening = self.listening.lock();
            for command in commands {
                match command {
                    Command::Listen(channel) => {
                        listening.insert(channel);
                    }
                    Command::Unlisten(channel) => {
                        listening.remove(&channel);
                    }
                    Command::Notify { channel, payload } => outgoing.push((channel, payload)),
                }
            }
        }
        for (channel, payload) in outgoing {
            bus.deliver(&channel, &payload, self.pid);
        }
        Ok(())
    }

    fn register_sink(&self, sink: NotificationSink) {
        *self.sink.lock() = Some(sink);
    }

    fn unregister_sink(&self) {
        *self.sink.lock() = None;
    }

    fn release(&self) {
        // Dropping the callback: a released session is never reported lost.
        drop(self.close());
        if let Some(bus) = self.bus.upgrade() {
            bus.detach(self.pid);
        }
    }

    fn process_id(&self) -> Option<u32> {
        Some(self.pid)
    }
}

/// In-process [`Driver`].
#[derive(Clone)]
pub struct MemoryDriver {
    bus: Arc<Bus>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self {
            bus: Arc::new(Bus {
                sessions: Mutex::new(Vec::new()),
                next_pid: AtomicU32::new(1000),
                refused: AtomicU32::new(0),
                reject_statements: AtomicBool::new(false),
                connect_attempts: AtomicUsize::new(0),
                journal: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Refuse the next `count` connects.
    pub fn refuse_connections(&self, count: u32) {
        self.bus.refused.store(count, Ordering::SeqCst);
    }

    /// Refuse every connect until [`accept_connections`](Self::accept_connections).
    pub fn refuse_all_connections(&self) {
        self.bus.refused.store(REFUSE_ALWAYS, Ordering::SeqCst);
    }

    pub fn accept_connections(&self) {
        self.bus.refused.store(0, Ordering::SeqCst);
    }

    /// Make every statement batch fail.
    pub fn reject_statements(&self, reject: bool) {
        self.bus.reject_statements.store(reject, Ordering::SeqCst);
    }

    /// Publish from outside any session. Returns the number of sessions reached.
    pub fn publish(&self, channel: &str, payload: &str) -> usize {
        self.bus.deliver(channel, payload, EXTERNAL_PROCESS_ID)
    }

    /// Drop every open session, firing each loss callback once.
    pub fn sever_all(&self, reason: &str) -> usize {
        let sessions = std::mem::take(&mut *self.bus.sessions.lock());
        let mut severed = 0;
        for session in sessions {
            let Some(on_lost) = session.close() else {
                continue;
            };
            severed += 1;
            tracing::debug!(process_id = session.pid, reason, "session severed");
            on_lost(
                Box::new(MemoryDriverError::Severed(reason.to_string())),
                LostContext {
                    process_id: Some(session.pid),
                },
            );
        }
        severed
    }

    pub fn connect_attempts(&self) -> usize {
        self.bus.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn open_connections(&self) -> usize {
        self.bus
            .sessions
            .lock()
            .iter()
            .filter(|s| s.is_open())
            .count()
    }

    /// Sessions currently listening on `channel`.
    pub fn listeners(&self, channel: &str) -> usize {
        self.bus
            .sessions
            .lock()
            .iter()
            .filter(|s| s.is_open() && s.listening.lock().contains(channel))
            .count()
    }

    /// Every statement executed so far, in order.
    pub fn journal(&self) -> Vec<String> {
        self.bus.journal.lock().clone()
    }
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for MemoryDriver {
    fn connect(&self, options: ConnectOptions) -> Result<Arc<dyn Connection>, DriverError> {
        self.bus.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .bus
            .refused
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
                0 => None,
                REFUSE_ALWAYS => Some(REFUSE_ALWAYS),
                n => Some(n - 1),
            })
            .is_ok();
        if refused {
            return Err(MemoryDriverError::Unreachable.into());
        }

        let pid = self.bus.next_pid.fetch_add(1, Ordering::SeqCst);
        let session = Arc::new(Session {
            pid,
            bus: Arc::downgrade(&self.bus),
            open: AtomicBool::new(true),
            listening: Mutex::new(HashSet::new()),
            sink: Mutex::new(None),
            on_lost: Mutex::new(Some(options.on_lost)),
        });
        self.bus.sessions.lock().push(Arc::clone(&session));
        tracing::debug!(process_id = pid, direct = options.direct, "session opened");
        let connection: Arc<dyn Connection> = session;
        Ok(connection)
    }
}

#[derive(Debug, PartialEq)]
enum Command {
    Listen(String),
    Unlisten(String),
    Notify { channel: String, payload: String },
}

fn parse(statement: &str) -> Result<Command, MemoryDriverError> {
    let invalid = || MemoryDriverError::Parse(statement.to_string());
    let text = statement.trim().trim_end_matches(';').trim_end();
    let (keyword, rest) = text.split_once(char::is_whitespace).ok_or_else(invalid)?;
    let (channel, rest) = parse_identifier(rest.trim_start()).ok_or_else(invalid)?;
    let rest = rest.trim();

    match keyword.to_ascii_uppercase().as_str() {
        "LISTEN" if rest.is_empty() => Ok(Command::Listen(channel)),
        "UNLISTEN" if rest.is_empty() => Ok(Command::Unlisten(channel)),
        "NOTIFY" => {
            let payload = if rest.is_empty() {
                String::new()
            } else {
                let literal = rest.strip_prefix(',').ok_or_else(invalid)?.trim_start();
                let (payload, tail) = parse_quoted(literal, '\'').ok_or_else(invalid)?;
                if !tail.trim().is_empty() {
                    return Err(invalid());
                }
                payload
            };
            Ok(Command::Notify { channel, payload })
        }
        _ => Err(invalid()),
    }
}

/// Unquoted identifiers fold to lower case, quoted ones are kept as written.
fn parse_identifier(s: &str) -> Option<(String, &str)> {
    if s.starts_with('"') {
        return parse_quoted(s, '"');
    }
    let end = s
        .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$'))
        .unwrap_or(s.len());
    if end == 0 {
        return None;
    }
    Some((s[..end].to_lowercase(), &s[end..]))
}

/// Token enclosed in `quote`, where a doubled quote stands for itself.
fn parse_quoted(s: &str, quote: char) -> Option<(String, &str)> {
    let body = s.strip_prefix(quote)?;
    let mut out = String::new();
    let mut chars = body.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c != quote {
            out.push(c);
        } else if matches!(chars.peek(), Some(&(_, next)) if next == quote) {
            chars.next();
            out.push(quote);
        } else {
            return Some((out, &body[i + c.len_utf8()..]));
        }
    }
    None
}
