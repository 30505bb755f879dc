//! Retrying fallible operations.
//!
//! [`retry_operation`] runs an operation until it succeeds or the
//! [`RetryOptions`] say to stop. There is no implicit policy: every caller
//! states how many attempts it wants and how long to wait in between.

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// What an operation or a policy callback knows about the current attempt.
pub struct RetryStatus<'a, E, D = ()> {
    /// Attempt index, starting from 0.
    pub index: u32,
    /// Time since the first attempt started.
    pub duration: Duration,
    /// Last error. `None` only on the first attempt.
    pub error: Option<&'a E>,
    /// Caller data from [`RetryOptions::data`].
    pub data: Option<&'a D>,
}

/// Callback evaluated against a [`RetryStatus`].
pub type RetryHook<T, E, D> = Arc<dyn Fn(&RetryStatus<'_, E, D>) -> T + Send + Sync>;

/// Whether another attempt is allowed.
pub enum Retry<E, D = ()> {
    /// At most this many retries after the first attempt.
    Limit(u32),
    /// Retry as long as the predicate holds.
    While(RetryHook<bool, E, D>),
}

/// Pause before the next attempt.
pub enum Delay<E, D = ()> {
    /// Same pause every time. Zero means retry immediately.
    Fixed(Duration),
    /// Pause computed from the status of the failed attempt.
    Schedule(RetryHook<Duration, E, D>),
}

/// Retry policy.
pub struct RetryOptions<E, D = ()> {
    pub retry: Retry<E, D>,
    pub delay: Delay<E, D>,
    /// Observes every failure, before the retry decision.
    pub on_error: Option<RetryHook<(), E, D>>,
    pub data: Option<D>,
}

impl<E, D> RetryOptions<E, D> {
    /// Retry up to `retries` times without pausing.
    pub fn limit(retries: u32) -> Self {
        Self {
            retry: Retry::Limit(retries),
            delay: Delay::Fixed(Duration::ZERO),
            on_error: None,
            data: None,
        }
    }

    /// Retry while `predicate` returns true, without pausing.
    pub fn retry_while<P>(predicate: P) -> Self
    where
        P: Fn(&RetryStatus<'_, E, D>) -> bool + Send + Sync + 'static,
    {
        Self {
            retry: Retry::While(Arc::new(predicate)),
            delay: Delay::Fixed(Duration::ZERO),
            on_error: None,
            data: None,
        }
    }

    /// Pause `delay` between attempts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Delay::Fixed(delay);
        self
    }

    /// Compute the pause from the failed attempt's status.
    pub fn with_schedule<S>(mut self, schedule: S) -> Self
    where
        S: Fn(&RetryStatus<'_, E, D>) -> Duration + Send + Sync + 'static,
    {
        self.delay = Delay::Schedule(Arc::new(schedule));
        self
    }

    pub fn on_error<H>(mut self, hook: H) -> Self
    where
        H: Fn(&RetryStatus<'_, E, D>) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }

    pub fn with_data(mut self, data: D) -> Self {
        self.data = Some(data);
        self
    }
}

impl<E: 'static, D: 'static> RetryOptions<E, D> {
    /// Up to `retries` retries, pausing `base_ms^(index + 1)` milliseconds.
    ///
    /// `exponential(5, 5)` waits 5, 25, 125, 625 and 3125 ms.
    pub fn exponential(retries: u32, base_ms: u64) -> Self {
        Self::limit(retries).with_schedule(move |s| {
            let ms = base_ms.saturating_pow(s.index.saturating_add(1));
            Duration::from_millis(ms)
        })
    }
}

impl<E, D: Clone> Clone for RetryOptions<E, D> {
    fn clone(&self) -> Self {
        Self {
            retry: match &self.retry {
                Retry::Limit(n) => Retry::Limit(*n),
                Retry::While(p) => Retry::While(Arc::clone(p)),
            },
            delay: match &self.delay {
                Delay::Fixed(d) => Delay::Fixed(*d),
                Delay::Schedule(s) => Delay::Schedule(Arc::clone(s)),
            },
            on_error: self.on_error.clone(),
            data: self.data.clone(),
        }
    }
}

impl<E, D: fmt::Debug> fmt::Debug for RetryOptions<E, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let retry = match &self.retry {
            Retry::Limit(n) => format!("Limit({})", n),
            Retry::While(_) => "While(..)".to_string(),
        };
        let delay = match &self.delay {
            Delay::Fixed(d) => format!("Fixed({:?})", d),
            Delay::Schedule(_) => "Schedule(..)".to_string(),
        };
        f.debug_struct("RetryOptions")
            .field("retry", &retry)
            .field("delay", &delay)
            .field("on_error", &self.on_error.is_some())
            .field("data", &self.data)
            .finish()
    }
}

/// Run `operation` until it succeeds or `options` stop the retries.
///
/// Returns the first success, or the error of the last attempt.
pub fn retry_operation<T, E, D, F>(options: &RetryOptions<E, D>, mut operation: F) -> Result<T, E>
where
    F: FnMut(&RetryStatus<'_, E, D>) -> Result<T, E>,
{
    let start = Instant::now();
    let data = options.data.as_ref();
    let mut remaining = match options.retry {
        Retry::Limit(n) => n,
        Retry::While(_) => 0,
    };
    let mut index = 0;
    let mut last_error: Option<E> = None;

    loop {
        let status = RetryStatus {
            index,
            duration: start.elapsed(),
            error: last_error.as_ref(),
            data,
        };
        let error = match operation(&status) {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let status = RetryStatus {
            index,
            duration: start.elapsed(),
            error: Some(&error),
            data,
        };
        if let Some(hook) = &options.on_error {
            hook(&status);
        }

        let again = match &options.retry {
            Retry::Limit(_) if remaining == 0 => false,
            Retry::Limit(_) => {
                remaining -= 1;
                true
            }
            Retry::While(predicate) => predicate(&status),
        };
        if !again {
            return Err(error);
        }

        let delay = match &options.delay {
            Delay::Fixed(d) => *d,
            Delay::Schedule(schedule) => schedule(&status),
        };
        tracing::debug!(attempt = index, delay_ms = delay.as_millis() as u64, "retrying");

        index += 1;
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        last_error = Some(error);
    }
}
