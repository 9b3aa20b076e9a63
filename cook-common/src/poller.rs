//! Bounded condition polling.
//!
//! [`wait_until`] is the one retry mechanism in the harness: it re-runs a
//! query until a predicate accepts the response or the time budget runs out.
//! Every `wait_for_*` helper is a query/predicate pair handed to it.
//!
//! Queries are retried on transport errors only. Status and decode errors
//! abort the wait immediately. Mutations never go through here.

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::HarnessConfig;
use crate::errors::{CookError, Result};
use crate::transport::Transport;

const MAX_RENDERED_OBSERVATION: usize = 4096;

/// Time budget and cadence for one wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    max_wait: Duration,
    interval: Duration,
}

impl PollBudget {
    /// Both durations must be non-zero.
    pub fn new(max_wait: Duration, interval: Duration) -> Result<Self> {
        if max_wait.is_zero() {
            return Err(CookError::InvalidArgument(
                "poll max_wait must be greater than zero".to_string(),
            ));
        }
        if interval.is_zero() {
            return Err(CookError::InvalidArgument(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        Ok(Self { max_wait, interval })
    }

    /// Default budget from the harness configuration.
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            max_wait: config.default_timeout.max(Duration::from_millis(1)),
            interval: config.wait_interval.max(Duration::from_millis(1)),
        }
    }

    /// Budget for waiting on the scheduler to accept connections.
    pub fn connectivity(config: &HarnessConfig) -> Self {
        Self {
            max_wait: config.connect_timeout.max(Duration::from_millis(1)),
            interval: Duration::from_secs(1),
        }
    }

    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    #[must_use]
    pub fn with_max_wait(self, max_wait: Duration) -> Self {
        Self {
            max_wait: max_wait.max(Duration::from_millis(1)),
            ..self
        }
    }

    #[must_use]
    pub fn with_interval(self, interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            ..self
        }
    }
}

/// What the last attempt of a timed-out wait saw.
#[derive(Debug, Clone, PartialEq)]
pub enum LastObserved<T> {
    /// The query succeeded but the predicate rejected this value.
    Response(T),
    /// The query itself failed with a transport error.
    TransportFailure(String),
}

/// A wait that exhausted its budget.
#[derive(Debug, Clone)]
pub struct ConditionTimeout<T> {
    pub attempts: u32,
    pub elapsed: Duration,
    pub last: LastObserved<T>,
}

impl<T> ConditionTimeout<T> {
    /// The last response the predicate rejected, if the last query succeeded.
    pub fn into_last_response(self) -> Option<T> {
        match self.last {
            LastObserved::Response(value) => Some(value),
            LastObserved::TransportFailure(_) => None,
        }
    }
}

impl<T: fmt::Debug> ConditionTimeout<T> {
    fn render_last(&self) -> String {
        let mut rendered = match &self.last {
            LastObserved::Response(value) => format!("{value:?}"),
            LastObserved::TransportFailure(err) => format!("transport failure: {err}"),
        };
        if rendered.len() > MAX_RENDERED_OBSERVATION {
            let mut cut = MAX_RENDERED_OBSERVATION;
            while !rendered.is_char_boundary(cut) {
                cut -= 1;
            }
            rendered.truncate(cut);
            rendered.push_str("...");
        }
        rendered
    }
}

impl<T: fmt::Debug> fmt::Display for ConditionTimeout<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "condition not met after {} attempts in {}ms; last observed: {}",
            self.attempts,
            self.elapsed.as_millis(),
            self.render_last()
        )
    }
}

/// Failure of [`wait_until`].
#[derive(Debug)]
pub enum WaitError<T> {
    Timeout(ConditionTimeout<T>),
    /// A non-retryable error from the query (or an invalid budget).
    Query(CookError),
}

impl<T> WaitError<T> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    pub fn timeout(self) -> Option<ConditionTimeout<T>> {
        match self {
            Self::Timeout(timeout) => Some(timeout),
            Self::Query(_) => None,
        }
    }
}

impl<T> From<CookError> for WaitError<T> {
    fn from(err: CookError) -> Self {
        Self::Query(err)
    }
}

impl<T: fmt::Debug> fmt::Display for WaitError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout(timeout) => timeout.fmt(f),
            Self::Query(err) => err.fmt(f),
        }
    }
}

impl<T: fmt::Debug> std::error::Error for WaitError<T> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Timeout(_) => None,
            Self::Query(err) => Some(err),
        }
    }
}

impl<T: fmt::Debug> From<WaitError<T>> for CookError {
    fn from(err: WaitError<T>) -> Self {
        match err {
            WaitError::Timeout(timeout) => CookError::ConditionTimeout {
                attempts: timeout.attempts,
                elapsed_ms: timeout.elapsed.as_millis() as u64,
                last_observed: timeout.render_last(),
            },
            WaitError::Query(err) => err,
        }
    }
}

fn poll<T, Q, P>(
    budget: PollBudget,
    mut query: Q,
    predicate: P,
    retry_on: fn(&CookError) -> bool,
) -> std::result::Result<T, WaitError<T>>
where
    Q: FnMut() -> Result<T>,
    P: Fn(&T) -> bool,
{
    let start = Instant::now();
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        let last = match query() {
            Ok(response) if predicate(&response) => {
                info!(
                    attempts,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "wait_until condition satisfied"
                );
                return Ok(response);
            }
            Ok(response) => {
                debug!(attempts, "wait_until condition not yet met, retrying");
                LastObserved::Response(response)
            }
            Err(err) if retry_on(&err) => {
                debug!(attempts, error = %err, "wait_until query failed, retrying");
                LastObserved::TransportFailure(err.to_string())
            }
            Err(err) => {
                warn!(attempts, error = %err, "wait_until query failed (non-retryable)");
                return Err(WaitError::Query(err));
            }
        };

        let elapsed = start.elapsed();
        if elapsed >= budget.max_wait {
            warn!(
                attempts,
                elapsed_ms = elapsed.as_millis() as u64,
                max_wait_ms = budget.max_wait.as_millis() as u64,
                "Timeout exceeded waiting for condition"
            );
            return Err(WaitError::Timeout(ConditionTimeout {
                attempts,
                elapsed,
                last,
            }));
        }
        thread::sleep(budget.interval);
    }
}

/// Block until `predicate` accepts the result of `query`.
///
/// `query` runs at least once; between attempts the thread sleeps
/// `interval`. Transport errors count as "not yet". Once `max_wait` has
/// elapsed the wait fails with [`WaitError::Timeout`] holding the last
/// observation.
pub fn wait_until<T, Q, P>(
    query: Q,
    predicate: P,
    max_wait: Duration,
    interval: Duration,
) -> std::result::Result<T, WaitError<T>>
where
    Q: FnMut() -> Result<T>,
    P: Fn(&T) -> bool,
{
    let budget = PollBudget::new(max_wait, interval)?;
    poll(budget, query, predicate, CookError::is_transient)
}

/// [`wait_until`] with a prepared budget.
pub fn poll_until<T, Q, P>(
    budget: PollBudget,
    query: Q,
    predicate: P,
) -> std::result::Result<T, WaitError<T>>
where
    Q: FnMut() -> Result<T>,
    P: Fn(&T) -> bool,
{
    poll(budget, query, predicate, CookError::is_transient)
}

/// Re-run `probe` while it fails with a connection-level error.
///
/// Any other error propagates on the attempt that produced it.
pub fn wait_for_connectivity<F>(
    budget: PollBudget,
    probe: F,
) -> std::result::Result<(), WaitError<()>>
where
    F: FnMut() -> Result<()>,
{
    poll(budget, probe, |_| true, CookError::is_connectivity)
}

/// Wait until the scheduler root answers any HTTP request.
pub fn wait_for_scheduler(transport: &Transport, budget: PollBudget) -> Result<()> {
    debug!(url = %transport.base_url(), "Waiting for connection to scheduler");
    wait_for_connectivity(budget, || transport.get_anonymous("").map(|_| ()))?;
    info!(url = %transport.base_url(), "Scheduler is reachable");
    Ok(())
}
