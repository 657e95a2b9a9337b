//! Background query execution.
//!
//! `QueryExecutor` owns a connector and runs submitted statements on a
//! dedicated worker thread so the interactive loop never blocks on SQLite.
//! Results come back as `QueryEvent`s over a channel.
//!
//! Only one query may be in flight at a time. A second submission while one
//! is running is rejected with `DbPeekError::Busy`; nothing is queued.

use crate::core::db::{Connector, Interrupt, QueryResult};
use crate::core::{DbPeekError, Result};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Identifies one submitted query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryTicket(Uuid);

impl fmt::Display for QueryTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of a submitted query, delivered on the executor's channel
#[derive(Debug)]
pub enum QueryEvent {
    Completed {
        ticket: QueryTicket,
        sql: String,
        result: QueryResult,
    },
    Failed {
        ticket: QueryTicket,
        sql: String,
        error: DbPeekError,
        elapsed: Duration,
    },
    Cancelled {
        ticket: QueryTicket,
        sql: String,
    },
}

impl QueryEvent {
    pub fn ticket(&self) -> QueryTicket {
        match self {
            QueryEvent::Completed { ticket, .. }
            | QueryEvent::Failed { ticket, .. }
            | QueryEvent::Cancelled { ticket, .. } => *ticket,
        }
    }

    pub fn sql(&self) -> &str {
        match self {
            QueryEvent::Completed { sql, .. }
            | QueryEvent::Failed { sql, .. }
            | QueryEvent::Cancelled { sql, .. } => sql,
        }
    }
}

/// Bookkeeping for the query currently running
struct InFlight {
    ticket: QueryTicket,
    cancelled: Arc<AtomicBool>,
    interrupter: Option<Arc<dyn Interrupt>>,
}

type SharedConnector = Arc<Mutex<Box<dyn Connector>>>;

/// Runs queries against one connector off the calling thread
pub struct QueryExecutor {
    connector: SharedConnector,
    in_flight: Arc<Mutex<Option<InFlight>>>,
    events_tx: Sender<QueryEvent>,
    events_rx: Receiver<QueryEvent>,
    default_timeout: Duration,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking worker leaves no partially updated state behind
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl QueryExecutor {
    /// Wraps `connector`; queries submitted without a timeout use `default_timeout`
    pub fn new(connector: Box<dyn Connector>, default_timeout: Duration) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        QueryExecutor {
            connector: Arc::new(Mutex::new(connector)),
            in_flight: Arc::new(Mutex::new(None)),
            events_tx,
            events_rx,
            default_timeout,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn set_default_timeout(&mut self, timeout: Duration) {
        self.default_timeout = timeout;
    }

    /// Whether a query is currently running
    pub fn is_busy(&self) -> bool {
        lock(&self.in_flight).is_some()
    }

    /// Submits `sql` with the default timeout
    pub fn submit(&self, sql: &str) -> Result<QueryTicket> {
        self.submit_with_timeout(sql, self.default_timeout)
    }

    /// Starts `sql` on a new worker thread.
    ///
    /// # Errors
    ///
    /// `DbPeekError::Busy` if a query is already running, `DbPeekError::Io`
    /// if the worker thread cannot be spawned.
    pub fn submit_with_timeout(&self, sql: &str, timeout: Duration) -> Result<QueryTicket> {
        let mut in_flight = lock(&self.in_flight);
        if let Some(running) = in_flight.as_ref() {
            return Err(DbPeekError::Busy(format!(
                "query {} is still running",
                running.ticket
            )));
        }

        let interrupter = match self.connector.try_lock() {
            Ok(connector) => connector.interrupter(),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().interrupter(),
            Err(TryLockError::WouldBlock) => {
                return Err(DbPeekError::Busy("connection is in use".to_string()))
            }
        };

        let ticket = QueryTicket(Uuid::new_v4());
        let cancelled = Arc::new(AtomicBool::new(false));

        let connector = Arc::clone(&self.connector);
        let slot = Arc::clone(&self.in_flight);
        let events = self.events_tx.clone();
        let flag = Arc::clone(&cancelled);
        let sql = sql.to_string();

        thread::Builder::new()
            .name("query-worker".to_string())
            .spawn(move || run_query(connector, slot, events, flag, ticket, sql, timeout))?;

        *in_flight = Some(InFlight {
            ticket,
            cancelled,
            interrupter,
        });
        debug!(%ticket, timeout_ms = timeout.as_millis() as u64, "query submitted");
        Ok(ticket)
    }

    /// Requests cancellation of the running query.
    ///
    /// The statement is interrupted when the engine supports it; otherwise
    /// it runs to completion and its result is discarded. Either way the
    /// query ends with `QueryEvent::Cancelled`. Returns false if nothing was
    /// running.
    pub fn cancel(&self) -> bool {
        let in_flight = lock(&self.in_flight);
        match in_flight.as_ref() {
            Some(running) => {
                running.cancelled.store(true, Ordering::SeqCst);
                match &running.interrupter {
                    Some(interrupter) => interrupter.interrupt(),
                    None => debug!(ticket = %running.ticket, "no interrupter; result will be discarded"),
                }
                info!(ticket = %running.ticket, "query cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Returns the next finished query without blocking
    pub fn try_next_event(&self) -> Option<QueryEvent> {
        match self.events_rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Blocks until a query finishes
    pub fn next_event(&self) -> Option<QueryEvent> {
        self.events_rx.recv().ok()
    }

    /// Blocks until a query finishes or `timeout` passes
    pub fn next_event_timeout(&self, timeout: Duration) -> Option<QueryEvent> {
        match self.events_rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Runs `f` on the connector from the calling thread.
    ///
    /// Fails with `DbPeekError::Busy` instead of waiting while a query holds
    /// the connection.
    pub fn with_connector<R>(&self, f: impl FnOnce(&mut dyn Connector) -> Result<R>) -> Result<R> {
        if self.is_busy() {
            return Err(DbPeekError::Busy("a query is running".to_string()));
        }
        let mut connector = match self.connector.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                return Err(DbPeekError::Busy("connection is in use".to_string()))
            }
        };
        f(&mut **connector)
    }
}

impl Drop for QueryExecutor {
    fn drop(&mut self) {
        if self.cancel() {
            warn!("executor dropped with a query in flight");
        }
    }
}

/// Worker body: runs one query while holding the connector
fn run_query(
    connector: SharedConnector,
    slot: Arc<Mutex<Option<InFlight>>>,
    events: Sender<QueryEvent>,
    cancelled: Arc<AtomicBool>,
    ticket: QueryTicket,
    sql: String,
    timeout: Duration,
) {
    let started = Instant::now();
    let outcome = {
        let mut connector = lock(&connector);
        // A panic must still release the slot and report the query.
        panic::catch_unwind(AssertUnwindSafe(|| connector.execute_query(&sql, timeout))).unwrap_or_else(|_| {
            warn!(%ticket, "query worker panicked");
            Err(DbPeekError::Query("query worker panicked".to_string()))
        })
    };
    let elapsed = started.elapsed();
    // The executor may be dropped right after the event arrives and must
    // then hold the last reference to the connector.
    drop(connector);

    // Release the slot before reporting so the receiver can submit again
    // as soon as it sees the event.
    lock(&slot).take();

    let event = if cancelled.load(Ordering::SeqCst) {
        info!(%ticket, elapsed_ms = elapsed.as_millis() as u64, "query cancelled");
        QueryEvent::Cancelled { ticket, sql }
    } else {
        match outcome {
            Ok(result) => {
                debug!(%ticket, rows = result.row_count, elapsed_ms = elapsed.as_millis() as u64, "query completed");
                QueryEvent::Completed { ticket, sql, result }
            }
            Err(error) => {
                debug!(%ticket, error = %error, "query failed");
                QueryEvent::Failed {
                    ticket,
                    sql,
                    error,
                    elapsed,
                }
            }
        }
    };

    if events.send(event).is_err() {
        debug!(%ticket, "executor gone; dropping query event");
    }
}
