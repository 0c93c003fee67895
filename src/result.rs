//! The streaming result object (spec.md §4.5): turns row-append
//! notifications, an optional terminal error, and a completion signal into
//! a bounded, back-pressured row stream plus late-arriving metadata.
//!
//! Row notifications are forwarded through an unbounded channel into a
//! dedicated pump task, which is the only thing that blocks on the bounded
//! row queue. This keeps a slow consumer from stalling the shared inbound
//! dispatch loop (spec.md §5, §9 "Notification dispatch on the inbound
//! task").

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{mpsc, Notify};
use tracing::instrument;

use crate::error::{RemoteError, ResultError};
use crate::options::ConnectOptions;
use crate::remote_object::{ClosedSignal, FrameSink, HandleCore, NotificationHandler};
use crate::slot::SingleShotSlot;
use crate::value::Value;

pub const TYPE_NAME: &str = "com.univedo.result";

enum RowEvent {
    Row(Vec<Value>),
    Complete,
    Error(String),
}

#[derive(Default)]
struct ResultState {
    error: Mutex<Option<String>>,
    error_notify: Notify,
    last_inserted_id: SingleShotSlot<u64>,
    rows_affected: SingleShotSlot<u64>,
}

pub struct ResultObject {
    core: Arc<HandleCore>,
    closed: ClosedSignal,
    state: Arc<ResultState>,
    rows_rx: tokio::sync::Mutex<mpsc::Receiver<Vec<Value>>>,
}

impl ResultObject {
    pub fn id(&self) -> u64 {
        self.core.id
    }

    /// Consumes from the row queue or the error slot, whichever becomes
    /// available first. `Ok(None)` is end-of-stream. An already-populated
    /// error wins even if rows remain queued.
    #[instrument(skip(self), fields(object_id = self.core.id))]
    pub async fn next_row(&self) -> Result<Option<Vec<Value>>, ResultError> {
        let mut rx = self.rows_rx.lock().await;
        loop {
            if let Some(msg) = self.state.error.lock().unwrap().clone() {
                return Err(ResultError::Remote(RemoteError(msg)));
            }

            let err_notified = self.state.error_notify.notified();
            let closed_notified = self.closed.notified();
            if let Some(msg) = self.state.error.lock().unwrap().clone() {
                return Err(ResultError::Remote(RemoteError(msg)));
            }

            tokio::select! {
                biased;
                _ = err_notified => continue,
                row = rx.recv() => {
                    return match row {
                        Some(row) => Ok(Some(row)),
                        None if self.closed.is_closed() => Err(ResultError::ConnectionClosed),
                        None => Ok(None),
                    };
                }
                _ = closed_notified => continue,
            }
        }
    }

    pub async fn last_inserted_id(&self) -> Result<u64, ResultError> {
        tokio::select! {
            biased;
            err = self.wait_for_error() => Err(err),
            result = self.state.last_inserted_id.read_once(&self.closed) => result,
        }
    }

    pub async fn rows_affected(&self) -> Result<u64, ResultError> {
        tokio::select! {
            biased;
            err = self.wait_for_error() => Err(err),
            result = self.state.rows_affected.read_once(&self.closed) => result,
        }
    }

    async fn wait_for_error(&self) -> ResultError {
        loop {
            if let Some(msg) = self.state.error.lock().unwrap().clone() {
                return ResultError::Remote(RemoteError(msg));
            }
            let notified = self.state.error_notify.notified();
            if let Some(msg) = self.state.error.lock().unwrap().clone() {
                return ResultError::Remote(RemoteError(msg));
            }
            notified.await;
        }
    }
}

async fn pump(
    mut events: mpsc::UnboundedReceiver<RowEvent>,
    rows: mpsc::Sender<Vec<Value>>,
    state: Arc<ResultState>,
    closed: ClosedSignal,
) {
    loop {
        if closed.is_closed() {
            break;
        }
        tokio::select! {
            biased;
            _ = closed.notified() => break,
            event = events.recv() => match event {
                None => break,
                Some(RowEvent::Row(row)) => {
                    if rows.send(row).await.is_err() {
                        break;
                    }
                }
                Some(RowEvent::Complete) => break,
                Some(RowEvent::Error(msg)) => {
                    let mut guard = state.error.lock().unwrap();
                    if guard.is_none() {
                        *guard = Some(msg);
                    }
                    drop(guard);
                    state.error_notify.notify_waiters();
                    break;
                }
            },
        }
    }
    // dropping `rows` here closes the bounded channel: `next_row` sees end-of-stream.
}

fn parse_row(args: Vec<Value>) -> Vec<Value> {
    args.into_iter().next().and_then(Value::into_array).unwrap_or_default()
}

fn parse_message(args: Vec<Value>) -> String {
    args.into_iter().next().and_then(Value::into_text).unwrap_or_default()
}

fn parse_uint(args: Vec<Value>) -> u64 {
    args.into_iter().next().and_then(|v| v.as_uint()).unwrap_or_default()
}

pub(crate) fn factory(
    id: u64,
    sink: Weak<dyn FrameSink>,
    opts: &ConnectOptions,
) -> (Arc<HandleCore>, Arc<dyn Any + Send + Sync>) {
    let closed = sink
        .upgrade()
        .map(|s| s.closed_signal())
        .unwrap_or_else(ClosedSignal::new);
    let state = Arc::new(ResultState::default());
    let (events_tx, events_rx) = mpsc::unbounded_channel::<RowEvent>();
    let (rows_tx, rows_rx) = mpsc::channel::<Vec<Value>>(opts.row_queue_capacity);

    tokio::spawn(pump(events_rx, rows_tx, state.clone(), closed.clone()));

    let mut handlers: HashMap<String, NotificationHandler> = HashMap::new();

    for name in ["appendRow", "setTuple"] {
        let tx = events_tx.clone();
        handlers.insert(
            name.to_string(),
            Box::new(move |args: Vec<Value>| {
                let _ = tx.send(RowEvent::Row(parse_row(args)));
            }) as NotificationHandler,
        );
    }

    {
        let tx = events_tx.clone();
        handlers.insert(
            "setComplete".to_string(),
            Box::new(move |_args: Vec<Value>| {
                let _ = tx.send(RowEvent::Complete);
            }),
        );
    }

    {
        let tx = events_tx.clone();
        handlers.insert(
            "setError".to_string(),
            Box::new(move |args: Vec<Value>| {
                let _ = tx.send(RowEvent::Error(parse_message(args)));
            }),
        );
    }

    // `setId` (newer revision) implies rows_affected = 1, resolved per
    // original_source/sql.go's later behavior (spec.md §9 open question).
    for name in ["setRecord", "setId"] {
        let state = state.clone();
        handlers.insert(
            name.to_string(),
            Box::new(move |args: Vec<Value>| {
                let id = parse_uint(args);
                state.last_inserted_id.publish(id);
                state.rows_affected.publish(1);
            }) as NotificationHandler,
        );
    }

    for name in ["setAffectedRecords", "setNAffectedRecords"] {
        let state = state.clone();
        handlers.insert(
            name.to_string(),
            Box::new(move |args: Vec<Value>| {
                state.rows_affected.publish(parse_uint(args));
            }) as NotificationHandler,
        );
    }

    let core = Arc::new(HandleCore::new(id, sink, handlers));
    let result = Arc::new(ResultObject {
        core: core.clone(),
        closed,
        state,
        rows_rx: tokio::sync::Mutex::new(rows_rx),
    });
    (core, result)
}
