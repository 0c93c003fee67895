//! The basic remote-object handle: call/notify/receive plus the pending-call
//! and notification-handler tables (spec.md §4.2).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::oneshot;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tracing::{instrument, trace, warn};

use crate::error::{CallError, ProtocolError, RemoteError};
use crate::value::Value;

/// Wire opcodes. Do not renumber — these are the protocol's constants
/// (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum Opcode {
    Call = 1,
    Answer = 2,
    Notify = 3,
    Delete = 4,
}

impl Opcode {
    fn from_u64(n: u64) -> Option<Opcode> {
        match n {
            1 => Some(Opcode::Call),
            2 => Some(Opcode::Answer),
            3 => Some(Opcode::Notify),
            4 => Some(Opcode::Delete),
            _ => None,
        }
    }
}

/// What a pending call resolves to once an answer arrives (or the
/// connection tears down underneath it).
pub type CallOutcome = Result<Value, CallError>;

/// A notification handler closure, registered once at handle construction
/// and never mutated afterward (spec.md §5 "notification-handler tables are
/// populated at handle construction and immutable thereafter").
pub type NotificationHandler = Box<dyn Fn(Vec<Value>) + Send + Sync>;

/// Anything a handle needs to send a frame on its connection, without
/// owning the connection (spec.md §9 "handles hold only a non-owning
/// reference to the connection").
pub trait FrameSink: Send + Sync {
    fn send_frame(&self, values: Vec<Value>) -> Result<(), CallError>;

    /// The signal typed wrappers watch to unblock suspended reads when the
    /// connection tears down (spec.md §5, §8 "Connection teardown").
    fn closed_signal(&self) -> ClosedSignal;
}

/// A one-shot, many-waiter "the connection is gone" flag. Cheap to clone
/// and check; every typed wrapper that suspends on something other than
/// `HandleCore::call` (result rows, single-shot slots) races its wait
/// against this so teardown can't leave it blocked forever.
#[derive(Clone)]
pub struct ClosedSignal {
    notify: Arc<Notify>,
    closed: Arc<AtomicBool>,
}

impl ClosedSignal {
    pub fn new() -> Self {
        ClosedSignal {
            notify: Arc::new(Notify::new()),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn fire(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }
}

impl Default for ClosedSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// The generic remote-object handle: id, a non-owning back-reference to the
/// connection's send path, a call-id counter, a pending-call table, and an
/// immutable notification-handler table.
///
/// Every typed wrapper (`Session`, `Query`, `Statement`, `Result`, ...)
/// holds an `Arc<HandleCore>` and delegates `call`/`notify` to it.
pub struct HandleCore {
    pub id: u64,
    sink: Weak<dyn FrameSink>,
    next_call_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<CallOutcome>>>,
    notification_handlers: HashMap<String, NotificationHandler>,
}

impl HandleCore {
    pub fn new(
        id: u64,
        sink: Weak<dyn FrameSink>,
        notification_handlers: HashMap<String, NotificationHandler>,
    ) -> Self {
        HandleCore {
            id,
            sink,
            next_call_id: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
            notification_handlers,
        }
    }

    fn send(&self, values: Vec<Value>) -> Result<(), CallError> {
        let sink = self.sink.upgrade().ok_or(CallError::ConnectionClosed)?;
        sink.send_frame(values)
    }

    /// Issues a call and suspends until the matching answer arrives, the
    /// connection rejects the send, or the connection tears down.
    #[instrument(skip(self, args), fields(object_id = self.id, method))]
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, CallError> {
        let call_id = self.next_call_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(call_id, tx);

        let frame = vec![
            Value::UInt(self.id),
            Value::UInt(Opcode::Call as u64),
            Value::UInt(call_id),
            Value::Text(method.to_owned()),
            Value::Array(args),
        ];

        if let Err(err) = self.send(frame) {
            self.pending.lock().unwrap().remove(&call_id);
            return Err(err);
        }

        match rx.await {
            Ok(outcome) => outcome,
            // the sender was dropped without ever completing: teardown raced us.
            Err(_) => Err(CallError::ConnectionClosed),
        }
    }

    /// Fire-and-forget; no answer is expected or awaited.
    #[instrument(skip(self, args), fields(object_id = self.id, method))]
    pub fn notify(&self, method: &str, args: Vec<Value>) -> Result<(), CallError> {
        let frame = vec![
            Value::UInt(self.id),
            Value::UInt(Opcode::Notify as u64),
            Value::Text(method.to_owned()),
            Value::Array(args),
        ];
        self.send(frame)
    }

    /// Consumes a message body directed at this object (the object-id
    /// prefix has already been stripped by the dispatcher). Reentrant with
    /// respect to concurrent `call`s on the same handle.
    ///
    /// Returns `Ok(true)` if the payload was a `Delete`, signaling the
    /// dispatcher should drop this handle from the object table.
    pub fn receive(&self, mut payload: Vec<Value>) -> Result<bool, ProtocolError> {
        if payload.is_empty() {
            return Err(ProtocolError::EmptyMessage);
        }
        let opcode_value = payload.remove(0);
        let opcode_raw = opcode_value.as_uint().ok_or(ProtocolError::InvalidOpcode)?;
        let opcode = Opcode::from_u64(opcode_raw).ok_or(ProtocolError::UnknownOpcode(opcode_raw))?;

        match opcode {
            Opcode::Answer => {
                if payload.len() != 3 {
                    return Err(ProtocolError::InvalidAnswerArity(payload.len()));
                }
                let mut it = payload.into_iter();
                let call_id = it.next().unwrap().as_uint().ok_or(ProtocolError::InvalidCallId)?;
                let status = it.next().unwrap().as_uint().ok_or(ProtocolError::InvalidStatus(u64::MAX))?;
                let result_value = it.next().unwrap();

                let sender = self
                    .pending
                    .lock()
                    .unwrap()
                    .remove(&call_id)
                    .ok_or(ProtocolError::UnknownCallId(call_id))?;

                let outcome = match status {
                    0 => Ok(result_value),
                    2 => {
                        let msg = result_value.into_text().ok_or(ProtocolError::InvalidErrorPayload)?;
                        Err(CallError::Remote(RemoteError(msg)))
                    }
                    other => return Err(ProtocolError::InvalidStatus(other)),
                };

                // the caller may already have given up (dropped its receiver);
                // that's fine, the answer is simply discarded.
                let _ = sender.send(outcome);
                Ok(false)
            }

            Opcode::Notify => {
                if payload.len() != 2 {
                    return Err(ProtocolError::InvalidNotificationName);
                }
                let mut it = payload.into_iter();
                let name = it.next().unwrap().into_text().ok_or(ProtocolError::InvalidNotificationName)?;
                let args = it.next().unwrap().into_array().unwrap_or_default();

                match self.notification_handlers.get(&name) {
                    Some(handler) => {
                        trace!(object_id = self.id, notification = %name, "dispatching notification");
                        handler(args);
                        Ok(false)
                    }
                    None => {
                        warn!(object_id = self.id, notification = %name, "no handler registered");
                        Err(ProtocolError::UnhandledNotification { name })
                    }
                }
            }

            Opcode::Delete => Ok(true),

            Opcode::Call => {
                // the client never receives inbound Call frames in this protocol direction.
                Err(ProtocolError::UnknownOpcode(Opcode::Call as u64))
            }
        }
    }

    /// Fails every outstanding call with a transport-closed error. Called
    /// once by the connection when the inbound loop terminates.
    pub fn fail_all_pending(&self) {
        let pending: Vec<_> = self.pending.lock().unwrap().drain().collect();
        for (_, sender) in pending {
            let _ = sender.send(Err(CallError::ConnectionClosed));
        }
    }
}
