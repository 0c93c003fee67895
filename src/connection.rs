//! The dispatcher / connection (spec.md §4.3): owns the transport, the
//! object table, the inbound demultiplex loop, and the outbound send path.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

use tokio::sync::mpsc;
use tracing::{debug, error, instrument, warn};

use crate::codec::{decode_all, encode_all, Materialize};
use crate::error::{CallError, ClientError, ProtocolError};
use crate::options::ConnectOptions;
use crate::perspective::Perspective;
use crate::registry;
use crate::remote_object::{ClosedSignal, FrameSink, HandleCore};
use crate::session::Session;
use crate::transport::{Transport, TransportWriter};
use crate::value::{RemoteObjectRef, Value};

/// The id of the server's login object, valid immediately after transport
/// establishment with no client-side handshake (spec.md §4.3 "Login").
const LOGIN_OBJECT_ID: u64 = 0;

pub struct ConnectionInner {
    objects: RwLock<HashMap<u64, (Arc<HandleCore>, Arc<dyn Any + Send + Sync>)>>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    closed: ClosedSignal,
    self_weak: Weak<ConnectionInner>,
    options: ConnectOptions,
}

impl FrameSink for ConnectionInner {
    fn send_frame(&self, values: Vec<Value>) -> Result<(), CallError> {
        let bytes = encode_all(&values);
        self.outbound.send(bytes).map_err(|_| CallError::ConnectionClosed)
    }

    fn closed_signal(&self) -> ClosedSignal {
        self.closed.clone()
    }
}

impl Materialize for ConnectionInner {
    /// The hook the codec calls back into when it decodes a remote-object
    /// reference (spec.md §4.3 "Object materialization").
    fn materialize(&self, id: u64, type_name: &str) -> RemoteObjectRef {
        {
            let objects = self.objects.read().unwrap();
            if let Some((_, any)) = objects.get(&id) {
                return RemoteObjectRef {
                    id,
                    type_name: type_name.to_owned(),
                    handle: any.clone(),
                };
            }
        }

        let factory = registry::lookup(type_name).unwrap_or(registry::generic_factory);
        let sink: Weak<dyn FrameSink> = self.self_weak.clone();
        let (core, any) = factory(id, sink, &self.options);

        let mut objects = self.objects.write().unwrap();
        // another decode on the same connection could have raced us to the insert.
        let entry = objects.entry(id).or_insert_with(|| (core, any));
        RemoteObjectRef {
            id,
            type_name: type_name.to_owned(),
            handle: entry.1.clone(),
        }
    }
}

impl ConnectionInner {
    fn login_core(&self) -> Arc<HandleCore> {
        self.objects
            .read()
            .unwrap()
            .get(&LOGIN_OBJECT_ID)
            .expect("login object bootstrapped at connect time")
            .0
            .clone()
    }
}

/// A connection to a univedo server.
///
/// Created via [`Connection::connect`] (or [`Connection::dial`]/
/// [`Connection::open`] with the `tungstenite` feature). Closing it
/// (`Connection::close`, or dropping every handle plus the transport
/// closing) fails every pending call with a transport-closed error.
///
/// Cheap to clone: every clone shares the same dispatcher and object table.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Establishes a connection over an already-dialed transport, bootstraps
    /// the login object at id 0, and spawns the inbound/outbound tasks.
    pub fn connect(transport: Box<dyn Transport>) -> Connection {
        Connection::connect_with_options(transport, ConnectOptions::default())
    }

    /// Like [`Connection::connect`], but with non-default [`ConnectOptions`]
    /// (e.g. a wider row queue for a bulk-export workload).
    pub fn connect_with_options(transport: Box<dyn Transport>, options: ConnectOptions) -> Connection {
        let (writer, reader) = transport.split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        let inner = Arc::new_cyclic(|weak: &Weak<ConnectionInner>| ConnectionInner {
            objects: RwLock::new(HashMap::new()),
            outbound: outbound_tx,
            closed: ClosedSignal::new(),
            self_weak: weak.clone(),
            options,
        });

        {
            let sink: Weak<dyn FrameSink> = inner.self_weak.clone();
            let (core, any) = registry::generic_factory(LOGIN_OBJECT_ID, sink, &inner.options);
            inner.objects.write().unwrap().insert(LOGIN_OBJECT_ID, (core, any));
        }

        tokio::spawn(run_outbound(outbound_rx, writer, inner.closed.clone()));
        tokio::spawn(run_inbound(inner.clone(), reader));

        Connection { inner }
    }

    #[cfg(feature = "tungstenite")]
    pub async fn dial(url: &str) -> Result<Connection, ClientError> {
        let transport = crate::transport::WebSocketTransport::dial(url).await?;
        Ok(Connection::connect(Box::new(transport)))
    }

    /// `call("getSession", [credentials])` on the login object (spec.md
    /// §4.3).
    #[instrument(skip(self, credentials))]
    pub async fn get_session(&self, credentials: Value) -> Result<Arc<Session>, ClientError> {
        let login = self.inner.login_core();
        let result = login.call("getSession", vec![credentials]).await?;
        result
            .into_remote_object()
            .and_then(|r| r.downcast::<Session>())
            .ok_or(ClientError::UnexpectedReturnType("getSession", crate::session::TYPE_NAME))
    }

    /// Composes [`crate::driver_url::DriverUrl::parse`] with `connect`,
    /// `get_session`, and `get_perspective` the way a relational driver
    /// adapter would (spec.md §4.7).
    #[cfg(feature = "tungstenite")]
    pub async fn open(driver_url: &str) -> Result<(Connection, Arc<Session>, Arc<Perspective>), ClientError> {
        let parsed = crate::driver_url::DriverUrl::parse(driver_url)?;
        let connection = Connection::dial(parsed.ws_url.as_str()).await?;
        let session = connection.get_session(parsed.credentials).await?;
        let perspective = session.get_perspective(parsed.perspective).await?;
        Ok((connection, session, perspective))
    }

    /// Stops the inbound loop and fails every pending call. Idempotent.
    pub async fn close(&self) {
        self.inner.closed.fire();
    }
}

async fn run_outbound(
    mut outbound_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    mut writer: Box<dyn TransportWriter>,
    closed: ClosedSignal,
) {
    loop {
        tokio::select! {
            biased;
            _ = closed.notified() => break,
            frame = outbound_rx.recv() => {
                match frame {
                    None => break,
                    Some(bytes) => {
                        if let Err(err) = writer.send(bytes).await {
                            warn!(error = %err, "transport send failed, closing connection");
                            closed.fire();
                            break;
                        }
                    }
                }
            }
        }
        if closed.is_closed() {
            break;
        }
    }
    let _ = writer.close().await;
}

#[instrument(skip(inner, reader))]
async fn run_inbound(inner: Arc<ConnectionInner>, mut reader: Box<dyn crate::transport::TransportReader>) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = inner.closed.notified() => None,
            result = reader.recv() => match result {
                Ok(frame) => frame,
                Err(err) => {
                    error!(error = %err, "transport read failed");
                    None
                }
            },
        };

        let Some(bytes) = frame else { break };

        match decode_all(&bytes, &*inner) {
            Ok(values) => {
                if let Err(err) = dispatch(&inner, values) {
                    error!(error = %err, "protocol error, terminating connection");
                    break;
                }
            }
            Err(err) => {
                error!(error = %err, "codec error, terminating connection");
                break;
            }
        }

        if inner.closed.is_closed() {
            break;
        }
    }

    inner.closed.fire();
    let objects: Vec<_> = inner.objects.write().unwrap().drain().collect();
    for (_, (core, _)) in objects {
        core.fail_all_pending();
    }
    debug!("connection inbound loop terminated");
}

/// Routes one decoded message: `[object-id, ...remaining]` (spec.md §4.3
/// "Inbound loop").
fn dispatch(inner: &Arc<ConnectionInner>, mut values: Vec<Value>) -> Result<(), ProtocolError> {
    if values.is_empty() {
        return Err(ProtocolError::EmptyMessage);
    }
    let object_id = values.remove(0).as_uint().ok_or(ProtocolError::InvalidObjectId)?;

    let core = inner
        .objects
        .read()
        .unwrap()
        .get(&object_id)
        .map(|(core, _)| core.clone())
        .ok_or(ProtocolError::UnknownObjectId(object_id))?;

    let deleted = core.receive(values)?;
    if deleted {
        inner.objects.write().unwrap().remove(&object_id);
    }
    Ok(())
}
