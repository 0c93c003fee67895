//! End-to-end scenarios against an in-memory transport standing in for a
//! real univedo server (spec.md §8). Grounded in
//! tyler-potyondy-nrf-rpc's `tests/integration_test.rs` `MockUart` pattern:
//! a test double that records what the client sends and lets the test
//! script what arrives next, instead of spinning up a real socket.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use univedo_client::codec::{decode_all, encode_all, NoRemoteObjects};
use univedo_client::error::ClientError;
use univedo_client::transport::{Transport, TransportReader, TransportWriter};
use univedo_client::value::RemoteObjectRef;
use univedo_client::{ConnectOptions, Connection, Value};

struct TestTransport {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    inbound: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl Transport for TestTransport {
    fn split(self: Box<Self>) -> (Box<dyn TransportWriter>, Box<dyn TransportReader>) {
        (Box::new(TestWriter(self.outbound)), Box::new(TestReader(self.inbound)))
    }
}

struct TestWriter(mpsc::UnboundedSender<Vec<u8>>);

#[async_trait]
impl TransportWriter for TestWriter {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), univedo_client::error::TransportError> {
        let _ = self.0.send(frame);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), univedo_client::error::TransportError> {
        Ok(())
    }
}

struct TestReader(mpsc::UnboundedReceiver<Vec<u8>>);

#[async_trait]
impl TransportReader for TestReader {
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, univedo_client::error::TransportError> {
        Ok(self.0.recv().await)
    }
}

/// Wires up a `Connection` over channels the test drives directly: `to_test`
/// yields whatever the client sent, `to_client` delivers frames as if the
/// server had sent them.
fn harness(options: ConnectOptions) -> (Connection, mpsc::UnboundedReceiver<Vec<u8>>, mpsc::UnboundedSender<Vec<u8>>) {
    let (to_test_tx, to_test_rx) = mpsc::unbounded_channel();
    let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();
    let transport = TestTransport {
        outbound: to_test_tx,
        inbound: to_client_rx,
    };
    let connection = Connection::connect_with_options(Box::new(transport), options);
    (connection, to_test_rx, to_client_tx)
}

struct DecodedCall {
    object_id: u64,
    call_id: u64,
    method: String,
    #[allow(dead_code)]
    args: Vec<Value>,
}

async fn recv_call(rx: &mut mpsc::UnboundedReceiver<Vec<u8>>) -> DecodedCall {
    let bytes = rx.recv().await.expect("client did not send a frame");
    let mut values = decode_all(&bytes, &NoRemoteObjects).unwrap();
    assert_eq!(values.len(), 5, "expected a 5-value Call frame");
    let args = values.pop().unwrap().into_array().unwrap();
    let method = values.pop().unwrap().into_text().unwrap();
    let call_id = values.pop().unwrap().as_uint().unwrap();
    let opcode = values.pop().unwrap().as_uint().unwrap();
    assert_eq!(opcode, 1, "expected opcode Call");
    let object_id = values.pop().unwrap().as_uint().unwrap();
    DecodedCall {
        object_id,
        call_id,
        method,
        args,
    }
}

fn send_answer(tx: &mpsc::UnboundedSender<Vec<u8>>, object_id: u64, call_id: u64, status: u64, payload: Value) {
    let frame = encode_all(&[
        Value::UInt(object_id),
        Value::UInt(2),
        Value::UInt(call_id),
        Value::UInt(status),
        payload,
    ]);
    tx.send(frame).unwrap();
}

fn send_notify(tx: &mpsc::UnboundedSender<Vec<u8>>, object_id: u64, name: &str, args: Vec<Value>) {
    let frame = encode_all(&[
        Value::UInt(object_id),
        Value::UInt(3),
        Value::Text(name.to_owned()),
        Value::Array(args),
    ]);
    tx.send(frame).unwrap();
}

fn remote_object(id: u64, type_name: &str) -> Value {
    Value::RemoteObject(RemoteObjectRef {
        id,
        type_name: type_name.to_owned(),
        handle: Arc::new(()),
    })
}

/// Drives the bootstrap sequence (getSession -> getPerspective -> query ->
/// prepare -> execute) far enough to hand back a ready `ResultObject`, id 5.
async fn bootstrap_to_result(
    connection: &Connection,
    outbound: &mut mpsc::UnboundedReceiver<Vec<u8>>,
    inbound: &mpsc::UnboundedSender<Vec<u8>>,
) -> Arc<univedo_client::ResultObject> {
    let session_fut = {
        let credentials = Value::map([("token".to_owned(), Value::from("secret"))]);
        let connection = connection.clone();
        tokio::spawn(async move { connection.get_session(credentials).await })
    };
    let call = recv_call(outbound).await;
    assert_eq!(call.object_id, 0);
    assert_eq!(call.method, "getSession");
    send_answer(inbound, 0, call.call_id, 0, remote_object(1, "com.univedo.session"));
    let session = session_fut.await.unwrap().unwrap();

    let perspective_fut = {
        let session = session.clone();
        tokio::spawn(async move { session.get_perspective("persp-uuid").await })
    };
    let call = recv_call(outbound).await;
    assert_eq!(call.object_id, 1);
    assert_eq!(call.method, "getPerspective");
    send_answer(inbound, 1, call.call_id, 0, remote_object(2, "com.univedo.perspective"));
    let perspective = perspective_fut.await.unwrap().unwrap();

    let query_fut = {
        let perspective = perspective.clone();
        tokio::spawn(async move { perspective.query().await })
    };
    let call = recv_call(outbound).await;
    assert_eq!(call.object_id, 2);
    assert_eq!(call.method, "query");
    send_answer(inbound, 2, call.call_id, 0, remote_object(3, "com.univedo.query"));
    let query = query_fut.await.unwrap().unwrap();

    let statement_fut = {
        let query = query.clone();
        tokio::spawn(async move { query.prepare("select 1").await })
    };
    let call = recv_call(outbound).await;
    assert_eq!(call.object_id, 3);
    assert_eq!(call.method, "prepare");
    send_answer(inbound, 3, call.call_id, 0, remote_object(4, "com.univedo.statement"));
    let statement = statement_fut.await.unwrap().unwrap();

    send_notify(
        inbound,
        4,
        "setColumnNames",
        vec![Value::array([Value::from("one")])],
    );

    let execute_fut = {
        let statement = statement.clone();
        tokio::spawn(async move { statement.execute(HashMap::new()).await })
    };
    let call = recv_call(outbound).await;
    assert_eq!(call.object_id, 4);
    assert_eq!(call.method, "execute");
    send_answer(inbound, 4, call.call_id, 0, remote_object(5, "com.univedo.result"));
    execute_fut.await.unwrap().unwrap()
}

#[tokio::test]
async fn call_answer_roundtrip_returns_typed_handles() {
    let (connection, mut outbound, inbound) = harness(ConnectOptions::default());
    let result = bootstrap_to_result(&connection, &mut outbound, &inbound).await;
    assert_eq!(result.id(), 5);
}

#[tokio::test]
async fn call_ids_are_unique_and_increasing_per_object() {
    let (connection, mut outbound, inbound) = harness(ConnectOptions::default());
    let session_fut = {
        let connection = connection.clone();
        tokio::spawn(async move { connection.get_session(Value::map([])).await })
    };
    let call = recv_call(&mut outbound).await;
    send_answer(&inbound, 0, call.call_id, 0, remote_object(1, "com.univedo.session"));
    let session = session_fut.await.unwrap().unwrap();

    let first = {
        let session = session.clone();
        tokio::spawn(async move { session.ping(Value::from("a")).await })
    };
    let call1 = recv_call(&mut outbound).await;
    let second = {
        let session = session.clone();
        tokio::spawn(async move { session.ping(Value::from("b")).await })
    };
    let call2 = recv_call(&mut outbound).await;

    assert_ne!(call1.call_id, call2.call_id);
    send_answer(&inbound, 1, call1.call_id, 0, Value::from("a"));
    send_answer(&inbound, 1, call2.call_id, 0, Value::from("b"));
    assert_eq!(first.await.unwrap().unwrap(), Value::from("a"));
    assert_eq!(second.await.unwrap().unwrap(), Value::from("b"));
}

#[tokio::test]
async fn notification_delivers_rows_before_complete() {
    let (connection, mut outbound, inbound) = harness(ConnectOptions::default());
    let result = bootstrap_to_result(&connection, &mut outbound, &inbound).await;

    send_notify(&inbound, 5, "appendRow", vec![Value::array([Value::from(1i64)])]);
    send_notify(&inbound, 5, "appendRow", vec![Value::array([Value::from(2i64)])]);
    send_notify(&inbound, 5, "setComplete", vec![]);

    assert_eq!(result.next_row().await.unwrap(), Some(vec![Value::from(1i64)]));
    assert_eq!(result.next_row().await.unwrap(), Some(vec![Value::from(2i64)]));
    assert_eq!(result.next_row().await.unwrap(), None);
}

#[tokio::test]
async fn error_wins_even_if_rows_remain_queued() {
    let (connection, mut outbound, inbound) = harness(ConnectOptions::default());
    let result = bootstrap_to_result(&connection, &mut outbound, &inbound).await;

    send_notify(&inbound, 5, "appendRow", vec![Value::array([Value::from(1i64)])]);
    send_notify(&inbound, 5, "setError", vec![Value::from("syntax error")]);

    let err = result.next_row().await.unwrap_err();
    assert_eq!(err.to_string(), "remote error: syntax error");
}

#[tokio::test]
async fn empty_result_completes_with_no_rows() {
    let (connection, mut outbound, inbound) = harness(ConnectOptions::default());
    let result = bootstrap_to_result(&connection, &mut outbound, &inbound).await;

    send_notify(&inbound, 5, "setComplete", vec![]);
    assert_eq!(result.next_row().await.unwrap(), None);
}

#[tokio::test]
async fn set_id_publishes_last_inserted_id_and_rows_affected() {
    let (connection, mut outbound, inbound) = harness(ConnectOptions::default());
    let result = bootstrap_to_result(&connection, &mut outbound, &inbound).await;

    send_notify(&inbound, 5, "setId", vec![Value::UInt(42)]);
    send_notify(&inbound, 5, "setComplete", vec![]);

    assert_eq!(result.last_inserted_id().await.unwrap(), 42);
    assert_eq!(result.rows_affected().await.unwrap(), 1);
}

#[tokio::test]
async fn connection_teardown_fails_pending_calls() {
    let (connection, mut outbound, inbound) = harness(ConnectOptions::default());
    let pending = {
        let connection = connection.clone();
        tokio::spawn(async move { connection.get_session(Value::map([])).await })
    };
    let _ = recv_call(&mut outbound).await;

    drop(inbound);
    let outcome = pending.await.unwrap();
    assert!(matches!(outcome, Err(ClientError::ConnectionClosed) | Err(ClientError::Transport(_))));
}
