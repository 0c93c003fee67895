//! The message-framed byte stream the connection speaks over (spec.md §6).
//!
//! The core only needs "send one frame" / "receive one frame"; everything
//! about WebSocket handshakes, TLS, and reconnection lives outside it. A
//! `tokio-tungstenite`-backed implementation ships behind the `tungstenite`
//! feature for convenience.
//!
//! Split into a writer and a reader half up front (mirroring
//! `tokio::io::split` / `futures_util::StreamExt::split`) so the
//! connection can own one task reading frames and another writing them
//! without fighting the borrow checker over a single duplex object.

use async_trait::async_trait;

use crate::error::TransportError;

#[async_trait]
pub trait TransportWriter: Send {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError>;
    async fn close(&mut self) -> Result<(), TransportError>;
}

#[async_trait]
pub trait TransportReader: Send {
    /// Returns `Ok(None)` when the peer closed the stream cleanly.
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError>;
}

/// A message-framed bidirectional byte stream. Each frame carries exactly
/// one protocol message.
pub trait Transport: Send {
    fn split(self: Box<Self>) -> (Box<dyn TransportWriter>, Box<dyn TransportReader>);
}

#[cfg(feature = "tungstenite")]
pub use ws::WebSocketTransport;

#[cfg(feature = "tungstenite")]
mod ws {
    use async_trait::async_trait;
    use futures_util::stream::{SplitSink, SplitStream};
    use futures_util::{SinkExt, StreamExt};
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

    use super::{Transport, TransportReader, TransportWriter};
    use crate::error::TransportError;

    type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

    /// The default `Transport`: a binary-framed WebSocket connection.
    pub struct WebSocketTransport {
        inner: WsStream,
    }

    impl WebSocketTransport {
        /// Dials `url` (already decorated with the `/v1` protocol-version
        /// segment by the caller, per spec.md §6) and returns a transport
        /// ready for `Connection::connect`.
        pub async fn dial(url: &str) -> Result<Self, TransportError> {
            let (stream, _response) = tokio_tungstenite::connect_async(url)
                .await
                .map_err(TransportError::new)?;
            Ok(WebSocketTransport { inner: stream })
        }
    }

    impl Transport for WebSocketTransport {
        fn split(self: Box<Self>) -> (Box<dyn TransportWriter>, Box<dyn TransportReader>) {
            let (sink, stream) = self.inner.split();
            (Box::new(WsWriter(sink)), Box::new(WsReader(stream)))
        }
    }

    struct WsWriter(SplitSink<WsStream, Message>);

    #[async_trait]
    impl TransportWriter for WsWriter {
        async fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError> {
            self.0.send(Message::Binary(frame.into())).await.map_err(TransportError::new)
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            self.0.close().await.map_err(TransportError::new)
        }
    }

    struct WsReader(SplitStream<WsStream>);

    #[async_trait]
    impl TransportReader for WsReader {
        async fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
            loop {
                match self.0.next().await {
                    None => return Ok(None),
                    Some(Err(err)) => return Err(TransportError::new(err)),
                    Some(Ok(Message::Binary(bytes))) => return Ok(Some(bytes.into())),
                    Some(Ok(Message::Close(_))) => return Ok(None),
                    // ping/pong/text are handled transparently by tungstenite or
                    // irrelevant to this protocol; keep reading.
                    Some(Ok(_)) => continue,
                }
            }
        }
    }
}
