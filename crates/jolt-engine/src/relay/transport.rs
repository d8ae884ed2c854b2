use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use jolt_common::error::RelayError;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;
use url::Url;

/// Opens broker connections. Split into a writer owned by the relay and a
/// reader drained by the connection task.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<(Box<dyn FrameSink>, Box<dyn FrameSource>), RelayError>;
}

#[async_trait]
pub trait FrameSink: Send {
    async fn send_text(&mut self, text: String) -> Result<(), RelayError>;

    async fn close(&mut self);
}

#[async_trait]
pub trait FrameSource: Send {
    /// Next text frame; `None` once the connection closed.
    async fn next_text(&mut self) -> Option<Result<String, RelayError>>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// tokio-tungstenite client.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<(Box<dyn FrameSink>, Box<dyn FrameSource>), RelayError> {
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| RelayError::Connect(e.to_string()))?;
        let (sink, stream) = ws_stream.split();
        Ok((Box::new(WsSink { sink }), Box::new(WsSource { stream })))
    }
}

struct WsSink {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<(), RelayError> {
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| RelayError::Send(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.sink.close().await {
            debug!(error = %e, "Error while closing broker socket");
        }
    }
}

struct WsSource {
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl FrameSource for WsSource {
    async fn next_text(&mut self) -> Option<Result<String, RelayError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue,
                Err(e) => return Some(Err(RelayError::Receive(e.to_string()))),
            }
        }
    }
}
