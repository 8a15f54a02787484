//! Pipeline client over a single TCP connection.

use std::net::SocketAddr;

use pipehub_proto::{FrameHeader, MessageKind, ReadOutcome, read_frame, write_frame};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tokio::{
    io::AsyncWriteExt,
    net::{TcpStream, ToSocketAddrs},
};

use crate::error::ClientError;

/// Connection from one pipeline to the relay.
///
/// Sends and receives are sequential; the relay only writes to a pipeline
/// after it has registered.
#[derive(Debug)]
pub struct PipelineClient {
    stream: TcpStream,
    max_frame_size: u64,
    uuid: Option<String>,
}

impl PipelineClient {
    /// Connect to a relay.
    ///
    /// # Errors
    ///
    /// - `ClientError::Connection` if no address accepts the connection
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await.map_err(ClientError::Connection)?;
        stream.set_nodelay(true).map_err(ClientError::Connection)?;

        tracing::debug!(peer = ?stream.peer_addr().ok(), "connected to relay");

        Ok(Self { stream, max_frame_size: FrameHeader::DEFAULT_MAX_PAYLOAD_SIZE, uuid: None })
    }

    /// Limit the size of frames accepted from the relay.
    #[must_use]
    pub fn with_max_frame_size(mut self, max_frame_size: u64) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Register this connection as pipeline `uuid`.
    ///
    /// Sends a `graph` message carrying `graph` as its payload. Events
    /// addressed to `uuid` are delivered to this connection from then on.
    pub async fn register(&mut self, uuid: &str, graph: Value) -> Result<(), ClientError> {
        let message = json!({ "type": MessageKind::Graph.as_str(), "uuid": uuid, "payload": graph });
        self.send_json(&message).await?;
        self.uuid = Some(uuid.to_string());
        Ok(())
    }

    /// Send a message of the given type for the registered pipeline.
    ///
    /// The `uuid` field is omitted if the client has not registered.
    pub async fn send_message(
        &mut self,
        kind: &MessageKind,
        payload: Value,
    ) -> Result<(), ClientError> {
        let mut message = json!({ "type": kind.as_str(), "payload": payload });
        if let (Some(uuid), Some(object)) = (&self.uuid, message.as_object_mut()) {
            object.insert("uuid".to_string(), Value::String(uuid.clone()));
        }
        self.send_json(&message).await
    }

    /// Send any serializable value as one JSON frame.
    pub async fn send_json<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), ClientError> {
        let text = serde_json::to_string(value)?;
        self.send_text(&text).await
    }

    /// Send raw text as one frame.
    pub async fn send_text(&mut self, text: &str) -> Result<(), ClientError> {
        write_frame(&mut self.stream, text).await?;
        Ok(())
    }

    /// Wait for the next frame from the relay.
    ///
    /// Returns `None` once the relay has closed the connection.
    pub async fn recv(&mut self) -> Result<Option<String>, ClientError> {
        match read_frame(&mut self.stream, self.max_frame_size).await? {
            ReadOutcome::Message(text) => Ok(Some(text)),
            ReadOutcome::Malformed { error, .. } => Err(ClientError::InvalidText(error)),
            ReadOutcome::PeerClosed => Ok(None),
        }
    }

    /// Wait for the next frame and deserialize it.
    pub async fn recv_json<T: DeserializeOwned>(&mut self) -> Result<Option<T>, ClientError> {
        match self.recv().await? {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    /// Identifier this client registered, if any.
    pub fn uuid(&self) -> Option<&str> {
        self.uuid.as_deref()
    }

    /// Local address of the connection.
    pub fn local_addr(&self) -> Result<SocketAddr, ClientError> {
        self.stream.local_addr().map_err(ClientError::Connection)
    }

    /// Close the write side; the relay sees a clean disconnect.
    pub async fn shutdown(mut self) -> Result<(), ClientError> {
        self.stream.shutdown().await.map_err(ClientError::Connection)
    }
}
