//! axum `WebSocket` adapter.
//!
//! Text and binary messages are both delivered as frames. Outgoing frames
//! are sent as text when they are valid UTF-8 and as binary otherwise.
//! Ping/pong is answered by the socket library and never reaches the router.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};

use super::{FrameReader, FrameWriter, Transport};
use crate::errors::TransportError;

/// Wrap an upgraded socket as a [`Transport`].
pub fn transport(socket: WebSocket, peer: impl Into<String>) -> Transport {
    let (sink, stream) = socket.split();
    Transport::new(peer, WsReader { stream }, WsWriter { sink })
}

struct WsReader {
    stream: SplitStream<WebSocket>,
}

#[async_trait]
impl FrameReader for WsReader {
    async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        loop {
            match self.stream.next().await {
                None | Some(Ok(Message::Close(_))) => return Ok(None),
                Some(Ok(Message::Text(text))) => return Ok(Some(text.as_str().as_bytes().to_vec())),
                Some(Ok(Message::Binary(data))) => return Ok(Some(data.to_vec())),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Err(e)) => return Err(TransportError::Protocol(e.to_string())),
            }
        }
    }
}

struct WsWriter {
    sink: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl FrameWriter for WsWriter {
    async fn write_frame(&mut self, frame: Vec<u8>) -> Result<(), TransportError> {
        let message = match String::from_utf8(frame) {
            Ok(text) => Message::Text(text.into()),
            Err(e) => Message::Binary(e.into_bytes().into()),
        };
        self.sink
            .send(message)
            .await
            .map_err(|e| TransportError::Protocol(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.sink
            .close()
            .await
            .map_err(|e| TransportError::Protocol(e.to_string()))
    }
}
