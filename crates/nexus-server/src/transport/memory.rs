//! In-process transport backed by unbounded channels.
//!
//! [`pair`] returns the server-side [`Transport`] and a [`MemoryPeer`] that
//! plays the remote client. Used by unit tests and by embedders that want to
//! route packets without a socket.

use std::time::Duration;

use async_trait::async_trait;
use nexus_core::{Packet, PacketCodec};
use tokio::sync::mpsc;

use super::{FrameReader, FrameWriter, Transport};
use crate::errors::TransportError;

type Inbound = Result<Vec<u8>, TransportError>;

/// Create a connected in-memory transport.
pub fn pair(peer: impl Into<String>) -> (Transport, MemoryPeer) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

    let transport = Transport::new(
        peer,
        MemoryReader { rx: inbound_rx },
        MemoryWriter {
            tx: Some(outbound_tx),
        },
    );
    let peer = MemoryPeer {
        tx: Some(inbound_tx),
        rx: outbound_rx,
    };
    (transport, peer)
}

struct MemoryReader {
    rx: mpsc::UnboundedReceiver<Inbound>,
}

#[async_trait]
impl FrameReader for MemoryReader {
    async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        match self.rx.recv().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}

struct MemoryWriter {
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

#[async_trait]
impl FrameWriter for MemoryWriter {
    async fn write_frame(&mut self, frame: Vec<u8>) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(frame).map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.tx = None;
        Ok(())
    }
}

/// The client side of an in-memory transport.
#[derive(Debug)]
pub struct MemoryPeer {
    tx: Option<mpsc::UnboundedSender<Inbound>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl MemoryPeer {
    /// Deliver a raw frame to the server. Returns `false` once the server
    /// side has gone away or [`hang_up`](Self::hang_up) was called.
    pub fn send_frame(&self, frame: impl Into<Vec<u8>>) -> bool {
        self.tx
            .as_ref()
            .is_some_and(|tx| tx.send(Ok(frame.into())).is_ok())
    }

    /// Encode and deliver a packet.
    pub fn send_packet(&self, codec: &dyn PacketCodec, packet: &Packet) -> bool {
        self.send_frame(codec.encode(packet))
    }

    /// Make the server's next read fail with a protocol error.
    pub fn fail(&self, message: impl Into<String>) -> bool {
        self.tx.as_ref().is_some_and(|tx| {
            tx.send(Err(TransportError::Protocol(message.into())))
                .is_ok()
        })
    }

    /// Close the client-to-server direction. The server sees end of stream
    /// after draining frames already sent.
    pub fn hang_up(&mut self) {
        self.tx = None;
    }

    /// Next frame written by the server, or `None` once its writer closed.
    pub async fn recv_frame(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    /// Next frame decoded with `codec`, waiting at most `wait`.
    ///
    /// Returns `None` on timeout, on close, or if the frame does not decode.
    pub async fn recv_packet(&mut self, codec: &dyn PacketCodec, wait: Duration) -> Option<Packet> {
        let frame = tokio::time::timeout(wait, self.rx.recv()).await.ok()??;
        codec.decode(&frame).ok()
    }
}
