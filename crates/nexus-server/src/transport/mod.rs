//! The message-framed transport seam.
//!
//! A [`Transport`] is a pair of halves that move whole frames. The read half
//! is owned by the connection's read loop and the write half by its write
//! loop, so neither needs internal locking.

pub mod memory;
pub mod ws;

use async_trait::async_trait;

use crate::errors::TransportError;

/// Read half of a message-framed transport.
#[async_trait]
pub trait FrameReader: Send {
    /// Wait for the next whole frame.
    ///
    /// `Ok(None)` means the peer closed cleanly. Errors end the connection.
    async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError>;
}

/// Write half of a message-framed transport.
#[async_trait]
pub trait FrameWriter: Send {
    /// Write one whole frame.
    async fn write_frame(&mut self, frame: Vec<u8>) -> Result<(), TransportError>;

    /// Close the write half. Called once when the write loop exits.
    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// A connected transport ready to be served by a router.
pub struct Transport {
    peer: String,
    reader: Box<dyn FrameReader>,
    writer: Box<dyn FrameWriter>,
}

impl Transport {
    /// Assemble a transport from its halves. `peer` identifies the remote
    /// end in logs.
    pub fn new(
        peer: impl Into<String>,
        reader: impl FrameReader + 'static,
        writer: impl FrameWriter + 'static,
    ) -> Self {
        Self {
            peer: peer.into(),
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }

    /// Remote peer identifier.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub(crate) fn into_parts(self) -> (String, Box<dyn FrameReader>, Box<dyn FrameWriter>) {
        (self.peer, self.reader, self.writer)
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}
