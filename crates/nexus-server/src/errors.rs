//! Transport and routing errors.
//!
//! Only transport read failures end a connection. Everything else is logged
//! and the offending frame or packet is dropped.

use thiserror::Error;

/// Failure reported by a transport half.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The other side of the transport is gone.
    #[error("transport closed")]
    Closed,
    /// Protocol-level failure reported by the underlying socket library.
    #[error("transport protocol error: {0}")]
    Protocol(String),
    /// I/O failure.
    #[error("transport io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a decoded packet was dropped instead of dispatched.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RoutingError {
    /// A kill packet arrived without a stream id.
    #[error("cannot kill stream '{packet_type}' without a stream id")]
    KillWithoutStreamId {
        /// Type of the kill packet (including the `-` prefix).
        packet_type: String,
    },
    /// A stream handler matched but the packet carries no stream id.
    #[error("cannot start stream '{packet_type}' without a stream id")]
    StreamWithoutStreamId {
        /// Type of the stream packet.
        packet_type: String,
    },
    /// No handler or stream handler is registered for the type.
    #[error("no handler for packet type '{packet_type}'")]
    UnknownType {
        /// The unmatched type.
        packet_type: String,
    },
}

impl RoutingError {
    /// Short label used as a metrics dimension.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::KillWithoutStreamId { .. } => "kill_without_stream_id",
            Self::StreamWithoutStreamId { .. } => "stream_without_stream_id",
            Self::UnknownType { .. } => "unknown_type",
        }
    }
}
